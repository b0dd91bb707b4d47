//! Database migrations.
//!
//! Migrations are run in order, each inside its own transaction, and
//! tracked in the `migrations` table.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &mut Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        apply(conn, 1, "forms_schema", migrate_v1_forms_schema)?;
    }
    if current_version < 2 {
        apply(conn, 2, "photo_and_custom_indexes", migrate_v2_lookup_indexes)?;
    }

    info!("Migrations complete");
    Ok(())
}

/// Highest applied migration version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> DatabaseResult<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'migrations')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?)
}

fn apply(
    conn: &mut Connection,
    version: i32,
    name: &str,
    migrate: fn(&Connection) -> DatabaseResult<()>,
) -> DatabaseResult<()> {
    info!(version, name, "Applying migration");
    let tx = conn.transaction()?;
    migrate(&tx).map_err(|e| DatabaseError::Migration(format!("v{version} {name}: {e}")))?;
    tx.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    tx.commit()?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: the forms schema. Sensitive text columns hold field envelopes.
fn migrate_v1_forms_schema(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password TEXT NOT NULL,
            role TEXT NOT NULL,
            token_version INTEGER DEFAULT 0,
            last_login TIMESTAMP,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
        CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);

        CREATE TABLE IF NOT EXISTS forms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_no TEXT,
            reference_no TEXT,
            occupancy_name TEXT NOT NULL,
            facility_nature TEXT,
            service_type TEXT,
            preview_date DATE,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            status TEXT DEFAULT 'draft'
        );
        CREATE INDEX IF NOT EXISTS idx_forms_status ON forms(status);
        CREATE INDEX IF NOT EXISTS idx_forms_dates ON forms(preview_date, created_at);
        CREATE INDEX IF NOT EXISTS idx_forms_reference ON forms(file_no, reference_no);

        CREATE TABLE IF NOT EXISTS addresses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            shop_flat TEXT,
            building TEXT,
            road TEXT,
            block TEXT,
            area TEXT
        );

        CREATE TABLE IF NOT EXISTS requirements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            req1 BOOLEAN DEFAULT 0,
            req2 BOOLEAN DEFAULT 0,
            req3 BOOLEAN DEFAULT 0,
            req4 BOOLEAN DEFAULT 0,
            req5 BOOLEAN DEFAULT 0,
            req6 BOOLEAN DEFAULT 0,
            req7 BOOLEAN DEFAULT 0,
            req8 BOOLEAN DEFAULT 0,
            req9 BOOLEAN DEFAULT 0,
            req10 BOOLEAN DEFAULT 0,
            req11 BOOLEAN DEFAULT 0,
            req12 BOOLEAN DEFAULT 0,
            req13 BOOLEAN DEFAULT 0,
            req14 BOOLEAN DEFAULT 0,
            req15 BOOLEAN DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            observation1 TEXT,
            observation2 TEXT,
            observation3 TEXT,
            observation4 TEXT,
            observation5 TEXT,
            observation6 TEXT
        );

        CREATE TABLE IF NOT EXISTS inspection_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            is_compliant BOOLEAN,
            correction_days INTEGER
        );

        CREATE TABLE IF NOT EXISTS inspectors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            name TEXT,
            signature_path TEXT
        );

        CREATE TABLE IF NOT EXISTS officers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            reviewed_notes BOOLEAN DEFAULT 0,
            date DATE,
            signature_path TEXT
        );

        CREATE TABLE IF NOT EXISTS photos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            file_path TEXT,
            hash TEXT,
            metadata TEXT,
            upload_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS custom_requirements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            requirement TEXT NOT NULL,
            order_index INTEGER
        );

        CREATE TABLE IF NOT EXISTS custom_observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            observation TEXT NOT NULL,
            is_critical BOOLEAN DEFAULT 0,
            order_index INTEGER
        );

        CREATE TABLE IF NOT EXISTS custom_criteria (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            name TEXT NOT NULL,
            description TEXT,
            is_critical BOOLEAN DEFAULT 0,
            order_index INTEGER
        );

        CREATE TABLE IF NOT EXISTS custom_recommendations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            form_id INTEGER REFERENCES forms(id),
            text TEXT NOT NULL,
            priority TEXT DEFAULT 'normal',
            order_index INTEGER
        );
        ",
    )?;
    Ok(())
}

/// V2: per-form lookup indexes on the child tables.
fn migrate_v2_lookup_indexes(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_photos_form ON photos(form_id);
        CREATE INDEX IF NOT EXISTS idx_photos_hash ON photos(hash);
        CREATE INDEX IF NOT EXISTS idx_addresses_form ON addresses(form_id);
        CREATE INDEX IF NOT EXISTS idx_inspectors_form ON inspectors(form_id);
        CREATE INDEX IF NOT EXISTS idx_officers_form ON officers(form_id);
        CREATE INDEX IF NOT EXISTS idx_custom_requirements_form ON custom_requirements(form_id);
        CREATE INDEX IF NOT EXISTS idx_custom_observations_form ON custom_observations(form_id);
        ",
    )?;
    Ok(())
}
