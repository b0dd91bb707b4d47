//! Columns stored encrypted, per table.

pub const FORMS: &[&str] = &["file_no", "reference_no", "occupancy_name"];
pub const ADDRESSES: &[&str] = &["shop_flat", "building", "road", "block"];
pub const INSPECTORS: &[&str] = &["name", "signature_path"];
pub const OFFICERS: &[&str] = &["signature_path"];

/// Encrypted columns of `table`. Empty for tables with none.
pub fn fields_for(table: &str) -> &'static [&'static str] {
    match table {
        "forms" => FORMS,
        "addresses" => ADDRESSES,
        "inspectors" => INSPECTORS,
        "officers" => OFFICERS,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tables() {
        assert_eq!(fields_for("forms"), FORMS);
        assert!(fields_for("addresses").contains(&"building"));
        assert_eq!(fields_for("officers"), &["signature_path"]);
    }

    #[test]
    fn unknown_table_has_no_sensitive_fields() {
        assert!(fields_for("photos").is_empty());
    }
}
