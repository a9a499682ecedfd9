//! Physical database naming.

use crate::{DbError, DbResult};

/// Postgres truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Default prefix for tenant databases.
pub const DEFAULT_TENANT_PREFIX: &str = "db_tenant_";

/// Derive the physical database name for a tenant's database code.
///
/// The code is lower-cased and every character outside `[a-z0-9_]` becomes
/// `_`, so `3F2A-9C` under the default prefix becomes `db_tenant_3f2a_9c`.
/// Names are capped at [`MAX_IDENTIFIER_LEN`]. Distinct codes can map to the
/// same name; creating the second database then fails.
pub fn tenant_database_name(prefix: &str, database_code: &str) -> DbResult<String> {
    let code = database_code.trim();
    if code.is_empty() {
        return Err(DbError::Config("database code is empty".into()));
    }

    let mut name = String::with_capacity(prefix.len() + code.len());
    name.push_str(prefix);
    name.extend(code.chars().map(|c| {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            c
        } else {
            '_'
        }
    }));
    name.truncate(MAX_IDENTIFIER_LEN);
    Ok(name)
}

/// Quote an identifier for interpolation into DDL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_code() {
        let name =
            tenant_database_name(DEFAULT_TENANT_PREFIX, "3F2A1B9C-0D4E-4F5A-8B6C-7D8E9F0A1B2C")
                .unwrap();
        assert_eq!(name, "db_tenant_3f2a1b9c_0d4e_4f5a_8b6c_7d8e9f0a1b2c");
    }

    #[test]
    fn test_illegal_characters_are_replaced() {
        let name = tenant_database_name("db_tenant_", "a b;DROP\"x").unwrap();
        assert_eq!(name, "db_tenant_a_b_drop_x");
    }

    #[test]
    fn test_distinct_codes_can_collide() {
        let a = tenant_database_name("db_tenant_", "ab-c").unwrap();
        let b = tenant_database_name("db_tenant_", "AB_C").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_length_is_capped() {
        let name = tenant_database_name("db_tenant_", &"x".repeat(200)).unwrap();
        assert_eq!(name.len(), MAX_IDENTIFIER_LEN);
    }

    #[test]
    fn test_empty_code_is_rejected() {
        assert!(tenant_database_name("db_tenant_", "  ").is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("db_tenant_x"), "\"db_tenant_x\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
