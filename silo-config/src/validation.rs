// Configuration validation

use crate::{ConfigError, Result};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Configuration validator with rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate that a number is within range
    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::Invalid(format!(
                "{} must be between {} and {}",
                field, min, max
            )));
        }
        Ok(())
    }

    /// Validate a lower/upper bound pair
    pub fn ordered<T: PartialOrd + std::fmt::Display>(
        lower: T,
        upper: T,
        field: &str,
    ) -> Result<()> {
        if lower > upper {
            return Err(ConfigError::Invalid(format!(
                "{}: minimum ({}) exceeds maximum ({})",
                field, lower, upper
            )));
        }
        Ok(())
    }

    /// Validate that a value is in a list of allowed values
    pub fn one_of<T: PartialEq>(value: &T, allowed: &[T], field: &str) -> Result<()> {
        if !allowed.contains(value) {
            return Err(ConfigError::Invalid(format!(
                "{} must be one of the allowed values",
                field
            )));
        }
        Ok(())
    }

    /// Validate a Redis URL
    pub fn is_redis_url(value: &str, field: &str) -> Result<()> {
        if !value.starts_with("redis://") && !value.starts_with("rediss://") {
            return Err(ConfigError::Invalid(format!(
                "{} must be a redis:// or rediss:// URL",
                field
            )));
        }
        Ok(())
    }

    /// Validate port number
    pub fn is_port(value: u16, field: &str) -> Result<()> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be a valid port number",
                field
            )));
        }
        Ok(())
    }

    /// Validate a lowercase SQL identifier fragment (`[a-z0-9_]`)
    pub fn is_identifier(value: &str, field: &str) -> Result<()> {
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !value.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            return Err(ConfigError::Invalid(format!(
                "{} must contain only lowercase letters, digits and '_' and not start with a digit",
                field
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty_validation() {
        assert!(ConfigValidator::not_empty("value", "field").is_ok());
        assert!(ConfigValidator::not_empty("", "field").is_err());
        assert!(ConfigValidator::not_empty("   ", "field").is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(ConfigValidator::in_range(5, 1, 10, "field").is_ok());
        assert!(ConfigValidator::in_range(0, 1, 10, "field").is_err());
        assert!(ConfigValidator::in_range(11, 1, 10, "field").is_err());
    }

    #[test]
    fn test_ordered_validation() {
        assert!(ConfigValidator::ordered(2, 20, "pool").is_ok());
        assert!(ConfigValidator::ordered(5, 5, "pool").is_ok());
        assert!(ConfigValidator::ordered(21, 20, "pool").is_err());
    }

    #[test]
    fn test_one_of_validation() {
        let allowed = ["disable", "require"];
        assert!(ConfigValidator::one_of(&"require", &allowed, "ssl_mode").is_ok());
        assert!(ConfigValidator::one_of(&"sometimes", &allowed, "ssl_mode").is_err());
    }

    #[test]
    fn test_redis_url_validation() {
        assert!(ConfigValidator::is_redis_url("redis://localhost:6379", "url").is_ok());
        assert!(ConfigValidator::is_redis_url("rediss://cache:6380", "url").is_ok());
        assert!(ConfigValidator::is_redis_url("http://localhost", "url").is_err());
    }

    #[test]
    fn test_port_validation() {
        assert!(ConfigValidator::is_port(5432, "field").is_ok());
        assert!(ConfigValidator::is_port(0, "field").is_err());
    }

    #[test]
    fn test_identifier_validation() {
        assert!(ConfigValidator::is_identifier("db_tenant_", "prefix").is_ok());
        assert!(ConfigValidator::is_identifier("DB-Tenant", "prefix").is_err());
        assert!(ConfigValidator::is_identifier("1db", "prefix").is_err());
        assert!(ConfigValidator::is_identifier("", "prefix").is_err());
    }
}
