//! Routing codes and subdomain slugs.

use crate::{TenantError, TenantResult};
use rand::Rng;

/// Length of generated routing codes.
pub const ROUTING_CODE_LEN: usize = 11;

const ROUTING_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a routing code such as `FR34JJO390G`.
pub fn generate_routing_code() -> String {
    let mut rng = rand::rng();
    (0..ROUTING_CODE_LEN)
        .map(|_| ROUTING_CODE_CHARSET[rng.random_range(0..ROUTING_CODE_CHARSET.len())] as char)
        .collect()
}

/// Check a caller-supplied routing code: 3 to 50 ASCII letters, digits or `-`.
pub fn validate_routing_code(code: &str) -> TenantResult<()> {
    let valid = (3..=50).contains(&code.len())
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid {
        return Err(TenantError::Invalid(format!(
            "routing code '{}' must be 3-50 letters, digits or '-'",
            code
        )));
    }
    Ok(())
}

/// Normalize a subdomain into a URL-safe slug.
///
/// Spaces and `_` become `-`, other characters outside `[a-z0-9-]` are
/// dropped, and runs of `-` collapse. Fails unless the result has 3 to 50
/// characters.
pub fn normalize_slug(input: &str) -> TenantResult<String> {
    let mut slug = String::with_capacity(input.len());
    for c in input.to_lowercase().chars() {
        let c = match c {
            ' ' | '_' => '-',
            c => c,
        };
        let keep = c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
        if keep && !(c == '-' && slug.ends_with('-')) {
            slug.push(c);
        }
    }
    let slug = slug.trim_matches('-').to_string();

    if slug.len() < 3 {
        return Err(TenantError::Invalid(
            "subdomain is too short after normalization".into(),
        ));
    }
    if slug.len() > 50 {
        return Err(TenantError::Invalid(
            "subdomain is too long (max 50 characters)".into(),
        ));
    }
    Ok(slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes() {
        for _ in 0..100 {
            let code = generate_routing_code();
            assert_eq!(code.len(), ROUTING_CODE_LEN);
            assert!(code.bytes().all(|b| ROUTING_CODE_CHARSET.contains(&b)));
            assert!(validate_routing_code(&code).is_ok());
        }
    }

    #[test]
    fn test_validate_routing_code() {
        assert!(validate_routing_code("FR34JJO390G").is_ok());
        assert!(validate_routing_code("ab").is_err());
        assert!(validate_routing_code("has space").is_err());
        assert!(validate_routing_code(&"A".repeat(51)).is_err());
    }

    #[test]
    fn test_normalize_slug() {
        assert_eq!(normalize_slug("Acme Corp").unwrap(), "acme-corp");
        assert_eq!(normalize_slug("  my__Shop!! 2  ").unwrap(), "my-shop-2");
        assert_eq!(normalize_slug("--a-b--c--").unwrap(), "a-b-c");
        assert_eq!(normalize_slug("Café Rio").unwrap(), "caf-rio");
        assert!(normalize_slug("a!").is_err());
        assert!(normalize_slug(&"x".repeat(51)).is_err());
        assert_eq!(normalize_slug(&"x".repeat(50)).unwrap().len(), 50);
    }
}
