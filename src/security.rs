use subtle::ConstantTimeEq;

/// Constant-time string comparison to prevent timing attacks
/// Use this for comparing the admin API key and the settings nonce
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Check a presented token against the expected one; a missing token never matches
pub fn verify_token(expected: &str, presented: Option<&str>) -> bool {
    match presented {
        Some(token) if !expected.is_empty() => constant_time_compare(expected, token),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret123", "secret123"));
        assert!(!constant_time_compare("secret123", "secret124"));
        assert!(!constant_time_compare("secret123", "secret12"));
        assert!(!constant_time_compare("", "secret"));
    }

    #[test]
    fn test_verify_token() {
        assert!(verify_token("nonce-1", Some("nonce-1")));
        assert!(!verify_token("nonce-1", Some("nonce-2")));
        assert!(!verify_token("nonce-1", None));
        assert!(!verify_token("", Some("")));
    }
}
