use rand::Rng;

/// Validate an 8-hex-character Pro key against the configured prime.
///
/// A key is valid iff its hex value, interpreted as an integer, is
/// positive and a multiple of `prime`.
pub fn validate_pro_key(pro_key: &str, prime: u64) -> bool {
    match u64::from_str_radix(pro_key, 16) {
        Ok(value) if value > 0 => value % prime == 0,
        _ => false,
    }
}

/// Generate a new valid Pro key: pick a random multiplier in `[1, 1000]`,
/// multiply by `prime`, zero-pad the uppercase hex to at least 8 characters.
pub fn generate_pro_key(prime: u64) -> String {
    let multiplier: u64 = rand::thread_rng().gen_range(1..=1000);
    let decimal_value = prime * multiplier;
    format!("{decimal_value:08X}")
}

/// Extract and validate `pro_user_key` from a parsed query-string map.
pub fn extract_pro_key_from_query(
    query_params: &std::collections::HashMap<String, String>,
    prime: u64,
) -> Option<String> {
    let key = query_params.get("pro_user_key")?;
    if validate_pro_key(key, prime) {
        Some(key.clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIME: u64 = 982_451;

    #[test]
    fn generated_keys_validate() {
        for _ in 0..50 {
            let key = generate_pro_key(PRIME);
            assert!(validate_pro_key(&key, PRIME), "key {key} should validate");
        }
    }

    #[test]
    fn non_multiple_of_prime_is_invalid() {
        // 982451 * 3 + 1 is not a multiple of the prime.
        let not_multiple = PRIME * 3 + 1;
        let hex = format!("{not_multiple:08X}");
        assert!(!validate_pro_key(&hex, PRIME));
    }

    #[test]
    fn zero_is_invalid() {
        assert!(!validate_pro_key("00000000", PRIME));
    }

    #[test]
    fn non_hex_is_invalid() {
        assert!(!validate_pro_key("not-hex!", PRIME));
    }

    #[test]
    fn extract_from_query_rejects_invalid() {
        let mut params = std::collections::HashMap::new();
        params.insert("pro_user_key".to_string(), "00000001".to_string());
        assert!(extract_pro_key_from_query(&params, PRIME).is_none());
    }

    #[test]
    fn extract_from_query_accepts_valid() {
        let key = generate_pro_key(PRIME);
        let mut params = std::collections::HashMap::new();
        params.insert("pro_user_key".to_string(), key.clone());
        assert_eq!(extract_pro_key_from_query(&params, PRIME), Some(key));
    }
}
