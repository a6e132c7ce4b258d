//! Shared utilities used by every adapter.

use agentcore_domain::error::{ProviderError, ProviderErrorKind};

/// Map a [`reqwest::Error`] into a [`ProviderError`] for a given
/// provider/model, classifying it the same way an HTTP error response
/// would be classified.
pub(crate) fn from_reqwest(provider: &str, model: &str, e: reqwest::Error) -> ProviderError {
    let kind = if e.is_timeout() {
        ProviderErrorKind::Transient
    } else {
        ProviderErrorKind::classify(e.status().map(|s| s.as_u16()), &e.to_string())
    };
    ProviderError::new(provider, model, e.to_string(), kind)
}

/// Exponential backoff with jitter: `base * 2^attempt * jitter(0.8, 1.2)`.
/// Capped at 1s when `test_mode` is set.
pub fn backoff_duration(base_ms: u64, attempt: u32, test_mode: bool) -> std::time::Duration {
    let jitter = rand::Rng::gen_range(&mut rand::thread_rng(), 0.8..=1.2);
    let raw_ms = (base_ms as f64) * 2f64.powi(attempt as i32) * jitter;
    let ms = if test_mode {
        raw_ms.min(1000.0)
    } else {
        raw_ms
    };
    std::time::Duration::from_millis(ms.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_capped_in_test_mode() {
        let d = backoff_duration(500, 10, true);
        assert!(d.as_millis() <= 1000);
    }

    #[test]
    fn backoff_grows_with_attempt() {
        let d0 = backoff_duration(500, 0, false);
        let d3 = backoff_duration(500, 3, false);
        assert!(d3 > d0);
    }
}
