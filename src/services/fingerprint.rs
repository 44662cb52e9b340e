use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

/// SHA-256 digest of the artifact bytes, lowercase hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Whether a job created at `created_at` still counts for deduplication.
///
/// The window is inclusive: a job exactly `window` old is still fresh.
pub fn within_window(created_at: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    let age = now.signed_duration_since(created_at);
    age <= window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint(b"%PDF-1.4 hemoglobin 13.5 g/dL");
        let b = fingerprint(b"%PDF-1.4 hemoglobin 13.5 g/dL");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_changes_with_any_byte() {
        let a = fingerprint(b"%PDF-1.4 hemoglobin 13.5 g/dL");
        let b = fingerprint(b"%PDF-1.4 hemoglobin 13.6 g/dL");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_of_empty_input() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_within_window() {
        let now = Utc::now();
        let window = Duration::hours(24);

        // Fresh entry (1 hour old)
        assert!(within_window(now - Duration::hours(1), window, now));

        // Borderline entry (exactly 24 hours old)
        assert!(within_window(now - Duration::hours(24), window, now));

        // Expired entry (25 hours old)
        assert!(!within_window(now - Duration::hours(25), window, now));

        // Custom window (1 hour)
        assert!(!within_window(now - Duration::minutes(61), Duration::hours(1), now));
    }
}
