// Shared hashing / formatting helpers.

use sha2::{Digest, Sha256};

/// `sha256:<64 hex chars>` — never persist the raw API key.
pub fn hash_api_key(key: &str) -> String {
    format!("sha256:{}", hex_sha256(key.as_bytes()))
}

/// Content hash used for `request_hash` — plain hex, no prefix.
pub fn hash_content(content: &str) -> String {
    hex_sha256(content.as_bytes())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// `formatBytes` — a number and a unit separated by a single space.
pub fn format_bytes(n: u64) -> String {
    if n == 0 {
        return "0 B".to_string();
    }
    let mut value = n as f64;
    let mut unit_idx = 0;
    while value >= 1024.0 && unit_idx < UNITS.len() - 1 {
        value /= 1024.0;
        unit_idx += 1;
    }
    if unit_idx == 0 {
        format!("{n} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_api_key_is_deterministic_and_prefixed() {
        let a = hash_api_key("sk-test-123");
        let b = hash_api_key("sk-test-123");
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 64);
    }

    #[test]
    fn hash_api_key_distinguishes_inputs() {
        assert_ne!(hash_api_key("a"), hash_api_key("b"));
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
