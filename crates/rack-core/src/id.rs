//! Prefixed random identifiers.
//!
//! Builds and releases are identified by a one-letter prefix followed by
//! a fixed-length body of uppercase base-26 characters drawn from the
//! OS random source (`B` for builds, `R` for releases).

use rand::rngs::OsRng;
use rand::Rng;

/// Length of the random body of every generated identifier.
pub const ID_BODY_LENGTH: usize = 10;

/// Generate an identifier with the given prefix, e.g. `id("B")` ->
/// `"BABCDEFGHIJ"`.
pub fn id(prefix: &str) -> String {
    let mut rng = OsRng;
    let body: String = (0..ID_BODY_LENGTH)
        .map(|_| (b'A' + rng.gen_range(0..26u8)) as char)
        .collect();
    format!("{prefix}{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_prefix_and_length() {
        let id = id("B");
        assert_eq!(id.len(), 1 + ID_BODY_LENGTH);
        assert!(id.starts_with('B'));
    }

    #[test]
    fn body_is_uppercase_alpha() {
        let id = id("R");
        assert!(id[1..].chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn ids_differ() {
        // 26^10 values; two draws colliding would indicate a broken RNG.
        assert_ne!(id("B"), id("B"));
    }
}
