//! Short collision-resistant ids for endpoints and webhooks.
//!
//! An endpoint id doubles as the ingestion URL's capability token (`POST
//! /h/{endpointId}`), so it needs the same random, unguessable shape the
//! teacher used for its tunnel tokens.

use rand::Rng;

const BASE62_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const RANDOM_LENGTH: usize = 27;

pub const ENDPOINT_PREFIX: &str = "ep_";
pub const WEBHOOK_PREFIX: &str = "wh_";

/// Generate a new id of the form `<prefix><27-char-base62-string>`.
pub fn generate(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let random_part: String = (0..RANDOM_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..BASE62_ALPHABET.len());
            BASE62_ALPHABET[idx] as char
        })
        .collect();
    format!("{prefix}{random_part}")
}

/// Checks the shape (prefix, length, alphabet) a generated id must have,
/// without a store round trip. Used to reject an obviously malformed
/// endpoint id from a request path before it ever reaches the store.
pub fn is_valid(id: &str, prefix: &str) -> bool {
    match id.strip_prefix(prefix) {
        Some(random_part) => {
            random_part.len() == RANDOM_LENGTH && random_part.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_correctly_shaped_endpoint_id() {
        let id = generate(ENDPOINT_PREFIX);
        assert!(id.starts_with(ENDPOINT_PREFIX));
        assert_eq!(id.len(), ENDPOINT_PREFIX.len() + RANDOM_LENGTH);
        assert!(is_valid(&id, ENDPOINT_PREFIX));
    }

    #[test]
    fn ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..200).map(|_| generate(WEBHOOK_PREFIX)).collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn rejects_wrong_prefix_and_length() {
        assert!(!is_valid("wh_abc", ENDPOINT_PREFIX));
        assert!(!is_valid("", ENDPOINT_PREFIX));
    }
}
