//! 128-bit random identifiers for users (`@...`) and sessions (`$...`).

use rand::RngCore;

/// Generate a random 128-bit id, hex-formatted in UUID-like groups and
/// prefixed with `prefix` (`@` for users, `$` for sessions).
pub fn random_id(prefix: char) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);

    format!(
        "{prefix}{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

/// True iff `candidate` looks like a session id (the `$` prefix used by
/// the `select` instruction to distinguish "join existing session" from
/// "start a new session for this protocol name").
pub fn is_session_id(candidate: &str) -> bool {
    candidate.starts_with('$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = random_id('@');
        let b = random_id('@');
        assert!(a.starts_with('@'));
        assert_ne!(a, b);
    }

    #[test]
    fn session_id_detection() {
        assert!(is_session_id("$abc"));
        assert!(!is_session_id("rdp"));
    }
}
