//! Session codes.
//!
//! A session code is the only credential a viewer needs, so generation must
//! be unpredictable: codes come from the OS entropy source, never a seeded
//! PRNG.

use rand::rngs::OsRng;
use rand::Rng;

/// Characters a session code may contain.
///
/// Visually ambiguous characters (`0`/`O`, `1`/`I`/`L`) are excluded so codes
/// survive being read out loud.
pub const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Fixed session code length.
pub const SESSION_CODE_LEN: usize = 6;

/// Generate a random session code.
pub fn generate_session_code() -> String {
    let mut rng = OsRng;
    (0..SESSION_CODE_LEN)
        .map(|_| SESSION_CODE_ALPHABET[rng.gen_range(0..SESSION_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of a user-supplied code: surrounding whitespace dropped,
/// ASCII upper-cased. Idempotent.
pub fn normalize_session_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Whether a (normalized) code has the right length and alphabet.
pub fn is_valid_session_code(code: &str) -> bool {
    code.len() == SESSION_CODE_LEN && code.bytes().all(|b| SESSION_CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..1_000 {
            let code = generate_session_code();
            assert_eq!(code.len(), SESSION_CODE_LEN);
            assert!(is_valid_session_code(&code), "bad code: {code}");
        }
    }

    #[test]
    fn alphabet_excludes_ambiguous_characters() {
        for banned in [b'0', b'O', b'I', b'1', b'L'] {
            assert!(!SESSION_CODE_ALPHABET.contains(&banned));
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["  abc234\t", "ABC234", "aBc234 "] {
            let once = normalize_session_code(raw);
            assert_eq!(once, "ABC234");
            assert_eq!(normalize_session_code(&once), once);
        }
    }

    #[test]
    fn validity_rejects_wrong_length_and_alphabet() {
        assert!(is_valid_session_code("ABC234"));
        assert!(!is_valid_session_code("ABC23"));
        assert!(!is_valid_session_code("ABC2345"));
        assert!(!is_valid_session_code("ABC23O"));
        assert!(!is_valid_session_code("abc234"));
    }
}
