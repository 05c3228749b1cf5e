//! Random identifiers for tags, Call-IDs and branches.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// A random token suitable for a From/To tag
pub fn generate_tag() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// A globally unique message identifier (the part before `@` in a Call-ID)
pub fn generate_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_tokens() {
        let a = generate_tag();
        assert_eq!(a.len(), 10);
        assert_ne!(a, generate_tag());
        assert!(generate_message_id()
            .bytes()
            .all(crate::parser::is_token_char));
    }
}
