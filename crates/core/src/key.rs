//! Shard key derivation.
//!
//! A shard key is `"<normalize(name)>:<normalize(originalname)>"`. Normalized
//! tokens never contain `:`, so the separator is unambiguous.

use crate::config::DuplicatesConfig;
use crate::normalize::Normalizer;

/// Separator between the two halves of a shard key.
pub const KEY_SEPARATOR: char = ':';

/// Compute the shard key for a release.
///
/// Returns `None` when either half normalizes to nothing; such a record has
/// no valid home and must be rejected by the caller.
pub fn bucket_key(normalizer: &Normalizer, name: &str, originalname: &str) -> Option<String> {
    let n = normalizer.normalize(name);
    let o = normalizer.normalize(originalname);
    join_key(&n, &o)
}

/// Join two already-normalized tokens into a key.
pub fn join_key(search_name: &str, search_originalname: &str) -> Option<String> {
    if search_name.is_empty() || search_originalname.is_empty() {
        return None;
    }
    Some(format!(
        "{}{}{}",
        search_name, KEY_SEPARATOR, search_originalname
    ))
}

/// Split a key into its two halves. `None` if the key is malformed.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (n, o) = key.split_once(KEY_SEPARATOR)?;
    if n.is_empty() || o.is_empty() || o.contains(KEY_SEPARATOR) {
        return None;
    }
    Some((n, o))
}

pub fn is_valid_key(key: &str) -> bool {
    split_key(key).is_some()
}

/// True for a non-empty token made only of ASCII digits ("1984", "911").
pub fn is_numeric_token(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// Heuristic for keys whose two halves are identical (`ponies:ponies`).
///
/// Such keys usually mean a scraper could not tell the localized and the
/// original title apart. Purely numeric titles ("1984", "911") are very often
/// legitimately identical in both languages, so they can be excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateKeyPolicy {
    pub exclude_numeric: bool,
}

impl Default for DuplicateKeyPolicy {
    fn default() -> Self {
        Self {
            exclude_numeric: true,
        }
    }
}

impl DuplicateKeyPolicy {
    pub fn from_config(config: &DuplicatesConfig) -> Self {
        Self {
            exclude_numeric: config.exclude_numeric_self_keys,
        }
    }

    pub fn is_self_duplicate(&self, key: &str) -> bool {
        match split_key(key) {
            Some((n, o)) if n == o => !(self.exclude_numeric && is_numeric_token(n)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str, orig: &str) -> Option<String> {
        bucket_key(&Normalizer::default(), name, orig)
    }

    #[test]
    fn test_key_format() {
        assert_eq!(
            key("Интерстеллар", "Interstellar").as_deref(),
            Some("интерстеллар:interstellar")
        );
    }

    #[test]
    fn test_key_folds_variants_together() {
        let a = key("Interstellar", "Interstellar");
        let b = key("interstellar ", "INTERSTELLAR");
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_deterministic() {
        let first = key("Бойцовский клуб", "Fight Club");
        for _ in 0..10 {
            assert_eq!(key("Бойцовский клуб", "Fight Club"), first);
        }
    }

    #[test]
    fn test_empty_half_is_invalid() {
        assert_eq!(key("", ""), None);
        assert_eq!(key("Matrix", ""), None);
        assert_eq!(key("", "Matrix"), None);
        assert_eq!(key("---", "Matrix"), None);
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("a:b"), Some(("a", "b")));
        assert_eq!(split_key("a:"), None);
        assert_eq!(split_key(":b"), None);
        assert_eq!(split_key("ab"), None);
        assert_eq!(split_key("a:b:c"), None);
        assert!(is_valid_key("matrix:matrix"));
    }

    #[test]
    fn test_numeric_token() {
        assert!(is_numeric_token("1984"));
        assert!(!is_numeric_token("1984x"));
        assert!(!is_numeric_token(""));
    }

    #[test]
    fn test_self_duplicate_policy() {
        let strict = DuplicateKeyPolicy {
            exclude_numeric: true,
        };
        assert!(strict.is_self_duplicate("ponies:ponies"));
        assert!(!strict.is_self_duplicate("1984:1984"));
        assert!(!strict.is_self_duplicate("пони:ponies"));

        let loose = DuplicateKeyPolicy {
            exclude_numeric: false,
        };
        assert!(loose.is_self_duplicate("1984:1984"));
        assert!(!loose.is_self_duplicate("broken"));
    }
}
