use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// Character marking which side(s) of a pair a physical tag represents.
pub const MARKER: char = '?';

/// Separator used between key fields unless configured otherwise.
pub const DEFAULT_SEPARATOR: char = '|';

/// Composite identifier of a review comment: `(review, author, id)`.
///
/// Equality, ordering and hashing all go through the serialized form
/// `review<sep>author<sep>id`, so two keys built with different separators
/// are different keys.
#[derive(Debug, Clone)]
pub struct TagKey {
    review: String,
    author: String,
    id: String,
    separator: char,
    repr: String,
}

impl TagKey {
    pub fn new(review: &str, author: &str, id: &str, separator: char) -> Result<Self> {
        for (field, value) in [("review", review), ("author", author), ("id", id)] {
            validate_field(field, value, separator)?;
        }
        Ok(Self {
            review: review.to_string(),
            author: author.to_string(),
            id: id.to_string(),
            separator,
            repr: format!("{review}{separator}{author}{separator}{id}"),
        })
    }

    /// Parse a serialized key. Whitespace around each field is ignored.
    pub fn parse(raw: &str, separator: char) -> Result<Self> {
        let fields: Vec<&str> = raw.split(separator).map(str::trim).collect();
        match fields.as_slice() {
            [review, author, id] => Self::new(review, author, id, separator),
            _ => Err(Error::InvalidKey(format!(
                "expected review{separator}author{separator}id, got '{raw}'"
            ))),
        }
    }

    pub fn review(&self) -> &str {
        &self.review
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }
}

fn validate_field(field: &str, value: &str, separator: char) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidKey(format!("{field} must not be empty")));
    }
    if value.contains(separator) || value.contains(MARKER) {
        return Err(Error::InvalidKey(format!(
            "{field} '{value}' contains reserved character '{separator}' or '{MARKER}'"
        )));
    }
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidKey(format!(
            "{field} '{}' contains a line break",
            value.escape_debug()
        )));
    }
    if value.trim() != value {
        return Err(Error::InvalidKey(format!(
            "{field} '{value}' has surrounding whitespace"
        )));
    }
    Ok(())
}

impl PartialEq for TagKey {
    fn eq(&self, other: &Self) -> bool {
        self.repr == other.repr
    }
}

impl Eq for TagKey {}

impl PartialOrd for TagKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.repr.cmp(&other.repr)
    }
}

impl Hash for TagKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.repr.hash(state);
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_serializes_in_fixed_order() {
        let key = TagKey::new("R1", "bob", "c1", '|').unwrap();
        assert_eq!(key.as_str(), "R1|bob|c1");
        assert_eq!(key.review(), "R1");
        assert_eq!(key.author(), "bob");
        assert_eq!(key.id(), "c1");
    }

    #[test]
    fn test_custom_separator() {
        let key = TagKey::new("R1", "bob", "c1", ';').unwrap();
        assert_eq!(key.to_string(), "R1;bob;c1");
    }

    #[test]
    fn test_rejects_separator_in_field() {
        let err = TagKey::new("R|1", "bob", "c1", '|').unwrap_err();
        assert!(err.to_string().contains("reserved character"));
    }

    #[test]
    fn test_rejects_marker_in_field() {
        assert!(TagKey::new("R1", "bo?b", "c1", '|').is_err());
    }

    #[test]
    fn test_rejects_empty_and_multiline_fields() {
        assert!(TagKey::new("", "bob", "c1", '|').is_err());
        assert!(TagKey::new("R1", "bob\n", "c1", '|').is_err());
        assert!(TagKey::new("R1", " bob", "c1", '|').is_err());
    }

    #[test]
    fn test_internal_whitespace_allowed() {
        let key = TagKey::new("R1", "Jane Doe", "0", '|').unwrap();
        assert_eq!(key.author(), "Jane Doe");
    }

    #[test]
    fn test_parse_trims_fields() {
        let key = TagKey::parse(" R1 | bob |c1 ", '|').unwrap();
        assert_eq!(key.as_str(), "R1|bob|c1");
    }

    #[test]
    fn test_parse_wrong_field_count() {
        assert!(TagKey::parse("R1|bob", '|').is_err());
        assert!(TagKey::parse("R1|bob|c1|x", '|').is_err());
    }

    #[test]
    fn test_ordering_follows_serialized_string() {
        // '|' sorts after ' ', so "a b|..." < "a|..." even though "a" < "a b"
        let spaced = TagKey::new("a b", "x", "1", '|').unwrap();
        let plain = TagKey::new("a", "x", "1", '|').unwrap();
        assert!(spaced < plain);
    }

    #[test]
    fn test_equality_includes_separator() {
        let a = TagKey::new("R1", "bob", "c1", '|').unwrap();
        let b = TagKey::new("R1", "bob", "c1", ';').unwrap();
        assert_ne!(a, b);
        assert_eq!(a, TagKey::parse("R1|bob|c1", '|').unwrap());
    }
}
