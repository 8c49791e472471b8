use tracing::debug;

use crate::buffer::TextBuffer;
use crate::error::Result;
use crate::grammar::TagGrammar;
use crate::key::TagKey;
use crate::ledger::Range;

/// Which side of a comment a physical tag stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagRole {
    Begin,
    End,
    /// Single-line tag: begin and end in one.
    Both,
}

impl TagRole {
    pub fn plays_begin(self) -> bool {
        matches!(self, TagRole::Begin | TagRole::Both)
    }

    pub fn plays_end(self) -> bool {
        matches!(self, TagRole::End | TagRole::Both)
    }
}

/// One tag found in a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagOccurrence {
    pub range: Range,
    pub line: usize,
    pub role: TagRole,
    pub key: TagKey,
}

/// Find the leftmost tag starting at or after `from`.
///
/// Holds no state between calls, so callers may edit the buffer and query
/// again from an adjusted offset. Pattern hits that carry no role marker or no
/// valid key are not tags and are skipped. Errors only when the buffer cannot
/// map a hit to a line.
pub fn find_next<B: TextBuffer + ?Sized>(
    grammar: &TagGrammar,
    buffer: &B,
    from: usize,
) -> Result<Option<TagOccurrence>> {
    let text = buffer.text();
    let mut from = from;

    while from <= text.len() {
        let Some(caps) = grammar.pattern().captures_at(text, from) else {
            return Ok(None);
        };
        let Some(whole) = caps.get(0) else {
            return Ok(None);
        };
        let skip_to = whole.start() + grammar.open().len();

        let role = match (caps.name("begin").is_some(), caps.name("end").is_some()) {
            (true, true) => TagRole::Both,
            (true, false) => TagRole::Begin,
            (false, true) => TagRole::End,
            (false, false) => {
                debug!(offset = whole.start(), "comment without role marker, skipping");
                from = skip_to;
                continue;
            }
        };

        let key = match TagKey::parse(&caps["key"], grammar.separator()) {
            Ok(key) => key,
            Err(e) => {
                debug!(offset = whole.start(), error = %e, "tag with unusable key, skipping");
                from = skip_to;
                continue;
            }
        };

        let line = buffer.line_of_offset(whole.start())?;
        return Ok(Some(TagOccurrence {
            range: Range::new(whole.start(), whole.len()),
            line,
            role,
            key,
        }));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemoryBuffer;

    fn java() -> TagGrammar {
        TagGrammar::new("/*", "*/", '|').unwrap()
    }

    #[test]
    fn test_finds_single_line_tag() {
        let buf = MemoryBuffer::new("a\n/*?R1|bob|c1?*/\nb\n");
        let occ = find_next(&java(), &buf, 0).unwrap().unwrap();
        assert_eq!(occ.range, Range::new(2, 15));
        assert_eq!(occ.line, 1);
        assert_eq!(occ.role, TagRole::Both);
        assert_eq!(occ.key.as_str(), "R1|bob|c1");
    }

    #[test]
    fn test_finds_leftmost_from_offset() {
        let buf = MemoryBuffer::new("x /*?|R|a|1|*/ y /*|R|a|1|?*/");
        let g = java();
        let first = find_next(&g, &buf, 0).unwrap().unwrap();
        assert_eq!(first.role, TagRole::Begin);
        assert_eq!(first.range.offset, 2);

        let second = find_next(&g, &buf, first.range.end()).unwrap().unwrap();
        assert_eq!(second.role, TagRole::End);
        assert_eq!(second.range.offset, 17);

        assert!(find_next(&g, &buf, second.range.end()).unwrap().is_none());
    }

    #[test]
    fn test_offset_inside_tag_skips_it() {
        let buf = MemoryBuffer::new("/*?|R|a|1|?*/");
        assert!(find_next(&java(), &buf, 1).unwrap().is_none());
    }

    #[test]
    fn test_offset_past_end_returns_none() {
        let buf = MemoryBuffer::new("abc");
        assert!(find_next(&java(), &buf, 3).unwrap().is_none());
        assert!(find_next(&java(), &buf, 10).unwrap().is_none());
    }

    #[test]
    fn test_skips_comment_without_marker() {
        let buf = MemoryBuffer::new("/* a | b | c */\n/*?|R|a|1|?*/");
        let occ = find_next(&java(), &buf, 0).unwrap().unwrap();
        assert_eq!(occ.line, 1);
        assert_eq!(occ.key.as_str(), "R|a|1");
    }

    #[test]
    fn test_skips_blank_key_field() {
        let buf = MemoryBuffer::new("/*?| |a|1|?*/");
        assert!(find_next(&java(), &buf, 0).unwrap().is_none());
    }

    #[test]
    fn test_sees_buffer_edits_between_calls() {
        let g = java();
        let mut buf = MemoryBuffer::new("/*?|R|a|1|?*/");
        assert!(find_next(&g, &buf, 0).unwrap().is_some());
        buf.replace(0, 0, "zz").unwrap();
        let occ = find_next(&g, &buf, 0).unwrap().unwrap();
        assert_eq!(occ.range.offset, 2);
    }

    #[test]
    fn test_role_predicates() {
        assert!(TagRole::Both.plays_begin() && TagRole::Both.plays_end());
        assert!(TagRole::Begin.plays_begin() && !TagRole::Begin.plays_end());
        assert!(!TagRole::End.plays_begin() && TagRole::End.plays_end());
    }
}
