use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::Serialize;

use crate::key::TagKey;

/// A byte range in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Range {
    pub offset: usize,
    pub length: usize,
}

impl Range {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Bounds of the line a tag sits on. `end` includes the line terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

/// Ways a tag can violate the one-begin/one-end-per-key rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Corruption {
    #[error("duplicate begin tag")]
    DuplicateBegin,
    #[error("duplicate end tag")]
    DuplicateEnd,
    #[error("end tag without begin tag")]
    EndWithoutBegin,
    #[error("begin tag without end tag")]
    BeginWithoutEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub begin_range: Range,
    pub begin_line: usize,
    /// `None` while the entry is open.
    pub end_range: Option<Range>,
    pub end_line: Option<usize>,
    /// From the start of the begin tag's line through the end of the end tag's line.
    pub covered_span: Option<Range>,
    line_start: usize,
}

impl LedgerEntry {
    pub fn is_closed(&self) -> bool {
        self.end_range.is_some()
    }

    /// Begin and end ranges, once each; a single-line tag has only one.
    pub fn tag_ranges(&self) -> Vec<Range> {
        match self.end_range {
            Some(end) if end != self.begin_range => vec![self.begin_range, end],
            _ => vec![self.begin_range],
        }
    }
}

/// Map from comment key to the tags found for it in one buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagLedger {
    entries: BTreeMap<TagKey, LedgerEntry>,
}

impl TagLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an entry for `key`. Fails without touching the ledger if the key is known.
    pub fn record_begin(
        &mut self,
        key: &TagKey,
        range: Range,
        line: LineSpan,
    ) -> Result<(), Corruption> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => Err(Corruption::DuplicateBegin),
            Entry::Vacant(slot) => {
                slot.insert(LedgerEntry {
                    begin_range: range,
                    begin_line: line.line,
                    end_range: None,
                    end_line: None,
                    covered_span: None,
                    line_start: line.start,
                });
                Ok(())
            }
        }
    }

    /// Close the open entry for `key` and compute its covered span.
    pub fn record_end(
        &mut self,
        key: &TagKey,
        range: Range,
        line: LineSpan,
    ) -> Result<&LedgerEntry, Corruption> {
        let Some(entry) = self.entries.get_mut(key) else {
            return Err(Corruption::EndWithoutBegin);
        };
        if entry.is_closed() {
            return Err(Corruption::DuplicateEnd);
        }
        entry.end_range = Some(range);
        entry.end_line = Some(line.line);
        entry.covered_span = Some(Range::new(
            entry.line_start,
            line.end.saturating_sub(entry.line_start),
        ));
        Ok(entry)
    }

    pub fn get(&self, key: &TagKey) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &TagKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &TagKey) -> Option<LedgerEntry> {
        self.entries.remove(key)
    }

    pub fn all_open_entries(&self) -> Vec<(&TagKey, &LedgerEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_closed())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TagKey, &LedgerEntry)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TagKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
