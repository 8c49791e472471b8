use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bridge::{AnnotationBridge, MarkerBackend};
use crate::buffer::TextBuffer;
use crate::error::{Error, Result};
use crate::grammar::{FileGrammar, TagGrammar};
use crate::key::TagKey;
use crate::ledger::{LedgerEntry, Range, TagLedger};
use crate::resolver::{self, Persist, ScanOutcome, ScanReport};

/// Lines selected in the editor, 0-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start_line: usize,
    pub end_line: usize,
}

impl Selection {
    pub fn lines(start_line: usize, end_line: usize) -> Self {
        Self {
            start_line,
            end_line,
        }
    }

    pub fn line(line: usize) -> Self {
        Self::lines(line, line)
    }

    pub fn is_single_line(&self) -> bool {
        self.start_line == self.end_line
    }
}

/// Everything known about the tags of one open buffer.
///
/// Operations against a session must be serialized by the caller. Sessions
/// for different buffers share nothing but their read-only grammar.
pub struct ReviewSession<B, M> {
    grammar: FileGrammar,
    buffer: B,
    ledger: TagLedger,
    bridge: AnnotationBridge<M>,
    scans: usize,
    available: bool,
    last_report: Option<ScanReport>,
}

impl<B: TextBuffer, M: MarkerBackend> ReviewSession<B, M> {
    /// Create a session and run the initial scan.
    pub fn open(grammar: FileGrammar, buffer: B, backend: M) -> Self {
        let mut session = Self {
            grammar,
            buffer,
            ledger: TagLedger::new(),
            bridge: AnnotationBridge::new(backend),
            scans: 0,
            available: false,
            last_report: None,
        };
        session.parse();
        session
    }

    pub fn is_supported(&self) -> bool {
        self.grammar.is_supported()
    }

    /// Whether the last scan produced a usable ledger.
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn grammar(&self) -> Option<&TagGrammar> {
        self.grammar.grammar()
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Direct access for external edits; call `parse` afterwards.
    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }

    pub fn ledger(&self) -> &TagLedger {
        &self.ledger
    }

    pub fn bridge(&self) -> &AnnotationBridge<M> {
        &self.bridge
    }

    /// Number of full scans run so far, including the initial one.
    pub fn scan_count(&self) -> usize {
        self.scans
    }

    /// Rebuild the ledger from the buffer, repairing corrupted tags.
    ///
    /// Returns `None` when the file type has no tags or the buffer could not
    /// be scanned; the ledger is empty in both cases.
    pub fn parse(&mut self) -> Option<&ScanReport> {
        self.rescan(Persist::IfRepaired);
        self.last_report.as_ref()
    }

    /// Report of the most recent successful scan.
    pub fn last_report(&self) -> Option<&ScanReport> {
        self.last_report.as_ref()
    }

    pub fn entry(&self, key: &TagKey) -> Option<&LedgerEntry> {
        self.ledger.get(key)
    }

    /// Covered span of a comment, for revealing it in the editor.
    pub fn position(&self, key: &TagKey) -> Option<Range> {
        self.ledger.get(key)?.covered_span
    }

    /// Covered spans of every requested key that has one.
    pub fn positions<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a TagKey>,
    ) -> BTreeMap<TagKey, Range> {
        keys.into_iter()
            .filter_map(|key| Some((key.clone(), self.position(key)?)))
            .collect()
    }

    /// Tag the lines of `selection` for `key`.
    ///
    /// A single line gets one tag playing both roles at its end. Several lines
    /// get a begin tag at the end of the first and an end tag at the end of the
    /// last. The buffer is rescanned and saved; the returned entry reflects the
    /// shifted offsets. Returns `None` for unsupported files.
    pub fn insert_pair(
        &mut self,
        selection: Selection,
        key: &TagKey,
    ) -> Result<Option<LedgerEntry>> {
        let FileGrammar::Supported(grammar) = &self.grammar else {
            debug!(key = %key, "file type has no tags, not inserting");
            return Ok(None);
        };
        let grammar = Arc::clone(grammar);

        if key.separator() != grammar.separator() {
            return Err(Error::InvalidKey(format!(
                "key '{key}' uses separator '{}', file uses '{}'",
                key.separator(),
                grammar.separator()
            )));
        }
        self.check_selection(selection)?;
        if self.ledger.contains(key) {
            return Err(Error::DuplicateKey(key.to_string()));
        }

        if selection.is_single_line() {
            let offset = self.line_end(selection.start_line)?;
            self.buffer.replace(offset, 0, &grammar.single_tag(key))?;
        } else {
            // The later position first keeps the earlier offset valid.
            let end_offset = self.line_end(selection.end_line)?;
            self.buffer.replace(end_offset, 0, &grammar.end_tag(key))?;
            let begin_offset = self.line_end(selection.start_line)?;
            self.buffer.replace(begin_offset, 0, &grammar.begin_tag(key))?;
        }
        info!(
            key = %key,
            start_line = selection.start_line,
            end_line = selection.end_line,
            "inserted comment tags"
        );

        self.rescan(Persist::Always);
        Ok(self.ledger.get(key).cloned())
    }

    /// Remove the tags of every key in one batch, then rescan once.
    ///
    /// Returns how many keys had tags. Keys without tags are ignored. If a
    /// deletion fails the buffer is still rescanned, so the ledger matches
    /// whatever tags are left.
    pub fn remove_pairs<'a>(
        &mut self,
        keys: impl IntoIterator<Item = &'a TagKey>,
    ) -> Result<usize> {
        if !self.grammar.is_supported() {
            return Ok(0);
        }

        let mut removed = Vec::new();
        let mut ranges = BTreeSet::new();
        for key in keys {
            match self.ledger.get(key) {
                Some(entry) => {
                    ranges.extend(entry.tag_ranges());
                    removed.push(key.clone());
                }
                None => debug!(key = %key, "no tags for comment"),
            }
        }
        if removed.is_empty() {
            return Ok(0);
        }

        let deleted = ranges
            .iter()
            .rev()
            .try_for_each(|range| self.buffer.replace(range.offset, range.length, ""));

        self.bridge.remove_many(&removed);
        self.rescan(Persist::Always);
        if let Err(e) = deleted {
            warn!(error = %e, "failed to delete comment tags");
            return Err(e);
        }
        info!(comments = removed.len(), tags = ranges.len(), "removed comment tags");
        Ok(removed.len())
    }

    /// Show markers for exactly `keys`.
    pub fn set_visible(&mut self, keys: &BTreeSet<TagKey>) {
        self.bridge.set_visible(keys, &self.ledger);
    }

    pub fn add_marker(&mut self, key: &TagKey) -> bool {
        self.bridge.add_one(key, &self.ledger)
    }

    pub fn remove_markers<'a>(&mut self, keys: impl IntoIterator<Item = &'a TagKey>) {
        self.bridge.remove_many(keys);
    }

    fn rescan(&mut self, persist: Persist) {
        let FileGrammar::Supported(grammar) = &self.grammar else {
            self.ledger.clear();
            self.available = false;
            self.last_report = None;
            return;
        };
        self.scans += 1;

        match resolver::repair_scan(grammar, &mut self.buffer, &mut self.ledger, persist) {
            ScanOutcome::Complete(report) => {
                self.bridge.remove_many(&report.corrupted);
                self.bridge.refresh(&self.ledger);
                self.available = true;
                self.last_report = Some(report);
            }
            ScanOutcome::Unavailable(e) => {
                debug!(error = %e, "no usable tag positions for buffer");
                self.bridge.refresh(&self.ledger);
                self.available = false;
                self.last_report = None;
            }
        }
    }

    fn check_selection(&self, selection: Selection) -> Result<()> {
        if selection.start_line > selection.end_line {
            return Err(Error::InvalidSelection(format!(
                "start line {} is after end line {}",
                selection.start_line, selection.end_line
            )));
        }
        let lines = self.buffer.line_count();
        if selection.end_line >= lines {
            return Err(Error::InvalidSelection(format!(
                "line {} is past the last line ({})",
                selection.end_line,
                lines.saturating_sub(1)
            )));
        }
        Ok(())
    }

    /// Offset just before the terminator of `line`.
    fn line_end(&self, line: usize) -> Result<usize> {
        let start = self.buffer.line_offset(line)?;
        let length = self.buffer.line_length(line)?;
        let delimiter = self.buffer.line_delimiter_length(line)?;
        Ok(start + length - delimiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MarkerSet;
    use crate::buffer::MemoryBuffer;
    use crate::grammar::TagGrammar;

    fn session(text: &str) -> ReviewSession<MemoryBuffer, MarkerSet> {
        let grammar = FileGrammar::Supported(Arc::new(TagGrammar::new("/*", "*/", '|').unwrap()));
        ReviewSession::open(grammar, MemoryBuffer::new(text), MarkerSet::new())
    }

    fn key(id: &str) -> TagKey {
        TagKey::new("R1", "bob", id, '|').unwrap()
    }

    #[test]
    fn test_open_runs_initial_scan() {
        let s = session("a\n/*?R1|bob|c1?*/\nb\n");
        assert_eq!(s.scan_count(), 1);
        assert!(s.is_available());
        assert!(s.last_report().unwrap().is_clean());
        assert_eq!(s.position(&key("c1")), Some(Range::new(2, 16)));
    }

    #[test]
    fn test_insert_single_line() {
        let mut s = session("a\nb\nc\n");
        let entry = s.insert_pair(Selection::line(1), &key("1")).unwrap().unwrap();
        assert_eq!(s.buffer().text(), "a\nb/*?|R1|bob|1|?*/\nc\n");
        assert_eq!(entry.covered_span, Some(Range::new(2, 18)));
        assert_eq!(s.buffer().saves(), 1);
    }

    #[test]
    fn test_insert_multi_line() {
        let mut s = session("l0\nl1\nl2\nl3\n");
        s.insert_pair(Selection::lines(1, 2), &key("1")).unwrap();
        assert_eq!(
            s.buffer().text(),
            "l0\nl1/*?|R1|bob|1|*/\nl2/*|R1|bob|1|?*/\nl3\n"
        );
        let entry = s.entry(&key("1")).unwrap();
        assert_eq!(entry.begin_line, 1);
        assert_eq!(entry.end_line, Some(2));
    }

    #[test]
    fn test_insert_on_last_line_without_newline() {
        let mut s = session("a\nlast");
        s.insert_pair(Selection::line(1), &key("1")).unwrap();
        assert_eq!(s.buffer().text(), "a\nlast/*?|R1|bob|1|?*/");
        let span = s.position(&key("1")).unwrap();
        assert_eq!(span, Range::new(2, s.buffer().len() - 2));
    }

    #[test]
    fn test_insert_crlf_keeps_terminator() {
        let mut s = session("a\r\nb\r\n");
        s.insert_pair(Selection::line(0), &key("1")).unwrap();
        assert_eq!(s.buffer().text(), "a/*?|R1|bob|1|?*/\r\nb\r\n");
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let mut s = session("a\nb\n");
        s.insert_pair(Selection::line(0), &key("1")).unwrap();
        let err = s.insert_pair(Selection::line(1), &key("1")).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
    }

    #[test]
    fn test_insert_rejects_bad_selection() {
        let mut s = session("a\nb");
        assert!(matches!(
            s.insert_pair(Selection::lines(1, 0), &key("1")),
            Err(Error::InvalidSelection(_))
        ));
        assert!(matches!(
            s.insert_pair(Selection::line(2), &key("1")),
            Err(Error::InvalidSelection(_))
        ));
        assert_eq!(s.buffer().text(), "a\nb");
    }

    #[test]
    fn test_insert_rejects_foreign_separator() {
        let mut s = session("a\n");
        let foreign = TagKey::new("R1", "bob", "1", ';').unwrap();
        assert!(matches!(
            s.insert_pair(Selection::line(0), &foreign),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_remove_restores_buffer() {
        let original = "fn a() {}\nfn b() {}\nfn c() {}\n";
        let mut s = session(original);
        s.insert_pair(Selection::lines(0, 2), &key("1")).unwrap();
        assert_ne!(s.buffer().text(), original);

        assert_eq!(s.remove_pairs([&key("1")]).unwrap(), 1);
        assert_eq!(s.buffer().text(), original);
        assert!(s.ledger().is_empty());
    }

    /// Memory buffer whose n-th `replace` call fails.
    struct FlakyReplace {
        inner: MemoryBuffer,
        calls: usize,
        fail_on: usize,
    }

    impl TextBuffer for FlakyReplace {
        fn text(&self) -> &str {
            self.inner.text()
        }
        fn replace(&mut self, offset: usize, length: usize, text: &str) -> Result<()> {
            self.calls += 1;
            if self.calls == self.fail_on {
                return Err(Error::BadLocation { offset });
            }
            self.inner.replace(offset, length, text)
        }
        fn line_count(&self) -> usize {
            self.inner.line_count()
        }
        fn line_of_offset(&self, offset: usize) -> Result<usize> {
            self.inner.line_of_offset(offset)
        }
        fn line_offset(&self, line: usize) -> Result<usize> {
            self.inner.line_offset(line)
        }
        fn line_length(&self, line: usize) -> Result<usize> {
            self.inner.line_length(line)
        }
        fn line_delimiter_length(&self, line: usize) -> Result<usize> {
            self.inner.line_delimiter_length(line)
        }
        fn save(&mut self) -> Result<()> {
            self.inner.save()
        }
    }

    #[test]
    fn test_remove_failing_midway_still_rescans() {
        let buffer = FlakyReplace {
            inner: MemoryBuffer::new("a/*?|R1|bob|1|*/\nb/*|R1|bob|1|?*/\nc\n"),
            calls: 0,
            fail_on: 2,
        };
        let grammar = FileGrammar::Supported(Arc::new(TagGrammar::new("/*", "*/", '|').unwrap()));
        let mut s = ReviewSession::open(grammar, buffer, MarkerSet::new());
        assert!(s.ledger().contains(&key("1")));
        let scans = s.scan_count();

        // The end tag goes first; deleting the begin tag fails.
        let err = s.remove_pairs([&key("1")]).unwrap_err();
        assert!(matches!(err, Error::BadLocation { .. }));
        assert_eq!(s.scan_count(), scans + 1);

        // The rescan found the dangling begin tag and removed it.
        assert_eq!(s.buffer().text(), "a\nb\nc\n");
        assert!(s.ledger().is_empty());
        assert!(s.is_available());
    }

    #[test]
    fn test_remove_unknown_key_is_noop() {
        let mut s = session("a\n");
        let scans = s.scan_count();
        assert_eq!(s.remove_pairs([&key("9")]).unwrap(), 0);
        assert_eq!(s.scan_count(), scans);
    }

    #[test]
    fn test_remove_drops_markers() {
        let mut s = session("a\nb\n");
        s.insert_pair(Selection::line(0), &key("1")).unwrap();
        assert!(s.add_marker(&key("1")));
        s.remove_pairs([&key("1")]).unwrap();
        assert!(s.bridge().displayed().is_empty());
    }

    #[test]
    fn test_markers_follow_shifted_positions() {
        let mut s = session("a\nb\nc\n");
        s.insert_pair(Selection::line(2), &key("2")).unwrap();
        assert!(s.add_marker(&key("2")));
        let before = s.bridge().displayed()[&key("2")];

        s.insert_pair(Selection::line(0), &key("1")).unwrap();
        let after = s.bridge().displayed()[&key("2")];
        assert!(after.offset > before.offset);
        assert_eq!(Some(after), s.position(&key("2")));
    }

    #[test]
    fn test_positions_skip_unknown_keys() {
        let mut s = session("a\nb\n");
        s.insert_pair(Selection::line(1), &key("1")).unwrap();
        let positions = s.positions([&key("1"), &key("2")]);
        assert_eq!(positions.len(), 1);
        assert!(positions.contains_key(&key("1")));
    }

    #[test]
    fn test_unsupported_file_is_inert() {
        let mut s = ReviewSession::open(
            FileGrammar::Unsupported,
            MemoryBuffer::new("/*?|R1|bob|1|?*/\n"),
            MarkerSet::new(),
        );
        assert!(!s.is_supported());
        assert!(s.parse().is_none());
        assert!(s.ledger().is_empty());
        assert!(s.insert_pair(Selection::line(0), &key("2")).unwrap().is_none());
        assert_eq!(s.remove_pairs([&key("1")]).unwrap(), 0);
        assert_eq!(s.buffer().text(), "/*?|R1|bob|1|?*/\n");
        assert_eq!(s.scan_count(), 0);
    }

    #[test]
    fn test_set_visible_through_session() {
        let mut s = session("a\nb\nc\n");
        s.insert_pair(Selection::line(0), &key("1")).unwrap();
        s.insert_pair(Selection::line(1), &key("2")).unwrap();
        let visible: BTreeSet<TagKey> = [key("2")].into_iter().collect();
        s.set_visible(&visible);
        assert_eq!(s.bridge().displayed().len(), 1);
        s.remove_markers([&key("2")]);
        assert!(s.bridge().displayed().is_empty());
    }
}
