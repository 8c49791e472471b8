use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use crate::buffer::TextBuffer;
use crate::error::{Error, Result};
use crate::grammar::TagGrammar;
use crate::key::TagKey;
use crate::ledger::{Corruption, LineSpan, Range, TagLedger};
use crate::scanner;

/// When a scan writes the buffer back to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persist {
    /// The buffer was edited before the scan; always save at the end.
    Always,
    /// Save only if the scan itself deleted corrupted tags.
    IfRepaired,
}

/// One corrupted tag removed from the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    pub key: TagKey,
    pub range: Range,
    pub kind: Corruption,
    pub pass: usize,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    /// Number of full passes, 1 for a buffer without dangling begin tags.
    pub passes: usize,
    pub repairs: Vec<Repair>,
    /// Keys that had at least one corrupted tag, across all passes.
    pub corrupted: BTreeSet<TagKey>,
    pub saved: bool,
    /// Set when writing the buffer back failed; the ledger is still valid.
    pub save_error: Option<Error>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.repairs.is_empty()
    }

    fn record(&mut self, key: &TagKey, range: Range, kind: Corruption) {
        self.corrupted.insert(key.clone());
        self.repairs.push(Repair {
            key: key.clone(),
            range,
            kind,
            pass: self.passes,
        });
    }
}

#[derive(Debug)]
pub enum ScanOutcome {
    /// The ledger holds only closed entries and the buffer holds no corrupted tags.
    Complete(ScanReport),
    /// The buffer could not be mapped; the ledger was cleared.
    Unavailable(Error),
}

/// Rebuild `ledger` from `buffer`, deleting corrupted tags until a pass finds none.
///
/// Duplicate begins, duplicate ends and ends without begin are deleted as they
/// are met and the pass resumes where the deleted text started. Begins still
/// open when a pass ends are deleted afterwards in descending offset order and
/// the whole pass is repeated, so reported positions always come from a pass
/// over a clean buffer. Every repeat deletes at least one tag, which bounds the
/// loop by the number of tags in the buffer.
pub fn repair_scan<B: TextBuffer + ?Sized>(
    grammar: &TagGrammar,
    buffer: &mut B,
    ledger: &mut TagLedger,
    persist: Persist,
) -> ScanOutcome {
    ledger.clear();
    if let Err(e) = buffer.check_sync() {
        debug!(error = %e, "buffer not usable, skipping scan");
        return ScanOutcome::Unavailable(e);
    }

    let mut report = ScanReport::default();
    let mut unsaved = persist == Persist::Always;

    loop {
        report.passes += 1;
        ledger.clear();
        let repairs_before = report.repairs.len();

        if let Err(e) = scan_pass(grammar, buffer, ledger, &mut report) {
            debug!(error = %e, pass = report.passes, "scan aborted");
            ledger.clear();
            return ScanOutcome::Unavailable(e);
        }
        unsaved |= report.repairs.len() > repairs_before;

        let mut dangling: Vec<(TagKey, Range)> = ledger
            .all_open_entries()
            .into_iter()
            .map(|(key, entry)| (key.clone(), entry.begin_range))
            .collect();
        if dangling.is_empty() {
            break;
        }

        // Later offsets first so earlier ones stay valid.
        dangling.sort_by(|a, b| b.1.offset.cmp(&a.1.offset));
        let len_before = buffer.len();
        for (key, range) in &dangling {
            warn!(key = %key, offset = range.offset, "deleting begin tag without end tag");
            if let Err(e) = buffer.replace(range.offset, range.length, "") {
                debug!(error = %e, "scan aborted while deleting dangling begin tag");
                ledger.clear();
                return ScanOutcome::Unavailable(e);
            }
            report.record(key, *range, Corruption::BeginWithoutEnd);
        }
        if buffer.len() >= len_before {
            ledger.clear();
            return ScanOutcome::Unavailable(Error::Persist(
                "buffer did not shrink after deleting tags".to_string(),
            ));
        }

        ledger.clear();
        save(buffer, &mut report);
        unsaved = false;
    }

    if unsaved {
        save(buffer, &mut report);
    }
    if !report.is_clean() {
        info!(
            repaired = report.repairs.len(),
            passes = report.passes,
            "repaired corrupted tags"
        );
    }
    debug!(entries = ledger.len(), "scan complete");
    ScanOutcome::Complete(report)
}

fn scan_pass<B: TextBuffer + ?Sized>(
    grammar: &TagGrammar,
    buffer: &mut B,
    ledger: &mut TagLedger,
    report: &mut ScanReport,
) -> Result<()> {
    let mut cursor = 0;
    while let Some(occ) = scanner::find_next(grammar, &*buffer, cursor)? {
        let line = line_span(&*buffer, occ.line)?;

        let mut corruption = None;
        if occ.role.plays_begin()
            && let Err(kind) = ledger.record_begin(&occ.key, occ.range, line)
        {
            corruption = Some(kind);
        }
        if corruption.is_none()
            && occ.role.plays_end()
            && let Err(kind) = ledger.record_end(&occ.key, occ.range, line)
        {
            corruption = Some(kind);
        }

        match corruption {
            None => cursor = occ.range.end(),
            Some(kind) => {
                warn!(key = %occ.key, offset = occ.range.offset, %kind, "deleting corrupted tag");
                buffer.replace(occ.range.offset, occ.range.length, "")?;
                report.record(&occ.key, occ.range, kind);
                cursor = occ.range.offset;
            }
        }
    }
    Ok(())
}

pub(crate) fn line_span<B: TextBuffer + ?Sized>(buffer: &B, line: usize) -> Result<LineSpan> {
    let start = buffer.line_offset(line)?;
    let length = buffer.line_length(line)?;
    Ok(LineSpan {
        line,
        start,
        end: start + length,
    })
}

fn save<B: TextBuffer + ?Sized>(buffer: &mut B, report: &mut ScanReport) {
    match buffer.save() {
        Ok(()) => report.saved = true,
        Err(e) => {
            error!(error = %e, "failed to persist buffer");
            report.save_error = Some(e);
        }
    }
}
