use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bridge::{MarkerBackend, MarkerSet};
use crate::buffer::{FileBuffer, TextBuffer};
use crate::cli::CliCommand;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::key::TagKey;
use crate::session::{ReviewSession, Selection};
use crate::store::{Comment, CommentStore, normalize_path};

type FileSession = ReviewSession<FileBuffer, MarkerSet>;

#[derive(Debug, Serialize)]
struct EntryOutput<'a> {
    key: &'a str,
    offset: usize,
    length: usize,
    begin_line: usize,
    end_line: usize,
    /// Whether the comment store knows this comment.
    stored: bool,
}

/// Run one subcommand, writing its report to `out`.
pub fn run(command: &CliCommand, config: &Config, out: &mut impl Write) -> Result<()> {
    let store = CommentStore::new(&config.store_dir);
    match command {
        CliCommand::Scan { file, json } => scan(file, *json, config, &store, out),
        CliCommand::Add {
            file,
            start_line,
            end_line,
            review,
            author,
            text,
        } => {
            let review = review
                .clone()
                .or_else(|| config.review.clone())
                .ok_or_else(|| missing_setting("review"))?;
            let author = author
                .clone()
                .or_else(|| config.author.clone())
                .ok_or_else(|| missing_setting("author"))?;
            let selection = selection(*start_line, end_line.unwrap_or(*start_line))?;
            add(file, selection, &review, &author, text, config, &store, out)
        }
        CliCommand::Remove { file, keys } => {
            let keys = keys
                .iter()
                .map(|raw| TagKey::parse(raw, config.separator))
                .collect::<Result<Vec<_>>>()?;
            remove(file, &keys, config, &store, out)
        }
        CliCommand::Locate { file, key } => {
            let key = TagKey::parse(key, config.separator)?;
            locate(file, &key, config, out)
        }
        CliCommand::Mv { from, to } => mv(from, to, config, &store, out),
    }
}

fn missing_setting(name: &str) -> Error {
    Error::ConfigValidation(format!("no {name} given (use --{name} or set {name} in config)"))
}

/// Convert 1-based CLI lines to a selection.
fn selection(start_line: usize, end_line: usize) -> Result<Selection> {
    if start_line == 0 || end_line == 0 {
        return Err(Error::InvalidSelection(
            "line numbers start at 1".to_string(),
        ));
    }
    Ok(Selection::lines(start_line - 1, end_line - 1))
}

fn open_session(file: &Path, config: &Config) -> Result<FileSession> {
    let grammar = config.registry()?.for_path(file);
    if !grammar.is_supported() {
        return Err(Error::Unsupported(file.display().to_string()));
    }
    let buffer = FileBuffer::open(file)?;
    let session = ReviewSession::open(grammar, buffer, MarkerSet::new());
    if !session.is_available() {
        return Err(Error::OutOfSync(file.to_path_buf()));
    }
    Ok(session)
}

/// Surface a failed write-back of the buffer after an edit.
fn check_saved<B: TextBuffer, M: MarkerBackend>(session: &ReviewSession<B, M>) -> Result<()> {
    match session.last_report().and_then(|r| r.save_error.as_ref()) {
        Some(Error::Persist(msg)) => Err(Error::Persist(msg.clone())),
        Some(other) => Err(Error::Persist(other.to_string())),
        None => Ok(()),
    }
}

/// Path comments are filed under, the same for every spelling of `file`.
fn store_path(file: &Path) -> Result<String> {
    Ok(normalize_path(file)?.to_string_lossy().into_owned())
}

fn scan(
    file: &Path,
    json: bool,
    config: &Config,
    store: &CommentStore,
    out: &mut impl Write,
) -> Result<()> {
    if !config.registry()?.for_path(file).is_supported() {
        info!(path = %file.display(), "file type has no comment tags, nothing to scan");
        return Ok(());
    }
    let mut session = open_session(file, config)?;
    if let Some(report) = session.last_report() {
        if let Some(ref e) = report.save_error {
            warn!(error = %e, "repaired tags could not be saved");
        }
        for repair in &report.repairs {
            info!(
                key = %repair.key,
                kind = %repair.kind,
                offset = repair.range.offset,
                "removed corrupted tag"
            );
        }
    }

    let known = store.keys_for_path(&store_path(file)?, config.separator);
    session.set_visible(&known);
    debug!(
        markers = session.bridge().displayed().len(),
        stored = known.len(),
        "markers shown for stored comments"
    );

    let entries: Vec<EntryOutput> = session
        .ledger()
        .iter()
        .filter_map(|(key, entry)| {
            let span = entry.covered_span?;
            Some(EntryOutput {
                key: key.as_str(),
                offset: span.offset,
                length: span.length,
                begin_line: entry.begin_line + 1,
                end_line: entry.end_line? + 1,
                stored: session.bridge().is_displayed(key),
            })
        })
        .collect();

    if json {
        let rendered = serde_json::to_string_pretty(&entries)
            .map_err(|e| Error::Store(format!("failed to render json: {e}")))?;
        writeln!(out, "{rendered}")?;
    } else {
        for entry in &entries {
            let orphan = if entry.stored { "" } else { " (no stored comment)" };
            writeln!(
                out,
                "{} lines {}-{} offset {} length {}{orphan}",
                entry.key, entry.begin_line, entry.end_line, entry.offset, entry.length
            )?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn add(
    file: &Path,
    selection: Selection,
    review: &str,
    author: &str,
    text: &str,
    config: &Config,
    store: &CommentStore,
    out: &mut impl Write,
) -> Result<()> {
    let mut session = open_session(file, config)?;

    // Ids from the store can still be taken by tags nobody recorded.
    let mut id: u64 = store
        .next_comment_id(review, author)
        .parse()
        .unwrap_or_default();
    let key = loop {
        let candidate = TagKey::new(review, author, &id.to_string(), config.separator)?;
        if !session.ledger().contains(&candidate) && store.get(&candidate).is_none() {
            break candidate;
        }
        id += 1;
    };

    let entry = session
        .insert_pair(selection, &key)?
        .ok_or_else(|| Error::NotFound(key.to_string()))?;
    check_saved(&session)?;
    store.add(Comment::new(review, author, key.id(), &store_path(file)?, text))?;

    let span = entry.covered_span.unwrap_or(entry.begin_range);
    writeln!(out, "{key} offset {} length {}", span.offset, span.length)?;
    Ok(())
}

fn remove(
    file: &Path,
    keys: &[TagKey],
    config: &Config,
    store: &CommentStore,
    out: &mut impl Write,
) -> Result<()> {
    let mut session = open_session(file, config)?;
    let tagged = session.remove_pairs(keys)?;
    check_saved(&session)?;

    let mut stored = 0;
    for key in keys {
        if store.remove(key)? {
            stored += 1;
        }
    }
    writeln!(out, "removed {tagged} tagged, {stored} stored comment(s)")?;
    Ok(())
}

fn locate(file: &Path, key: &TagKey, config: &Config, out: &mut impl Write) -> Result<()> {
    let session = open_session(file, config)?;
    let entry = session
        .entry(key)
        .ok_or_else(|| Error::NotFound(key.to_string()))?;
    let (Some(span), Some(end_line)) = (entry.covered_span, entry.end_line) else {
        return Err(Error::NotFound(key.to_string()));
    };
    writeln!(
        out,
        "lines {}-{} offset {} length {}",
        entry.begin_line + 1,
        end_line + 1,
        span.offset,
        span.length
    )?;
    Ok(())
}

fn mv(
    from: &Path,
    to: &Path,
    config: &Config,
    store: &CommentStore,
    out: &mut impl Write,
) -> Result<()> {
    if to.exists() {
        return Err(Error::Store(format!("{} already exists", to.display())));
    }
    let (from_key, to_key) = (store_path(from)?, store_path(to)?);
    std::fs::rename(from, to)?;
    let moved = store.rename_path(&from_key, &to_key)?;

    // Tags travel with the content; rescan so corrupted ones are cleaned up.
    let grammar = config.registry()?.for_path(to);
    if grammar.is_supported() {
        let session = ReviewSession::open(grammar, FileBuffer::open(to)?, MarkerSet::new());
        let tagged = session.ledger().len();
        info!(path = %to.display(), tagged, "rescanned moved file");
    }
    writeln!(out, "moved {moved} comment(s)")?;
    Ok(())
}
