use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::key::TagKey;
use crate::ledger::{Range, TagLedger};

/// Receiver of editor markers. Display backends are not tolerant of many
/// small updates, so every change arrives as one batch: removals first, then
/// additions.
pub trait MarkerBackend {
    fn replace_markers(&mut self, remove: &[TagKey], add: &[(TagKey, Range)]);
}

/// In-memory backend that keeps the current markers and counts batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerSet {
    markers: BTreeMap<TagKey, Range>,
    batches: usize,
}

impl MarkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn markers(&self) -> &BTreeMap<TagKey, Range> {
        &self.markers
    }

    pub fn batches(&self) -> usize {
        self.batches
    }
}

impl MarkerBackend for MarkerSet {
    fn replace_markers(&mut self, remove: &[TagKey], add: &[(TagKey, Range)]) {
        for key in remove {
            self.markers.remove(key);
        }
        for (key, range) in add {
            self.markers.insert(key.clone(), *range);
        }
        self.batches += 1;
    }
}

/// Publishes ledger entries as markers and tracks what is on display.
#[derive(Debug)]
pub struct AnnotationBridge<M> {
    backend: M,
    displayed: BTreeMap<TagKey, Range>,
}

impl<M: MarkerBackend> AnnotationBridge<M> {
    pub fn new(backend: M) -> Self {
        Self {
            backend,
            displayed: BTreeMap::new(),
        }
    }

    pub fn backend(&self) -> &M {
        &self.backend
    }

    pub fn displayed(&self) -> &BTreeMap<TagKey, Range> {
        &self.displayed
    }

    pub fn is_displayed(&self, key: &TagKey) -> bool {
        self.displayed.contains_key(key)
    }

    /// Show exactly the closed entries whose keys are in `keys`, in one batch.
    pub fn set_visible(&mut self, keys: &BTreeSet<TagKey>, ledger: &TagLedger) {
        let remove: Vec<TagKey> = self
            .displayed
            .keys()
            .filter(|key| !keys.contains(*key))
            .cloned()
            .collect();
        let add: Vec<(TagKey, Range)> = keys
            .iter()
            .filter(|key| !self.displayed.contains_key(*key))
            .filter_map(|key| {
                let span = ledger.get(key)?.covered_span?;
                Some((key.clone(), span))
            })
            .collect();
        self.apply(remove, add);
    }

    /// Show one more marker. Returns false if the key has no closed entry.
    pub fn add_one(&mut self, key: &TagKey, ledger: &TagLedger) -> bool {
        let Some(span) = ledger.get(key).and_then(|entry| entry.covered_span) else {
            return false;
        };
        let remove = if self.displayed.contains_key(key) {
            vec![key.clone()]
        } else {
            Vec::new()
        };
        self.apply(remove, vec![(key.clone(), span)]);
        true
    }

    /// Drop markers for `keys`; keys not on display are ignored.
    pub fn remove_many<'a>(&mut self, keys: impl IntoIterator<Item = &'a TagKey>) {
        let remove: Vec<TagKey> = keys
            .into_iter()
            .filter(|key| self.displayed.contains_key(*key))
            .cloned()
            .collect();
        self.apply(remove, Vec::new());
    }

    /// Move displayed markers to their positions in a freshly built ledger,
    /// dropping those whose entries disappeared.
    pub fn refresh(&mut self, ledger: &TagLedger) {
        let mut remove = Vec::new();
        let mut add = Vec::new();
        for (key, shown) in &self.displayed {
            match ledger.get(key).and_then(|entry| entry.covered_span) {
                Some(span) if span == *shown => {}
                Some(span) => {
                    remove.push(key.clone());
                    add.push((key.clone(), span));
                }
                None => remove.push(key.clone()),
            }
        }
        self.apply(remove, add);
    }

    fn apply(&mut self, remove: Vec<TagKey>, add: Vec<(TagKey, Range)>) {
        if remove.is_empty() && add.is_empty() {
            return;
        }
        debug!(removed = remove.len(), added = add.len(), "replacing markers");
        self.backend.replace_markers(&remove, &add);
        for key in &remove {
            self.displayed.remove(key);
        }
        for (key, range) in add {
            self.displayed.insert(key, range);
        }
    }
}
