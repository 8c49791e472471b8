use std::sync::Arc;

use crate::bridge::MarkerSet;
use crate::buffer::MemoryBuffer;
use crate::grammar::{FileGrammar, TagGrammar};
use crate::key::{DEFAULT_SEPARATOR, TagKey};
use crate::session::ReviewSession;

/// Key in review `R1` by `bob` with the default separator.
pub fn make_key(id: &str) -> TagKey {
    TagKey::new("R1", "bob", id, DEFAULT_SEPARATOR).unwrap()
}

/// Grammar for `/* */` comments.
pub fn java_grammar() -> Arc<TagGrammar> {
    Arc::new(TagGrammar::new("/*", "*/", DEFAULT_SEPARATOR).unwrap())
}

/// Grammar for `<!-- -->` comments.
pub fn xml_grammar() -> Arc<TagGrammar> {
    Arc::new(TagGrammar::new("<!--", "-->", DEFAULT_SEPARATOR).unwrap())
}

/// In-memory session over `text` with the `/* */` grammar.
pub fn java_session(text: &str) -> ReviewSession<MemoryBuffer, MarkerSet> {
    ReviewSession::open(
        FileGrammar::Supported(java_grammar()),
        MemoryBuffer::new(text),
        MarkerSet::new(),
    )
}
