use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::key::{MARKER, TagKey};

/// Comment tokens for a family of file extensions.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileType {
    pub extensions: Vec<String>,
    pub open: String,
    pub close: String,
}

impl FileType {
    pub fn new(extensions: &[&str], open: &str, close: &str) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            open: open.to_string(),
            close: close.to_string(),
        }
    }
}

/// Block-comment languages use `/* */`, markup languages use `<!-- -->`.
pub fn default_file_types() -> Vec<FileType> {
    vec![
        FileType::new(
            &[
                "java", "c", "h", "cpp", "hpp", "cc", "cs", "js", "ts", "css", "go", "rs", "swift",
                "kt", "scala", "php",
            ],
            "/*",
            "*/",
        ),
        FileType::new(&["xml", "html", "htm", "xhtml", "xsd", "svg"], "<!--", "-->"),
    ]
}

/// The compiled tag shape for one pair of comment tokens.
///
/// A tag is `open ?sep review sep author sep id sep? close`, where the `?` before
/// the key marks the begin role and the `?` after it marks the end role. The
/// outer separators are optional when reading; they are always written.
#[derive(Debug)]
pub struct TagGrammar {
    open: String,
    close: String,
    separator: char,
    pattern: Regex,
}

impl TagGrammar {
    pub fn new(open: &str, close: &str, separator: char) -> Result<Self> {
        if open.trim().is_empty() || close.trim().is_empty() {
            return Err(Error::ConfigValidation(
                "comment tokens must not be empty".to_string(),
            ));
        }
        validate_separator(separator)?;

        let sep = regex::escape(&separator.to_string());
        let marker = regex::escape(&MARKER.to_string());
        let field = format!(r"[^{sep}{marker}\r\n]+");
        let key = format!("{field}{sep}{field}{sep}{field}");
        let source = format!(
            concat!(
                r"{open}[ \t]*(?P<begin>{marker})?(?:{sep})?[ \t]*",
                r"(?P<key>{key})",
                r"[ \t]*(?:{sep})?(?P<end>{marker})?[ \t]*{close}",
            ),
            open = regex::escape(open),
            close = regex::escape(close),
            sep = sep,
            marker = marker,
            key = key,
        );
        let pattern = Regex::new(&source)
            .map_err(|e| Error::ConfigValidation(format!("invalid tag pattern: {e}")))?;

        Ok(Self {
            open: open.to_string(),
            close: close.to_string(),
            separator,
            pattern,
        })
    }

    pub fn open(&self) -> &str {
        &self.open
    }

    pub fn close(&self) -> &str {
        &self.close
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Build a key using this grammar's separator.
    pub fn key(&self, review: &str, author: &str, id: &str) -> Result<TagKey> {
        TagKey::new(review, author, id, self.separator)
    }

    /// A tag playing both roles, for comments on a single line.
    pub fn single_tag(&self, key: &TagKey) -> String {
        let sep = self.separator;
        format!("{}{MARKER}{sep}{key}{sep}{MARKER}{}", self.open, self.close)
    }

    pub fn begin_tag(&self, key: &TagKey) -> String {
        let sep = self.separator;
        format!("{}{MARKER}{sep}{key}{sep}{}", self.open, self.close)
    }

    pub fn end_tag(&self, key: &TagKey) -> String {
        let sep = self.separator;
        format!("{}{sep}{key}{sep}{MARKER}{}", self.open, self.close)
    }
}

pub fn validate_separator(separator: char) -> Result<()> {
    if separator == MARKER || separator.is_whitespace() || separator.is_alphanumeric() {
        return Err(Error::ConfigValidation(format!(
            "separator '{}' must be punctuation other than '{MARKER}'",
            separator.escape_debug()
        )));
    }
    Ok(())
}

/// Tag support for one file.
#[derive(Debug, Clone)]
pub enum FileGrammar {
    Supported(Arc<TagGrammar>),
    /// No tokens registered for the file type; every operation is a no-op.
    Unsupported,
}

impl FileGrammar {
    pub fn grammar(&self) -> Option<&TagGrammar> {
        match self {
            FileGrammar::Supported(grammar) => Some(grammar.as_ref()),
            FileGrammar::Unsupported => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, FileGrammar::Supported(_))
    }
}

/// Grammars compiled once per token pair and shared read-only across sessions.
#[derive(Debug, Clone)]
pub struct GrammarRegistry {
    by_extension: HashMap<String, Arc<TagGrammar>>,
    separator: char,
}

impl GrammarRegistry {
    pub fn new(file_types: &[FileType], separator: char) -> Result<Self> {
        let mut compiled: HashMap<(String, String), Arc<TagGrammar>> = HashMap::new();
        let mut by_extension = HashMap::new();

        for file_type in file_types {
            if file_type.extensions.is_empty() {
                return Err(Error::ConfigValidation(format!(
                    "file type '{} {}' lists no extensions",
                    file_type.open, file_type.close
                )));
            }
            let token_pair = (file_type.open.clone(), file_type.close.clone());
            let grammar = match compiled.get(&token_pair) {
                Some(grammar) => Arc::clone(grammar),
                None => {
                    let grammar = Arc::new(TagGrammar::new(
                        &file_type.open,
                        &file_type.close,
                        separator,
                    )?);
                    compiled.insert(token_pair, Arc::clone(&grammar));
                    grammar
                }
            };
            for ext in &file_type.extensions {
                let ext = ext.trim_start_matches('.').to_ascii_lowercase();
                by_extension.insert(ext, Arc::clone(&grammar));
            }
        }

        Ok(Self {
            by_extension,
            separator,
        })
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn for_extension(&self, ext: &str) -> FileGrammar {
        match self.by_extension.get(&ext.to_ascii_lowercase()) {
            Some(grammar) => FileGrammar::Supported(Arc::clone(grammar)),
            None => FileGrammar::Unsupported,
        }
    }

    pub fn for_path(&self, path: &Path) -> FileGrammar {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(FileGrammar::Unsupported, |ext| self.for_extension(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn java() -> TagGrammar {
        TagGrammar::new("/*", "*/", '|').unwrap()
    }

    fn key() -> TagKey {
        TagKey::new("R1", "bob", "c1", '|').unwrap()
    }

    #[test]
    fn test_tag_formats() {
        let g = java();
        assert_eq!(g.single_tag(&key()), "/*?|R1|bob|c1|?*/");
        assert_eq!(g.begin_tag(&key()), "/*?|R1|bob|c1|*/");
        assert_eq!(g.end_tag(&key()), "/*|R1|bob|c1|?*/");
    }

    #[test]
    fn test_xml_formats() {
        let g = TagGrammar::new("<!--", "-->", '|').unwrap();
        assert_eq!(g.single_tag(&key()), "<!--?|R1|bob|c1|?-->");
    }

    #[test]
    fn test_pattern_matches_written_tags() {
        let g = java();
        for tag in [g.single_tag(&key()), g.begin_tag(&key()), g.end_tag(&key())] {
            let caps = g.pattern().captures(&tag).unwrap();
            assert_eq!(caps.get(0).unwrap().as_str(), tag);
            assert_eq!(&caps["key"], "R1|bob|c1");
        }
    }

    #[test]
    fn test_pattern_role_markers() {
        let g = java();
        let begin = g.pattern().captures("/*?|R1|bob|c1|*/").unwrap();
        assert!(begin.name("begin").is_some());
        assert!(begin.name("end").is_none());

        let end = g.pattern().captures("/*|R1|bob|c1|?*/").unwrap();
        assert!(end.name("begin").is_none());
        assert!(end.name("end").is_some());
    }

    #[test]
    fn test_pattern_accepts_tags_without_outer_separators() {
        let caps = java().pattern().captures("/*?R1|bob|c1?*/").unwrap();
        assert_eq!(&caps["key"], "R1|bob|c1");
        assert!(caps.name("begin").is_some());
        assert!(caps.name("end").is_some());
    }

    #[test]
    fn test_pattern_tolerates_whitespace() {
        let caps = java().pattern().captures("/* ?| R1|bob|c1 |? */").unwrap();
        assert_eq!(caps["key"].trim(), "R1|bob|c1");
    }

    #[test]
    fn test_pattern_rejects_wrong_field_count() {
        assert!(java().pattern().find("/*?|R1|bob|?*/").is_none());
    }

    #[test]
    fn test_pattern_does_not_span_lines() {
        assert!(java().pattern().find("/*?|R1|bob\n|c1|?*/").is_none());
    }

    #[test]
    fn test_pattern_is_case_sensitive_on_tokens() {
        let g = TagGrammar::new("<!--", "-->", '|').unwrap();
        assert!(g.pattern().find("<!--?|R1|bob|c1|?-->").is_some());
        let g = TagGrammar::new("REM", "END", '|').unwrap();
        assert!(g.pattern().find("rem?|R1|bob|c1|?end").is_none());
    }

    #[test]
    fn test_invalid_separator() {
        assert!(TagGrammar::new("/*", "*/", '?').is_err());
        assert!(TagGrammar::new("/*", "*/", ' ').is_err());
        assert!(TagGrammar::new("/*", "*/", 'x').is_err());
    }

    #[test]
    fn test_empty_tokens_rejected() {
        assert!(TagGrammar::new("", "*/", '|').is_err());
    }

    #[test]
    fn test_custom_separator_pattern() {
        let g = TagGrammar::new("/*", "*/", ';').unwrap();
        let key = g.key("R1", "bob", "c1").unwrap();
        let tag = g.single_tag(&key);
        assert_eq!(tag, "/*?;R1;bob;c1;?*/");
        assert!(g.pattern().is_match(&tag));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = GrammarRegistry::new(&default_file_types(), '|').unwrap();
        let java = registry.for_path(Path::new("src/Main.java"));
        assert_eq!(java.grammar().unwrap().open(), "/*");
        let xml = registry.for_extension("XML");
        assert_eq!(xml.grammar().unwrap().close(), "-->");
        assert!(!registry.for_path(Path::new("README")).is_supported());
        assert!(!registry.for_extension("md").is_supported());
    }

    #[test]
    fn test_registry_shares_grammar_per_token_pair() {
        let registry = GrammarRegistry::new(&default_file_types(), '|').unwrap();
        let (FileGrammar::Supported(a), FileGrammar::Supported(b)) =
            (registry.for_extension("java"), registry.for_extension("c"))
        else {
            panic!("expected supported grammars");
        };
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_registry_normalizes_extensions() {
        let types = vec![FileType::new(&[".SQL"], "/*", "*/")];
        let registry = GrammarRegistry::new(&types, '|').unwrap();
        assert!(registry.for_extension("sql").is_supported());
    }

    #[test]
    fn test_registry_rejects_empty_extensions() {
        let types = vec![FileType::new(&[], "/*", "*/")];
        assert!(GrammarRegistry::new(&types, '|').is_err());
    }
}
