use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::key::TagKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Open,
    Closed,
    Fixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub author: String,
    pub text: String,
    pub created_at: u64,
}

/// Metadata of one review comment. The tags in the source only carry its key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub review_id: String,
    pub author: String,
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: u64,
    pub modified_at: u64,
    #[serde(default)]
    pub replies: Vec<Reply>,
}

impl Comment {
    pub fn new(review_id: &str, author: &str, id: &str, path: &str, text: &str) -> Self {
        let now = now();
        Self {
            review_id: review_id.to_string(),
            author: author.to_string(),
            id: id.to_string(),
            path: path.to_string(),
            text: text.to_string(),
            status: Status::default(),
            priority: Priority::default(),
            created_at: now,
            modified_at: now,
            replies: Vec::new(),
        }
    }

    pub fn key(&self, separator: char) -> Result<TagKey> {
        TagKey::new(&self.review_id, &self.author, &self.id, separator)
    }

    fn matches(&self, key: &TagKey) -> bool {
        self.review_id == key.review() && self.author == key.author() && self.id == key.id()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
struct CommentFile {
    #[serde(default)]
    comments: Vec<Comment>,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn check_path_component(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::Store(format!(
            "'{name}' cannot be used as a store file name"
        )));
    }
    Ok(())
}

/// Absolute, lexically cleaned form of `path`. Comments are filed under this
/// form so that `./A.java`, `A.java` and `src/../A.java` all match.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut clean = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other.as_os_str()),
        }
    }
    Ok(clean)
}

/// Comment metadata persisted as TOML, one file per review and author:
/// `<root>/<review>/<author>.toml`.
pub struct CommentStore {
    root: PathBuf,
}

impl CommentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn author_file(&self, review: &str, author: &str) -> PathBuf {
        self.root.join(review).join(format!("{author}.toml"))
    }

    /// Load the comments of one author in one review. A missing or corrupted
    /// file reads as empty.
    pub fn load(&self, review: &str, author: &str) -> Vec<Comment> {
        let path = self.author_file(review, author);
        if !path.exists() {
            return Vec::new();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<CommentFile>(&content) {
                Ok(file) => file.comments,
                Err(e) => {
                    warn!("corrupted comment file {}: {e}, ignoring", path.display());
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(
                    "failed to read comment file {}: {e}, ignoring",
                    path.display()
                );
                Vec::new()
            }
        }
    }

    pub fn save(&self, review: &str, author: &str, comments: &[Comment]) -> Result<()> {
        check_path_component(review)?;
        check_path_component(author)?;
        let path = self.author_file(review, author);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| Error::Store(format!("failed to create store dir: {e}")))?;
        }

        let file = CommentFile {
            comments: comments.to_vec(),
        };
        let content = toml::to_string_pretty(&file)
            .map_err(|e| Error::Store(format!("failed to serialize comments: {e}")))?;

        fs::write(&path, content)
            .map_err(|e| Error::Store(format!("failed to write {}: {e}", path.display())))?;

        Ok(())
    }

    /// Add a comment, replacing any comment with the same key.
    pub fn add(&self, comment: Comment) -> Result<()> {
        let mut comments = self.load(&comment.review_id, &comment.author);
        comments.retain(|c| c.id != comment.id);
        let (review, author) = (comment.review_id.clone(), comment.author.clone());
        comments.push(comment);
        self.save(&review, &author, &comments)
    }

    pub fn get(&self, key: &TagKey) -> Option<Comment> {
        self.load(key.review(), key.author())
            .into_iter()
            .find(|c| c.matches(key))
    }

    /// Remove a comment. Returns whether it existed.
    pub fn remove(&self, key: &TagKey) -> Result<bool> {
        let mut comments = self.load(key.review(), key.author());
        let before = comments.len();
        comments.retain(|c| !c.matches(key));
        if comments.len() == before {
            return Ok(false);
        }
        self.save(key.review(), key.author(), &comments)?;
        Ok(true)
    }

    /// Smallest non-negative integer id not yet used by this author in this review.
    pub fn next_comment_id(&self, review: &str, author: &str) -> String {
        let used: BTreeSet<u64> = self
            .load(review, author)
            .iter()
            .filter_map(|c| c.id.parse().ok())
            .collect();
        let next = (0..).find(|id| !used.contains(id)).unwrap_or_default();
        next.to_string()
    }

    /// Every `(review, author)` pair with a comment file.
    fn author_files(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let Ok(reviews) = fs::read_dir(&self.root) else {
            return pairs;
        };
        for review in reviews.flatten() {
            let review_path = review.path();
            if !review_path.is_dir() {
                continue;
            }
            let Some(review_name) = review_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(authors) = fs::read_dir(&review_path) else {
                continue;
            };
            for author in authors.flatten() {
                let author_path = author.path();
                if author_path.extension().and_then(|e| e.to_str()) != Some("toml") {
                    continue;
                }
                if let Some(stem) = author_path.file_stem().and_then(|s| s.to_str()) {
                    pairs.push((review_name.to_string(), stem.to_string()));
                }
            }
        }
        pairs.sort();
        pairs
    }

    /// All comments attached to `path`, across reviews and authors.
    pub fn comments_for_path(&self, path: &str) -> Vec<Comment> {
        self.author_files()
            .into_iter()
            .flat_map(|(review, author)| self.load(&review, &author))
            .filter(|c| c.path == path)
            .collect()
    }

    /// Keys of all comments attached to `path`; the default visibility set for a file.
    pub fn keys_for_path(&self, path: &str, separator: char) -> BTreeSet<TagKey> {
        self.comments_for_path(path)
            .iter()
            .filter_map(|c| match c.key(separator) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(
                        review = %c.review_id,
                        author = %c.author,
                        id = %c.id,
                        error = %e,
                        "unusable comment key"
                    );
                    None
                }
            })
            .collect()
    }

    /// Point every comment on `from` at `to` after a file move or rename.
    /// Returns the number of comments updated.
    pub fn rename_path(&self, from: &str, to: &str) -> Result<usize> {
        let mut updated = 0;
        for (review, author) in self.author_files() {
            let mut comments = self.load(&review, &author);
            let mut changed = false;
            for comment in comments.iter_mut().filter(|c| c.path == from) {
                comment.path = to.to_string();
                comment.modified_at = now();
                changed = true;
                updated += 1;
            }
            if changed {
                self.save(&review, &author, &comments)?;
            }
        }
        if updated > 0 {
            info!(from, to, updated, "moved comments to new path");
        }
        Ok(updated)
    }
}
