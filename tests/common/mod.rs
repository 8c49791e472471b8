#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Lines `line0` .. `line{n-1}`, each terminated by `\n`.
pub fn numbered_lines(n: usize) -> String {
    (0..n).map(|i| format!("line{i}\n")).collect()
}

/// Write `content` to `name` inside `dir` and return its path.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Config pointing the comment store into `dir`.
pub fn write_config(dir: &Path) -> PathBuf {
    let store = dir.join("reviews");
    let content = format!(
        "store_dir = \"{}\"\nauthor = \"bob\"\nreview = \"R1\"\n",
        store.display()
    );
    write_file(dir, "review.toml", &content)
}
