//! Flat-file persistence of the candidate list
//!
//! The file holds one `host:port` per line in ascending order and is always
//! rewritten as a whole. It is the only state kept between runs.

use crate::proxy::models::Candidate;
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, Span};

/// Failure modes of loading or saving the candidate file
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no proxy file found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("no proxies found in {}", .0.display())]
    Empty(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Line-oriented candidate file
#[derive(Debug, Clone)]
pub struct ProxyStore {
    path: PathBuf,
    span: Span,
}

impl ProxyStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            span: tracing::info_span!("store"),
        }
    }

    /// Log under the given span instead of the default `store` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory holding the file if it is missing
    pub fn ensure_parent_dir(&self) -> Result<(), StoreError> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)?,
            _ => {}
        }
        Ok(())
    }

    /// Overwrite the file with the sorted candidates, one per line
    ///
    /// An empty set leaves an existing file untouched so a failed fetch never
    /// wipes out the previous list. Returns the number of lines written.
    pub fn save(&self, candidates: &BTreeSet<Candidate>) -> Result<usize, StoreError> {
        if candidates.is_empty() {
            info!(parent: &self.span, path = %self.path.display(), "Nothing to save, keeping existing file");
            return Ok(0);
        }

        self.ensure_parent_dir()?;
        let content = candidates
            .iter()
            .map(Candidate::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&self.path, content)?;

        info!(parent: &self.span, "Saved {} proxies to {}", candidates.len(), self.path.display());
        Ok(candidates.len())
    }

    /// Read the candidates back in file order
    pub fn load(&self) -> Result<Vec<Candidate>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let candidates: Vec<Candidate> = content.lines().filter_map(Candidate::new).collect();
        if candidates.is_empty() {
            return Err(StoreError::Empty(self.path.clone()));
        }
        Ok(candidates)
    }

    /// When the list was last written, if it exists
    pub fn last_modified(&self) -> Option<DateTime<Local>> {
        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Local>::from(modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(list: &[&str]) -> BTreeSet<Candidate> {
        list.iter().filter_map(|s| Candidate::new(s)).collect()
    }

    #[test]
    fn test_save_then_load_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(dir.path().join("proxies.txt"));
        let candidates = set(&["9.9.9.9:80", "1.1.1.1:8080", "10.0.0.1:3128"]);

        assert_eq!(store.save(&candidates).unwrap(), 3);
        let loaded = store.load().unwrap();

        let expected: Vec<_> = candidates.into_iter().collect();
        assert_eq!(loaded, expected);
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "1.1.1.1:8080\n10.0.0.1:3128\n9.9.9.9:80"
        );
    }

    #[test]
    fn test_save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(dir.path().join("nested").join("data").join("proxies.txt"));
        store.save(&set(&["1.1.1.1:80"])).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_save_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(dir.path().join("proxies.txt"));
        store.save(&set(&["1.1.1.1:80", "2.2.2.2:80"])).unwrap();
        store.save(&set(&["3.3.3.3:80"])).unwrap();

        let loaded: Vec<_> = store.load().unwrap().into_iter().map(|c| c.to_string()).collect();
        assert_eq!(loaded, vec!["3.3.3.3:80"]);
    }

    #[test]
    fn test_save_empty_set_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(dir.path().join("proxies.txt"));
        store.save(&set(&["1.1.1.1:80", "2.2.2.2:80"])).unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        assert_eq!(store.save(&BTreeSet::new()).unwrap(), 0);
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn test_save_empty_set_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(dir.path().join("proxies.txt"));
        store.save(&BTreeSet::new()).unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(dir.path().join("missing.txt"));
        assert!(matches!(store.load(), Err(StoreError::NotFound(_))));
        assert!(store.last_modified().is_none());
    }

    #[test]
    fn test_load_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(dir.path().join("proxies.txt"));
        fs::write(store.path(), "\n  \n").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Empty(_))));
    }

    #[test]
    fn test_load_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(dir.path().join("proxies.txt"));
        fs::write(store.path(), "1.1.1.1:80\r\n\n 2.2.2.2:80 \n").unwrap();

        let loaded: Vec<_> = store.load().unwrap().into_iter().map(|c| c.to_string()).collect();
        assert_eq!(loaded, vec!["1.1.1.1:80", "2.2.2.2:80"]);
        assert!(store.last_modified().is_some());
    }
}
