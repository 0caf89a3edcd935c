//! Durable deck storage
//!
//! All decks live in one JSON file mapping deck name to its questions:
//! ```json
//! { "Biology": [ { "question": "...", "options": ["A. ...", "B. ..."], "answer": "A", "explanation": "..." } ] }
//! ```

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use super::Decks;

#[derive(Error, Debug)]
pub enum DeckStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DeckStoreError>;

pub struct DeckStore {
    path: PathBuf,
}

impl DeckStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A store that was never saved to is empty, not an error.
    pub fn load(&self) -> Result<Decks> {
        if !self.path.exists() {
            debug!("No deck file at {:?} yet", self.path);
            return Ok(Decks::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let decks: Decks = serde_json::from_str(&content)?;
        debug!("Loaded {} decks from {:?}", decks.len(), self.path);
        Ok(decks)
    }

    /// Replaces the whole file. The new content is written next to it and
    /// renamed over it, so readers see either the old or the new decks.
    pub fn save(&self, decks: &Decks) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let file = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(file.as_file());
            serde_json::to_writer_pretty(&mut writer, decks)?;
            writer.flush()?;
        }
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        info!(
            "Saved {} decks ({} questions) to {:?}",
            decks.len(),
            decks.values().map(|d| d.len()).sum::<usize>(),
            self.path
        );
        Ok(())
    }

    /// Applies `change` to a copy of `decks` and saves it. `decks` only takes
    /// the new content once the save went through.
    pub fn update(&self, decks: &mut Decks, change: impl FnOnce(&mut Decks)) -> Result<()> {
        let mut next = decks.clone();
        change(&mut next);
        self.save(&next)?;
        *decks = next;
        Ok(())
    }
}
