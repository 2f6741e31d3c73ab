//! # Engine Builder
//!
//! Fluent configuration for opening an engine. The only knob beyond the
//! path is the checkpoint cadence, which is policy rather than
//! correctness: any cadence, including manual-only, preserves every
//! guarantee.
//!
//! | Option             | Default | Description                                |
//! |--------------------|---------|--------------------------------------------|
//! | `path`             | none    | Main file path; WAL lives at `<path>-wal`. |
//! | `checkpoint_every` | 10      | Auto-checkpoint after this many commits; 0 disables. |

use std::path::{Path, PathBuf};

use eyre::Result;

use super::Engine;

pub const DEFAULT_CHECKPOINT_EVERY: u32 = 10;

pub struct EngineBuilder {
    path: Option<PathBuf>,
    checkpoint_every: u32,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            path: None,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
        }
    }

    /// Sets the main file path. The WAL is derived as `<path>-wal`.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Auto-checkpoint after this many commits. `0` disables automatic
    /// checkpointing entirely; `Engine::checkpoint` stays available.
    pub fn checkpoint_every(mut self, commits: u32) -> Self {
        self.checkpoint_every = commits;
        self
    }

    pub fn get_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get_checkpoint_every(&self) -> u32 {
        self.checkpoint_every
    }

    /// Opens (or creates) the engine, running recovery first.
    pub fn open(self) -> Result<Engine> {
        let path = self
            .path
            .ok_or_else(|| eyre::eyre!("engine path not specified: call .path() first"))?;
        Engine::open_with_config(&path, self.checkpoint_every)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builder_defaults() {
        let builder = EngineBuilder::new();
        assert!(builder.get_path().is_none());
        assert_eq!(builder.get_checkpoint_every(), DEFAULT_CHECKPOINT_EVERY);
    }

    #[test]
    fn builder_chaining_works() {
        let builder = EngineBuilder::new()
            .path("/tmp/test-db")
            .checkpoint_every(0);

        assert_eq!(builder.get_path(), Some(Path::new("/tmp/test-db")));
        assert_eq!(builder.get_checkpoint_every(), 0);
    }

    #[test]
    fn open_without_path_fails() {
        let result = EngineBuilder::new().open();
        match result {
            Err(e) => assert!(e.to_string().contains("path not specified")),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn open_creates_both_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test-db");

        let engine = EngineBuilder::new().path(&path).open().unwrap();

        assert!(path.exists());
        assert!(dir.path().join("test-db-wal").exists());
        drop(engine);
    }
}
