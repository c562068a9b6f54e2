//! Snapshot persistence for distkv
//!
//! The snapshot is a single JSON array holding every entry of the table. It is
//! read once when the store opens and rewritten in full on every mutation.

use crate::error::Result;
use crate::store::Entry;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Open snapshot file handle
#[derive(Debug)]
pub struct Snapshot {
    file: File,
    path: PathBuf,
}

impl Snapshot {
    /// Open (or create) the snapshot file and decode its entries.
    /// A missing or empty file yields no entries.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<(Self, Vec<Entry>)> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut snapshot = Self { file, path };
        let entries = snapshot.load()?;
        debug!(path = %snapshot.path.display(), entries = entries.len(), "Loaded snapshot");
        Ok((snapshot, entries))
    }

    /// Open an existing snapshot without write access, so every rewrite fails
    #[cfg(test)]
    pub(crate) fn open_read_only<P: AsRef<Path>>(path: P) -> Result<(Self, Vec<Entry>)> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut snapshot = Self { file, path };
        let entries = snapshot.load()?;
        Ok((snapshot, entries))
    }

    fn load(&mut self) -> Result<Vec<Entry>> {
        let mut raw = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut raw)?;

        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Vec::new());
        }

        // `null` is accepted as an empty table
        let entries: Option<Vec<Entry>> = serde_json::from_slice(&raw)?;
        Ok(entries.unwrap_or_default())
    }

    /// Replace the file contents with `entries`.
    ///
    /// Must be called with the table's write lock held.
    pub fn rewrite(&mut self, entries: &[Entry]) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;

        let mut writer = BufWriter::new(&mut self.file);
        serde_json::to_writer(&mut writer, entries)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
