//! # Page Store
//!
//! Random-access storage for fixed-size pages on the main file. The file
//! is a pure array of pages at offset `page_id * PAGE_SIZE` with no
//! header; holes are left sparse and read back zero-filled, so nothing is
//! pre-allocated for pages that were never written.
//!
//! The store is only mutated by recovery and by checkpointing. The commit
//! path never touches it; committed page images live in the WAL until a
//! checkpoint migrates them here and fsyncs before the log prefix is
//! dropped.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};

use super::PAGE_SIZE;

pub struct PageStore {
    file: File,
    path: PathBuf,
}

impl PageStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open page file '{}'", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Reads one page, zero-filling anything past the end of the file.
    pub fn read_page(&mut self, page_id: u32) -> Result<Vec<u8>> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut page = vec![0u8; PAGE_SIZE];

        self.file
            .seek(SeekFrom::Start(offset))
            .wrap_err_with(|| format!("failed to seek to page {}", page_id))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            match self.file.read(&mut page[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(err)
                        .wrap_err_with(|| format!("failed to read page {}", page_id));
                }
            }
        }

        Ok(page)
    }

    pub fn write_page(&mut self, page_id: u32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == PAGE_SIZE,
            "page image must be exactly {} bytes, got {}",
            PAGE_SIZE,
            data.len()
        );

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .wrap_err_with(|| format!("failed to seek to page {}", page_id))?;
        self.file
            .write_all(data)
            .wrap_err_with(|| format!("failed to write page {}", page_id))?;

        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync page file '{}'", self.path.display()))
    }

    pub fn file_len(&self) -> Result<u64> {
        Ok(self
            .file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", self.path.display()))?
            .len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unwritten_pages_read_zero_filled() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("test-db")).unwrap();

        let page = store.read_page(3).unwrap();
        assert_eq!(page.len(), PAGE_SIZE);
        assert!(page.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("test-db")).unwrap();

        store.write_page(2, &[0x7F; PAGE_SIZE]).unwrap();
        store.sync().unwrap();

        let page = store.read_page(2).unwrap();
        assert!(page.iter().all(|&b| b == 0x7F));
    }

    #[test]
    fn writes_leave_holes_that_read_as_zero() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("test-db")).unwrap();

        store.write_page(5, &[0xEE; PAGE_SIZE]).unwrap();

        assert_eq!(store.file_len().unwrap(), 6 * PAGE_SIZE as u64);
        assert!(store.read_page(0).unwrap().iter().all(|&b| b == 0));
        assert!(store.read_page(4).unwrap().iter().all(|&b| b == 0));
        assert!(store.read_page(5).unwrap().iter().all(|&b| b == 0xEE));
        assert!(store.read_page(9).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn wrong_image_size_is_rejected() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("test-db")).unwrap();

        assert!(store.write_page(0, &[0u8; 100]).is_err());
    }
}
