//! # Write-Ahead Log
//!
//! Append-only record log providing durability and atomic multi-page
//! commits. Every page modification is written here first; the main page
//! file is only touched by recovery and checkpointing.
//!
//! ## Record Format
//!
//! The log is a concatenation of two record kinds with no file header and
//! no inter-record padding. All integers are little-endian.
//!
//! ```text
//! Page record (4108 bytes):
//! +----------+----------+-----------+--------------------+
//! | type = 1 | tx_id    | page_id   | page image         |
//! | (4 B)    | (4 B)    | (4 B)     | (4096 B)           |
//! +----------+----------+-----------+--------------------+
//!
//! Commit record (12 bytes):
//! +----------+----------+----------------------+
//! | type = 2 | tx_id    | magic = 0xC0DECAFE   |
//! +----------+----------+----------------------+
//! ```
//!
//! A commit record completes every preceding page record that carries the
//! same `tx_id`. Page records without a commit record are invisible and
//! are discarded by the next recovery.
//!
//! ## Write Protocol
//!
//! Appends are positioned writes at the logical end of the log. The
//! in-memory length only advances after a record is fully written, so a
//! failed append leaves orphan bytes past the logical end that the next
//! append simply overwrites. The caller fsyncs once per commit, after the
//! commit record.
//!
//! ## Read Protocol
//!
//! Readers scan an immutable prefix `[0, snapshot)` of the log. Reads go
//! through a cached read-only memory map that is created lazily, grown
//! when a larger prefix is requested, and dropped whenever the log
//! shrinks. `WalScanner` walks records forward, identifying boundaries by
//! the leading type tag; a short final record (crash mid-append) or an
//! unknown tag ends the scan and is classified in [`ScanTail`].
//!
//! ## Reclamation
//!
//! `truncate` empties the log after recovery has replayed it.
//! `truncate_prefix` rewrites the log so `[upto, len)` becomes the new
//! `[0, len - upto)`; the checkpoint uses it to drop the prefix no live
//! reader still needs, rebasing reader snapshots by the same amount.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashSet;
use memmap2::Mmap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::EngineError;

use super::PAGE_SIZE;

pub const WAL_RECORD_PAGE: u32 = 1;
pub const WAL_RECORD_COMMIT: u32 = 2;
pub const COMMIT_MAGIC: u32 = 0xC0DE_CAFE;

pub const RECORD_HEADER_SIZE: usize = 12;
pub const PAGE_RECORD_SIZE: usize = RECORD_HEADER_SIZE + PAGE_SIZE;
pub const COMMIT_RECORD_SIZE: usize = RECORD_HEADER_SIZE;

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageRecordHeader {
    pub record_type: U32,
    pub tx_id: U32,
    pub page_id: U32,
}

impl PageRecordHeader {
    pub fn new(tx_id: u32, page_id: u32) -> Self {
        Self {
            record_type: U32::new(WAL_RECORD_PAGE),
            tx_id: U32::new(tx_id),
            page_id: U32::new(page_id),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct CommitRecord {
    pub record_type: U32,
    pub tx_id: U32,
    pub magic: U32,
}

impl CommitRecord {
    pub fn new(tx_id: u32) -> Self {
        Self {
            record_type: U32::new(WAL_RECORD_COMMIT),
            tx_id: U32::new(tx_id),
            magic: U32::new(COMMIT_MAGIC),
        }
    }
}

/// One record yielded by [`WalScanner`], borrowing from the scanned prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalRecord<'a> {
    Page {
        tx_id: u32,
        page_id: u32,
        image: &'a [u8],
    },
    Commit {
        tx_id: u32,
        magic: u32,
    },
}

/// How a scan over a log prefix ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTail {
    /// The prefix ended exactly on a record boundary.
    Clean,
    /// The final record was cut short, as after a crash mid-append.
    Partial { offset: u64 },
    /// The leading tag at `offset` is neither a page nor a commit record.
    Corrupt { offset: u64 },
}

/// Forward scanner over a byte prefix of the log.
///
/// Iteration stops at the first incomplete or unrecognizable record;
/// [`WalScanner::tail`] reports why after the iterator is exhausted.
pub struct WalScanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    tail: Option<ScanTail>,
}

impl<'a> WalScanner<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            tail: None,
        }
    }

    pub fn tail(&self) -> Option<ScanTail> {
        self.tail
    }
}

impl<'a> Iterator for WalScanner<'a> {
    type Item = (u64, WalRecord<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.tail.is_some() {
            return None;
        }

        let offset = self.pos;
        let remaining = self.bytes.len() - offset;

        if remaining == 0 {
            self.tail = Some(ScanTail::Clean);
            return None;
        }
        if remaining < 4 {
            self.tail = Some(ScanTail::Partial {
                offset: offset as u64,
            });
            return None;
        }

        // Classify by the tag first: an unrecognized tag is corruption no
        // matter how few bytes follow it, while a recognized tag with a
        // short record is an ordinary crash-truncated tail.
        let tag = u32::from_le_bytes(self.bytes[offset..offset + 4].try_into().unwrap());
        match tag {
            WAL_RECORD_PAGE => {
                if remaining < PAGE_RECORD_SIZE {
                    self.tail = Some(ScanTail::Partial {
                        offset: offset as u64,
                    });
                    return None;
                }
                let header = PageRecordHeader::read_from_bytes(
                    &self.bytes[offset..offset + RECORD_HEADER_SIZE],
                )
                .unwrap();
                let image = &self.bytes[offset + RECORD_HEADER_SIZE..offset + PAGE_RECORD_SIZE];
                self.pos = offset + PAGE_RECORD_SIZE;
                Some((
                    offset as u64,
                    WalRecord::Page {
                        tx_id: header.tx_id.get(),
                        page_id: header.page_id.get(),
                        image,
                    },
                ))
            }
            WAL_RECORD_COMMIT => {
                if remaining < COMMIT_RECORD_SIZE {
                    self.tail = Some(ScanTail::Partial {
                        offset: offset as u64,
                    });
                    return None;
                }
                let record = CommitRecord::read_from_bytes(
                    &self.bytes[offset..offset + COMMIT_RECORD_SIZE],
                )
                .unwrap();
                self.pos = offset + COMMIT_RECORD_SIZE;
                Some((
                    offset as u64,
                    WalRecord::Commit {
                        tx_id: record.tx_id.get(),
                        magic: record.magic.get(),
                    },
                ))
            }
            _ => {
                self.tail = Some(ScanTail::Corrupt {
                    offset: offset as u64,
                });
                None
            }
        }
    }
}

/// Collects the transaction IDs that own a commit record with a valid
/// magic inside the given prefix.
pub fn committed_transactions(bytes: &[u8]) -> HashSet<u32> {
    let mut committed = HashSet::new();
    for (_, record) in WalScanner::new(bytes) {
        if let WalRecord::Commit { tx_id, magic } = record {
            if magic == COMMIT_MAGIC {
                committed.insert(tx_id);
            }
        }
    }
    committed
}

pub struct Wal {
    file: File,
    path: PathBuf,
    len: u64,
    read_map: RwLock<Option<Mmap>>,
}

impl Wal {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open WAL file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            read_map: RwLock::new(None),
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn append_page_record(&mut self, tx_id: u32, page_id: u32, data: &[u8]) -> Result<u64> {
        ensure!(
            data.len() == PAGE_SIZE,
            "page image must be exactly {} bytes, got {}",
            PAGE_SIZE,
            data.len()
        );

        let offset = self.len;
        let header = PageRecordHeader::new(tx_id, page_id);

        self.file
            .seek(SeekFrom::Start(offset))
            .wrap_err("failed to seek to log end")?;
        self.file
            .write_all(header.as_bytes())
            .wrap_err("failed to write page record header")?;
        self.file
            .write_all(data)
            .wrap_err("failed to write page record image")?;

        self.len = offset + PAGE_RECORD_SIZE as u64;
        Ok(offset)
    }

    pub fn append_commit_record(&mut self, tx_id: u32) -> Result<u64> {
        let offset = self.len;
        let record = CommitRecord::new(tx_id);

        self.file
            .seek(SeekFrom::Start(offset))
            .wrap_err("failed to seek to log end")?;
        self.file
            .write_all(record.as_bytes())
            .wrap_err("failed to write commit record")?;

        self.len = offset + COMMIT_RECORD_SIZE as u64;
        Ok(offset)
    }

    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync WAL file '{}'", self.path.display()))
    }

    /// Runs `f` over the immutable byte prefix `[0, end)` of the log.
    ///
    /// The prefix is served from a cached read-only mapping that is
    /// remapped when a larger prefix is requested than it covers.
    pub fn with_prefix<R>(&self, end: u64, f: impl FnOnce(&[u8]) -> Result<R>) -> Result<R> {
        ensure!(
            end <= self.len,
            "scan end {} beyond WAL length {}",
            end,
            self.len
        );

        if end == 0 {
            return f(&[]);
        }

        let guard = self.read_map.upgradable_read();
        let needs_remap = match guard.as_ref() {
            None => true,
            Some(map) => (map.len() as u64) < end,
        };

        let guard = if needs_remap {
            let mut write_guard = RwLockUpgradableReadGuard::upgrade(guard);
            // SAFETY: Mmap::map is unsafe because the underlying file could be
            // modified externally while mapped. This is safe because:
            // 1. The WAL file is owned exclusively by this process.
            // 2. Bytes below the logical length are append-frozen; they only
            //    change through truncation, which drops this mapping first
            //    under exclusive access to the log.
            // 3. The slice handed to `f` never extends past the logical
            //    length checked above.
            let map = unsafe {
                Mmap::map(&self.file).wrap_err_with(|| {
                    format!("failed to memory-map WAL file '{}'", self.path.display())
                })?
            };
            *write_guard = Some(map);
            RwLockWriteGuard::downgrade(write_guard)
        } else {
            RwLockUpgradableReadGuard::downgrade(guard)
        };

        let map = guard.as_ref().unwrap();
        ensure!(
            map.len() as u64 >= end,
            "WAL mapping of {} bytes is shorter than requested prefix {}",
            map.len(),
            end
        );

        f(&map[..end as usize])
    }

    /// Copies the page image out of the page record starting at `offset`.
    pub fn page_image_at(&self, offset: u64) -> Result<Vec<u8>> {
        let end = offset + PAGE_RECORD_SIZE as u64;
        self.with_prefix(end, |bytes| {
            let start = offset as usize;
            let header =
                PageRecordHeader::read_from_bytes(&bytes[start..start + RECORD_HEADER_SIZE])
                    .unwrap();
            if header.record_type.get() != WAL_RECORD_PAGE {
                return Err(EngineError::Corruption { offset }.into());
            }
            Ok(bytes[start + RECORD_HEADER_SIZE..start + PAGE_RECORD_SIZE].to_vec())
        })
    }

    /// Empties the log. Used after recovery has replayed its content.
    pub fn truncate(&mut self) -> Result<()> {
        self.file
            .set_len(0)
            .wrap_err("failed to truncate WAL file")?;
        self.file
            .sync_all()
            .wrap_err("failed to sync WAL file after truncation")?;
        self.len = 0;
        *self.read_map.get_mut() = None;
        Ok(())
    }

    /// Rewrites the log so that `[upto, len)` becomes the new `[0, len - upto)`.
    ///
    /// Snapshot offsets held by readers must be rebased by `upto` by the
    /// caller under the same exclusive access.
    pub fn truncate_prefix(&mut self, upto: u64) -> Result<()> {
        if upto == 0 {
            return Ok(());
        }
        ensure!(
            upto <= self.len,
            "cannot drop {} bytes from a {} byte log",
            upto,
            self.len
        );

        let remaining = self.len - upto;
        if remaining == 0 {
            return self.truncate();
        }

        let mut suffix = vec![0u8; remaining as usize];
        self.file
            .seek(SeekFrom::Start(upto))
            .wrap_err("failed to seek to surviving log suffix")?;
        self.file
            .read_exact(&mut suffix)
            .wrap_err("failed to read surviving log suffix")?;

        self.file
            .seek(SeekFrom::Start(0))
            .wrap_err("failed to seek to log start")?;
        self.file
            .write_all(&suffix)
            .wrap_err("failed to rewrite log suffix")?;
        self.file
            .set_len(remaining)
            .wrap_err("failed to shrink WAL file")?;
        self.file
            .sync_all()
            .wrap_err("failed to sync WAL file after prefix truncation")?;

        self.len = remaining;
        *self.read_map.get_mut() = None;
        Ok(())
    }
}
