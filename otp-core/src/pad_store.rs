// File:    pad_store.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: Loads pad pages and hands each one out at most once, across threads and processes.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

//! Exactly-once allocation of one-time pad pages.
//!
//! The pad file is loaded once into an indexed arena. The consumed-pages
//! file is the durable source of truth: an identifier is only reported as
//! claimed after it has been appended there and synced. Every claim runs
//! under an in-process mutex and an exclusive advisory lock on the lock
//! file, so independent processes sharing one vault never hand out the
//! same page twice.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use fs2::FileExt;
use log::{debug, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::PadError;

/// Length in characters of a page identifier.
pub const PAGE_ID_LEN: usize = 8;

/// Default total line length of a page, identifier included.
pub const DEFAULT_PAGE_LENGTH: usize = 5000;

/// File name of the pad inside a vault directory.
pub const PAD_FILE_NAME: &str = "otp_cipher.txt";
/// File name of the consumed-pages record inside a vault directory.
pub const CONSUMED_FILE_NAME: &str = "used_pages.txt";
/// File name of the lock target inside a vault directory.
pub const LOCK_FILE_NAME: &str = "used_pages.lock";

/// The 8-character identifier of a pad page.
///
/// Identifiers are printable ASCII without spaces and never contain the
/// wire delimiters `|` or `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(String);

impl PageId {
    /// The identifier as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PageId {
    type Err = PadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == PAGE_ID_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_graphic() && b != b'|' && b != b':');
        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(PadError::InvalidPageId(s.to_owned()))
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One line of the pad file: an identifier and the pad bytes after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadPage {
    id: PageId,
    content: Vec<u8>,
}

impl PadPage {
    /// The page identifier.
    #[must_use]
    pub const fn id(&self) -> &PageId {
        &self.id
    }

    /// The pad bytes of the page.
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

/// Locations of the three files a pad store works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadPaths {
    /// The pad pages, one per line.
    pub pad_file: PathBuf,
    /// Append-only record of consumed identifiers.
    pub consumed_file: PathBuf,
    /// Scratch file held under an exclusive lock during claims.
    pub lock_file: PathBuf,
}

impl PadPaths {
    /// The conventional file names inside a vault directory.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            pad_file: dir.join(PAD_FILE_NAME),
            consumed_file: dir.join(CONSUMED_FILE_NAME),
            lock_file: dir.join(LOCK_FILE_NAME),
        }
    }
}

/// Page counts of a pad store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PadStatus {
    /// Pages in the pad file.
    pub total_pages: usize,
    /// Pages recorded as consumed.
    pub consumed_pages: usize,
    /// Pages still available for sending.
    pub remaining_pages: usize,
}

/// In-memory mirror of the consumed-pages file.
#[derive(Debug, Default)]
struct ConsumedSet {
    ids: HashSet<String>,
    /// Bytes of the file already merged into `ids`.
    synced_len: u64,
    /// The file ends in a partial record that must be fenced off before appending.
    needs_separator: bool,
}

impl ConsumedSet {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Merges records appended since the last refresh, by this or any other process.
    fn refresh(&mut self, path: &Path) -> Result<(), PadError> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(PadError::io(path, e)),
        };
        let len = file.metadata().map_err(|e| PadError::io(path, e))?.len();
        if len < self.synced_len {
            warn!(
                "Consumed-pages file '{}' shrank from {} to {len} bytes; rescanning. Known identifiers stay consumed.",
                path.display(),
                self.synced_len
            );
            self.synced_len = 0;
        }

        file.seek(SeekFrom::Start(self.synced_len))
            .map_err(|e| PadError::io(path, e))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)
            .map_err(|e| PadError::io(path, e))?;

        let complete = tail.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
        for line in tail[..complete].split(|b| *b == b'\n') {
            let id = String::from_utf8_lossy(line);
            let id = id.trim();
            if !id.is_empty() {
                self.ids.insert(id.to_owned());
            }
        }
        self.synced_len += complete as u64;

        let partial = complete < tail.len();
        if partial && !self.needs_separator {
            warn!(
                "Consumed-pages file '{}' ends with a partial record; it will be fenced off.",
                path.display()
            );
        }
        self.needs_separator = partial;
        Ok(())
    }

    /// Durably appends `id`. Returns only after the record is synced.
    fn record(&mut self, path: &Path, id: &PageId) -> Result<(), PadError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PadError::io(path, e))?;

        let mut line = Vec::with_capacity(PAGE_ID_LEN + 2);
        if self.needs_separator {
            line.push(b'\n');
        }
        line.extend_from_slice(id.as_str().as_bytes());
        line.push(b'\n');

        file.write_all(&line).map_err(|e| PadError::io(path, e))?;
        file.sync_data().map_err(|e| PadError::io(path, e))?;

        self.needs_separator = false;
        self.ids.insert(id.to_string());
        Ok(())
    }
}

/// Holds an exclusive advisory lock on the lock file until dropped.
struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self, PadError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| PadError::io(path, e))?;
        FileExt::lock_exclusive(&file).map_err(|e| PadError::io(path, e))?;
        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to unlock '{}': {e}", self.path.display());
        }
    }
}

/// The pages of one pad file plus the shared record of which are consumed.
#[derive(Debug)]
pub struct PadStore {
    paths: PadPaths,
    pages: Vec<PadPage>,
    index: HashMap<PageId, usize>,
    consumed: Mutex<ConsumedSet>,
}

impl PadStore {
    /// Loads the pad file. The consumed record is read lazily on first use.
    ///
    /// Lines shorter than an identifier are skipped.
    ///
    /// # Errors
    ///
    /// Fails if the pad file cannot be read, a line starts with an invalid
    /// identifier, an identifier occurs twice, or the pages differ in length.
    pub fn open(paths: PadPaths) -> Result<Self, PadError> {
        let raw = fs::read(&paths.pad_file).map_err(|e| PadError::io(&paths.pad_file, e))?;

        let mut pages = Vec::new();
        let mut index = HashMap::new();
        for line in raw.split(|b| *b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.len() < PAGE_ID_LEN {
                continue;
            }
            let (id, content) = line.split_at(PAGE_ID_LEN);
            let id: PageId = std::str::from_utf8(id)
                .map_err(|_| PadError::InvalidPageId(String::from_utf8_lossy(id).into_owned()))?
                .parse()?;
            if index.contains_key(&id) {
                return Err(PadError::DuplicatePage(id.to_string()));
            }
            if let Some(expected) = pages
                .first()
                .map(|p: &PadPage| p.content.len())
                .filter(|&n| n != content.len())
            {
                return Err(PadError::UnevenPage {
                    id: id.to_string(),
                    expected,
                    found: content.len(),
                });
            }
            index.insert(id.clone(), pages.len());
            pages.push(PadPage {
                id,
                content: content.to_vec(),
            });
        }
        debug!(
            "Loaded {} pad pages from '{}'",
            pages.len(),
            paths.pad_file.display()
        );

        Ok(Self {
            paths,
            pages,
            index,
            consumed: Mutex::new(ConsumedSet::default()),
        })
    }

    /// Opens the pad kept in a vault directory.
    ///
    /// # Errors
    ///
    /// See [`PadStore::open`].
    pub fn open_dir(dir: &Path) -> Result<Self, PadError> {
        Self::open(PadPaths::in_dir(dir))
    }

    /// The files this store works with.
    #[must_use]
    pub const fn paths(&self) -> &PadPaths {
        &self.paths
    }

    /// Number of pages in the pad file.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the pad file held no pages at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Pad bytes per page; every page has the same length.
    #[must_use]
    pub fn page_length(&self) -> usize {
        self.pages.first().map_or(0, |p| p.content.len())
    }

    /// All pages in file order.
    #[must_use]
    pub fn pages(&self) -> &[PadPage] {
        &self.pages
    }

    /// Looks a page up by identifier, consumed or not.
    #[must_use]
    pub fn page(&self, id: &str) -> Option<&PadPage> {
        self.index.get(id).map(|&i| &self.pages[i])
    }

    /// Claims the first page, in file order, that no one has consumed yet.
    ///
    /// The page is recorded as consumed and synced to disk before it is
    /// returned, so no caller in this or any other process sharing the same
    /// consumed-pages file can ever receive it again.
    ///
    /// # Errors
    ///
    /// [`PadError::Exhausted`] when every page is consumed, or an I/O error
    /// from the lock or consumed-pages file. On error nothing is handed out.
    pub fn claim_next_unused_page(&self) -> Result<&PadPage, PadError> {
        self.exclusive(|consumed| {
            let page = self
                .pages
                .iter()
                .find(|p| !consumed.contains(p.id.as_str()))
                .ok_or(PadError::Exhausted)?;
            consumed.record(&self.paths.consumed_file, &page.id)?;
            debug!("Claimed pad page {}", page.id);
            Ok(page)
        })
    }

    /// Records `id` as consumed after the receiving side used it.
    ///
    /// Returns `true` if this call recorded it and `false` if it was already
    /// consumed; an identifier is never appended twice.
    ///
    /// # Errors
    ///
    /// [`PadError::InvalidPageId`] for a malformed identifier, or an I/O error.
    pub fn mark_identifier_consumed(&self, id: &str) -> Result<bool, PadError> {
        let id: PageId = id.parse()?;
        self.exclusive(|consumed| {
            if consumed.contains(id.as_str()) {
                return Ok(false);
            }
            consumed.record(&self.paths.consumed_file, &id)?;
            debug!("Marked pad page {id} consumed");
            Ok(true)
        })
    }

    /// Whether `id` is recorded as consumed, including by other processes.
    ///
    /// # Errors
    ///
    /// An I/O error from the lock or consumed-pages file.
    pub fn is_consumed(&self, id: &str) -> Result<bool, PadError> {
        self.exclusive(|consumed| Ok(consumed.contains(id)))
    }

    /// Counts total, consumed and remaining pages.
    ///
    /// # Errors
    ///
    /// An I/O error from the lock or consumed-pages file.
    pub fn status(&self) -> Result<PadStatus, PadError> {
        self.exclusive(|consumed| {
            let consumed_pages = self
                .pages
                .iter()
                .filter(|p| consumed.contains(p.id.as_str()))
                .count();
            Ok(PadStatus {
                total_pages: self.pages.len(),
                consumed_pages,
                remaining_pages: self.pages.len() - consumed_pages,
            })
        })
    }

    /// SHA-256 of the pad file, hex encoded, for comparing pads out of band.
    ///
    /// # Errors
    ///
    /// Fails if the pad file can no longer be read.
    pub fn fingerprint(&self) -> Result<String, PadError> {
        let raw = fs::read(&self.paths.pad_file)
            .map_err(|e| PadError::io(&self.paths.pad_file, e))?;
        Ok(hex::encode(Sha256::digest(&raw)))
    }

    /// Runs `op` with both the in-process and the cross-process lock held and
    /// the consumed set brought up to date.
    fn exclusive<T>(
        &self,
        op: impl FnOnce(&mut ConsumedSet) -> Result<T, PadError>,
    ) -> Result<T, PadError> {
        let mut consumed = self.consumed.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = FileLock::acquire(&self.paths.lock_file)?;
        consumed.refresh(&self.paths.consumed_file)?;
        op(&mut consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_pad(dir: &Path, lines: &[&str]) -> PadPaths {
        let paths = PadPaths::in_dir(dir);
        fs::write(&paths.pad_file, lines.join("\n")).unwrap();
        paths
    }

    #[test]
    fn page_id_validation() {
        assert!("AB12CD34".parse::<PageId>().is_ok());
        assert!("AB12CD3".parse::<PageId>().is_err());
        assert!("AB12|D34".parse::<PageId>().is_err());
        assert!("AB12:D34".parse::<PageId>().is_err());
        assert!("AB12 D34".parse::<PageId>().is_err());
    }

    #[test]
    fn open_skips_short_lines_and_strips_cr() {
        let dir = tempdir().unwrap();
        let paths = write_pad(dir.path(), &["AAAAAAAAxyz\r", "short", "", "BBBBBBBB123"]);
        let store = PadStore::open(paths).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.page("AAAAAAAA").unwrap().content(), b"xyz");
        assert_eq!(store.page("BBBBBBBB").unwrap().content(), b"123");
    }

    #[test]
    fn open_rejects_duplicate_identifiers() {
        let dir = tempdir().unwrap();
        let paths = write_pad(dir.path(), &["AAAAAAAAxyz", "AAAAAAAA123"]);
        assert!(matches!(
            PadStore::open(paths),
            Err(PadError::DuplicatePage(id)) if id == "AAAAAAAA"
        ));
    }

    #[test]
    fn open_rejects_pages_of_different_length() {
        let dir = tempdir().unwrap();
        let paths = write_pad(dir.path(), &["PAGE0001abcd", "PAGE0002abcdefghijklmnop"]);
        assert!(matches!(
            PadStore::open(paths.clone()),
            Err(PadError::UnevenPage { id, expected: 4, found: 16 }) if id == "PAGE0002"
        ));
        assert!(!paths.consumed_file.exists(), "nothing may be claimed from a rejected pad");
    }

    #[test]
    fn page_length_is_shared_by_all_pages() {
        let dir = tempdir().unwrap();
        let paths = write_pad(dir.path(), &["AAAAAAAAxyz", "BBBBBBBB123"]);
        assert_eq!(PadStore::open(paths).unwrap().page_length(), 3);
    }

    #[test]
    fn partial_record_is_fenced_off() {
        let dir = tempdir().unwrap();
        let paths = write_pad(dir.path(), &["AAAAAAAAxyz", "BBBBBBBB123"]);
        // A crash mid-append left half an identifier behind.
        fs::write(&paths.consumed_file, "AAAAAAAA\nBBBB").unwrap();

        let store = PadStore::open(paths.clone()).unwrap();
        assert!(matches!(
            store.claim_next_unused_page(),
            Ok(page) if page.id().as_str() == "BBBBBBBB"
        ));
        let record = fs::read_to_string(&paths.consumed_file).unwrap();
        assert_eq!(record, "AAAAAAAA\nBBBB\nBBBBBBBB\n");

        let reopened = PadStore::open(paths).unwrap();
        assert!(matches!(
            reopened.claim_next_unused_page(),
            Err(PadError::Exhausted)
        ));
    }

    #[test]
    fn fingerprint_is_stable() {
        let dir = tempdir().unwrap();
        let paths = write_pad(dir.path(), &["AAAAAAAAxyz"]);
        let store = PadStore::open(paths).unwrap();
        let first = store.fingerprint().unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, store.fingerprint().unwrap());
    }
}
