//! Paged file store: one backing file per page kind, a fixed header at
//! offset 0, and fixed-size pages at offsets `HEADER_LEN + k * page_size`.
//!
//! Page images are bincode-encoded into a zero-padded buffer of exactly
//! `page_size` bytes, so a page address is always a stable byte offset.
//! Freed addresses go through the [`FreeStack`] recycler and are handed out
//! again before the file is extended.

#[cfg(test)]
mod tests;

mod freelist;

pub use freelist::FreeStack;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{IndexError, IndexResult, PageAddr};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Encoded length of `FileHeader`: two fixed-width u64 fields.
pub const HEADER_LEN: u64 = 16;

pub(crate) fn bincode_config() -> impl Config {
    config::legacy()
}

/// On-disk header record: where the root page lives and where the next
/// fresh page would be appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileHeader {
    root: PageAddr,
    end: u64,
}

/// A single page file plus its header and free-page recycler.
#[derive(Debug)]
pub struct PageFile {
    file: File,
    header: FileHeader,
    page_size: usize,
    free: FreeStack,
}

impl PageFile {
    /// Open `path`, creating it with a fresh header when absent or empty.
    ///
    /// The recycler stack lives next to the page file, at `<path>.free`.
    /// Returns the store and whether the file was newly initialized.
    pub fn open(path: &Path, page_size: usize, recycle_slots: usize) -> IndexResult<(Self, bool)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let free = FreeStack::open(&recycle_path(path), recycle_slots)?;

        if file.metadata()?.len() == 0 {
            let header = FileHeader {
                root: PageAddr(HEADER_LEN),
                end: HEADER_LEN,
            };
            let mut store = Self { file, header, page_size, free };
            store.flush_header()?;
            Ok((store, true))
        } else {
            let mut buf = [0u8; HEADER_LEN as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            let (header, _) = decode_from_slice(&buf, bincode_config())
                .map_err(|e| IndexError::Storage(format!("decode file header: {e}")))?;
            Ok((Self { file, header, page_size, free }, false))
        }
    }

    /// Address recorded in the header as the entry point of this file.
    pub fn root(&self) -> PageAddr {
        self.header.root
    }

    pub fn set_root(&mut self, addr: PageAddr) {
        self.header.root = addr;
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Offset one past the last allocated page.
    pub fn end(&self) -> u64 {
        self.header.end
    }

    /// Hand out a page address: most recently freed first, else extend the
    /// file by one page.
    pub fn allocate(&mut self) -> PageAddr {
        if let Some(addr) = self.free.pop() {
            return addr;
        }
        let addr = PageAddr(self.header.end);
        self.header.end += self.page_size as u64;
        addr
    }

    /// Return a page address to the recycler. The page's bytes on disk are
    /// undefined from here on.
    pub fn free(&mut self, addr: PageAddr) {
        self.free.push(addr);
    }

    pub fn read_page<P: DeserializeOwned>(&mut self, addr: PageAddr) -> IndexResult<P> {
        self.file.seek(SeekFrom::Start(addr.0))?;
        let mut buf = vec![0u8; self.page_size];
        self.file.read_exact(&mut buf)?;
        let (page, _) = decode_from_slice(&buf, bincode_config())
            .map_err(|e| IndexError::Storage(format!("decode page {addr}: {e}")))?;
        Ok(page)
    }

    pub fn write_page<P: Serialize>(&mut self, addr: PageAddr, page: &P) -> IndexResult<()> {
        let bytes = encode_to_vec(page, bincode_config())
            .map_err(|e| IndexError::Storage(format!("encode page {addr}: {e}")))?;
        if bytes.len() > self.page_size {
            return Err(IndexError::Storage(format!(
                "page image too large: {} bytes (page size {})",
                bytes.len(),
                self.page_size
            )));
        }
        let mut buf = vec![0u8; self.page_size];
        buf[..bytes.len()].copy_from_slice(&bytes);
        self.file.seek(SeekFrom::Start(addr.0))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Rewrite the header record at offset 0.
    pub fn flush_header(&mut self) -> IndexResult<()> {
        let bytes = encode_to_vec(&self.header, bincode_config())
            .map_err(|e| IndexError::Storage(format!("encode file header: {e}")))?;
        debug_assert_eq!(bytes.len() as u64, HEADER_LEN);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    /// Flush the header and persist the recycler stack.
    pub fn close(&mut self) -> IndexResult<()> {
        self.flush_header()?;
        self.file.flush()?;
        self.free.persist()?;
        Ok(())
    }
}

fn recycle_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.free", path.display()))
}
