//! Free-page recycler: a bounded LIFO of addresses reclaimed by merges,
//! persisted in its own file so freed pages survive restarts.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{IndexError, IndexResult, PageAddr};

use crate::bincode_config;

/// LIFO, because the most recently freed pages are the hottest in the page
/// cache; bounded, so the recycler file stays a fixed small cost. A `push`
/// beyond capacity drops the address: that page leaks until the file is
/// rebuilt offline.
#[derive(Debug)]
pub struct FreeStack {
    file: File,
    slots: Vec<PageAddr>,
    capacity: usize,
}

impl FreeStack {
    pub fn open(path: &Path, capacity: usize) -> IndexResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let slots = if len == 0 {
            Vec::new()
        } else {
            let mut buf = vec![0u8; len as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            let (slots, _): (Vec<PageAddr>, usize) = decode_from_slice(&buf, bincode_config())
                .map_err(|e| IndexError::Storage(format!("decode free stack: {e}")))?;
            slots
        };

        Ok(Self { file, slots, capacity })
    }

    pub fn push(&mut self, addr: PageAddr) {
        if self.slots.len() == self.capacity {
            return;
        }
        self.slots.push(addr);
    }

    /// Most recently pushed address, if any.
    pub fn pop(&mut self) -> Option<PageAddr> {
        self.slots.pop()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Rewrite the stack image at offset 0 and drop any stale tail bytes.
    pub fn persist(&mut self) -> IndexResult<()> {
        let bytes = encode_to_vec(&self.slots, bincode_config())
            .map_err(|e| IndexError::Storage(format!("encode free stack: {e}")))?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        self.file.set_len(bytes.len() as u64)?;
        self.file.flush()?;
        Ok(())
    }
}
