#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::{fmt, io, str::FromStr};
use thiserror::Error;

/// Byte offset of a page within its backing file.
/// Examples:
/// - `let first_page = PageAddr(16); // right after the file header`
/// - `let second_page = PageAddr(16 + 4096);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageAddr(pub u64);

impl fmt::Display for PageAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Canonical error type shared across the index subsystems.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("config: {0}")]
    Config(String),
    #[error("key: {0}")]
    Key(String),
    #[error("index poisoned by earlier failure: {0}")]
    Poisoned(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries an `IndexError`.
pub type IndexResult<T> = Result<T, IndexError>;

/// Runtime configuration for an index instance.
///
/// # Example
/// ```
/// use common::TreeConfig;
///
/// let config = TreeConfig::builder()
///     .page_size(4096)
///     .branch_factor(32)
///     .leaf_capacity(32)
///     .cache_pages(512)
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct TreeConfig {
    /// Fixed on-disk page allocation in bytes, for both page files.
    #[builder(default = 8192)]
    pub page_size: usize,
    /// Maximum number of children per inner page; an inner page reaching
    /// this count splits into two halves.
    #[builder(default = 64)]
    pub branch_factor: usize,
    /// Maximum number of entries per leaf page; a leaf reaching this count
    /// splits into two halves.
    #[builder(default = 64)]
    pub leaf_capacity: usize,
    /// Number of pages each in-memory cache keeps resident.
    #[builder(default = 3000)]
    pub cache_pages: usize,
    /// Capacity of each free-page recycler stack.
    #[builder(default = 1024)]
    pub recycle_slots: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: 8192,
            branch_factor: 64,
            leaf_capacity: 64,
            cache_pages: 3000,
            recycle_slots: 1024,
        }
    }
}

impl TreeConfig {
    /// Splitting an overfull page into equal halves requires even limits.
    pub fn validate(&self) -> IndexResult<()> {
        if self.branch_factor < 4 || self.branch_factor % 2 != 0 {
            return Err(IndexError::Config(format!(
                "branch_factor must be even and at least 4, got {}",
                self.branch_factor
            )));
        }
        if self.leaf_capacity < 4 || self.leaf_capacity % 2 != 0 {
            return Err(IndexError::Config(format!(
                "leaf_capacity must be even and at least 4, got {}",
                self.leaf_capacity
            )));
        }
        if self.page_size < 512 {
            return Err(IndexError::Config(format!(
                "page_size must be at least 512 bytes, got {}",
                self.page_size
            )));
        }
        if self.cache_pages == 0 {
            return Err(IndexError::Config("cache_pages must be at least 1".into()));
        }
        Ok(())
    }

    /// Minimum occupancy of a non-root inner page.
    pub fn branch_floor(&self) -> usize {
        self.branch_factor / 2
    }

    /// Minimum occupancy of a non-root leaf page.
    pub fn leaf_floor(&self) -> usize {
        self.leaf_capacity / 2
    }
}

/// Fixed-width, NUL-padded string usable as an index key.
///
/// Occupies a constant-size slot inside a page and orders byte-wise, which
/// coincides with `str` ordering for UTF-8 content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedStr<const N: usize>([u8; N]);

impl<const N: usize> Serialize for FixedStr<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedStr<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(deserializer)?;
        if bytes.len() != N {
            return Err(serde::de::Error::invalid_length(
                bytes.len(),
                &format!("expected {N} bytes").as_str(),
            ));
        }
        let mut buf = [0u8; N];
        buf.copy_from_slice(&bytes);
        Ok(Self(buf))
    }
}

impl<const N: usize> FixedStr<N> {
    pub fn new(s: &str) -> IndexResult<Self> {
        let bytes = s.as_bytes();
        if bytes.len() > N {
            return Err(IndexError::Key(format!("longer than {N} bytes: {s:?}")));
        }
        let mut buf = [0u8; N];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }
}

impl<const N: usize> FromStr for FixedStr<N> {
    type Err = IndexError;

    fn from_str(s: &str) -> IndexResult<Self> {
        Self::new(s)
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{FixedStr, IndexError, IndexResult, PageAddr, TreeConfig};
}
