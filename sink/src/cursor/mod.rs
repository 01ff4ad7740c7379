//! Durable cursor storage.
//!
//! ## Usage
//!
//! ```ignore
//! use sink::cursor::CursorStoreSource;
//!
//! // Development: keep the cursor in memory
//! let store = CursorStoreSource::mock().into_store().await?;
//!
//! // Production: one JSON file per stream, or PostgreSQL
//! let store = CursorStoreSource::file("/var/lib/sink").into_store().await?;
//! let store = CursorStoreSource::live("postgres://...").into_store().await?;
//! ```

mod file;
mod memory;
mod postgres;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

pub use file::FileCursorStore;
pub use memory::MemoryCursorStore;
pub use postgres::PostgresCursorStore;

use crate::errors::CursorStoreError;
use crate::types::Cursor;

/// Identifies one cursor: a stream (endpoint and package) and its output
/// module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorKey {
    pub stream: String,
    pub module: String,
}

impl CursorKey {
    pub fn new(stream: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            module: module.into(),
        }
    }
}

impl fmt::Display for CursorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream, self.module)
    }
}

/// Trait for cursor storage backends.
///
/// `save` must be atomic: after a crash `load` returns either the previous
/// or the new cursor, never a partial one.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, key: &CursorKey) -> Result<Option<Cursor>, CursorStoreError>;

    async fn save(&self, key: &CursorKey, cursor: &Cursor) -> Result<(), CursorStoreError>;
}

/// Which cursor storage backend to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorStoreSource {
    /// In-memory, lost on restart.
    Mock,

    /// One JSON file per cursor key under a directory.
    File { directory: PathBuf },

    /// PostgreSQL `sink_cursors` table.
    Live { database_url: String },
}

impl CursorStoreSource {
    pub fn mock() -> Self {
        Self::Mock
    }

    pub fn file(directory: impl Into<PathBuf>) -> Self {
        Self::File {
            directory: directory.into(),
        }
    }

    pub fn live(database_url: impl Into<String>) -> Self {
        Self::Live {
            database_url: database_url.into(),
        }
    }

    /// `memory`, a `postgres://` URL, or a directory path.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("memory") {
            Self::mock()
        } else if value.starts_with("postgres://") || value.starts_with("postgresql://") {
            Self::live(value)
        } else {
            Self::file(value)
        }
    }

    pub async fn into_store(self) -> Result<Box<dyn CursorStore>, CursorStoreError> {
        match self {
            Self::Mock => Ok(Box::new(MemoryCursorStore::new())),
            Self::File { directory } => Ok(Box::new(FileCursorStore::new(directory).await?)),
            Self::Live { database_url } => {
                Ok(Box::new(PostgresCursorStore::new(&database_url).await?))
            }
        }
    }
}

impl fmt::Display for CursorStoreSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mock => write!(f, "memory"),
            Self::File { directory } => write!(f, "file:{}", directory.display()),
            // Never print credentials.
            Self::Live { .. } => write!(f, "postgres"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source() {
        assert_eq!(CursorStoreSource::parse("memory"), CursorStoreSource::Mock);
        assert_eq!(
            CursorStoreSource::parse("postgres://user:pw@localhost/sink"),
            CursorStoreSource::live("postgres://user:pw@localhost/sink")
        );
        assert_eq!(
            CursorStoreSource::parse("./state"),
            CursorStoreSource::file("./state")
        );
    }

    #[test]
    fn test_display_hides_database_url() {
        let source = CursorStoreSource::live("postgres://user:secret@db/sink");
        assert_eq!(source.to_string(), "postgres");
    }
}
