use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{CursorKey, CursorStore};
use crate::errors::CursorStoreError;
use crate::types::Cursor;

#[derive(Debug, Serialize, Deserialize)]
struct CursorFile {
    stream: String,
    module: String,
    cursor: Cursor,
}

/// Stores each cursor as a JSON file under a directory.
///
/// Saves write a temporary file, fsync it and rename it over the previous
/// one.
#[derive(Debug)]
pub struct FileCursorStore {
    directory: PathBuf,
}

impl FileCursorStore {
    pub async fn new(directory: impl Into<PathBuf>) -> Result<Self, CursorStoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        Ok(Self { directory })
    }

    fn path_for(&self, key: &CursorKey) -> PathBuf {
        self.directory.join(format!(
            "{}__{}.cursor.json",
            escape(&key.stream),
            escape(&key.module)
        ))
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9.-]`. `_` is escaped too, so
/// the `__` separator never appears inside a component.
fn escape(component: &str) -> String {
    let mut escaped = String::with_capacity(component.len());
    for byte in component.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }
    escaped
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, key: &CursorKey) -> Result<Option<Cursor>, CursorStoreError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let file: CursorFile = serde_json::from_slice(&bytes)?;
        Ok(Some(file.cursor))
    }

    async fn save(&self, key: &CursorKey, cursor: &Cursor) -> Result<(), CursorStoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(&CursorFile {
            stream: key.stream.clone(),
            module: key.module.clone(),
            cursor: cursor.clone(),
        })?;

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), block = cursor.position.number, "Cursor written");
        Ok(())
    }
}
