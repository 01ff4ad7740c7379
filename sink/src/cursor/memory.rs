use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{CursorKey, CursorStore};
use crate::errors::CursorStoreError;
use crate::types::Cursor;

/// In-memory cursor store for testing/development.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<HashMap<CursorKey, Cursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a cursor, as if a previous run had saved it.
    pub fn with_cursor(key: &CursorKey, cursor: Cursor) -> Self {
        let store = Self::new();
        store.cursors.write().unwrap().insert(key.clone(), cursor);
        store
    }

    /// Current cursor, without going through the async trait.
    pub fn get(&self, key: &CursorKey) -> Option<Cursor> {
        self.cursors.read().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, key: &CursorKey) -> Result<Option<Cursor>, CursorStoreError> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &CursorKey, cursor: &Cursor) -> Result<(), CursorStoreError> {
        self.cursors
            .write()
            .unwrap()
            .insert(key.clone(), cursor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    #[tokio::test]
    async fn test_memory_cursor_persistence() {
        let store = MemoryCursorStore::new();
        let key = CursorKey::new("stream", "map_events");

        assert!(store.load(&key).await.unwrap().is_none());

        let cursor = Cursor {
            position: Position::new(12345, "0xabc"),
            token: "cursor_abc".to_string(),
        };
        store.save(&key, &cursor).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap(), Some(cursor));

        let other = CursorKey::new("stream", "map_other");
        assert!(store.load(&other).await.unwrap().is_none());
    }
}
