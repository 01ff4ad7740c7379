use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Postgres};

use super::{CursorKey, CursorStore};
use crate::errors::CursorStoreError;
use crate::types::{Cursor, Position};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS sink_cursors (\
     stream TEXT NOT NULL, \
     module TEXT NOT NULL, \
     cursor TEXT NOT NULL, \
     block_number BIGINT NOT NULL, \
     block_id TEXT NOT NULL, \
     is_final BOOLEAN NOT NULL DEFAULT FALSE, \
     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(), \
     PRIMARY KEY (stream, module))";

/// PostgreSQL cursor store, one row per cursor key.
pub struct PostgresCursorStore {
    connection: sqlx::Pool<Postgres>,
}

impl PostgresCursorStore {
    /// Connect and make sure the `sink_cursors` table exists.
    pub async fn new(database_url: &str) -> Result<Self, CursorStoreError> {
        let connection = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&connection).await?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl CursorStore for PostgresCursorStore {
    async fn load(&self, key: &CursorKey) -> Result<Option<Cursor>, CursorStoreError> {
        let row: Option<(String, i64, String, bool)> = sqlx::query_as(
            "SELECT cursor, block_number, block_id, is_final FROM sink_cursors \
             WHERE stream = $1 AND module = $2",
        )
        .bind(&key.stream)
        .bind(&key.module)
        .fetch_optional(&self.connection)
        .await?;

        Ok(row.map(|(token, block_number, block_id, is_final)| Cursor {
            position: Position::new(block_number as u64, block_id).finalized(is_final),
            token,
        }))
    }

    async fn save(&self, key: &CursorKey, cursor: &Cursor) -> Result<(), CursorStoreError> {
        sqlx::query(
            "INSERT INTO sink_cursors (stream, module, cursor, block_number, block_id, is_final) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (stream, module) DO UPDATE SET \
             cursor = $3, block_number = $4, block_id = $5, is_final = $6, updated_at = NOW()",
        )
        .bind(&key.stream)
        .bind(&key.module)
        .bind(&cursor.token)
        .bind(cursor.position.number as i64)
        .bind(&cursor.position.id)
        .bind(cursor.position.is_final)
        .execute(&self.connection)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a PostgreSQL instance in DATABASE_URL"]
    async fn test_postgres_cursor_upsert() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let store = PostgresCursorStore::new(&url).await.unwrap();
        let key = CursorKey::new("test-stream", "test-module");

        let first = Cursor {
            position: Position::new(100, "block_100"),
            token: "cursor_100".to_string(),
        };
        let second = Cursor {
            position: Position::new(101, "block_101").finalized(true),
            token: "cursor_101".to_string(),
        };

        store.save(&key, &first).await.unwrap();
        store.save(&key, &second).await.unwrap();

        assert_eq!(store.load(&key).await.unwrap(), Some(second));
    }
}
