//! SQLite-backed `QueryExecutor` for a Places-style history database.
//!
//! Queries run on the `tokio-rusqlite` connection thread so the async runtime is
//! never blocked by SQLite I/O.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::OpenFlags;
use tokio_rusqlite::Connection;

use super::{HistoryError, QueryExecutor, SqlValue};

pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Open (or create) a history database at `path`.
    pub async fn open(path: &Path) -> Result<Self, HistoryError> {
        let conn = Connection::open(path).await?;
        Ok(Self { conn })
    }

    /// Open an existing history database in read-only mode, for running
    /// alongside the process that owns writes.
    pub async fn open_readonly(path: &Path) -> Result<Self, HistoryError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .await?;
        Ok(Self { conn })
    }

    pub async fn open_in_memory() -> Result<Self, HistoryError> {
        let conn = Connection::open_in_memory().await?;
        Ok(Self { conn })
    }

    /// Borrow the underlying async connection for ad-hoc statements.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> Result<Vec<Vec<SqlValue>>, HistoryError> {
        let sql = sql.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let column_count = stmt.column_count();
                let mapped = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    (0..column_count)
                        .map(|i| row.get::<_, SqlValue>(i))
                        .collect::<Result<Vec<_>, _>>()
                })?;

                let mut rows = Vec::new();
                for row in mapped {
                    rows.push(row?);
                }
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;

    #[tokio::test]
    async fn test_execute_returns_typed_rows() {
        let history = test_history().await;
        add_place(&history, 1, "abc").await;

        let rows = history
            .execute(
                "SELECT id, guid, NULL FROM moz_places WHERE guid = ?1",
                vec![SqlValue::Text("abc".into())],
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], SqlValue::Integer(1));
        assert_eq!(rows[0][1], SqlValue::Text("abc".into()));
        assert_eq!(rows[0][2], SqlValue::Null);
    }

    #[tokio::test]
    async fn test_execute_bad_sql_is_error() {
        let history = test_history().await;
        let result = history.execute("SELECT * FROM no_such_table", vec![]).await;
        assert!(result.is_err());
    }
}
