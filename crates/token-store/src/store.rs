//! SQLite-backed credential store
//!
//! One connection is opened per process and shared behind a blocking Mutex.
//! Every statement runs on tokio's blocking pool, so a slow disk or a
//! contended write lock never stalls the async workers serving other
//! requests. SQLite's busy handler waits up to `BUSY_TIMEOUT` for another
//! process holding the write lock.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::migrations;

const BUSY_TIMEOUT: Duration = Duration::from_millis(2000);

/// A persisted access credential.
///
/// `expiry` is an RFC 3339 timestamp written by the callback handler; the
/// store treats it as opaque text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: String,
    pub access_token: String,
    pub expiry: String,
    pub refresh_token: Option<String>,
}

/// Thread-safe handle to the credential database.
pub struct TokenStore {
    conn: Arc<Mutex<Connection>>,
}

impl TokenStore {
    /// Open (or create) the database at `path` and bring its schema up to
    /// date. `":memory:"` opens a private in-memory database.
    ///
    /// Any migration failure aborts construction; the caller never receives
    /// a store with a partially applied schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut conn = Connection::open(path).map_err(|e| {
            Error::Storage(format!(
                "could not open SQLite database {}: {e}",
                path.display()
            ))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| Error::Storage(format!("could not set busy timeout: {e}")))?;

        let applied = migrations::apply_migrations(&mut conn)?;
        info!(path = %path.display(), applied, "token store ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, label: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let task = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::Storage(format!("{label}: connection lock poisoned")))?;
            f(&conn)
        });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                error!(label, "storage task panicked");
                Err(Error::Storage(format!("{label}: task panicked")))
            }
            Err(_) => {
                warn!(label, "storage task cancelled");
                Err(Error::Storage(format!("{label}: task cancelled")))
            }
        }
    }

    /// Fetch a copy of the credential stored under `id`.
    pub async fn get(&self, id: &str) -> Result<Credential> {
        let id = id.to_owned();
        self.run("get", move |conn| {
            conn.query_row(
                "SELECT id, token, expiry, refresh_token FROM tokens WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Credential {
                        id: row.get(0)?,
                        access_token: row.get(1)?,
                        expiry: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        refresh_token: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Storage(format!("could not retrieve credential {id}: {e}")))?
            .ok_or(Error::NotFound(id))
        })
        .await
    }

    /// Insert a new credential. Fails with `AlreadyExists` if the id is taken.
    pub async fn insert(&self, credential: &Credential) -> Result<()> {
        let credential = credential.clone();
        self.run("insert", move |conn| {
            conn.execute(
                "INSERT INTO tokens (id, token, expiry, refresh_token) VALUES (?1, ?2, ?3, ?4)",
                params![
                    credential.id,
                    credential.access_token,
                    credential.expiry,
                    credential.refresh_token
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref f, _)
                    if f.code == ErrorCode::ConstraintViolation =>
                {
                    Error::AlreadyExists(credential.id.clone())
                }
                e => Error::Storage(format!("could not insert credential {}: {e}", credential.id)),
            })?;
            debug!(id = %credential.id, "inserted credential");
            Ok(())
        })
        .await
    }

    /// Replace token material for an existing credential.
    pub async fn update(&self, credential: &Credential) -> Result<()> {
        let credential = credential.clone();
        self.run("update", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tokens SET token = ?1, expiry = ?2, refresh_token = ?3 WHERE id = ?4",
                    params![
                        credential.access_token,
                        credential.expiry,
                        credential.refresh_token,
                        credential.id
                    ],
                )
                .map_err(|e| {
                    Error::Storage(format!("could not update credential {}: {e}", credential.id))
                })?;
            if changed == 0 {
                return Err(Error::NotFound(credential.id));
            }
            debug!(id = %credential.id, "updated credential");
            Ok(())
        })
        .await
    }

    /// Remove a credential. Deleting an unknown id succeeds.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_owned();
        self.run("delete", move |conn| {
            let removed = conn
                .execute("DELETE FROM tokens WHERE id = ?1", params![id])
                .map_err(|e| Error::Storage(format!("could not delete credential {id}: {e}")))?;
            debug!(id = %id, removed, "deleted credential");
            Ok(())
        })
        .await
    }

    /// Number of stored credentials.
    pub async fn len(&self) -> Result<usize> {
        self.run("len", |conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM tokens", [], |row| row.get(0))
                .map_err(|e| Error::Storage(format!("could not count credentials: {e}")))?;
            Ok(count as usize)
        })
        .await
    }

    /// Whether the store holds no credentials.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Flush and release the database handle.
    ///
    /// Fails if a storage task abandoned by a cancelled caller still holds
    /// the connection.
    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| Error::Storage("connection still in use by a storage task".into()))?
            .into_inner()
            .map_err(|_| Error::Storage("connection lock poisoned".into()))?;
        conn.close()
            .map_err(|(_, e)| Error::Storage(format!("could not close database: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_credential(id: &str) -> Credential {
        Credential {
            id: id.to_string(),
            access_token: format!("at_{id}"),
            expiry: "2026-10-16T12:00:00+00:00".into(),
            refresh_token: Some(format!("rt_{id}")),
        }
    }

    fn ledger_counts(path: &Path) -> Vec<(i64, i64)> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare("SELECT idx, COUNT(*) FROM migrations GROUP BY idx ORDER BY idx")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = TokenStore::open(":memory:").unwrap();
        let err = store.get("someid").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref id) if id == "someid"));
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let store = TokenStore::open(":memory:").unwrap();
        let credential = test_credential("someid");
        store.insert(&credential).await.unwrap();

        let fetched = store.get("someid").await.unwrap();
        assert_eq!(fetched, credential);
    }

    #[tokio::test]
    async fn missing_refresh_token_roundtrips_as_none() {
        let store = TokenStore::open(":memory:").unwrap();
        let credential = Credential {
            refresh_token: None,
            ..test_credential("no-refresh")
        };
        store.insert(&credential).await.unwrap();
        assert_eq!(store.get("no-refresh").await.unwrap(), credential);
    }

    #[tokio::test]
    async fn duplicate_insert_is_already_exists() {
        let store = TokenStore::open(":memory:").unwrap();
        store.insert(&test_credential("dup")).await.unwrap();

        let err = store.insert(&test_credential("dup")).await.unwrap_err();
        assert!(
            matches!(err, Error::AlreadyExists(ref id) if id == "dup"),
            "got: {err:?}"
        );
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_replaces_token_material() {
        let store = TokenStore::open(":memory:").unwrap();
        store.insert(&test_credential("acct")).await.unwrap();

        let updated = Credential {
            id: "acct".into(),
            access_token: "at_new".into(),
            expiry: "2027-01-01T00:00:00+00:00".into(),
            refresh_token: Some("rt_new".into()),
        };
        store.update(&updated).await.unwrap();
        assert_eq!(store.get("acct").await.unwrap(), updated);
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let store = TokenStore::open(":memory:").unwrap();
        let err = store.update(&test_credential("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = TokenStore::open(":memory:").unwrap();
        store.insert(&test_credential("gone")).await.unwrap();

        store.delete("gone").await.unwrap();
        assert!(matches!(
            store.get("gone").await.unwrap_err(),
            Error::NotFound(_)
        ));

        store.delete("gone").await.unwrap();
        store.delete("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn reopen_keeps_data_and_applies_migrations_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.db");

        let store = TokenStore::open(&path).unwrap();
        store.insert(&test_credential("persisted")).await.unwrap();
        store.close().unwrap();

        let store = TokenStore::open(&path).unwrap();
        assert_eq!(
            store.get("persisted").await.unwrap(),
            test_credential("persisted")
        );
        store.close().unwrap();

        let counts = ledger_counts(&path);
        assert_eq!(counts.len(), migrations::MIGRATIONS.len());
        for (idx, (applied_idx, count)) in counts.into_iter().enumerate() {
            assert_eq!(applied_idx, idx as i64);
            assert_eq!(count, 1, "migration {idx} recorded more than once");
        }
    }

    #[tokio::test]
    async fn open_in_missing_directory_fails() {
        let result = TokenStore::open("/nonexistent/dir/tokens.db");
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn locked_database_waits_without_stalling_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.db");
        let store = Arc::new(TokenStore::open(&path).unwrap());

        // Another process holds the write lock for a while
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn({
            let path = path.clone();
            move || {
                let mut conn = Connection::open(&path).unwrap();
                let tx = conn
                    .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                    .unwrap();
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(300));
                tx.commit().unwrap();
            }
        });
        locked_rx.recv().unwrap();

        let insert = tokio::spawn({
            let store = store.clone();
            async move { store.insert(&test_credential("waiting")).await }
        });

        // The single runtime thread stays free while the insert waits
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!insert.is_finished(), "insert should still be waiting for the lock");

        insert.await.unwrap().unwrap();
        holder.join().unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::open(dir.path().join("tokens.db")).unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert(&test_credential(&format!("acct-{i}")))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.len().await.unwrap(), 10);
    }
}
