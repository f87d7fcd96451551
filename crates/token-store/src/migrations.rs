//! Forward-only schema migrations with an applied-index ledger
//!
//! `MIGRATIONS[i]` is applied at most once per database file. The ledger
//! check, the schema statement and the ledger insert for one index run inside
//! a single IMMEDIATE transaction, so a crash between them leaves neither
//! behind. The applied set is therefore always the contiguous prefix `[0, k)`.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use crate::error::{Error, Result};

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS migrations (idx INTEGER PRIMARY KEY);";

/// Ordered schema statements. Append only; never edit or reorder an entry
/// that has shipped.
pub(crate) const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tokens (
        id TEXT PRIMARY KEY,
        token TEXT NOT NULL,
        expiry TEXT
    );
    "#,
    "ALTER TABLE tokens ADD COLUMN refresh_token TEXT;",
];

/// Create the ledger if needed and apply every pending migration in index
/// order. Returns how many migrations this call applied.
pub(crate) fn apply_migrations(conn: &mut Connection) -> Result<usize> {
    conn.execute_batch(CREATE_LEDGER)
        .map_err(|e| Error::Storage(format!("failed to create migrations table: {e}")))?;

    let newest: Option<i64> = conn
        .query_row("SELECT MAX(idx) FROM migrations", [], |row| row.get(0))
        .map_err(|e| Error::Storage(format!("could not read migrations ledger: {e}")))?;
    if let Some(newest) = newest {
        if newest >= MIGRATIONS.len() as i64 {
            return Err(Error::Storage(format!(
                "database has migration {newest} applied but this build knows only {} (written by a newer version?)",
                MIGRATIONS.len()
            )));
        }
    }

    let mut applied = 0;
    for (idx, statement) in MIGRATIONS.iter().enumerate() {
        let idx = idx as i64;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Storage(format!("could not begin migration {idx}: {e}")))?;

        let present = tx
            .query_row(
                "SELECT idx FROM migrations WHERE idx = ?1",
                params![idx],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("could not read ledger for migration {idx}: {e}")))?;
        if present.is_some() {
            debug!(idx, "migration already applied");
            continue;
        }

        tx.execute_batch(statement)
            .map_err(|e| Error::Storage(format!("migration {idx} failed: {e}")))?;
        tx.execute("INSERT INTO migrations (idx) VALUES (?1)", params![idx])
            .map_err(|e| Error::Storage(format!("could not record migration {idx}: {e}")))?;
        tx.commit()
            .map_err(|e| Error::Storage(format!("could not commit migration {idx}: {e}")))?;

        info!(idx, "applied schema migration");
        applied += 1;
    }

    Ok(applied)
}
