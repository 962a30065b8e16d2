//! SQLite-backed completion ledger.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use super::types::{Ledger, LedgerEntry, LedgerError, Outcome};
use crate::retry::ErrorKind;
use crate::segment::SegmentKey;

/// SQLite-backed ledger.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    resumable: bool,
}

impl SqliteLedger {
    /// Opens (or creates) the ledger file at `path`.
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        Self::check_integrity(&conn)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            resumable: true,
        })
    }

    /// Creates an in-memory ledger (useful for testing).
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            resumable: false,
        })
    }

    /// Opens the ledger, recovering from unreadable state.
    ///
    /// A corrupt file is moved aside as `<name>.corrupt-<timestamp>` and a
    /// fresh ledger is created in its place. If that fails too, the run
    /// continues on an in-memory ledger and is flagged non-resumable.
    pub fn open_or_recover(path: &Path) -> Result<Self, LedgerError> {
        let first = match Self::new(path) {
            Ok(ledger) => return Ok(ledger),
            Err(e) => e,
        };
        warn!(path = %path.display(), error = %first, "Ledger unreadable, starting fresh");

        if path.exists() {
            let aside = corrupt_path(path);
            match std::fs::rename(path, &aside) {
                Ok(()) => {
                    info!(moved_to = %aside.display(), "Moved corrupt ledger aside");
                    match Self::new(path) {
                        Ok(ledger) => return Ok(ledger),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Fresh ledger failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not move ledger aside");
                }
            }
        }

        warn!(
            path = %path.display(),
            "Falling back to in-memory ledger; this run is not resumable"
        );
        Self::in_memory()
    }

    /// On-disk location, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn check_integrity(conn: &Connection) -> Result<(), LedgerError> {
        let result: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if result != "ok" {
            return Err(LedgerError::CorruptRow {
                key: "*".to_string(),
                reason: result,
            });
        }
        Ok(())
    }

    fn initialize_schema(conn: &Connection) -> Result<(), LedgerError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                outcome TEXT NOT NULL,
                error_kind TEXT,
                attempts INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_entries_key ON ledger_entries(key, id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<RawEntry> {
        Ok(RawEntry {
            key: row.get(0)?,
            outcome: row.get(1)?,
            error_kind: row.get(2)?,
            attempts: row.get(3)?,
            recorded_at: row.get(4)?,
        })
    }
}

/// Row as stored, before validation.
struct RawEntry {
    key: String,
    outcome: String,
    error_kind: Option<String>,
    attempts: u32,
    recorded_at: String,
}

impl RawEntry {
    fn into_entry(self) -> Result<LedgerEntry, LedgerError> {
        let outcome = Outcome::parse(&self.outcome).ok_or_else(|| LedgerError::CorruptRow {
            key: self.key.clone(),
            reason: format!("unknown outcome '{}'", self.outcome),
        })?;
        let error_kind = match self.error_kind.as_deref() {
            None => None,
            Some(s) => Some(ErrorKind::parse(s).ok_or_else(|| LedgerError::CorruptRow {
                key: self.key.clone(),
                reason: format!("unknown error kind '{}'", s),
            })?),
        };
        let recorded_at = DateTime::parse_from_rfc3339(&self.recorded_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| LedgerError::CorruptRow {
                key: self.key.clone(),
                reason: format!("bad timestamp: {}", e),
            })?;

        Ok(LedgerEntry {
            key: self.key,
            outcome,
            error_kind,
            attempts: self.attempts,
            recorded_at,
        })
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "ledger".to_string());
    path.with_file_name(format!(
        "{}.corrupt-{}",
        name,
        Utc::now().format("%Y%m%dT%H%M%S")
    ))
}

impl Ledger for SqliteLedger {
    fn is_complete(&self, key: &SegmentKey) -> bool {
        match self.latest(key) {
            Ok(Some(entry)) => entry.outcome == Outcome::Success,
            Ok(None) => false,
            Err(e) => {
                warn!(key = %key, error = %e, "Ledger read failed, treating as incomplete");
                false
            }
        }
    }

    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO ledger_entries (key, outcome, error_kind, attempts, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                entry.key,
                entry.outcome.as_str(),
                entry.error_kind.map(|k| k.as_str()),
                entry.attempts,
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn latest(&self, key: &SegmentKey) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                r#"
                SELECT key, outcome, error_kind, attempts, recorded_at
                FROM ledger_entries
                WHERE key = ?1
                ORDER BY id DESC
                LIMIT 1
                "#,
                params![key.to_string()],
                Self::row_to_entry,
            )
            .optional()?;
        raw.map(RawEntry::into_entry).transpose()
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT key, outcome, error_kind, attempts, recorded_at
            FROM ledger_entries
            WHERE id IN (SELECT MAX(id) FROM ledger_entries GROUP BY key)
            ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map([], Self::row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    fn is_resumable(&self) -> bool {
        self.resumable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Subset;
    use tempfile::TempDir;

    fn key(id: &str) -> SegmentKey {
        SegmentKey::new(Subset::BalancedTrain, id, 30.0, 40.0)
    }

    #[test]
    fn test_record_and_is_complete() {
        let ledger = SqliteLedger::in_memory().unwrap();
        assert!(!ledger.is_complete(&key("a")));

        ledger.record(&LedgerEntry::success(&key("a"), 1)).unwrap();
        assert!(ledger.is_complete(&key("a")));
        assert!(!ledger.is_complete(&key("b")));
    }

    #[test]
    fn test_latest_entry_wins() {
        let ledger = SqliteLedger::in_memory().unwrap();
        ledger
            .record(&LedgerEntry::terminal_failure(&key("a"), ErrorKind::NotFound, 1))
            .unwrap();
        assert!(!ledger.is_complete(&key("a")));

        ledger.record(&LedgerEntry::success(&key("a"), 2)).unwrap();
        assert!(ledger.is_complete(&key("a")));

        ledger
            .record(&LedgerEntry::terminal_failure(
                &key("a"),
                ErrorKind::RetriesExhausted,
                4,
            ))
            .unwrap();
        let latest = ledger.latest(&key("a")).unwrap().unwrap();
        assert_eq!(latest.outcome, Outcome::TerminalFailure);
        assert_eq!(latest.error_kind, Some(ErrorKind::RetriesExhausted));
        assert_eq!(latest.attempts, 4);
        assert!(!ledger.is_complete(&key("a")));

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_entries_one_per_key() {
        let ledger = SqliteLedger::in_memory().unwrap();
        ledger.record(&LedgerEntry::success(&key("a"), 1)).unwrap();
        ledger.record(&LedgerEntry::success(&key("b"), 1)).unwrap();
        ledger.record(&LedgerEntry::success(&key("a"), 1)).unwrap();

        let keys: Vec<String> = ledger.entries().unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&key("a").to_string()));
        assert!(keys.contains(&key("b").to_string()));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger/shard.csv.sqlite");
        {
            let ledger = SqliteLedger::new(&path).unwrap();
            ledger.record(&LedgerEntry::success(&key("a"), 1)).unwrap();
            assert!(ledger.is_resumable());
        }
        let ledger = SqliteLedger::open_or_recover(&path).unwrap();
        assert!(ledger.is_complete(&key("a")));
    }

    #[test]
    fn test_recovers_from_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shard.sqlite");
        std::fs::write(&path, "not a sqlite database\n".repeat(256)).unwrap();

        let ledger = SqliteLedger::open_or_recover(&path).unwrap();
        assert!(ledger.is_resumable());
        assert!(ledger.entries().unwrap().is_empty());
        ledger.record(&LedgerEntry::success(&key("a"), 1)).unwrap();

        let moved_aside = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(moved_aside);
    }

    #[test]
    fn test_falls_back_to_memory_when_dir_unusable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let ledger = SqliteLedger::open_or_recover(&blocker.join("shard.sqlite")).unwrap();
        assert!(!ledger.is_resumable());
        assert!(ledger.path().is_none());
        ledger.record(&LedgerEntry::success(&key("a"), 1)).unwrap();
        assert!(ledger.is_complete(&key("a")));
    }
}
