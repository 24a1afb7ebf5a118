use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{DashboardError, Result};
use crate::models::HistoryEntry;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

/// Per-user convenience cache: audit history, edit flags, audit quotas.
/// Not a source of truth; writes are last-write-wins.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

fn history_key(user_id: &str) -> String {
    format!("audit_history:{user_id}")
}

fn edited_key(user_id: &str) -> String {
    format!("prompts_edited:{user_id}")
}

fn audit_count_key(user_id: &str, day: NaiveDate) -> String {
    format!("audit_count:{}:{}", user_id, day.format("%Y-%m-%d"))
}

impl LocalStore {
    /// Open the store, creating the file and table if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.connection()?;
        Ok(store)
    }

    /// Get database connection
    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute(SCHEMA, [])?;
        Ok(conn)
    }

    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection()?;
        let value = conn
            .query_row("SELECT value FROM kv_store WHERE key = ?", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Stored JSON that no longer parses is treated as absent.
    fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, "Ignoring malformed cached value: {}", e);
                Ok(None)
            }
        }
    }

    fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.put_raw(key, &serde_json::to_string(value)?)
    }

    /// Audit history, newest first
    pub fn load_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self.load_json(&history_key(user_id))?.unwrap_or_default())
    }

    /// Put an entry in front, replacing any entry for the same URL, and keep at most `cap`
    pub fn push_history(&self, user_id: &str, entry: HistoryEntry, cap: usize) -> Result<Vec<HistoryEntry>> {
        let mut history = self.load_history(user_id)?;
        history.retain(|h| h.url != entry.url);
        history.insert(0, entry);
        history.truncate(cap);
        self.save_json(&history_key(user_id), &history)?;
        Ok(history)
    }

    pub fn delete_history(&self, user_id: &str, index: usize) -> Result<Vec<HistoryEntry>> {
        let mut history = self.load_history(user_id)?;
        if index >= history.len() {
            return Err(DashboardError::NotFound(format!("history entry {index}")));
        }
        history.remove(index);
        self.save_json(&history_key(user_id), &history)?;
        Ok(history)
    }

    /// Whether the user already used their prompt edit
    pub fn prompts_edited(&self, user_id: &str) -> Result<bool> {
        Ok(self.load_json(&edited_key(user_id))?.unwrap_or(false))
    }

    pub fn set_prompts_edited(&self, user_id: &str, edited: bool) -> Result<()> {
        self.save_json(&edited_key(user_id), &edited)
    }

    /// Audits run by the user on `day`
    pub fn audit_count(&self, user_id: &str, day: NaiveDate) -> Result<u32> {
        Ok(self.load_json(&audit_count_key(user_id, day))?.unwrap_or(0))
    }

    pub fn increment_audit_count(&self, user_id: &str, day: NaiveDate) -> Result<u32> {
        let count = self.audit_count(user_id, day)? + 1;
        self.save_json(&audit_count_key(user_id, day), &count)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("cache.db")).unwrap();
        (dir, store)
    }

    fn entry(n: usize) -> HistoryEntry {
        HistoryEntry {
            url: format!("https://site{n}.nl"),
            domain: format!("site{n}.nl"),
            score: n as u32,
            mentioned: n % 2 == 0,
            company_name: format!("Site {n}"),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
            data: json!({ "success": true }),
        }
    }

    #[test]
    fn history_is_capped_newest_first() {
        let (_dir, store) = store();
        for n in 1..=21 {
            store.push_history("u1", entry(n), 20).unwrap();
        }

        let history = store.load_history("u1").unwrap();
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].url, "https://site21.nl");
        assert_eq!(history[19].url, "https://site2.nl");
        assert!(history.iter().all(|h| h.url != "https://site1.nl"));
    }

    #[test]
    fn same_url_replaces_previous_entry() {
        let (_dir, store) = store();
        store.push_history("u1", entry(1), 20).unwrap();
        store.push_history("u1", entry(2), 20).unwrap();
        let mut again = entry(1);
        again.score = 99;
        let history = store.push_history("u1", again, 20).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].score, 99);
        assert_eq!(history[1].url, "https://site2.nl");
    }

    #[test]
    fn delete_history_by_index() {
        let (_dir, store) = store();
        store.push_history("u1", entry(1), 20).unwrap();
        store.push_history("u1", entry(2), 20).unwrap();

        let history = store.delete_history("u1", 0).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].url, "https://site1.nl");
        assert!(matches!(store.delete_history("u1", 5), Err(DashboardError::NotFound(_))));
    }

    #[test]
    fn malformed_cache_is_ignored() {
        let (_dir, store) = store();
        store.put_raw(&history_key("u1"), "{not json").unwrap();
        assert!(store.load_history("u1").unwrap().is_empty());

        // A fresh write replaces the corrupt value.
        store.push_history("u1", entry(3), 20).unwrap();
        assert_eq!(store.load_history("u1").unwrap().len(), 1);
    }

    #[test]
    fn flags_and_counts_are_per_user() {
        let (_dir, store) = store();
        assert!(!store.prompts_edited("u1").unwrap());
        store.set_prompts_edited("u1", true).unwrap();
        assert!(store.prompts_edited("u1").unwrap());
        assert!(!store.prompts_edited("u2").unwrap());

        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_eq!(store.increment_audit_count("u1", today).unwrap(), 1);
        assert_eq!(store.increment_audit_count("u1", today).unwrap(), 2);
        assert_eq!(store.audit_count("u1", tomorrow).unwrap(), 0);
        assert_eq!(store.audit_count("u2", today).unwrap(), 0);
    }
}
