//! 事件持久化 (SQLite)
//!
//! 只追加, 不修改. 表结构:
//! logs(id, camera_id, event_type, person_id, timestamp, duration, total_people)

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, SentinelError};
use crate::presence::PresenceEvent;

/// 数据库中的时间格式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 事件存储
///
/// 运行时只有 persister 线程会调用 `append`; `close` 在该线程退出后调用.
pub trait EventStore: Send + Sync {
    fn append(&self, event: &PresenceEvent) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// 已存储的一条记录
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub camera_id: u32,
    pub event_type: String,
    pub person_id: u32,
    pub timestamp: String,
    pub duration: Option<f64>,
    pub total_people: i64,
}

/// SQLite 事件存储
pub struct SqliteEventStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteEventStore {
    /// 打开 (或创建) 数据库文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // WAL: 预览端可以在写入的同时读取
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=2000;",
        )?;

        let store = Self {
            conn: Mutex::new(Some(conn)),
        };
        store.init_schema()?;
        debug!("事件数据库已打开: {}", path.display());
        Ok(store)
    }

    /// 内存数据库 (测试用)
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Some(Connection::open_in_memory()?)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    camera_id INTEGER,
                    event_type TEXT,
                    person_id INTEGER,
                    timestamp TEXT,
                    duration REAL,
                    total_people INTEGER
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_logs_camera ON logs(camera_id)",
                [],
            )?;
            Ok(())
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(SentinelError::Store("event store is closed".to_string())),
        }
    }

    /// 最新的若干条记录 (新的在前)
    pub fn recent(&self, limit: usize) -> Result<Vec<EventRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, camera_id, event_type, person_id, timestamp, duration, total_people
                 FROM logs ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(EventRecord {
                    id: row.get(0)?,
                    camera_id: row.get(1)?,
                    event_type: row.get(2)?,
                    person_id: row.get(3)?,
                    timestamp: row.get(4)?,
                    duration: row.get(5)?,
                    total_people: row.get(6)?,
                })
            })?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
    }

    /// 记录总数
    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}

impl EventStore for SqliteEventStore {
    fn append(&self, event: &PresenceEvent) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO logs (camera_id, event_type, person_id, timestamp, duration, total_people)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.camera_id,
                    event.event_type.as_str(),
                    event.person_track_id,
                    event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    event.duration,
                    event.total_people_estimate as i64,
                ],
            )?;
            Ok(())
        })
    }

    fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => conn.close().map_err(|(_, e)| {
                warn!("关闭事件数据库失败: {}", e);
                SentinelError::Sqlite(e)
            }),
            // 重复关闭无副作用
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn sample_time() -> chrono::DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap()
    }

    #[test]
    fn test_append_and_recent() {
        let store = SqliteEventStore::in_memory().unwrap();
        store
            .append(&PresenceEvent::entered(1, 7, sample_time(), 1))
            .unwrap();
        store
            .append(&PresenceEvent::left(1, 7, sample_time(), 4.5, 0))
            .unwrap();

        let records = store.recent(10).unwrap();
        assert_eq!(records.len(), 2);
        // 新的在前
        assert_eq!(records[0].event_type, "LEFT");
        assert_eq!(records[0].duration, Some(4.5));
        assert_eq!(records[0].total_people, 0);
        assert_eq!(records[1].event_type, "ENTERED");
        assert_eq!(records[1].duration, None);
        assert_eq!(records[1].person_id, 7);
        assert_eq!(records[1].timestamp, "2024-05-01 12:30:45");
    }

    #[test]
    fn test_recent_respects_limit() {
        let store = SqliteEventStore::in_memory().unwrap();
        for id in 0..5 {
            store
                .append(&PresenceEvent::entered(0, id, sample_time(), id as usize + 1))
                .unwrap();
        }
        let records = store.recent(2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].person_id, 4);
        assert_eq!(store.count().unwrap(), 5);
    }

    #[test]
    fn test_append_after_close_fails() {
        let store = SqliteEventStore::in_memory().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(store.close().is_ok());

        let err = store
            .append(&PresenceEvent::entered(0, 1, sample_time(), 1))
            .unwrap_err();
        assert!(matches!(err, SentinelError::Store(_)));
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("logs.db");
        {
            let store = SqliteEventStore::open(&path).unwrap();
            store
                .append(&PresenceEvent::entered(2, 3, sample_time(), 1))
                .unwrap();
            store.close().unwrap();
        }
        let reopened = SqliteEventStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(reopened.recent(1).unwrap()[0].camera_id, 2);
    }
}
