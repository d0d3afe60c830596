//! SQLite 记忆存储
//!
//! 计数更新使用 `INSERT ... ON CONFLICT DO UPDATE SET n = n + 1`，
//! 并发会话不会丢失增量。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::MemoryError;
use crate::models::transition::pick_confident;
use crate::models::{
    ConfidenceThresholds, ContinuePattern, MemoryStats, PageState, SelectorPattern, StateId,
    StepAction, Transition,
};
use crate::services::memory::TransitionMemory;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS page_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_domain TEXT NOT NULL,
    signature TEXT NOT NULL,
    model_context TEXT NOT NULL,
    step_index INTEGER NOT NULL DEFAULT 0,
    is_terminal INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (site_domain, signature)
);
CREATE TABLE IF NOT EXISTS transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_state INTEGER NOT NULL REFERENCES page_states(id),
    to_state INTEGER NOT NULL REFERENCES page_states(id),
    action_type TEXT NOT NULL,
    action_key TEXT NOT NULL,
    action_json TEXT NOT NULL,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_used TEXT NOT NULL,
    UNIQUE (from_state, to_state, action_key)
);
CREATE INDEX IF NOT EXISTS idx_transitions_from ON transitions(from_state);
CREATE TABLE IF NOT EXISTS continue_patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_domain TEXT NOT NULL,
    pattern_key TEXT NOT NULL,
    pattern_json TEXT NOT NULL,
    seen_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE (site_domain, pattern_key)
);
";

/// SQLite 存储
///
/// rusqlite 是同步接口，每条语句都放到 `spawn_blocking` 中执行，
/// 不占用运行探索会话的异步工作线程。
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<PageState> {
    Ok(PageState {
        id: row.get(0)?,
        site_domain: row.get(1)?,
        signature: row.get(2)?,
        model_context: row.get(3)?,
        step_index: row.get(4)?,
        is_terminal: row.get(5)?,
    })
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MemoryError::InvalidRecord(format!("时间格式错误 {}: {}", raw, e)))
}

impl SqliteStore {
    /// 打开（或创建）数据库文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let db = Connection::open(path.as_ref())?;
        Self::init(db)
    }

    /// 内存数据库
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self, MemoryError> {
        db.busy_timeout(Duration::from_secs(5))?;
        db.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// 在阻塞线程池中持锁执行一段数据库操作
    async fn with_conn<T, F>(&self, work: F) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, MemoryError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| MemoryError::Poisoned)?;
            work(&conn)
        })
        .await
        .map_err(|e| MemoryError::TaskFailed(e.to_string()))?
    }
}

#[async_trait]
impl TransitionMemory for SqliteStore {
    async fn upsert_state(
        &self,
        site_domain: &str,
        signature: &str,
        model_context: &str,
        step_index: u32,
        is_terminal: bool,
    ) -> Result<PageState, MemoryError> {
        let now = Utc::now().to_rfc3339();
        let (site_domain, signature, model_context) = (
            site_domain.to_string(),
            signature.to_string(),
            model_context.to_string(),
        );
        self.with_conn(move |db| {
            let state = db.query_row(
                "INSERT INTO page_states
                    (site_domain, signature, model_context, step_index, is_terminal, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (site_domain, signature) DO UPDATE SET
                    model_context = excluded.model_context,
                    step_index = excluded.step_index,
                    is_terminal = MAX(page_states.is_terminal, excluded.is_terminal),
                    updated_at = excluded.updated_at
                 RETURNING id, site_domain, signature, model_context, step_index, is_terminal",
                rusqlite::params![site_domain, signature, model_context, step_index, is_terminal, now],
                row_to_state,
            )?;
            Ok(state)
        })
        .await
    }

    async fn get_state_by_signature(
        &self,
        site_domain: &str,
        signature: &str,
    ) -> Result<Option<PageState>, MemoryError> {
        let (site_domain, signature) = (site_domain.to_string(), signature.to_string());
        self.with_conn(move |db| {
            let state = db
                .query_row(
                    "SELECT id, site_domain, signature, model_context, step_index, is_terminal
                     FROM page_states WHERE site_domain = ?1 AND signature = ?2",
                    rusqlite::params![site_domain, signature],
                    row_to_state,
                )
                .optional()?;
            Ok(state)
        })
        .await
    }

    async fn record_transition(
        &self,
        from_state: StateId,
        to_state: StateId,
        action: &StepAction,
        success: bool,
    ) -> Result<(), MemoryError> {
        let action_json = serde_json::to_string(action)?;
        let action_type = action.action_type().as_str();
        let action_key = action.action_key();
        let (success_inc, failure_inc) = if success { (1u32, 0u32) } else { (0, 1) };
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO transitions
                    (from_state, to_state, action_type, action_key, action_json,
                     success_count, failure_count, last_used)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (from_state, to_state, action_key) DO UPDATE SET
                    success_count = transitions.success_count + excluded.success_count,
                    failure_count = transitions.failure_count + excluded.failure_count,
                    last_used = excluded.last_used",
                rusqlite::params![
                    from_state,
                    to_state,
                    action_type,
                    action_key,
                    action_json,
                    success_inc,
                    failure_inc,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_confident_transition(
        &self,
        from_state: StateId,
        thresholds: ConfidenceThresholds,
    ) -> Result<Option<Transition>, MemoryError> {
        let rows: Vec<(StateId, String, u32, u32, String)> = self
            .with_conn(move |db| {
                let mut stmt = db.prepare(
                    "SELECT to_state, action_json, success_count, failure_count, last_used
                     FROM transitions
                     WHERE from_state = ?1 AND success_count + failure_count >= ?2",
                )?;
                let mapped = stmt.query_map(
                    rusqlite::params![from_state, thresholds.min_seen_count],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )?;
                Ok(mapped.collect::<Result<_, _>>()?)
            })
            .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for (to_state, action_json, success_count, failure_count, last_used) in rows {
            candidates.push(Transition {
                from_state,
                to_state,
                action: serde_json::from_str(&action_json)?,
                success_count,
                failure_count,
                last_used: parse_time(&last_used)?,
            });
        }
        Ok(pick_confident(&candidates, thresholds).cloned())
    }

    async fn upsert_continue_pattern(
        &self,
        site_domain: &str,
        pattern: &SelectorPattern,
        success: bool,
    ) -> Result<(), MemoryError> {
        let pattern_json = serde_json::to_string(pattern)?;
        let pattern_key = pattern.structural_key();
        let site_domain = site_domain.to_string();
        self.with_conn(move |db| {
            db.execute(
                "INSERT INTO continue_patterns
                    (site_domain, pattern_key, pattern_json, seen_count, success_count)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT (site_domain, pattern_key) DO UPDATE SET
                    seen_count = continue_patterns.seen_count + 1,
                    success_count = continue_patterns.success_count + excluded.success_count",
                rusqlite::params![site_domain, pattern_key, pattern_json, u32::from(success)],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_best_continue_pattern(
        &self,
        site_domain: &str,
        thresholds: ConfidenceThresholds,
    ) -> Result<Option<ContinuePattern>, MemoryError> {
        let patterns = self.list_continue_patterns(site_domain).await?;
        Ok(patterns
            .into_iter()
            .find(|p| thresholds.accepts(p.success_count, p.seen_count)))
    }

    async fn list_continue_patterns(
        &self,
        site_domain: &str,
    ) -> Result<Vec<ContinuePattern>, MemoryError> {
        let site = site_domain.to_string();
        let rows: Vec<(String, u32, u32)> = self
            .with_conn(move |db| {
                let mut stmt = db.prepare(
                    "SELECT pattern_json, seen_count, success_count
                     FROM continue_patterns
                     WHERE site_domain = ?1 AND seen_count > 0
                     ORDER BY CAST(success_count AS REAL) / seen_count DESC, seen_count DESC",
                )?;
                let mapped = stmt.query_map(rusqlite::params![site], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
                Ok(mapped.collect::<Result<_, _>>()?)
            })
            .await?;

        rows.into_iter()
            .map(|(pattern_json, seen_count, success_count)| -> Result<_, MemoryError> {
                Ok(ContinuePattern {
                    site_domain: site_domain.to_string(),
                    pattern: serde_json::from_str(&pattern_json)?,
                    seen_count,
                    success_count,
                })
            })
            .collect()
    }

    async fn stats(&self, site_domain: Option<&str>) -> Result<MemoryStats, MemoryError> {
        let site_domain = site_domain.map(str::to_string);
        self.with_conn(move |db| {
            let count = |sql: &str| -> Result<usize, MemoryError> {
                let n: i64 = match &site_domain {
                    Some(site) => db.query_row(sql, rusqlite::params![site], |row| row.get(0))?,
                    None => db.query_row(sql, [], |row| row.get(0))?,
                };
                Ok(n as usize)
            };

            match &site_domain {
                Some(_) => Ok(MemoryStats {
                    states: count("SELECT COUNT(*) FROM page_states WHERE site_domain = ?1")?,
                    transitions: count(
                        "SELECT COUNT(*) FROM transitions t
                         JOIN page_states s ON s.id = t.from_state
                         WHERE s.site_domain = ?1",
                    )?,
                    continue_patterns: count(
                        "SELECT COUNT(*) FROM continue_patterns WHERE site_domain = ?1",
                    )?,
                }),
                None => Ok(MemoryStats {
                    states: count("SELECT COUNT(*) FROM page_states")?,
                    transitions: count("SELECT COUNT(*) FROM transitions")?,
                    continue_patterns: count("SELECT COUNT(*) FROM continue_patterns")?,
                }),
            }
        })
        .await
    }
}
