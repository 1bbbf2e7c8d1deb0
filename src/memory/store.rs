//! 步骤历史存储
//!
//! 只追加：每轮一行，plan / result / reflection 以 JSON 文本保存，score / description / outcome 冗余一份便于直接查询。
//! run_id 区分同一数据库里的多次运行。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::agent::Step;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// 步骤历史存储
pub trait StepStore: Send + Sync {
    fn add_step(&self, step: &Step) -> Result<(), StoreError>;

    /// 最近 limit 条，最新在前
    fn get_history(&self, limit: usize) -> Result<Vec<Step>, StoreError>;
}

/// 进程内存储（测试与 --no-persist）
#[derive(Debug, Default)]
pub struct InMemoryStepStore {
    steps: Mutex<Vec<Step>>,
}

impl InMemoryStepStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StepStore for InMemoryStepStore {
    fn add_step(&self, step: &Step) -> Result<(), StoreError> {
        self.steps
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(step.clone());
        Ok(())
    }

    fn get_history(&self, limit: usize) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(steps.iter().rev().take(limit).cloned().collect())
    }
}

/// SQLite 存储（默认文件 `<repo>/.trainwreck.db`）
#[derive(Debug)]
pub struct SqliteStepStore {
    conn: Mutex<Connection>,
    run_id: String,
    db_path: PathBuf,
}

impl SqliteStepStore {
    pub fn open(path: impl AsRef<Path>, run_id: impl Into<String>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS steps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                iteration INTEGER NOT NULL,
                plan TEXT NOT NULL,
                result TEXT NOT NULL,
                reflection TEXT NOT NULL,
                score REAL NOT NULL,
                description TEXT NOT NULL,
                outcome TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_steps_run ON steps(run_id);",
        )?;
        tracing::debug!(path = %db_path.display(), "step store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            run_id: run_id.into(),
            db_path,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// 某次运行的全部步骤，按迭代顺序
    pub fn run_history(&self, run_id: &str) -> Result<Vec<Step>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT iteration, plan, result, reflection, score, description, outcome, timestamp
             FROM steps WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![run_id], read_row)?;
        collect_steps(rows)
    }
}

type RawRow = (i64, String, String, String, f64, String, String, DateTime<Utc>);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn collect_steps(
    rows: impl Iterator<Item = rusqlite::Result<RawRow>>,
) -> Result<Vec<Step>, StoreError> {
    let mut steps = Vec::new();
    for row in rows {
        let (iteration, plan, result, reflection, score, description, outcome, timestamp) = row?;
        steps.push(Step {
            iteration: iteration as usize,
            plan: serde_json::from_str(&plan)?,
            result: serde_json::from_str(&result)?,
            reflection: serde_json::from_str(&reflection)?,
            score,
            description,
            outcome,
            timestamp,
        });
    }
    Ok(steps)
}

impl StepStore for SqliteStepStore {
    fn add_step(&self, step: &Step) -> Result<(), StoreError> {
        let plan = serde_json::to_string(&step.plan)?;
        let result = serde_json::to_string(&step.result)?;
        let reflection = serde_json::to_string(&step.reflection)?;

        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO steps (run_id, iteration, plan, result, reflection, score, description, outcome, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.run_id,
                step.iteration as i64,
                plan,
                result,
                reflection,
                step.score,
                step.description,
                step.outcome,
                step.timestamp,
            ],
        )?;
        Ok(())
    }

    fn get_history(&self, limit: usize) -> Result<Vec<Step>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT iteration, plan, result, reflection, score, description, outcome, timestamp
             FROM steps ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], read_row)?;
        collect_steps(rows)
    }
}
