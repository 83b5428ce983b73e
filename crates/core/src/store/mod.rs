//! SQLite persistence for pipelines, steps, handoffs, approvals, and the
//! audit log.
//!
//! The connection lives behind an async mutex and is locked per call; no
//! caller holds it across an agent invocation or an approval wait. Where
//! the ordering contract requires a status change and its audit record to
//! become visible together, the store exposes a composite method that runs
//! both inside one transaction.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tokio::sync::Mutex;

use baton_protocol::{
    Approval, ApprovalStatus, AuditEvent, AuditKind, Handoff, HandoffSchema, Pipeline,
    PipelineStatus, Step, StepStatus,
};

/// Errors raised by the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{what} {id} not found")]
    RowNotFound { what: &'static str, id: i64 },

    #[error("corrupt metadata: {0}")]
    CorruptMetadata(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Step description used at pipeline creation.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub agent_name: String,
    pub model: Option<String>,
    pub remind_after_hours: Option<f64>,
}

/// Pipeline description used at creation.
#[derive(Debug, Clone)]
pub struct NewPipeline {
    pub title: String,
    pub template: String,
    pub prompt: String,
    pub working_dir: Option<String>,
    pub branch: Option<String>,
}

/// Handle to the SQLite database.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a private in-memory database; used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pipelines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                template TEXT NOT NULL,
                prompt TEXT NOT NULL,
                working_dir TEXT,
                branch TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS steps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pipeline_id INTEGER NOT NULL REFERENCES pipelines(id),
                order_index INTEGER NOT NULL,
                agent_name TEXT NOT NULL,
                status TEXT NOT NULL,
                model TEXT,
                error_message TEXT,
                remind_after_hours REAL,
                started_at INTEGER,
                finished_at INTEGER,
                UNIQUE (pipeline_id, order_index)
            );
            CREATE TABLE IF NOT EXISTS handoffs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                step_id INTEGER NOT NULL REFERENCES steps(id),
                content TEXT NOT NULL,
                metadata TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS approvals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                step_id INTEGER NOT NULL REFERENCES steps(id),
                status TEXT NOT NULL,
                comment TEXT,
                decided_by TEXT,
                created_at INTEGER NOT NULL,
                decided_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pipeline_id INTEGER NOT NULL REFERENCES pipelines(id),
                step_id INTEGER,
                event_type TEXT NOT NULL,
                payload TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pipelines_status ON pipelines(status);
            CREATE INDEX IF NOT EXISTS idx_pipelines_working_dir ON pipelines(working_dir);
            CREATE INDEX IF NOT EXISTS idx_steps_pipeline ON steps(pipeline_id, order_index);
            CREATE INDEX IF NOT EXISTS idx_handoffs_step ON handoffs(step_id);
            CREATE INDEX IF NOT EXISTS idx_approvals_step ON approvals(step_id);
            CREATE INDEX IF NOT EXISTS idx_audit_pipeline ON audit_events(pipeline_id, id);",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------

    /// Create a pipeline row plus one `pending` step row per entry.
    pub async fn create_pipeline(
        &self,
        pipeline: NewPipeline,
        steps: &[NewStep],
    ) -> StoreResult<Pipeline> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = now_ms();

        tx.execute(
            "INSERT INTO pipelines (title, template, prompt, working_dir, branch, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                pipeline.title,
                pipeline.template,
                pipeline.prompt,
                pipeline.working_dir,
                pipeline.branch,
                PipelineStatus::Pending.as_str(),
                now,
            ],
        )?;
        let pipeline_id = tx.last_insert_rowid();

        for (index, step) in steps.iter().enumerate() {
            tx.execute(
                "INSERT INTO steps (pipeline_id, order_index, agent_name, status, model, remind_after_hours)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    pipeline_id,
                    index as i64,
                    step.agent_name,
                    StepStatus::Pending.as_str(),
                    step.model,
                    step.remind_after_hours,
                ],
            )?;
        }

        let created = read_pipeline(&tx, pipeline_id)?;
        tx.commit()?;
        Ok(created)
    }

    pub async fn get_pipeline(&self, pipeline_id: i64) -> StoreResult<Pipeline> {
        let conn = self.conn.lock().await;
        read_pipeline(&conn, pipeline_id)
    }

    /// All pipelines, newest first.
    pub async fn list_pipelines(&self) -> StoreResult<Vec<Pipeline>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, title, template, prompt, working_dir, branch, status, created_at, updated_at
             FROM pipelines ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], pipeline_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Pipelines whose status still implies a live executor.
    pub async fn active_pipelines(&self) -> StoreResult<Vec<Pipeline>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, title, template, prompt, working_dir, branch, status, created_at, updated_at
             FROM pipelines WHERE status IN ('running', 'waiting_for_approval') ORDER BY id",
        )?;
        let rows = stmt.query_map([], pipeline_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Active pipelines bound to `working_dir`.
    pub async fn conflicts_for_working_dir(&self, working_dir: &str) -> StoreResult<Vec<Pipeline>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, title, template, prompt, working_dir, branch, status, created_at, updated_at
             FROM pipelines
             WHERE working_dir = ?1 AND status IN ('running', 'waiting_for_approval')
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![working_dir], pipeline_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub async fn set_pipeline_status(
        &self,
        pipeline_id: i64,
        status: PipelineStatus,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE pipelines SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_ms(), pipeline_id],
        )?;
        ensure_found(changed, "pipeline", pipeline_id)
    }

    /// Mark the pipeline done and log `pipeline_completed`, atomically.
    pub async fn complete_pipeline(&self, pipeline_id: i64) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE pipelines SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![PipelineStatus::Done.as_str(), now_ms(), pipeline_id],
        )?;
        ensure_found(changed, "pipeline", pipeline_id)?;
        insert_audit(&tx, pipeline_id, None, AuditKind::PipelineCompleted, None)?;
        tx.commit()?;
        Ok(())
    }

    /// Mark the pipeline failed and log `pipeline_failed`, atomically.
    pub async fn fail_pipeline(
        &self,
        pipeline_id: i64,
        payload: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE pipelines SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![PipelineStatus::Failed.as_str(), now_ms(), pipeline_id],
        )?;
        ensure_found(changed, "pipeline", pipeline_id)?;
        insert_audit(&tx, pipeline_id, None, AuditKind::PipelineFailed, payload)?;
        tx.commit()?;
        Ok(())
    }

    /// Restart bookkeeping: reset `failed` and `running` steps to `pending`
    /// and flip the pipeline back to `running`, in one transaction.
    pub async fn reset_for_restart(&self, pipeline_id: i64) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE steps
             SET status = 'pending', error_message = NULL, started_at = NULL, finished_at = NULL
             WHERE pipeline_id = ?1 AND status IN ('failed', 'running')",
            params![pipeline_id],
        )?;
        let changed = tx.execute(
            "UPDATE pipelines SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![PipelineStatus::Running.as_str(), now_ms(), pipeline_id],
        )?;
        ensure_found(changed, "pipeline", pipeline_id)?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    pub async fn steps_for_pipeline(&self, pipeline_id: i64) -> StoreResult<Vec<Step>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, pipeline_id, order_index, agent_name, status, model, error_message,
                    remind_after_hours, started_at, finished_at
             FROM steps WHERE pipeline_id = ?1 ORDER BY order_index",
        )?;
        let rows = stmt.query_map(params![pipeline_id], step_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub async fn get_step(&self, step_id: i64) -> StoreResult<Step> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, pipeline_id, order_index, agent_name, status, model, error_message,
                    remind_after_hours, started_at, finished_at
             FROM steps WHERE id = ?1",
            params![step_id],
            step_from_row,
        )
        .optional()?
        .ok_or(StoreError::RowNotFound {
            what: "step",
            id: step_id,
        })
    }

    /// The currently running approval-gate step of a pipeline, if any.
    pub async fn running_approval_step(&self, pipeline_id: i64) -> StoreResult<Option<Step>> {
        let conn = self.conn.lock().await;
        let step = conn
            .query_row(
                "SELECT id, pipeline_id, order_index, agent_name, status, model, error_message,
                        remind_after_hours, started_at, finished_at
                 FROM steps
                 WHERE pipeline_id = ?1 AND status = 'running' AND agent_name = ?2
                 ORDER BY order_index LIMIT 1",
                params![pipeline_id, baton_protocol::APPROVAL_STEP],
                step_from_row,
            )
            .optional()?;
        Ok(step)
    }

    /// Transition a step to `running` and log `step_started`, atomically.
    pub async fn start_step(&self, pipeline_id: i64, step_id: i64) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE steps
             SET status = 'running', error_message = NULL, started_at = ?1, finished_at = NULL
             WHERE id = ?2",
            params![now_ms(), step_id],
        )?;
        ensure_found(changed, "step", step_id)?;
        insert_audit(&tx, pipeline_id, Some(step_id), AuditKind::StepStarted, None)?;
        tx.commit()?;
        Ok(())
    }

    pub async fn finish_step(&self, step_id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE steps SET status = 'done', finished_at = ?1 WHERE id = ?2",
            params![now_ms(), step_id],
        )?;
        ensure_found(changed, "step", step_id)
    }

    /// Transition a step to `failed` with an error message and log
    /// `step_failed`, atomically.
    pub async fn fail_step(
        &self,
        pipeline_id: i64,
        step_id: i64,
        error_message: &str,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE steps SET status = 'failed', error_message = ?1, finished_at = ?2 WHERE id = ?3",
            params![error_message, now_ms(), step_id],
        )?;
        ensure_found(changed, "step", step_id)?;
        insert_audit(
            &tx,
            pipeline_id,
            Some(step_id),
            AuditKind::StepFailed,
            Some(serde_json::json!({ "error": error_message })),
        )?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Handoffs
    // ------------------------------------------------------------------

    /// Persist an agent step's output together with its `handoff_created`
    /// audit record (and `handoff_extraction_failed` when extraction did
    /// not produce structured data), all in one transaction.
    pub async fn record_handoff(
        &self,
        pipeline_id: i64,
        step_id: i64,
        content: &str,
        metadata: Option<&HandoffSchema>,
    ) -> StoreResult<Handoff> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let metadata_json = metadata.map(serde_json::to_string).transpose()?;
        tx.execute(
            "INSERT INTO handoffs (step_id, content, metadata, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![step_id, content, metadata_json, now_ms()],
        )?;
        let handoff_id = tx.last_insert_rowid();

        insert_audit(
            &tx,
            pipeline_id,
            Some(step_id),
            AuditKind::HandoffCreated,
            Some(serde_json::json!({ "has_structured": metadata.is_some() })),
        )?;
        if metadata.is_none() {
            insert_audit(
                &tx,
                pipeline_id,
                Some(step_id),
                AuditKind::HandoffExtractionFailed,
                None,
            )?;
        }

        let handoff = read_handoff(&tx, handoff_id)?;
        tx.commit()?;
        Ok(handoff)
    }

    pub async fn latest_handoff_for_step(&self, step_id: i64) -> StoreResult<Option<Handoff>> {
        let conn = self.conn.lock().await;
        let handoff = conn
            .query_row(
                "SELECT id, step_id, content, metadata, created_at
                 FROM handoffs WHERE step_id = ?1 ORDER BY id DESC LIMIT 1",
                params![step_id],
                handoff_from_row,
            )
            .optional()?;
        Ok(handoff)
    }

    /// The newest handoff of the furthest completed agent step; this is the
    /// context a resumed pipeline continues from.
    pub async fn last_successful_handoff(
        &self,
        pipeline_id: i64,
    ) -> StoreResult<Option<(Step, Handoff)>> {
        let conn = self.conn.lock().await;
        let pair = conn
            .query_row(
                "SELECT s.id, s.pipeline_id, s.order_index, s.agent_name, s.status, s.model,
                        s.error_message, s.remind_after_hours, s.started_at, s.finished_at,
                        h.id, h.step_id, h.content, h.metadata, h.created_at
                 FROM steps s JOIN handoffs h ON h.step_id = s.id
                 WHERE s.pipeline_id = ?1 AND s.status = 'done' AND s.agent_name != ?2
                 ORDER BY s.order_index DESC, h.id DESC LIMIT 1",
                params![pipeline_id, baton_protocol::APPROVAL_STEP],
                |row| {
                    let step = step_from_row(row)?;
                    let handoff = handoff_from_row_at(row, 10)?;
                    Ok((step, handoff))
                },
            )
            .optional()?;
        Ok(pair)
    }

    // ------------------------------------------------------------------
    // Approvals
    // ------------------------------------------------------------------

    /// Create a fresh `pending` approval for a gate step and log
    /// `approval_requested`, atomically.
    pub async fn create_approval(&self, pipeline_id: i64, step_id: i64) -> StoreResult<Approval> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO approvals (step_id, status, created_at) VALUES (?1, ?2, ?3)",
            params![step_id, ApprovalStatus::Pending.as_str(), now_ms()],
        )?;
        let approval_id = tx.last_insert_rowid();
        insert_audit(
            &tx,
            pipeline_id,
            Some(step_id),
            AuditKind::ApprovalRequested,
            None,
        )?;
        let approval = read_approval(&tx, approval_id)?;
        tx.commit()?;
        Ok(approval)
    }

    pub async fn pending_approval_for_step(&self, step_id: i64) -> StoreResult<Option<Approval>> {
        let conn = self.conn.lock().await;
        let approval = conn
            .query_row(
                "SELECT id, step_id, status, comment, decided_by, created_at, decided_at
                 FROM approvals WHERE step_id = ?1 AND status = 'pending'
                 ORDER BY id DESC LIMIT 1",
                params![step_id],
                approval_from_row,
            )
            .optional()?;
        Ok(approval)
    }

    pub async fn latest_approval_for_step(&self, step_id: i64) -> StoreResult<Option<Approval>> {
        let conn = self.conn.lock().await;
        let approval = conn
            .query_row(
                "SELECT id, step_id, status, comment, decided_by, created_at, decided_at
                 FROM approvals WHERE step_id = ?1 ORDER BY id DESC LIMIT 1",
                params![step_id],
                approval_from_row,
            )
            .optional()?;
        Ok(approval)
    }

    /// Record the decision on an approval row.
    pub async fn resolve_approval(
        &self,
        approval_id: i64,
        status: ApprovalStatus,
        comment: Option<&str>,
        decided_by: Option<&str>,
    ) -> StoreResult<Approval> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE approvals SET status = ?1, comment = ?2, decided_by = ?3, decided_at = ?4
             WHERE id = ?5",
            params![status.as_str(), comment, decided_by, now_ms(), approval_id],
        )?;
        ensure_found(changed, "approval", approval_id)?;
        read_approval(&conn, approval_id)
    }

    /// Apply an approved gate: return the pipeline to `running`, mark the
    /// gate step done, and log `approval_granted`, all in one transaction.
    pub async fn grant_approval_step(
        &self,
        pipeline_id: i64,
        step_id: i64,
        decided_by: Option<&str>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE pipelines SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![PipelineStatus::Running.as_str(), now_ms(), pipeline_id],
        )?;
        ensure_found(changed, "pipeline", pipeline_id)?;
        let changed = tx.execute(
            "UPDATE steps SET status = 'done', finished_at = ?1 WHERE id = ?2",
            params![now_ms(), step_id],
        )?;
        ensure_found(changed, "step", step_id)?;
        insert_audit(
            &tx,
            pipeline_id,
            Some(step_id),
            AuditKind::ApprovalGranted,
            Some(serde_json::json!({ "decided_by": decided_by })),
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Apply a rejected gate: the decision record, the failed step, and the
    /// failed pipeline commit together with their audit rows.
    pub async fn reject_approval_step(
        &self,
        pipeline_id: i64,
        step_id: i64,
        error_message: &str,
        decided_by: Option<&str>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        insert_audit(
            &tx,
            pipeline_id,
            Some(step_id),
            AuditKind::ApprovalRejected,
            Some(serde_json::json!({ "decided_by": decided_by })),
        )?;
        let changed = tx.execute(
            "UPDATE steps SET status = 'failed', error_message = ?1, finished_at = ?2 WHERE id = ?3",
            params![error_message, now_ms(), step_id],
        )?;
        ensure_found(changed, "step", step_id)?;
        insert_audit(
            &tx,
            pipeline_id,
            Some(step_id),
            AuditKind::StepFailed,
            Some(serde_json::json!({ "error": error_message })),
        )?;
        let changed = tx.execute(
            "UPDATE pipelines SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![PipelineStatus::Failed.as_str(), now_ms(), pipeline_id],
        )?;
        ensure_found(changed, "pipeline", pipeline_id)?;
        insert_audit(
            &tx,
            pipeline_id,
            None,
            AuditKind::PipelineFailed,
            Some(serde_json::json!({ "error": error_message })),
        )?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    pub async fn insert_audit(
        &self,
        pipeline_id: i64,
        step_id: Option<i64>,
        kind: AuditKind,
        payload: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        insert_audit(&conn, pipeline_id, step_id, kind, payload)
    }

    pub async fn audit_events(&self, pipeline_id: i64) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, pipeline_id, step_id, event_type, payload, created_at
             FROM audit_events WHERE pipeline_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![pipeline_id], audit_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

fn ensure_found(changed: usize, what: &'static str, id: i64) -> StoreResult<()> {
    if changed == 0 {
        Err(StoreError::RowNotFound { what, id })
    } else {
        Ok(())
    }
}

/// Wrap a domain-level conversion failure into a rusqlite error so row
/// mappers stay composable with `query_map`/`query_row`.
fn corrupt_column(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}

fn read_pipeline(conn: &Connection, pipeline_id: i64) -> StoreResult<Pipeline> {
    conn.query_row(
        "SELECT id, title, template, prompt, working_dir, branch, status, created_at, updated_at
         FROM pipelines WHERE id = ?1",
        params![pipeline_id],
        pipeline_from_row,
    )
    .optional()?
    .ok_or(StoreError::RowNotFound {
        what: "pipeline",
        id: pipeline_id,
    })
}

fn read_handoff(conn: &Connection, handoff_id: i64) -> StoreResult<Handoff> {
    conn.query_row(
        "SELECT id, step_id, content, metadata, created_at FROM handoffs WHERE id = ?1",
        params![handoff_id],
        handoff_from_row,
    )
    .optional()?
    .ok_or(StoreError::RowNotFound {
        what: "handoff",
        id: handoff_id,
    })
}

fn read_approval(conn: &Connection, approval_id: i64) -> StoreResult<Approval> {
    conn.query_row(
        "SELECT id, step_id, status, comment, decided_by, created_at, decided_at
         FROM approvals WHERE id = ?1",
        params![approval_id],
        approval_from_row,
    )
    .optional()?
    .ok_or(StoreError::RowNotFound {
        what: "approval",
        id: approval_id,
    })
}

fn insert_audit(
    conn: &Connection,
    pipeline_id: i64,
    step_id: Option<i64>,
    kind: AuditKind,
    payload: Option<serde_json::Value>,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO audit_events (pipeline_id, step_id, event_type, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            pipeline_id,
            step_id,
            kind.as_str(),
            payload.map(|p| p.to_string()),
            now_ms(),
        ],
    )?;
    Ok(())
}

fn pipeline_from_row(row: &Row<'_>) -> rusqlite::Result<Pipeline> {
    let status_raw: String = row.get(6)?;
    Ok(Pipeline {
        id: row.get(0)?,
        title: row.get(1)?,
        template: row.get(2)?,
        prompt: row.get(3)?,
        working_dir: row.get(4)?,
        branch: row.get(5)?,
        status: PipelineStatus::parse(&status_raw).map_err(|e| corrupt_column(6, e))?,
        created_at: ms_to_datetime(row.get(7)?),
        updated_at: ms_to_datetime(row.get(8)?),
    })
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<Step> {
    let status_raw: String = row.get(4)?;
    Ok(Step {
        id: row.get(0)?,
        pipeline_id: row.get(1)?,
        order_index: row.get::<_, i64>(2)? as u32,
        agent_name: row.get(3)?,
        status: StepStatus::parse(&status_raw).map_err(|e| corrupt_column(4, e))?,
        model: row.get(5)?,
        error_message: row.get(6)?,
        remind_after_hours: row.get(7)?,
        started_at: row.get::<_, Option<i64>>(8)?.map(ms_to_datetime),
        finished_at: row.get::<_, Option<i64>>(9)?.map(ms_to_datetime),
    })
}

fn handoff_from_row(row: &Row<'_>) -> rusqlite::Result<Handoff> {
    handoff_from_row_at(row, 0)
}

fn handoff_from_row_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Handoff> {
    let metadata_json: Option<String> = row.get(offset + 3)?;
    let metadata = metadata_json
        .map(|json| serde_json::from_str::<HandoffSchema>(&json))
        .transpose()
        .map_err(|e| corrupt_column(offset + 3, e))?;

    Ok(Handoff {
        id: row.get(offset)?,
        step_id: row.get(offset + 1)?,
        content: row.get(offset + 2)?,
        metadata,
        created_at: ms_to_datetime(row.get(offset + 4)?),
    })
}

fn approval_from_row(row: &Row<'_>) -> rusqlite::Result<Approval> {
    let status_raw: String = row.get(2)?;
    Ok(Approval {
        id: row.get(0)?,
        step_id: row.get(1)?,
        status: ApprovalStatus::parse(&status_raw).map_err(|e| corrupt_column(2, e))?,
        comment: row.get(3)?,
        decided_by: row.get(4)?,
        created_at: ms_to_datetime(row.get(5)?),
        decided_at: row.get::<_, Option<i64>>(6)?.map(ms_to_datetime),
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let payload_json: Option<String> = row.get(4)?;
    let payload = payload_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| corrupt_column(4, e))?;

    Ok(AuditEvent {
        id: row.get(0)?,
        pipeline_id: row.get(1)?,
        step_id: row.get(2)?,
        event_type: row.get(3)?,
        payload,
        created_at: ms_to_datetime(row.get(5)?),
    })
}
