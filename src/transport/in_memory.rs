//! In-memory platform for tests and local development.
//!
//! Simulates just enough of the service to drive the session lifecycle:
//! sessions that start asynchronously, statements that finish after a few
//! status reads, a handful of SQL shapes over in-memory tables, and tunnel
//! downloads whose open connections are counted.
//!
//! A statement executes when it terminates. Stopping it earlier cancels it
//! without touching any table.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{InstanceRecord, SessionInfo, SessionSpec, SqlSubmission, Transport};
use crate::error::TransportError;
use crate::status::{InstanceStatus, TaskResult, TaskStatus};
use crate::tunnel::{Column, DataType, Record, TunnelService, TunnelStream, Value};

pub const SESSION_TASK_NAME: &str = "AnonymousSQLRTTask";
pub const SQL_TASK_NAME: &str = "AnonymousSQLTask";

/// Timing of simulated state transitions, counted in status reads.
#[derive(Debug, Clone)]
pub struct PlatformOptions {
    /// Status reads before a new session reports `Running`. Zero starts
    /// sessions directly in `Running`.
    pub session_startup_polls: u32,
    /// Status reads before a statement reports `Terminated`. Zero terminates
    /// statements on submission.
    pub statement_polls: u32,
}

impl Default for PlatformOptions {
    fn default() -> Self {
        Self {
            session_startup_polls: 2,
            statement_polls: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Table {
    columns: Vec<Column>,
    rows: Vec<Record>,
}

#[derive(Debug, Clone, Serialize)]
struct Output {
    columns: Vec<Column>,
    rows: Vec<Record>,
}

/// What a terminated instance reports.
#[derive(Debug, Clone, Serialize)]
enum Outcome {
    /// Statement accepted but not executed yet.
    Pending,
    Rows(Output),
    NoRows,
    Failed(String),
    Cancelled,
    Released,
}

#[derive(Debug, Clone, Serialize)]
enum InstanceKind {
    Session(SessionInfo),
    Statement {
        session_id: String,
        sql: String,
        hints: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize)]
struct InstanceEntry {
    id: String,
    status: InstanceStatus,
    polls_remaining: u32,
    kind: InstanceKind,
    outcome: Outcome,
}

impl InstanceEntry {
    /// Move one simulated step forward. Terminal entries never change.
    ///
    /// Returns the statement text when this step terminated a statement
    /// that still has to run.
    fn advance(&mut self) -> Option<String> {
        if self.status.is_terminal() {
            return None;
        }
        if self.polls_remaining > 0 {
            self.polls_remaining -= 1;
        }
        if self.polls_remaining > 0 {
            return None;
        }
        match &self.kind {
            InstanceKind::Session(_) => {
                self.status = InstanceStatus::Running;
                None
            }
            InstanceKind::Statement { sql, .. } => {
                self.status = InstanceStatus::Terminated;
                matches!(self.outcome, Outcome::Pending).then(|| sql.clone())
            }
        }
    }

    fn record(&self) -> InstanceRecord {
        InstanceRecord {
            id: self.id.clone(),
            status: self.status,
            session: match &self.kind {
                InstanceKind::Session(info) => Some(info.clone()),
                InstanceKind::Statement { .. } => None,
            },
        }
    }

    fn task_name(&self) -> &'static str {
        match self.kind {
            InstanceKind::Session(_) => SESSION_TASK_NAME,
            InstanceKind::Statement { .. } => SQL_TASK_NAME,
        }
    }

    fn task_result(&self) -> Result<TaskResult, TransportError> {
        let name = self.task_name().to_string();
        if !self.status.is_terminal() {
            let status = match self.status {
                InstanceStatus::Created => TaskStatus::Waiting,
                _ => TaskStatus::Running,
            };
            return Ok(TaskResult {
                name,
                status,
                result: String::new(),
                schema: None,
            });
        }
        let task = match &self.outcome {
            Outcome::Pending => TaskResult {
                name,
                status: TaskStatus::Running,
                result: String::new(),
                schema: None,
            },
            Outcome::Rows(output) => TaskResult {
                name,
                status: TaskStatus::Success,
                result: encode_csv(output)?,
                schema: Some(output.columns.clone()),
            },
            Outcome::NoRows => TaskResult {
                name,
                status: TaskStatus::Success,
                result: String::new(),
                schema: None,
            },
            Outcome::Failed(message) => TaskResult {
                name,
                status: TaskStatus::Failed,
                result: message.clone(),
                schema: None,
            },
            Outcome::Cancelled => TaskResult {
                name,
                status: TaskStatus::Cancelled,
                result: "instance stopped by request".to_string(),
                schema: None,
            },
            Outcome::Released => TaskResult {
                name,
                status: TaskStatus::Success,
                result: "session released".to_string(),
                schema: None,
            },
        };
        Ok(task)
    }
}

#[derive(Default)]
struct PlatformState {
    tables: HashMap<String, Table>,
    instances: HashMap<String, InstanceEntry>,
    /// Live session name -> instance id
    sessions_by_name: HashMap<String, String>,
    next_id: u64,
    faults: HashMap<String, VecDeque<TransportError>>,
    stream_failure_after: Option<usize>,
}

impl PlatformState {
    fn take_fault(&mut self, operation: &str) -> Result<(), TransportError> {
        match self.faults.get_mut(operation).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn new_instance_id(&mut self) -> String {
        let seq = self.next_sequence();
        format!("{}{:08}", Utc::now().format("%Y%m%d%H%M%S"), seq)
    }

    fn new_session_name(&mut self) -> String {
        let seq = self.next_sequence();
        format!("session_{}_{seq}", Utc::now().format("%Y%m%d%H%M%S"))
    }

    fn entry(&self, operation: &str, instance_id: &str) -> Result<&InstanceEntry, TransportError> {
        self.instances
            .get(instance_id)
            .ok_or_else(|| TransportError::permanent(operation, format!("instance not found: {instance_id}")))
    }

    /// Run a statement that just terminated and record its outcome.
    fn complete_statement(&mut self, instance_id: &str, sql: &str) {
        let outcome = self.execute(sql);
        if let Some(entry) = self.instances.get_mut(instance_id) {
            entry.outcome = outcome;
        }
    }

    fn execute(&mut self, sql: &str) -> Outcome {
        let statement = match parse_statement(sql) {
            Ok(statement) => statement,
            Err(message) => return Outcome::Failed(message),
        };
        match statement {
            Statement::InsertCount { target, source } => {
                let count = match self.tables.get(&source) {
                    Some(table) => table.rows.len(),
                    None => return Outcome::Failed(table_not_found(&source)),
                };
                let Some(table) = self.tables.get_mut(&target) else {
                    return Outcome::Failed(table_not_found(&target));
                };
                if table.columns.len() != 1 || table.columns[0].data_type != DataType::Bigint {
                    return Outcome::Failed(format!(
                        "ODPS-0130071: Semantic analysis exception - insert into {target} expects a single bigint column"
                    ));
                }
                table.rows.push(Record::new(vec![Value::Bigint(count as i64)]));
                Outcome::NoRows
            }
            Statement::SelectAll { table } => match self.tables.get(&table) {
                Some(t) => Outcome::Rows(Output {
                    columns: t.columns.clone(),
                    rows: t.rows.clone(),
                }),
                None => Outcome::Failed(table_not_found(&table)),
            },
            Statement::SelectCount { table } => match self.tables.get(&table) {
                Some(t) => Outcome::Rows(Output {
                    columns: vec![Column::new("_c0", DataType::Bigint)],
                    rows: vec![Record::new(vec![Value::Bigint(t.rows.len() as i64)])],
                }),
                None => Outcome::Failed(table_not_found(&table)),
            },
        }
    }
}

fn table_not_found(table: &str) -> String {
    format!("ODPS-0130131: Table not found - table {table} cannot be resolved")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    InsertCount { target: String, source: String },
    SelectAll { table: String },
    SelectCount { table: String },
}

fn parse_statement(sql: &str) -> Result<Statement, String> {
    let normalized = sql.trim().trim_end_matches(';').to_ascii_lowercase();
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    match tokens.as_slice() {
        ["insert", "into", "table", target, "select", "count(*)", "from", source]
        | ["insert", "into", target, "select", "count(*)", "from", source] => Ok(Statement::InsertCount {
            target: target.to_string(),
            source: source.to_string(),
        }),
        ["select", "*", "from", table] => Ok(Statement::SelectAll {
            table: table.to_string(),
        }),
        ["select", "count(*)", "from", table] => Ok(Statement::SelectCount {
            table: table.to_string(),
        }),
        _ => Err(format!(
            "ODPS-0130161: Parse exception - unsupported statement: {}",
            sql.trim()
        )),
    }
}

fn encode_csv(output: &Output) -> Result<String, TransportError> {
    let to_err = |e: &dyn std::fmt::Display| TransportError::permanent("get_task_results", e.to_string());
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(output.columns.iter().map(|c| c.name.as_str()))
        .map_err(|e| to_err(&e))?;
    for row in &output.rows {
        writer
            .write_record(row.values().iter().map(Value::to_cell))
            .map_err(|e| to_err(&e))?;
    }
    let bytes = writer.into_inner().map_err(|e| to_err(&e))?;
    String::from_utf8(bytes).map_err(|e| to_err(&e))
}

/// Decrements the open-connection count when the download is dropped.
struct ConnectionGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

struct InMemoryTunnelStream {
    schema: Vec<Column>,
    count: u64,
    rows: VecDeque<Record>,
    yielded: usize,
    fail_after: Option<usize>,
    _connection: ConnectionGuard,
}

#[async_trait]
impl TunnelStream for InMemoryTunnelStream {
    fn schema(&self) -> &[Column] {
        &self.schema
    }

    fn record_count(&self) -> u64 {
        self.count
    }

    async fn next_record(&mut self) -> Result<Option<Record>, TransportError> {
        if self.fail_after == Some(self.yielded) {
            return Err(TransportError::retryable("read_record", "connection reset by peer"));
        }
        let next = self.rows.pop_front();
        if next.is_some() {
            self.yielded += 1;
        }
        Ok(next)
    }
}

/// Simulated platform implementing both [`Transport`] and [`TunnelService`].
pub struct InMemoryPlatform {
    options: PlatformOptions,
    state: Mutex<PlatformState>,
    open_tunnels: Arc<AtomicUsize>,
    tunnels_opened: AtomicUsize,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::with_options(PlatformOptions::default())
    }

    pub fn with_options(options: PlatformOptions) -> Self {
        Self {
            options,
            state: Mutex::new(PlatformState::default()),
            open_tunnels: Arc::new(AtomicUsize::new(0)),
            tunnels_opened: AtomicUsize::new(0),
        }
    }

    /// Create (or replace) a table. Names are case-insensitive.
    pub async fn create_table(&self, name: &str, columns: Vec<Column>) {
        let mut state = self.state.lock().await;
        state.tables.insert(
            name.to_ascii_lowercase(),
            Table {
                columns,
                rows: Vec::new(),
            },
        );
    }

    /// Drop a table; returns whether it existed.
    pub async fn drop_table(&self, name: &str) -> bool {
        self.state.lock().await.tables.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub async fn table_rows(&self, name: &str) -> Option<Vec<Record>> {
        let state = self.state.lock().await;
        state.tables.get(&name.to_ascii_lowercase()).map(|t| t.rows.clone())
    }

    /// Make the next call of `operation` fail with `error`. Calls queue up;
    /// `"open_download"` targets the tunnel.
    pub async fn fail_next(&self, operation: &str, error: TransportError) {
        let mut state = self.state.lock().await;
        state.faults.entry(operation.to_string()).or_default().push_back(error);
    }

    /// Make the next download fail after yielding `rows` rows.
    pub async fn fail_next_stream_after(&self, rows: usize) {
        self.state.lock().await.stream_failure_after = Some(rows);
    }

    /// Hints the platform received with a statement.
    pub async fn submitted_hints(&self, instance_id: &str) -> Option<BTreeMap<String, String>> {
        let state = self.state.lock().await;
        match state.instances.get(instance_id).map(|e| &e.kind) {
            Some(InstanceKind::Statement { hints, .. }) => Some(hints.clone()),
            _ => None,
        }
    }

    /// Downloads currently open.
    pub fn open_tunnels(&self) -> usize {
        self.open_tunnels.load(Ordering::SeqCst)
    }

    /// Downloads opened over the platform's lifetime.
    pub fn tunnels_opened(&self) -> usize {
        self.tunnels_opened.load(Ordering::SeqCst)
    }

    /// Pretty-printed dump of tables and instances (test utility).
    pub async fn dump_all_pretty(&self) -> String {
        let state = self.state.lock().await;
        let tables: BTreeMap<_, _> = state.tables.iter().collect();
        let instances: BTreeMap<_, _> = state.instances.iter().collect();
        let dump = serde_json::json!({ "tables": tables, "instances": instances });
        serde_json::to_string_pretty(&dump).unwrap_or_else(|e| format!("<dump failed: {e}>"))
    }
}

#[async_trait]
impl Transport for InMemoryPlatform {
    async fn create_session(&self, spec: &SessionSpec) -> Result<InstanceRecord, TransportError> {
        let mut state = self.state.lock().await;
        state.take_fault("create_session")?;
        if spec.workers == 0 || spec.worker_memory_mb == 0 {
            return Err(TransportError::permanent(
                "create_session",
                "workers and worker memory must be positive",
            ));
        }
        let name = match &spec.name {
            Some(name) => name.clone(),
            None => state.new_session_name(),
        };
        if state.sessions_by_name.contains_key(&name) {
            return Err(TransportError::permanent(
                "create_session",
                format!("session name already in use: {name}"),
            ));
        }
        let id = state.new_instance_id();
        let startup = self.options.session_startup_polls;
        let entry = InstanceEntry {
            id: id.clone(),
            status: if startup == 0 {
                InstanceStatus::Running
            } else {
                InstanceStatus::Created
            },
            polls_remaining: startup,
            kind: InstanceKind::Session(SessionInfo {
                name: name.clone(),
                workers: spec.workers,
                worker_memory_mb: spec.worker_memory_mb,
            }),
            outcome: Outcome::Released,
        };
        let record = entry.record();
        state.sessions_by_name.insert(name.clone(), id.clone());
        state.instances.insert(id.clone(), entry);
        debug!(instance_id = %id, session_name = %name, "Platform created session");
        Ok(record)
    }

    async fn find_session(&self, name: &str) -> Result<Option<InstanceRecord>, TransportError> {
        let mut state = self.state.lock().await;
        state.take_fault("find_session")?;
        let record = state
            .sessions_by_name
            .get(name)
            .and_then(|id| state.instances.get(id))
            .filter(|entry| !entry.status.is_terminal())
            .map(InstanceEntry::record);
        Ok(record)
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, TransportError> {
        let mut state = self.state.lock().await;
        state.take_fault("get_instance")?;
        let Some(entry) = state.instances.get_mut(instance_id) else {
            return Ok(None);
        };
        let finished = entry.advance();
        let record = entry.record();
        if let Some(sql) = finished {
            state.complete_statement(instance_id, &sql);
        }
        Ok(Some(record))
    }

    async fn submit_sql(&self, submission: &SqlSubmission) -> Result<InstanceRecord, TransportError> {
        let mut state = self.state.lock().await;
        state.take_fault("submit_sql")?;
        let session = state.entry("submit_sql", &submission.session_id)?;
        if !matches!(session.kind, InstanceKind::Session(_)) {
            return Err(TransportError::permanent(
                "submit_sql",
                format!("instance {} is not a session", submission.session_id),
            ));
        }
        if session.status != InstanceStatus::Running {
            return Err(TransportError::permanent(
                "submit_sql",
                format!(
                    "session {} is not running (status: {})",
                    submission.session_name, session.status
                ),
            ));
        }

        let id = state.new_instance_id();
        let polls = self.options.statement_polls;
        let entry = InstanceEntry {
            id: id.clone(),
            status: if polls == 0 {
                InstanceStatus::Terminated
            } else {
                InstanceStatus::Running
            },
            polls_remaining: polls,
            kind: InstanceKind::Statement {
                session_id: submission.session_id.clone(),
                sql: submission.sql.clone(),
                hints: submission.hints.clone(),
            },
            outcome: Outcome::Pending,
        };
        let record = entry.record();
        state.instances.insert(id.clone(), entry);
        if polls == 0 {
            state.complete_statement(&id, &submission.sql);
        }
        debug!(instance_id = %id, session_name = %submission.session_name, "Platform accepted statement");
        Ok(record)
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.take_fault("stop_instance")?;
        let released_name = {
            let entry = state.instances.get_mut(instance_id).ok_or_else(|| {
                TransportError::permanent("stop_instance", format!("instance not found: {instance_id}"))
            })?;
            if entry.status.is_terminal() {
                return Ok(());
            }
            entry.status = InstanceStatus::Terminated;
            match &entry.kind {
                InstanceKind::Session(info) => {
                    entry.outcome = Outcome::Released;
                    Some(info.name.clone())
                }
                InstanceKind::Statement { .. } => {
                    entry.outcome = Outcome::Cancelled;
                    None
                }
            }
        };
        if let Some(name) = released_name {
            state.sessions_by_name.remove(&name);
        }
        debug!(instance_id, "Platform stopped instance");
        Ok(())
    }

    async fn get_task_results(&self, instance_id: &str) -> Result<Vec<TaskResult>, TransportError> {
        let mut state = self.state.lock().await;
        state.take_fault("get_task_results")?;
        let entry = state.entry("get_task_results", instance_id)?;
        Ok(vec![entry.task_result()?])
    }

    async fn create_logview_token(
        &self,
        instance_id: &str,
        hours: u32,
    ) -> Result<String, TransportError> {
        let mut state = self.state.lock().await;
        state.take_fault("create_logview_token")?;
        let entry = state.entry("create_logview_token", instance_id)?;
        Ok(format!("lv.{}.{hours}h", entry.id))
    }
}

#[async_trait]
impl TunnelService for InMemoryPlatform {
    async fn open_download(
        &self,
        instance_id: &str,
        limit: Option<u64>,
    ) -> Result<Option<Box<dyn TunnelStream>>, TransportError> {
        let mut state = self.state.lock().await;
        state.take_fault("open_download")?;
        let entry = state.entry("open_download", instance_id)?;
        if !entry.status.is_terminal() {
            return Err(TransportError::permanent(
                "open_download",
                format!("instance {instance_id} has not terminated (status: {})", entry.status),
            ));
        }
        let output = match &entry.outcome {
            Outcome::Rows(output) => output.clone(),
            Outcome::Failed(message) => {
                return Err(TransportError::permanent(
                    "open_download",
                    format!("instance {instance_id} failed: {message}"),
                ))
            }
            Outcome::Pending | Outcome::NoRows | Outcome::Cancelled | Outcome::Released => return Ok(None),
        };

        let mut rows: VecDeque<Record> = output.rows.into();
        if let Some(limit) = limit {
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        let fail_after = state.stream_failure_after.take();

        self.open_tunnels.fetch_add(1, Ordering::SeqCst);
        self.tunnels_opened.fetch_add(1, Ordering::SeqCst);
        debug!(instance_id, rows = rows.len(), "Platform opened download");
        Ok(Some(Box::new(InMemoryTunnelStream {
            schema: output.columns,
            count: rows.len() as u64,
            rows,
            yielded: 0,
            fail_after,
            _connection: ConnectionGuard {
                open: self.open_tunnels.clone(),
            },
        })))
    }
}
