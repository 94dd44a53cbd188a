//! Tunnel collaborator seam.
//!
//! The tunnel is a streaming channel that yields typed rows of a terminated
//! instance's output. Its wire format is owned by the platform; this module
//! only defines the row model and the traits an implementation plugs into.
//!
//! Dropping a [`TunnelStream`] releases its connection. [`crate::RecordReader`]
//! guarantees that happens exactly once per open.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransportError;

/// Column types the client can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bigint,
    Double,
    Boolean,
    String,
}

impl DataType {
    /// Decode one textual cell of a non-tunnel result. `\N` is null; a
    /// string cell starting with `\` carries one extra escaping backslash.
    pub fn parse_cell(self, cell: &str) -> Result<Value, String> {
        if cell == NULL_CELL {
            return Ok(Value::Null);
        }
        match self {
            DataType::Bigint => cell
                .trim()
                .parse::<i64>()
                .map(Value::Bigint)
                .map_err(|e| format!("invalid bigint {cell:?}: {e}")),
            DataType::Double => cell
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|e| format!("invalid double {cell:?}: {e}")),
            DataType::Boolean => match cell.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(format!("invalid boolean {cell:?}")),
            },
            DataType::String => Ok(Value::String(
                cell.strip_prefix('\\').unwrap_or(cell).to_string(),
            )),
        }
    }
}

/// Textual null marker used by non-tunnel results.
pub const NULL_CELL: &str = "\\N";

/// Name and type of one output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A single typed cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bigint(i64),
    Double(f64),
    Boolean(bool),
    String(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bigint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual form used by non-tunnel results. Strings starting with `\`
    /// are escaped so they never collide with the null marker.
    pub fn to_cell(&self) -> String {
        match self {
            Value::Null => NULL_CELL.to_string(),
            Value::String(v) if v.starts_with('\\') => format!("\\{v}"),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bigint(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
        }
    }
}

/// One output row: an ordered sequence of column values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// An open download over one instance's output.
///
/// Rows are produced lazily and in order. The stream is finite and cannot be
/// restarted; open a new one to read again.
#[async_trait]
pub trait TunnelStream: Send {
    fn schema(&self) -> &[Column];

    /// Total number of rows the download will yield.
    fn record_count(&self) -> u64;

    /// Next row, or `None` once the stream is exhausted.
    async fn next_record(&mut self) -> Result<Option<Record>, TransportError>;
}

/// Opens downloads over terminated instances.
#[async_trait]
pub trait TunnelService: Send + Sync {
    /// Open a download for `instance_id`.
    ///
    /// Returns `Ok(None)` when the instance terminated without tabular
    /// output. Fails when the instance has not terminated yet.
    async fn open_download(
        &self,
        instance_id: &str,
        limit: Option<u64>,
    ) -> Result<Option<Box<dyn TunnelStream>>, TransportError>;
}
