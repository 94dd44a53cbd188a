//! Record readers over a terminated instance's output.
//!
//! A [`RecordReader`] is a scoped resource. In tunnel mode it holds an open
//! download that is released exactly once: when the stream is exhausted, when
//! reading fails, on [`RecordReader::close`], or on drop, whichever comes
//! first. In non-tunnel mode rows are decoded from the task result payload up
//! front and nothing stays open.

use futures::stream::{self, Stream};
use tracing::debug;

use crate::error::{ClientError, Result, TransportError};
use crate::tunnel::{Column, Record, TunnelStream};

/// How to retrieve an instance's output.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Stream rows through the tunnel (`true`) or decode them from the task
    /// result payload (`false`).
    pub tunnel: bool,
    /// Read at most this many rows.
    pub limit: Option<u64>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            tunnel: true,
            limit: None,
        }
    }
}

impl ReaderOptions {
    pub fn tunnel() -> Self {
        Self::default()
    }

    pub fn result() -> Self {
        Self {
            tunnel: false,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

enum Source {
    Tunnel(Box<dyn TunnelStream>),
    Buffered(std::vec::IntoIter<Record>),
    Closed,
}

pub struct RecordReader {
    instance_id: String,
    schema: Vec<Column>,
    count: u64,
    source: Source,
}

impl std::fmt::Debug for RecordReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordReader")
            .field("instance_id", &self.instance_id)
            .field("schema", &self.schema)
            .field("count", &self.count)
            .field("open", &self.is_open())
            .finish()
    }
}

impl RecordReader {
    pub(crate) fn from_tunnel(instance_id: impl Into<String>, stream: Box<dyn TunnelStream>) -> Self {
        let instance_id = instance_id.into();
        debug!(instance_id = %instance_id, records = stream.record_count(), "Opened tunnel reader");
        Self {
            instance_id,
            schema: stream.schema().to_vec(),
            count: stream.record_count(),
            source: Source::Tunnel(stream),
        }
    }

    pub(crate) fn from_records(
        instance_id: impl Into<String>,
        schema: Vec<Column>,
        records: Vec<Record>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            schema,
            count: records.len() as u64,
            source: Source::Buffered(records.into_iter()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn schema(&self) -> &[Column] {
        &self.schema
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of rows this reader yields in total.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Whether a tunnel connection is still held.
    pub fn is_open(&self) -> bool {
        matches!(self.source, Source::Tunnel(_))
    }

    /// Next row in order, or `None` when exhausted.
    ///
    /// A failed read releases the connection before the error is returned;
    /// later calls yield `None`.
    pub async fn next_record(&mut self) -> Result<Option<Record>> {
        let result = match &mut self.source {
            Source::Tunnel(stream) => stream.next_record().await,
            Source::Buffered(rows) => return Ok(rows.next()),
            Source::Closed => return Ok(None),
        };
        match result {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(e) => {
                self.close();
                Err(ClientError::Transport(e))
            }
        }
    }

    /// Drain all remaining rows. The connection is released on every path.
    pub async fn read_all(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(usize::try_from(self.count).unwrap_or(0));
        while let Some(record) = self.next_record().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Convert into a stream of rows.
    pub fn into_stream(self) -> impl Stream<Item = Result<Record>> + Send {
        stream::try_unfold(self, |mut reader| async move {
            let next = reader.next_record().await?;
            Ok::<_, ClientError>(next.map(|record| (record, reader)))
        })
    }

    /// Release the underlying connection. Idempotent.
    pub fn close(&mut self) {
        if let Source::Tunnel(stream) = std::mem::replace(&mut self.source, Source::Closed) {
            drop(stream);
            debug!(instance_id = %self.instance_id, "Released tunnel reader");
        }
    }
}

impl Drop for RecordReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Decode a non-tunnel CSV payload (header row first, `\N` for null).
pub(crate) fn decode_csv_records(
    payload: &str,
    schema: &[Column],
    limit: Option<u64>,
) -> Result<Vec<Record>> {
    let to_err = |message: String| ClientError::Transport(TransportError::permanent("decode_result", message));
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(payload.as_bytes());
    let limit = limit.and_then(|l| usize::try_from(l).ok()).unwrap_or(usize::MAX);

    let mut records = Vec::new();
    for row in reader.records().take(limit) {
        let row = row.map_err(|e| to_err(e.to_string()))?;
        if row.len() != schema.len() {
            return Err(to_err(format!(
                "row has {} cells, schema has {} columns",
                row.len(),
                schema.len()
            )));
        }
        let values = row
            .iter()
            .zip(schema)
            .map(|(cell, column)| column.data_type.parse_cell(cell))
            .collect::<std::result::Result<Vec<_>, String>>()
            .map_err(to_err)?;
        records.push(Record::new(values));
    }
    Ok(records)
}
