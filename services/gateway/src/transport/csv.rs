//! CSV batch upload transport.
//!
//! One upload becomes one job: the file is parsed in chunks, each row
//! expands into one point per configured value column, and every point
//! walks the normal router path. Progress is tracked per job and polled via
//! the jobs endpoint. Backpressure is natural: rows are routed one at a
//! time, so a slow backend simply slows the job down instead of flooding
//! anything.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};
use types::{DataPoint, Domain};

use crate::error::{ErrorKind, GatewayError, Result};
use crate::pipeline::IngestRouter;
use crate::time::parse_iso8601;

use super::TransportCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Serializable job progress, returned by `GET /ingest/csv/jobs/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct CsvJobStatus {
    pub status: JobState,
    pub processed_rows: u64,
    pub inserted_rows: u64,
    pub rejected_rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CsvJobStatus {
    fn pending() -> Self {
        Self {
            status: JobState::Pending,
            processed_rows: 0,
            inserted_rows: 0,
            rejected_rows: 0,
            error: None,
        }
    }
}

/// Parameters accompanying an upload.
#[derive(Debug, Clone)]
pub struct CsvJobParams {
    pub domain: Domain,
    pub source_id: String,
    pub timestamp_column: String,
    pub value_columns: Vec<String>,
}

/// In-process registry of upload jobs.
#[derive(Default)]
pub struct CsvJobRegistry {
    jobs: DashMap<String, CsvJobStatus>,
}

impl CsvJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &str) -> Option<CsvJobStatus> {
        self.jobs.get(job_id).map(|s| s.clone())
    }

    fn create(&self, job_id: &str) {
        self.jobs.insert(job_id.to_string(), CsvJobStatus::pending());
    }

    fn update<F: FnOnce(&mut CsvJobStatus)>(&self, job_id: &str, f: F) {
        if let Some(mut status) = self.jobs.get_mut(job_id) {
            f(&mut status);
        }
    }
}

/// Register a job and spawn its worker. Returns the job id immediately;
/// progress is polled.
pub fn spawn_job(
    registry: Arc<CsvJobRegistry>,
    router: Arc<IngestRouter>,
    counters: Arc<TransportCounters>,
    params: CsvJobParams,
    body: Vec<u8>,
) -> String {
    let job_id = uuid::Uuid::new_v4().to_string();
    registry.create(&job_id);

    let id = job_id.clone();
    tokio::spawn(async move {
        registry.update(&id, |s| s.status = JobState::Running);
        match run_job(&registry, &id, &router, &counters, &params, &body).await {
            Ok(()) => {
                registry.update(&id, |s| s.status = JobState::Completed);
                info!(job_id = %id, "CSV job completed");
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "CSV job failed");
                registry.update(&id, |s| {
                    s.status = JobState::Failed;
                    s.error = Some(e.to_string());
                });
            }
        }
    });

    job_id
}

async fn run_job(
    registry: &CsvJobRegistry,
    job_id: &str,
    router: &IngestRouter,
    counters: &TransportCounters,
    params: &CsvJobParams,
    body: &[u8],
) -> Result<()> {
    let mut reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .from_reader(body);

    let headers = reader
        .headers()
        .map_err(|e| GatewayError::invalid_input("parse", e.to_string()))?
        .clone();
    let ts_idx = headers
        .iter()
        .position(|h| h == params.timestamp_column)
        .ok_or_else(|| {
            GatewayError::invalid_input(
                "parse",
                format!("timestamp column {:?} not found", params.timestamp_column),
            )
        })?;
    let value_idxs: Vec<(usize, &str)> = params
        .value_columns
        .iter()
        .filter_map(|col| {
            headers
                .iter()
                .position(|h| h == col)
                .map(|idx| (idx, col.as_str()))
        })
        .collect();
    if value_idxs.is_empty() {
        return Err(GatewayError::invalid_input(
            "parse",
            "none of the requested value columns exist",
        ));
    }

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(job_id, error = %e, "malformed CSV row skipped");
                registry.update(job_id, |s| {
                    s.processed_rows += 1;
                    s.rejected_rows += 1;
                });
                continue;
            }
        };

        let timestamp = record
            .get(ts_idx)
            .and_then(parse_timestamp_field)
            .unwrap_or(f64::NAN);

        let mut inserted = 0u64;
        let mut rejected = 0u64;
        for (idx, stream_id) in &value_idxs {
            let Some(raw) = record.get(*idx) else {
                rejected += 1;
                continue;
            };
            let Ok(value) = raw.parse::<f64>() else {
                rejected += 1;
                continue;
            };
            counters
                .received
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let point =
                DataPoint::from_parts(params.domain, &params.source_id, stream_id, value, timestamp);
            let _guard = super::InFlight::enter(counters);
            match router.route(point, "csv").await {
                Ok(_) => {
                    counters
                        .accepted
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    inserted += 1;
                }
                Err(e) if e.kind() == ErrorKind::Duplicate => {
                    counters
                        .accepted
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                Err(_) => {
                    counters
                        .rejected
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    rejected += 1;
                }
            }
        }

        registry.update(job_id, |s| {
            s.processed_rows += 1;
            s.inserted_rows += inserted;
            s.rejected_rows += rejected;
        });
    }

    Ok(())
}

/// Timestamp cells accept epoch seconds or ISO-8601.
fn parse_timestamp_field(raw: &str) -> Option<f64> {
    if let Ok(epoch) = raw.parse::<f64>() {
        return Some(epoch);
    }
    parse_iso8601(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_cells_accept_both_formats() {
        assert_eq!(parse_timestamp_field("1700000000.5"), Some(1_700_000_000.5));
        assert!(parse_timestamp_field("2026-01-15T10:30:00Z").is_some());
        assert!(parse_timestamp_field("yesterday").is_none());
    }

    #[test]
    fn registry_tracks_lifecycle() {
        let registry = CsvJobRegistry::new();
        registry.create("job-1");
        assert_eq!(registry.get("job-1").unwrap().status, JobState::Pending);
        registry.update("job-1", |s| {
            s.status = JobState::Running;
            s.processed_rows = 10;
        });
        let status = registry.get("job-1").unwrap();
        assert_eq!(status.status, JobState::Running);
        assert_eq!(status.processed_rows, 10);
        assert!(registry.get("missing").is_none());
    }
}
