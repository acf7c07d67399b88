//! Append-only JSONL record of payment resolutions.

use crate::error::{PortalError, Result};
use crate::resolver::{PaymentBinding, Resolution};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Journal {
    pub path: PathBuf,
    run_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

fn io_error(err: std::io::Error) -> PortalError {
    PortalError::Storage(err.to_string())
}

impl Journal {
    pub fn new(path: &Path, run_id: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_error)?;

        Ok(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            file,
        })
    }

    /// Open `<dir>/<run_id>.jsonl` for a fresh run id
    pub fn create_in(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(io_error)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        Self::new(&dir.join(format!("{}.jsonl", run_id)), &run_id)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line).map_err(io_error)?;
        self.file.flush().map_err(io_error)?;
        Ok(())
    }

    pub fn resolve_start(&mut self, invoice_id: &str, gateway: &str) -> Result<()> {
        self.log(
            "resolve_start",
            serde_json::json!({
                "invoice_id": invoice_id,
                "gateway": gateway,
            }),
        )
    }

    pub fn resolve_end(
        &mut self,
        binding: &PaymentBinding,
        resolution: &Resolution,
        duration_ms: u64,
    ) -> Result<()> {
        self.log(
            "resolve_end",
            serde_json::json!({
                "binding": binding,
                "resolution": resolution,
                "duration_ms": duration_ms,
            }),
        )
    }

    pub fn resolve_error(&mut self, binding: &PaymentBinding, error: &PortalError) -> Result<()> {
        self.log(
            "resolve_error",
            serde_json::json!({
                "binding": binding,
                "error": error.to_string(),
            }),
        )
    }
}
