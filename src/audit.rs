//! Append-only JSONL log of authentication events.
//!
//! Each line carries a timestamp, the run id and the event type. Ticket
//! values and passwords are never written.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::ticket::AuthTicket;

pub struct AuditLog {
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

impl AuditLog {
    pub fn new(path: &Path, run_id: &str) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            file,
        })
    }

    /// Open `<dir>/<run_id>.jsonl` with a fresh run id, creating `dir`
    pub fn create_in(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
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
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn ticket_issued(&mut self, ticket: &AuthTicket) -> Result<()> {
        self.log(
            "ticket_issued",
            serde_json::json!({
                "name": ticket.name,
                "persistent": ticket.is_persistent,
                "expiration": ticket.expiration,
            }),
        )
    }

    pub fn ticket_decoded(&mut self, ticket: &AuthTicket) -> Result<()> {
        self.log(
            "ticket_decoded",
            serde_json::json!({ "name": ticket.name, "expiration": ticket.expiration }),
        )
    }

    /// A ticket that failed to decode. `reason` is a fixed category, not
    /// the ticket content.
    pub fn ticket_rejected(&mut self, reason: &str) -> Result<()> {
        self.log("ticket_rejected", serde_json::json!({ "reason": reason }))
    }

    pub fn ticket_renewed(&mut self, ticket: &AuthTicket) -> Result<()> {
        self.log(
            "ticket_renewed",
            serde_json::json!({
                "name": ticket.name,
                "issue_date": ticket.issue_date,
                "expiration": ticket.expiration,
            }),
        )
    }

    pub fn signed_out(&mut self, cookie_name: &str) -> Result<()> {
        self.log("signed_out", serde_json::json!({ "cookie_name": cookie_name }))
    }

    pub fn password_hashed(&mut self, format: &str) -> Result<()> {
        self.log("password_hashed", serde_json::json!({ "format": format }))
    }
}
