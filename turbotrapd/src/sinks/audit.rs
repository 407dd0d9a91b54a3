use crate::schema::Incident;
use crate::sinks::{DeliveryError, IncidentSink};
use async_trait::async_trait;
use log::error;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Incidents kept in memory for the `/api/incidents` surface.
const RECENT_INCIDENTS: usize = 50;

/// Synchronous audit record: one JSON line per incident, plus a bounded
/// in-memory tail for the query surface.
///
/// Contract: delivery never fails. The file is local with no external
/// resource dependency; an I/O fault is logged and swallowed so the bus
/// never retries or dead-letters audit entries.
pub struct AuditLogSink {
    path: PathBuf,
    recent: Mutex<VecDeque<Incident>>,
}

impl AuditLogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn recent(&self) -> Vec<Incident> {
        self.recent.lock().unwrap().iter().cloned().collect()
    }

    fn append_line(&self, line: &str) {
        if let Some(dir) = self.path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    error!("[audit] failed to append to {}: {e}", self.path.display());
                }
            }
            Err(e) => error!("[audit] failed to open {}: {e}", self.path.display()),
        }
    }
}

#[async_trait]
impl IncidentSink for AuditLogSink {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn deliver(&self, incident: &Incident) -> Result<(), DeliveryError> {
        {
            let mut recent = self.recent.lock().unwrap();
            recent.push_back(incident.clone());
            if recent.len() > RECENT_INCIDENTS {
                recent.pop_front();
            }
        }
        match serde_json::to_string(incident) {
            Ok(line) => self.append_line(&line),
            Err(e) => error!("[audit] failed to serialize incident {}: {e}", incident.id),
        }
        Ok(())
    }
}
