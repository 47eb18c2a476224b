//! IncidentLog - Finalized Incident Recording (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Allocate monotone incident ids
//! - Store finalized incidents in a bounded ring buffer
//! - Provide queries and CSV export for the reporting surface

use crate::incident_recorder::Incident;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// IncidentLog instance
pub struct IncidentLog {
    buffer: RwLock<VecDeque<Incident>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl IncidentLog {
    /// Create new IncidentLog
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next incident id.
    ///
    /// Ids are handed out at incident open so face artifacts can be keyed
    /// before finalize; they stay unique across ring-buffer eviction.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Append a finalized incident, evicting the oldest beyond capacity.
    pub async fn push(&self, incident: Incident) {
        let mut buffer = self.buffer.write().await;
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        tracing::debug!(incident_id = incident.id, "Incident added to log");
        buffer.push_back(incident);
    }

    /// Latest incidents, newest first
    pub async fn get_latest(&self, count: usize) -> Vec<Incident> {
        let buffer = self.buffer.read().await;
        buffer.iter().rev().take(count).cloned().collect()
    }

    /// Number of retained incidents
    pub async fn count(&self) -> usize {
        let buffer = self.buffer.read().await;
        buffer.len()
    }

    /// Timestamp of the most recent incident
    pub async fn last_timestamp(&self) -> Option<String> {
        let buffer = self.buffer.read().await;
        buffer.back().map(|i| i.timestamp.clone())
    }

    /// Export all retained incidents as CSV, oldest first.
    ///
    /// One row per incident: id, timestamp, location, Yes/No for faces.
    pub async fn to_csv(&self) -> String {
        let buffer = self.buffer.read().await;
        let mut out = String::from("ID,Timestamp,Location,Faces Detected\n");
        for incident in buffer.iter() {
            out.push_str(&format!(
                "{},{},{},{}\n",
                incident.id,
                csv_field(&incident.timestamp),
                csv_field(&incident.location),
                if incident.faces_detected { "Yes" } else { "No" }
            ));
        }
        out
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
