// audit.rs

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

use crate::error::{PreprocessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditEventType {
    PcaAnalysis,
    MissingValueAnalysis,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEventType::PcaAnalysis => f.write_str("PCAAnalysisEvent"),
            AuditEventType::MissingValueAnalysis => f.write_str("MissingValueAnalysisEvent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub experiment_id: u64,
    pub event_type: AuditEventType,
    pub note: String,
    pub date: DateTime<Utc>,
}

/// Records that an analysis modified an experiment.
pub trait AuditTrailService: Send + Sync {
    fn add_update_event(&self, experiment_id: u64, event_type: AuditEventType, note: &str) -> Result<()>;
}

/// Keeps events in memory; the CLI prints them when a command finishes.
#[derive(Debug, Default)]
pub struct InMemoryAuditTrail {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_for(&self, experiment_id: u64) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.experiment_id == experiment_id)
            .collect()
    }
}

impl AuditTrailService for InMemoryAuditTrail {
    fn add_update_event(&self, experiment_id: u64, event_type: AuditEventType, note: &str) -> Result<()> {
        let event = AuditEvent {
            experiment_id,
            event_type,
            note: note.to_string(),
            date: Utc::now(),
        };
        info!(
            "Audit: experiment {} {} at {}: {}",
            experiment_id,
            event_type,
            event.date.to_rfc3339(),
            note
        );
        self.events
            .lock()
            .map_err(|_| PreprocessError::IllegalState("audit trail lock poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_recorded_per_experiment() {
        let trail = InMemoryAuditTrail::new();
        trail
            .add_update_event(1, AuditEventType::PcaAnalysis, "SVD computed")
            .unwrap();
        trail
            .add_update_event(2, AuditEventType::MissingValueAnalysis, "Computed missing value data")
            .unwrap();
        assert_eq!(trail.events().len(), 2);
        let second = trail.events_for(2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event_type, AuditEventType::MissingValueAnalysis);
        assert_eq!(second[0].note, "Computed missing value data");
    }
}
