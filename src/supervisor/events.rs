use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Oldest events are dropped beyond this many
const MAX_EVENTS: usize = 1000;

/// Service lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceEventKind {
    /// Service started
    Started,
    /// Factory or launch failed
    StartFailed,
    /// Execution unit exited unexpectedly
    Crashed,
    /// Restart limiter refused a restart
    RestartDenied,
    /// Service came back after a crash or an explicit restart
    Restarted,
    /// Service stopped
    Stopped,
    /// Service did not exit within the grace period and was abandoned
    StopTimedOut,
}

/// Service lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct ServiceEvent {
    /// Service name
    pub service: String,
    /// Event type
    pub kind: ServiceEventKind,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event details
    pub details: Option<String>,
}

/// Bounded in-memory history of lifecycle events
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<VecDeque<ServiceEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a service event
    pub fn record(&self, service: &str, kind: ServiceEventKind, details: Option<String>) {
        let event = ServiceEvent {
            service: service.to_string(),
            kind,
            timestamp: Utc::now(),
            details,
        };

        match self.events.lock() {
            Ok(mut events) => {
                events.push_back(event);
                if events.len() > MAX_EVENTS {
                    events.pop_front();
                }
            }
            Err(_) => tracing::debug!(service, ?kind, "Event log poisoned, dropping event"),
        }
    }

    /// Get recent events for a service, newest first
    pub fn service_events(&self, service: &str, limit: Option<usize>) -> Result<Vec<ServiceEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Lock("Failed to lock service events".to_string()))?;

        let limit = limit.unwrap_or(usize::MAX);
        Ok(events
            .iter()
            .rev()
            .filter(|e| e.service == service)
            .take(limit)
            .cloned()
            .collect())
    }

    /// Get all events, newest first
    pub fn all_events(&self, limit: Option<usize>) -> Result<Vec<ServiceEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| Error::Lock("Failed to lock service events".to_string()))?;

        let limit = limit.unwrap_or(usize::MAX);
        Ok(events.iter().rev().take(limit).cloned().collect())
    }

    /// Clear events
    pub fn clear(&self) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| Error::Lock("Failed to lock service events".to_string()))?
            .clear();
        Ok(())
    }
}
