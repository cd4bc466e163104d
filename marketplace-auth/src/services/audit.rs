//! Audit sinks for security events.
//!
//! Recording is fire-and-forget from the caller's point of view: a sink
//! failure is logged and never fails the operation that produced the event.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::{AuditEvent, AuditEventType, AuditOutcome};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), anyhow::Error>;
}

/// Record an event, swallowing and logging sink failures.
pub async fn record_quietly(sink: &dyn AuditSink, event: AuditEvent) {
    let event_type = event.event_type;
    if let Err(e) = sink.record(event).await {
        tracing::error!(
            error = %e,
            event_type = event_type.as_str(),
            "Failed to write security audit event"
        );
    }
}

/// Writes audit events to the structured log under the `security_audit` target.
#[derive(Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), anyhow::Error> {
        let details = event
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();

        match event.outcome {
            AuditOutcome::Failure => tracing::warn!(
                target: "security_audit",
                event_id = %event.event_id,
                event_type = event.event_type.as_str(),
                subject_id = event.subject_id.as_deref().unwrap_or("-"),
                outcome = ?event.outcome,
                ip_address = event.ip_address.as_deref().unwrap_or("-"),
                user_agent = event.user_agent.as_deref().unwrap_or("-"),
                details = %details,
                "Security event"
            ),
            _ => tracing::info!(
                target: "security_audit",
                event_id = %event.event_id,
                event_type = event.event_type.as_str(),
                subject_id = event.subject_id.as_deref().unwrap_or("-"),
                outcome = ?event.outcome,
                ip_address = event.ip_address.as_deref().unwrap_or("-"),
                user_agent = event.user_agent.as_deref().unwrap_or("-"),
                details = %details,
                "Security event"
            ),
        }
        Ok(())
    }
}

/// Keeps events in memory for inspection.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `record` fail, as if the audit store were down.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<AuditEventType> {
        self.events().iter().map(|e| e.event_type).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("audit store unavailable");
        }
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("Audit sink mutex poisoned: {}", e))?
            .push(event);
        Ok(())
    }
}
