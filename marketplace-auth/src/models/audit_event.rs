//! Audit event model - security-relevant activity recorded by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    AuthenticationAttempt,
    AuthenticationSuccess,
    AuthenticationFailure,
    AccountLocked,
    SessionCreated,
    SessionRevoked,
    Logout,
    IdentityCreated,
    PasswordReset,
    RoleChanged,
    IdentityActivated,
    IdentityDeactivated,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::AuthenticationAttempt => "authentication_attempt",
            AuditEventType::AuthenticationSuccess => "authentication_success",
            AuditEventType::AuthenticationFailure => "authentication_failure",
            AuditEventType::AccountLocked => "account_locked",
            AuditEventType::SessionCreated => "session_created",
            AuditEventType::SessionRevoked => "session_revoked",
            AuditEventType::Logout => "logout",
            AuditEventType::IdentityCreated => "identity_created",
            AuditEventType::PasswordReset => "password_reset",
            AuditEventType::RoleChanged => "role_changed",
            AuditEventType::IdentityActivated => "identity_activated",
            AuditEventType::IdentityDeactivated => "identity_deactivated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Attempted,
    Success,
    Failure,
}

/// Append-only audit record. Never carries credential material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: AuditEventType,
    pub subject_id: Option<String>,
    pub outcome: AuditOutcome,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        subject_id: Option<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            subject_id,
            outcome,
            ip_address: None,
            user_agent: None,
            details: None,
            created_utc: Utc::now(),
        }
    }

    pub fn with_caller(mut self, ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip_address = ip_address.map(str::to_string);
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
