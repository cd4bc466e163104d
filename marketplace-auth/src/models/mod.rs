//! Domain models for marketplace identities and security auditing.

mod audit_event;
mod identity;
mod role;

pub use audit_event::{AuditEvent, AuditEventType, AuditOutcome};
pub use identity::{
    canonical_subject, Identity, IdentityAttributes, IdentityId, IdentityRecord, PasswordDigest,
    UNASSIGNED_SUBJECT,
};
pub use role::Role;
