//! Identity model - durable marketplace accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::Role;

/// Token subject used for identities that have not been assigned an id yet.
pub const UNASSIGNED_SUBJECT: &str = "unassigned";

/// Identity identifier.
///
/// Older records carry numeric or free-text ids; new identities get a UUID.
/// Every variant renders to one canonical string, which is what token
/// subjects and id lookups use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentityId {
    Numeric(i64),
    Uuid(Uuid),
    Text(String),
}

impl IdentityId {
    pub fn generate() -> Self {
        IdentityId::Uuid(Uuid::new_v4())
    }

    /// Parse a canonical string back into the most specific variant.
    pub fn parse(value: &str) -> Self {
        if let Ok(n) = value.parse::<i64>() {
            IdentityId::Numeric(n)
        } else if let Ok(u) = Uuid::parse_str(value) {
            IdentityId::Uuid(u)
        } else {
            IdentityId::Text(value.to_string())
        }
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityId::Numeric(n) => write!(f, "{}", n),
            IdentityId::Uuid(u) => write!(f, "{}", u.hyphenated()),
            IdentityId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for IdentityId {
    fn from(value: i64) -> Self {
        IdentityId::Numeric(value)
    }
}

impl From<Uuid> for IdentityId {
    fn from(value: Uuid) -> Self {
        IdentityId::Uuid(value)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        IdentityId::Text(value.to_string())
    }
}

/// Canonical subject string for an optional identity id.
pub fn canonical_subject(id: Option<&IdentityId>) -> String {
    id.map(ToString::to_string)
        .unwrap_or_else(|| UNASSIGNED_SUBJECT.to_string())
}

/// Newtype for a password digest (PHC string). Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    pub fn new(digest: String) -> Self {
        Self(digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordDigest([REDACTED])")
    }
}

/// Identity as persisted in the identity store.
#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub email: String,
    pub password_digest: PasswordDigest,
    /// Free-text role column; coerced through [`Role::from_optional`].
    pub role: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub display_name: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl IdentityRecord {
    /// Create a new active record with a freshly generated id.
    pub fn new(
        email: String,
        password_digest: PasswordDigest,
        role: Role,
        attrs: IdentityAttributes,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: IdentityId::generate(),
            email,
            password_digest,
            role: Some(role.as_str().to_string()),
            is_active: attrs.is_active,
            email_verified: attrs.email_verified,
            phone_verified: attrs.phone_verified,
            display_name: attrs.display_name,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Caller-facing view of this record (no digest).
    pub fn to_identity(&self) -> Identity {
        Identity {
            id: Some(self.id.clone()),
            email: self.email.clone(),
            role: Role::from_optional(self.role.as_deref()),
            is_active: self.is_active,
            email_verified: self.email_verified,
            phone_verified: self.phone_verified,
            display_name: self.display_name.clone(),
        }
    }
}

/// Resolved identity handed to callers. Carries no credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Option<IdentityId>,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub display_name: Option<String>,
}

impl Identity {
    /// Subject string used for tokens issued to this identity.
    pub fn subject(&self) -> String {
        canonical_subject(self.id.as_ref())
    }
}

/// Optional attributes supplied at registration.
#[derive(Debug, Clone)]
pub struct IdentityAttributes {
    pub display_name: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub phone_verified: bool,
}

impl Default for IdentityAttributes {
    fn default() -> Self {
        Self {
            display_name: None,
            is_active: true,
            email_verified: false,
            phone_verified: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_is_canonical_for_every_id_shape() {
        let uuid = Uuid::new_v4();
        assert_eq!(canonical_subject(Some(&IdentityId::Numeric(42))), "42");
        assert_eq!(
            canonical_subject(Some(&IdentityId::Uuid(uuid))),
            uuid.to_string()
        );
        assert_eq!(
            canonical_subject(Some(&IdentityId::Text("legacy-7".to_string()))),
            "legacy-7"
        );
        assert_eq!(canonical_subject(None), UNASSIGNED_SUBJECT);
    }

    #[test]
    fn test_parse_recovers_the_same_canonical_form() {
        for id in [
            IdentityId::Numeric(-3),
            IdentityId::generate(),
            IdentityId::Text("abc".to_string()),
        ] {
            let rendered = id.to_string();
            assert_eq!(IdentityId::parse(&rendered), id);
        }
    }

    #[test]
    fn test_digest_is_redacted_in_debug_output() {
        let record = IdentityRecord::new(
            "a@x.com".to_string(),
            PasswordDigest::new("$argon2id$v=19$secret".to_string()),
            Role::Vendor,
            IdentityAttributes::default(),
        );
        let rendered = format!("{:?}", record);
        assert!(!rendered.contains("$argon2id"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_to_identity_coerces_unknown_role() {
        let mut record = IdentityRecord::new(
            "b@x.com".to_string(),
            PasswordDigest::new("digest".to_string()),
            Role::Admin,
            IdentityAttributes::default(),
        );
        record.role = Some("moderator".to_string());

        let identity = record.to_identity();
        assert_eq!(identity.role, Role::Buyer);
        assert_eq!(identity.email, "b@x.com");
        assert_eq!(identity.id, Some(record.id.clone()));
    }
}
