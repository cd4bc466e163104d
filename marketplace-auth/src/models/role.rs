//! Marketplace roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of marketplace roles.
///
/// Stored role values are free text. Anything other than the exact-case
/// canonical token degrades to [`Role::Buyer`] instead of being rejected, so
/// records written by older deployments keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum Role {
    #[default]
    Buyer,
    Vendor,
    Admin,
    Superuser,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Buyer, Role::Vendor, Role::Admin, Role::Superuser];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "BUYER",
            Role::Vendor => "VENDOR",
            Role::Admin => "ADMIN",
            Role::Superuser => "SUPERUSER",
        }
    }

    /// Map a stored or requested role token onto the closed set.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "BUYER" => Role::Buyer,
            "VENDOR" => Role::Vendor,
            "ADMIN" => Role::Admin,
            "SUPERUSER" => Role::Superuser,
            other => {
                tracing::debug!(role = %other, "Unrecognized role value, falling back to buyer");
                Role::Buyer
            }
        }
    }

    /// Same as [`Role::from_stored`] for nullable columns.
    pub fn from_optional(value: Option<&str>) -> Self {
        value.map(Self::from_stored).unwrap_or_default()
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::from_stored(&value)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_tokens_map_exactly() {
        for role in Role::ALL {
            assert_eq!(Role::from_stored(role.as_str()), role);
        }
    }

    #[test]
    fn test_unrecognized_values_fall_back_to_buyer() {
        for value in ["", "vendor", "Vendor", "admin ", "ROOT", "SUPER_USER", "\u{0}"] {
            assert_eq!(Role::from_stored(value), Role::Buyer, "value {:?}", value);
        }
        assert_eq!(Role::from_optional(None), Role::Buyer);
        assert_eq!(Role::from_optional(Some("ADMIN")), Role::Admin);
    }

    #[test]
    fn test_serde_round_trip_is_lenient() {
        let json = serde_json::to_string(&Role::Vendor).unwrap();
        assert_eq!(json, "\"VENDOR\"");

        let parsed: Role = serde_json::from_str("\"not-a-role\"").unwrap();
        assert_eq!(parsed, Role::Buyer);
    }
}
