//! Externally supplied client identity.
//!
//! Authentication is handled outside this crate; the sync client only needs
//! to know who it is acting for so it can join the right notification room.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of the connected party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            other => Err(CoreError::InvalidRole(other.to_string())),
        }
    }
}

/// Identity the channel is bound to.
///
/// A channel session is never shared across identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub role: Role,
    pub id: String,
}

impl Identity {
    /// Create an identity, rejecting blank ids.
    pub fn new(role: Role, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::InvalidIdentity("id must not be empty".to_string()));
        }
        Ok(Self { role, id })
    }

    pub fn buyer(id: impl Into<String>) -> Result<Self> {
        Self::new(Role::Buyer, id)
    }

    /// Server-side room key: `role:id`.
    pub fn room_key(&self) -> String {
        format!("{}:{}", self.role, self.id)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}
