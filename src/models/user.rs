//! Roles carried in admin API tokens.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    /// Manages categories and responses, triggers manual runs.
    Admin,
    /// Read-only access to rules, runs and statistics.
    Attendant,
    /// Messaging gateway posting inbound events.
    Gateway,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Admin => "Admin",
            UserRole::Attendant => "Attendant",
            UserRole::Gateway => "Gateway",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(UserRole::Admin),
            "Attendant" => Ok(UserRole::Attendant),
            "Gateway" => Ok(UserRole::Gateway),
            other => Err(format!("unknown role: {other}")),
        }
    }
}
