//! Identifiers and small enums shared across the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// A fresh random (v4) id.
            pub fn generate() -> Self {
                $name(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                $name(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name)
            }
        }
    };
}

uuid_id!(
    /// Unique id of a recorded transaction.
    TransactionId
);
uuid_id!(
    /// Unique id of an evaluation session.
    SessionId
);
uuid_id!(
    /// Unique id of a stored snapshot set (a seed for the sandbox).
    SnapshotSetId
);

/// Which resource store a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Production,
    Sandbox,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Production => write!(f, "production"),
            Backend::Sandbox => write!(f, "sandbox"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" => Ok(Backend::Production),
            "sandbox" => Ok(Backend::Sandbox),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// The kind of change a transaction made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

/// Lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Active,
    RolledBack,
    RollbackFailed,
}

impl TransactionStatus {
    /// Statuses reachable from `self` through an explicit status update.
    ///
    /// `RolledBack` is terminal. Re-marking a rolled-back transaction as
    /// rolled back is accepted by the log as a no-op and never reaches here.
    pub fn allowed_transitions(self) -> &'static [TransactionStatus] {
        match self {
            TransactionStatus::Active => &[
                TransactionStatus::RolledBack,
                TransactionStatus::RollbackFailed,
            ],
            TransactionStatus::RollbackFailed => &[
                TransactionStatus::RolledBack,
                TransactionStatus::RollbackFailed,
            ],
            TransactionStatus::RolledBack => &[],
        }
    }

    pub fn can_transition_to(self, to: TransactionStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Active => write!(f, "ACTIVE"),
            TransactionStatus::RolledBack => write!(f, "ROLLED_BACK"),
            TransactionStatus::RollbackFailed => write!(f, "ROLLBACK_FAILED"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(TransactionStatus::Active),
            "ROLLED_BACK" => Ok(TransactionStatus::RolledBack),
            "ROLLBACK_FAILED" => Ok(TransactionStatus::RollbackFailed),
            _ => Err(format!("unknown transaction status '{}'", s)),
        }
    }
}

/// Current UTC time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
