//! Opaque, globally unique identifiers for every persistent entity.
//!
//! Each id newtypes a [`Uuid`] so that, for example, a [`TaskId`] cannot be
//! passed where a [`SessionId`] is expected. All ids round-trip through
//! `TEXT` columns as their `to_string()`/`Uuid::parse_str` representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(SessionId);
uuid_id!(MessageId);
uuid_id!(TaskId);
uuid_id!(SubagentId);
uuid_id!(ApprovalId);
uuid_id!(ScheduleId);
uuid_id!(MemoryId);
uuid_id!(SwarmId);
uuid_id!(SwarmAgentId);
