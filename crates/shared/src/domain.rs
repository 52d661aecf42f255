use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// Chat platform snowflakes.
id_newtype!(UserId);
id_newtype!(ChannelId);
id_newtype!(MessageId);

// Ledger row ids.
id_newtype!(RunId);
id_newtype!(EntryId);

/// Lifecycle state of a ledger entry. `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Caught,
    Dead,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Caught => "caught",
            EntryStatus::Dead => "dead",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Dead)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown entry status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for EntryStatus {
    type Err = UnknownStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "caught" => Ok(EntryStatus::Caught),
            "dead" => Ok(EntryStatus::Dead),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
