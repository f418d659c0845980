//! Status and role enumerations stored as short `VARCHAR` columns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "invalid {} '{}'",
                        stringify!($name).to_lowercase(),
                        other
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Expert,
    Organization,
}

string_enum!(UserRole {
    Expert => "expert",
    Organization => "organization",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Open,
    InProgress,
    Completed,
    Cancelled,
}

string_enum!(CampaignStatus {
    Draft => "draft",
    Open => "open",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl CampaignStatus {
    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Open)
                | (Draft, Cancelled)
                | (Open, InProgress)
                | (Open, Cancelled)
                | (Open, Draft)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Cancelled)
    }

    /// Owners may still edit title, budget and the like.
    pub fn is_editable(self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Open)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

string_enum!(ProposalStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Withdrawn => "withdrawn",
});

impl ProposalStatus {
    pub fn is_decided(self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

string_enum!(TaskStatus {
    Todo => "todo",
    InProgress => "in_progress",
    Done => "done",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookmarkKind {
    Campaign,
    Expert,
}

string_enum!(BookmarkKind {
    Campaign => "campaign",
    Expert => "expert",
});
