//! Speaker selection.
//!
//! The router is a pure function of `(variant, last speaker, last classification,
//! transcript length)`. It holds no state, so a recorded transcript can always be replayed
//! and the next speaker predicted without a live model.
//!
//! ```rust
//! use cognitionflow::classifier::Classification;
//! use cognitionflow::role::RoleId;
//! use cognitionflow::router::{next_role, ConversationVariant};
//!
//! let v = ConversationVariant::ThreeRole;
//! assert_eq!(next_role(v, Some(RoleId::Generator), Classification::CodeBearing, 2), RoleId::Executor);
//! assert_eq!(next_role(v, Some(RoleId::Executor), Classification::ExecutionOutput, 3), RoleId::Reviewer);
//! assert_eq!(next_role(v, Some(RoleId::Reviewer), Classification::Plain, 4), RoleId::Generator);
//! ```

use crate::cognitionflow::classifier::{Classification, ClassifiedMessage};
use crate::cognitionflow::role::RoleId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default cap on total turns (seed included) for the review loop.
pub const THREE_ROLE_ROUND_CAP: usize = 12;
/// Default cap on total turns (seed included) for the alternating variant.
pub const TWO_ROLE_ROUND_CAP: usize = 20;

/// Which cast and turn-taking policy a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationVariant {
    /// Coordinator and Generator alternate.
    TwoRole,
    /// Generator, Executor and Reviewer in a review loop.
    #[default]
    ThreeRole,
}

impl ConversationVariant {
    /// Role credited with the seed turn.
    pub fn entry_role(&self) -> RoleId {
        match self {
            ConversationVariant::TwoRole => RoleId::Coordinator,
            ConversationVariant::ThreeRole => RoleId::Executor,
        }
    }

    /// Role asked for the first reply after the seed.
    pub fn first_speaker(&self) -> RoleId {
        RoleId::Generator
    }

    pub fn roles(&self) -> &'static [RoleId] {
        match self {
            ConversationVariant::TwoRole => &[RoleId::Coordinator, RoleId::Generator],
            ConversationVariant::ThreeRole => {
                &[RoleId::Executor, RoleId::Generator, RoleId::Reviewer]
            }
        }
    }

    pub fn default_round_cap(&self) -> usize {
        match self {
            ConversationVariant::TwoRole => TWO_ROLE_ROUND_CAP,
            ConversationVariant::ThreeRole => THREE_ROLE_ROUND_CAP,
        }
    }

    /// Completion predicate for a just-appended turn.
    pub fn is_terminal(&self, speaker: RoleId, message: &ClassifiedMessage) -> bool {
        if message.classification != Classification::Completion {
            return false;
        }
        match self {
            ConversationVariant::ThreeRole => speaker == RoleId::Reviewer,
            ConversationVariant::TwoRole => {
                speaker == RoleId::Coordinator && message.fragments.is_empty()
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationVariant::TwoRole => "two_role",
            ConversationVariant::ThreeRole => "three_role",
        }
    }
}

impl FromStr for ConversationVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "two_role" | "two" => Ok(ConversationVariant::TwoRole),
            "three_role" | "three" => Ok(ConversationVariant::ThreeRole),
            other => Err(format!("unknown conversation variant: {}", other)),
        }
    }
}

/// Decide who speaks next.
///
/// The classification and transcript length (seed included) are part of the routing
/// input, but the current policies resolve every case from the last speaker alone.
pub fn next_role(
    variant: ConversationVariant,
    last_speaker: Option<RoleId>,
    _last_classification: Classification,
    _transcript_len: usize,
) -> RoleId {
    match variant {
        ConversationVariant::TwoRole => match last_speaker {
            Some(RoleId::Generator) => RoleId::Coordinator,
            _ => RoleId::Generator,
        },
        ConversationVariant::ThreeRole => match last_speaker {
            // Execution reports and executor status notes both go to review.
            Some(RoleId::Executor) => RoleId::Reviewer,
            Some(RoleId::Generator) => RoleId::Executor,
            Some(RoleId::Reviewer) => RoleId::Generator,
            _ => RoleId::Generator,
        },
    }
}
