use std::fmt;

use serde::{Deserialize, Serialize};

/// Interview states in their fixed order; `Submit` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntakeState {
    Welcome,
    ModeSelect,
    Identity,
    BusinessContext,
    Needs,
    Scheduling,
    Summary,
    Submit,
}

impl IntakeState {
    pub const ORDER: [IntakeState; 8] = [
        IntakeState::Welcome,
        IntakeState::ModeSelect,
        IntakeState::Identity,
        IntakeState::BusinessContext,
        IntakeState::Needs,
        IntakeState::Scheduling,
        IntakeState::Summary,
        IntakeState::Submit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "WELCOME",
            Self::ModeSelect => "MODE_SELECT",
            Self::Identity => "IDENTITY",
            Self::BusinessContext => "BUSINESS_CONTEXT",
            Self::Needs => "NEEDS",
            Self::Scheduling => "SCHEDULING",
            Self::Summary => "SUMMARY",
            Self::Submit => "SUBMIT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WELCOME" => Some(Self::Welcome),
            "MODE_SELECT" => Some(Self::ModeSelect),
            "IDENTITY" => Some(Self::Identity),
            "BUSINESS_CONTEXT" => Some(Self::BusinessContext),
            "NEEDS" => Some(Self::Needs),
            "SCHEDULING" => Some(Self::Scheduling),
            "SUMMARY" => Some(Self::Summary),
            "SUBMIT" => Some(Self::Submit),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submit)
    }

    /// Immediate successor in the fixed order; `Submit` maps to itself.
    pub fn successor(&self) -> Self {
        let index = Self::ORDER.iter().position(|state| state == self).unwrap_or(0);
        Self::ORDER.get(index + 1).copied().unwrap_or(Self::Submit)
    }
}

impl fmt::Display for IntakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    Prospect,
    Client,
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prospect => "prospect",
            Self::Client => "client",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "prospect" => Some(Self::Prospect),
            "client" => Some(Self::Client),
            _ => None,
        }
    }
}

/// Who authored a turn. Only `Contact` turns are validated and advance the flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Contact,
    System,
    Staff,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::System => "system",
            Self::Staff => "staff",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contact" => Some(Self::Contact),
            "system" => Some(Self::System),
            "staff" => Some(Self::Staff),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: IntakeState,
    pub to: IntakeState,
    /// True exactly when this turn moved a non-terminal conversation into `Submit`.
    pub reached_terminal: bool,
}

#[cfg(test)]
mod tests {
    use super::{ConversationMode, IntakeState, SenderRole};

    #[test]
    fn state_round_trips_from_storage_encoding() {
        for state in IntakeState::ORDER {
            assert_eq!(IntakeState::parse(state.as_str()), Some(state));
        }
        assert_eq!(IntakeState::parse("nope"), None);
    }

    #[test]
    fn successor_follows_fixed_order_and_submit_absorbs() {
        assert_eq!(IntakeState::Welcome.successor(), IntakeState::ModeSelect);
        assert_eq!(IntakeState::Summary.successor(), IntakeState::Submit);
        assert_eq!(IntakeState::Submit.successor(), IntakeState::Submit);
    }

    #[test]
    fn roles_and_modes_parse_case_insensitively() {
        assert_eq!(SenderRole::parse("Contact"), Some(SenderRole::Contact));
        assert_eq!(SenderRole::parse("bot"), None);
        assert_eq!(ConversationMode::parse(" CLIENT "), Some(ConversationMode::Client));
    }
}
