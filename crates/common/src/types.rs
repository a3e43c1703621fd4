use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

// ── Event vocabulary ─────────────────────────────────────────────────────────

/// Kinds of protocol occurrences a tenant can subscribe to.
///
/// The wire names are the variant names verbatim (`"Message"`, `"ReadReceipt"`,
/// ...). `All` is the subscription wildcard and is never raised by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Message,
    ReadReceipt,
    HistorySync,
    ChatPresence,
    Presence,
    Connected,
    Disconnected,
    #[serde(rename = "QR")]
    Qr,
    LoggedOut,
    GroupInfo,
    JoinedGroup,
    CallOffer,
    All,
}

impl EventType {
    /// Every supported name, in display order.
    pub const ALL: [EventType; 13] = [
        EventType::Message,
        EventType::ReadReceipt,
        EventType::HistorySync,
        EventType::ChatPresence,
        EventType::Presence,
        EventType::Connected,
        EventType::Disconnected,
        EventType::Qr,
        EventType::LoggedOut,
        EventType::GroupInfo,
        EventType::JoinedGroup,
        EventType::CallOffer,
        EventType::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "Message",
            Self::ReadReceipt => "ReadReceipt",
            Self::HistorySync => "HistorySync",
            Self::ChatPresence => "ChatPresence",
            Self::Presence => "Presence",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Qr => "QR",
            Self::LoggedOut => "LoggedOut",
            Self::GroupInfo => "GroupInfo",
            Self::JoinedGroup => "JoinedGroup",
            Self::CallOffer => "CallOffer",
            Self::All => "All",
        }
    }

    /// Whether the name is part of the supported vocabulary.
    pub fn is_supported(name: &str) -> bool {
        name.parse::<EventType>().is_ok()
    }

    /// Events that mean the session is no longer usable.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::Disconnected | Self::LoggedOut)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for event in EventType::ALL {
            assert_eq!(event.as_str().parse::<EventType>().unwrap(), event);
        }
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&EventType::Qr).unwrap();
        assert_eq!(json, "\"QR\"");
        let parsed: EventType = serde_json::from_str("\"ReadReceipt\"").unwrap();
        assert_eq!(parsed, EventType::ReadReceipt);
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!(EventType::is_supported("Message"));
        assert!(!EventType::is_supported("message"));
        assert!(!EventType::is_supported("Qr"));
        assert!(!EventType::is_supported(""));
    }

    #[test]
    fn session_ending_events() {
        assert!(EventType::Disconnected.ends_session());
        assert!(EventType::LoggedOut.ends_session());
        assert!(!EventType::Connected.ends_session());
    }
}
