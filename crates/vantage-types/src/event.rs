// Trigger Events
// The inbound occurrence that starts a run: a VCS webhook, a chat mention,
// a CLI invocation, an HTTP payload, or a cron tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of event that triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PrOpened,
    PrUpdated,
    PrClosed,
    IssueOpened,
    IssueComment,
    Cron,
    Manual,
    Webhook,
    ChatMention,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PrOpened => "pr_opened",
            EventKind::PrUpdated => "pr_updated",
            EventKind::PrClosed => "pr_closed",
            EventKind::IssueOpened => "issue_opened",
            EventKind::IssueComment => "issue_comment",
            EventKind::Cron => "cron",
            EventKind::Manual => "manual",
            EventKind::Webhook => "webhook",
            EventKind::ChatMention => "chat_mention",
        }
    }
}

/// Relationship between the triggering actor and the repository.
///
/// Ordering is permission rank: `Unknown` ranks lowest, `Owner` highest.
/// `hasMinPermission` in the expression language compares against this order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorAssociation {
    // The wire form uses lowercase for the unknown sentinel only.
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
    None,
    FirstTimer,
    FirstTimeContributor,
    Contributor,
    Collaborator,
    Member,
    Owner,
}

impl ActorAssociation {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorAssociation::Unknown => "unknown",
            ActorAssociation::None => "NONE",
            ActorAssociation::FirstTimer => "FIRST_TIMER",
            ActorAssociation::FirstTimeContributor => "FIRST_TIME_CONTRIBUTOR",
            ActorAssociation::Contributor => "CONTRIBUTOR",
            ActorAssociation::Collaborator => "COLLABORATOR",
            ActorAssociation::Member => "MEMBER",
            ActorAssociation::Owner => "OWNER",
        }
    }

    /// Parse the wire form (e.g. `"COLLABORATOR"`). Unrecognized input maps to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "OWNER" => ActorAssociation::Owner,
            "MEMBER" => ActorAssociation::Member,
            "COLLABORATOR" => ActorAssociation::Collaborator,
            "CONTRIBUTOR" => ActorAssociation::Contributor,
            "FIRST_TIME_CONTRIBUTOR" => ActorAssociation::FirstTimeContributor,
            "FIRST_TIMER" => ActorAssociation::FirstTimer,
            "NONE" => ActorAssociation::None,
            _ => ActorAssociation::Unknown,
        }
    }
}

/// The event a run was started for. Immutable for the lifetime of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: EventKind,
    /// Opaque event payload (webhook body, chat message, CLI args, ...).
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub actor_association: ActorAssociation,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            payload: Value::Null,
            actor_association: ActorAssociation::Unknown,
            timestamp: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_actor(mut self, association: ActorAssociation) -> Self {
        self.actor_association = association;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn association_ranks_by_permission() {
        assert!(ActorAssociation::Owner > ActorAssociation::Member);
        assert!(ActorAssociation::Member > ActorAssociation::Collaborator);
        assert!(ActorAssociation::Contributor > ActorAssociation::FirstTimer);
        assert!(ActorAssociation::None > ActorAssociation::Unknown);
    }

    #[test]
    fn association_parse_round_trips() {
        for assoc in [
            ActorAssociation::Owner,
            ActorAssociation::Member,
            ActorAssociation::Collaborator,
            ActorAssociation::Contributor,
            ActorAssociation::FirstTimeContributor,
            ActorAssociation::FirstTimer,
            ActorAssociation::None,
            ActorAssociation::Unknown,
        ] {
            assert_eq!(ActorAssociation::parse(assoc.as_str()), assoc);
        }
        assert_eq!(
            ActorAssociation::parse("something-else"),
            ActorAssociation::Unknown
        );
    }

    #[test]
    fn association_wire_casing() {
        assert_eq!(
            serde_json::to_string(&ActorAssociation::Owner).unwrap(),
            "\"OWNER\""
        );
        assert_eq!(
            serde_json::to_string(&ActorAssociation::Unknown).unwrap(),
            "\"unknown\""
        );
        let parsed: ActorAssociation = serde_json::from_str("\"unknown\"").unwrap();
        assert_eq!(parsed, ActorAssociation::Unknown);
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::PrOpened).unwrap();
        assert_eq!(json, "\"pr_opened\"");
    }
}
