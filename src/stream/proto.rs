//! Realtime frontend wire messages.
//!
//! Each `data` frame is a JSON object keyed by a fully qualified type name.
//! Only the fields the client uses are modelled; everything else is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::urn::Urn;

pub const DECORATED_EVENT_KEY: &str = "com.linkedin.realtimefrontend.DecoratedEvent";
pub const HEARTBEAT_KEY: &str = "com.linkedin.realtimefrontend.Heartbeat";
pub const CLIENT_CONNECTION_KEY: &str = "com.linkedin.realtimefrontend.ClientConnection";

/// Topic families of the decorated event envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopicKind {
    Messages,
    SeenReceipts,
    TypingIndicators,
    Conversations,
    Other,
}

impl TopicKind {
    /// Classifies a topic urn such as
    /// `urn:li-realtime:messagesTopic:urn:li-realtime:myself`.
    pub fn from_topic(topic: &str) -> Self {
        let name = topic
            .split(':')
            .find(|segment| segment.ends_with("Topic"))
            .unwrap_or_default();
        match name {
            "messagesTopic" => Self::Messages,
            "messageSeenReceiptsTopic" => Self::SeenReceipts,
            "typingIndicatorsTopic" => Self::TypingIndicators,
            "conversationsTopic" | "conversationsBroadcastTopic" => Self::Conversations,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecoratedEventMsg {
    pub topic: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_server_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConnectionMsg {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEventPayloadMsg {
    pub event: ConversationEventMsg,
    #[serde(default)]
    pub previous_event_in_conversation: Option<Urn>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEventMsg {
    pub entity_urn: Urn,
    #[serde(default)]
    pub created_at: Option<u64>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub from: Option<FromMsg>,
    #[serde(default)]
    pub event_content: Option<EventContentMsg>,
    #[serde(default)]
    pub previous_event_in_conversation: Option<Urn>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FromMsg {
    #[serde(default, rename = "com.linkedin.voyager.messaging.MessagingMember")]
    pub messaging_member: Option<MessagingMemberMsg>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagingMemberMsg {
    #[serde(default)]
    pub entity_urn: Option<Urn>,
    #[serde(default)]
    pub mini_profile: Option<MiniProfileMsg>,
    #[serde(default)]
    pub alternate_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MiniProfileMsg {
    #[serde(default)]
    pub entity_urn: Option<Urn>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EventContentMsg {
    #[serde(default, rename = "com.linkedin.voyager.messaging.event.MessageEvent")]
    pub message_event: Option<MessageEventMsg>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEventMsg {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub recalled_at: Option<u64>,
    #[serde(default)]
    pub attributed_body: Option<AttributedBodyMsg>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMsg>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AttributedBodyMsg {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMsg {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub byte_size: u64,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub reference: Option<AttachmentReferenceMsg>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AttachmentReferenceMsg {
    #[serde(default)]
    pub string: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayloadMsg {
    pub event_urn: Urn,
    pub reaction_summary: ReactionSummaryMsg,
    #[serde(default)]
    pub reaction_added: bool,
    #[serde(default)]
    pub actor_mini_profile_urn: Option<Urn>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummaryMsg {
    pub emoji: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub first_reacted_at: Option<u64>,
    #[serde(default)]
    pub viewer_reacted: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeenReceiptPayloadMsg {
    pub from_entity: Urn,
    pub seen_receipt: SeenReceiptMsg,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeenReceiptMsg {
    pub event_urn: Urn,
    pub seen_at: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicatorPayloadMsg {
    pub conversation: Urn,
    pub from_entity: Urn,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayloadMsg {
    pub conversation: ConversationMsg,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMsg {
    pub entity_urn: Urn,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default)]
    pub unread_count: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub muted: Option<bool>,
    #[serde(default)]
    pub archived: Option<bool>,
    #[serde(default)]
    pub last_activity_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ConversationEventPayloadMsg, DecoratedEventMsg, TopicKind};

    #[test]
    fn classifies_realtime_topics() {
        assert_eq!(
            TopicKind::from_topic("urn:li-realtime:messagesTopic:urn:li-realtime:myself"),
            TopicKind::Messages
        );
        assert_eq!(
            TopicKind::from_topic("urn:li-realtime:typingIndicatorsTopic:urn:li-realtime:myself"),
            TopicKind::TypingIndicators
        );
        assert_eq!(
            TopicKind::from_topic("urn:li-realtime:messageSeenReceiptsTopic:urn:li-realtime:myself"),
            TopicKind::SeenReceipts
        );
        assert_eq!(
            TopicKind::from_topic("urn:li-realtime:conversationsTopic:urn:li-realtime:myself"),
            TopicKind::Conversations
        );
        assert_eq!(
            TopicKind::from_topic("urn:li-realtime:presenceStatusTopic:urn:li-realtime:myself"),
            TopicKind::Other
        );
    }

    #[test]
    fn decorated_event_ignores_unmodelled_fields() {
        let msg: DecoratedEventMsg = serde_json::from_value(json!({
            "topic": "urn:li-realtime:messagesTopic:urn:li-realtime:myself",
            "publisherTrackingId": "abc",
            "leftServerAt": 1_700_000_000_123_u64,
            "payload": {}
        }))
        .expect("decorated event");
        assert_eq!(msg.left_server_at, Some(1_700_000_000_123));
        assert_eq!(msg.id, None);
    }

    #[test]
    fn message_payload_reads_nested_member_and_content() {
        let payload: ConversationEventPayloadMsg = serde_json::from_value(json!({
            "event": {
                "entityUrn": "urn:li:fs_event:(2-conv==,5-evt==)",
                "createdAt": 1_700_000_000_000_u64,
                "from": {
                    "com.linkedin.voyager.messaging.MessagingMember": {
                        "miniProfile": {"firstName": "Ada", "lastName": "Lovelace"}
                    }
                },
                "eventContent": {
                    "com.linkedin.voyager.messaging.event.MessageEvent": {"body": "hello"}
                }
            }
        }))
        .expect("payload");
        let member = payload
            .event
            .from
            .and_then(|from| from.messaging_member)
            .expect("member");
        assert_eq!(
            member.mini_profile.and_then(|profile| profile.first_name),
            Some("Ada".to_string())
        );
        assert_eq!(
            payload
                .event
                .event_content
                .and_then(|content| content.message_event)
                .map(|message| message.body),
            Some("hello".to_string())
        );
    }
}
