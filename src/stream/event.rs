//! Typed realtime events and the frame payload decoder.
//!
//! Payloads whose shape is not recognised become [`Event::Unknown`] so new
//! backend event types never stall the stream. Only payloads that are broken
//! (not JSON, or a known shape with wrong field types) fail with
//! [`DecodeError::Corrupt`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::stream::frame::RawFrame;
use crate::stream::proto::{
    ClientConnectionMsg, ConversationEventPayloadMsg, ConversationPayloadMsg, DecoratedEventMsg,
    ReactionPayloadMsg, SeenReceiptPayloadMsg, TopicKind, TypingIndicatorPayloadMsg,
    CLIENT_CONNECTION_KEY, DECORATED_EVENT_KEY, HEARTBEAT_KEY,
};
use crate::urn::Urn;

/// Fields shared by every event variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventHeader {
    /// Stable identity of the logical event, used for dedup.
    pub event_id: String,
    pub conversation_id: Option<String>,
    /// Milliseconds since the unix epoch.
    pub timestamp_ms: u64,
    /// Per-conversation ordering hint when the backend supplies one.
    pub sequence_hint: Option<u64>,
}

/// File attached to a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub id: Option<String>,
    pub name: String,
    pub media_type: String,
    pub byte_size: u64,
    pub url: Option<String>,
}

/// A message was sent, edited or recalled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub header: EventHeader,
    pub event_urn: Urn,
    pub sender: Option<Urn>,
    pub sender_name: Option<String>,
    pub body: String,
    pub subject: Option<String>,
    pub subtype: Option<String>,
    pub attachments: Vec<Attachment>,
    pub recalled: bool,
    pub previous_event: Option<Urn>,
}

/// A participant has seen a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiptEvent {
    pub header: EventHeader,
    pub reader: Urn,
    pub seen_event: Urn,
    pub seen_at_ms: u64,
}

/// A participant is typing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceEvent {
    pub header: EventHeader,
    pub conversation: Urn,
    pub actor: Urn,
}

/// Conversation state changed (read, renamed, muted, archived, ...).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationMetaEvent {
    pub header: EventHeader,
    pub conversation: Urn,
    pub action: Option<String>,
    pub read: Option<bool>,
    pub unread_count: Option<u64>,
    pub name: Option<String>,
    pub muted: Option<bool>,
    pub archived: Option<bool>,
}

/// A reaction on a message was added or removed. `count` is the total for
/// `emoji` after the change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionEvent {
    pub header: EventHeader,
    pub message: Urn,
    pub actor: Option<Urn>,
    pub emoji: String,
    pub added: bool,
    pub count: u64,
    pub viewer_reacted: bool,
}

/// Well-formed payload of a shape this crate does not model, kept raw.
#[derive(Clone, Debug, PartialEq)]
pub struct UnknownEvent {
    pub header: EventHeader,
    pub topic: Option<String>,
    pub raw: Value,
}

/// One logical realtime event, as handed to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Message(MessageEvent),
    Receipt(ReceiptEvent),
    Presence(PresenceEvent),
    ConversationMeta(ConversationMetaEvent),
    Reaction(ReactionEvent),
    Unknown(UnknownEvent),
}

/// Variant tag of an [`Event`], used to filter subscriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Receipt,
    Presence,
    ConversationMeta,
    Reaction,
    Unknown,
}

impl Event {
    /// Fields shared by every variant.
    pub fn header(&self) -> &EventHeader {
        match self {
            Self::Message(event) => &event.header,
            Self::Receipt(event) => &event.header,
            Self::Presence(event) => &event.header,
            Self::ConversationMeta(event) => &event.header,
            Self::Reaction(event) => &event.header,
            Self::Unknown(event) => &event.header,
        }
    }

    /// Dedup identity; identical across redeliveries of the same event.
    pub fn event_id(&self) -> &str {
        &self.header().event_id
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.header().conversation_id.as_deref()
    }

    /// Variant tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::Receipt(_) => EventKind::Receipt,
            Self::Presence(_) => EventKind::Presence,
            Self::ConversationMeta(_) => EventKind::ConversationMeta,
            Self::Reaction(_) => EventKind::Reaction,
            Self::Unknown(_) => EventKind::Unknown,
        }
    }
}

/// Outcome of decoding one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedFrame {
    Event(Event),
    /// Keepalive with no content.
    Heartbeat,
    /// First frame of a connection, naming it.
    ClientConnection { connection_id: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("corrupt payload: {0}")]
    Corrupt(String),
}

/// Frame payload decoder with running counters.
#[derive(Debug, Default)]
pub struct EventDecoder {
    decoded: u64,
    skipped: u64,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, frame: &RawFrame) -> Result<DecodedFrame, DecodeError> {
        let result = decode_frame(frame);
        match result {
            Ok(_) => self.decoded += 1,
            Err(_) => self.skipped += 1,
        }
        result
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Frames dropped as corrupt so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

pub fn decode_frame(frame: &RawFrame) -> Result<DecodedFrame, DecodeError> {
    let value: Value = serde_json::from_slice(&frame.data)
        .map_err(|err| DecodeError::Corrupt(format!("payload is not json: {err}")))?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::Corrupt(
            "payload is not a json object".to_string(),
        ));
    };

    if object.contains_key(HEARTBEAT_KEY) {
        return Ok(DecodedFrame::Heartbeat);
    }

    if let Some(connection) = object.remove(CLIENT_CONNECTION_KEY) {
        let connection: ClientConnectionMsg = typed(connection, "client connection")?;
        return Ok(DecodedFrame::ClientConnection {
            connection_id: connection.id,
        });
    }

    if let Some(decorated) = object.remove(DECORATED_EVENT_KEY) {
        let decorated: DecoratedEventMsg = typed(decorated, "decorated event")?;
        return decode_decorated(decorated, frame).map(DecodedFrame::Event);
    }

    let raw = Value::Object(object);
    let envelope = Envelope {
        id: frame.id.clone(),
        timestamp_ms: None,
        sequence_hint: None,
    };
    Ok(DecodedFrame::Event(unknown(envelope, None, raw)))
}

struct Envelope {
    id: Option<String>,
    timestamp_ms: Option<u64>,
    sequence_hint: Option<u64>,
}

impl Envelope {
    fn header(
        &self,
        fallback_id: impl FnOnce() -> String,
        conversation: Option<&Urn>,
        timestamp_ms: Option<u64>,
    ) -> EventHeader {
        EventHeader {
            event_id: self.id.clone().unwrap_or_else(fallback_id),
            conversation_id: conversation
                .and_then(Urn::conversation_id)
                .map(str::to_string),
            timestamp_ms: timestamp_ms.or(self.timestamp_ms).unwrap_or_default(),
            sequence_hint: self.sequence_hint,
        }
    }
}

fn decode_decorated(decorated: DecoratedEventMsg, frame: &RawFrame) -> Result<Event, DecodeError> {
    let envelope = Envelope {
        id: decorated.id.clone().or_else(|| frame.id.clone()),
        timestamp_ms: decorated.published_at.or(decorated.left_server_at),
        sequence_hint: decorated.sequence_number,
    };
    let topic = decorated.topic;
    let payload = decorated.payload;

    match TopicKind::from_topic(&topic) {
        TopicKind::Messages if has(&payload, "event") => {
            decode_message(&envelope, typed(payload, "message event")?)
        }
        TopicKind::Messages if has(&payload, "reactionSummary") => {
            decode_reaction(&envelope, typed(payload, "reaction event")?)
        }
        TopicKind::SeenReceipts if has(&payload, "seenReceipt") => {
            decode_receipt(&envelope, typed(payload, "seen receipt")?)
        }
        TopicKind::TypingIndicators if has(&payload, "fromEntity") && has(&payload, "conversation") => {
            decode_presence(&envelope, typed(payload, "typing indicator")?)
        }
        TopicKind::Conversations if has(&payload, "conversation") => {
            decode_conversation(&envelope, typed(payload, "conversation update")?)
        }
        _ => Ok(unknown(envelope, Some(topic), payload)),
    }
}

fn decode_message(
    envelope: &Envelope,
    payload: ConversationEventPayloadMsg,
) -> Result<Event, DecodeError> {
    let event = payload.event;
    let event_urn = event.entity_urn;
    let header = EventHeader {
        // The event urn survives redelivery; the envelope id may not.
        event_id: event_urn.to_string(),
        ..envelope.header(String::new, Some(&event_urn), event.created_at)
    };

    let member = event.from.and_then(|from| from.messaging_member);
    let sender = member.as_ref().and_then(|member| {
        member.entity_urn.clone().or_else(|| {
            member
                .mini_profile
                .as_ref()
                .and_then(|profile| profile.entity_urn.clone())
        })
    });
    let sender_name = member.as_ref().and_then(|member| {
        member.alternate_name.clone().or_else(|| {
            let profile = member.mini_profile.as_ref()?;
            let name = [profile.first_name.as_deref(), profile.last_name.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            (!name.is_empty()).then_some(name)
        })
    });

    let content = event
        .event_content
        .and_then(|content| content.message_event);
    let (body, subject, recalled, attachments) = match content {
        Some(content) => {
            let body = match content.attributed_body {
                Some(attributed) if !attributed.text.is_empty() => attributed.text,
                _ => content.body,
            };
            let attachments = content
                .attachments
                .into_iter()
                .map(|attachment| Attachment {
                    id: attachment.id,
                    name: attachment.name,
                    media_type: attachment.media_type,
                    byte_size: attachment.byte_size,
                    url: attachment
                        .reference
                        .map(|reference| reference.string)
                        .filter(|url| !url.is_empty()),
                })
                .collect();
            (body, content.subject, content.recalled_at.is_some(), attachments)
        }
        None => (String::new(), None, false, Vec::new()),
    };

    Ok(Event::Message(MessageEvent {
        header,
        event_urn,
        sender,
        sender_name,
        body,
        subject,
        subtype: event.subtype,
        attachments,
        recalled,
        previous_event: event
            .previous_event_in_conversation
            .or(payload.previous_event_in_conversation),
    }))
}

fn decode_reaction(envelope: &Envelope, payload: ReactionPayloadMsg) -> Result<Event, DecodeError> {
    let summary = payload.reaction_summary;
    let actor = payload.actor_mini_profile_urn;
    let header = envelope.header(
        || {
            format!(
                "reaction:{}:{}:{}:{}:{}",
                payload.event_urn,
                actor.as_ref().map(Urn::to_string).unwrap_or_default(),
                summary.emoji,
                payload.reaction_added,
                summary.count
            )
        },
        Some(&payload.event_urn),
        summary.first_reacted_at,
    );
    Ok(Event::Reaction(ReactionEvent {
        header,
        message: payload.event_urn,
        actor,
        emoji: summary.emoji,
        added: payload.reaction_added,
        count: summary.count,
        viewer_reacted: summary.viewer_reacted,
    }))
}

fn decode_receipt(
    envelope: &Envelope,
    payload: SeenReceiptPayloadMsg,
) -> Result<Event, DecodeError> {
    let receipt = payload.seen_receipt;
    let header = envelope.header(
        || format!("receipt:{}:{}", payload.from_entity, receipt.event_urn),
        Some(&receipt.event_urn),
        Some(receipt.seen_at),
    );
    Ok(Event::Receipt(ReceiptEvent {
        header,
        reader: payload.from_entity,
        seen_event: receipt.event_urn,
        seen_at_ms: receipt.seen_at,
    }))
}

/// Arrival counter for typing indicators that carry no id and no timestamp.
static UNSTAMPED_TYPING: AtomicU64 = AtomicU64::new(0);

fn decode_presence(
    envelope: &Envelope,
    payload: TypingIndicatorPayloadMsg,
) -> Result<Event, DecodeError> {
    let header = envelope.header(
        || {
            let stamp = match envelope.timestamp_ms {
                Some(timestamp_ms) => timestamp_ms.to_string(),
                None => format!(
                    "arrival-{}",
                    UNSTAMPED_TYPING.fetch_add(1, Ordering::Relaxed)
                ),
            };
            format!(
                "typing:{}:{}:{stamp}",
                payload.conversation, payload.from_entity
            )
        },
        Some(&payload.conversation),
        None,
    );
    Ok(Event::Presence(PresenceEvent {
        header,
        conversation: payload.conversation,
        actor: payload.from_entity,
    }))
}

fn decode_conversation(
    envelope: &Envelope,
    payload: ConversationPayloadMsg,
) -> Result<Event, DecodeError> {
    let conversation = payload.conversation;
    let action = payload.action;
    let header = envelope.header(
        || {
            format!(
                "conversation:{}:{}:{}",
                conversation.entity_urn,
                conversation
                    .last_activity_at
                    .or(envelope.timestamp_ms)
                    .unwrap_or_default(),
                action.as_deref().unwrap_or("update")
            )
        },
        Some(&conversation.entity_urn),
        conversation.last_activity_at,
    );
    Ok(Event::ConversationMeta(ConversationMetaEvent {
        header,
        conversation: conversation.entity_urn,
        action,
        read: conversation.read,
        unread_count: conversation.unread_count,
        name: conversation.name,
        muted: conversation.muted,
        archived: conversation.archived,
    }))
}

fn unknown(envelope: Envelope, topic: Option<String>, raw: Value) -> Event {
    let header = envelope.header(|| content_digest(topic.as_deref(), &raw), None, None);
    Event::Unknown(UnknownEvent { header, topic, raw })
}

/// Deterministic id for payloads that carry no identity of their own, so a
/// redelivered copy still dedups.
fn content_digest(topic: Option<&str>, raw: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    topic.hash(&mut hasher);
    raw.to_string().hash(&mut hasher);
    format!("digest:{:016x}", hasher.finish())
}

fn has(payload: &Value, key: &str) -> bool {
    payload.get(key).is_some()
}

fn typed<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|err| DecodeError::Corrupt(format!("{what}: {err}")))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::{json, Value};

    use super::{decode_frame, DecodeError, DecodedFrame, Event, EventDecoder, EventKind};
    use crate::stream::frame::RawFrame;

    const MESSAGES_TOPIC: &str = "urn:li-realtime:messagesTopic:urn:li-realtime:myself";

    fn frame(value: Value) -> RawFrame {
        RawFrame {
            id: None,
            event: None,
            data: Bytes::from(value.to_string()),
        }
    }

    fn decorated(topic: &str, payload: Value) -> RawFrame {
        frame(json!({
            "com.linkedin.realtimefrontend.DecoratedEvent": {
                "topic": topic,
                "publishedAt": 1_700_000_000_500_u64,
                "payload": payload
            }
        }))
    }

    fn event(frame: &RawFrame) -> Event {
        match decode_frame(frame).expect("decode") {
            DecodedFrame::Event(event) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn decodes_message_with_urn_identity() {
        let frame = decorated(
            MESSAGES_TOPIC,
            json!({
                "event": {
                    "entityUrn": "urn:li:fs_event:(2-conv==,5-evt==)",
                    "createdAt": 1_700_000_000_000_u64,
                    "subtype": "MEMBER_TO_MEMBER",
                    "from": {
                        "com.linkedin.voyager.messaging.MessagingMember": {
                            "entityUrn": "urn:li:fs_messagingMember:(2-conv==,ACoAAB)",
                            "miniProfile": {"firstName": "Ada", "lastName": "Lovelace"}
                        }
                    },
                    "eventContent": {
                        "com.linkedin.voyager.messaging.event.MessageEvent": {
                            "body": "",
                            "attributedBody": {"text": "hello there"},
                            "attachments": [{
                                "id": "urn:li:digitalmediaAsset:C4",
                                "byteSize": 42,
                                "mediaType": "image/png",
                                "name": "pic.png",
                                "reference": {"string": "https://media.example/pic.png"}
                            }]
                        }
                    }
                }
            }),
        );

        let Event::Message(message) = event(&frame) else {
            panic!("expected message");
        };
        assert_eq!(message.header.event_id, "urn:li:fs_event:(2-conv==,5-evt==)");
        assert_eq!(message.header.conversation_id.as_deref(), Some("2-conv=="));
        assert_eq!(message.header.timestamp_ms, 1_700_000_000_000);
        assert_eq!(message.body, "hello there");
        assert_eq!(message.sender_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(
            message.attachments[0].url.as_deref(),
            Some("https://media.example/pic.png")
        );
        assert!(!message.recalled);
    }

    #[test]
    fn redelivered_receipt_keeps_its_identity() {
        let payload = json!({
            "fromEntity": "urn:li:fs_messagingMember:(2-conv==,ACoAAB)",
            "seenReceipt": {"eventUrn": "urn:li:fs_event:(2-conv==,5-evt==)", "seenAt": 1_700_000_000_900_u64}
        });
        let topic = "urn:li-realtime:messageSeenReceiptsTopic:urn:li-realtime:myself";
        let first = event(&decorated(topic, payload.clone()));
        let second = event(&decorated(topic, payload));

        assert_eq!(first.kind(), EventKind::Receipt);
        assert_eq!(first.event_id(), second.event_id());
        assert_eq!(first.conversation_id(), Some("2-conv=="));
        assert_eq!(first.header().timestamp_ms, 1_700_000_000_900);
    }

    #[test]
    fn envelope_id_and_sequence_are_used_when_present() {
        let frame = frame(json!({
            "com.linkedin.realtimefrontend.DecoratedEvent": {
                "topic": "urn:li-realtime:typingIndicatorsTopic:urn:li-realtime:myself",
                "id": "evt-42",
                "sequenceNumber": 9,
                "payload": {
                    "conversation": "urn:li:fs_conversation:2-conv==",
                    "fromEntity": "urn:li:fs_miniProfile:ACoAAB"
                }
            }
        }));
        let decoded = event(&frame);
        assert_eq!(decoded.kind(), EventKind::Presence);
        assert_eq!(decoded.event_id(), "evt-42");
        assert_eq!(decoded.header().sequence_hint, Some(9));
    }

    #[test]
    fn typing_without_id_or_timestamp_is_never_collapsed() {
        let typing = |published_at: Option<u64>| {
            let mut envelope = json!({
                "topic": "urn:li-realtime:typingIndicatorsTopic:urn:li-realtime:myself",
                "payload": {
                    "conversation": "urn:li:fs_conversation:2-conv==",
                    "fromEntity": "urn:li:fs_miniProfile:ACoAAB"
                }
            });
            if let Some(published_at) = published_at {
                envelope["publishedAt"] = json!(published_at);
            }
            event(&frame(json!({
                "com.linkedin.realtimefrontend.DecoratedEvent": envelope
            })))
        };

        let first = typing(None);
        let second = typing(None);
        assert_eq!(first.kind(), EventKind::Presence);
        assert_ne!(first.event_id(), second.event_id());

        assert_eq!(
            typing(Some(1_700_000_000_000)).event_id(),
            typing(Some(1_700_000_000_000)).event_id()
        );
    }

    #[test]
    fn decodes_reaction_and_conversation_updates() {
        let reaction = event(&decorated(
            MESSAGES_TOPIC,
            json!({
                "reactionAdded": true,
                "actorMiniProfileUrn": "urn:li:fs_miniProfile:ACoAAB",
                "eventUrn": "urn:li:fs_event:(2-conv==,5-evt==)",
                "reactionSummary": {"emoji": "👍", "count": 1, "viewerReacted": false}
            }),
        ));
        let Event::Reaction(reaction) = reaction else {
            panic!("expected reaction");
        };
        assert!(reaction.added);
        assert_eq!(reaction.emoji, "👍");

        let update = event(&decorated(
            "urn:li-realtime:conversationsTopic:urn:li-realtime:myself",
            json!({
                "action": "UPDATE",
                "conversation": {
                    "entityUrn": "urn:li:fs_conversation:2-conv==",
                    "read": true,
                    "unreadCount": 0
                }
            }),
        ));
        let Event::ConversationMeta(update) = update else {
            panic!("expected conversation update");
        };
        assert_eq!(update.read, Some(true));
        assert_eq!(update.header.conversation_id.as_deref(), Some("2-conv=="));
    }

    #[test]
    fn control_frames_are_not_events() {
        assert_eq!(
            decode_frame(&frame(json!({"com.linkedin.realtimefrontend.Heartbeat": {}})))
                .expect("heartbeat"),
            DecodedFrame::Heartbeat
        );
        assert_eq!(
            decode_frame(&frame(
                json!({"com.linkedin.realtimefrontend.ClientConnection": {"id": "conn-1"}})
            ))
            .expect("connection"),
            DecodedFrame::ClientConnection {
                connection_id: "conn-1".to_string()
            }
        );
    }

    #[test]
    fn unrecognised_shapes_become_unknown_with_stable_id() {
        let topic = "urn:li-realtime:presenceStatusTopic:urn:li-realtime:myself";
        let first = event(&decorated(topic, json!({"status": "ONLINE"})));
        let second = event(&decorated(topic, json!({"status": "ONLINE"})));
        assert_eq!(first.kind(), EventKind::Unknown);
        assert_eq!(first.event_id(), second.event_id());

        let other = event(&frame(json!({"com.linkedin.SomethingNew": {"x": 1}})));
        assert_eq!(other.kind(), EventKind::Unknown);
    }

    #[test]
    fn corrupt_payloads_are_counted_not_fatal() {
        let mut decoder = EventDecoder::new();
        let not_json = RawFrame {
            id: None,
            event: None,
            data: Bytes::from_static(b"{not json"),
        };
        assert!(matches!(
            decoder.decode(&not_json),
            Err(DecodeError::Corrupt(_))
        ));

        let wrong_types = decorated(MESSAGES_TOPIC, json!({"event": {"entityUrn": 12}}));
        assert!(matches!(
            decoder.decode(&wrong_types),
            Err(DecodeError::Corrupt(_))
        ));

        let missing_topic = frame(json!({
            "com.linkedin.realtimefrontend.DecoratedEvent": {"payload": {}}
        }));
        assert!(decoder.decode(&missing_topic).is_err());

        assert!(decoder
            .decode(&frame(json!({"com.linkedin.realtimefrontend.Heartbeat": {}})))
            .is_ok());
        assert_eq!(decoder.skipped(), 3);
        assert_eq!(decoder.decoded(), 1);
    }
}
