//! The delivery collaborator: posting and editing messages in a channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::llms::streaming::StreamEvent;
use crate::persona::style::{ConversationHabits, TextStyle};
use crate::utilities::errors::DeliveryError;

/// Alternate display identity for persona messages (webhook-style).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayIdentity {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl DisplayIdentity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel: String,
    pub id: String,
}

#[async_trait]
pub trait Delivery: Send + Sync {
    /// Post `text`; `identity` asks for the persona display identity.
    async fn send(
        &self,
        channel: &str,
        text: &str,
        identity: Option<&DisplayIdentity>,
    ) -> Result<MessageHandle, DeliveryError>;

    /// Replace the content of a posted message.
    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), DeliveryError>;
}

/// Prefix used when the persona identity is unavailable.
pub fn fallback_tag(username: &str) -> String {
    format!("Persona Bot (@{})", username)
}

/// A message posted for a persona.
///
/// Remembers whether it went out under the fallback identity so edits keep
/// the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub handle: MessageHandle,
    prefix: Option<String>,
}

impl PostedMessage {
    pub fn render(&self, text: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{} {}", prefix, text),
            None => text.to_string(),
        }
    }

    pub fn used_fallback(&self) -> bool {
        self.prefix.is_some()
    }

    /// Edit in place; failures are logged and reported as `false`.
    pub async fn edit(&self, delivery: &dyn Delivery, text: &str) -> bool {
        match delivery.edit(&self.handle, &self.render(text)).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Edit of message {} failed: {}", self.handle.id, e);
                false
            }
        }
    }
}

/// Post under the persona identity, falling back to the default identity
/// with a `Persona Bot (@name)` tag. `None` when both attempts fail.
pub async fn send_as_persona(
    delivery: &dyn Delivery,
    channel: &str,
    text: &str,
    identity: &DisplayIdentity,
    username: &str,
) -> Option<PostedMessage> {
    match delivery.send(channel, text, Some(identity)).await {
        Ok(handle) => {
            return Some(PostedMessage {
                handle,
                prefix: None,
            })
        }
        Err(e) => log::info!("Persona identity send failed, using default identity: {}", e),
    }

    let prefix = fallback_tag(username);
    match delivery
        .send(channel, &format!("{} {}", prefix, text), None)
        .await
    {
        Ok(handle) => Some(PostedMessage {
            handle,
            prefix: Some(prefix),
        }),
        Err(e) => {
            log::error!("Delivery to channel {} failed: {}", channel, e);
            None
        }
    }
}

/// Light trait-aware adjustments for conversational replies.
///
/// Repeats a trailing `!` or `?` for personas with emphatic punctuation and
/// splits the reply into two bursts for personas who send short bursts.
pub fn postprocess_by_traits(text: &str, style: &TextStyle, habits: &ConversationHabits) -> Vec<String> {
    let mut out = text.trim().to_string();
    if out.is_empty() {
        return Vec::new();
    }

    let punctuation = style.punctuation.to_lowercase();
    if punctuation.contains("!!!") || punctuation.contains("???") || punctuation.contains("frequent") {
        if out.ends_with('!') {
            out.push('!');
        } else if out.ends_with('?') {
            out.push('?');
        }
    }

    if habits.message_bursts.starts_with("often") {
        let normalized = out.replace("!?", ".");
        let parts: Vec<&str> = normalized
            .split('.')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() >= 2 {
            return vec![format!("{}.", parts[0]), parts[1..].join(" ")];
        }
    }
    vec![out]
}

/// Forwards every posted or edited text as a [`StreamEvent::Partial`].
///
/// Backs the SSE endpoint: the consumer sees the text as it grows.
#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelDelivery {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, text: &str) -> Result<(), DeliveryError> {
        self.tx
            .send(StreamEvent::Partial {
                text: text.to_string(),
            })
            .map_err(|_| DeliveryError::new("stream consumer went away"))
    }
}

#[async_trait]
impl Delivery for ChannelDelivery {
    async fn send(
        &self,
        channel: &str,
        text: &str,
        _identity: Option<&DisplayIdentity>,
    ) -> Result<MessageHandle, DeliveryError> {
        self.forward(text)?;
        Ok(MessageHandle {
            channel: channel.to_string(),
            id: "stream".to_string(),
        })
    }

    async fn edit(&self, _handle: &MessageHandle, text: &str) -> Result<(), DeliveryError> {
        self.forward(text)
    }
}

/// Keeps the latest text of every posted message, in posting order.
///
/// Used for request/response callers that return the delivered parts.
#[derive(Debug, Default)]
pub struct CollectingDelivery {
    messages: parking_lot::Mutex<Vec<String>>,
}

impl CollectingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl Delivery for CollectingDelivery {
    async fn send(
        &self,
        channel: &str,
        text: &str,
        _identity: Option<&DisplayIdentity>,
    ) -> Result<MessageHandle, DeliveryError> {
        let mut messages = self.messages.lock();
        messages.push(text.to_string());
        Ok(MessageHandle {
            channel: channel.to_string(),
            id: (messages.len() - 1).to_string(),
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), DeliveryError> {
        let idx: usize = handle
            .id
            .parse()
            .map_err(|_| DeliveryError::new(format!("unknown message {}", handle.id)))?;
        let mut messages = self.messages.lock();
        let slot = messages
            .get_mut(idx)
            .ok_or_else(|| DeliveryError::new(format!("unknown message {}", handle.id)))?;
        *slot = text.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDelivery;

    fn style(punctuation: &str) -> TextStyle {
        TextStyle {
            punctuation: punctuation.to_string(),
            ..TextStyle::default()
        }
    }

    fn habits(bursts: &str) -> ConversationHabits {
        ConversationHabits {
            message_bursts: bursts.to_string(),
            ..ConversationHabits::default()
        }
    }

    #[test]
    fn test_punctuation_emphasis() {
        let parts = postprocess_by_traits("no way!", &style("frequent !!! and ???"), &habits("balanced"));
        assert_eq!(parts, vec!["no way!!"]);
        let parts = postprocess_by_traits("really?", &style("frequent !!! and ???"), &habits("balanced"));
        assert_eq!(parts, vec!["really??"]);
        let parts = postprocess_by_traits("ok.", &style("standard"), &habits("balanced"));
        assert_eq!(parts, vec!["ok."]);
    }

    #[test]
    fn test_burst_split() {
        let parts = postprocess_by_traits(
            "heading out now. talk later. bye",
            &style("standard"),
            &habits("often sends short bursts"),
        );
        assert_eq!(parts, vec!["heading out now.", "talk later bye"]);

        let single = postprocess_by_traits("just one", &style("standard"), &habits("often sends short bursts"));
        assert_eq!(single, vec!["just one"]);
        assert!(postprocess_by_traits("  ", &style(""), &habits("")).is_empty());
    }

    #[tokio::test]
    async fn test_send_as_persona_falls_back_to_tag() {
        let delivery = RecordingDelivery::rejecting_identity();
        let posted = send_as_persona(&delivery, "c1", "hi", &DisplayIdentity::named("sam"), "sam")
            .await
            .unwrap();
        assert!(posted.used_fallback());
        assert_eq!(delivery.texts(), vec!["Persona Bot (@sam) hi"]);

        assert!(posted.edit(&delivery, "hi again").await);
        assert_eq!(delivery.texts(), vec!["Persona Bot (@sam) hi again"]);
    }

    #[tokio::test]
    async fn test_send_as_persona_total_failure() {
        let delivery = RecordingDelivery::broken();
        assert!(send_as_persona(&delivery, "c1", "hi", &DisplayIdentity::default(), "sam")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_channel_delivery_forwards_partials() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let delivery = ChannelDelivery::new(tx);
        let handle = delivery.send("c1", "a", None).await.unwrap();
        delivery.edit(&handle, "ab").await.unwrap();
        assert_eq!(rx.recv().await, Some(StreamEvent::Partial { text: "a".into() }));
        assert_eq!(rx.recv().await, Some(StreamEvent::Partial { text: "ab".into() }));
    }

    #[tokio::test]
    async fn test_collecting_delivery_applies_edits() {
        let delivery = CollectingDelivery::new();
        let first = delivery.send("c1", "…", None).await.unwrap();
        delivery.send("c1", "second", None).await.unwrap();
        delivery.edit(&first, "first").await.unwrap();
        assert_eq!(delivery.messages(), vec!["first", "second"]);
    }
}
