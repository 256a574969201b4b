//! The in-voice reply pipeline and its collaborators.

pub mod delivery;
pub mod session;
pub mod speak;

pub use delivery::{
    fallback_tag, postprocess_by_traits, send_as_persona, ChannelDelivery, CollectingDelivery, Delivery,
    DisplayIdentity, MessageHandle, PostedMessage,
};
pub use session::{ConversationSession, Role, SessionRegistry, Turn};
pub use speak::{Fallback, SpeakOutcome, SpeakPipeline, SpeakRequest, SpeakState, PLACEHOLDER_REPLY};
