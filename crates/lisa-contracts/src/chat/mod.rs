pub mod conversation;
pub mod interceptor;

pub use conversation::{ConversationLog, ImageAttachment, Message, Role, TurnState};
pub use interceptor::{Interceptor, INTENT_PHRASES};
