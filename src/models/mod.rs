pub mod conversation;
pub mod document;
pub mod message;

pub use conversation::Conversation;
pub use document::Document;
pub use message::{Message, Role};
