mod cache;
mod chat;

pub use cache::*;
pub use chat::*;
