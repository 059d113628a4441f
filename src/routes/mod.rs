pub mod cache;
pub mod chat;
pub mod rag;
