pub mod client;
pub mod inbenta;

pub use client::{decline_payload, KbError, KbReply, KnowledgeBaseClient};
pub use inbenta::HttpKnowledgeBase;
