pub mod blocks;
pub mod chatbot;
pub mod turn;

pub use blocks::{BlockOption, OutputBlock};
pub use chatbot::{KbMessage, KbRequest, MessageKind};
pub use turn::{Turn, TurnOutput, WebhookEnvelope};
