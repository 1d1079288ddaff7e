use kbridge_chatbot::KnowledgeBaseClient;
use kbridge_core::config::EscalationConfig;
use kbridge_protocol::OutputBlock;
use kbridge_sessions::{PendingSelection, SessionState};
use tracing::info;

use crate::digester::ResponseDigester;
use crate::error::{ConnectorError, Result};

/// How an open escalation question was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// No live chat is configured; the user got the decline message.
    Declined,
    /// The conversation was handed to the live-chat address.
    Escalated,
}

/// Answers the "do you want a human agent?" question raised by the
/// knowledge base.
#[derive(Debug, Clone)]
pub struct Escalation {
    chat_address: Option<String>,
    decline_message: String,
}

impl Escalation {
    pub fn new(chat_address: Option<String>, decline_message: impl Into<String>) -> Self {
        Self {
            chat_address: chat_address.filter(|a| !a.trim().is_empty()),
            decline_message: decline_message.into(),
        }
    }

    pub fn from_config(config: &EscalationConfig) -> Self {
        Self::new(config.chat_address.clone(), config.no_escalation_message.clone())
    }

    /// Settle an open escalation question.
    ///
    /// Returns `Ok(None)` when no question is open. Closes
    /// `asking_for_escalation` on both the decline and the escalate path.
    /// `consumed` is the selection the threshold decision took from `state`.
    pub async fn settle(
        &self,
        kb: &dyn KnowledgeBaseClient,
        digester: &ResponseDigester,
        question: &str,
        consumed: Option<&PendingSelection>,
        state: &mut SessionState,
    ) -> Result<Option<(Settled, Vec<OutputBlock>)>> {
        if !state.asking_for_escalation() {
            return Ok(None);
        }
        if consumed.is_some() || state.expecting_reply() {
            return Err(ConnectorError::NonBotActionConflict(
                "escalation question open while options are pending".into(),
            ));
        }
        state.close_escalation();

        let Some(address) = self.chat_address.as_deref() else {
            info!("no live chat configured, declining escalation");
            return Ok(Some((
                Settled::Declined,
                vec![OutputBlock::text(&self.decline_message)],
            )));
        };

        state.clear_escalation_markers();
        info!(backend = kb.name(), "escalating conversation to live chat");
        let payload = kb.escalate(address).await?;
        let blocks = digester.digest_from_api(&payload, question, state)?;
        Ok(Some((Settled::Escalated, blocks)))
    }
}
