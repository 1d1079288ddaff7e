use std::sync::Arc;

use kbridge_chatbot::KnowledgeBaseClient;
use kbridge_core::BridgeConfig;
use kbridge_protocol::{OutputBlock, Turn};
use kbridge_sessions::SessionState;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::digester::ResponseDigester;
use crate::error::{ConnectorError, Result};
use crate::escalation::{Escalation, Settled};
use crate::threshold::Trigger;

/// What happened to a routed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Input turn stored for the following output turn.
    Captured,
    /// The assistant's output was kept as-is.
    PassedThrough(Trigger),
    /// The output was replaced with `blocks` knowledge-base blocks.
    Answered { trigger: Trigger, blocks: usize },
    /// An open escalation question was declined.
    Declined,
    /// An open escalation question was handed to live chat.
    Escalated,
}

/// Result of routing one turn: the turn to return and the state to persist.
#[derive(Debug, Clone)]
pub struct Routed {
    pub outcome: Outcome,
    pub turn: Turn,
    pub state: SessionState,
}

/// Routes webhook turns between the assistant and the knowledge base.
pub struct TurnRouter {
    digester: ResponseDigester,
    kb: Arc<dyn KnowledgeBaseClient>,
    escalation: Escalation,
}

impl TurnRouter {
    pub fn new(
        digester: ResponseDigester,
        kb: Arc<dyn KnowledgeBaseClient>,
        escalation: Escalation,
    ) -> Self {
        Self {
            digester,
            kb,
            escalation,
        }
    }

    pub fn from_config(config: &BridgeConfig, kb: Arc<dyn KnowledgeBaseClient>) -> Self {
        Self::new(
            ResponseDigester::new(config.assistant.threshold),
            kb,
            Escalation::from_config(&config.escalation),
        )
    }

    /// Route one turn against the caller's session state.
    ///
    /// Input turns are captured. Output turns go through the threshold
    /// decision and, when it escalates, get their `output.generic` replaced
    /// by the knowledge-base answer to the captured utterance.
    #[instrument(skip_all, fields(kb = self.kb.name()))]
    pub async fn route(&self, mut turn: Turn, mut state: SessionState) -> Result<Routed> {
        if turn.input.is_some() {
            state.user_input = Some(turn.clone());
            debug!("input turn captured");
            return Ok(Routed {
                outcome: Outcome::Captured,
                turn,
                state,
            });
        }

        let Some(output) = turn.output.as_ref() else {
            return Err(ConnectorError::MalformedTurn);
        };

        let decision = self.digester.decide(&mut state, output);
        let utterance = state
            .user_input
            .as_ref()
            .and_then(Turn::utterance)
            .unwrap_or_default()
            .to_string();
        info!(
            trigger = decision.trigger.as_str(),
            escalate = decision.escalate(),
            "threshold decision"
        );

        let passed_through = Outcome::PassedThrough(decision.trigger);
        if !decision.escalate() || utterance.trim().is_empty() {
            return Ok(Routed {
                outcome: passed_through,
                turn,
                state,
            });
        }

        if let Some((settled, blocks)) = self
            .escalation
            .settle(
                self.kb.as_ref(),
                &self.digester,
                &utterance,
                decision.pending.as_ref(),
                &mut state,
            )
            .await?
        {
            replace_generic(&mut turn, &blocks)?;
            let outcome = match settled {
                Settled::Declined => Outcome::Declined,
                Settled::Escalated => Outcome::Escalated,
            };
            return Ok(Routed {
                outcome,
                turn,
                state,
            });
        }

        let request = state
            .user_input
            .as_ref()
            .and_then(|input| self.digester.digest_to_api(input, decision.pending.as_ref()));
        let Some(request) = request else {
            return Ok(Routed {
                outcome: passed_through,
                turn,
                state,
            });
        };

        let reply = self
            .kb
            .send(state.kb_session_token.as_deref(), &request)
            .await?;
        state.kb_session_token = Some(reply.conversation);

        let blocks = self
            .digester
            .digest_from_api(&reply.body, &utterance, &mut state)?;
        info!(blocks = blocks.len(), "knowledge-base answer digested");
        replace_generic(&mut turn, &blocks)?;

        Ok(Routed {
            outcome: Outcome::Answered {
                trigger: decision.trigger,
                blocks: blocks.len(),
            },
            turn,
            state,
        })
    }
}

fn replace_generic(turn: &mut Turn, blocks: &[OutputBlock]) -> Result<()> {
    let generic = blocks
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<Value>, _>>()?;
    if let Some(output) = turn.output.as_mut() {
        output.generic = Some(generic);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kbridge_chatbot::{decline_payload, KbError, KbReply};
    use kbridge_protocol::KbRequest;
    use serde_json::json;
    use std::sync::Mutex;

    /// Knowledge base answering every message with a fixed body.
    struct StubKb {
        body: Value,
        sent: Mutex<Vec<(Option<String>, String)>>,
    }

    impl StubKb {
        fn answering(body: Value) -> Arc<Self> {
            Arc::new(Self {
                body,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(Option<String>, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl KnowledgeBaseClient for StubKb {
        fn name(&self) -> &str {
            "stub"
        }

        async fn send(
            &self,
            conversation: Option<&str>,
            req: &KbRequest,
        ) -> std::result::Result<KbReply, KbError> {
            self.sent
                .lock()
                .unwrap()
                .push((conversation.map(str::to_string), req.message.clone()));
            Ok(KbReply {
                conversation: "conv-1".into(),
                body: self.body.clone(),
            })
        }

        async fn escalate(&self, _address: &str) -> std::result::Result<Value, KbError> {
            Ok(decline_payload("No agents."))
        }
    }

    fn router(kb: Arc<StubKb>) -> TurnRouter {
        TurnRouter::new(ResponseDigester::new(0.5), kb, Escalation::new(None, "Nobody is around."))
    }

    fn after_input(text: &str) -> SessionState {
        let mut state = SessionState::default();
        state.user_input = Some(Turn::with_input(text));
        state
    }

    fn output_turn(raw: Value) -> Turn {
        serde_json::from_value(json!({ "output": raw })).unwrap()
    }

    fn fallback_output() -> Turn {
        output_turn(json!({
            "generic": [{"response_type": "text", "text": "I didn't get that."}],
            "debug": {"nodes_visited": [{"title": "Start"}, {"title": "Anything else"}]}
        }))
    }

    #[tokio::test]
    async fn input_then_fallback_output_is_answered_by_kb() {
        let kb = StubKb::answering(json!({"answers": [{"type": "answer", "message": "Hello from KB"}]}));
        let router = router(kb.clone());

        let captured = router
            .route(Turn::with_input("hi"), SessionState::default())
            .await
            .unwrap();
        assert_eq!(captured.outcome, Outcome::Captured);
        assert_eq!(captured.turn, Turn::with_input("hi"));
        assert_eq!(captured.state.user_input, Some(Turn::with_input("hi")));

        let routed = router.route(fallback_output(), captured.state).await.unwrap();
        assert_eq!(
            routed.outcome,
            Outcome::Answered {
                trigger: Trigger::FallbackNode,
                blocks: 1
            }
        );
        assert_eq!(
            routed.turn.output.unwrap().generic,
            Some(vec![json!({"response_type": "text", "text": "Hello from KB"})])
        );
        assert_eq!(routed.state.kb_session_token.as_deref(), Some("conv-1"));
        assert_eq!(kb.sent(), vec![(None, "hi".to_string())]);
    }

    #[tokio::test]
    async fn conversation_token_is_reused() {
        let kb = StubKb::answering(json!({"type": "answer", "message": "ok"}));
        let router = router(kb.clone());
        let mut state = after_input("hi");
        state.kb_session_token = Some("conv-0".into());
        router.route(fallback_output(), state).await.unwrap();
        assert_eq!(kb.sent(), vec![(Some("conv-0".to_string()), "hi".to_string())]);
    }

    #[tokio::test]
    async fn confident_output_passes_through_untouched() {
        let kb = StubKb::answering(json!({}));
        let router = router(kb.clone());
        let state = after_input("opening hours");
        let turn = output_turn(json!({
            "generic": [{"response_type": "text", "text": "9 to 5"}],
            "intents": [{"intent": "hours", "confidence": 0.93}]
        }));

        let routed = router.route(turn.clone(), state).await.unwrap();
        assert_eq!(routed.outcome, Outcome::PassedThrough(Trigger::ConfidentIntent));
        assert_eq!(routed.turn, turn);
        assert!(kb.sent().is_empty());
    }

    #[tokio::test]
    async fn blank_utterance_skips_kb() {
        let kb = StubKb::answering(json!({}));
        let router = router(kb.clone());
        let state = after_input("  ");
        let routed = router.route(fallback_output(), state).await.unwrap();
        assert_eq!(routed.outcome, Outcome::PassedThrough(Trigger::FallbackNode));
        assert!(kb.sent().is_empty());
    }

    #[tokio::test]
    async fn turn_without_input_or_output_is_malformed() {
        let kb = StubKb::answering(json!({}));
        let err = router(kb)
            .route(Turn::default(), SessionState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::MalformedTurn));
    }

    #[tokio::test]
    async fn question_then_spoken_choice_sends_option_value() {
        let kb = StubKb::answering(json!({"answers": [{
            "type": "multipleChoiceQuestion",
            "message": "Which plan?",
            "options": [
                {"label": "Basic", "value": 11, "attributes": {"title": "Basic plan"}},
                {"label": "Premium", "value": 12, "attributes": {"title": "Premium plan"}}
            ]
        }]}));
        let router = router(kb.clone());

        let state = router
            .route(Turn::with_input("plans"), SessionState::default())
            .await
            .unwrap()
            .state;
        let asked = router.route(fallback_output(), state).await.unwrap();
        assert!(asked.state.expecting_reply());

        let state = router
            .route(Turn::with_input("premium"), asked.state)
            .await
            .unwrap()
            .state;
        // The assistant was confident this time; the pending selection still wins.
        let reply = output_turn(json!({"intents": [{"intent": "buy", "confidence": 0.99}]}));
        let chosen = router.route(reply, state).await.unwrap();

        assert!(matches!(
            chosen.outcome,
            Outcome::Answered {
                trigger: Trigger::PendingSelection,
                ..
            }
        ));
        let sent: Vec<String> = kb.sent().into_iter().map(|(_, m)| m).collect();
        assert_eq!(sent, vec!["plans", "Premium plan"]);
    }

    #[tokio::test]
    async fn open_escalation_question_is_declined() {
        let kb = StubKb::answering(json!({}));
        let router = router(kb.clone());
        let mut state = after_input("yes");
        state.open_escalation("escalationStart");

        let routed = router.route(fallback_output(), state).await.unwrap();
        assert_eq!(routed.outcome, Outcome::Declined);
        assert_eq!(
            routed.turn.output.unwrap().generic,
            Some(vec![json!({"response_type": "text", "text": "Nobody is around."})])
        );
        assert!(!routed.state.asking_for_escalation());
        assert!(kb.sent().is_empty());
    }

    #[tokio::test]
    async fn question_after_escalation_start_keeps_later_turns_routable() {
        let kb = StubKb::answering(json!({"answers": [
            {"type": "answer", "message": "An agent could help.", "attributes": {"DIRECT_CALL": "escalationStart"}},
            {"type": "polarQuestion", "message": "Did that help?", "options": [
                {"label": "Yes", "value": "yes"},
                {"label": "No", "value": "no"}
            ]}
        ]}));
        let router = router(kb.clone());

        let state = router
            .route(Turn::with_input("help"), SessionState::default())
            .await
            .unwrap()
            .state;
        let mut state = router.route(fallback_output(), state).await.unwrap().state;
        assert!(state.expecting_reply());
        assert!(!state.asking_for_escalation());

        for _ in 0..3 {
            state = router
                .route(Turn::with_input("yes"), state)
                .await
                .unwrap()
                .state;
            let routed = router.route(fallback_output(), state).await.unwrap();
            assert!(matches!(routed.outcome, Outcome::Answered { .. }));
            state = routed.state;
        }
        let sent: Vec<String> = kb.sent().into_iter().map(|(_, m)| m).collect();
        assert_eq!(sent, vec!["help", "yes", "yes", "yes"]);
    }

    #[tokio::test]
    async fn unrecognized_kb_body_is_an_error() {
        let kb = StubKb::answering(json!({"unexpected": true}));
        let state = after_input("hi");
        let err = router(kb).route(fallback_output(), state).await.unwrap_err();
        assert!(matches!(err, ConnectorError::UnrecognizedResponse(_)));
    }
}
