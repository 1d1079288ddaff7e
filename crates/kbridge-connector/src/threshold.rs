use kbridge_protocol::TurnOutput;
use kbridge_sessions::{PendingSelection, SessionState};

use crate::sentinel::Sentinel;

/// Rule of the threshold table that settled the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    PendingSelection,
    FallbackEvent,
    WelcomeEvent,
    FallbackNode,
    WelcomeNode,
    ConfidentIntent,
    ConfidentEntity,
    NoSignal,
}

impl Trigger {
    /// Whether this rule sends the turn to the knowledge base.
    pub fn escalates(self) -> bool {
        matches!(
            self,
            Trigger::PendingSelection | Trigger::FallbackEvent | Trigger::FallbackNode
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::PendingSelection => "pending_selection",
            Trigger::FallbackEvent => "fallback_event",
            Trigger::WelcomeEvent => "welcome_event",
            Trigger::FallbackNode => "fallback_node",
            Trigger::WelcomeNode => "welcome_node",
            Trigger::ConfidentIntent => "confident_intent",
            Trigger::ConfidentEntity => "confident_entity",
            Trigger::NoSignal => "no_signal",
        }
    }
}

/// Outcome of the escalate-to-knowledge-base classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub trigger: Trigger,
    /// Selection consumed by the pending-selection rule.
    pub pending: Option<PendingSelection>,
}

impl Decision {
    fn rule(trigger: Trigger) -> Self {
        Self {
            trigger,
            pending: None,
        }
    }

    pub fn escalate(&self) -> bool {
        self.trigger.escalates()
    }
}

/// Classify an output turn. First matching rule wins:
///
/// 1. a pending selection is consumed and always escalates
/// 2. the first sentinel among the turn events
/// 3. the first sentinel among the visited nodes
/// 4. a confident intent keeps the assistant's answer
/// 5. a confident entity keeps the assistant's answer
/// 6. otherwise the assistant's answer is kept
pub fn decide(state: &mut SessionState, output: &TurnOutput, threshold: f64) -> Decision {
    if let Some(pending) = state.take_pending() {
        return Decision {
            trigger: Trigger::PendingSelection,
            pending: Some(pending),
        };
    }

    for event in output.turn_events() {
        let action = event.action();
        if Sentinel::FallbackAction.matches(action) {
            return Decision::rule(Trigger::FallbackEvent);
        }
        if Sentinel::WelcomeAction.matches(action) {
            return Decision::rule(Trigger::WelcomeEvent);
        }
    }

    for node in output.nodes_visited() {
        let title = node.title.as_deref();
        if Sentinel::FallbackNode.matches(title) {
            return Decision::rule(Trigger::FallbackNode);
        }
        if Sentinel::WelcomeNode.matches(title) {
            return Decision::rule(Trigger::WelcomeNode);
        }
    }

    if output.intents().iter().any(|i| i.confidence >= threshold) {
        return Decision::rule(Trigger::ConfidentIntent);
    }
    if output.entities().iter().any(|e| e.confidence >= threshold) {
        return Decision::rule(Trigger::ConfidentEntity);
    }
    Decision::rule(Trigger::NoSignal)
}
