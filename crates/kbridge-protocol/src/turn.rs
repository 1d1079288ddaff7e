use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix the assistant platform puts in front of unauthenticated user ids.
const ANONYMOUS_PREFIX: &str = "anonymous_";

/// HTTP body of one webhook exchange.
/// Wire: `{ "payload": { "input": {...} | "output": {...}, "context": {...} } }`
///
/// Fields other than `payload` are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub payload: Turn,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One exchange unit from the assistant platform.
///
/// A well-formed turn carries exactly one of `input` (the user spoke) or
/// `output` (the platform produced a candidate answer).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<TurnInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TurnOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnInput {
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Candidate output produced by the assistant platform, with the diagnostic
/// trails used by the threshold decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intents: Option<Vec<Intent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Entity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<OutputDebug>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputDebug {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes_visited: Option<Vec<NodeVisited>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_events: Option<Vec<TurnEvent>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeVisited {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<TurnEventSource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnEventSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Turn {
    /// Build an input turn carrying `text`.
    pub fn with_input(text: impl Into<String>) -> Self {
        Self {
            input: Some(TurnInput {
                text: text.into(),
                extra: Map::new(),
            }),
            ..Self::default()
        }
    }

    /// The user utterance of an input turn.
    pub fn utterance(&self) -> Option<&str> {
        self.input.as_ref().map(|i| i.text.as_str())
    }

    /// External user identity: `context.global.system.user_id` without the
    /// `anonymous_` prefix.
    pub fn external_id(&self) -> Option<String> {
        let user_id = self
            .context
            .as_ref()?
            .pointer("/global/system/user_id")?
            .as_str()?;
        let id = user_id.strip_prefix(ANONYMOUS_PREFIX).unwrap_or(user_id);
        if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        }
    }
}

impl TurnOutput {
    pub fn turn_events(&self) -> &[TurnEvent] {
        self.debug
            .as_ref()
            .and_then(|d| d.turn_events.as_deref())
            .unwrap_or_default()
    }

    pub fn nodes_visited(&self) -> &[NodeVisited] {
        self.debug
            .as_ref()
            .and_then(|d| d.nodes_visited.as_deref())
            .unwrap_or_default()
    }

    pub fn intents(&self) -> &[Intent] {
        self.intents.as_deref().unwrap_or_default()
    }

    pub fn entities(&self) -> &[Entity] {
        self.entities.as_deref().unwrap_or_default()
    }
}

impl TurnEvent {
    pub fn action(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.action.as_deref())
    }
}
