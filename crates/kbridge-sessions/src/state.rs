use kbridge_protocol::Turn;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, SessionError};
use crate::store::SessionStore;

/// Storage keys of the per-identity session.
pub mod keys {
    pub const USER_INPUT: &str = "user_input";
    pub const EXPECTING_REPLY: &str = "expecting_reply";
    pub const OPTIONS: &str = "options";
    pub const LAST_USER_QUESTION: &str = "lastUserQuestion";
    pub const ASKING_FOR_ESCALATION: &str = "askingForEscalation";
    pub const ESCALATION_TYPE: &str = "escalationType";
    pub const ESCALATION_V2: &str = "escalationV2";
    pub const KB_SESSION_TOKEN: &str = "kbSessionToken";
}

/// Where a pending option came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    Polar,
    MultipleChoice,
    ListValue,
}

/// A selectable option presented to the user and awaiting a choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOption {
    pub label: String,
    pub value: String,
    pub kind: OptionKind,
}

impl StoredOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            kind,
        }
    }
}

/// Options presented on the previous turn plus the utterance that produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSelection {
    pub options: Vec<StoredOption>,
    pub question: String,
}

impl PendingSelection {
    /// Match a user reply against the options, by label (case-insensitive)
    /// or by 1-based position ("2" picks the second option).
    pub fn resolve(&self, reply: &str) -> Option<&StoredOption> {
        let reply = reply.trim().to_lowercase();
        if reply.is_empty() {
            return None;
        }
        if let Some(found) = self
            .options
            .iter()
            .find(|o| o.label.trim().to_lowercase() == reply)
        {
            return Some(found);
        }
        reply
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.options.get(i))
    }
}

/// Typed view of one identity's session.
///
/// `expecting_reply`, `options` and `lastUserQuestion` are modelled as a single
/// optional [`PendingSelection`], so they are always set and cleared together.
/// A pending selection and an open escalation question exclude each other:
/// whichever was opened last wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Last captured input turn.
    pub user_input: Option<Turn>,
    pending: Option<PendingSelection>,
    asking_for_escalation: bool,
    pub escalation_type: Option<String>,
    pub escalation_v2: bool,
    /// Knowledge-base conversation token for this identity.
    pub kb_session_token: Option<String>,
}

impl SessionState {
    /// True iff the previous output presented options awaiting a choice.
    pub fn expecting_reply(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingSelection> {
        self.pending.as_ref()
    }

    /// Record presented options and the question that produced them.
    ///
    /// An empty option list leaves nothing to choose from and clears any
    /// pending selection instead. Returns whether the state now awaits a reply.
    /// Presenting options closes an open escalation question.
    pub fn await_reply(&mut self, options: Vec<StoredOption>, question: impl Into<String>) -> bool {
        if options.is_empty() {
            self.pending = None;
            return false;
        }
        self.asking_for_escalation = false;
        self.pending = Some(PendingSelection {
            options,
            question: question.into(),
        });
        true
    }

    /// Drop any pending selection.
    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Consume the pending selection, leaving the state not expecting a reply.
    pub fn take_pending(&mut self) -> Option<PendingSelection> {
        self.pending.take()
    }

    /// The bot asked whether the user wants a human agent.
    pub fn asking_for_escalation(&self) -> bool {
        self.asking_for_escalation
    }

    /// Open the "do you want a human agent?" bookkeeping, dropping any
    /// pending selection.
    pub fn open_escalation(&mut self, escalation_type: impl Into<String>) {
        self.pending = None;
        self.asking_for_escalation = true;
        self.escalation_type = Some(escalation_type.into());
        self.escalation_v2 = true;
    }

    /// Close the escalation question, keeping the type/version markers.
    pub fn close_escalation(&mut self) {
        self.asking_for_escalation = false;
    }

    /// Clear the escalation type/version markers after a real escalation.
    pub fn clear_escalation_markers(&mut self) {
        self.escalation_type = None;
        self.escalation_v2 = false;
    }

    /// Read the typed state for `identity`.
    ///
    /// Values that no longer decode are logged and treated as unset so a
    /// corrupted key cannot wedge a user's conversation.
    pub fn load(store: &dyn SessionStore, identity: &str) -> Result<Self> {
        let expecting: bool = read(store, identity, keys::EXPECTING_REPLY)?.unwrap_or(false);
        let options: Vec<StoredOption> = if expecting {
            read(store, identity, keys::OPTIONS)?.unwrap_or_default()
        } else {
            Vec::new()
        };
        // A flag without options has nothing left to choose from.
        let pending = if options.is_empty() {
            None
        } else {
            Some(PendingSelection {
                options,
                question: read(store, identity, keys::LAST_USER_QUESTION)?.unwrap_or_default(),
            })
        };

        // A stored selection wins over an open question.
        let asking_for_escalation = pending.is_none()
            && read(store, identity, keys::ASKING_FOR_ESCALATION)?.unwrap_or(false);

        Ok(Self {
            user_input: read(store, identity, keys::USER_INPUT)?,
            pending,
            asking_for_escalation,
            escalation_type: read(store, identity, keys::ESCALATION_TYPE)?,
            escalation_v2: read(store, identity, keys::ESCALATION_V2)?.unwrap_or(false),
            kb_session_token: read(store, identity, keys::KB_SESSION_TOKEN)?,
        })
    }

    /// Write every key back for `identity`; unset values are deleted.
    pub fn save(&self, store: &dyn SessionStore, identity: &str) -> Result<()> {
        write(store, identity, keys::USER_INPUT, self.user_input.as_ref())?;
        store.set(identity, keys::EXPECTING_REPLY, &Value::Bool(self.expecting_reply()))?;
        write(
            store,
            identity,
            keys::OPTIONS,
            self.pending.as_ref().map(|p| &p.options),
        )?;
        write(
            store,
            identity,
            keys::LAST_USER_QUESTION,
            self.pending.as_ref().map(|p| &p.question),
        )?;
        store.set(
            identity,
            keys::ASKING_FOR_ESCALATION,
            &Value::Bool(self.asking_for_escalation),
        )?;
        write(store, identity, keys::ESCALATION_TYPE, self.escalation_type.as_ref())?;
        write(
            store,
            identity,
            keys::ESCALATION_V2,
            self.escalation_v2.then_some(&true),
        )?;
        write(store, identity, keys::KB_SESSION_TOKEN, self.kb_session_token.as_ref())?;
        Ok(())
    }
}

fn read<T: DeserializeOwned>(store: &dyn SessionStore, identity: &str, key: &str) -> Result<Option<T>> {
    let Some(value) = store.get(identity, key)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            warn!(identity, key, error = %e, "discarding undecodable session value");
            Ok(None)
        }
    }
}

fn write<T: Serialize>(
    store: &dyn SessionStore,
    identity: &str,
    key: &str,
    value: Option<&T>,
) -> Result<()> {
    match value {
        Some(v) => {
            let json = serde_json::to_value(v).map_err(|source| SessionError::InvalidValue {
                key: key.to_string(),
                source,
            })?;
            store.set(identity, key, &json)
        }
        None => store.delete(identity, key),
    }
}
