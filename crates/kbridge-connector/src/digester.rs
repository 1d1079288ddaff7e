//! Knowledge-base response digestion.
//!
//! Accepted response shapes, checked in order:
//! - `{"answers": [...]}`: a list of tagged items
//! - a single tagged item
//! - `{"messages": [{"text": {"body": "..."}}, ...]}`: plain fallback text
//!
//! Anything else is rejected as an unrecognized response.

use kbridge_protocol::chatbot::{ActionField, Answer, ExtendedContents, ListValue, Question};
use kbridge_protocol::{BlockOption, KbMessage, KbRequest, MessageKind, OutputBlock, Turn, TurnOutput};
use kbridge_sessions::{OptionKind, PendingSelection, SessionState, StoredOption};
use serde_json::Value;
use tracing::debug;

use crate::clean::clean_message;
use crate::error::{ConnectorError, Result};
use crate::sentinel::Sentinel;
use crate::threshold::{self, Decision};

/// Maximum number of list values offered as options.
pub const LIST_OPTION_LIMIT: usize = 6;

enum ResponseShape<'a> {
    Messages(Vec<&'a Value>),
    FallbackText(&'a str),
}

fn shape(response: &Value) -> Result<ResponseShape<'_>> {
    if let Some(answers) = response.get("answers").and_then(Value::as_array) {
        return Ok(ResponseShape::Messages(answers.iter().collect()));
    }
    if MessageKind::of(response).is_some() {
        return Ok(ResponseShape::Messages(vec![response]));
    }
    let body = response
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.first())
        .and_then(|first| first.pointer("/text/body"))
        .and_then(Value::as_str);
    match body {
        Some(body) => Ok(ResponseShape::FallbackText(body)),
        None => Err(ConnectorError::UnrecognizedResponse(response.to_string())),
    }
}

/// Converts between assistant turns and knowledge-base requests/responses.
#[derive(Debug, Clone)]
pub struct ResponseDigester {
    threshold: f64,
}

impl ResponseDigester {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Decide whether the assistant's output should be replaced by a
    /// knowledge-base answer. Consumes any pending selection.
    pub fn decide(&self, state: &mut SessionState, output: &TurnOutput) -> Decision {
        threshold::decide(state, output, self.threshold)
    }

    /// Build the knowledge-base request for a captured input turn.
    ///
    /// Returns `None` when there is nothing to ask. A reply that names one
    /// of the `pending` options is sent as that option's value.
    pub fn digest_to_api(&self, input: &Turn, pending: Option<&PendingSelection>) -> Option<KbRequest> {
        let text = input.utterance()?;
        if text.trim().is_empty() {
            return None;
        }
        let message = match pending.and_then(|p| p.resolve(text)) {
            Some(option) => {
                debug!(label = %option.label, "reply resolved to pending option");
                option.value.clone()
            }
            None => text.to_string(),
        };
        Some(KbRequest::new(message))
    }

    /// Turn a knowledge-base response into output blocks, updating the
    /// expecting-reply state. `question` is the utterance that was asked.
    pub fn digest_from_api(
        &self,
        response: &Value,
        question: &str,
        state: &mut SessionState,
    ) -> Result<Vec<OutputBlock>> {
        let messages = match shape(response)? {
            ResponseShape::FallbackText(body) => {
                return Ok(vec![OutputBlock::text(clean_message(body))]);
            }
            ResponseShape::Messages(messages) => messages,
        };

        let mut blocks = Vec::new();
        for raw in messages {
            let message = KbMessage::classify(raw)
                .map_err(|e| ConnectorError::UnrecognizedResponse(format!("{e}: {raw}")))?;
            match message {
                Some(KbMessage::Answer(answer)) => {
                    blocks.extend(self.digest_answer(&answer, question, state));
                }
                Some(KbMessage::PolarQuestion(q)) => {
                    blocks.push(self.digest_question(&q, OptionKind::Polar, question, state));
                }
                Some(KbMessage::MultipleChoiceQuestion(q)) => {
                    blocks.push(self.digest_question(&q, OptionKind::MultipleChoice, question, state));
                }
                Some(KbMessage::ExtendedContentsAnswer(contents)) => {
                    blocks.extend(self.digest_extended_contents(&contents));
                }
                None => debug!(item = %raw, "skipping untyped knowledge-base item"),
            }
        }
        Ok(blocks)
    }

    fn digest_answer(&self, answer: &Answer, question: &str, state: &mut SessionState) -> Vec<OutputBlock> {
        let mut blocks = image_blocks(&answer.message);

        if !answer.message.trim().is_empty() {
            blocks.push(OutputBlock::text(clean_message(&answer.message)));
        }

        let direct_call = answer.attributes.direct_call.as_deref();
        let exit = Sentinel::Goodbye.matches(direct_call);

        if !exit {
            if let Some(side) = answer.attributes.sidebubble_text.as_deref() {
                if !side.trim().is_empty() {
                    blocks.push(OutputBlock::text(clean_message(side)));
                }
            }
            if let Some(field) = &answer.action_field {
                if field.field_type != Sentinel::DefaultField.as_str() {
                    blocks.extend(self.digest_action_field(field, question, state));
                }
            }
        }

        if Sentinel::EscalationStart.matches(direct_call) {
            state.open_escalation(Sentinel::EscalationStart.as_str());
        }

        // An answer always ends the selection, including one a list just offered.
        state.clear_pending();
        blocks
    }

    fn digest_action_field(
        &self,
        field: &ActionField,
        question: &str,
        state: &mut SessionState,
    ) -> Option<OutputBlock> {
        if field.field_type != Sentinel::ListField.as_str() {
            return None;
        }
        let values = field.list_values.as_ref()?;
        Some(self.digest_list_values(&values.values, question, state))
    }

    /// Offer at most [`LIST_OPTION_LIMIT`] list values as one option block.
    ///
    /// A non-empty list leaves the state expecting a reply with the offered
    /// options.
    pub fn digest_list_values(
        &self,
        values: &[ListValue],
        question: &str,
        state: &mut SessionState,
    ) -> OutputBlock {
        let offered = &values[..values.len().min(LIST_OPTION_LIMIT)];
        let options = offered
            .iter()
            .map(|v| BlockOption::new(&v.option, &v.option))
            .collect();

        if !offered.is_empty() {
            let stored = offered
                .iter()
                .map(|v| StoredOption::new(&v.option, &v.option, OptionKind::ListValue))
                .collect();
            state.await_reply(stored, question);
        }
        OutputBlock::options("", options)
    }

    fn digest_question(
        &self,
        q: &Question,
        kind: OptionKind,
        question: &str,
        state: &mut SessionState,
    ) -> OutputBlock {
        let stored: Vec<StoredOption> = q
            .options
            .iter()
            .map(|o| StoredOption::new(&o.label, o.value_text(), kind))
            .collect();
        let options = stored
            .iter()
            .map(|o| BlockOption::new(&o.label, &o.value))
            .collect();
        state.await_reply(stored, question);
        OutputBlock::options(clean_message(&q.message), options)
    }

    fn digest_extended_contents(&self, contents: &ExtendedContents) -> Vec<OutputBlock> {
        contents
            .sub_answers
            .iter()
            .map(|sub| OutputBlock::options(clean_message(&sub.message), Vec::new()))
            .collect()
    }
}

/// Image content in answers. Voice channels cannot render it, so no blocks.
fn image_blocks(_message: &str) -> Vec<OutputBlock> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn digester() -> ResponseDigester {
        ResponseDigester::new(0.5)
    }

    fn list_values(n: usize) -> Vec<ListValue> {
        (0..n)
            .map(|i| ListValue {
                option: format!("option {i}"),
            })
            .collect()
    }

    #[test]
    fn list_of_nine_offers_first_six() {
        let mut state = SessionState::default();
        let block = digester().digest_list_values(&list_values(9), "pick one", &mut state);

        let OutputBlock::Options { title, options } = block else {
            panic!("expected option block");
        };
        assert_eq!(title, "");
        assert_eq!(options.len(), 6);
        assert_eq!(options[5].label, "option 5");
        assert_eq!(options[5].value_text(), "option 5");
        assert!(!options.iter().any(|o| o.label == "option 6"));

        let pending = state.pending().unwrap();
        assert_eq!(pending.options.len(), 6);
        assert_eq!(pending.question, "pick one");
        assert!(pending.options.iter().all(|o| o.kind == OptionKind::ListValue));
    }

    #[test]
    fn empty_list_does_not_expect_reply() {
        let mut state = SessionState::default();
        let block = digester().digest_list_values(&[], "pick one", &mut state);
        assert_eq!(block, OutputBlock::options("", Vec::new()));
        assert!(!state.expecting_reply());
    }

    #[test]
    fn multiple_choice_uses_title_as_value_and_label_as_label() {
        let mut state = SessionState::default();
        let response = json!({
            "type": "multipleChoiceQuestion",
            "message": "Which one?",
            "options": [
                {"label": "A", "value": 1},
                {"label": "B", "value": 2, "attributes": {"title": "X"}},
                {"label": "C", "value": "c"}
            ]
        });
        let blocks = digester()
            .digest_from_api(&response, "tell me", &mut state)
            .unwrap();

        assert_eq!(
            blocks,
            vec![OutputBlock::options(
                "Which one?",
                vec![
                    BlockOption::new("A", "1"),
                    BlockOption::new("B", "X"),
                    BlockOption::new("C", "c"),
                ]
            )]
        );
        let pending = state.pending().unwrap();
        assert_eq!(pending.question, "tell me");
        assert_eq!(
            pending.options,
            vec![
                StoredOption::new("A", "1", OptionKind::MultipleChoice),
                StoredOption::new("B", "X", OptionKind::MultipleChoice),
                StoredOption::new("C", "c", OptionKind::MultipleChoice),
            ]
        );
    }

    #[test]
    fn polar_question_keeps_raw_values() {
        let mut state = SessionState::default();
        let response = json!({"answers": [{
            "type": "polarQuestion",
            "message": "Did that help?",
            "options": [{"label": "Yes", "value": "yes"}, {"label": "No", "value": 0}]
        }]});
        let blocks = digester()
            .digest_from_api(&response, "help", &mut state)
            .unwrap();
        assert_eq!(
            blocks,
            vec![OutputBlock::options(
                "Did that help?",
                vec![BlockOption::new("Yes", "yes"), BlockOption::new("No", "0")]
            )]
        );
        assert!(state.expecting_reply());
    }

    #[test]
    fn fallback_messages_produce_one_text_block() {
        let mut state = SessionState::default();
        let response = json!({"messages": [{"text": {"body": "hello"}}, {"text": {"body": "ignored"}}]});
        let blocks = digester()
            .digest_from_api(&response, "q", &mut state)
            .unwrap();
        assert_eq!(blocks, vec![OutputBlock::text("hello")]);
    }

    #[test]
    fn unknown_shape_is_rejected() {
        let mut state = SessionState::default();
        let err = digester()
            .digest_from_api(&json!({"foo": 1}), "q", &mut state)
            .unwrap_err();
        assert!(matches!(err, ConnectorError::UnrecognizedResponse(raw) if raw.contains("foo")));
    }

    #[test]
    fn mistyped_members_fall_back_to_defaults() {
        let mut state = SessionState::default();
        let response = json!({"type": "polarQuestion", "message": "Sure?", "options": "nope"});
        let blocks = digester().digest_from_api(&response, "q", &mut state).unwrap();
        assert_eq!(blocks, vec![OutputBlock::options("Sure?", Vec::new())]);
        assert!(!state.expecting_reply());
    }

    #[test]
    fn untyped_items_are_skipped() {
        let mut state = SessionState::default();
        let response = json!({"answers": [
            {"type": "somethingNew", "message": "?"},
            {"message": "no type"},
            {"type": "answer", "message": "kept"}
        ]});
        let blocks = digester()
            .digest_from_api(&response, "q", &mut state)
            .unwrap();
        assert_eq!(blocks, vec![OutputBlock::text("kept")]);
    }

    #[test]
    fn answer_leaves_state_not_expecting_reply() {
        let mut state = SessionState::default();
        state.await_reply(
            vec![StoredOption::new("Yes", "Yes", OptionKind::Polar)],
            "earlier",
        );
        let response = json!({"answers": [{"type": "answer", "message": "Done."}]});
        digester()
            .digest_from_api(&response, "q", &mut state)
            .unwrap();
        assert!(!state.expecting_reply());
        assert!(state.pending().is_none());
    }

    #[test]
    fn answer_with_list_emits_options_but_ends_selection() {
        let mut state = SessionState::default();
        let response = json!({"answers": [{
            "type": "answer",
            "message": "Pick a city",
            "actionField": {
                "fieldType": "list",
                "listValues": {"values": [{"option": "Rome"}, {"option": "Oslo"}]}
            }
        }]});
        let blocks = digester()
            .digest_from_api(&response, "cities", &mut state)
            .unwrap();
        assert_eq!(
            blocks,
            vec![
                OutputBlock::text("Pick a city"),
                OutputBlock::options(
                    "",
                    vec![BlockOption::new("Rome", "Rome"), BlockOption::new("Oslo", "Oslo")]
                ),
            ]
        );
        assert!(!state.expecting_reply());
    }

    #[test]
    fn side_bubble_is_appended_unless_exit() {
        let mut state = SessionState::default();
        let chatty = json!({"type": "answer", "message": "Main", "attributes": {"SIDEBUBBLE_TEXT": "Side&nbsp;note"}});
        let blocks = digester().digest_from_api(&chatty, "q", &mut state).unwrap();
        assert_eq!(blocks, vec![OutputBlock::text("Main"), OutputBlock::text("Side note")]);

        let goodbye = json!({
            "type": "answer",
            "message": "Bye",
            "attributes": {"SIDEBUBBLE_TEXT": "Side", "DIRECT_CALL": "sys-goodbye"},
            "actionField": {"fieldType": "list", "listValues": {"values": [{"option": "a"}]}}
        });
        let blocks = digester().digest_from_api(&goodbye, "q", &mut state).unwrap();
        assert_eq!(blocks, vec![OutputBlock::text("Bye")]);
    }

    #[test]
    fn blank_answer_emits_nothing() {
        let mut state = SessionState::default();
        let response = json!({"type": "answer", "message": "  \n "});
        assert!(digester().digest_from_api(&response, "q", &mut state).unwrap().is_empty());
    }

    #[test]
    fn escalation_start_opens_escalation() {
        let mut state = SessionState::default();
        let response = json!({
            "type": "answer",
            "message": "Do you want to talk to an agent?",
            "attributes": {"DIRECT_CALL": "escalationStart"}
        });
        digester().digest_from_api(&response, "q", &mut state).unwrap();
        assert!(state.asking_for_escalation());
        assert_eq!(state.escalation_type.as_deref(), Some("escalationStart"));
        assert!(state.escalation_v2);
    }

    #[test]
    fn question_after_escalation_start_closes_the_escalation() {
        let mut state = SessionState::default();
        let response = json!({"answers": [
            {"type": "answer", "message": "An agent could help.", "attributes": {"DIRECT_CALL": "escalationStart"}},
            {"type": "polarQuestion", "message": "Did that help?", "options": [{"label": "Yes", "value": "yes"}]}
        ]});
        digester().digest_from_api(&response, "help", &mut state).unwrap();
        assert!(state.expecting_reply());
        assert!(!state.asking_for_escalation());
    }

    #[test]
    fn escalation_start_after_question_drops_the_selection() {
        let mut state = SessionState::default();
        let response = json!({"answers": [
            {"type": "polarQuestion", "message": "Did that help?", "options": [{"label": "Yes", "value": "yes"}]},
            {"type": "answer", "message": "An agent could help.", "attributes": {"DIRECT_CALL": "escalationStart"}}
        ]});
        digester().digest_from_api(&response, "help", &mut state).unwrap();
        assert!(state.asking_for_escalation());
        assert!(!state.expecting_reply());
    }

    #[test]
    fn extended_contents_become_titled_blocks() {
        let mut state = SessionState::default();
        let response = json!({
            "type": "extendedContentsAnswer",
            "message": "Several answers",
            "subAnswers": [{"message": "First"}, {"message": "Second\n\nline"}]
        });
        let blocks = digester().digest_from_api(&response, "q", &mut state).unwrap();
        assert_eq!(
            blocks,
            vec![
                OutputBlock::options("First", Vec::new()),
                OutputBlock::options("Second\nline", Vec::new()),
            ]
        );
        assert!(!state.expecting_reply());
    }

    #[test]
    fn digest_to_api_skips_blank_input() {
        assert!(digester().digest_to_api(&Turn::with_input("   "), None).is_none());
        assert!(digester().digest_to_api(&Turn::default(), None).is_none());
        assert_eq!(
            digester().digest_to_api(&Turn::with_input("opening hours"), None),
            Some(KbRequest::new("opening hours"))
        );
    }

    #[test]
    fn digest_to_api_resolves_spoken_choice() {
        let pending = PendingSelection {
            options: vec![
                StoredOption::new("Barcelona", "BCN", OptionKind::ListValue),
                StoredOption::new("Madrid", "MAD", OptionKind::ListValue),
            ],
            question: "city".into(),
        };
        let d = digester();
        assert_eq!(
            d.digest_to_api(&Turn::with_input("madrid"), Some(&pending)),
            Some(KbRequest::new("MAD"))
        );
        assert_eq!(
            d.digest_to_api(&Turn::with_input("something else"), Some(&pending)),
            Some(KbRequest::new("something else"))
        );
    }
}
