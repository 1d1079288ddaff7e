//! Knowledge-base chatbot API wire types.
//!
//! Response items are tagged by `type`. Field shapes from the API are loose
//! (attributes may arrive as an empty array, display strings as `null`), so
//! optional members deserialize leniently and fall back to their default.

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Request body for `POST /v1/conversation/message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbRequest {
    pub message: String,
}

impl KbRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Recognized values of a response item's `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Answer,
    PolarQuestion,
    MultipleChoiceQuestion,
    ExtendedContentsAnswer,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Answer,
        MessageKind::PolarQuestion,
        MessageKind::MultipleChoiceQuestion,
        MessageKind::ExtendedContentsAnswer,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            MessageKind::Answer => "answer",
            MessageKind::PolarQuestion => "polarQuestion",
            MessageKind::MultipleChoiceQuestion => "multipleChoiceQuestion",
            MessageKind::ExtendedContentsAnswer => "extendedContentsAnswer",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Kind of a raw response item, `None` when untagged or unknown.
    pub fn of(value: &Value) -> Option<Self> {
        value.get("type").and_then(Value::as_str).and_then(Self::from_tag)
    }
}

/// One classified knowledge-base response item.
#[derive(Debug, Clone, PartialEq)]
pub enum KbMessage {
    Answer(Answer),
    PolarQuestion(Question),
    MultipleChoiceQuestion(Question),
    ExtendedContentsAnswer(ExtendedContents),
}

impl KbMessage {
    /// Classify a raw item by its `type` tag and decode the matching body.
    ///
    /// Returns `Ok(None)` for unknown or missing tags.
    pub fn classify(value: &Value) -> Result<Option<Self>, serde_json::Error> {
        let Some(kind) = MessageKind::of(value) else {
            return Ok(None);
        };
        let message = match kind {
            MessageKind::Answer => KbMessage::Answer(Answer::deserialize(value)?),
            MessageKind::PolarQuestion => KbMessage::PolarQuestion(Question::deserialize(value)?),
            MessageKind::MultipleChoiceQuestion => {
                KbMessage::MultipleChoiceQuestion(Question::deserialize(value)?)
            }
            MessageKind::ExtendedContentsAnswer => {
                KbMessage::ExtendedContentsAnswer(ExtendedContents::deserialize(value)?)
            }
        };
        Ok(Some(message))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    #[serde(default, deserialize_with = "lenient")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient")]
    pub attributes: AnswerAttributes,
    #[serde(default, deserialize_with = "lenient")]
    pub action_field: Option<ActionField>,
}

/// Side-channel directives attached to an answer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AnswerAttributes {
    #[serde(rename = "DIRECT_CALL", default)]
    pub direct_call: Option<String>,
    #[serde(rename = "SIDEBUBBLE_TEXT", default)]
    pub sidebubble_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionField {
    #[serde(default, deserialize_with = "lenient")]
    pub field_type: String,
    #[serde(default, deserialize_with = "lenient")]
    pub list_values: Option<ListValues>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ListValues {
    #[serde(default, deserialize_with = "lenient")]
    pub values: Vec<ListValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ListValue {
    #[serde(default, deserialize_with = "lenient")]
    pub option: String,
}

/// Body shared by polar and multiple-choice questions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Question {
    #[serde(default, deserialize_with = "lenient")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient")]
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QuestionOption {
    #[serde(default, deserialize_with = "lenient")]
    pub label: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, deserialize_with = "lenient")]
    pub attributes: Option<OptionAttributes>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OptionAttributes {
    #[serde(default)]
    pub title: Option<String>,
}

impl QuestionOption {
    /// Underlying value: the nested attribute title when present, otherwise
    /// the raw value (strings verbatim, other scalars rendered as JSON).
    pub fn value_text(&self) -> String {
        if let Some(title) = self.attributes.as_ref().and_then(|a| a.title.as_ref()) {
            return title.clone();
        }
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedContents {
    #[serde(default, deserialize_with = "lenient")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient")]
    pub sub_answers: Vec<SubAnswer>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubAnswer {
    #[serde(default, deserialize_with = "lenient")]
    pub message: String,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_tag_is_not_classified() {
        let raw = json!({"type": "escalationForm", "message": "hi"});
        assert!(KbMessage::classify(&raw).unwrap().is_none());
        assert!(KbMessage::classify(&json!({"message": "untagged"})).unwrap().is_none());
    }

    #[test]
    fn empty_array_attributes_are_ignored() {
        let raw = json!({"type": "answer", "message": "hello", "attributes": []});
        let Some(KbMessage::Answer(answer)) = KbMessage::classify(&raw).unwrap() else {
            panic!("expected an answer");
        };
        assert_eq!(answer.message, "hello");
        assert_eq!(answer.attributes, AnswerAttributes::default());
        assert!(answer.action_field.is_none());
    }

    #[test]
    fn list_action_field_is_decoded() {
        let raw = json!({
            "type": "answer",
            "message": "Pick a city",
            "actionField": {
                "fieldType": "list",
                "listValues": {"values": [{"option": "Paris", "label": ["Paris", "PAR"]}]}
            }
        });
        let Some(KbMessage::Answer(answer)) = KbMessage::classify(&raw).unwrap() else {
            panic!("expected an answer");
        };
        let field = answer.action_field.expect("action field");
        assert_eq!(field.field_type, "list");
        assert_eq!(field.list_values.unwrap().values[0].option, "Paris");
    }

    #[test]
    fn option_value_prefers_attribute_title() {
        let with_title: QuestionOption = serde_json::from_value(json!({
            "label": "Yes", "value": 1, "attributes": {"title": "Confirm"}
        }))
        .unwrap();
        let numeric: QuestionOption =
            serde_json::from_value(json!({"label": "No", "value": 2})).unwrap();
        assert_eq!(with_title.value_text(), "Confirm");
        assert_eq!(numeric.value_text(), "2");
    }

    #[test]
    fn tags_round_trip_through_kind() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_tag(kind.tag()), Some(kind));
        }
    }
}
