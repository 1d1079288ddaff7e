use serde::{Deserialize, Serialize};

/// Normalized, channel-ready message unit written into `output.generic`.
///
/// Wire:
/// - `{ "response_type": "text", "text": "..." }`
/// - `{ "response_type": "option", "title": "...", "options": [{ "label": "...", "value": { "input": { "text": "..." } } }] }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response_type", rename_all = "snake_case")]
pub enum OutputBlock {
    Text {
        text: String,
    },
    #[serde(rename = "option")]
    Options {
        title: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<BlockOption>,
    },
}

/// A selectable button. Picking it makes the assistant platform send
/// `value.input.text` as the next user utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockOption {
    pub label: String,
    pub value: OptionValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionValue {
    pub input: OptionInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionInput {
    pub text: String,
}

impl OutputBlock {
    pub fn text(text: impl Into<String>) -> Self {
        OutputBlock::Text { text: text.into() }
    }

    pub fn options(title: impl Into<String>, options: Vec<BlockOption>) -> Self {
        OutputBlock::Options {
            title: title.into(),
            options,
        }
    }
}

impl BlockOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: OptionValue {
                input: OptionInput { text: value.into() },
            },
        }
    }

    /// The text sent back when this option is picked.
    pub fn value_text(&self) -> &str {
        &self.value.input.text
    }
}
