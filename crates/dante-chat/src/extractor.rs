//! Reply extraction from flow engine responses.
//!
//! The flow engine has answered in several JSON shapes over time. Each known
//! shape is a [`ReplyStrategy`]; strategies are tried in a fixed order and
//! the first one that yields a non-empty string wins.

use serde_json::Value;

/// Shown when a response matches no known shape.
pub const UNRECOGNIZED_REPLY: &str = "[Formato de respuesta no reconocido]";

/// One known location of the reply text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyStrategy {
    /// `outputs[0].outputs[0].results.message.text`
    NestedOutputs,
    /// `outputs.message.message.text`
    OutputsMessage,
    /// `artifacts.message`
    Artifacts,
    /// `messages[0].message`
    MessagesList,
    /// `result`
    Result,
    /// `message`
    Message,
}

impl ReplyStrategy {
    /// Evaluation order.
    pub const ORDER: [ReplyStrategy; 6] = [
        ReplyStrategy::NestedOutputs,
        ReplyStrategy::OutputsMessage,
        ReplyStrategy::Artifacts,
        ReplyStrategy::MessagesList,
        ReplyStrategy::Result,
        ReplyStrategy::Message,
    ];

    /// JSON pointer to the reply text.
    pub fn pointer(&self) -> &'static str {
        match self {
            ReplyStrategy::NestedOutputs => "/outputs/0/outputs/0/results/message/text",
            ReplyStrategy::OutputsMessage => "/outputs/message/message/text",
            ReplyStrategy::Artifacts => "/artifacts/message",
            ReplyStrategy::MessagesList => "/messages/0/message",
            ReplyStrategy::Result => "/result",
            ReplyStrategy::Message => "/message",
        }
    }

    /// The reply text at this strategy's location, if it is a non-empty
    /// string.
    pub fn apply<'a>(&self, response: &'a Value) -> Option<&'a str> {
        response
            .pointer(self.pointer())
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedReply {
    Found {
        text: String,
        strategy: ReplyStrategy,
    },
    Unrecognized,
}

impl ExtractedReply {
    /// The reply text, or the unrecognized-format placeholder.
    pub fn text(&self) -> &str {
        match self {
            ExtractedReply::Found { text, .. } => text,
            ExtractedReply::Unrecognized => UNRECOGNIZED_REPLY,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, ExtractedReply::Found { .. })
    }
}

/// Applies [`ReplyStrategy::ORDER`] to a response body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyExtractor;

impl ReplyExtractor {
    pub fn extract(response: &Value) -> ExtractedReply {
        ReplyStrategy::ORDER
            .iter()
            .find_map(|strategy| {
                strategy.apply(response).map(|text| ExtractedReply::Found {
                    text: text.to_string(),
                    strategy: *strategy,
                })
            })
            .unwrap_or(ExtractedReply::Unrecognized)
    }
}
