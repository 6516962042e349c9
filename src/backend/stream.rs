//! Newline-delimited record decoding.
//!
//! Every CLI backend emits a stream of independently-parseable JSON
//! records, one per line. The decode contract is shared; only the
//! mapping from a parsed record to a [`StreamEvent`] varies per tool.
//!
//! Contract:
//! - records classified [`StreamEvent::Text`] contribute their payload
//!   to the content string by concatenation, in line order, with no
//!   separator;
//! - records classified [`StreamEvent::Completion`] fold their fields
//!   into the response metadata (token counts, stop reasons);
//! - every other record kind is ignored;
//! - a line that fails to parse is skipped without aborting the decode;
//! - empty or whitespace-only output decodes to empty content.

use serde_json::{Map, Value};

/// Classification of one decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The payload contributes to the aggregated content.
    Text(String),
    /// Usage or completion metadata to capture.
    Completion(Map<String, Value>),
    /// Recognized but irrelevant (start markers, tool chatter).
    Other,
}

/// Per-tool mapping from a parsed JSON record to a stream event.
pub type Classifier = fn(&Value) -> StreamEvent;

/// Result of decoding one output stream.
#[derive(Debug, Default)]
pub struct Decoded {
    pub content: String,
    pub metadata: Map<String, Value>,
    /// Lines that parsed as JSON records, of any kind.
    pub records_decoded: usize,
}

impl Decoded {
    /// Whether the stream was non-empty yet contained no decodable record.
    pub fn is_malformed(&self, raw: &str) -> bool {
        self.records_decoded == 0 && !raw.trim().is_empty()
    }
}

/// Decode an output stream with the given record classifier.
pub fn decode(output: &str, classify: Classifier) -> Decoded {
    let mut decoded = Decoded::default();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        decoded.records_decoded += 1;
        match classify(&record) {
            StreamEvent::Text(text) => decoded.content.push_str(&text),
            StreamEvent::Completion(fields) => decoded.metadata.extend(fields),
            StreamEvent::Other => {}
        }
    }

    decoded
}
