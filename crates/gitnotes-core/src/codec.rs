//! JSON stream codec
//!
//! A note may hold several JSON documents written back to back
//! (`{"a":1}{"a":2}`), typically because a cat-sort-uniq merge concatenated
//! contributions from several writers. [`decode`] walks that stream and
//! keeps everything it managed to parse, even when it stops early.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Upper bound on documents decoded from a single note
pub const MAX_JSON_DOCUMENTS: usize = 1000;

/// Bytes of context shown on each side of a decode failure
const CONTEXT_RADIUS: usize = 20;

/// Why decoding stopped before the end of the note
#[derive(Error, Debug)]
pub enum DecodeError {
    /// A document (or trailing bytes after one) is not valid JSON
    #[error(
        "Failed to decode JSON document {} (processed {decoded} documents). \
         Context around error (offset approx {offset}): \"...{context}...\": {source}",
        decoded + 1
    )]
    Malformed {
        decoded: usize,
        offset: usize,
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// The note holds more documents than [`MAX_JSON_DOCUMENTS`]
    #[error("Exceeded maximum number of JSON documents ({limit}) in note")]
    TooManyDocuments { limit: usize },
}

impl DecodeError {
    /// Number of documents successfully decoded before the failure
    pub fn decoded(&self) -> usize {
        match self {
            DecodeError::Malformed { decoded, .. } => *decoded,
            DecodeError::TooManyDocuments { limit } => *limit,
        }
    }
}

/// Result of decoding a note: the values read so far and why it stopped
#[derive(Debug)]
pub struct Decoded<T> {
    pub values: Vec<T>,
    pub error: Option<DecodeError>,
}

impl<T> Decoded<T> {
    pub fn empty() -> Self {
        Self {
            values: Vec::new(),
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Drop partial results if decoding did not finish
    pub fn into_result(self) -> Result<Vec<T>, DecodeError> {
        match self.error {
            None => Ok(self.values),
            Some(err) => Err(err),
        }
    }
}

/// Serialize one value as the entire content of a note
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Decode a note as a sequence of JSON documents
///
/// Empty or whitespace-only content is an empty sequence, not an error.
pub fn decode<T: DeserializeOwned>(content: &str) -> Decoded<T> {
    decode_with_limit(content, MAX_JSON_DOCUMENTS)
}

pub(crate) fn decode_with_limit<T: DeserializeOwned>(content: &str, limit: usize) -> Decoded<T> {
    let mut values = Vec::new();
    if content.trim().is_empty() {
        return Decoded::empty();
    }

    let mut stream = serde_json::Deserializer::from_str(content).into_iter::<T>();
    loop {
        let start = stream.byte_offset();
        match stream.next() {
            None => break,
            Some(Ok(_)) if values.len() >= limit => {
                return Decoded {
                    values,
                    error: Some(DecodeError::TooManyDocuments { limit }),
                };
            }
            Some(Ok(value)) => values.push(value),
            Some(Err(source)) => {
                let offset = error_offset(content, &source).unwrap_or(start);
                let context = context_around(content, offset);
                return Decoded {
                    error: Some(DecodeError::Malformed {
                        decoded: values.len(),
                        offset,
                        context,
                        source,
                    }),
                    values,
                };
            }
        }
    }

    Decoded {
        values,
        error: None,
    }
}

/// Translate serde_json's 1-based line/column into a byte offset
fn error_offset(content: &str, err: &serde_json::Error) -> Option<usize> {
    let line = err.line();
    if line == 0 {
        return None;
    }
    let line_start: usize = content
        .split_inclusive('\n')
        .take(line - 1)
        .map(str::len)
        .sum();
    Some((line_start + err.column().saturating_sub(1)).min(content.len()))
}

fn context_around(content: &str, offset: usize) -> String {
    if content.is_empty() {
        return "(context unavailable)".to_string();
    }
    let mut start = offset.saturating_sub(CONTEXT_RADIUS);
    while !content.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (offset + CONTEXT_RADIUS).min(content.len());
    while !content.is_char_boundary(end) {
        end += 1;
    }
    content[start..end].to_string()
}
