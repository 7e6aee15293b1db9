//! Incremental parsing of `/export` response bodies.
//!
//! An export body can hold millions of documents, so it is never buffered
//! whole. [`DocsArrayScanner`] is fed raw chunks as they arrive and yields
//! each element of the first `"docs"` array (at any nesting depth) as soon
//! as its closing brace is seen.

use serde_json::Value;

use super::Document;
use crate::error::{Error, Result};

const DOCS_KEY: &[u8] = b"docs";

/// Key Solr puts in a document slot when the export handler fails mid-stream.
pub const EXCEPTION_KEY: &str = "EXCEPTION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Looking for a `"docs"` key.
    Seeking,
    /// Saw `"docs":`, waiting for the value.
    AwaitingArray,
    /// Between elements of the docs array.
    InArray,
    /// Inside one element.
    InElement,
    /// Docs array closed; the rest of the body is ignored.
    Done,
}

/// Streaming extractor for the documents of an export response.
#[derive(Debug)]
pub struct DocsArrayScanner {
    phase: Phase,
    in_string: bool,
    escaped: bool,
    /// Bytes of the string being scanned, capped just past `"docs"`.
    string_prefix: Vec<u8>,
    /// Whether the last completed string (while seeking) was `"docs"`.
    last_string_was_docs: bool,
    depth: usize,
    element: Vec<u8>,
}

impl Default for DocsArrayScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl DocsArrayScanner {
    /// Creates a scanner positioned at the start of a response body.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Seeking,
            in_string: false,
            escaped: false,
            string_prefix: Vec::with_capacity(DOCS_KEY.len() + 1),
            last_string_was_docs: false,
            depth: 0,
            element: Vec::new(),
        }
    }

    /// Returns `true` once the docs array has been closed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Feeds one chunk, appending every completed document to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] when an element is not a JSON object or
    /// carries an `EXCEPTION` key, and [`Error::Json`] when an element is not
    /// valid JSON.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<Document>) -> Result<()> {
        for &byte in chunk {
            match self.phase {
                Phase::Done => return Ok(()),
                Phase::Seeking => self.seek(byte),
                Phase::AwaitingArray => self.await_array(byte),
                Phase::InArray => self.between_elements(byte),
                Phase::InElement => {
                    if let Some(doc) = self.in_element(byte)? {
                        out.push(doc);
                    }
                }
            }
        }
        Ok(())
    }

    /// Signals end of body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] when the body ended inside the docs array.
    pub fn finish(&self) -> Result<()> {
        match self.phase {
            Phase::InArray | Phase::InElement => Err(Error::Export(
                "export stream ended before the docs array was closed".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn seek(&mut self, byte: u8) {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
                self.record_string_byte(byte);
            } else if byte == b'\\' {
                self.escaped = true;
                self.record_string_byte(byte);
            } else if byte == b'"' {
                self.in_string = false;
                self.last_string_was_docs = self.string_prefix == DOCS_KEY;
            } else {
                self.record_string_byte(byte);
            }
            return;
        }

        match byte {
            b'"' => {
                self.in_string = true;
                self.string_prefix.clear();
                self.last_string_was_docs = false;
            }
            b':' if self.last_string_was_docs => {
                self.last_string_was_docs = false;
                self.phase = Phase::AwaitingArray;
            }
            b if b.is_ascii_whitespace() => {}
            _ => self.last_string_was_docs = false,
        }
    }

    fn record_string_byte(&mut self, byte: u8) {
        if self.string_prefix.len() <= DOCS_KEY.len() {
            self.string_prefix.push(byte);
        }
    }

    fn await_array(&mut self, byte: u8) {
        match byte {
            b'[' => self.phase = Phase::InArray,
            b if b.is_ascii_whitespace() => {}
            // "docs" held something other than an array; keep looking.
            other => {
                self.phase = Phase::Seeking;
                self.seek(other);
            }
        }
    }

    fn between_elements(&mut self, byte: u8) {
        match byte {
            b']' => self.phase = Phase::Done,
            b',' => {}
            b if b.is_ascii_whitespace() => {}
            other => {
                self.phase = Phase::InElement;
                self.element.clear();
                self.depth = 0;
                self.in_string = false;
                self.escaped = false;
                self.start_element_byte(other);
            }
        }
    }

    fn start_element_byte(&mut self, byte: u8) {
        self.element.push(byte);
        match byte {
            b'{' | b'[' => self.depth = 1,
            b'"' => self.in_string = true,
            _ => {}
        }
    }

    fn in_element(&mut self, byte: u8) -> Result<Option<Document>> {
        if self.in_string {
            self.element.push(byte);
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
                if self.depth == 0 {
                    return self.complete_element().map(Some);
                }
            }
            return Ok(None);
        }

        if self.depth == 0 {
            // Scalar element: ends at the next separator.
            return match byte {
                b',' | b']' => {
                    let closes_array = byte == b']';
                    let result = self.complete_element();
                    if closes_array {
                        self.phase = Phase::Done;
                    }
                    result.map(Some)
                }
                _ => {
                    self.element.push(byte);
                    Ok(None)
                }
            };
        }

        self.element.push(byte);
        match byte {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => {
                self.depth -= 1;
                if self.depth == 0 {
                    return self.complete_element().map(Some);
                }
            }
            _ => {}
        }
        Ok(None)
    }

    fn complete_element(&mut self) -> Result<Document> {
        self.phase = Phase::InArray;
        let value: Value = serde_json::from_slice(&self.element)?;
        self.element.clear();
        match value {
            Value::Object(doc) => {
                if let Some(exception) = doc.get(EXCEPTION_KEY) {
                    let message = exception
                        .as_str()
                        .map_or_else(|| exception.to_string(), str::to_string);
                    return Err(Error::Export(message));
                }
                Ok(doc)
            }
            other => Err(Error::Export(format!(
                "export document was not a JSON object: {other}"
            ))),
        }
    }
}

#[cfg(test)]
#[path = "export_tests.rs"]
mod tests;
