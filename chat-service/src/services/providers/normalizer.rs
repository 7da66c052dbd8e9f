//! Normalization of interleaved reasoning/answer provider streams.
//!
//! Some relay endpoints multiplex a reasoning channel and an answer
//! channel over one byte stream as line-prefixed markers:
//!
//! ```text
//! g:"partial reasoning text"
//! e:
//! 0:"partial answer text"
//! ```
//!
//! The normalizer reconstructs the two logical channels and re-emits one
//! plain text stream, wrapping each reasoning span in a single
//! `<think>...</think>` pair. The delimiter opens lazily at the first
//! reasoning byte and closes exactly once: on the explicit end marker,
//! when answer content begins, or at stream end.

/// Opening reasoning delimiter on the normalized stream.
pub const THINK_OPEN: &str = "<think>";
/// Closing reasoning delimiter on the normalized stream.
pub const THINK_CLOSE: &str = "</think>";

const REASONING_DELTA: char = 'g';
const ANSWER_DELTA: char = '0';
const REASONING_END: char = 'e';

/// Two-state parser for the marked line protocol.
#[derive(Debug, Default)]
pub struct ReasoningNormalizer {
    reasoning_open: bool,
    reasoning_buffer: String,
}

impl ReasoningNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one text chunk of complete lines, returning the normalized
    /// text to emit for it.
    pub fn process(&mut self, chunk: &str) -> String {
        let mut saw_reasoning_end = false;
        let mut answer = String::new();

        for line in chunk.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let Some((marker, payload)) = split_marker(line) else {
                tracing::trace!(line = %line, "skipping unmarked upstream line");
                continue;
            };
            match marker {
                REASONING_DELTA => self.reasoning_buffer.push_str(&decode_payload(payload)),
                ANSWER_DELTA => answer.push_str(&decode_payload(payload)),
                REASONING_END => saw_reasoning_end = true,
                other => {
                    tracing::trace!(marker = %other, "skipping unknown upstream marker");
                }
            }
        }

        let mut out = String::new();

        if !self.reasoning_buffer.is_empty() {
            if !self.reasoning_open {
                out.push_str(THINK_OPEN);
                self.reasoning_open = true;
            }
            out.push_str(&self.reasoning_buffer);
            self.reasoning_buffer.clear();
        }

        if saw_reasoning_end && self.reasoning_open {
            out.push_str(THINK_CLOSE);
            self.reasoning_open = false;
        }

        if !answer.is_empty() {
            // Answer content always forces the reasoning span closed.
            if self.reasoning_open {
                out.push_str(THINK_CLOSE);
                self.reasoning_open = false;
            }
            out.push_str(&answer);
        }

        out
    }

    /// Flush at stream end: any open reasoning span is closed.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();

        if !self.reasoning_buffer.is_empty() {
            if !self.reasoning_open {
                out.push_str(THINK_OPEN);
                self.reasoning_open = true;
            }
            out.push_str(&self.reasoning_buffer);
            self.reasoning_buffer.clear();
        }
        if self.reasoning_open {
            out.push_str(THINK_CLOSE);
            self.reasoning_open = false;
        }

        out
    }
}

/// Reassembles complete lines from arbitrary byte-chunk boundaries so a
/// JSON-quoted fragment split across reads decodes once.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw chunk; returns the complete lines accumulated so far,
    /// holding any trailing partial line for the next push.
    pub fn push(&mut self, chunk: &str) -> String {
        self.partial.push_str(chunk);
        match self.partial.rfind('\n') {
            Some(idx) => {
                let complete: String = self.partial.drain(..=idx).collect();
                complete
            }
            None => String::new(),
        }
    }

    /// Drain whatever is left at stream end.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.partial)
    }
}

fn split_marker(line: &str) -> Option<(char, &str)> {
    let marker = line.chars().next()?;
    let rest = &line[marker.len_utf8()..];
    let payload = rest.strip_prefix(':')?;
    Some((marker, payload))
}

/// Decode a line payload: JSON-quoted string if it parses, otherwise the
/// raw slice with wrapping quotes stripped. Never fails.
fn decode_payload(raw: &str) -> String {
    match serde_json::from_str::<String>(raw) {
        Ok(decoded) => decoded,
        Err(_) => raw.trim_matches('"').to_string(),
    }
}
