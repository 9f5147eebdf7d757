//! Incremental single-key section extraction over a forward-only byte
//! stream. Memory stays bounded by the lookback window while seeking and by
//! the matched value size while capturing, never by the document size.

use std::collections::VecDeque;

use memchr::memmem;
use serde_json::Value;

use crate::constants::{LOOKBACK_LIMIT, LOOKBACK_TAIL, READ_CHUNK_SIZE};
use crate::source::SourceStream;

use super::ExtractError;

/// Tracks whether the scan position sits inside a JSON string literal.
/// Carried across buffer discards so a key pattern found later can be
/// checked against the context of everything already consumed.
#[derive(Debug, Clone, Copy, Default)]
struct StringState {
    in_string: bool,
    escaped: bool,
}

impl StringState {
    fn advance(&mut self, b: u8) {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
            }
        } else if b == b'"' {
            self.in_string = true;
        }
    }
}

enum Phase {
    /// Searching the buffered tail for the quoted key.
    Seeking,
    /// Key matched; expecting optional whitespace then a colon.
    AwaitingColon,
    /// Colon consumed; expecting the value's opening delimiter.
    AwaitingValue,
    /// Copying the value span until its delimiters balance.
    Capturing {
        open: u8,
        close: u8,
        depth: u64,
        state: StringState,
        span: Vec<u8>,
    },
}

fn is_json_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

/// Push-driven state machine for one target key. `push` accepts stream
/// bytes in arrival order and yields the parsed value once the span closes.
pub(crate) struct ScanMachine {
    needle: Vec<u8>,
    lookback_limit: usize,
    lookback_tail: usize,
    phase: Phase,
    buf: Vec<u8>,
    head_state: StringState,
    search_from: usize,
    carry: VecDeque<u8>,
}

impl ScanMachine {
    pub(crate) fn new(key: &str, lookback_limit: usize, lookback_tail: usize) -> Self {
        Self {
            needle: format!("\"{key}\"").into_bytes(),
            lookback_limit,
            lookback_tail,
            phase: Phase::Seeking,
            buf: Vec::new(),
            head_state: StringState::default(),
            search_from: 0,
            carry: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, input: &[u8]) -> Result<Option<Value>, ExtractError> {
        let mut i = 0usize;
        loop {
            match self.phase {
                Phase::Seeking => {
                    if i < input.len() {
                        self.buf.extend_from_slice(&input[i..]);
                        i = input.len();
                    }
                    if !self.seek() {
                        return Ok(None);
                    }
                }
                Phase::AwaitingColon => match self.next_byte(input, &mut i) {
                    None => return Ok(None),
                    Some(b) if is_json_ws(b) => {}
                    Some(b':') => self.phase = Phase::AwaitingValue,
                    // The quoted text was a string value, not a key; resume
                    // the search from this byte onward.
                    Some(b) => self.reject(b),
                },
                Phase::AwaitingValue => match self.next_byte(input, &mut i) {
                    None => return Ok(None),
                    Some(b) if is_json_ws(b) => {}
                    Some(b @ (b'{' | b'[')) => {
                        let close = if b == b'{' { b'}' } else { b']' };
                        self.phase = Phase::Capturing {
                            open: b,
                            close,
                            depth: 1,
                            state: StringState::default(),
                            span: vec![b],
                        };
                    }
                    Some(b) => {
                        return Err(ExtractError::Malformed(format!(
                            "section value starts with {:?}, expected an object or array",
                            b as char
                        )));
                    }
                },
                Phase::Capturing { .. } => {
                    return self.capture(input, &mut i);
                }
            }
        }
    }

    /// Resolve the machine at end of stream. A key that never appeared (or
    /// never turned out to be a key) is absence, not an error.
    pub(crate) fn finish(&self) -> Result<Option<Value>, ExtractError> {
        match self.phase {
            Phase::Seeking | Phase::AwaitingColon => Ok(None),
            Phase::AwaitingValue => Err(ExtractError::Malformed(
                "stream ended before the section value started".to_string(),
            )),
            Phase::Capturing { .. } => Err(ExtractError::Malformed(
                "stream ended before the section value closed".to_string(),
            )),
        }
    }

    /// Search the buffered bytes for a key occurrence outside a string
    /// literal. Returns true once the machine moved past Seeking.
    fn seek(&mut self) -> bool {
        loop {
            match memmem::find(&self.buf[self.search_from..], &self.needle) {
                Some(rel) => {
                    let pos = self.search_from + rel;
                    // Replay string context from the buffer head (seeded with
                    // the state of all discarded bytes) to decide whether the
                    // match opens a key or sits inside a string value.
                    let mut st = self.head_state;
                    for &b in &self.buf[..pos] {
                        st.advance(b);
                    }
                    if st.in_string {
                        self.search_from = pos + 1;
                        continue;
                    }
                    self.carry.extend(&self.buf[pos + self.needle.len()..]);
                    self.buf.clear();
                    self.search_from = 0;
                    self.head_state = StringState::default();
                    self.phase = Phase::AwaitingColon;
                    return true;
                }
                None => {
                    self.search_from = self
                        .buf
                        .len()
                        .saturating_sub(self.needle.len().saturating_sub(1));
                    if self.buf.len() > self.lookback_limit {
                        let cut = self.buf.len() - self.lookback_tail;
                        for &b in &self.buf[..cut] {
                            self.head_state.advance(b);
                        }
                        self.buf.drain(..cut);
                        self.search_from = self.search_from.saturating_sub(cut);
                    }
                    return false;
                }
            }
        }
    }

    fn next_byte(&mut self, input: &[u8], i: &mut usize) -> Option<u8> {
        if let Some(b) = self.carry.pop_front() {
            return Some(b);
        }
        if *i < input.len() {
            let b = input[*i];
            *i += 1;
            return Some(b);
        }
        None
    }

    fn reject(&mut self, b: u8) {
        self.buf.clear();
        self.buf.push(b);
        self.buf.extend(self.carry.drain(..));
        self.search_from = 0;
        self.head_state = StringState::default();
        self.phase = Phase::Seeking;
    }

    fn capture(&mut self, input: &[u8], i: &mut usize) -> Result<Option<Value>, ExtractError> {
        let mut completed: Option<Vec<u8>> = None;
        {
            let Phase::Capturing {
                open,
                close,
                depth,
                state,
                span,
            } = &mut self.phase
            else {
                return Ok(None);
            };
            loop {
                let b = if let Some(b) = self.carry.pop_front() {
                    b
                } else if *i < input.len() {
                    let b = input[*i];
                    *i += 1;
                    b
                } else {
                    return Ok(None);
                };
                span.push(b);
                if state.in_string {
                    state.advance(b);
                } else if b == b'"' {
                    state.in_string = true;
                } else if b == *open {
                    *depth += 1;
                } else if b == *close {
                    *depth -= 1;
                    if *depth == 0 {
                        completed = Some(std::mem::take(span));
                        break;
                    }
                }
            }
        }
        let Some(span) = completed else {
            return Ok(None);
        };
        self.phase = Phase::Seeking;
        let value = serde_json::from_slice(&span)
            .map_err(|e| ExtractError::Malformed(format!("section span is not valid JSON: {e}")))?;
        Ok(Some(value))
    }
}

/// Extracts one named top-level section from a stream.
pub struct SectionScanner {
    read_size: usize,
    lookback_limit: usize,
    lookback_tail: usize,
}

impl Default for SectionScanner {
    fn default() -> Self {
        Self {
            read_size: READ_CHUNK_SIZE,
            lookback_limit: LOOKBACK_LIMIT,
            lookback_tail: LOOKBACK_TAIL,
        }
    }
}

impl SectionScanner {
    pub fn with_read_size(read_size: usize) -> Self {
        Self {
            read_size: read_size.max(1),
            ..Self::default()
        }
    }

    /// Scan `stream` for `key` and return its value, or `None` when the key
    /// never appears. `on_bytes` receives the running byte count after each
    /// read; returning false aborts the scan.
    ///
    /// Only the first occurrence whose quoted form is followed by a colon is
    /// returned, regardless of nesting depth. A quoted key inside a string
    /// value is skipped via string-context tracking, which survives buffer
    /// discards.
    pub fn extract(
        &self,
        stream: &mut dyn SourceStream,
        key: &str,
        on_bytes: &mut dyn FnMut(u64) -> bool,
    ) -> Result<Option<Value>, ExtractError> {
        let mut machine = ScanMachine::new(key, self.lookback_limit, self.lookback_tail);
        let mut read_buf = vec![0u8; self.read_size];
        let mut total: u64 = 0;
        loop {
            let n = stream.read_chunk(&mut read_buf)?;
            if n == 0 {
                return machine.finish();
            }
            total += n as u64;
            if !on_bytes(total) {
                return Err(ExtractError::Cancelled);
            }
            if let Some(value) = machine.push(&read_buf[..n])? {
                return Ok(Some(value));
            }
        }
    }
}
