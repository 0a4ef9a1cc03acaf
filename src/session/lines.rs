use crate::error::TapResult;
use regex::Regex;

/// Lines longer than this are cut rather than buffered forever.
const MAX_PENDING_BYTES: usize = 64 * 1024;

const ANSI_PATTERN: &str = r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]";

/// Cuts a byte stream into text lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                lines.push(self.take_line());
            } else {
                self.pending.push(byte);
                if self.pending.len() >= MAX_PENDING_BYTES {
                    lines.push(self.take_line());
                }
            }
        }
        lines
    }

    /// Emits a trailing partial line, e.g. a prompt ended by telnet GA.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.take_line())
    }

    fn take_line(&mut self) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }
    }
}

/// Removes ANSI escape sequences and stray control characters.
#[derive(Debug, Clone)]
pub struct AnsiStripper {
    pattern: Regex,
}

impl AnsiStripper {
    pub fn new() -> TapResult<Self> {
        Ok(Self {
            pattern: Regex::new(ANSI_PATTERN)?,
        })
    }

    pub fn strip(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, "")
            .chars()
            .filter(|c| *c == '\t' || !c.is_control())
            .collect()
    }
}
