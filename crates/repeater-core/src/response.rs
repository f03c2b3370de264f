//! Structured command output.
//!
//! The interpreter builds an ordered list of lines; transports decide how
//! to frame them (line terminators, prompt marker).

use std::fmt;

/// Output of one command, or one asynchronous result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    lines: Vec<String>,
    /// Whether the transport should append its prompt after the lines.
    prompt: bool,
}

impl Response {
    /// An empty response that still ends with the prompt.
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            prompt: true,
        }
    }

    pub fn line(text: impl Into<String>) -> Self {
        let mut r = Self::new();
        r.push(text);
        r
    }

    /// Lines delivered without a trailing prompt (intermediate async output).
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
            prompt: false,
        }
    }

    pub fn push(&mut self, text: impl Into<String>) -> &mut Self {
        self.lines.push(text.into());
        self
    }

    pub fn push_fmt(&mut self, args: fmt::Arguments<'_>) -> &mut Self {
        self.lines.push(args.to_string());
        self
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn has_prompt(&self) -> bool {
        self.prompt
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// All lines joined with `\n`, mainly for tests and logs.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

impl From<&str> for Response {
    fn from(text: &str) -> Self {
        Response::line(text)
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Response::line(text)
    }
}
