//! Console framing.
//!
//! Input is accumulated byte by byte until `\n`; output is the response's
//! lines terminated by `\r\n`, followed by the prompt when the response
//! completes a command.

use repeater_core::Response;
use thiserror::Error;

pub const PROMPT: &str = "CMD>";

/// Longest command line accepted, in bytes.
pub const MAX_LINE: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Command too long (max. {max})")]
    LineTooLong { max: usize },
}

/// Splits a console byte stream into command lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
    overflowed: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns a finished line when `b` is `\n`.
    ///
    /// Bytes past [`MAX_LINE`] are dropped and the whole line is rejected
    /// once it ends.
    pub fn push(&mut self, b: u8) -> Option<Result<Vec<u8>, FrameError>> {
        if b == b'\n' {
            let line = std::mem::take(&mut self.buf);
            if std::mem::take(&mut self.overflowed) {
                return Some(Err(FrameError::LineTooLong { max: MAX_LINE }));
            }
            return Some(Ok(line));
        }
        if self.buf.len() < MAX_LINE {
            self.buf.push(b);
        } else {
            self.overflowed = true;
        }
        None
    }

    /// Feed a chunk, collecting every line it completes.
    pub fn extend(&mut self, data: &[u8]) -> Vec<Result<Vec<u8>, FrameError>> {
        data.iter().filter_map(|b| self.push(*b)).collect()
    }

    /// Bytes buffered for the current, unfinished line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }
}

/// Frame a response for a console transport.
pub fn render(response: &Response) -> String {
    let mut out = String::new();
    for line in response.lines() {
        out.push_str(line);
        out.push_str("\r\n");
    }
    if response.has_prompt() {
        out.push_str(PROMPT);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lines_complete_on_newline() {
        let mut asm = LineAssembler::new();
        let lines = asm.extend(b"show\r\nset ssid x\nsho");
        assert_eq!(
            lines,
            vec![Ok(b"show\r".to_vec()), Ok(b"set ssid x".to_vec())]
        );
        assert_eq!(asm.pending(), 3);
    }

    #[test]
    fn test_overlong_line_is_rejected_once() {
        let mut asm = LineAssembler::new();
        let long = vec![b'a'; MAX_LINE + 5];
        assert!(asm.extend(&long).is_empty());
        assert_eq!(asm.pending(), MAX_LINE);
        assert_eq!(
            asm.push(b'\n'),
            Some(Err(FrameError::LineTooLong { max: MAX_LINE }))
        );
        assert_eq!(asm.extend(b"help\n"), vec![Ok(b"help".to_vec())]);
    }

    #[test]
    fn test_exactly_max_line_is_accepted() {
        let mut asm = LineAssembler::new();
        let line = vec![b'x'; MAX_LINE];
        asm.extend(&line);
        assert_eq!(asm.push(b'\n'), Some(Ok(line)));
    }

    #[test]
    fn test_render_with_prompt() {
        let mut r = Response::line("SSID set");
        r.push("second");
        assert_eq!(render(&r), "SSID set\r\nsecond\r\nCMD>");
    }

    #[test]
    fn test_render_raw_has_no_prompt() {
        assert_eq!(render(&Response::raw("Scanning...")), "Scanning...\r\n");
    }

    #[test]
    fn test_render_empty_is_prompt_only() {
        assert_eq!(render(&Response::new()), "CMD>");
    }

    #[test]
    fn test_frame_error_text() {
        assert_eq!(
            FrameError::LineTooLong { max: 80 }.to_string(),
            "Command too long (max. 80)"
        );
    }
}
