//! Command line tokenizer.
//!
//! One left-to-right pass rewrites the line: `%XX` decodes to a byte, `\`
//! copies the next byte verbatim, backspace drops the last emitted byte and
//! any byte `<= b' '` becomes a separator. Non-empty runs between separators
//! are the tokens.

pub const MAX_CMD_TOKENS: usize = 9;

const BACKSPACE: u8 = 0x08;
const SEPARATOR: u8 = 0;

/// Tokens of one command line, as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tokens {
    tokens: Vec<Vec<u8>>,
}

impl Tokens {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&[u8]> {
        self.tokens.get(i).map(Vec::as_slice)
    }

    /// Token `i` as text; `None` when absent or not UTF-8.
    pub fn str(&self, i: usize) -> Option<&str> {
        self.get(i).and_then(|t| std::str::from_utf8(t).ok())
    }

    /// Whether token `i` equals `word` exactly.
    pub fn is(&self, i: usize, word: &str) -> bool {
        self.get(i) == Some(word.as_bytes())
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.tokens.iter().map(Vec::as_slice)
    }
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Rewrite `line` into separator-delimited form.
fn preprocess(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let b = line[i];
        match b {
            b'%' if i + 2 < line.len() => {
                match (hex_value(line[i + 1]), hex_value(line[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b),
                }
            }
            b'\\' if i + 1 < line.len() => {
                out.push(line[i + 1]);
                i += 2;
                continue;
            }
            BACKSPACE => {
                out.pop();
            }
            _ if b <= b' ' => out.push(SEPARATOR),
            _ => out.push(b),
        }
        i += 1;
    }
    out
}

/// Split a raw line into at most `max` tokens; input beyond that is dropped.
pub fn tokenize_with_limit(line: &[u8], max: usize) -> Tokens {
    let tokens = preprocess(line)
        .split(|b| *b == SEPARATOR)
        .filter(|t| !t.is_empty())
        .take(max)
        .map(<[u8]>::to_vec)
        .collect();
    Tokens { tokens }
}

pub fn tokenize(line: &[u8]) -> Tokens {
    tokenize_with_limit(line, MAX_CMD_TOKENS)
}
