//! Token-level scanning for the directive preprocessor.
//!
//! Produces logical lines of tokens with 1-based positions (byte columns,
//! matching tree-sitter's coordinates). Backslash-newline splices join
//! lines; comments are stripped.

/// Kind of a scanned token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokKind {
    Ident,
    Number,
    Str,
    Char,
    Punct,
}

/// One preprocessing token with its position in the original file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tok {
    pub kind: TokKind,
    pub text: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based byte column of the first byte.
    pub col: u32,
}

impl Tok {
    /// 1-based inclusive byte column of the last byte.
    pub fn end_col(&self) -> u32 {
        self.col + self.text.len() as u32 - 1
    }

    pub fn is_ident(&self, text: &str) -> bool {
        self.kind == TokKind::Ident && self.text == text
    }

    pub fn is_punct(&self, text: &str) -> bool {
        self.kind == TokKind::Punct && self.text == text
    }
}

/// A logical line: physical lines joined by `\`-newline splices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub tokens: Vec<Tok>,
}

impl LogicalLine {
    /// True when the line is a preprocessing directive (`#` first).
    pub fn is_directive(&self) -> bool {
        self.tokens.first().is_some_and(|t| t.is_punct("#"))
    }

    /// Directive name (`include`, `define`, ...), if this is a directive.
    pub fn directive_name(&self) -> Option<&str> {
        if !self.is_directive() {
            return None;
        }
        match self.tokens.get(1) {
            Some(tok) if tok.kind == TokKind::Ident => Some(&tok.text),
            _ => None,
        }
    }
}

const MULTI_BYTE_PUNCT: &[&str] = &[
    "...", "<<=", ">>=", "->*", "::", "->", "##", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "++", "--", ".*",
];

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(byte)
    }

    fn starts_with(&self, pattern: &str) -> bool {
        self.bytes[self.pos..].starts_with(pattern.as_bytes())
    }
}

fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_ident_continue(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Scan `src` into logical lines of tokens.
pub fn logical_lines(src: &str) -> Vec<LogicalLine> {
    let mut scanner = Scanner::new(src);
    let mut lines = Vec::new();
    let mut current: Vec<Tok> = Vec::new();

    loop {
        let Some(byte) = scanner.peek() else { break };
        match byte {
            b'\n' => {
                scanner.bump();
                if !current.is_empty() {
                    lines.push(LogicalLine {
                        tokens: std::mem::take(&mut current),
                    });
                }
            }
            b'\\' if scanner.peek_at(1) == Some(b'\n') => {
                // Line splice: the logical line continues.
                scanner.bump();
                scanner.bump();
            }
            b'\\' if scanner.peek_at(1) == Some(b'\r') && scanner.peek_at(2) == Some(b'\n') => {
                scanner.bump();
                scanner.bump();
                scanner.bump();
            }
            b if b.is_ascii_whitespace() => {
                scanner.bump();
            }
            b'/' if scanner.peek_at(1) == Some(b'/') => {
                while let Some(b) = scanner.peek() {
                    if b == b'\n' {
                        break;
                    }
                    scanner.bump();
                }
            }
            b'/' if scanner.peek_at(1) == Some(b'*') => {
                scanner.bump();
                scanner.bump();
                loop {
                    if scanner.peek().is_none() {
                        break;
                    }
                    if scanner.peek() == Some(b'*') && scanner.peek_at(1) == Some(b'/') {
                        scanner.bump();
                        scanner.bump();
                        break;
                    }
                    scanner.bump();
                }
            }
            b'"' | b'\'' => {
                current.push(scan_quoted(&mut scanner, byte));
            }
            b if is_ident_start(b) => {
                let (line, col) = (scanner.line, scanner.col);
                let mut text = String::new();
                while let Some(b) = scanner.peek() {
                    if !is_ident_continue(b) {
                        break;
                    }
                    text.push(b as char);
                    scanner.bump();
                }
                current.push(Tok {
                    kind: TokKind::Ident,
                    text,
                    line,
                    col,
                });
            }
            b if b.is_ascii_digit() => {
                current.push(scan_number(&mut scanner));
            }
            b'.' if scanner.peek_at(1).is_some_and(|b| b.is_ascii_digit()) => {
                current.push(scan_number(&mut scanner));
            }
            _ => {
                current.push(scan_punct(&mut scanner));
            }
        }
    }
    if !current.is_empty() {
        lines.push(LogicalLine { tokens: current });
    }
    lines
}

fn scan_quoted(scanner: &mut Scanner<'_>, quote: u8) -> Tok {
    let (line, col) = (scanner.line, scanner.col);
    let mut text = String::new();
    text.push(scanner.bump().unwrap() as char);
    while let Some(b) = scanner.peek() {
        if b == b'\\' {
            text.push(scanner.bump().unwrap() as char);
            if let Some(escaped) = scanner.bump() {
                text.push(escaped as char);
            }
            continue;
        }
        if b == b'\n' {
            // Unterminated literal; recover at end of line.
            break;
        }
        text.push(scanner.bump().unwrap() as char);
        if b == quote {
            break;
        }
    }
    Tok {
        kind: if quote == b'"' { TokKind::Str } else { TokKind::Char },
        text,
        line,
        col,
    }
}

fn scan_number(scanner: &mut Scanner<'_>) -> Tok {
    let (line, col) = (scanner.line, scanner.col);
    let mut text = String::new();
    while let Some(b) = scanner.peek() {
        let keep = b.is_ascii_alphanumeric()
            || b == b'.'
            || b == b'_'
            || ((b == b'+' || b == b'-')
                && matches!(text.as_bytes().last(), Some(b'e' | b'E' | b'p' | b'P')));
        if !keep {
            break;
        }
        text.push(b as char);
        scanner.bump();
    }
    Tok {
        kind: TokKind::Number,
        text,
        line,
        col,
    }
}

fn scan_punct(scanner: &mut Scanner<'_>) -> Tok {
    let (line, col) = (scanner.line, scanner.col);
    for pattern in MULTI_BYTE_PUNCT {
        if scanner.starts_with(pattern) {
            for _ in 0..pattern.len() {
                scanner.bump();
            }
            return Tok {
                kind: TokKind::Punct,
                text: (*pattern).to_string(),
                line,
                col,
            };
        }
    }
    let byte = scanner.bump().unwrap();
    Tok {
        kind: TokKind::Punct,
        text: (byte as char).to_string(),
        line,
        col,
    }
}
