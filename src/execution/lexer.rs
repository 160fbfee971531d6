//! Tokenizer for the program subset.
//!
//! Produces Python-style logical lines: `Newline` closes a statement,
//! `Indent`/`Dedent` bracket blocks, and newlines inside `()[]{}` are
//! ignored. Blank and comment-only lines produce no tokens.

use super::error::{RunResult, RuntimeError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an `f"..."` literal with escapes already processed.
    FStr(String),

    // Keywords
    And,
    As,
    Assert,
    Break,
    Continue,
    Def,
    Elif,
    Else,
    False,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    None,
    Not,
    Or,
    Pass,
    Return,
    True,
    While,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Arrow,

    // Operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Assign,
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,
    DoubleStarAssign,

    Newline,
    Indent,
    Dedent,
    Eof,
}

/// Words the language reserves but does not implement. Using one is a
/// syntax error rather than a confusing name lookup.
pub const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "async", "await", "class", "del", "except", "finally", "lambda", "nonlocal", "raise", "try",
    "with", "yield",
];

fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "and" => TokenKind::And,
        "as" => TokenKind::As,
        "assert" => TokenKind::Assert,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "def" => TokenKind::Def,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "False" => TokenKind::False,
        "for" => TokenKind::For,
        "from" => TokenKind::From,
        "global" => TokenKind::Global,
        "if" => TokenKind::If,
        "import" => TokenKind::Import,
        "in" => TokenKind::In,
        "is" => TokenKind::Is,
        "None" => TokenKind::None,
        "not" => TokenKind::Not,
        "or" => TokenKind::Or,
        "pass" => TokenKind::Pass,
        "return" => TokenKind::Return,
        "True" => TokenKind::True,
        "while" => TokenKind::While,
        _ => return None,
    };
    Some(kind)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    /// Open bracket depth; newlines are insignificant while > 0.
    depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: vec![0],
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    /// Tokenize the whole source. The stream always ends with `Eof`.
    pub fn tokenize(mut self) -> RunResult<Vec<Token>> {
        loop {
            if self.at_line_start && self.depth == 0 {
                self.at_line_start = false;
                if !self.scan_indentation()? {
                    continue;
                }
            }
            self.skip_inline_space();
            let Some(ch) = self.peek() else { break };
            match ch {
                '#' => self.skip_comment(),
                '\n' => {
                    self.advance();
                    if self.depth == 0 {
                        self.push_newline();
                        self.at_line_start = true;
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                c if c.is_ascii_digit() => self.scan_number()?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.scan_number()?,
                c if c == '"' || c == '\'' => self.scan_string(false, false)?,
                c if c.is_alphabetic() || c == '_' => self.scan_word()?,
                _ => self.scan_operator()?,
            }
        }

        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent);
        }
        self.push(TokenKind::Eof);
        Ok(self.tokens)
    }

    // ── Character helpers ─────────────────────────────────────────────

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn push(&mut self, kind: TokenKind) {
        self.tokens.push(Token { kind, line: self.line });
    }

    /// Emit `Newline` only when the current logical line produced tokens.
    fn push_newline(&mut self) {
        match self.tokens.last().map(|t| &t.kind) {
            None | Some(TokenKind::Newline) | Some(TokenKind::Indent) | Some(TokenKind::Dedent) => {}
            Some(_) => {
                let line = self.tokens.last().map(|t| t.line).unwrap_or(self.line);
                self.tokens.push(Token { kind: TokenKind::Newline, line });
            }
        }
    }

    fn skip_inline_space(&mut self) {
        while let Some(c) = self.peek() {
            if c == ' ' || c == '\t' || c == '\r' || c == '\x0c' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    // ── Indentation ───────────────────────────────────────────────────

    /// Measure leading whitespace and emit `Indent`/`Dedent`. Returns
    /// `false` when the line is blank or comment-only (and was consumed).
    fn scan_indentation(&mut self) -> RunResult<bool> {
        let mut width = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' | '\x0c' => {}
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek() {
            None => return Ok(false),
            Some('\n') => {
                self.advance();
                self.at_line_start = true;
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.advance();
                }
                self.at_line_start = true;
                return Ok(false);
            }
            Some(_) => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(TokenKind::Dedent);
            }
            if self.indents.last() != Some(&width) {
                return Err(RuntimeError::syntax(
                    self.line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(true)
    }

    // ── Literals ──────────────────────────────────────────────────────

    fn scan_number(&mut self) -> RunResult<()> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && (self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+') | Some('-'))
                        && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().filter(|&&c| c != '_').collect();
        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(RuntimeError::syntax(self.line, format!("invalid decimal literal '{text}'")));
        }
        let kind = if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| RuntimeError::syntax(self.line, format!("invalid number '{text}'")))?;
            TokenKind::Float(value)
        } else {
            match text.parse::<i64>() {
                Ok(v) => TokenKind::Int(v),
                // Literal too wide for i64; keep its magnitude as a float.
                Err(_) => TokenKind::Float(text.parse::<f64>().unwrap_or(f64::INFINITY)),
            }
        };
        self.push(kind);
        Ok(())
    }

    fn scan_word(&mut self) -> RunResult<()> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        // String prefixes: r"", f"", rf"", b""
        if matches!(self.peek(), Some('"') | Some('\'')) {
            let lower = word.to_ascii_lowercase();
            if matches!(lower.as_str(), "r" | "f" | "b" | "u" | "rf" | "fr" | "br" | "rb") {
                let raw = lower.contains('r');
                let fmt = lower.contains('f');
                return self.scan_string(raw, fmt);
            }
        }

        match keyword(&word) {
            Some(kind) => self.push(kind),
            None => self.push(TokenKind::Name(word)),
        }
        Ok(())
    }

    fn scan_string(&mut self, raw: bool, fmt: bool) -> RunResult<()> {
        let start_line = self.line;
        let quote = self.advance().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.pos += 2;
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.advance() else {
                return Err(RuntimeError::syntax(start_line, "unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.pos += 2;
                    break;
                }
                out.push(c);
                continue;
            }
            if c == '\n' && !triple {
                return Err(RuntimeError::syntax(start_line, "unterminated string literal"));
            }
            if c == '\\' {
                let Some(next) = self.advance() else {
                    return Err(RuntimeError::syntax(start_line, "unterminated string literal"));
                };
                if raw {
                    out.push('\\');
                    out.push(next);
                    continue;
                }
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => {}
                    'x' => {
                        let hex: String = (0..2).filter_map(|_| self.advance()).collect();
                        let ch = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| RuntimeError::syntax(self.line, "invalid \\x escape"))?;
                        out.push(ch);
                    }
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }
            out.push(c);
        }

        // Adjacent plain literals concatenate: "a" "b" == "ab".
        if !fmt {
            if let Some(Token { kind: TokenKind::Str(prev), .. }) = self.tokens.last_mut() {
                prev.push_str(&out);
                return Ok(());
            }
        }
        self.tokens.push(Token {
            kind: if fmt { TokenKind::FStr(out) } else { TokenKind::Str(out) },
            line: start_line,
        });
        Ok(())
    }

    // ── Operators ─────────────────────────────────────────────────────

    fn scan_operator(&mut self) -> RunResult<()> {
        let c = self.peek().unwrap_or('\0');
        let n1 = self.peek_at(1);
        let n2 = self.peek_at(2);

        let (kind, len) = match (c, n1, n2) {
            ('*', Some('*'), Some('=')) => (TokenKind::DoubleStarAssign, 3),
            ('/', Some('/'), Some('=')) => (TokenKind::DoubleSlashAssign, 3),
            ('*', Some('*'), _) => (TokenKind::DoubleStar, 2),
            ('/', Some('/'), _) => (TokenKind::DoubleSlash, 2),
            ('=', Some('='), _) => (TokenKind::EqEq, 2),
            ('!', Some('='), _) => (TokenKind::NotEq, 2),
            ('<', Some('='), _) => (TokenKind::LessEq, 2),
            ('>', Some('='), _) => (TokenKind::GreaterEq, 2),
            ('+', Some('='), _) => (TokenKind::PlusAssign, 2),
            ('-', Some('='), _) => (TokenKind::MinusAssign, 2),
            ('*', Some('='), _) => (TokenKind::StarAssign, 2),
            ('/', Some('='), _) => (TokenKind::SlashAssign, 2),
            ('%', Some('='), _) => (TokenKind::PercentAssign, 2),
            ('-', Some('>'), _) => (TokenKind::Arrow, 2),
            ('(', _, _) => (TokenKind::LParen, 1),
            (')', _, _) => (TokenKind::RParen, 1),
            ('[', _, _) => (TokenKind::LBracket, 1),
            (']', _, _) => (TokenKind::RBracket, 1),
            ('{', _, _) => (TokenKind::LBrace, 1),
            ('}', _, _) => (TokenKind::RBrace, 1),
            (',', _, _) => (TokenKind::Comma, 1),
            (':', _, _) => (TokenKind::Colon, 1),
            ('.', _, _) => (TokenKind::Dot, 1),
            (';', _, _) => (TokenKind::Semicolon, 1),
            ('+', _, _) => (TokenKind::Plus, 1),
            ('-', _, _) => (TokenKind::Minus, 1),
            ('*', _, _) => (TokenKind::Star, 1),
            ('/', _, _) => (TokenKind::Slash, 1),
            ('%', _, _) => (TokenKind::Percent, 1),
            ('=', _, _) => (TokenKind::Assign, 1),
            ('<', _, _) => (TokenKind::Less, 1),
            ('>', _, _) => (TokenKind::Greater, 1),
            (other, _, _) => {
                return Err(RuntimeError::syntax(
                    self.line,
                    format!("invalid character '{other}'"),
                ))
            }
        };
        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => self.depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                self.depth = self.depth.saturating_sub(1)
            }
            _ => {}
        }
        self.pos += len;
        self.push(kind);
        Ok(())
    }
}

/// Tokenize `source` in one call.
pub fn tokenize(source: &str) -> RunResult<Vec<Token>> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn indentation_produces_block_tokens() {
        let k = kinds("def f():\n    return 1\nx = 2\n");
        assert_eq!(
            k,
            vec![
                TokenKind::Def,
                TokenKind::Name("f".into()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Return,
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Name("x".into()),
                TokenKind::Assign,
                TokenKind::Int(2),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let k = kinds("x = 1\n\n   # note\n\ny = 2");
        assert_eq!(k.iter().filter(|t| **t == TokenKind::Newline).count(), 2);
        assert!(!k.contains(&TokenKind::Indent));
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let k = kinds("xs = [1,\n      2]\n");
        assert_eq!(k.iter().filter(|t| **t == TokenKind::Newline).count(), 1);
    }

    #[test]
    fn numbers_and_strings() {
        let k = kinds("1_000 2.5 1e3 'a\\n' f\"{x}\"");
        assert_eq!(k[0], TokenKind::Int(1000));
        assert_eq!(k[1], TokenKind::Float(2.5));
        assert_eq!(k[2], TokenKind::Float(1000.0));
        assert_eq!(k[3], TokenKind::Str("a\n".into()));
        assert_eq!(k[4], TokenKind::FStr("{x}".into()));
    }

    #[test]
    fn bad_dedent_is_a_syntax_error() {
        let err = tokenize("if x:\n        y = 1\n    z = 2\n").unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::SyntaxError);
    }
}
