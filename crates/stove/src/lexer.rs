//! Hand-written lexer: one token produced per call, no lookahead buffer
//! beyond the single pending token the compiler holds. Grounded in the
//! original implementation's `parser.c` (`getNextToken`, `parseNum`,
//! `parseString`, `parseUnicodePoint`) — the keyword table, the
//! hex/octal/decimal literal dispatch (octal's digit-`8` quirk kept
//! verbatim per the documented open-question decision), the escape
//! table, and the `%(` interpolation nesting-counter scheme are all
//! carried over faithfully; only the surface Rust idiom changes.

use crate::error::{LexError, LexResult, SourceLoc};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Num,
    String,
    /// Literal segment preceding a `%(` inside an interpolated string.
    Interpolation,
    Id,

    Var,
    Define,
    If,
    Else,
    True,
    False,
    While,
    For,
    Break,
    Continue,
    Return,
    Null,
    Class,
    Is,
    Static,
    Self_,
    Super,
    Import,

    Comma,
    Colon,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Dot,
    DotDot,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    Assign,

    Amp,
    Pipe,
    Tilde,
    ShiftRight,
    ShiftLeft,

    AmpAmp,
    PipePipe,
    Bang,

    EqEq,
    BangEq,
    Greater,
    GreaterEq,
    Less,
    LessEq,

    Question,

    Eof,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("var", TokenKind::Var),
    ("define", TokenKind::Define),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("while", TokenKind::While),
    ("for", TokenKind::For),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("return", TokenKind::Return),
    ("null", TokenKind::Null),
    ("class", TokenKind::Class),
    ("is", TokenKind::Is),
    ("static", TokenKind::Static),
    ("self", TokenKind::Self_),
    ("super", TokenKind::Super),
    ("import", TokenKind::Import),
];

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: u32,
    /// Precomputed value for `Num` and `String`/`Interpolation` tokens.
    pub value: Option<Value>,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    file: String,
    /// Nesting depth of `(` inside an active `%(...)` interpolation; 0
    /// when not inside one. Stove does not allow nested interpolation,
    /// so only one level is ever tracked.
    interpolation_parens: u32,
    in_interpolation: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, file: impl Into<String>) -> Self {
        let mut lexer = Lexer {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            file: file.into(),
            interpolation_parens: 0,
            in_interpolation: false,
        };
        lexer.skip_shebang();
        lexer
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.file.clone(), self.line)
    }

    fn err(&self, message: impl Into<String>) -> LexError {
        LexError { loc: self.loc(), message: message.into() }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.peek_byte() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_shebang(&mut self) {
        if self.src.starts_with(b"#!") {
            while let Some(b) = self.peek_byte() {
                if b == b'\n' {
                    break;
                }
                self.pos += 1;
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> LexResult<()> {
        loop {
            match self.peek_byte() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.pos += 1;
                }
                Some(b'\n') => {
                    self.pos += 1;
                    self.line += 1;
                }
                Some(b'/') if self.peek_byte_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek_byte() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_byte_at(1) == Some(b'*') => {
                    self.pos += 2;
                    loop {
                        match self.peek_byte() {
                            None => return Err(self.err("unterminated block comment")),
                            Some(b'*') if self.peek_byte_at(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(b'\n') => {
                                self.pos += 1;
                                self.line += 1;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn make(&self, kind: TokenKind, lexeme: String, value: Option<Value>) -> Token {
        Token { kind, lexeme, line: self.line, value }
    }

    pub fn next(&mut self) -> LexResult<Token> {
        if self.in_interpolation {
            // Resume a pending interpolation: the next real token stream
            // continues until the `)` count returns to zero, at which
            // point the caller re-enters string parsing directly.
        }
        self.skip_whitespace_and_comments()?;
        let start_line = self.line;
        let Some(byte) = self.peek_byte() else {
            return Ok(self.make(TokenKind::Eof, String::new(), None));
        };

        if byte.is_ascii_digit() {
            return self.parse_number();
        }
        if byte == b'"' {
            return self.parse_string();
        }
        if byte == b'_' || byte.is_ascii_alphabetic() || byte >= 0x80 {
            return self.parse_id_or_keyword();
        }

        self.pos += 1;
        let kind = match byte {
            b',' => TokenKind::Comma,
            b':' => TokenKind::Colon,
            b'(' => {
                if self.interpolation_parens > 0 {
                    self.interpolation_parens += 1;
                }
                TokenKind::LeftParen
            }
            b')' => {
                if self.interpolation_parens > 0 {
                    self.interpolation_parens -= 1;
                }
                TokenKind::RightParen
            }
            b'[' => TokenKind::LeftBracket,
            b']' => TokenKind::RightBracket,
            b'{' => TokenKind::LeftBrace,
            b'}' => TokenKind::RightBrace,
            b'.' => {
                if self.match_byte(b'.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'~' => TokenKind::Tilde,
            b'?' => TokenKind::Question,
            b'&' => {
                if self.match_byte(b'&') {
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Amp
                }
            }
            b'|' => {
                if self.match_byte(b'|') {
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }
            }
            b'>' => {
                if self.match_byte(b'>') {
                    TokenKind::ShiftRight
                } else if self.match_byte(b'=') {
                    TokenKind::GreaterEq
                } else {
                    TokenKind::Greater
                }
            }
            b'<' => {
                if self.match_byte(b'<') {
                    TokenKind::ShiftLeft
                } else if self.match_byte(b'=') {
                    TokenKind::LessEq
                } else {
                    TokenKind::Less
                }
            }
            b'=' => {
                if self.match_byte(b'=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            b'!' => {
                if self.match_byte(b'=') {
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            other => {
                return Err(self.err(format!("unsupported character '{}'", other as char)));
            }
        };
        let mut tok = self.make(kind, String::new(), None);
        tok.line = start_line;
        Ok(tok)
    }

    fn parse_id_or_keyword(&mut self) -> LexResult<Token> {
        let start = self.pos;
        let start_line = self.line;
        while let Some(b) = self.peek_byte() {
            if b == b'_' || b.is_ascii_alphanumeric() || b >= 0x80 {
                self.pos += 1;
            } else {
                break;
            }
        }
        let lexeme = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        if lexeme.len() > crate::MAX_IDENTIFIER_LEN {
            return Err(self.err(format!(
                "identifier '{lexeme}' exceeds {} bytes",
                crate::MAX_IDENTIFIER_LEN
            )));
        }
        let kind = KEYWORDS
            .iter()
            .find(|(kw, _)| *kw == lexeme)
            .map(|(_, kind)| *kind)
            .unwrap_or(TokenKind::Id);
        let mut tok = self.make(kind, lexeme, None);
        tok.line = start_line;
        Ok(tok)
    }

    fn parse_number(&mut self) -> LexResult<Token> {
        let start = self.pos;
        let start_line = self.line;
        let value = if self.peek_byte() == Some(b'0')
            && matches!(self.peek_byte_at(1), Some(b'x') | Some(b'X'))
        {
            self.pos += 2;
            let digits_start = self.pos;
            while matches!(self.peek_byte(), Some(b) if b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let text = std::str::from_utf8(&self.src[digits_start..self.pos]).unwrap();
            let n = u64::from_str_radix(text, 16)
                .map_err(|_| self.err("invalid hexadecimal literal"))?;
            n as f64
        } else if self.peek_byte() == Some(b'0')
            && matches!(self.peek_byte_at(1), Some(b'0'..=b'9'))
        {
            // Octal: the original implementation's scan condition is
            // `curChar >= '0' && curChar <= '8'` — digit 8 is accepted
            // by the scanner and handed to a base-8 parse, which then
            // truncates at the first digit `strtol` can't consume. We
            // keep that exact, slightly-too-permissive behavior rather
            // than silently rejecting it (documented decision).
            self.pos += 1;
            let digits_start = self.pos;
            while matches!(self.peek_byte(), Some(b'0'..=b'8')) {
                self.pos += 1;
            }
            let text = std::str::from_utf8(&self.src[digits_start..self.pos]).unwrap();
            let mut n: u64 = 0;
            for ch in text.chars() {
                match ch.to_digit(8) {
                    Some(d) => n = n * 8 + d as u64,
                    None => break,
                }
            }
            n as f64
        } else {
            while matches!(self.peek_byte(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
            if self.peek_byte() == Some(b'.') && matches!(self.peek_byte_at(1), Some(b) if b.is_ascii_digit())
            {
                self.pos += 1;
                while matches!(self.peek_byte(), Some(b) if b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
            text.parse::<f64>().map_err(|_| self.err("invalid numeric literal"))?
        };
        let lexeme = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let mut tok = self.make(TokenKind::Num, lexeme, Some(Value::Num(value)));
        tok.line = start_line;
        Ok(tok)
    }

    fn parse_unicode_point(&mut self) -> LexResult<Vec<u8>> {
        let mut code: u32 = 0;
        for _ in 0..4 {
            let b = self.advance().ok_or_else(|| self.err("unterminated \\u escape"))?;
            let digit = (b as char).to_digit(16).ok_or_else(|| self.err("invalid \\u escape digit"))?;
            code = code * 16 + digit;
        }
        let ch = char::from_u32(code).ok_or_else(|| self.err("invalid Unicode code point"))?;
        let mut buf = [0u8; 4];
        Ok(ch.encode_utf8(&mut buf).as_bytes().to_vec())
    }

    /// Parses a `"`-delimited string body starting just after the
    /// opening quote (the caller has already consumed it, or — for an
    /// interpolation resumption — we're continuing after the matching
    /// `)`). Returns the decoded bytes and whether an unescaped `%(`
    /// was hit (in which case `bytes` holds the literal segment before
    /// it and the caller must emit an `Interpolation` token).
    fn parse_string_body(&mut self) -> LexResult<(Vec<u8>, bool)> {
        let mut bytes = Vec::new();
        loop {
            let b = self.advance().ok_or_else(|| self.err("unterminated string"))?;
            match b {
                b'"' => return Ok((bytes, false)),
                b'%' if self.peek_byte() == Some(b'(') => {
                    if self.in_interpolation {
                        return Err(self.err("nested string interpolation is not allowed"));
                    }
                    self.pos += 1; // consume '('
                    self.interpolation_parens = 1;
                    self.in_interpolation = true;
                    return Ok((bytes, true));
                }
                b'\\' => {
                    let esc = self.advance().ok_or_else(|| self.err("unterminated escape"))?;
                    match esc {
                        b'0' => bytes.push(0),
                        b'a' => bytes.push(0x07),
                        b'b' => bytes.push(0x08),
                        b'f' => bytes.push(0x0c),
                        b'n' => bytes.push(b'\n'),
                        b'r' => bytes.push(b'\r'),
                        b't' => bytes.push(b'\t'),
                        b'"' => bytes.push(b'"'),
                        b'\\' => bytes.push(b'\\'),
                        b'u' => bytes.extend(self.parse_unicode_point()?),
                        other => {
                            return Err(self.err(format!("invalid escape '\\{}'", other as char)))
                        }
                    }
                }
                other => bytes.push(other),
            }
        }
    }

    fn parse_string(&mut self) -> LexResult<Token> {
        let start_line = self.line;
        self.pos += 1; // opening quote
        let (bytes, is_interpolation) = self.parse_string_body()?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let kind = if is_interpolation { TokenKind::Interpolation } else { TokenKind::String };
        let mut tok = self.make(kind, text, Some(Value::Undefined));
        tok.line = start_line;
        Ok(tok)
    }

    /// Called by the compiler after it finishes parsing the embedded
    /// expression of an interpolation, once the `)` nesting counter has
    /// returned to zero. Resumes string-body parsing and yields either
    /// another `Interpolation` segment or the final `String` tail.
    pub fn resume_interpolation(&mut self) -> LexResult<Token> {
        debug_assert!(self.in_interpolation);
        self.in_interpolation = false;
        self.interpolation_parens = 0;
        let start_line = self.line;
        let (bytes, is_interpolation) = self.parse_string_body()?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let kind = if is_interpolation { TokenKind::Interpolation } else { TokenKind::String };
        let mut tok = self.make(kind, text, Some(Value::Undefined));
        tok.line = start_line;
        Ok(tok)
    }

    pub fn interpolation_depth(&self) -> u32 {
        self.interpolation_parens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src, "<test>");
        let mut out = Vec::new();
        loop {
            let tok = lexer.next().unwrap();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn skips_comments_and_shebang() {
        let src = "#!/usr/bin/env stove\n// comment\n/* block */ 1";
        let mut lexer = Lexer::new(src, "<test>");
        let tok = lexer.next().unwrap();
        assert_eq!(tok.kind, TokenKind::Num);
    }

    #[test]
    fn keywords_are_recognized() {
        assert_eq!(
            kinds("if else while"),
            vec![TokenKind::If, TokenKind::Else, TokenKind::While, TokenKind::Eof]
        );
    }

    #[test]
    fn octal_literal_truncates_at_digit_eight_like_the_original() {
        let mut lexer = Lexer::new("0781", "<test>");
        let tok = lexer.next().unwrap();
        assert_eq!(tok.value, Some(Value::Num(7.0)));
    }

    #[test]
    fn hex_literal_parses() {
        let mut lexer = Lexer::new("0xFF", "<test>");
        let tok = lexer.next().unwrap();
        assert_eq!(tok.value, Some(Value::Num(255.0)));
    }

    #[test]
    fn unicode_escape_decodes_to_utf8() {
        let mut lexer = Lexer::new("\"\\u4f60\\u597d\"", "<test>");
        let tok = lexer.next().unwrap();
        assert_eq!(tok.kind, TokenKind::String);
        assert_eq!(tok.lexeme, "你好");
    }

    #[test]
    fn interpolation_splits_into_segment_and_resumes() {
        let mut lexer = Lexer::new("\"hello %(name), end\"", "<test>");
        let head = lexer.next().unwrap();
        assert_eq!(head.kind, TokenKind::Interpolation);
        assert_eq!(head.lexeme, "hello ");
        let id = lexer.next().unwrap();
        assert_eq!(id.kind, TokenKind::Id);
        assert_eq!(id.lexeme, "name");
        let tail = lexer.resume_interpolation().unwrap();
        assert_eq!(tail.kind, TokenKind::String);
        assert_eq!(tail.lexeme, ", end");
    }
}
