use crate::token::{Token, TokenKind};
use lua_core::number::{parse_float, parse_integer};
use lua_core::LuaError;

/// Tokenises Lua 5.3 source text into a flat list of [`Token`]s.
pub struct Lexer<'src> {
    src: &'src [u8],
    pos: usize,
    line: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str) -> Self {
        let src = src.as_bytes();
        // A leading `#!` line is ignored.
        let pos = if src.starts_with(b"#") {
            src.iter().position(|&b| b == b'\n').unwrap_or(src.len())
        } else {
            0
        };
        Self { src, pos, line: 1 }
    }

    /// Consume the entire source and return all tokens, including a final `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LuaError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                return Ok(tokens);
            }
        }
    }

    // ── cursor ──────────────────────────────────────────────────────────────

    fn peek(&self) -> Option<u8> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, LuaError> {
        Err(LuaError::Syntax {
            line: self.line,
            message: message.into(),
        })
    }

    // ── whitespace & comments ───────────────────────────────────────────────

    fn skip_trivia(&mut self) -> Result<(), LuaError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n' | 0x0B | 0x0C) => {
                    self.bump();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    self.pos += 2;
                    if let Some(level) = self.long_bracket_level() {
                        self.read_long_bracket(level)?;
                    } else {
                        while !matches!(self.peek(), Some(b'\n') | None) {
                            self.bump();
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// If the cursor sits on `[`, `[=`…`[`, returns the number of `=`.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(1 + level) == Some(b'[')).then_some(level)
    }

    /// Reads `[==[ ... ]==]` with the cursor on the first `[`.
    fn read_long_bracket(&mut self, level: usize) -> Result<Vec<u8>, LuaError> {
        let start_line = self.line;
        self.pos += level + 2;
        // A newline right after the opening bracket is not part of the string.
        if self.eat(b'\r') {
            self.eat(b'\n');
        } else if self.eat(b'\n') {
            self.eat(b'\r');
        }
        let mut buf = Vec::new();
        loop {
            match self.bump() {
                None => {
                    return Err(LuaError::Syntax {
                        line: start_line,
                        message: "unfinished long string or comment".into(),
                    });
                }
                Some(b']') => {
                    let mut eq = 0;
                    while self.peek_at(eq) == Some(b'=') {
                        eq += 1;
                    }
                    if eq == level && self.peek_at(eq) == Some(b']') {
                        self.pos += eq + 1;
                        return Ok(buf);
                    }
                    buf.push(b']');
                }
                Some(ch) => buf.push(ch),
            }
        }
    }

    // ── string literals ─────────────────────────────────────────────────────

    fn read_short_string(&mut self, delim: u8) -> Result<Vec<u8>, LuaError> {
        let mut buf = Vec::new();
        loop {
            match self.bump() {
                None | Some(b'\n' | b'\r') => return self.error("unfinished string"),
                Some(b'\\') => self.read_escape(&mut buf)?,
                Some(ch) if ch == delim => return Ok(buf),
                Some(ch) => buf.push(ch),
            }
        }
    }

    fn read_escape(&mut self, buf: &mut Vec<u8>) -> Result<(), LuaError> {
        let Some(ch) = self.bump() else {
            return self.error("unfinished string");
        };
        let byte = match ch {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0C,
            b'n' | b'\n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0B,
            b'\\' | b'"' | b'\'' => ch,
            b'\r' => {
                self.eat(b'\n');
                b'\n'
            }
            b'x' => {
                let mut value = 0u8;
                for _ in 0..2 {
                    match self.bump().and_then(|c| (c as char).to_digit(16)) {
                        Some(d) => value = value * 16 + d as u8,
                        None => return self.error("hexadecimal digit expected"),
                    }
                }
                value
            }
            b'z' => {
                while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
                    self.bump();
                }
                return Ok(());
            }
            b'u' => {
                if !self.eat(b'{') {
                    return self.error("missing '{' in \\u{xxxx}");
                }
                let mut code = 0u32;
                while let Some(d) = self.peek().and_then(|c| (c as char).to_digit(16)) {
                    self.bump();
                    code = code.saturating_mul(16).saturating_add(d);
                }
                if !self.eat(b'}') {
                    return self.error("missing '}' in \\u{xxxx}");
                }
                let Some(c) = char::from_u32(code) else {
                    return self.error("UTF-8 value too large");
                };
                let mut tmp = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
                return Ok(());
            }
            d if d.is_ascii_digit() => {
                let mut value = (d - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(c) if c.is_ascii_digit() => {
                            self.bump();
                            value = value * 10 + (c - b'0') as u32;
                        }
                        _ => break,
                    }
                }
                if value > 255 {
                    return self.error("decimal escape too large");
                }
                value as u8
            }
            other => return self.error(format!("invalid escape sequence '\\{}'", other as char)),
        };
        buf.push(byte);
        Ok(())
    }

    // ── number literals ─────────────────────────────────────────────────────

    fn read_number(&mut self) -> Result<TokenKind, LuaError> {
        let start = self.pos;
        let hex = self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X'));
        if hex {
            self.pos += 2;
        }
        let exponent: &[u8] = if hex { b"pP" } else { b"eE" };
        while let Some(c) = self.peek() {
            if exponent.contains(&c) {
                self.pos += 1;
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.pos += 1;
                }
            } else if c.is_ascii_hexdigit() || c == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        if let Some(n) = parse_integer(text) {
            return Ok(TokenKind::Integer(n));
        }
        match parse_float(text) {
            Some(f) => Ok(TokenKind::Float(f)),
            None => self.error(format!("malformed number near '{text}'")),
        }
    }

    // ── main dispatch ───────────────────────────────────────────────────────

    fn next_token(&mut self) -> Result<Token, LuaError> {
        use TokenKind::*;

        self.skip_trivia()?;
        let line = self.line;
        let Some(ch) = self.peek() else {
            return Ok(Token::new(Eof, line));
        };

        if ch.is_ascii_digit() || (ch == b'.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())) {
            return Ok(Token::new(self.read_number()?, line));
        }
        if ch == b'_' || ch.is_ascii_alphabetic() {
            let start = self.pos;
            while self.peek().is_some_and(|c| c == b'_' || c.is_ascii_alphanumeric()) {
                self.pos += 1;
            }
            let word = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
            let kind = TokenKind::keyword(word).unwrap_or_else(|| Name(word.to_owned()));
            return Ok(Token::new(kind, line));
        }
        if ch == b'[' {
            if let Some(level) = self.long_bracket_level() {
                let bytes = self.read_long_bracket(level)?;
                return Ok(Token::new(Str(into_string(bytes)), line));
            }
        }

        self.bump();
        let kind = match ch {
            b'"' | b'\'' => Str(into_string(self.read_short_string(ch)?)),
            b'+' => Plus,
            b'-' => Minus,
            b'*' => Star,
            b'%' => Percent,
            b'^' => Caret,
            b'&' => Ampersand,
            b'|' => Pipe,
            b'#' => Hash,
            b'(' => LParen,
            b')' => RParen,
            b'{' => LBrace,
            b'}' => RBrace,
            b'[' => LBracket,
            b']' => RBracket,
            b';' => Semicolon,
            b',' => Comma,
            b'/' if self.eat(b'/') => DoubleSlash,
            b'/' => Slash,
            b'~' if self.eat(b'=') => NotEq,
            b'~' => Tilde,
            b'=' if self.eat(b'=') => Eq,
            b'=' => Assign,
            b':' if self.eat(b':') => DoubleColon,
            b':' => Colon,
            b'<' if self.eat(b'<') => ShiftLeft,
            b'<' if self.eat(b'=') => LtEq,
            b'<' => Lt,
            b'>' if self.eat(b'>') => ShiftRight,
            b'>' if self.eat(b'=') => GtEq,
            b'>' => Gt,
            b'.' if self.eat(b'.') => {
                if self.eat(b'.') {
                    Ellipsis
                } else {
                    Concat
                }
            }
            b'.' => Dot,
            other => return self.error(format!("unexpected symbol near '{}'", other as char)),
        };
        Ok(Token::new(kind, line))
    }
}

fn into_string(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn lex(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn empty_source_yields_eof() {
        assert_eq!(lex("  \n\t "), vec![Eof]);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(lex("-- line\n--[==[ block\n ]==] x"), vec![Name("x".into()), Eof]);
    }

    #[test]
    fn shebang_line_is_ignored() {
        assert_eq!(lex("#!/usr/bin/lua\nreturn"), vec![Return, Eof]);
    }

    #[test]
    fn numbers() {
        assert_eq!(
            lex("3 0xff 3.0 1e2 .5 0x1p4"),
            vec![
                Integer(3),
                Integer(255),
                Float(3.0),
                Float(100.0),
                Float(0.5),
                Float(16.0),
                Eof
            ]
        );
    }

    #[test]
    fn integer_overflow_becomes_float() {
        assert_eq!(lex("9223372036854775808"), vec![Float(9223372036854775808.0), Eof]);
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(
            lex(r#"'a\tb' "q\"" "\65\x42\u{43}" "é""#),
            vec![
                Str("a\tb".into()),
                Str("q\"".into()),
                Str("ABC".into()),
                Str("é".into()),
                Eof
            ]
        );
    }

    #[test]
    fn long_string_drops_first_newline() {
        assert_eq!(lex("[[\nhi]]"), vec![Str("hi".into()), Eof]);
        assert_eq!(lex("[=[a]]b]=]"), vec![Str("a]]b".into()), Eof]);
    }

    #[test]
    fn operators() {
        assert_eq!(
            lex("// .. ... :: ~= << >= ~"),
            vec![DoubleSlash, Concat, Ellipsis, DoubleColon, NotEq, ShiftLeft, GtEq, Tilde, Eof]
        );
    }

    #[test]
    fn keywords_and_names() {
        assert_eq!(
            lex("local function _f end"),
            vec![Local, Function, Name("_f".into()), End, Eof]
        );
    }

    #[test]
    fn line_numbers_tracked() {
        let lines: Vec<u32> = Lexer::new("a\nb\n\nc")
            .tokenize()
            .unwrap()
            .iter()
            .map(|t| t.line)
            .collect();
        assert_eq!(lines, vec![1, 2, 4, 4]);
    }

    #[test]
    fn unfinished_string_is_error() {
        assert!(matches!(
            Lexer::new("'abc").tokenize(),
            Err(LuaError::Syntax { line: 1, .. })
        ));
    }
}
