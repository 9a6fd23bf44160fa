//! Tokenizer for the restricted script language
//!
//! Produces a flat token stream with explicit NEWLINE / INDENT / DEDENT
//! tokens so the parser never has to look at whitespace.

use std::iter::Peekable;
use std::str::Chars;

/// Reserved words. Some only exist so the validator can name them.
pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Operators and delimiters, longest first so greedy matching works.
const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "+", "-",
    "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

const TAB_WIDTH: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Keyword(&'static str),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Tokenize a whole program.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        )
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut at_line_start = true;

        loop {
            if at_line_start && self.depth == 0 {
                if self.indentation()? {
                    continue;
                }
                at_line_start = false;
            }

            let Some(&c) = self.chars.peek() else { break };

            match c {
                '\n' => {
                    self.chars.next();
                    if self.depth == 0 && !self.last_is_newline() {
                        self.push(Tok::Newline);
                    }
                    self.line += 1;
                    at_line_start = self.depth == 0;
                }
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.chars.next();
                }
                '#' => self.skip_comment(),
                '\\' => {
                    self.chars.next();
                    match self.chars.next() {
                        Some('\n') => self.line += 1,
                        Some('\r') if self.chars.peek() == Some(&'\n') => {
                            self.chars.next();
                            self.line += 1;
                        }
                        _ => {
                            return Err(SyntaxError::new(
                                self.line,
                                "unexpected character after line continuation character",
                            ))
                        }
                    }
                }
                '"' | '\'' => {
                    let s = self.string(c, false)?;
                    self.push(Tok::Str(s));
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_second().is_some_and(|n| n.is_ascii_digit()) => self.number()?,
                c if c == '_' || c.is_alphabetic() => self.word()?,
                _ => self.operator()?,
            }
        }

        if !self.last_is_newline() {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    /// Measure leading whitespace and emit INDENT/DEDENT. Returns true when
    /// the line was blank or comment-only and has been consumed.
    fn indentation(&mut self) -> Result<bool, SyntaxError> {
        let mut width = 0;
        while let Some(&c) = self.chars.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.chars.next();
        }

        match self.chars.peek() {
            None => return Ok(false),
            Some('#') => {
                self.skip_comment();
                return Ok(self.consume_newline());
            }
            Some('\n') => return Ok(self.consume_newline()),
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(SyntaxError::new(
                    self.line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(false)
    }

    fn consume_newline(&mut self) -> bool {
        if self.chars.peek() == Some(&'\n') {
            self.chars.next();
            self.line += 1;
            true
        } else {
            false
        }
    }

    fn skip_comment(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.chars.next();
        }
    }

    fn peek_second(&self) -> Option<char> {
        let mut it = self.chars.clone();
        it.next();
        it.next()
    }

    fn word(&mut self) -> Result<(), SyntaxError> {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c == '_' || c.is_alphanumeric() {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }

        if let Some(&q) = self.chars.peek() {
            if q == '"' || q == '\'' {
                let prefix = word.to_ascii_lowercase();
                match prefix.as_str() {
                    "r" | "u" => {
                        let s = self.string(q, prefix == "r")?;
                        self.push(Tok::Str(s));
                        return Ok(());
                    }
                    "b" | "br" | "rb" => {
                        return Err(SyntaxError::new(self.line, "bytes literals are not supported"))
                    }
                    "f" | "fr" | "rf" => {
                        return Err(SyntaxError::new(self.line, "f-strings are not supported"))
                    }
                    _ => {}
                }
            }
        }

        match KEYWORDS.iter().find(|k| **k == word).copied() {
            Some(k) => self.push(Tok::Keyword(k)),
            None => self.push(Tok::Name(word)),
        }
        Ok(())
    }

    fn number(&mut self) -> Result<(), SyntaxError> {
        let mut text = String::new();

        if self.chars.peek() == Some(&'0') {
            if let Some(radix) = match self.peek_second() {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            } {
                self.chars.next();
                self.chars.next();
                while let Some(&c) = self.chars.peek() {
                    if c == '_' || c.is_ascii_alphanumeric() {
                        if c != '_' {
                            text.push(c);
                        }
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                let value = i64::from_str_radix(&text, radix)
                    .map_err(|_| SyntaxError::new(self.line, format!("invalid integer literal '{}'", text)))?;
                self.push(Tok::Int(value));
                return Ok(());
            }
        }

        let mut is_float = false;
        while let Some(&c) = self.chars.peek() {
            match c {
                '0'..='9' => text.push(c),
                '_' => {}
                '.' if !is_float => {
                    is_float = true;
                    text.push(c);
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(c);
                    self.chars.next();
                    if let Some(&sign) = self.chars.peek() {
                        if sign == '+' || sign == '-' {
                            text.push(sign);
                            self.chars.next();
                        }
                    }
                    continue;
                }
                _ => break,
            }
            self.chars.next();
        }

        if let Some(&c) = self.chars.peek() {
            if c == '_' || c.is_alphabetic() {
                return Err(SyntaxError::new(self.line, "invalid decimal literal"));
            }
        }

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| SyntaxError::new(self.line, format!("invalid float literal '{}'", text)))?;
            self.push(Tok::Float(value));
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| SyntaxError::new(self.line, "integer literal too large"))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn string(&mut self, quote: char, raw: bool) -> Result<String, SyntaxError> {
        let start = self.line;
        self.chars.next();

        let triple = {
            let mut it = self.chars.clone();
            it.next() == Some(quote) && it.next() == Some(quote)
        };
        if triple {
            self.chars.next();
            self.chars.next();
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.chars.next() else {
                return Err(SyntaxError::new(start, "unterminated string literal"));
            };
            match c {
                c if c == quote => {
                    if !triple {
                        return Ok(out);
                    }
                    let mut it = self.chars.clone();
                    if it.next() == Some(quote) && it.next() == Some(quote) {
                        self.chars.next();
                        self.chars.next();
                        return Ok(out);
                    }
                    out.push(c);
                }
                '\n' => {
                    if !triple {
                        return Err(SyntaxError::new(start, "unterminated string literal"));
                    }
                    self.line += 1;
                    out.push('\n');
                }
                '\\' if raw => {
                    out.push('\\');
                    if let Some(next) = self.chars.next() {
                        if next == '\n' {
                            self.line += 1;
                        }
                        out.push(next);
                    }
                }
                '\\' => self.escape(&mut out)?,
                c => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), SyntaxError> {
        let Some(c) = self.chars.next() else {
            return Err(SyntaxError::new(self.line, "unterminated string literal"));
        };
        match c {
            '\n' => self.line += 1,
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' | '\'' | '"' => out.push(c),
            'x' => out.push(self.hex_escape(2)?),
            'u' => out.push(self.hex_escape(4)?),
            'U' => out.push(self.hex_escape(8)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, SyntaxError> {
        let mut code = 0u32;
        for _ in 0..digits {
            let d = self
                .chars
                .next()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| SyntaxError::new(self.line, "truncated escape sequence"))?;
            code = code * 16 + d;
        }
        char::from_u32(code).ok_or_else(|| SyntaxError::new(self.line, "invalid unicode escape"))
    }

    fn operator(&mut self) -> Result<(), SyntaxError> {
        let rest: String = self.chars.clone().take(3).collect();
        let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)).copied() else {
            let c = rest.chars().next().unwrap_or('?');
            return Err(SyntaxError::new(self.line, format!("invalid character '{}'", c)));
        };

        for _ in 0..op.chars().count() {
            self.chars.next();
        }
        match op {
            "(" | "[" | "{" => self.depth += 1,
            ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.push(Tok::Op(op));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            toks("x = 1 + 1"),
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Op("+"),
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(toks(""), vec![Tok::Eof]);
        assert_eq!(toks("\n\n# just a comment\n"), vec![Tok::Eof]);
    }

    #[test]
    fn test_indent_dedent() {
        let t = toks("if x:\n    y = 1\nz = 2\n");
        assert!(t.contains(&Tok::Indent));
        assert!(t.contains(&Tok::Dedent));
        let indent = t.iter().position(|t| *t == Tok::Indent).unwrap();
        let dedent = t.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert!(indent < dedent);
    }

    #[test]
    fn test_bad_dedent() {
        let err = tokenize("if x:\n        y = 1\n    z = 2\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_brackets_join_lines() {
        let t = toks("x = [1,\n     2]\n");
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!t.contains(&Tok::Indent));
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(toks(r#"'a\tb'"#)[0], Tok::Str("a\tb".into()));
        assert_eq!(toks(r#"r'a\tb'"#)[0], Tok::Str("a\\tb".into()));
        assert_eq!(toks("'''a\nb'''")[0], Tok::Str("a\nb".into()));
        assert_eq!(toks(r#""\x41\u00e9""#)[0], Tok::Str("Aé".into()));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("'abc").is_err());
        assert!(tokenize("'abc\n'").is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("0x1f")[0], Tok::Int(31));
        assert_eq!(toks("1_000")[0], Tok::Int(1000));
        assert_eq!(toks("2.5e2")[0], Tok::Float(250.0));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
        assert!(tokenize("99999999999999999999").is_err());
        assert!(tokenize("12abc").is_err());
    }

    #[test]
    fn test_keywords_and_operators() {
        let t = toks("import os");
        assert_eq!(t[0], Tok::Keyword("import"));
        let t = toks("a //= 2 ** 3");
        assert_eq!(t[1], Tok::Op("//="));
        assert_eq!(t[3], Tok::Op("**"));
    }

    #[test]
    fn test_rejected_characters() {
        assert!(tokenize("a | b").is_err());
        assert!(tokenize("x = f'{y}'").is_err());
        assert!(tokenize("x = b'raw'").is_err());
    }
}
