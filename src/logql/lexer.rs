//! Tokenizer for LogQL.
//!
//! Numbers directly followed by letters are read as one literal and then
//! classified: plain number (`1e3`), duration (`5m`, `1h30m`) or byte size
//! (`10KB`, `1MiB`). `#` starts a comment running to end of line.

use super::ParseError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Duration(Duration),
    Bytes(u64),
    /// `--strict`, `--keep-empty` style flags, stored without the dashes.
    Flag(String),
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Neq,
    Re,
    Nre,
    PipeExact,
    PipeMatch,
    PipePattern,
    NotPattern,
    Pipe,
    CmpEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(s) => format!("identifier {s:?}"),
            Self::Str(s) => format!("string {s:?}"),
            Self::Number(n) => format!("number {n}"),
            Self::Duration(d) => format!("duration {d:?}"),
            Self::Bytes(b) => format!("bytes {b}"),
            Self::Flag(f) => format!("flag --{f}"),
            other => format!("{:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut lexer = Lexer {
        src: input,
        chars: input.char_indices().collect(),
        i: 0,
    };
    let mut out = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        out.push(tok);
    }
    Ok(out)
}

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    i: usize,
}

impl Lexer<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).map(|(_, c)| *c)
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.i + n).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.i)
            .map(|(o, _)| *o)
            .unwrap_or(self.src.len())
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.i += 1;
            } else if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.i += 1;
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Spanned>, ParseError> {
        self.skip_trivia();
        let pos = self.offset();
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let two = |a: char, b: char| c == a && self.peek_at(1) == Some(b);

        let (token, width) = if two('|', '=') {
            (Token::PipeExact, 2)
        } else if two('|', '~') {
            (Token::PipeMatch, 2)
        } else if two('|', '>') {
            (Token::PipePattern, 2)
        } else if two('!', '=') {
            (Token::Neq, 2)
        } else if two('!', '~') {
            (Token::Nre, 2)
        } else if two('!', '>') {
            (Token::NotPattern, 2)
        } else if two('=', '~') {
            (Token::Re, 2)
        } else if two('=', '=') {
            (Token::CmpEq, 2)
        } else if two('>', '=') {
            (Token::Gte, 2)
        } else if two('<', '=') {
            (Token::Lte, 2)
        } else if two('-', '-') && self.peek_at(2).is_some_and(|c| c.is_ascii_alphabetic()) {
            self.i += 2;
            let flag = self.take_while(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            return Ok(Some(Spanned {
                token: Token::Flag(flag),
                pos,
            }));
        } else {
            match c {
                '{' => (Token::LBrace, 1),
                '}' => (Token::RBrace, 1),
                '(' => (Token::LParen, 1),
                ')' => (Token::RParen, 1),
                '[' => (Token::LBracket, 1),
                ']' => (Token::RBracket, 1),
                ',' => (Token::Comma, 1),
                '=' => (Token::Eq, 1),
                '|' => (Token::Pipe, 1),
                '>' => (Token::Gt, 1),
                '<' => (Token::Lt, 1),
                '+' => (Token::Add, 1),
                '-' => (Token::Sub, 1),
                '*' => (Token::Mul, 1),
                '/' => (Token::Div, 1),
                '%' => (Token::Mod, 1),
                '^' => (Token::Pow, 1),
                '"' => {
                    let s = self.quoted_string(pos)?;
                    return Ok(Some(Spanned {
                        token: Token::Str(s),
                        pos,
                    }));
                }
                '`' => {
                    let s = self.raw_string(pos)?;
                    return Ok(Some(Spanned {
                        token: Token::Str(s),
                        pos,
                    }));
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) =>
                {
                    let token = self.number_like(pos)?;
                    return Ok(Some(Spanned { token, pos }));
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let ident = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                    return Ok(Some(Spanned {
                        token: Token::Ident(ident),
                        pos,
                    }));
                }
                other => {
                    return Err(ParseError::at(pos, format!("unexpected character {other:?}")));
                }
            }
        };

        self.i += width;
        Ok(Some(Spanned { token, pos }))
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            s.push(c);
            self.i += 1;
        }
        s
    }

    fn number_like(&mut self, pos: usize) -> Result<Token, ParseError> {
        let mut lit = self.take_while(|c| c.is_ascii_alphanumeric() || c == '.' || c == 'µ');
        // Exponent sign: 1e-3 / 2E+5.
        if (lit.ends_with('e') || lit.ends_with('E'))
            && matches!(self.peek(), Some('+') | Some('-'))
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            if let Some(sign) = self.peek() {
                lit.push(sign);
                self.i += 1;
            }
            lit.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }

        match lit.parse::<f64>() {
            Ok(n) if n.is_finite() => return Ok(Token::Number(n)),
            _ => {}
        }
        if let Some(d) = parse_duration_literal(&lit) {
            return Ok(Token::Duration(d));
        }
        if let Some(b) = parse_bytes_literal(&lit) {
            return Ok(Token::Bytes(b));
        }
        Err(ParseError::at(pos, format!("invalid number or duration {lit:?}")))
    }

    fn quoted_string(&mut self, pos: usize) -> Result<String, ParseError> {
        self.i += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ParseError::at(pos, "unterminated string literal"));
            };
            self.i += 1;
            match c {
                '"' => return Ok(out),
                '\n' => return Err(ParseError::at(pos, "newline in string literal")),
                '\\' => out.push(self.escape(pos)?),
                c => out.push(c),
            }
        }
    }

    fn escape(&mut self, pos: usize) -> Result<char, ParseError> {
        let Some(c) = self.peek() else {
            return Err(ParseError::at(pos, "unterminated string literal"));
        };
        self.i += 1;
        let simple = match c {
            'a' => Some('\u{07}'),
            'b' => Some('\u{08}'),
            'f' => Some('\u{0c}'),
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            'v' => Some('\u{0b}'),
            '\\' => Some('\\'),
            '"' => Some('"'),
            _ => None,
        };
        if let Some(ch) = simple {
            return Ok(ch);
        }
        if ('0'..='7').contains(&c) {
            return self.octal_escape(c, pos);
        }
        let digits = match c {
            'x' => 2,
            'u' => 4,
            'U' => 8,
            other => {
                return Err(ParseError::at(
                    pos,
                    format!("invalid escape sequence \\{other} in string"),
                ));
            }
        };
        let hex = self.take_n_hex(digits);
        if hex.len() != digits {
            return Err(ParseError::at(pos, "truncated escape sequence in string"));
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| ParseError::at(pos, format!("invalid escape \\{c}{hex}")))
    }

    /// `\ooo`: exactly three octal digits, at most `\377`.
    fn octal_escape(&mut self, first: char, pos: usize) -> Result<char, ParseError> {
        let mut digits = String::from(first);
        while digits.len() < 3 {
            match self.peek() {
                Some(c @ '0'..='7') => {
                    digits.push(c);
                    self.i += 1;
                }
                _ => return Err(ParseError::at(pos, "truncated octal escape in string")),
            }
        }
        match u8::from_str_radix(&digits, 8) {
            Ok(b) => Ok(char::from(b)),
            Err(_) => Err(ParseError::at(pos, format!("octal escape \\{digits} out of range"))),
        }
    }

    fn take_n_hex(&mut self, n: usize) -> String {
        let mut s = String::new();
        while s.len() < n {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() => {
                    s.push(c);
                    self.i += 1;
                }
                _ => break,
            }
        }
        s
    }

    fn raw_string(&mut self, pos: usize) -> Result<String, ParseError> {
        self.i += 1;
        let s = self.take_while(|c| c != '`');
        if self.peek() != Some('`') {
            return Err(ParseError::at(pos, "unterminated raw string literal"));
        }
        self.i += 1;
        Ok(s)
    }
}

const NANOS_PER_UNIT: [(&str, f64); 10] = [
    ("ns", 1.0),
    ("us", 1e3),
    ("µs", 1e3),
    ("ms", 1e6),
    ("s", 1e9),
    ("m", 60e9),
    ("h", 3600e9),
    ("d", 86400e9),
    ("w", 604800e9),
    ("y", 31536000e9),
];

/// `1h30m`, `1.5h`, `250ms`. Units may repeat in any order, like Go durations.
fn parse_duration_literal(lit: &str) -> Option<Duration> {
    let mut rest = lit;
    let mut total = 0f64;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return None;
        }
        let n: f64 = rest[..num_len].parse().ok()?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let (_, scale) = NANOS_PER_UNIT.iter().find(|(u, _)| *u == unit)?;
        total += n * scale;
        rest = &rest[unit_len..];
    }
    if !total.is_finite() || total > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total as u64))
}

/// `10KB`, `1.5MiB`, `42b`. Units are case-insensitive.
fn parse_bytes_literal(lit: &str) -> Option<u64> {
    let num_len = lit
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(lit.len());
    if num_len == 0 || num_len == lit.len() {
        return None;
    }
    let n: f64 = lit[..num_len].parse().ok()?;
    let scale: f64 = match lit[num_len..].to_ascii_lowercase().as_str() {
        "b" => 1.0,
        "kb" => 1e3,
        "kib" => 1024.0,
        "mb" => 1e6,
        "mib" => 1024.0 * 1024.0,
        "gb" => 1e9,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "tb" => 1e12,
        "tib" => 1024f64.powi(4),
        "pb" => 1e15,
        "pib" => 1024f64.powi(5),
        _ => return None,
    };
    let v = n * scale;
    if !v.is_finite() || v > u64::MAX as f64 {
        return None;
    }
    Some(v as u64)
}
