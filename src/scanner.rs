//! Lexical scanner
//!
//! A hand-written scanner over a character stream. `scan` returns the
//! next token with its starting position and literal text; whitespace
//! comes back as a single [`Token::Ws`] token and the parser is
//! responsible for skipping it. Regex literals are only scanned on
//! demand through [`Scanner::scan_regex`], because `/` is division
//! everywhere else.

use crate::error::{QueryError, QueryResult};
use crate::token::{lookup, Pos, Token};

/// Depth of the reader's history ring. Covers the deepest
/// read-then-unread chain the scanner performs.
const READER_BUF: usize = 3;

/// A buffered character reader with unread support.
///
/// Carriage returns are normalized to newlines while reading; a
/// `\r\n` pair counts as a single newline. Reading past the end keeps
/// returning `None`, and the end-of-input position is only counted
/// once.
struct Reader {
    chars: Vec<char>,
    idx: usize,
    pos: Pos,
    buf: [(Option<char>, Pos); READER_BUF],
    bufi: usize,
    unreads: usize,
    eof: bool,
}

impl Reader {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            idx: 0,
            pos: Pos::default(),
            buf: [(None, Pos::default()); READER_BUF],
            bufi: 0,
            unreads: 0,
            eof: false,
        }
    }

    /// Reads the next character and its position, replaying unread
    /// characters first.
    fn read(&mut self) -> (Option<char>, Pos) {
        if self.unreads > 0 {
            self.unreads -= 1;
            return self.curr();
        }

        let ch = match self.chars.get(self.idx).copied() {
            Some('\r') => {
                self.idx += 1;
                if self.chars.get(self.idx) == Some(&'\n') {
                    self.idx += 1;
                }
                Some('\n')
            }
            Some(c) => {
                self.idx += 1;
                Some(c)
            }
            None => None,
        };

        self.bufi = (self.bufi + 1) % READER_BUF;
        self.buf[self.bufi] = (ch, self.pos);

        match ch {
            Some('\n') => {
                self.pos.line += 1;
                self.pos.column = 0;
            }
            _ if !self.eof => self.pos.column += 1,
            _ => {}
        }
        if ch.is_none() {
            self.eof = true;
        }

        self.curr()
    }

    /// Pushes the previously read character back onto the reader.
    fn unread(&mut self) {
        self.unreads += 1;
    }

    /// The last character the reader handed out, accounting for
    /// unreads.
    fn curr(&self) -> (Option<char>, Pos) {
        let i = (self.bufi + READER_BUF - self.unreads) % READER_BUF;
        self.buf[i]
    }
}

pub(crate) fn is_whitespace(ch: char) -> bool {
    ch == ' ' || ch == '\t' || ch == '\n'
}

fn is_ident_first_char(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

enum StringScan {
    Bad(String),
    Escape(String),
}

/// Reads a quote-delimited string. The reader must sit at the opening
/// quote; the same character closes it, so both `'` and `"` work.
fn scan_string_raw(r: &mut Reader) -> Result<String, StringScan> {
    let (ending, _) = r.read();
    let Some(ending) = ending else {
        return Err(StringScan::Bad(String::new()));
    };

    let mut buf = String::new();
    loop {
        let (ch, _) = r.read();
        match ch {
            Some(c) if c == ending => return Ok(buf),
            None | Some('\n') => return Err(StringScan::Bad(buf)),
            Some('\\') => {
                let (ch1, _) = r.read();
                match ch1 {
                    Some('n') => buf.push('\n'),
                    Some('r') => buf.push('\r'),
                    Some('t') => buf.push('\t'),
                    Some('\\') => buf.push('\\'),
                    Some('"') => buf.push('"'),
                    Some('\'') => buf.push('\''),
                    other => {
                        let mut lit = String::from('\\');
                        if let Some(c1) = other {
                            lit.push(c1);
                        }
                        return Err(StringScan::Escape(lit));
                    }
                }
            }
            Some(c) => buf.push(c),
        }
    }
}

/// Reads a `/`-delimited regex body. `\/` decodes to a literal slash;
/// every other backslash sequence passes through verbatim.
fn scan_regex_raw(r: &mut Reader) -> Option<String> {
    let (start, _) = r.read();
    if start != Some('/') {
        return None;
    }

    let mut buf = String::new();
    loop {
        let (ch, _) = r.read();
        match ch {
            Some('/') => return Some(buf),
            None | Some('\n') => return None,
            Some('\\') => match r.read() {
                (Some('/'), _) => buf.push('/'),
                (None, _) => return None,
                _ => {
                    r.unread();
                    buf.push('\\');
                }
            },
            Some(c) => buf.push(c),
        }
    }
}

/// The lexical scanner.
pub struct Scanner {
    r: Reader,
    /// Last non-whitespace token returned, used to decide whether a
    /// `+`/`-` begins a signed number or is an operator.
    prev: Token,
}

impl Scanner {
    /// Create a scanner over the given input.
    pub fn new(input: &str) -> Self {
        Self {
            r: Reader::new(input),
            prev: Token::Illegal,
        }
    }

    /// Returns the next token, its starting position, and its literal
    /// text. EOF is idempotent.
    pub fn scan(&mut self) -> (Token, Pos, String) {
        let (tok, pos, lit) = self.scan_token();
        if tok != Token::Ws {
            self.prev = tok;
        }
        (tok, pos, lit)
    }

    /// Scans the next token as a regex literal. Used by the parser
    /// after an operator that expects a regex on its right side.
    pub fn scan_regex(&mut self) -> (Token, Pos, String) {
        let (_, pos) = self.r.curr();
        match scan_regex_raw(&mut self.r) {
            Some(lit) => {
                self.prev = Token::Regex;
                (Token::Regex, pos, lit)
            }
            None => {
                self.prev = Token::BadRegex;
                (Token::BadRegex, pos, String::new())
            }
        }
    }

    /// Reads a quote-delimited string from the current position and
    /// returns its decoded body.
    pub fn scan_string(&mut self) -> QueryResult<String> {
        match scan_string_raw(&mut self.r) {
            Ok(s) => Ok(s),
            Err(StringScan::Bad(_)) => Err(QueryError::BadString),
            Err(StringScan::Escape(_)) => Err(QueryError::BadEscape),
        }
    }

    /// Peeks at the next raw character without consuming it.
    pub(crate) fn peek_rune(&mut self) -> Option<char> {
        let (ch, _) = self.r.read();
        self.r.unread();
        ch
    }

    fn scan_token(&mut self) -> (Token, Pos, String) {
        let (ch, pos) = self.r.read();
        let Some(ch0) = ch else {
            return (Token::Eof, pos, String::new());
        };

        if is_whitespace(ch0) {
            self.r.unread();
            return self.scan_whitespace();
        }
        if is_ident_first_char(ch0) {
            self.r.unread();
            return self.scan_ident(true);
        }
        if ch0.is_ascii_digit() {
            self.r.unread();
            return self.scan_number(pos, "");
        }

        match ch0 {
            '"' => {
                self.r.unread();
                self.scan_ident(false)
            }
            '\'' => {
                self.r.unread();
                self.scan_string_token()
            }
            '.' => {
                let (ch1, _) = self.r.read();
                self.r.unread();
                if ch1.is_some_and(|c| c.is_ascii_digit()) {
                    self.r.unread();
                    self.scan_number(pos, "")
                } else {
                    (Token::Dot, pos, String::new())
                }
            }
            '+' | '-' => self.scan_sign(ch0, pos),
            '*' => (Token::Mul, pos, String::new()),
            '/' => (Token::Div, pos, String::new()),
            '=' => match self.r.read() {
                (Some('~'), _) => (Token::EqRegex, pos, String::new()),
                _ => {
                    self.r.unread();
                    (Token::Eq, pos, String::new())
                }
            },
            '!' => match self.r.read() {
                (Some('='), _) => (Token::Neq, pos, String::new()),
                (Some('~'), _) => (Token::NeqRegex, pos, String::new()),
                _ => {
                    self.r.unread();
                    (Token::Illegal, pos, "!".to_string())
                }
            },
            '<' => match self.r.read() {
                (Some('='), _) => (Token::Lte, pos, String::new()),
                (Some('>'), _) => (Token::Neq, pos, String::new()),
                _ => {
                    self.r.unread();
                    (Token::Lt, pos, String::new())
                }
            },
            '>' => match self.r.read() {
                (Some('='), _) => (Token::Gte, pos, String::new()),
                _ => {
                    self.r.unread();
                    (Token::Gt, pos, String::new())
                }
            },
            ':' => match self.r.read() {
                (Some(':'), _) => (Token::DoubleColon, pos, String::new()),
                _ => {
                    self.r.unread();
                    (Token::Colon, pos, String::new())
                }
            },
            '(' => (Token::LParen, pos, String::new()),
            ')' => (Token::RParen, pos, String::new()),
            '[' => (Token::LBracket, pos, String::new()),
            ']' => (Token::RBracket, pos, String::new()),
            ',' => (Token::Comma, pos, String::new()),
            ';' => (Token::Semicolon, pos, String::new()),
            '$' => {
                let (tok, _, lit) = self.scan_ident(false);
                if tok != Token::Ident {
                    return (tok, pos, lit);
                }
                (Token::BoundParam, pos, format!("${lit}"))
            }
            other => (Token::Illegal, pos, other.to_string()),
        }
    }

    fn scan_whitespace(&mut self) -> (Token, Pos, String) {
        let (ch, pos) = self.r.read();
        let mut buf = String::new();
        if let Some(c) = ch {
            buf.push(c);
        }
        loop {
            match self.r.read() {
                (None, _) => break,
                (Some(c), _) if is_whitespace(c) => buf.push(c),
                _ => {
                    self.r.unread();
                    break;
                }
            }
        }
        (Token::Ws, pos, buf)
    }

    fn scan_ident(&mut self, keyword_lookup: bool) -> (Token, Pos, String) {
        let (_, pos) = self.r.read();
        self.r.unread();

        let mut buf = String::new();
        loop {
            let (ch, _) = self.r.read();
            match ch {
                None => break,
                Some('"') => {
                    // A quoted identifier; its decoded body becomes the
                    // literal, discarding anything scanned before it.
                    self.r.unread();
                    let (tok, qpos, lit) = self.scan_string_token();
                    if tok == Token::BadString || tok == Token::BadEscape {
                        return (tok, qpos, lit);
                    }
                    return (Token::Ident, pos, lit);
                }
                Some(c) if is_ident_char(c) => buf.push(c),
                Some(_) => {
                    self.r.unread();
                    break;
                }
            }
        }

        if keyword_lookup {
            let tok = lookup(&buf);
            if tok != Token::Ident {
                return (tok, pos, String::new());
            }
        }
        (Token::Ident, pos, buf)
    }

    /// Scans a quoted string. The reader sits just before the opening
    /// quote; the reported position is that of the character the
    /// reader handed out last, which for a quoted tail after a bare
    /// identifier is the final identifier character.
    fn scan_string_token(&mut self) -> (Token, Pos, String) {
        let (_, pos) = self.r.curr();
        match scan_string_raw(&mut self.r) {
            Ok(lit) => (Token::String, pos, lit),
            Err(StringScan::Bad(lit)) => (Token::BadString, pos, lit),
            Err(StringScan::Escape(lit)) => {
                let (_, pos) = self.r.curr();
                (Token::BadEscape, pos, lit)
            }
        }
    }

    fn scan_sign(&mut self, sign: char, pos: Pos) -> (Token, Pos, String) {
        if !self.prev.ends_operand() {
            let (ch1, _) = self.r.read();
            match ch1 {
                Some(c) if c.is_ascii_digit() => {
                    self.r.unread();
                    return self.scan_number(pos, &sign.to_string());
                }
                Some('.') => {
                    let (ch2, _) = self.r.read();
                    self.r.unread();
                    if ch2.is_some_and(|c| c.is_ascii_digit()) {
                        self.r.unread();
                        return self.scan_number(pos, &sign.to_string());
                    }
                }
                _ => self.r.unread(),
            }
        }
        if sign == '+' {
            (Token::Add, pos, String::new())
        } else {
            (Token::Sub, pos, String::new())
        }
    }

    /// Scans a numeric literal. `prefix` carries an already-consumed
    /// sign; `pos` is the position of the first character of the
    /// token. The token is NUMBER iff a decimal point appeared, even
    /// when no digits follow it.
    fn scan_number(&mut self, pos: Pos, prefix: &str) -> (Token, Pos, String) {
        let mut buf = String::from(prefix);
        buf.push_str(&self.scan_digits());

        let mut decimal = false;
        let (ch, _) = self.r.read();
        if ch == Some('.') {
            decimal = true;
            let (ch1, _) = self.r.read();
            if let Some(c) = ch1.filter(|c| c.is_ascii_digit()) {
                buf.push('.');
                buf.push(c);
                buf.push_str(&self.scan_digits());
            } else {
                self.r.unread();
            }
        } else {
            self.r.unread();
        }

        if decimal {
            (Token::Number, pos, buf)
        } else {
            (Token::Integer, pos, buf)
        }
    }

    fn scan_digits(&mut self) -> String {
        let mut buf = String::new();
        loop {
            match self.r.read() {
                (Some(c), _) if c.is_ascii_digit() => buf.push(c),
                (None, _) => break,
                _ => {
                    self.r.unread();
                    break;
                }
            }
        }
        buf
    }
}
