//! The scanner
//!
//! Turns source text into a flat token stream. Two things make the
//! stream unusual:
//!
//! - Open brackets carry the forward distance to their matching close
//!   token, so the parser can skip type-argument lists and formal
//!   parameter lists in O(1). Matching is done here with a marker stack;
//!   `(`, `{` and `<` participate, and an unmatched close keeps the
//!   default payload of −1.
//! - String interpolation is lowered into a micro-sequence of
//!   `StringInterpolation "prefix"`, expression tokens, …,
//!   `StringInterpolationEnd "suffix"`, driven by an explicit mode stack,
//!   so the parser re-enters expression mode without any scanner
//!   coupling.
//!
//! `>` is split into `GtStart`/`Gt` so the parser can tell nested
//! type-argument closers from shift operators.

use crate::builder::Builder;
use crate::error::{CompileError, ErrorKind, Result};
use crate::source::Location;
use crate::tokens::{TokenInfo, TokenKind};

struct StringState {
    quote: u8,
    triple: bool,
    raw: bool,
    /// Set once an interpolation part has been emitted.
    interpolated: bool,
    buffer: String,
}

enum Mode {
    Str(StringState),
    Expr { brace_depth: u32 },
}

struct Marker {
    kind: TokenKind,
    token_index: usize,
}

pub struct Scanner<'a, 'z> {
    builder: &'a mut Builder<'z>,
    input: &'z [u8],
    index: usize,
    begin_index: usize,
    start_location: Location,
    tokens: Vec<TokenInfo>,
    markers: Vec<Marker>,
    modes: Vec<Mode>,
}

impl<'a, 'z> Scanner<'a, 'z> {
    /// Scan `input` (which starts at `start_location`) to tokens. The
    /// returned stream always ends with an `Eof` token.
    pub fn scan(
        builder: &'a mut Builder<'z>,
        input: &'z str,
        start_location: Location,
    ) -> Result<Vec<TokenInfo>> {
        let mut scanner = Scanner {
            builder,
            input: input.as_bytes(),
            index: 0,
            begin_index: 0,
            start_location,
            tokens: Vec::new(),
            markers: Vec::new(),
            modes: Vec::new(),
        };
        scanner.run()?;
        scanner.begin_index = scanner.index;
        scanner.add_token(TokenKind::Eof, -1);
        Ok(scanner.tokens)
    }

    fn run(&mut self) -> Result<()> {
        loop {
            if matches!(self.modes.last(), Some(Mode::Str(_))) {
                self.scan_string_part()?;
                continue;
            }
            self.skip_whitespace_and_comments()?;
            if self.at_end() {
                if self.modes.is_empty() {
                    return Ok(());
                }
                return Err(self.error("Unterminated string interpolation"));
            }
            self.begin_index = self.index;
            self.scan_token()?;
        }
    }

    // ------------------------------------------------------------------
    // Helpers.

    fn at_end(&self) -> bool {
        self.index >= self.input.len()
    }

    fn current(&self) -> u8 {
        if self.at_end() { 0 } else { self.input[self.index] }
    }

    fn peek(&self, offset: usize) -> u8 {
        *self.input.get(self.index + offset).unwrap_or(&0)
    }

    fn advance(&mut self) -> u8 {
        self.index += 1;
        self.current()
    }

    fn location(&self) -> Location {
        self.start_location.offset(self.begin_index as u32)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(
            ErrorKind::Scan,
            self.start_location.offset(self.index as u32),
            message,
        )
    }

    fn add_token(&mut self, kind: TokenKind, payload: i32) {
        let location = self.location();
        self.tokens.push(TokenInfo::new(kind, payload, location));
    }

    fn push_marker(&mut self, kind: TokenKind) {
        self.markers.push(Marker {
            kind,
            token_index: self.tokens.len(),
        });
    }

    /// Close a bracket: write the distance into the matching open token.
    ///
    /// `(` and `{` match through stray `<` markers; `>` only ever matches
    /// a `<` sitting directly on top.
    fn pop_marker(&mut self, open: TokenKind) {
        let close_index = self.tokens.len();
        if open == TokenKind::Lt {
            if self.markers.last().is_some_and(|marker| marker.kind == TokenKind::Lt) {
                let marker = self.markers.pop().unwrap();
                let distance = (close_index - marker.token_index) as i32;
                self.tokens[marker.token_index] =
                    self.tokens[marker.token_index].with_payload(distance);
            }
            return;
        }
        let mut at = self.markers.len();
        while at > 0 {
            let candidate = &self.markers[at - 1];
            if candidate.kind == open {
                let distance = (close_index - candidate.token_index) as i32;
                self.tokens[candidate.token_index] =
                    self.tokens[candidate.token_index].with_payload(distance);
                self.markers.truncate(at - 1);
                return;
            }
            if candidate.kind == TokenKind::Lt {
                // Stray type-argument candidate, discard it.
                at -= 1;
                continue;
            }
            return;
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            match self.current() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                b'/' if self.peek(1) == b'/' => {
                    while !self.at_end() && self.current() != b'\n' {
                        self.advance();
                    }
                }
                b'/' if self.peek(1) == b'*' => {
                    self.index += 2;
                    let mut depth = 1;
                    while depth > 0 {
                        if self.at_end() {
                            return Err(self.error("Unterminated comment"));
                        }
                        if self.current() == b'/' && self.peek(1) == b'*' {
                            depth += 1;
                            self.index += 2;
                        } else if self.current() == b'*' && self.peek(1) == b'/' {
                            depth -= 1;
                            self.index += 2;
                        } else {
                            self.index += 1;
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Token dispatch.

    fn scan_token(&mut self) -> Result<()> {
        let byte = self.current();
        match byte {
            b'0'..=b'9' => self.scan_number(),
            b'r' if self.peek(1) == b'\'' || self.peek(1) == b'"' => {
                self.advance();
                self.begin_string(true)
            }
            b'\'' | b'"' => self.begin_string(false),
            _ if is_identifier_start(byte) => {
                self.scan_identifier();
                Ok(())
            }
            b'(' => {
                self.push_marker(TokenKind::LParen);
                self.single(TokenKind::LParen)
            }
            b')' => {
                self.pop_marker(TokenKind::LParen);
                self.single(TokenKind::RParen)
            }
            b'[' => {
                if self.peek(1) == b']' {
                    if self.peek(2) == b'=' {
                        self.multi(TokenKind::AssignIndex, 3)
                    } else {
                        self.multi(TokenKind::Index, 2)
                    }
                } else {
                    self.single(TokenKind::LBrack)
                }
            }
            b']' => self.single(TokenKind::RBrack),
            b'{' => {
                if let Some(Mode::Expr { brace_depth }) = self.modes.last_mut() {
                    *brace_depth += 1;
                }
                self.push_marker(TokenKind::LBrace);
                self.single(TokenKind::LBrace)
            }
            b'}' => {
                if let Some(Mode::Expr { brace_depth }) = self.modes.last_mut() {
                    if *brace_depth == 0 {
                        self.modes.pop();
                        self.index += 1;
                        return Ok(());
                    }
                    *brace_depth -= 1;
                }
                self.pop_marker(TokenKind::LBrace);
                self.single(TokenKind::RBrace)
            }
            b'<' => match (self.peek(1), self.peek(2)) {
                (b'=', _) => self.multi(TokenKind::Lte, 2),
                (b'<', b'=') => self.multi(TokenKind::AssignShl, 3),
                (b'<', _) => self.multi(TokenKind::Shl, 2),
                _ => {
                    self.push_marker(TokenKind::Lt);
                    self.single(TokenKind::Lt)
                }
            },
            b'>' => match (self.peek(1), self.peek(2)) {
                (b'>', b'=') => self.multi(TokenKind::AssignShr, 3),
                (b'=', _) => self.multi(TokenKind::Gte, 2),
                (b'>', _) => {
                    self.pop_marker(TokenKind::Lt);
                    self.single(TokenKind::GtStart)
                }
                _ => {
                    self.pop_marker(TokenKind::Lt);
                    self.single(TokenKind::Gt)
                }
            },
            b'=' => match self.peek(1) {
                b'=' => self.multi(TokenKind::Eq, 2),
                b'>' => self.multi(TokenKind::Arrow, 2),
                _ => self.single(TokenKind::Assign),
            },
            b'!' => match self.peek(1) {
                b'=' => self.multi(TokenKind::Ne, 2),
                _ => self.single(TokenKind::Not),
            },
            b'+' => match self.peek(1) {
                b'+' => self.multi(TokenKind::Increment, 2),
                b'=' => self.multi(TokenKind::AssignAdd, 2),
                _ => self.single(TokenKind::Add),
            },
            b'-' => match self.peek(1) {
                b'-' => self.multi(TokenKind::Decrement, 2),
                b'=' => self.multi(TokenKind::AssignSub, 2),
                _ => self.single(TokenKind::Sub),
            },
            b'*' => match self.peek(1) {
                b'=' => self.multi(TokenKind::AssignMul, 2),
                _ => self.single(TokenKind::Mul),
            },
            b'/' => match self.peek(1) {
                b'=' => self.multi(TokenKind::AssignDiv, 2),
                _ => self.single(TokenKind::Div),
            },
            b'%' => match self.peek(1) {
                b'=' => self.multi(TokenKind::AssignMod, 2),
                _ => self.single(TokenKind::Mod),
            },
            b'&' => match self.peek(1) {
                b'&' => self.multi(TokenKind::And, 2),
                b'=' => self.multi(TokenKind::AssignAnd, 2),
                _ => self.single(TokenKind::BitAnd),
            },
            b'|' => match self.peek(1) {
                b'|' => self.multi(TokenKind::Or, 2),
                b'=' => self.multi(TokenKind::AssignOr, 2),
                _ => self.single(TokenKind::BitOr),
            },
            b'^' => match self.peek(1) {
                b'=' => self.multi(TokenKind::AssignXor, 2),
                _ => self.single(TokenKind::BitXor),
            },
            b'~' => match (self.peek(1), self.peek(2)) {
                (b'/', b'=') => self.multi(TokenKind::AssignTruncDiv, 3),
                (b'/', _) => self.multi(TokenKind::TruncDiv, 2),
                _ => self.single(TokenKind::BitNot),
            },
            b'.' => match self.peek(1) {
                b'.' => self.multi(TokenKind::Cascade, 2),
                _ => self.single(TokenKind::Period),
            },
            b',' => self.single(TokenKind::Comma),
            b';' => self.single(TokenKind::Semicolon),
            b':' => self.single(TokenKind::Colon),
            b'?' => self.single(TokenKind::Conditional),
            b'@' => self.single(TokenKind::At),
            b'#' => self.single(TokenKind::Hash),
            _ => Err(self.error(format!("Illegal character '{}'", byte as char))),
        }
    }

    fn single(&mut self, kind: TokenKind) -> Result<()> {
        self.multi(kind, 1)
    }

    fn multi(&mut self, kind: TokenKind, length: usize) -> Result<()> {
        self.add_token(kind, -1);
        self.index += length;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Identifiers and keywords.

    fn scan_identifier(&mut self) {
        let start = self.index;
        let mut node = self.builder.identifier_trie_root();
        while is_identifier_part(self.current()) {
            let byte = self.current();
            node = self.builder.identifier_trie().child(node, byte as i32);
            self.advance();
        }
        let text = std::str::from_utf8(&self.input[start..self.index]).unwrap();
        let (keyword, terminal) = {
            let payload = self.builder.identifier_trie().payload(node);
            (payload.keyword, payload.terminal)
        };
        if let Some(keyword) = keyword {
            self.add_token(keyword, -1);
            return;
        }
        let id = if terminal >= 0 {
            terminal
        } else {
            let id = self.builder.register_identifier(text);
            self.builder.identifier_trie().payload_mut(node).terminal = id;
            id
        };
        self.add_token(TokenKind::Identifier, id);
    }

    /// A short `$name` interpolation segment; stops before `$`.
    fn scan_plain_identifier(&mut self) -> Result<()> {
        self.begin_index = self.index;
        if !is_identifier_start(self.current()) || self.current() == b'$' {
            return Err(self.error("Expected identifier in string interpolation"));
        }
        let start = self.index;
        while is_identifier_part(self.current()) && self.current() != b'$' {
            self.advance();
        }
        let text = std::str::from_utf8(&self.input[start..self.index]).unwrap();
        match self.builder.compute_canonical_id(text) {
            Some(id) => {
                self.add_token(TokenKind::Identifier, id);
                Ok(())
            }
            None => Err(self.error("Keyword in string interpolation")),
        }
    }

    // ------------------------------------------------------------------
    // Numbers.

    fn scan_number(&mut self) -> Result<()> {
        let start = self.index;
        if self.current() == b'0' && (self.peek(1) == b'x' || self.peek(1) == b'X') {
            self.index += 2;
            let digits = self.index;
            while self.current().is_ascii_hexdigit() {
                self.advance();
            }
            if self.index == digits {
                return Err(self.error("Missing hexadecimal digits"));
            }
            let text = std::str::from_utf8(&self.input[digits..self.index]).unwrap();
            let value = i64::from_str_radix(text, 16)
                .map_err(|_| self.error("Integer literal too large"))?;
            self.register_number(start, value);
            return Ok(());
        }

        while self.current().is_ascii_digit() {
            self.advance();
        }

        let mut is_double = false;
        if self.current() == b'.' && self.peek(1).is_ascii_digit() {
            is_double = true;
            self.advance();
            while self.current().is_ascii_digit() {
                self.advance();
            }
        }
        if self.current() == b'e' || self.current() == b'E' {
            let mut at = 1;
            if self.peek(at) == b'+' || self.peek(at) == b'-' {
                at += 1;
            }
            if self.peek(at).is_ascii_digit() {
                is_double = true;
                self.index += at;
                while self.current().is_ascii_digit() {
                    self.advance();
                }
            }
        }

        let text = std::str::from_utf8(&self.input[start..self.index]).unwrap();
        if is_double {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error("Malformed double literal"))?;
            let id = self.builder.register_double(value);
            self.add_token(TokenKind::Double, id);
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.error("Integer literal too large"))?;
            self.register_number(start, value);
        }
        Ok(())
    }

    /// Intern an integer literal through the number trie so repeated
    /// spellings share one registry entry.
    fn register_number(&mut self, start: usize, value: i64) {
        let node = {
            let mut node = self.builder.number_trie().root();
            for at in start..self.index {
                let byte = self.input[at];
                node = self.builder.number_trie().child(node, byte as i32);
            }
            node
        };
        let existing = self.builder.number_trie().payload(node).terminal;
        let id = if existing >= 0 {
            existing
        } else {
            let id = self.builder.register_integer(value);
            self.builder.number_trie().payload_mut(node).terminal = id;
            id
        };
        self.add_token(TokenKind::Integer, id);
    }

    // ------------------------------------------------------------------
    // Strings.

    fn begin_string(&mut self, raw: bool) -> Result<()> {
        let quote = self.current();
        let triple = self.peek(1) == quote && self.peek(2) == quote;
        self.index += if triple { 3 } else { 1 };
        self.modes.push(Mode::Str(StringState {
            quote,
            triple,
            raw,
            interpolated: false,
            buffer: String::new(),
        }));
        Ok(())
    }

    /// Continue scanning the string on top of the mode stack until it
    /// either closes or hits the next interpolation.
    fn scan_string_part(&mut self) -> Result<()> {
        loop {
            if self.at_end() {
                return Err(self.error("Unterminated string literal"));
            }
            let (quote, triple, raw) = match self.modes.last() {
                Some(Mode::Str(state)) => (state.quote, state.triple, state.raw),
                _ => unreachable!("string mode expected"),
            };
            let byte = self.current();

            if byte == quote {
                let closes = if triple {
                    self.peek(1) == quote && self.peek(2) == quote
                } else {
                    true
                };
                if closes {
                    self.index += if triple { 3 } else { 1 };
                    let Some(Mode::Str(state)) = self.modes.pop() else {
                        unreachable!("string mode expected")
                    };
                    let kind = if state.interpolated {
                        TokenKind::StringInterpolationEnd
                    } else {
                        TokenKind::StringLiteral
                    };
                    let id = self.builder.register_string(&state.buffer);
                    self.begin_index = self.index;
                    self.add_token(kind, id);
                    return Ok(());
                }
            }

            if !triple && (byte == b'\n' || byte == b'\r') {
                return Err(self.error("Unterminated string literal"));
            }

            if !raw && byte == b'\\' {
                let escaped = self.peek(1);
                if escaped == 0 {
                    return Err(self.error("Unterminated string literal"));
                }
                let replacement = match escaped {
                    b'b' => 0x08 as char,
                    b'f' => 0x0C as char,
                    b'n' => '\n',
                    b'r' => '\r',
                    b't' => '\t',
                    b'v' => 0x0B as char,
                    other => other as char,
                };
                self.with_string_state(|state| state.buffer.push(replacement));
                self.index += 2;
                continue;
            }

            if !raw && byte == b'$' {
                let next = self.peek(1);
                if next == b'{' {
                    self.flush_interpolation_part();
                    self.index += 2;
                    self.modes.push(Mode::Expr { brace_depth: 0 });
                    return Ok(());
                }
                if is_identifier_start(next) && next != b'$' {
                    self.flush_interpolation_part();
                    self.index += 1;
                    self.scan_plain_identifier()?;
                    continue;
                }
                // A lone '$' stays literal.
            }

            self.with_string_state(|state| state.buffer.push(byte as char));
            self.index += 1;
        }
    }

    fn flush_interpolation_part(&mut self) {
        let buffer = self.with_string_state(|state| {
            state.interpolated = true;
            std::mem::take(&mut state.buffer)
        });
        let id = self.builder.register_string(&buffer);
        self.begin_index = self.index;
        self.add_token(TokenKind::StringInterpolation, id);
    }

    fn with_string_state<T>(&mut self, action: impl FnOnce(&mut StringState) -> T) -> T {
        match self.modes.last_mut() {
            Some(Mode::Str(state)) => action(state),
            _ => unreachable!("string mode expected"),
        }
    }
}

fn is_identifier_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte == b'$'
}

fn is_identifier_part(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$'
}

/// A cursor over a scanned token stream with O(1) skip-ahead.
pub struct TokenStream {
    tokens: Vec<TokenInfo>,
    position: usize,
}

impl TokenStream {
    pub fn new(tokens: Vec<TokenInfo>) -> TokenStream {
        TokenStream {
            tokens,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn rewind_to(&mut self, position: usize) {
        self.position = position;
    }

    pub fn advance(&mut self) {
        self.position += 1;
    }

    pub fn skip(&mut self, n: i32) {
        self.position = (self.position as i32 + n) as usize;
    }

    pub fn current(&self) -> TokenKind {
        self.tokens[self.position].kind()
    }

    pub fn current_payload(&self) -> i32 {
        self.tokens[self.position].payload()
    }

    pub fn current_location(&self) -> Location {
        self.tokens[self.position].location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::Zone;

    struct Scanned {
        kinds: Vec<TokenKind>,
        payloads: Vec<i32>,
        texts: Vec<Option<String>>,
    }

    fn scan(input: &str) -> Scanned {
        let zone = Zone::new();
        let mut builder = Builder::new(&zone);
        let text = zone.alloc_str(input);
        let tokens = Scanner::scan(&mut builder, text, Location::invalid()).expect("scan");
        let mut result = Scanned {
            kinds: Vec::new(),
            payloads: Vec::new(),
            texts: Vec::new(),
        };
        for token in &tokens {
            result.kinds.push(token.kind());
            result.payloads.push(token.payload());
            let text = match token.kind() {
                TokenKind::Identifier => {
                    Some(builder.lookup_identifier(token.payload()).to_string())
                }
                TokenKind::Integer | TokenKind::Double => {
                    let node = builder.lookup_registry(token.payload());
                    match builder.node(node) {
                        crate::ast::Node::LiteralInteger(value) => Some(value.to_string()),
                        crate::ast::Node::LiteralDouble(value) => Some(value.to_string()),
                        _ => None,
                    }
                }
                TokenKind::StringLiteral
                | TokenKind::StringInterpolation
                | TokenKind::StringInterpolationEnd => {
                    let node = builder.lookup_string(token.payload());
                    match builder.node(node) {
                        crate::ast::Node::LiteralString(value) => Some(value.clone()),
                        _ => None,
                    }
                }
                _ => None,
            };
            result.texts.push(text);
        }
        result
    }

    fn scan_error(input: &str) -> CompileError {
        let zone = Zone::new();
        let mut builder = Builder::new(&zone);
        let text = zone.alloc_str(input);
        Scanner::scan(&mut builder, text, Location::invalid()).unwrap_err()
    }

    #[test]
    fn simple_tokens() {
        let result = scan(" 1234 xyz ");
        assert_eq!(
            result.kinds,
            vec![TokenKind::Integer, TokenKind::Identifier, TokenKind::Eof]
        );
        assert_eq!(result.texts[0].as_deref(), Some("1234"));
        assert_eq!(result.texts[1].as_deref(), Some("xyz"));

        let result = scan("if for while");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::If,
                TokenKind::For,
                TokenKind::While,
                TokenKind::Eof
            ]
        );

        let result = scan("1 == 2 => 3");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::Integer,
                TokenKind::Eq,
                TokenKind::Integer,
                TokenKind::Arrow,
                TokenKind::Integer,
                TokenKind::Eof
            ]
        );

        let result = scan(".. ...");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::Cascade,
                TokenKind::Cascade,
                TokenKind::Period,
                TokenKind::Eof
            ]
        );

        let result = scan("$ $0");
        assert_eq!(result.texts[0].as_deref(), Some("$"));
        assert_eq!(result.texts[1].as_deref(), Some("$0"));

        let result = scan("0xA");
        assert_eq!(result.texts[0].as_deref(), Some("10"));

        let result = scan("1.x");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::Integer,
                TokenKind::Period,
                TokenKind::Identifier,
                TokenKind::Eof
            ]
        );

        let result = scan("0.5e-3 1e+0 1e1");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::Double,
                TokenKind::Double,
                TokenKind::Double,
                TokenKind::Eof
            ]
        );
        assert_eq!(result.texts[0].as_deref(), Some("0.0005"));
        assert_eq!(result.texts[2].as_deref(), Some("10"));

        let result = scan("[] []=");
        assert_eq!(
            result.kinds,
            vec![TokenKind::Index, TokenKind::AssignIndex, TokenKind::Eof]
        );
    }

    #[test]
    fn repeated_integer_literals_share_registry_entries() {
        let result = scan("42 42 42");
        assert_eq!(result.payloads[0], result.payloads[1]);
        assert_eq!(result.payloads[1], result.payloads[2]);
    }

    #[test]
    fn greater_than_splitting() {
        let result = scan(">>");
        assert_eq!(
            result.kinds,
            vec![TokenKind::GtStart, TokenKind::Gt, TokenKind::Eof]
        );

        let result = scan("X<Y<Z>>");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::Identifier,
                TokenKind::Lt,
                TokenKind::Identifier,
                TokenKind::Lt,
                TokenKind::Identifier,
                TokenKind::GtStart,
                TokenKind::Gt,
                TokenKind::Eof
            ]
        );
        assert_eq!(result.payloads[1], 5);
        assert_eq!(result.payloads[3], 2);

        let result = scan(">= >>=");
        assert_eq!(
            result.kinds,
            vec![TokenKind::Gte, TokenKind::AssignShr, TokenKind::Eof]
        );
    }

    #[test]
    fn forward_references() {
        let result = scan("(");
        assert_eq!(result.payloads[0], -1);

        let result = scan("()");
        assert_eq!(result.payloads[0], 1);
        assert_eq!(result.payloads[1], -1);

        let result = scan("((()))");
        assert_eq!(result.payloads[0], 5);
        assert_eq!(result.payloads[1], 3);
        assert_eq!(result.payloads[2], 1);

        let result = scan(")()");
        assert_eq!(result.kinds[0], TokenKind::RParen);
        assert_eq!(result.payloads[1], 1);

        let result = scan("(()");
        assert_eq!(result.payloads[0], -1);
        assert_eq!(result.payloads[1], 1);

        // '[' never participates in matching; stray '<' markers are
        // discarded by ')' and '}'.
        let result = scan("<{[()]}>");
        assert_eq!(result.payloads[0], 7);
        assert_eq!(result.payloads[1], 5);
        assert_eq!(result.payloads[2], -1);
        assert_eq!(result.payloads[3], 1);

        let result = scan("<(>)");
        assert_eq!(result.payloads[0], -1);
        assert_eq!(result.payloads[1], 2);
        assert_eq!(result.kinds[2], TokenKind::Gt);

        let result = scan("(<)>");
        assert_eq!(result.payloads[0], 2);
        assert_eq!(result.payloads[1], -1);

        let result = scan("< << <<= >");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::Lt,
                TokenKind::Shl,
                TokenKind::AssignShl,
                TokenKind::Gt,
                TokenKind::Eof
            ]
        );
        assert_eq!(result.payloads[0], 3);
    }

    #[test]
    fn string_literals() {
        let result = scan("r'\\'4");
        assert_eq!(
            result.kinds,
            vec![TokenKind::StringLiteral, TokenKind::Integer, TokenKind::Eof]
        );
        assert_eq!(result.texts[0].as_deref(), Some("\\"));

        let result = scan("''x");
        assert_eq!(result.texts[0].as_deref(), Some(""));

        let result = scan("'''x'''");
        assert_eq!(result.texts[0].as_deref(), Some("x"));

        let result = scan("''''''");
        assert_eq!(result.texts[0].as_deref(), Some(""));

        let result = scan("'''\"\n\"'''");
        assert_eq!(result.texts[0].as_deref(), Some("\"\n\""));

        let result = scan("'x\\b\\f\\n\\r\\t\\v'");
        assert_eq!(
            result.texts[0].as_deref(),
            Some("x\u{8}\u{c}\n\r\t\u{b}")
        );
    }

    #[test]
    fn string_interpolation() {
        let result = scan("r'$x'");
        assert_eq!(result.kinds, vec![TokenKind::StringLiteral, TokenKind::Eof]);
        assert_eq!(result.texts[0].as_deref(), Some("$x"));

        let result = scan("'$x'");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::StringInterpolation,
                TokenKind::Identifier,
                TokenKind::StringInterpolationEnd,
                TokenKind::Eof
            ]
        );

        let result = scan("'$a|$b|$c'");
        assert_eq!(result.kinds.len(), 8);
        assert_eq!(result.texts[2].as_deref(), Some("|"));

        let result = scan("'''re$xtr sr'''");
        assert_eq!(result.texts[0].as_deref(), Some("re"));
        assert_eq!(result.texts[1].as_deref(), Some("xtr"));
        assert_eq!(result.texts[2].as_deref(), Some(" sr"));

        let result = scan("'${x}'");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::StringInterpolation,
                TokenKind::Identifier,
                TokenKind::StringInterpolationEnd,
                TokenKind::Eof
            ]
        );

        let result = scan("'${'${'x'}'}'");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::StringInterpolation,
                TokenKind::StringInterpolation,
                TokenKind::StringLiteral,
                TokenKind::StringInterpolationEnd,
                TokenKind::StringInterpolationEnd,
                TokenKind::Eof
            ]
        );

        let result = scan("'${{}}'");
        assert_eq!(
            result.kinds,
            vec![
                TokenKind::StringInterpolation,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::StringInterpolationEnd,
                TokenKind::Eof
            ]
        );

        let result = scan("'$y''$x'");
        assert_eq!(result.kinds.len(), 7);
    }

    #[test]
    fn comments() {
        let result = scan("1 /* \n */ 2");
        assert_eq!(
            result.kinds,
            vec![TokenKind::Integer, TokenKind::Integer, TokenKind::Eof]
        );

        let result = scan("1 /* nested /* deeper */ still */ 2 // end");
        assert_eq!(
            result.kinds,
            vec![TokenKind::Integer, TokenKind::Integer, TokenKind::Eof]
        );
    }

    #[test]
    fn scan_errors() {
        assert_eq!(scan_error("'open").kind, ErrorKind::Scan);
        assert_eq!(scan_error("`").kind, ErrorKind::Scan);
        assert_eq!(scan_error("/* open").kind, ErrorKind::Scan);
        assert_eq!(scan_error("'broken\nstring'").kind, ErrorKind::Scan);
    }
}
