//! Scanner implementation for the via language

use crate::{keyword_kind, Token, TokenKind};
use memchr::memchr;
use unicode_xid::UnicodeXID;
use via_common::{Diagnostics, Span};

/// Operator table, longest match first. No entry exceeds 3 bytes.
const OPERATORS: &[(&str, TokenKind)] = &[
    ("**=", TokenKind::PowEq),
    ("..=", TokenKind::ConcatEq),
    ("**", TokenKind::Pow),
    ("..", TokenKind::Concat),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::BangEq),
    ("<=", TokenKind::LessEq),
    (">=", TokenKind::GreaterEq),
    ("&&", TokenKind::AmpAmp),
    ("||", TokenKind::PipePipe),
    ("->", TokenKind::Arrow),
    ("::", TokenKind::DoubleColon),
    ("++", TokenKind::Inc),
    ("--", TokenKind::Dec),
    ("+=", TokenKind::PlusEq),
    ("-=", TokenKind::MinusEq),
    ("*=", TokenKind::StarEq),
    ("/=", TokenKind::SlashEq),
    ("%=", TokenKind::PercentEq),
    ("&=", TokenKind::AmpEq),
    ("^=", TokenKind::CaretEq),
    ("|=", TokenKind::PipeEq),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("&", TokenKind::Ampersand),
    ("|", TokenKind::Pipe),
    ("^", TokenKind::Caret),
    ("~", TokenKind::Tilde),
    ("!", TokenKind::Bang),
    ("<", TokenKind::Less),
    (">", TokenKind::Greater),
    ("=", TokenKind::Assign),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    (",", TokenKind::Comma),
    (";", TokenKind::Semicolon),
    (":", TokenKind::Colon),
    (".", TokenKind::Dot),
    ("?", TokenKind::Question),
];

/// Single-pass scanner over a source buffer.
///
/// The scanner never aborts: unrecognized input becomes [`TokenKind::Illegal`]
/// tokens and lexing continues, with the details on the diagnostics bus.
pub struct Lexer<'src> {
    input: &'src str,
    bytes: &'src [u8],
    position: usize,
    diagnostics: Diagnostics,
}

impl<'src> Lexer<'src> {
    pub fn new(input: &'src str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            position: 0,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Consume the scanner, yielding the collected diagnostics.
    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    /// Tokenize the whole input. The result always ends with exactly one
    /// `Eof` token.
    pub fn tokenize(&mut self) -> Vec<Token<'src>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.is_eof();
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    /// Scan the next token.
    pub fn next_token(&mut self) -> Token<'src> {
        self.skip_whitespace_and_comments();

        let start = self.position;
        if self.is_at_end() {
            return Token::new(
                TokenKind::Eof,
                "",
                Span::at(start as u32),
            );
        }

        let kind = match self.bytes[self.position] {
            b'0'..=b'9' => self.scan_number(),
            b'"' | b'\'' => self.scan_string(),
            b if b == b'_' || b.is_ascii_alphabetic() => self.scan_identifier_or_keyword(start),
            _ => self.scan_symbol(start),
        };

        let span = Span::new(start as u32, self.position as u32);
        Token::new(kind, &self.input[start..self.position], span)
    }

    fn skip_whitespace_and_comments(&mut self) {
        while !self.is_at_end() {
            match self.bytes[self.position] {
                b' ' | b'\t' | b'\r' | b'\n' => self.position += 1,
                b'/' if self.peek_byte(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek_byte(1) == Some(b'*') => self.skip_block_comment(),
                _ => break,
            }
        }
    }

    fn skip_line_comment(&mut self) {
        match memchr(b'\n', &self.bytes[self.position..]) {
            Some(off) => self.position += off,
            None => self.position = self.bytes.len(),
        }
    }

    /// Block comments do not nest. Hitting end of file inside one is a
    /// warning, not an error; the rest of the buffer is consumed.
    fn skip_block_comment(&mut self) {
        let start = self.position;
        self.position += 2;
        loop {
            match memchr(b'*', &self.bytes[self.position..]) {
                Some(off) => {
                    self.position += off;
                    if self.peek_byte(1) == Some(b'/') {
                        self.position += 2;
                        return;
                    }
                    self.position += 1;
                }
                None => {
                    self.position = self.bytes.len();
                    self.diagnostics.warning(
                        "unterminated block comment",
                        Span::new(start as u32, (start + 2) as u32),
                    );
                    return;
                }
            }
        }
    }

    fn scan_number(&mut self) -> TokenKind {
        let start = self.position;
        if self.bytes[self.position] == b'0' {
            match self.peek_byte(1) {
                Some(b'x') | Some(b'X') => return self.scan_radix_digits(start, 16),
                Some(b'b') | Some(b'B') => return self.scan_radix_digits(start, 2),
                _ => {}
            }
        }

        while self.current_byte().is_some_and(|b| b.is_ascii_digit()) {
            self.position += 1;
        }

        // A single dot followed by a digit promotes to a float; a second
        // such dot makes the whole token illegal.
        if !self.take_fraction() {
            return TokenKind::Int;
        }
        if self.take_fraction() {
            self.diagnostics.error(
                "malformed numeric literal: more than one decimal point",
                Span::new(start as u32, self.position as u32),
            );
            return TokenKind::Illegal;
        }
        TokenKind::Float
    }

    /// Consume `.digits` if present. Returns whether anything was consumed.
    fn take_fraction(&mut self) -> bool {
        if self.current_byte() == Some(b'.')
            && self.peek_byte(1).is_some_and(|b| b.is_ascii_digit())
        {
            self.position += 1;
            while self.current_byte().is_some_and(|b| b.is_ascii_digit()) {
                self.position += 1;
            }
            true
        } else {
            false
        }
    }

    fn scan_radix_digits(&mut self, start: usize, radix: u32) -> TokenKind {
        self.position += 2; // prefix
        let digits_start = self.position;
        while self
            .current_byte()
            .is_some_and(|b| (b as char).is_digit(radix))
        {
            self.position += 1;
        }
        if self.position == digits_start {
            self.diagnostics.error(
                format!(
                    "missing digits after {} prefix",
                    if radix == 16 { "hexadecimal" } else { "binary" }
                ),
                Span::new(start as u32, self.position as u32),
            );
            return TokenKind::Illegal;
        }
        if radix == 16 {
            TokenKind::HexInt
        } else {
            TokenKind::BinInt
        }
    }

    /// Strings open with `'` or `"` and close with the same quote. Newlines
    /// do not terminate them. Escape sequences are carried through raw;
    /// decoding happens in the semantic pass.
    fn scan_string(&mut self) -> TokenKind {
        let start = self.position;
        let quote = self.bytes[self.position];
        self.position += 1;
        while let Some(b) = self.current_byte() {
            if b == quote {
                self.position += 1;
                return TokenKind::Str;
            }
            if b == b'\\' && self.position + 1 < self.bytes.len() {
                self.position += 2;
            } else {
                self.advance_char();
            }
        }
        self.diagnostics.error(
            "unterminated string literal",
            Span::new(start as u32, self.position as u32),
        );
        TokenKind::Illegal
    }

    fn scan_identifier_or_keyword(&mut self, start: usize) -> TokenKind {
        self.position += 1;
        while let Some(c) = self.current_char() {
            if c.is_xid_continue() {
                self.position += c.len_utf8();
            } else {
                break;
            }
        }

        // `foo!` is a macro identifier; `foo !=` is not.
        if self.current_byte() == Some(b'!') && self.peek_byte(1) != Some(b'=') {
            self.position += 1;
            return TokenKind::MacroIdent;
        }

        keyword_kind(&self.input[start..self.position]).unwrap_or(TokenKind::Ident)
    }

    fn scan_symbol(&mut self, start: usize) -> TokenKind {
        let rest = &self.input[start..];
        for (text, kind) in OPERATORS {
            if rest.starts_with(text) {
                self.position += text.len();
                return *kind;
            }
        }
        let c = self.current_char().unwrap_or('\u{fffd}');
        self.advance_char();
        self.diagnostics.error(
            format!("unexpected character '{}'", c),
            Span::new(start as u32, self.position as u32),
        );
        TokenKind::Illegal
    }

    fn current_byte(&self) -> Option<u8> {
        self.bytes.get(self.position).copied()
    }

    fn peek_byte(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.position + ahead).copied()
    }

    fn current_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// Advance one character, respecting UTF-8 boundaries.
    fn advance_char(&mut self) {
        if let Some(c) = self.current_char() {
            self.position += c.len_utf8();
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex(input: &str) -> Vec<Token<'_>> {
        Lexer::new(input).tokenize()
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex(input).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("var x = while_ish"),
            vec![
                TokenKind::KwVar,
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn literal_keywords() {
        assert_eq!(
            kinds("true false nil"),
            vec![TokenKind::True, TokenKind::False, TokenKind::Nil, TokenKind::Eof]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(
            kinds("42 0xFF 0b101 3.25"),
            vec![
                TokenKind::Int,
                TokenKind::HexInt,
                TokenKind::BinInt,
                TokenKind::Float,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn double_dot_in_number_is_illegal() {
        let mut lexer = Lexer::new("1.2.3");
        let tokens = lexer.tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Illegal);
        assert_eq!(tokens[0].lexeme, "1.2.3");
        assert!(lexer.diagnostics().has_errors());
    }

    #[test]
    fn int_concat_int_is_not_a_float() {
        assert_eq!(
            kinds("1..2"),
            vec![TokenKind::Int, TokenKind::Concat, TokenKind::Int, TokenKind::Eof]
        );
    }

    #[test]
    fn hex_prefix_without_digits() {
        let mut lexer = Lexer::new("0x");
        let tokens = lexer.tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Illegal);
        assert!(lexer.diagnostics().has_errors());
    }

    #[test]
    fn string_literals_keep_quotes_in_lexeme() {
        let tokens = lex("\"hello\" 'world'");
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].lexeme, "\"hello\"");
        assert_eq!(tokens[1].kind, TokenKind::Str);
        assert_eq!(tokens[1].lexeme, "'world'");
    }

    #[test]
    fn escaped_quote_does_not_close_string() {
        let tokens = lex(r#""a\"b""#);
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].lexeme, r#""a\"b""#);
    }

    #[test]
    fn newline_does_not_terminate_string() {
        let tokens = lex("\"a\nb\"");
        assert_eq!(tokens[0].kind, TokenKind::Str);
    }

    #[test]
    fn unterminated_string_is_illegal() {
        let mut lexer = Lexer::new("\"oops");
        let tokens = lexer.tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Illegal);
        assert!(lexer.diagnostics().has_errors());
    }

    #[test]
    fn longest_match_operators() {
        assert_eq!(
            kinds("a **= b ** c * d"),
            vec![
                TokenKind::Ident,
                TokenKind::PowEq,
                TokenKind::Ident,
                TokenKind::Pow,
                TokenKind::Ident,
                TokenKind::Star,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds("x ..= y .. z"),
            vec![
                TokenKind::Ident,
                TokenKind::ConcatEq,
                TokenKind::Ident,
                TokenKind::Concat,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn macro_identifier_vs_not_equal() {
        assert_eq!(
            kinds("assert! x != y"),
            vec![
                TokenKind::MacroIdent,
                TokenKind::Ident,
                TokenKind::BangEq,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 // line\n/* block */ 2"),
            vec![TokenKind::Int, TokenKind::Int, TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_block_comment_warns() {
        let mut lexer = Lexer::new("1 /* never closed");
        let tokens = lexer.tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Int);
        assert_eq!(tokens[1].kind, TokenKind::Eof);
        assert!(!lexer.diagnostics().has_errors());
        assert_eq!(lexer.diagnostics().warning_count(), 1);
    }

    #[test]
    fn unknown_character_recovers() {
        let mut lexer = Lexer::new("1 @ 2");
        let tokens = lexer.tokenize();
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![TokenKind::Int, TokenKind::Illegal, TokenKind::Int, TokenKind::Eof]
        );
        assert!(lexer.diagnostics().has_errors());
    }

    #[test]
    fn spans_reconstruct_the_source() {
        let input = "var total = 0 // sum\nwhile total < 10 { total += 1 }";
        let tokens = lex(input);
        let mut rebuilt = String::new();
        let mut cursor = 0usize;
        for token in &tokens {
            // Everything between tokens must be whitespace or comment bytes.
            rebuilt.push_str(&input[cursor..token.span.start as usize]);
            rebuilt.push_str(token.lexeme);
            assert_eq!(
                token.lexeme,
                &input[token.span.start as usize..token.span.end as usize]
            );
            cursor = token.span.end as usize;
        }
        rebuilt.push_str(&input[cursor..]);
        assert_eq!(rebuilt, input);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Lexemes are exact slices of the input and token spans advance
        /// monotonically without overlap, whatever bytes come in.
        #[test]
        fn lexemes_are_source_slices(input in "[ -~\n\t]{0,200}") {
            let mut lexer = Lexer::new(&input);
            let tokens = lexer.tokenize();
            prop_assert!(tokens.last().is_some_and(|t| t.kind == TokenKind::Eof));
            let mut cursor = 0u32;
            for token in &tokens {
                prop_assert!(token.span.start >= cursor);
                prop_assert!(token.span.start <= token.span.end);
                prop_assert_eq!(
                    token.lexeme,
                    &input[token.span.start as usize..token.span.end as usize]
                );
                cursor = token.span.end;
            }
        }
    }
}
