//! The lexer.
//!
//! Hand-scans the source one character at a time, matching the original
//! compiler's keyword/number/string handling; whitespace and `//` line
//! comments are skipped with a small regex the way the teacher's scaffold
//! set up (see [`Lexer::skip_whitespace`]).

use derive_more::Display;
use regex::Regex;

use crate::diagnostics::Diagnostic;

/// Token classes. Order mirrors the original compiler's `TokenType` enum.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display("(")]
    LeftParen,
    #[display(")")]
    RightParen,
    #[display("{{")]
    LeftBrace,
    #[display("}}")]
    RightBrace,
    #[display(",")]
    Comma,
    #[display(".")]
    Dot,
    #[display("-")]
    Minus,
    #[display("+")]
    Plus,
    #[display(";")]
    Semicolon,
    #[display("/")]
    Slash,
    #[display("*")]
    Star,
    #[display("&")]
    Ampersand,

    #[display("!")]
    Not,
    #[display("!=")]
    NotEqual,
    #[display("=")]
    Equal,
    #[display("==")]
    EqualEqual,
    #[display(">")]
    Greater,
    #[display(">=")]
    GreaterEqual,
    #[display("<")]
    Less,
    #[display("<=")]
    LessEqual,
    #[display("||")]
    Or,
    #[display("&&")]
    And,

    #[display("identifier")]
    Identifier,
    #[display("string")]
    StringLiteral,
    #[display("number")]
    NumberLiteral,
    #[display("char")]
    CharLiteral,
    #[display("true")]
    True,
    #[display("false")]
    False,

    #[display("u8")]
    U8,
    #[display("u16")]
    U16,
    #[display("u32")]
    U32,
    #[display("u64")]
    U64,
    #[display("i8")]
    I8,
    #[display("i16")]
    I16,
    #[display("i32")]
    I32,
    #[display("i64")]
    I64,
    #[display("bool")]
    Bool,
    #[display("none")]
    None,
    #[display("auto")]
    Auto,

    #[display("else")]
    Else,
    #[display("for")]
    For,
    #[display("if")]
    If,
    #[display("as")]
    As,
    #[display("return")]
    Return,
    #[display("while")]
    While,

    #[display("eof")]
    Eof,
}

impl TokenKind {
    /// The discriminant printed in `rocout.lex` (`<kind-number>: ...`).
    pub fn index(self) -> usize {
        self as usize
    }

    fn keyword(text: &str) -> Option<TokenKind> {
        use TokenKind::*;
        Some(match text {
            "i8" => I8,
            "i16" => I16,
            "i32" => I32,
            "i64" => I64,
            "u8" => U8,
            "u16" => U16,
            "u32" => U32,
            "u64" => U64,
            "bool" => Bool,
            "none" => None,
            "auto" => Auto,
            "if" => If,
            "else" => Else,
            "return" => Return,
            "for" => For,
            "while" => While,
            "true" => True,
            "false" => False,
            "as" => As,
            _ => return Option::None,
        })
    }
}

/// The tokens that can begin a type specifier: the ten ground types plus
/// `auto`, which elides the type for later inference.
pub const TYPE_TOKENS: &[TokenKind] = &[
    TokenKind::I8,
    TokenKind::I16,
    TokenKind::I32,
    TokenKind::I64,
    TokenKind::U8,
    TokenKind::U16,
    TokenKind::U32,
    TokenKind::U64,
    TokenKind::Bool,
    TokenKind::None,
    TokenKind::Auto,
];

pub const LITERAL_TOKENS: &[TokenKind] = &[
    TokenKind::StringLiteral,
    TokenKind::NumberLiteral,
    TokenKind::CharLiteral,
    TokenKind::True,
    TokenKind::False,
];

/// A single token together with its source text and line.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display)]
#[display("{}: {text} (line {line})", kind.index())]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    pub line: u32,
}

impl Token {
    pub fn eof(line: u32) -> Token {
        Token {
            text: String::new(),
            kind: TokenKind::Eof,
            line,
        }
    }
}

pub struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
    whitespace: Regex,
    tokens: Vec<Token>,
    errors: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer {
            source,
            bytes: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
            whitespace: Regex::new(r"\A(?:[ \t\x0c\r]|//[^\n]*)*").unwrap(),
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Scan the entire source and return the tokens lexed (ending in `Eof`)
    /// together with any lexical errors encountered along the way.
    pub fn run(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        while !self.is_at_end() {
            self.skip_whitespace();
            if self.is_at_end() {
                break;
            }
            self.start = self.current;
            self.scan_token();
        }
        self.tokens.push(Token::eof(self.line));
        (self.tokens, self.errors)
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn advance(&mut self) -> char {
        let c = self.bytes[self.current] as char;
        self.current += 1;
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.bytes[self.current] as char
        }
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.bytes[self.current] as char != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn lexeme(&self) -> &'src str {
        &self.source[self.start..self.current]
    }

    fn add_token(&mut self, kind: TokenKind) {
        self.tokens.push(Token {
            text: self.lexeme().to_string(),
            kind,
            line: self.line,
        });
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors
            .push(Diagnostic::at_line(self.line, "", message));
    }

    // Skip comments and whitespace, tracking newlines for line numbers.
    fn skip_whitespace(&mut self) {
        loop {
            if let Some(m) = self.whitespace.find(&self.source[self.current..]) {
                let matched = m.end();
                if matched > 0 {
                    self.current += matched;
                    continue;
                }
            }
            if self.peek() == '\n' {
                self.line += 1;
                self.current += 1;
                continue;
            }
            break;
        }
    }

    fn scan_token(&mut self) {
        let c = self.advance();
        match c {
            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            ',' => self.add_token(TokenKind::Comma),
            '.' => self.add_token(TokenKind::Dot),
            '-' => self.add_token(TokenKind::Minus),
            '+' => self.add_token(TokenKind::Plus),
            ';' => self.add_token(TokenKind::Semicolon),
            '*' => self.add_token(TokenKind::Star),
            '/' => self.add_token(TokenKind::Slash),
            '!' => {
                let kind = if self.matches('=') {
                    TokenKind::NotEqual
                } else {
                    TokenKind::Not
                };
                self.add_token(kind);
            }
            '=' => {
                let kind = if self.matches('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.add_token(kind);
            }
            '<' => {
                let kind = if self.matches('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.add_token(kind);
            }
            '>' => {
                let kind = if self.matches('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.add_token(kind);
            }
            // `|` only participates in `||`; a lone `|` falls through to the
            // `&` handling in the original scanner, which we preserve as an
            // explicit error instead of silently reinterpreting it.
            '|' => {
                if self.matches('|') {
                    self.add_token(TokenKind::Or);
                } else {
                    self.error("Unknown character.");
                }
            }
            '&' => {
                let kind = if self.matches('&') {
                    TokenKind::And
                } else {
                    TokenKind::Ampersand
                };
                self.add_token(kind);
            }
            '"' => self.string(),
            '\'' => self.char_lit(),
            _ => {
                if c.is_ascii_digit() {
                    self.number();
                } else if c.is_alphabetic() || c == '_' {
                    self.identifier();
                } else {
                    self.error("Unknown character.");
                }
            }
        }
    }

    fn string(&mut self) {
        while self.peek() != '"' && !self.is_at_end() {
            if self.peek() == '\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            self.error("Unterminated string.");
            return;
        }

        self.advance();
        let text = self.source[self.start + 1..self.current - 1].to_string();
        self.tokens.push(Token {
            text,
            kind: TokenKind::StringLiteral,
            line: self.line,
        });
    }

    fn char_lit(&mut self) {
        let body_start = self.current;
        while self.peek() != '\'' && !self.is_at_end() {
            if self.peek() == '\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.current - body_start > 1 {
            self.error("Character literal can only be one character long.");
        }

        if self.is_at_end() {
            self.error("Unterminated character literal.");
            return;
        }

        self.advance();
        let text = self.source[self.start + 1..self.current - 1].to_string();
        self.tokens.push(Token {
            text,
            kind: TokenKind::CharLiteral,
            line: self.line,
        });
    }

    /// Scans a run of digits, then speculatively re-scans an identifier to
    /// see if it's a type-keyword suffix (`42i32`); rolls back if not.
    fn number(&mut self) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        let suffix_start = self.current;
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }
        let suffix = &self.source[suffix_start..self.current];
        let suffix_is_type = matches!(
            suffix,
            "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64"
        );
        if !suffix_is_type {
            self.current = suffix_start;
        }

        self.add_token(TokenKind::NumberLiteral);
    }

    fn identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }
        let text = self.lexeme();
        let kind = TokenKind::keyword(text).unwrap_or(TokenKind::Identifier);
        self.add_token(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).run().0.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn skips_comments_and_whitespace() {
        let ks = kinds("  // a comment\n  i32   x ; // trailing\n");
        assert_eq!(
            ks,
            vec![
                TokenKind::I32,
                TokenKind::Identifier,
                TokenKind::Semicolon,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn number_with_type_suffix() {
        let (tokens, errs) = Lexer::new("42i32").run();
        assert!(errs.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::NumberLiteral);
        assert_eq!(tokens[0].text, "42i32");
    }

    #[test]
    fn number_without_suffix_leaves_trailing_identifier() {
        let ks = kinds("42 abc");
        assert_eq!(
            ks,
            vec![TokenKind::NumberLiteral, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        let ks = kinds("auto return x while");
        assert_eq!(
            ks,
            vec![
                TokenKind::Auto,
                TokenKind::Return,
                TokenKind::Identifier,
                TokenKind::While,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn pipe_without_second_pipe_is_an_error() {
        let (_, errs) = Lexer::new("|").run();
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn string_and_char_literals() {
        let (tokens, errs) = Lexer::new("\"hi\" 'a'").run();
        assert!(errs.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "hi");
        assert_eq!(tokens[1].kind, TokenKind::CharLiteral);
        assert_eq!(tokens[1].text, "a");
    }

    /// Re-lexing the space-joined lexemes of a token stream (minus the
    /// string/char literals, whose printed text drops the quoting the
    /// original source needed) reproduces the same sequence of token kinds --
    /// the round-trip property spec.md § 8 asks for, modulo whitespace.
    #[test]
    fn lex_print_relex_round_trips_token_kinds() {
        let src = "i32 main() { i32 x = 2 + 3 * 4; return x as i64; }";
        let (tokens, errs) = Lexer::new(src).run();
        assert!(errs.is_empty());

        let rebuilt: String = tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let ks_before: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        let ks_after = kinds(&rebuilt);
        assert_eq!(ks_before, ks_after);
    }
}
