//! Shared diagnostic reporting: the error taxonomy and the colored,
//! line-anchored messages the driver prints to stderr.

use derive_more::Display;
use owo_colors::OwoColorize;

use crate::front::lex::{Token, TokenKind};

/// A single compiler diagnostic, anchored to the token or line that caused it.
#[derive(Clone, Debug, Display)]
#[display("Line {line} at '{lexeme}': {message}")]
pub struct Diagnostic {
    pub line: u32,
    pub lexeme: String,
    pub message: String,
}

impl Diagnostic {
    pub fn at_token(token: &Token, message: impl Into<String>) -> Self {
        let lexeme = if token.kind == TokenKind::Eof {
            "end".to_string()
        } else {
            token.text.clone()
        };
        Diagnostic {
            line: token.line,
            lexeme,
            message: message.into(),
        }
    }

    pub fn at_line(line: u32, lexeme: impl Into<String>, message: impl Into<String>) -> Self {
        Diagnostic {
            line,
            lexeme: lexeme.into(),
            message: message.into(),
        }
    }

    /// Print this diagnostic to stderr in red, matching the original driver's
    /// `Line <n> at '<lexeme>': <message>` wire format.
    pub fn report(&self) {
        eprintln!("{}", self.to_string().red());
    }
}

/// The taxonomy of failures a compilation can produce. Each stage of the
/// pipeline raises one of these; the driver decides how to present them.
#[derive(Clone, Debug, Display)]
pub enum CompileError {
    #[display("{_0}")]
    Lexical(Diagnostic),
    #[display("{_0}")]
    Syntax(Diagnostic),
    #[display("{_0}")]
    Type(Diagnostic),
    #[display("{_0}")]
    Semantic(Diagnostic),
}

impl CompileError {
    pub fn diagnostic(&self) -> &Diagnostic {
        match self {
            CompileError::Lexical(d)
            | CompileError::Syntax(d)
            | CompileError::Type(d)
            | CompileError::Semantic(d) => d,
        }
    }

    pub fn report(&self) {
        self.diagnostic().report();
    }
}
