//! The parser: a recursive-descent grammar producing the AST straight from
//! the token stream. Mirrors the original compiler's precedence chain
//! (`assignment` realized as a right-associative `=` binary expression,
//! `cast` sitting between `factor` and `unary`, `return` reachable anywhere
//! a primary expression is).

use derive_more::Display;

use crate::diagnostics::{CompileError, Diagnostic};

use super::ast::*;
use super::lex::{Token, TokenKind, LITERAL_TOKENS, TYPE_TOKENS};

const MAX_ARGS: usize = 100;

#[derive(Clone, Debug, Display)]
#[display("{_0}")]
pub struct ParseError(pub Diagnostic);

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> CompileError {
        CompileError::Syntax(e.0)
    }
}

/// Parses a full token stream into a program.
///
/// The first syntax error aborts the whole parse: matching the original
/// driver, a parse error discards the partial statement list rather than
/// returning what was recovered so far.
pub fn parse(tokens: Vec<Token>) -> Result<Vec<Stmt>, CompileError> {
    let mut parser = Parser { tokens, pos: 0 };
    let mut stmts = Vec::new();
    while !parser.is_at_end() {
        match parser.declaration() {
            Ok(stmt) => stmts.push(stmt),
            Err(e) => {
                parser.synchronize();
                return Err(e.into());
            }
        }
    }
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos - 1]
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn check_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.peek().kind)
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.pos += 1;
        }
        self.previous()
    }

    fn match_any(&mut self, kinds: &[TokenKind]) -> bool {
        if self.check_any(kinds) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<&Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError(Diagnostic::at_token(self.peek(), message))
    }

    /// Skips tokens until just past a semicolon or just before the next
    /// type keyword that could start a declaration.
    fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            if self.check_any(TYPE_TOKENS) {
                return;
            }
            self.advance();
        }
    }

    /// Consumes a type specifier: a ground-type keyword (or `auto`, which
    /// elides the type for later inference) followed by zero or more `*`.
    fn type_spec(&mut self) -> Result<Option<Type>, ParseError> {
        if !self.check_any(TYPE_TOKENS) {
            return Err(self.error("Expected a type specifier."));
        }
        let token = self.advance().clone();
        let mut ty = match token.kind {
            TokenKind::Auto => None,
            TokenKind::I8 => Some(Type::con(TypeKind::I8)),
            TokenKind::I16 => Some(Type::con(TypeKind::I16)),
            TokenKind::I32 => Some(Type::con(TypeKind::I32)),
            TokenKind::I64 => Some(Type::con(TypeKind::I64)),
            TokenKind::U8 => Some(Type::con(TypeKind::U8)),
            TokenKind::U16 => Some(Type::con(TypeKind::U16)),
            TokenKind::U32 => Some(Type::con(TypeKind::U32)),
            TokenKind::U64 => Some(Type::con(TypeKind::U64)),
            TokenKind::Bool => Some(Type::con(TypeKind::Bool)),
            TokenKind::None => Some(Type::con(TypeKind::None)),
            _ => unreachable!("type_tokens() guard covers all cases"),
        };
        while self.match_any(&[TokenKind::Star]) {
            ty = ty.map(Type::pointer);
        }
        Ok(ty)
    }

    // declaration -> function_declaration | variable_declaration | statement
    fn declaration(&mut self) -> Result<Stmt, ParseError> {
        if self.check_any(TYPE_TOKENS) {
            let checkpoint = self.pos;
            let declared_type = self.type_spec()?;
            if self.check(TokenKind::Identifier) {
                let name = self.advance().clone();
                if self.check(TokenKind::LeftParen) {
                    return self.function_declaration(declared_type, name);
                }
                return self.variable_declaration(declared_type, name);
            }
            self.pos = checkpoint;
        }
        self.statement()
    }

    fn function_declaration(
        &mut self,
        declared_return_type: Option<Type>,
        name: Token,
    ) -> Result<Stmt, ParseError> {
        self.consume(TokenKind::LeftParen, "Expected '(' after function name.")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if params.len() >= MAX_ARGS {
                    return Err(self.error(format!("Function declares more than {MAX_ARGS} parameters.")));
                }
                let param_type = self.type_spec()?;
                let param_name =
                    self.consume(TokenKind::Identifier, "Expected parameter name.")?.clone();
                params.push(Param {
                    declared_type: param_type,
                    ty: Type::unresolved(),
                    name: param_name,
                });
                if !self.match_any(&[TokenKind::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters.")?;
        let opening = self
            .consume(TokenKind::LeftBrace, "Expected '{' before function body.")?
            .clone();
        let body = Box::new(self.block_expression(opening)?);
        Ok(Stmt::FunctionDeclaration(FunctionDeclaration {
            declared_return_type,
            return_ty: Type::unresolved(),
            name,
            params,
            body,
            mangled_name: None,
        }))
    }

    fn variable_declaration(
        &mut self,
        declared_type: Option<Type>,
        name: Token,
    ) -> Result<Stmt, ParseError> {
        self.consume(TokenKind::Equal, "Expected '=' after variable name.")?;
        let initializer = Box::new(self.expression()?);
        self.consume(TokenKind::Semicolon, "Expected ';' after variable declaration.")?;
        Ok(Stmt::VariableDeclaration(VariableDeclaration {
            declared_type,
            ty: Type::unresolved(),
            name,
            initializer,
        }))
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let expr = Box::new(self.expression()?);
        self.consume(TokenKind::Semicolon, "Expected ';' after expression.")?;
        Ok(Stmt::Expression(expr))
    }

    fn block_expression(&mut self, opening: Token) -> Result<Expr, ParseError> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            stmts.push(self.declaration()?);
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after block.")?;
        Ok(Expr::new(ExprKind::Block { opening, stmts }))
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    // assignment -> logic_or ("=" assignment)?   (right-associative)
    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.logic_or()?;
        if self.match_any(&[TokenKind::Equal]) {
            let op = self.previous().clone();
            let rhs = self.assignment()?;
            return Ok(Expr::new(ExprKind::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            }));
        }
        Ok(lhs)
    }

    fn logic_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.logic_and()?;
        while self.match_any(&[TokenKind::Or]) {
            let op = self.previous().clone();
            let rhs = self.logic_and()?;
            lhs = Expr::new(ExprKind::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn logic_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.equality()?;
        while self.match_any(&[TokenKind::And]) {
            let op = self.previous().clone();
            let rhs = self.equality()?;
            lhs = Expr::new(ExprKind::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.comparison()?;
        while self.match_any(&[TokenKind::EqualEqual, TokenKind::NotEqual]) {
            let op = self.previous().clone();
            let rhs = self.comparison()?;
            lhs = Expr::new(ExprKind::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        while self.match_any(&[
            TokenKind::Greater,
            TokenKind::GreaterEqual,
            TokenKind::Less,
            TokenKind::LessEqual,
        ]) {
            let op = self.previous().clone();
            let rhs = self.term()?;
            lhs = Expr::new(ExprKind::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.factor()?;
        while self.match_any(&[TokenKind::Plus, TokenKind::Minus]) {
            let op = self.previous().clone();
            let rhs = self.factor()?;
            lhs = Expr::new(ExprKind::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.cast_expr()?;
        while self.match_any(&[TokenKind::Star, TokenKind::Slash]) {
            let op = self.previous().clone();
            let rhs = self.cast_expr()?;
            lhs = Expr::new(ExprKind::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    // cast -> unary ("as" type)*
    fn cast_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.unary()?;
        while self.match_any(&[TokenKind::As]) {
            let keyword = self.previous().clone();
            let target = self.type_spec()?;
            expr = Expr::new(ExprKind::Cast {
                keyword,
                operand: Box::new(expr),
                target,
            });
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.match_any(&[
            TokenKind::Not,
            TokenKind::Minus,
            TokenKind::Ampersand,
            TokenKind::Star,
        ]) {
            let op = self.previous().clone();
            let operand = self.unary()?;
            return Ok(Expr::new(ExprKind::Unary {
                op,
                operand: Box::new(operand),
            }));
        }
        self.call()
    }

    fn call(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            if self.match_any(&[TokenKind::LeftParen]) {
                let mut args = Vec::new();
                if !self.check(TokenKind::RightParen) {
                    loop {
                        if args.len() >= MAX_ARGS {
                            return Err(self.error(format!("Call has more than {MAX_ARGS} arguments.")));
                        }
                        args.push(self.expression()?);
                        if !self.match_any(&[TokenKind::Comma]) {
                            break;
                        }
                    }
                }
                let closing_paren = self
                    .consume(TokenKind::RightParen, "Expected ')' after arguments.")?
                    .clone();
                expr = Expr::new(ExprKind::Call {
                    callee: Box::new(expr),
                    args,
                    closing_paren,
                });
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        if self.match_any(&[TokenKind::Return]) {
            let keyword = self.previous().clone();
            let value = if self.check(TokenKind::Semicolon) || self.check(TokenKind::RightBrace) {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            return Ok(Expr::new(ExprKind::Return { keyword, value }));
        }

        if self.match_any(LITERAL_TOKENS) {
            return Ok(Expr::new(ExprKind::Literal(self.previous().clone())));
        }

        if self.match_any(&[TokenKind::Identifier]) {
            return Ok(Expr::new(ExprKind::Identifier(self.previous().clone())));
        }

        if self.match_any(&[TokenKind::LeftParen]) {
            let inner = self.expression()?;
            self.consume(TokenKind::RightParen, "Expected ')' after expression.")?;
            return Ok(Expr::new(ExprKind::Grouping(Box::new(inner))));
        }

        if self.match_any(&[TokenKind::LeftBrace]) {
            let opening = self.previous().clone();
            return self.block_expression(opening);
        }

        Err(self.error("Expected an expression."))
    }
}
