//! Hindley-Milner type inference and the post-inference environment/
//! semantic checks.
//!
//! Mirrors the original compiler's two-pass design: `TypeAnalyzer` assigns
//! every node a type (inferring the ones the programmer elided with `auto`),
//! then `EnvironmentAnalyzer` walks the now fully-typed tree a second time to
//! enforce identifier scoping and per-operator type rules that don't fit
//! naturally into unification (lvalue-ness, arity, "is this a pointer").
//!
//! `TypeAnalyzer` itself runs in three phases against a single substitution
//! vector indexed by type-variable id:
//!   1. `infer_*` walks the tree once, assigning every node either a ground
//!      type or a fresh `Type::Variable`, and recording `lhs = rhs` equality
//!      constraints as it goes (it does not unify eagerly).
//!   2. `solve_constraints` unifies every recorded constraint against the
//!      substitution.
//!   3. `substitute_*` walks the tree again, replacing every node's type with
//!      its substitution fixpoint, and reports a type error on any node whose
//!      type still contains an unresolved variable.

use crate::common::Id;
use crate::diagnostics::{CompileError, Diagnostic};
use crate::front::ast::*;
use crate::front::lex::{Token, TokenKind};
use crate::middle::env::{EnvironmentStack, Function, Variable};

fn id_of(token: &Token) -> Id {
    Id::new(token.text.clone())
}

/// An equality constraint recorded during the infer walk and solved in a
/// single pass afterward, rather than unified on the spot.
struct Constraint {
    lhs: Type,
    rhs: Type,
}

/// Whether every variable in `ty` has been resolved to a ground constructor
/// or pointer chain ending in one. A lingering `Type::Variable` means the
/// program didn't give the type checker enough information to pin it down.
fn is_inferred(ty: &Type) -> bool {
    match ty {
        Type::Constructor { .. } => true,
        Type::Pointer(inner) => is_inferred(inner),
        Type::Variable(_) => false,
    }
}

const NUMBER_SUFFIXES: &[(&str, TypeKind)] = &[
    ("i8", TypeKind::I8),
    ("i16", TypeKind::I16),
    ("i32", TypeKind::I32),
    ("i64", TypeKind::I64),
    ("u8", TypeKind::U8),
    ("u16", TypeKind::U16),
    ("u32", TypeKind::U32),
    ("u64", TypeKind::U64),
];

pub struct TypeAnalyzer {
    substitution: Vec<Option<Type>>,
    constraints: Vec<Constraint>,
    env_stack: EnvironmentStack,
    errors: Vec<CompileError>,
    success: bool,
}

impl TypeAnalyzer {
    pub fn new() -> Self {
        TypeAnalyzer {
            substitution: Vec::new(),
            constraints: Vec::new(),
            env_stack: EnvironmentStack::new(),
            errors: Vec::new(),
            success: true,
        }
    }

    /// Runs all three phases over `stmts` in place. On success every node's
    /// `ty` field is a fully-resolved ground type; on failure the returned
    /// errors name every node that couldn't be pinned down.
    pub fn run(mut self, stmts: &mut [Stmt]) -> Result<(), Vec<CompileError>> {
        for stmt in stmts.iter_mut() {
            self.infer_statement(stmt);
        }
        self.solve_constraints();
        for stmt in stmts.iter_mut() {
            self.substitute_statement(stmt);
        }
        if self.success {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    fn type_error(&mut self, token: &Token, message: impl Into<String>) {
        self.errors.push(CompileError::Type(Diagnostic::at_token(token, message)));
        self.success = false;
    }

    fn fresh_type_variable(&mut self) -> Type {
        let index = self.substitution.len();
        self.substitution.push(None);
        Type::Variable(index)
    }

    fn equate(&mut self, lhs: Type, rhs: Type) {
        self.constraints.push(Constraint { lhs, rhs });
    }

    /// Whether the variable `index` appears free in `ty`, chasing through
    /// already-bound variables. Prevents unification from building a cyclic
    /// (infinite) type.
    fn occurs_in(&self, index: usize, ty: &Type) -> bool {
        match ty {
            Type::Variable(v) => {
                if *v == index {
                    return true;
                }
                match self.substitution.get(*v) {
                    Some(Some(bound)) => self.occurs_in(index, bound),
                    _ => false,
                }
            }
            Type::Constructor { generics, .. } => generics.iter().any(|g| self.occurs_in(index, g)),
            Type::Pointer(inner) => self.occurs_in(index, inner),
        }
    }

    /// Unifies `t1` and `t2` against the substitution. Mirrors the original:
    /// on a constructor mismatch or a failed occurs-check, this silently
    /// does nothing rather than raising an error here -- the later
    /// substitution pass is what surfaces the resulting unresolved variable.
    fn unify(&mut self, t1: &Type, t2: &Type) {
        if let Type::Variable(v1) = t1 {
            if let Type::Variable(v2) = t2 {
                if v1 == v2 {
                    return;
                }
            }
            if let Some(bound) = self.substitution.get(*v1).cloned().flatten() {
                self.unify(&bound, t2);
                return;
            }
            if self.occurs_in(*v1, t2) {
                return;
            }
            self.bind(*v1, t2.clone());
            return;
        }

        if let Type::Variable(v2) = t2 {
            if let Some(bound) = self.substitution.get(*v2).cloned().flatten() {
                self.unify(t1, &bound);
                return;
            }
            if self.occurs_in(*v2, t1) {
                return;
            }
            self.bind(*v2, t1.clone());
            return;
        }

        match (t1, t2) {
            (Type::Constructor { kind: k1, generics: g1 }, Type::Constructor { kind: k2, generics: g2 }) => {
                if k1 != k2 || g1.len() != g2.len() {
                    return;
                }
                for (a, b) in g1.iter().zip(g2.iter()) {
                    self.unify(a, b);
                }
            }
            (Type::Pointer(i1), Type::Pointer(i2)) => self.unify(i1, i2),
            _ => {}
        }
    }

    fn bind(&mut self, index: usize, ty: Type) {
        if index >= self.substitution.len() {
            self.substitution.resize(index + 1, None);
        }
        self.substitution[index] = Some(ty);
    }

    /// Follows a type's substitution chain to its fixpoint, rebuilding
    /// constructors and pointers as it goes.
    fn substitute(&self, ty: &Type) -> Type {
        match ty {
            Type::Variable(v) => match self.substitution.get(*v) {
                Some(Some(bound)) => self.substitute(bound),
                _ => ty.clone(),
            },
            Type::Constructor { kind, generics } => Type::Constructor {
                kind: *kind,
                generics: generics.iter().map(|g| self.substitute(g)).collect(),
            },
            Type::Pointer(inner) => Type::pointer(self.substitute(inner)),
        }
    }

    fn solve_constraints(&mut self) {
        let constraints = std::mem::take(&mut self.constraints);
        for c in constraints {
            self.unify(&c.lhs, &c.rhs);
        }
    }

    // ---- phase 1: infer ----

    fn infer_statement(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Expression(expr) => self.infer_expression(expr),
            Stmt::VariableDeclaration(decl) => self.infer_variable_declaration(decl),
            Stmt::FunctionDeclaration(func) => self.infer_function_declaration(func),
        }
    }

    fn infer_variable_declaration(&mut self, decl: &mut VariableDeclaration) {
        decl.ty = decl.declared_type.clone().unwrap_or_else(|| self.fresh_type_variable());
        self.infer_expression(&mut decl.initializer);
        self.equate(decl.ty.clone(), decl.initializer.ty.clone());
        self.env_stack.declare_variable(Variable {
            name: id_of(&decl.name),
            ty: decl.ty.clone(),
        });
    }

    fn infer_function_declaration(&mut self, func: &mut FunctionDeclaration) {
        func.return_ty = func.declared_return_type.clone().unwrap_or_else(|| self.fresh_type_variable());
        for param in &mut func.params {
            param.ty = param.declared_type.clone().unwrap_or_else(|| self.fresh_type_variable());
        }

        // A function body can only see globals and its own locals/params, not
        // the locals of whatever block it happens to be declared inside.
        let saved = self.env_stack.truncate_to_global();
        let param_vars: Vec<Variable> = func
            .params
            .iter()
            .map(|p| Variable {
                name: id_of(&p.name),
                ty: p.ty.clone(),
            })
            .collect();
        self.infer_block_expression(&mut func.body, Some(&param_vars));
        self.env_stack.restore(saved);

        self.equate(func.return_ty.clone(), func.body.ty.clone());

        self.env_stack.declare_function(Function {
            name: id_of(&func.name),
            return_type: func.return_ty.clone(),
            params: func.params.iter().map(|p| p.ty.clone()).collect(),
        });
    }

    fn infer_expression(&mut self, expr: &mut Expr) {
        if expr.kind.tag() == ExprTag::Block {
            self.infer_block_expression(expr, None);
            return;
        }

        let new_ty = match &mut expr.kind {
            ExprKind::Identifier(token) => {
                let token = token.clone();
                self.infer_identifier(&token)
            }
            ExprKind::Literal(token) => {
                let token = token.clone();
                self.infer_literal(&token)
            }
            ExprKind::Grouping(inner) => {
                self.infer_expression(inner);
                inner.ty.clone()
            }
            ExprKind::Unary { op, operand } => {
                let op = op.clone();
                self.infer_expression(operand);
                self.infer_unary(&op, operand)
            }
            ExprKind::Binary { lhs, op, rhs } => {
                let op = op.clone();
                self.infer_expression(lhs);
                self.infer_expression(rhs);
                self.equate(lhs.ty.clone(), rhs.ty.clone());
                self.infer_binary_result(&op, lhs)
            }
            ExprKind::Call { callee, args, closing_paren } => {
                let closing_paren = closing_paren.clone();
                self.infer_call(callee, args, &closing_paren)
            }
            ExprKind::Return { value, .. } => {
                if let Some(v) = value {
                    self.infer_expression(v);
                    v.ty.clone()
                } else {
                    Type::none()
                }
            }
            ExprKind::Cast { operand, target, .. } => {
                self.infer_expression(operand);
                target.clone().unwrap_or_else(|| self.fresh_type_variable())
            }
            ExprKind::Block { .. } => unreachable!("handled above"),
        };
        expr.ty = new_ty;
    }

    fn infer_identifier(&mut self, token: &Token) -> Type {
        let id = id_of(token);
        if let Some(var) = self.env_stack.get_variable(id) {
            var.ty.clone()
        } else if let Some(func) = self.env_stack.get_function(id) {
            func.return_type.clone()
        } else {
            self.type_error(token, "Identifier not defined.");
            self.fresh_type_variable()
        }
    }

    fn infer_literal(&mut self, token: &Token) -> Type {
        match token.kind {
            TokenKind::True | TokenKind::False => Type::con(TypeKind::Bool),
            TokenKind::CharLiteral => Type::con(TypeKind::I8),
            TokenKind::StringLiteral => Type::pointer(Type::con(TypeKind::I8)),
            TokenKind::NumberLiteral => {
                for (suffix, kind) in NUMBER_SUFFIXES {
                    if token.text.ends_with(suffix) {
                        return Type::con(*kind);
                    }
                }
                self.fresh_type_variable()
            }
            _ => unreachable!("non-literal token in Literal node"),
        }
    }

    fn infer_unary(&mut self, op: &Token, operand: &Expr) -> Type {
        match op.kind {
            TokenKind::Not => Type::con(TypeKind::Bool),
            TokenKind::Minus => operand.ty.clone(),
            TokenKind::Ampersand => Type::pointer(operand.ty.clone()),
            TokenKind::Star => {
                if let Type::Pointer(inner) = &operand.ty {
                    (**inner).clone()
                } else {
                    let inner = self.fresh_type_variable();
                    self.equate(operand.ty.clone(), Type::pointer(inner.clone()));
                    inner
                }
            }
            _ => {
                self.type_error(op, "Invalid unary operation.");
                Type::none()
            }
        }
    }

    fn infer_binary_result(&mut self, op: &Token, lhs: &Expr) -> Type {
        match op.kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::EqualEqual
            | TokenKind::NotEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Equal => {
                let t = self.fresh_type_variable();
                self.equate(t.clone(), lhs.ty.clone());
                t
            }
            TokenKind::And | TokenKind::Or => Type::con(TypeKind::Bool),
            _ => {
                self.type_error(op, "Invalid binary operation.");
                Type::none()
            }
        }
    }

    fn infer_call(&mut self, callee: &mut Expr, args: &mut [Expr], closing_paren: &Token) -> Type {
        let func = if let ExprKind::Identifier(token) = &callee.kind {
            self.env_stack.get_function(id_of(token)).cloned()
        } else {
            None
        };
        self.infer_expression(callee);
        for arg in args.iter_mut() {
            self.infer_expression(arg);
        }

        let Some(func) = func else {
            return self.fresh_type_variable();
        };

        if func.params.len() != args.len() {
            self.type_error(closing_paren, "Different number of arguments than parameters.");
        }
        for (arg, param_ty) in args.iter().zip(func.params.iter()) {
            self.equate(arg.ty.clone(), param_ty.clone());
        }
        func.return_type.clone()
    }

    /// Infers a `{ ... }` block. `params` binds a function's parameters into
    /// the new frame before its body runs. The block's type is `none` if it
    /// never returns, otherwise a fresh variable equated with the type of
    /// every direct `return` statement (only statements at this block's own
    /// level count -- a `return` nested inside an inner block belongs to
    /// that inner block, not this one).
    fn infer_block_expression(&mut self, expr: &mut Expr, params: Option<&[Variable]>) {
        self.env_stack.push();
        if let Some(params) = params {
            for v in params {
                self.env_stack.declare_variable(v.clone());
            }
        }

        let block_ty = self.fresh_type_variable();
        let mut return_types: Vec<Type> = Vec::new();
        if let ExprKind::Block { stmts, .. } = &mut expr.kind {
            for stmt in stmts.iter_mut() {
                self.infer_statement(stmt);
                if let Stmt::Expression(e) = stmt {
                    if e.kind.tag() == ExprTag::Return {
                        return_types.push(e.ty.clone());
                    }
                }
            }
        }

        if let Some(first) = return_types.first().cloned() {
            for _ in &return_types {
                self.equate(block_ty.clone(), first.clone());
            }
            expr.ty = block_ty;
        } else {
            expr.ty = Type::none();
        }

        self.env_stack.pop();
    }

    // ---- phase 3: substitute ----

    fn substitute_statement(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Expression(expr) => self.substitute_expression(expr),
            Stmt::VariableDeclaration(decl) => self.substitute_variable_declaration(decl),
            Stmt::FunctionDeclaration(func) => self.substitute_function_declaration(func),
        }
    }

    fn substitute_variable_declaration(&mut self, decl: &mut VariableDeclaration) {
        self.substitute_expression(&mut decl.initializer);
        decl.ty = self.substitute(&decl.ty);
        if !is_inferred(&decl.ty) {
            let name = decl.name.clone();
            self.type_error(&name, "Unable to infer variable type on declaration.");
        }
    }

    fn substitute_function_declaration(&mut self, func: &mut FunctionDeclaration) {
        func.return_ty = self.substitute(&func.return_ty);
        for param in &mut func.params {
            param.ty = self.substitute(&param.ty);
            if !is_inferred(&param.ty) {
                let name = func.name.clone();
                self.type_error(&name, "Unable to infer function parameter type.");
            }
        }
        self.substitute_block_expression(&mut func.body);
        if !is_inferred(&func.return_ty) {
            let name = func.name.clone();
            self.type_error(&name, "Unable to infer function return type.");
        }
    }

    fn substitute_expression(&mut self, expr: &mut Expr) {
        match expr.kind.tag() {
            ExprTag::Identifier => self.substitute_identifier(expr),
            ExprTag::Literal => self.substitute_literal(expr),
            ExprTag::Grouping => self.substitute_grouping(expr),
            ExprTag::Unary => self.substitute_unary(expr),
            ExprTag::Binary => self.substitute_binary(expr),
            ExprTag::Block => self.substitute_block_expression(expr),
            ExprTag::Call => self.substitute_call_expression(expr),
            ExprTag::Return => self.substitute_return(expr),
            ExprTag::Cast => self.substitute_cast(expr),
        }
    }

    fn substitute_identifier(&mut self, expr: &mut Expr) {
        expr.ty = self.substitute(&expr.ty);
        if !is_inferred(&expr.ty) {
            let token = match &expr.kind {
                ExprKind::Identifier(t) => t.clone(),
                _ => unreachable!(),
            };
            self.type_error(&token, "Unable to infer identifier type.");
        }
    }

    fn substitute_literal(&mut self, expr: &mut Expr) {
        expr.ty = self.substitute(&expr.ty);
        if !is_inferred(&expr.ty) {
            let token = match &expr.kind {
                ExprKind::Literal(t) => t.clone(),
                _ => unreachable!(),
            };
            self.type_error(&token, "Unable to infer literal type.");
        }
    }

    fn substitute_grouping(&mut self, expr: &mut Expr) {
        if let ExprKind::Grouping(inner) = &mut expr.kind {
            self.substitute_expression(inner);
        }
        expr.ty = self.substitute(&expr.ty);
    }

    fn substitute_unary(&mut self, expr: &mut Expr) {
        let op = match &mut expr.kind {
            ExprKind::Unary { op, operand } => {
                self.substitute_expression(operand);
                op.clone()
            }
            _ => unreachable!(),
        };
        expr.ty = self.substitute(&expr.ty);
        if !is_inferred(&expr.ty) {
            self.type_error(&op, "Unable to infer unary expression result type.");
        }
    }

    fn substitute_binary(&mut self, expr: &mut Expr) {
        let op = match &mut expr.kind {
            ExprKind::Binary { lhs, op, rhs } => {
                self.substitute_expression(lhs);
                self.substitute_expression(rhs);
                op.clone()
            }
            _ => unreachable!(),
        };
        expr.ty = self.substitute(&expr.ty);
        if !is_inferred(&expr.ty) {
            self.type_error(&op, "Unable to infer binary expression result type.");
        }
    }

    fn substitute_call_expression(&mut self, expr: &mut Expr) {
        expr.ty = self.substitute(&expr.ty);
        let closing = match &expr.kind {
            ExprKind::Call { closing_paren, .. } => closing_paren.clone(),
            _ => unreachable!(),
        };
        if let ExprKind::Call { args, .. } = &mut expr.kind {
            for arg in args.iter_mut() {
                self.substitute_expression(arg);
                if !is_inferred(&arg.ty) {
                    self.type_error(&closing, "Unable to infer function call argument type.");
                }
            }
        }
        if !is_inferred(&expr.ty) {
            self.type_error(&closing, "Unable to infer function call return type.");
        }
    }

    fn substitute_return(&mut self, expr: &mut Expr) {
        let keyword = match &mut expr.kind {
            ExprKind::Return { keyword, value } => {
                if let Some(v) = value {
                    self.substitute_expression(v);
                }
                keyword.clone()
            }
            _ => unreachable!(),
        };
        expr.ty = self.substitute(&expr.ty);
        if !is_inferred(&expr.ty) {
            self.type_error(&keyword, "Unable to infer return expression type.");
        }
    }

    fn substitute_cast(&mut self, expr: &mut Expr) {
        if let ExprKind::Cast { operand, .. } = &mut expr.kind {
            self.substitute_expression(operand);
        }
        expr.ty = self.substitute(&expr.ty);
    }

    /// A block's type is `none` if it has no `return`s, otherwise whatever
    /// its returns agree on -- which this checks explicitly, since the infer
    /// pass only ever equated the block's type variable with the *first*
    /// return's type.
    fn substitute_block_expression(&mut self, expr: &mut Expr) {
        let mut return_types: Vec<(Token, Type)> = Vec::new();
        if let ExprKind::Block { stmts, .. } = &mut expr.kind {
            for stmt in stmts.iter_mut() {
                self.substitute_statement(stmt);
                if let Stmt::Expression(e) = stmt {
                    if let ExprKind::Return { keyword, .. } = &e.kind {
                        return_types.push((keyword.clone(), e.ty.clone()));
                    }
                }
            }
        }

        if let Some((_, first_ty)) = return_types.first().cloned() {
            if !return_types.iter().all(|(_, t)| *t == first_ty) {
                let keyword = return_types[0].0.clone();
                self.type_error(&keyword, "All return types of a single block must be the same.");
            }
        }

        expr.ty = self.substitute(&expr.ty);
        if !is_inferred(&expr.ty) {
            let opening = match &expr.kind {
                ExprKind::Block { opening, .. } => opening.clone(),
                _ => unreachable!(),
            };
            self.type_error(&opening, "Unable to infer block's type.");
        }
    }
}

impl Default for TypeAnalyzer {
    fn default() -> Self {
        TypeAnalyzer::new()
    }
}

/// Walks the already-typed tree a second time to enforce scoping and the
/// per-operator type rules that aren't naturally expressed as unification
/// constraints (lvalue-ness, call arity, pointer-vs-value distinctions).
pub struct EnvironmentAnalyzer {
    env_stack: EnvironmentStack,
    errors: Vec<CompileError>,
    success: bool,
}

impl EnvironmentAnalyzer {
    pub fn new() -> Self {
        EnvironmentAnalyzer {
            env_stack: EnvironmentStack::new(),
            errors: Vec::new(),
            success: true,
        }
    }

    pub fn run(mut self, stmts: &mut [Stmt]) -> Result<(), Vec<CompileError>> {
        for stmt in stmts.iter_mut() {
            self.check_statement(stmt);
        }
        if self.success {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    fn semantic_error(&mut self, token: &Token, message: impl Into<String>) {
        self.errors.push(CompileError::Semantic(Diagnostic::at_token(token, message)));
        self.success = false;
    }

    fn check_statement(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Expression(expr) => self.check_expression(expr),
            Stmt::VariableDeclaration(decl) => self.variable_declaration_statement(decl),
            Stmt::FunctionDeclaration(func) => self.function_declaration_statement(func),
        }
    }

    fn variable_declaration_statement(&mut self, decl: &mut VariableDeclaration) {
        let name_id = id_of(&decl.name);
        if self.env_stack.declared_in_current_frame(name_id) {
            self.semantic_error(&decl.name, "Identifier already defined.");
            return;
        }

        self.check_expression(&mut decl.initializer);

        if decl.ty.is_none() {
            self.semantic_error(&decl.name, "Cannot declare a variable of type none.");
            return;
        }
        if decl.ty != decl.initializer.ty {
            self.semantic_error(&decl.name, "Incorrect type.");
            return;
        }

        self.env_stack.declare_variable(Variable { name: name_id, ty: decl.ty.clone() });
    }

    fn function_declaration_statement(&mut self, func: &mut FunctionDeclaration) {
        let name_id = id_of(&func.name);
        if self.env_stack.declared_in_current_frame(name_id) {
            self.semantic_error(&func.name, "Identifier already defined.");
            return;
        }

        let params: Vec<Variable> = func
            .params
            .iter()
            .map(|p| Variable {
                name: id_of(&p.name),
                ty: p.ty.clone(),
            })
            .collect();

        let saved = self.env_stack.truncate_to_global();
        self.block_expression(&mut func.body, Some(&params));
        self.env_stack.restore(saved);

        if func.body.ty != func.return_ty {
            self.semantic_error(&func.name, "Block is not the same type as the specified function return type.");
        }

        self.env_stack.declare_function(Function {
            name: name_id,
            return_type: func.return_ty.clone(),
            params: params.iter().map(|p| p.ty.clone()).collect(),
        });
    }

    fn check_expression(&mut self, expr: &mut Expr) {
        match expr.kind.tag() {
            ExprTag::Identifier => self.identifier_expression(expr),
            ExprTag::Literal => {}
            ExprTag::Grouping => self.grouping_expression(expr),
            ExprTag::Unary => self.unary_expression(expr),
            ExprTag::Binary => self.binary_expression(expr),
            ExprTag::Block => self.block_expression(expr, None),
            ExprTag::Call => self.call_expression(expr),
            ExprTag::Return => self.return_expression(expr),
            ExprTag::Cast => self.cast_expression(expr),
        }
    }

    fn identifier_expression(&mut self, expr: &mut Expr) {
        let token = match &expr.kind {
            ExprKind::Identifier(t) => t.clone(),
            _ => unreachable!(),
        };
        let id = id_of(&token);
        let exists = self.env_stack.get_variable(id).is_some() || self.env_stack.get_function(id).is_some();
        if !exists {
            self.semantic_error(&token, "Identifier not defined.");
            return;
        }
        expr.lvalue = true;
    }

    fn grouping_expression(&mut self, expr: &mut Expr) {
        let inner_lvalue = if let ExprKind::Grouping(inner) = &mut expr.kind {
            self.check_expression(inner);
            inner.lvalue
        } else {
            unreachable!()
        };
        expr.lvalue = inner_lvalue;
    }

    fn unary_expression(&mut self, expr: &mut Expr) {
        if let ExprKind::Unary { operand, .. } = &mut expr.kind {
            self.check_expression(operand);
        }

        let (op, operand_ty, literal_token) = match &expr.kind {
            ExprKind::Unary { op, operand } => {
                let lit = match &operand.kind {
                    ExprKind::Literal(t) => Some(t.clone()),
                    _ => None,
                };
                (op.clone(), operand.ty.clone(), lit)
            }
            _ => unreachable!(),
        };

        match op.kind {
            TokenKind::Not => {
                if operand_ty.is_pointer() {
                    self.semantic_error(&op, "Incorrect type. Cannot be a pointer.");
                } else if !operand_ty.is_bool() {
                    self.semantic_error(&op, "Incorrect type. Must be a bool.");
                }
            }
            TokenKind::Minus => {
                if operand_ty.is_pointer() {
                    self.semantic_error(&op, "Incorrect type. Cannot be a pointer.");
                } else if !operand_ty.is_numeric() {
                    self.semantic_error(&op, "Incorrect type. Must be a number.");
                }
            }
            TokenKind::Ampersand => {
                if let Some(lit) = literal_token {
                    self.semantic_error(&lit, "Cannot take the address of a literal.");
                } else if operand_ty.is_none() {
                    self.semantic_error(&op, "Incorrect type. Cannot take the address of a none value.");
                }
            }
            TokenKind::Star => {
                expr.lvalue = true;
                if !operand_ty.is_pointer() {
                    self.semantic_error(&op, "Can only dereference a pointer.");
                }
            }
            _ => self.semantic_error(&op, "Unknown unary operator."),
        }
    }

    fn binary_expression(&mut self, expr: &mut Expr) {
        if let ExprKind::Binary { lhs, rhs, .. } = &mut expr.kind {
            self.check_expression(lhs);
            self.check_expression(rhs);
        }

        let (op, lhs_ty, rhs_ty, lhs_lvalue) = match &expr.kind {
            ExprKind::Binary { lhs, op, rhs } => (op.clone(), lhs.ty.clone(), rhs.ty.clone(), lhs.lvalue),
            _ => unreachable!(),
        };

        if op.kind == TokenKind::Equal {
            if !lhs_lvalue {
                self.semantic_error(&op, "Left-hand side of an assignment must be an lvalue.");
                return;
            }
            if lhs_ty != rhs_ty {
                self.semantic_error(&op, "Incorrect type. Right-hand side must match left-hand side.");
                return;
            }
            expr.lvalue = true;
            return;
        }

        if lhs_ty != rhs_ty {
            self.semantic_error(&op, "Mismatched types in binary expression.");
            return;
        }

        match op.kind {
            TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash => {
                if !lhs_ty.is_numeric() || !rhs_ty.is_numeric() {
                    self.semantic_error(&op, "Incorrect type. Must be a number.");
                }
            }
            TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::Less | TokenKind::LessEqual => {
                if !lhs_ty.is_numeric() || !rhs_ty.is_numeric() {
                    self.semantic_error(&op, "Incorrect type. Must be a number.");
                }
            }
            TokenKind::EqualEqual | TokenKind::NotEqual => {
                let ok = (lhs_ty.is_numeric() || lhs_ty.is_bool()) && (rhs_ty.is_numeric() || rhs_ty.is_bool());
                if !ok {
                    self.semantic_error(&op, "Incorrect type. Must be a bool or number.");
                }
            }
            TokenKind::And | TokenKind::Or => {
                if !lhs_ty.is_bool() || !rhs_ty.is_bool() {
                    self.semantic_error(&op, "Incorrect type. Must be a bool.");
                }
            }
            _ => self.semantic_error(&op, "Unknown binary operator."),
        }
    }

    fn block_expression(&mut self, expr: &mut Expr, params: Option<&[Variable]>) {
        self.env_stack.push();
        if let Some(params) = params {
            for v in params {
                self.env_stack.declare_variable(v.clone());
            }
        }
        if let ExprKind::Block { stmts, .. } = &mut expr.kind {
            for stmt in stmts.iter_mut() {
                self.check_statement(stmt);
            }
        }
        self.env_stack.pop();
    }

    fn call_expression(&mut self, expr: &mut Expr) {
        if let ExprKind::Call { callee, .. } = &mut expr.kind {
            self.check_expression(callee);
        }

        let mut func: Option<Function> = None;
        if let ExprKind::Call { callee, closing_paren, .. } = &expr.kind {
            if let ExprKind::Identifier(token) = &callee.kind {
                func = self.env_stack.get_function(id_of(token)).cloned();
                if func.is_none() {
                    let token = token.clone();
                    self.semantic_error(&token, "No function of that name.");
                }
            } else {
                let closing_paren = closing_paren.clone();
                self.semantic_error(&closing_paren, "Function callee must be an identifier.");
            }
        }

        if let ExprKind::Call { args, .. } = &mut expr.kind {
            for arg in args.iter_mut() {
                self.check_expression(arg);
            }
        }

        let closing_paren = match &expr.kind {
            ExprKind::Call { closing_paren, .. } => closing_paren.clone(),
            _ => unreachable!(),
        };
        let arg_count = match &expr.kind {
            ExprKind::Call { args, .. } => args.len(),
            _ => 0,
        };

        if let Some(func) = &func {
            if arg_count != func.params.len() {
                self.semantic_error(&closing_paren, "Different number of arguments than parameters.");
            }
            if let ExprKind::Call { args, .. } = &expr.kind {
                for (arg, param_ty) in args.iter().zip(func.params.iter()) {
                    if arg.ty != *param_ty {
                        self.semantic_error(&closing_paren, "Mismatched types between argument and parameter.");
                    }
                }
            }
        }
    }

    fn return_expression(&mut self, expr: &mut Expr) {
        if let ExprKind::Return { value, .. } = &mut expr.kind {
            if let Some(v) = value {
                self.check_expression(v);
            }
        }
    }

    fn cast_expression(&mut self, expr: &mut Expr) {
        if let ExprKind::Cast { operand, .. } = &mut expr.kind {
            self.check_expression(operand);
        }
    }
}

impl Default for EnvironmentAnalyzer {
    fn default() -> Self {
        EnvironmentAnalyzer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lex::Lexer;
    use crate::front::parse::parse;

    fn analyze(src: &str) -> Result<Vec<Stmt>, Vec<CompileError>> {
        let (tokens, _) = Lexer::new(src).run();
        let mut stmts = parse(tokens).map_err(|e| vec![e])?;
        TypeAnalyzer::new().run(&mut stmts)?;
        EnvironmentAnalyzer::new().run(&mut stmts)?;
        Ok(stmts)
    }

    #[test]
    fn infers_auto_variable_from_initializer() {
        let stmts = analyze("auto x = 1i32;").unwrap();
        match &stmts[0] {
            Stmt::VariableDeclaration(decl) => assert_eq!(decl.ty, Type::con(TypeKind::I32)),
            _ => panic!("expected a variable declaration"),
        }
    }

    #[test]
    fn rejects_mismatched_assignment() {
        let err = analyze("i32 x = 1i32; bool y = true; x = y;").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn function_return_type_is_inferred() {
        let stmts = analyze("auto add(i32 a, i32 b) { return a + b; }").unwrap();
        match &stmts[0] {
            Stmt::FunctionDeclaration(func) => assert_eq!(func.return_ty, Type::con(TypeKind::I32)),
            _ => panic!("expected a function declaration"),
        }
    }

    #[test]
    fn rejects_redeclaration_in_same_frame() {
        let err = analyze("i32 x = 1i32; i32 x = 2i32;").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn allows_shadowing_in_inner_frame() {
        assert!(analyze("i32 x = 1i32; { bool x = true; }").is_ok());
    }

    #[test]
    fn rejects_call_with_wrong_arity() {
        let err = analyze("auto f(i32 a) { return a; } auto y = f();").unwrap_err();
        assert!(!err.is_empty());
    }

    /// spec.md § 8 scenario 6: adding a bare numeric literal to a `bool`
    /// unifies the literal's type variable with `bool`, which the
    /// environment analyzer then rejects since `+` requires numeric operands.
    #[test]
    fn unifying_a_numeric_literal_with_bool_is_rejected() {
        let err = analyze("bool main() { return 1 + true; }").unwrap_err();
        assert!(!err.is_empty());
    }
}
