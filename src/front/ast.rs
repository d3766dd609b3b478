//! The type system and abstract syntax tree.

use derive_more::Display;

use crate::common::Id;
use crate::front::lex::Token;

/// A ground type's keyword, size in bytes, and signedness.
/// Mirrors the original compiler's `RealType` table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TypeKind {
    #[display("i8")]
    I8,
    #[display("i16")]
    I16,
    #[display("i32")]
    I32,
    #[display("i64")]
    I64,
    #[display("u8")]
    U8,
    #[display("u16")]
    U16,
    #[display("u32")]
    U32,
    #[display("u64")]
    U64,
    #[display("bool")]
    Bool,
    #[display("none")]
    None,
}

impl TypeKind {
    pub fn size(self) -> u32 {
        use TypeKind::*;
        match self {
            I8 | U8 | Bool => 1,
            I16 | U16 => 2,
            I32 | U32 => 4,
            I64 | U64 => 8,
            None => 0,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, TypeKind::I8 | TypeKind::I16 | TypeKind::I32 | TypeKind::I64)
    }

    pub fn keyword(self) -> &'static str {
        use TypeKind::*;
        match self {
            I8 => "i8",
            I16 => "i16",
            I32 => "i32",
            I64 => "i64",
            U8 => "u8",
            U16 => "u16",
            U32 => "u32",
            U64 => "u64",
            Bool => "bool",
            None => "none",
        }
    }
}

/// A type: a ground constructor, a unification variable, or a pointer.
///
/// Equality is structural but shallow the way the original `comp_types` is:
/// two constructors are equal iff their `TypeKind`s match (generics are not
/// compared), two variables iff their indices match, two pointers iff their
/// inner types are equal.
#[derive(Clone, Debug)]
pub enum Type {
    Constructor { kind: TypeKind, generics: Vec<Type> },
    Variable(usize),
    Pointer(Box<Type>),
}

impl Type {
    pub fn con(kind: TypeKind) -> Type {
        Type::Constructor {
            kind,
            generics: Vec::new(),
        }
    }

    pub fn pointer(inner: Type) -> Type {
        Type::Pointer(Box::new(inner))
    }

    pub fn none() -> Type {
        Type::con(TypeKind::None)
    }

    /// Placeholder assigned to a freshly parsed node, before the type
    /// analyzer's infer pass has had a chance to visit it.
    pub fn unresolved() -> Type {
        Type::none()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Type::Constructor {
                kind: TypeKind::I8
                    | TypeKind::I16
                    | TypeKind::I32
                    | TypeKind::I64
                    | TypeKind::U8
                    | TypeKind::U16
                    | TypeKind::U32
                    | TypeKind::U64,
                ..
            }
        )
    }

    pub fn is_bool(&self) -> bool {
        matches!(
            self,
            Type::Constructor {
                kind: TypeKind::Bool,
                ..
            }
        )
    }

    pub fn is_none(&self) -> bool {
        matches!(
            self,
            Type::Constructor {
                kind: TypeKind::None,
                ..
            }
        )
    }

    pub fn size(&self) -> u32 {
        match self {
            Type::Constructor { kind, .. } => kind.size(),
            Type::Variable(_) => 0,
            Type::Pointer(_) => 8,
        }
    }

    pub fn is_signed(&self) -> bool {
        match self {
            Type::Constructor { kind, .. } => kind.is_signed(),
            Type::Variable(_) => false,
            Type::Pointer(_) => false,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Constructor { kind: a, .. }, Type::Constructor { kind: b, .. }) => a == b,
            (Type::Variable(a), Type::Variable(b)) => a == b,
            (Type::Pointer(a), Type::Pointer(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Type {}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Constructor { kind, .. } => write!(f, "{kind}"),
            Type::Variable(n) => write!(f, "'t{n}"),
            Type::Pointer(inner) => write!(f, "{inner}*"),
        }
    }
}

/// A full program: an ordered sequence of top-level declarations.
#[derive(Debug)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

/// A statement. Variable/function declarations and the unary `ExpressionStatement`
/// wrapper match the original's `Statement` hierarchy.
#[derive(Debug)]
pub enum Stmt {
    Expression(Box<Expr>),
    VariableDeclaration(VariableDeclaration),
    FunctionDeclaration(FunctionDeclaration),
}

#[derive(Debug)]
pub struct VariableDeclaration {
    pub declared_type: Option<Type>,
    /// The resolved type, filled in by the type analyzer's substitution pass
    /// (equal to `declared_type` unless it was elided with `auto`).
    pub ty: Type,
    pub name: Token,
    pub initializer: Box<Expr>,
}

#[derive(Debug)]
pub struct Param {
    pub declared_type: Option<Type>,
    pub ty: Type,
    pub name: Token,
}

#[derive(Debug)]
pub struct FunctionDeclaration {
    pub declared_return_type: Option<Type>,
    pub return_ty: Type,
    pub name: Token,
    pub params: Vec<Param>,
    pub body: Box<Expr>,
    /// Filled in by the IR generator: the mangled symbol emitted for calls.
    pub mangled_name: Option<Id>,
}

/// An expression node. Every node carries its inferred `ty` (filled in by the
/// type analyzer's substitution pass) and whether it denotes an l-value.
#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub lvalue: bool,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Expr {
        Expr {
            kind,
            ty: Type::unresolved(),
            lvalue: false,
        }
    }
}

#[derive(Debug)]
pub enum ExprKind {
    Identifier(Token),
    Literal(Token),
    Grouping(Box<Expr>),
    Unary {
        op: Token,
        operand: Box<Expr>,
    },
    Binary {
        lhs: Box<Expr>,
        op: Token,
        rhs: Box<Expr>,
    },
    Block {
        opening: Token,
        stmts: Vec<Stmt>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        closing_paren: Token,
    },
    Return {
        keyword: Token,
        value: Option<Box<Expr>>,
    },
    Cast {
        keyword: Token,
        operand: Box<Expr>,
        target: Option<Type>,
    },
}

/// A cheap `Copy` discriminant for [`ExprKind`]. Passes that need to decide
/// which handler to call without holding a borrow of the node's fields
/// (so they remain free to separately borrow the node mutably) match on
/// this instead of `&expr.kind` directly.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExprTag {
    Identifier,
    Literal,
    Grouping,
    Unary,
    Binary,
    Block,
    Call,
    Return,
    Cast,
}

impl ExprKind {
    pub fn tag(&self) -> ExprTag {
        match self {
            ExprKind::Identifier(_) => ExprTag::Identifier,
            ExprKind::Literal(_) => ExprTag::Literal,
            ExprKind::Grouping(_) => ExprTag::Grouping,
            ExprKind::Unary { .. } => ExprTag::Unary,
            ExprKind::Binary { .. } => ExprTag::Binary,
            ExprKind::Block { .. } => ExprTag::Block,
            ExprKind::Call { .. } => ExprTag::Call,
            ExprKind::Return { .. } => ExprTag::Return,
            ExprKind::Cast { .. } => ExprTag::Cast,
        }
    }
}
