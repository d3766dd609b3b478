//! The intermediate representation and the pass that lowers the typed,
//! scope-checked AST into it.
//!
//! Mirrors the original compiler's design closely: a single flat vector of
//! three-operand [`Command`]s, built with a cursor (`commands_insert`) that
//! can be temporarily redirected so a function's prologue or a string
//! literal's `.asciz` directive can be spliced in at the front of the
//! stream after the fact ([`IrGenerator::push_insert_spot`]), a tiny
//! register "palette" shared across the whole generator rather than
//! allocated per expression, and a per-function stack frame tracking local
//! variable offsets on one side and stack-passed parameters on the other.

use derive_more::Display;

use crate::common::{Id, Map};
use crate::front::ast::*;
use crate::front::lex::{Token, TokenKind};

/// The IR's instruction opcodes. Every [`Command`] carries up to three
/// [`Operand`]s; which slots are meaningful depends on the tag, the same
/// way the original's tagged `IRCommand` works.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum CommandTag {
    #[display("MOVE")]
    Move,
    #[display("ADD")]
    Add,
    #[display("SUB")]
    Sub,
    #[display("MULT")]
    Mult,
    #[display("DIV")]
    Div,
    #[display("XOR")]
    Xor,
    #[display("NEG")]
    Neg,
    #[display("CALL")]
    Call,
    #[display("RET")]
    Ret,
    #[display("FUNC")]
    Func,
    #[display("LABEL")]
    Label,
    #[display("PUSH")]
    Push,
    #[display("POP")]
    Pop,
    #[display("LEA")]
    Lea,
    #[display("DIRECTIVE")]
    Directive,
    #[display("LEAVE")]
    Leave,
    /// Reading a variable's value (one operand: the memory it lives in), or
    /// storing a freshly computed value into a fresh variable's slot (two
    /// operands: destination memory, source value).
    #[display("LOAD")]
    Load,
}

/// A register by role rather than by physical name; each backend maps
/// these onto its own concrete registers (see `back::gas`/`back::aarch64`).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum RegisterName {
    Ret,
    Arg1,
    Arg2,
    Arg3,
    Arg4,
    Arg5,
    Arg6,
    CP1,
    CP2,
    CP3,
    CP4,
    CP5,
    GP1,
    GP2,
    Stack,
    Base,
    Instruction,
}

const ARG_REGS: [RegisterName; 6] = [
    RegisterName::Arg1,
    RegisterName::Arg2,
    RegisterName::Arg3,
    RegisterName::Arg4,
    RegisterName::Arg5,
    RegisterName::Arg6,
];

/// An entry in the generator's register palette: whether it's currently
/// holding a live value, and whether it's exempt from general allocation
/// (the stack/frame/instruction pointers).
#[derive(Clone, Copy, Debug)]
pub struct Register {
    pub name: RegisterName,
    pub in_use: bool,
    pub important: bool,
}

fn initial_registers() -> Vec<Register> {
    use RegisterName::*;
    let general = [Ret, Arg1, Arg2, Arg3, Arg4, Arg5, Arg6, CP1, CP2, CP3, CP4, CP5, GP1, GP2];
    let important = [Stack, Base, Instruction];
    general
        .iter()
        .map(|&name| Register { name, in_use: false, important: false })
        .chain(important.iter().map(|&name| Register { name, in_use: true, important: true }))
        .collect()
}

/// A register-or-immediate IR value. A register operand with `offset` set
/// denotes a memory reference (`[Base - offset]`, matching the original's
/// base-pointer-relative locals); `dereferenced` marks a pointer value that
/// should be read through rather than used directly.
#[derive(Clone, Debug)]
pub struct RegisterOperand {
    pub name: RegisterName,
    /// Access width in bytes, used to pick the right register name variant
    /// (e.g. `%rax` vs `%eax`) -- independent of `ty`, which is the IR
    /// value's logical type.
    pub size: u32,
    pub offset: Option<i32>,
    pub dereferenced: bool,
    pub ty: Type,
}

#[derive(Clone, Debug)]
pub enum Operand {
    Register(RegisterOperand),
    Immediate { value: String, ty: Type },
}

impl Operand {
    /// A base-pointer-relative local/parameter slot.
    pub fn mem(ty: Type, offset: i32) -> Operand {
        Operand::Register(RegisterOperand {
            name: RegisterName::Base,
            size: 8,
            offset: Some(offset),
            dereferenced: false,
            ty,
        })
    }

    pub fn reg(ty: Type, name: RegisterName) -> Operand {
        let size = ty.size();
        Operand::Register(RegisterOperand {
            name,
            size,
            offset: None,
            dereferenced: false,
            ty,
        })
    }

    pub fn reg_deref(ty: Type, name: RegisterName) -> Operand {
        Operand::Register(RegisterOperand {
            name,
            size: 8,
            offset: None,
            dereferenced: true,
            ty,
        })
    }

    pub fn imm(ty: Type, value: impl Into<String>) -> Operand {
        Operand::Immediate { value: value.into(), ty }
    }

    pub fn ty(&self) -> Type {
        match self {
            Operand::Register(r) => r.ty.clone(),
            Operand::Immediate { ty, .. } => ty.clone(),
        }
    }

    pub fn as_register(&self) -> Option<&RegisterOperand> {
        match self {
            Operand::Register(r) => Some(r),
            Operand::Immediate { .. } => None,
        }
    }

    /// Returns an equal-valued operand widened to a 64-bit access width:
    /// register operands keep their name/offset but report an 8-byte size,
    /// immediates are retyped to `u64`. Used when pushing call arguments,
    /// which are always pushed in full machine words.
    pub fn widened_to_64(&self) -> Operand {
        match self {
            Operand::Register(r) => {
                let mut r = r.clone();
                r.size = 8;
                Operand::Register(r)
            }
            Operand::Immediate { value, .. } => Operand::Immediate {
                value: value.clone(),
                ty: Type::con(TypeKind::U64),
            },
        }
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Register(r) => {
                if let Some(offset) = r.offset {
                    write!(f, "[{}{offset:+}]:{}", r.name, r.size)
                } else if r.dereferenced {
                    write!(f, "*{}:{}", r.name, r.size)
                } else {
                    write!(f, "{}:{}", r.name, r.size)
                }
            }
            Operand::Immediate { value, ty } => write!(f, "{value}:{ty}"),
        }
    }
}

/// Structural equality ignoring the logical type, used to decide whether
/// two operands refer to the "same place" (e.g. whether a destination
/// already holds the value an instruction needs as its first source).
pub fn operands_structurally_equal(a: &Operand, b: &Operand) -> bool {
    match (a, b) {
        (Operand::Register(ra), Operand::Register(rb)) => {
            ra.name == rb.name && ra.offset == rb.offset && ra.dereferenced == rb.dereferenced
        }
        (Operand::Immediate { value: va, .. }, Operand::Immediate { value: vb, .. }) => va == vb,
        _ => false,
    }
}

/// A single IR instruction: a tag plus up to three operands.
#[derive(Clone, Debug)]
pub struct Command {
    pub tag: CommandTag,
    pub args: [Option<Operand>; 3],
}

impl Command {
    pub fn bare(tag: CommandTag) -> Command {
        Command { tag, args: [None, None, None] }
    }

    pub fn one(tag: CommandTag, a: Operand) -> Command {
        Command { tag, args: [Some(a), None, None] }
    }

    pub fn two(tag: CommandTag, a: Operand, b: Operand) -> Command {
        Command { tag, args: [Some(a), Some(b), None] }
    }

    pub fn three(tag: CommandTag, a: Operand, b: Operand, c: Operand) -> Command {
        Command { tag, args: [Some(a), Some(b), Some(c)] }
    }

    pub fn first(&self) -> Option<&Operand> {
        self.args[0].as_ref()
    }
    pub fn second(&self) -> Option<&Operand> {
        self.args[1].as_ref()
    }
    pub fn third(&self) -> Option<&Operand> {
        self.args[2].as_ref()
    }
}

/// The human-readable form written to `rocout.ir`: the tag followed by its
/// present operands, comma-separated, e.g. `ADD rax:4, rax:4, 2:i32`.
impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag)?;
        let operands: Vec<String> = self.args.iter().flatten().map(ToString::to_string).collect();
        if !operands.is_empty() {
            write!(f, " {}", operands.join(", "))?;
        }
        Ok(())
    }
}

/// Rounds `number`'s magnitude up to the nearest multiple of `multiple`,
/// preserving sign. Used both for the negative (locals) side of a stack
/// frame and for the function's overall stack-allocation size.
pub fn ceiling_multiple(number: i32, multiple: i32) -> i32 {
    if multiple == 0 {
        return number;
    }
    let magnitude = ((number.unsigned_abs() as f64 / multiple as f64).ceil() as i32) * multiple;
    if number > 0 {
        magnitude
    } else {
        -magnitude
    }
}

struct StackVar {
    name: Id,
    offset: i32,
}

/// One function's worth of stack-frame bookkeeping: locals grow down from
/// the frame pointer (`neg_size`), stack-passed parameters grow up
/// (`pos_size`, starting past the saved return address and frame pointer).
struct StackFrame {
    pos_size: i32,
    neg_size: i32,
    vars: Vec<StackVar>,
    call_function: bool,
}

/// Lowers a checked AST into a flat [`Command`] stream. Stateful across the
/// whole program: the register palette, the insertion cursor, and the
/// mangling scope stack all persist from one top-level statement to the
/// next exactly as in the original.
pub struct IrGenerator {
    commands: Vec<Command>,
    commands_insert: usize,
    insert_jumps: Vec<usize>,
    registers: Vec<Register>,
    /// Enclosing function/block names, used for nested-name mangling.
    env_stack: Vec<Id>,
    /// Source function name -> mangled symbol, so calls can resolve sibling
    /// functions declared anywhere in the program.
    funcs: Map<Id, Id>,
    stacks: Vec<StackFrame>,
    block_index: u64,
    str_count: u64,
}

impl IrGenerator {
    pub fn new() -> Self {
        IrGenerator {
            commands: Vec::new(),
            commands_insert: 0,
            insert_jumps: Vec::new(),
            registers: initial_registers(),
            env_stack: Vec::new(),
            funcs: Map::new(),
            stacks: Vec::new(),
            block_index: 0,
            str_count: 0,
        }
    }

    pub fn run(mut self, stmts: &mut [Stmt]) -> Vec<Command> {
        for stmt in stmts.iter_mut() {
            self.generate_statement(stmt);
        }
        self.commands
    }

    // ---- cursor / insertion ----

    fn insert_command(&mut self, command: Command) {
        self.commands.insert(self.commands_insert, command);
        self.commands_insert += 1;
        for jump in self.insert_jumps.iter_mut() {
            if *jump > self.commands_insert - 1 {
                *jump += 1;
            }
        }
    }

    fn push_insert_spot(&mut self, insert: usize) {
        self.insert_jumps.push(self.commands_insert);
        self.commands_insert = insert;
    }

    fn pop_insert_spot(&mut self) {
        self.commands_insert = self.insert_jumps.pop().expect("insert spot stack underflow");
    }

    // ---- register allocation ----

    fn occupy_next_reg(&mut self) -> RegisterName {
        self.registers
            .iter_mut()
            .find(|r| !r.important && !r.in_use)
            .map(|r| {
                r.in_use = true;
                r.name
            })
            .expect("ran out of general-purpose registers")
    }

    fn occupy_next_arg_reg(&mut self) -> Option<RegisterName> {
        for &name in &ARG_REGS {
            if let Some(reg) = self.registers.iter_mut().find(|r| r.name == name) {
                if !reg.in_use {
                    reg.in_use = true;
                    return Some(name);
                }
            }
        }
        None
    }

    fn occupy_reg(&mut self, name: RegisterName) -> RegisterName {
        let reg = self.registers.iter_mut().find(|r| r.name == name).expect("unknown register name");
        reg.in_use = true;
        name
    }

    fn release(&mut self, operand: &Operand) {
        if let Operand::Register(r) = operand {
            if let Some(reg) = self.registers.iter_mut().find(|x| x.name == r.name) {
                reg.in_use = false;
            }
        }
    }

    fn release_name(&mut self, name: RegisterName) {
        if let Some(reg) = self.registers.iter_mut().find(|r| r.name == name) {
            reg.in_use = false;
        }
    }

    fn release_all(&mut self) {
        for reg in self.registers.iter_mut() {
            reg.in_use = false;
        }
    }

    // ---- stack frame / mangling ----

    fn create_var(&mut self, name: Id, ty: Type, neg: bool) -> i32 {
        let size = ty.size() as i32;
        let frame = self.stacks.last_mut().expect("variable declared outside any function body");
        let offset = if neg {
            frame.neg_size -= size;
            frame.neg_size = ceiling_multiple(frame.neg_size, size);
            frame.neg_size
        } else {
            let o = frame.pos_size;
            frame.pos_size += 8;
            o
        };
        frame.vars.push(StackVar { name, offset });
        offset
    }

    fn lookup_var(&self, name: Id) -> Option<i32> {
        self.stacks.last()?.vars.iter().rev().find(|v| v.name == name).map(|v| v.offset)
    }

    /// Itanium-shaped mangling: `_Z` + (nested-name block, for functions
    /// declared inside another function or block) + length-prefixed name.
    /// `main` is special-cased by the caller to stay bare.
    fn mangle_function(&self, func_name: &str) -> Id {
        let mut name = String::from("_Z");
        if self.env_stack.is_empty() {
            name.push_str(&func_name.len().to_string());
            name.push_str(func_name);
        } else {
            name.push('N');
            for frame in self.env_stack.iter().rev() {
                let s = frame.as_str();
                name.push_str(&s.len().to_string());
                name.push_str(s);
            }
            name.push_str(&func_name.len().to_string());
            name.push_str(func_name);
            name.push('E');
        }
        Id::new(name)
    }

    // ---- expressions ----

    fn generate_expression(&mut self, expr: &mut Expr) -> Operand {
        match expr.kind.tag() {
            ExprTag::Identifier => self.identifier_expression(expr),
            ExprTag::Literal => self.literal_expression(expr),
            ExprTag::Grouping => self.grouping_expression(expr),
            ExprTag::Unary => self.unary_expression(expr),
            ExprTag::Binary => self.binary_expression(expr),
            ExprTag::Block => self
                .block_expression(expr, None)
                .unwrap_or_else(|| Operand::imm(Type::none(), "0")),
            ExprTag::Call => self.call_expression(expr),
            ExprTag::Return => self
                .return_expression(expr, false)
                .unwrap_or_else(|| Operand::imm(Type::none(), "0")),
            ExprTag::Cast => self.cast_expression(expr),
        }
    }

    fn identifier_expression(&mut self, expr: &Expr) -> Operand {
        let token = match &expr.kind {
            ExprKind::Identifier(t) => t,
            _ => unreachable!(),
        };
        let name = Id::new(token.text.clone());
        if let Some(offset) = self.lookup_var(name) {
            let operand = Operand::mem(expr.ty.clone(), offset);
            self.insert_command(Command::one(CommandTag::Load, operand.clone()));
            operand
        } else {
            // Not a local: the environment analyzer already confirmed this
            // resolves to a function, referenced here by name rather than
            // called. Emit its (possibly mangled) symbol.
            let symbol = self.funcs.get(&name).copied().unwrap_or(name);
            Operand::imm(expr.ty.clone(), symbol.as_str().to_string())
        }
    }

    fn literal_expression(&mut self, expr: &Expr) -> Operand {
        let token = match &expr.kind {
            ExprKind::Literal(t) => t,
            _ => unreachable!(),
        };
        match token.kind {
            TokenKind::True => Operand::imm(expr.ty.clone(), "1"),
            TokenKind::False => Operand::imm(expr.ty.clone(), "0"),
            TokenKind::CharLiteral => {
                let code = token.text.bytes().next().unwrap_or(0);
                Operand::imm(expr.ty.clone(), code.to_string())
            }
            TokenKind::StringLiteral => {
                self.push_insert_spot(0);
                let label = format!(".STR{}", self.str_count);
                self.str_count += 1;
                let label_operand = Operand::imm(expr.ty.clone(), label);
                self.insert_command(Command::one(CommandTag::Label, label_operand.clone()));
                self.insert_command(Command::two(
                    CommandTag::Directive,
                    Operand::imm(Type::none(), "asciz"),
                    Operand::imm(Type::none(), format!("\"{}\"", token.text)),
                ));
                self.pop_insert_spot();
                label_operand
            }
            TokenKind::NumberLiteral => {
                let digits: String = token.text.chars().take_while(|c| !c.is_alphabetic()).collect();
                Operand::imm(expr.ty.clone(), digits)
            }
            _ => unreachable!("non-literal token reached literal_expression"),
        }
    }

    fn grouping_expression(&mut self, expr: &mut Expr) -> Operand {
        let inner = match &mut expr.kind {
            ExprKind::Grouping(inner) => inner.as_mut(),
            _ => unreachable!(),
        };
        self.generate_expression(inner)
    }

    fn unary_expression(&mut self, expr: &mut Expr) -> Operand {
        let (op_kind, operand) = match &mut expr.kind {
            ExprKind::Unary { op, operand } => (op.kind, operand.as_mut()),
            _ => unreachable!(),
        };
        let rhs = self.generate_expression(operand);

        match op_kind {
            TokenKind::Not => {
                let reg = self.occupy_next_reg();
                self.insert_command(Command::three(
                    CommandTag::Xor,
                    Operand::reg(rhs.ty(), reg),
                    rhs.clone(),
                    Operand::imm(rhs.ty(), "1"),
                ));
                self.release(&rhs);
                Operand::reg(rhs.ty(), reg)
            }
            TokenKind::Minus => {
                let reg = self.occupy_next_reg();
                self.insert_command(Command::two(CommandTag::Neg, Operand::reg(rhs.ty(), reg), rhs.clone()));
                self.release(&rhs);
                Operand::reg(rhs.ty(), reg)
            }
            TokenKind::Ampersand => {
                let reg = self.occupy_next_reg();
                let dest = Operand::reg(expr.ty.clone(), reg);
                self.insert_command(Command::two(CommandTag::Lea, dest.clone(), rhs.clone()));
                self.release(&rhs);
                dest
            }
            TokenKind::Star => {
                let reg = self.occupy_next_reg();
                let dest = Operand::reg_deref(expr.ty.clone(), reg);
                self.insert_command(Command::two(CommandTag::Move, dest.clone(), rhs.clone()));
                self.release(&rhs);
                dest
            }
            _ => unreachable!("unary operator rejected before IR generation"),
        }
    }

    fn binary_expression(&mut self, expr: &mut Expr) -> Operand {
        let (lhs_expr, op_kind, rhs_expr) = match &mut expr.kind {
            ExprKind::Binary { lhs, op, rhs } => (lhs.as_mut(), op.kind, rhs.as_mut()),
            _ => unreachable!(),
        };
        let lhs = self.generate_expression(lhs_expr);
        let rhs = self.generate_expression(rhs_expr);

        match op_kind {
            TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash => {
                if let (Operand::Immediate { value: lv, ty: lty }, Operand::Immediate { value: rv, .. }) = (&lhs, &rhs)
                {
                    let folded = fold_arithmetic(op_kind, lv, lty.is_signed(), rv);
                    return Operand::imm(lhs.ty(), folded);
                }

                let tag = match op_kind {
                    TokenKind::Plus => CommandTag::Add,
                    TokenKind::Minus => CommandTag::Sub,
                    TokenKind::Star => CommandTag::Mult,
                    TokenKind::Slash => CommandTag::Div,
                    _ => unreachable!(),
                };

                let lhs_has_offset = matches!(&lhs, Operand::Register(r) if r.offset.is_some());
                if lhs_has_offset {
                    let reg = self.occupy_next_reg();
                    let dest = Operand::reg(lhs.ty(), reg);
                    self.insert_command(Command::three(tag, dest.clone(), lhs.clone(), rhs.clone()));
                    self.release(&lhs);
                    self.release(&rhs);
                    dest
                } else {
                    self.insert_command(Command::three(tag, lhs.clone(), lhs.clone(), rhs.clone()));
                    self.release(&lhs);
                    self.release(&rhs);
                    lhs
                }
            }
            TokenKind::Equal => {
                self.insert_command(Command::two(CommandTag::Move, lhs.clone(), rhs.clone()));
                self.release(&rhs);
                lhs
            }
            // Comparisons and `&&`/`||` are never lowered to condition codes
            // or a materialized boolean here: the language has no branching
            // construct to consume them, so their only observable effect is
            // type-checking as a sub-expression (e.g. the RHS of `=`).
            _ => {
                self.release(&rhs);
                lhs
            }
        }
    }

    fn cast_expression(&mut self, expr: &mut Expr) -> Operand {
        let (operand, target_ty) = match &mut expr.kind {
            ExprKind::Cast { operand, .. } => (operand.as_mut(), expr.ty.clone()),
            _ => unreachable!(),
        };
        let val = self.generate_expression(operand);
        retype(val, target_ty)
    }

    /// Lowers a `{ ... }` block. `func_ctx` is `Some((name, params))` exactly
    /// when this is a function's top-level body: that's when a stack frame
    /// is pushed, the parameters are spilled/bound, and the post-body
    /// stack-size fixup and implicit-return synthesis run.
    fn block_expression(&mut self, expr: &mut Expr, func_ctx: Option<(&Token, &[Param])>) -> Option<Operand> {
        let in_function = func_ctx.is_some();

        if let Some((_, params)) = func_ctx {
            self.push_insert_spot(self.commands_insert);
            self.stacks.push(StackFrame {
                pos_size: 0,
                neg_size: 0,
                vars: Vec::new(),
                call_function: false,
            });

            let mut filled = Vec::new();
            for param in params {
                let name = Id::new(param.name.text.clone());
                if let Some(reg) = self.occupy_next_arg_reg() {
                    let offset = self.create_var(name, param.ty.clone(), true);
                    self.insert_command(Command::two(
                        CommandTag::Move,
                        Operand::mem(param.ty.clone(), offset),
                        Operand::reg(param.ty.clone(), reg),
                    ));
                    filled.push(reg);
                } else {
                    if self.stacks.last().unwrap().pos_size == 0 {
                        self.stacks.last_mut().unwrap().pos_size += 16;
                    }
                    self.create_var(name, param.ty.clone(), false);
                }
            }
            for reg in filled {
                self.release_name(reg);
            }
        }

        let scope_name = match func_ctx {
            Some((name, _)) => Id::new(name.text.clone()),
            None => {
                let name = Id::new(format!("_{}", self.block_index));
                self.block_index += 1;
                name
            }
        };
        self.env_stack.push(scope_name);

        let mut ret_val: Option<Operand> = None;
        if let ExprKind::Block { stmts, .. } = &mut expr.kind {
            for stmt in stmts.iter_mut() {
                match stmt {
                    Stmt::Expression(e) if matches!(e.kind, ExprKind::Return { .. }) => {
                        ret_val = self.return_expression(e, in_function);
                    }
                    Stmt::Expression(e) => {
                        self.generate_expression(e);
                    }
                    _ => self.generate_statement(stmt),
                }
            }
        }

        if in_function {
            if ret_val.is_none() {
                let mut synthetic = Expr::new(ExprKind::Return {
                    keyword: Token::eof(0),
                    value: None,
                });
                self.return_expression(&mut synthetic, true);
            }

            self.pop_insert_spot();
            let frame = self.stacks.last().unwrap();
            let mut sub = -frame.neg_size;
            if sub > 128 && !frame.call_function {
                sub = ceiling_multiple(sub - 128, 8);
            } else if frame.call_function {
                sub = ceiling_multiple(sub, 16);
            } else if !frame.vars.is_empty() {
                sub = sub.max(16);
            }
            if sub != 0 {
                let u64_ty = Type::con(TypeKind::U64);
                self.insert_command(Command::three(
                    CommandTag::Sub,
                    Operand::reg(u64_ty.clone(), RegisterName::Stack),
                    Operand::reg(u64_ty.clone(), RegisterName::Stack),
                    Operand::imm(u64_ty, sub.to_string()),
                ));
            }
            self.stacks.pop();
        }

        self.env_stack.pop();
        ret_val
    }

    fn call_expression(&mut self, expr: &mut Expr) -> Operand {
        let (callee, args) = match &mut expr.kind {
            ExprKind::Call { callee, args, .. } => (callee.as_mut(), args.as_mut_slice()),
            _ => unreachable!(),
        };

        if let Some(frame) = self.stacks.last_mut() {
            frame.call_function = true;
        }

        let mut filled_regs = Vec::new();
        let mut arg_vals: Vec<Operand> = Vec::with_capacity(args.len());
        let mut first_push: Option<usize> = None;
        for (i, arg) in args.iter_mut().enumerate() {
            let arg_ty = arg.ty.clone();
            let val = self.generate_expression(arg);
            if let Some(reg) = self.occupy_next_arg_reg() {
                self.insert_command(Command::two(CommandTag::Move, Operand::reg(arg_ty, reg), val.clone()));
                filled_regs.push(reg);
            } else if first_push.is_none() {
                first_push = Some(i);
            }
            arg_vals.push(val);
        }

        let mut pushed_size: u32 = 0;
        if let Some(first) = first_push {
            for i in (first..arg_vals.len()).rev() {
                let widened = arg_vals[i].widened_to_64();
                pushed_size += widened.ty().size();
                self.insert_command(Command::one(CommandTag::Push, widened));
            }
        }
        for reg in filled_regs {
            self.release_name(reg);
        }

        let callee_name = match &callee.kind {
            ExprKind::Identifier(token) => Id::new(token.text.clone()),
            _ => unreachable!("call target must be an identifier"),
        };
        let symbol = if callee_name.as_str() == "write" {
            callee_name
        } else {
            self.funcs.get(&callee_name).copied().unwrap_or(callee_name)
        };
        self.insert_command(Command::one(
            CommandTag::Call,
            Operand::imm(expr.ty.clone(), symbol.as_str().to_string()),
        ));

        if pushed_size > 0 {
            let u64_ty = Type::con(TypeKind::U64);
            self.insert_command(Command::three(
                CommandTag::Add,
                Operand::reg(u64_ty.clone(), RegisterName::Stack),
                Operand::reg(u64_ty.clone(), RegisterName::Stack),
                Operand::imm(u64_ty, pushed_size.to_string()),
            ));
        }

        let ret_reg = self.occupy_reg(RegisterName::Ret);
        Operand::reg(expr.ty.clone(), ret_reg)
    }

    /// `in_function` is true only when this return is a direct statement of
    /// its enclosing function's top-level block; that's what triggers the
    /// epilogue (`leave`/`pop` + `ret`). A `return` reached any other way
    /// (nested inside another expression) only computes its value.
    fn return_expression(&mut self, expr: &mut Expr, in_function: bool) -> Option<Operand> {
        let (value, ret_ty) = match &mut expr.kind {
            ExprKind::Return { value, .. } => (value.as_mut(), expr.ty.clone()),
            _ => unreachable!(),
        };
        let has_value = value.is_some();

        if let Some(v) = value {
            let mut mv_ty = ret_ty.clone();
            if mv_ty.size() < 4 {
                mv_ty = Type::con(TypeKind::U32);
            }
            let val = self.generate_expression(v);
            let ret_reg = self.occupy_reg(RegisterName::Ret);
            self.insert_command(Command::two(CommandTag::Move, Operand::reg(mv_ty, ret_reg), val));
        }

        if in_function {
            let frame = self.stacks.last().expect("return outside any function body");
            if frame.vars.is_empty() {
                let base_reg = self.occupy_reg(RegisterName::Base);
                self.insert_command(Command::one(CommandTag::Pop, Operand::reg(Type::con(TypeKind::U64), base_reg)));
            } else {
                self.insert_command(Command::bare(CommandTag::Leave));
            }
            self.insert_command(Command::bare(CommandTag::Ret));
        }

        if has_value {
            let ret_reg = self.occupy_reg(RegisterName::Ret);
            Some(Operand::reg(ret_ty, ret_reg))
        } else {
            None
        }
    }

    // ---- statements ----

    fn generate_statement(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Expression(expr) => {
                self.generate_expression(expr);
            }
            Stmt::VariableDeclaration(decl) => self.variable_declaration_statement(decl),
            Stmt::FunctionDeclaration(func) => self.function_declaration_statement(func),
        }
        self.release_all();
    }

    fn variable_declaration_statement(&mut self, decl: &mut VariableDeclaration) {
        let ty = decl.ty.clone();
        let offset = self.create_var(Id::new(decl.name.text.clone()), ty.clone(), true);
        let init_val = self.generate_expression(&mut decl.initializer);
        self.insert_command(Command::two(CommandTag::Load, Operand::mem(ty, offset), init_val));
    }

    fn function_declaration_statement(&mut self, func: &mut FunctionDeclaration) {
        let is_main = func.name.text == "main";
        let mangled = if is_main {
            Id::new("main".to_string())
        } else {
            self.mangle_function(&func.name.text)
        };
        func.mangled_name = Some(mangled);
        self.funcs.insert(Id::new(func.name.text.clone()), mangled);

        self.push_insert_spot(0);

        self.insert_command(Command::one(
            CommandTag::Func,
            Operand::imm(func.return_ty.clone(), mangled.as_str().to_string()),
        ));
        let base_reg = self.occupy_reg(RegisterName::Base);
        self.insert_command(Command::one(CommandTag::Push, Operand::reg(Type::con(TypeKind::U64), base_reg)));
        let base_reg = self.occupy_reg(RegisterName::Base);
        let stack_reg = self.occupy_reg(RegisterName::Stack);
        self.insert_command(Command::two(
            CommandTag::Move,
            Operand::reg(Type::con(TypeKind::U64), base_reg),
            Operand::reg(Type::con(TypeKind::U64), stack_reg),
        ));

        self.block_expression(&mut func.body, Some((&func.name, &func.params)));
        self.pop_insert_spot();
    }
}

impl Default for IrGenerator {
    fn default() -> Self {
        IrGenerator::new()
    }
}

fn retype(operand: Operand, ty: Type) -> Operand {
    match operand {
        Operand::Register(mut r) => {
            r.ty = ty;
            Operand::Register(r)
        }
        Operand::Immediate { value, .. } => Operand::Immediate { value, ty },
    }
}

/// Folds a literal-literal arithmetic binary expression at compile time,
/// choosing signed or unsigned semantics from the left operand's type.
fn fold_arithmetic(op: TokenKind, lhs: &str, lhs_signed: bool, rhs: &str) -> String {
    if lhs_signed {
        let a: i64 = lhs.parse().unwrap_or(0);
        let b: i64 = rhs.parse().unwrap_or(0);
        apply_op_i64(op, a, b).to_string()
    } else {
        let a: u64 = lhs.parse().unwrap_or(0);
        let b: u64 = rhs.parse().unwrap_or(0);
        apply_op_u64(op, a, b).to_string()
    }
}

fn apply_op_i64(op: TokenKind, a: i64, b: i64) -> i64 {
    match op {
        TokenKind::Plus => a.wrapping_add(b),
        TokenKind::Minus => a.wrapping_sub(b),
        TokenKind::Star => a.wrapping_mul(b),
        TokenKind::Slash => {
            if b == 0 {
                0
            } else {
                a.wrapping_div(b)
            }
        }
        _ => a,
    }
}

fn apply_op_u64(op: TokenKind, a: u64, b: u64) -> u64 {
    match op {
        TokenKind::Plus => a.wrapping_add(b),
        TokenKind::Minus => a.wrapping_sub(b),
        TokenKind::Star => a.wrapping_mul(b),
        TokenKind::Slash => {
            if b == 0 {
                0
            } else {
                a.wrapping_div(b)
            }
        }
        _ => a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lex::Lexer;
    use crate::front::parse::parse;
    use crate::middle::infer::{EnvironmentAnalyzer, TypeAnalyzer};

    fn lower(src: &str) -> Vec<Command> {
        let (tokens, errs) = Lexer::new(src).run();
        assert!(errs.is_empty(), "lex errors: {errs:?}");
        let mut stmts = parse(tokens).expect("parse");
        TypeAnalyzer::new().run(&mut stmts).expect("type check");
        EnvironmentAnalyzer::new().run(&mut stmts).expect("env check");
        IrGenerator::new().run(&mut stmts)
    }

    #[test]
    fn function_prologue_is_spliced_at_the_front() {
        let commands = lower("auto f() { return 1i32; }");
        assert_eq!(commands[0].tag, CommandTag::Func);
        assert_eq!(commands[1].tag, CommandTag::Push);
        assert_eq!(commands[2].tag, CommandTag::Move);
    }

    #[test]
    fn main_keeps_its_bare_name() {
        let commands = lower("auto main() { return 0i32; }");
        match commands[0].first().unwrap() {
            Operand::Immediate { value, .. } => assert_eq!(value, "main"),
            _ => panic!("expected the function symbol as an immediate"),
        }
    }

    #[test]
    fn nested_function_gets_a_mangled_name() {
        let commands = lower("auto outer() { auto inner() { return 1i32; } return inner(); }");
        let mangled = commands
            .iter()
            .filter(|c| c.tag == CommandTag::Func)
            .filter_map(|c| c.first())
            .find_map(|op| match op {
                Operand::Immediate { value, .. } if value.starts_with("_ZN") => Some(value.clone()),
                _ => None,
            });
        assert!(mangled.is_some(), "expected a nested-name mangled symbol for `inner`");
    }

    #[test]
    fn constant_arithmetic_is_folded() {
        let commands = lower("i32 x = 1i32 + 2i32;");
        assert!(!commands.iter().any(|c| c.tag == CommandTag::Add), "literal + literal should fold at compile time");
    }

    #[test]
    fn implicit_return_still_gets_an_epilogue() {
        let commands = lower("auto f() { 1i32; }");
        assert!(commands.iter().any(|c| c.tag == CommandTag::Ret));
    }

    #[test]
    fn string_literal_gets_a_label_and_directive_at_the_front() {
        let commands = lower(r#"auto f() { return "hi"; }"#);
        assert_eq!(commands[0].tag, CommandTag::Label);
        assert_eq!(commands[1].tag, CommandTag::Directive);
    }

    /// spec.md § 8 scenario 4: a call with seven scalar arguments fills
    /// Arg1..Arg6 and pushes the seventh, restoring the stack by its byte
    /// count (8, widened to a machine word) right after the `CALL`.
    #[test]
    fn seventh_call_argument_is_pushed_and_the_stack_is_restored() {
        let commands = lower(
            "i32 g(i32 a, i32 b, i32 c, i32 d, i32 e, i32 f, i32 h) { return a; } \
             auto m() { return g(1i32, 2i32, 3i32, 4i32, 5i32, 6i32, 7i32); }",
        );
        let call_pos = commands
            .iter()
            .position(|c| c.tag == CommandTag::Call && matches!(c.first(), Some(Operand::Immediate { value, .. }) if value.contains('g') || value == "g"))
            .expect("a call to g");
        assert_eq!(commands[call_pos - 1].tag, CommandTag::Push, "the 7th argument should be pushed right before the call");
        let restore = &commands[call_pos + 1];
        assert_eq!(restore.tag, CommandTag::Add);
        match restore.third().unwrap() {
            Operand::Immediate { value, .. } => assert_eq!(value, "8"),
            other => panic!("expected an immediate byte count, got {other:?}"),
        }
    }

    /// spec.md § 8 scenario 3: `&x` lowers to a `LEA` producing a pointer to
    /// `x`'s slot, and `*p` lowers to a dereferenced `MOVE` of that pointer's
    /// target into the result register.
    #[test]
    fn pointer_dereference_lowers_to_lea_then_a_dereferenced_move() {
        let commands = lower("auto f() { i32 x = 7i32; i32* p = &x; return *p; }");
        assert!(commands.iter().any(|c| c.tag == CommandTag::Lea), "expected a LEA for `&x`");
        let deref_move = commands.iter().find(|c| {
            c.tag == CommandTag::Move
                && matches!(c.first(), Some(Operand::Register(r)) if r.dereferenced)
        });
        assert!(deref_move.is_some(), "expected a dereferenced MOVE for `*p`");
    }

    /// spec.md § 8 scenario 5: `write` is a pre-registered native function,
    /// so its call site is never mangled.
    #[test]
    fn native_write_is_called_unmangled() {
        let commands = lower(r#"auto m() { write(1i32, "hi", 2i32); return 0i32; }"#);
        let called = commands.iter().any(
            |c| c.tag == CommandTag::Call && matches!(c.first(), Some(Operand::Immediate { value, .. }) if value == "write"),
        );
        assert!(called, "expected an unmangled call to the native `write` function");
    }
}
