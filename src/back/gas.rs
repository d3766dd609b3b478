//! The x86-64 backend: lowers the flat [`Command`] stream into AT&T-syntax
//! assembly for the System V ABI, following the original compiler's
//! `ASCodeGenerator` mnemonic and register tables.

use crate::middle::tir::{operands_structurally_equal, Command, CommandTag, Operand, RegisterName};

/// Physical register name, keyed by [`RegisterName`] and access width.
/// Mirrors `ASCodeGenerator`'s `registers` table: one row per abstract name,
/// one column per size (8/4/2/1 bytes).
fn reg_str(name: RegisterName, size: u32) -> &'static str {
    use RegisterName::*;
    match (name, size) {
        (Ret, 8) => "rax",
        (Ret, 4) => "eax",
        (Ret, 2) => "ax",
        (Ret, 1) => "al",
        (Arg1, 8) => "rdi",
        (Arg1, 4) => "edi",
        (Arg1, 2) => "di",
        (Arg1, 1) => "dil",
        (Arg2, 8) => "rsi",
        (Arg2, 4) => "esi",
        (Arg2, 2) => "si",
        (Arg2, 1) => "sil",
        (Arg3, 8) => "rdx",
        (Arg3, 4) => "edx",
        (Arg3, 2) => "dx",
        (Arg3, 1) => "dl",
        (Arg4, 8) => "rcx",
        (Arg4, 4) => "ecx",
        (Arg4, 2) => "cx",
        (Arg4, 1) => "cl",
        (Arg5, 8) => "r8",
        (Arg5, 4) => "r8d",
        (Arg5, 2) => "r8w",
        (Arg5, 1) => "r8b",
        (Arg6, 8) => "r9",
        (Arg6, 4) => "r9d",
        (Arg6, 2) => "r9w",
        (Arg6, 1) => "r9b",
        (CP1, 8) => "rbx",
        (CP1, 4) => "ebx",
        (CP1, 2) => "bx",
        (CP1, 1) => "bl",
        (CP2, 8) => "r12",
        (CP2, 4) => "r12d",
        (CP2, 2) => "r12w",
        (CP2, 1) => "r12b",
        (CP3, 8) => "r13",
        (CP3, 4) => "r13d",
        (CP3, 2) => "r13w",
        (CP3, 1) => "r13b",
        (CP4, 8) => "r14",
        (CP4, 4) => "r14d",
        (CP4, 2) => "r14w",
        (CP4, 1) => "r14b",
        (CP5, 8) => "r15",
        (CP5, 4) => "r15d",
        (CP5, 2) => "r15w",
        (CP5, 1) => "r15b",
        (GP1, 8) => "r10",
        (GP1, 4) => "r10d",
        (GP1, 2) => "r10w",
        (GP1, 1) => "r10b",
        (GP2, 8) => "r11",
        (GP2, 4) => "r11d",
        (GP2, 2) => "r11w",
        (GP2, 1) => "r11b",
        (Stack, _) => "rsp",
        (Base, _) => "rbp",
        (Instruction, _) => "rip",
        _ => unreachable!("no x86-64 register for {name:?} at size {size}"),
    }
}

fn suffix(size: u32) -> char {
    match size {
        8 => 'q',
        4 => 'l',
        2 => 'w',
        1 => 'b',
        _ => unreachable!("unsupported operand width {size}"),
    }
}

/// The width `move`'s sign/zero-extend decision and every other mnemonic's
/// size suffix is chosen from: a bare register operand's own declared size,
/// a memory or immediate operand's logical type size.
fn data_width(op: &Operand) -> u32 {
    match op {
        Operand::Register(r) if r.offset.is_none() => r.size,
        _ => op.ty().size().max(1),
    }
}

fn is_mem_like(op: &Operand) -> bool {
    matches!(op.as_register(), Some(r) if r.offset.is_some() || r.dereferenced)
}

fn scratch_reg() -> RegisterName {
    RegisterName::GP1
}

/// Lowers the abstract IR into GAS/AT&T-syntax x86-64 assembly text, one
/// line per entry. Once every command has been generated, every line whose
/// last character isn't `:` gets a leading tab -- labels stay flush-left,
/// everything else (the preamble, `.global`, directives, instructions) is
/// indented, matching `ASCodeGenerator::run`'s final indentation pass.
#[derive(Default)]
pub struct GasEmitter {
    lines: Vec<String>,
}

impl GasEmitter {
    pub fn new() -> Self {
        GasEmitter::default()
    }

    pub fn emit(mut self, commands: &[Command]) -> Vec<String> {
        for cmd in commands {
            self.generate_command(cmd);
        }
        self.preamble();
        for line in &mut self.lines {
            if !line.ends_with(':') {
                line.insert(0, '\t');
            }
        }
        self.lines
    }

    fn push_raw(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn push_insn(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    fn preamble(&mut self) {
        self.lines.insert(0, ".text".to_string());
    }

    fn operand_str(&self, op: &Operand) -> String {
        match op {
            Operand::Register(r) => {
                if let Some(offset) = r.offset {
                    format!("{}(%{})", offset, reg_str(r.name, 8))
                } else if r.dereferenced {
                    format!("(%{})", reg_str(r.name, 8))
                } else {
                    format!("%{}", reg_str(r.name, r.size.max(1)))
                }
            }
            Operand::Immediate { value, .. } => format!("${value}"),
        }
    }

    fn generate_command(&mut self, cmd: &Command) {
        use CommandTag::*;
        match cmd.tag {
            Move => self.move_cmd(cmd.first().unwrap(), cmd.second().unwrap()),
            Add => self.basic("add", cmd, None),
            Sub => self.basic("sub", cmd, None),
            Mult => self.basic("mul", cmd, None),
            Div => self.basic("div", cmd, None),
            Xor => self.basic("xor", cmd, None),
            Neg => self.neg_cmd(cmd),
            Call => {
                let target = cmd.first().unwrap();
                self.push_insn(format!("call {}", raw_symbol(target)));
            }
            Ret => self.push_insn("ret"),
            Func => {
                let name = raw_symbol(cmd.first().unwrap());
                self.push_raw(format!(".global {name}"));
                self.push_raw(format!("{name}:"));
            }
            Label => {
                let name = raw_symbol(cmd.first().unwrap());
                self.push_raw(format!("{name}:"));
            }
            Push => self.basic("push", cmd, None),
            Pop => self.basic("pop", cmd, None),
            Lea => self.basic("lea", cmd, Some(8)),
            Directive => {
                let name = raw_symbol(cmd.first().unwrap());
                let value = raw_symbol(cmd.second().unwrap());
                self.push_raw(format!(".{name} {value}"));
            }
            Leave => self.push_insn("leave"),
            Load => self.load_cmd(cmd),
        }
    }

    /// Memory-to-memory moves are illegal on x86-64, so they're rewritten
    /// through the scratch register `GP1`. Widening moves pick the
    /// sign/zero-extending mnemonic variant (`movs**`/`movz**`); same-width
    /// moves use the plain size-suffixed `mov`.
    fn move_cmd(&mut self, dst: &Operand, src: &Operand) {
        if is_mem_like(dst) && is_mem_like(src) {
            let scratch = Operand::reg(src.ty(), scratch_reg());
            self.move_cmd(&scratch, src);
            self.move_cmd(dst, &scratch);
            return;
        }
        let dst_size = data_width(dst);
        let src_size = data_width(src);
        if src_size < dst_size {
            let sign = if dst.ty().is_signed() { 's' } else { 'z' };
            self.push_insn(format!(
                "mov{}{}{} {}, {}",
                sign,
                suffix(src_size),
                suffix(dst_size),
                self.operand_str(src),
                self.operand_str(dst)
            ));
        } else {
            self.push_insn(format!("mov{} {}, {}", suffix(dst_size), self.operand_str(src), self.operand_str(dst)));
        }
    }

    /// `neg` only takes one operand on real x86-64, unlike the IR's
    /// two-operand `(dst, src)` form: emit a move into `dst` first when it
    /// doesn't already hold `src`, then negate it in place.
    fn neg_cmd(&mut self, cmd: &Command) {
        let dst = cmd.first().unwrap();
        let src = cmd.second().unwrap();
        if !operands_structurally_equal(dst, src) {
            self.move_cmd(dst, src);
        }
        self.push_insn(format!("neg{} {}", suffix(data_width(dst)), self.operand_str(dst)));
    }

    /// The 3/2/1-operand dispatch: a fused `dst, lhs, rhs` command first
    /// synthesizes `dst <- lhs` when they aren't already the same place
    /// (arithmetic always writes back into its first source), then emits
    /// `<mnemonic> rhs, dst`; a 2-operand command is `<mnemonic> src, dst`
    /// untouched; a 1-operand command is `<mnemonic> dst`.
    fn basic(&mut self, mnemonic: &str, cmd: &Command, forced_size: Option<u32>) {
        let a1 = cmd.first();
        let a2 = cmd.second();
        let a3 = cmd.third();
        match (a1, a2, a3) {
            (Some(dst), Some(lhs), Some(rhs)) => {
                if !operands_structurally_equal(dst, lhs) {
                    self.move_cmd(dst, lhs);
                }
                let size = forced_size.unwrap_or_else(|| data_width(dst));
                self.push_insn(format!("{mnemonic}{} {}, {}", suffix(size), self.operand_str(rhs), self.operand_str(dst)));
            }
            (Some(a1v), Some(a2v), None) => {
                let size = forced_size.unwrap_or_else(|| data_width(a1v));
                self.push_insn(format!("{mnemonic}{} {}, {}", suffix(size), self.operand_str(a2v), self.operand_str(a1v)));
            }
            (Some(a1v), None, None) => {
                let size = forced_size.unwrap_or_else(|| data_width(a1v));
                self.push_insn(format!("{mnemonic}{} {}", suffix(size), self.operand_str(a1v)));
            }
            _ => unreachable!("{mnemonic} emitted with no operands"),
        }
    }

    /// A memory reference consumed directly (one operand) needs no
    /// instruction of its own -- the referencing instruction encodes the
    /// memory operand inline. A store into a fresh slot (two operands) is
    /// a plain move.
    fn load_cmd(&mut self, cmd: &Command) {
        if let (Some(dst), Some(src)) = (cmd.first(), cmd.second()) {
            self.move_cmd(dst, src);
        }
    }
}

fn raw_symbol(op: &Operand) -> String {
    match op {
        Operand::Immediate { value, .. } => value.clone(),
        Operand::Register(_) => unreachable!("label/symbol operand must be an immediate"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::ast::{Type, TypeKind};

    fn run(commands: Vec<Command>) -> Vec<String> {
        GasEmitter::new().emit(&commands)
    }

    #[test]
    fn preamble_is_first() {
        let lines = run(vec![]);
        assert_eq!(lines[0], "\t.text");
    }

    #[test]
    fn func_emits_global_and_label() {
        let lines = run(vec![Command::one(CommandTag::Func, Operand::imm(Type::none(), "main"))]);
        assert_eq!(lines[1], "\t.global main");
        assert_eq!(lines[2], "main:");
    }

    #[test]
    fn three_operand_add_synthesizes_a_move_when_dst_differs_from_lhs() {
        let i32_ty = Type::con(TypeKind::I32);
        let dst = Operand::reg(i32_ty.clone(), RegisterName::Ret);
        let lhs = Operand::mem(i32_ty.clone(), -4);
        let rhs = Operand::imm(i32_ty, "2");
        let lines = run(vec![Command::three(CommandTag::Add, dst, lhs, rhs)]);
        assert!(lines.iter().any(|l| l.contains("movl") && l.contains("-4(%rbp)")));
        assert!(lines.iter().any(|l| l.starts_with("\taddl")));
    }

    #[test]
    fn neg_is_rendered_as_a_single_operand_instruction() {
        let i32_ty = Type::con(TypeKind::I32);
        let dst = Operand::reg(i32_ty.clone(), RegisterName::Ret);
        let src = Operand::mem(i32_ty, -4);
        let lines = run(vec![Command::two(CommandTag::Neg, dst, src)]);
        let neg_line = lines.iter().find(|l| l.contains("neg")).expect("a neg instruction");
        assert!(!neg_line.contains(','), "neg should take a single operand, got {neg_line:?}");
    }

    #[test]
    fn mem_to_mem_move_is_split_through_the_scratch_register() {
        let i32_ty = Type::con(TypeKind::I32);
        let dst = Operand::mem(i32_ty.clone(), -4);
        let src = Operand::mem(i32_ty, -8);
        let lines = run(vec![Command::two(CommandTag::Move, dst, src)]);
        assert!(lines.iter().any(|l| l.contains("%r10")));
    }

    #[test]
    fn widening_move_picks_the_sign_extend_variant_for_signed_types() {
        let i8_ty = Type::con(TypeKind::I8);
        let i32_ty = Type::con(TypeKind::I32);
        let dst = Operand::reg(i32_ty, RegisterName::Ret);
        let src = Operand::reg(i8_ty, RegisterName::CP1);
        let lines = run(vec![Command::two(CommandTag::Move, dst, src)]);
        assert!(lines.iter().any(|l| l.contains("movsbl")));
    }

    #[test]
    fn call_target_has_no_immediate_prefix() {
        let lines = run(vec![Command::one(CommandTag::Call, Operand::imm(Type::none(), "_Z3foov"))]);
        assert!(lines.iter().any(|l| l.trim() == "call _Z3foov"));
    }
}
