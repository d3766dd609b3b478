//! The back-end of the compiler: two machine-specific emitters sharing one
//! contract, grounded in the original compiler's `MachineSpecificCodeGenerator`
//! base class (a virtual-dispatch skeleton here realized as a trait).

pub mod aarch64;
pub mod gas;

pub use aarch64::Aarch64Emitter;
pub use gas::GasEmitter;

use clap::ValueEnum;

use crate::middle::tir::Command;

/// Translates a flat command stream into ordered assembly text lines.
/// Both backends consume the whole IR vector at once rather than being fed
/// one command at a time, since neither needs to interleave emission with
/// anything else the driver does.
pub trait MachineEmitter {
    fn emit(self, commands: &[Command]) -> Vec<String>;
}

impl MachineEmitter for GasEmitter {
    fn emit(self, commands: &[Command]) -> Vec<String> {
        GasEmitter::emit(self, commands)
    }
}

impl MachineEmitter for Aarch64Emitter {
    fn emit(self, commands: &[Command]) -> Vec<String> {
        Aarch64Emitter::emit(self, commands)
    }
}

/// Which physical target an emitter produces assembly for; selects between
/// `back::gas` and `back::aarch64` in the driver.
#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum Target {
    #[value(name = "x86_64")]
    X86_64,
    #[value(name = "aarch64")]
    Aarch64,
}

impl Target {
    pub fn emit(self, commands: &[Command]) -> Vec<String> {
        match self {
            Target::X86_64 => MachineEmitter::emit(GasEmitter::new(), commands),
            Target::Aarch64 => MachineEmitter::emit(Aarch64Emitter::new(), commands),
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::X86_64
    }
}
