//! The middle-end of the compiler: scope/type checking and IR generation.

pub mod env;
pub mod infer;
pub mod tir;

pub use env::{Environment, EnvironmentStack, Function, Variable};
pub use infer::{EnvironmentAnalyzer, TypeAnalyzer};
pub use tir::{Command, CommandTag, IrGenerator, Operand, Register, RegisterName};
