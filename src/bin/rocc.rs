//! the main compiler binary. takes a source file and an optional target,
//! runs the full pipeline, and writes `rocout.lex`/`rocout.ir`/`rocout.s`.
//!
//! run with `--help` for more info.

use std::fs;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roc::back::Target;
use roc::diagnostics::CompileError;
use roc::front::lex::Lexer;
use roc::front::parse::parse;
use roc::middle::{EnvironmentAnalyzer, IrGenerator, TypeAnalyzer};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// the machine to emit assembly for
    #[arg(value_enum, long, default_value = "x86_64")]
    target: Target,
    /// log each pipeline stage at info level
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(
            if args.verbose { "roc=info".parse().unwrap() } else { "roc=warn".parse().unwrap() },
        ))
        .with_target(false)
        .without_time()
        .init();

    let source = match fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("couldn't read {}: {e}", args.file);
            return ExitCode::FAILURE;
        }
    };

    match compile(&source, args.target) {
        Ok(()) => ExitCode::SUCCESS,
        Err(errors) => {
            for e in &errors {
                e.report();
            }
            ExitCode::FAILURE
        }
    }
}

fn compile(source: &str, target: Target) -> Result<(), Vec<CompileError>> {
    let (tokens, lex_errors) = Lexer::new(source).run();
    if !lex_errors.is_empty() {
        return Err(lex_errors.into_iter().map(CompileError::Lexical).collect());
    }
    println!("Lexing completed.");
    info!(count = tokens.len(), "lexing completed");

    write_lines("rocout.lex", tokens.iter().map(ToString::to_string));

    let mut stmts = parse(tokens).map_err(|e| vec![e])?;
    println!("Parsing completed.");
    info!("parsing completed");

    TypeAnalyzer::new().run(&mut stmts)?;
    println!("Type analysis completed.");
    info!("type analysis completed");

    EnvironmentAnalyzer::new().run(&mut stmts)?;
    println!("Environment analysis completed.");
    info!("environment analysis completed");

    let commands = IrGenerator::new().run(&mut stmts);
    println!("Intermediate code generation completed.");
    info!(count = commands.len(), "intermediate code generation completed");

    write_lines("rocout.ir", commands.iter().map(ToString::to_string));

    let asm = target.emit(&commands);
    println!("{} code generation completed.", target_label(target));
    info!(count = asm.len(), "machine code generation completed");

    write_lines("rocout.s", asm);

    Ok(())
}

fn target_label(target: Target) -> &'static str {
    match target {
        Target::X86_64 => "GAS",
        Target::Aarch64 => "AArch64",
    }
}

fn write_lines(path: &str, lines: impl IntoIterator<Item = String>) {
    let mut file = fs::File::create(path).unwrap_or_else(|e| panic!("couldn't create {path}: {e}"));
    for line in lines {
        writeln!(file, "{line}").unwrap_or_else(|e| panic!("couldn't write {path}: {e}"));
    }
}
