//! Thin CLI driver (spec.md §6 "CLI surface"). Argument parsing and file I/O
//! are explicitly out of scope for the compiler proper (spec.md §1); this
//! binary only exists so the crate is a runnable repository, wiring
//! `Ast::parse_stub -> linearizer -> regalloc -> codegen` (folded into
//! [`substratumc::compile`]) and writing the result to `-o`.

use clap::Parser;
use std::fs;
use std::process::ExitCode;
use substratumc::ast::Ast;
use substratumc::config::{CompilerContext, IncludePaths, Verbosity};
use substratumc::error::CompileError;

/// `substratumc`: compile a Substratum source file to RISC-V 64 assembly.
#[derive(Debug, Parser)]
#[command(name = "substratumc")]
struct Cli {
  /// Input source file.
  #[arg(short = 'i', long = "input")]
  input: String,

  /// Output assembly file.
  #[arg(short = 'o', long = "output")]
  output: String,

  /// Include search path; repeatable.
  #[arg(short = 'I', long = "include")]
  include: Vec<String>,

  /// Verbosity digits: one digit sets all stages, four sets them
  /// independently (parse/linearize/regalloc/codegen), each `0..2`.
  #[arg(short = 'v', long = "verbosity", default_value = "0")]
  verbosity: String,
}

fn run(cli: Cli) -> Result<(), CompileError> {
  let verbosity = Verbosity::parse(&cli.verbosity)?;
  let ctx = CompilerContext::new(verbosity, IncludePaths(cli.include));

  let source = fs::read_to_string(&cli.input).map_err(|e| CompileError::Invocation(format!("cannot read {}: {e}", cli.input)))?;

  if verbosity.parse.at_least(substratumc::config::Level::NORMAL) {
    log::info!("parsing {}", cli.input);
  }
  let ast = {
    let mut dict = ctx.dict.borrow_mut();
    let file = dict.intern(&cli.input);
    Ast::parse_stub(&source, file, &mut dict)
  };

  let asm = substratumc::compile(&ast, &ctx, &cli.input)?;

  fs::write(&cli.output, asm).map_err(|e| CompileError::Invocation(format!("cannot write {}: {e}", cli.output)))?;
  Ok(())
}

fn main() -> ExitCode {
  env_logger::init();
  let cli = Cli::parse();
  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("{e}");
      ExitCode::from(e.exit_code() as u8)
    }
  }
}
