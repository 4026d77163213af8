//! Middle and back end for the Substratum systems language (spec.md §1
//! "Scope"): typed TAC, AST-to-TAC lowering, lifetime analysis, linear-scan
//! register allocation, and RISC-V 64 code emission. Parsing and
//! assembling/linking are out of scope; this crate's public surface starts
//! at an already-built [`ast::Ast`] and ends at a textual `.s` file string.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod error;
pub mod idx;
pub mod intern;
pub mod lifetimes;
pub mod linearizer;
pub mod regalloc;
pub mod symtab;
pub mod tac;
pub mod types;

use crate::ast::Ast;
use crate::config::CompilerContext;
use crate::error::CompileError;

/// Run the whole pipeline (spec.md §4 "Pipeline order"): lower the AST to
/// TAC, run lifetime analysis and register allocation per function (folded
/// into [`codegen::generate_program`]'s per-function dispatch), then emit
/// RISC-V assembly. Logs a line per stage at [`config::Level::NORMAL`] or
/// above, mirroring the original driver's stage banners.
pub fn compile(ast: &Ast, ctx: &CompilerContext, source_file: &str) -> Result<String, CompileError> {
  let mut dict = ctx.dict.borrow_mut();

  if ctx.verbosity.linearize.at_least(config::Level::NORMAL) {
    log::info!("linearizing translation unit");
  }
  let mut program = linearizer::lower(ast, &mut dict)?;

  if ctx.verbosity.codegen.at_least(config::Level::NORMAL) {
    log::info!("generating code");
  }
  codegen::generate_program(&mut program, &dict, source_file)
}
