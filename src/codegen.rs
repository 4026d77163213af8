//! RISC-V 64 assembly emission (spec.md §4.H "Code emitter").
//!
//! Grounded on `original_source/codegen.c` (`generateCodeForProgram`'s global
//! iteration, `_start`/`.userstart`/`.rawasm` handling, variable section
//! placement) and `original_source/codegen_riscv.c` (width/sign selection,
//! frame store/load helpers, prologue/epilogue, `riscv_place_or_find_operand_in_register`).
//! Produces a single textual `.s` file string; assembling and linking it is
//! out of scope (spec.md §1).

use crate::error::CompileError;
use crate::idx::FunctionId;
use crate::internal_error;
use crate::intern::{Dictionary, Symbol};
use crate::linearizer::LoweredProgram;
use crate::regalloc::{self, Assignment, RegisterAllocation};
use crate::symtab::{InitData, ScopeMember, SymbolTable, MACHINE_REGISTER_SIZE_BYTES};
use crate::tac::{BasicBlock, Op, Operand, Payload, Slot, TacLine};
use hashbrown::HashMap;
use std::fmt::Write as _;

/// `generateCodeForProgram`: walk the global scope in declaration order,
/// emitting each function and global variable, then the two fixed-label
/// global basic blocks (spec.md §4.H "Global basic block 0"/"1"). Unlike the
/// original, `.userstart`/`.rawasm` are never interleaved with ordinary
/// global-scope entries here, because the linearizer never threads them
/// through `global_scope`'s entry list in the first place (see DESIGN.md).
pub fn generate_program(program: &mut LoweredProgram, dict: &Dictionary, source_file: &str) -> Result<String, CompileError> {
  let mut out = String::new();
  writeln!(out, "\t.file \"{source_file}\"").unwrap();
  writeln!(out, "\t.text").unwrap();
  let entries = program.symtab.scopes[program.symtab.global_scope].entries.clone();

  for (_, member) in &entries {
    match *member {
      ScopeMember::Function(fid) => emit_function(&mut out, program, fid, dict)?,
      ScopeMember::Variable(vid) => emit_global_variable(&mut out, &program.symtab, vid, dict)?,
      ScopeMember::Struct(_) | ScopeMember::SubScope(_) | ScopeMember::Argument(_) | ScopeMember::BasicBlock(_) => {}
    }
  }

  emit_global_init_block(&mut out, &program.symtab, &program.global_init, dict)?;
  emit_global_asm_block(&mut out, &program.global_asm)?;
  Ok(out)
}

fn emit_function(out: &mut String, program: &mut LoweredProgram, fid: FunctionId, dict: &Dictionary) -> Result<(), CompileError> {
  if !program.symtab.functions[fid].is_defined {
    return Ok(());
  }
  let name = dict.resolve(program.symtab.functions[fid].name).to_string();

  if name == "main" {
    writeln!(out, "\t.globl _start").unwrap();
    writeln!(out, "_start:").unwrap();
    writeln!(out, "\tli sp, 0x81000000").unwrap();
    writeln!(out, "\tcall main").unwrap();
    writeln!(out, "pgm_done:").unwrap();
    writeln!(out, "\twfi").unwrap();
    writeln!(out, "\tj pgm_done").unwrap();
  }

  writeln!(out, "\t.globl {name}").unwrap();
  writeln!(out, "\t.type {name}, @function").unwrap();
  generate_function_body(out, program, fid, &name, dict)?;
  writeln!(out, "\t.size {name}, .-{name}").unwrap();
  Ok(())
}

/// `Scope_getSizeOfType`-driven section placement for a single global
/// (spec.md §4.H "Variables"): extern variables emit nothing; initialized
/// string literals go to `.rodata`; other initialized globals go to `.data`;
/// uninitialized globals go to `.bss`.
fn emit_global_variable(out: &mut String, st: &SymbolTable, vid: crate::idx::VariableId, dict: &Dictionary) -> Result<(), CompileError> {
  let var = &st.variables[vid];
  if var.is_extern {
    return Ok(());
  }
  let name = dict.resolve(var.name).to_string();
  let size = st.size_of_type(&var.ty)?;
  let align = st.alignment_of_type(&var.ty)?;

  match &var.init {
    Some(_) if var.is_string_literal => writeln!(out, ".section .rodata").unwrap(),
    Some(_) => writeln!(out, ".section .data").unwrap(),
    None => writeln!(out, ".section .bss").unwrap(),
  }
  writeln!(out, "\t.globl {name}").unwrap();
  if align > 1 {
    writeln!(out, "\t.balign {align}").unwrap();
  }
  writeln!(out, "\t.type {name}, @object").unwrap();
  writeln!(out, "\t.size {name}, {size}").unwrap();
  writeln!(out, "{name}:").unwrap();
  match &var.init {
    Some(InitData::Bytes(bytes)) if var.is_string_literal => {
      writeln!(out, "\t.asciz \"{}\"", escape_asciz(&bytes[..bytes.len().saturating_sub(1)])).unwrap();
    }
    Some(InitData::Bytes(bytes)) => emit_byte_list(out, bytes),
    Some(InitData::Scalar(v)) => emit_byte_list(out, &v.to_le_bytes()[..size as usize]),
    None => {
      writeln!(out, "\t.zero {size}").unwrap();
    }
  }
  writeln!(out, ".section .text").unwrap();
  Ok(())
}

fn emit_byte_list(out: &mut String, bytes: &[u8]) {
  for chunk in bytes.chunks(12) {
    let rendered: Vec<String> = chunk.iter().map(u8::to_string).collect();
    writeln!(out, "\t.byte {}", rendered.join(", ")).unwrap();
  }
}

fn escape_asciz(bytes: &[u8]) -> String {
  let mut s = String::new();
  for &b in bytes {
    match b {
      b'"' => s.push_str("\\\""),
      b'\\' => s.push_str("\\\\"),
      b'\n' => s.push_str("\\n"),
      b'\t' => s.push_str("\\t"),
      0x20..=0x7e => s.push(b as char),
      _ => s.push_str(&format!("\\{b:03o}")),
    }
  }
  s
}

/// Global basic block 0 (spec.md §4.H): `.userstart`, its own fresh lifetime
/// table (not tied to any function). Names here are never register-resident
/// (no prologue/epilogue exists to save anything at file scope), so every
/// read/write of a global routes through `la`, matching the residency every
/// global variable is seeded with.
fn emit_global_init_block(out: &mut String, st: &SymbolTable, block: &BasicBlock, dict: &Dictionary) -> Result<(), CompileError> {
  if block.tac.is_empty() {
    return Ok(());
  }
  writeln!(out, ".userstart:").unwrap();
  let assignments: HashMap<Symbol, Assignment> = HashMap::new();
  let mut state = FnCodegenState { last_line: None };
  for tac in &block.tac {
    emit_tac_line(out, st, &mut state, tac, &assignments, None, dict)?;
  }
  Ok(())
}

/// Global basic block 1 (spec.md §4.H): every line must be a raw `asm`
/// passthrough; anything else is an internal error.
fn emit_global_asm_block(out: &mut String, block: &BasicBlock) -> Result<(), CompileError> {
  if block.tac.is_empty() {
    return Ok(());
  }
  writeln!(out, ".rawasm:").unwrap();
  for tac in &block.tac {
    if tac.op != Op::Asm {
      return Err(internal_error!("unexpected TAC op {:?} in global asm block", tac.op));
    }
    writeln!(out, "{}", tac.raw_asm.as_deref().unwrap_or("")).unwrap();
  }
  Ok(())
}

struct FnCodegenState {
  last_line: Option<u32>,
}

/// `generateCodeForFunction` (spec.md §4.H): run the register allocator,
/// emit the prologue, the body (one label per basic block plus one
/// instruction selection per effective TAC line), then the epilogue.
fn generate_function_body(out: &mut String, program: &mut LoweredProgram, fid: FunctionId, name: &str, dict: &Dictionary) -> Result<(), CompileError> {
  let alloc = regalloc::allocate(&mut program.symtab, fid, dict)?;
  let st = &program.symtab;

  writeln!(out, "\t.align 2").unwrap();
  writeln!(out, "{name}:").unwrap();
  let (line, col) = st.functions[fid]
    .basic_blocks
    .first()
    .and_then(|b| b.tac.first())
    .map_or((1, 1), |t| (t.source.line, t.source.col));
  writeln!(out, "\t.loc 1 {line} {col}").unwrap();
  writeln!(out, "\t.cfi_startproc").unwrap();

  emit_prologue(out, &alloc);

  let mut state = FnCodegenState { last_line: None };
  for block in &st.functions[fid].basic_blocks {
    writeln!(out, "{name}_basicblock{}:", block.label_num).unwrap();
    for tac in &block.tac {
      emit_tac_line(out, st, &mut state, tac, &alloc.assignments, Some(name), dict)?;
    }
  }

  emit_epilogue(out, &alloc, &st.functions[fid], name);
  writeln!(out, "\t.cfi_endproc").unwrap();
  Ok(())
}

/// Prologue (spec.md §4.H): always save `fp`, conditionally save `ra`, set up
/// the frame, and save the callee-saved registers this function actually
/// touches. Arguments stay exactly where the linearizer placed them (positive
/// offsets above `fp`, spec.md §4.G "argument stack offsets are left
/// untouched") — nothing needs to be shuffled into registers here; reads of
/// an argument load from that slot the same way any other stack-resident
/// name does.
fn emit_prologue(out: &mut String, alloc: &RegisterAllocation) {
  writeln!(out, "\t.cfi_def_cfa_offset {MACHINE_REGISTER_SIZE_BYTES}").unwrap();
  writeln!(out, "\tsd fp, -{MACHINE_REGISTER_SIZE_BYTES}(sp)").unwrap();
  if alloc.frame.saves_ra {
    writeln!(out, "\tsd ra, -{}(sp)", 2 * MACHINE_REGISTER_SIZE_BYTES).unwrap();
  }
  writeln!(out, "\tmv fp, sp").unwrap();
  writeln!(out, "\t#reserve space for locals and callee-saved registers").unwrap();
  writeln!(out, "\taddi sp, sp, -{}", alloc.frame.total_size).unwrap();

  if !alloc.frame.callee_saved.is_empty() {
    writeln!(out, "\t#callee-save registers").unwrap();
    for (i, reg) in alloc.frame.callee_saved.iter().enumerate() {
      let off = -((i as i64 + 2 + alloc.frame.saves_ra as i64) * i64::from(MACHINE_REGISTER_SIZE_BYTES));
      writeln!(out, "\tsd {reg}, {off}(fp)").unwrap();
    }
  }
}

/// Epilogue (spec.md §4.H): `<fn>_done:` label, restore callee-saved
/// registers in reverse, reload `fp`/`ra`, deallocate the frame and the
/// argument area, then return via `jalr`.
fn emit_epilogue(out: &mut String, alloc: &RegisterAllocation, func: &crate::symtab::FunctionEntry, name: &str) {
  writeln!(out, "{name}_done:").unwrap();
  if !alloc.frame.callee_saved.is_empty() {
    writeln!(out, "\t#callee-restore registers").unwrap();
    for (i, reg) in alloc.frame.callee_saved.iter().enumerate().rev() {
      let off = -((i as i64 + 2 + alloc.frame.saves_ra as i64) * i64::from(MACHINE_REGISTER_SIZE_BYTES));
      writeln!(out, "\tld {reg}, {off}(fp)").unwrap();
    }
  }
  writeln!(out, "\taddi sp, sp, {}", alloc.frame.total_size).unwrap();
  writeln!(out, "\tld fp, -{MACHINE_REGISTER_SIZE_BYTES}(sp)").unwrap();
  if alloc.frame.saves_ra {
    writeln!(out, "\tld ra, -{}(sp)", 2 * MACHINE_REGISTER_SIZE_BYTES).unwrap();
  }
  writeln!(out, "\taddi sp, sp, {}", func.arg_stack_size).unwrap();
  writeln!(out, "\tjalr zero, 0(ra)").unwrap();
}

/// `riscv_select_width_char_for_size` plus `riscv_select_sign_for_load_char`
/// collapsed into one call: the mnemonic suffix for a load/store of `size`
/// bytes, and whether a *load* of that size needs the unsigned variant
/// (everything except 8 bytes, which has no unsigned encoding).
fn width_suffix(size: u32) -> Result<char, CompileError> {
  match size {
    1 => Ok('b'),
    2 => Ok('h'),
    4 => Ok('w'),
    8 => Ok('d'),
    _ => Err(internal_error!("unexpected operand size {size}, expected 1, 2, 4, or 8")),
  }
}

fn load_mnemonic(size: u32) -> Result<String, CompileError> {
  let c = width_suffix(size)?;
  Ok(if c == 'd' { "ld".to_string() } else { format!("l{c}u") })
}

fn store_mnemonic(size: u32) -> Result<String, CompileError> {
  Ok(format!("s{}", width_suffix(size)?))
}

fn operand_size(st: &SymbolTable, operand: &Operand) -> Result<u32, CompileError> {
  let ty = operand.effective_type();
  if ty.pointer_depth > 0 {
    return Ok(MACHINE_REGISTER_SIZE_BYTES);
  }
  Ok(st.size_of_type(ty)?)
}

fn operand_of(slot: &Slot) -> Result<&Operand, CompileError> {
  slot.as_operand().ok_or_else(|| internal_error!("expected an operand slot, found {:?}", slot))
}

fn offset_of(slot: &Slot) -> Result<i64, CompileError> {
  match slot {
    Slot::Offset(v) => Ok(*v),
    _ => Err(internal_error!("expected an offset slot, found {:?}", slot)),
  }
}

fn log_scale_of(slot: &Slot) -> Result<u32, CompileError> {
  match slot {
    Slot::LogScale(v) => Ok(*v),
    _ => Err(internal_error!("expected a log-scale slot, found {:?}", slot)),
  }
}

fn label_of(slot: &Slot) -> Result<u32, CompileError> {
  slot.as_label().ok_or_else(|| internal_error!("expected a label slot, found {:?}", slot))
}

/// Emit the instructions to get `operand`'s current value into some
/// register, using `scratch` if it has to be loaded or placed. Mirrors
/// `riscv_place_or_find_operand_in_register`: returns the register actually
/// holding the value (which may or may not be `scratch`).
fn place_operand(out: &mut String, st: &SymbolTable, operand: &Operand, assignments: &HashMap<Symbol, Assignment>, scratch: &str, dict: &Dictionary) -> Result<String, CompileError> {
  match &operand.payload {
    Payload::Literal(v) => {
      writeln!(out, "\tli {scratch}, {v}").unwrap();
      Ok(scratch.to_string())
    }
    Payload::Name(name) => match assignments.get(name).copied().unwrap_or(Assignment::Global) {
      Assignment::Register(r) => Ok(r.to_string()),
      Assignment::Stack(offset) => {
        let size = operand_size(st, operand)?;
        writeln!(out, "\t{} {scratch}, {offset}(fp)", load_mnemonic(size)?).unwrap();
        Ok(scratch.to_string())
      }
      Assignment::Global => {
        let label = dict.resolve(*name);
        writeln!(out, "\tla {scratch}, {label}").unwrap();
        if !operand.effective_type().is_array() {
          let size = operand_size(st, operand)?;
          writeln!(out, "\t{} {scratch}, 0({scratch})", load_mnemonic(size)?).unwrap();
        }
        Ok(scratch.to_string())
      }
    },
  }
}

/// Write `value_reg` back to wherever `operand` (a write destination) lives.
fn write_back(out: &mut String, st: &SymbolTable, operand: &Operand, assignments: &HashMap<Symbol, Assignment>, value_reg: &str, dict: &Dictionary) -> Result<(), CompileError> {
  let Payload::Name(name) = &operand.payload else {
    return Err(internal_error!("attempted to write back to a literal operand"));
  };
  match assignments.get(name).copied().unwrap_or(Assignment::Global) {
    Assignment::Register(r) => {
      if r != value_reg {
        writeln!(out, "\tmv {r}, {value_reg}").unwrap();
      }
    }
    Assignment::Stack(offset) => {
      let size = operand_size(st, operand)?;
      writeln!(out, "\t{} {value_reg}, {offset}(fp)", store_mnemonic(size)?).unwrap();
    }
    Assignment::Global => {
      let label = dict.resolve(*name);
      writeln!(out, "\tla {}, {label}", regalloc::TEMP_2).unwrap();
      let size = operand_size(st, operand)?;
      writeln!(out, "\t{} {value_reg}, 0({})", store_mnemonic(size)?, regalloc::TEMP_2).unwrap();
    }
  }
  Ok(())
}

/// `AddrOf` source must already be stack- or global-resident (spec.md §4.G,
/// "address-of forcing spill"); computes its address into `scratch` rather
/// than loading its value.
fn emit_address_of(out: &mut String, operand: &Operand, assignments: &HashMap<Symbol, Assignment>, scratch: &str, dict: &Dictionary) -> Result<(), CompileError> {
  let Payload::Name(name) = &operand.payload else {
    return Err(internal_error!("cannot take the address of a literal"));
  };
  match assignments.get(name).copied().unwrap_or(Assignment::Global) {
    Assignment::Register(_) => Err(internal_error!("address-of target {:?} was assigned a register, not a stack/global slot", name)),
    Assignment::Stack(offset) => {
      writeln!(out, "\taddi {scratch}, fp, {offset}").unwrap();
      Ok(())
    }
    Assignment::Global => {
      let label = dict.resolve(*name);
      writeln!(out, "\tla {scratch}, {label}").unwrap();
      Ok(())
    }
  }
}

/// Struct assignment (spec.md §4.H "Struct copy"): addresses of both sides
/// computed the same way `AddrOf` does, then an unrolled 8-byte-chunk copy
/// with a trailing byte-at-a-time remainder.
fn emit_struct_copy(out: &mut String, st: &SymbolTable, dest: &Operand, src: &Operand, assignments: &HashMap<Symbol, Assignment>, dict: &Dictionary) -> Result<(), CompileError> {
  emit_address_of(out, dest, assignments, regalloc::TEMP_0, dict)?;
  emit_address_of(out, src, assignments, regalloc::TEMP_1, dict)?;
  let size = st.size_of_type(dest.effective_type())?;
  let mut off = 0u32;
  while size - off >= 8 {
    writeln!(out, "\tld {}, {off}({})", regalloc::TEMP_2, regalloc::TEMP_1).unwrap();
    writeln!(out, "\tsd {}, {off}({})", regalloc::TEMP_2, regalloc::TEMP_0).unwrap();
    off += 8;
  }
  while off < size {
    writeln!(out, "\tlb {}, {off}({})", regalloc::TEMP_2, regalloc::TEMP_1).unwrap();
    writeln!(out, "\tsb {}, {off}({})", regalloc::TEMP_2, regalloc::TEMP_0).unwrap();
    off += 1;
  }
  Ok(())
}

/// Instruction selection for one TAC line (spec.md §4.H step 4): emit a
/// render-derived comment, a `.loc` if the source line advanced, then the
/// concrete RISC-V for this op.
fn emit_tac_line(
  out: &mut String,
  st: &SymbolTable,
  state: &mut FnCodegenState,
  tac: &TacLine,
  assignments: &HashMap<Symbol, Assignment>,
  fn_name: Option<&str>,
  dict: &Dictionary,
) -> Result<(), CompileError> {
  if matches!(tac.op, Op::Do | Op::EndDo) {
    return Ok(());
  }
  if state.last_line != Some(tac.source.line) {
    writeln!(out, "\t.loc 1 {}", tac.source.line).unwrap();
    state.last_line = Some(tac.source.line);
  }
  writeln!(out, "\t# {}", tac.render(dict)).unwrap();
  emit_op(out, st, tac, assignments, fn_name, dict)
}

fn emit_op(out: &mut String, st: &SymbolTable, tac: &TacLine, assignments: &HashMap<Symbol, Assignment>, fn_name: Option<&str>, dict: &Dictionary) -> Result<(), CompileError> {
  match tac.op {
    Op::Asm => {
      writeln!(out, "{}", tac.raw_asm.as_deref().unwrap_or("")).unwrap();
    }
    Op::Return => {
      if let Slot::Operand(op) = &tac.operands[0] {
        let reg = place_operand(out, st, op, assignments, regalloc::TEMP_0, dict)?;
        if reg != regalloc::RETURN_VALUE_REGISTER {
          writeln!(out, "\tmv {}, {reg}", regalloc::RETURN_VALUE_REGISTER).unwrap();
        }
      }
      if let Some(name) = fn_name {
        writeln!(out, "\tj {name}_done").unwrap();
      }
    }
    Op::Jmp => {
      let label = label_of(&tac.operands[0])?;
      if let Some(name) = fn_name {
        writeln!(out, "\tj {name}_basicblock{label}").unwrap();
      }
    }
    Op::Beq | Op::Bne | Op::Bgeu | Op::Bltu | Op::Bgtu | Op::Bleu => {
      let label = label_of(&tac.operands[0])?;
      let lhs = operand_of(&tac.operands[1])?;
      let rhs = operand_of(&tac.operands[2])?;
      let l = place_operand(out, st, lhs, assignments, regalloc::TEMP_0, dict)?;
      let r = place_operand(out, st, rhs, assignments, regalloc::TEMP_1, dict)?;
      let mnemonic = tac.op.fixed_mnemonic().unwrap_or("beq");
      if let Some(name) = fn_name {
        writeln!(out, "\t{mnemonic} {l}, {r}, {name}_basicblock{label}").unwrap();
      }
    }
    Op::Beqz | Op::Bnez => {
      let label = label_of(&tac.operands[0])?;
      let v = operand_of(&tac.operands[1])?;
      let r = place_operand(out, st, v, assignments, regalloc::TEMP_0, dict)?;
      let mnemonic = tac.op.fixed_mnemonic().unwrap_or("beqz");
      if let Some(name) = fn_name {
        writeln!(out, "\t{mnemonic} {r}, {name}_basicblock{label}").unwrap();
      }
    }
    Op::Assign => {
      let dest = operand_of(&tac.operands[0])?;
      let src = operand_of(&tac.operands[1])?;
      if matches!(dest.effective_type().basic, crate::types::BasicType::Struct) {
        emit_struct_copy(out, st, dest, src, assignments, dict)?;
      } else {
        let r = place_operand(out, st, src, assignments, regalloc::TEMP_0, dict)?;
        write_back(out, st, dest, assignments, &r, dict)?;
      }
    }
    Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::LShift | Op::RShift | Op::BitwiseAnd | Op::BitwiseOr | Op::BitwiseXor => {
      let dest = operand_of(&tac.operands[0])?;
      let lhs = operand_of(&tac.operands[1])?;
      let rhs = operand_of(&tac.operands[2])?;
      let l = place_operand(out, st, lhs, assignments, regalloc::TEMP_0, dict)?;
      let r = place_operand(out, st, rhs, assignments, regalloc::TEMP_1, dict)?;
      let mnemonic = tac.op.fixed_mnemonic().unwrap_or("add");
      writeln!(out, "\t{mnemonic} {}, {l}, {r}", regalloc::TEMP_2).unwrap();
      write_back(out, st, dest, assignments, regalloc::TEMP_2, dict)?;
    }
    Op::BitwiseNot => {
      let dest = operand_of(&tac.operands[0])?;
      let src = operand_of(&tac.operands[1])?;
      let r = place_operand(out, st, src, assignments, regalloc::TEMP_0, dict)?;
      writeln!(out, "\tnot {}, {r}", regalloc::TEMP_2).unwrap();
      write_back(out, st, dest, assignments, regalloc::TEMP_2, dict)?;
    }
    Op::Load => {
      let dest = operand_of(&tac.operands[0])?;
      let ptr = operand_of(&tac.operands[1])?;
      let addr = place_operand(out, st, ptr, assignments, regalloc::TEMP_0, dict)?;
      let size = operand_size(st, dest)?;
      writeln!(out, "\t{} {}, 0({addr})", load_mnemonic(size)?, regalloc::TEMP_1).unwrap();
      write_back(out, st, dest, assignments, regalloc::TEMP_1, dict)?;
    }
    Op::LoadOff => {
      let dest = operand_of(&tac.operands[0])?;
      let base = operand_of(&tac.operands[1])?;
      let offset = offset_of(&tac.operands[2])?;
      let addr = place_operand(out, st, base, assignments, regalloc::TEMP_0, dict)?;
      let size = operand_size(st, dest)?;
      writeln!(out, "\t{} {}, {offset}({addr})", load_mnemonic(size)?, regalloc::TEMP_1).unwrap();
      write_back(out, st, dest, assignments, regalloc::TEMP_1, dict)?;
    }
    Op::LoadArr => {
      let dest = operand_of(&tac.operands[0])?;
      let base = operand_of(&tac.operands[1])?;
      let index = operand_of(&tac.operands[2])?;
      let scale = log_scale_of(&tac.operands[3])?;
      let base_reg = place_operand(out, st, base, assignments, regalloc::TEMP_0, dict)?;
      let idx_reg = place_operand(out, st, index, assignments, regalloc::TEMP_1, dict)?;
      if scale > 0 {
        writeln!(out, "\tslli {idx_reg}, {idx_reg}, {scale}").unwrap();
      }
      writeln!(out, "\tadd {}, {base_reg}, {idx_reg}", regalloc::TEMP_2).unwrap();
      let size = operand_size(st, dest)?;
      writeln!(out, "\t{} {}, 0({})", load_mnemonic(size)?, regalloc::TEMP_0, regalloc::TEMP_2).unwrap();
      write_back(out, st, dest, assignments, regalloc::TEMP_0, dict)?;
    }
    Op::Store => {
      let ptr = operand_of(&tac.operands[0])?;
      let value = operand_of(&tac.operands[1])?;
      let addr = place_operand(out, st, ptr, assignments, regalloc::TEMP_0, dict)?;
      let v = place_operand(out, st, value, assignments, regalloc::TEMP_1, dict)?;
      let size = operand_size(st, value)?;
      writeln!(out, "\t{} {v}, 0({addr})", store_mnemonic(size)?).unwrap();
    }
    Op::StoreOff => {
      let base = operand_of(&tac.operands[0])?;
      let offset = offset_of(&tac.operands[1])?;
      let value = operand_of(&tac.operands[2])?;
      let addr = place_operand(out, st, base, assignments, regalloc::TEMP_0, dict)?;
      let v = place_operand(out, st, value, assignments, regalloc::TEMP_1, dict)?;
      let size = operand_size(st, value)?;
      writeln!(out, "\t{} {v}, {offset}({addr})", store_mnemonic(size)?).unwrap();
    }
    Op::StoreArr => {
      let base = operand_of(&tac.operands[0])?;
      let index = operand_of(&tac.operands[1])?;
      let scale = log_scale_of(&tac.operands[2])?;
      let value = operand_of(&tac.operands[3])?;
      let base_reg = place_operand(out, st, base, assignments, regalloc::TEMP_0, dict)?;
      let idx_reg = place_operand(out, st, index, assignments, regalloc::TEMP_1, dict)?;
      if scale > 0 {
        writeln!(out, "\tslli {idx_reg}, {idx_reg}, {scale}").unwrap();
      }
      writeln!(out, "\tadd {}, {base_reg}, {idx_reg}", regalloc::TEMP_2).unwrap();
      let v = place_operand(out, st, value, assignments, regalloc::TEMP_0, dict)?;
      let size = operand_size(st, value)?;
      writeln!(out, "\t{} {v}, 0({})", store_mnemonic(size)?, regalloc::TEMP_2).unwrap();
    }
    Op::AddrOf => {
      let dest = operand_of(&tac.operands[0])?;
      let src = operand_of(&tac.operands[1])?;
      emit_address_of(out, src, assignments, regalloc::TEMP_0, dict)?;
      write_back(out, st, dest, assignments, regalloc::TEMP_0, dict)?;
    }
    Op::LeaOff => {
      let dest = operand_of(&tac.operands[0])?;
      let base = operand_of(&tac.operands[1])?;
      let offset = offset_of(&tac.operands[2])?;
      let base_reg = place_operand(out, st, base, assignments, regalloc::TEMP_0, dict)?;
      writeln!(out, "\taddi {}, {base_reg}, {offset}", regalloc::TEMP_1).unwrap();
      write_back(out, st, dest, assignments, regalloc::TEMP_1, dict)?;
    }
    Op::LeaArr => {
      let dest = operand_of(&tac.operands[0])?;
      let base = operand_of(&tac.operands[1])?;
      let index = operand_of(&tac.operands[2])?;
      let scale = log_scale_of(&tac.operands[3])?;
      let base_reg = place_operand(out, st, base, assignments, regalloc::TEMP_0, dict)?;
      let idx_reg = place_operand(out, st, index, assignments, regalloc::TEMP_1, dict)?;
      if scale > 0 {
        writeln!(out, "\tslli {idx_reg}, {idx_reg}, {scale}").unwrap();
      }
      writeln!(out, "\tadd {}, {base_reg}, {idx_reg}", regalloc::TEMP_2).unwrap();
      write_back(out, st, dest, assignments, regalloc::TEMP_2, dict)?;
    }
    Op::StackReserve => {
      let bytes = offset_of(&tac.operands[0])?;
      writeln!(out, "\taddi sp, sp, -{bytes}").unwrap();
    }
    Op::StackStore => {
      let value = operand_of(&tac.operands[0])?;
      let offset = offset_of(&tac.operands[1])?;
      let v = place_operand(out, st, value, assignments, regalloc::TEMP_0, dict)?;
      let size = operand_size(st, value)?;
      writeln!(out, "\t{} {v}, {offset}(sp)", store_mnemonic(size)?).unwrap();
    }
    Op::Call => {
      let Slot::Callee(callee) = &tac.operands[1] else {
        return Err(internal_error!("call TAC missing its callee slot"));
      };
      let callee_name = dict.resolve(*callee);
      writeln!(out, "\tcall {callee_name}").unwrap();
      if let Slot::Operand(dest) = &tac.operands[0] {
        write_back(out, st, dest, assignments, regalloc::RETURN_VALUE_REGISTER, dict)?;
      }
    }
    Op::Label => {}
    Op::Do | Op::EndDo => {}
  }
  Ok(())
}
