//! Three-address code: operands, instructions, and basic blocks
//! (spec.md §3 "TAC operand"/"TAC instruction"/"Basic block", §4.D, §6).
//!
//! Grounded on `original_source/include/tac.h` and `original_source/tac.c`.
//! The C union `name.{str,val}` plus a separate `permutation` tag becomes the
//! sum type [`Payload`] (spec.md §9 design note): "the source code's
//! `name.str`/`name.val` split is a C idiom, not a semantic one."

use crate::intern::{Dictionary, Symbol};
use crate::types::Type;
use std::fmt;

/// `enum variablePermutations` (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandKind {
  Standard,
  Temp,
  Literal,
  ObjPtr,
}

/// The two shapes a TAC operand's content can take.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
  /// An identifier or `.tN` temp name.
  Name(Symbol),
  /// A literal's immediate value (after numeric/char-literal canonicalisation).
  Literal(i64),
}

/// A value-carrying TAC operand (spec.md §3 "TAC operand").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operand {
  pub kind: OperandKind,
  pub payload: Payload,
  pub declared_type: Type,
  /// `castAsType.basic == null` in the original maps to `None` here.
  pub cast_as_type: Option<Type>,
}

impl Operand {
  #[must_use]
  pub fn variable(name: Symbol, ty: Type) -> Self {
    Self { kind: OperandKind::Standard, payload: Payload::Name(name), declared_type: ty, cast_as_type: None }
  }

  #[must_use]
  pub fn temp(name: Symbol, ty: Type) -> Self {
    Self { kind: OperandKind::Temp, payload: Payload::Name(name), declared_type: ty, cast_as_type: None }
  }

  #[must_use]
  pub fn literal(value: i64, ty: Type) -> Self {
    Self { kind: OperandKind::Literal, payload: Payload::Literal(value), declared_type: ty, cast_as_type: None }
  }

  #[must_use]
  pub fn with_cast(mut self, ty: Type) -> Self {
    self.cast_as_type = Some(ty);
    self
  }

  /// Effective type: `castAsType` when set, else `declaredType` (spec.md §3).
  #[must_use]
  pub fn effective_type(&self) -> &Type {
    self.cast_as_type.as_ref().unwrap_or(&self.declared_type)
  }

  #[must_use]
  pub fn is_literal(&self) -> bool { self.kind == OperandKind::Literal }

  /// The variable/temp name this operand reads or writes, if any.
  #[must_use]
  pub fn name(&self) -> Option<Symbol> {
    match (&self.kind, &self.payload) {
      (OperandKind::Literal, _) => None,
      (_, Payload::Name(s)) => Some(*s),
      _ => None,
    }
  }

  #[must_use]
  pub fn render(&self, dict: &Dictionary) -> String {
    match &self.payload {
      Payload::Name(s) => dict.resolve(*s).to_string(),
      Payload::Literal(v) => v.to_string(),
    }
  }
}

/// One of the four fixed operand slots, which may hold a value-carrying
/// [`Operand`] or one of the other slot shapes from spec.md §6's operand
/// table (`label`, `imm offset`, `log2 scale`, `callee name`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot {
  Empty,
  Operand(Operand),
  /// A basic block's `labelNum`, the target of a branch/jump.
  Label(u32),
  /// A byte offset immediate (`load_off`/`store_off`/`stack_store`).
  Offset(i64),
  /// `log2` of an array element's scale factor (`*_arr` ops).
  LogScale(u32),
  /// The callee's name for a `call` TAC.
  Callee(Symbol),
}

impl Slot {
  #[must_use]
  pub fn as_operand(&self) -> Option<&Operand> {
    match self {
      Slot::Operand(o) => Some(o),
      _ => None,
    }
  }

  #[must_use]
  pub fn as_label(&self) -> Option<u32> {
    match self {
      Slot::Label(l) => Some(*l),
      _ => None,
    }
  }
}

/// `enum TACType` (spec.md §4.D), restricted to the older-generation op set
/// that the distilled spec's operand-slot table (§6) actually documents —
/// per spec.md §9, where the two generations disagree this follows the one
/// the driver wires up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
  Asm,
  Assign,
  Add,
  Sub,
  Mul,
  Div,
  Mod,
  LShift,
  RShift,
  BitwiseAnd,
  BitwiseOr,
  BitwiseXor,
  BitwiseNot,
  Load,
  LoadOff,
  LoadArr,
  Store,
  StoreOff,
  StoreArr,
  AddrOf,
  LeaOff,
  LeaArr,
  Beq,
  Bne,
  Bgeu,
  Bltu,
  Bgtu,
  Bleu,
  Beqz,
  Bnez,
  Jmp,
  StackReserve,
  StackStore,
  Call,
  Label,
  Return,
  Do,
  EndDo,
}

impl Op {
  /// `getAsmOp`: the RISC-V mnemonic fragment for binary/unary arithmetic and
  /// branch ops. Ops with no single fixed mnemonic (`tt_asm`, `tt_assign`,
  /// memory/branch families whose mnemonic also depends on operand width or
  /// sign) return `None`; the code emitter (`crate::codegen`) computes those
  /// case by case.
  #[must_use]
  pub fn fixed_mnemonic(self) -> Option<&'static str> {
    match self {
      Op::Add => Some("add"),
      Op::Sub => Some("sub"),
      Op::Mul => Some("mul"),
      Op::Div => Some("divu"),
      Op::Mod => Some("remu"),
      Op::LShift => Some("sll"),
      Op::RShift => Some("srl"),
      Op::BitwiseAnd => Some("and"),
      Op::BitwiseOr => Some("or"),
      Op::BitwiseXor => Some("xor"),
      Op::BitwiseNot => Some("not"),
      Op::Beq => Some("beq"),
      Op::Bne => Some("bne"),
      Op::Bgeu => Some("bgeu"),
      Op::Bltu => Some("bltu"),
      Op::Bgtu => Some("bgtu"),
      Op::Bleu => Some("bleu"),
      Op::Beqz => Some("beqz"),
      Op::Bnez => Some("bnez"),
      Op::Jmp => Some("j"),
      Op::Call => Some("call"),
      _ => None,
    }
  }

  /// Whether this op is a conditional or unconditional branch whose slot 0
  /// is a label (spec.md §3 invariants).
  #[must_use]
  pub fn is_branch(self) -> bool {
    matches!(self, Op::Beq | Op::Bne | Op::Bgeu | Op::Bltu | Op::Bgtu | Op::Bleu | Op::Beqz | Op::Bnez | Op::Jmp)
  }
}

/// Source location attached to a TAC line for error messages and `.loc`
/// directives (spec.md §4.B `sourceFile`/`sourceLine`/`sourceCol`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceRef {
  pub line: u32,
  pub col: u32,
}

/// `struct TACLine` (spec.md §3 "TAC instruction").
#[derive(Clone, Debug)]
pub struct TacLine {
  pub op: Op,
  pub operands: [Slot; 4],
  /// Dense per-function index, assigned in emission order (spec.md §3
  /// invariants: "TAC indices are strictly monotonically increasing by 1"
  /// within a block).
  pub index: u32,
  /// Set only once code generation actually emits an instruction for this line.
  pub asm_index: Option<u32>,
  pub reorderable: bool,
  pub source: SourceRef,
  /// Raw asm text, populated only for `Op::Asm` lines.
  pub raw_asm: Option<String>,
}

impl TacLine {
  #[must_use]
  pub fn new(index: u32, op: Op, source: SourceRef) -> Self {
    Self {
      op,
      operands: [Slot::Empty, Slot::Empty, Slot::Empty, Slot::Empty],
      index,
      asm_index: None,
      reorderable: false,
      source,
      raw_asm: None,
    }
  }

  #[must_use]
  pub fn with_slot(mut self, i: usize, slot: Slot) -> Self {
    self.operands[i] = slot;
    self
  }

  /// `TACLine_isEffective`: every op except the lifetime-extension markers.
  #[must_use]
  pub fn is_effective(&self) -> bool {
    !matches!(self.op, Op::Do | Op::EndDo)
  }

  /// `sPrintTACLine`, a human-readable rendering used for the emitted asm's
  /// per-instruction comments (spec.md §4.H step 4).
  #[must_use]
  pub fn render(&self, dict: &Dictionary) -> String {
    let slot = |i: usize| -> String {
      match &self.operands[i] {
        Slot::Empty => String::new(),
        Slot::Operand(o) => o.render(dict),
        Slot::Label(l) => format!("basicblock{l}"),
        Slot::Offset(o) => o.to_string(),
        Slot::LogScale(s) => s.to_string(),
        Slot::Callee(s) => dict.resolve(*s).to_string(),
      }
    };
    match self.op {
      Op::Asm => format!("asm \"{}\"", self.raw_asm.as_deref().unwrap_or("")),
      Op::Assign => format!("{} = {}", slot(0), slot(1)),
      Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::LShift | Op::RShift
      | Op::BitwiseAnd | Op::BitwiseOr | Op::BitwiseXor => {
        format!("{} = {} {} {}", slot(0), slot(1), self.op.fixed_mnemonic().unwrap_or("?"), slot(2))
      }
      Op::BitwiseNot => format!("{} = ~{}", slot(0), slot(1)),
      Op::Load => format!("{} = *{}", slot(0), slot(1)),
      Op::LoadOff => format!("{} = *({} + {})", slot(0), slot(1), slot(2)),
      Op::LoadArr => format!("{} = *({} + {} << {})", slot(0), slot(1), slot(2), slot(3)),
      Op::Store => format!("*{} = {}", slot(0), slot(1)),
      Op::StoreOff => format!("*({} + {}) = {}", slot(0), slot(1), slot(2)),
      Op::StoreArr => format!("*({} + {} << {}) = {}", slot(0), slot(1), slot(2), slot(3)),
      Op::AddrOf => format!("{} = &{}", slot(0), slot(1)),
      Op::LeaOff => format!("{} = lea({} + {})", slot(0), slot(1), slot(2)),
      Op::LeaArr => format!("{} = lea({} + {} << {})", slot(0), slot(1), slot(2), slot(3)),
      Op::Beq | Op::Bne | Op::Bgeu | Op::Bltu | Op::Bgtu | Op::Bleu => {
        format!("{} {}, {}, {}", self.op.fixed_mnemonic().unwrap_or("?"), slot(1), slot(2), slot(0))
      }
      Op::Beqz | Op::Bnez => format!("{} {}, {}", self.op.fixed_mnemonic().unwrap_or("?"), slot(1), slot(0)),
      Op::Jmp => format!("jmp basicblock{}", self.operands[0].as_label().unwrap_or(0)),
      Op::StackReserve => format!("reserve {} bytes stack", slot(0)),
      Op::StackStore => format!("store {} at stack offset {}", slot(0), slot(1)),
      Op::Call => match &self.operands[0] {
        Slot::Operand(o) => format!("{} = call {}", o.render(dict), slot(1)),
        _ => format!("call {}", slot(1)),
      },
      Op::Label => format!("basicblock{}:", self.operands[0].as_label().unwrap_or(0)),
      Op::Return => format!("return {}", slot(0)),
      Op::Do => "do".to_string(),
      Op::EndDo => "enddo".to_string(),
    }
  }
}

/// `struct BasicBlock` (spec.md §3). Label `0` is always the function entry.
#[derive(Clone, Debug)]
pub struct BasicBlock {
  pub label_num: u32,
  pub tac: Vec<TacLine>,
  pub contains_effective_code: bool,
}

impl BasicBlock {
  #[must_use]
  pub fn new(label_num: u32) -> Self {
    Self { label_num, tac: Vec::new(), contains_effective_code: false }
  }

  pub fn append(&mut self, line: TacLine) {
    self.contains_effective_code |= line.is_effective();
    self.tac.push(line);
  }

  /// Spec.md §8 invariant 1: indices within a block are contiguous ascending
  /// by exactly 1.
  #[must_use]
  pub fn indices_are_contiguous(&self) -> bool {
    self.tac.windows(2).all(|w| w[1].index == w[0].index + 1)
  }
}

impl fmt::Display for SourceRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.line, self.col)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{BasicType, Type};

  fn src() -> SourceRef { SourceRef { line: 1, col: 1 } }

  #[test]
  fn effective_code_excludes_do_enddo() {
    assert!(!TacLine::new(0, Op::Do, src()).is_effective());
    assert!(!TacLine::new(0, Op::EndDo, src()).is_effective());
    assert!(TacLine::new(0, Op::Assign, src()).is_effective());
  }

  #[test]
  fn basic_block_tracks_effective_code() {
    let mut bb = BasicBlock::new(0);
    assert!(!bb.contains_effective_code);
    bb.append(TacLine::new(0, Op::Do, src()));
    assert!(!bb.contains_effective_code);
    bb.append(TacLine::new(1, Op::Assign, src()));
    assert!(bb.contains_effective_code);
  }

  #[test]
  fn contiguous_indices_invariant() {
    let mut bb = BasicBlock::new(0);
    bb.append(TacLine::new(0, Op::Assign, src()));
    bb.append(TacLine::new(1, Op::Assign, src()));
    bb.append(TacLine::new(2, Op::Assign, src()));
    assert!(bb.indices_are_contiguous());
  }

  #[test]
  fn operand_effective_type_falls_back_to_declared() {
    let u32t = Type::scalar(BasicType::U32);
    let u8t = Type::scalar(BasicType::U8);
    let mut dict = Dictionary::new();
    let sym = dict.intern("x");
    let op = Operand::variable(sym, u32t.clone());
    assert_eq!(*op.effective_type(), u32t);
    let cast = op.with_cast(u8t.clone());
    assert_eq!(*cast.effective_type(), u8t);
  }
}
