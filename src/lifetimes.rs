//! Lifetime analysis (spec.md §4.F "Lifetime analysis").
//!
//! Grounded on `original_source/compiler/regalloc.c` (`calculateRegisterLoading`,
//! the `do`/`enddo` overlap bookkeeping) and `include/tac.h`'s `struct
//! Lifetime`. Runs once per function (and once more, with a synthetic
//! function-shaped view, over the global init block) after the linearizer and
//! before register allocation.

use crate::idx::{FunctionId, VariableId};
use crate::intern::{Dictionary, Symbol};
use crate::symtab::{Residency, SymbolTable};
use crate::tac::{BasicBlock, Op, Payload, Slot};
use crate::types::Type;
use hashbrown::HashMap;

/// `struct Lifetime` (spec.md §3 "Lifetimes"). `start`/`end` are inclusive
/// TAC indices in the function-wide index space (spec.md §3 "TAC
/// instruction").
#[derive(Clone, Debug)]
pub struct Lifetime {
  pub name: Symbol,
  /// The backing variable, when this name resolves to a declared local,
  /// argument, or global rather than a bare `.tN` temp.
  pub variable: Option<VariableId>,
  pub ty: Type,
  pub start: u32,
  pub end: u32,
  pub n_reads: u32,
  pub n_writes: u32,
  pub is_argument: bool,
  pub residency: Residency,
}

/// Per-function lifetime table, plus the per-index overlap lists computed by
/// `generate_lifetime_overlaps` (spec.md §4.F).
pub struct LifetimeTable {
  pub lifetimes: Vec<Lifetime>,
  /// `overlaps[i]` holds the indices into `lifetimes` that are alive at TAC
  /// index `i` (spec.md §4.F `generateLifetimeOverlaps`).
  pub overlaps: Vec<Vec<usize>>,
  pub max_concurrent: usize,
}

/// `findLifetimes` for a defined function: walks every basic block's TAC in
/// emission order (function-wide indices, so cross-block comparisons are
/// valid), seeding one lifetime per distinct operand name on first sight.
pub fn find_lifetimes(st: &SymbolTable, function: FunctionId, dict: &Dictionary) -> LifetimeTable {
  let func = &st.functions[function];
  let mut by_name: HashMap<Symbol, usize> = HashMap::new();
  let mut lifetimes: Vec<Lifetime> = Vec::new();

  // Arguments are born at index 0 with `isArgument = true` (spec.md §4.F
  // point 1), whether or not the body ever reads them.
  for &vid in &func.arguments {
    let var = &st.variables[vid];
    let idx = lifetimes.len();
    by_name.insert(var.name, idx);
    lifetimes.push(Lifetime {
      name: var.name,
      variable: Some(vid),
      ty: var.ty.clone(),
      start: 0,
      end: 0,
      n_reads: 0,
      n_writes: 0,
      is_argument: true,
      residency: seed_residency(var),
    });
  }

  let mut do_stack: Vec<u32> = Vec::new();

  for block in &func.basic_blocks {
    for line in &block.tac {
      match line.op {
        Op::Do => {
          do_stack.push(line.index);
          continue;
        }
        Op::EndDo => {
          let pushed = do_stack.pop().unwrap_or(line.index);
          for lt in &mut lifetimes {
            if is_temp(dict, lt.name) {
              continue;
            }
            if lt.end >= pushed && lt.end < line.index {
              lt.end = line.index + 1;
            }
          }
          continue;
        }
        _ => {}
      }
      for (slot_idx, slot) in line.operands.iter().enumerate() {
        let Slot::Operand(op) = slot else { continue };
        if op.is_literal() {
          continue;
        }
        let Payload::Name(name) = op.payload else { continue };
        let is_write = slot_is_write(line.op, slot_idx);
        let lt_idx = *by_name.entry(name).or_insert_with(|| {
          let variable = lookup_variable(st, function, name);
          let ty = variable.map_or_else(|| op.effective_type().clone(), |v| st.variables[v].ty.clone());
          let residency = variable.map_or(Residency::Unknown, |v| seed_residency(&st.variables[v]));
          lifetimes.push(Lifetime {
            name,
            variable,
            ty,
            start: line.index,
            end: line.index,
            n_reads: 0,
            n_writes: 0,
            is_argument: false,
            residency,
          });
          lifetimes.len() - 1
        });
        let lt = &mut lifetimes[lt_idx];
        lt.end = lt.end.max(line.index);
        if is_write {
          lt.n_writes += 1;
        } else {
          lt.n_reads += 1;
        }
      }
    }
  }

  let max_index = func.basic_blocks.iter().flat_map(|b| b.tac.iter()).map(|l| l.index).max().unwrap_or(0);
  let overlaps = generate_lifetime_overlaps(&lifetimes, max_index);
  let max_concurrent = overlaps.iter().map(Vec::len).max().unwrap_or(0);
  LifetimeTable { lifetimes, overlaps, max_concurrent }
}

/// Lifetime analysis over a single owner-less block (spec.md §4.H "Global
/// basic block 0: ... allocate a fresh lifetime list just for this block").
pub fn find_lifetimes_in_block(block: &BasicBlock, dict: &Dictionary) -> LifetimeTable {
  let mut by_name: HashMap<Symbol, usize> = HashMap::new();
  let mut lifetimes: Vec<Lifetime> = Vec::new();
  let mut do_stack: Vec<u32> = Vec::new();

  for line in &block.tac {
    match line.op {
      Op::Do => {
        do_stack.push(line.index);
        continue;
      }
      Op::EndDo => {
        let pushed = do_stack.pop().unwrap_or(line.index);
        for lt in &mut lifetimes {
          if is_temp(dict, lt.name) {
            continue;
          }
          if lt.end >= pushed && lt.end < line.index {
            lt.end = line.index + 1;
          }
        }
        continue;
      }
      _ => {}
    }
    for (slot_idx, slot) in line.operands.iter().enumerate() {
      let Slot::Operand(op) = slot else { continue };
      if op.is_literal() {
        continue;
      }
      let Payload::Name(name) = op.payload else { continue };
      let is_write = slot_is_write(line.op, slot_idx);
      let lt_idx = *by_name.entry(name).or_insert_with(|| {
        lifetimes.push(Lifetime {
          name,
          variable: None,
          ty: op.effective_type().clone(),
          start: line.index,
          end: line.index,
          n_reads: 0,
          n_writes: 0,
          is_argument: false,
          residency: Residency::Unknown,
        });
        lifetimes.len() - 1
      });
      let lt = &mut lifetimes[lt_idx];
      lt.end = lt.end.max(line.index);
      if is_write {
        lt.n_writes += 1;
      } else {
        lt.n_reads += 1;
      }
    }
  }

  let max_index = block.tac.iter().map(|l| l.index).max().unwrap_or(0);
  let overlaps = generate_lifetime_overlaps(&lifetimes, max_index);
  let max_concurrent = overlaps.iter().map(Vec::len).max().unwrap_or(0);
  LifetimeTable { lifetimes, overlaps, max_concurrent }
}

/// `generateLifetimeOverlaps`: for each lifetime, append its index to every
/// per-TAC-index bucket in `[start..=end]` (spec.md §4.F).
fn generate_lifetime_overlaps(lifetimes: &[Lifetime], max_index: u32) -> Vec<Vec<usize>> {
  let mut overlaps = vec![Vec::new(); max_index as usize + 1];
  for (i, lt) in lifetimes.iter().enumerate() {
    for bucket in overlaps.iter_mut().take(lt.end as usize + 1).skip(lt.start as usize) {
      bucket.push(i);
    }
  }
  overlaps
}

fn is_temp(dict: &Dictionary, name: Symbol) -> bool {
  dict.resolve(name).starts_with('.')
}

fn lookup_variable(st: &SymbolTable, function: FunctionId, name: Symbol) -> Option<VariableId> {
  let main_scope = st.functions[function].main_scope;
  match st.lookup(main_scope, name) {
    Some(crate::symtab::ScopeMember::Variable(v) | crate::symtab::ScopeMember::Argument(v)) => Some(v),
    _ => None,
  }
}

/// **Residency seed** (spec.md §4.F): must-spill, struct-valued, or array
/// variables start life on the stack; globals start on the global; anything
/// else is a register candidate.
fn seed_residency(var: &crate::symtab::VariableEntry) -> Residency {
  if var.is_global {
    Residency::Global
  } else if var.must_spill || var.ty.basic == crate::types::BasicType::Struct || var.ty.is_array() {
    Residency::Stack
  } else {
    Residency::Unknown
  }
}

/// Per-op-slot read/write classification (spec.md §6 operand-slot table):
/// slot 0 is a write for value-producing ops, a read for branch labels,
/// memory-address forms, and `stack_store`/`return`.
fn slot_is_write(op: Op, slot_idx: usize) -> bool {
  match op {
    Op::Assign
    | Op::Add
    | Op::Sub
    | Op::Mul
    | Op::Div
    | Op::Mod
    | Op::LShift
    | Op::RShift
    | Op::BitwiseAnd
    | Op::BitwiseOr
    | Op::BitwiseXor
    | Op::BitwiseNot
    | Op::Load
    | Op::LoadOff
    | Op::LoadArr
    | Op::AddrOf
    | Op::LeaOff
    | Op::LeaArr => slot_idx == 0,
    Op::Call => slot_idx == 0,
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::idx::ScopeId;
  use crate::symtab::{FunctionEntry, Scope, VariableEntry};
  use crate::tac::{Operand, SourceRef, TacLine};
  use crate::types::BasicType;

  fn src() -> SourceRef { SourceRef { line: 1, col: 1 } }

  fn setup_function(st: &mut SymbolTable, dict: &mut crate::intern::Dictionary) -> FunctionId {
    let main_scope = st.scopes.push(Scope { parent_scope: Some(st.global_scope), ..Scope::default() });
    let fid = st.functions.push(FunctionEntry {
      name: dict.intern("f"),
      return_type: Type::scalar(BasicType::U32),
      arg_stack_size: 0,
      arguments: Vec::new(),
      main_scope,
      basic_blocks: Vec::new(),
      is_defined: true,
      is_asm_fun: false,
      calls_other_function: false,
    });
    st.scopes[main_scope].parent_function = Some(fid);
    fid
  }

  #[test]
  fn argument_born_at_zero() {
    let mut dict = crate::intern::Dictionary::new();
    let mut st = SymbolTable::new();
    let fid = setup_function(&mut st, &mut dict);
    let n = dict.intern("n");
    let vid = st.variables.push(VariableEntry::new(n, Type::scalar(BasicType::U32)));
    st.functions[fid].arguments.push(vid);
    st.insert(st.functions[fid].main_scope, n, crate::symtab::ScopeMember::Argument(vid), &dict).unwrap();

    let mut block = BasicBlock::new(0);
    block.append(TacLine::new(0, Op::Return, src()).with_slot(0, Slot::Operand(Operand::variable(n, Type::scalar(BasicType::U32)))));
    st.functions[fid].basic_blocks.push(block);

    let table = find_lifetimes(&st, fid, &dict);
    let lt = table.lifetimes.iter().find(|l| l.name == n).unwrap();
    assert!(lt.is_argument);
    assert_eq!(lt.start, 0);
    assert_eq!(lt.n_reads, 1);
  }

  #[test]
  fn enddo_extends_a_lifetime_last_touched_inside_the_loop_body() {
    let mut dict = crate::intern::Dictionary::new();
    let mut st = SymbolTable::new();
    let fid = setup_function(&mut st, &mut dict);
    let s = dict.intern("s");
    let other = dict.intern("other");
    let svid = st.variables.push(VariableEntry::new(s, Type::scalar(BasicType::U32)));
    st.insert(st.functions[fid].main_scope, s, crate::symtab::ScopeMember::Variable(svid), &dict).unwrap();

    let mut block = BasicBlock::new(0);
    // s = 0
    block.append(TacLine::new(0, Op::Assign, src()).with_slot(0, Slot::Operand(Operand::variable(s, Type::scalar(BasicType::U32)))).with_slot(1, Slot::Operand(Operand::literal(0, Type::scalar(BasicType::U32)))));
    block.append(TacLine::new(1, Op::Do, src()));
    // s = s + 1 (s's last touch is inside the loop body, at index 2)
    block.append(TacLine::new(2, Op::Add, src()).with_slot(0, Slot::Operand(Operand::variable(s, Type::scalar(BasicType::U32)))).with_slot(1, Slot::Operand(Operand::variable(s, Type::scalar(BasicType::U32)))).with_slot(2, Slot::Operand(Operand::literal(1, Type::scalar(BasicType::U32)))));
    block.append(TacLine::new(3, Op::EndDo, src()));
    // return other (s is never touched again, so any extension is visible)
    block.append(TacLine::new(4, Op::Return, src()).with_slot(0, Slot::Operand(Operand::variable(other, Type::scalar(BasicType::U32)))));
    st.functions[fid].basic_blocks.push(block);

    let table = find_lifetimes(&st, fid, &dict);
    let lt = table.lifetimes.iter().find(|l| l.name == s).unwrap();
    // Natural end from reads/writes alone would be 2; the enddo at index 3
    // (pushed = 1, now = 3) extends it to now + 1 = 4.
    assert_eq!(lt.end, 4);
  }

  #[test]
  fn temps_are_excluded_from_enddo_extension() {
    let mut dict = crate::intern::Dictionary::new();
    let mut st = SymbolTable::new();
    let fid = setup_function(&mut st, &mut dict);
    let t0 = dict.intern(".t0");

    let mut block = BasicBlock::new(0);
    block.append(TacLine::new(0, Op::Assign, src()).with_slot(0, Slot::Operand(Operand::temp(t0, Type::scalar(BasicType::U32)))).with_slot(1, Slot::Operand(Operand::literal(1, Type::scalar(BasicType::U32)))));
    block.append(TacLine::new(1, Op::Do, src()));
    block.append(TacLine::new(2, Op::EndDo, src()));
    st.functions[fid].basic_blocks.push(block);

    let table = find_lifetimes(&st, fid, &dict);
    let lt = table.lifetimes.iter().find(|l| l.name == t0).unwrap();
    assert_eq!(lt.end, 0);
  }

  #[test]
  fn overlap_buckets_cover_the_full_inclusive_range() {
    let mut dict = crate::intern::Dictionary::new();
    let name = dict.intern("x");
    let lifetimes = vec![Lifetime {
      name,
      variable: None,
      ty: Type::scalar(BasicType::U32),
      start: 1,
      end: 3,
      n_reads: 1,
      n_writes: 1,
      is_argument: false,
      residency: Residency::Unknown,
    }];
    let overlaps = generate_lifetime_overlaps(&lifetimes, 4);
    assert!(overlaps[0].is_empty());
    assert_eq!(overlaps[1], vec![0]);
    assert_eq!(overlaps[2], vec![0]);
    assert_eq!(overlaps[3], vec![0]);
    assert!(overlaps[4].is_empty());
  }
}
