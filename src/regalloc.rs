//! Linear-scan register allocation (spec.md §4.G "Register allocator").
//!
//! Grounded on `original_source/compiler/regalloc.c` (`calculateRegisterLoading`,
//! `assignRegisters`, `layoutStackFrame`) and `original_source/regalloc_riscv.c`'s
//! `setupRiscvMachineContext`, which reserves `t0..t2` as scratch, treats
//! `a0` as the dedicated return-value/first-argument register, and splits
//! the remaining 22 general-purpose registers into 11 callee-saved (`s1..s11`)
//! and 11 caller-usable (`a1..a7`, `t3..t6`). Runs once per function, after
//! [`crate::lifetimes::find_lifetimes`] and before [`crate::codegen`].

use crate::idx::FunctionId;
use crate::intern::{Dictionary, Symbol};
use crate::internal_error;
use crate::error::CompileError;
use crate::lifetimes::{find_lifetimes, LifetimeTable};
use crate::symtab::{Residency, SymbolTable};
use hashbrown::HashMap;

/// Three scratch registers the code emitter keeps free of lifetime
/// assignments for intermediate address/offset computation (spec.md §4.G
/// "reserve three scratch registers").
pub const TEMP_0: &str = "t0";
pub const TEMP_1: &str = "t1";
pub const TEMP_2: &str = "t2";

/// Reserved to carry a call's or a function's return value; never handed out
/// to a lifetime by the allocator (spec.md §4.G, §4.H calling convention).
pub const RETURN_VALUE_REGISTER: &str = "a0";

/// The pool lifetimes with `Unknown` residency are assigned from, in
/// allocation-preference order: callee-saved `s`-registers first (they are
/// already accounted for in the prologue/epilogue bookkeeping below, so
/// using them is free once any is touched), then caller-saved argument and
/// temporary registers. 11 + 7 + 4 = 22 entries.
pub const REGISTER_POOL: [&str; 22] = [
  "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "a1", "a2", "a3", "a4", "a5", "a6", "a7", "t3", "t4", "t5", "t6",
];

/// `s1..s11`: the subset of [`REGISTER_POOL`] that must be saved/restored by
/// the prologue/epilogue if touched (spec.md §4.G "count callee-saved
/// registers touched").
const CALLEE_SAVED_PREFIX_LEN: usize = 11;

fn is_callee_saved(reg: &str) -> bool {
  REGISTER_POOL[..CALLEE_SAVED_PREFIX_LEN].contains(&reg)
}

/// `MACHINE_REGISTER_COUNT` (spec.md §4.G): the full allocatable integer
/// register file, excluding `zero, ra, sp, gp, tp, fp` (32 - 6 = 26), of
/// which the scratch trio and the return-value register are always reserved
/// ("while active lifetimes exceed `MACHINE_REGISTER_COUNT - 4`..."),
/// leaving exactly [`REGISTER_POOL`]'s 22 entries for contention.
pub const MACHINE_REGISTER_COUNT: usize = 26;
const RESERVED: usize = 4;

/// Concrete location a name resolved to, after allocation (spec.md §4.H
/// needs the register's asm name directly, not just a [`Residency`] tag).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assignment {
  Register(&'static str),
  /// Offset relative to `fp`, already final.
  Stack(i32),
  Global,
}

/// The stack frame shape the prologue/epilogue emit (spec.md §4.H "prologue").
#[derive(Clone, Debug, Default)]
pub struct FrameLayout {
  /// Bytes below `fp` occupied by spilled/stack-resident locals and temps,
  /// rounded up to a machine word.
  pub locals_size: u32,
  /// Callee-saved registers actually touched by this function's assignment,
  /// in the order the prologue should save them (and the epilogue restore
  /// them in reverse).
  pub callee_saved: Vec<&'static str>,
  /// Whether the prologue must save/restore `ra` (spec.md §4.G: "iff
  /// callsOtherFunction || isAsmFun").
  pub saves_ra: bool,
  /// `locals_size + 8*(callee_saved.len() + 1 + saves_ra as usize)`, rounded
  /// up to 16 bytes (spec.md §4.G "pad final frame to 16 bytes").
  pub total_size: u32,
}

/// Everything the code emitter needs about one function's register/stack
/// assignment.
pub struct RegisterAllocation {
  pub lifetimes: LifetimeTable,
  pub frame: FrameLayout,
  /// Final location of every name touched by this function's TAC, keyed by
  /// the same [`Symbol`] the TAC operands carry.
  pub assignments: HashMap<Symbol, Assignment>,
}

/// `assignRegisters` (spec.md §4.G), run top to bottom for one function:
/// compute lifetimes, spill under register pressure, assign the survivors to
/// concrete registers, then lay out the stack frame.
pub fn allocate(st: &mut SymbolTable, function: FunctionId, dict: &Dictionary) -> Result<RegisterAllocation, CompileError> {
  let mut table = find_lifetimes(st, function, dict);
  spill_under_pressure(&mut table);
  let reg_of = assign_registers(&table)?;

  let mut assignments: HashMap<Symbol, Assignment> = HashMap::new();
  for lt in &table.lifetimes {
    let assignment = match lt.residency {
      Residency::Global => Assignment::Global,
      Residency::Stack => Assignment::Stack(0), // patched below once offsets are known
      Residency::Register(_) | Residency::Unknown => {
        let idx = reg_of.get(&lt.name).copied().ok_or_else(|| internal_error!("no register assigned to live lifetime {:?}", lt.name))?;
        Assignment::Register(REGISTER_POOL[idx as usize])
      }
    };
    assignments.insert(lt.name, assignment);
  }

  let frame = layout_stack_frame(st, function, &table, &reg_of, &mut assignments)?;

  for lt in &mut table.lifetimes {
    if let Some(idx) = reg_of.get(&lt.name) {
      lt.residency = Residency::Register(*idx);
    }
  }
  for lt in &table.lifetimes {
    if let Some(vid) = lt.variable {
      st.variables[vid].residency = lt.residency;
    }
  }

  Ok(RegisterAllocation { lifetimes: table, frame, assignments })
}

/// Spill heuristic (spec.md §4.G): `h = (end - start + nReads) * nWrites *
/// (10 if not an argument else 1)`. Higher survives; lower is spilled first.
fn spill_heuristic(lt: &crate::lifetimes::Lifetime) -> u64 {
  let base = u64::from(lt.end - lt.start) + u64::from(lt.n_reads);
  let mut h = base * u64::from(lt.n_writes);
  if !lt.is_argument {
    h *= 10;
  }
  h
}

/// At every TAC index, while more `Unknown`-residency lifetimes are alive
/// than [`MACHINE_REGISTER_COUNT`] `- 4` allows, spill the one with the
/// lowest heuristic score (spec.md §4.G; ties keep whichever was seeded
/// first, matching `generateLifetimeOverlaps`' insertion order).
fn spill_under_pressure(table: &mut LifetimeTable) {
  let limit = MACHINE_REGISTER_COUNT - RESERVED;
  for bucket in &table.overlaps {
    loop {
      let mut active: Vec<usize> = bucket.iter().copied().filter(|&i| table.lifetimes[i].residency == Residency::Unknown).collect();
      if active.len() <= limit {
        break;
      }
      active.sort_by(|&a, &b| {
        spill_heuristic(&table.lifetimes[a]).cmp(&spill_heuristic(&table.lifetimes[b])).then(a.cmp(&b))
      });
      let victim = active[0];
      table.lifetimes[victim].residency = Residency::Stack;
    }
  }
}

/// Assignment sweep (spec.md §4.G): scan TAC indices in order, free
/// registers whose owner has expired, then hand the lowest free register in
/// [`REGISTER_POOL`] to each remaining `Unknown` lifetime still unassigned.
fn assign_registers(table: &LifetimeTable) -> Result<HashMap<Symbol, u8>, CompileError> {
  let mut reg_of: HashMap<Symbol, u8> = HashMap::new();
  let mut owner: [Option<usize>; REGISTER_POOL.len()] = [None; REGISTER_POOL.len()];

  for (i, bucket) in table.overlaps.iter().enumerate() {
    let index = i as u32;
    for slot in &mut owner {
      if let Some(owned) = *slot {
        if table.lifetimes[owned].end < index {
          *slot = None;
        }
      }
    }
    for &lt_idx in bucket {
      let lt = &table.lifetimes[lt_idx];
      if lt.residency != Residency::Unknown {
        continue;
      }
      if reg_of.contains_key(&lt.name) {
        continue;
      }
      let free = owner.iter().position(Option::is_none).ok_or_else(|| internal_error!("no free register for lifetime {:?} at index {}", lt.name, index))?;
      owner[free] = Some(lt_idx);
      reg_of.insert(lt.name, free as u8);
    }
  }
  Ok(reg_of)
}

/// Stack layout (spec.md §4.G "layoutStackFrame"): place spilled/struct/array
/// locals at decreasing offsets below `fp`, each padded to its own alignment,
/// sorted by descending size so the largest members land first; arguments
/// already carry their (positive, above-`fp`) offsets from the linearizer and
/// are left untouched. Then account for callee-saved registers, the always-
/// saved `fp`, and the conditionally saved `ra`, and round the whole frame up
/// to 16 bytes.
fn layout_stack_frame(
  st: &mut SymbolTable,
  function: FunctionId,
  table: &LifetimeTable,
  reg_of: &HashMap<Symbol, u8>,
  assignments: &mut HashMap<Symbol, Assignment>,
) -> Result<FrameLayout, CompileError> {
  let func = &st.functions[function];
  let is_argument_name: std::collections::HashSet<Symbol> = func.arguments.iter().map(|&vid| st.variables[vid].name).collect();

  let mut stack_locals: Vec<usize> = table
    .lifetimes
    .iter()
    .enumerate()
    .filter(|(_, lt)| lt.residency == Residency::Stack && !is_argument_name.contains(&lt.name))
    .map(|(i, _)| i)
    .collect();
  stack_locals.sort_by(|&a, &b| {
    let sa = st.size_of_type(&table.lifetimes[a].ty).unwrap_or(0);
    let sb = st.size_of_type(&table.lifetimes[b].ty).unwrap_or(0);
    sb.cmp(&sa).then(a.cmp(&b))
  });

  let mut cursor: u32 = 0;
  for &idx in &stack_locals {
    let lt = &table.lifetimes[idx];
    let align = st.alignment_of_type(&lt.ty)?;
    let size = st.size_of_type(&lt.ty)?;
    cursor = round_up(cursor, align);
    cursor += size;
    let offset = -(cursor as i32);
    if let Some(vid) = lt.variable {
      st.variables[vid].stack_offset = offset;
    }
    assignments.insert(lt.name, Assignment::Stack(offset));
  }
  let locals_size = round_up(cursor, crate::symtab::MACHINE_REGISTER_SIZE_BYTES);

  // Arguments keep the positive offsets the linearizer already assigned.
  for &vid in &func.arguments {
    let var = &st.variables[vid];
    assignments.insert(var.name, Assignment::Stack(var.stack_offset));
  }

  let mut callee_saved: Vec<&'static str> = REGISTER_POOL[..CALLEE_SAVED_PREFIX_LEN]
    .iter()
    .copied()
    .filter(|reg| reg_of.values().any(|&r| REGISTER_POOL[r as usize] == *reg) && is_callee_saved(reg))
    .collect();
  callee_saved.sort_unstable();
  callee_saved.dedup();

  let saves_ra = func.calls_other_function || func.is_asm_fun;
  let word = crate::symtab::MACHINE_REGISTER_SIZE_BYTES;
  let fixed = word * (callee_saved.len() as u32 + 1 + u32::from(saves_ra));
  let total_size = round_up(locals_size + fixed, 16);

  Ok(FrameLayout { locals_size, callee_saved, saves_ra, total_size })
}

fn round_up(value: u32, align: u32) -> u32 {
  if align <= 1 {
    return value;
  }
  let rem = value % align;
  if rem == 0 {
    value
  } else {
    value + (align - rem)
  }
}
