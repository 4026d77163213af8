//! Symbol table, scopes, functions, variables, and structs (spec.md §3
//! "Scope"/"Function"/"Variable"/"Struct or class", §4.C).
//!
//! Grounded on `original_source/symtab_scope.c`, `symtab_variable.c`,
//! `symtab_struct.c`, `symtab_function.c`, and `include/symtab.h`. Ownership
//! follows spec.md §5: a [`SymbolTable`] owns every [`Scope`], [`FunctionEntry`],
//! [`StructEntry`] and [`VariableEntry`] in flat arenas (spec.md §9's
//! arena-indexed-id recommendation); back-references (`parent_scope`,
//! `parent_function`) are [`crate::idx`] handles, not pointers.

use crate::idx::{FunctionId, IdxVec, ScopeId, StructId, VariableId};
use crate::intern::{Dictionary, Symbol};
use crate::tac::BasicBlock;
use crate::types::{BasicType, Type};
use hashbrown::HashMap;

pub const MACHINE_REGISTER_SIZE_BYTES: u32 = 8;

/// Compile-time initializer data for a global or a string literal
/// (`initializeTo`/`initializeArrayTo`, spec.md §3 "Types"). Kept on the
/// variable rather than the `Type` (see `src/types.rs` doc comment).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitData {
  Scalar(i64),
  Bytes(Vec<u8>),
}

/// `struct VariableEntry` (spec.md §3).
#[derive(Clone, Debug)]
pub struct VariableEntry {
  pub name: Symbol,
  pub ty: Type,
  /// Offset relative to `fp`; positive above for arguments, negative below
  /// for locals once the register allocator assigns stack slots.
  pub stack_offset: i32,
  pub must_spill: bool,
  pub is_global: bool,
  pub is_extern: bool,
  pub is_string_literal: bool,
  pub init: Option<InitData>,
  /// Decided by register allocation (spec.md §3 "Lifetimes", §4.G).
  pub residency: Residency,
}

impl VariableEntry {
  #[must_use]
  pub fn new(name: Symbol, ty: Type) -> Self {
    Self {
      name,
      ty,
      stack_offset: 0,
      must_spill: false,
      is_global: false,
      is_extern: false,
      is_string_literal: false,
      init: None,
      residency: Residency::Unknown,
    }
  }
}

/// Where the register allocator decided a variable lives (spec.md §3
/// "Lifetimes", GLOSSARY "Residency").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
  Register(u8),
  Stack,
  Global,
  Unknown,
}

/// One aligned member location within a struct (spec.md §3 "Struct/class").
#[derive(Clone, Debug)]
pub struct MemberLocation {
  pub variable: VariableId,
  pub byte_offset: u32,
}

/// `struct StructEntry` / "Struct/class" (spec.md §3).
#[derive(Clone, Debug)]
pub struct StructEntry {
  pub name: Symbol,
  pub members: ScopeId,
  pub member_locations: Vec<MemberLocation>,
  pub total_size: u32,
}

/// `struct FunctionEntry` (spec.md §3).
#[derive(Clone, Debug)]
pub struct FunctionEntry {
  pub name: Symbol,
  pub return_type: Type,
  pub arg_stack_size: u32,
  pub arguments: Vec<VariableId>,
  pub main_scope: ScopeId,
  pub basic_blocks: Vec<BasicBlock>,
  pub is_defined: bool,
  pub is_asm_fun: bool,
  pub calls_other_function: bool,
}

/// `enum ScopeMemberType` + payload — a tagged sum rather than a void-pointer
/// plus discriminant, per spec.md §9's "Tagged entries" design note.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeMember {
  Variable(VariableId),
  Argument(VariableId),
  Function(FunctionId),
  Struct(StructId),
  SubScope(ScopeId),
  BasicBlock(u32),
}

/// `struct Scope` (spec.md §3 "Scope"). `entries` is insertion-ordered, as
/// the original's append-only array is.
#[derive(Clone, Debug, Default)]
pub struct Scope {
  pub parent_scope: Option<ScopeId>,
  pub parent_function: Option<FunctionId>,
  pub name: String,
  pub entries: Vec<(Symbol, ScopeMember)>,
  pub sub_scope_count: u32,
}

/// Errors raised by symbol-table operations (spec.md §7 "Code" errors, plus
/// the occasional internal invariant violation).
#[derive(Debug, thiserror::Error)]
pub enum SymtabError {
  #[error("Error defining symbol [{0}] - name already exists!")]
  DuplicateName(String),
  #[error("Use of undeclared identifier '{0}'")]
  Undeclared(String),
  #[error("{0} is not a {1}!")]
  WrongKind(String, &'static str),
  #[error("Use of nonexistent member variable {0} in struct {1}")]
  NoSuchMember(String, String),
  #[error("Too many subscopes of scope {0}")]
  TooManySubScopes(String),
}

/// Owns every scope, function, struct and variable created during lowering
/// (spec.md §5 "Resource ownership").
#[derive(Default)]
pub struct SymbolTable {
  pub scopes: IdxVec<ScopeId, Scope>,
  pub functions: IdxVec<FunctionId, FunctionEntry>,
  pub structs: IdxVec<StructId, StructEntry>,
  pub variables: IdxVec<VariableId, VariableEntry>,
  pub global_scope: ScopeId,
}

impl SymbolTable {
  #[must_use]
  pub fn new() -> Self {
    let mut scopes = IdxVec::new();
    let global_scope = scopes.push(Scope { name: "global".to_string(), ..Scope::default() });
    Self { scopes, functions: IdxVec::new(), structs: IdxVec::new(), variables: IdxVec::new(), global_scope }
  }

  /// `Scope_contains`.
  #[must_use]
  pub fn contains(&self, scope: ScopeId, name: Symbol) -> bool {
    self.scopes[scope].entries.iter().any(|(n, _)| *n == name)
  }

  /// `Scope_insert`: fails if `name` is already present in *this* scope
  /// (not its parents).
  pub fn insert(&mut self, scope: ScopeId, name: Symbol, entry: ScopeMember, dict: &Dictionary) -> Result<(), SymtabError> {
    if self.contains(scope, name) {
      return Err(SymtabError::DuplicateName(dict.resolve(name).to_string()));
    }
    self.scopes[scope].entries.push((name, entry));
    Ok(())
  }

  /// `Scope_lookup`: walk parents, returning the first match of any kind.
  #[must_use]
  pub fn lookup(&self, scope: ScopeId, name: Symbol) -> Option<ScopeMember> {
    let mut cur = Some(scope);
    while let Some(s) = cur {
      if let Some((_, m)) = self.scopes[s].entries.iter().find(|(n, _)| *n == name) {
        return Some(*m);
      }
      cur = self.scopes[s].parent_scope;
    }
    None
  }

  /// `lookupVar`: a typed variant that fails if the entry is of the wrong kind.
  pub fn lookup_var(&self, scope: ScopeId, name: Symbol, dict: &Dictionary) -> Result<VariableId, SymtabError> {
    match self.lookup(scope, name) {
      Some(ScopeMember::Variable(v) | ScopeMember::Argument(v)) => Ok(v),
      Some(_) => Err(SymtabError::WrongKind(dict.resolve(name).to_string(), "variable")),
      None => Err(SymtabError::Undeclared(dict.resolve(name).to_string())),
    }
  }

  pub fn lookup_fun(&self, scope: ScopeId, name: Symbol, dict: &Dictionary) -> Result<FunctionId, SymtabError> {
    match self.lookup(scope, name) {
      Some(ScopeMember::Function(f)) => Ok(f),
      Some(_) => Err(SymtabError::WrongKind(dict.resolve(name).to_string(), "function")),
      None => Err(SymtabError::Undeclared(dict.resolve(name).to_string())),
    }
  }

  pub fn lookup_struct(&self, scope: ScopeId, name: Symbol, dict: &Dictionary) -> Result<StructId, SymtabError> {
    match self.lookup(scope, name) {
      Some(ScopeMember::Struct(s)) => Ok(s),
      Some(_) => Err(SymtabError::WrongKind(dict.resolve(name).to_string(), "struct")),
      None => Err(SymtabError::Undeclared(dict.resolve(name).to_string())),
    }
  }

  /// `lookupClassByType` / `lookupStructByType`.
  pub fn lookup_struct_by_type(&self, scope: ScopeId, ty: &Type, dict: &Dictionary) -> Result<StructId, SymtabError> {
    let name = ty.struct_name.ok_or_else(|| SymtabError::WrongKind(ty.render(dict), "struct"))?;
    self.lookup_struct(scope, name, dict)
  }

  /// `Scope_createSubScope`: synthesizes a two-hex-digit unique child name.
  pub fn create_sub_scope(&mut self, parent: ScopeId, dict: &mut Dictionary) -> Result<ScopeId, SymtabError> {
    let count = self.scopes[parent].sub_scope_count;
    if count > 0xff {
      return Err(SymtabError::TooManySubScopes(self.scopes[parent].name.clone()));
    }
    let name_str = format!("{count:02x}");
    self.scopes[parent].sub_scope_count += 1;
    let parent_function = self.scopes[parent].parent_function;
    let sub = self.scopes.push(Scope {
      parent_scope: Some(parent),
      parent_function,
      name: name_str.clone(),
      entries: Vec::new(),
      sub_scope_count: 0,
    });
    let sym = dict.intern(&name_str);
    self.insert(parent, sym, ScopeMember::SubScope(sub), dict)?;
    Ok(sub)
  }

  /// `Scope_addBasicBlock`... in this model basic blocks live on the owning
  /// `FunctionEntry` directly; the scope only records the `"BlockN"` name
  /// so lookups of a block-by-name still resolve (spec.md §4.C).
  pub fn add_basic_block(&mut self, scope: ScopeId, function: FunctionId, block: BasicBlock, dict: &mut Dictionary) -> Result<(), SymtabError> {
    let label = block.label_num;
    let name = dict.intern(&format!("Block{label}"));
    self.functions[function].basic_blocks.push(block);
    self.insert(scope, name, ScopeMember::BasicBlock(label), dict)
  }

  /// `Scope_getSizeOfType` (spec.md §4.C fixed rules).
  pub fn size_of_type(&self, ty: &Type) -> Result<u32, SymtabError> {
    if ty.pointer_depth > 0 {
      let size = MACHINE_REGISTER_SIZE_BYTES;
      if ty.array.is_none() {
        return Ok(size);
      }
    }
    let mut size = match ty.basic {
      BasicType::Null => 0,
      BasicType::Any => 1,
      BasicType::U8 => 1,
      BasicType::U16 => 2,
      BasicType::U32 => 4,
      BasicType::U64 => 8,
      BasicType::Struct => {
        let sid = ty.struct_name.and_then(|n| self.find_struct_by_symbol(n)).ok_or(SymtabError::Undeclared("<struct>".into()))?;
        self.structs[sid].total_size
      }
    };
    if let Some(info) = &ty.array {
      if info.element.pointer_depth > 0 {
        size = MACHINE_REGISTER_SIZE_BYTES;
      }
      size *= info.len;
    }
    Ok(size)
  }

  /// `Scope_getAlignmentOfType`: mirrors size for primitives; struct
  /// alignment is the max member alignment.
  pub fn alignment_of_type(&self, ty: &Type) -> Result<u32, SymtabError> {
    if ty.pointer_depth > 0 {
      return Ok(MACHINE_REGISTER_SIZE_BYTES);
    }
    match ty.basic {
      BasicType::Null => Ok(1),
      BasicType::Any => Ok(1),
      BasicType::U8 => Ok(1),
      BasicType::U16 => Ok(2),
      BasicType::U32 => Ok(4),
      BasicType::U64 => Ok(8),
      BasicType::Struct => {
        let sid = ty.struct_name.and_then(|n| self.find_struct_by_symbol(n)).ok_or(SymtabError::Undeclared("<struct>".into()))?;
        self.structs[sid]
          .member_locations
          .iter()
          .map(|m| self.alignment_of_type(&self.variables[m.variable].ty))
          .try_fold(1u32, |acc, a| a.map(|a| acc.max(a)))
      }
    }
  }

  fn find_struct_by_symbol(&self, name: Symbol) -> Option<StructId> {
    self.structs.iter_enumerated().find(|(_, s)| s.name == name).map(|(i, _)| i)
  }

  /// Create a struct entry and its member scope.
  pub fn create_struct(&mut self, parent_scope: ScopeId, name: Symbol, dict: &mut Dictionary) -> Result<StructId, SymtabError> {
    let members = self.scopes.push(Scope {
      parent_scope: Some(parent_scope),
      parent_function: self.scopes[parent_scope].parent_function,
      name: dict.resolve(name).to_string(),
      entries: Vec::new(),
      sub_scope_count: 0,
    });
    let sid = self.structs.push(StructEntry { name, members, member_locations: Vec::new(), total_size: 0 });
    self.insert(parent_scope, name, ScopeMember::Struct(sid), dict)?;
    Ok(sid)
  }

  /// `assignOffsetToMemberVariable`: pad to the member's alignment, place it,
  /// then grow `total_size` by the member's own size. No trailing padding is
  /// applied after the last member (spec.md §3 "Struct/class" Alignment rule).
  pub fn assign_member_offset(&mut self, sid: StructId, variable: VariableId) -> Result<(), SymtabError> {
    let ty = self.variables[variable].ty.clone();
    let align = self.alignment_of_type(&ty)?;
    let size = self.size_of_type(&ty)?;
    let base = self.structs[sid].total_size;
    let padding = {
      let rem = base % align;
      if rem == 0 { 0 } else { align - rem }
    };
    let offset = base + padding;
    self.structs[sid].member_locations.push(MemberLocation { variable, byte_offset: offset });
    self.structs[sid].total_size = offset + size;
    Ok(())
  }

  /// `lookupMemberVariable`.
  pub fn lookup_member(&self, sid: StructId, name: Symbol, dict: &Dictionary) -> Result<&MemberLocation, SymtabError> {
    self.structs[sid]
      .member_locations
      .iter()
      .find(|m| self.variables[m.variable].name == name)
      .ok_or_else(|| SymtabError::NoSuchMember(dict.resolve(name).to_string(), dict.resolve(self.structs[sid].name).to_string()))
  }

  /// Post-lowering **scope collapse** (spec.md §4.C): lift every
  /// non-global declaration from inner scopes into the enclosing function's
  /// `main_scope`, mangling names as `<parentScopeName>.<name>`, and
  /// migrate inner basic-block names the same way. Run exactly once per
  /// function; it is not idempotent-safe to re-run (spec.md §4.C).
  pub fn collapse_scopes(&mut self, function: FunctionId, dict: &mut Dictionary) -> Result<(), SymtabError> {
    let main_scope = self.functions[function].main_scope;
    let mut collected: Vec<(ScopeMember, String)> = Vec::new();
    let entries = self.scopes[main_scope].entries.clone();
    let prefix = self.scopes[main_scope].name.clone();
    for (_, member) in entries {
      if let ScopeMember::SubScope(sub) = member {
        self.collect_sub_scope_entries_mangled(sub, &prefix, dict, &mut collected);
      }
    }
    for (member, mangled) in collected {
      let sym = dict.intern(&mangled);
      self.insert(main_scope, sym, member, dict)?;
    }
    // Drop the now-collapsed sub-scope entries themselves so the function
    // scope contains only the flattened leaves (spec.md §8 invariant 6).
    self.scopes[main_scope].entries.retain(|(_, m)| !matches!(m, ScopeMember::SubScope(_)));
    Ok(())
  }

  fn collect_sub_scope_entries_mangled(&self, scope: ScopeId, outer_prefix: &str, dict: &Dictionary, out: &mut Vec<(ScopeMember, String)>) {
    let entries = self.scopes[scope].entries.clone();
    for (_, member) in entries {
      match member {
        ScopeMember::SubScope(sub) => self.collect_sub_scope_entries_mangled(sub, outer_prefix, dict, out),
        ScopeMember::Variable(v) => {
          let mangled = format!("{}.{}", outer_prefix, dict.resolve(self.variables[v].name));
          out.push((ScopeMember::Variable(v), mangled));
        }
        ScopeMember::Argument(v) => {
          let mangled = format!("{}.{}", outer_prefix, dict.resolve(self.variables[v].name));
          out.push((ScopeMember::Argument(v), mangled));
        }
        ScopeMember::Function(_) | ScopeMember::Struct(_) => {
          // Nested function/struct declarations do not occur inside
          // statement scopes in this language; nothing to collapse.
        }
        ScopeMember::BasicBlock(label) => {
          out.push((ScopeMember::BasicBlock(label), format!("{outer_prefix}.Block{label}")));
        }
      }
    }
  }
}
