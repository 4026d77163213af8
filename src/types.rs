//! The `Type` value and its comparison/widening rules (spec.md §3 "Types",
//! §4.A).
//!
//! Grounded on `original_source/include/tac.h` (`struct Type`, `enum
//! basicTypes`) and `original_source/type.c` (`Type_Compare`,
//! `Type_CompareAllowImplicitWidening`, `Type_GetName`).

use crate::intern::{Dictionary, Symbol};
use std::fmt;

/// `basicType` (spec.md §3). `Struct` carries its name out-of-band via
/// [`Type::struct_name`] rather than as a payload on the variant, mirroring
/// the C `union { ... } classType` being a sibling field rather than part of
/// the enum tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BasicType {
  /// Only legal as the return type of a non-returning function.
  Null,
  /// Opaque byte pointer; only legal with `pointer_depth >= 1`.
  Any,
  U8,
  U16,
  U32,
  U64,
  Struct,
}

impl BasicType {
  /// Byte size of one scalar value of this basic type (pointers excluded —
  /// see [`crate::symtab::size_of_type`] for the full rule including
  /// indirection and arrays).
  #[must_use]
  pub fn scalar_size(self) -> u32 {
    match self {
      BasicType::Null => 0,
      BasicType::Any => 8, // only ever appears behind indirection
      BasicType::U8 => 1,
      BasicType::U16 => 2,
      BasicType::U32 => 4,
      BasicType::U64 => 8,
      BasicType::Struct => 0, // resolved via the struct table
    }
  }

  /// Position of this type in the `u8 ⊆ u16 ⊆ u32 ⊆ u64` widening chain,
  /// used to implement the transitivity property of spec.md §8 item 4.
  fn widening_rank(self) -> Option<u8> {
    match self {
      BasicType::U8 => Some(0),
      BasicType::U16 => Some(1),
      BasicType::U32 => Some(2),
      BasicType::U64 => Some(3),
      _ => None,
    }
  }
}

/// An array's element count and element type, boxed so [`Type`] stays a
/// fixed, cheaply-`Clone`-able size despite arbitrary nesting (`u8[4][4]`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArrayInfo {
  pub len: u32,
  pub element: Box<Type>,
}

/// The canonical type value (spec.md §3 "Types").
///
/// `Type` does not carry `initializeTo`/`initializeArrayTo` — the original
/// C struct bundles that compile-time initializer payload into `struct
/// Type`, but it is per-*variable* data, not part of type identity, so it
/// lives on [`crate::symtab::VariableEntry::init`] instead (an Open Question
/// resolution, see DESIGN.md).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Type {
  pub basic: BasicType,
  pub pointer_depth: u32,
  pub array: Option<ArrayInfo>,
  pub struct_name: Option<Symbol>,
}

impl Type {
  #[must_use]
  pub fn scalar(basic: BasicType) -> Self {
    Self { basic, pointer_depth: 0, array: None, struct_name: None }
  }

  #[must_use]
  pub fn pointer_to(mut self) -> Self {
    self.pointer_depth += 1;
    self
  }

  #[must_use]
  pub fn struct_named(name: Symbol) -> Self {
    Self { basic: BasicType::Struct, pointer_depth: 0, array: None, struct_name: Some(name) }
  }

  #[must_use]
  pub fn array_of(element: Type, len: u32) -> Self {
    assert!(len >= 1, "array types must have arrayLen >= 1");
    Self { basic: element.basic, pointer_depth: element.pointer_depth, struct_name: element.struct_name,
           array: Some(ArrayInfo { len, element: Box::new(element) }) }
  }

  #[must_use]
  pub fn is_array(&self) -> bool { self.array.is_some() }

  #[must_use]
  pub fn is_pointer(&self) -> bool { self.pointer_depth > 0 && self.array.is_none() }

  /// Array-to-pointer decay (spec.md §3, §4.E array refs): drop one array
  /// dimension and gain one pointer indirection, keeping the element type.
  #[must_use]
  pub fn decay(&self) -> Type {
    match &self.array {
      Some(info) => {
        let mut decayed = (*info.element).clone();
        decayed.pointer_depth += 1;
        decayed
      }
      None => self.clone(),
    }
  }

  /// The type one indirection level down (spec.md §4.E `walkDereference`).
  /// Panics if called on a non-pointer; callers check `pointer_depth > 0`
  /// first (this mirrors the original's unchecked decrement, since it is
  /// only ever invoked after validating indirection).
  #[must_use]
  pub fn dereferenced(&self) -> Type {
    debug_assert!(self.pointer_depth > 0, "dereferenced() requires indirection");
    let mut t = self.clone();
    t.pointer_depth -= 1;
    t
  }

  /// `Type_Compare`: 0 (structural equality) iff identical in every field.
  #[must_use]
  pub fn compare(&self, other: &Type) -> bool {
    self == other
  }

  /// `Type_CompareAllowImplicitWidening` (spec.md §3 "Widening").
  ///
  /// Returns `true` iff `self` (the source) may be implicitly converted to
  /// `other` (the destination):
  /// - identical basics always allowed;
  /// - `u8 -> u16 -> u32 -> u64` widening, never narrowing;
  /// - any pointer may widen to `any*...*` of equal-or-greater depth;
  /// - array-to-pointer decay of matching element type;
  /// - struct types must match by name.
  #[must_use]
  pub fn compare_allow_implicit_widening(&self, other: &Type) -> bool {
    // Array-to-pointer decay: compare the decayed shape against the target.
    if self.array.is_some() && other.array.is_none() && other.pointer_depth > 0 {
      return self.decay().compare_allow_implicit_widening(other);
    }

    if self.pointer_depth != other.pointer_depth {
      return false;
    }

    if self.pointer_depth > 0 {
      // Any pointer may widen to `any*`.
      if other.basic == BasicType::Any {
        return true;
      }
      return self.basic == other.basic
        && self.struct_name == other.struct_name
        && self.array.as_ref().map(|a| a.len) == other.array.as_ref().map(|a| a.len);
    }

    match (self.basic, other.basic) {
      (BasicType::Struct, BasicType::Struct) => self.struct_name == other.struct_name,
      (a, b) if a == b => true,
      (a, b) => match (a.widening_rank(), b.widening_rank()) {
        (Some(ra), Some(rb)) => ra <= rb,
        _ => false,
      },
    }
  }

  /// Render a type name the way `Type_GetName` does: `u8**`, `MyStruct*[4]`.
  #[must_use]
  pub fn render(&self, dict: &Dictionary) -> String {
    let mut out = String::new();
    match self.basic {
      BasicType::Null => out.push_str("null"),
      BasicType::Any => out.push_str("any"),
      BasicType::U8 => out.push_str("u8"),
      BasicType::U16 => out.push_str("u16"),
      BasicType::U32 => out.push_str("u32"),
      BasicType::U64 => out.push_str("u64"),
      BasicType::Struct => out.push_str(self.struct_name.map_or("<anon struct>", |s| dict.resolve(s))),
    }
    for _ in 0..self.pointer_depth {
      out.push('*');
    }
    if let Some(info) = &self.array {
      out.push('[');
      out.push_str(&info.len.to_string());
      out.push(']');
    }
    out
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Used only where no Dictionary is in scope (e.g. internal error
    // messages); falls back to the bare shape without the struct name text.
    write!(f, "{:?}*{}", self.basic, self.pointer_depth)?;
    if let Some(info) = &self.array {
      write!(f, "[{}]", info.len)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn u(n: u32) -> Type {
    Type::scalar(match n {
      8 => BasicType::U8,
      16 => BasicType::U16,
      32 => BasicType::U32,
      64 => BasicType::U64,
      _ => unreachable!(),
    })
  }

  #[test]
  fn identity_widens_to_itself() {
    for t in [u(8), u(16), u(32), u(64)] {
      assert!(t.compare_allow_implicit_widening(&t));
    }
  }

  #[test]
  fn widening_chain_is_transitive_and_one_directional() {
    assert!(u(8).compare_allow_implicit_widening(&u(16)));
    assert!(u(16).compare_allow_implicit_widening(&u(32)));
    assert!(u(8).compare_allow_implicit_widening(&u(32)));
    assert!(u(8).compare_allow_implicit_widening(&u(64)));
    assert!(!u(32).compare_allow_implicit_widening(&u(8)));
    assert!(!u(64).compare_allow_implicit_widening(&u(16)));
  }

  #[test]
  fn any_pointer_absorbs_any_other_pointer() {
    let u8p = u(8).pointer_to();
    let anyp = Type::scalar(BasicType::Any).pointer_to();
    assert!(u8p.compare_allow_implicit_widening(&anyp));
    assert!(!anyp.compare_allow_implicit_widening(&u8p));
  }

  #[test]
  fn array_decays_to_matching_pointer() {
    let arr = Type::array_of(u(32), 4);
    let ptr = u(32).pointer_to();
    assert!(arr.compare_allow_implicit_widening(&ptr));
  }

  #[test]
  fn struct_types_match_only_by_name() {
    let mut dict = Dictionary::new();
    let a = dict.intern("Point");
    let b = dict.intern("Line");
    let sa = Type::struct_named(a);
    let sb = Type::struct_named(b);
    let sa2 = Type::struct_named(a);
    assert!(sa.compare_allow_implicit_widening(&sa2));
    assert!(!sa.compare_allow_implicit_widening(&sb));
  }
}
