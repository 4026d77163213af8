//! Typed arena indices.
//!
//! Scopes, functions, structs and basic blocks are owned by flat arenas
//! ([`IdxVec`]) and referenced by small `Copy` handles instead of pointers.
//! This sidesteps the back-reference cycles the original compiler expressed
//! with raw `struct Scope *parentScope` fields (spec.md §9).

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A type that can be used as a dense arena index.
pub trait Idx: Copy + Eq + PartialEq {
  /// Convert from a `usize` to this index type.
  fn from_usize(idx: usize) -> Self;
  /// Convert this index back to a `usize`.
  fn index(self) -> usize;
}

/// Defines a newtype index, analogous to `rustc`'s `newtype_index!`.
macro_rules! define_idx {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct $name(u32);

    impl $crate::idx::Idx for $name {
      fn from_usize(idx: usize) -> Self {
        assert!(idx <= u32::MAX as usize, "arena index overflow");
        $name(idx as u32)
      }
      fn index(self) -> usize { self.0 as usize }
    }
  }
}
pub(crate) use define_idx;

/// A vector indexed by a typed index rather than `usize`.
#[derive(Clone, Debug)]
pub struct IdxVec<I, T> {
  raw: Vec<T>,
  _marker: PhantomData<fn(I)>,
}

impl<I, T> Default for IdxVec<I, T> {
  fn default() -> Self { Self { raw: Vec::new(), _marker: PhantomData } }
}

impl<I: Idx, T> IdxVec<I, T> {
  pub fn new() -> Self { Self::default() }

  pub fn with_capacity(cap: usize) -> Self {
    Self { raw: Vec::with_capacity(cap), _marker: PhantomData }
  }

  pub fn push(&mut self, val: T) -> I {
    let i = I::from_usize(self.raw.len());
    self.raw.push(val);
    i
  }

  pub fn len(&self) -> usize { self.raw.len() }
  pub fn is_empty(&self) -> bool { self.raw.is_empty() }

  pub fn get(&self, i: I) -> Option<&T> { self.raw.get(i.index()) }
  pub fn get_mut(&mut self, i: I) -> Option<&mut T> { self.raw.get_mut(i.index()) }

  pub fn iter(&self) -> impl Iterator<Item = &T> { self.raw.iter() }
  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> { self.raw.iter_mut() }

  pub fn iter_enumerated(&self) -> impl Iterator<Item = (I, &T)> {
    self.raw.iter().enumerate().map(|(i, t)| (I::from_usize(i), t))
  }
}

impl<I: Idx, T> Index<I> for IdxVec<I, T> {
  type Output = T;
  fn index(&self, i: I) -> &T {
    self.raw.get(i.index()).unwrap_or_else(|| panic!("arena index out of bounds"))
  }
}

impl<I: Idx, T> IndexMut<I> for IdxVec<I, T> {
  fn index_mut(&mut self, i: I) -> &mut T {
    self.raw.get_mut(i.index()).unwrap_or_else(|| panic!("arena index out of bounds"))
  }
}

define_idx! {
  /// Handle to a [`crate::symtab::Scope`] in its owning [`crate::symtab::SymbolTable`].
  ScopeId
}
define_idx! {
  /// Handle to a [`crate::symtab::FunctionEntry`].
  FunctionId
}
define_idx! {
  /// Handle to a [`crate::symtab::StructEntry`].
  StructId
}
define_idx! {
  /// Handle to a [`crate::symtab::VariableEntry`].
  VariableId
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn push_and_index_round_trip() {
    let mut v: IdxVec<ScopeId, &'static str> = IdxVec::new();
    let a = v.push("first");
    let b = v.push("second");
    assert_eq!(v[a], "first");
    assert_eq!(v[b], "second");
    assert_eq!(v.len(), 2);
  }
}
