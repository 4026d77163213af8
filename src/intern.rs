//! String interning ("the dictionary", spec.md §4.A).
//!
//! Two syntactically equal strings (identifiers, string literal bodies,
//! struct names) always resolve to the same [`Symbol`], so downstream
//! comparisons are index comparisons rather than string comparisons. The
//! original C compiler used a fixed-bucket hash table of owned `char *`;
//! here a single growable table plus a reverse-lookup map gives the same
//! pointer-equality-after-insert semantics without manual bucket chaining.

use hashbrown::HashMap;
use std::fmt;

/// A canonical interned string. Two `Symbol`s are equal iff the underlying
/// text is equal — comparison never touches the text itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Symbol({})", self.0)
  }
}

/// Owns the canonical copy of every interned string seen during compilation.
///
/// Write-once: strings are only ever added, never removed or mutated
/// (spec.md §5), so a `Dictionary` can be shared by immutable reference
/// through the rest of the pipeline once lowering completes.
#[derive(Default)]
pub struct Dictionary {
  strings: Vec<Box<str>>,
  lookup: HashMap<Box<str>, Symbol>,
}

impl Dictionary {
  pub fn new() -> Self { Self::default() }

  /// Insert `s` if not already present, returning its canonical `Symbol`.
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.lookup.get(s) {
      return sym;
    }
    let sym = Symbol(self.strings.len() as u32);
    let owned: Box<str> = s.into();
    self.strings.push(owned.clone());
    self.lookup.insert(owned, sym);
    sym
  }

  /// Resolve a `Symbol` back to its text.
  #[must_use]
  pub fn resolve(&self, sym: Symbol) -> &str {
    &self.strings[sym.0 as usize]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn equal_strings_intern_to_the_same_symbol() {
    let mut dict = Dictionary::new();
    let a = dict.intern("foo");
    let b = dict.intern("foo");
    assert_eq!(a, b);
    let c = dict.intern("bar");
    assert_ne!(a, c);
    assert_eq!(dict.resolve(a), "foo");
    assert_eq!(dict.resolve(c), "bar");
  }
}
