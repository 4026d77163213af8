//! The AST the linearizer consumes (spec.md §4.B, §6 "Input language").
//!
//! The PEG parser that produces this tree is out of scope (spec.md §1); this
//! module only fixes the shape the rest of the pipeline relies on, plus a
//! small builder so tests can construct trees by hand without a real parser.
//! Every node carries `{ token, value, firstChild, nextSibling, sourceFile,
//! sourceLine, sourceCol }` (spec.md §4.B) — modeled here as a first-child/
//! next-sibling arena tree addressed by [`NodeId`], matching the ownership
//! note in spec.md §5 ("The AST is owned by the parser driver and outlives
//! all of lowering"): the linearizer only ever borrows it.

use crate::idx::{define_idx, IdxVec};
use crate::intern::Symbol;
use crate::types::Type;

define_idx! {
  /// Handle to an [`AstNode`] within its owning [`Ast`].
  NodeId
}

/// `enum TokenType` restricted to the tokens spec.md §6 says the linearizer
/// consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
  TranslationUnit,
  Identifier,
  Constant,
  CharLiteral,
  StringLiteral,
  Extern,
  Sizeof,
  Asm,
  AsmLine,
  Any,
  U8,
  U16,
  U32,
  U64,
  Class,
  TypeName,
  VariableDeclaration,
  Fun,
  ClassDecl,
  ClassBody,
  CompoundStatement,
  Return,
  If,
  Else,
  While,
  For,
  Do,
  Add,
  Sub,
  Multiply,
  Divide,
  Modulo,
  LShift,
  RShift,
  Lt,
  Gt,
  Le,
  Ge,
  EqEq,
  Ne,
  LogicalAnd,
  LogicalOr,
  LogicalNot,
  BitwiseAnd,
  BitwiseOr,
  BitwiseNot,
  BitwiseXor,
  Dereference,
  AddressOf,
  Assign,
  AddAssign,
  SubAssign,
  MulAssign,
  DivAssign,
  ModAssign,
  AndAssign,
  OrAssign,
  XorAssign,
  LShiftAssign,
  RShiftAssign,
  Cast,
  Dot,
  Arrow,
  FunctionCall,
  ArrayIndex,
  /// Wraps a `fun`'s parameter list; each child is a `VariableDeclaration`.
  ArgList,
}

/// `node->value`: either unset, an interned identifier/string/raw-asm text,
/// an integer constant (for `constant`/`char_literal` nodes), or a fully
/// resolved [`Type`]. The real PEG grammar spells types as their own
/// sub-trees (`type_name`, `any`/`u8`/.../`class` tokens); this stand-in
/// parser boundary (spec.md §1, "the parser delivers an AST... nothing else
/// about them matters") folds that shape down to a pre-resolved `Type` value
/// carried directly on declaration/cast/sizeof-of-type nodes, since the
/// grammar itself is out of scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
  None,
  Name(Symbol),
  Int(i64),
  Ty(Type),
}

/// A single AST node (spec.md §4.B).
#[derive(Clone, Debug)]
pub struct AstNode {
  pub token: Token,
  pub value: Value,
  pub first_child: Option<NodeId>,
  pub next_sibling: Option<NodeId>,
  pub source_file: Symbol,
  pub source_line: u32,
  pub source_col: u32,
}

/// The read-only tree the linearizer walks.
pub struct Ast {
  nodes: IdxVec<NodeId, AstNode>,
  pub root: NodeId,
}

impl Ast {
  #[must_use]
  pub fn get(&self, id: NodeId) -> &AstNode { &self.nodes[id] }

  /// Iterate `node`'s direct children left to right.
  pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
    let mut cur = self.nodes[id].first_child;
    std::iter::from_fn(move || {
      let this = cur?;
      cur = self.nodes[this].next_sibling;
      Some(this)
    })
  }

  /// Iterate `node` and every one of its following siblings (used when a
  /// caller already holds the first child and wants the rest of the list,
  /// e.g. walking a translation unit's top-level declarations).
  pub fn siblings_from(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
    let mut cur = Some(id);
    std::iter::from_fn(move || {
      let this = cur?;
      cur = self.nodes[this].next_sibling;
      Some(this)
    })
  }
}

/// Builds an [`Ast`] bottom-up without a real parser, for tests and for the
/// CLI driver's deliberately minimal parser stand-in (`SPEC_FULL.md` §1).
#[derive(Default)]
pub struct AstBuilder {
  nodes: IdxVec<NodeId, AstNode>,
}

impl AstBuilder {
  #[must_use]
  pub fn new() -> Self { Self::default() }

  /// Append a leaf node with no children.
  pub fn leaf(&mut self, token: Token, value: Value, file: Symbol, line: u32, col: u32) -> NodeId {
    self.nodes.push(AstNode { token, value, first_child: None, next_sibling: None, source_file: file, source_line: line, source_col: col })
  }

  /// Append a node with the given children (first becomes `first_child`,
  /// the rest are linked as `next_sibling` chain).
  pub fn node(&mut self, token: Token, value: Value, children: &[NodeId], file: Symbol, line: u32, col: u32) -> NodeId {
    for w in children.windows(2) {
      self.nodes[w[0]].next_sibling = Some(w[1]);
    }
    let first_child = children.first().copied();
    self.nodes.push(AstNode { token, value, first_child, next_sibling: None, source_file: file, source_line: line, source_col: col })
  }

  /// Link `siblings` in order after `first`, mutating `first`'s sibling
  /// chain; used to build a translation unit's top-level declaration list.
  pub fn chain(&mut self, nodes: &[NodeId]) {
    for w in nodes.windows(2) {
      self.nodes[w[0]].next_sibling = Some(w[1]);
    }
  }

  #[must_use]
  pub fn finish(self, root: NodeId) -> Ast {
    Ast { nodes: self.nodes, root }
  }
}

impl Ast {
  /// A deliberately minimal stand-in for the real PEG parser (out of scope,
  /// spec.md §1): wraps the whole input file as one top-level `asm` block,
  /// one `asm_line` child per non-blank source line, so the CLI driver has
  /// something to hand the linearizer without a grammar. Real programs need
  /// the real parser; this only keeps the pipeline runnable end to end.
  pub fn parse_stub(source: &str, file: Symbol, dict: &mut crate::intern::Dictionary) -> Ast {
    let mut b = AstBuilder::new();
    let lines: Vec<NodeId> = source
      .lines()
      .enumerate()
      .filter(|(_, l)| !l.trim().is_empty())
      .map(|(i, l)| {
        let text = dict.intern(l);
        b.leaf(Token::AsmLine, Value::Name(text), file, i as u32 + 1, 1)
      })
      .collect();
    let asm = b.node(Token::Asm, Value::None, &lines, file, 1, 1);
    let tu = b.node(Token::TranslationUnit, Value::None, &[asm], file, 1, 1);
    b.finish(tu)
  }
}
