//! AST-to-TAC lowering (spec.md §4.E "Linearizer").
//!
//! Grounded on `original_source/linearizer.c`, `linearizer_generic.c`, and
//! `include/linearizer.h`: the original's single `walkStatement`/
//! `walkExpression`/`walkSubExpression` dispatch functions, reshaped here as
//! methods on [`Linearizer`] with an explicit [`FnState`] carrying the
//! per-function cursor (`currentScope`, `currentBlock`, temp/label counters)
//! the original threaded through file-scope statics.

use crate::ast::{Ast, NodeId, Token, Value};
use crate::error::{CompileError, Location};
use crate::idx::{FunctionId, ScopeId};
use crate::internal_error;
use crate::intern::{Dictionary, Symbol};
use crate::symtab::{FunctionEntry, InitData, Residency, Scope, ScopeMember, SymbolTable, VariableEntry, MACHINE_REGISTER_SIZE_BYTES};
use crate::tac::{BasicBlock, Op, Operand, Payload, Slot, SourceRef, TacLine};
use crate::types::{BasicType, Type};

/// Everything produced by lowering a translation unit: the symbol table plus
/// the two global basic blocks the original's `globalBlock0`/`globalBlock1`
/// describe (spec.md §6) — these have no owning function, so they live
/// alongside the table rather than inside it.
pub struct LoweredProgram {
  pub symtab: SymbolTable,
  /// Static-initializer TAC (spec.md §6 "Global basic block 0").
  pub global_init: BasicBlock,
  /// File-scope `asm { ... }` TAC (spec.md §6 "Global basic block 1").
  pub global_asm: BasicBlock,
}

/// Lower an entire translation unit.
pub fn lower(ast: &Ast, dict: &mut Dictionary) -> Result<LoweredProgram, CompileError> {
  let mut l = Linearizer::new(dict);
  l.walk_program(ast)?;
  Ok(LoweredProgram { symtab: l.st, global_init: l.global_init, global_asm: l.global_asm })
}

/// Per-function lowering cursor: the scope/block currently being appended
/// to, plus this function's monotonic temp/label counters (spec.md §4.E
/// "Temp naming": `.tN`, reset per function).
struct FnState {
  function: Option<FunctionId>,
  scope: ScopeId,
  block: BasicBlock,
  temp_num: u32,
  label_num: u32,
  /// Function-wide monotonic TAC index (spec.md §3 "TAC instruction":
  /// "Indices are dense integers assigned in emission order per function") —
  /// NOT reset per basic block, so lifetime analysis can compare indices
  /// across blocks.
  instr_idx: u32,
}

pub struct Linearizer<'d> {
  pub st: SymbolTable,
  pub global_init: BasicBlock,
  pub global_asm: BasicBlock,
  dict: &'d mut Dictionary,
  pub warnings: Vec<String>,
  global_temp_num: u32,
  global_label_num: u32,
  global_instr_idx: u32,
}

impl<'d> Linearizer<'d> {
  #[must_use]
  pub fn new(dict: &'d mut Dictionary) -> Self {
    Self {
      st: SymbolTable::new(),
      global_init: BasicBlock::new(0),
      global_asm: BasicBlock::new(1),
      dict,
      warnings: Vec::new(),
      global_temp_num: 0,
      global_label_num: 0,
      global_instr_idx: 0,
    }
  }

  /// Function-wide next TAC index (spec.md §3: "Indices are dense integers
  /// assigned in emission order per function"), not reset per block.
  fn next_idx(&self, fs: &mut FnState) -> u32 {
    let i = fs.instr_idx;
    fs.instr_idx += 1;
    i
  }

  // ---- entry point -------------------------------------------------------

  /// `linearizeProgram`: dispatch every top-level declaration (spec.md §4.E
  /// "Entry").
  pub fn walk_program(&mut self, ast: &Ast) -> Result<(), CompileError> {
    for node in ast.children(ast.root) {
      let tok = ast.get(node).token;
      match tok {
        Token::VariableDeclaration => self.walk_global_var_decl(ast, node, false)?,
        Token::Extern => {
          let inner = ast.children(node).next().ok_or_else(|| internal_error!("extern node missing declaration"))?;
          self.walk_global_var_decl(ast, inner, true)?;
        }
        Token::ClassDecl => self.walk_class_decl(ast, node)?,
        Token::Fun => self.walk_function_decl(ast, node)?,
        Token::Assign => self.walk_top_level_assign(ast, node)?,
        Token::Asm => {
          for line_node in ast.children(node) {
            let text = self.asm_line_text(ast, line_node);
            let idx = self.global_asm.tac.len() as u32;
            let mut tl = TacLine::new(idx, Op::Asm, src_of(ast, line_node));
            tl.raw_asm = Some(text);
            self.global_asm.append(tl);
          }
        }
        other => return Err(internal_error!("token {other:?} is not valid at translation-unit scope")),
      }
    }
    Ok(())
  }

  fn asm_line_text(&self, ast: &Ast, node: NodeId) -> String {
    match &ast.get(node).value {
      Value::Name(s) => self.dict.resolve(*s).to_string(),
      _ => String::new(),
    }
  }

  // ---- declarations -------------------------------------------------------

  fn var_decl_parts(&self, ast: &Ast, node: NodeId) -> Result<(Symbol, Type), CompileError> {
    let name = match &ast.get(node).value {
      Value::Name(s) => *s,
      _ => return Err(internal_error!("variable_declaration node missing a name value")),
    };
    let type_child = ast.children(node).next().ok_or_else(|| internal_error!("variable_declaration node missing its type child"))?;
    let ty = match &ast.get(type_child).value {
      Value::Ty(t) => t.clone(),
      _ => return Err(internal_error!("variable_declaration's type child is malformed")),
    };
    Ok((name, ty))
  }

  fn walk_global_var_decl(&mut self, ast: &Ast, node: NodeId, is_extern: bool) -> Result<(), CompileError> {
    let (name, ty) = self.var_decl_parts(ast, node)?;
    let mut entry = VariableEntry::new(name, ty);
    entry.is_global = true;
    entry.is_extern = is_extern;
    entry.residency = Residency::Global;
    let vid = self.st.variables.push(entry);
    self.st.insert(self.st.global_scope, name, ScopeMember::Variable(vid), self.dict)?;
    Ok(())
  }

  fn literal_node_value(&self, ast: &Ast, node: NodeId) -> Result<i64, CompileError> {
    match ast.get(node).token {
      Token::Constant => match &ast.get(node).value {
        Value::Int(v) => Ok(*v),
        _ => Err(internal_error!("constant node missing its integer value")),
      },
      Token::CharLiteral => {
        let sym = match &ast.get(node).value {
          Value::Name(s) => *s,
          _ => return Err(internal_error!("char_literal node missing its text")),
        };
        let text = self.dict.resolve(sym).to_string();
        canonicalize_char_literal(&text, loc_of(ast, node))
      }
      other => Err(internal_error!("{other:?} is not a literal node")),
    }
  }

  /// `linearizeAssignment` at global scope: either a compile-time constant
  /// (folded straight into `VariableEntry::init`, no TAC) or a computed
  /// expression lowered into global basic block 0 (spec.md §6 "Global basic
  /// block 0: ... initializers").
  fn walk_top_level_assign(&mut self, ast: &Ast, node: NodeId) -> Result<(), CompileError> {
    let mut ch = ast.children(node);
    let lhs_node = ch.next().ok_or_else(|| internal_error!("top-level assign missing its lhs"))?;
    let rhs_node = ch.next().ok_or_else(|| internal_error!("top-level assign missing its rhs"))?;
    let loc = loc_of(ast, node);

    let (vid, ty) = match ast.get(lhs_node).token {
      Token::VariableDeclaration => {
        let (name, ty) = self.var_decl_parts(ast, lhs_node)?;
        let mut entry = VariableEntry::new(name, ty.clone());
        entry.is_global = true;
        entry.residency = Residency::Global;
        let v = self.st.variables.push(entry);
        self.st.insert(self.st.global_scope, name, ScopeMember::Variable(v), self.dict)?;
        (v, ty)
      }
      Token::Identifier => {
        let sym = name_val(ast, lhs_node)?;
        let v = self.st.lookup_var(self.st.global_scope, sym, self.dict)?;
        (v, self.st.variables[v].ty.clone())
      }
      _ => return Err(CompileError::code(loc, "invalid top-level assignment target")),
    };

    if matches!(ast.get(rhs_node).token, Token::Constant | Token::CharLiteral) {
      let value = self.literal_node_value(ast, rhs_node)?;
      self.st.variables[vid].init = Some(InitData::Scalar(value));
      return Ok(());
    }

    let mut fs = FnState {
      function: None,
      scope: self.st.global_scope,
      block: std::mem::replace(&mut self.global_init, BasicBlock::new(0)),
      temp_num: self.global_temp_num,
      label_num: self.global_label_num,
      instr_idx: self.global_instr_idx,
    };
    let rhs_val = self.walk_sub_expression(ast, rhs_node, &mut fs)?;
    let rhs_val = self.widen_or_error(&rhs_val, &ty, loc)?;
    let name = self.st.variables[vid].name;
    self.emit_simple_assign(&mut fs, Operand::variable(name, ty), rhs_val, src_of(ast, node));
    self.global_temp_num = fs.temp_num;
    self.global_label_num = fs.label_num;
    self.global_instr_idx = fs.instr_idx;
    self.global_init = fs.block;
    Ok(())
  }

  /// `linearizeClass`: data-only struct/class declarations. Member
  /// functions are not part of this language's lowering surface (no
  /// `class_body` child is ever a `fun`), matching spec.md §3's struct
  /// description, which only names fields.
  fn walk_class_decl(&mut self, ast: &Ast, node: NodeId) -> Result<(), CompileError> {
    let name = name_val(ast, node)?;
    let body_node = ast.children(node).next().ok_or_else(|| internal_error!("class declaration missing its body"))?;
    let sid = self.st.create_struct(self.st.global_scope, name, self.dict)?;
    let members_scope = self.st.structs[sid].members;
    for member_node in ast.children(body_node) {
      if ast.get(member_node).token != Token::VariableDeclaration {
        return Err(CompileError::code(loc_of(ast, member_node), "struct/class members must be plain field declarations"));
      }
      let (mname, mty) = self.var_decl_parts(ast, member_node)?;
      let vid = self.st.variables.push(VariableEntry::new(mname, mty));
      self.st.insert(members_scope, mname, ScopeMember::Variable(vid), self.dict)?;
      self.st.assign_member_offset(sid, vid)?;
    }
    Ok(())
  }

  const ARG_BASE_OFFSET: i32 = 16;

  /// `linearizeFunction` (spec.md §4.E "Entry"): registers the function and
  /// its arguments up front (so recursive calls resolve), then lowers the
  /// body if one is present — a bare `fun` node with no body child is a
  /// forward declaration only.
  fn walk_function_decl(&mut self, ast: &Ast, node: NodeId) -> Result<(), CompileError> {
    let fn_name = name_val(ast, node)?;
    let mut ch = ast.children(node);
    let ret_node = ch.next().ok_or_else(|| internal_error!("fun node missing its return type"))?;
    let return_type = match &ast.get(ret_node).value {
      Value::Ty(t) => t.clone(),
      _ => return Err(internal_error!("fun node's return type child is malformed")),
    };
    let arglist_node = ch.next().ok_or_else(|| internal_error!("fun node missing its argument list"))?;
    let body_node = ch.next();

    let main_scope = self.st.scopes.push(Scope {
      parent_scope: Some(self.st.global_scope),
      parent_function: None,
      name: self.dict.resolve(fn_name).to_string(),
      entries: Vec::new(),
      sub_scope_count: 0,
    });

    let fid = self.st.functions.push(FunctionEntry {
      name: fn_name,
      return_type,
      arg_stack_size: 0,
      arguments: Vec::new(),
      main_scope,
      basic_blocks: Vec::new(),
      is_defined: body_node.is_some(),
      is_asm_fun: false,
      calls_other_function: false,
    });
    self.st.scopes[main_scope].parent_function = Some(fid);
    self.st.insert(self.st.global_scope, fn_name, ScopeMember::Function(fid), self.dict)?;

    let mut offset = Self::ARG_BASE_OFFSET;
    for arg_node in ast.children(arglist_node) {
      let (pname, pty) = self.var_decl_parts(ast, arg_node)?;
      let mut entry = VariableEntry::new(pname, pty);
      entry.stack_offset = offset;
      offset += MACHINE_REGISTER_SIZE_BYTES as i32;
      let vid = self.st.variables.push(entry);
      self.st.insert(main_scope, pname, ScopeMember::Argument(vid), self.dict)?;
      self.st.functions[fid].arguments.push(vid);
    }
    self.st.functions[fid].arg_stack_size = (offset - Self::ARG_BASE_OFFSET) as u32;

    if let Some(body) = body_node {
      let mut fs = FnState { function: Some(fid), scope: main_scope, block: BasicBlock::new(0), temp_num: 0, label_num: 0, instr_idx: 0 };
      self.walk_statement(ast, body, &mut fs)?;
      if !matches!(fs.block.tac.last().map(|l| l.op), Some(Op::Return)) {
        let idx = self.next_idx(&mut fs);
        fs.block.append(TacLine::new(idx, Op::Return, SourceRef::default()).with_slot(0, Slot::Empty));
      }
      let end_scope = fs.scope;
      self.st.add_basic_block(end_scope, fid, fs.block, self.dict)?;
      self.st.collapse_scopes(fid, self.dict)?;
    }
    Ok(())
  }

  // ---- statements ---------------------------------------------------------

  fn walk_statement(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<(), CompileError> {
    match ast.get(node).token {
      Token::CompoundStatement => {
        let saved_scope = fs.scope;
        fs.scope = self.st.create_sub_scope(fs.scope, self.dict)?;
        for child in ast.children(node) {
          self.walk_statement(ast, child, fs)?;
        }
        fs.scope = saved_scope;
        Ok(())
      }
      Token::VariableDeclaration => self.declare_local(ast, node, fs).map(|_| ()),
      Token::Extern => Err(CompileError::code(loc_of(ast, node), "'extern' is only valid at translation-unit scope")),
      Token::Assign => self.walk_assignment(ast, node, fs),
      Token::AddAssign
      | Token::SubAssign
      | Token::MulAssign
      | Token::DivAssign
      | Token::ModAssign
      | Token::AndAssign
      | Token::OrAssign
      | Token::XorAssign
      | Token::LShiftAssign
      | Token::RShiftAssign => self.walk_arithmetic_assignment(ast, node, fs),
      Token::While => self.walk_while(ast, node, fs),
      Token::If => self.walk_if(ast, node, fs),
      Token::FunctionCall => {
        self.walk_function_call(ast, node, fs, false)?;
        Ok(())
      }
      Token::Return => self.walk_return(ast, node, fs),
      Token::Asm => self.walk_inline_asm_stmt(ast, node, fs),
      other => Err(internal_error!("{other:?} is not a valid statement")),
    }
  }

  fn declare_local(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<crate::idx::VariableId, CompileError> {
    let (name, ty) = self.var_decl_parts(ast, node)?;
    let vid = self.st.variables.push(VariableEntry::new(name, ty));
    self.st.insert(fs.scope, name, ScopeMember::Variable(vid), self.dict)?;
    Ok(vid)
  }

  fn walk_inline_asm_stmt(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<(), CompileError> {
    for line_node in ast.children(node) {
      let text = self.asm_line_text(ast, line_node);
      let idx = self.next_idx(fs);
      let mut tl = TacLine::new(idx, Op::Asm, src_of(ast, line_node));
      tl.raw_asm = Some(text);
      fs.block.append(tl);
    }
    if let Some(fid) = fs.function {
      self.st.functions[fid].is_asm_fun = true;
    }
    Ok(())
  }

  fn walk_return(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<(), CompileError> {
    let child = ast.children(node).next();
    let slot0 = match child {
      Some(c) => {
        let v = self.walk_sub_expression(ast, c, fs)?;
        let ret_ty = fs.function.map_or_else(|| Type::scalar(BasicType::Null), |f| self.st.functions[f].return_type.clone());
        let v = self.widen_or_error(&v, &ret_ty, loc_of(ast, node))?;
        Slot::Operand(v)
      }
      None => Slot::Empty,
    };
    let idx = self.next_idx(fs);
    fs.block.append(TacLine::new(idx, Op::Return, src_of(ast, node)).with_slot(0, slot0));
    Ok(())
  }

  // ---- control flow (spec.md §4.E "Control flow") -------------------------

  fn close_and_register_current_block(&mut self, fs: &mut FnState) -> Result<(), CompileError> {
    let block = std::mem::replace(&mut fs.block, BasicBlock::new(0));
    let fid = fs.function.ok_or_else(|| internal_error!("control-flow lowering occurred outside a function"))?;
    self.st.add_basic_block(fs.scope, fid, block, self.dict)?;
    Ok(())
  }

  fn enter_new_block(&mut self, fs: &mut FnState, parent_scope: ScopeId, label: u32) -> Result<(), CompileError> {
    let sub = self.st.create_sub_scope(parent_scope, self.dict)?;
    fs.scope = sub;
    fs.block = BasicBlock::new(label);
    Ok(())
  }

  fn fresh_label(&mut self, fs: &mut FnState) -> u32 {
    fs.label_num += 1;
    fs.label_num
  }

  fn fresh_temp(&mut self, fs: &mut FnState, ty: Type) -> Operand {
    let name = format!(".t{}", fs.temp_num);
    fs.temp_num += 1;
    let sym = self.dict.intern(&name);
    Operand::temp(sym, ty)
  }

  /// `linearizeIfStatement`: pre-block (the condition check), one inner
  /// block per arm each in its own sub-scope, and a convergence block
  /// (spec.md §4.E "Control flow"). With no `else`, the condition's false
  /// target *is* the convergence block.
  fn walk_if(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<(), CompileError> {
    let outer_scope = fs.scope;
    let mut ch = ast.children(node);
    let cond = ch.next().ok_or_else(|| internal_error!("if node missing its condition"))?;
    let then_stmt = ch.next().ok_or_else(|| internal_error!("if node missing its then-branch"))?;
    let else_stmt = ch.next();

    let false_label = self.fresh_label(fs);
    let converge_label = if else_stmt.is_some() { self.fresh_label(fs) } else { false_label };

    self.walk_condition_check(ast, cond, fs, false_label)?;
    self.close_and_register_current_block(fs)?;

    let then_label = self.fresh_label(fs);
    self.enter_new_block(fs, outer_scope, then_label)?;
    self.walk_statement(ast, then_stmt, fs)?;
    let idx = self.next_idx(fs);
    fs.block.append(TacLine::new(idx, Op::Jmp, src_of(ast, then_stmt)).with_slot(0, Slot::Label(converge_label)));
    self.close_and_register_current_block(fs)?;

    if let Some(else_stmt) = else_stmt {
      self.enter_new_block(fs, outer_scope, false_label)?;
      self.walk_statement(ast, else_stmt, fs)?;
      let idx2 = self.next_idx(fs);
      fs.block.append(TacLine::new(idx2, Op::Jmp, src_of(ast, else_stmt)).with_slot(0, Slot::Label(converge_label)));
      self.close_and_register_current_block(fs)?;
    }

    self.enter_new_block(fs, outer_scope, converge_label)?;
    Ok(())
  }

  /// `linearizeWhileLoop`: pre-block falls/jumps into a condition block,
  /// which branches out to the `after` block on failure and into the body
  /// on success; the body is wrapped in `do`/`enddo` markers and ends with
  /// a backward jump to the condition block (spec.md §4.E, §4.F).
  fn walk_while(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<(), CompileError> {
    let outer_scope = fs.scope;
    let mut ch = ast.children(node);
    let cond = ch.next().ok_or_else(|| internal_error!("while node missing its condition"))?;
    let body = ch.next().ok_or_else(|| internal_error!("while node missing its body"))?;

    let cond_label = self.fresh_label(fs);
    let body_label = self.fresh_label(fs);
    let after_label = self.fresh_label(fs);

    let idx = self.next_idx(fs);
    fs.block.append(TacLine::new(idx, Op::Jmp, src_of(ast, node)).with_slot(0, Slot::Label(cond_label)));
    self.close_and_register_current_block(fs)?;

    self.enter_new_block(fs, outer_scope, cond_label)?;
    self.walk_condition_check(ast, cond, fs, after_label)?;
    self.close_and_register_current_block(fs)?;

    self.enter_new_block(fs, outer_scope, body_label)?;
    let do_idx = self.next_idx(fs);
    fs.block.append(TacLine::new(do_idx, Op::Do, src_of(ast, body)));
    self.walk_statement(ast, body, fs)?;
    let enddo_idx = self.next_idx(fs);
    fs.block.append(TacLine::new(enddo_idx, Op::EndDo, src_of(ast, body)));
    let jmp_idx = self.next_idx(fs);
    fs.block.append(TacLine::new(jmp_idx, Op::Jmp, src_of(ast, body)).with_slot(0, Slot::Label(cond_label)));
    self.close_and_register_current_block(fs)?;

    self.enter_new_block(fs, outer_scope, after_label)?;
    Ok(())
  }

  /// `walkConditionCheck`: lower a condition so that it branches to
  /// `false_label` when the condition does not hold, and otherwise falls
  /// through (spec.md §4.E "Condition lowering").
  fn walk_condition_check(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState, false_label: u32) -> Result<(), CompileError> {
    match ast.get(node).token {
      Token::Lt | Token::Gt | Token::Le | Token::Ge | Token::EqEq | Token::Ne => {
        let tok = ast.get(node).token;
        let mut ch = ast.children(node);
        let lhs_node = ch.next().ok_or_else(|| internal_error!("comparison missing its lhs"))?;
        let rhs_node = ch.next().ok_or_else(|| internal_error!("comparison missing its rhs"))?;
        let lhs = self.walk_sub_expression(ast, lhs_node, fs)?;
        let rhs = self.walk_sub_expression(ast, rhs_node, fs)?;
        let inv = inverse_branch_op(tok);
        let idx = self.next_idx(fs);
        let tl = TacLine::new(idx, inv, src_of(ast, node))
          .with_slot(0, Slot::Label(false_label))
          .with_slot(1, Slot::Operand(lhs))
          .with_slot(2, Slot::Operand(rhs));
        fs.block.append(tl);
        Ok(())
      }
      Token::LogicalAnd | Token::LogicalOr | Token::LogicalNot => self.walk_logical_operator(ast, node, fs, false_label),
      _ => {
        let v = self.walk_sub_expression(ast, node, fs)?;
        let idx = self.next_idx(fs);
        let tl = TacLine::new(idx, Op::Beqz, src_of(ast, node)).with_slot(0, Slot::Label(false_label)).with_slot(1, Slot::Operand(v));
        fs.block.append(tl);
        Ok(())
      }
    }
  }

  /// `walkLogicalOperator`: `&&` short-circuits by chaining both operands'
  /// false targets to the same label; `||` introduces a fresh "check b"
  /// block and a "true" convergence block; `!` inverts by swapping which
  /// branch falls through (spec.md §4.E).
  fn walk_logical_operator(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState, false_label: u32) -> Result<(), CompileError> {
    let outer_scope = fs.scope;
    match ast.get(node).token {
      Token::LogicalAnd => {
        let mut ch = ast.children(node);
        let a = ch.next().ok_or_else(|| internal_error!("&& missing its lhs"))?;
        let b = ch.next().ok_or_else(|| internal_error!("&& missing its rhs"))?;
        self.walk_condition_check(ast, a, fs, false_label)?;
        self.walk_condition_check(ast, b, fs, false_label)
      }
      Token::LogicalOr => {
        let mut ch = ast.children(node);
        let a = ch.next().ok_or_else(|| internal_error!("|| missing its lhs"))?;
        let b = ch.next().ok_or_else(|| internal_error!("|| missing its rhs"))?;
        let check_b_label = self.fresh_label(fs);
        let true_label = self.fresh_label(fs);

        self.walk_condition_check(ast, a, fs, check_b_label)?;
        let idx = self.next_idx(fs);
        fs.block.append(TacLine::new(idx, Op::Jmp, src_of(ast, node)).with_slot(0, Slot::Label(true_label)));
        self.close_and_register_current_block(fs)?;

        self.enter_new_block(fs, outer_scope, check_b_label)?;
        self.walk_condition_check(ast, b, fs, false_label)?;
        let idx2 = self.next_idx(fs);
        fs.block.append(TacLine::new(idx2, Op::Jmp, src_of(ast, node)).with_slot(0, Slot::Label(true_label)));
        self.close_and_register_current_block(fs)?;

        self.enter_new_block(fs, outer_scope, true_label)?;
        Ok(())
      }
      Token::LogicalNot => {
        let a = ast.children(node).next().ok_or_else(|| internal_error!("! missing its operand"))?;
        let inverse_label = self.fresh_label(fs);
        self.walk_condition_check(ast, a, fs, inverse_label)?;
        let idx = self.next_idx(fs);
        fs.block.append(TacLine::new(idx, Op::Jmp, src_of(ast, node)).with_slot(0, Slot::Label(false_label)));
        self.close_and_register_current_block(fs)?;

        self.enter_new_block(fs, outer_scope, inverse_label)?;
        Ok(())
      }
      _ => unreachable!(),
    }
  }

  // ---- expressions (spec.md §4.E "Expressions") ---------------------------

  fn walk_sub_expression(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<Operand, CompileError> {
    match ast.get(node).token {
      Token::Identifier => {
        let sym = name_val(ast, node)?;
        let vid = self.st.lookup_var(fs.scope, sym, self.dict)?;
        Ok(Operand::variable(sym, self.st.variables[vid].ty.clone()))
      }
      Token::Constant => {
        let v = int_val(ast, node)?;
        Ok(Operand::literal(v, narrowest_literal_type(v)))
      }
      Token::CharLiteral => {
        let sym = name_val(ast, node)?;
        let text = self.dict.resolve(sym).to_string();
        let code = canonicalize_char_literal(&text, loc_of(ast, node))?;
        Ok(Operand::literal(code, Type::scalar(BasicType::U8)))
      }
      Token::StringLiteral => self.walk_string_literal(ast, node),
      Token::Sizeof => self.walk_sizeof(ast, node, fs),
      Token::Dereference => self.walk_dereference(ast, node, fs),
      Token::AddressOf => self.walk_addr_of(ast, node, fs),
      Token::ArrayIndex => self.walk_array_ref(ast, node, fs),
      Token::Dot | Token::Arrow => self.walk_member_access_rvalue(ast, node, fs),
      Token::FunctionCall => self
        .walk_function_call(ast, node, fs, true)?
        .ok_or_else(|| internal_error!("function call in value context produced no value")),
      Token::Cast => self.walk_cast(ast, node, fs),
      Token::BitwiseNot => self.walk_unary_not(ast, node, fs),
      Token::Add
      | Token::Sub
      | Token::Multiply
      | Token::Divide
      | Token::Modulo
      | Token::LShift
      | Token::RShift
      | Token::BitwiseAnd
      | Token::BitwiseOr
      | Token::BitwiseXor => self.walk_expression(ast, node, fs),
      other => Err(CompileError::code(loc_of(ast, node), format!("'{other:?}' cannot be used as a value"))),
    }
  }

  fn walk_expression(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<Operand, CompileError> {
    let op = token_to_op(ast.get(node).token)?;
    let mut ch = ast.children(node);
    let lhs_node = ch.next().ok_or_else(|| internal_error!("binary expression missing its lhs"))?;
    let rhs_node = ch.next().ok_or_else(|| internal_error!("binary expression missing its rhs"))?;
    let lhs = self.walk_sub_expression(ast, lhs_node, fs)?;
    let rhs = self.walk_sub_expression(ast, rhs_node, fs)?;
    self.emit_binary(fs, op, lhs, rhs, src_of(ast, node), loc_of(ast, node))
  }

  /// Shared by plain binary expressions and compound-assignment synthesis:
  /// scales pointer arithmetic by the pointee's size, then emits the
  /// arithmetic op into a fresh temp (spec.md §4.E "Expressions" pointer
  /// scaling rule).
  fn emit_binary(&mut self, fs: &mut FnState, op: Op, lhs: Operand, mut rhs: Operand, src: SourceRef, loc: Location) -> Result<Operand, CompileError> {
    let lhs_ty = lhs.effective_type().clone();
    let rhs_ty = rhs.effective_type().clone();

    if lhs_ty.is_pointer() && rhs_ty.is_pointer() {
      return Err(CompileError::code(loc, "arithmetic between two pointer operands is not allowed"));
    }

    let dest_ty = if lhs_ty.is_pointer() {
      let elem_ty = lhs_ty.dereferenced();
      let elem_size = self.st.size_of_type(&elem_ty)?;
      if elem_size > 1 {
        let scale_ty = rhs_ty.clone();
        let scaled = self.fresh_temp(fs, scale_ty.clone());
        let idx = self.next_idx(fs);
        let tl = TacLine::new(idx, Op::Mul, src)
          .with_slot(0, Slot::Operand(scaled.clone()))
          .with_slot(1, Slot::Operand(rhs.clone()))
          .with_slot(2, Slot::Operand(Operand::literal(elem_size as i64, scale_ty)));
        fs.block.append(tl);
        rhs = scaled;
      }
      lhs_ty.clone()
    } else {
      wider_of(&lhs_ty, &rhs_ty, loc)?
    };

    let dest = self.fresh_temp(fs, dest_ty);
    let idx = self.next_idx(fs);
    let tl = TacLine::new(idx, op, src).with_slot(0, Slot::Operand(dest.clone())).with_slot(1, Slot::Operand(lhs)).with_slot(2, Slot::Operand(rhs));
    fs.block.append(tl);
    Ok(dest)
  }

  fn walk_unary_not(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<Operand, CompileError> {
    let inner = ast.children(node).next().ok_or_else(|| internal_error!("bitwise-not missing its operand"))?;
    let v = self.walk_sub_expression(ast, inner, fs)?;
    let ty = v.effective_type().clone();
    let dest = self.fresh_temp(fs, ty);
    let idx = self.next_idx(fs);
    fs.block.append(TacLine::new(idx, Op::BitwiseNot, src_of(ast, node)).with_slot(0, Slot::Operand(dest.clone())).with_slot(1, Slot::Operand(v)));
    Ok(dest)
  }

  fn walk_cast(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<Operand, CompileError> {
    let target_ty = match &ast.get(node).value {
      Value::Ty(t) => t.clone(),
      _ => return Err(internal_error!("cast node missing its target type")),
    };
    let inner = ast.children(node).next().ok_or_else(|| internal_error!("cast missing its operand"))?;
    let v = self.walk_sub_expression(ast, inner, fs)?;
    Ok(v.with_cast(target_ty))
  }

  fn walk_sizeof(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<Operand, CompileError> {
    let child = ast.children(node).next().ok_or_else(|| internal_error!("sizeof missing its operand"))?;
    let loc = loc_of(ast, node);
    let size = match &ast.get(child).value {
      Value::Ty(t) => self.st.size_of_type(t)?,
      Value::Name(sym) => match self.st.lookup(fs.scope, *sym) {
        Some(ScopeMember::Variable(v) | ScopeMember::Argument(v)) => self.st.size_of_type(&self.st.variables[v].ty.clone())?,
        Some(ScopeMember::Struct(sid)) => self.st.structs[sid].total_size,
        _ => return Err(CompileError::code(loc, format!("sizeof of unknown identifier '{}'", self.dict.resolve(*sym)))),
      },
      _ => return Err(internal_error!("malformed sizeof operand")),
    };
    Ok(Operand::literal(size as i64, Type::scalar(BasicType::U8)))
  }

  fn walk_dereference(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<Operand, CompileError> {
    let inner_node = ast.children(node).next().ok_or_else(|| internal_error!("dereference missing its operand"))?;
    let inner = self.walk_sub_expression(ast, inner_node, fs)?;
    let ty = inner.effective_type().clone();
    if ty.pointer_depth == 0 {
      return Err(CompileError::code(loc_of(ast, node), "dereference of a non-pointer value"));
    }
    let dest_ty = ty.dereferenced();
    let dest = self.fresh_temp(fs, dest_ty);
    let idx = self.next_idx(fs);
    fs.block.append(TacLine::new(idx, Op::Load, src_of(ast, node)).with_slot(0, Slot::Operand(dest.clone())).with_slot(1, Slot::Operand(inner)));
    Ok(dest)
  }

  /// `walkAddrOf`: taking the address of a local/argument forces it to
  /// live on the stack for the rest of its lifetime (spec.md §4.E, §4.F
  /// "mustSpill").
  fn walk_addr_of(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<Operand, CompileError> {
    let inner_node = ast.children(node).next().ok_or_else(|| internal_error!("address-of missing its operand"))?;
    let loc = loc_of(ast, node);
    match ast.get(inner_node).token {
      Token::Identifier => {
        let sym = name_val(ast, inner_node)?;
        let vid = self.st.lookup_var(fs.scope, sym, self.dict)?;
        let ty = self.st.variables[vid].ty.clone();
        if ty.is_array() {
          return Err(CompileError::code(loc, "address-of a local array is not allowed"));
        }
        self.st.variables[vid].must_spill = true;
        let dest = self.fresh_temp(fs, ty.clone().pointer_to());
        let idx = self.next_idx(fs);
        fs.block.append(
          TacLine::new(idx, Op::AddrOf, src_of(ast, node)).with_slot(0, Slot::Operand(dest.clone())).with_slot(1, Slot::Operand(Operand::variable(sym, ty))),
        );
        Ok(dest)
      }
      Token::ArrayIndex => {
        let (base, index, elem_ty, log2scale) = self.lower_array_ref_parts(ast, inner_node, fs)?;
        let dest = self.fresh_temp(fs, elem_ty.clone().pointer_to());
        let src = src_of(ast, node);
        if let Payload::Literal(v) = index.payload {
          let offset = v * self.st.size_of_type(&elem_ty)? as i64;
          let idx = self.next_idx(fs);
          fs.block.append(
            TacLine::new(idx, Op::LeaOff, src).with_slot(0, Slot::Operand(dest.clone())).with_slot(1, Slot::Operand(base)).with_slot(2, Slot::Offset(offset)),
          );
        } else {
          let idx = self.next_idx(fs);
          fs.block.append(
            TacLine::new(idx, Op::LeaArr, src)
              .with_slot(0, Slot::Operand(dest.clone()))
              .with_slot(1, Slot::Operand(base))
              .with_slot(2, Slot::Operand(index))
              .with_slot(3, Slot::LogScale(log2scale)),
          );
        }
        Ok(dest)
      }
      Token::Dot | Token::Arrow => {
        let (base, member_ty, byte_offset) = self.lower_member_access_parts(ast, inner_node, fs)?;
        let dest = self.fresh_temp(fs, member_ty.pointer_to());
        let idx = self.next_idx(fs);
        fs.block.append(
          TacLine::new(idx, Op::LeaOff, src_of(ast, node))
            .with_slot(0, Slot::Operand(dest.clone()))
            .with_slot(1, Slot::Operand(base))
            .with_slot(2, Slot::Offset(byte_offset as i64)),
        );
        Ok(dest)
      }
      _ => Err(CompileError::code(loc, "invalid operand to address-of")),
    }
  }

  fn lower_array_ref_parts(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<(Operand, Operand, Type, u32), CompileError> {
    let mut ch = ast.children(node);
    let base_node = ch.next().ok_or_else(|| internal_error!("array_index missing its base"))?;
    let index_node = ch.next().ok_or_else(|| internal_error!("array_index missing its index"))?;
    let base = self.walk_sub_expression(ast, base_node, fs)?;
    let index = self.walk_sub_expression(ast, index_node, fs)?;
    let base_ty = base.effective_type().clone();
    let elem_ty = if let Some(info) = &base_ty.array {
      (*info.element).clone()
    } else if base_ty.is_pointer() {
      base_ty.dereferenced()
    } else {
      return Err(CompileError::code(loc_of(ast, node), "indexing a value that is neither an array nor a pointer"));
    };
    let elem_size = self.st.size_of_type(&elem_ty)?;
    let log2scale = log2_exact(elem_size)
      .ok_or_else(|| internal_error!("array element size {elem_size} is not a power of two"))?;
    Ok((base, index, elem_ty, log2scale))
  }

  /// `walkArrayRef`: a constant index folds to `load_off`/`lea_off`; a
  /// variable index uses `load_arr`/`lea_arr`. Struct-typed elements are
  /// always promoted to the `lea_*` (address-producing) form (spec.md
  /// §4.E "Array indexing").
  fn walk_array_ref(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<Operand, CompileError> {
    let (base, index, elem_ty, log2scale) = self.lower_array_ref_parts(ast, node, fs)?;
    let is_struct_elem = elem_ty.basic == BasicType::Struct;
    let dest_ty = if is_struct_elem { elem_ty.clone().pointer_to() } else { elem_ty.clone() };
    let dest = self.fresh_temp(fs, dest_ty);
    let src = src_of(ast, node);

    if let Payload::Literal(v) = index.payload {
      let offset = v * self.st.size_of_type(&elem_ty)? as i64;
      let op = if is_struct_elem { Op::LeaOff } else { Op::LoadOff };
      let idx = self.next_idx(fs);
      fs.block.append(TacLine::new(idx, op, src).with_slot(0, Slot::Operand(dest.clone())).with_slot(1, Slot::Operand(base)).with_slot(2, Slot::Offset(offset)));
    } else {
      let op = if is_struct_elem { Op::LeaArr } else { Op::LoadArr };
      let idx = self.next_idx(fs);
      fs.block.append(
        TacLine::new(idx, op, src)
          .with_slot(0, Slot::Operand(dest.clone()))
          .with_slot(1, Slot::Operand(base))
          .with_slot(2, Slot::Operand(index))
          .with_slot(3, Slot::LogScale(log2scale)),
      );
    }
    Ok(dest)
  }

  /// Resolves a `.`/`->` chain (possibly nested, possibly rooted in an
  /// array-of-structs element) down to `(base pointer, member type,
  /// cumulative byte offset)` (spec.md §4.E "Member access").
  fn lower_member_access_parts(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<(Operand, Type, u32), CompileError> {
    let tok = ast.get(node).token;
    let mut ch = ast.children(node);
    let lhs_node = ch.next().ok_or_else(|| internal_error!("member access missing its lhs"))?;
    let member_node = ch.next().ok_or_else(|| internal_error!("member access missing its member name"))?;
    let member_name = name_val(ast, member_node)?;
    let loc = loc_of(ast, node);

    let (base_ptr, base_offset, struct_ty) = match ast.get(lhs_node).token {
      Token::Dot | Token::Arrow => {
        let (inner_base, inner_member_ty, inner_offset) = self.lower_member_access_parts(ast, lhs_node, fs)?;
        if inner_member_ty.basic != BasicType::Struct || inner_member_ty.pointer_depth != 0 {
          return Err(CompileError::code(loc, "chained '.' requires a struct-valued member"));
        }
        (inner_base, inner_offset, inner_member_ty)
      }
      Token::ArrayIndex => {
        let (b, idx_operand, elem_ty, log2scale) = self.lower_array_ref_parts(ast, lhs_node, fs)?;
        if elem_ty.basic != BasicType::Struct {
          return Err(CompileError::code(loc, "'.'/'->' target must be a struct"));
        }
        let dest = self.fresh_temp(fs, elem_ty.clone().pointer_to());
        let s = src_of(ast, lhs_node);
        if let Payload::Literal(v) = idx_operand.payload {
          let offset = v * self.st.size_of_type(&elem_ty)? as i64;
          let i2 = self.next_idx(fs);
          fs.block.append(TacLine::new(i2, Op::LeaOff, s).with_slot(0, Slot::Operand(dest.clone())).with_slot(1, Slot::Operand(b)).with_slot(2, Slot::Offset(offset)));
        } else {
          let i2 = self.next_idx(fs);
          fs.block.append(
            TacLine::new(i2, Op::LeaArr, s)
              .with_slot(0, Slot::Operand(dest.clone()))
              .with_slot(1, Slot::Operand(b))
              .with_slot(2, Slot::Operand(idx_operand))
              .with_slot(3, Slot::LogScale(log2scale)),
          );
        }
        (dest, 0u32, elem_ty)
      }
      _ => {
        let operand = self.walk_sub_expression(ast, lhs_node, fs)?;
        let ty = operand.effective_type().clone();
        match tok {
          Token::Arrow => {
            if !(ty.pointer_depth == 1 && ty.basic == BasicType::Struct) {
              return Err(CompileError::code(loc, "'->' requires a single-indirection pointer to struct"));
            }
            (operand, 0u32, ty.dereferenced())
          }
          Token::Dot => {
            if !(ty.pointer_depth == 0 && ty.basic == BasicType::Struct) {
              return Err(CompileError::code(loc, "'.' requires a non-indirect struct value"));
            }
            let sym = match &ast.get(lhs_node).value {
              Value::Name(s) => *s,
              _ => return Err(CompileError::code(loc, "'.' target must be an addressable struct value")),
            };
            let vid = self.st.lookup_var(fs.scope, sym, self.dict)?;
            self.st.variables[vid].must_spill = true;
            let addr = self.fresh_temp(fs, ty.clone().pointer_to());
            let i2 = self.next_idx(fs);
            fs.block.append(
              TacLine::new(i2, Op::AddrOf, src_of(ast, lhs_node)).with_slot(0, Slot::Operand(addr.clone())).with_slot(1, Slot::Operand(operand)),
            );
            (addr, 0u32, ty)
          }
          _ => unreachable!(),
        }
      }
    };

    let sid = self.st.lookup_struct_by_type(fs.scope, &struct_ty, self.dict)?;
    let member_loc = self.st.lookup_member(sid, member_name, self.dict)?;
    let member_ty = self.st.variables[member_loc.variable].ty.clone();
    let total_offset = base_offset + member_loc.byte_offset;
    Ok((base_ptr, member_ty, total_offset))
  }

  fn walk_member_access_rvalue(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<Operand, CompileError> {
    let (base, member_ty, offset) = self.lower_member_access_parts(ast, node, fs)?;
    let is_struct_val = member_ty.basic == BasicType::Struct && member_ty.pointer_depth == 0;
    let dest_ty = if is_struct_val { member_ty.clone().pointer_to() } else { member_ty.decay() };
    let dest = self.fresh_temp(fs, dest_ty);
    let op = if is_struct_val { Op::LeaOff } else { Op::LoadOff };
    let base_with_cast = base.with_cast(member_ty);
    let idx = self.next_idx(fs);
    fs.block.append(
      TacLine::new(idx, op, src_of(ast, node))
        .with_slot(0, Slot::Operand(dest.clone()))
        .with_slot(1, Slot::Operand(base_with_cast))
        .with_slot(2, Slot::Offset(offset as i64)),
    );
    Ok(dest)
  }

  /// `walkFunctionCall`: evaluates arguments left to right, reserves the
  /// callee's argument stack, stores them right to left, then emits the
  /// call (spec.md §4.E "Function call marshalling"). `want_value` rejects
  /// using the result of a function that returns nothing.
  fn walk_function_call(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState, want_value: bool) -> Result<Option<Operand>, CompileError> {
    let callee_name = name_val(ast, node)?;
    let loc = loc_of(ast, node);
    let fid = self.st.lookup_fun(fs.scope, callee_name, self.dict)?;
    if let Some(caller) = fs.function {
      self.st.functions[caller].calls_other_function = true;
    }

    let args: Vec<NodeId> = ast.children(node).collect();
    let params = self.st.functions[fid].arguments.clone();
    if args.len() != params.len() {
      return Err(CompileError::code(
        loc,
        format!("call to '{}' passes {} argument(s), expected {}", self.dict.resolve(callee_name), args.len(), params.len()),
      ));
    }

    let mut arg_operands = Vec::with_capacity(args.len());
    for &a in &args {
      arg_operands.push(self.walk_sub_expression(ast, a, fs)?);
    }

    let arg_stack_size = self.st.functions[fid].arg_stack_size;
    let src = src_of(ast, node);
    let reserve_idx = self.next_idx(fs);
    fs.block.append(TacLine::new(reserve_idx, Op::StackReserve, src).with_slot(0, Slot::Offset(arg_stack_size as i64)));

    for i in (0..args.len()).rev() {
      let param_ty = self.st.variables[params[i]].ty.clone();
      let operand = self.widen_or_error(&arg_operands[i], &param_ty, loc)?;
      let offset = self.st.variables[params[i]].stack_offset;
      let idx = self.next_idx(fs);
      fs.block.append(
        TacLine::new(idx, Op::StackStore, src_of(ast, args[i])).with_slot(0, Slot::Operand(operand)).with_slot(1, Slot::Offset(offset as i64)),
      );
    }

    let return_ty = self.st.functions[fid].return_type.clone();
    if want_value && return_ty.basic == BasicType::Null {
      return Err(CompileError::code(loc, format!("use of '{}'s return value, but it returns nothing", self.dict.resolve(callee_name))));
    }
    let dest = if return_ty.basic == BasicType::Null { None } else { Some(self.fresh_temp(fs, return_ty)) };
    let call_idx = self.next_idx(fs);
    let mut tl = TacLine::new(call_idx, Op::Call, src).with_slot(1, Slot::Callee(callee_name));
    if let Some(d) = &dest {
      tl = tl.with_slot(0, Slot::Operand(d.clone()));
    }
    fs.block.append(tl);
    Ok(dest)
  }

  fn walk_string_literal(&mut self, ast: &Ast, node: NodeId) -> Result<Operand, CompileError> {
    let sym = name_val(ast, node)?;
    let text = self.dict.resolve(sym).to_string();
    let mangled = mangle_string_literal(&text);
    let mangled_sym = self.dict.intern(&mangled);
    let vid = match self.st.lookup(self.st.global_scope, mangled_sym) {
      Some(ScopeMember::Variable(v)) => v,
      _ => {
        let ty = Type::array_of(Type::scalar(BasicType::U8), (text.len() + 1) as u32);
        let mut bytes = text.into_bytes();
        bytes.push(0);
        let mut entry = VariableEntry::new(mangled_sym, ty);
        entry.is_global = true;
        entry.is_string_literal = true;
        entry.residency = Residency::Global;
        entry.init = Some(InitData::Bytes(bytes));
        let v = self.st.variables.push(entry);
        self.st.insert(self.st.global_scope, mangled_sym, ScopeMember::Variable(v), self.dict)?;
        v
      }
    };
    Ok(Operand::variable(mangled_sym, self.st.variables[vid].ty.clone()))
  }

  // ---- assignments (spec.md §4.E "Assignments") ---------------------------

  fn walk_assignment(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<(), CompileError> {
    let mut ch = ast.children(node);
    let lhs_node = ch.next().ok_or_else(|| internal_error!("assign missing its lhs"))?;
    let rhs_node = ch.next().ok_or_else(|| internal_error!("assign missing its rhs"))?;
    let loc = loc_of(ast, node);

    if ast.get(lhs_node).token == Token::VariableDeclaration {
      let vid = self.declare_local(ast, lhs_node, fs)?;
      let ty = self.st.variables[vid].ty.clone();
      if ty.is_array() {
        return Err(CompileError::code(loc, "local arrays may not be assigned"));
      }
      let rhs_val = self.walk_sub_expression(ast, rhs_node, fs)?;
      let rhs_val = self.widen_or_error(&rhs_val, &ty, loc)?;
      let name = self.st.variables[vid].name;
      self.emit_simple_assign(fs, Operand::variable(name, ty), rhs_val, src_of(ast, node));
      return Ok(());
    }

    let rhs_val = self.walk_sub_expression(ast, rhs_node, fs)?;
    self.store_into_lvalue(ast, lhs_node, fs, rhs_val)
  }

  /// `walkArithmeticAssignment`: `lhs op= rhs` without a synthetic AST node
  /// — `lhs` is lowered once as an rvalue to compute the new value, then
  /// stored back through the same lvalue dispatch `walk_assignment` uses
  /// (spec.md §4.E "Compound assignment").
  fn walk_arithmetic_assignment(&mut self, ast: &Ast, node: NodeId, fs: &mut FnState) -> Result<(), CompileError> {
    let op = compound_op_to_binary_op(ast.get(node).token)?;
    let mut ch = ast.children(node);
    let lhs_node = ch.next().ok_or_else(|| internal_error!("compound assignment missing its lhs"))?;
    let rhs_node = ch.next().ok_or_else(|| internal_error!("compound assignment missing its rhs"))?;
    let lhs_val = self.walk_sub_expression(ast, lhs_node, fs)?;
    let rhs_val = self.walk_sub_expression(ast, rhs_node, fs)?;
    let result = self.emit_binary(fs, op, lhs_val, rhs_val, src_of(ast, node), loc_of(ast, node))?;
    self.store_into_lvalue(ast, lhs_node, fs, result)
  }

  fn store_into_lvalue(&mut self, ast: &Ast, lhs_node: NodeId, fs: &mut FnState, rhs: Operand) -> Result<(), CompileError> {
    let loc = loc_of(ast, lhs_node);
    match ast.get(lhs_node).token {
      Token::Identifier => {
        let sym = name_val(ast, lhs_node)?;
        let vid = self.st.lookup_var(fs.scope, sym, self.dict)?;
        let ty = self.st.variables[vid].ty.clone();
        if ty.is_array() {
          return Err(CompileError::code(loc, "assignment to a local array variable is not allowed"));
        }
        let rhs = self.widen_or_error(&rhs, &ty, loc)?;
        self.emit_simple_assign(fs, Operand::variable(sym, ty), rhs, src_of(ast, lhs_node));
        Ok(())
      }
      Token::Dereference => {
        let inner = ast.children(lhs_node).next().ok_or_else(|| internal_error!("dereference missing its operand"))?;
        let addr = self.walk_sub_expression(ast, inner, fs)?;
        let ptr_ty = addr.effective_type().clone();
        if ptr_ty.pointer_depth == 0 {
          return Err(CompileError::code(loc, "dereference of a non-pointer value"));
        }
        let pointee = ptr_ty.dereferenced();
        let rhs = self.widen_or_error(&rhs, &pointee, loc)?;
        let idx = self.next_idx(fs);
        fs.block.append(TacLine::new(idx, Op::Store, src_of(ast, lhs_node)).with_slot(0, Slot::Operand(addr)).with_slot(1, Slot::Operand(rhs)));
        Ok(())
      }
      Token::ArrayIndex => {
        let (base, index, elem_ty, log2scale) = self.lower_array_ref_parts(ast, lhs_node, fs)?;
        let rhs = self.widen_or_error(&rhs, &elem_ty, loc)?;
        let idx = self.next_idx(fs);
        fs.block.append(
          TacLine::new(idx, Op::StoreArr, src_of(ast, lhs_node))
            .with_slot(0, Slot::Operand(base))
            .with_slot(1, Slot::Operand(index))
            .with_slot(2, Slot::LogScale(log2scale))
            .with_slot(3, Slot::Operand(rhs)),
        );
        Ok(())
      }
      Token::Dot | Token::Arrow => {
        let (base, member_ty, byte_offset) = self.lower_member_access_parts(ast, lhs_node, fs)?;
        let rhs = self.widen_or_error(&rhs, &member_ty, loc)?;
        let base = base.with_cast(member_ty);
        let idx = self.next_idx(fs);
        fs.block.append(
          TacLine::new(idx, Op::StoreOff, src_of(ast, lhs_node))
            .with_slot(0, Slot::Operand(base))
            .with_slot(1, Slot::Offset(byte_offset as i64))
            .with_slot(2, Slot::Operand(rhs)),
        );
        Ok(())
      }
      other => Err(CompileError::code(loc, format!("'{other:?}' is not a valid assignment target"))),
    }
  }

  fn emit_simple_assign(&mut self, fs: &mut FnState, dest: Operand, src_val: Operand, source: SourceRef) {
    let idx = self.next_idx(fs);
    fs.block.append(TacLine::new(idx, Op::Assign, source).with_slot(0, Slot::Operand(dest)).with_slot(1, Slot::Operand(src_val)));
  }

  fn widen_or_error(&self, src: &Operand, dst_ty: &Type, loc: Location) -> Result<Operand, CompileError> {
    let src_ty = src.effective_type().clone();
    if src_ty == *dst_ty {
      return Ok(src.clone());
    }
    if src_ty.compare_allow_implicit_widening(dst_ty) {
      return Ok(src.clone().with_cast(dst_ty.clone()));
    }
    Err(CompileError::code(loc, format!("cannot convert '{}' to '{}'", src_ty.render(self.dict), dst_ty.render(self.dict))))
  }
}

// ---- free helpers -----------------------------------------------------------

fn loc_of(ast: &Ast, node: NodeId) -> Location {
  let n = ast.get(node);
  Location::new(n.source_line, n.source_col)
}

fn src_of(ast: &Ast, node: NodeId) -> SourceRef {
  let n = ast.get(node);
  SourceRef { line: n.source_line, col: n.source_col }
}

fn name_val(ast: &Ast, node: NodeId) -> Result<Symbol, CompileError> {
  match &ast.get(node).value {
    Value::Name(s) => Ok(*s),
    _ => Err(internal_error!("expected a name-valued node")),
  }
}

fn int_val(ast: &Ast, node: NodeId) -> Result<i64, CompileError> {
  match &ast.get(node).value {
    Value::Int(v) => Ok(*v),
    _ => Err(internal_error!("expected an integer constant node")),
  }
}

/// Picks the narrowest unsigned type a bare integer literal fits in
/// (spec.md §4.E "Expressions").
fn narrowest_literal_type(v: i64) -> Type {
  if (0..=0xFF).contains(&v) {
    Type::scalar(BasicType::U8)
  } else if (0..=0xFFFF).contains(&v) {
    Type::scalar(BasicType::U16)
  } else if (0..=0xFFFF_FFFF).contains(&v) {
    Type::scalar(BasicType::U32)
  } else {
    Type::scalar(BasicType::U64)
  }
}

/// Canonicalise a raw character-literal body to its numeric code (spec.md
/// §4.E "String/char literals"): either a single raw byte, or one of the
/// seven standard C escapes.
fn canonicalize_char_literal(text: &str, loc: Location) -> Result<i64, CompileError> {
  let bytes = text.as_bytes();
  if bytes.len() == 1 {
    return Ok(bytes[0] as i64);
  }
  if bytes.len() == 2 && bytes[0] == b'\\' {
    let code = match bytes[1] {
      b'a' => 7,
      b'b' => 8,
      b'n' => 10,
      b'r' => 13,
      b't' => 9,
      b'\\' => 92,
      b'\'' => 39,
      b'"' => 34,
      other => return Err(CompileError::code(loc, format!("unknown escape sequence '\\{}'", other as char))),
    };
    return Ok(code);
  }
  Err(CompileError::code(loc, format!("malformed character literal '{text}'")))
}

/// Deterministically folds a string literal's raw text into a legal
/// assembler-symbol suffix: whitespace becomes `_`, alphanumerics pass
/// through, everything else maps to a letter by byte value (spec.md §4.E
/// "String literals").
fn mangle_string_literal(s: &str) -> String {
  let mut out = String::from("__str_");
  for b in s.bytes() {
    if b.is_ascii_whitespace() {
      out.push('_');
    } else if b.is_ascii_alphanumeric() {
      out.push(b as char);
    } else {
      out.push((b'a' + (b % 26)) as char);
    }
  }
  out
}

fn log2_exact(n: u32) -> Option<u32> {
  if n == 0 {
    Some(0)
  } else if n.is_power_of_two() {
    Some(n.trailing_zeros())
  } else {
    None
  }
}

fn token_to_op(tok: Token) -> Result<Op, CompileError> {
  Ok(match tok {
    Token::Add => Op::Add,
    Token::Sub => Op::Sub,
    Token::Multiply => Op::Mul,
    Token::Divide => Op::Div,
    Token::Modulo => Op::Mod,
    Token::LShift => Op::LShift,
    Token::RShift => Op::RShift,
    Token::BitwiseAnd => Op::BitwiseAnd,
    Token::BitwiseOr => Op::BitwiseOr,
    Token::BitwiseXor => Op::BitwiseXor,
    other => return Err(internal_error!("{other:?} is not a binary arithmetic operator")),
  })
}

fn compound_op_to_binary_op(tok: Token) -> Result<Op, CompileError> {
  Ok(match tok {
    Token::AddAssign => Op::Add,
    Token::SubAssign => Op::Sub,
    Token::MulAssign => Op::Mul,
    Token::DivAssign => Op::Div,
    Token::ModAssign => Op::Mod,
    Token::AndAssign => Op::BitwiseAnd,
    Token::OrAssign => Op::BitwiseOr,
    Token::XorAssign => Op::BitwiseXor,
    Token::LShiftAssign => Op::LShift,
    Token::RShiftAssign => Op::RShift,
    other => return Err(internal_error!("{other:?} is not a compound-assignment operator")),
  })
}

/// The branch that is taken when the comparison is *false* — the condition
/// check emits this so the fall-through path is the condition-true path
/// (spec.md §4.E "Condition lowering").
fn inverse_branch_op(tok: Token) -> Op {
  match tok {
    Token::Lt => Op::Bgeu,
    Token::Gt => Op::Bleu,
    Token::Le => Op::Bgtu,
    Token::Ge => Op::Bltu,
    Token::EqEq => Op::Bne,
    Token::Ne => Op::Beq,
    _ => unreachable!("only comparison tokens reach inverse_branch_op"),
  }
}

fn wider_of(a: &Type, b: &Type, loc: Location) -> Result<Type, CompileError> {
  if a == b {
    return Ok(a.clone());
  }
  if a.compare_allow_implicit_widening(b) {
    return Ok(b.clone());
  }
  if b.compare_allow_implicit_widening(a) {
    return Ok(a.clone());
  }
  Err(CompileError::code(loc, "operand types are not compatible"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::AstBuilder;

  fn dict_and_file() -> (Dictionary, Symbol) {
    let mut dict = Dictionary::new();
    let f = dict.intern("t.sub");
    (dict, f)
  }

  #[test]
  fn lowers_a_function_returning_a_sum() {
    let (mut dict, f) = dict_and_file();
    let mut b = AstBuilder::new();
    let u32_ty = Type::scalar(BasicType::U32);

    let a_name = dict.intern("a");
    let b_name = dict.intern("b");
    let a_ty_leaf = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
    let a_decl = b.node(Token::VariableDeclaration, Value::Name(a_name), &[a_ty_leaf], f, 1, 1);
    let b_ty_leaf = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
    let b_decl = b.node(Token::VariableDeclaration, Value::Name(b_name), &[b_ty_leaf], f, 1, 1);
    let arglist = b.node(Token::ArgList, Value::None, &[a_decl, b_decl], f, 1, 1);
    let ret_ty_leaf = b.leaf(Token::TypeName, Value::Ty(u32_ty), f, 1, 1);

    let a_id = b.leaf(Token::Identifier, Value::Name(a_name), f, 1, 1);
    let b_id = b.leaf(Token::Identifier, Value::Name(b_name), f, 1, 1);
    let add_expr = b.node(Token::Add, Value::None, &[a_id, b_id], f, 1, 1);
    let ret_stmt = b.node(Token::Return, Value::None, &[add_expr], f, 1, 1);
    let body = b.node(Token::CompoundStatement, Value::None, &[ret_stmt], f, 1, 1);

    let fn_name = dict.intern("add");
    let fun_node = b.node(Token::Fun, Value::Name(fn_name), &[ret_ty_leaf, arglist, body], f, 1, 1);
    let tu = b.node(Token::TranslationUnit, Value::None, &[fun_node], f, 1, 1);
    let ast = b.finish(tu);

    let lowered = lower(&ast, &mut dict).unwrap();
    let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
      Some(ScopeMember::Function(fid)) => fid,
      _ => panic!("function not registered"),
    };
    let func = &lowered.symtab.functions[fid];
    assert_eq!(func.basic_blocks.len(), 1);
    let block = &func.basic_blocks[0];
    assert_eq!(block.tac.len(), 2);
    assert_eq!(block.tac[0].op, Op::Add);
    assert_eq!(block.tac[1].op, Op::Return);
    assert!(block.indices_are_contiguous());
  }

  #[test]
  fn lowers_a_while_loop_into_three_extra_blocks() {
    let (mut dict, f) = dict_and_file();
    let mut b = AstBuilder::new();
    let u32_ty = Type::scalar(BasicType::U32);

    let n_name = dict.intern("n");
    let n_ty_leaf = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
    let n_decl = b.node(Token::VariableDeclaration, Value::Name(n_name), &[n_ty_leaf], f, 1, 1);
    let zero = b.leaf(Token::Constant, Value::Int(0), f, 1, 1);
    let n_decl_assign = b.node(Token::Assign, Value::None, &[n_decl, zero], f, 1, 1);

    let n_id_cond = b.leaf(Token::Identifier, Value::Name(n_name), f, 1, 1);
    let ten = b.leaf(Token::Constant, Value::Int(10), f, 1, 1);
    let cond = b.node(Token::Lt, Value::None, &[n_id_cond, ten], f, 1, 1);

    let n_id_body = b.leaf(Token::Identifier, Value::Name(n_name), f, 1, 1);
    let one = b.leaf(Token::Constant, Value::Int(1), f, 1, 1);
    let inc = b.node(Token::AddAssign, Value::None, &[n_id_body, one], f, 1, 1);
    let body = b.node(Token::CompoundStatement, Value::None, &[inc], f, 1, 1);
    let while_node = b.node(Token::While, Value::None, &[cond, body], f, 1, 1);

    let ret_stmt = b.node(Token::Return, Value::None, &[], f, 1, 1);
    let fn_body = b.node(Token::CompoundStatement, Value::None, &[n_decl_assign, while_node, ret_stmt], f, 1, 1);

    let arglist = b.node(Token::ArgList, Value::None, &[], f, 1, 1);
    let null_ty_leaf = b.leaf(Token::TypeName, Value::Ty(Type::scalar(BasicType::Null)), f, 1, 1);
    let fn_name = dict.intern("count");
    let fun_node = b.node(Token::Fun, Value::Name(fn_name), &[null_ty_leaf, arglist, fn_body], f, 1, 1);
    let tu = b.node(Token::TranslationUnit, Value::None, &[fun_node], f, 1, 1);
    let ast = b.finish(tu);

    let lowered = lower(&ast, &mut dict).unwrap();
    let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
      Some(ScopeMember::Function(fid)) => fid,
      _ => panic!("function not registered"),
    };
    let func = &lowered.symtab.functions[fid];
    // pre-block (decl+assign, then jmp) + cond block + body block + after block
    assert_eq!(func.basic_blocks.len(), 4);
    let body_block = &func.basic_blocks[2];
    assert_eq!(body_block.tac.first().map(|l| l.op), Some(Op::Do));
    assert_eq!(body_block.tac.last().map(|l| l.op), Some(Op::Jmp));
  }

  #[test]
  fn struct_member_store_emits_store_off() {
    let (mut dict, f) = dict_and_file();
    let mut b = AstBuilder::new();

    let point_name = dict.intern("Point");
    let x_name = dict.intern("x");
    let y_name = dict.intern("y");
    let u32_ty = Type::scalar(BasicType::U32);
    let x_ty_leaf = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
    let x_field = b.node(Token::VariableDeclaration, Value::Name(x_name), &[x_ty_leaf], f, 1, 1);
    let y_ty_leaf = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
    let y_field = b.node(Token::VariableDeclaration, Value::Name(y_name), &[y_ty_leaf], f, 1, 1);
    let class_body = b.node(Token::ClassBody, Value::None, &[x_field, y_field], f, 1, 1);
    let class_decl = b.node(Token::ClassDecl, Value::Name(point_name), &[class_body], f, 1, 1);

    let struct_ty = Type::struct_named(point_name);
    let p_name = dict.intern("p");
    let p_ty_leaf = b.leaf(Token::TypeName, Value::Ty(struct_ty), f, 1, 1);
    let p_decl = b.node(Token::VariableDeclaration, Value::Name(p_name), &[p_ty_leaf], f, 1, 1);

    let p_id = b.leaf(Token::Identifier, Value::Name(p_name), f, 1, 1);
    let x_member_name = b.leaf(Token::Identifier, Value::Name(x_name), f, 1, 1);
    let dot = b.node(Token::Dot, Value::None, &[p_id, x_member_name], f, 1, 1);
    let five = b.leaf(Token::Constant, Value::Int(5), f, 1, 1);
    let store = b.node(Token::Assign, Value::None, &[dot, five], f, 1, 1);

    let fn_body = b.node(Token::CompoundStatement, Value::None, &[p_decl, store], f, 1, 1);
    let arglist = b.node(Token::ArgList, Value::None, &[], f, 1, 1);
    let null_ty_leaf = b.leaf(Token::TypeName, Value::Ty(Type::scalar(BasicType::Null)), f, 1, 1);
    let fn_name = dict.intern("make");
    let fun_node = b.node(Token::Fun, Value::Name(fn_name), &[null_ty_leaf, arglist, fn_body], f, 1, 1);
    let tu = b.node(Token::TranslationUnit, Value::None, &[class_decl, fun_node], f, 1, 1);
    let ast = b.finish(tu);

    let lowered = lower(&ast, &mut dict).unwrap();
    let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
      Some(ScopeMember::Function(fid)) => fid,
      _ => panic!("function not registered"),
    };
    let func = &lowered.symtab.functions[fid];
    assert_eq!(func.basic_blocks.len(), 1);
    let ops: Vec<Op> = func.basic_blocks[0].tac.iter().map(|l| l.op).collect();
    assert!(ops.contains(&Op::AddrOf));
    assert!(ops.contains(&Op::StoreOff));
  }
}
