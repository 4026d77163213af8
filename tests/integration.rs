//! End-to-end scenarios (spec.md §8) and the cross-cutting properties that
//! hold over the whole pipeline: parse (via `AstBuilder`, standing in for the
//! out-of-scope grammar) -> [`linearizer::lower`] -> [`regalloc::allocate`]
//! -> [`codegen::generate_program`].

use substratumc::ast::{AstBuilder, Token, Value};
use substratumc::codegen;
use substratumc::intern::Dictionary;
use substratumc::linearizer::lower;
use substratumc::regalloc::{self, Assignment};
use substratumc::symtab::{Residency, ScopeMember};
use substratumc::tac::Op;
use substratumc::types::{BasicType, Type};

fn dict_and_file() -> (Dictionary, substratumc::intern::Symbol) {
  let mut dict = Dictionary::new();
  let f = dict.intern("t.sub");
  (dict, f)
}

// ---- S1: arithmetic and return --------------------------------------------

#[test]
fn s1_arithmetic_and_return_emits_assembly_with_main_preamble() {
  let (mut dict, f) = dict_and_file();
  let mut b = AstBuilder::new();
  let u32_ty = Type::scalar(BasicType::U32);

  let a_name = dict.intern("a");
  let b_name = dict.intern("b");
  let a_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let a_decl = b.node(Token::VariableDeclaration, Value::Name(a_name), &[a_ty], f, 1, 1);
  let b_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let b_decl = b.node(Token::VariableDeclaration, Value::Name(b_name), &[b_ty], f, 1, 1);
  let arglist = b.node(Token::ArgList, Value::None, &[a_decl, b_decl], f, 1, 1);
  let ret_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty), f, 1, 1);

  let a_id = b.leaf(Token::Identifier, Value::Name(a_name), f, 1, 1);
  let b_id = b.leaf(Token::Identifier, Value::Name(b_name), f, 1, 1);
  let add = b.node(Token::Add, Value::None, &[a_id, b_id], f, 1, 1);
  let ret = b.node(Token::Return, Value::None, &[add], f, 1, 1);
  let body = b.node(Token::CompoundStatement, Value::None, &[ret], f, 1, 1);

  let fn_name = dict.intern("main");
  let fun = b.node(Token::Fun, Value::Name(fn_name), &[ret_ty, arglist, body], f, 1, 1);
  let tu = b.node(Token::TranslationUnit, Value::None, &[fun], f, 1, 1);
  let ast = b.finish(tu);

  let mut program = lower(&ast, &mut dict).unwrap();
  let asm = codegen::generate_program(&mut program, &dict, "t.sub").unwrap();

  assert!(asm.contains("\t.file \"t.sub\""));
  assert!(asm.contains("\t.text"));
  assert!(asm.contains(".globl _start"));
  assert!(asm.contains("call main"));
  assert!(asm.contains("main_done:"));
  assert!(asm.contains("add "));
}

// ---- S2: while loop --------------------------------------------------------

#[test]
fn s2_while_loop_lowers_to_branches_and_a_back_edge() {
  let (mut dict, f) = dict_and_file();
  let mut b = AstBuilder::new();
  let u32_ty = Type::scalar(BasicType::U32);

  let n_name = dict.intern("n");
  let n_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let n_decl = b.node(Token::VariableDeclaration, Value::Name(n_name), &[n_ty], f, 1, 1);
  let zero = b.leaf(Token::Constant, Value::Int(0), f, 1, 1);
  let n_init = b.node(Token::Assign, Value::None, &[n_decl, zero], f, 1, 1);

  let n_cond = b.leaf(Token::Identifier, Value::Name(n_name), f, 1, 1);
  let ten = b.leaf(Token::Constant, Value::Int(10), f, 1, 1);
  let cond = b.node(Token::Lt, Value::None, &[n_cond, ten], f, 1, 1);

  let n_body = b.leaf(Token::Identifier, Value::Name(n_name), f, 1, 1);
  let one = b.leaf(Token::Constant, Value::Int(1), f, 1, 1);
  let inc = b.node(Token::AddAssign, Value::None, &[n_body, one], f, 1, 1);
  let body = b.node(Token::CompoundStatement, Value::None, &[inc], f, 1, 1);
  let while_node = b.node(Token::While, Value::None, &[cond, body], f, 1, 1);

  let ret = b.node(Token::Return, Value::None, &[], f, 1, 1);
  let fn_body = b.node(Token::CompoundStatement, Value::None, &[n_init, while_node, ret], f, 1, 1);
  let arglist = b.node(Token::ArgList, Value::None, &[], f, 1, 1);
  let null_ty = b.leaf(Token::TypeName, Value::Ty(Type::scalar(BasicType::Null)), f, 1, 1);
  let fn_name = dict.intern("count");
  let fun = b.node(Token::Fun, Value::Name(fn_name), &[null_ty, arglist, fn_body], f, 1, 1);
  let tu = b.node(Token::TranslationUnit, Value::None, &[fun], f, 1, 1);
  let ast = b.finish(tu);

  let lowered = lower(&ast, &mut dict).unwrap();
  let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
    Some(ScopeMember::Function(fid)) => fid,
    _ => panic!("function not registered"),
  };
  let func = &lowered.symtab.functions[fid];
  assert_eq!(func.basic_blocks.len(), 4);
  let cond_block = &func.basic_blocks[1];
  assert!(cond_block.tac.iter().any(|l| matches!(l.op, Op::Bgeu | Op::Beqz)));
  let body_block = &func.basic_blocks[2];
  assert_eq!(body_block.tac.last().map(|l| l.op), Some(Op::Jmp));
}

// ---- S3: pointer arithmetic / array indexing ------------------------------

fn build_array_index_fn(dict: &mut Dictionary, f: substratumc::intern::Symbol, literal_index: bool) -> (substratumc::ast::Ast, substratumc::intern::Symbol) {
  let mut b = AstBuilder::new();
  let u32_ty = Type::scalar(BasicType::U32);
  let ptr_ty = u32_ty.clone().pointer_to();

  let p_name = dict.intern("p");
  let p_ty = b.leaf(Token::TypeName, Value::Ty(ptr_ty), f, 1, 1);
  let p_decl = b.node(Token::VariableDeclaration, Value::Name(p_name), &[p_ty], f, 1, 1);

  let i_name = dict.intern("i");
  let i_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let i_decl = b.node(Token::VariableDeclaration, Value::Name(i_name), &[i_ty], f, 1, 1);

  let arglist = b.node(Token::ArgList, Value::None, &[p_decl, i_decl], f, 1, 1);
  let ret_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty), f, 1, 1);

  let p_id = b.leaf(Token::Identifier, Value::Name(p_name), f, 1, 1);
  let index_node = if literal_index { b.leaf(Token::Constant, Value::Int(2), f, 1, 1) } else { b.leaf(Token::Identifier, Value::Name(i_name), f, 1, 1) };
  let index_expr = b.node(Token::ArrayIndex, Value::None, &[p_id, index_node], f, 1, 1);
  let ret = b.node(Token::Return, Value::None, &[index_expr], f, 1, 1);
  let body = b.node(Token::CompoundStatement, Value::None, &[ret], f, 1, 1);

  let fn_name = dict.intern("at");
  let fun = b.node(Token::Fun, Value::Name(fn_name), &[ret_ty, arglist, body], f, 1, 1);
  let tu = b.node(Token::TranslationUnit, Value::None, &[fun], f, 1, 1);
  (b.finish(tu), fn_name)
}

#[test]
fn s3_array_index_with_variable_index_uses_load_arr() {
  let (mut dict, f) = dict_and_file();
  let (ast, fn_name) = build_array_index_fn(&mut dict, f, false);
  let lowered = lower(&ast, &mut dict).unwrap();
  let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
    Some(ScopeMember::Function(fid)) => fid,
    _ => panic!("function not registered"),
  };
  let ops: Vec<Op> = lowered.symtab.functions[fid].basic_blocks[0].tac.iter().map(|l| l.op).collect();
  assert!(ops.contains(&Op::LoadArr));
}

#[test]
fn s3_array_index_with_literal_index_folds_to_load_off() {
  let (mut dict, f) = dict_and_file();
  let (ast, fn_name) = build_array_index_fn(&mut dict, f, true);
  let lowered = lower(&ast, &mut dict).unwrap();
  let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
    Some(ScopeMember::Function(fid)) => fid,
    _ => panic!("function not registered"),
  };
  let ops: Vec<Op> = lowered.symtab.functions[fid].basic_blocks[0].tac.iter().map(|l| l.op).collect();
  assert!(ops.contains(&Op::LoadOff));
  assert!(!ops.contains(&Op::LoadArr));
}

// ---- S4: struct field write -------------------------------------------------

#[test]
fn s4_struct_field_write_emits_addr_of_then_store_off() {
  let (mut dict, f) = dict_and_file();
  let mut b = AstBuilder::new();

  let point_name = dict.intern("Point");
  let x_name = dict.intern("x");
  let y_name = dict.intern("y");
  let u32_ty = Type::scalar(BasicType::U32);
  let x_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let x_field = b.node(Token::VariableDeclaration, Value::Name(x_name), &[x_ty], f, 1, 1);
  let y_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let y_field = b.node(Token::VariableDeclaration, Value::Name(y_name), &[y_ty], f, 1, 1);
  let class_body = b.node(Token::ClassBody, Value::None, &[x_field, y_field], f, 1, 1);
  let class_decl = b.node(Token::ClassDecl, Value::Name(point_name), &[class_body], f, 1, 1);

  let struct_ty = Type::struct_named(point_name);
  let p_name = dict.intern("p");
  let p_ty = b.leaf(Token::TypeName, Value::Ty(struct_ty), f, 1, 1);
  let p_decl = b.node(Token::VariableDeclaration, Value::Name(p_name), &[p_ty], f, 1, 1);

  let p_id = b.leaf(Token::Identifier, Value::Name(p_name), f, 1, 1);
  let x_member = b.leaf(Token::Identifier, Value::Name(x_name), f, 1, 1);
  let dot = b.node(Token::Dot, Value::None, &[p_id, x_member], f, 1, 1);
  let seven = b.leaf(Token::Constant, Value::Int(7), f, 1, 1);
  let store = b.node(Token::Assign, Value::None, &[dot, seven], f, 1, 1);

  let fn_body = b.node(Token::CompoundStatement, Value::None, &[p_decl, store], f, 1, 1);
  let arglist = b.node(Token::ArgList, Value::None, &[], f, 1, 1);
  let null_ty = b.leaf(Token::TypeName, Value::Ty(Type::scalar(BasicType::Null)), f, 1, 1);
  let fn_name = dict.intern("make");
  let fun = b.node(Token::Fun, Value::Name(fn_name), &[null_ty, arglist, fn_body], f, 1, 1);
  let tu = b.node(Token::TranslationUnit, Value::None, &[class_decl, fun], f, 1, 1);
  let ast = b.finish(tu);

  let mut program = lower(&ast, &mut dict).unwrap();
  let asm = codegen::generate_program(&mut program, &dict, "t.sub").unwrap();
  assert!(asm.contains("addi") || asm.contains("la "));
  assert!(asm.contains("sw ") || asm.contains("sd ") || asm.contains("sh ") || asm.contains("sb "));
}

// ---- S5: short-circuit || --------------------------------------------------

#[test]
fn s5_logical_or_introduces_check_b_and_true_blocks() {
  let (mut dict, f) = dict_and_file();
  let mut b = AstBuilder::new();
  let u32_ty = Type::scalar(BasicType::U32);

  let a_name = dict.intern("a");
  let a_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let a_decl = b.node(Token::VariableDeclaration, Value::Name(a_name), &[a_ty], f, 1, 1);
  let b_name = dict.intern("b");
  let b_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let b_decl = b.node(Token::VariableDeclaration, Value::Name(b_name), &[b_ty], f, 1, 1);
  let arglist = b.node(Token::ArgList, Value::None, &[a_decl, b_decl], f, 1, 1);
  let null_ty = b.leaf(Token::TypeName, Value::Ty(Type::scalar(BasicType::Null)), f, 1, 1);

  let a_lhs = b.leaf(Token::Identifier, Value::Name(a_name), f, 1, 1);
  let zero1 = b.leaf(Token::Constant, Value::Int(0), f, 1, 1);
  let cond_a = b.node(Token::EqEq, Value::None, &[a_lhs, zero1], f, 1, 1);
  let b_lhs = b.leaf(Token::Identifier, Value::Name(b_name), f, 1, 1);
  let zero2 = b.leaf(Token::Constant, Value::Int(0), f, 1, 1);
  let cond_b = b.node(Token::EqEq, Value::None, &[b_lhs, zero2], f, 1, 1);
  let or_node = b.node(Token::LogicalOr, Value::None, &[cond_a, cond_b], f, 1, 1);

  let then_ret = b.node(Token::Return, Value::None, &[], f, 1, 1);
  let then_body = b.node(Token::CompoundStatement, Value::None, &[then_ret], f, 1, 1);
  let if_node = b.node(Token::If, Value::None, &[or_node, then_body], f, 1, 1);
  let fn_body = b.node(Token::CompoundStatement, Value::None, &[if_node], f, 1, 1);

  let fn_name = dict.intern("either_zero");
  let fun = b.node(Token::Fun, Value::Name(fn_name), &[null_ty, arglist, fn_body], f, 1, 1);
  let tu = b.node(Token::TranslationUnit, Value::None, &[fun], f, 1, 1);
  let ast = b.finish(tu);

  let lowered = lower(&ast, &mut dict).unwrap();
  let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
    Some(ScopeMember::Function(fid)) => fid,
    _ => panic!("function not registered"),
  };
  let func = &lowered.symtab.functions[fid];
  // pre-if block, check-a block, check-b block, then block, after block (at least)
  assert!(func.basic_blocks.len() >= 4);
  let all_jmp_targets: Vec<u32> = func
    .basic_blocks
    .iter()
    .flat_map(|blk| blk.tac.iter())
    .filter(|l| l.op == Op::Jmp)
    .filter_map(|l| l.operands[0].as_label())
    .collect();
  let labels: Vec<u32> = func.basic_blocks.iter().map(|blk| blk.label_num).collect();
  for target in all_jmp_targets {
    assert!(labels.contains(&target), "jmp target {target} has no matching block");
  }
}

// ---- S6: address-of a local forces it onto the stack -----------------------

#[test]
fn s6_address_of_local_sets_must_spill_and_final_residency_is_stack() {
  let (mut dict, f) = dict_and_file();
  let mut b = AstBuilder::new();
  let u32_ty = Type::scalar(BasicType::U32);

  let x_name = dict.intern("x");
  let x_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let x_decl = b.node(Token::VariableDeclaration, Value::Name(x_name), &[x_ty], f, 1, 1);
  let five = b.leaf(Token::Constant, Value::Int(5), f, 1, 1);
  let x_init = b.node(Token::Assign, Value::None, &[x_decl, five], f, 1, 1);

  let ptr_ty = u32_ty.clone().pointer_to();
  let p_name = dict.intern("p");
  let p_ty = b.leaf(Token::TypeName, Value::Ty(ptr_ty), f, 1, 1);
  let p_decl = b.node(Token::VariableDeclaration, Value::Name(p_name), &[p_ty], f, 1, 1);
  let x_id = b.leaf(Token::Identifier, Value::Name(x_name), f, 1, 1);
  let addr_of_x = b.node(Token::AddressOf, Value::None, &[x_id], f, 1, 1);
  let p_init = b.node(Token::Assign, Value::None, &[p_decl, addr_of_x], f, 1, 1);

  let ret = b.node(Token::Return, Value::None, &[], f, 1, 1);
  let fn_body = b.node(Token::CompoundStatement, Value::None, &[x_init, p_init, ret], f, 1, 1);
  let arglist = b.node(Token::ArgList, Value::None, &[], f, 1, 1);
  let null_ty = b.leaf(Token::TypeName, Value::Ty(Type::scalar(BasicType::Null)), f, 1, 1);
  let fn_name = dict.intern("take_addr");
  let fun = b.node(Token::Fun, Value::Name(fn_name), &[null_ty, arglist, fn_body], f, 1, 1);
  let tu = b.node(Token::TranslationUnit, Value::None, &[fun], f, 1, 1);
  let ast = b.finish(tu);

  let mut lowered = lower(&ast, &mut dict).unwrap();
  let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
    Some(ScopeMember::Function(fid)) => fid,
    _ => panic!("function not registered"),
  };

  let ops: Vec<Op> = lowered.symtab.functions[fid].basic_blocks[0].tac.iter().map(|l| l.op).collect();
  assert!(ops.contains(&Op::AddrOf));

  let alloc = regalloc::allocate(&mut lowered.symtab, fid, &dict).unwrap();
  match alloc.assignments.get(&x_name) {
    Some(Assignment::Stack(_)) => {}
    other => panic!("expected x's address-of target to end up stack-resident, got {other:?}"),
  }
}

// ---- Cross-cutting properties (spec.md §8) ---------------------------------

/// Property 1: TAC indices within a block are contiguous ascending by 1.
#[test]
fn property_tac_indices_are_contiguous_within_each_block() {
  let (mut dict, f) = dict_and_file();
  let (ast, fn_name) = build_array_index_fn(&mut dict, f, false);
  let lowered = lower(&ast, &mut dict).unwrap();
  let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
    Some(ScopeMember::Function(fid)) => fid,
    _ => panic!("function not registered"),
  };
  for block in &lowered.symtab.functions[fid].basic_blocks {
    assert!(block.indices_are_contiguous());
  }
}

/// Property 2: every branch target label exists as some block's `labelNum`
/// in the same function.
#[test]
fn property_every_branch_target_resolves_to_a_real_block_label() {
  let (mut dict, f) = dict_and_file();
  let mut b = AstBuilder::new();
  let u32_ty = Type::scalar(BasicType::U32);
  let n_name = dict.intern("n");
  let n_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let n_decl = b.node(Token::VariableDeclaration, Value::Name(n_name), &[n_ty], f, 1, 1);
  let zero = b.leaf(Token::Constant, Value::Int(0), f, 1, 1);
  let n_init = b.node(Token::Assign, Value::None, &[n_decl, zero], f, 1, 1);
  let n_cond = b.leaf(Token::Identifier, Value::Name(n_name), f, 1, 1);
  let ten = b.leaf(Token::Constant, Value::Int(10), f, 1, 1);
  let cond = b.node(Token::Lt, Value::None, &[n_cond, ten], f, 1, 1);
  let n_body = b.leaf(Token::Identifier, Value::Name(n_name), f, 1, 1);
  let one = b.leaf(Token::Constant, Value::Int(1), f, 1, 1);
  let inc = b.node(Token::AddAssign, Value::None, &[n_body, one], f, 1, 1);
  let body = b.node(Token::CompoundStatement, Value::None, &[inc], f, 1, 1);
  let while_node = b.node(Token::While, Value::None, &[cond, body], f, 1, 1);
  let ret = b.node(Token::Return, Value::None, &[], f, 1, 1);
  let fn_body = b.node(Token::CompoundStatement, Value::None, &[n_init, while_node, ret], f, 1, 1);
  let arglist = b.node(Token::ArgList, Value::None, &[], f, 1, 1);
  let null_ty = b.leaf(Token::TypeName, Value::Ty(Type::scalar(BasicType::Null)), f, 1, 1);
  let fn_name = dict.intern("count");
  let fun = b.node(Token::Fun, Value::Name(fn_name), &[null_ty, arglist, fn_body], f, 1, 1);
  let tu = b.node(Token::TranslationUnit, Value::None, &[fun], f, 1, 1);
  let ast = b.finish(tu);

  let lowered = lower(&ast, &mut dict).unwrap();
  let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
    Some(ScopeMember::Function(fid)) => fid,
    _ => panic!("function not registered"),
  };
  let func = &lowered.symtab.functions[fid];
  let labels: Vec<u32> = func.basic_blocks.iter().map(|blk| blk.label_num).collect();
  for block in &func.basic_blocks {
    for line in &block.tac {
      for slot in &line.operands {
        if let Some(target) = slot.as_label() {
          assert!(labels.contains(&target), "branch target {target} is not a real block label");
        }
      }
    }
  }
}

/// Property 3: every `mustSpill` variable's final residency is `stack` or
/// `global` (verified via S6's address-of scenario, which is the only way
/// the linearizer sets `must_spill` today).
#[test]
fn property_must_spill_variables_end_up_stack_or_global() {
  let (mut dict, f) = dict_and_file();
  let mut b = AstBuilder::new();
  let u32_ty = Type::scalar(BasicType::U32);
  let x_name = dict.intern("x");
  let x_ty = b.leaf(Token::TypeName, Value::Ty(u32_ty.clone()), f, 1, 1);
  let x_decl = b.node(Token::VariableDeclaration, Value::Name(x_name), &[x_ty], f, 1, 1);
  let five = b.leaf(Token::Constant, Value::Int(5), f, 1, 1);
  let x_init = b.node(Token::Assign, Value::None, &[x_decl, five], f, 1, 1);
  let ptr_ty = u32_ty.clone().pointer_to();
  let p_name = dict.intern("p");
  let p_ty = b.leaf(Token::TypeName, Value::Ty(ptr_ty), f, 1, 1);
  let p_decl = b.node(Token::VariableDeclaration, Value::Name(p_name), &[p_ty], f, 1, 1);
  let x_id = b.leaf(Token::Identifier, Value::Name(x_name), f, 1, 1);
  let addr_of_x = b.node(Token::AddressOf, Value::None, &[x_id], f, 1, 1);
  let p_init = b.node(Token::Assign, Value::None, &[p_decl, addr_of_x], f, 1, 1);
  let ret = b.node(Token::Return, Value::None, &[], f, 1, 1);
  let fn_body = b.node(Token::CompoundStatement, Value::None, &[x_init, p_init, ret], f, 1, 1);
  let arglist = b.node(Token::ArgList, Value::None, &[], f, 1, 1);
  let null_ty = b.leaf(Token::TypeName, Value::Ty(Type::scalar(BasicType::Null)), f, 1, 1);
  let fn_name = dict.intern("take_addr");
  let fun = b.node(Token::Fun, Value::Name(fn_name), &[null_ty, arglist, fn_body], f, 1, 1);
  let tu = b.node(Token::TranslationUnit, Value::None, &[fun], f, 1, 1);
  let ast = b.finish(tu);

  let mut lowered = lower(&ast, &mut dict).unwrap();
  let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
    Some(ScopeMember::Function(fid)) => fid,
    _ => panic!("function not registered"),
  };
  let vid = lowered.symtab.lookup_var(lowered.symtab.functions[fid].main_scope, x_name, &dict).unwrap();
  assert!(lowered.symtab.variables[vid].must_spill);

  let alloc = regalloc::allocate(&mut lowered.symtab, fid, &dict).unwrap();
  assert!(matches!(alloc.assignments.get(&x_name), Some(Assignment::Stack(_)) | Some(Assignment::Global)));
}

/// Property 4: `compareAllowImplicitWidening(t,t)` is always true, and
/// widening is transitive in `u8 ⊆ u16 ⊆ u32 ⊆ u64`.
#[test]
fn property_widening_is_reflexive_and_transitive() {
  let u8t = Type::scalar(BasicType::U8);
  let u16t = Type::scalar(BasicType::U16);
  let u32t = Type::scalar(BasicType::U32);
  let u64t = Type::scalar(BasicType::U64);
  for t in [&u8t, &u16t, &u32t, &u64t] {
    assert!(t.compare_allow_implicit_widening(t));
  }
  assert!(u8t.compare_allow_implicit_widening(&u16t));
  assert!(u16t.compare_allow_implicit_widening(&u32t));
  assert!(u32t.compare_allow_implicit_widening(&u64t));
  assert!(u8t.compare_allow_implicit_widening(&u64t));
  assert!(!u64t.compare_allow_implicit_widening(&u8t));
}

/// Property 5: string-literal interning — two occurrences of the same
/// literal text resolve to the same global variable entry.
#[test]
fn property_equal_string_literals_share_one_backing_variable() {
  let (mut dict, f) = dict_and_file();
  let mut b = AstBuilder::new();
  let null_ty = b.leaf(Token::TypeName, Value::Ty(Type::scalar(BasicType::Null)), f, 1, 1);
  let arglist = b.node(Token::ArgList, Value::None, &[], f, 1, 1);

  let s1_text = dict.intern("hello");
  let s1 = b.leaf(Token::StringLiteral, Value::Name(s1_text), f, 1, 1);
  let s2_text = dict.intern("hello");
  let s2 = b.leaf(Token::StringLiteral, Value::Name(s2_text), f, 1, 1);
  let first = b.node(Token::Return, Value::None, &[s1], f, 1, 1);
  let second = b.node(Token::Return, Value::None, &[s2], f, 1, 1);
  // two distinct functions, each returning the same literal text.
  let body1 = b.node(Token::CompoundStatement, Value::None, &[first], f, 1, 1);
  let body2 = b.node(Token::CompoundStatement, Value::None, &[second], f, 1, 1);
  let ptr_u8 = Type::scalar(BasicType::U8).pointer_to();
  let ret_ty1 = b.leaf(Token::TypeName, Value::Ty(ptr_u8.clone()), f, 1, 1);
  let ret_ty2 = b.leaf(Token::TypeName, Value::Ty(ptr_u8), f, 1, 1);
  let fn1_name = dict.intern("greet1");
  let fn2_name = dict.intern("greet2");
  let fun1 = b.node(Token::Fun, Value::Name(fn1_name), &[ret_ty1, arglist, body1], f, 1, 1);
  let arglist2 = b.node(Token::ArgList, Value::None, &[], f, 1, 1);
  let fun2 = b.node(Token::Fun, Value::Name(fn2_name), &[ret_ty2, arglist2, body2], f, 1, 1);
  let tu = b.node(Token::TranslationUnit, Value::None, &[fun1, fun2], f, 1, 1);
  let ast = b.finish(tu);

  let lowered = lower(&ast, &mut dict).unwrap();
  let string_vars: Vec<ScopeMember> = lowered.symtab.scopes[lowered.symtab.global_scope]
    .entries
    .iter()
    .filter_map(|(_, m)| match m { ScopeMember::Variable(v) if lowered.symtab.variables[*v].is_string_literal => Some(*m), _ => None })
    .collect();
  assert_eq!(string_vars.len(), 1, "both literals should intern to a single global variable");
}

/// Property 6: after scope collapse, no `SubScope` entries remain directly
/// under a function's main scope, and collapsed locals carry a mangled
/// (dotted) name.
#[test]
fn property_scope_collapse_leaves_no_sub_scopes_and_mangles_nested_names() {
  let (mut dict, f) = dict_and_file();
  let (ast, fn_name) = build_array_index_fn(&mut dict, f, false);
  let _ = fn_name;
  let lowered = lower(&ast, &mut dict).unwrap();
  for (_, func) in lowered.symtab.functions.iter_enumerated() {
    for (_, member) in &lowered.symtab.scopes[func.main_scope].entries {
      assert!(!matches!(member, ScopeMember::SubScope(_)), "sub-scopes must be collapsed away");
    }
  }
}

/// Property 7: the register allocator never assigns two distinct lifetimes
/// to the same register at any TAC index simultaneously.
#[test]
fn property_no_two_live_lifetimes_share_a_register_at_the_same_index() {
  let (mut dict, f) = dict_and_file();
  let (ast, fn_name) = build_array_index_fn(&mut dict, f, false);
  let mut lowered = lower(&ast, &mut dict).unwrap();
  let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
    Some(ScopeMember::Function(fid)) => fid,
    _ => panic!("function not registered"),
  };
  let alloc = regalloc::allocate(&mut lowered.symtab, fid, &dict).unwrap();
  for bucket in &alloc.lifetimes.overlaps {
    let mut seen_regs: Vec<&str> = Vec::new();
    for &lt_idx in bucket {
      let name = alloc.lifetimes.lifetimes[lt_idx].name;
      if let Some(Assignment::Register(r)) = alloc.assignments.get(&name) {
        assert!(!seen_regs.contains(r), "register {r} double-booked within one overlap bucket");
        seen_regs.push(r);
      }
    }
  }
}

/// Property 8: every function's frame size is a multiple of 16 bytes.
#[test]
fn property_frame_size_is_sixteen_byte_aligned() {
  let (mut dict, f) = dict_and_file();
  let (ast, fn_name) = build_array_index_fn(&mut dict, f, false);
  let mut lowered = lower(&ast, &mut dict).unwrap();
  let fid = match lowered.symtab.lookup(lowered.symtab.global_scope, fn_name) {
    Some(ScopeMember::Function(fid)) => fid,
    _ => panic!("function not registered"),
  };
  let alloc = regalloc::allocate(&mut lowered.symtab, fid, &dict).unwrap();
  assert_eq!(alloc.frame.total_size % 16, 0);
}

/// Not a §8 property, but residency of a global-scope variable should
/// always resolve through the `Assignment::Global` fallback since there is
/// no register allocator pass over `global_init`.
#[test]
fn global_init_block_codegen_never_panics_on_empty_assignments() {
  let (mut dict, f) = dict_and_file();
  let mut b = AstBuilder::new();
  let null_ty = b.leaf(Token::TypeName, Value::Ty(Type::scalar(BasicType::Null)), f, 1, 1);
  let arglist = b.node(Token::ArgList, Value::None, &[], f, 1, 1);
  let ret = b.node(Token::Return, Value::None, &[], f, 1, 1);
  let body = b.node(Token::CompoundStatement, Value::None, &[ret], f, 1, 1);
  let fn_name = dict.intern("main");
  let fun = b.node(Token::Fun, Value::Name(fn_name), &[null_ty, arglist, body], f, 1, 1);
  let tu = b.node(Token::TranslationUnit, Value::None, &[fun], f, 1, 1);
  let ast = b.finish(tu);

  let mut program = lower(&ast, &mut dict).unwrap();
  let asm = codegen::generate_program(&mut program, &dict, "t.sub").unwrap();
  assert!(asm.contains("_start"));
}

#[allow(unused)]
fn _unused_residency_import_anchor() -> Residency { Residency::Unknown }
