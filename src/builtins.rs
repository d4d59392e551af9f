//! The root scope: every binding the shell starts with.
//!
//! Each entry is a function of the form
//! `fn(t: &mut Task, args: Cell) -> Fallible<bool>` registered as a
//! builtin (argv expanded), a method (argv evaluated), or a syntax
//! form (argv raw). The returned bool tells the evaluator whether the
//! entry has arranged new states itself.

use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::UNIX_EPOCH;

use num::bigint::BigInt;
use num::rational::BigRational;
use num::{One, ToPrimitive, Zero};
use regex::Regex;

use crate::cell::{
	self, boolean, car, cadr, cdr, cons, data_name, expose, is_atom, is_cons, is_null, length,
	raw, same_context, scope_of, to_vec, truthy, Cell, Closure, ClosureKind, Native, Value,
};
use crate::conduit;
use crate::error::{Fallible, Fault};
use crate::registers::{
	CHANGE_CONTEXT, EVAL_BLOCK, EVAL_ELEMENT, EXEC_BUILTIN, EXEC_DEFINE, EXEC_DYNAMIC,
	EXEC_IF, EXEC_PUBLIC, EXEC_SET, EXEC_SETENV, EXEC_SPLICE, EXEC_WHILE_TEST, SAVE_CAR_CODE,
	SAVE_CDR_CODE, SAVE_CODE, SAVE_DYNAMIC, SAVE_LEXICAL,
};
use crate::scope::{resolve, Env, Scope};
use crate::task::{external_stub, Task};

fn make(kind: ClosureKind, applier: Native) -> Cell {
	cell::unbound(Arc::new(Closure {
		kind,
		applier,
		body: cell::null(),
		label: cell::null(),
		params: cell::null(),
		scope: cell::null(),
	}))
}

/// The thunk every bare command name dispatches through.
pub fn external_thunk() -> Cell {
	make(ClosureKind::Builtin, external_stub)
}

/// Register everything under the root scope.
pub fn bind_root(scope0: &Cell) -> Fallible<()> {
	let scope = scope_of(scope0)
		.ok_or_else(|| Fault::type_error("root context is not a scope"))?;

	bind_table![scope,
		// Shell-facing builtins.
		Builtin/define: "cd" => b_cd,
		Builtin/define: "debug" => b_debug,
		Builtin/define: "exists" => b_exists,
		Builtin/define: "fg" => b_fg,
		Builtin/define: "jobs" => b_jobs,
		Builtin/define: "module" => b_module,
		Builtin/define: "run" => b_run,
		// Arithmetic.
		Method/define: "add" => m_add,
		Method/define: "sub" => m_sub,
		Method/define: "mul" => m_mul,
		Method/define: "div" => m_div,
		Method/define: "mod" => m_mod,
		// Relational.
		Method/define: "eq" => m_eq,
		Method/define: "ge" => m_ge,
		Method/define: "gt" => m_gt,
		Method/define: "le" => m_le,
		Method/define: "lt" => m_lt,
		Method/define: "match" => m_match,
		Method/define: "ne" => m_ne,
		Method/define: "not" => m_not,
		// Predicates.
		Method/define: "is-atom" => p_is_atom,
		Method/define: "is-boolean" => p_is_boolean,
		Method/define: "is-channel" => p_is_channel,
		Method/define: "is-cons" => p_is_cons,
		Method/define: "is-float" => p_is_float,
		Method/define: "is-integer" => p_is_integer,
		Method/define: "is-list" => p_is_list,
		Method/define: "is-method" => p_is_method,
		Method/define: "is-null" => p_is_null,
		Method/define: "is-object" => p_is_object,
		Method/define: "is-pipe" => p_is_pipe,
		Method/define: "is-status" => p_is_status,
		Method/define: "is-string" => p_is_string,
		Method/define: "is-symbol" => p_is_symbol,
		// Generators.
		Method/define: "boolean" => m_boolean,
		Method/define: "car" => m_car,
		Method/define: "cdr" => m_cdr,
		Method/define: "channel" => m_channel,
		Method/define: "cons" => m_cons,
		Method/define: "float" => m_float,
		Method/define: "integer" => m_integer,
		Method/define: "list" => m_list,
		Method/define: "pipe" => m_pipe,
		Method/define: "rational" => m_rational,
		Method/define: "status" => m_status,
		Method/define: "symbol" => m_symbol,
		// Standard functions.
		Method/define: "append" => m_append,
		Method/define: "exit" => m_exit,
		Method/define: "length" => m_length,
		Method/define: "list-to-string" => m_list_to_string,
		Method/define: "list-to-symbol" => m_list_to_symbol,
		Method/define: "open" => m_open,
		Method/define: "set-car" => m_set_car,
		Method/define: "set-cdr" => m_set_cdr,
		Method/define: "wait" => m_wait,
		Method/define: "write" => m_write,
		// Object protocol.
		Method/public: "child" => o_child,
		Method/public: "clone" => o_clone,
		Method/public: "context" => o_context,
		Method/public: "eval" => o_eval,
		Method/public: "get-slot" => o_get_slot,
		Method/public: "has" => o_has,
		Method/public: "interpolate" => o_interpolate,
		Method/public: "set-slot" => o_set_slot,
		Method/public: "unset" => o_unset,
		// Syntax forms.
		Syntax/define: "block" => syn_block,
		Syntax/define: "builtin" => syn_builtin,
		Syntax/define: "define" => syn_define,
		Syntax/define: "dynamic" => syn_dynamic,
		Syntax/define: "if" => syn_if,
		Syntax/define: "make-env" => syn_make_env,
		Syntax/define: "make-scope" => syn_make_scope,
		Syntax/define: "method" => syn_method,
		Syntax/define: "public" => syn_public,
		Syntax/define: "set" => syn_set,
		Syntax/define: "setenv" => syn_setenv,
		Syntax/define: "spawn" => syn_spawn,
		Syntax/define: "splice" => syn_splice,
		Syntax/define: "syntax" => syn_syntax,
		Syntax/define: "while" => syn_while,
	];

	scope.public("$root", scope0.clone());

	Ok(())
}

// //////////////////////////////////////////////////////////
// Numbers
// //////////////////////////////////////////////////////////

enum Num {
	Int(BigInt),
	Rat(BigRational),
	Flo(f64),
}

fn coerce(c: &Cell) -> Fallible<Num> {
	match **c {
		Value::Integer(ref v) => Ok(Num::Int(v.clone())),
		Value::Status(v) => Ok(Num::Int(BigInt::from(v))),
		Value::Boolean(v) => Ok(Num::Int(BigInt::from(v as i64))),
		Value::Rational(ref v) => Ok(Num::Rat(v.clone())),
		Value::Float(v) => Ok(Num::Flo(v)),
		Value::Symbol(ref s) => coerce_text(s),
		Value::String(ref t) => coerce_text(&t.v),
		_ => Err(Fault::type_error(format![
			"expected a number but got {}",
			data_name(c)
		])),
	}
}

fn coerce_text(s: &str) -> Fallible<Num> {
	if let Some(v) = BigInt::parse_bytes(s.as_bytes(), 10) {
		return Ok(Num::Int(v));
	}
	if let Some((n, d)) = s.split_once('/') {
		let n = BigInt::parse_bytes(n.as_bytes(), 10);
		let d = BigInt::parse_bytes(d.as_bytes(), 10);
		if let (Some(n), Some(d)) = (n, d) {
			if !d.is_zero() {
				return Ok(Num::Rat(BigRational::new(n, d)));
			}
		}
	}
	if let Ok(v) = s.parse::<f64>() {
		return Ok(Num::Flo(v));
	}
	Err(Fault::type_error(format!["'{}' is not a number", s]))
}

fn rat_of(n: Num) -> BigRational {
	match n {
		Num::Int(v) => BigRational::from_integer(v),
		Num::Rat(v) => v,
		Num::Flo(_) => unreachable![],
	}
}

fn float_of(n: &Num) -> f64 {
	match *n {
		Num::Int(ref v) => v.to_f64().unwrap_or(f64::NAN),
		Num::Rat(ref v) => v.to_f64().unwrap_or(f64::NAN),
		Num::Flo(v) => v,
	}
}

fn num_cell(n: Num) -> Cell {
	match n {
		Num::Int(v) => cell::big(v),
		Num::Rat(v) => {
			if v.is_integer() {
				cell::big(v.to_integer())
			} else {
				cell::rational(v)
			}
		}
		Num::Flo(v) => cell::float(v),
	}
}

struct Op {
	exact: fn(BigRational, BigRational) -> BigRational,
	inexact: fn(f64, f64) -> f64,
}

fn num_binary(a: Num, b: Num, op: &Op) -> Num {
	if matches![a, Num::Flo(_)] || matches![b, Num::Flo(_)] {
		return Num::Flo((op.inexact)(float_of(&a), float_of(&b)));
	}
	Num::Rat((op.exact)(rat_of(a), rat_of(b)))
}

fn num_compare(a: &Cell, b: &Cell) -> Fallible<std::cmp::Ordering> {
	let (x, y) = (coerce(a)?, coerce(b)?);
	if matches![x, Num::Flo(_)] || matches![y, Num::Flo(_)] {
		return float_of(&x)
			.partial_cmp(&float_of(&y))
			.ok_or_else(|| Fault::type_error("numbers do not compare"));
	}
	Ok(rat_of(x).cmp(&rat_of(y)))
}

fn fold(t: &mut Task, args: Cell, unit: Num, op: &Op) -> Fallible<bool> {
	let argv = to_vec(&args);
	if argv.is_empty() {
		return Err(Fault::type_error("arity mismatch, expecting >0 but got 0"));
	}

	let mut acc = if argv.len() == 1 { unit } else { coerce(&argv[0])? };
	let rest = if argv.len() == 1 { &argv[..] } else { &argv[1..] };

	for arg in rest {
		acc = num_binary(acc, coerce(arg)?, op);
	}

	t.regs.return_result(num_cell(acc))
}

fn m_add(t: &mut Task, args: Cell) -> Fallible<bool> {
	let op = Op { exact: |a, b| a + b, inexact: |a, b| a + b };
	let mut acc = Num::Int(BigInt::zero());
	for arg in to_vec(&args) {
		acc = num_binary(acc, coerce(&arg)?, &op);
	}
	t.regs.return_result(num_cell(acc))
}

fn m_mul(t: &mut Task, args: Cell) -> Fallible<bool> {
	let op = Op { exact: |a, b| a * b, inexact: |a, b| a * b };
	let mut acc = Num::Int(BigInt::one());
	for arg in to_vec(&args) {
		acc = num_binary(acc, coerce(&arg)?, &op);
	}
	t.regs.return_result(num_cell(acc))
}

fn m_sub(t: &mut Task, args: Cell) -> Fallible<bool> {
	let op = Op { exact: |a, b| a - b, inexact: |a, b| a - b };
	fold(t, args, Num::Int(BigInt::zero()), &op)
}

fn m_div(t: &mut Task, args: Cell) -> Fallible<bool> {
	let argv = to_vec(&args);
	let divisors = if argv.len() == 1 { &argv[..] } else { &argv[1..] };
	for arg in divisors {
		if let Ok(n) = coerce(arg) {
			if float_of(&n) == 0.0 {
				return Err(Fault::type_error("division by zero"));
			}
		}
	}

	let op = Op { exact: |a, b| a / b, inexact: |a, b| a / b };
	fold(t, args, Num::Int(BigInt::one()), &op)
}

fn m_mod(t: &mut Task, args: Cell) -> Fallible<bool> {
	let argv = to_vec(&args);
	if argv.len() != 2 {
		return Err(Fault::type_error(format![
			"arity mismatch, expecting 2 but got {}",
			argv.len()
		]));
	}
	let a = cell::atom_int(&argv[0])?;
	let b = cell::atom_int(&argv[1])?;
	if b.is_zero() {
		return Err(Fault::type_error("division by zero"));
	}
	t.regs.return_result(cell::big(a % b))
}

// //////////////////////////////////////////////////////////
// Relational
// //////////////////////////////////////////////////////////

fn chain(t: &mut Task, args: Cell, ok: fn(std::cmp::Ordering) -> bool) -> Fallible<bool> {
	let argv = to_vec(&args);
	for pair in argv.windows(2) {
		let order = match num_compare(&pair[0], &pair[1]) {
			Ok(o) => o,
			Err(_) => raw(&pair[0]).cmp(&raw(&pair[1])),
		};
		if !ok(order) {
			return t.regs.return_result(boolean(false));
		}
	}
	t.regs.return_result(boolean(true))
}

fn m_eq(t: &mut Task, args: Cell) -> Fallible<bool> {
	let argv = to_vec(&args);
	for pair in argv.windows(2) {
		let same = match num_compare(&pair[0], &pair[1]) {
			Ok(o) => o == std::cmp::Ordering::Equal,
			Err(_) => cell::equal(&pair[0], &pair[1]),
		};
		if !same {
			return t.regs.return_result(boolean(false));
		}
	}
	t.regs.return_result(boolean(true))
}

fn m_lt(t: &mut Task, args: Cell) -> Fallible<bool> {
	chain(t, args, std::cmp::Ordering::is_lt)
}

fn m_le(t: &mut Task, args: Cell) -> Fallible<bool> {
	chain(t, args, std::cmp::Ordering::is_le)
}

fn m_gt(t: &mut Task, args: Cell) -> Fallible<bool> {
	chain(t, args, std::cmp::Ordering::is_gt)
}

fn m_ge(t: &mut Task, args: Cell) -> Fallible<bool> {
	chain(t, args, std::cmp::Ordering::is_ge)
}

fn m_ne(t: &mut Task, args: Cell) -> Fallible<bool> {
	let argv = to_vec(&args);
	for (i, a) in argv.iter().enumerate() {
		for b in &argv[i + 1..] {
			if cell::equal(a, b) {
				return t.regs.return_result(boolean(false));
			}
		}
	}
	t.regs.return_result(boolean(true))
}

fn m_not(t: &mut Task, args: Cell) -> Fallible<bool> {
	let v = !truthy(&car(&args)?);
	t.regs.return_result(boolean(v))
}

fn m_match(t: &mut Task, args: Cell) -> Fallible<bool> {
	let pattern = raw(&car(&args)?);
	let text = raw(&cadr(&args)?);
	let p = glob::Pattern::new(&pattern)
		.map_err(|e| Fault::type_error(format!["bad pattern '{}': {}", pattern, e]))?;
	t.regs.return_result(boolean(p.matches(&text)))
}

// //////////////////////////////////////////////////////////
// Predicates
// //////////////////////////////////////////////////////////

fn predicate(t: &mut Task, args: Cell, f: fn(&Cell) -> bool) -> Fallible<bool> {
	let arg = car(&args)?;
	t.regs.return_result(boolean(f(&arg)))
}

fn p_is_atom(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, is_atom)
}

fn p_is_boolean(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| matches![**c, Value::Boolean(_)])
}

fn p_is_channel(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| matches![**c, Value::Channel(_)])
}

fn p_is_cons(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, is_cons)
}

fn p_is_float(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| matches![**c, Value::Float(_)])
}

fn p_is_integer(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| matches![**c, Value::Integer(_)])
}

fn p_is_list(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| is_cons(c) || is_null(c))
}

fn p_is_method(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| {
		matches![
			cell::as_binding(c),
			Some((ref r, _)) if r.kind == ClosureKind::Method
		]
	})
}

fn p_is_null(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, is_null)
}

fn p_is_object(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| matches![**c, Value::Object(_)])
}

fn p_is_pipe(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| matches![**c, Value::Pipe(_)])
}

fn p_is_status(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| matches![**c, Value::Status(_)])
}

fn p_is_string(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| matches![**c, Value::String(_)])
}

fn p_is_symbol(t: &mut Task, args: Cell) -> Fallible<bool> {
	predicate(t, args, |c| matches![**c, Value::Symbol(_)])
}

// //////////////////////////////////////////////////////////
// Generators
// //////////////////////////////////////////////////////////

fn m_boolean(t: &mut Task, args: Cell) -> Fallible<bool> {
	let v = truthy(&car(&args)?);
	t.regs.return_result(boolean(v))
}

fn m_car(t: &mut Task, args: Cell) -> Fallible<bool> {
	let v = car(&car(&args)?)?;
	t.regs.return_result(v)
}

fn m_cdr(t: &mut Task, args: Cell) -> Fallible<bool> {
	let v = cdr(&car(&args)?)?;
	t.regs.return_result(v)
}

fn m_channel(t: &mut Task, args: Cell) -> Fallible<bool> {
	let capacity = if is_null(&args) {
		0
	} else {
		cell::atom_int(&car(&args)?)?.to_usize().unwrap_or(0)
	};
	let lexical = t.regs.lexical.clone();
	let ch = conduit::new_channel(&lexical, capacity)?;
	t.regs.return_result(ch)
}

fn m_cons(t: &mut Task, args: Cell) -> Fallible<bool> {
	let v = cons(car(&args)?, cadr(&args)?);
	t.regs.return_result(v)
}

fn m_float(t: &mut Task, args: Cell) -> Fallible<bool> {
	let v = cell::atom_float(&car(&args)?)?;
	t.regs.return_result(cell::float(v))
}

fn m_integer(t: &mut Task, args: Cell) -> Fallible<bool> {
	let v = cell::atom_int(&car(&args)?)?;
	t.regs.return_result(cell::big(v))
}

fn m_list(t: &mut Task, args: Cell) -> Fallible<bool> {
	t.regs.return_result(args)
}

fn m_pipe(t: &mut Task, _args: Cell) -> Fallible<bool> {
	let lexical = t.regs.lexical.clone();
	let p = conduit::new_pipe(&lexical, None, None)?;
	t.regs.return_result(p)
}

fn m_rational(t: &mut Task, args: Cell) -> Fallible<bool> {
	let v = cell::atom_rat(&car(&args)?)?;
	t.regs.return_result(cell::rational(v))
}

fn m_status(t: &mut Task, args: Cell) -> Fallible<bool> {
	let v = cell::atom_int(&car(&args)?)?
		.to_i64()
		.ok_or_else(|| Fault::type_error("status out of range"))?;
	t.regs.return_result(cell::status(v))
}

fn m_symbol(t: &mut Task, args: Cell) -> Fallible<bool> {
	let v = cell::sym(&raw(&car(&args)?));
	t.regs.return_result(v)
}

// //////////////////////////////////////////////////////////
// Standard functions
// //////////////////////////////////////////////////////////

fn m_append(t: &mut Task, args: Cell) -> Fallible<bool> {
	let l = car(&args)?;
	let copy = cons(car(&l)?, cell::null());
	let mut tail = copy.clone();

	let mut rest = cdr(&l)?;
	while !is_null(&rest) {
		let fresh = cons(car(&rest)?, cell::null());
		cell::set_cdr(&tail, fresh.clone())?;
		tail = fresh;
		rest = cdr(&rest)?;
	}
	cell::set_cdr(&tail, cdr(&args)?)?;

	t.regs.return_result(copy)
}

fn m_exit(t: &mut Task, args: Cell) -> Fallible<bool> {
	t.regs.scratch = cons(car(&args)?, cell::null());
	t.shared.stop();
	Ok(true)
}

fn m_length(t: &mut Task, args: Cell) -> Fallible<bool> {
	let c = car(&args)?;
	let n = match *c {
		Value::String(ref s) => s.v.chars().count() as i64,
		Value::Symbol(ref s) => s.chars().count() as i64,
		_ => length(&c),
	};
	t.regs.return_result(cell::integer(n))
}

fn m_list_to_string(t: &mut Task, args: Cell) -> Fallible<bool> {
	let mut s = String::new();
	for c in to_vec(&car(&args)?) {
		let code = cell::atom_int(&c)?.to_u32().unwrap_or(0);
		s.push(char::from_u32(code).unwrap_or('\u{fffd}'));
	}
	let lexical = t.regs.lexical.clone();
	t.regs.return_result(cell::text(&lexical, &s))
}

fn m_list_to_symbol(t: &mut Task, args: Cell) -> Fallible<bool> {
	let mut s = String::new();
	for c in to_vec(&car(&args)?) {
		let code = cell::atom_int(&c)?.to_u32().unwrap_or(0);
		s.push(char::from_u32(code).unwrap_or('\u{fffd}'));
	}
	t.regs.return_result(cell::sym(&s))
}

/// `open mode path`: mode letters are r, w, a, with `-` suppressing
/// file creation.
fn m_open(t: &mut Task, args: Cell) -> Fallible<bool> {
	let mode = raw(&car(&args)?);
	let path = raw(&cadr(&args)?);

	let read0 = mode.contains('r');
	let write0 = mode.contains('w');
	let append = mode.contains('a');

	let mut read = read0;
	let mut write = write0 || append;
	if read == write {
		read = true;
		write = true;
	}

	let create = !mode.contains('-') && write;
	let truncate = write0 && !append && write;

	let file = std::fs::OpenOptions::new()
		.read(read)
		.write(write && !append)
		.append(append)
		.truncate(truncate)
		.create(create)
		.open(&path)
		.map_err(|e| Fault::Path {
			path: path.clone(),
			reason: e.to_string(),
		})?;

	let r = if read { Some(file.try_clone()?) } else { None };
	let w = if write { Some(file) } else { None };

	let lexical = t.regs.lexical.clone();
	let pipe = conduit::new_pipe(&lexical, r, w)?;
	t.regs.return_result(pipe)
}

fn m_set_car(t: &mut Task, args: Cell) -> Fallible<bool> {
	cell::set_car(&car(&args)?, cadr(&args)?)?;
	t.regs.return_result(cadr(&args)?)
}

fn m_set_cdr(t: &mut Task, args: Cell) -> Fallible<bool> {
	cell::set_cdr(&car(&args)?, cadr(&args)?)?;
	t.regs.return_result(cadr(&args)?)
}

/// With no arguments, wait for all children. With task arguments,
/// await each and replace the argument position with the task's
/// result.
fn m_wait(t: &mut Task, args: Cell) -> Fallible<bool> {
	if is_null(&args) {
		t.wait_children();
	}

	let mut l = args.clone();
	while !is_null(&l) {
		let item = car(&l)?;
		match *item {
			Value::Task(ref shared) => {
				shared.done.recv();
				let result = shared.result.lock().clone();
				cell::set_car(&l, result)?;
			}
			_ => {
				return Err(Fault::type_error(format![
					"expected Task but got {}",
					data_name(&item)
				]))
			}
		}
		l = cdr(&l)?;
	}

	t.regs.return_result(args)
}

/// Write the argv to whatever `$stdout` names.
fn m_write(t: &mut Task, args: Cell) -> Fallible<bool> {
	let out = resolve(&t.regs.lexical, t.regs.dynamic.as_ref(), "$stdout")
		.ok_or_else(|| Fault::undefined("$stdout"))?
		.get();

	let payload = if length(&args) == 1 { car(&args)? } else { args };

	match *out {
		Value::Pipe(ref p) => p.write(&payload)?,
		Value::Channel(ref ch) => ch.write(payload)?,
		_ => return Err(Fault::type_error("not a conduit")),
	}

	t.regs.return_result(boolean(true))
}

// //////////////////////////////////////////////////////////
// Shell-facing builtins
// //////////////////////////////////////////////////////////

fn b_cd(t: &mut Task, args: Cell) -> Fallible<bool> {
	let path = raw(&car(&args)?);
	let status = if std::env::set_current_dir(&path).is_ok() { 0 } else { 1 };

	if let Ok(wd) = std::env::current_dir() {
		if let Some(ref d) = t.regs.dynamic {
			d.add("$cwd", cell::sym(&wd.to_string_lossy()));
		}
	}

	t.regs.return_result(cell::status(status))
}

fn b_debug(t: &mut Task, _args: Cell) -> Fallible<bool> {
	cell::register_tree(&t.regs.code);
	cell::register_tree(&t.regs.scratch);
	println![
		"debug: t.code = {}, t.scratch = {}",
		t.regs.code, t.regs.scratch
	];
	Ok(false)
}

fn b_exists(t: &mut Task, args: Cell) -> Fallible<bool> {
	let mut count = 0;
	for c in to_vec(&args) {
		count += 1;
		if std::fs::metadata(raw(&c)).is_err() {
			return t.regs.return_result(boolean(false));
		}
	}
	t.regs.return_result(boolean(count > 0))
}

fn is_foreground(t: &Task) -> bool {
	match *t.runtime.foreground.lock() {
		Some(ref f) => Arc::ptr_eq(f, &t.shared),
		None => false,
	}
}

/// Move a suspended job to the foreground, removing it from the job
/// table. Silently a no-op outside interactive job control.
fn b_fg(t: &mut Task, args: Cell) -> Fallible<bool> {
	if !t.runtime.job_control_enabled() || !is_foreground(t) {
		return Ok(false);
	}

	let index = if is_null(&args) {
		match t.runtime.jobs.lock().keys().next_back() {
			Some(&k) => k,
			None => return Ok(false),
		}
	} else {
		cell::atom_int(&car(&args)?)?.to_i64().unwrap_or(0)
	};

	let entry = t.runtime.jobs.lock().remove(&index);
	match entry {
		None => Ok(false),
		Some(e) => {
			let runtime = t.runtime.clone();
			runtime.set_foreground_task(e);
			Ok(true)
		}
	}
}

fn b_jobs(t: &mut Task, _args: Cell) -> Fallible<bool> {
	if !t.runtime.job_control_enabled() || !is_foreground(t) {
		return Ok(false);
	}

	let jobs = t.runtime.jobs.lock();
	if jobs.is_empty() {
		return Ok(false);
	}

	let last = jobs.keys().next_back().copied();
	for (k, v) in jobs.iter() {
		if Some(*k) == last {
			println!["[{}]+\t{}\t{}", k, v.group, v.command];
		} else {
			println!["[{}] \t{}\t{}", k, v.group, v.command];
		}
	}
	Ok(false)
}

/// A symbol naming a module: `$name-size-sec.nsec` from stat, or the
/// already-loaded module it resolves to.
fn b_module(t: &mut Task, args: Cell) -> Fallible<bool> {
	let path = raw(&car(&args)?);

	let meta = match std::fs::metadata(&path) {
		Ok(m) => m,
		Err(_) => return t.regs.return_result(cell::null()),
	};

	let name = Path::new(&path)
		.file_name()
		.map(|n| n.to_string_lossy().to_string())
		.unwrap_or_default();

	let (sec, nsec) = meta
		.modified()
		.ok()
		.and_then(|m| m.duration_since(UNIX_EPOCH).ok())
		.map(|d| (d.as_secs() % 60, d.subsec_nanos()))
		.unwrap_or((0, 0));

	let id = format!["${}-{}-{}.{}", name, meta.len(), sec, nsec];
	let symbol = cell::sym(&id);

	match resolve(&t.regs.lexical, t.regs.dynamic.as_ref(), &id) {
		None => t.regs.return_result(symbol),
		Some(r) => t.regs.return_result(r.get()),
	}
}

/// Evaluate the argv as a command through the external-command path.
fn b_run(t: &mut Task, args: Cell) -> Fallible<bool> {
	if is_null(&args) {
		cell::set_car(&t.regs.scratch, boolean(false))?;
		return Ok(false);
	}

	cell::set_car(&t.regs.scratch, car(&args)?)?;
	t.regs.scratch = cons(t.runtime.external.clone(), t.regs.scratch.clone());
	t.regs.scratch = cons(cell::marker(), t.regs.scratch.clone());
	for a in to_vec(&cdr(&args)?) {
		t.regs.scratch = cons(a, t.regs.scratch.clone());
	}

	t.regs.replace_states(&[EXEC_BUILTIN])?;
	Ok(true)
}

// //////////////////////////////////////////////////////////
// Object protocol
// //////////////////////////////////////////////////////////

fn object_cell(scope: Arc<Scope>) -> Cell {
	Arc::new(Value::Object(scope))
}

fn o_child(t: &mut Task, _args: Cell) -> Fallible<bool> {
	let parent = expose(&t.self_context()?)?;
	t.regs.return_result(object_cell(Scope::new(Some(parent))))
}

fn o_clone(t: &mut Task, _args: Cell) -> Fallible<bool> {
	let this = t.self_context()?;
	let scope = scope_of(&this)
		.ok_or_else(|| Fault::type_error("receiver is not a context"))?;
	t.regs.return_result(object_cell(scope.copy()))
}

fn o_context(t: &mut Task, _args: Cell) -> Fallible<bool> {
	let this = t.self_context()?;
	let v = match *this {
		Value::Object(_) => this.clone(),
		_ => {
			let scope = scope_of(&this)
				.ok_or_else(|| Fault::type_error("receiver is not a context"))?;
			object_cell(scope)
		}
	};
	t.regs.return_result(v)
}

/// Evaluate an expression in the receiver's scope.
fn o_eval(t: &mut Task, args: Cell) -> Fallible<bool> {
	let scope = expose(&t.self_context()?)?;
	t.regs.remove_state()?;

	if !same_context(&t.regs.lexical, &scope) {
		t.regs.new_states(&[SAVE_LEXICAL])?;
		t.regs.lexical = scope;
	}

	t.regs.new_states(&[EVAL_ELEMENT])?;
	t.regs.code = car(&args)?;
	t.regs.scratch = cdr(&t.regs.scratch)?;

	Ok(true)
}

fn o_get_slot(t: &mut Task, args: Cell) -> Fallible<bool> {
	let name = raw(&car(&args)?);
	let this = t.self_context()?;

	let r = resolve(&this, None, &name).ok_or_else(|| Fault::undefined(&name))?;
	let v = r.get();

	if cell::as_binding(&v).is_some() {
		let lexical = t.regs.lexical.clone();
		t.regs.return_result(cell::bind(&v, &lexical))
	} else {
		t.regs.return_result(v)
	}
}

fn o_has(t: &mut Task, args: Cell) -> Fallible<bool> {
	let name = raw(&car(&args)?);
	let this = t.self_context()?;
	let found = resolve(&this, t.regs.dynamic.as_ref(), &name).is_some();
	t.regs.return_result(boolean(found))
}

static INTERPOLATION: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?:\$\$)|(?:\$\{.+?\})").unwrap());

/// Expand `${name}` references through lexical + dynamic resolution;
/// `$$` is a literal `$`.
fn o_interpolate(t: &mut Task, args: Cell) -> Fallible<bool> {
	let original = raw(&car(&args)?);
	let this = t.self_context()?;

	let l = if same_context(&t.regs.lexical, &this) {
		t.regs.lexical.clone()
	} else {
		this
	};
	let dynamic = t.regs.dynamic.clone();

	let modified = INTERPOLATION.replace_all(&original, |caps: &regex::Captures| {
		let m = caps.get(0).map(|m| m.as_str()).unwrap_or("");
		if m == "$$" {
			return "$".to_string();
		}

		let name = &m[2..m.len() - 1];
		let found = resolve(&l, dynamic.as_ref(), name)
			.or_else(|| resolve(&l, dynamic.as_ref(), &format!["${}", name]));

		match found {
			Some(r) => raw(&r.get()),
			None => format!["${{{}}}", name],
		}
	});

	let lexical = t.regs.lexical.clone();
	t.regs.return_result(cell::text(&lexical, &modified))
}

fn o_set_slot(t: &mut Task, args: Cell) -> Fallible<bool> {
	let name = raw(&car(&args)?);
	let v = cadr(&args)?;
	let this = t.self_context()?;

	let scope = scope_of(&this)
		.ok_or_else(|| Fault::type_error("receiver is not a context"))?;
	scope.public(&name, v.clone());

	t.regs.return_result(v)
}

fn o_unset(t: &mut Task, args: Cell) -> Fallible<bool> {
	let name = raw(&car(&args)?);
	let this = t.self_context()?;

	let scope = scope_of(&this)
		.ok_or_else(|| Fault::type_error("receiver is not a context"))?;
	let removed = scope.remove(&name);

	t.regs.return_result(boolean(removed))
}

// //////////////////////////////////////////////////////////
// Syntax forms
// //////////////////////////////////////////////////////////

fn syn_block(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.regs
		.replace_states(&[SAVE_DYNAMIC | SAVE_LEXICAL, EVAL_BLOCK])?;

	let dynamic = t.regs.dynamic.clone();
	let lexical = t.regs.lexical.clone();
	t.regs.new_block(dynamic, &lexical);

	Ok(true)
}

fn syn_if(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.regs.replace_states(&[
		SAVE_DYNAMIC | SAVE_LEXICAL,
		EXEC_IF,
		SAVE_CODE,
		EVAL_ELEMENT,
	])?;

	let dynamic = t.regs.dynamic.clone();
	let lexical = t.regs.lexical.clone();
	t.regs.new_block(dynamic, &lexical);

	t.regs.code = car(&t.regs.code)?;
	t.regs.scratch = cdr(&t.regs.scratch)?;

	Ok(true)
}

fn syn_make_env(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.regs.replace_states(&[SAVE_DYNAMIC, EVAL_BLOCK])?;
	t.regs.dynamic = Some(Env::new(t.regs.dynamic.clone()));
	Ok(true)
}

fn syn_make_scope(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.regs.replace_states(&[SAVE_LEXICAL, EVAL_BLOCK])?;
	t.regs.lexical = crate::registers::new_scope(Some(t.regs.lexical.clone()));
	Ok(true)
}

/// `set name = value` or `set obj::member = value`: assignment to an
/// existing binding.
fn syn_set(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.regs.scratch = cdr(&t.regs.scratch)?;

	let code = t.regs.code.clone();
	let s = if length(&code) == 3 {
		if raw(&cadr(&code)?) != "=" {
			return Err(Fault::Resolution("expected '='".into()));
		}
		cell::caddr(&code)?
	} else {
		cadr(&code)?
	};

	t.regs.code = car(&code)?;
	if !is_cons(&t.regs.code) {
		t.regs.replace_states(&[EXEC_SET, SAVE_CODE])?;
	} else {
		t.regs.replace_states(&[
			SAVE_DYNAMIC | SAVE_LEXICAL,
			EXEC_SET,
			SAVE_CDR_CODE,
			CHANGE_CONTEXT,
			EVAL_ELEMENT,
			SAVE_CAR_CODE,
		])?;
	}

	t.regs.new_states(&[EVAL_ELEMENT])?;
	t.regs.code = s;

	Ok(true)
}

/// Start a child task over the raw argument block. The child gets a
/// fresh dynamic env and lexical scope chained to the caller's.
fn syn_spawn(t: &mut Task, _args: Cell) -> Fallible<bool> {
	let code = t.regs.code.clone();
	let dynamic = Env::new(t.regs.dynamic.clone());
	let lexical = crate::registers::new_scope(Some(t.regs.lexical.clone()));

	let mut child = Task::new(
		t.runtime.clone(),
		code,
		Some(dynamic),
		Some(lexical),
		Some(&t.shared),
	);
	let child_cell = child.cell();

	std::thread::spawn(move || child.launch());

	cell::set_car(&t.regs.scratch, child_cell)?;
	Ok(false)
}

fn syn_splice(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.regs.replace_states(&[EXEC_SPLICE, EVAL_ELEMENT])?;
	t.regs.code = car(&t.regs.code)?;
	t.regs.scratch = cdr(&t.regs.scratch)?;
	Ok(true)
}

fn syn_while(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.regs
		.replace_states(&[SAVE_DYNAMIC | SAVE_LEXICAL, EXEC_WHILE_TEST])?;
	Ok(true)
}

fn syn_define(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.lexical_var(EXEC_DEFINE)
}

fn syn_public(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.lexical_var(EXEC_PUBLIC)
}

fn syn_dynamic(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.dynamic_var(EXEC_DYNAMIC)
}

fn syn_setenv(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.dynamic_var(EXEC_SETENV)
}

fn syn_builtin(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.closure_form(ClosureKind::Builtin)
}

fn syn_method(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.closure_form(ClosureKind::Method)
}

fn syn_syntax(t: &mut Task, _args: Cell) -> Fallible<bool> {
	t.closure_form(ClosureKind::Syntax)
}
