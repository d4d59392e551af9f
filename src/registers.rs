//! The per-task register file and the save/restore protocol.
//!
//! The stack is a cell list whose frames each start with an integer
//! state tag. Tags below `SAVE_MAX` are save frames: a bitmask naming
//! which registers were pushed beneath the tag, in the canonical order
//! code, dynamic, lexical, scratch. Tags at or above `SAVE_MAX` are
//! one-cell operation frames dispatched by the evaluator loop.

use std::sync::Arc;

use num::ToPrimitive;

use crate::cell::{self, Cell, Value};
use crate::error::Fallible;
use crate::scope::{Env, Scope};

pub const SAVE_CAR_CODE: i64 = 1;
pub const SAVE_CDR_CODE: i64 = 2;
pub const SAVE_DYNAMIC: i64 = 4;
pub const SAVE_LEXICAL: i64 = 8;
pub const SAVE_SCRATCH: i64 = 16;
pub const SAVE_MAX: i64 = 32;
pub const SAVE_CODE: i64 = SAVE_CAR_CODE | SAVE_CDR_CODE;

pub const CHANGE_CONTEXT: i64 = SAVE_MAX;
pub const EVAL_ARGUMENTS: i64 = 33;
pub const EVAL_ARGUMENTS_BUILTIN: i64 = 34;
pub const EVAL_BLOCK: i64 = 35;
pub const EVAL_COMMAND: i64 = 36;
pub const EVAL_ELEMENT: i64 = 37;
pub const EVAL_ELEMENT_BUILTIN: i64 = 38;
pub const EVAL_MEMBER: i64 = 39;
pub const EXEC_BUILTIN: i64 = 40;
pub const EXEC_COMMAND: i64 = 41;
pub const EXEC_DEFINE: i64 = 42;
pub const EXEC_DYNAMIC: i64 = 43;
pub const EXEC_IF: i64 = 44;
pub const EXEC_METHOD: i64 = 45;
pub const EXEC_PUBLIC: i64 = 46;
pub const EXEC_SET: i64 = 47;
pub const EXEC_SETENV: i64 = 48;
pub const EXEC_SPLICE: i64 = 49;
pub const EXEC_SYNTAX: i64 = 50;
pub const EXEC_WHILE_BODY: i64 = 51;
pub const EXEC_WHILE_TEST: i64 = 52;
pub const RETURN: i64 = 53;

/// Pre-seeded state streams for argument evaluation and loop bodies.
pub fn next_states(tag: i64) -> &'static [i64] {
	match tag {
		EVAL_ARGUMENTS => &[SAVE_CDR_CODE, EVAL_ELEMENT],
		EVAL_ARGUMENTS_BUILTIN => &[SAVE_CDR_CODE, EVAL_ELEMENT_BUILTIN],
		EXEC_IF => &[EVAL_BLOCK],
		EXEC_WHILE_BODY => &[EXEC_WHILE_TEST, SAVE_CODE, EVAL_BLOCK],
		_ => &[],
	}
}

/// A fresh lexical scope cell.
pub fn new_scope(parent: Option<Cell>) -> Cell {
	Arc::new(Value::Scope(Scope::new(parent)))
}

#[derive(Clone)]
pub struct Registers {
	pub code: Cell,
	pub dynamic: Option<Arc<Env>>,
	pub lexical: Cell,
	pub scratch: Cell,
	pub stack: Cell,
}

impl Registers {
	pub fn new(code: Cell, dynamic: Option<Arc<Env>>, lexical: Cell) -> Registers {
		Registers {
			code,
			dynamic,
			lexical,
			scratch: cell::cons(cell::status(0), cell::null()),
			stack: cell::cons(cell::integer(EVAL_BLOCK), cell::null()),
		}
	}

	/// The tag at the top of the stack; 0 when the stack is empty.
	pub fn state(&self) -> i64 {
		match cell::car(&self.stack) {
			Ok(top) => match *top {
				Value::Integer(ref v) => v.to_i64().unwrap_or(0),
				_ => 0,
			},
			Err(_) => 0,
		}
	}

	fn push(&mut self, c: Cell) {
		self.stack = cell::cons(c, self.stack.clone());
	}

	fn pop(&mut self) -> Fallible<()> {
		self.stack = cell::cdr(&self.stack)?;
		Ok(())
	}

	fn dynamic_cell(&self) -> Cell {
		match self.dynamic {
			Some(ref e) => Arc::new(Value::Env(e.clone())),
			None => cell::marker(),
		}
	}

	/// Push the requested states. A save whose bits are already covered
	/// by the save frame on top of the stack is skipped.
	pub fn new_states(&mut self, tags: &[i64]) -> Fallible<()> {
		for &f in tags {
			if f >= SAVE_MAX {
				self.push(cell::integer(f));
				continue;
			}

			let s = self.state();
			if s < SAVE_MAX && (f & s) == f {
				continue;
			}

			if (f & SAVE_CODE) > 0 {
				if (f & SAVE_CODE) == SAVE_CODE {
					self.push(self.code.clone());
				} else if (f & SAVE_CAR_CODE) > 0 {
					let c = cell::car(&self.code)?;
					self.push(c);
				} else {
					let c = cell::cdr(&self.code)?;
					self.push(c);
				}
			}

			if (f & SAVE_DYNAMIC) > 0 {
				let d = self.dynamic_cell();
				self.push(d);
			}

			if (f & SAVE_LEXICAL) > 0 {
				self.push(self.lexical.clone());
			}

			if (f & SAVE_SCRATCH) > 0 {
				self.push(self.scratch.clone());
			}

			self.push(cell::integer(f));
		}
		Ok(())
	}

	/// Drop the top frame without restoring anything.
	pub fn remove_state(&mut self) -> Fallible<()> {
		let f = self.state();

		self.pop()?;
		if f >= SAVE_MAX {
			return Ok(());
		}

		if (f & SAVE_SCRATCH) > 0 {
			self.pop()?;
		}
		if (f & SAVE_LEXICAL) > 0 {
			self.pop()?;
		}
		if (f & SAVE_DYNAMIC) > 0 {
			self.pop()?;
		}
		if (f & SAVE_CODE) > 0 {
			self.pop()?;
		}
		Ok(())
	}

	/// Pop the top save frame, assigning each saved register back.
	pub fn restore_state(&mut self) -> Fallible<()> {
		let f = self.state();

		if f == 0 || f >= SAVE_MAX {
			return Ok(());
		}

		if (f & SAVE_SCRATCH) > 0 {
			self.pop()?;
			self.scratch = cell::car(&self.stack)?;
		}

		if (f & SAVE_LEXICAL) > 0 {
			self.pop()?;
			self.lexical = cell::car(&self.stack)?;
		}

		if (f & SAVE_DYNAMIC) > 0 {
			self.pop()?;
			let d = cell::car(&self.stack)?;
			self.dynamic = match *d {
				Value::Env(ref e) => Some(e.clone()),
				_ => None,
			};
		}

		if (f & SAVE_CODE) > 0 {
			self.pop()?;
			self.code = cell::car(&self.stack)?;
		}

		self.pop()
	}

	pub fn replace_states(&mut self, tags: &[i64]) -> Fallible<()> {
		self.remove_state()?;
		self.new_states(tags)
	}

	/// Collect the argv accumulated on the scratch, in order, dropping
	/// the boundary marker.
	pub fn arguments(&mut self) -> Fallible<Cell> {
		let mut list = cell::null();
		let mut e = cell::car(&self.scratch)?;

		while !cell::is_marker(&e) {
			list = cell::cons(e, list);
			self.scratch = cell::cdr(&self.scratch)?;
			e = cell::car(&self.scratch)?;
		}

		self.scratch = cell::cdr(&self.scratch)?;

		Ok(list)
	}

	/// Enter a fresh block: a child dynamic env and a child scope.
	pub fn new_block(&mut self, dynamic: Option<Arc<Env>>, lexical: &Cell) {
		self.dynamic = Some(Env::new(dynamic));
		self.lexical = new_scope(Some(lexical.clone()));
	}

	/// Publish a result in place of the command on the scratch.
	pub fn return_result(&mut self, v: Cell) -> Fallible<bool> {
		cell::set_car(&self.scratch, v)?;
		Ok(false)
	}

	/// Completion candidates from the lexical and dynamic chains.
	pub fn complete(&self, word: &str) -> Vec<String> {
		let mut out = crate::scope::complete(&self.lexical, word);
		if let Some(ref d) = self.dynamic {
			out.extend(d.complete(word));
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fixture() -> Registers {
		let lex = new_scope(None);
		let env = Env::new(None);
		let code = cell::from_vec(&[cell::sym("a"), cell::sym("b")]);
		Registers::new(code, Some(env), lex)
	}

	#[test]
	fn save_then_remove_leaves_registers_alone() {
		for f in 1..SAVE_MAX {
			let mut r = fixture();
			let stack = r.stack.clone();
			let code = r.code.clone();
			let scratch = r.scratch.clone();
			r.new_states(&[f]).unwrap();
			r.remove_state().unwrap();
			assert![Arc::ptr_eq(&r.stack, &stack)];
			assert![Arc::ptr_eq(&r.code, &code)];
			assert![Arc::ptr_eq(&r.scratch, &scratch)];
		}
	}

	#[test]
	fn save_then_restore_recovers_registers() {
		let mut r = fixture();
		let code = r.code.clone();
		let lexical = r.lexical.clone();
		let scratch = r.scratch.clone();

		r.new_states(&[SAVE_CODE | SAVE_DYNAMIC | SAVE_LEXICAL | SAVE_SCRATCH])
			.unwrap();

		r.code = cell::null();
		r.lexical = new_scope(None);
		r.scratch = cell::cons(cell::integer(9), cell::null());
		r.dynamic = None;

		r.restore_state().unwrap();
		assert![Arc::ptr_eq(&r.code, &code)];
		assert![Arc::ptr_eq(&r.lexical, &lexical)];
		assert![Arc::ptr_eq(&r.scratch, &scratch)];
		assert![r.dynamic.is_some()];
	}

	#[test]
	fn covered_saves_coalesce() {
		let mut r = fixture();
		r.new_states(&[SAVE_CDR_CODE]).unwrap();
		let depth = cell::length(&r.stack);
		r.new_states(&[SAVE_CDR_CODE]).unwrap();
		assert_eq![cell::length(&r.stack), depth];
	}

	#[test]
	fn operation_frames_are_one_cell() {
		let mut r = fixture();
		let depth = cell::length(&r.stack);
		r.new_states(&[EXEC_COMMAND]).unwrap();
		assert_eq![cell::length(&r.stack), depth + 1];
		r.remove_state().unwrap();
		assert_eq![cell::length(&r.stack), depth];
	}

	#[test]
	fn arguments_collects_in_order() {
		let mut r = fixture();
		r.scratch = cell::cons(cell::marker(), r.scratch.clone());
		r.scratch = cell::cons(cell::integer(1), r.scratch.clone());
		r.scratch = cell::cons(cell::integer(2), r.scratch.clone());
		let args = r.arguments().unwrap();
		assert_eq![format!["{}", args], "(1 2)"];
	}
}
