//! Tasks, jobs, and the evaluator loop.
//!
//! A task is one concurrent strand of evaluation: a register file
//! driven by the state machine, plus the shared half other tasks can
//! see (job, done signal, children, suspension gate). The evaluator
//! dispatches on the numeric state tags described in `registers` and a
//! single iteration may traverse several states in sequence.

use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::{Condvar, Mutex};
use regex::Regex;
use tracing::debug;

use crate::cell::{
	self, as_binding, bind, car, cdr, caar, cadr, caddr, cons, expose, is_atom, is_cons,
	is_null, is_simple, length, raw, same_context, scope_of, to_vec, truthy, Cell, Closure,
	ClosureKind, Value,
};
use crate::error::{Fallible, Fault};
use crate::registers::{
	new_scope, next_states, Registers, CHANGE_CONTEXT, EVAL_ARGUMENTS, EVAL_ARGUMENTS_BUILTIN,
	EVAL_BLOCK, EVAL_COMMAND, EVAL_ELEMENT, EVAL_ELEMENT_BUILTIN, EVAL_MEMBER, EXEC_BUILTIN,
	EXEC_COMMAND, EXEC_DEFINE, EXEC_DYNAMIC, EXEC_IF, EXEC_METHOD, EXEC_PUBLIC, EXEC_SET,
	EXEC_SETENV, EXEC_SPLICE, EXEC_SYNTAX, EXEC_WHILE_BODY, EXEC_WHILE_TEST, RETURN,
	SAVE_CAR_CODE, SAVE_CDR_CODE, SAVE_CODE, SAVE_DYNAMIC, SAVE_LEXICAL, SAVE_MAX,
};
use crate::runtime::Runtime;
use crate::scope::{resolve, Env};
use crate::unix;

static NUMBER: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?$").unwrap());

/// True for names strict mode refuses as variables.
pub fn number(s: &str) -> bool {
	NUMBER.is_match(s)
}

// //////////////////////////////////////////////////////////
// Gates
// //////////////////////////////////////////////////////////

/// A one-way latch. Waiters block until the gate closes.
pub struct Gate {
	closed: Mutex<bool>,
	cv: Condvar,
}

impl Gate {
	pub fn new(closed: bool) -> Arc<Gate> {
		Arc::new(Gate {
			closed: Mutex::new(closed),
			cv: Condvar::new(),
		})
	}

	pub fn close(&self) {
		let mut state = self.closed.lock();
		*state = true;
		self.cv.notify_all();
	}

	pub fn is_closed(&self) -> bool {
		*self.closed.lock()
	}

	pub fn wait(&self) {
		let mut state = self.closed.lock();
		while !*state {
			self.cv.wait(&mut state);
		}
	}
}

/// The done signal: rendezvous sends for the listener, a final close
/// when the task completes. After close, every receive succeeds.
pub struct DoneGate {
	state: Mutex<(u64, bool)>,
	cv: Condvar,
}

impl DoneGate {
	fn new() -> DoneGate {
		DoneGate {
			state: Mutex::new((0, false)),
			cv: Condvar::new(),
		}
	}

	pub fn send(&self) {
		let mut state = self.state.lock();
		state.0 += 1;
		self.cv.notify_all();
	}

	pub fn close(&self) {
		let mut state = self.state.lock();
		state.1 = true;
		self.cv.notify_all();
	}

	pub fn recv(&self) {
		let mut state = self.state.lock();
		loop {
			if state.1 {
				return;
			}
			if state.0 > 0 {
				state.0 -= 1;
				return;
			}
			self.cv.wait(&mut state);
		}
	}

	pub fn is_closed(&self) -> bool {
		self.state.lock().1
	}
}

// //////////////////////////////////////////////////////////
// Jobs
// //////////////////////////////////////////////////////////

pub struct JobState {
	pub command: String,
	pub group: i32,
}

/// Process-group bookkeeping, shared across a task tree.
pub struct Job {
	pub state: Mutex<JobState>,
}

impl Job {
	pub fn new() -> Arc<Job> {
		Arc::new(Job {
			state: Mutex::new(JobState {
				command: String::new(),
				group: 0,
			}),
		})
	}

	pub fn group(&self) -> i32 {
		self.state.lock().group
	}

	pub fn command(&self) -> String {
		self.state.lock().command.clone()
	}

	pub fn set_command(&self, s: &str) {
		self.state.lock().command = s.to_string();
	}
}

// //////////////////////////////////////////////////////////
// The shared half of a task
// //////////////////////////////////////////////////////////

pub struct TaskShared {
	pub job: Arc<Job>,
	pub done: DoneGate,
	pub children: Mutex<Vec<Arc<TaskShared>>>,
	pub parent: Weak<TaskShared>,
	pub pid: AtomicI32,
	pub result: Mutex<Cell>,
	eval_tx: Mutex<Option<Sender<Cell>>>,
	eval_rx: Mutex<Option<Receiver<Cell>>>,
	suspended: Mutex<Arc<Gate>>,
	stopped: AtomicBool,
}

impl TaskShared {
	fn new(job: Arc<Job>, parent: Weak<TaskShared>) -> Arc<TaskShared> {
		let (tx, rx) = channel();
		Arc::new(TaskShared {
			job,
			done: DoneGate::new(),
			children: Mutex::new(vec![]),
			parent,
			pid: AtomicI32::new(0),
			result: Mutex::new(cell::null()),
			eval_tx: Mutex::new(Some(tx)),
			eval_rx: Mutex::new(Some(rx)),
			suspended: Mutex::new(Gate::new(true)),
			stopped: AtomicBool::new(false),
		})
	}

	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}

	/// Block until runnable.
	pub fn runnable_wait(&self) {
		let gate = self.suspended.lock().clone();
		gate.wait();
	}

	pub fn eval_send(&self, c: Cell) -> bool {
		let tx = self.eval_tx.lock().clone();
		match tx {
			Some(tx) => tx.send(c).is_ok(),
			None => false,
		}
	}

	fn eval_recv(&self) -> Option<Cell> {
		let guard = self.eval_rx.lock();
		match *guard {
			Some(ref rx) => rx.recv().ok(),
			None => None,
		}
	}

	/// Wake this task and its descendants, and any bound process.
	pub fn resume(&self) {
		let pid = self.pid.load(Ordering::SeqCst);
		if pid > 0 {
			unix::continue_process(pid);
		}

		for child in self.children.lock().iter() {
			child.resume();
		}

		self.suspended.lock().close();
	}

	/// Install a fresh blocked gate here and below. The child process
	/// group is stopped as well.
	pub fn suspend(&self) {
		let group = self.job.group();
		let pid = self.pid.load(Ordering::SeqCst);
		if group > 0 {
			unix::stop_process_group(group);
		} else if pid > 0 {
			unix::stop_process(pid);
		}

		for child in self.children.lock().iter() {
			child.suspend();
		}

		*self.suspended.lock() = Gate::new(false);
	}

	/// Cooperative termination: the evaluator loop exits at its next
	/// iteration, the bound child process is killed, children stop
	/// recursively.
	pub fn stop(&self) {
		debug!["stopping task"];
		self.stopped.store(true, Ordering::SeqCst);
		self.eval_tx.lock().take();

		let gate = self.suspended.lock().clone();
		if !gate.is_closed() {
			gate.close();
		}

		let pid = self.pid.load(Ordering::SeqCst);
		if pid > 0 {
			unix::terminate_process(pid);
		}

		for child in self.children.lock().iter() {
			child.stop();
		}
	}
}

// //////////////////////////////////////////////////////////
// The running half
// //////////////////////////////////////////////////////////

pub struct Task {
	pub runtime: Arc<Runtime>,
	pub shared: Arc<TaskShared>,
	pub regs: Registers,
}

impl Task {
	/// A task over the given code. Dynamic and lexical default to the
	/// roots; the job is shared with the parent.
	pub fn new(
		runtime: Arc<Runtime>,
		code: Cell,
		dynamic: Option<Arc<Env>>,
		lexical: Option<Cell>,
		parent: Option<&Arc<TaskShared>>,
	) -> Task {
		let dynamic = dynamic.or_else(|| Some(runtime.env0.clone()));
		let lexical = lexical.unwrap_or_else(|| runtime.scope0.clone());

		let (job, parent_ref) = match parent {
			Some(p) => (p.job.clone(), Arc::downgrade(p)),
			None => (Job::new(), Weak::new()),
		};

		let shared = TaskShared::new(job, parent_ref);
		if let Some(p) = parent {
			p.children.lock().push(shared.clone());
		}

		Task {
			runtime,
			shared,
			regs: Registers::new(code, dynamic, lexical),
		}
	}

	pub fn cell(&self) -> Cell {
		Arc::new(Value::Task(self.shared.clone()))
	}

	/// The receiver of the binding being applied.
	pub fn self_context(&self) -> Fallible<Cell> {
		let binding = car(&self.regs.scratch)?;
		match as_binding(&binding) {
			Some((_, Some(this))) => Ok(this),
			_ => Err(Fault::type_error("binding has no receiver")),
		}
	}

	/// True when the binding `strict` resolves to a truthy value. The
	/// probe never raises; failure means non-strict.
	pub fn strict(&self) -> bool {
		match resolve(&self.regs.lexical, None, "strict") {
			Some(r) => truthy(&r.get()),
			None => false,
		}
	}

	/// Run to completion, then publish the result and fire done.
	pub fn launch(&mut self) {
		self.run(None);
		let result = car(&self.regs.scratch).unwrap_or_else(|_| cell::null());
		*self.shared.result.lock() = result;
		self.shared.done.close();
	}

	/// The top-level driver: receive parsed commands, stitch them onto
	/// the growing code tail, and run. A failed command restores the
	/// register snapshot and truncates the tail.
	pub fn listen(&mut self) {
		loop {
			let c = match self.shared.eval_recv() {
				Some(c) => c,
				None => break,
			};

			let saved = self.regs.clone();
			let end = cons(cell::marker(), cell::null());

			let ok = cell::set_car(&self.regs.code, c.clone()).is_ok()
				&& cell::set_cdr(&self.regs.code, end.clone()).is_ok();
			if !ok {
				break;
			}

			self.regs.code = end.clone();
			let _ = self.regs.new_states(&[SAVE_CODE, EVAL_COMMAND]);
			self.regs.code = c;

			if !self.run(Some(&end)) {
				self.regs = saved;
				let _ = cell::set_car(&self.regs.code, cell::marker());
				let _ = cell::set_cdr(&self.regs.code, cell::null());
			}

			self.shared.done.send();
		}
	}

	/// Wait for all children, forgetting them as they finish.
	pub fn wait_children(&self) {
		let children: Vec<Arc<TaskShared>> =
			self.shared.children.lock().drain(..).collect();
		for child in children {
			child.done.recv();
		}
	}

	// //////////////////////////////////////////////////////
	// The evaluator loop
	// //////////////////////////////////////////////////////

	/// Drive the state machine; failures are printed as `oh: <msg>`
	/// and reported in the return value so a session survives them.
	pub fn run(&mut self, end: Option<&Cell>) -> bool {
		match self.try_run(end) {
			Ok(()) => true,
			Err(fault) => {
				println!["oh: {}", fault];
				false
			}
		}
	}

	pub fn try_run(&mut self, end: Option<&Cell>) -> Fallible<()> {
		'run: loop {
			if self.shared.is_stopped() {
				return Ok(());
			}
			self.shared.runnable_wait();
			if self.shared.is_stopped() || is_null(&self.regs.stack) {
				return Ok(());
			}

			let mut state = self.regs.state();

			'fall: loop {
				match state {
					CHANGE_CONTEXT => {
						self.regs.dynamic = None;
						self.regs.lexical = car(&self.regs.scratch)?;
						self.regs.scratch = cdr(&self.regs.scratch)?;
					}

					EXEC_BUILTIN | EXEC_METHOD => {
						let mut args = self.regs.arguments()?;
						if state == EXEC_BUILTIN {
							args = self.expand(&args)?;
						}
						self.regs.code = args;

						state = EXEC_SYNTAX;
						continue 'fall;
					}

					EXEC_SYNTAX => {
						let binding = car(&self.regs.scratch)?;
						let (closure, _) = as_binding(&binding).ok_or_else(|| {
							Fault::type_error("applied a value that is not callable")
						})?;
						let code = self.regs.code.clone();
						if (closure.applier)(self, code)? {
							continue 'run;
						}
					}

					EXEC_IF | EXEC_WHILE_BODY => {
						if !truthy(&car(&self.regs.scratch)?) {
							self.regs.code = cdr(&self.regs.code)?;
							loop {
								let head = car(&self.regs.code)?;
								if is_null(&head) || is_atom(&head) {
									break;
								}
								self.regs.code = cdr(&self.regs.code)?;
							}

							let head = car(&self.regs.code)?;
							if is_null(&head) {
								if state == EXEC_IF {
									return Err(Fault::Resolution(
										"expected 'else'".into(),
									));
								}
							} else if raw(&head) != "else" {
								return Err(Fault::Resolution("expected 'else'".into()));
							}
						}

						if is_null(&cdr(&self.regs.code)?) {
							break 'fall;
						}

						self.regs.replace_states(next_states(state))?;
						self.regs.code = cdr(&self.regs.code)?;

						state = EVAL_BLOCK;
						continue 'fall;
					}

					EVAL_BLOCK => {
						if let Some(e) = end {
							if Arc::ptr_eq(&self.regs.code, e) {
								self.regs.scratch = cdr(&self.regs.scratch)?;
								return Ok(());
							}
						}

						if is_null(&self.regs.code)
							|| !is_cons(&self.regs.code)
							|| !is_cons(&car(&self.regs.code)?)
						{
							break 'fall;
						}

						let rest = cdr(&self.regs.code)?;
						if is_null(&rest) || !is_cons(&car(&rest)?) {
							self.regs.replace_states(&[EVAL_COMMAND])?;
						} else {
							self.regs.new_states(&[SAVE_CDR_CODE, EVAL_COMMAND])?;
						}

						self.regs.code = car(&self.regs.code)?;
						self.regs.scratch = cdr(&self.regs.scratch)?;

						state = EVAL_COMMAND;
						continue 'fall;
					}

					EVAL_COMMAND => {
						if is_null(&self.regs.code) {
							self.regs.scratch =
								cons(cell::null(), self.regs.scratch.clone());
							break 'fall;
						}

						self.regs.replace_states(&[
							EXEC_COMMAND,
							SAVE_CDR_CODE,
							EVAL_ELEMENT,
						])?;
						self.regs.code = car(&self.regs.code)?;

						continue 'run;
					}

					EXEC_COMMAND => {
						let head = car(&self.regs.scratch)?;
						match *head {
							Value::Symbol(_) | Value::String(_) => {
								self.regs.scratch = cons(
									self.runtime.external.clone(),
									self.regs.scratch.clone(),
								);
								self.regs.replace_states(&[
									EXEC_BUILTIN,
									EVAL_ARGUMENTS_BUILTIN,
								])?;
							}
							Value::Unbound(ref c) | Value::Bound(ref c, _) => match c.kind {
								ClosureKind::Builtin => {
									self.regs.replace_states(&[
										EXEC_BUILTIN,
										EVAL_ARGUMENTS_BUILTIN,
									])?;
								}
								ClosureKind::Method => {
									self.regs.replace_states(&[
										EXEC_METHOD,
										EVAL_ARGUMENTS,
									])?;
								}
								ClosureKind::Syntax => {
									self.regs.replace_states(&[EXEC_SYNTAX])?;
									continue 'run;
								}
							},
							Value::Continuation(_) => {
								self.regs.replace_states(&[RETURN, EVAL_ARGUMENTS])?;
							}
							_ => {
								cell::register_tree(&head);
								return Err(Fault::type_error(format![
									"can't evaluate: {}",
									head
								]));
							}
						}

						self.regs.scratch =
							cons(cell::marker(), self.regs.scratch.clone());

						state = self.regs.state();
						continue 'fall;
					}

					EVAL_ARGUMENTS | EVAL_ARGUMENTS_BUILTIN => {
						if is_null(&self.regs.code) {
							break 'fall;
						}

						self.regs.new_states(next_states(state))?;
						self.regs.code = car(&self.regs.code)?;

						state = self.regs.state();
						continue 'fall;
					}

					EVAL_ELEMENT | EVAL_ELEMENT_BUILTIN | EVAL_MEMBER => {
						if is_null(&self.regs.code) {
							self.regs.scratch =
								cons(self.regs.code.clone(), self.regs.scratch.clone());
							break 'fall;
						} else if is_cons(&self.regs.code) {
							if is_atom(&cdr(&self.regs.code)?) {
								self.regs.replace_states(&[
									SAVE_DYNAMIC | SAVE_LEXICAL,
									EVAL_MEMBER,
									CHANGE_CONTEXT,
									SAVE_CDR_CODE,
									EVAL_ELEMENT,
								])?;
								self.regs.code = car(&self.regs.code)?;
							} else {
								self.regs.replace_states(&[EVAL_COMMAND])?;
							}
							continue 'run;
						} else if let Value::Symbol(ref name) = *self.regs.code.clone() {
							let simple = state == EVAL_ELEMENT_BUILTIN;
							let member = state == EVAL_MEMBER;
							self.lookup(name, simple, member)?;
							break 'fall;
						} else {
							self.regs.scratch =
								cons(self.regs.code.clone(), self.regs.scratch.clone());
							break 'fall;
						}
					}

					EXEC_DEFINE | EXEC_PUBLIC => {
						let name = raw(&self.regs.code);
						let v = car(&self.regs.scratch)?;
						let scope = scope_of(&self.regs.lexical).ok_or_else(|| {
							Fault::type_error("no enclosing scope")
						})?;
						if state == EXEC_DEFINE {
							scope.define(&name, v);
						} else {
							scope.public(&name, v);
						}
					}

					EXEC_DYNAMIC | EXEC_SETENV => {
						let k = raw(&self.regs.code);
						let v = car(&self.regs.scratch)?;

						if state == EXEC_SETENV {
							std::env::set_var(k.trim_start_matches('$'), raw(&v));
						}

						match self.regs.dynamic {
							Some(ref d) => d.add(&k, v),
							None => {
								return Err(Fault::type_error(
									"no dynamic environment here",
								))
							}
						}
					}

					EXEC_SET => {
						let k = raw(&self.regs.code);
						let r = resolve(
							&self.regs.lexical,
							self.regs.dynamic.as_ref(),
							&k,
						)
						.ok_or_else(|| Fault::undefined(&k))?;
						r.set(car(&self.regs.scratch)?)?;
					}

					EXEC_SPLICE => {
						let l = car(&self.regs.scratch)?;
						self.regs.scratch = cdr(&self.regs.scratch)?;

						if !is_cons(&l) {
							self.regs.scratch = cons(l, self.regs.scratch.clone());
						} else {
							for item in to_vec(&l) {
								self.regs.scratch =
									cons(item, self.regs.scratch.clone());
							}
						}
					}

					EXEC_WHILE_TEST => {
						self.regs.replace_states(&[
							EXEC_WHILE_BODY,
							SAVE_CODE,
							EVAL_ELEMENT,
						])?;
						self.regs.code = car(&self.regs.code)?;
						self.regs.scratch = cdr(&self.regs.scratch)?;

						continue 'run;
					}

					RETURN => {
						let args = self.regs.arguments()?;
						let head = car(&self.regs.scratch)?;
						let snapshot = match *head {
							Value::Continuation(ref k) => k.clone(),
							_ => {
								return Err(Fault::type_error("not a continuation"));
							}
						};

						self.regs.scratch = snapshot.scratch.clone();
						self.regs.stack = snapshot.stack.clone();
						self.regs.scratch =
							cons(car(&args)?, self.regs.scratch.clone());
					}

					_ => {
						if state >= SAVE_MAX {
							cell::register_tree(&self.regs.code);
							return Err(Fault::type_error(format![
								"command not found: {}",
								self.regs.code
							]));
						}
						self.regs.restore_state()?;
						continue 'run;
					}
				}

				break 'fall;
			}

			self.regs.remove_state()?;
		}
	}

	/// Resolve a symbol and push what it names. Undefined symbols fall
	/// back to themselves outside strict mode and member position; in
	/// builtin-argv mode, non-simple values keep their symbol so glob
	/// expansion sees it.
	fn lookup(&mut self, name: &str, simple: bool, member: bool) -> Fallible<()> {
		let found = resolve(&self.regs.lexical, self.regs.dynamic.as_ref(), name);

		match found {
			None => {
				if member || (self.strict() && !number(name)) {
					return Err(Fault::undefined(name));
				}
				self.regs.scratch = cons(cell::sym(name), self.regs.scratch.clone());
			}
			Some(r) => {
				let v = r.get();
				if simple && !is_simple(&v) {
					self.regs.scratch =
						cons(cell::sym(name), self.regs.scratch.clone());
				} else if as_binding(&v).is_some() {
					self.regs.scratch = cons(
						bind(&v, &self.regs.lexical),
						self.regs.scratch.clone(),
					);
				} else {
					self.regs.scratch = cons(v, self.regs.scratch.clone());
				}
			}
		}

		Ok(())
	}

	/// Tilde- and glob-expand a builtin argv. Symbols expand; anything
	/// else passes through literally.
	fn expand(&mut self, args: &Cell) -> Fallible<Cell> {
		let mut out: Vec<Cell> = vec![];

		for c in to_vec(args) {
			let s = raw(&c);

			if !matches![*c, Value::Symbol(_)] {
				out.push(cell::sym(&s));
				continue;
			}

			let s = if let Some(rest) = s.strip_prefix('~') {
				let home = std::env::var("HOME").unwrap_or_default();
				format!["{}{}", home, rest]
			} else {
				s
			};

			if !s.contains(['*', '?', '[']) {
				out.push(cell::sym(&s));
				continue;
			}

			let mut matched = vec![];
			if let Ok(paths) = glob::glob(&s) {
				for p in paths.flatten() {
					let v = p.to_string_lossy().to_string();
					if !v.starts_with('.') || s.starts_with('.') {
						matched.push(cell::text(&self.regs.lexical, &v));
					}
				}
			}

			if matched.is_empty() {
				return Err(Fault::Os(format!["no matches found: {}", s]));
			}
			out.extend(matched);
		}

		Ok(cell::from_vec(&out))
	}

	// //////////////////////////////////////////////////////
	// Application
	// //////////////////////////////////////////////////////

	/// Apply a library closure: enter a block over the capture scope,
	/// bind label, positional and rest parameters, and a `return`
	/// continuation, then run the body.
	pub fn apply(&mut self, args: Cell) -> Fallible<bool> {
		let binding = car(&self.regs.scratch)?;
		let (closure, this) = as_binding(&binding)
			.ok_or_else(|| Fault::type_error("applied a value that is not callable"))?;

		if self.regs.state() == EXEC_SYNTAX {
			self.regs.replace_states(&[SAVE_LEXICAL, EVAL_BLOCK])?;
			self.regs.lexical = new_scope(Some(closure.scope.clone()));
		} else {
			self.regs
				.replace_states(&[SAVE_DYNAMIC | SAVE_LEXICAL, EVAL_BLOCK])?;
			let dynamic = self.regs.dynamic.clone();
			self.regs.new_block(dynamic, &closure.scope.clone());
		}

		self.regs.code = closure.body.clone();

		let scope = scope_of(&self.regs.lexical)
			.ok_or_else(|| Fault::type_error("no enclosing scope"))?;

		if !is_null(&closure.label) {
			let this = this.ok_or_else(|| Fault::type_error("binding has no receiver"))?;
			scope.public(&raw(&closure.label), expose(&this)?);
		}

		let mut params = closure.params.clone();
		let mut rest = args;
		while !is_null(&rest) && !is_null(&params) && is_atom(&car(&params)?) {
			scope.public(&raw(&car(&params)?), car(&rest)?);
			rest = cdr(&rest)?;
			params = cdr(&params)?;
		}
		if is_cons(&car(&params)?) {
			scope.public(&raw(&caar(&params)?), rest);
		}

		let cc = cell::continuation(cdr(&self.regs.scratch)?, self.regs.stack.clone());
		scope.public("return", cc);

		Ok(true)
	}

	/// The `builtin`/`method`/`syntax` constructor forms: an optional
	/// label, a parameter list, the keyword `as`, and a body.
	pub fn closure_form(&mut self, kind: ClosureKind) -> Fallible<bool> {
		let mut label = cell::null();
		let mut params = car(&self.regs.code)?;

		while !is_null(&self.regs.code) && raw(&cadr(&self.regs.code)?) != "as" {
			label = params;
			params = cadr(&self.regs.code)?;
			self.regs.code = cdr(&self.regs.code)?;
		}

		if is_null(&self.regs.code) {
			return Err(Fault::Resolution("expected 'as'".into()));
		}

		let body = cell::cddr(&self.regs.code)?;
		let scope = self.regs.lexical.clone();

		let closure = Arc::new(Closure {
			kind,
			applier: apply_stub,
			body,
			label: label.clone(),
			params,
			scope: scope.clone(),
		});

		let binding = if is_null(&label) {
			cell::unbound(closure)
		} else {
			cell::bound(closure, scope)
		};

		self.regs.return_result(binding)
	}

	/// Assign a name in the receiver's scope, privately or publicly.
	pub fn lexical_var(&mut self, state: i64) -> Fallible<bool> {
		self.regs.remove_state()?;

		let l = expose(&self.self_context()?)?;
		if !same_context(&self.regs.lexical, &l) {
			self.regs.new_states(&[SAVE_LEXICAL])?;
			self.regs.lexical = l;
		}

		self.regs.new_states(&[state])?;

		let r = raw(&car(&self.regs.code)?);
		if self.strict() && number(&r) {
			return Err(Fault::Resolution(format![
				"{} cannot be used as a variable name",
				r
			]));
		}

		self.regs
			.new_states(&[SAVE_CAR_CODE | SAVE_LEXICAL, EVAL_ELEMENT])?;

		self.take_assignment_value(&r)?;
		self.regs.scratch = cdr(&self.regs.scratch)?;

		Ok(true)
	}

	/// Add a dynamic binding; setenv also mirrors it into the OS
	/// environment.
	pub fn dynamic_var(&mut self, state: i64) -> Fallible<bool> {
		let r = raw(&car(&self.regs.code)?);
		if self.strict() && number(&r) {
			return Err(Fault::Resolution(format![
				"{} cannot be used as a variable name",
				r
			]));
		}

		if state == EXEC_SETENV && !r.starts_with('$') {
			return Err(Fault::Resolution(
				"environment variable names must begin with '$'".into(),
			));
		}

		self.regs
			.replace_states(&[state, SAVE_CAR_CODE | SAVE_DYNAMIC, EVAL_ELEMENT])?;

		self.take_assignment_value(&r)?;
		self.regs.scratch = cdr(&self.regs.scratch)?;

		Ok(true)
	}

	/// `name value` or `name = value`: leave the value expression in
	/// the code register.
	fn take_assignment_value(&mut self, name: &str) -> Fallible<()> {
		if length(&self.regs.code) == 3 {
			if raw(&cadr(&self.regs.code)?) != "=" {
				return Err(Fault::Resolution(format!["expected '=' after {}", name]));
			}
			self.regs.code = caddr(&self.regs.code)?;
		} else {
			self.regs.code = cadr(&self.regs.code)?;
		}
		Ok(())
	}

	// //////////////////////////////////////////////////////
	// External commands
	// //////////////////////////////////////////////////////

	fn stdio(&self, name: &str, write: bool) -> Fallible<File> {
		let r = resolve(&self.regs.lexical, self.regs.dynamic.as_ref(), name)
			.ok_or_else(|| Fault::undefined(name))?;
		let v = r.get();
		match *v {
			Value::Pipe(ref p) => {
				if write {
					p.write_fd()
				} else {
					p.read_fd()
				}
			}
			_ => Err(Fault::type_error(format!["{} is not a pipe", name])),
		}
	}

	/// The external-command thunk: resolve argv0 on PATH, wire the
	/// conduits named by `$stdin`/`$stdout`/`$stderr`, and run.
	pub fn external(&mut self, args: Cell) -> Fallible<bool> {
		self.regs.scratch = cdr(&self.regs.scratch)?;

		let name = raw(&car(&self.regs.scratch)?);
		cell::set_car(&self.regs.scratch, cell::boolean(false))?;

		let arg0 = look_path(&name)?;

		let mut argv = vec![arg0.clone()];
		for a in to_vec(&args) {
			argv.push(raw(&a));
		}

		let dir = resolve(&self.regs.lexical, self.regs.dynamic.as_ref(), "$cwd")
			.map(|r| raw(&r.get()))
			.unwrap_or_else(|| ".".to_string());

		let stdin = self.stdio("$stdin", false)?;
		let stdout = self.stdio("$stdout", true)?;
		let stderr = self.stdio("$stderr", true)?;

		let status = self.execute(&arg0, &argv, &dir, stdin, stdout, stderr)?;
		self.regs.return_result(status)
	}

	/// Start an OS process under the job lock, adopt it as group
	/// leader when job control is on, and join it through the
	/// registrar.
	pub fn execute(
		&mut self,
		arg0: &str,
		argv: &[String],
		dir: &str,
		stdin: File,
		stdout: File,
		stderr: File,
	) -> Fallible<Cell> {
		let job_control = self.runtime.job_control_enabled();

		let mut command = Command::new(arg0);
		command
			.args(&argv[1..])
			.current_dir(dir)
			.stdin(Stdio::from(stdin))
			.stdout(Stdio::from(stdout))
			.stderr(Stdio::from(stderr));

		let pid;
		{
			let mut job = self.shared.job.state.lock();

			if job_control {
				use std::os::unix::process::CommandExt;
				command.process_group(job.group);
			}

			let child = command
				.spawn()
				.map_err(|e| Fault::Os(format!["{}: {}", arg0, e]))?;
			pid = child.id() as i32;

			if job_control && job.group == 0 {
				job.group = pid;
			}

			self.shared.pid.store(pid, Ordering::SeqCst);

			if job_control {
				unix::set_foreground_group(job.group);
			}
		}

		debug!["started {} as pid {}", arg0, pid];
		let status = self.join_process(pid);

		{
			let mut job = self.shared.job.state.lock();
			if job.group == pid {
				job.group = 0;
			}
		}
		self.shared.pid.store(0, Ordering::SeqCst);

		if job_control {
			unix::set_foreground_group(self.runtime.pgid);
		}

		Ok(cell::status(status))
	}

	/// Rendezvous with the registrar until the child reaches a final
	/// state. A stop hands the job to the shell and keeps waiting.
	fn join_process(&mut self, pid: i32) -> i64 {
		let events = self.runtime.reaper.register(pid);
		loop {
			match events.recv() {
				Ok(ev) if ev.is_final() => return ev.status(),
				Ok(_) => self.runtime.child_stopped(&self.shared),
				Err(_) => return 0,
			}
		}
	}
}

/// The applier shared by every library closure.
fn apply_stub(t: &mut Task, args: Cell) -> Fallible<bool> {
	t.apply(args)
}

/// The applier of the external-command thunk.
pub fn external_stub(t: &mut Task, args: Cell) -> Fallible<bool> {
	t.external(args)
}

/// Resolve a command name against $PATH.
pub fn look_path(name: &str) -> Fallible<String> {
	fn executable(p: &Path) -> bool {
		use std::os::unix::fs::PermissionsExt;
		match std::fs::metadata(p) {
			Ok(m) => m.is_file() && m.permissions().mode() & 0o111 != 0,
			Err(_) => false,
		}
	}

	if name.contains('/') {
		if executable(Path::new(name)) {
			return Ok(name.to_string());
		}
		return Err(Fault::Path {
			path: name.to_string(),
			reason: "no such executable".to_string(),
		});
	}

	for dir in std::env::var("PATH").unwrap_or_default().split(':') {
		if dir.is_empty() {
			continue;
		}
		let candidate = Path::new(dir).join(name);
		if executable(&candidate) {
			return Ok(candidate.to_string_lossy().to_string());
		}
	}

	Err(Fault::Path {
		path: name.to_string(),
		reason: "executable file not found in $PATH".to_string(),
	})
}
