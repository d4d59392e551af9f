//! The cell model: every value the shell manipulates is a `Cell`.
//!
//! Atoms (booleans, integers, rationals, floats, statuses, symbols,
//! strings), pairs, and contexts (scopes, environments, conduits,
//! bindings, continuations, tasks) all share one tagged representation.
//! Symbols are interned process-wide; strings of eight characters or
//! fewer are interned as well. Context-like cells print as
//! `%kind 0xN%` where N is a stable handle that `deref` can turn back
//! into the cell, so first-class values survive a trip through a pipe.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Weak};

use num::bigint::BigInt;
use num::rational::BigRational;
use num::ToPrimitive;
use parking_lot::Mutex;

use crate::conduit::{Channel, Pipe, STRING_METHODS};
use crate::error::{Fallible, Fault};
use crate::scope::{Env, Scope};
use crate::task::TaskShared;

pub type Cell = Arc<Value>;

/// Appliers drive the state machine: `Ok(true)` means the applier has
/// arranged new states and the loop should keep going without removing
/// the current one.
pub type Native = fn(&mut crate::task::Task, Cell) -> Fallible<bool>;

/// The pluggable surface reader: consumes characters from a source
/// with a name, yielding each complete value; a false return from the
/// sink stops the read.
pub type Reader = fn(&mut dyn std::io::BufRead, &str, &mut dyn FnMut(Cell) -> bool);

/// A table of native methods exposed by conduits and strings.
pub struct MethodTable {
	pub entries: &'static [(&'static str, Native)],
}

impl MethodTable {
	pub fn find(&self, name: &str) -> Option<Native> {
		self.entries
			.iter()
			.find(|(n, _)| *n == name)
			.map(|(_, f)| *f)
	}
}

/// What kind of callable a closure is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClosureKind {
	/// Argv is glob- and tilde-expanded before the applier sees it.
	Builtin,
	/// Argv is evaluated but not expanded.
	Method,
	/// The applier receives the raw code unevaluated.
	Syntax,
}

/// The shared shape of builtins, methods, and syntax forms.
pub struct Closure {
	pub kind: ClosureKind,
	pub applier: Native,
	pub body: Cell,
	pub label: Cell,
	pub params: Cell,
	pub scope: Cell,
}

/// A captured (scratch, stack) pair.
pub struct Continuation {
	pub scratch: Cell,
	pub stack: Cell,
}

/// A string cell: immutable text plus a scope exposing the string
/// method table.
pub struct Text {
	pub scope: Arc<Scope>,
	pub v: String,
}

pub enum Value {
	/// Internal sentinel: argv boundary on the scratch, the listener's
	/// code tail, and the "no dynamic env" snapshot. Never parsed,
	/// never data.
	Marker,
	Null,
	Boolean(bool),
	Integer(BigInt),
	Rational(BigRational),
	Float(f64),
	/// A wrapped process status; truthy iff zero.
	Status(i64),
	Symbol(String),
	String(Text),
	Pair(Mutex<Cell>, Mutex<Cell>),
	Scope(Arc<Scope>),
	/// A scope seen through its public face only.
	Object(Arc<Scope>),
	Env(Arc<Env>),
	Pipe(Pipe),
	Channel(Channel),
	Unbound(Arc<Closure>),
	Bound(Arc<Closure>, Cell),
	Continuation(Arc<Continuation>),
	Task(Arc<TaskShared>),
}

// //////////////////////////////////////////////////////////
// Singletons and interning
// //////////////////////////////////////////////////////////

static NULL: LazyLock<Cell> = LazyLock::new(|| Arc::new(Value::Null));
static TRUE: LazyLock<Cell> = LazyLock::new(|| Arc::new(Value::Boolean(true)));
static FALSE: LazyLock<Cell> = LazyLock::new(|| Arc::new(Value::Boolean(false)));
static MARKER: LazyLock<Cell> = LazyLock::new(|| Arc::new(Value::Marker));

static SYMBOLS: LazyLock<Mutex<HashMap<String, Cell>>> =
	LazyLock::new(|| Mutex::new(HashMap::new()));

static STRINGS: LazyLock<Mutex<HashMap<String, Cell>>> =
	LazyLock::new(|| Mutex::new(HashMap::new()));

pub fn null() -> Cell {
	NULL.clone()
}

pub fn marker() -> Cell {
	MARKER.clone()
}

pub fn boolean(v: bool) -> Cell {
	if v { TRUE.clone() } else { FALSE.clone() }
}

pub fn integer(v: i64) -> Cell {
	Arc::new(Value::Integer(BigInt::from(v)))
}

pub fn big(v: BigInt) -> Cell {
	Arc::new(Value::Integer(v))
}

pub fn rational(v: BigRational) -> Cell {
	Arc::new(Value::Rational(v))
}

pub fn float(v: f64) -> Cell {
	Arc::new(Value::Float(v))
}

pub fn status(v: i64) -> Cell {
	Arc::new(Value::Status(v))
}

/// Intern a symbol. Two symbols with equal text are the same cell.
pub fn sym(s: &str) -> Cell {
	let mut table = SYMBOLS.lock();
	if let Some(c) = table.get(s) {
		return c.clone();
	}
	let c = Arc::new(Value::Symbol(s.to_string()));
	table.insert(s.to_string(), c.clone());
	c
}

/// Create a string cell. Strings of length <= 8 are interned; the
/// first creation's lexical context parents the string's scope.
pub fn text(lexical: &Cell, s: &str) -> Cell {
	if s.len() <= 8 {
		if let Some(c) = STRINGS.lock().get(s) {
			return c.clone();
		}
	}

	let parent = expose(lexical).ok();
	let scope = Scope::with_table(parent, &STRING_METHODS);
	let c = Arc::new(Value::String(Text {
		scope,
		v: s.to_string(),
	}));

	if s.len() <= 8 {
		STRINGS.lock().insert(s.to_string(), c.clone());
	}

	c
}

/// A string cell with no lexical parent, for contexts that have none
/// (the reader, mostly). Interning still applies.
pub fn text_bare(s: &str) -> Cell {
	if s.len() <= 8 {
		if let Some(c) = STRINGS.lock().get(s) {
			return c.clone();
		}
	}

	let scope = Scope::with_table(None, &STRING_METHODS);
	let c = Arc::new(Value::String(Text {
		scope,
		v: s.to_string(),
	}));

	if s.len() <= 8 {
		STRINGS.lock().insert(s.to_string(), c.clone());
	}

	c
}

pub fn cons(car: Cell, cdr: Cell) -> Cell {
	Arc::new(Value::Pair(Mutex::new(car), Mutex::new(cdr)))
}

pub fn unbound(c: Arc<Closure>) -> Cell {
	Arc::new(Value::Unbound(c))
}

pub fn bound(c: Arc<Closure>, this: Cell) -> Cell {
	Arc::new(Value::Bound(c, this))
}

pub fn continuation(scratch: Cell, stack: Cell) -> Cell {
	Arc::new(Value::Continuation(Arc::new(Continuation { scratch, stack })))
}

// //////////////////////////////////////////////////////////
// Pair and list operations
// //////////////////////////////////////////////////////////

pub fn is_null(c: &Cell) -> bool {
	matches![**c, Value::Null]
}

pub fn is_marker(c: &Cell) -> bool {
	matches![**c, Value::Marker]
}

pub fn is_cons(c: &Cell) -> bool {
	matches![**c, Value::Pair(..)]
}

/// Atoms are the non-pair, non-context leaf values. Null and the
/// internal marker are neither atom nor pair.
pub fn is_atom(c: &Cell) -> bool {
	matches![
		**c,
		Value::Boolean(_)
			| Value::Integer(_)
			| Value::Rational(_)
			| Value::Float(_)
			| Value::Status(_)
			| Value::Symbol(_)
			| Value::String(_)
	]
}

pub fn is_simple(c: &Cell) -> bool {
	is_atom(c) || is_cons(c)
}

/// Truthiness: False, Null, and nonzero statuses are false.
pub fn truthy(c: &Cell) -> bool {
	match **c {
		Value::Null => false,
		Value::Boolean(v) => v,
		Value::Status(v) => v == 0,
		_ => true,
	}
}

/// The head of a pair. The head of Null is Null.
pub fn car(c: &Cell) -> Fallible<Cell> {
	match **c {
		Value::Pair(ref a, _) => Ok(a.lock().clone()),
		Value::Null => Ok(null()),
		_ => Err(Fault::type_error(format![
			"expected Pair but got {}",
			data_name(c)
		])),
	}
}

/// The tail of a pair. The tail of Null is Null.
pub fn cdr(c: &Cell) -> Fallible<Cell> {
	match **c {
		Value::Pair(_, ref d) => Ok(d.lock().clone()),
		Value::Null => Ok(null()),
		_ => Err(Fault::type_error(format![
			"expected Pair but got {}",
			data_name(c)
		])),
	}
}

pub fn cadr(c: &Cell) -> Fallible<Cell> {
	car(&cdr(c)?)
}

pub fn caddr(c: &Cell) -> Fallible<Cell> {
	car(&cdr(&cdr(c)?)?)
}

pub fn cddr(c: &Cell) -> Fallible<Cell> {
	cdr(&cdr(c)?)
}

pub fn caar(c: &Cell) -> Fallible<Cell> {
	car(&car(c)?)
}

pub fn set_car(c: &Cell, v: Cell) -> Fallible<()> {
	match **c {
		Value::Pair(ref a, _) => {
			*a.lock() = v;
			Ok(())
		}
		_ => Err(Fault::type_error(format![
			"expected Pair but got {}",
			data_name(c)
		])),
	}
}

pub fn set_cdr(c: &Cell, v: Cell) -> Fallible<()> {
	match **c {
		Value::Pair(_, ref d) => {
			*d.lock() = v;
			Ok(())
		}
		_ => Err(Fault::type_error(format![
			"expected Pair but got {}",
			data_name(c)
		])),
	}
}

/// Build a list from a slice of cells.
pub fn from_vec(items: &[Cell]) -> Cell {
	let mut list = null();
	for item in items.iter().rev() {
		list = cons(item.clone(), list);
	}
	list
}

/// Map a pair chain into a vector, stopping at the first non-pair tail.
pub fn to_vec(c: &Cell) -> Vec<Cell> {
	let mut out = vec![];
	let mut cur = c.clone();
	loop {
		let next = match *cur {
			Value::Pair(ref a, ref d) => {
				out.push(a.lock().clone());
				d.lock().clone()
			}
			_ => break,
		};
		cur = next;
	}
	out
}

pub fn length(c: &Cell) -> i64 {
	let mut n = 0;
	let mut cur = c.clone();
	loop {
		let next = match *cur {
			Value::Pair(_, ref d) => {
				n += 1;
				d.lock().clone()
			}
			_ => break,
		};
		cur = next;
	}
	n
}

pub fn reverse(c: &Cell) -> Cell {
	let mut out = null();
	for item in to_vec(c) {
		out = cons(item, out);
	}
	out
}

// //////////////////////////////////////////////////////////
// Atom views
// //////////////////////////////////////////////////////////

/// The unadorned text of a cell: a string's contents, anything else's
/// written form.
pub fn raw(c: &Cell) -> String {
	if let Value::String(ref t) = **c {
		t.v.clone()
	} else {
		register_tree(c);
		format!["{}", c]
	}
}

pub fn atom_int(c: &Cell) -> Fallible<BigInt> {
	match **c {
		Value::Integer(ref v) => Ok(v.clone()),
		Value::Status(v) => Ok(BigInt::from(v)),
		Value::Boolean(v) => Ok(BigInt::from(v as i64)),
		Value::Float(v) => Ok(BigInt::from(v as i64)),
		Value::Rational(ref v) => Ok(v.to_integer()),
		Value::Symbol(ref s) => parse_int(s),
		Value::String(ref t) => parse_int(&t.v),
		_ => Err(Fault::type_error(format![
			"expected Integer but got {}",
			data_name(c)
		])),
	}
}

fn parse_int(s: &str) -> Fallible<BigInt> {
	BigInt::parse_bytes(s.as_bytes(), 10)
		.ok_or_else(|| Fault::type_error(format!["'{}' is not a number", s]))
}

pub fn atom_float(c: &Cell) -> Fallible<f64> {
	match **c {
		Value::Float(v) => Ok(v),
		Value::Integer(ref v) => Ok(v.to_f64().unwrap_or(f64::NAN)),
		Value::Rational(ref v) => Ok(v.to_f64().unwrap_or(f64::NAN)),
		Value::Status(v) => Ok(v as f64),
		Value::Symbol(ref s) => parse_float(s),
		Value::String(ref t) => parse_float(&t.v),
		_ => Err(Fault::type_error(format![
			"expected Float but got {}",
			data_name(c)
		])),
	}
}

fn parse_float(s: &str) -> Fallible<f64> {
	s.parse::<f64>()
		.map_err(|_| Fault::type_error(format!["'{}' is not a number", s]))
}

pub fn atom_rat(c: &Cell) -> Fallible<BigRational> {
	match **c {
		Value::Rational(ref v) => Ok(v.clone()),
		Value::Integer(ref v) => Ok(BigRational::from_integer(v.clone())),
		Value::Status(v) => Ok(BigRational::from_integer(BigInt::from(v))),
		Value::Symbol(ref s) => parse_rat(s),
		Value::String(ref t) => parse_rat(&t.v),
		_ => Err(Fault::type_error(format![
			"expected Rational but got {}",
			data_name(c)
		])),
	}
}

fn parse_rat(s: &str) -> Fallible<BigRational> {
	if let Some((n, d)) = s.split_once('/') {
		let n = parse_int(n)?;
		let d = parse_int(d)?;
		if d == BigInt::from(0) {
			return Err(Fault::type_error("denominator is zero"));
		}
		return Ok(BigRational::new(n, d));
	}
	Ok(BigRational::from_integer(parse_int(s)?))
}

/// The status view of an atom: non-atoms count as success.
pub fn atom_status(c: &Cell) -> i64 {
	match **c {
		Value::Status(v) => v,
		Value::Integer(ref v) => v.to_i64().unwrap_or(0),
		Value::Boolean(v) => !v as i64,
		_ => 0,
	}
}

// //////////////////////////////////////////////////////////
// Equality
// //////////////////////////////////////////////////////////

/// Strings compare by text against any atom; atoms compare by value;
/// pairs compare recursively; everything else by identity.
pub fn equal(a: &Cell, b: &Cell) -> bool {
	match (&**a, &**b) {
		(Value::Null, Value::Null) => true,
		(Value::Boolean(x), Value::Boolean(y)) => x == y,
		(Value::Integer(x), Value::Integer(y)) => x == y,
		(Value::Rational(x), Value::Rational(y)) => x == y,
		(Value::Float(x), Value::Float(y)) => x == y,
		(Value::Status(x), Value::Status(y)) => x == y,
		(Value::Symbol(x), Value::Symbol(y)) => x == y,
		(Value::String(x), _) if is_atom(b) => x.v == raw(b),
		(_, Value::String(y)) if is_atom(a) => raw(a) == y.v,
		(Value::Pair(..), Value::Pair(..)) => {
			let (xa, xd) = (car(a).unwrap_or_else(|_| null()), cdr(a).unwrap_or_else(|_| null()));
			let (ya, yd) = (car(b).unwrap_or_else(|_| null()), cdr(b).unwrap_or_else(|_| null()));
			equal(&xa, &ya) && equal(&xd, &yd)
		}
		_ => Arc::ptr_eq(a, b),
	}
}

// //////////////////////////////////////////////////////////
// Contexts
// //////////////////////////////////////////////////////////

/// The name associated with a cell's kind.
pub fn data_name(c: &Cell) -> &'static str {
	match **c {
		Value::Marker => "marker",
		Value::Null => "null",
		Value::Boolean(_) => "boolean",
		Value::Integer(_) => "integer",
		Value::Rational(_) => "rational",
		Value::Float(_) => "float",
		Value::Status(_) => "status",
		Value::Symbol(_) => "symbol",
		Value::String(_) => "string",
		Value::Pair(..) => "pair",
		Value::Scope(_) => "scope",
		Value::Object(_) => "object",
		Value::Env(_) => "env",
		Value::Pipe(_) => "pipe",
		Value::Channel(_) => "channel",
		Value::Unbound(_) => "unbound",
		Value::Bound(..) => "bound",
		Value::Continuation(_) => "continuation",
		Value::Task(_) => "task",
	}
}

/// Strip an object down to its underlying scope; other contexts expose
/// themselves.
pub fn expose(c: &Cell) -> Fallible<Cell> {
	match **c {
		Value::Object(ref s) => Ok(Arc::new(Value::Scope(s.clone()))),
		Value::Scope(_)
		| Value::Env(_)
		| Value::String(_)
		| Value::Pipe(_)
		| Value::Channel(_) => Ok(c.clone()),
		_ => Err(Fault::type_error(format![
			"expected a context but got {}",
			data_name(c)
		])),
	}
}

/// The bare scope behind a context, for parenting new scopes.
pub fn scope_of(c: &Cell) -> Option<Arc<Scope>> {
	match **c {
		Value::Scope(ref s) | Value::Object(ref s) => Some(s.clone()),
		Value::String(ref t) => Some(t.scope.clone()),
		Value::Pipe(ref p) => Some(p.scope.clone()),
		Value::Channel(ref ch) => Some(ch.scope.clone()),
		_ => None,
	}
}

/// Identity of the underlying context, independent of the cell wrapper.
pub fn context_id(c: &Cell) -> Option<usize> {
	match **c {
		Value::Env(ref e) => Some(Arc::as_ptr(e) as usize),
		_ => scope_of(c).map(|s| Arc::as_ptr(&s) as usize),
	}
}

pub fn same_context(a: &Cell, b: &Cell) -> bool {
	match (context_id(a), context_id(b)) {
		(Some(x), Some(y)) => x == y,
		_ => Arc::ptr_eq(a, b),
	}
}

/// The binding view of a cell.
pub fn as_binding(c: &Cell) -> Option<(Arc<Closure>, Option<Cell>)> {
	match **c {
		Value::Unbound(ref r) => Some((r.clone(), None)),
		Value::Bound(ref r, ref this) => Some((r.clone(), Some(this.clone()))),
		_ => None,
	}
}

/// Fix a binding's receiver. Unbound bindings adopt the context; bound
/// bindings keep their receiver when it is the same context.
pub fn bind(c: &Cell, ctx: &Cell) -> Cell {
	match **c {
		Value::Unbound(ref r) => bound(r.clone(), ctx.clone()),
		Value::Bound(ref r, ref this) => {
			if same_context(this, ctx) {
				c.clone()
			} else {
				bound(r.clone(), ctx.clone())
			}
		}
		_ => c.clone(),
	}
}

// //////////////////////////////////////////////////////////
// Handles: stable names for first-class values on the wire
// //////////////////////////////////////////////////////////

struct Handles {
	by_ptr: HashMap<usize, u64>,
	by_handle: HashMap<u64, Weak<Value>>,
	next: u64,
}

static HANDLES: LazyLock<Mutex<Handles>> = LazyLock::new(|| {
	Mutex::new(Handles {
		by_ptr: HashMap::new(),
		by_handle: HashMap::new(),
		next: 1,
	})
});

/// The stable handle for a cell, assigned on first use.
pub fn handle_of(c: &Cell) -> u64 {
	let ptr = Arc::as_ptr(c) as usize;
	let mut table = HANDLES.lock();

	if let Some(&h) = table.by_ptr.get(&ptr) {
		if let Some(live) = table.by_handle.get(&h).and_then(Weak::upgrade) {
			if Arc::ptr_eq(&live, c) {
				return h;
			}
		}
	}

	let h = table.next;
	table.next += 1;
	table.by_ptr.insert(ptr, h);
	table.by_handle.insert(h, Arc::downgrade(c));
	h
}

/// Turn a `%kind 0xN%` token back into the cell it names. Unknown
/// kinds, dead handles, and kind mismatches all yield Null.
pub fn deref(name: &str, reference: &str) -> Cell {
	let digits = reference.trim_start_matches("0x");
	let radix = if digits.len() < reference.len() { 16 } else { 10 };
	let handle = match u64::from_str_radix(digits, radix) {
		Ok(h) => h,
		Err(_) => return null(),
	};

	let cell = {
		let table = HANDLES.lock();
		table.by_handle.get(&handle).and_then(Weak::upgrade)
	};

	match cell {
		Some(c) if data_name(&c) == name => c,
		_ => null(),
	}
}

// //////////////////////////////////////////////////////////
// The written form
// //////////////////////////////////////////////////////////

/// All data can be written in a form that reads back as the same data;
/// context-like cells go through the handle table.
impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Value::Marker => write![f, "%marker%"],
			Value::Null => write![f, "()"],
			Value::Boolean(true) => write![f, "true"],
			Value::Boolean(false) => write![f, "false"],
			Value::Integer(ref v) => write![f, "{}", v],
			Value::Rational(ref v) => write![f, "{}", v],
			Value::Float(v) => write![f, "{}", v],
			Value::Status(v) => write![f, "{}", v],
			Value::Symbol(ref s) => write![f, "{}", s],
			Value::String(ref t) => {
				write![f, "\""]?;
				for ch in t.v.chars() {
					match ch {
						'"' => write![f, "\\\""]?,
						'\\' => write![f, "\\\\"]?,
						_ => write![f, "{}", ch]?,
					}
				}
				write![f, "\""]
			}
			Value::Pair(ref a, ref d) => {
				write![f, "("]?;
				write![f, "{}", a.lock().clone()]?;
				let mut tail = d.lock().clone();
				loop {
					let next = match *tail {
						Value::Pair(ref a, ref d) => {
							write![f, " {}", a.lock().clone()]?;
							d.lock().clone()
						}
						Value::Null => break,
						_ => {
							write![f, " . {}", tail]?;
							break;
						}
					};
					tail = next;
				}
				write![f, ")"]
			}
			_ => {
				// Context-like cells must be registered before they
				// reach the written form; see register_tree.
				write![f, "%{} 0x{:x}%", kind_name(self), display_handle(self)]
			}
		}
	}
}

fn kind_name(v: &Value) -> &'static str {
	match *v {
		Value::Scope(_) => "scope",
		Value::Object(_) => "object",
		Value::Env(_) => "env",
		Value::Pipe(_) => "pipe",
		Value::Channel(_) => "channel",
		Value::Unbound(_) => "unbound",
		Value::Bound(..) => "bound",
		Value::Continuation(_) => "continuation",
		Value::Task(_) => "task",
		_ => "cell",
	}
}

fn display_handle(v: &Value) -> u64 {
	let ptr = v as *const Value as usize;
	let table = HANDLES.lock();

	if let Some(&h) = table.by_ptr.get(&ptr) {
		if let Some(live) = table.by_handle.get(&h).and_then(Weak::upgrade) {
			if Arc::as_ptr(&live) as usize == ptr {
				return h;
			}
		}
	}

	// Without the owning Arc there is no way to store a weak reference
	// here, and a handle minted without one could never be
	// dereferenced again.
	panic!["unregistered {} cell in written output", kind_name(v)]
}

/// Register a cell in the handle table eagerly so its printed handle
/// can be dereferenced.
pub fn register_handle(c: &Cell) -> u64 {
	handle_of(c)
}

/// Register a cell and every context reachable through its pairs.
/// Anything that prints cells calls this first; the written form
/// refuses unregistered context cells outright.
pub fn register_tree(c: &Cell) {
	match **c {
		Value::Pair(..) => {
			if let (Ok(a), Ok(d)) = (car(c), cdr(c)) {
				register_tree(&a);
				register_tree(&d);
			}
		}
		Value::Scope(_)
		| Value::Object(_)
		| Value::Env(_)
		| Value::Pipe(_)
		| Value::Channel(_)
		| Value::Unbound(_)
		| Value::Bound(..)
		| Value::Continuation(_)
		| Value::Task(_) => {
			handle_of(c);
		}
		_ => {}
	}
}

// //////////////////////////////////////////////////////////
// Tests
// //////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn symbols_are_interned() {
		assert![Arc::ptr_eq(&sym("hello"), &sym("hello"))];
		assert![!Arc::ptr_eq(&sym("hello"), &sym("world"))];
	}

	#[test]
	fn short_strings_are_interned() {
		let lex = Arc::new(Value::Scope(Scope::new(None)));
		assert![Arc::ptr_eq(&text(&lex, "short"), &text(&lex, "short"))];
		let long = "a string well past eight characters";
		assert![!Arc::ptr_eq(&text(&lex, long), &text(&lex, long))];
	}

	#[test]
	fn pairs_are_mutable() {
		let p = cons(integer(1), integer(2));
		set_car(&p, integer(9)).unwrap();
		assert![equal(&car(&p).unwrap(), &integer(9))];
		assert![equal(&cdr(&p).unwrap(), &integer(2))];
	}

	#[test]
	fn written_form_of_lists() {
		let l = from_vec(&[sym("add"), integer(1), integer(2)]);
		assert_eq![format!["{}", l], "(add 1 2)"];
		let dotted = cons(sym("c"), sym("write"));
		assert_eq![format!["{}", dotted], "(c . write)"];
	}

	#[test]
	fn handles_round_trip() {
		let scope = Arc::new(Value::Scope(Scope::new(None)));
		let h = handle_of(&scope);
		let back = deref("scope", &format!["0x{:x}", h]);
		assert![Arc::ptr_eq(&scope, &back)];
		assert![is_null(&deref("pipe", &format!["0x{:x}", h]))];
		assert![is_null(&deref("scope", "0xdeadbeef"))];
	}

	#[test]
	fn registered_contexts_print_resolvable_handles() {
		let scope = Arc::new(Value::Scope(Scope::new(None)));
		register_tree(&scope);
		let token = format!["{}", scope];
		assert![token.starts_with("%scope 0x")];
	}

	#[test]
	#[should_panic]
	fn unregistered_contexts_refuse_to_print() {
		let scope = Arc::new(Value::Scope(Scope::new(None)));
		let _ = format!["{}", scope];
	}

	#[test]
	fn status_truthiness() {
		assert![truthy(&status(0))];
		assert![!truthy(&status(1))];
		assert![!truthy(&boolean(false))];
		assert![!truthy(&null())];
	}
}
