//! Lexical scopes, dynamic environments, and name resolution.
//!
//! A scope is two name maps (public, private) plus a parent context and
//! an optional native method table; conduits and strings are scopes
//! whose tables expose their methods. An environment is a flat chained
//! map used for dynamic bindings and the OS environment mirror.
//! Resolution searches the dynamic chain first, then walks the lexical
//! chain outward. A context reached through its public face (an
//! object) shows only public members.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cell::{self, Cell, Closure, ClosureKind, MethodTable, Native, Value};
use crate::error::{Fallible, Fault};

/// A mutable holder for one cell.
#[derive(Clone)]
pub struct Slot(Arc<Mutex<Cell>>);

impl Slot {
	pub fn new(v: Cell) -> Slot {
		Slot(Arc::new(Mutex::new(v)))
	}

	pub fn get(&self) -> Cell {
		self.0.lock().clone()
	}

	pub fn set(&self, v: Cell) {
		*self.0.lock() = v;
	}
}

/// What resolution hands back: a settable slot, or a read-only method
/// table entry.
pub enum Reference {
	Slot(Slot),
	Table(Native),
}

impl Reference {
	pub fn get(&self) -> Cell {
		match *self {
			Reference::Slot(ref s) => s.get(),
			Reference::Table(f) => cell::unbound(Arc::new(Closure {
				kind: ClosureKind::Method,
				applier: f,
				body: cell::null(),
				label: cell::null(),
				params: cell::null(),
				scope: cell::null(),
			})),
		}
	}

	pub fn set(&self, v: Cell) -> Fallible<()> {
		match *self {
			Reference::Slot(ref s) => {
				s.set(v);
				Ok(())
			}
			Reference::Table(_) => Err(Fault::type_error("cannot assign to a method")),
		}
	}
}

// //////////////////////////////////////////////////////////
// Dynamic environments
// //////////////////////////////////////////////////////////

/// A flat chained mapping from symbol to cell.
pub struct Env {
	map: RwLock<HashMap<String, Slot>>,
	prev: Option<Arc<Env>>,
}

impl Env {
	pub fn new(prev: Option<Arc<Env>>) -> Arc<Env> {
		Arc::new(Env {
			map: RwLock::new(HashMap::new()),
			prev,
		})
	}

	/// Prepend a binding; it shadows any outer binding of the name.
	pub fn add(&self, name: &str, v: Cell) {
		self.map.write().insert(name.to_string(), Slot::new(v));
	}

	pub fn lookup(&self, name: &str) -> Option<Slot> {
		if let Some(slot) = self.map.read().get(name) {
			return Some(slot.clone());
		}
		self.prev.as_ref().and_then(|p| p.lookup(name))
	}

	/// Names in the chain beginning with the prefix.
	pub fn complete(&self, prefix: &str) -> Vec<String> {
		let mut out = vec![];
		self.complete_into(prefix, &mut out);
		out
	}

	fn complete_into(&self, prefix: &str, out: &mut Vec<String>) {
		for key in self.map.read().keys() {
			if key.starts_with(prefix) {
				out.push(key.clone());
			}
		}
		if let Some(ref p) = self.prev {
			p.complete_into(prefix, out);
		}
	}
}

// //////////////////////////////////////////////////////////
// Lexical scopes
// //////////////////////////////////////////////////////////

pub struct Scope {
	public: RwLock<HashMap<String, Slot>>,
	private: RwLock<HashMap<String, Slot>>,
	parent: Option<Cell>,
	table: Option<&'static MethodTable>,
}

impl Scope {
	pub fn new(parent: Option<Cell>) -> Arc<Scope> {
		Arc::new(Scope {
			public: RwLock::new(HashMap::new()),
			private: RwLock::new(HashMap::new()),
			parent,
			table: None,
		})
	}

	pub fn with_table(parent: Option<Cell>, table: &'static MethodTable) -> Arc<Scope> {
		Arc::new(Scope {
			public: RwLock::new(HashMap::new()),
			private: RwLock::new(HashMap::new()),
			parent,
			table: Some(table),
		})
	}

	pub fn parent(&self) -> Option<Cell> {
		self.parent.clone()
	}

	/// Add a private member.
	pub fn define(&self, name: &str, v: Cell) {
		self.private.write().insert(name.to_string(), Slot::new(v));
	}

	/// Add a public member.
	pub fn public(&self, name: &str, v: Cell) {
		self.public.write().insert(name.to_string(), Slot::new(v));
	}

	/// Remove a member of either visibility; true if one existed.
	pub fn remove(&self, name: &str) -> bool {
		let public = self.public.write().remove(name).is_some();
		let private = self.private.write().remove(name).is_some();
		public || private
	}

	/// Look a name up at this level only.
	pub fn lookup(&self, name: &str, public_only: bool) -> Option<Reference> {
		if !public_only {
			if let Some(slot) = self.private.read().get(name) {
				return Some(Reference::Slot(slot.clone()));
			}
		}
		if let Some(slot) = self.public.read().get(name) {
			return Some(Reference::Slot(slot.clone()));
		}
		if let Some(table) = self.table {
			if let Some(f) = table.find(name) {
				return Some(Reference::Table(f));
			}
		}
		None
	}

	/// A scope with copies of this scope's members, the same parent,
	/// and the same table.
	pub fn copy(&self) -> Arc<Scope> {
		let fresh = Scope {
			public: RwLock::new(HashMap::new()),
			private: RwLock::new(HashMap::new()),
			parent: self.parent.clone(),
			table: self.table,
		};
		for (k, v) in self.public.read().iter() {
			fresh.public.write().insert(k.clone(), Slot::new(v.get()));
		}
		for (k, v) in self.private.read().iter() {
			fresh.private.write().insert(k.clone(), Slot::new(v.get()));
		}
		Arc::new(fresh)
	}

	fn complete_into(&self, prefix: &str, out: &mut Vec<String>) {
		for key in self.public.read().keys() {
			if key.starts_with(prefix) {
				out.push(key.clone());
			}
		}
		for key in self.private.read().keys() {
			if key.starts_with(prefix) {
				out.push(key.clone());
			}
		}
	}
}

/// Names reachable from a lexical context beginning with the prefix.
pub fn complete(lexical: &Cell, prefix: &str) -> Vec<String> {
	let mut out = vec![];
	let mut cur = Some(lexical.clone());
	while let Some(c) = cur {
		let scope = match cell::scope_of(&c) {
			Some(s) => s,
			None => break,
		};
		scope.complete_into(prefix, &mut out);
		cur = scope.parent();
	}
	out
}

// //////////////////////////////////////////////////////////
// Resolution
// //////////////////////////////////////////////////////////

/// Find a name: the dynamic chain wins over the lexical chain; objects
/// show only their public face for the whole walk.
pub fn resolve(lexical: &Cell, dynamic: Option<&Arc<Env>>, name: &str) -> Option<Reference> {
	if let Some(env) = dynamic {
		if let Some(slot) = env.lookup(name) {
			return Some(Reference::Slot(slot));
		}
	}

	let public_only = matches![**lexical, Value::Object(_)];
	let mut cur = Some(lexical.clone());
	while let Some(c) = cur {
		let scope = cell::scope_of(&c)?;
		if let Some(r) = scope.lookup(name, public_only) {
			return Some(r);
		}
		cur = scope.parent();
	}

	None
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cell::{integer, sym};

	fn scope_cell(parent: Option<Cell>) -> Cell {
		Arc::new(Value::Scope(Scope::new(parent)))
	}

	#[test]
	fn dynamic_wins_over_lexical() {
		let lex = scope_cell(None);
		if let Value::Scope(ref s) = *lex {
			s.define("x", integer(1));
		}
		let env = Env::new(None);
		env.add("x", integer(2));
		let r = resolve(&lex, Some(&env), "x").unwrap();
		assert![cell::equal(&r.get(), &integer(2))];
	}

	#[test]
	fn lexical_walks_outward() {
		let outer = scope_cell(None);
		if let Value::Scope(ref s) = *outer {
			s.public("y", integer(7));
		}
		let inner = scope_cell(Some(outer));
		let r = resolve(&inner, None, "y").unwrap();
		assert![cell::equal(&r.get(), &integer(7))];
		assert![resolve(&inner, None, "z").is_none()];
	}

	#[test]
	fn objects_hide_private_members() {
		let scope = Scope::new(None);
		scope.define("secret", integer(1));
		scope.public("shown", integer(2));
		let object: Cell = Arc::new(Value::Object(scope));
		assert![resolve(&object, None, "secret").is_none()];
		assert![resolve(&object, None, "shown").is_some()];
	}

	#[test]
	fn remove_reports_presence() {
		let scope = Scope::new(None);
		scope.define("gone", sym("v"));
		assert![scope.remove("gone")];
		assert![!scope.remove("gone")];
	}
}
