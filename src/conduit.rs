//! Conduits: polymorphic read/write endpoints.
//!
//! A pipe wraps OS handles and carries parsed cells; a channel carries
//! cells through a bounded in-process queue. Both are contexts whose
//! method tables expose close/read/readline/write and forbid child,
//! clone, and define. The string method table lives here too: strings
//! are contexts with a small, conduit-flavored table of their own.

use std::fs::File;
use std::io::{BufReader, Read};
use std::io::Write as IoWrite;
use std::os::fd::OwnedFd;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cell::{self, Cell, MethodTable, Reader, Value};
use crate::error::{Fallible, Fault};
use crate::scope::Scope;
use crate::task::Task;

// //////////////////////////////////////////////////////////
// Pipes
// //////////////////////////////////////////////////////////

struct Feed {
	values: Receiver<Cell>,
	ack: SyncSender<bool>,
}

/// An OS pipe (or open file) whose read side is parsed into cells.
pub struct Pipe {
	pub scope: Arc<Scope>,
	r: Mutex<Option<File>>,
	w: Mutex<Option<File>>,
	feed: Mutex<Option<Feed>>,
}

/// Create a pipe cell. With neither handle supplied, an OS pipe is
/// acquired.
pub fn new_pipe(lexical: &Cell, r: Option<File>, w: Option<File>) -> Fallible<Cell> {
	let (r, w) = if r.is_none() && w.is_none() {
		let (pr, pw) = std::io::pipe()?;
		(
			Some(File::from(OwnedFd::from(pr))),
			Some(File::from(OwnedFd::from(pw))),
		)
	} else {
		(r, w)
	};

	let scope = Scope::with_table(Some(cell::expose(lexical)?), &CONDUIT_METHODS);

	Ok(Arc::new(Value::Pipe(Pipe {
		scope,
		r: Mutex::new(r),
		w: Mutex::new(w),
		feed: Mutex::new(None),
	})))
}

impl Pipe {
	/// One parsed value per call. A dedicated thread runs the injected
	/// reader over the read side and rendezvouses here so the parser
	/// never overruns the consumer.
	pub fn read(&self, reader: Reader) -> Fallible<Cell> {
		let mut feed = self.feed.lock();

		if feed.is_none() {
			let file = match *self.r.lock() {
				Some(ref f) => f.try_clone()?,
				None => return Ok(cell::null()),
			};

			let (vtx, vrx) = sync_channel::<Cell>(0);
			let (atx, arx) = sync_channel::<bool>(0);

			std::thread::spawn(move || {
				let mut input = BufReader::new(file);
				reader(&mut input, "pipe", &mut |c: Cell| {
					if vtx.send(c).is_err() {
						return false;
					}
					arx.recv().is_ok()
				});
				let _ = vtx.send(cell::null());
			});

			*feed = Some(Feed { values: vrx, ack: atx });
		} else if let Some(ref f) = *feed {
			let _ = f.ack.send(true);
		}

		match *feed {
			Some(ref f) => Ok(f.values.recv().unwrap_or_else(|_| cell::null())),
			None => Ok(cell::null()),
		}
	}

	/// Read up to a newline; Null at end of input.
	pub fn read_line(&self, lexical: &Cell) -> Fallible<Cell> {
		let guard = self.r.lock();
		let file = match *guard {
			Some(ref f) => f,
			None => return Ok(cell::null()),
		};

		let mut line = Vec::new();
		let mut byte = [0u8; 1];
		loop {
			match (&*file).read(&mut byte) {
				Ok(0) => {
					if line.is_empty() {
						return Ok(cell::null());
					}
					break;
				}
				Ok(_) => {
					if byte[0] == b'\n' {
						break;
					}
					line.push(byte[0]);
				}
				Err(e) => return Err(e.into()),
			}
		}

		Ok(cell::text(lexical, &String::from_utf8_lossy(&line)))
	}

	/// Write the external representation of a cell, newline-terminated.
	pub fn write(&self, c: &Cell) -> Fallible<()> {
		cell::register_tree(c);
		let guard = self.w.lock();
		match *guard {
			Some(ref f) => {
				let mut w = f;
				writeln![w, "{}", c]?;
				Ok(())
			}
			None => Err(Fault::type_error("write to closed pipe")),
		}
	}

	pub fn reader_close(&self) {
		self.r.lock().take();
	}

	pub fn writer_close(&self) {
		self.w.lock().take();
	}

	pub fn close(&self) {
		self.reader_close();
		self.writer_close();
	}

	/// A duplicate of the read handle, for handing to a child process.
	pub fn read_fd(&self) -> Fallible<File> {
		match *self.r.lock() {
			Some(ref f) => Ok(f.try_clone()?),
			None => Err(Fault::type_error("pipe has no read side")),
		}
	}

	/// A duplicate of the write handle, for handing to a child process.
	pub fn write_fd(&self) -> Fallible<File> {
		match *self.w.lock() {
			Some(ref f) => Ok(f.try_clone()?),
			None => Err(Fault::type_error("pipe has no write side")),
		}
	}
}

// //////////////////////////////////////////////////////////
// Channels
// //////////////////////////////////////////////////////////

/// A bounded in-process queue of cells.
pub struct Channel {
	pub scope: Arc<Scope>,
	tx: Mutex<Option<SyncSender<Cell>>>,
	rx: Mutex<Receiver<Cell>>,
}

pub fn new_channel(lexical: &Cell, capacity: usize) -> Fallible<Cell> {
	let (tx, rx) = sync_channel(capacity);
	let scope = Scope::with_table(Some(cell::expose(lexical)?), &CONDUIT_METHODS);

	Ok(Arc::new(Value::Channel(Channel {
		scope,
		tx: Mutex::new(Some(tx)),
		rx: Mutex::new(rx),
	})))
}

impl Channel {
	/// Null once the channel is writer-closed and drained.
	pub fn read(&self) -> Cell {
		match self.rx.lock().recv() {
			Ok(c) => c,
			Err(_) => cell::null(),
		}
	}

	/// Like read, but the value arrives as a string; False when closed.
	pub fn read_line(&self, lexical: &Cell) -> Cell {
		match self.rx.lock().recv() {
			Ok(c) => {
				cell::register_tree(&c);
				cell::text(lexical, &format!["{}", c])
			}
			Err(_) => cell::boolean(false),
		}
	}

	pub fn write(&self, c: Cell) -> Fallible<()> {
		let sender = self.tx.lock().clone();
		match sender {
			Some(s) => s
				.send(c)
				.map_err(|_| Fault::type_error("write to closed channel")),
			None => Err(Fault::type_error("write to closed channel")),
		}
	}

	pub fn writer_close(&self) {
		self.tx.lock().take();
	}
}

// //////////////////////////////////////////////////////////
// Method tables
// //////////////////////////////////////////////////////////

fn this_conduit(t: &mut Task) -> Fallible<Cell> {
	let this = t.self_context()?;
	match *this {
		Value::Pipe(_) | Value::Channel(_) => Ok(this.clone()),
		_ => Err(Fault::type_error("not a conduit")),
	}
}

fn c_child(_: &mut Task, _: Cell) -> Fallible<bool> {
	Err(Fault::type_error("conduits cannot be parents"))
}

fn c_clone(_: &mut Task, _: Cell) -> Fallible<bool> {
	Err(Fault::type_error("conduits cannot be cloned"))
}

fn c_define(_: &mut Task, _: Cell) -> Fallible<bool> {
	Err(Fault::type_error("private members cannot be added to a conduit"))
}

fn c_close(t: &mut Task, _: Cell) -> Fallible<bool> {
	let this = this_conduit(t)?;
	match *this {
		Value::Pipe(ref p) => p.close(),
		Value::Channel(ref ch) => ch.writer_close(),
		_ => unreachable![],
	}
	t.regs.return_result(cell::boolean(true))
}

fn c_reader_close(t: &mut Task, _: Cell) -> Fallible<bool> {
	let this = this_conduit(t)?;
	if let Value::Pipe(ref p) = *this {
		p.reader_close();
	}
	t.regs.return_result(cell::boolean(true))
}

fn c_writer_close(t: &mut Task, _: Cell) -> Fallible<bool> {
	let this = this_conduit(t)?;
	match *this {
		Value::Pipe(ref p) => p.writer_close(),
		Value::Channel(ref ch) => ch.writer_close(),
		_ => unreachable![],
	}
	t.regs.return_result(cell::boolean(true))
}

fn c_read(t: &mut Task, _: Cell) -> Fallible<bool> {
	let this = this_conduit(t)?;
	let v = match *this {
		Value::Pipe(ref p) => p.read(t.runtime.reader)?,
		Value::Channel(ref ch) => ch.read(),
		_ => unreachable![],
	};
	t.regs.return_result(v)
}

fn c_read_line(t: &mut Task, _: Cell) -> Fallible<bool> {
	let this = this_conduit(t)?;
	let lexical = t.regs.lexical.clone();
	let v = match *this {
		Value::Pipe(ref p) => p.read_line(&lexical)?,
		Value::Channel(ref ch) => ch.read_line(&lexical),
		_ => unreachable![],
	};
	t.regs.return_result(v)
}

fn c_write(t: &mut Task, args: Cell) -> Fallible<bool> {
	let this = this_conduit(t)?;

	// A single argument travels bare so values round-trip one-to-one.
	let payload = if cell::length(&args) == 1 {
		cell::car(&args)?
	} else {
		args
	};

	match *this {
		Value::Pipe(ref p) => p.write(&payload)?,
		Value::Channel(ref ch) => ch.write(payload)?,
		_ => unreachable![],
	}
	t.regs.return_result(cell::boolean(true))
}

pub static CONDUIT_METHODS: MethodTable = MethodTable {
	entries: &[
		("child", c_child),
		("clone", c_clone),
		("define", c_define),
		("close", c_close),
		("reader-close", c_reader_close),
		("writer-close", c_writer_close),
		("read", c_read),
		("readline", c_read_line),
		("write", c_write),
	],
};

// //////////////////////////////////////////////////////////
// String methods
// //////////////////////////////////////////////////////////

fn this_string(t: &mut Task) -> Fallible<String> {
	let this = t.self_context()?;
	match *this {
		Value::String(ref s) => Ok(s.v.clone()),
		_ => Err(Fault::type_error("not a string")),
	}
}

fn s_child(_: &mut Task, _: Cell) -> Fallible<bool> {
	Err(Fault::type_error("strings cannot be parents"))
}

fn s_clone(_: &mut Task, _: Cell) -> Fallible<bool> {
	Err(Fault::type_error("strings cannot be cloned"))
}

fn s_define(_: &mut Task, _: Cell) -> Fallible<bool> {
	Err(Fault::type_error("private members cannot be added to a string"))
}

fn s_join(t: &mut Task, args: Cell) -> Fallible<bool> {
	let sep = this_string(t)?;
	let parts: Vec<String> = cell::to_vec(&args).iter().map(cell::raw).collect();
	let lexical = t.regs.lexical.clone();
	t.regs.return_result(cell::text(&lexical, &parts.join(&sep)))
}

fn s_split(t: &mut Task, args: Cell) -> Fallible<bool> {
	let s = this_string(t)?;
	let sep = cell::raw(&cell::car(&args)?);
	let lexical = t.regs.lexical.clone();

	// An empty separator means one piece per character, with no empty
	// leading or trailing pieces.
	let pieces: Vec<String> = if sep.is_empty() {
		s.chars().map(|c| c.to_string()).collect()
	} else {
		s.split(&sep).map(|p| p.to_string()).collect()
	};

	let mut list = cell::null();
	for piece in pieces.iter().rev() {
		list = cell::cons(cell::text(&lexical, piece), list);
	}

	t.regs.return_result(list)
}

fn s_sprintf(t: &mut Task, args: Cell) -> Fallible<bool> {
	let f = this_string(t)?;
	let argv = cell::to_vec(&args);
	let lexical = t.regs.lexical.clone();

	let mut out = String::new();
	let mut next = argv.into_iter();
	let mut chars = f.chars();
	while let Some(ch) = chars.next() {
		if ch != '%' {
			out.push(ch);
			continue;
		}
		let verb = chars
			.next()
			.ok_or_else(|| Fault::type_error("sprintf: trailing '%'"))?;
		if verb == '%' {
			out.push('%');
			continue;
		}
		let arg = next
			.next()
			.ok_or_else(|| Fault::type_error("sprintf: not enough arguments"))?;
		match verb {
			's' => out.push_str(&cell::raw(&arg)),
			'd' => out.push_str(&cell::atom_int(&arg)?.to_string()),
			'f' => out.push_str(&format!["{}", cell::atom_float(&arg)?]),
			'c' => {
				use num::ToPrimitive;
				let code = cell::atom_int(&arg)?.to_u32().unwrap_or(0);
				out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
			}
			_ => {
				return Err(Fault::type_error(format![
					"sprintf: unknown verb '%{}'",
					verb
				]))
			}
		}
	}

	t.regs.return_result(cell::text(&lexical, &out))
}

fn s_substring(t: &mut Task, args: Cell) -> Fallible<bool> {
	use num::ToPrimitive;

	let s: Vec<char> = this_string(t)?.chars().collect();
	let start = cell::atom_int(&cell::car(&args)?)?.to_usize().unwrap_or(0);
	let rest = cell::cdr(&args)?;
	let end = if cell::is_null(&rest) {
		s.len()
	} else {
		cell::atom_int(&cell::car(&rest)?)?.to_usize().unwrap_or(s.len())
	};

	if start > end || end > s.len() {
		return Err(Fault::type_error("substring out of range"));
	}

	let lexical = t.regs.lexical.clone();
	let piece: String = s[start..end].iter().collect();
	t.regs.return_result(cell::text(&lexical, &piece))
}

fn s_to_list(t: &mut Task, _: Cell) -> Fallible<bool> {
	let s = this_string(t)?;
	let mut list = cell::null();
	for ch in s.chars().rev() {
		list = cell::cons(cell::integer(ch as i64), list);
	}
	t.regs.return_result(list)
}

fn string_predicate(t: &mut Task, pred: fn(char) -> bool) -> Fallible<bool> {
	let s = this_string(t)?;
	let v = !s.is_empty() && s.chars().all(pred);
	t.regs.return_result(cell::boolean(v))
}

fn s_is_alpha(t: &mut Task, _: Cell) -> Fallible<bool> {
	string_predicate(t, |c| c.is_alphabetic())
}

fn s_is_digit(t: &mut Task, _: Cell) -> Fallible<bool> {
	string_predicate(t, |c| c.is_ascii_digit())
}

fn s_is_lower(t: &mut Task, _: Cell) -> Fallible<bool> {
	string_predicate(t, |c| c.is_lowercase())
}

fn s_is_upper(t: &mut Task, _: Cell) -> Fallible<bool> {
	string_predicate(t, |c| c.is_uppercase())
}

fn s_is_space(t: &mut Task, _: Cell) -> Fallible<bool> {
	string_predicate(t, |c| c.is_whitespace())
}

pub static STRING_METHODS: MethodTable = MethodTable {
	entries: &[
		("child", s_child),
		("clone", s_clone),
		("define", s_define),
		("join", s_join),
		("split", s_split),
		("sprintf", s_sprintf),
		("substring", s_substring),
		("to-list", s_to_list),
		("is-alpha", s_is_alpha),
		("is-digit", s_is_digit),
		("is-lower", s_is_lower),
		("is-upper", s_is_upper),
		("is-space", s_is_space),
	],
};
