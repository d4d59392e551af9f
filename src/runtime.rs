//! Process-wide shell state, concentrated in one value threaded
//! through every task: the root scope and environment, the external
//! command thunk, the job table, the foreground task, and the child
//! reaper.

use std::collections::BTreeMap;
use std::fs::File;
use std::os::fd::FromRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::boot;
use crate::builtins;
use crate::cell::{self, Cell, Reader, Value};
use crate::conduit;
use crate::error::Fallible;
use crate::parse;
use crate::scope::{Env, Scope};
use crate::task::{Task, TaskShared};
use crate::unix::{self, Reaper};

/// A suspended job awaiting `fg`.
pub struct JobEntry {
	pub task: Arc<TaskShared>,
	pub group: i32,
	pub command: String,
}

pub struct Runtime {
	pub scope0: Cell,
	pub env0: Arc<Env>,
	pub external: Cell,
	pub reader: Reader,
	pub reaper: &'static Reaper,
	pub pgid: i32,
	pub pid: i32,
	pub interactive: AtomicBool,
	pub jobs: Mutex<BTreeMap<i64, JobEntry>>,
	pub foreground: Mutex<Option<Arc<TaskShared>>>,
}

impl Runtime {
	/// Assemble the root scope and environment, start the reaper, and
	/// import the OS environment.
	pub fn new(reader: Reader) -> Fallible<Arc<Runtime>> {
		let scope0: Cell = Arc::new(Value::Scope(Scope::new(None)));
		let env0 = Env::new(None);

		let runtime = Arc::new(Runtime {
			scope0: scope0.clone(),
			env0: env0.clone(),
			external: builtins::external_thunk(),
			reader,
			reaper: unix::reaper(),
			pgid: unix::process_group(),
			pid: unix::pid(),
			interactive: AtomicBool::new(false),
			jobs: Mutex::new(BTreeMap::new()),
			foreground: Mutex::new(None),
		});

		builtins::bind_root(&scope0)?;

		env0.add("false", cell::boolean(false));
		env0.add("true", cell::boolean(true));

		env0.add("$$", cell::integer(runtime.pid as i64));
		env0.add("$platform", cell::sym(std::env::consts::OS));
		env0.add("$stdin", conduit::new_pipe(&scope0, Some(dup_fd(0)?), None)?);
		env0.add("$stdout", conduit::new_pipe(&scope0, None, Some(dup_fd(1)?))?);
		env0.add("$stderr", conduit::new_pipe(&scope0, None, Some(dup_fd(2)?))?);

		for (k, v) in std::env::vars() {
			env0.add(&format!["${}", k], cell::sym(&v));
		}

		Ok(runtime)
	}

	pub fn job_control_enabled(&self) -> bool {
		self.interactive.load(Ordering::SeqCst) && unix::job_control_supported()
	}

	/// Evaluate the built-in boot script against the root scope.
	pub fn boot(self: &Arc<Runtime>) -> Fallible<()> {
		self.run_program(boot::SCRIPT, "boot")?;
		Ok(())
	}

	/// Parse and run a whole program on a fresh task, returning the
	/// final result cell.
	pub fn run_program(self: &Arc<Runtime>, source: &str, origin: &str) -> Fallible<Cell> {
		let commands = parse::parse_string(source, origin)?;
		let code = cell::from_vec(&commands);
		let mut task = Task::new(self.clone(), code, None, None, None);
		task.try_run(None)?;
		cell::car(&task.regs.scratch)
	}

	/// Bind `$0`, positional arguments, `$args`, `$cwd`, and `$origin`
	/// from the command line. `$origin` stays unset when the working
	/// directory is unavailable.
	pub fn import_cli(&self, args: &[String]) {
		let mut origin = String::new();

		if args.len() > 1 {
			origin = std::path::Path::new(&args[1])
				.parent()
				.map(|p| p.to_string_lossy().to_string())
				.unwrap_or_default();
			self.env0.add("$0", cell::sym(&args[1]));

			for (i, v) in args[2..].iter().enumerate() {
				self.env0.add(&format!["${}", i + 1], cell::sym(v));
			}
		} else if let Some(first) = args.first() {
			self.env0.add("$0", cell::sym(first));
		}

		let mut rest = cell::null();
		for v in args.iter().skip(2).rev() {
			rest = cell::cons(cell::sym(v), rest);
		}
		self.env0.add("$args", rest);

		if let Ok(wd) = std::env::current_dir() {
			let wd = wd.to_string_lossy().to_string();
			self.env0.add("$cwd", cell::sym(&wd));

			let origin = if origin.is_empty() {
				wd
			} else if std::path::Path::new(&origin).is_absolute() {
				origin
			} else {
				format!["{}/{}", wd, origin]
			};
			self.env0.add("$origin", cell::sym(&origin));
		}
	}

	/// Start a listener task and make it the foreground.
	pub fn launch_foreground_task(self: &Arc<Runtime>) -> Arc<TaskShared> {
		let code = cell::cons(cell::marker(), cell::null());
		let mut task = Task::new(self.clone(), code, None, None, None);
		let shared = task.shared.clone();

		*self.foreground.lock() = Some(shared.clone());
		std::thread::spawn(move || task.listen());

		debug!["foreground task launched"];
		shared
	}

	/// The synchronous eval rendezvous: hand a command to the
	/// foreground task and await its done signal.
	pub fn evaluate(self: &Arc<Runtime>, c: Cell) {
		loop {
			let existing = { self.foreground.lock().clone() };
			let fg = match existing {
				Some(f) => f,
				None => self.launch_foreground_task(),
			};

			if fg.done.is_closed() || !fg.eval_send(c.clone()) {
				self.launch_foreground_task();
				continue;
			}

			fg.done.recv();
			return;
		}
	}

	/// Move a suspended job to the foreground: restore its terminal
	/// group, stop the task that ran `fg`, and continue the job.
	pub fn set_foreground_task(self: &Arc<Runtime>, entry: JobEntry) {
		if entry.group != 0 {
			unix::set_foreground_group(entry.group);
		}

		let old = self.foreground.lock().replace(entry.task.clone());
		if let Some(old) = old {
			old.stop();
		}

		entry.task.resume();
	}

	/// A foreground child stopped: reclaim the terminal, remember the
	/// job, and gate the task that owns it.
	pub fn child_stopped(self: &Arc<Runtime>, shared: &Arc<TaskShared>) {
		if !self.job_control_enabled() {
			return;
		}

		unix::set_foreground_group(self.pgid);

		let mut jobs = self.jobs.lock();
		let index = jobs.keys().next_back().copied().unwrap_or(0) + 1;
		jobs.insert(
			index,
			JobEntry {
				task: shared.clone(),
				group: shared.job.group(),
				command: shared.job.command(),
			},
		);
		drop(jobs);

		shared.suspend();
		shared.done.send();
	}
}

fn dup_fd(fd: i32) -> Fallible<File> {
	let duped = unsafe { libc::dup(fd) };
	if duped < 0 {
		return Err(std::io::Error::last_os_error().into());
	}
	Ok(unsafe { File::from_raw_fd(duped) })
}
