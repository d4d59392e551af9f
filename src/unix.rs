//! OS-facing glue: process groups, signals, and child reaping.
//!
//! One monitor thread owns the blocking wait loop; a registrar thread
//! multiplexes its notifications out to whichever task is awaiting a
//! given pid. Registration and reaping can happen in either order.

use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::LazyLock;
use std::thread;

use tracing::debug;

/// What became of a child process.
#[derive(Clone, Copy, Debug)]
pub enum ChildEvent {
	Exited(i32),
	Signaled(i32),
	Stopped(i32),
}

impl ChildEvent {
	pub fn is_final(&self) -> bool {
		!matches![*self, ChildEvent::Stopped(_)]
	}

	/// The shell status for the event: exit code, or 128 + signal.
	pub fn status(&self) -> i64 {
		match *self {
			ChildEvent::Exited(code) => code as i64,
			ChildEvent::Signaled(sig) | ChildEvent::Stopped(sig) => 128 + sig as i64,
		}
	}
}

struct Notification {
	pid: i32,
	event: ChildEvent,
}

struct Registration {
	pid: i32,
	reply: Sender<ChildEvent>,
}

enum Message {
	Note(Notification),
	Register(Registration),
}

/// Handle for registering interest in a child pid.
pub struct Reaper {
	tx: Sender<Message>,
}

impl Reaper {
	/// Ask to be told what happens to pid. Stop events are delivered
	/// without ending the registration; exit ends it.
	pub fn register(&self, pid: i32) -> Receiver<ChildEvent> {
		let (reply, events) = channel();
		let _ = self.tx.send(Message::Register(Registration { pid, reply }));
		events
	}
}

static REAPER: LazyLock<Reaper> = LazyLock::new(|| {
	let (msg_tx, msg_rx) = channel::<Message>();
	let (active_tx, active_rx) = channel::<()>();

	let note_tx = msg_tx.clone();
	thread::spawn(move || monitor(active_rx, note_tx));
	thread::spawn(move || registrar(msg_rx, active_tx));

	Reaper { tx: msg_tx }
});

/// The process-wide monitor/registrar pair. Exactly one wait loop may
/// exist per process.
pub fn reaper() -> &'static Reaper {
	&REAPER
}

fn decode(status: libc::c_int) -> ChildEvent {
	if libc::WIFEXITED(status) {
		ChildEvent::Exited(libc::WEXITSTATUS(status))
	} else if libc::WIFSIGNALED(status) {
		ChildEvent::Signaled(libc::WTERMSIG(status))
	} else if libc::WIFSTOPPED(status) {
		ChildEvent::Stopped(libc::WSTOPSIG(status))
	} else {
		ChildEvent::Exited(0)
	}
}

/// The blocking wait loop. With no children to wait for, parks until
/// the registrar reports new interest.
fn monitor(active: Receiver<()>, notify: Sender<Message>) {
	loop {
		let mut status: libc::c_int = 0;
		let pid = unsafe { libc::waitpid(-1, &mut status, libc::WUNTRACED) };

		if pid > 0 {
			let event = decode(status);
			debug!["child {} reported {:?}", pid, event];
			if notify.send(Message::Note(Notification { pid, event })).is_err() {
				return;
			}
			continue;
		}

		let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
		if errno == libc::EINTR {
			continue;
		}

		if active.recv().is_err() {
			return;
		}
	}
}

/// pid -> waiter multiplexing, tolerant of both arrival orders.
fn registrar(messages: Receiver<Message>, active: Sender<()>) {
	let mut waiting: HashMap<i32, Sender<ChildEvent>> = HashMap::new();
	let mut early: HashMap<i32, Vec<ChildEvent>> = HashMap::new();

	for m in messages {
		match m {
			Message::Register(r) => {
				let mut done = false;
				for event in early.remove(&r.pid).unwrap_or_default() {
					done = event.is_final();
					let _ = r.reply.send(event);
				}
				if !done {
					waiting.insert(r.pid, r.reply);
					let _ = active.send(());
				}
			}
			Message::Note(n) => match waiting.get(&n.pid) {
				Some(reply) => {
					let _ = reply.send(n.event);
					if n.event.is_final() {
						waiting.remove(&n.pid);
					}
				}
				None => {
					early.entry(n.pid).or_default().push(n.event);
				}
			},
		}
	}
}

// //////////////////////////////////////////////////////////
// Process-group and signal primitives
// //////////////////////////////////////////////////////////

pub fn pid() -> i32 {
	unsafe { libc::getpid() }
}

pub fn process_group() -> i32 {
	unsafe { libc::getpgrp() }
}

pub fn job_control_supported() -> bool {
	cfg!(unix)
}

/// Put this process in its own group and report the group id.
pub fn become_process_group_leader() -> i32 {
	unsafe {
		libc::setpgid(0, 0);
		libc::getpgrp()
	}
}

pub fn set_foreground_group(group: i32) {
	unsafe {
		libc::tcsetpgrp(0, group);
	}
}

pub fn continue_process(pid: i32) {
	unsafe {
		libc::kill(pid, libc::SIGCONT);
	}
}

/// Stop the child's whole process group.
pub fn stop_process_group(group: i32) {
	unsafe {
		libc::killpg(group, libc::SIGSTOP);
	}
}

pub fn stop_process(pid: i32) {
	unsafe {
		libc::kill(pid, libc::SIGSTOP);
	}
}

pub fn terminate_process(pid: i32) {
	unsafe {
		libc::kill(pid, libc::SIGTERM);
	}
}

/// The shell itself shrugs off the terminal signals its children must
/// still receive.
pub fn init_signal_handling() {
	unsafe {
		libc::signal(libc::SIGTTOU, libc::SIG_IGN);
		libc::signal(libc::SIGTTIN, libc::SIG_IGN);
		libc::signal(libc::SIGQUIT, libc::SIG_IGN);
		libc::signal(libc::SIGINT, libc::SIG_IGN);
	}
}
