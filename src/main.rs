//! The shell binary: script mode, stdin mode, or an interactive
//! line-edited session.

use std::io::IsTerminal;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper};

use conch::cell;
use conch::parse::{self, ParseState};
use conch::runtime::Runtime;
use conch::unix;

struct ShellHelper {
	runtime: Arc<Runtime>,
}

impl Completer for ShellHelper {
	type Candidate = String;

	fn complete(
		&self,
		line: &str,
		pos: usize,
		_ctx: &rustyline::Context<'_>,
	) -> rustyline::Result<(usize, Vec<String>)> {
		let head = &line[..pos];
		let start = head
			.rfind(|c: char| c.is_whitespace() || "(){};|:".contains(c))
			.map(|i| i + 1)
			.unwrap_or(0);
		let word = &head[start..];

		let mut names = conch::scope::complete(&self.runtime.scope0, word);
		names.extend(self.runtime.env0.complete(word));
		names.sort();
		names.dedup();

		Ok((start, names))
	}
}

impl Hinter for ShellHelper {
	type Hint = String;
}

impl Highlighter for ShellHelper {}
impl Validator for ShellHelper {}
impl Helper for ShellHelper {}

fn repl(runtime: &Arc<Runtime>) {
	unix::init_signal_handling();

	let mut editor: Editor<ShellHelper, DefaultHistory> = match Editor::new() {
		Ok(e) => e,
		Err(_) => return,
	};
	editor.set_helper(Some(ShellHelper {
		runtime: runtime.clone(),
	}));

	let mut state = ParseState::new("tty");
	let mut pending = String::new();

	loop {
		let prompt = if state.is_empty() { "> " } else { ". " };
		match editor.readline(prompt) {
			Ok(line) => {
				pending.push_str(&line);
				pending.push('\n');

				let mut broken = false;
				for ch in format!["{}\n", line].chars() {
					if let Err(fault) = parse::parse_character(ch, &mut state) {
						println!["oh: {}", fault];
						state = ParseState::new("tty");
						pending.clear();
						broken = true;
						break;
					}
				}
				if broken {
					continue;
				}

				if state.is_ready() {
					let _ = editor.add_history_entry(pending.trim_end());
					if let Some(fg) = runtime.foreground.lock().clone() {
						fg.job.set_command(pending.trim_end());
					}
					pending.clear();
					for c in state.take_results() {
						runtime.evaluate(c);
					}
				}
			}
			Err(ReadlineError::Interrupted) => {
				state = ParseState::new("tty");
				pending.clear();
			}
			Err(_) => break,
		}
	}

	println![];
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_writer(std::io::stderr)
		.init();

	let args: Vec<String> = std::env::args().collect();
	let interactive = args.len() <= 1 && std::io::stdin().is_terminal();

	// The shell only leads its own process group when interactive, so
	// scripts never re-parent the invoking terminal's group.
	if interactive {
		unix::become_process_group_leader();
	}

	let runtime = match Runtime::new(parse::read_values) {
		Ok(rt) => rt,
		Err(fault) => {
			eprintln!["oh: {}", fault];
			std::process::exit(1);
		}
	};

	if let Err(fault) = runtime.boot() {
		eprintln!["oh: {}", fault];
		std::process::exit(1);
	}

	runtime.launch_foreground_task();
	runtime.import_cli(&args);

	let source = |path: &str| {
		let c = cell::from_vec(&[cell::sym("source"), cell::sym(path)]);
		runtime.evaluate(c);
	};

	if args.len() > 1 {
		source(&args[1]);
	} else if interactive {
		runtime.interactive.store(true, Ordering::SeqCst);
		repl(&runtime);
	} else {
		source("/dev/stdin");
	}

	std::process::exit(0);
}
