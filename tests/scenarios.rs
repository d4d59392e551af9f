//! End-to-end scenarios: whole programs through the reader, the
//! evaluator, external processes, and the conduit plumbing.

use std::io::Write;

use conch::cell::Cell;
use conch::runtime::Runtime;

fn runtime() -> std::sync::Arc<Runtime> {
	let rt = Runtime::new(conch::parse::read_values).unwrap();
	rt.boot().unwrap();
	rt
}

fn run(source: &str) -> Cell {
	runtime().run_program(source, "test").unwrap()
}

fn shown(source: &str) -> String {
	format!["{}", run(source)]
}

fn scratch_file(name: &str, contents: &str) -> String {
	let path = std::env::temp_dir().join(format![
		"conch-{}-{}",
		std::process::id(),
		name
	]);
	let mut f = std::fs::File::create(&path).unwrap();
	f.write_all(contents.as_bytes()).unwrap();
	path.to_string_lossy().to_string()
}

// //////////////////////////////////////////////////////////
// The language
// //////////////////////////////////////////////////////////

#[test]
fn definitions_feed_arithmetic() {
	assert_eq![shown("define x: integer 3\nadd x 4"), "7"];
}

#[test]
fn recursion_through_return_continuations() {
	let program = "define f: method (n) as: \
		if (eq n 0) {return 1} else {mul n: f (sub n 1)}\n\
		f 5";
	assert_eq![shown(program), "120"];
}

#[test]
fn channels_rendezvous_between_tasks() {
	assert_eq![
		shown("define c: channel 1\nspawn {c::write hello}\nc::read"),
		"hello"
	];
}

#[test]
fn wait_replaces_tasks_with_their_results() {
	assert_eq![
		shown("define t: spawn {exit 42}\ncar: wait t"),
		"42"
	];
}

#[test]
fn wait_without_arguments_awaits_all_children() {
	assert_eq![
		shown("spawn {exit 1}\nspawn {exit 2}\nwait\nadd 1 1"),
		"2"
	];
}

#[test]
fn methods_capture_their_definition_scope() {
	let program = "define make-counter: method () as {\n\
		\tdefine n: integer 0\n\
		\tmethod () as {\n\
		\t\tset n = (add n 1)\n\
		\t\tadd n 0\n\
		\t}\n\
		}\n\
		define tick: make-counter\n\
		tick\n\
		tick";
	assert_eq![shown(program), "2"];
}

// //////////////////////////////////////////////////////////
// External processes
// //////////////////////////////////////////////////////////

#[test]
fn external_commands_report_their_exit_status() {
	assert_eq![shown("sh -c \"exit 3\""), "3"];
	assert_eq![shown("sh -c \"exit 0\""), "0"];
}

#[test]
fn run_forces_the_external_path() {
	assert_eq![shown("run sh -c \"exit 5\""), "5"];
}

#[test]
fn pipelines_report_the_last_stage_status() {
	assert_eq![shown("echo foo | cat"), "0"];
}

#[test]
fn missing_commands_fail() {
	assert![runtime()
		.run_program("definitely-not-a-command-xyz", "test")
		.is_err()];
}

#[test]
fn tilde_and_glob_expansion_feed_builtin_argv() {
	assert_eq![shown("exists ~"), "true"];
	assert_eq![shown("exists /e?c"), "true"];
	assert![runtime()
		.run_program("ls /no-such-prefix-conch-*", "test")
		.is_err()];
}

#[test]
fn strings_escape_expansion() {
	// A string argv entry passes through literally even with glob
	// characters in it.
	assert_eq![shown("sh -c \"exit 0\" \"*\""), "0"];
}

// //////////////////////////////////////////////////////////
// The shell surface
// //////////////////////////////////////////////////////////

#[test]
fn cd_updates_the_dynamic_working_directory() {
	assert_eq![shown("cd /\ninterpolate \"${cwd}\""), "\"/\""];
}

#[test]
fn exists_is_false_on_an_empty_argv() {
	assert_eq![shown("exists"), "false"];
}

#[test]
fn setenv_mirrors_into_the_process_environment() {
	run("setenv $CONCH_TEST_SET = mirrored");
	assert_eq![std::env::var("CONCH_TEST_SET").unwrap(), "mirrored"];
}

#[test]
fn module_names_derive_from_stat() {
	let path = scratch_file("module", "contents\n");
	let out = shown(&format!["module {}", path]);
	assert![out.starts_with('$'), "got {}", out];
	assert![out.contains("-9-"), "got {}", out];
}

#[test]
fn source_evaluates_a_file() {
	let path = scratch_file("script.sh", "setenv $CONCH_TEST_SOURCED = yes\n");
	run(&format!["source {}", path]);
	assert_eq![std::env::var("CONCH_TEST_SOURCED").unwrap(), "yes"];
}

#[test]
fn readline_returns_strings_then_null() {
	let path = scratch_file("lines", "line one\nline two\n");
	assert_eq![
		shown(&format!["define fd: open r {}\nfd::readline", path]),
		"\"line one\""
	];
	assert_eq![
		shown(&format![
			"define fd: open r {}\nfd::readline\nfd::readline\nfd::readline",
			path
		]),
		"()"
	];
}

#[test]
fn open_writes_then_reads_back() {
	let path = scratch_file("rw", "");
	run(&format![
		"define out: open w {}\nout::write hello there\nout::writer-close",
		path
	]);
	assert_eq![
		shown(&format!["define fd: open r {}\ncar: fd::read", path]),
		"(hello there)"
	];
}

// //////////////////////////////////////////////////////////
// First-class values on the wire
// //////////////////////////////////////////////////////////

#[test]
fn handles_round_trip_through_a_pipe() {
	let program = "define c: channel 1\n\
		define p: pipe\n\
		p::write c\n\
		p::writer-close\n\
		define v: car: p::read\n\
		ne c v";
	assert_eq![shown(program), "false"];
}

#[test]
fn readline_tokens_stay_resolvable() {
	let program = "define c: channel 1\n\
		define p: pipe\n\
		c::write p\n\
		list p (c::readline)";
	let v = runtime().run_program(program, "test").unwrap();
	let items = conch::cell::to_vec(&v);

	let token = conch::cell::raw(&items[1]);
	let parsed = conch::parse::parse_string(&token, "test").unwrap();
	let back = conch::cell::car(&parsed[0]).unwrap();

	assert![std::sync::Arc::ptr_eq(&items[0], &back)];
}
