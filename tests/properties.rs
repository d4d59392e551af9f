//! Properties of the evaluator core, driven end to end through full
//! programs.

use conch::cell::{self, Cell, Value};
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

fn fails(source: &str) -> bool {
	runtime().run_program(source, "test").is_err()
}

// //////////////////////////////////////////////////////////
// Resolution
// //////////////////////////////////////////////////////////

#[test]
fn dynamic_bindings_win_over_lexical() {
	assert_eq![
		shown("define x: integer 1\ndynamic x = 2\nadd x 0"),
		"2"
	];
}

#[test]
fn lexical_bindings_resolve_outward() {
	assert_eq![shown("define x: integer 7\nblock {\n\tadd x 0\n}"), "7"];
}

#[test]
fn undefined_symbols_name_themselves_outside_strict_mode() {
	assert_eq![shown("list just-a-name"), "(just-a-name)"];
}

#[test]
fn strict_mode_rejects_undefined_symbols() {
	assert![fails("define strict: integer 1\nlist some-undefined-name")];
}

#[test]
fn strict_mode_still_accepts_numbers() {
	assert_eq![shown("define strict: integer 1\nadd 1 2"), "3"];
}

#[test]
fn set_requires_an_existing_binding() {
	assert![fails("set never-defined = 1")];
	assert_eq![shown("define x: integer 1\nset x = 9\nadd x 0"), "9"];
}

// //////////////////////////////////////////////////////////
// Control
// //////////////////////////////////////////////////////////

#[test]
fn if_false_without_else_is_an_error() {
	assert![fails("if (eq 1 2) {list 1}")];
}

#[test]
fn if_selects_the_live_branch() {
	assert_eq![shown("if (eq 1 1) {add 1 1} else {add 2 2}"), "2"];
	assert_eq![shown("if (eq 1 2) {add 1 1} else {add 2 2}"), "4"];
}

#[test]
fn while_reevaluates_its_test() {
	assert_eq![
		shown("define i: integer 0\nwhile (lt i 3) {\n\tset i = (add i 1)\n}\nadd i 0"),
		"3"
	];
}

#[test]
fn return_unwinds_the_rest_of_a_body() {
	assert_eq![shown("define f: method () as { return 5; list skipped }\nf"), "5"];
}

#[test]
fn splice_flattens_into_the_argv() {
	assert_eq![shown("define l: list 1 2\nadd @l"), "3"];
}

// //////////////////////////////////////////////////////////
// Objects and visibility
// //////////////////////////////////////////////////////////

#[test]
fn objects_carry_public_slots() {
	assert_eq![
		shown("define o: child\no::set-slot greeting hello\no::get-slot greeting"),
		"hello"
	];
	assert_eq![shown("define o: child\no::has nothing"), "false"];
}

#[test]
fn public_dispatch_hides_private_members() {
	// `define` is a private member of the root scope, so an object
	// reached through its public face cannot see it.
	assert![fails("define o: child\no::define x 1")];
}

#[test]
fn unset_reports_presence() {
	assert_eq![
		shown("define o: child\no::set-slot k v\no::unset k"),
		"true"
	];
	assert_eq![shown("define o: child\no::unset missing"), "false"];
}

#[test]
fn spawned_tasks_get_an_isolated_scope() {
	assert_eq![
		shown("define x: integer 1\ndefine t: spawn {\n\tdefine x: integer 99\n\texit 0\n}\nwait t\nadd x 0"),
		"1"
	];
}

// //////////////////////////////////////////////////////////
// Pairs
// //////////////////////////////////////////////////////////

#[test]
fn set_car_returns_the_value_and_mutates_the_pair() {
	assert_eq![shown("define p: cons 1 2\nset-car p 9"), "9"];
	assert_eq![shown("define p: cons 1 2\nset-car p 9\ncar p"), "9"];
	assert_eq![shown("define p: cons 1 2\nset-car p 9\ncdr p"), "2"];
}

#[test]
fn append_copies_its_first_list() {
	assert_eq![shown("define l: list 1 2\nappend l 3"), "(1 2 3)"];
	assert_eq![shown("define l: list 1 2\nappend l 3\ncdr: cdr l"), "()"];
}

// //////////////////////////////////////////////////////////
// Conduits
// //////////////////////////////////////////////////////////

#[test]
fn drained_channels_read_null_and_readline_false() {
	assert_eq![shown("define c: channel 1\nc::writer-close\nc::read"), "()"];
	assert_eq![
		shown("define c: channel 1\nc::writer-close\nc::readline"),
		"false"
	];
}

#[test]
fn channels_buffer_up_to_capacity() {
	assert_eq![
		shown("define c: channel 2\nc::write 1\nc::write 2\nc::writer-close\nadd (c::read) (c::read)"),
		"3"
	];
}

#[test]
fn pipes_carry_commands_between_tasks() {
	assert_eq![
		shown("define p: pipe\nspawn {\n\tp::write hello\n\tp::writer-close\n}\ncar: p::read"),
		"hello"
	];
}

#[test]
fn drained_pipes_read_null() {
	assert_eq![shown("define p: pipe\np::writer-close\np::read"), "()"];
	assert_eq![
		shown("define p: pipe\np::writer-close\np::read\np::read"),
		"()"
	];
}

#[test]
fn conduits_refuse_private_members() {
	assert![fails("define c: channel 1\nc::define x 1")];
	assert![fails("define c: channel 1\nc::clone")];
}

// //////////////////////////////////////////////////////////
// Strings
// //////////////////////////////////////////////////////////

#[test]
fn string_methods_join_split_and_substring() {
	assert_eq![shown("define sep = \",\"\nsep::join a b c"), "\"a,b,c\""];
	assert_eq![
		shown("define s = \"a,b\"\ncar: s::split \",\""),
		"\"a\""
	];
	assert_eq![
		shown("define s = \"hello world\"\ns::substring 0 5"),
		"\"hello\""
	];
}

#[test]
fn split_on_an_empty_separator_yields_characters() {
	assert_eq![shown("define s = \"ab\"\ns::split \"\""), "(\"a\" \"b\")"];
}

#[test]
fn sprintf_formats_cells() {
	assert_eq![
		shown("define f = \"%s=%d\"\nf::sprintf key 7"),
		"\"key=7\""
	];
}

#[test]
fn interpolate_expands_references() {
	assert_eq![
		shown("define name: symbol world\ninterpolate \"hi ${name} $$x\""),
		"\"hi world $x\""
	];
	assert_eq![
		shown("interpolate \"${never-bound}\""),
		"\"${never-bound}\""
	];
}

#[test]
fn string_predicates_check_every_character() {
	assert_eq![shown("define s = \"abc\"\ns::is-alpha"), "true"];
	assert_eq![shown("define s = \"a1\"\ns::is-digit"), "false"];
}

// //////////////////////////////////////////////////////////
// Numbers
// //////////////////////////////////////////////////////////

#[test]
fn arithmetic_promotes_across_the_tower() {
	assert_eq![shown("add 1 2 3"), "6"];
	assert_eq![shown("div 1 2"), "1/2"];
	assert_eq![shown("mul 2: div 1 2"), "1"];
	assert_eq![shown("mod 7 3"), "1"];
	assert_eq![shown("sub 5"), "-5"];
}

#[test]
fn relational_chains() {
	assert_eq![shown("lt 1 2 3"), "true"];
	assert_eq![shown("lt 1 3 2"), "false"];
	assert_eq![shown("eq 2 2 2"), "true"];
	assert_eq![shown("ne 1 2 3"), "true"];
	assert_eq![shown("ne 1 2 1"), "false"];
}

#[test]
fn division_by_zero_is_an_error() {
	assert![fails("div 1 0")];
}

// //////////////////////////////////////////////////////////
// Cells
// //////////////////////////////////////////////////////////

#[test]
fn statuses_are_truthy_only_at_zero() {
	assert_eq![shown("boolean: status 0"), "true"];
	assert_eq![shown("boolean: status 1"), "false"];
}

#[test]
fn eval_runs_data_as_code() {
	assert_eq![shown("eval (list add 1 2)"), "3"];
}

#[test]
fn results_are_cells_not_strings() {
	let v = run("integer 3");
	assert![matches![*v, Value::Integer(_)]];
	assert![cell::equal(&v, &cell::integer(3))];
}
