//! The surface reader: characters in, command cells out.
//!
//! The reader is character-fed so it can serve interactive input, files,
//! and pipe ends alike. A balanced top-level line yields one command
//! list. `;` separates commands, `#` comments to end of line, `(...)`
//! encloses a sub-command, `{...}` a block, `word: rest` appends the
//! rest of the command as one trailing sub-command, `a::b` reads as the
//! member pair `(a . b)`, `@x` splices, `a | b` becomes a `pipe-body`
//! form, and `%kind 0xN%` dereferences a first-class value by handle.

use std::io::BufRead;

use crate::cell::{self, Cell};
use crate::error::{Fallible, Fault};

#[derive(Clone, Copy, PartialEq)]
enum Kind {
	Top,
	Paren,
	Brace,
	Colon,
}

struct Frame {
	kind: Kind,
	commands: Vec<Cell>,
	current: Vec<Cell>,
	stages: Vec<Vec<Cell>>,
}

impl Frame {
	fn new(kind: Kind) -> Frame {
		Frame {
			kind,
			commands: vec![],
			current: vec![],
			stages: vec![],
		}
	}

	fn has_partial(&self) -> bool {
		!self.current.is_empty() || !self.stages.is_empty() || !self.commands.is_empty()
	}
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
	Plain,
	Comment,
	Text,
	TextEscape,
	Handle,
}

/// State used by the reader internally.
pub struct ParseState {
	origin: String,
	line: usize,
	column: usize,
	frames: Vec<Frame>,
	token: String,
	literal: String,
	mode: Mode,
	pending_colon: bool,
	results: Vec<Cell>,
}

impl ParseState {
	pub fn new(origin: &str) -> ParseState {
		ParseState {
			origin: origin.to_string(),
			line: 1,
			column: 1,
			frames: vec![Frame::new(Kind::Top)],
			token: String::new(),
			literal: String::new(),
			mode: Mode::Plain,
			pending_colon: false,
			results: vec![],
		}
	}

	fn fail(&self, msg: &str) -> Fault {
		Fault::Parse(format!["{}:{}:{}: {}", self.origin, self.line, self.column, msg])
	}

	/// True when a complete run of top-level commands is available.
	pub fn is_ready(&self) -> bool {
		self.frames.len() == 1
			&& self.token.is_empty()
			&& self.mode == Mode::Plain
			&& !self.pending_colon
			&& !self.frames[0].has_partial()
			&& !self.results.is_empty()
	}

	/// True when nothing has accumulated at all.
	pub fn is_empty(&self) -> bool {
		self.frames.len() == 1
			&& self.token.is_empty()
			&& self.mode == Mode::Plain
			&& !self.frames[0].has_partial()
			&& self.results.is_empty()
	}

	pub fn take_results(&mut self) -> Vec<Cell> {
		std::mem::take(&mut self.results)
	}
}

// //////////////////////////////////////////////////////////
// Driving
// //////////////////////////////////////////////////////////

/// Feed one character.
pub fn parse_character(ch: char, state: &mut ParseState) -> Fallible<()> {
	parse_internal(ch, state)?;
	if ch == '\n' {
		state.line += 1;
		state.column = 1;
	} else {
		state.column += 1;
	}
	Ok(())
}

/// Finalize: flush the trailing command and hand back everything
/// collected. Open brackets are an error.
pub fn finish(state: &mut ParseState) -> Fallible<Vec<Cell>> {
	if state.mode == Mode::Text || state.mode == Mode::TextEscape || state.mode == Mode::Handle {
		return Err(state.fail("unterminated literal"));
	}
	flush_pending_colon(state)?;
	finish_token(state)?;
	end_command(state)?;
	if state.frames.len() != 1 {
		return Err(state.fail("unmatched opening bracket"));
	}
	Ok(state.take_results())
}

/// Parse a complete source string into command cells.
pub fn parse_string(source: &str, origin: &str) -> Fallible<Vec<Cell>> {
	let mut state = ParseState::new(origin);
	for ch in source.chars() {
		parse_character(ch, &mut state)?;
	}
	finish(&mut state)
}

/// The pluggable reader contract: yield each complete command read
/// from the input. A false return from the sink stops the read.
pub fn read_values(input: &mut dyn BufRead, origin: &str, sink: &mut dyn FnMut(Cell) -> bool) {
	let mut state = ParseState::new(origin);
	let mut line = String::new();

	loop {
		line.clear();
		match input.read_line(&mut line) {
			Ok(0) | Err(_) => break,
			Ok(_) => {}
		}

		let mut broken = false;
		for ch in line.chars() {
			if parse_character(ch, &mut state).is_err() {
				broken = true;
				break;
			}
		}
		if broken {
			state = ParseState::new(origin);
			continue;
		}

		if state.is_ready() {
			for c in state.take_results() {
				if !sink(c) {
					return;
				}
			}
		}
	}

	if let Ok(rest) = finish(&mut state) {
		for c in rest {
			if !sink(c) {
				return;
			}
		}
	}
}

// //////////////////////////////////////////////////////////
// Internal
// //////////////////////////////////////////////////////////

fn parse_internal(ch: char, state: &mut ParseState) -> Fallible<()> {
	match state.mode {
		Mode::Comment => {
			if ch == '\n' {
				state.mode = Mode::Plain;
				return plain(ch, state);
			}
			Ok(())
		}
		Mode::Text => {
			match ch {
				'"' => {
					let s = std::mem::take(&mut state.literal);
					push_element(state, cell::text_bare(&s));
					state.mode = Mode::Plain;
				}
				'\\' => state.mode = Mode::TextEscape,
				_ => state.literal.push(ch),
			}
			Ok(())
		}
		Mode::TextEscape => {
			match ch {
				'n' => state.literal.push('\n'),
				't' => state.literal.push('\t'),
				_ => state.literal.push(ch),
			}
			state.mode = Mode::Text;
			Ok(())
		}
		Mode::Handle => {
			if ch == '%' {
				let s = std::mem::take(&mut state.literal);
				let mut it = s.split_whitespace();
				let kind = it.next().unwrap_or("");
				let reference = it.next().unwrap_or("");
				push_element(state, cell::deref(kind, reference));
				state.mode = Mode::Plain;
			} else {
				state.literal.push(ch);
			}
			Ok(())
		}
		Mode::Plain => plain(ch, state),
	}
}

fn plain(ch: char, state: &mut ParseState) -> Fallible<()> {
	if ch == ':' {
		if state.pending_colon {
			// A doubled colon stays in the token: member access.
			state.token.push_str("::");
			state.pending_colon = false;
		} else {
			state.pending_colon = true;
		}
		return Ok(());
	}

	flush_pending_colon(state)?;

	match ch {
		'#' => {
			finish_token(state)?;
			state.mode = Mode::Comment;
		}
		'"' => {
			finish_token(state)?;
			state.mode = Mode::Text;
		}
		'%' => {
			finish_token(state)?;
			state.mode = Mode::Handle;
		}
		'(' => {
			finish_token(state)?;
			state.frames.push(Frame::new(Kind::Paren));
		}
		')' => {
			finish_token(state)?;
			close_colons(state)?;
			if !matches![state.frames.last(), Some(f) if f.kind == Kind::Paren] {
				return Err(state.fail("unmatched closing parenthesis"));
			}
			let frame = state.frames.pop().unwrap();
			let command = fold_pipeline(frame.stages, frame.current);
			push_element(state, cell::from_vec(&command));
		}
		'{' => {
			finish_token(state)?;
			state.frames.push(Frame::new(Kind::Brace));
		}
		'}' => {
			finish_token(state)?;
			end_command(state)?;
			if !matches![state.frames.last(), Some(f) if f.kind == Kind::Brace] {
				return Err(state.fail("unmatched closing brace"));
			}
			let frame = state.frames.pop().unwrap();
			let mut block = vec![cell::sym("block")];
			block.extend(frame.commands);
			push_element(state, cell::from_vec(&block));
		}
		'|' => {
			finish_token(state)?;
			if state.frames.last().unwrap().current.is_empty() {
				return Err(state.fail("empty pipeline stage"));
			}
			let frame = state.frames.last_mut().unwrap();
			let stage = std::mem::take(&mut frame.current);
			frame.stages.push(stage);
		}
		';' => {
			finish_token(state)?;
			if innermost_command_kind(state) == Kind::Paren {
				return Err(state.fail("unexpected ';'"));
			}
			end_command(state)?;
		}
		'\n' => {
			finish_token(state)?;
			if innermost_command_kind(state) != Kind::Paren {
				end_command(state)?;
			}
		}
		_ if ch.is_whitespace() => {
			finish_token(state)?;
		}
		_ => {
			state.token.push(ch);
		}
	}
	Ok(())
}

/// The frame that decides how command separators behave here.
fn innermost_command_kind(state: &ParseState) -> Kind {
	for f in state.frames.iter().rev() {
		if f.kind != Kind::Colon {
			return f.kind;
		}
	}
	Kind::Top
}

fn flush_pending_colon(state: &mut ParseState) -> Fallible<()> {
	if state.pending_colon {
		state.pending_colon = false;
		finish_token(state)?;
		state.frames.push(Frame::new(Kind::Colon));
	}
	Ok(())
}

fn finish_token(state: &mut ParseState) -> Fallible<()> {
	if state.token.is_empty() {
		return Ok(());
	}
	let token = std::mem::take(&mut state.token);
	let c = token_to_cell(&token);
	push_element(state, c);
	Ok(())
}

fn token_to_cell(token: &str) -> Cell {
	if let Some(rest) = token.strip_prefix('@') {
		if !rest.is_empty() {
			return cell::from_vec(&[cell::sym("splice"), token_to_cell(rest)]);
		}
	}

	if token.contains("::") {
		let mut parts = token.split("::");
		let mut acc = cell::sym(parts.next().unwrap_or(""));
		for p in parts {
			acc = cell::cons(acc, cell::sym(p));
		}
		return acc;
	}

	cell::sym(token)
}

fn push_element(state: &mut ParseState, c: Cell) {
	state.frames.last_mut().unwrap().current.push(c);
}

/// Close any colon sub-commands: each becomes the trailing element of
/// its enclosing command.
fn close_colons(state: &mut ParseState) -> Fallible<()> {
	while matches![state.frames.last(), Some(f) if f.kind == Kind::Colon] {
		let frame = state.frames.pop().unwrap();
		let command = fold_pipeline(frame.stages, frame.current);
		push_element(state, cell::from_vec(&command));
	}
	Ok(())
}

/// Fold pipeline stages left-associatively into pipe-body forms.
fn fold_pipeline(stages: Vec<Vec<Cell>>, last: Vec<Cell>) -> Vec<Cell> {
	let mut all = stages;
	if !last.is_empty() {
		all.push(last);
	}

	let mut it = all.into_iter();
	let mut acc = match it.next() {
		Some(s) => s,
		None => return vec![],
	};

	for stage in it {
		acc = vec![
			cell::sym("pipe-body"),
			cell::from_vec(&[cell::sym("block"), cell::from_vec(&acc)]),
			cell::from_vec(&[cell::sym("block"), cell::from_vec(&stage)]),
		];
	}

	acc
}

/// Finish the command in progress, if any.
fn end_command(state: &mut ParseState) -> Fallible<()> {
	close_colons(state)?;

	let top = state.frames.len() == 1;
	let frame = state.frames.last_mut().unwrap();

	if frame.current.is_empty() && frame.stages.is_empty() {
		return Ok(());
	}

	let stages = std::mem::take(&mut frame.stages);
	let current = std::mem::take(&mut frame.current);
	let command = cell::from_vec(&fold_pipeline(stages, current));

	if top {
		state.results.push(command);
	} else {
		frame.commands.push(command);
	}
	Ok(())
}

// //////////////////////////////////////////////////////////
// Tests
// //////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
	use super::*;

	macro_rules! assert_reads {
		( $( $src:expr => $want:expr ),*, ) => {
			$(
				let got = parse_string($src, "test").unwrap();
				let shown: Vec<String> =
					got.iter().map(|c| format!["{}", c]).collect();
				assert_eq![shown.join(" & "), $want, "source: {}", $src];
			)*
		};
	}

	macro_rules! assert_errs {
		( $( $src:expr ),*, ) => {
			$( assert![parse_string($src, "test").is_err(), "source: {}", $src]; )*
		};
	}

	#[test]
	fn commands_and_sugar() {
		assert_reads![
			"echo hi" => "(echo hi)",
			"a; b" => "(a) & (b)",
			"define x: integer 3" => "(define x (integer 3))",
			"write: add x 4" => "(write (add x 4))",
			"c::write hello" => "((c . write) hello)",
			"a::b::c" => "(((a . b) . c))",
			"if (eq n 0) {return 1} else {mul n: f (sub n 1)}" =>
				"(if (eq n 0) (block (return 1)) else (block (mul n (f (sub n 1)))))",
			"wait @args" => "(wait (splice args))",
			"echo foo | cat" => "(pipe-body (block (echo foo)) (block (cat)))",
			"spawn {c::write hello}" => "(spawn (block ((c . write) hello)))",
			"()" => "(())",
			"write \"a b\"" => "(write \"a b\")",
			"# nothing\necho hi" => "(echo hi)",
		];
	}

	#[test]
	fn multi_line_groups() {
		assert_reads![
			"while (lt i 3) {\n\tset i = (add i 1)\n}" =>
				"(while (lt i 3) (block (set i = (add i 1))))",
			"(add 1\n 2)" => "((add 1 2))",
		];
	}

	#[test]
	fn bad_input_is_an_error() {
		assert_errs![
			"(open",
			"close)",
			"{",
			"}",
			"(a; b)",
			"\"unterminated",
		];
	}

	#[test]
	fn ready_tracks_balance() {
		let mut state = ParseState::new("test");
		for ch in "spawn {\n".chars() {
			parse_character(ch, &mut state).unwrap();
		}
		assert![!state.is_ready()];
		for ch in "exit 1\n}\n".chars() {
			parse_character(ch, &mut state).unwrap();
		}
		assert![state.is_ready()];
	}
}
