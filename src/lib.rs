//! An interactive Unix shell whose command language is a Lisp-flavored
//! expression language with first-class closures, continuations,
//! objects, and pipelines.
//!
//! The shell composes ordinary external processes with in-language
//! procedures, joining both through conduits (pipes and typed
//! channels) and an integrated job-control facility. The core is a
//! stack-machine evaluator: suspended states live on a per-task stack,
//! intermediate values on a scratch list, and a family of binding
//! kinds (builtins, methods, syntax forms) meets the dynamic/lexical
//! environment protocol in a single dispatch loop.
//!
//! Evaluating a program:
//!
//! ```
//! let runtime = conch::runtime::Runtime::new(conch::parse::read_values).unwrap();
//! runtime.boot().unwrap();
//! let result = runtime
//! 	.run_program("define x: integer 3; add x 4", "doc")
//! 	.unwrap();
//! assert_eq![format!["{}", result], "7"];
//! ```

#[macro_use]
mod macros;

pubmods![
	boot
	builtins
	cell
	conduit
	error
	parse
	registers
	runtime
	scope
	task
	unix
];
