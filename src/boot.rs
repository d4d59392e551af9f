//! The built-in boot script: the language's higher-level utilities,
//! evaluated against the root scope before any user input.

pub const SCRIPT: &str = r#"
# Evaluate each command of a file in the caller's context.
define source: method (name) as {
	define fd: open r name
	define cmd: fd::read
	while (not: is-null cmd) {
		eval cmd
		set cmd = fd::read
	}
	fd::reader-close
	return true
}

# Join two command blocks with an OS pipe. The reader rewrites
# `a | b` into (pipe-body (block a) (block b)); the pipeline's status
# is the status of its last stage. The $stdin rebinding lives in its
# own env so the caller's conduits survive the pipeline.
define pipe-body: syntax (left right) as {
	define conduit: pipe
	define sender: spawn {
		dynamic $stdout = conduit
		eval left
		conduit::writer-close
	}
	define status: integer 0
	make-env {
		dynamic $stdin = conduit
		set status = (eval right)
	}
	conduit::reader-close
	wait sender
	return status
}

define echo: method ((args)) as: write @args

define first: method (l) as: car l
define rest: method (l) as: cdr l
"#;
