//! Failure values raised by the evaluator and its collaborators.

use thiserror::Error;

/// Everything that can go wrong while the shell is running.
///
/// Faults propagate with `?` up to the evaluator loop boundary, where they
/// are printed as `oh: <message>` and the run is reported unsuccessful.
#[derive(Clone, Debug, Error)]
pub enum Fault {
	/// The reader could not turn input into cells.
	#[error("{0}")]
	Parse(String),

	/// An undefined symbol, an unbound assignment, or a missing keyword.
	#[error("{0}")]
	Resolution(String),

	/// A value was not of the kind an operation requires.
	#[error("{0}")]
	Type(String),

	/// The operating system refused us.
	#[error("{0}")]
	Os(String),

	/// A path plus what went wrong with it.
	#[error("{path}: {reason}")]
	Path { path: String, reason: String },
}

pub type Fallible<T> = Result<T, Fault>;

impl Fault {
	pub fn type_error(msg: impl Into<String>) -> Fault {
		Fault::Type(msg.into())
	}

	pub fn undefined(name: &str) -> Fault {
		Fault::Resolution(format!["'{}' undefined", name])
	}
}

impl From<std::io::Error> for Fault {
	fn from(err: std::io::Error) -> Fault {
		Fault::Os(err.to_string())
	}
}
