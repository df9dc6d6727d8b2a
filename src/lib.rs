//! Dust - an ownership-checked Rust subset on a bytecode VM
//!
//! This crate evaluates a small Rust-like language without a garbage collector. Every
//! program runs through four stages:
//!
//! ```text
//! source ──parser──▶ AST ──checker──▶ typed AST ──compiler──▶ bytecode + ownership log
//!                                                              │
//!                                               VirtualMachine ▼ (manual heap)
//! ```
//!
//! - The **checker** infers types and enforces mutability and borrow rules
//!   (`&`/`&mut` counts per owner, scoped to blocks and calls).
//! - The **compiler** resolves every name to a fixed `[frame, slot]` position, tracks which
//!   binding owns each `String`, rejects use of moved values and emits explicit `DROP`
//!   instructions where owners go out of scope or are overwritten.
//! - The **heap** is an arena of tagged nodes with a free list; booleans, numbers and
//!   strings are all boxed nodes and strings are interned.
//! - The **virtual machine** runs the bytecode with explicit operand, return and
//!   environment state, including proper tail calls.
//!
//! ```rust
//! # #[cfg(feature = "parser")] {
//! use dust::{evaluate, Value};
//!
//! let (value, _log) = evaluate("fn sq(n: i32) -> i32 { return n * n; } sq(7);").unwrap();
//! assert_eq!(value, Value::Number(49.0));
//!
//! let err = evaluate("let x = String::from(\"abc\"); let y = x; x;").unwrap_err();
//! assert_eq!(err.to_string(), "use of moved value x");
//! # }
//! ```
//!
//! ## Modules
//!
//! - `ast`: the tree handed from the front end to the core, plus runtime `Value`s and `Type`s
//! - `parser`: nom front end for the surface syntax (feature `parser`)
//! - `checker`: type, mutability and borrow checking
//! - `compiler`: bytecode generation with ownership tracking
//! - `heap`: the tagged-node memory model
//! - `vm`: the bytecode interpreter
//! - `builtins`: builtin functions and constants shared by compiler and VM

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod checker;
pub mod compiler;
pub mod heap;
pub mod ownership;
pub mod vm;

#[cfg(feature = "parser")]
pub mod parser;

pub use ast::{Type, Value};
pub use builtins::BuiltinFn;
pub use ownership::{OwnershipLog, OwnershipTransfer};

use crate::ast::Node;
use crate::builtins::Builtins;
use crate::checker::Checker;
use crate::compiler::Compiler;
use crate::vm::VirtualMachine;

/// Maximum nesting depth accepted by the front end
pub const MAX_PARSE_DEPTH: usize = 64;

/// Number of heap nodes a VM may have live at once unless configured otherwise
pub const DEFAULT_HEAP_CAPACITY: usize = 1 << 22;

/// Runtime configuration for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of live heap nodes before allocation fails with "Ran out of memory"
    pub heap_capacity: usize,
    /// Abort after executing this many instructions; `None` runs until `DONE`
    pub step_limit: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heap_capacity: DEFAULT_HEAP_CAPACITY,
            step_limit: None,
        }
    }
}

/// A front-end failure with a snippet of the offending input.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 40 chars)
    pub context: Option<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
            context: None,
        }
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(message: impl Into<String>, input: &str, error_offset: usize) -> Self {
        const MAX_CONTEXT: usize = 40;

        let context: String = input
            .chars()
            .skip(error_offset)
            .take(MAX_CONTEXT)
            .collect::<String>()
            .replace('\n', "\\n")
            .replace('\r', "");

        ParseError {
            message: message.into(),
            context: (!context.is_empty()).then_some(context),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(context) = &self.context {
            write!(f, " near '{context}'")?;
        }
        Ok(())
    }
}

/// Render a type list the way application errors show it: `[ i32, bool ]`
fn render_types(types: &[Type]) -> String {
    let joined = types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("[ {joined} ]")
}

/// Every failure the front end, checker, compiler or VM can report.
///
/// The `Display` text of each variant is the diagnostic shown to users.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(ParseError),

    #[error("unbound name: {0}")]
    UnboundName(String),

    #[error("can't capture dynamic environment in a fn item: `{0}`")]
    CaptureInFnItem(String),

    #[error("type error in {context}; expected {expected}, found {found}")]
    TypeMismatch {
        context: &'static str,
        expected: Type,
        found: Type,
    },

    #[error(
        "type error in application:\nexpected parameter types: {}\nactual argument types: {}",
        render_types(.expected),
        render_types(.actual)
    )]
    ApplicationMismatch { expected: Vec<Type>, actual: Vec<Type> },

    #[error(
        "type error in function declaration; declared return type: {declared}, actual return type: {actual}"
    )]
    ReturnTypeMismatch { declared: Type, actual: Type },

    #[error("expected predicate type: bool, actual predicate type: {0}")]
    PredicateType(Type),

    #[error("{0}")]
    TypeError(String),

    #[error("cannot assign twice to immutable variable `{0}`")]
    AssignToImmutableVariable(String),

    #[error("cannot assign to immutable argument `{0}`")]
    AssignToImmutableArgument(String),

    #[error("cannot assign to `*{0}`, which is behind a `&` reference")]
    AssignThroughSharedReference(String),

    #[error("cannot borrow `{0}` as mutable, as it is not declared as mutable")]
    BorrowOfImmutable(String),

    #[error("cannot borrow `{0}` as mutable more than once at a time")]
    DoubleMutableBorrow(String),

    #[error("cannot borrow `{0}` as mutable because it is also borrowed as immutable")]
    MutableWhileImmutable(String),

    #[error("cannot borrow `{0}` as immutable because it is also borrowed as mutable")]
    ImmutableWhileMutable(String),

    #[error("cannot move out of `*{0}` which is behind a reference")]
    MoveOutOfReference(String),

    #[error("cannot move out of `{0}` because it is borrowed")]
    MoveWhileBorrowed(String),

    #[error("use of moved value {0}")]
    UseOfMovedValue(String),

    #[error("{0}")]
    Runtime(String),

    #[error("Ran out of memory")]
    OutOfMemory,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Check, compile and run an already-built program.
///
/// `program` must be a `blk` node, as produced by [`parser::parse_program`] or assembled by
/// another front end from the constructors in [`ast`]. `custom_builtins` replaces the
/// default implementation of builtins by name; unknown names are ignored.
pub fn evaluate_program(
    mut program: Node,
    custom_builtins: &HashMap<String, Arc<BuiltinFn>>,
    config: &Config,
) -> Result<(Value, OwnershipLog), Error> {
    let program_type = Checker::new().type_program(&mut program)?;
    debug!(%program_type, "program type checked");

    let (instructions, ownership_log) = Compiler::new().compile_program(&program)?;
    debug!(
        instructions = instructions.len(),
        transfers = ownership_log.len(),
        "program compiled"
    );

    let mut vm = VirtualMachine::new(Builtins::with_overrides(custom_builtins), config)?;
    let value = vm.run(&instructions)?;
    debug!(%value, "program finished");

    Ok((value, ownership_log))
}

/// Parse, check, compile and run `source` with the default builtins.
#[cfg(feature = "parser")]
pub fn evaluate(source: &str) -> Result<(Value, OwnershipLog), Error> {
    evaluate_with_builtins(source, &HashMap::new())
}

/// Parse, check, compile and run `source`, overriding builtins by name.
///
/// # Example
/// ```
/// use std::sync::{Arc, Mutex};
/// use dust::{evaluate_with_builtins, BuiltinFn, Value};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let display: Arc<BuiltinFn> = Arc::new(move |args: &[Value]| {
///     if let Ok(mut seen) = sink.lock() {
///         seen.extend(args.iter().map(ToString::to_string));
///     }
///     Ok::<(), dust::Error>(())
/// });
///
/// let builtins = [("display".to_owned(), display)].into_iter().collect();
/// evaluate_with_builtins("display(40 + 2);", &builtins).unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec!["42".to_owned()]);
/// ```
#[cfg(feature = "parser")]
pub fn evaluate_with_builtins(
    source: &str,
    custom_builtins: &HashMap<String, Arc<BuiltinFn>>,
) -> Result<(Value, OwnershipLog), Error> {
    let program = parser::parse_program(source)?;
    evaluate_program(program, custom_builtins, &Config::default())
}
