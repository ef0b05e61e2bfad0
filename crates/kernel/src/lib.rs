//! # Duet Kernel
//!
//! The executable half of a Duet document. The kernel region is written in
//! a small indentation-structured scripting language; this crate tokenizes,
//! parses and evaluates it, and owns the hot-reload state machine that swaps
//! one loaded kernel for the next.
//!
//! - [`parse`] is pure and never runs code, so validators can call it freely
//! - [`KernelInstance::load`] runs the top level under step and depth limits
//!   and returns the resulting [`Bindings`]
//! - [`ReloadController`] stages, activates or abandons new instances

pub mod ast;
pub mod instance;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod reload;
pub mod value;

pub use instance::{Bindings, Invocation, KernelError, KernelInstance, LoadOptions};
pub use interpreter::{Limits, RuntimeError};
pub use parser::{parse, parse_expression};
pub use reload::{ReloadController, ReloadState, StagedReload};
pub use value::{Builtin, Value};
