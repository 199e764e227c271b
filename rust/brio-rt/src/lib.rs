//! Brio RT — the language runtime.
//!
//! Hosts both execution engines over the shared value model: the
//! tree-walking evaluator and the bytecode VM, plus the pieces they
//! share (built-in method dispatch, operator semantics, the module
//! resolver) and the runtime services around them (bytecode disk cache,
//! call profiling for a future JIT tier, VM logging).
#![warn(clippy::all)]

pub mod builtins;
pub mod cache;
pub mod eval;
pub mod logger;
pub mod modules;
pub mod ops;
pub mod output;
pub mod profile;
pub mod vm;

pub use brio_core::{ast, bytecode, env, errors, tokens, values};
