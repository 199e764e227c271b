//! Brio CLI library: file execution (evaluator or bytecode pipeline) and
//! the interactive REPL.
#![warn(clippy::all)]

pub mod repl;
pub mod run;
