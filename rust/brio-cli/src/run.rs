//! Run a `.brio` source file through either execution pipeline.

use brio_compiler::{parse_source, Compiler};
use brio_rt::cache;
use brio_rt::eval::Evaluator;
use brio_rt::logger::LogLevel;
use brio_rt::modules::{Resolver, ResolverLoader};
use brio_rt::output::Output;
use brio_rt::vm::Vm;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub struct RunOptions {
    /// Force the bytecode compiler + VM instead of the tree-walker.
    pub bytecode: bool,
    /// VM diagnostic verbosity (bytecode mode only).
    pub log_level: LogLevel,
    /// Reuse/write a compiled bytecode cache next to the source file.
    pub use_cache: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            bytecode: false,
            log_level: LogLevel::None,
            use_cache: false,
        }
    }
}

/// Execute a source file. Returns the process exit code: 0 on normal
/// termination, 1 on parse or runtime errors (reported on stderr as one
/// line starting with the error kind).
pub fn run_file(path: &Path, options: &RunOptions) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("import error: cannot read {}: {}", path.display(), e);
            return 1;
        }
    };
    let program = match parse_source(&source) {
        Ok(program) => program,
        Err(errors) => {
            for error in &errors {
                eprintln!("parse error: {}", error);
            }
            return 1;
        }
    };

    let dir = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let resolver = Resolver::new(std_root(&dir), Output::Stdout);

    if options.bytecode {
        run_bytecode(path, &source, &program, resolver, dir, options)
    } else {
        let mut evaluator = Evaluator::with_resolver(resolver, dir, Output::Stdout);
        let env = Evaluator::global_env();
        match evaluator.eval_program(&program, &env) {
            Ok(_) => 0,
            Err(err) => {
                report_exception(&err);
                1
            }
        }
    }
}

fn run_bytecode(
    path: &Path,
    source: &str,
    program: &brio_core::ast::Program,
    resolver: Rc<Resolver>,
    dir: PathBuf,
    options: &RunOptions,
) -> i32 {
    let cache_path = path.with_extension("brioc");
    let bytecode = if options.use_cache {
        match cache::load_cache(&cache_path, source) {
            Ok(bytecode) => Some(bytecode),
            Err(_) => None,
        }
    } else {
        None
    };
    let bytecode = match bytecode {
        Some(bytecode) => bytecode,
        None => {
            let loader = ResolverLoader {
                resolver: Rc::clone(&resolver),
                base: dir.clone(),
            };
            let compiled = match Compiler::with_loader(&loader).compile(program) {
                Ok(bytecode) => bytecode,
                Err(e) => {
                    eprintln!("runtime error: {}", e);
                    return 1;
                }
            };
            if options.use_cache {
                // Programs whose pool holds runtime-only values (e.g.
                // imported functions) simply skip the cache.
                let _ = cache::write_cache(&cache_path, &compiled, source);
            }
            compiled
        }
    };

    let delegate = Evaluator::with_resolver(resolver, dir, Output::Stdout);
    let mut vm = Vm::new(bytecode)
        .with_log_level(options.log_level)
        .with_delegate(delegate);
    match vm.run() {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    }
}

/// Standard library root: a `std` directory next to the source file, or
/// the one shipped alongside the executable.
fn std_root(source_dir: &Path) -> PathBuf {
    let local = source_dir.join("std");
    if local.is_dir() {
        return local;
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.join("std")))
        .unwrap_or(local)
}

fn report_exception(err: &brio_core::values::ErrorObj) {
    match err.span {
        Some(span) => eprintln!(
            "{} error at line {}, col {}: {}",
            err.kind, span.line, span.col, err.message
        ),
        None => eprintln!("{} error: {}", err.kind, err.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn normal_termination_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "ok.brio", "x = 1 + 2");
        assert_eq!(run_file(&path, &RunOptions::default()), 0);
        let options = RunOptions {
            bytecode: true,
            ..RunOptions::default()
        };
        assert_eq!(run_file(&path, &options), 0);
    }

    #[test]
    fn parse_errors_exit_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.brio", "x = = 2");
        assert_eq!(run_file(&path, &RunOptions::default()), 1);
    }

    #[test]
    fn runtime_errors_exit_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "boom.brio", "1 / 0");
        assert_eq!(run_file(&path, &RunOptions::default()), 1);
        let options = RunOptions {
            bytecode: true,
            ..RunOptions::default()
        };
        assert_eq!(run_file(&path, &options), 1);
    }

    #[test]
    fn imports_work_in_both_modes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib.brio", "export double = fn(n) { n * 2 }");
        let path = write(
            dir.path(),
            "main.brio",
            "import { double } from \"./lib\"\nresult = double(21)",
        );
        assert_eq!(run_file(&path, &RunOptions::default()), 0);
        let options = RunOptions {
            bytecode: true,
            ..RunOptions::default()
        };
        assert_eq!(run_file(&path, &options), 0);
    }

    #[test]
    fn bytecode_cache_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "cached.brio", "x = 41 + 1");
        let options = RunOptions {
            bytecode: true,
            use_cache: true,
            ..RunOptions::default()
        };
        assert_eq!(run_file(&path, &options), 0);
        assert!(path.with_extension("brioc").exists());
        // Second run loads from the cache.
        assert_eq!(run_file(&path, &options), 0);
    }
}
