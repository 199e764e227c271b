//! Module resolution for Brio imports.
//!
//! Paths starting with `./` or `../` resolve against the importing
//! file's directory, `/` is absolute, and `std/NAME` resolves against
//! the standard-library root. A missing extension defaults to `.brio`.
//! Loaded modules are cached by canonical path, so importing the same
//! module twice yields the same module instance; a load stack catches
//! import cycles before they diverge.

use crate::eval::Evaluator;
use crate::output::Output;
use brio_core::errors::RuntimeError;
use brio_core::values::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Source file extension for Brio modules.
pub const SOURCE_EXTENSION: &str = "brio";

#[derive(Debug)]
pub struct Module {
    pub path: PathBuf,
    /// Exports in declaration order.
    pub exports: Vec<(String, Value)>,
}

pub struct Resolver {
    std_root: PathBuf,
    out: Output,
    cache: RefCell<HashMap<PathBuf, Rc<Module>>>,
    loading: RefCell<Vec<PathBuf>>,
}

impl Resolver {
    pub fn new(std_root: impl Into<PathBuf>, out: Output) -> Rc<Self> {
        Rc::new(Self {
            std_root: std_root.into(),
            out,
            cache: RefCell::new(HashMap::new()),
            loading: RefCell::new(Vec::new()),
        })
    }

    /// Map a module path string to a concrete source file.
    pub fn resolve_path(&self, spec: &str, base: &Path) -> Result<PathBuf, RuntimeError> {
        let raw = if let Some(rest) = spec.strip_prefix("std/") {
            self.std_root.join(rest)
        } else if spec.starts_with('/') {
            PathBuf::from(spec)
        } else {
            // `./`, `../`, and bare paths are all relative to the
            // importing file's directory.
            base.join(spec)
        };
        let with_ext = if raw.extension().is_none() {
            raw.with_extension(SOURCE_EXTENSION)
        } else {
            raw
        };
        with_ext.canonicalize().map_err(|_| {
            RuntimeError::import(format!("cannot resolve module path \"{}\"", spec))
        })
    }

    /// Load (or fetch from cache) the module at `spec`.
    pub fn load(self: &Rc<Self>, spec: &str, base: &Path) -> Result<Rc<Module>, RuntimeError> {
        let path = self.resolve_path(spec, base)?;
        if let Some(module) = self.cache.borrow().get(&path) {
            return Ok(Rc::clone(module));
        }
        if self.loading.borrow().contains(&path) {
            let mut chain: Vec<String> = self
                .loading
                .borrow()
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            chain.push(path.display().to_string());
            return Err(RuntimeError::import(format!(
                "cyclic import: {}",
                chain.join(" -> ")
            )));
        }

        self.loading.borrow_mut().push(path.clone());
        let result = self.load_fresh(&path);
        self.loading.borrow_mut().pop();

        let module = result?;
        self.cache
            .borrow_mut()
            .insert(path.clone(), Rc::clone(&module));
        Ok(module)
    }

    fn load_fresh(self: &Rc<Self>, path: &Path) -> Result<Rc<Module>, RuntimeError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::import(format!("cannot read module {}: {}", path.display(), e))
        })?;
        let program = brio_compiler::parse_source(&source).map_err(|errors| {
            RuntimeError::import(format!(
                "parse error in module {}: {}",
                path.display(),
                errors
                    .first()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ))
        })?;

        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let mut evaluator = Evaluator::with_resolver(Rc::clone(self), dir, self.out.clone());
        let env = Evaluator::global_env();
        evaluator.eval_program(&program, &env).map_err(|err| {
            RuntimeError::import(format!(
                "error in module {}: {}: {}",
                path.display(),
                err.kind,
                err.message
            ))
        })?;

        Ok(Rc::new(Module {
            path: path.to_path_buf(),
            exports: evaluator.take_exports(),
        }))
    }
}

/// Adapter letting the bytecode compiler resolve imports at compile time
/// through the same resolver (and cache) the evaluator uses.
pub struct ResolverLoader {
    pub resolver: Rc<Resolver>,
    pub base: PathBuf,
}

impl brio_compiler::ImportLoader for ResolverLoader {
    fn load(&self, path: &str) -> Result<Vec<(String, Value)>, String> {
        self.resolver
            .load(path, &self.base)
            .map(|module| module.exports.clone())
            .map_err(|e| e.to_string())
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
    fn resolves_relative_paths_with_default_extension() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "util.brio", "export x = 1");
        let resolver = Resolver::new(dir.path().join("std"), Output::capture());
        let resolved = resolver.resolve_path("./util", dir.path()).unwrap();
        assert!(resolved.ends_with("util.brio"));
    }

    #[test]
    fn missing_module_is_import_error() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(dir.path().join("std"), Output::capture());
        let err = resolver.load("./nope", dir.path()).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Import);
    }

    #[test]
    fn loads_exports_in_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "m.brio",
            "export b = 2\nexport a = 1\nhidden = 3",
        );
        let resolver = Resolver::new(dir.path().join("std"), Output::capture());
        let module = resolver.load("./m", dir.path()).unwrap();
        let names: Vec<&str> = module.exports.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn cache_returns_the_same_module_instance() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "m.brio", "export x = 1");
        let resolver = Resolver::new(dir.path().join("std"), Output::capture());
        let first = resolver.load("./m", dir.path()).unwrap();
        let second = resolver.load("./m", dir.path()).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn cyclic_imports_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.brio", "import { x } from \"./b\"\nexport y = 1");
        write(dir.path(), "b.brio", "import { y } from \"./a\"\nexport x = 2");
        let resolver = Resolver::new(dir.path().join("std"), Output::capture());
        let err = resolver.load("./a", dir.path()).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Import);
        assert!(err.message.contains("cyclic import"));
    }

    #[test]
    fn std_paths_resolve_against_std_root() {
        let dir = tempfile::tempdir().unwrap();
        let std_root = dir.path().join("std");
        fs::create_dir(&std_root).unwrap();
        write(&std_root, "list.brio", "export empty = []");
        let resolver = Resolver::new(&std_root, Output::capture());
        let module = resolver.load("std/list", dir.path()).unwrap();
        assert_eq!(module.exports[0].0, "empty");
    }

    #[test]
    fn parse_error_in_module_is_import_kind() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.brio", "x = = 1");
        let resolver = Resolver::new(dir.path().join("std"), Output::capture());
        let err = resolver.load("./bad", dir.path()).unwrap_err();
        assert_eq!(err.kind, brio_core::errors::ErrorKind::Import);
    }
}
