//! Output sink for `print`.
//!
//! The CLI writes straight to stdout; tests capture lines in a shared
//! buffer. Clones share the same buffer, so an engine and any module
//! loads it triggers print to one place.

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub enum Output {
    #[default]
    Stdout,
    Capture(Rc<RefCell<Vec<String>>>),
}

impl Output {
    pub fn capture() -> Self {
        Output::Capture(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn write(&self, line: String) {
        match self {
            Output::Stdout => println!("{}", line),
            Output::Capture(buffer) => buffer.borrow_mut().push(line),
        }
    }

    /// Captured lines so far; empty for the stdout sink.
    pub fn lines(&self) -> Vec<String> {
        match self {
            Output::Stdout => Vec::new(),
            Output::Capture(buffer) => buffer.borrow().clone(),
        }
    }
}
