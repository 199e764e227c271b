//! Interactive REPL for the Brio language.
//!
//! Each submitted form is parsed and evaluated against a persistent
//! environment. Incomplete input (an open block or bracket) continues on
//! the next line.

use brio_compiler::{Lexer, ParseError, Parser};
use brio_rt::eval::Evaluator;
use brio_rt::modules::Resolver;
use brio_rt::output::Output;
use brio_core::values::Value;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;

const PROMPT: &str = "brio> ";
const CONTINUE_PROMPT: &str = "  ... ";

const HELP: &str = "\
Brio REPL
  :help        show this help
  :quit        exit
Enter any Brio statement or expression; results print back.
Blocks may span lines; an empty line cancels pending input.";

pub fn run() -> i32 {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("runtime error: cannot start line editor: {}", e);
            return 1;
        }
    };
    println!("Brio {} — :help for help, :quit to exit", env!("CARGO_PKG_VERSION"));

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let resolver = Resolver::new(cwd.join("std"), Output::Stdout);
    let mut evaluator = Evaluator::with_resolver(resolver, cwd, Output::Stdout);
    let env = Evaluator::global_env();

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() {
            PROMPT
        } else {
            CONTINUE_PROMPT
        };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("runtime error: {}", e);
                return 1;
            }
        };

        if pending.is_empty() {
            match line.trim() {
                "" => continue,
                ":quit" | ":q" => break,
                ":help" | ":h" => {
                    println!("{}", HELP);
                    continue;
                }
                _ => {}
            }
        } else if line.trim().is_empty() {
            // An empty line abandons the pending form.
            pending.clear();
            continue;
        }

        if !pending.is_empty() {
            pending.push('\n');
        }
        pending.push_str(&line);

        let source = pending.clone();
        let mut parser = Parser::new(Lexer::new(&source).tokenize());
        let program = parser.parse_program();
        if !parser.errors().is_empty() {
            // Incomplete input keeps accumulating; real mistakes report.
            if parser
                .errors()
                .iter()
                .any(|e| matches!(e, ParseError::UnexpectedEof))
            {
                continue;
            }
            for error in parser.errors() {
                eprintln!("parse error: {}", error);
            }
            pending.clear();
            continue;
        }
        let _ = editor.add_history_entry(source.trim());
        pending.clear();

        match evaluator.eval_program(&program, &env) {
            Ok(Value::Null) => {}
            Ok(value) => println!("{}", value.inspect()),
            Err(err) => eprintln!("{} error: {}", err.kind, err.message),
        }
    }
    0
}
