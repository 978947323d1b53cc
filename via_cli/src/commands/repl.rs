//! `via repl` — line-oriented read-eval-print loop
//!
//! Declaration lines (`var`/`const`/`fn`) accumulate into the session
//! context and are re-compiled in front of every later input line, so
//! bindings persist across inputs.

use crate::commands::compile_source;
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const PROMPT: &str = "via> ";

pub fn execute() -> Result<i32> {
    println!("via repl — :help for commands, :quit to leave");
    let mut editor = DefaultEditor::new()?;
    let mut session: Vec<String> = Vec::new();

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                match input {
                    ":quit" | ":q" => break,
                    ":help" | ":h" => {
                        print_help();
                        continue;
                    }
                    _ => {}
                }
                let _ = editor.add_history_entry(input);

                let mut source = session.join("\n");
                if !source.is_empty() {
                    source.push('\n');
                }
                source.push_str(input);

                match compile_source("<repl>", &source, 1, None)? {
                    Some(unit) => {
                        via_vm::execute(&unit);
                        if is_declaration(input) {
                            session.push(input.to_string());
                        }
                    }
                    None => {
                        // Diagnostics already rendered; the bad line is not
                        // added to the session.
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(0)
}

fn is_declaration(line: &str) -> bool {
    line.starts_with("var ") || line.starts_with("const ") || line.starts_with("fn ")
}

fn print_help() {
    println!(":help, :h   show this help");
    println!(":quit, :q   leave the repl");
    println!("declarations persist across lines; other statements run once");
}
