use std::io::{self, Write};
use std::process::ExitCode;

use rlox::error::InterpretationError;
use rlox::vm::Vm;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("Usage: rlox [path]");
            ExitCode::from(64)
        }
    }
}

/// Reads one line of source at a time from stdin and interprets it immediately, printing a `>`
/// prompt before each line. State (globals, heap) persists across lines within one session.
fn repl() -> ExitCode {
    let mut vm = Vm::new();
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return ExitCode::from(70);
        }

        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => {
                println!();
                return ExitCode::SUCCESS;
            }
            Ok(_) => {
                // Errors from a single REPL line are reported but don't end the session.
                let _ = vm.interpret(&line);
            }
            Err(err) => {
                eprintln!("Error reading from stdin: {err}");
                return ExitCode::from(74);
            }
        }
    }
}

/// Reads the entire contents of `path` and interprets it as one program, exiting with a status
/// code that reflects whether compilation or execution failed.
fn run_file(path: &str) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not open file \"{path}\": {err}");
            return ExitCode::from(74);
        }
    };

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(InterpretationError::CompileError) => ExitCode::from(65),
        Err(InterpretationError::RuntimeError) => ExitCode::from(70),
    }
}
