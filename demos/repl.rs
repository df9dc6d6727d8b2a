use dust::builtins::Builtins;
use dust::bytecode::disassemble;
use dust::checker::Checker;
use dust::compiler::Compiler;
use dust::parser::parse_program;
use dust::vm::VirtualMachine;
use dust::{Config, Error, OwnershipLog, Value};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;

fn main() {
    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

#[derive(Debug, Default)]
struct Options {
    show_log: bool,
    show_json: bool,
    show_bytecode: bool,
}

/// Unclosed `{` and `(` in the pending input, ignoring string literals and comments
fn open_delimiters(source: &str) -> i64 {
    let mut depth = 0;
    for line in source.lines() {
        let mut in_string = false;
        let mut escaped = false;
        let mut previous = None;
        for c in line.chars() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
            } else {
                match c {
                    '/' if previous == Some('/') => break,
                    '"' => in_string = true,
                    '{' | '(' => depth += 1,
                    '}' | ')' => depth -= 1,
                    _ => {}
                }
            }
            previous = Some(c);
        }
    }
    depth
}

fn run_program(source: &str, options: &Options) -> Result<(Value, OwnershipLog), Error> {
    let mut program = parse_program(source)?;
    Checker::new().type_program(&mut program)?;
    let (instructions, log) = Compiler::new().compile_program(&program)?;
    if options.show_bytecode {
        print!("{}", disassemble(&instructions));
    }
    let mut vm = VirtualMachine::new(Builtins::default(), &Config::default())?;
    let value = vm.run(&instructions)?;
    Ok((value, log))
}

fn run_repl() {
    println!("Dust: a Rust subset with compile-time ownership tracking");
    println!("Enter a complete program, e.g.: let x = String::from(\"hi\"); let y = x; y;");
    println!("Unclosed braces continue on the next line.");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            return;
        }
    };
    let mut options = Options::default();
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "dust> " } else { "...   " };
        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if pending.is_empty() {
                    if trimmed.is_empty() {
                        continue;
                    }
                    match trimmed {
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":log" => {
                            options.show_log = !options.show_log;
                            println!("ownership log {}", on_off(options.show_log));
                            continue;
                        }
                        ":json" => {
                            options.show_json = !options.show_json;
                            println!("JSON ownership log {}", on_off(options.show_json));
                            continue;
                        }
                        ":bytecode" => {
                            options.show_bytecode = !options.show_bytecode;
                            println!("bytecode listing {}", on_off(options.show_bytecode));
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');
                if open_delimiters(&pending) > 0 {
                    continue;
                }

                let source = std::mem::take(&mut pending);
                let _ = rl.add_history_entry(source.trim());

                match run_program(&source, &options) {
                    Ok((value, log)) => {
                        println!("{value}");
                        if options.show_log && !log.is_empty() {
                            print!("{log}");
                        }
                        if options.show_json {
                            match log.to_json() {
                                Ok(json) => println!("{json}"),
                                Err(e) => println!("Error: {e}"),
                            }
                        }
                    }
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn print_help() {
    println!("Each input is checked, compiled and run as a whole program.");
    println!("  :help      - Show this help message");
    println!("  :log       - Toggle printing of ownership transfers");
    println!("  :json      - Toggle printing of the ownership log as JSON");
    println!("  :bytecode  - Toggle printing of the compiled instructions");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Supported constructs:");
    println!("  Types: i32, bool, String, &T, &mut T");
    println!("  Declarations: let, let mut, const, fn");
    println!("  Control: if / else if / else, while, return");
    println!("  Builtins: display(x), I32_MAX, I32_MIN");
    println!();
    println!("Examples:");
    println!("  fn sq(n: i32) -> i32 {{ return n * n; }} sq(7);");
    println!("  let mut x = 1; let r = &mut x; *r = 5; x;");
    println!("  let x = String::from(\"abc\"); let y = x; x;   // use of moved value x");
    println!();
}
