use std::fs;

use anyhow::{Context, Result, bail};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use monkey::backend;
use monkey::compiler::Compiler;
use monkey::evaluator;
use monkey::parser;
use monkey::runtime::{Environment, Value};
use monkey::vm::{GLOBALS_SIZE, VM, VmError};

const PROMPT: &str = ">> ";

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut backend_name = "vm".to_string();
    let mut inline_source: Option<String> = None;
    let mut input_path: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--backend" | "-b" => {
                backend_name = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing backend name after {arg}"))?;
            }
            "--evaluate" | "-e" => {
                inline_source = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("Missing source after {arg}"))?,
                );
            }
            _ => {
                input_path = Some(arg);
                if args.next().is_some() {
                    bail!("Only one input file is supported");
                }
                break;
            }
        }
    }

    let source = match (inline_source, input_path) {
        (Some(source), _) => Some(source),
        (None, Some(path)) => {
            Some(fs::read_to_string(&path).with_context(|| format!("Reading {path}"))?)
        }
        (None, None) => None,
    };

    match source {
        Some(source) => run_source(&source, &backend_name),
        None => run_repl(&backend_name),
    }
}

fn run_source(source: &str, backend_name: &str) -> Result<()> {
    let (program, errors) = parser::parse(source);
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("\t{error}");
        }
        bail!("{} parse error(s)", errors.len());
    }

    for mut backend in backend::backends() {
        if backend.name() == backend_name {
            let value = backend.run(&program)?;
            if !matches!(value, Value::Null) {
                println!("{}", value.inspect());
            }
            return Ok(());
        }
    }

    bail!("Unknown backend '{backend_name}'")
}

fn run_repl(backend_name: &str) -> Result<()> {
    match backend_name {
        "vm" => repl_vm(),
        "evaluator" => repl_evaluator(),
        other => bail!("Unknown backend '{other}'"),
    }
}

/// Line-at-a-time prompt on the bytecode backend. Symbols, constants
/// and globals carry over so later lines see earlier bindings.
fn repl_vm() -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let (mut symbol_table, mut constants) = Compiler::new().into_state();
    let mut globals = vec![Value::Null; GLOBALS_SIZE];

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                editor.add_history_entry(line.as_str())?;

                let (program, errors) = parser::parse(&line);
                if !errors.is_empty() {
                    for error in &errors {
                        println!("\t{error}");
                    }
                    continue;
                }

                let mut compiler = Compiler::new_with_state(symbol_table, constants);
                let compiled = compiler.compile(&program);
                let bytecode = compiler.bytecode();
                (symbol_table, constants) = compiler.into_state();
                if let Err(error) = compiled {
                    println!("{error}");
                    continue;
                }

                let mut vm = VM::with_globals(bytecode, globals);
                match vm.run() {
                    Ok(()) => println!("{}", vm.last_popped().inspect()),
                    Err(VmError::Runtime(message)) => println!("{message}"),
                    Err(error) => println!("{error}"),
                }
                globals = vm.into_globals();
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(error) => return Err(error.into()),
        }
    }
    Ok(())
}

/// Same prompt on the tree-walking backend with one persistent
/// environment.
fn repl_evaluator() -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let env = Environment::new();

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                editor.add_history_entry(line.as_str())?;

                let (program, errors) = parser::parse(&line);
                if !errors.is_empty() {
                    for error in &errors {
                        println!("\t{error}");
                    }
                    continue;
                }

                let value = evaluator::eval(&program, &env);
                println!("{}", value.inspect());
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(error) => return Err(error.into()),
        }
    }
    Ok(())
}
