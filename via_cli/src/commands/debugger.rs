//! `via debugger` — instruction-level inspection of a loaded VM

use crate::commands::compile_source;
use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::path::Path;
use via_codegen::{Instruction, Opcode, OPERAND_NONE};
use via_vm::{display_value, Value, Vm, VmStatus};

const PROMPT: &str = "(viadbg) ";

pub fn execute(file: &Path) -> Result<i32> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let Some(unit) = compile_source(&file.display().to_string(), &source, 1, None)? else {
        return Ok(1);
    };

    println!(
        "via debugger — {} instruction(s), {} proto(s); type 'help'",
        unit.instructions.len(),
        unit.protos.len()
    );

    let mut vm = Vm::new(&unit);
    let mut editor = DefaultEditor::new()?;

    loop {
        let line = match editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or("");

        match command {
            "step" | "s" => match vm.step() {
                Ok(VmStatus::Halted) => println!("halted (exit {})", vm.exit_code()),
                Ok(VmStatus::Running) => print_location(&vm),
                Err(err) => println!("uncaught error: {}", err),
            },
            "continue" | "c" => match vm.run() {
                Ok(code) => println!("halted (exit {})", code),
                Err(err) => {
                    println!("uncaught error: {}", err);
                    if let Some(tb) = vm.traceback() {
                        println!("{}", tb);
                    }
                }
            },
            "regs" => {
                for r in 0..256u16 {
                    let value = vm.register(r);
                    if !matches!(value, Value::Nil) {
                        println!("r{:<3} = {}", r, display_value(value));
                    }
                }
            }
            "printr" => match words.next().and_then(|w| w.parse::<u16>().ok()) {
                Some(r) if r < 256 => println!("r{} = {}", r, display_value(vm.register(r))),
                _ => println!("usage: printr N (0..255)"),
            },
            "locals" => {
                for (slot, value) in vm.local_values().iter().enumerate() {
                    println!("local {:<3} = {}", slot, display_value(value));
                }
            }
            "upvs" => {
                let upvalues = vm.upvalue_values();
                if upvalues.is_empty() {
                    println!("no upvalues in the current frame");
                }
                for (i, value) in upvalues.iter().enumerate() {
                    println!("upvalue {:<3} = {}", i, display_value(value));
                }
            }
            "callstack" | "bt" => {
                for (depth, frame) in vm.frames().iter().enumerate().rev() {
                    let what = match &frame.closure {
                        Some(closure) => format!("function @{}", closure.entry),
                        None => "<main>".to_string(),
                    };
                    println!("#{} {} (base r{})", depth, what, frame.base);
                }
            }
            "pc" => print_location(&vm),
            "exec" => match parse_exec(&mut words) {
                Some(instr) => match vm.execute_instruction(instr) {
                    Ok(()) => println!("ok"),
                    Err(err) => println!("error: {}", err),
                },
                None => println!("usage: exec OPCODE [A] [B] [C]"),
            },
            "help" | "h" => print_help(),
            "quit" | "q" => break,
            other => println!("unknown command '{}'; type 'help'", other),
        }
    }
    Ok(vm.exit_code())
}

fn print_location(vm: &Vm<'_>) {
    println!("pc = {}", vm.pc());
}

fn parse_exec<'a>(words: &mut impl Iterator<Item = &'a str>) -> Option<Instruction> {
    let op = Opcode::parse(words.next()?)?;
    let mut operands = [OPERAND_NONE; 3];
    for slot in operands.iter_mut() {
        match words.next() {
            Some(word) => *slot = word.parse().ok()?,
            None => break,
        }
    }
    Some(Instruction::new(op, operands[0], operands[1], operands[2]))
}

fn print_help() {
    println!("step, s       execute one instruction");
    println!("continue, c   run to completion or error");
    println!("regs          non-nil registers of the current frame");
    println!("printr N      one register");
    println!("locals        the current frame's local slots");
    println!("upvs          the current closure's upvalues");
    println!("callstack     frame stack, innermost first");
    println!("pc            current program counter");
    println!("exec OP A B C run one hand-built instruction");
    println!("quit, q       leave the debugger");
}
