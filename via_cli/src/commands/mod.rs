//! CLI command implementations

pub mod compile;
pub mod debugger;
pub mod repl;
pub mod run;

use crate::DumpKind;
use via_codegen::Unit;
use via_common::SourceBuffer;

/// Run the front-end over `source`, honoring the dump request, rendering
/// diagnostics to stderr. `None` means compilation failed (exit code 1).
pub(crate) fn compile_source(
    name: &str,
    source: &str,
    opt: u8,
    dump: Option<DumpKind>,
) -> anyhow::Result<Option<Unit>> {
    let buffer = SourceBuffer::new(name, source);
    let (program, mut diagnostics) = via_parser::parse_source(source);
    let (sema, sema_diags) = via_sema::analyze(&program);
    diagnostics.extend(sema_diags);

    if diagnostics.has_errors() {
        eprint!("{}", diagnostics.render(&buffer));
        return Ok(None);
    }

    let unit = match via_codegen::generate(&program, &sema, opt) {
        Ok(unit) => unit,
        Err(err) => {
            eprintln!("{}: error: {}", name, err);
            return Ok(None);
        }
    };

    // Warnings still print on success.
    if !diagnostics.is_empty() {
        eprint!("{}", diagnostics.render(&buffer));
    }

    match dump {
        Some(DumpKind::Ast) => println!("{}", serde_json::to_string_pretty(&program)?),
        Some(DumpKind::Ttree) => print!("{}", via_sema::typed_tree(&program, &sema)),
        Some(DumpKind::Bytecode) => print!("{}", unit.disassemble()),
        Some(DumpKind::Constants) => print!("{}", unit.dump_constants()),
        None => {}
    }

    log::debug!(
        "compiled {}: {} instruction(s), {} constant(s), {} proto(s)",
        name,
        unit.instructions.len(),
        unit.constants.len(),
        unit.protos.len()
    );
    Ok(Some(unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;

    #[test]
    fn compile_source_yields_a_unit() {
        let unit = compile_source("<test>", "print(1 + 2)", 1, None)
            .unwrap()
            .expect("valid program compiles");
        assert!(!unit.instructions.is_empty());
    }

    #[test]
    fn compile_source_reports_failure() {
        let unit = compile_source("<test>", "print(missing)", 1, None).unwrap();
        assert!(unit.is_none());
    }

    #[test]
    fn run_executes_a_source_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "exit(7)").unwrap();
        let code = crate::commands::run::execute(file.path(), None, 1, false).unwrap();
        assert_eq!(code, 7);
    }

    #[test]
    fn run_executes_a_bytecode_image() {
        let source = "exit(5)";
        let unit = compile_source("<test>", source, 1, None).unwrap().unwrap();
        let image = via_codegen::encode(&unit, source, "-O1").unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&image).unwrap();
        let code = crate::commands::run::execute(file.path(), None, 1, true).unwrap();
        assert_eq!(code, 5);
    }

    #[test]
    fn run_rejects_a_corrupt_image() {
        let source = "exit(5)";
        let unit = compile_source("<test>", source, 1, None).unwrap().unwrap();
        let mut image = via_codegen::encode(&unit, source, "-O1").unwrap();
        let last = image.len() - 1;
        image[last] ^= 0xFF;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&image).unwrap();
        let code = crate::commands::run::execute(file.path(), None, 1, true).unwrap();
        assert_eq!(code, 1);
    }

    #[test]
    fn compile_command_writes_an_image() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("prog.via");
        std::fs::write(&src_path, "print(1)").unwrap();
        let out_path = dir.path().join("prog.viac");
        let code =
            crate::commands::compile::execute(&src_path, None, 1, Some(out_path.as_path())).unwrap();
        assert_eq!(code, 0);
        let bytes = std::fs::read(&out_path).unwrap();
        assert!(via_codegen::is_image(&bytes));
    }
}
