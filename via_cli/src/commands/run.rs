//! `via run` — compile (or load an image) and execute

use crate::commands::compile_source;
use crate::DumpKind;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn execute(
    file: &Path,
    dump: Option<DumpKind>,
    opt: u8,
    allow_direct_bin_execution: bool,
) -> Result<i32> {
    let bytes = fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;

    // Files carrying the %viac% sentinel execute directly.
    if via_codegen::is_image(&bytes) {
        if !allow_direct_bin_execution {
            log::warn!(
                "{} is a compiled bytecode image; executing it directly \
                 (pass --allow-direct-bin-execution to silence this warning)",
                file.display()
            );
        }
        let unit = match via_codegen::decode(&bytes) {
            Ok(unit) => unit,
            Err(err) => {
                eprintln!("{}: error: {}", file.display(), err);
                return Ok(1);
            }
        };
        return Ok(via_vm::execute(&unit));
    }

    let source = String::from_utf8(bytes)
        .with_context(|| format!("{} is not valid UTF-8 source", file.display()))?;
    let Some(unit) = compile_source(&file.display().to_string(), &source, opt, dump)? else {
        return Ok(1);
    };
    Ok(via_vm::execute(&unit))
}
