//! `via compile` — ahead-of-time compilation and artifact dumps

use crate::commands::compile_source;
use crate::DumpKind;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn execute(
    file: &Path,
    dump: Option<DumpKind>,
    opt: u8,
    output: Option<&Path>,
) -> Result<i32> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let name = file.display().to_string();

    let Some(unit) = compile_source(&name, &source, opt, dump)? else {
        return Ok(1);
    };

    if let Some(output) = output {
        let image = via_codegen::encode(&unit, &source, &format!("-O{}", opt))
            .with_context(|| "image serialization failed")?;
        fs::write(output, image)
            .with_context(|| format!("cannot write {}", output.display()))?;
        log::info!("wrote {}", output.display());
    }

    Ok(0)
}
