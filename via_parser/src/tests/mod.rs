//! Test modules for the via parser

pub mod expr_test;
pub mod recovery_test;
pub mod stmt_test;

use crate::{parse_source, Program};
use via_common::Diagnostics;

pub(crate) fn parse(source: &str) -> (Program<'_>, Diagnostics) {
    parse_source(source)
}

pub(crate) fn parse_ok(source: &str) -> Program<'_> {
    let (program, diagnostics) = parse(source);
    assert!(
        !diagnostics.has_errors(),
        "unexpected parse errors: {:?}",
        diagnostics.messages
    );
    program
}
