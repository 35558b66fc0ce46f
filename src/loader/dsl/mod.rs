//! Front end for the indentation-structured CPU description language.

pub mod lexer;
pub(crate) mod literals;
pub mod parser;

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::cpu::error::DslResult;
use crate::cpu::program::CpuDescription;

pub use lexer::{Lexer, Line};
pub use parser::{Parser, parse_str};

/// Reads and parses a description file from disk.
pub fn load_file(path: &Path) -> DslResult<CpuDescription> {
    debug!(path = %path.display(), "loading CPU description");
    let src = fs::read_to_string(path)?;
    parse_str(&src)
}
