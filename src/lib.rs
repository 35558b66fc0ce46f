//! Generator of C interpreter cores from CPU description files.

pub mod cli;
pub mod cpu;
pub mod loader;

pub use cpu::{CompileOptions, CpuDescription, Dispatch, DslError, DslResult, GeneratedSource, Program};
pub use loader::{load_file, parse_str};
