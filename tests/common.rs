#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use cpugen::{CompileOptions, DslResult, GeneratedSource, Program, parse_str};

/// Accumulator machine shared by the integration tests: `a`, flag register `f`, array `main`
/// aliased `b`..`e`, zero flag in `zflag` and carry in bit 0 of `chflags`.
pub const MACHINE: &str = "\
regs
\ta 8
\tf 8
\tzflag 8
\tchflags 8
\tmain 8 b c d e
flags
\tregister f
\tZ 6 zero zflag
\tC 0 carry chflags.0
";

pub fn generate(src: &str, options: CompileOptions) -> DslResult<GeneratedSource> {
    let desc = parse_str(src)?;
    Program::new(desc, options)?.build()
}

pub fn generate_default(src: &str) -> GeneratedSource {
    generate(src, CompileOptions::default()).expect("generate")
}

/// Writes `text` to `dir/name` and returns the path.
pub fn write_source(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).expect("write source");
    path
}

/// Text of one generated routine, from its signature to its closing brace.
pub fn routine<'a>(source: &'a str, name: &str) -> &'a str {
    let start = source
        .find(&format!("\nvoid {name}("))
        .unwrap_or_else(|| panic!("routine {name} missing from:\n{source}"));
    let rest = &source[start..];
    let end = rest.find("\n}").expect("routine end");
    &rest[..end + 2]
}
