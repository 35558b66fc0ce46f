//! Command-line interface: argument parsing and the load/generate/write pipeline.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, ValueEnum};
use tracing::{debug, info};

use crate::cpu::codegen::GeneratedSource;
use crate::cpu::error::DslResult;
use crate::cpu::program::{CompileOptions, Dispatch, Program};
use crate::loader::load_file;

#[derive(Parser, Debug)]
#[command(
    name = "cpugen",
    version,
    about = "Generate a C interpreter core from a CPU description file"
)]
pub struct Cli {
    /// CPU description file.
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,
    /// Define a boolean flag for `if` blocks, e.g. `-D z80_undoc=1`.
    #[arg(
        short = 'D',
        long = "define",
        value_name = "NAME[=VALUE]",
        value_parser = parse_define,
        action = ArgAction::Append
    )]
    pub defines: Vec<(String, bool)>,
    #[arg(short = 'd', long = "dispatch", value_enum, default_value_t = DispatchArg::Call)]
    pub dispatch: DispatchArg,
    /// Write the C source here instead of stdout; the header is placed next to it.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Disable constant folding.
    #[arg(long = "no-fold", action = ArgAction::SetTrue)]
    pub no_fold: bool,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DispatchArg {
    Call,
    Switch,
    Goto,
}

impl From<DispatchArg> for Dispatch {
    fn from(arg: DispatchArg) -> Self {
        match arg {
            DispatchArg::Call => Dispatch::Call,
            DispatchArg::Switch => Dispatch::Switch,
            DispatchArg::Goto => Dispatch::Goto,
        }
    }
}

/// `name` alone defines a true flag; `name=value` takes a boolean spelling.
pub fn parse_define(text: &str) -> Result<(String, bool), String> {
    let (name, value) = match text.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (text, None),
    };
    if name.is_empty() {
        return Err(format!("'{text}' does not name a flag"));
    }
    let value = match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        Some(other) => return Err(format!("'{other}' is not a boolean value")),
    };
    Ok((name.to_string(), value))
}

impl Cli {
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            dispatch: self.dispatch.into(),
            defines: self.defines.clone(),
            fold: !self.no_fold,
        }
    }

    /// Where the header lands: beside the output file, or relative to the working directory.
    pub fn header_path(&self, header: &str) -> PathBuf {
        match self.output.as_deref().and_then(Path::parent) {
            Some(dir) => dir.join(header),
            None => PathBuf::from(header),
        }
    }
}

/// Loads and generates without touching the filesystem beyond reading the source.
pub fn compile(cli: &Cli) -> DslResult<GeneratedSource> {
    let desc = load_file(&cli.source)?;
    let program = Program::new(desc, cli.compile_options())?;
    info!(
        dispatch = program.options.dispatch.name(),
        prefix = program.info.prefix.as_str(),
        "generating interpreter"
    );
    program.build()
}

/// Writes a finished compilation: header first, then the source file or stdout.
pub fn write_outputs(cli: &Cli, generated: &GeneratedSource) -> DslResult<()> {
    if let Some(header) = &generated.header {
        let path = cli.header_path(&header.path);
        debug!(path = %path.display(), "writing header");
        fs::write(&path, &header.text)?;
    }
    match &cli.output {
        Some(path) => {
            debug!(path = %path.display(), "writing source");
            fs::write(path, &generated.source)?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(generated.source.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

pub fn run(cli: &Cli) -> DslResult<()> {
    let generated = compile(cli)?;
    write_outputs(cli, &generated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_spellings() {
        assert_eq!(parse_define("z80_undoc"), Ok(("z80_undoc".into(), true)));
        assert_eq!(parse_define("fast=0"), Ok(("fast".into(), false)));
        assert_eq!(parse_define("fast=Off"), Ok(("fast".into(), false)));
        assert_eq!(parse_define("fast=yes"), Ok(("fast".into(), true)));
        assert!(parse_define("fast=maybe").is_err());
        assert!(parse_define("=1").is_err());
    }

    #[test]
    fn arguments_map_to_compile_options() {
        let cli = Cli::try_parse_from([
            "cpugen", "z80.cpu", "-D", "undoc=1", "-D", "dynarec=off", "-d", "goto", "--no-fold",
            "-o", "out/z80.c", "-vv",
        ])
        .expect("parse");
        let options = cli.compile_options();
        assert_eq!(options.dispatch, Dispatch::Goto);
        assert_eq!(
            options.defines,
            [("undoc".to_string(), true), ("dynarec".to_string(), false)]
        );
        assert!(!options.fold);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.header_path("z80.h"), PathBuf::from("out/z80.h"));
    }

    #[test]
    fn header_defaults_to_working_directory() {
        let cli = Cli::try_parse_from(["cpugen", "z80.cpu"]).expect("parse");
        assert_eq!(cli.header_path("z80.h"), PathBuf::from("z80.h"));
        assert_eq!(cli.compile_options(), CompileOptions::default());
    }
}
