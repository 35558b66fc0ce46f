use std::fmt;

use super::diagnostic::Diagnostic;

/// Represents any failure that can occur while loading a CPU description or generating code
/// from it.
#[derive(Debug)]
pub enum DslError {
    Io(std::io::Error),
    /// Structural problems collected over a whole parse pass.
    Diagnostics(Vec<Diagnostic>),
    ArgumentCount {
        routine: String,
        expected: usize,
        found: usize,
    },
    UndefinedBoolean(String),
    UndefinedFlag(char),
    MissingCarryFlag { op: &'static str },
    UnsupportedDispatch(String),
    InsufficientOperands { op: String, params: Vec<String> },
    InvalidFlagUpdate { directive: String, reason: String },
    AmbiguousOpcode {
        table: String,
        value: u64,
        first: String,
        second: String,
    },
    OpcodeOutOfRange { table: String, value: u64, size: u32 },
    MissingRoutine { role: &'static str, name: String },
    Generation(String),
}

pub type DslResult<T> = Result<T, DslError>;

impl From<std::io::Error> for DslError {
    fn from(err: std::io::Error) -> Self {
        DslError::Io(err)
    }
}

impl fmt::Display for DslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DslError::Io(err) => write!(f, "I/O error: {err}"),
            DslError::Diagnostics(diagnostics) => {
                write!(f, "{} structural error(s)", diagnostics.len())?;
                for diag in diagnostics {
                    write!(f, "\n  {diag}")?;
                }
                Ok(())
            }
            DslError::ArgumentCount {
                routine,
                expected,
                found,
            } => write!(
                f,
                "{routine} expects {expected} arguments, but was called with {found}"
            ),
            DslError::UndefinedBoolean(name) => {
                write!(f, "{name} is not a defined boolean flag")
            }
            DslError::UndefinedFlag(flag) => write!(f, "undefined flag {flag}"),
            DslError::MissingCarryFlag { op } => {
                write!(f, "{op} requires a defined carry flag")
            }
            DslError::UnsupportedDispatch(kind) => {
                write!(f, "unsupported dispatch type {kind}")
            }
            DslError::InsufficientOperands { op, params } => {
                write!(f, "insufficient params for {op} ({})", params.join(", "))
            }
            DslError::InvalidFlagUpdate { directive, reason } => {
                write!(f, "invalid update_flags '{directive}': {reason}")
            }
            DslError::AmbiguousOpcode {
                table,
                value,
                first,
                second,
            } => write!(
                f,
                "opcode 0x{value:X} in table '{table}' is claimed by both '{first}' and '{second}'"
            ),
            DslError::OpcodeOutOfRange { table, value, size } => write!(
                f,
                "opcode 0x{value:X} does not fit the {size}-bit table '{table}'"
            ),
            DslError::MissingRoutine { role, name } => {
                write!(f, "{role} routine '{name}' is not defined")
            }
            DslError::Generation(msg) => write!(f, "generation error: {msg}"),
        }
    }
}

impl std::error::Error for DslError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DslError::Io(err) => Some(err),
            _ => None,
        }
    }
}
