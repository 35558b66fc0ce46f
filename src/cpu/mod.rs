//! CPU description model and the C interpreter generator built on it.

pub mod ast;
pub mod codegen;
pub mod diagnostic;
pub mod error;
pub mod flags;
pub mod instruction;
pub mod ops;
pub mod program;
pub mod registers;
pub mod scope;
pub mod subroutine;

pub use codegen::{GeneratedHeader, GeneratedSource};
pub use diagnostic::Diagnostic;
pub use error::{DslError, DslResult};
pub use program::{CompileOptions, CpuDescription, Dispatch, Program};
