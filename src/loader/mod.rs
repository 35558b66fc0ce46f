//! Description file loading (lexer and parser).

pub mod dsl;

pub use dsl::{Lexer, Line, Parser, load_file, parse_str};
