use super::ast::{Block, LocalDecl};

/// Helper routine that is inlined at every call site.
#[derive(Clone, Debug, PartialEq)]
pub struct HelperDef {
    pub name: String,
    pub args: Vec<LocalDecl>,
    pub block: Block,
    pub line: usize,
}

impl HelperDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            block: Block::new(),
            line: 0,
        }
    }

    pub fn add_arg(&mut self, name: impl Into<String>, width: u32) {
        self.args.push(LocalDecl::new(name, width));
    }
}

/// C name of a helper local once inlined into a caller.
pub fn mangle_local(helper: &str, local: &str) -> String {
    format!("{helper}_{local}")
}
