//! Statement tree produced by the front end for instruction and helper bodies.

use super::ops::OpKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Op(OpCall),
    If(IfBlock),
    Switch(SwitchBlock),
}

/// One directive record such as `add a b dst` or `update_flags ZC`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpCall {
    pub directive: Directive,
    pub params: Vec<String>,
    pub line: usize,
}

impl OpCall {
    pub fn new(name: &str, params: Vec<String>, line: usize) -> Self {
        Self {
            directive: Directive::parse(name),
            params,
            line,
        }
    }

    pub fn kind(&self) -> Option<OpKind> {
        match self.directive {
            Directive::Primitive(kind) => Some(kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Primitive(OpKind),
    /// `meta alias target` binds a compile-time alias for the rest of the body.
    Meta,
    /// Disassembler hints are accepted and ignored.
    Disassembly,
    /// Helper routine when one with this name exists, otherwise an external C call.
    Call(String),
}

impl Directive {
    pub fn parse(name: &str) -> Self {
        if let Some(kind) = OpKind::from_name(name) {
            return Directive::Primitive(kind);
        }
        match name {
            "meta" => Directive::Meta,
            "dis" => Directive::Disassembly,
            other => Directive::Call(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Directive::Primitive(kind) => kind.name(),
            Directive::Meta => "meta",
            Directive::Disassembly => "dis",
            Directive::Call(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDecl {
    pub name: String,
    pub width: u32,
}

impl LocalDecl {
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }
}

/// A statement list together with the locals declared directly inside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub locals: Vec<LocalDecl>,
    pub body: Vec<Statement>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, width: u32) {
        let name = name.into();
        if let Some(existing) = self.locals.iter_mut().find(|local| local.name == name) {
            existing.width = width;
        } else {
            self.locals.push(LocalDecl::new(name, width));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `>=U`, only valid directly after `cmp`.
    UnsignedGreaterEqual,
    /// `=`: equality after `cmp`, otherwise "last result is zero".
    Equal,
    /// `!=`: last result is non-zero.
    NotEqual,
    /// Boolean compile-time flag or an operand resolved at generation time.
    Operand(String),
}

impl Condition {
    pub fn parse(text: &str) -> Self {
        match text {
            ">=U" => Condition::UnsignedGreaterEqual,
            "=" => Condition::Equal,
            "!=" => Condition::NotEqual,
            other => Condition::Operand(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    pub condition: Condition,
    pub then_block: Block,
    pub else_block: Option<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub value: u64,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchBlock {
    pub param: String,
    pub cases: Vec<SwitchCase>,
    pub default: Option<Block>,
}

impl SwitchBlock {
    pub fn case(&self, value: u64) -> Option<&Block> {
        self.cases
            .iter()
            .find(|case| case.value == value)
            .map(|case| &case.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_names_map_to_catalog_entries() {
        assert_eq!(Directive::parse("add"), Directive::Primitive(OpKind::Add));
        assert_eq!(Directive::parse("meta"), Directive::Meta);
        assert_eq!(Directive::parse("dis"), Directive::Disassembly);
        assert_eq!(
            Directive::parse("fetch_byte"),
            Directive::Call("fetch_byte".into())
        );
        assert_eq!(Directive::parse("update_flags").name(), "update_flags");
    }

    #[test]
    fn block_redeclaration_keeps_single_entry() {
        let mut block = Block::new();
        block.declare("tmp", 8);
        block.declare("tmp", 16);
        assert_eq!(block.locals, vec![LocalDecl::new("tmp", 16)]);
    }
}
