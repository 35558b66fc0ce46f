//! Line-oriented parser that turns a description file into a [`CpuDescription`].
//!
//! Unindented lines open a construct (`regs`, `flags`, `info`, `declare`, a helper name, or an
//! instruction pattern); indented lines are records of whatever construct is open. Structural
//! problems are collected for the whole file and reported together.

mod blocks;
mod sections;

use tracing::debug;

use crate::cpu::diagnostic::Diagnostic;
use crate::cpu::error::{DslError, DslResult};
use crate::cpu::instruction::InstructionDef;
use crate::cpu::program::CpuDescription;
use crate::cpu::subroutine::HelperDef;

use super::lexer::{Lexer, Line};
use blocks::{Routine, RoutineBuilder};

/// Table instructions land in when their header names none.
pub const MAIN_TABLE: &str = "main";

#[derive(Debug)]
enum Section {
    None,
    Registers,
    Flags,
    Info,
    Declare,
    Routine(RoutineBuilder),
    /// Header line was rejected; its records are skipped without further noise.
    Skipped,
}

pub struct Parser<'src> {
    lexer: Lexer<'src>,
    desc: CpuDescription,
    section: Section,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            lexer: Lexer::new(source),
            desc: CpuDescription::default(),
            section: Section::None,
            diagnostics: Vec::new(),
        }
    }

    pub fn parse_description(mut self) -> DslResult<CpuDescription> {
        while let Some(line) = self.lexer.next_line() {
            match line {
                Ok(line) if line.indented => self.record(&line),
                Ok(line) => self.header(&line),
                Err(diag) => self.diagnostics.push(diag),
            }
        }
        self.close_section();
        if !self.diagnostics.is_empty() {
            return Err(DslError::Diagnostics(self.diagnostics));
        }
        debug!(
            tables = self.desc.instructions.len(),
            instructions = self.desc.instructions.values().map(Vec::len).sum::<usize>(),
            helpers = self.desc.helpers.len(),
            "parsed CPU description"
        );
        Ok(self.desc)
    }

    fn header(&mut self, line: &Line) {
        self.close_section();
        self.section = match line.parts.as_slice() {
            [keyword] => match keyword.as_str() {
                "regs" => Section::Registers,
                "flags" => Section::Flags,
                "info" => Section::Info,
                "declare" => Section::Declare,
                name => {
                    let mut helper = HelperDef::new(name);
                    helper.line = line.number;
                    Section::Routine(RoutineBuilder::new(Routine::Helper(helper)))
                }
            },
            [pattern, name] => self.instruction(line, MAIN_TABLE, pattern, name),
            [table, pattern, name] => self.instruction(line, table, pattern, name),
            _ => {
                self.diagnostics.push(Diagnostic::new(
                    line.number,
                    "malformed-record",
                    "expected a section name, 'pattern name', or 'table pattern name'",
                ));
                Section::Skipped
            }
        };
    }

    fn instruction(&mut self, line: &Line, table: &str, pattern: &str, name: &str) -> Section {
        match InstructionDef::from_pattern(pattern, name) {
            Ok(mut def) => {
                def.line = line.number;
                Section::Routine(RoutineBuilder::new(Routine::Instruction {
                    table: table.to_string(),
                    def,
                }))
            }
            Err(message) => {
                self.diagnostics
                    .push(Diagnostic::new(line.number, "invalid-pattern", message));
                Section::Skipped
            }
        }
    }

    fn record(&mut self, line: &Line) {
        let result = match &mut self.section {
            Section::None => Err(Diagnostic::new(
                line.number,
                "orphan-directive",
                format!("'{}' does not belong to any section", line.head()),
            )),
            Section::Registers => sections::register_record(&mut self.desc.registers, line),
            Section::Flags => sections::flag_record(&mut self.desc.flags, line),
            Section::Info => {
                sections::info_record(&mut self.desc.info, line);
                Ok(())
            }
            Section::Declare => {
                sections::declare_record(&mut self.desc.declares, line);
                Ok(())
            }
            Section::Routine(builder) => builder.record(line),
            Section::Skipped => Ok(()),
        };
        if let Err(diag) = result {
            self.diagnostics.push(diag);
        }
    }

    fn close_section(&mut self) {
        let Section::Routine(builder) = std::mem::replace(&mut self.section, Section::None) else {
            return;
        };
        let (routine, unclosed) = builder.finish();
        self.diagnostics.extend(unclosed);
        match routine {
            Routine::Instruction { table, def } => {
                self.desc.instructions.entry(table).or_default().push(def);
            }
            Routine::Helper(helper) => {
                if let Some(existing) = self.desc.helpers.get(&helper.name) {
                    self.diagnostics.push(Diagnostic::new(
                        helper.line,
                        "duplicate-helper",
                        format!(
                            "helper '{}' was already defined on line {}",
                            helper.name, existing.line
                        ),
                    ));
                    return;
                }
                self.desc.helpers.insert(helper.name.clone(), helper);
            }
        }
    }
}

/// Parses a whole description held in memory.
pub fn parse_str(src: &str) -> DslResult<CpuDescription> {
    Parser::new(src).parse_description()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::ast::Statement;

    const SAMPLE: &str = "\
info
\tprefix z80_
\topcode_size 8
\tbody z80_run_op
regs
\tmain 8 b c d e h l
\ta 8
\tflags 8
flags
\tregister flags
\tZ 6 zero zflag

# helpers are inlined at their call sites
fetch
\targ dst 8
\tlocal tmp 8
\tmov 0 tmp
\tmov tmp dst

z80_run_op
\tdispatch scratch1

00000000 nop
\tcycles 4

01dddsss ld_r_r
\tinvalid d 6
\tinvalid s 6
\tmov main.s main.d

cb 00000rrr rlc_r
\tswitch r
\tcase 6
\tcycles 15
\tdefault
\tcycles 8
\tend
";

    #[test]
    fn sample_description_parses() {
        let desc = parse_str(SAMPLE).expect("parse");
        assert_eq!(desc.info["prefix"], ["z80_"]);
        assert_eq!(desc.flags.register.as_deref(), Some("flags"));
        assert_eq!(desc.instructions[MAIN_TABLE].len(), 2);
        assert_eq!(desc.instructions["cb"].len(), 1);
        let fetch = desc.helpers.get("fetch").expect("fetch");
        assert_eq!(fetch.args.len(), 1);
        assert_eq!(fetch.block.locals.len(), 1);
        assert_eq!(fetch.block.body.len(), 2);
        assert!(desc.helpers.contains_key("z80_run_op"));
        let rlc = &desc.instructions["cb"][0];
        assert!(matches!(rlc.block.body.as_slice(), [Statement::Switch(_)]));
        let ld = &desc.instructions[MAIN_TABLE][1];
        assert_eq!(ld.enumerate().count(), 49);
    }

    #[test]
    fn diagnostics_are_collected_for_the_whole_file() {
        let src = "\tmov a b\nregs\n\ta 8\n\ta 8\nx0x1 bad\n\tnop\nop\n\tif zflag\n\tnop\n";
        let Err(DslError::Diagnostics(diagnostics)) = parse_str(src) else {
            panic!("diagnostics expected");
        };
        let codes: Vec<_> = diagnostics.iter().map(|diag| diag.code).collect();
        assert_eq!(
            codes,
            ["orphan-directive", "register-conflict", "invalid-pattern", "unclosed-block"]
        );
        assert_eq!(diagnostics[0].line, 1);
        assert_eq!(diagnostics[3].line, 8);
    }

    #[test]
    fn helper_defined_twice_is_reported() {
        let Err(DslError::Diagnostics(diagnostics)) = parse_str("h\n\tnop\nh\n\tnop\n") else {
            panic!("diagnostics expected");
        };
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, "duplicate-helper");
        assert_eq!(diagnostics[0].line, 3);
    }
}
