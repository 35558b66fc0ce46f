//! Body builder for instruction and helper routines: tracks the nesting of `if`/`switch`
//! blocks until their matching `end`.

use smallvec::SmallVec;

use crate::cpu::ast::{Block, Condition, IfBlock, OpCall, Statement, SwitchBlock, SwitchCase};
use crate::cpu::diagnostic::Diagnostic;
use crate::cpu::instruction::InstructionDef;
use crate::cpu::subroutine::HelperDef;
use crate::loader::dsl::lexer::Line;
use crate::loader::dsl::literals::numeric;

/// Largest local, argument, or register width a generated C type can hold.
pub(super) const MAX_WIDTH: u32 = 64;

#[derive(Debug)]
pub(super) enum Routine {
    Instruction { table: String, def: InstructionDef },
    Helper(HelperDef),
}

impl Routine {
    fn block_mut(&mut self) -> &mut Block {
        match self {
            Routine::Instruction { def, .. } => &mut def.block,
            Routine::Helper(helper) => &mut helper.block,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Arm {
    Case(usize),
    Default,
}

#[derive(Debug)]
enum OpenBlock {
    If {
        line: usize,
        condition: Condition,
        then_block: Block,
        else_block: Option<Block>,
    },
    Switch {
        line: usize,
        param: String,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
        arm: Option<Arm>,
    },
}

impl OpenBlock {
    /// Block that receives records right now; `None` before a switch's first `case`.
    fn active(&mut self) -> Option<&mut Block> {
        match self {
            OpenBlock::If {
                then_block,
                else_block,
                ..
            } => Some(else_block.as_mut().unwrap_or(then_block)),
            OpenBlock::Switch {
                cases,
                default,
                arm,
                ..
            } => match arm {
                Some(Arm::Case(index)) => cases.get_mut(*index).map(|case| &mut case.block),
                Some(Arm::Default) => default.as_mut(),
                None => None,
            },
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            OpenBlock::If { .. } => "if",
            OpenBlock::Switch { .. } => "switch",
        }
    }

    fn line(&self) -> usize {
        match self {
            OpenBlock::If { line, .. } | OpenBlock::Switch { line, .. } => *line,
        }
    }

    fn close(self) -> Statement {
        match self {
            OpenBlock::If {
                condition,
                then_block,
                else_block,
                ..
            } => Statement::If(IfBlock {
                condition,
                then_block,
                else_block,
            }),
            OpenBlock::Switch {
                param,
                cases,
                default,
                ..
            } => Statement::Switch(SwitchBlock {
                param,
                cases,
                default,
            }),
        }
    }
}

/// Routine under construction plus its currently open blocks.
#[derive(Debug)]
pub(super) struct RoutineBuilder {
    routine: Routine,
    open: Vec<OpenBlock>,
}

impl RoutineBuilder {
    pub fn new(routine: Routine) -> Self {
        Self {
            routine,
            open: Vec::new(),
        }
    }

    /// Hands back the routine; blocks still open at this point are dropped and reported.
    pub fn finish(mut self) -> (Routine, Option<Diagnostic>) {
        let unclosed = self.open.drain(..).next().map(|open| {
            Diagnostic::new(
                open.line(),
                "unclosed-block",
                format!("'{}' block is missing its 'end'", open.keyword()),
            )
        });
        (self.routine, unclosed)
    }

    pub fn record(&mut self, line: &Line) -> Result<(), Diagnostic> {
        let args = line.args();
        match line.head() {
            "local" => {
                let (name, width) = name_width(line)?;
                self.current(line.number)?.declare(name, width);
            }
            "arg" => {
                let (name, width) = name_width(line)?;
                match (&mut self.routine, self.open.is_empty()) {
                    (Routine::Helper(helper), true) => helper.add_arg(name, width),
                    _ => {
                        return Err(Diagnostic::new(
                            line.number,
                            "misplaced-record",
                            "'arg' is only valid at the top level of a helper",
                        ));
                    }
                }
            }
            "invalid" => {
                let Routine::Instruction { def, .. } = &mut self.routine else {
                    return Err(Diagnostic::new(
                        line.number,
                        "misplaced-record",
                        "'invalid' is only valid in an instruction",
                    ));
                };
                if !self.open.is_empty() {
                    return Err(Diagnostic::new(
                        line.number,
                        "misplaced-record",
                        "'invalid' cannot appear inside an if or switch",
                    ));
                }
                exclude(def, line)?;
            }
            "if" => {
                let [condition] = args else {
                    return Err(arity(line, "if expects exactly one condition"));
                };
                self.current(line.number)?;
                self.open.push(OpenBlock::If {
                    line: line.number,
                    condition: Condition::parse(condition),
                    then_block: Block::new(),
                    else_block: None,
                });
            }
            "switch" => {
                let [param] = args else {
                    return Err(arity(line, "switch expects exactly one parameter"));
                };
                self.current(line.number)?;
                self.open.push(OpenBlock::Switch {
                    line: line.number,
                    param: param.clone(),
                    cases: Vec::new(),
                    default: None,
                    arm: None,
                });
            }
            "else" => match self.open.last_mut() {
                Some(OpenBlock::If {
                    else_block: else_block @ None,
                    ..
                }) => *else_block = Some(Block::new()),
                Some(OpenBlock::If { .. }) => {
                    return Err(Diagnostic::new(
                        line.number,
                        "misplaced-record",
                        "'else' appears twice in one if",
                    ));
                }
                _ => {
                    return Err(Diagnostic::new(
                        line.number,
                        "misplaced-record",
                        "'else' outside an if",
                    ));
                }
            },
            "case" => {
                let [value] = args else {
                    return Err(arity(line, "case expects exactly one value"));
                };
                let Some(value) = numeric(value) else {
                    return Err(Diagnostic::new(
                        line.number,
                        "malformed-record",
                        format!("case value '{value}' is not a number"),
                    ));
                };
                let Some(OpenBlock::Switch { cases, arm, .. }) = self.open.last_mut() else {
                    return Err(Diagnostic::new(
                        line.number,
                        "misplaced-record",
                        "'case' outside a switch",
                    ));
                };
                if cases.iter().any(|case| case.value == value) {
                    return Err(Diagnostic::new(
                        line.number,
                        "duplicate-case",
                        format!("case {value} appears twice in one switch"),
                    ));
                }
                cases.push(SwitchCase {
                    value,
                    block: Block::new(),
                });
                *arm = Some(Arm::Case(cases.len() - 1));
            }
            "default" => {
                let Some(OpenBlock::Switch { default, arm, .. }) = self.open.last_mut() else {
                    return Err(Diagnostic::new(
                        line.number,
                        "misplaced-record",
                        "'default' outside a switch",
                    ));
                };
                if default.is_some() {
                    return Err(Diagnostic::new(
                        line.number,
                        "duplicate-case",
                        "default appears twice in one switch",
                    ));
                }
                *default = Some(Block::new());
                *arm = Some(Arm::Default);
            }
            "end" => {
                let Some(open) = self.open.pop() else {
                    return Err(Diagnostic::new(
                        line.number,
                        "unbalanced-end",
                        "'end' without an open if or switch",
                    ));
                };
                let statement = open.close();
                self.current(line.number)?.body.push(statement);
            }
            name => {
                let call = OpCall::new(name, args.to_vec(), line.number);
                self.current(line.number)?.body.push(Statement::Op(call));
            }
        }
        Ok(())
    }

    fn current(&mut self, line: usize) -> Result<&mut Block, Diagnostic> {
        match self.open.last_mut() {
            Some(open) => open.active().ok_or_else(|| {
                Diagnostic::new(line, "orphan-directive", "record before the first case of a switch")
            }),
            None => Ok(self.routine.block_mut()),
        }
    }
}

fn arity(line: &Line, message: &str) -> Diagnostic {
    Diagnostic::new(line.number, "malformed-record", message)
}

pub(super) fn parse_width(line: usize, text: &str) -> Result<u32, Diagnostic> {
    match numeric(text) {
        Some(width) if (1..=u64::from(MAX_WIDTH)).contains(&width) => Ok(width as u32),
        _ => Err(Diagnostic::new(
            line,
            "malformed-record",
            format!("'{text}' is not a valid width"),
        )),
    }
}

fn name_width(line: &Line) -> Result<(String, u32), Diagnostic> {
    let [name, width] = line.args() else {
        return Err(arity(line, &format!("{} expects a name and a width", line.head())));
    };
    Ok((name.clone(), parse_width(line.number, width)?))
}

/// `invalid field value` excludes one value; longer pair lists exclude a combination.
fn exclude(def: &mut InstructionDef, line: &Line) -> Result<(), Diagnostic> {
    let args = line.args();
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(arity(line, "invalid expects field/value pairs"));
    }
    let mut combo: SmallVec<[(String, u64); 4]> = SmallVec::new();
    for pair in args.chunks(2) {
        let (field, value) = (&pair[0], &pair[1]);
        if def.field(field).is_none() {
            return Err(Diagnostic::new(
                line.number,
                "malformed-record",
                format!("'{}' has no field named '{field}'", def.name),
            ));
        }
        let Some(value) = numeric(value) else {
            return Err(Diagnostic::new(
                line.number,
                "malformed-record",
                format!("'{value}' is not a number"),
            ));
        };
        combo.push((field.clone(), value));
    }
    if let [(field, value)] = combo.as_slice() {
        def.exclude_value(field.clone(), *value);
    } else {
        def.exclude_combo(combo);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::dsl::lexer::Lexer;

    fn builder(routine: Routine, body: &str) -> (RoutineBuilder, Vec<Diagnostic>) {
        let mut builder = RoutineBuilder::new(routine);
        let mut diagnostics = Vec::new();
        for line in Lexer::new(body) {
            if let Err(diag) = builder.record(&line.expect("line")) {
                diagnostics.push(diag);
            }
        }
        (builder, diagnostics)
    }

    fn instruction(pattern: &str) -> Routine {
        Routine::Instruction {
            table: "main".into(),
            def: InstructionDef::from_pattern(pattern, "op").expect("pattern"),
        }
    }

    #[test]
    fn nested_blocks_close_into_their_parent() {
        let (builder, diagnostics) = builder(
            instruction("0000rrrr"),
            "\tlocal tmp 8\n\tswitch r\n\tcase 0\n\tlocal t 16\n\tif zflag\n\tmov 1 a\n\telse\n\tmov 2 a\n\tend\n\tdefault\n\tnop\n\tend\n",
        );
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let (routine, unclosed) = builder.finish();
        assert!(unclosed.is_none());
        let Routine::Instruction { def, .. } = routine else {
            panic!("instruction expected");
        };
        assert_eq!(def.block.locals.len(), 1);
        let [Statement::Switch(switch)] = def.block.body.as_slice() else {
            panic!("switch expected: {:?}", def.block.body);
        };
        let case = switch.case(0).expect("case 0");
        assert_eq!(case.locals[0].name, "t");
        let [Statement::If(branch)] = case.body.as_slice() else {
            panic!("if expected");
        };
        assert_eq!(branch.condition, Condition::Operand("zflag".into()));
        assert_eq!(branch.else_block.as_ref().map(|b| b.body.len()), Some(1));
        assert_eq!(switch.default.as_ref().map(|b| b.body.len()), Some(1));
    }

    #[test]
    fn structural_mistakes_are_reported() {
        let (builder, diagnostics) = builder(
            Routine::Helper(HelperDef::new("helper")),
            "\tend\n\tswitch x\n\tmov a b\n\tcase 1\n\tcase 1\n\tinvalid r 1\n\targ late 8\n",
        );
        let codes: Vec<_> = diagnostics.iter().map(|diag| diag.code).collect();
        assert_eq!(
            codes,
            [
                "unbalanced-end",
                "orphan-directive",
                "duplicate-case",
                "misplaced-record",
                "misplaced-record"
            ]
        );
        let (_, unclosed) = builder.finish();
        assert_eq!(unclosed.map(|diag| diag.line), Some(2));
    }

    #[test]
    fn invalid_records_feed_exclusions() {
        let (builder, diagnostics) = builder(
            instruction("01dddsss"),
            "\tinvalid d 6\n\tinvalid d 7 s 7\n\tinvalid q 1\n",
        );
        assert_eq!(diagnostics.len(), 1);
        let (Routine::Instruction { def, .. }, _) = builder.finish() else {
            panic!("instruction expected");
        };
        assert!(def.invalid_values["d"].contains(&6));
        assert_eq!(def.invalid_combos.len(), 1);
    }
}
