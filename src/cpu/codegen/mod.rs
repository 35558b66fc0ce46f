//! C code generation for a loaded [`Program`]: dispatch tables, one body per concrete opcode,
//! the execute loop and the companion header.

pub mod body;
pub mod context;
pub mod header;
pub mod resolve;

use tracing::{debug, warn};

use self::body::BodyGen;
use self::context::BodyContext;
use self::resolve::{Binding, Bindings};
use super::error::{DslError, DslResult};
use super::flags::{coalesce, disperse, render_moves};
use super::instruction::InstructionDef;
use super::program::{Dispatch, Program};
use super::scope::FrameKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedHeader {
    /// Path from the `header` info key.
    pub path: String,
    pub text: String,
}

/// Output of one compilation, produced in full before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    pub source: String,
    pub header: Option<GeneratedHeader>,
}

/// One dispatch table: routine name per slot plus the bodies in slot order.
struct Table {
    name: String,
    slots: Vec<Option<String>>,
    bodies: Vec<String>,
}

impl Program {
    pub fn build(&self) -> DslResult<GeneratedSource> {
        let generator = BodyGen::new(self);
        let unit = match self.options.dispatch {
            Dispatch::Call => self.build_call(&generator)?,
            Dispatch::Goto => self.build_goto(&generator)?,
            Dispatch::Switch => {
                return Err(DslError::UnsupportedDispatch(self.options.dispatch.name().into()));
            }
        };
        let mut source = String::new();
        if let Some(header) = &self.info.header {
            source.push_str(&format!("#include \"{header}\"\n"));
        }
        source.push_str("#include \"util.h\"\n#include <stdlib.h>\n");
        for include in &self.info.includes {
            source.push_str(&format!("#include \"{include}\"\n"));
        }
        source.push_str(&unit);
        source.push('\n');
        let header = self.info.header.as_ref().map(|path| GeneratedHeader {
            path: path.clone(),
            text: header::render(self, path),
        });
        Ok(GeneratedSource { source, header })
    }

    /// Extra tables first, then `main`.
    fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .info
            .extra_tables
            .iter()
            .map(String::as_str)
            .filter(|name| *name != "main")
            .collect();
        names.dedup();
        names.push("main");
        for table in self.instructions.keys() {
            if !names.contains(&table.as_str()) {
                warn!(table = table.as_str(), "instructions for a table missing from extra_tables are ignored");
            }
        }
        names
    }

    fn table(&self, generator: &BodyGen<'_>, name: &str) -> DslResult<Table> {
        let size = self.info.table_size();
        let mut owners: Vec<Option<&InstructionDef>> = vec![None; size];
        let mut bodies: Vec<Option<String>> = vec![None; size];
        let mut defs: Vec<&InstructionDef> = self
            .instructions
            .get(name)
            .map(|defs| defs.iter().collect())
            .unwrap_or_default();
        defs.sort_by_key(|def| def.specificity());
        for def in defs {
            for value in def.enumerate() {
                let slot = usize::try_from(value)
                    .ok()
                    .filter(|slot| *slot < size)
                    .ok_or_else(|| DslError::OpcodeOutOfRange {
                        table: name.to_string(),
                        value,
                        size: self.info.opcode_size,
                    })?;
                match owners[slot] {
                    None => {
                        owners[slot] = Some(def);
                        bodies[slot] = Some(self.opcode_body(generator, def, value)?);
                    }
                    Some(owner) if owner.varying_bits() == def.varying_bits() => {
                        return Err(DslError::AmbiguousOpcode {
                            table: name.to_string(),
                            value,
                            first: owner.name.clone(),
                            second: def.name.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        let slots: Vec<Option<String>> = owners
            .iter()
            .enumerate()
            .map(|(slot, owner)| owner.map(|def| def.routine_name(slot as u64)))
            .collect();
        debug!(
            table = name,
            implemented = slots.iter().flatten().count(),
            size,
            "generated dispatch table"
        );
        Ok(Table {
            name: name.to_string(),
            slots,
            bodies: bodies.into_iter().flatten().collect(),
        })
    }

    /// Prologue, code and flag epilogue of a finished body.
    fn section(&self, ctx: &BodyContext) -> String {
        let place = |name: &str| self.regs.place(name).unwrap_or_else(|| name.to_string());
        let mut out = ctx.declarations();
        if ctx.needs_coalesce {
            out.push_str(&render_moves(&coalesce(&self.flags), place));
        }
        out.push_str(&ctx.code());
        if ctx.needs_disperse {
            out.push_str(&render_moves(&disperse(&self.flags), place));
        }
        out
    }

    fn opcode_body(&self, generator: &BodyGen<'_>, def: &InstructionDef, value: u64) -> DslResult<String> {
        let mut ctx = BodyContext::new();
        let fields: Bindings = def
            .field_values(value)
            .into_iter()
            .map(|field| (field.name, Binding::Value(field.value)))
            .collect();
        ctx.with_frame(FrameKind::Instruction, &def.block.locals, |ctx| {
            generator.block(ctx, &def.block, &fields)
        })?;
        let name = def.routine_name(value);
        let mut out = match self.options.dispatch {
            Dispatch::Goto => format!("\n{name}: {{"),
            _ => format!(
                "\nvoid {name}({} *context, uint32_t target_cycle)\n{{",
                self.info.context_type()
            ),
        };
        out.push_str(&self.section(&ctx));
        if self.options.dispatch == Dispatch::Goto {
            out.push_str(&self.next_instruction(generator)?);
        }
        out.push_str("\n}");
        debug!(routine = name.as_str(), value, "generated body");
        Ok(out)
    }

    /// A configured routine inlined into its own fresh context.
    fn routine(&self, generator: &BodyGen<'_>, role: &'static str, name: &str) -> DslResult<String> {
        self.helper(role, name)?;
        let mut ctx = BodyContext::new();
        generator.inline(&mut ctx, name, &Bindings::new())?;
        Ok(self.section(&ctx))
    }

    /// Trailer of every goto-dispatched body: cycle budget check, pending interrupt, then the
    /// fetch/dispatch routine.
    fn next_instruction(&self, generator: &BodyGen<'_>) -> DslResult<String> {
        let body = self.info.body.as_deref().ok_or_else(|| DslError::MissingRoutine {
            role: "body",
            name: String::new(),
        })?;
        let mut out = String::new();
        match self.info.interrupt.as_deref() {
            Some(interrupt) => {
                out.push_str("\n\tif (context->cycles >= context->sync_cycle) {");
                out.push_str("\n\tif (context->cycles >= target_cycle) { return; }");
                out.push_str(&self.routine(generator, "interrupt", interrupt)?);
                out.push_str("\n\t}");
            }
            None => out.push_str("\n\tif (context->cycles >= target_cycle) { return; }"),
        }
        out.push_str("\n\t{");
        out.push_str(&self.routine(generator, "body", body)?);
        out.push_str("\n\t}");
        Ok(out)
    }

    fn build_call(&self, generator: &BodyGen<'_>) -> DslResult<String> {
        let size = self.info.table_size();
        let context = self.info.context_type();
        let mut out = format!(
            "\nstatic void unimplemented({context} *context, uint32_t target_cycle)\n{{\n\tfatal_error(\"Unimplemented instruction\\n\");\n}}\n"
        );
        out.push_str(&format!(
            "\ntypedef void (*impl_fun)({context} *context, uint32_t target_cycle);"
        ));
        let names = self.table_names();
        for name in &names {
            out.push_str(&format!("\nstatic impl_fun impl_{name}[{size}];"));
        }
        for name in &names {
            let table = self.table(generator, name)?;
            for body in &table.bodies {
                out.push_str(body);
            }
            out.push_str(&format!("\nstatic impl_fun impl_{}[{size}] = {{", table.name));
            for slot in &table.slots {
                match slot {
                    Some(routine) => out.push_str(&format!("\n\t{routine},")),
                    None => out.push_str("\n\tunimplemented,"),
                }
            }
            out.push_str("\n};");
        }
        match self.info.body.as_deref() {
            Some(body) => out.push_str(&self.execute_loop(generator, body)?),
            None => debug!("no body routine configured, skipping execute loop"),
        }
        Ok(out)
    }

    fn execute_loop(&self, generator: &BodyGen<'_>, body: &str) -> DslResult<String> {
        let mut out = format!(
            "\nvoid {}execute({} *context, uint32_t target_cycle)\n{{",
            self.info.prefix,
            self.info.context_type()
        );
        if let Some(sync) = &self.info.sync_routine {
            out.push_str(&format!("\n\t{sync}(context, target_cycle);"));
        }
        out.push_str("\n\twhile (context->cycles < target_cycle)\n\t{");
        if let Some(interrupt) = self.info.interrupt.as_deref() {
            out.push_str("\n\t\tif (context->cycles >= context->sync_cycle) {");
            out.push_str(&self.routine(generator, "interrupt", interrupt)?);
            out.push_str("\n\t\t}");
        }
        out.push_str(&self.routine(generator, "body", body)?);
        out.push_str("\n\t}\n}");
        Ok(out)
    }

    fn build_goto(&self, generator: &BodyGen<'_>) -> DslResult<String> {
        let size = self.info.table_size();
        let mut head = format!(
            "\nvoid {}execute({} *context, uint32_t target_cycle)\n{{",
            self.info.prefix,
            self.info.context_type()
        );
        let mut labels = String::new();
        for name in self.table_names() {
            let table = self.table(generator, name)?;
            head.push_str(&format!("\n\tstatic void *impl_{}[{size}] = {{", table.name));
            for slot in &table.slots {
                match slot {
                    Some(routine) => head.push_str(&format!("\n\t\t&&{routine},")),
                    None => head.push_str("\n\t\t&&unimplemented,"),
                }
            }
            head.push_str("\n\t};");
            for body in &table.bodies {
                labels.push_str(body);
            }
        }
        if let Some(sync) = &self.info.sync_routine {
            head.push_str(&format!("\n\t{sync}(context, target_cycle);"));
        }
        head.push_str(&self.next_instruction(generator)?);
        labels.push_str("\nunimplemented:\n\tfatal_error(\"Unimplemented instruction\\n\");\n}");
        Ok(head + &labels)
    }
}
