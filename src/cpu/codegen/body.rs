//! Statement walker: turns a block of directives into C text inside a [`BodyContext`].

use smallvec::SmallVec;
use tracing::trace;

use super::context::BodyContext;
use super::resolve::{Access, Binding, Bindings, Operand, Place, PlaceKind};
use crate::cpu::ast::{Block, Condition, Directive, IfBlock, OpCall, Statement, SwitchBlock};
use crate::cpu::error::{DslError, DslResult};
use crate::cpu::flags;
use crate::cpu::ops::{Arg, EmitEnv, FlagNeeds, OpKind, emit};
use crate::cpu::program::Program;
use crate::cpu::registers::RegisterLookup;
use crate::cpu::scope::{FrameKind, KnownValues};

/// Inlining depth past which a helper is assumed to call itself forever.
const MAX_NESTING: usize = 64;

pub(crate) struct BodyGen<'p> {
    pub(crate) program: &'p Program,
    carry_check: Option<String>,
}

impl<'p> BodyGen<'p> {
    pub(crate) fn new(program: &'p Program) -> Self {
        Self {
            program,
            carry_check: flags::carry_check(&program.flags, &program.regs),
        }
    }

    fn env(&self) -> EmitEnv<'_> {
        EmitEnv {
            dispatch: self.program.options.dispatch,
            prefix: &self.program.info.prefix,
            sync_routine: self.program.info.sync_routine.as_deref(),
            carry_check: self.carry_check.as_deref(),
        }
    }

    pub(crate) fn block(&self, ctx: &mut BodyContext, block: &Block, bindings: &Bindings) -> DslResult<()> {
        for (index, statement) in block.body.iter().enumerate() {
            match statement {
                Statement::Op(op) => {
                    let needs = self.needs_before(block.body.get(index + 1))?;
                    self.op(ctx, op, needs, bindings)?;
                }
                Statement::If(node) => {
                    self.if_block(ctx, node, bindings)?;
                    ctx.folded = None;
                }
                Statement::Switch(node) => {
                    self.switch_block(ctx, node, bindings)?;
                    ctx.folded = None;
                }
            }
        }
        Ok(())
    }

    /// Flag calculations the statement after an op is about to ask for.
    fn needs_before(&self, next: Option<&Statement>) -> DslResult<FlagNeeds> {
        match next {
            Some(Statement::Op(op)) if op.kind() == Some(OpKind::UpdateFlags) => {
                let Some(directive) = op.params.first() else {
                    return Ok(FlagNeeds::default());
                };
                let update = self.program.flags.parse_update(directive)?;
                Ok(self.program.flags.needs(&update))
            }
            _ => Ok(FlagNeeds::default()),
        }
    }

    fn op(&self, ctx: &mut BodyContext, op: &OpCall, needs: FlagNeeds, bindings: &Bindings) -> DslResult<()> {
        let folded = ctx.folded.take();
        match &op.directive {
            Directive::Disassembly => {
                ctx.folded = folded;
                trace!(line = op.line, "skipping disassembly hint");
                Ok(())
            }
            Directive::Meta => {
                self.meta(ctx, op, bindings)?;
                ctx.ops.last.op = None;
                Ok(())
            }
            Directive::Call(name) => {
                self.call(ctx, op, name, bindings)?;
                ctx.ops.last.op = None;
                Ok(())
            }
            Directive::Primitive(OpKind::UpdateFlags) => self.update_flags(ctx, op),
            Directive::Primitive(kind) => self.primitive(ctx, op, *kind, needs, bindings),
        }
    }

    fn insufficient(op: &OpCall) -> DslError {
        DslError::InsufficientOperands {
            op: op.directive.name().to_string(),
            params: op.params.clone(),
        }
    }

    fn primitive(
        &self,
        ctx: &mut BodyContext,
        op: &OpCall,
        kind: OpKind,
        needs: FlagNeeds,
        bindings: &Bindings,
    ) -> DslResult<()> {
        if op.params.len() < kind.min_params() {
            return Err(Self::insufficient(op));
        }
        let outputs = kind.out_operands();
        let mut operands: SmallVec<[Operand; 4]> = SmallVec::new();
        for (index, raw) in op.params.iter().enumerate() {
            let operand = if outputs.contains(&index) {
                if kind == OpKind::Xchg {
                    self.resolve(ctx, raw, bindings, false, Access::Read)?;
                }
                self.resolve(ctx, raw, bindings, false, Access::Write)?
            } else {
                self.resolve(ctx, raw, bindings, true, Access::Read)?
            };
            operands.push(operand);
        }
        if self.fold(ctx, kind, &operands, needs) {
            return Ok(());
        }
        let args: SmallVec<[Arg; 4]> = operands.iter().map(Operand::to_arg).collect();
        let text = emit(kind, &args, needs, &self.env(), &mut ctx.ops)?;
        ctx.push(text);
        if kind == OpKind::Cmp {
            ctx.cmp_at = Some(ctx.out.len() - 1);
        }
        for index in outputs {
            if let Some(Operand::Place(place)) = operands.get(*index) {
                Self::invalidate(&mut ctx.known, place);
            }
        }
        match kind {
            OpKind::Ocall | OpKind::Pcall => self.forget_registers(&mut ctx.known),
            OpKind::Cycles | OpKind::Dispatch => ctx.known.forget("cycles"),
            _ => {}
        }
        Ok(())
    }

    /// Evaluates the op at generation time when every input is known. Returns true when the
    /// op was folded.
    fn fold(&self, ctx: &mut BodyContext, kind: OpKind, operands: &[Operand], needs: FlagNeeds) -> bool {
        let Some(arity) = kind.arity() else {
            return false;
        };
        if !self.program.options.fold
            || needs.pending
            || ctx.conditional
            || operands.len() <= arity
            || !operands[..operands.len() - 1]
                .iter()
                .all(|operand| operand.value().is_some())
        {
            return false;
        }
        let inputs: SmallVec<[u64; 4]> = operands[..arity].iter().filter_map(Operand::value).collect();
        let dst = &operands[arity];
        // An external destination has no storage of ours to hold the value.
        if let Operand::Symbol(_) = dst {
            return false;
        }
        let Some(value) = kind.evaluate(&inputs, dst.width()) else {
            return false;
        };
        match dst {
            Operand::Place(place) => {
                match &place.key {
                    Some(key) => ctx.known.set(key.clone(), value),
                    None => Self::invalidate(&mut ctx.known, place),
                }
                if place.kind != PlaceKind::Local {
                    ctx.push(format!("\n\t{} = {value};", place.expr));
                }
            }
            Operand::Symbol(_) | Operand::Const(_) => {}
        }
        ctx.ops.last.op = Some(kind);
        ctx.ops.last.flow = None;
        ctx.ops.last.size_adjust = None;
        ctx.folded = Some(value);
        trace!(op = kind.name(), dst = %dst.text(), value, "folded constant operation");
        true
    }

    fn invalidate(known: &mut KnownValues, place: &Place) {
        match (&place.key, &place.array) {
            (Some(key), _) => known.forget(key),
            (None, Some(array)) => known.forget_array(array),
            (None, None) => {}
        }
    }

    /// Drops every known register value; locals survive.
    fn forget_registers(&self, known: &mut KnownValues) {
        let regs = &self.program.regs;
        known.retain(|key| !key.contains('[') && regs.width(key).is_none());
    }

    /// Known-value key of a register named directly.
    fn register_key(&self, name: &str) -> Option<String> {
        match self.program.regs.lookup(name)? {
            RegisterLookup::Plain { .. } => Some(name.to_string()),
            RegisterLookup::Member { array, index } => Some(format!("{}[{index}]", array.name)),
            RegisterLookup::Array(_) | RegisterLookup::Pointer(_) => None,
        }
    }

    fn update_flags(&self, ctx: &mut BodyContext, op: &OpCall) -> DslResult<()> {
        let directive = op.params.first().ok_or_else(|| Self::insufficient(op))?;
        let layout = &self.program.flags;
        let update = layout.parse_update(directive)?;
        let text = flags::apply_update(layout, &self.program.regs, &update, &mut ctx.ops)?;
        ctx.push(text);
        let letters = update
            .computed
            .iter()
            .copied()
            .chain(update.forced.iter().map(|(letter, _)| *letter));
        for letter in letters {
            let storage = &layout.flag(letter)?.storage.register;
            if let Some(key) = self.register_key(storage) {
                ctx.known.forget(&key);
            }
        }
        ctx.ops.last.op = Some(OpKind::UpdateFlags);
        Ok(())
    }

    fn meta(&self, ctx: &mut BodyContext, op: &OpCall, bindings: &Bindings) -> DslResult<()> {
        let (Some(alias), Some(target)) = (op.params.first(), op.params.get(1)) else {
            return Err(Self::insufficient(op));
        };
        let binding = if let Some((array, index)) = target.split_once('.') {
            let index = match (ctx.scopes.resolve_local(index), bindings.get(index)) {
                (Some(local), _) => local.c_name,
                (None, Some(Binding::Value(value))) => value.to_string(),
                _ => index.to_string(),
            };
            Binding::Name(format!("{array}.{index}"))
        } else if let Some(local) = ctx.scopes.resolve_local(target) {
            Binding::Operand(Operand::Place(Place::local(local)))
        } else if let Some(bound) = bindings.get(target) {
            bound.clone()
        } else {
            Binding::Name(target.clone())
        };
        ctx.meta.insert(alias.clone(), binding);
        Ok(())
    }

    fn call(&self, ctx: &mut BodyContext, op: &OpCall, name: &str, bindings: &Bindings) -> DslResult<()> {
        let Some(helper) = self.program.helpers.get(name) else {
            let mut params = Vec::with_capacity(op.params.len());
            for raw in &op.params {
                params.push(self.resolve(ctx, raw, bindings, true, Access::Read)?.text());
            }
            ctx.push(format!("\n\t{name}({});", params.join(", ")));
            self.forget_registers(&mut ctx.known);
            return Ok(());
        };
        if op.params.len() != helper.args.len() {
            return Err(DslError::ArgumentCount {
                routine: helper.name.clone(),
                expected: helper.args.len(),
                found: op.params.len(),
            });
        }
        if ctx.scopes.depth() > MAX_NESTING {
            return Err(DslError::Generation(format!(
                "helper {name} nests too deeply; is it calling itself?"
            )));
        }
        let mut args = Bindings::new();
        for (arg, raw) in helper.args.iter().zip(&op.params) {
            let operand = self.resolve(ctx, raw, bindings, false, Access::Bind)?;
            args.insert(arg.name.clone(), Binding::Operand(operand));
        }
        trace!(helper = name, line = op.line, "inlining helper");
        self.inline(ctx, name, &args)
    }

    /// Inlines helper `name` with the given argument bindings.
    pub(crate) fn inline(&self, ctx: &mut BodyContext, name: &str, args: &Bindings) -> DslResult<()> {
        let helper = self.program.helper("helper", name)?;
        let kind = FrameKind::Helper {
            name: helper.name.clone(),
        };
        ctx.with_frame(kind, &helper.block.locals, |ctx| {
            self.block(ctx, &helper.block, args)
        })
    }

    fn if_block(&self, ctx: &mut BodyContext, node: &IfBlock, bindings: &Bindings) -> DslResult<()> {
        let test = match &node.condition {
            Condition::Operand(name) => {
                if let Some(value) = self.program.boolean(name) {
                    return self.select(ctx, value, node, bindings);
                }
                match self.resolve(ctx, name, bindings, true, Access::Read)? {
                    Operand::Const(value) => return self.select(ctx, value != 0, node, bindings),
                    Operand::Symbol(symbol) if is_identifier(&symbol) => {
                        return Err(DslError::UndefinedBoolean(symbol));
                    }
                    other => other.text(),
                }
            }
            Condition::UnsignedGreaterEqual => {
                let (a, b) = Self::take_compare(ctx, ">=U")?;
                format!("{b} >= {a}")
            }
            Condition::Equal | Condition::NotEqual => {
                let equal = node.condition == Condition::Equal;
                if let Some(value) = ctx.folded {
                    return self.select(ctx, (value == 0) == equal, node, bindings);
                }
                if ctx.ops.last.op == Some(OpKind::Cmp) {
                    let (a, b) = Self::take_compare(ctx, if equal { "=" } else { "!=" })?;
                    format!("{b} {} {a}", if equal { "==" } else { "!=" })
                } else {
                    let dst = ctx.ops.last.dst.clone().ok_or_else(|| {
                        DslError::Generation("condition needs a preceding operation".into())
                    })?;
                    if equal { format!("!{dst}") } else { dst }
                }
            }
        };
        ctx.push(format!("\n\tif ({test}) {{"));
        let outer = std::mem::replace(&mut ctx.conditional, true);
        let result = self.branches(ctx, node, bindings);
        ctx.conditional = outer;
        result?;
        ctx.push("\n\t}".into());
        Ok(())
    }

    /// Operands of the `cmp` right before a comparison; its now unused subtraction is dropped.
    fn take_compare(ctx: &mut BodyContext, condition: &str) -> DslResult<(String, String)> {
        let compare = match ctx.ops.last.op {
            Some(OpKind::Cmp) => ctx.ops.last.compare.clone(),
            _ => None,
        };
        let Some(operands) = compare else {
            return Err(DslError::Generation(format!(
                "condition {condition} must directly follow cmp"
            )));
        };
        if ctx.cmp_at.take().is_some_and(|at| at + 1 == ctx.out.len()) {
            ctx.out.pop();
        }
        Ok(operands)
    }

    /// Generates the branch selected at compile time without emitting a test.
    fn select(&self, ctx: &mut BodyContext, value: bool, node: &IfBlock, bindings: &Bindings) -> DslResult<()> {
        let block = if value {
            Some(&node.then_block)
        } else {
            node.else_block.as_ref()
        };
        match block {
            Some(block) => ctx.with_frame(FrameKind::Branch, &block.locals, |ctx| {
                self.block(ctx, block, bindings)
            }),
            None => Ok(()),
        }
    }

    fn branches(&self, ctx: &mut BodyContext, node: &IfBlock, bindings: &Bindings) -> DslResult<()> {
        let before = ctx.known.clone();
        ctx.with_frame(FrameKind::Branch, &node.then_block.locals, |ctx| {
            self.block(ctx, &node.then_block, bindings)
        })?;
        let after_then = std::mem::replace(&mut ctx.known, before.clone());
        let after_else = match &node.else_block {
            Some(block) => {
                ctx.push("\n\t} else {".into());
                ctx.with_frame(FrameKind::Branch, &block.locals, |ctx| {
                    self.block(ctx, block, bindings)
                })?;
                std::mem::take(&mut ctx.known)
            }
            None => before,
        };
        ctx.known = after_then.intersect(&after_else);
        Ok(())
    }

    fn switch_block(&self, ctx: &mut BodyContext, node: &SwitchBlock, bindings: &Bindings) -> DslResult<()> {
        let selector = self.resolve(ctx, &node.param, bindings, true, Access::Read)?;
        if let Operand::Const(value) = selector {
            let Some(block) = node.case(value).or(node.default.as_ref()) else {
                return Ok(());
            };
            ctx.push("\n\t{".into());
            ctx.with_frame(FrameKind::Case, &block.locals, |ctx| {
                self.block(ctx, block, bindings)
            })?;
            ctx.push("\n\t}".into());
            return Ok(());
        }
        ctx.push(format!("\n\tswitch({})\n\t{{", selector.text()));
        let outer = std::mem::replace(&mut ctx.conditional, true);
        let result = self.cases(ctx, node, bindings);
        ctx.conditional = outer;
        result?;
        ctx.push("\n\t}".into());
        Ok(())
    }

    fn cases(&self, ctx: &mut BodyContext, node: &SwitchBlock, bindings: &Bindings) -> DslResult<()> {
        let before = ctx.known.clone();
        let mut joined: Option<KnownValues> = None;
        let arms = node
            .cases
            .iter()
            .map(|case| (format!("\n\tcase {}U: {{", case.value), &case.block))
            .chain(node.default.iter().map(|block| ("\n\tdefault: {".to_string(), block)));
        for (label, block) in arms {
            ctx.known = before.clone();
            ctx.push(label);
            ctx.with_frame(FrameKind::Case, &block.locals, |ctx| {
                self.block(ctx, block, bindings)
            })?;
            ctx.push("\n\tbreak;\n\t}".into());
            joined = Some(match joined {
                Some(known) => known.intersect(&ctx.known),
                None => ctx.known.clone(),
            });
        }
        let mut known = joined.unwrap_or_else(|| before.clone());
        if node.default.is_none() {
            known = known.intersect(&before);
        }
        ctx.known = known;
        Ok(())
    }
}

/// True for a bare C identifier, which as a condition can only be a boolean flag.
fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
