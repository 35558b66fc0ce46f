//! C emitters for the operation catalog. Arithmetic emitters route their result through a
//! widened temporary when the following `update_flags` needs carry, half-carry or overflow.

use std::collections::BTreeSet;

use super::{OpKind, decode_size};
use crate::cpu::error::{DslError, DslResult};
use crate::cpu::instruction::mask_for_bits;
use crate::cpu::program::Dispatch;

/// One resolved operand as seen by an emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    /// C expression for the operand.
    pub text: String,
    /// Compile-time value when the operand resolved to a constant.
    pub value: Option<u64>,
    /// Natural width of the operand's storage, 32 when it has none.
    pub width: u32,
}

impl Arg {
    pub fn constant(value: u64) -> Self {
        Self {
            text: value.to_string(),
            value: Some(value),
            width: 32,
        }
    }

    pub fn expr(text: impl Into<String>, width: u32) -> Self {
        Self {
            text: text.into(),
            value: None,
            width,
        }
    }
}

/// Flag calculations requested by an `update_flags` that directly follows the op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagNeeds {
    pub pending: bool,
    pub carry: bool,
    pub half: bool,
    pub overflow: bool,
}

impl FlagNeeds {
    fn wants_flow(&self, size_adjust: bool) -> bool {
        self.carry || self.half || self.overflow || (self.pending && size_adjust)
    }
}

/// Scratch temporaries of one generated body, declared once per width in its prologue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TempPool {
    general: BTreeSet<u32>,
    compare: BTreeSet<u32>,
}

impl TempPool {
    pub fn general(&mut self, width: u32) -> String {
        self.general.insert(width);
        format!("gen_tmp{width}__")
    }

    pub fn compare(&mut self, width: u32) -> String {
        self.compare.insert(width);
        format!("cmp_tmp{width}__")
    }

    pub fn is_empty(&self) -> bool {
        self.general.is_empty() && self.compare.is_empty()
    }

    pub fn declarations(&self) -> String {
        let mut out = String::new();
        for width in &self.general {
            out.push_str(&format!("\n\tuint{width}_t gen_tmp{width}__;"));
        }
        for width in &self.compare {
            out.push_str(&format!("\n\tuint{width}_t cmp_tmp{width}__;"));
        }
        out
    }
}

/// Widened temporary holding a result until `update_flags` has read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarryFlow {
    pub name: String,
    pub width: u32,
}

/// Bookkeeping about the most recent operation, read by flag updates and conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastOp {
    pub op: Option<OpKind>,
    /// C lvalue of the last destination.
    pub dst: Option<String>,
    pub dst_width: u32,
    /// Explicit operation size from a trailing size operand.
    pub size: Option<u32>,
    pub size_adjust: Option<u32>,
    pub flow: Option<CarryFlow>,
    pub a: Option<String>,
    pub b: Option<String>,
    pub b_flow: Option<String>,
    /// `(a, b)` of the last `cmp`, evaluated as `b - a`.
    pub compare: Option<(String, String)>,
}

impl LastOp {
    /// Natural width of the last operation.
    pub fn width(&self) -> u32 {
        self.size.unwrap_or(if self.dst_width == 0 { 32 } else { self.dst_width })
    }

    /// Records a destination operand; any explicit size is set afterwards by the emitter.
    pub fn set_destination(&mut self, dst: impl Into<String>, width: u32) {
        self.dst = Some(dst.into());
        self.dst_width = width;
        self.size = None;
    }

    /// Result expression flag calculations read: the widened temporary when one is active.
    pub fn result(&self) -> Option<&str> {
        self.flow
            .as_ref()
            .map(|flow| flow.name.as_str())
            .or(self.dst.as_deref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpState {
    pub temps: TempPool,
    pub last: LastOp,
}

/// Program-wide facts emitters depend on.
#[derive(Debug, Clone, Copy)]
pub struct EmitEnv<'a> {
    pub dispatch: Dispatch,
    pub prefix: &'a str,
    pub sync_routine: Option<&'a str>,
    /// C test for the carry flag, present when the flag layout defines one.
    pub carry_check: Option<&'a str>,
}

impl EmitEnv<'_> {
    fn carry(&self, op: &'static str) -> DslResult<&str> {
        self.carry_check.ok_or(DslError::MissingCarryFlag { op })
    }
}

pub fn emit(
    kind: OpKind,
    args: &[Arg],
    needs: FlagNeeds,
    env: &EmitEnv<'_>,
    state: &mut OpState,
) -> DslResult<String> {
    if args.len() < kind.min_params() {
        return Err(DslError::InsufficientOperands {
            op: kind.name().to_string(),
            params: args.iter().map(|arg| arg.text.clone()).collect(),
        });
    }
    state.last.size_adjust = None;
    state.last.flow = None;
    let text = match kind {
        OpKind::Mov => unary(kind, "", args, needs, state),
        OpKind::Not => unary(kind, "~", args, needs, state),
        OpKind::Lnot => unary(kind, "!", args, needs, state),
        OpKind::Neg => unary(kind, "-", args, needs, state),
        OpKind::Add => binary(kind, "+", args, needs, state),
        OpKind::Sub => binary(kind, "-", args, needs, state),
        OpKind::Lsl => binary(kind, "<<", args, needs, state),
        OpKind::Lsr => binary(kind, ">>", args, needs, state),
        OpKind::And => binary(kind, "&", args, needs, state),
        OpKind::Or => binary(kind, "|", args, needs, state),
        OpKind::Xor => binary(kind, "^", args, needs, state),
        OpKind::Adc => carry_arith(kind, args, needs, env.carry("adc")?, state),
        OpKind::Sbc => carry_arith(kind, args, needs, env.carry("sbc")?, state),
        OpKind::Asr => asr(args, needs, state),
        OpKind::Rol => rotate(kind, args, needs, None, state),
        OpKind::Ror => rotate(kind, args, needs, None, state),
        OpKind::Rlc => rotate(kind, args, needs, Some(env.carry("rlc")?), state),
        OpKind::Rrc => rotate(kind, args, needs, Some(env.carry("rrc")?), state),
        OpKind::Abs => format!("\n\t{} = abs({});", args[1].text, args[0].text),
        OpKind::Cmp => compare(args, needs, state),
        OpKind::Sext => {
            let (src, dst) = (&args[1].text, &args[2].text);
            if args[0].value == Some(16) {
                format!("\n\t{dst} = {src} & 0x80 ? {src} | 0xFF00 : {src} & 0x7F;")
            } else {
                format!("\n\t{dst} = {src} & 0x8000 ? {src} | 0xFFFF0000 : {src} & 0x7FFF;")
            }
        }
        OpKind::Ocall => {
            let call_args: Vec<&str> = std::iter::once("context")
                .chain(args[1..].iter().map(|arg| arg.text.as_str()))
                .collect();
            format!("\n\t{}{}({});", env.prefix, args[0].text, call_args.join(", "))
        }
        OpKind::Pcall => {
            let call_args: Vec<&str> = args[2..].iter().map(|arg| arg.text.as_str()).collect();
            format!(
                "\n\t(({}){})({});",
                args[1].text,
                args[0].text,
                call_args.join(", ")
            )
        }
        OpKind::Cycles => format!(
            "\n\tcontext->cycles += context->opts->gen.clock_divider * {};",
            args[0].text
        ),
        OpKind::Addsize => size_step("+", args),
        OpKind::Decsize => size_step("-", args),
        OpKind::Xchg => {
            let tmp = state.temps.general(args[0].width);
            format!(
                "\n\t{tmp} = {a};\n\t{a} = {b};\n\t{b} = {tmp};",
                a = args[0].text,
                b = args[1].text
            )
        }
        OpKind::Dispatch => {
            let table = args.get(1).map(|arg| arg.text.as_str()).unwrap_or("main");
            match env.dispatch {
                Dispatch::Call => format!(
                    "\n\timpl_{table}[{}](context, target_cycle);",
                    args[0].text
                ),
                Dispatch::Goto => format!("\n\tgoto *impl_{table}[{}];", args[0].text),
                Dispatch::Switch => {
                    return Err(DslError::UnsupportedDispatch(env.dispatch.name().into()));
                }
            }
        }
        OpKind::UpdateSync => {
            let sync = env.sync_routine.ok_or_else(|| DslError::MissingRoutine {
                role: "sync_cycle",
                name: String::new(),
            })?;
            format!("\n\t{sync}(context, target_cycle);")
        }
        OpKind::UpdateFlags => {
            return Err(DslError::Generation(
                "update_flags is applied against the flag layout, not emitted directly".into(),
            ));
        }
    };
    state.last.op = Some(kind);
    Ok(text)
}

/// Reads the optional trailing size operand at `index` and records it; returns the adjusted
/// width when it is narrower than the destination.
fn size_operand(args: &[Arg], index: usize, dst_width: u32, state: &mut OpState) -> (Option<u32>, Option<u32>) {
    let Some(arg) = args.get(index) else {
        return (None, None);
    };
    let size = decode_size(arg.value);
    state.last.size = Some(size);
    if dst_width > size {
        state.last.size_adjust = Some(size);
        (Some(size), Some(size))
    } else {
        (Some(size), None)
    }
}

fn open_flow(state: &mut OpState, width: u32) -> String {
    let name = state.temps.general(width);
    state.last.flow = Some(CarryFlow {
        name: name.clone(),
        width,
    });
    name
}

fn widen(text: &str, width: u32) -> String {
    if width == 64 {
        format!("((uint64_t){text})")
    } else {
        text.to_string()
    }
}

fn unary(kind: OpKind, op: &str, args: &[Arg], needs: FlagNeeds, state: &mut OpState) -> String {
    let src = &args[0].text;
    let dst_width = args[1].width;
    let (size, adjust) = size_operand(args, 2, dst_width, state);
    if kind == OpKind::Neg && needs.wants_flow(adjust.is_some()) {
        let mut width = size.unwrap_or(dst_width);
        if needs.carry {
            width *= 2;
        }
        let tmp = open_flow(state, width);
        state.last.a = Some("0".into());
        state.last.b = Some(src.clone());
        state.last.b_flow = Some(src.clone());
        return format!("\n\t{tmp} = {op}{src};");
    }
    let dst = &args[1].text;
    match adjust {
        Some(size) => format!(
            "\n\t{dst} = ({dst} & ~{mask}) | (({op}{src}) & {mask});",
            mask = mask_for_bits(size)
        ),
        None => format!("\n\t{dst} = {op}{src};"),
    }
}

fn binary(kind: OpKind, op: &str, args: &[Arg], needs: FlagNeeds, state: &mut OpState) -> String {
    let (mut a, mut b) = if kind == OpKind::Sub {
        (args[1].text.clone(), args[0].text.clone())
    } else {
        (args[0].text.clone(), args[1].text.clone())
    };
    let dst_width = args[2].width;
    let (size, adjust) = size_operand(args, 3, dst_width, state);
    if needs.wants_flow(adjust.is_some()) {
        let mut width = size.unwrap_or(dst_width);
        if needs.carry && kind != OpKind::Lsr {
            width *= 2;
        }
        let tmp = open_flow(state, width);
        state.last.a = Some(a.clone());
        state.last.b = Some(b.clone());
        a = widen(&a, width);
        b = widen(&b, width);
        state.last.b_flow = Some(if kind == OpKind::Sub {
            b.clone()
        } else {
            format!("(~{b})")
        });
        return match adjust {
            Some(size) => format!(
                "\n\t{tmp} = ({a} & {mask}) {op} ({b} & {mask});",
                mask = mask_for_bits(size)
            ),
            None => format!("\n\t{tmp} = {a} {op} {b};"),
        };
    }
    let dst = &args[2].text;
    match adjust {
        Some(size) => {
            let tmp = state.temps.general(size);
            format!(
                "\n\t{tmp} = ({a} & {mask}) {op} ({b} & {mask});\n\t{dst} = ({dst} & ~{mask}) | {tmp};",
                mask = mask_for_bits(size)
            )
        }
        None => format!("\n\t{dst} = {a} {op} {b};"),
    }
}

fn carry_arith(kind: OpKind, args: &[Arg], needs: FlagNeeds, check: &str, state: &mut OpState) -> String {
    let (op, a, b) = if kind == OpKind::Sbc {
        ("-", args[1].text.clone(), args[0].text.clone())
    } else {
        ("+", args[0].text.clone(), args[1].text.clone())
    };
    let dst_width = args[2].width;
    let (size, adjust) = size_operand(args, 3, dst_width, state);
    let masked = |text: &str, size: Option<u32>| match size {
        Some(size) => format!("({text} & {})", mask_for_bits(size)),
        None => text.to_string(),
    };
    if needs.wants_flow(adjust.is_some()) {
        let mut width = size.unwrap_or(dst_width);
        if needs.carry {
            width *= 2;
        }
        let tmp = open_flow(state, width);
        state.last.a = Some(a.clone());
        state.last.b = Some(b.clone());
        state.last.b_flow = Some(if kind == OpKind::Sbc {
            b.clone()
        } else {
            format!("(~{b})")
        });
        let vals = if width == 64 {
            "((uint64_t)1) : ((uint64_t)0)"
        } else {
            "1 : 0"
        };
        return format!(
            "\n\t{tmp} = {} {op} {} {op} ({check} ? {vals});",
            masked(&widen(&a, width), adjust),
            masked(&widen(&b, width), adjust)
        );
    }
    let dst = &args[2].text;
    match adjust {
        Some(size) => {
            let tmp = state.temps.general(size);
            format!(
                "\n\t{tmp} = {} {op} {} {op} ({check} ? 1 : 0);\n\t{dst} = ({dst} & ~{mask}) | {tmp};",
                masked(&a, adjust),
                masked(&b, adjust),
                mask = mask_for_bits(size)
            )
        }
        None => format!("\n\t{dst} = {a} {op} {b} {op} ({check} ? 1 : 0);"),
    }
}

fn asr(args: &[Arg], needs: FlagNeeds, state: &mut OpState) -> String {
    let (a, b) = (&args[0].text, &args[1].text);
    let size = args[2].width;
    let dst = if needs.carry {
        open_flow(state, size * 2)
    } else {
        args[2].text.clone()
    };
    state.last.a = Some(a.clone());
    state.last.b = Some(b.clone());
    format!(
        "\n\t{dst} = ({a} >> {b}) | ({a} & {mask} ? 0xFFFFFFFFU << ({size} - {b}) : 0);",
        mask = 1u64 << (size.clamp(1, 64) - 1)
    )
}

fn rotate(kind: OpKind, args: &[Arg], needs: FlagNeeds, check: Option<&str>, state: &mut OpState) -> String {
    let (a, b) = (&args[0].text, &args[1].text);
    let size = args[2].width;
    // Carry after ror is the result's top bit, so it never needs a widened temporary.
    let dst = if needs.carry && kind != OpKind::Ror {
        open_flow(state, size * 2)
    } else {
        args[2].text.clone()
    };
    state.last.a = Some(a.clone());
    state.last.b = Some(b.clone());
    match (kind, check) {
        (OpKind::Rlc, Some(check)) => format!(
            "\n\t{dst} = {a} << {b} | {a} >> ({size} + 1 - {b}) | ({check} ? 1 : 0) << ({b} - 1);"
        ),
        (OpKind::Rrc, Some(check)) => format!(
            "\n\t{dst} = {a} >> {b} | {a} << ({size} + 1 - {b}) | ({check} ? 1 : 0) << ({size}-{b});"
        ),
        (OpKind::Ror, _) => format!("\n\t{dst} = {a} >> {b} | {a} << ({size} - {b});"),
        _ => format!("\n\t{dst} = {a} << {b} | {a} >> ({size} - {b});"),
    }
}

fn compare(args: &[Arg], needs: FlagNeeds, state: &mut OpState) -> String {
    let (a, b) = (&args[0].text, &args[1].text);
    let mut width = args[1].width;
    if needs.carry {
        width *= 2;
    }
    let tmp = state.temps.compare(width);
    if needs.pending {
        state.last.flow = Some(CarryFlow {
            name: tmp.clone(),
            width,
        });
        state.last.a = Some(b.clone());
        state.last.b = Some(a.clone());
        state.last.b_flow = Some(a.clone());
    }
    state.last.set_destination(b.clone(), args[1].width);
    if let Some(arg) = args.get(2) {
        state.last.size = Some(decode_size(arg.value));
    }
    state.last.compare = Some((a.clone(), b.clone()));
    format!("\n\t{tmp} = {b} - {a};")
}

fn size_step(op: &str, args: &[Arg]) -> String {
    format!(
        "\n\t{dst} = {val} {op} ({sz} ? {sz} * 2 : 1);",
        dst = args[2].text,
        sz = args[0].text,
        val = args[1].text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> EmitEnv<'static> {
        EmitEnv {
            dispatch: Dispatch::Call,
            prefix: "z80_",
            sync_routine: Some("z80_sync_cycle"),
            carry_check: Some("context->chflags & 1"),
        }
    }

    fn reg(name: &str, width: u32) -> Arg {
        Arg::expr(format!("context->{name}"), width)
    }

    #[test]
    fn plain_add_assigns_directly() {
        let mut state = OpState::default();
        let args = [reg("b", 8), reg("a", 8), reg("a", 8)];
        let text = emit(OpKind::Add, &args, FlagNeeds::default(), &env(), &mut state).expect("emit");
        assert_eq!(text, "\n\tcontext->a = context->b + context->a;");
        assert!(state.temps.is_empty());
    }

    #[test]
    fn carry_widens_into_temporary() {
        let mut state = OpState::default();
        state.last.set_destination("context->a", 8);
        let needs = FlagNeeds {
            pending: true,
            carry: true,
            ..FlagNeeds::default()
        };
        let args = [reg("b", 8), reg("a", 8), reg("a", 8)];
        let text = emit(OpKind::Add, &args, needs, &env(), &mut state).expect("emit");
        assert_eq!(text, "\n\tgen_tmp16__ = context->b + context->a;");
        assert_eq!(state.temps.declarations(), "\n\tuint16_t gen_tmp16__;");
        assert_eq!(state.last.flow.as_ref().map(|flow| flow.width), Some(16));
        assert_eq!(state.last.b_flow.as_deref(), Some("(~context->a)"));
    }

    #[test]
    fn narrow_size_operand_masks_read_modify_write() {
        let mut state = OpState::default();
        let args = [reg("d[0]", 32), reg("d[1]", 32), reg("d[1]", 32), Arg::constant(0)];
        let text = emit(OpKind::Add, &args, FlagNeeds::default(), &env(), &mut state).expect("emit");
        assert_eq!(
            text,
            "\n\tgen_tmp8__ = (context->d[0] & 255) + (context->d[1] & 255);\n\tcontext->d[1] = (context->d[1] & ~255) | gen_tmp8__;"
        );
        assert_eq!(state.last.size, Some(8));
    }

    #[test]
    fn adc_without_carry_flag_fails() {
        let mut state = OpState::default();
        let env = EmitEnv {
            carry_check: None,
            ..env()
        };
        let args = [reg("b", 8), reg("a", 8), reg("a", 8)];
        let err = emit(OpKind::Adc, &args, FlagNeeds::default(), &env, &mut state).unwrap_err();
        assert!(matches!(err, DslError::MissingCarryFlag { op: "adc" }));
    }

    #[test]
    fn missing_operands_are_reported() {
        let mut state = OpState::default();
        let err = emit(OpKind::Add, &[reg("a", 8)], FlagNeeds::default(), &env(), &mut state).unwrap_err();
        assert!(matches!(err, DslError::InsufficientOperands { .. }));
    }

    #[test]
    fn dispatch_follows_strategy() {
        let mut state = OpState::default();
        let args = [Arg::expr("opcode", 8)];
        let call = emit(OpKind::Dispatch, &args, FlagNeeds::default(), &env(), &mut state).expect("call");
        assert_eq!(call, "\n\timpl_main[opcode](context, target_cycle);");
        let goto_env = EmitEnv {
            dispatch: Dispatch::Goto,
            ..env()
        };
        let args = [Arg::expr("opcode", 8), Arg::expr("cb", 32)];
        let jump = emit(OpKind::Dispatch, &args, FlagNeeds::default(), &goto_env, &mut state).expect("goto");
        assert_eq!(jump, "\n\tgoto *impl_cb[opcode];");
    }

    #[test]
    fn compare_records_operands_and_temporary() {
        let mut state = OpState::default();
        let needs = FlagNeeds {
            pending: true,
            ..FlagNeeds::default()
        };
        let args = [reg("b", 8), reg("a", 8)];
        let text = emit(OpKind::Cmp, &args, needs, &env(), &mut state).expect("cmp");
        assert_eq!(text, "\n\tcmp_tmp8__ = context->a - context->b;");
        assert_eq!(
            state.last.compare,
            Some(("context->b".to_string(), "context->a".to_string()))
        );
        assert_eq!(state.last.result(), Some("cmp_tmp8__"));
    }

    #[test]
    fn ocall_prefixes_and_passes_context() {
        let mut state = OpState::default();
        let args = [Arg::expr("write_8", 32), reg("wz", 16), reg("a", 8)];
        let text = emit(OpKind::Ocall, &args, FlagNeeds::default(), &env(), &mut state).expect("ocall");
        assert_eq!(text, "\n\tz80_write_8(context, context->wz, context->a);");
    }
}
