//! Closed catalog of primitive operations with their pure evaluators.

pub mod emit;

pub use emit::{Arg, CarryFlow, EmitEnv, FlagNeeds, LastOp, OpState, TempPool, emit};

use super::instruction::mask_for_bits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Mov,
    Not,
    Lnot,
    Neg,
    Add,
    Adc,
    Sub,
    Sbc,
    Lsl,
    Lsr,
    Asr,
    Rol,
    Rlc,
    Ror,
    Rrc,
    And,
    Or,
    Xor,
    Abs,
    Cmp,
    Sext,
    Ocall,
    Pcall,
    Cycles,
    Addsize,
    Decsize,
    Xchg,
    Dispatch,
    UpdateFlags,
    UpdateSync,
}

const CATALOG: [(&str, OpKind); 30] = [
    ("mov", OpKind::Mov),
    ("not", OpKind::Not),
    ("lnot", OpKind::Lnot),
    ("neg", OpKind::Neg),
    ("add", OpKind::Add),
    ("adc", OpKind::Adc),
    ("sub", OpKind::Sub),
    ("sbc", OpKind::Sbc),
    ("lsl", OpKind::Lsl),
    ("lsr", OpKind::Lsr),
    ("asr", OpKind::Asr),
    ("rol", OpKind::Rol),
    ("rlc", OpKind::Rlc),
    ("ror", OpKind::Ror),
    ("rrc", OpKind::Rrc),
    ("and", OpKind::And),
    ("or", OpKind::Or),
    ("xor", OpKind::Xor),
    ("abs", OpKind::Abs),
    ("cmp", OpKind::Cmp),
    ("sext", OpKind::Sext),
    ("ocall", OpKind::Ocall),
    ("pcall", OpKind::Pcall),
    ("cycles", OpKind::Cycles),
    ("addsize", OpKind::Addsize),
    ("decsize", OpKind::Decsize),
    ("xchg", OpKind::Xchg),
    ("dispatch", OpKind::Dispatch),
    ("update_flags", OpKind::UpdateFlags),
    ("update_sync", OpKind::UpdateSync),
];

impl OpKind {
    pub fn from_name(name: &str) -> Option<Self> {
        CATALOG
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, kind)| *kind)
    }

    pub fn name(self) -> &'static str {
        CATALOG
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("?")
    }

    /// Parameter positions written by the operation.
    pub fn out_operands(self) -> &'static [usize] {
        use OpKind::*;
        match self {
            Mov | Not | Lnot | Neg | Abs => &[1],
            Add | Adc | Sub | Sbc | Lsl | Lsr | Asr | Rol | Rlc | Ror | Rrc | And | Or | Xor
            | Sext | Addsize | Decsize => &[2],
            Xchg => &[0, 1],
            Cmp | Ocall | Pcall | Cycles | Dispatch | UpdateFlags | UpdateSync => &[],
        }
    }

    /// Number of inputs consumed by the evaluator, or `None` when the op cannot be folded.
    pub fn arity(self) -> Option<usize> {
        use OpKind::*;
        match self {
            Mov | Not | Lnot | Neg | Abs => Some(1),
            Add | Sub | Lsl | Lsr | Asr | And | Or | Xor | Sext | Addsize | Decsize => Some(2),
            _ => None,
        }
    }

    /// Fewest parameters a well-formed call may carry.
    pub fn min_params(self) -> usize {
        use OpKind::*;
        let outputs = self
            .out_operands()
            .iter()
            .max()
            .map(|idx| idx + 1)
            .unwrap_or(0);
        let extra = match self {
            Cmp | Pcall => 2,
            Ocall | Cycles | Dispatch | UpdateFlags => 1,
            _ => 0,
        };
        outputs.max(self.arity().unwrap_or(0)).max(extra)
    }

    /// Folds the op with C unsigned semantics, truncated to `width` bits.
    pub fn evaluate(self, args: &[u64], width: u32) -> Option<u64> {
        use OpKind::*;
        let arity = self.arity()?;
        if args.len() < arity {
            return None;
        }
        let a = args[0];
        let b = args.get(1).copied().unwrap_or(0);
        let raw = match self {
            Mov => a,
            Not => !a,
            Lnot => u64::from(a == 0),
            Neg => a.wrapping_neg(),
            Abs => u64::from((a as u32 as i32).unsigned_abs()),
            Add => a.wrapping_add(b),
            Sub => b.wrapping_sub(a),
            Lsl => shift_left(a, b),
            Lsr => shift_right(a, b),
            Asr => arithmetic_shift(a, b, width),
            And => a & b,
            Or => a | b,
            Xor => a ^ b,
            Sext => sign_extend(a, b),
            Addsize => b.wrapping_add(size_step(a)),
            Decsize => b.wrapping_sub(size_step(a)),
            _ => return None,
        };
        Some(raw & mask_for_bits(width))
    }
}

/// Maps the trailing size operand to a width: 0 is a byte, 1 a word, anything else a long.
pub fn decode_size(value: Option<u64>) -> u32 {
    match value {
        Some(0) => 8,
        Some(1) => 16,
        _ => 32,
    }
}

fn shift_left(a: u64, b: u64) -> u64 {
    u32::try_from(b)
        .ok()
        .and_then(|b| a.checked_shl(b))
        .unwrap_or(0)
}

fn shift_right(a: u64, b: u64) -> u64 {
    u32::try_from(b)
        .ok()
        .and_then(|b| a.checked_shr(b))
        .unwrap_or(0)
}

// Mirrors `(a >> b) | (a & sign ? 0xFFFFFFFFU << (width - b) : 0)`.
fn arithmetic_shift(a: u64, b: u64, width: u32) -> u64 {
    let sign = 1u64 << (width.clamp(1, 64) - 1);
    let fill = if a & sign != 0 {
        let keep = u64::from(width).checked_sub(b).unwrap_or(0);
        shift_left(0xFFFF_FFFF, keep) & 0xFFFF_FFFF
    } else {
        0
    };
    shift_right(a, b) | fill
}

// Mirrors the emitted `src & 0x80 ? src | 0xFF00 : src & 0x7F` family.
fn sign_extend(size: u64, src: u64) -> u64 {
    if size == 16 {
        if src & 0x80 != 0 { src | 0xFF00 } else { src & 0x7F }
    } else if src & 0x8000 != 0 {
        src | 0xFFFF_0000
    } else {
        src & 0x7FFF
    }
}

fn size_step(size: u64) -> u64 {
    if size == 0 { 1 } else { size.wrapping_mul(2) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn catalog_names_round_trip() {
        for (name, kind) in CATALOG {
            assert_eq!(OpKind::from_name(name), Some(kind));
            assert_eq!(kind.name(), name);
        }
        assert_eq!(OpKind::from_name("fetch"), None);
    }

    #[test]
    fn minimum_parameter_counts_cover_outputs_and_inputs() {
        assert_eq!(OpKind::Mov.min_params(), 2);
        assert_eq!(OpKind::Add.min_params(), 3);
        assert_eq!(OpKind::Xchg.min_params(), 2);
        assert_eq!(OpKind::Cmp.min_params(), 2);
        assert_eq!(OpKind::UpdateSync.min_params(), 0);
    }

    #[test]
    fn subtraction_takes_operands_in_reverse() {
        assert_eq!(OpKind::Sub.evaluate(&[1, 5], 8), Some(4));
        assert_eq!(OpKind::Sub.evaluate(&[5, 1], 8), Some(0xFC));
    }

    #[test]
    fn arithmetic_shift_fills_from_the_sign_bit() {
        assert_eq!(OpKind::Asr.evaluate(&[0x80, 1], 8), Some(0xC0));
        assert_eq!(OpKind::Asr.evaluate(&[0x40, 1], 8), Some(0x20));
        assert_eq!(OpKind::Asr.evaluate(&[0x8000, 4], 16), Some(0xF800));
    }

    #[test]
    fn sign_extension_matches_emitted_c() {
        assert_eq!(OpKind::Sext.evaluate(&[16, 0x80], 16), Some(0xFF80));
        assert_eq!(OpKind::Sext.evaluate(&[16, 0x7F], 16), Some(0x7F));
        assert_eq!(OpKind::Sext.evaluate(&[32, 0x8000], 32), Some(0xFFFF_8000));
    }

    #[test]
    fn size_stepping_treats_zero_as_byte() {
        assert_eq!(OpKind::Addsize.evaluate(&[0, 10], 32), Some(11));
        assert_eq!(OpKind::Addsize.evaluate(&[2, 10], 32), Some(14));
        assert_eq!(OpKind::Decsize.evaluate(&[1, 10], 32), Some(8));
    }

    #[test]
    fn unfoldable_ops_have_no_evaluator() {
        assert_eq!(OpKind::Adc.evaluate(&[1, 2], 8), None);
        assert_eq!(OpKind::Cmp.arity(), None);
    }

    proptest! {
        #[test]
        fn folding_matches_unsigned_c_arithmetic(a in any::<u8>(), b in any::<u8>()) {
            let (a64, b64) = (u64::from(a), u64::from(b));
            prop_assert_eq!(OpKind::Add.evaluate(&[a64, b64], 8), Some(u64::from(a.wrapping_add(b))));
            prop_assert_eq!(OpKind::Sub.evaluate(&[a64, b64], 8), Some(u64::from(b.wrapping_sub(a))));
            prop_assert_eq!(OpKind::Xor.evaluate(&[a64, b64], 8), Some(u64::from(a ^ b)));
            prop_assert_eq!(OpKind::Not.evaluate(&[a64], 8), Some(u64::from(!a)));
            prop_assert_eq!(OpKind::Neg.evaluate(&[a64], 8), Some(u64::from(a.wrapping_neg())));
            let shift = b64 % 8;
            prop_assert_eq!(OpKind::Lsl.evaluate(&[a64, shift], 8), Some(u64::from(a << shift)));
            prop_assert_eq!(OpKind::Lsr.evaluate(&[a64, shift], 8), Some(u64::from(a >> shift)));
            prop_assert_eq!(
                OpKind::Asr.evaluate(&[a64, shift], 8),
                Some(u64::from(((a as i8) >> shift) as u8))
            );
        }
    }
}
