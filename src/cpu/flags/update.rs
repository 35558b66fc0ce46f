//! Direct flag updates computed from the bookkeeping of the previous operation.

use super::{FlagCalc, FlagLayout, FlagStorage, FlagUpdate};
use crate::cpu::error::{DslError, DslResult};
use crate::cpu::instruction::mask_for_bits;
use crate::cpu::ops::{OpKind, OpState};
use crate::cpu::registers::RegisterLayout;

fn place(regs: &RegisterLayout, name: &str) -> String {
    regs.place(name).unwrap_or_else(|| name.to_string())
}

/// C test for the carry flag, read by `adc`, `sbc`, `rlc` and `rrc`.
pub fn carry_check(layout: &FlagLayout, regs: &RegisterLayout) -> Option<String> {
    let carry = layout.carry_flag()?;
    let reg = place(regs, &carry.storage.register);
    Some(match carry.storage.bit {
        Some(bit) => format!("({reg} & 1 << {bit})"),
        None => reg,
    })
}

/// Emits C for one `update_flags` directive and writes back any widened result.
pub fn apply_update(
    layout: &FlagLayout,
    regs: &RegisterLayout,
    update: &FlagUpdate,
    state: &mut OpState,
) -> DslResult<String> {
    let last = state.last.clone();
    let width = last.width();
    let result = last.result().map(str::to_string).ok_or_else(|| {
        DslError::Generation("update_flags has no preceding operation to read".into())
    })?;
    let operand = |value: &Option<String>, role: &str| {
        value.clone().ok_or_else(|| {
            DslError::Generation(format!(
                "update_flags needs the {role} operand of the preceding operation"
            ))
        })
    };
    let mut out = String::new();
    let mut grouped: Vec<(String, String, u64, usize)> = Vec::new();
    let mut parity: Option<&FlagStorage> = None;
    let mut forced: Vec<(char, bool)> = update.forced.clone();

    for letter in &update.computed {
        let flag = layout.flag(*letter)?;
        let (value, bit) = match flag.calc {
            FlagCalc::Literal(value) => {
                forced.push((*letter, value));
                continue;
            }
            FlagCalc::Parity => {
                parity = Some(&flag.storage);
                continue;
            }
            FlagCalc::Zero => {
                let value = match &last.flow {
                    Some(flow) if flow.width != width => {
                        format!("({result} & {})", mask_for_bits(width))
                    }
                    _ => result.clone(),
                };
                let reg = place(regs, &flag.storage.register);
                out.push_str(&match flag.storage.bit {
                    Some(bit) => format!(
                        "\n\t{reg} = {value} ? ({reg} & ~{m}U) : ({reg} | {m}U);",
                        m = 1u64 << bit
                    ),
                    None => format!("\n\t{reg} = {value} == 0;"),
                });
                continue;
            }
            FlagCalc::Sign => (result.clone(), width - 1),
            FlagCalc::Carry => match last.op {
                Some(OpKind::Lsr | OpKind::Asr) => {
                    let a = operand(&last.a, "shifted")?;
                    let b = operand(&last.b, "shift count")?;
                    let value = match b.parse::<u64>() {
                        Ok(0) => "0".to_string(),
                        Ok(count) => format!("({a} >> {})", count - 1),
                        Err(_) => format!("({a} >> ({b} - 1))"),
                    };
                    (value, 0)
                }
                Some(OpKind::Ror) => (result.clone(), width - 1),
                _ => (result.clone(), width),
            },
            FlagCalc::HalfCarry => {
                let a = operand(&last.a, "left")?;
                let b = operand(&last.b, "right")?;
                (format!("({a} ^ {b} ^ {result})"), width.saturating_sub(4))
            }
            FlagCalc::Overflow => {
                let a = operand(&last.a, "left")?;
                let b = operand(&last.b_flow, "right")?;
                (format!("((({a} ^ {b})) & ({a} ^ {result}))"), width - 1)
            }
            FlagCalc::Bit(n) => (result.clone(), (n + width).saturating_sub(8)),
        };
        let reg = place(regs, &flag.storage.register);
        match flag.storage.bit {
            Some(cell_bit) if cell_bit == bit => {
                match grouped
                    .iter_mut()
                    .find(|(name, expr, _, _)| *name == flag.storage.register && *expr == value)
                {
                    Some((_, _, mask, count)) => {
                        *mask |= 1 << bit;
                        *count += 1;
                    }
                    None => grouped.push((flag.storage.register.clone(), value, 1 << bit, 1)),
                }
            }
            Some(cell_bit) => {
                let (op, shift) = if bit > cell_bit {
                    (">>", bit - cell_bit)
                } else {
                    ("<<", cell_bit - bit)
                };
                out.push_str(&format!(
                    "\n\t{reg} = ({reg} & ~{m}U) | ({value} {op} {shift}U & {m}U);",
                    m = 1u64 << cell_bit
                ));
            }
            None => {
                let top = regs
                    .width(&flag.storage.register)
                    .unwrap_or(32)
                    .saturating_sub(1);
                if bit > top {
                    out.push_str(&format!(
                        "\n\t{reg} = {value} >> {} & {}U;",
                        bit - top,
                        1u64 << top
                    ));
                } else {
                    out.push_str(&format!("\n\t{reg} = {value} & {}U;", 1u64 << bit));
                }
            }
        }
    }

    for (register, value, mask, count) in &grouped {
        let reg = place(regs, register);
        if *count == layout.flags_stored_in(register) {
            out.push_str(&format!("\n\t{reg} = {value};"));
        } else {
            out.push_str(&format!(
                "\n\t{reg} = ({reg} & ~{mask}U) | ({value} & {mask}U);"
            ));
        }
    }

    if let Some(flow) = &last.flow {
        if last.op != Some(OpKind::Cmp) {
            let dst = operand(&last.dst, "destination")?;
            match last.size_adjust {
                Some(size) => out.push_str(&format!(
                    "\n\t{dst} = ({dst} & ~{m}) | ({tmp} & {m});",
                    m = mask_for_bits(size),
                    tmp = flow.name
                )),
                None => out.push_str(&format!("\n\t{dst} = {};", flow.name)),
            }
        }
        state.last.flow = None;
        state.last.size_adjust = None;
    }

    if let Some(storage) = parity {
        let (dst, mut src) = match &last.flow {
            Some(flow) => (flow.name.clone(), flow.name.clone()),
            None => (state.temps.general(width), result.clone()),
        };
        if width > 8 {
            if width > 16 {
                out.push_str(&format!("\n\t{dst} = {src} ^ ({src} >> 16);"));
                src = dst.clone();
            }
            out.push_str(&format!("\n\t{dst} = {src} ^ ({src} >> 8);"));
            src = dst.clone();
        }
        out.push_str(&format!("\n\t{dst} = ({src} ^ ({src} >> 4)) & 0xF;"));
        let reg = place(regs, &storage.register);
        out.push_str(&match storage.bit {
            Some(bit) => format!(
                "\n\t{reg} = ({reg} & ~{m}U) | ((0x6996 >> {dst}) << {bit} & {m}U);",
                m = 1u64 << bit
            ),
            None => format!("\n\t{reg} = 0x9669 >> {dst} & 1;"),
        });
    }

    out.push_str(&render_forced(layout, regs, &forced)?);
    Ok(out)
}

/// Explicit `0`/`1` flags; bits sharing a storage register collapse into one statement.
fn render_forced(layout: &FlagLayout, regs: &RegisterLayout, forced: &[(char, bool)]) -> DslResult<String> {
    let mut out = String::new();
    let mut shared: Vec<(String, u64, u64)> = Vec::new();
    for (letter, value) in forced {
        let storage = &layout.flag(*letter)?.storage;
        match storage.bit {
            Some(bit) => {
                let entry = match shared.iter().position(|(reg, _, _)| *reg == storage.register) {
                    Some(idx) => &mut shared[idx],
                    None => {
                        shared.push((storage.register.clone(), 0, 0));
                        let last = shared.len() - 1;
                        &mut shared[last]
                    }
                };
                if *value {
                    entry.1 |= 1 << bit;
                } else {
                    entry.2 |= 1 << bit;
                }
            }
            None => out.push_str(&format!(
                "\n\t{} = {};",
                place(regs, &storage.register),
                u8::from(*value)
            )),
        }
    }
    for (register, set, clear) in shared {
        let reg = place(regs, &register);
        out.push_str(&match (set, clear) {
            (set, 0) => format!("\n\t{reg} |= {set}U;"),
            (0, clear) => format!("\n\t{reg} &= ~{clear}U;"),
            (set, clear) => format!("\n\t{reg} = ({reg} & ~{clear}U) | {set}U;"),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::flags::tests::{flag, z80_flags};
    use crate::cpu::ops::CarryFlow;

    fn z80_regs() -> RegisterLayout {
        let mut regs = RegisterLayout::new();
        for (name, width) in [
            ("a", 8),
            ("f", 8),
            ("zflag", 8),
            ("pvflag", 8),
            ("nflag", 8),
            ("chflags", 8),
            ("last_flag_result", 8),
        ] {
            regs.add_register(name, width).expect("register");
        }
        regs
    }

    fn after_carry_add() -> OpState {
        let mut state = OpState::default();
        state.last.op = Some(OpKind::Add);
        state.last.set_destination("context->a", 8);
        state.last.flow = Some(CarryFlow {
            name: state.temps.general(16),
            width: 16,
        });
        state.last.a = Some("context->a".into());
        state.last.b = Some("context->b".into());
        state.last.b_flow = Some("(~context->b)".into());
        state
    }

    #[test]
    fn zero_and_carry_read_widened_temporary() {
        let layout = z80_flags();
        let regs = z80_regs();
        let mut state = after_carry_add();
        let update = layout.parse_update("ZC").expect("update");
        let text = apply_update(&layout, &regs, &update, &mut state).expect("update");
        assert_eq!(
            text,
            "\n\tcontext->zflag = (gen_tmp16__ & 255) == 0;\
             \n\tcontext->chflags = (context->chflags & ~128U) | (gen_tmp16__ >> 1U & 128U);\
             \n\tcontext->a = gen_tmp16__;"
        );
        assert!(state.last.flow.is_none());
    }

    #[test]
    fn aligned_bits_in_shared_storage_collapse() {
        let layout = z80_flags();
        let regs = z80_regs();
        let mut state = after_carry_add();
        let update = layout.parse_update("SY").expect("update");
        let text = apply_update(&layout, &regs, &update, &mut state).expect("update");
        assert!(
            text.starts_with("\n\tcontext->last_flag_result = gen_tmp16__;"),
            "{text}"
        );
    }

    #[test]
    fn forced_flags_share_one_read_modify_write() {
        let mut layout = FlagLayout::new();
        layout.register = Some("sr".into());
        layout.add(flag('V', "1", "overflow", "ccr.1")).expect("flag");
        layout.add(flag('C', "0", "carry", "ccr.0")).expect("flag");
        layout.add(flag('N', "3", "sign", "nflag")).expect("flag");
        let mut regs = RegisterLayout::new();
        regs.add_register("ccr", 8).expect("ccr");
        regs.add_register("nflag", 8).expect("nflag");
        let mut state = OpState::default();
        state.last.set_destination("context->d0", 32);
        let update = layout.parse_update("V0C1N0").expect("update");
        let text = apply_update(&layout, &regs, &update, &mut state).expect("update");
        assert_eq!(
            text,
            "\n\tcontext->nflag = 0;\n\tcontext->ccr = (context->ccr & ~2U) | 1U;"
        );
    }

    #[test]
    fn parity_uses_scratch_when_no_temporary_is_active() {
        let layout = z80_flags();
        let regs = z80_regs();
        let mut state = OpState::default();
        state.last.op = Some(OpKind::Xor);
        state.last.set_destination("context->a", 8);
        let update = layout.parse_update("P").expect("update");
        let text = apply_update(&layout, &regs, &update, &mut state).expect("update");
        assert_eq!(
            text,
            "\n\tgen_tmp8__ = (context->a ^ (context->a >> 4)) & 0xF;\
             \n\tcontext->pvflag = 0x9669 >> gen_tmp8__ & 1;"
        );
    }

    #[test]
    fn shift_carry_reads_last_bit_out() {
        let layout = z80_flags();
        let regs = z80_regs();
        let mut state = OpState::default();
        state.last.op = Some(OpKind::Lsr);
        state.last.set_destination("context->a", 8);
        state.last.a = Some("context->a".into());
        state.last.b = Some("1".into());
        let update = layout.parse_update("C").expect("update");
        let text = apply_update(&layout, &regs, &update, &mut state).expect("update");
        assert_eq!(
            text,
            "\n\tcontext->chflags = (context->chflags & ~128U) | ((context->a >> 0) << 7U & 128U);"
        );
    }

    #[test]
    fn parity_tables_are_complements() {
        for nibble in 0..16u32 {
            assert_eq!((0x9669 >> nibble) & 1, 1 - ((0x6996 >> nibble) & 1));
            assert_eq!((0x9669 >> nibble) & 1, u32::from(nibble.count_ones() % 2 == 0));
        }
    }
}
