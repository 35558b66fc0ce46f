//! Coalesce and disperse plans moving flags between their storage cells and the unified flag
//! register. Plans are plain data over register names; [`render_moves`] turns them into C.

use super::{FlagBits, FlagLayout};
use crate::cpu::instruction::mask_for_bits;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagMove {
    /// `dst = 0`, or `dst &= keep` when some bits of `dst` are owned by `dst` itself.
    Clear { dst: String, keep: u64 },
    /// `dst = src`, optionally masked.
    Copy { dst: String, src: String, mask: Option<u64> },
    /// `dst = src >> shift & mask`
    Extract { dst: String, src: String, shift: u32, mask: u64 },
    /// `dst |= src << shift & mask`; a negative shift shifts right.
    OrShifted { dst: String, src: String, shift: i32, mask: u64 },
    /// `if (src [& 1 << test]) dst |= 1 << bit`
    OrIf { dst: String, src: String, test: Option<u32>, bit: u32 },
}

/// Single-bit flags grouped by shared storage register, visited from the highest unified bit
/// down. Flags kept in the unified register itself are left out.
fn single_bit_cells(layout: &FlagLayout, unified: &str) -> (Vec<(String, u32)>, Vec<(String, Vec<(u32, u32)>)>) {
    let mut singles: Vec<(u32, &super::FlagDef)> = layout
        .flags()
        .iter()
        .filter(|flag| flag.storage.register != unified)
        .filter_map(|flag| match flag.bits {
            FlagBits::Single(bit) => Some((bit, flag)),
            FlagBits::Range { .. } => None,
        })
        .collect();
    singles.sort_by(|a, b| b.0.cmp(&a.0));
    let mut whole = Vec::new();
    let mut shared: Vec<(String, Vec<(u32, u32)>)> = Vec::new();
    for (bit, flag) in singles {
        match flag.storage.bit {
            None => whole.push((flag.storage.register.clone(), bit)),
            Some(cell_bit) => {
                let register = &flag.storage.register;
                match shared.iter_mut().find(|(name, _)| name == register) {
                    Some((_, bits)) => bits.push((cell_bit, bit)),
                    None => shared.push((register.clone(), vec![(cell_bit, bit)])),
                }
            }
        }
    }
    (whole, shared)
}

fn range_flags<'a>(layout: &'a FlagLayout, unified: &'a str) -> impl Iterator<Item = (&'a str, u32, u64)> + 'a {
    layout
        .flags()
        .iter()
        .filter(move |flag| flag.storage.register != unified)
        .filter_map(|flag| match flag.bits {
            FlagBits::Range { low, high } => Some((
                flag.storage.register.as_str(),
                low,
                mask_for_bits(high + 1 - low),
            )),
            FlagBits::Single(_) => None,
        })
}

/// Bits of the unified register that belong to flags stored in the unified register itself.
fn self_owned_mask(layout: &FlagLayout, unified: &str) -> u64 {
    layout
        .flags()
        .iter()
        .filter(|flag| flag.storage.register == unified)
        .map(|flag| match flag.bits {
            FlagBits::Single(bit) => 1u64 << bit,
            FlagBits::Range { low, high } => mask_for_bits(high + 1 - low) << low,
        })
        .fold(0, |acc, mask| acc | mask)
}

/// Builds the unified flag register from every storage cell.
pub fn coalesce(layout: &FlagLayout) -> Vec<FlagMove> {
    let Some(unified) = layout.register.as_deref() else {
        return Vec::new();
    };
    let mut moves = vec![FlagMove::Clear {
        dst: unified.to_string(),
        keep: self_owned_mask(layout, unified),
    }];
    for (src, low, mask) in range_flags(layout, unified) {
        moves.push(FlagMove::OrShifted {
            dst: unified.to_string(),
            src: src.to_string(),
            shift: low as i32,
            mask: mask << low,
        });
    }
    let (whole, shared) = single_bit_cells(layout, unified);
    for (src, bit) in whole {
        moves.push(FlagMove::OrIf {
            dst: unified.to_string(),
            src,
            test: None,
            bit,
        });
    }
    for (src, bits) in shared {
        let mut direct = 0u64;
        for (cell_bit, bit) in bits {
            if cell_bit == bit {
                direct |= 1 << bit;
            } else {
                moves.push(FlagMove::OrIf {
                    dst: unified.to_string(),
                    src: src.clone(),
                    test: Some(cell_bit),
                    bit,
                });
            }
        }
        if direct != 0 {
            moves.push(FlagMove::OrShifted {
                dst: unified.to_string(),
                src,
                shift: 0,
                mask: direct,
            });
        }
    }
    moves
}

/// Splits the unified flag register back into the storage cells.
pub fn disperse(layout: &FlagLayout) -> Vec<FlagMove> {
    let Some(unified) = layout.register.as_deref() else {
        return Vec::new();
    };
    let mut moves = Vec::new();
    for (dst, low, mask) in range_flags(layout, unified) {
        moves.push(FlagMove::Extract {
            dst: dst.to_string(),
            src: unified.to_string(),
            shift: low,
            mask,
        });
    }
    let (whole, shared) = single_bit_cells(layout, unified);
    for (dst, bit) in whole {
        moves.push(FlagMove::Copy {
            dst,
            src: unified.to_string(),
            mask: Some(1 << bit),
        });
    }
    for (dst, bits) in shared {
        let moved = bits.iter().any(|(cell_bit, bit)| cell_bit != bit);
        let direct = bits
            .iter()
            .filter(|(cell_bit, bit)| cell_bit == bit)
            .fold(0u64, |acc, (_, bit)| acc | 1 << bit);
        if !moved {
            let mask = (bits.len() != layout.flags_stored_in(&dst)).then_some(direct);
            moves.push(FlagMove::Copy {
                dst,
                src: unified.to_string(),
                mask,
            });
            continue;
        }
        moves.push(FlagMove::Clear {
            dst: dst.clone(),
            keep: 0,
        });
        for (cell_bit, bit) in bits.iter().filter(|(cell_bit, bit)| cell_bit != bit) {
            moves.push(FlagMove::OrShifted {
                dst: dst.clone(),
                src: unified.to_string(),
                shift: *cell_bit as i32 - *bit as i32,
                mask: 1 << cell_bit,
            });
        }
        if direct != 0 {
            moves.push(FlagMove::OrShifted {
                dst,
                src: unified.to_string(),
                shift: 0,
                mask: direct,
            });
        }
    }
    moves
}

/// Renders a plan; `place` maps register names to C lvalues.
pub fn render_moves(moves: &[FlagMove], place: impl Fn(&str) -> String) -> String {
    let mut out = String::new();
    for mv in moves {
        let line = match mv {
            FlagMove::Clear { dst, keep: 0 } => format!("\n\t{} = 0;", place(dst)),
            FlagMove::Clear { dst, keep } => format!("\n\t{} &= {keep}U;", place(dst)),
            FlagMove::Copy { dst, src, mask: None } => {
                format!("\n\t{} = {};", place(dst), place(src))
            }
            FlagMove::Copy {
                dst,
                src,
                mask: Some(mask),
            } => format!("\n\t{} = {} & {mask};", place(dst), place(src)),
            FlagMove::Extract { dst, src, shift: 0, mask } => {
                format!("\n\t{} = {} & {mask};", place(dst), place(src))
            }
            FlagMove::Extract {
                dst,
                src,
                shift,
                mask,
            } => format!("\n\t{} = {} >> {shift} & {mask};", place(dst), place(src)),
            FlagMove::OrShifted {
                dst,
                src,
                shift,
                mask,
            } => {
                let src = place(src);
                let shifted = match shift.cmp(&0) {
                    std::cmp::Ordering::Equal => src,
                    std::cmp::Ordering::Greater => format!("{src} << {shift}"),
                    std::cmp::Ordering::Less => format!("{src} >> {}", -shift),
                };
                format!("\n\t{} |= {shifted} & {mask};", place(dst))
            }
            FlagMove::OrIf {
                dst,
                src,
                test,
                bit,
            } => {
                let cond = match test {
                    Some(test) => format!("{} & (1 << {test})", place(src)),
                    None => place(src),
                };
                format!("\n\tif ({cond}) {{\n\t\t{} |= 1 << {bit};\n\t}}", place(dst))
            }
        };
        out.push_str(&line);
    }
    out
}

/// Interprets a plan over a register file.
#[cfg(test)]
pub(crate) fn simulate(moves: &[FlagMove], regs: &mut std::collections::BTreeMap<String, u64>) {
    for mv in moves {
        match mv {
            FlagMove::Clear { dst, keep } => {
                let value = regs.get(dst).copied().unwrap_or(0) & keep;
                regs.insert(dst.clone(), value);
            }
            FlagMove::Copy { dst, src, mask } => {
                let value = regs.get(src).copied().unwrap_or(0) & mask.unwrap_or(u64::MAX);
                regs.insert(dst.clone(), value);
            }
            FlagMove::Extract {
                dst,
                src,
                shift,
                mask,
            } => {
                let value = (regs.get(src).copied().unwrap_or(0) >> shift) & mask;
                regs.insert(dst.clone(), value);
            }
            FlagMove::OrShifted {
                dst,
                src,
                shift,
                mask,
            } => {
                let src = regs.get(src).copied().unwrap_or(0);
                let shifted = if *shift >= 0 {
                    src << *shift as u32
                } else {
                    src >> shift.unsigned_abs()
                };
                *regs.entry(dst.clone()).or_insert(0) |= shifted & mask;
            }
            FlagMove::OrIf {
                dst,
                src,
                test,
                bit,
            } => {
                let src = regs.get(src).copied().unwrap_or(0);
                let hit = match test {
                    Some(test) => src & (1 << test) != 0,
                    None => src != 0,
                };
                if hit {
                    *regs.entry(dst.clone()).or_insert(0) |= 1 << bit;
                }
            }
        }
    }
}
