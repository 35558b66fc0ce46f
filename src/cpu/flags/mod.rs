//! Status flag layout: where each flag lives in the unified flag register, how it is computed,
//! and where the interpreter keeps it between instructions.

pub mod transfer;
pub mod update;

pub use transfer::{FlagMove, coalesce, disperse, render_moves};
pub use update::{apply_update, carry_check};

use super::error::{DslError, DslResult};
use super::ops::FlagNeeds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagCalc {
    /// `bit-N`: copy bit N of the result, offset by the operation width minus 8.
    Bit(u32),
    Sign,
    Zero,
    Carry,
    HalfCarry,
    Overflow,
    Parity,
    /// Flag that always takes a fixed value.
    Literal(bool),
}

impl FlagCalc {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "sign" => Some(FlagCalc::Sign),
            "zero" => Some(FlagCalc::Zero),
            "carry" => Some(FlagCalc::Carry),
            "half-carry" => Some(FlagCalc::HalfCarry),
            "overflow" => Some(FlagCalc::Overflow),
            "parity" => Some(FlagCalc::Parity),
            "0" => Some(FlagCalc::Literal(false)),
            "1" => Some(FlagCalc::Literal(true)),
            other => other
                .strip_prefix("bit-")
                .and_then(|bit| bit.parse().ok())
                .map(FlagCalc::Bit),
        }
    }
}

/// Storage cell of a flag: a whole register or one bit of a shared register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagStorage {
    pub register: String,
    pub bit: Option<u32>,
}

impl FlagStorage {
    pub fn parse(text: &str) -> Option<Self> {
        match text.split_once('.') {
            Some((register, bit)) => Some(Self {
                register: register.to_string(),
                bit: Some(bit.parse().ok()?),
            }),
            None if !text.is_empty() => Some(Self {
                register: text.to_string(),
                bit: None,
            }),
            None => None,
        }
    }
}

/// Position of a flag inside the unified flag register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagBits {
    Single(u32),
    Range { low: u32, high: u32 },
}

impl FlagBits {
    /// Parses `N` or `low-high`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.split_once('-') {
            Some((low, high)) => {
                let (low, high): (u32, u32) = (low.parse().ok()?, high.parse().ok()?);
                (low <= high).then_some(FlagBits::Range { low, high })
            }
            None => text.parse().ok().map(FlagBits::Single),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagDef {
    pub letter: char,
    pub bits: FlagBits,
    pub calc: FlagCalc,
    pub storage: FlagStorage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagLayout {
    /// Unified flag register as the guest software sees it.
    pub register: Option<String>,
    flags: Vec<FlagDef>,
}

impl FlagLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, flag: FlagDef) -> Result<(), String> {
        if self.flags.iter().any(|existing| existing.letter == flag.letter) {
            return Err(format!("flag '{}' declared multiple times", flag.letter));
        }
        self.flags.push(flag);
        Ok(())
    }

    pub fn flags(&self) -> &[FlagDef] {
        &self.flags
    }

    pub fn flag(&self, letter: char) -> DslResult<&FlagDef> {
        self.flags
            .iter()
            .find(|flag| flag.letter == letter)
            .ok_or(DslError::UndefinedFlag(letter))
    }

    pub fn carry_flag(&self) -> Option<&FlagDef> {
        self.flags.iter().find(|flag| flag.calc == FlagCalc::Carry)
    }

    /// Number of flags kept in `register`, whether in single bits or the whole register.
    pub fn flags_stored_in(&self, register: &str) -> usize {
        self.flags
            .iter()
            .filter(|flag| flag.storage.register == register)
            .count()
    }

    pub fn is_flag_register(&self, name: &str) -> bool {
        self.register.as_deref() == Some(name)
    }

    /// Parses an `update_flags` directive. Letters alone are computed from the previous
    /// operation; a letter followed by `0` or `1` is forced to that value.
    pub fn parse_update(&self, directive: &str) -> DslResult<FlagUpdate> {
        let invalid = |reason: &str| DslError::InvalidFlagUpdate {
            directive: directive.to_string(),
            reason: reason.to_string(),
        };
        let mut update = FlagUpdate::default();
        let mut pending: Option<char> = None;
        for ch in directive.chars() {
            if let Some(digit) = ch.to_digit(10) {
                let Some(letter) = pending.take() else {
                    return Err(invalid("a digit must follow a flag letter"));
                };
                if digit > 1 {
                    return Err(invalid(&format!("{ch} is not a valid digit")));
                }
                self.flag(letter)?;
                update.force(letter, digit == 1);
            } else if ch.is_ascii_alphabetic() {
                if let Some(letter) = pending.replace(ch) {
                    self.flag(letter)?;
                    update.compute(letter);
                }
            } else {
                return Err(invalid(&format!("unexpected character '{ch}'")));
            }
        }
        if let Some(letter) = pending {
            self.flag(letter)?;
            update.compute(letter);
        }
        Ok(update)
    }

    /// Calculations the op preceding `update` has to keep visible.
    pub fn needs(&self, update: &FlagUpdate) -> FlagNeeds {
        let mut needs = FlagNeeds {
            pending: true,
            ..FlagNeeds::default()
        };
        for flag in update.computed.iter().filter_map(|letter| self.flag(*letter).ok()) {
            match flag.calc {
                FlagCalc::Carry => needs.carry = true,
                FlagCalc::HalfCarry => needs.half = true,
                FlagCalc::Overflow => needs.overflow = true,
                _ => {}
            }
        }
        needs
    }
}

/// Parsed `update_flags` directive in directive order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagUpdate {
    pub computed: Vec<char>,
    pub forced: Vec<(char, bool)>,
}

impl FlagUpdate {
    fn compute(&mut self, letter: char) {
        if !self.computed.contains(&letter) {
            self.computed.push(letter);
        }
    }

    fn force(&mut self, letter: char, value: bool) {
        self.computed.retain(|existing| *existing != letter);
        match self.forced.iter_mut().find(|(existing, _)| *existing == letter) {
            Some(entry) => entry.1 = value,
            None => self.forced.push((letter, value)),
        }
    }
}
