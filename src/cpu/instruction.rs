//! Bitfield instruction model: one opcode pattern with variable fields, its exclusions, and the
//! concrete opcode values it expands to.

use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

use super::ast::Block;

/// Placement of one variable field inside the opcode word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    /// LSB position of the field.
    pub shift: u32,
    pub width: u32,
}

impl FieldSpec {
    pub fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    pub fn mask(&self) -> u64 {
        mask_for_bits(self.width)
    }
}

/// Decoded value of a single field for one concrete opcode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldValue {
    pub name: String,
    pub value: u64,
    pub width: u32,
}

pub type FieldValues = SmallVec<[FieldValue; 4]>;

#[derive(Clone, Debug, PartialEq)]
pub struct InstructionDef {
    pub name: String,
    /// Fixed bits of the pattern; variable positions are zero.
    pub value: u64,
    /// Fields in the order they first appear in the pattern (MSB first).
    pub fields: SmallVec<[(String, FieldSpec); 4]>,
    pub block: Block,
    pub invalid_values: BTreeMap<String, BTreeSet<u64>>,
    pub invalid_combos: Vec<SmallVec<[(String, u64); 4]>>,
    pub line: usize,
}

impl InstructionDef {
    pub fn new(name: impl Into<String>, value: u64, fields: SmallVec<[(String, FieldSpec); 4]>) -> Self {
        Self {
            name: name.into(),
            value,
            fields,
            block: Block::new(),
            invalid_values: BTreeMap::new(),
            invalid_combos: Vec::new(),
            line: 0,
        }
    }

    /// Builds a definition from a pattern such as `1010oooo`.
    pub fn from_pattern(pattern: &str, name: impl Into<String>) -> Result<Self, String> {
        let (value, fields) = parse_pattern(pattern)?;
        Ok(Self::new(name, value, fields))
    }

    pub fn varying_bits(&self) -> u32 {
        self.fields.iter().map(|(_, spec)| spec.width).sum()
    }

    /// Sort key used to let narrower definitions claim dispatch slots first.
    pub fn specificity(&self) -> (u32, u64) {
        (self.varying_bits(), self.value)
    }

    pub fn field(&self, name: &str) -> Option<FieldSpec> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, spec)| *spec)
    }

    pub fn exclude_value(&mut self, field: impl Into<String>, value: u64) {
        self.invalid_values
            .entry(field.into())
            .or_default()
            .insert(value);
    }

    pub fn exclude_combo(&mut self, combo: SmallVec<[(String, u64); 4]>) {
        self.invalid_combos.push(combo);
    }

    /// Every concrete opcode value covered by this definition, in raw counter order.
    pub fn enumerate(&self) -> impl Iterator<Item = u64> + '_ {
        let total = 1u64 << self.varying_bits();
        (0..total).filter_map(move |counter| self.encode_counter(counter))
    }

    /// Expands one raw counter value into an opcode, or `None` when an exclusion matches. The
    /// check stops at the first field that decides the outcome.
    fn encode_counter(&self, mut counter: u64) -> Option<u64> {
        let mut word = self.value;
        let mut matched: SmallVec<[usize; 4]> = SmallVec::from_elem(0, self.invalid_combos.len());
        let mut alive: SmallVec<[bool; 4]> = SmallVec::from_elem(true, self.invalid_combos.len());
        for (name, spec) in &self.fields {
            let val = counter & spec.mask();
            if self
                .invalid_values
                .get(name)
                .is_some_and(|values| values.contains(&val))
            {
                return None;
            }
            for (idx, combo) in self.invalid_combos.iter().enumerate() {
                if !alive[idx] {
                    continue;
                }
                if let Some((_, excluded)) = combo.iter().find(|(field, _)| field == name) {
                    if *excluded == val {
                        matched[idx] += 1;
                        if matched[idx] == combo.len() {
                            return None;
                        }
                    } else {
                        alive[idx] = false;
                    }
                }
            }
            counter >>= spec.width;
            word |= val << spec.shift;
        }
        Some(word)
    }

    pub fn field_values(&self, value: u64) -> FieldValues {
        self.fields
            .iter()
            .map(|(name, spec)| FieldValue {
                name: name.clone(),
                value: (value >> spec.shift) & spec.mask(),
                width: spec.width,
            })
            .collect()
    }

    /// Inverse of [`field_values`](Self::field_values).
    pub fn encode(&self, values: &[FieldValue]) -> u64 {
        let mut word = self.value;
        for field in values {
            if let Some(spec) = self.field(&field.name) {
                word |= (field.value & spec.mask()) << spec.shift;
            }
        }
        word
    }

    /// Unique routine name for one concrete opcode, e.g. `ld_r_010_s_11`.
    pub fn routine_name(&self, value: u64) -> String {
        let mut values = self.field_values(value);
        values.sort_by(|a, b| a.name.cmp(&b.name));
        let mut name = self.name.clone();
        for field in values {
            name.push_str(&format!(
                "_{}_{:0width$b}",
                field.name,
                field.value,
                width = field.width as usize
            ));
        }
        name
    }
}

/// Splits a bit pattern into its fixed value and variable fields. Every character other than
/// `0`/`1` names a field; a field's bits must be contiguous.
pub fn parse_pattern(pattern: &str) -> Result<(u64, SmallVec<[(String, FieldSpec); 4]>), String> {
    if pattern.is_empty() {
        return Err("empty bit pattern".into());
    }
    if pattern.len() > 64 {
        return Err(format!("bit pattern '{pattern}' is wider than 64 bits"));
    }
    let mut value = 0u64;
    let mut fields: SmallVec<[(String, FieldSpec); 4]> = SmallVec::new();
    let mut previous: Option<char> = None;
    let mut bit = pattern.len() as u32;
    for ch in pattern.chars() {
        bit -= 1;
        value <<= 1;
        match ch {
            '0' => {}
            '1' => value |= 1,
            field => {
                let name = field.to_string();
                match fields.iter_mut().find(|(existing, _)| *existing == name) {
                    Some((_, spec)) => {
                        if previous != Some(field) {
                            return Err(format!(
                                "field '{field}' is not contiguous in pattern '{pattern}'"
                            ));
                        }
                        spec.shift = bit;
                        spec.width += 1;
                    }
                    None => fields.push((name, FieldSpec::new(bit, 1))),
                }
            }
        }
        previous = Some(ch);
    }
    Ok((value, fields))
}

pub(crate) fn mask_for_bits(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}
