//! Register file layout: plain registers, register arrays (counted or aliased), and pointer
//! fields stored in the generated context structure.

use ahash::AHashMap;

/// Registers every generated context carries.
pub const IMPLICIT_REGISTERS: [&str; 2] = ["cycles", "sync_cycle"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArraySlots {
    Count(usize),
    Aliases(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterArray {
    pub name: String,
    pub width: u32,
    pub slots: ArraySlots,
}

impl RegisterArray {
    pub fn len(&self) -> usize {
        match &self.slots {
            ArraySlots::Count(count) => *count,
            ArraySlots::Aliases(aliases) => aliases.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn alias(&self, index: usize) -> Option<&str> {
        match &self.slots {
            ArraySlots::Aliases(aliases) => aliases.get(index).map(String::as_str),
            ArraySlots::Count(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerField {
    pub name: String,
    /// C type of the innermost pointee, e.g. `uint8_t` or `z80_context`.
    pub pointee: String,
    pub depth: u32,
    pub count: usize,
}

impl PointerField {
    /// Parses the `ptr<type>` spelling used in `regs` blocks; `ptrptr8` is a pointer to a
    /// pointer to `uint8_t`.
    pub fn parse(name: &str, spec: &str, count: usize) -> Option<Self> {
        let mut rest = spec.strip_prefix("ptr")?;
        let mut depth = 1;
        while let Some(inner) = rest.strip_prefix("ptr") {
            depth += 1;
            rest = inner;
        }
        if rest.is_empty() {
            return None;
        }
        let pointee = if rest.chars().all(|ch| ch.is_ascii_digit()) {
            format!("uint{rest}_t")
        } else {
            rest.to_string()
        };
        Some(Self {
            name: name.to_string(),
            pointee,
            depth,
            count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    Duplicate { name: String },
    AliasConflict { name: String, array: String },
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterError::Duplicate { name } => {
                write!(f, "register '{name}' declared multiple times")
            }
            RegisterError::AliasConflict { name, array } => write!(
                f,
                "register '{name}' is a member of array '{array}' and cannot be declared standalone"
            ),
        }
    }
}

pub enum RegisterLookup<'a> {
    Plain { width: u32 },
    Member { array: &'a RegisterArray, index: usize },
    Array(&'a RegisterArray),
    Pointer(&'a PointerField),
}

#[derive(Debug, Clone)]
pub struct RegisterLayout {
    plain: AHashMap<String, u32>,
    arrays: AHashMap<String, RegisterArray>,
    members: AHashMap<String, (String, usize)>,
    pointers: Vec<PointerField>,
}

impl Default for RegisterLayout {
    fn default() -> Self {
        let mut plain = AHashMap::new();
        for name in IMPLICIT_REGISTERS {
            plain.insert(name.to_string(), 32);
        }
        Self {
            plain,
            arrays: AHashMap::new(),
            members: AHashMap::new(),
            pointers: Vec::new(),
        }
    }
}

impl RegisterLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_register(&mut self, name: &str, width: u32) -> Result<(), RegisterError> {
        if let Some((array, _)) = self.members.get(name) {
            return Err(RegisterError::AliasConflict {
                name: name.to_string(),
                array: array.clone(),
            });
        }
        if self.arrays.contains_key(name)
            || (self.plain.contains_key(name) && !IMPLICIT_REGISTERS.contains(&name))
        {
            return Err(RegisterError::Duplicate {
                name: name.to_string(),
            });
        }
        self.plain.insert(name.to_string(), width);
        Ok(())
    }

    pub fn add_array(&mut self, name: &str, width: u32, slots: ArraySlots) -> Result<(), RegisterError> {
        if self.arrays.contains_key(name) || self.plain.contains_key(name) {
            return Err(RegisterError::Duplicate {
                name: name.to_string(),
            });
        }
        if let ArraySlots::Aliases(aliases) = &slots {
            for (index, alias) in aliases.iter().enumerate() {
                if self.plain.contains_key(alias) || self.members.contains_key(alias) {
                    return Err(RegisterError::AliasConflict {
                        name: alias.clone(),
                        array: name.to_string(),
                    });
                }
                self.members
                    .insert(alias.clone(), (name.to_string(), index));
            }
        }
        self.arrays.insert(
            name.to_string(),
            RegisterArray {
                name: name.to_string(),
                width,
                slots,
            },
        );
        Ok(())
    }

    pub fn add_pointer(&mut self, pointer: PointerField) -> Result<(), RegisterError> {
        if self.pointers.iter().any(|existing| existing.name == pointer.name) {
            return Err(RegisterError::Duplicate { name: pointer.name });
        }
        self.pointers.push(pointer);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<RegisterLookup<'_>> {
        if let Some(width) = self.plain.get(name) {
            return Some(RegisterLookup::Plain { width: *width });
        }
        if let Some((array, index)) = self.members.get(name) {
            let array = self.arrays.get(array)?;
            return Some(RegisterLookup::Member {
                array,
                index: *index,
            });
        }
        if let Some(array) = self.arrays.get(name) {
            return Some(RegisterLookup::Array(array));
        }
        self.pointers
            .iter()
            .find(|pointer| pointer.name == name)
            .map(RegisterLookup::Pointer)
    }

    pub fn array(&self, name: &str) -> Option<&RegisterArray> {
        self.arrays.get(name)
    }

    /// Array and slot index for an aliased array member such as `a7`.
    pub fn member(&self, name: &str) -> Option<(&RegisterArray, usize)> {
        let (array, index) = self.members.get(name)?;
        Some((self.arrays.get(array)?, *index))
    }

    /// True for plain registers and aliased array members.
    pub fn is_register(&self, name: &str) -> bool {
        self.plain.contains_key(name) || self.members.contains_key(name)
    }

    pub fn width(&self, name: &str) -> Option<u32> {
        match self.lookup(name)? {
            RegisterLookup::Plain { width } => Some(width),
            RegisterLookup::Member { array, .. } | RegisterLookup::Array(array) => Some(array.width),
            RegisterLookup::Pointer(_) => None,
        }
    }

    /// C lvalue for a register named directly (`a`, an alias, or `array.N`). No index
    /// resolution happens here; the name must already be concrete.
    pub fn place(&self, name: &str) -> Option<String> {
        if let Some((array, index)) = name.split_once('.') {
            let array = self.arrays.get(array)?;
            let index = match self.members.get(index) {
                Some((_, slot)) => slot.to_string(),
                None => index.to_string(),
            };
            return Some(format!("context->{}[{index}]", array.name));
        }
        match self.lookup(name)? {
            RegisterLookup::Member { array, index } => {
                Some(format!("context->{}[{index}]", array.name))
            }
            _ => Some(format!("context->{name}")),
        }
    }

    pub fn pointers(&self) -> &[PointerField] {
        &self.pointers
    }

    /// `(width, count, name)` for every storage field of the context struct, widest first.
    pub fn context_fields(&self) -> Vec<(u32, usize, String)> {
        let mut fields: Vec<(u32, usize, String)> = self
            .plain
            .iter()
            .map(|(name, width)| (*width, 1, name.clone()))
            .collect();
        fields.extend(
            self.arrays
                .values()
                .map(|array| (array.width, array.len(), array.name.clone())),
        );
        fields.sort();
        fields.reverse();
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layout() -> RegisterLayout {
        let mut layout = RegisterLayout::new();
        layout.add_register("a", 8).expect("a");
        layout.add_register("pc", 16).expect("pc");
        layout
            .add_array(
                "main",
                8,
                ArraySlots::Aliases(vec!["b".into(), "c".into(), "d".into()]),
            )
            .expect("main");
        layout.add_array("d32", 32, ArraySlots::Count(8)).expect("d32");
        layout
    }

    #[test]
    fn aliases_resolve_to_array_slots() {
        let layout = sample_layout();
        let (array, index) = layout.member("c").expect("member");
        assert_eq!(array.name, "main");
        assert_eq!(index, 1);
        assert_eq!(layout.width("c"), Some(8));
        assert!(layout.is_register("c"));
        assert!(!layout.is_register("d32"));
    }

    #[test]
    fn aliased_member_cannot_be_redeclared() {
        let mut layout = sample_layout();
        let err = layout.add_register("b", 8).unwrap_err();
        assert_eq!(
            err,
            RegisterError::AliasConflict {
                name: "b".into(),
                array: "main".into()
            }
        );
    }

    #[test]
    fn places_render_context_lvalues() {
        let layout = sample_layout();
        assert_eq!(layout.place("a").as_deref(), Some("context->a"));
        assert_eq!(layout.place("d").as_deref(), Some("context->main[2]"));
        assert_eq!(layout.place("d32.3").as_deref(), Some("context->d32[3]"));
        assert_eq!(layout.place("main.c").as_deref(), Some("context->main[1]"));
        assert_eq!(layout.place("nothing"), None);
    }

    #[test]
    fn implicit_cycle_registers_are_present() {
        let layout = RegisterLayout::new();
        assert_eq!(layout.width("cycles"), Some(32));
        assert_eq!(layout.width("sync_cycle"), Some(32));
    }

    #[test]
    fn pointer_specs_track_depth_and_type() {
        let ptr = PointerField::parse("mem_pointers", "ptr8", 4).expect("pointer");
        assert_eq!(ptr.pointee, "uint8_t");
        assert_eq!(ptr.depth, 1);
        let nested = PointerField::parse("system", "ptrptrvoid", 1).expect("pointer");
        assert_eq!(nested.pointee, "void");
        assert_eq!(nested.depth, 2);
        assert!(PointerField::parse("x", "ptr", 1).is_none());
    }

    #[test]
    fn context_fields_sort_widest_first() {
        let layout = sample_layout();
        let fields = layout.context_fields();
        assert_eq!(fields.first(), Some(&(32, 8, "d32".to_string())));
        assert_eq!(fields.last(), Some(&(8, 1, "a".to_string())));
    }
}
