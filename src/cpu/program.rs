//! Parsed CPU description plus the settings one compilation runs with.

use std::collections::BTreeMap;

use ahash::AHashMap;
use tracing::warn;

use super::error::{DslError, DslResult};
use super::flags::FlagLayout;
use super::instruction::InstructionDef;
use super::registers::RegisterLayout;
use super::subroutine::HelperDef;

/// How generated bodies are reached from the dispatch tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dispatch {
    /// One C function per opcode and tables of function pointers.
    #[default]
    Call,
    /// Accepted on the command line but not implemented by the generator.
    Switch,
    /// Labels inside a single execute function and tables of label addresses.
    Goto,
}

impl Dispatch {
    pub fn name(self) -> &'static str {
        match self {
            Dispatch::Call => "call",
            Dispatch::Switch => "switch",
            Dispatch::Goto => "goto",
        }
    }
}

/// Everything the front end reads from a description file.
#[derive(Debug, Clone, Default)]
pub struct CpuDescription {
    pub registers: RegisterLayout,
    pub flags: FlagLayout,
    /// Instruction definitions keyed by dispatch table name.
    pub instructions: BTreeMap<String, Vec<InstructionDef>>,
    pub helpers: AHashMap<String, HelperDef>,
    /// Raw `info` records: key followed by its values.
    pub info: BTreeMap<String, Vec<String>>,
    pub declares: Vec<String>,
}

const INFO_KEYS: [&str; 8] = [
    "prefix",
    "opcode_size",
    "extra_tables",
    "body",
    "interrupt",
    "sync_cycle",
    "include",
    "header",
];

/// Typed view of the `info` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    pub prefix: String,
    pub opcode_size: u32,
    pub extra_tables: Vec<String>,
    pub body: Option<String>,
    pub interrupt: Option<String>,
    pub sync_routine: Option<String>,
    pub includes: Vec<String>,
    pub header: Option<String>,
}

impl Default for ProgramInfo {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            opcode_size: 8,
            extra_tables: Vec::new(),
            body: None,
            interrupt: None,
            sync_routine: None,
            includes: Vec::new(),
            header: None,
        }
    }
}

impl ProgramInfo {
    pub fn from_records(records: &BTreeMap<String, Vec<String>>) -> DslResult<Self> {
        let first = |key: &str| {
            records
                .get(key)
                .and_then(|values| values.first())
                .cloned()
        };
        let list = |key: &str| records.get(key).cloned().unwrap_or_default();
        for key in records.keys() {
            if !INFO_KEYS.contains(&key.as_str()) {
                warn!(key = key.as_str(), "ignoring unknown info key");
            }
        }
        let opcode_size = match first("opcode_size") {
            Some(text) => text
                .parse::<u32>()
                .ok()
                .filter(|size| (1..=24).contains(size))
                .ok_or_else(|| DslError::Generation(format!("invalid opcode_size '{text}'")))?,
            None => 8,
        };
        Ok(Self {
            prefix: first("prefix").unwrap_or_default(),
            opcode_size,
            extra_tables: list("extra_tables"),
            body: first("body"),
            interrupt: first("interrupt"),
            sync_routine: first("sync_cycle"),
            includes: list("include"),
            header: first("header"),
        })
    }

    pub fn context_type(&self) -> String {
        format!("{}context", self.prefix)
    }

    pub fn table_size(&self) -> usize {
        1usize << self.opcode_size
    }
}

/// Command-line settings of one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub dispatch: Dispatch,
    /// `-D` boolean flags in command-line order.
    pub defines: Vec<(String, bool)>,
    /// Constant folding of ops whose inputs are known at generation time.
    pub fold: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            dispatch: Dispatch::Call,
            defines: Vec::new(),
            fold: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub regs: RegisterLayout,
    pub flags: FlagLayout,
    pub instructions: BTreeMap<String, Vec<InstructionDef>>,
    pub helpers: AHashMap<String, HelperDef>,
    pub info: ProgramInfo,
    pub declares: Vec<String>,
    pub options: CompileOptions,
    booleans: AHashMap<String, bool>,
}

impl Program {
    pub fn new(desc: CpuDescription, options: CompileOptions) -> DslResult<Self> {
        if options.dispatch == Dispatch::Switch {
            return Err(DslError::UnsupportedDispatch(options.dispatch.name().into()));
        }
        let info = ProgramInfo::from_records(&desc.info)?;
        let mut booleans = AHashMap::new();
        booleans.insert("dynarec".to_string(), false);
        booleans.insert("interp".to_string(), true);
        for (name, value) in &options.defines {
            booleans.insert(name.clone(), *value);
        }
        Ok(Self {
            regs: desc.registers,
            flags: desc.flags,
            instructions: desc.instructions,
            helpers: desc.helpers,
            info,
            declares: desc.declares,
            options,
            booleans,
        })
    }

    /// Compile-time boolean flag, if one with this name is defined.
    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.booleans.get(name).copied()
    }

    pub(crate) fn helper(&self, role: &'static str, name: &str) -> DslResult<&HelperDef> {
        self.helpers.get(name).ok_or_else(|| DslError::MissingRoutine {
            role,
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(key, values)| {
                (
                    key.to_string(),
                    values.iter().map(|value| value.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn info_defaults_to_byte_opcodes() {
        let info = ProgramInfo::from_records(&BTreeMap::new()).expect("info");
        assert_eq!(info.opcode_size, 8);
        assert_eq!(info.table_size(), 256);
        assert_eq!(info.context_type(), "context");
    }

    #[test]
    fn info_records_map_to_fields() {
        let info = ProgramInfo::from_records(&records(&[
            ("prefix", &["z80_"]),
            ("extra_tables", &["cb", "ed"]),
            ("include", &["z80_util.c"]),
            ("sync_cycle", &["z80_sync_cycle"]),
        ]))
        .expect("info");
        assert_eq!(info.context_type(), "z80_context");
        assert_eq!(info.extra_tables, vec!["cb".to_string(), "ed".to_string()]);
        assert_eq!(info.sync_routine.as_deref(), Some("z80_sync_cycle"));
    }

    #[test]
    fn bad_opcode_size_is_rejected() {
        let err = ProgramInfo::from_records(&records(&[("opcode_size", &["wide"])])).unwrap_err();
        assert!(matches!(err, DslError::Generation(_)));
    }

    #[test]
    fn defines_override_predefined_booleans() {
        let options = CompileOptions {
            defines: vec![("dynarec".into(), true), ("z80_debug".into(), false)],
            ..CompileOptions::default()
        };
        let program = Program::new(CpuDescription::default(), options).expect("program");
        assert_eq!(program.boolean("dynarec"), Some(true));
        assert_eq!(program.boolean("interp"), Some(true));
        assert_eq!(program.boolean("z80_debug"), Some(false));
        assert_eq!(program.boolean("other"), None);
    }

    #[test]
    fn switch_dispatch_is_refused() {
        let options = CompileOptions {
            dispatch: Dispatch::Switch,
            ..CompileOptions::default()
        };
        let err = Program::new(CpuDescription::default(), options).unwrap_err();
        assert!(matches!(err, DslError::UnsupportedDispatch(kind) if kind == "switch"));
    }
}
