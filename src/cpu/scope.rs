//! Lexical scopes of a generated body and the known-constant snapshot threaded through them.

use ahash::AHashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Instruction,
    /// Inlined helper; its locals are mangled with the helper name.
    Helper { name: String },
    /// Body of an `if` or `else`.
    Branch,
    /// Body of a `case` or `default`.
    Case,
}

impl FrameKind {
    fn is_routine(&self) -> bool {
        matches!(self, FrameKind::Instruction | FrameKind::Helper { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ScopeFrame {
    pub kind: FrameKind,
    locals: Vec<FrameLocal>,
}

/// A local declared by a frame, with the C name it was given when the frame was pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLocal {
    pub name: String,
    pub c_name: String,
    pub width: u32,
}

impl ScopeFrame {
    pub fn new(kind: FrameKind, locals: Vec<FrameLocal>) -> Self {
        Self { kind, locals }
    }

    pub fn locals(&self) -> &[FrameLocal] {
        &self.locals
    }

    fn local(&self, name: &str) -> Option<&FrameLocal> {
        self.locals.iter().find(|local| local.name == name)
    }
}

/// A local found through the scope stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRef {
    /// Name as emitted in C.
    pub c_name: String,
    pub width: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: ScopeFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<ScopeFrame> {
        self.frames.pop()
    }

    /// Innermost-first lookup that stops at the nearest routine frame, so a helper never sees
    /// its caller's locals.
    pub fn resolve_local(&self, name: &str) -> Option<LocalRef> {
        for frame in self.frames.iter().rev() {
            if let Some(local) = frame.local(name) {
                return Some(LocalRef {
                    c_name: local.c_name.clone(),
                    width: local.width,
                });
            }
            if frame.kind.is_routine() {
                break;
            }
        }
        None
    }

    /// True while some frame on the stack owns a local emitted as `c_name`.
    pub fn is_live(&self, c_name: &str) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.locals.iter().any(|local| local.c_name == c_name))
    }

    /// Name of the innermost inlined helper, if any.
    pub fn current_helper(&self) -> Option<&str> {
        self.frames.iter().rev().find_map(|frame| match &frame.kind {
            FrameKind::Helper { name } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Values known at generation time, keyed by canonical storage name (`a`, `main[3]`, C name of
/// a local). Branches work on a clone; the join keeps only what every path agrees on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownValues {
    values: AHashMap<String, u64>,
}

impl KnownValues {
    pub fn get(&self, key: &str) -> Option<u64> {
        self.values.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, value: u64) {
        self.values.insert(key.into(), value);
    }

    pub fn forget(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// Forgets every slot of a register array.
    pub fn forget_array(&mut self, array: &str) {
        let prefix = format!("{array}[");
        self.values.retain(|key, _| !key.starts_with(&prefix));
    }

    /// Keeps only the entries selected by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.values.retain(|key, _| keep(key));
    }

    pub fn intersect(&self, other: &KnownValues) -> KnownValues {
        let values = self
            .values
            .iter()
            .filter(|(key, value)| other.values.get(*key) == Some(*value))
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        KnownValues { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locals(names: &[(&str, &str, u32)]) -> Vec<FrameLocal> {
        names
            .iter()
            .map(|(name, c_name, width)| FrameLocal {
                name: name.to_string(),
                c_name: c_name.to_string(),
                width: *width,
            })
            .collect()
    }

    #[test]
    fn innermost_local_shadows_outer() {
        let mut scopes = ScopeStack::new();
        scopes.push(ScopeFrame::new(FrameKind::Instruction, locals(&[("tmp", "tmp", 8)])));
        scopes.push(ScopeFrame::new(FrameKind::Branch, locals(&[("tmp", "tmp_1", 16)])));
        assert_eq!(
            scopes.resolve_local("tmp"),
            Some(LocalRef {
                c_name: "tmp_1".into(),
                width: 16
            })
        );
        assert!(scopes.is_live("tmp"));
        scopes.pop();
        assert_eq!(scopes.resolve_local("tmp").map(|local| local.c_name), Some("tmp".into()));
        assert!(!scopes.is_live("tmp_1"));
    }

    #[test]
    fn helper_frames_hide_caller_locals() {
        let mut scopes = ScopeStack::new();
        scopes.push(ScopeFrame::new(FrameKind::Instruction, locals(&[("caller", "caller", 8)])));
        scopes.push(ScopeFrame::new(
            FrameKind::Helper {
                name: "fetch".into(),
            },
            locals(&[("word", "fetch_word", 16)]),
        ));
        scopes.push(ScopeFrame::new(FrameKind::Case, Vec::new()));
        assert_eq!(
            scopes.resolve_local("word"),
            Some(LocalRef {
                c_name: "fetch_word".into(),
                width: 16
            })
        );
        assert_eq!(scopes.resolve_local("caller"), None);
        assert_eq!(scopes.current_helper(), Some("fetch"));
    }

    #[test]
    fn join_keeps_only_agreeing_constants() {
        let mut before = KnownValues::default();
        before.set("a", 1);
        before.set("b", 2);
        let mut left = before.clone();
        let mut right = before.clone();
        left.set("a", 5);
        right.forget("b");
        let joined = left.intersect(&right);
        assert_eq!(joined.get("a"), None);
        assert_eq!(joined.get("b"), None);
        let same = before.intersect(&before.clone());
        assert_eq!(same, before);
    }

    #[test]
    fn array_invalidation_clears_every_slot() {
        let mut known = KnownValues::default();
        known.set("main[0]", 1);
        known.set("main[7]", 2);
        known.set("mainline", 3);
        known.forget_array("main");
        assert_eq!(known.get("main[0]"), None);
        assert_eq!(known.get("mainline"), Some(3));
    }
}
