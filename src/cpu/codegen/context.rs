//! Scratch state of one generated body.

use ahash::AHashMap;

use super::resolve::Binding;
use crate::cpu::ast::LocalDecl;
use crate::cpu::error::DslResult;
use crate::cpu::ops::OpState;
use crate::cpu::scope::{FrameKind, FrameLocal, KnownValues, ScopeFrame, ScopeStack};
use crate::cpu::subroutine::mangle_local;

/// Everything that must not leak from one generated body into the next. A fresh value is
/// created for every opcode body, execute-loop section and goto trailer.
#[derive(Debug, Default)]
pub struct BodyContext {
    pub scopes: ScopeStack,
    pub known: KnownValues,
    pub meta: AHashMap<String, Binding>,
    pub ops: OpState,
    pub needs_coalesce: bool,
    pub needs_disperse: bool,
    /// Set while generating inside a branch decided at run time.
    pub conditional: bool,
    /// Index in `out` of the text of the most recent `cmp`.
    pub cmp_at: Option<usize>,
    /// Value of the last op when it was folded at generation time.
    pub folded: Option<u64>,
    pub out: Vec<String>,
    locals: Vec<(String, u32)>,
}

impl BodyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: String) {
        self.out.push(text);
    }

    /// Records a local for the prologue; a name hoisted twice keeps the wider declaration.
    pub fn hoist(&mut self, c_name: String, width: u32) {
        match self.locals.iter_mut().find(|(name, _)| *name == c_name) {
            Some(existing) => existing.1 = existing.1.max(width),
            None => self.locals.push((c_name, width)),
        }
    }

    /// Pushes a frame of `kind`, runs `body` and pops the frame again whatever the outcome.
    /// Constants known for the frame's locals do not outlive it.
    pub fn with_frame<T>(
        &mut self,
        kind: FrameKind,
        locals: &[LocalDecl],
        body: impl FnOnce(&mut Self) -> DslResult<T>,
    ) -> DslResult<T> {
        let helper = match &kind {
            FrameKind::Helper { name } => Some(name.clone()),
            _ => self.scopes.current_helper().map(str::to_string),
        };
        let mut frame_locals = Vec::with_capacity(locals.len());
        for local in locals {
            let base = match &helper {
                Some(helper) => mangle_local(helper, &local.name),
                None => local.name.clone(),
            };
            let c_name = self.unshadowed(base);
            self.hoist(c_name.clone(), local.width);
            self.known.forget(&c_name);
            frame_locals.push(FrameLocal {
                name: local.name.clone(),
                c_name,
                width: local.width,
            });
        }
        self.scopes.push(ScopeFrame::new(kind, frame_locals));
        let result = body(self);
        if let Some(frame) = self.scopes.pop() {
            for local in frame.locals() {
                self.known.forget(&local.c_name);
            }
        }
        result
    }

    /// `base` unless an enclosing frame still owns it, otherwise the first free `base_N`.
    /// Storage of frames that already closed is reused.
    fn unshadowed(&self, base: String) -> String {
        if !self.scopes.is_live(&base) {
            return base;
        }
        let mut suffix = 1;
        loop {
            let candidate = format!("{base}_{suffix}");
            if !self.scopes.is_live(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Hoisted locals followed by scratch temporaries.
    pub fn declarations(&self) -> String {
        let mut out = String::new();
        for (name, width) in &self.locals {
            out.push_str(&format!("\n\tuint{width}_t {name};"));
        }
        out.push_str(&self.ops.temps.declarations());
        out
    }

    pub fn code(&self) -> String {
        self.out.concat()
    }
}
