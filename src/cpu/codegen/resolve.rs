//! Operand resolution: literals, locals, bindings, meta aliases, registers, pointers and
//! external symbols, in that order.

use ahash::AHashMap;

use super::body::BodyGen;
use super::context::BodyContext;
use crate::cpu::error::{DslError, DslResult};
use crate::cpu::ops::Arg;
use crate::cpu::registers::{RegisterArray, RegisterLookup};
use crate::cpu::scope::LocalRef;
use crate::loader::dsl::literals::numeric;

const MAX_ALIAS_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceKind {
    Register,
    Local,
    Pointer,
}

/// Storage an operand reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub expr: String,
    pub width: u32,
    pub kind: PlaceKind,
    /// Known-value key; `None` for slots whose index is only known at run time.
    pub key: Option<String>,
    /// Register array a slot belongs to.
    pub array: Option<String>,
    /// Register name as written in the description, used to spot the flag register.
    pub register: Option<String>,
}

impl Place {
    pub(crate) fn local(local: LocalRef) -> Self {
        Self {
            expr: local.c_name.clone(),
            width: local.width,
            kind: PlaceKind::Local,
            key: Some(local.c_name),
            array: None,
            register: None,
        }
    }

    fn register(name: &str, width: u32) -> Self {
        Self {
            expr: format!("context->{name}"),
            width,
            kind: PlaceKind::Register,
            key: Some(name.to_string()),
            array: None,
            register: Some(name.to_string()),
        }
    }

    fn slot(array: &RegisterArray, index: usize, written: String) -> Self {
        Self {
            expr: format!("context->{}[{index}]", array.name),
            width: array.width,
            kind: PlaceKind::Register,
            key: Some(format!("{}[{index}]", array.name)),
            array: Some(array.name.clone()),
            register: Some(written),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Const(u64),
    Place(Place),
    /// Name passed through to C untouched.
    Symbol(String),
}

impl Operand {
    pub fn text(&self) -> String {
        match self {
            Operand::Const(value) => value.to_string(),
            Operand::Place(place) => place.expr.clone(),
            Operand::Symbol(name) => name.clone(),
        }
    }

    pub fn value(&self) -> Option<u64> {
        match self {
            Operand::Const(value) => Some(*value),
            _ => None,
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Operand::Place(place) => place.width,
            _ => 32,
        }
    }

    pub fn to_arg(&self) -> Arg {
        match self {
            Operand::Const(value) => Arg::constant(*value),
            other => Arg::expr(other.text(), other.width()),
        }
    }
}

/// What a name is bound to inside a routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Instruction field value.
    Value(u64),
    /// Name resolved again where it is used.
    Name(String),
    /// Operand already resolved by the caller, for helper arguments and aliased locals.
    Operand(Operand),
}

pub type Bindings = AHashMap<String, Binding>;

/// How the operand being resolved is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    /// Bound to a helper argument; the use inside the helper decides.
    Bind,
}

impl BodyGen<'_> {
    pub(crate) fn resolve(
        &self,
        ctx: &mut BodyContext,
        name: &str,
        bindings: &Bindings,
        allow_constant: bool,
        access: Access,
    ) -> DslResult<Operand> {
        self.resolve_at(ctx, name, bindings, allow_constant, access, 0)
    }

    fn resolve_at(
        &self,
        ctx: &mut BodyContext,
        name: &str,
        bindings: &Bindings,
        allow_constant: bool,
        access: Access,
        depth: usize,
    ) -> DslResult<Operand> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(DslError::Generation(format!(
                "alias chain too deep while resolving '{name}'"
            )));
        }
        if let Some(value) = numeric(name) {
            return Ok(Operand::Const(value));
        }
        if let Some(local) = ctx.scopes.resolve_local(name) {
            return Ok(self.touch(ctx, Place::local(local), allow_constant, access));
        }
        if let Some(binding) = bindings.get(name) {
            return self.rebind(ctx, binding.clone(), &Bindings::new(), allow_constant, access, depth);
        }
        if let Some(binding) = ctx.meta.get(name).cloned() {
            return self.rebind(ctx, binding, bindings, allow_constant, access, depth);
        }
        if let Some(place) = self.register(ctx, name, bindings, depth)? {
            return Ok(self.touch(ctx, place, allow_constant, access));
        }
        if access == Access::Write {
            ctx.ops.last.set_destination(name, 32);
        }
        Ok(Operand::Symbol(name.to_string()))
    }

    fn rebind(
        &self,
        ctx: &mut BodyContext,
        binding: Binding,
        bindings: &Bindings,
        allow_constant: bool,
        access: Access,
        depth: usize,
    ) -> DslResult<Operand> {
        match binding {
            Binding::Value(value) => Ok(Operand::Const(value)),
            Binding::Name(name) => {
                self.resolve_at(ctx, &name, bindings, allow_constant, access, depth + 1)
            }
            Binding::Operand(Operand::Place(place)) => {
                Ok(self.touch(ctx, place, allow_constant, access))
            }
            Binding::Operand(Operand::Symbol(name)) => {
                if access == Access::Write {
                    ctx.ops.last.set_destination(name.clone(), 32);
                }
                Ok(Operand::Symbol(name))
            }
            Binding::Operand(constant) => Ok(constant),
        }
    }

    /// Applies the bookkeeping of reading or writing `place`.
    fn touch(&self, ctx: &mut BodyContext, place: Place, allow_constant: bool, access: Access) -> Operand {
        let flag_register = place
            .register
            .as_deref()
            .is_some_and(|name| self.program.flags.is_flag_register(name));
        match access {
            Access::Read => {
                if flag_register {
                    ctx.needs_coalesce = true;
                }
                if allow_constant
                    && let Some(key) = &place.key
                    && let Some(value) = ctx.known.get(key)
                {
                    return Operand::Const(value);
                }
            }
            Access::Write => {
                if flag_register {
                    ctx.needs_disperse = true;
                }
                ctx.ops.last.set_destination(place.expr.clone(), place.width);
            }
            Access::Bind => {}
        }
        Operand::Place(place)
    }

    fn register(
        &self,
        ctx: &mut BodyContext,
        name: &str,
        bindings: &Bindings,
        depth: usize,
    ) -> DslResult<Option<Place>> {
        let regs = &self.program.regs;
        if let Some((array_name, index)) = name.split_once('.') {
            let array_name = match ctx.meta.get(array_name) {
                Some(Binding::Name(target)) => target.clone(),
                _ => array_name.to_string(),
            };
            let Some(array) = regs.array(&array_name) else {
                return Ok(None);
            };
            let index_expr = match regs.member(index) {
                Some((owner, slot)) if owner.name == array.name => {
                    return Ok(Some(Place::slot(array, slot, index.to_string())));
                }
                Some((owner, slot)) => format!("context->{}[{slot}]", owner.name),
                None => match self.resolve_at(ctx, index, bindings, true, Access::Read, depth + 1)? {
                    Operand::Const(slot) => {
                        let slot = slot as usize;
                        let written = array
                            .alias(slot)
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("{}.{slot}", array.name));
                        return Ok(Some(Place::slot(array, slot, written)));
                    }
                    dynamic => dynamic.text(),
                },
            };
            return Ok(Some(Place {
                expr: format!("context->{}[{index_expr}]", array.name),
                width: array.width,
                kind: PlaceKind::Register,
                key: None,
                array: Some(array.name.clone()),
                register: Some(name.to_string()),
            }));
        }
        Ok(match regs.lookup(name) {
            Some(RegisterLookup::Plain { width }) => Some(Place::register(name, width)),
            Some(RegisterLookup::Member { array, index }) => {
                Some(Place::slot(array, index, name.to_string()))
            }
            Some(RegisterLookup::Array(array)) => Some(Place {
                key: None,
                ..Place::register(&array.name, array.width)
            }),
            Some(RegisterLookup::Pointer(pointer)) => Some(Place {
                expr: format!("context->{}", pointer.name),
                width: 32,
                kind: PlaceKind::Pointer,
                key: None,
                array: None,
                register: None,
            }),
            None => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::ast::LocalDecl;
    use crate::cpu::codegen::tests::sample_program;
    use crate::cpu::scope::FrameKind;

    fn gen_for(program: &crate::cpu::program::Program) -> BodyGen<'_> {
        BodyGen::new(program)
    }

    #[test]
    fn literals_and_registers() {
        let program = sample_program();
        let generator = gen_for(&program);
        let mut ctx = BodyContext::new();
        let none = Bindings::new();
        assert_eq!(
            generator.resolve(&mut ctx, "0x10", &none, true, Access::Read).expect("literal"),
            Operand::Const(16)
        );
        let a = generator.resolve(&mut ctx, "a", &none, true, Access::Read).expect("a");
        assert_eq!(a.text(), "context->a");
        assert_eq!(a.width(), 8);
        let b = generator.resolve(&mut ctx, "b", &none, true, Access::Read).expect("b");
        assert_eq!(b.text(), "context->main[0]");
        let unknown = generator.resolve(&mut ctx, "external_thing", &none, true, Access::Read).expect("sym");
        assert_eq!(unknown, Operand::Symbol("external_thing".into()));
    }

    #[test]
    fn array_index_comes_from_a_field() {
        let program = sample_program();
        let generator = gen_for(&program);
        let mut ctx = BodyContext::new();
        let mut fields = Bindings::new();
        fields.insert("r".into(), Binding::Value(2));
        let slot = generator.resolve(&mut ctx, "main.r", &fields, true, Access::Read).expect("slot");
        assert_eq!(slot.text(), "context->main[2]");
        let Operand::Place(place) = slot else {
            panic!("expected a register slot");
        };
        assert_eq!(place.key.as_deref(), Some("main[2]"));
    }

    #[test]
    fn known_values_replace_reads_but_not_writes() {
        let program = sample_program();
        let generator = gen_for(&program);
        let mut ctx = BodyContext::new();
        ctx.known.set("a", 7);
        let none = Bindings::new();
        assert_eq!(
            generator.resolve(&mut ctx, "a", &none, true, Access::Read).expect("read"),
            Operand::Const(7)
        );
        let dst = generator.resolve(&mut ctx, "a", &none, false, Access::Write).expect("write");
        assert_eq!(dst.text(), "context->a");
        assert_eq!(ctx.ops.last.dst.as_deref(), Some("context->a"));
    }

    #[test]
    fn flag_register_access_sets_obligations() {
        let program = sample_program();
        let generator = gen_for(&program);
        let mut ctx = BodyContext::new();
        let none = Bindings::new();
        generator.resolve(&mut ctx, "f", &none, true, Access::Read).expect("read");
        assert!(ctx.needs_coalesce && !ctx.needs_disperse);
        generator.resolve(&mut ctx, "f", &none, false, Access::Write).expect("write");
        assert!(ctx.needs_disperse);
    }

    #[test]
    fn locals_shadow_registers_and_meta_aliases_resolve() {
        let program = sample_program();
        let generator = gen_for(&program);
        let mut ctx = BodyContext::new();
        let none = Bindings::new();
        let locals = [LocalDecl::new("a", 16)];
        ctx.with_frame(FrameKind::Instruction, &locals, |ctx| {
            let local = generator.resolve(ctx, "a", &none, true, Access::Read)?;
            assert_eq!(local.text(), "a");
            assert_eq!(local.width(), 16);
            ctx.meta.insert("dst".into(), Binding::Name("main.1".into()));
            let aliased = generator.resolve(ctx, "dst", &none, true, Access::Read)?;
            assert_eq!(aliased.text(), "context->main[1]");
            Ok(())
        })
        .expect("frame");
    }

    #[test]
    fn alias_cycles_are_reported() {
        let program = sample_program();
        let generator = gen_for(&program);
        let mut ctx = BodyContext::new();
        ctx.meta.insert("x".into(), Binding::Name("y".into()));
        ctx.meta.insert("y".into(), Binding::Name("x".into()));
        let err = generator
            .resolve(&mut ctx, "x", &Bindings::new(), true, Access::Read)
            .unwrap_err();
        assert!(matches!(err, DslError::Generation(_)));
    }
}
