//! Records of the `regs`, `flags`, `info` and `declare` sections.

use std::collections::BTreeMap;

use crate::cpu::diagnostic::Diagnostic;
use crate::cpu::flags::{FlagBits, FlagCalc, FlagDef, FlagLayout, FlagStorage};
use crate::cpu::registers::{ArraySlots, PointerField, RegisterError, RegisterLayout};
use crate::loader::dsl::lexer::Line;
use crate::loader::dsl::literals::numeric;

use super::blocks::parse_width;

fn malformed(line: &Line, message: impl Into<String>) -> Diagnostic {
    Diagnostic::new(line.number, "malformed-record", message)
}

fn count(line: &Line, text: &str) -> Result<usize, Diagnostic> {
    match numeric(text) {
        Some(count) if count > 0 => Ok(count as usize),
        _ => Err(malformed(line, format!("'{text}' is not a valid element count"))),
    }
}

/// `name width`, `name ptrT [count]`, `name width count`, or `name width alias...`.
pub(super) fn register_record(regs: &mut RegisterLayout, line: &Line) -> Result<(), Diagnostic> {
    let conflict = |err: RegisterError| Diagnostic::new(line.number, "register-conflict", format!("{err}"));
    let (name, spec, rest) = match line.parts.as_slice() {
        [name, spec, rest @ ..] => (name.as_str(), spec.as_str(), rest),
        _ => return Err(malformed(line, "register record needs a name and a width")),
    };
    if spec.starts_with("ptr") {
        let count = match rest {
            [] => 1,
            [count_text] => count(line, count_text)?,
            _ => return Err(malformed(line, "pointer record takes at most one count")),
        };
        let Some(pointer) = PointerField::parse(name, spec, count) else {
            return Err(malformed(line, format!("'{spec}' is not a pointer type")));
        };
        return regs.add_pointer(pointer).map_err(conflict);
    }
    let width = parse_width(line.number, spec)?;
    match rest {
        [] => regs.add_register(name, width),
        [slots] if numeric(slots).is_some() => {
            regs.add_array(name, width, ArraySlots::Count(count(line, slots)?))
        }
        aliases => regs.add_array(name, width, ArraySlots::Aliases(aliases.to_vec())),
    }
    .map_err(conflict)
}

/// `register name` or `letter bits calc storage`.
pub(super) fn flag_record(flags: &mut FlagLayout, line: &Line) -> Result<(), Diagnostic> {
    match line.parts.as_slice() {
        [keyword, register] if keyword == "register" => {
            flags.register = Some(register.clone());
            Ok(())
        }
        [letter, bits, calc, storage] => {
            let mut chars = letter.chars();
            let (Some(letter), None) = (chars.next(), chars.next()) else {
                return Err(malformed(line, format!("flag name '{letter}' must be one character")));
            };
            let bits = FlagBits::parse(bits)
                .ok_or_else(|| malformed(line, format!("'{bits}' is not a bit or bit range")))?;
            let calc = FlagCalc::parse(calc)
                .ok_or_else(|| malformed(line, format!("unknown flag calculation '{calc}'")))?;
            let storage = FlagStorage::parse(storage)
                .ok_or_else(|| malformed(line, format!("'{storage}' is not a storage location")))?;
            flags
                .add(FlagDef {
                    letter,
                    bits,
                    calc,
                    storage,
                })
                .map_err(|message| Diagnostic::new(line.number, "duplicate-flag", message))
        }
        _ => Err(malformed(
            line,
            "flag record is 'register name' or 'letter bits calc storage'",
        )),
    }
}

/// `key value...`; a repeated key replaces the earlier values.
pub(super) fn info_record(info: &mut BTreeMap<String, Vec<String>>, line: &Line) {
    info.insert(line.head().to_string(), line.args().to_vec());
}

/// Declarations are copied into the header verbatim, one per record.
pub(super) fn declare_record(declares: &mut Vec<String>, line: &Line) {
    declares.push(line.parts.join(" "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::registers::RegisterLookup;
    use crate::loader::dsl::lexer::Lexer;

    fn line(text: &str) -> Line {
        Lexer::new(text)
            .next_line()
            .expect("line")
            .expect("lexed")
    }

    #[test]
    fn register_record_forms() {
        let mut regs = RegisterLayout::new();
        for text in [
            "\ta 8",
            "\tmain 8 b c d e",
            "\tbanks 16 4",
            "\tmem_pointers ptr8 4",
            "\tsystem ptrvoid",
        ] {
            register_record(&mut regs, &line(text)).expect(text);
        }
        assert!(matches!(regs.lookup("a"), Some(RegisterLookup::Plain { width: 8 })));
        assert!(matches!(regs.lookup("c"), Some(RegisterLookup::Member { index: 1, .. })));
        assert_eq!(regs.array("banks").map(|array| array.len()), Some(4));
        assert_eq!(regs.pointers().len(), 2);
        assert_eq!(regs.pointers()[1].pointee, "void");
    }

    #[test]
    fn register_conflicts_and_bad_widths_are_diagnosed() {
        let mut regs = RegisterLayout::new();
        register_record(&mut regs, &line("\tmain 8 b c")).expect("array");
        let conflict = register_record(&mut regs, &line("\tb 8")).unwrap_err();
        assert_eq!(conflict.code, "register-conflict");
        let width = register_record(&mut regs, &line("\tx wide")).unwrap_err();
        assert_eq!(width.code, "malformed-record");
    }

    #[test]
    fn flag_records_build_the_layout() {
        let mut flags = FlagLayout::new();
        flag_record(&mut flags, &line("\tregister f")).expect("register");
        flag_record(&mut flags, &line("\tZ 6 zero zflag")).expect("zero");
        flag_record(&mut flags, &line("\tC 0 carry chflags.0")).expect("carry");
        assert_eq!(flags.register.as_deref(), Some("f"));
        assert_eq!(flags.flags().len(), 2);
        let duplicate = flag_record(&mut flags, &line("\tZ 7 zero zflag")).unwrap_err();
        assert_eq!(duplicate.code, "duplicate-flag");
        let calc = flag_record(&mut flags, &line("\tN 1 negative nflag")).unwrap_err();
        assert_eq!(calc.code, "malformed-record");
    }

    #[test]
    fn info_and_declare_records() {
        let mut info = BTreeMap::new();
        info_record(&mut info, &line("\tprefix z80_"));
        info_record(&mut info, &line("\textra_tables cb ed"));
        assert_eq!(info["extra_tables"], ["cb", "ed"]);
        let mut declares = Vec::new();
        declare_record(&mut declares, &line("\tvoid z80_run(z80_context * context);"));
        assert_eq!(declares, ["void z80_run(z80_context * context);"]);
    }
}
