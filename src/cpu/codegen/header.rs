//! Companion header declaring the options and context structs of the generated core.

use crate::cpu::program::Program;

/// Include-guard macro for `path`.
fn guard(path: &str) -> String {
    path.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn context_fields(program: &Program, out: &mut String) {
    for pointer in program.regs.pointers() {
        let stars = "*".repeat(pointer.depth as usize);
        let count = if pointer.count > 1 {
            format!("[{}]", pointer.count)
        } else {
            String::new()
        };
        out.push_str(&format!(
            "\n\t{} {stars}{}{count};",
            pointer.pointee, pointer.name
        ));
    }
    for (width, count, name) in program.regs.context_fields() {
        if count > 1 {
            out.push_str(&format!("\n\tuint{width}_t {name}[{count}];"));
        } else {
            out.push_str(&format!("\n\tuint{width}_t {name};"));
        }
    }
}

pub fn render(program: &Program, path: &str) -> String {
    let macro_name = guard(path);
    let prefix = &program.info.prefix;
    let mut out = format!("#ifndef {macro_name}_\n#define {macro_name}_\n#include \"backend.h\"");
    out.push_str(&format!(
        "\n\ntypedef struct {{\n\tcpu_options gen;\n}} {prefix}options;"
    ));
    out.push_str(&format!("\n\ntypedef struct {{\n\t{prefix}options *opts;"));
    context_fields(program, &mut out);
    out.push_str(&format!("\n}} {};\n", program.info.context_type()));
    out.push_str(&format!(
        "\nvoid {prefix}execute({} *context, uint32_t target_cycle);",
        program.info.context_type()
    ));
    for declare in &program.declares {
        out.push('\n');
        out.push_str(declare);
    }
    out.push_str(&format!("\n#endif //{macro_name}_\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::codegen::tests::sample_program;
    use crate::cpu::registers::PointerField;

    #[test]
    fn guard_is_derived_from_the_path() {
        assert_eq!(guard("z80.h"), "Z80_H");
        assert_eq!(guard("gen/cpu-core.h"), "GEN_CPU_CORE_H");
    }

    #[test]
    fn context_lists_pointers_then_widest_fields() {
        let mut program = sample_program();
        program.info.prefix = "z80_".into();
        program
            .regs
            .add_pointer(PointerField::parse("mem_pointers", "ptr8", 4).expect("pointer"))
            .expect("add");
        program.declares.push("void z80_run(z80_context *context);".into());
        let header = render(&program, "z80.h");
        assert!(header.starts_with("#ifndef Z80_H_\n#define Z80_H_\n#include \"backend.h\""));
        assert!(header.contains("\n} z80_options;"));
        assert!(header.contains(
            "\n\tz80_options *opts;\n\tuint8_t *mem_pointers[4];\n\tuint32_t sync_cycle;\n\tuint32_t cycles;"
        ));
        assert!(header.contains("\n\tuint8_t main[4];"));
        assert!(header.contains("\n} z80_context;\n"));
        assert!(header.contains("\nvoid z80_execute(z80_context *context, uint32_t target_cycle);"));
        assert!(header.ends_with("\nvoid z80_run(z80_context *context);\n#endif //Z80_H_\n"));
    }
}
