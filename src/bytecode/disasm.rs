use std::fmt::Write;

use crate::bytecode::ir::{Function, ScriptFunction};
use crate::bytecode::{Opcode, OpcodeFlags, OpcodeType};

/// Listing printer for compiled script functions.
#[derive(Debug, Clone)]
pub struct Disassembler {
    pub color: bool,
}

impl Default for Disassembler {
    fn default() -> Self {
        Self { color: true }
    }
}

impl Disassembler {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    /// Print disassembly of a function; native functions only get a header
    pub fn print_function(&self, function: &Function) {
        print!("{}", self.function_to_string(function));
    }

    pub fn function_to_string(&self, function: &Function) -> String {
        match function.as_script() {
            Some(script) => self.disassemble(&function.name, script),
            None => format!("{} (native)\n", function.name),
        }
    }

    pub fn disassemble(&self, name: &str, script: &ScriptFunction) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "════════════════════════════════════════");
        let _ = writeln!(out, " {}", name);
        let _ = writeln!(
            out,
            " {} opcodes, {} labels, {} locals",
            script.opcodes.len(),
            script.labels.len(),
            script.local_variables.len()
        );
        let _ = writeln!(out, "════════════════════════════════════════");
        self.write_opcodes(&mut out, script);
        out
    }

    fn write_opcodes(&self, out: &mut String, script: &ScriptFunction) {
        let jump_targets = collect_jump_targets(&script.opcodes);

        for (ip, op) in script.opcodes.iter().enumerate() {
            for label in script.labels.iter().filter(|l| l.offset as usize == ip) {
                let _ = writeln!(out, "{}{}:{}", self.paint(Self::YEL), label.name, self.reset());
            }
            let is_target = jump_targets.contains(&ip);
            if is_target {
                let _ = writeln!(out, "      ┌──────────────────────────────────");
            }

            let _ = write!(out, "{:04} {}", ip, if is_target { "► " } else { "  " });
            self.write_opcode(out, op);
            out.push('\n');
        }
    }

    fn write_opcode(&self, out: &mut String, op: &Opcode) {
        let color = match op.kind {
            kind if kind.is_control_flow() => Self::MAG,
            OpcodeType::PushConstant => Self::CYN,
            OpcodeType::Nop => Self::DIM,
            _ => "",
        };
        let _ = write!(out, "{}{:<20}{}", self.paint(color), op.kind.name(), self.reset());

        if op.data_type != op.kind.default_data_type() {
            let _ = write!(out, " {:<6}", op.data_type.name());
        } else {
            let _ = write!(out, "       ");
        }

        match op.kind {
            OpcodeType::Jump | OpcodeType::JumpConditional | OpcodeType::JumpSwitch => {
                let _ = write!(out, " → {:04}", op.parameter);
            }
            OpcodeType::GetVariableValue | OpcodeType::SetVariableValue => {
                let _ = write!(out, " var {:#010x}", op.parameter);
            }
            OpcodeType::CastValue => {
                let _ = write!(out, " cast {:#04x}", op.parameter);
            }
            OpcodeType::Call => {
                let _ = write!(out, " {:#018x}", op.parameter);
                if op.flags.contains(OpcodeFlags::BASE_CALL) {
                    let _ = write!(out, " base");
                }
            }
            OpcodeType::PushConstant if op.parameter > 0xffff => {
                let _ = write!(out, " {:#x}", op.parameter);
            }
            OpcodeType::Nop | OpcodeType::Return | OpcodeType::MakeBool => {}
            _ => {
                let _ = write!(out, " {}", op.parameter);
            }
        }

        if op.flags.contains(OpcodeFlags::NEW_LINE) {
            let _ = write!(out, "{}  ; line {}{}", self.paint(Self::DIM), op.line, self.reset());
        }
    }

    fn paint(&self, color: &'static str) -> &'static str {
        if self.color { color } else { "" }
    }

    fn reset(&self) -> &'static str {
        self.paint(Self::RESET)
    }
}

fn collect_jump_targets(opcodes: &[Opcode]) -> Vec<usize> {
    let mut targets: Vec<usize> = opcodes
        .iter()
        .filter_map(Opcode::jump_target)
        .collect();
    targets.sort_unstable();
    targets.dedup();
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::base_type::BaseType;
    use crate::lang::data_type::DataType;

    fn sample() -> ScriptFunction {
        let mut script = ScriptFunction::new(vec![
            Opcode::new(OpcodeType::GetVariableValue, 0x1000_0000).with_data_type(BaseType::U8),
            Opcode::jump_conditional(3),
            Opcode::push_constant(7),
            Opcode::ret(),
        ]);
        script.add_label("start", 0, Vec::new());
        script
    }

    #[test]
    fn test_listing_marks_labels_and_targets() {
        let text = Disassembler::new().no_color().disassemble("main", &sample());
        assert!(text.contains(" main\n"));
        assert!(text.contains(" 4 opcodes, 1 labels, 0 locals"));
        assert!(text.contains("start:\n"));
        assert!(text.contains("┌──"));
        assert!(text.contains("0003 ► RETURN"));
        assert!(text.contains("0002   PUSH_CONSTANT"));
        assert!(text.contains("→ 0003"));
    }

    #[test]
    fn test_default_data_type_is_omitted() {
        let text = Disassembler::new().no_color().disassemble("main", &sample());
        let get = text.lines().find(|l| l.contains("GET_VARIABLE_VALUE")).unwrap();
        assert!(get.contains(" u8 "));
        assert!(get.contains("var 0x10000000"));
        let push = text.lines().find(|l| l.contains("PUSH_CONSTANT")).unwrap();
        assert!(!push.contains("const"));
        assert!(push.ends_with(" 7"));
    }

    #[test]
    fn test_base_call_and_line_markers() {
        let mut call = Opcode::new(OpcodeType::Call, 0x1234).with_line(12);
        call.flags = OpcodeFlags::BASE_CALL | OpcodeFlags::NEW_LINE;
        let script = ScriptFunction::new(vec![call, Opcode::ret()]);
        let text = Disassembler::new().no_color().disassemble("f", &script);
        assert!(text.contains("0x0000000000001234 base"));
        assert!(text.contains("; line 12"));
    }

    #[test]
    fn test_color_codes() {
        let text = Disassembler::new().disassemble("main", &sample());
        assert!(text.contains("\x1b[35mJUMP_CONDITIONAL"));
        let plain = Disassembler::new().no_color().disassemble("main", &sample());
        assert!(!plain.contains('\x1b'));
    }

    #[test]
    fn test_native_function_header() {
        let function = Function::native(
            "host",
            DataType::Void,
            Vec::new(),
            crate::bytecode::ir::NativeFunction::runtime_provided(),
        );
        assert_eq!(Disassembler::new().function_to_string(&function), "host (native)\n");
    }
}
