use std::fmt::Write;

use lua_core::opcode::{index_k, is_k};
use lua_core::{Constant, Instruction, OpArgMode, OpCode, OpMode, Prototype};

/// Disassemble a [`Prototype`] into a `luac -l -l` style listing.
///
/// Recursively disassembles any nested `protos[]` so you see the full picture.
pub fn disassemble(proto: &Prototype) -> String {
    let mut out = String::new();
    disasm_proto(proto, &mut out);
    out
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn disasm_proto(proto: &Prototype, out: &mut String) {
    let name = proto
        .source
        .strip_prefix(['@', '='])
        .unwrap_or(&proto.source);
    let kind = if proto.line_defined == 0 { "main" } else { "function" };
    let _ = writeln!(
        out,
        "\n{kind} <{name}:{},{}> ({})",
        proto.line_defined,
        proto.last_line_defined,
        plural(proto.code.len(), "instruction")
    );
    let _ = writeln!(
        out,
        "{}{} params, {} slots, {}, {}, {}, {}",
        proto.num_params,
        if proto.is_vararg { "+" } else { "" },
        proto.max_stack_size,
        plural(proto.upvalues.len(), "upvalue"),
        plural(proto.loc_vars.len(), "local"),
        plural(proto.constants.len(), "constant"),
        plural(proto.protos.len(), "function"),
    );

    for (pc, &inst) in proto.code.iter().enumerate() {
        let line = proto
            .line_info
            .get(pc)
            .map_or_else(|| "-".to_string(), |l| l.to_string());
        let _ = writeln!(out, "\t{}\t[{line}]\t{}", pc + 1, fmt_instruction(pc, inst, proto));
    }

    let _ = writeln!(out, "constants ({}):", proto.constants.len());
    for (i, k) in proto.constants.iter().enumerate() {
        let _ = writeln!(out, "\t{}\t{k}", i + 1);
    }
    let _ = writeln!(out, "locals ({}):", proto.loc_vars.len());
    for (i, v) in proto.loc_vars.iter().enumerate() {
        let _ = writeln!(out, "\t{i}\t{}\t{}\t{}", v.name, v.start_pc + 1, v.end_pc + 1);
    }
    let _ = writeln!(out, "upvalues ({}):", proto.upvalues.len());
    for (i, uv) in proto.upvalues.iter().enumerate() {
        let name = proto.upvalue_names.get(i).map_or("-", String::as_str);
        let (instack, idx) = uv.to_wire();
        let _ = writeln!(out, "\t{i}\t{name}\t{instack}\t{idx}");
    }

    for sub in &proto.protos {
        disasm_proto(sub, out);
    }
}

/// RK operands print constants as negative numbers, like `luac`.
fn rk(arg: i32) -> i32 {
    if is_k(arg) { -1 - index_k(arg) } else { arg }
}

fn fmt_instruction(pc: usize, inst: Instruction, proto: &Prototype) -> String {
    let Some(op) = inst.opcode() else {
        return format!("<invalid {:#010x}>", inst.0);
    };
    let (a, b, c) = (inst.a(), inst.b(), inst.c());
    let operands = match op.mode() {
        OpMode::IABC => {
            let mut s = a.to_string();
            if op.arg_b() != OpArgMode::N {
                let _ = write!(s, " {}", if op.arg_b() == OpArgMode::K { rk(b) } else { b });
            }
            if op.arg_c() != OpArgMode::N {
                let _ = write!(s, " {}", if op.arg_c() == OpArgMode::K { rk(c) } else { c });
            }
            s
        }
        OpMode::IABx => {
            if op.arg_b() == OpArgMode::K {
                format!("{a} {}", -1 - inst.bx())
            } else {
                format!("{a} {}", inst.bx())
            }
        }
        OpMode::IAsBx => format!("{a} {}", inst.sbx()),
        OpMode::IAx => format!("{}", -1 - inst.ax_arg()),
    };

    let konst = |arg: i32| -> String {
        if is_k(arg) {
            constant(proto, index_k(arg))
        } else {
            "-".to_string()
        }
    };
    let upval = |idx: i32| -> String {
        proto
            .upvalue_names
            .get(idx as usize)
            .cloned()
            .unwrap_or_else(|| "-".to_string())
    };
    let comment = match op {
        OpCode::LoadK => Some(constant(proto, inst.bx())),
        OpCode::GetUpval | OpCode::SetUpval => Some(upval(b)),
        OpCode::GetTabUp => Some(format!("{} {}", upval(b), konst(c))),
        OpCode::SetTabUp => Some(format!("{} {} {}", upval(a), konst(b), konst(c))),
        OpCode::GetTable | OpCode::Self_ => is_k(c).then(|| konst(c)),
        OpCode::SetTable
        | OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Mod
        | OpCode::Pow
        | OpCode::Div
        | OpCode::IDiv
        | OpCode::BAnd
        | OpCode::BOr
        | OpCode::BXor
        | OpCode::Shl
        | OpCode::Shr
        | OpCode::Eq
        | OpCode::Lt
        | OpCode::Le => (is_k(b) || is_k(c)).then(|| format!("{} {}", konst(b), konst(c))),
        OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop => {
            Some(format!("to {}", pc as i32 + inst.sbx() + 2))
        }
        OpCode::Closure => Some(format!("function #{}", inst.bx())),
        OpCode::SetList if c == 0 => Some("batch in EXTRAARG".to_string()),
        _ => None,
    };

    let mut line = format!("{:<9}\t{operands}", op.name());
    if let Some(comment) = comment {
        let _ = write!(line, "\t; {comment}");
    }
    line
}

fn constant(proto: &Prototype, idx: i32) -> String {
    proto
        .constants
        .get(idx as usize)
        .map_or_else(|| "?".to_string(), Constant::to_string)
}
