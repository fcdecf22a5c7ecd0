// Human-readable instruction listing, grounded on the disassembly format
// described alongside the opcode catalogue: four-digit IP, opcode name, the
// operand if one exists, and a parenthesized repr of the constant for any
// opcode whose operand indexes the constant pool. This is tooling output
// only, not part of the bytecode ABI, so the exact column widths below are
// free to drift without affecting anything that reads a `Chunk`.

use crate::bytecode::{Chunk, OpCode, Operand};

fn is_constant_index(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Const
            | OpCode::DefGlobal
            | OpCode::DefConstGlobal
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::DefLocal
            | OpCode::DefConstLocal
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetAttr
    )
}

fn operand_repr(chunk: &Chunk, op: OpCode, operand: Operand) -> String {
    match operand {
        Operand::None => String::new(),
        Operand::Single(n) => {
            if is_constant_index(op) {
                match chunk.constants.get(n) {
                    Some(value) => format!("{:<6} ({:?})", n, value.to_string()),
                    None => format!("{:<6} (<invalid constant {}>)", n, n),
                }
            } else {
                format!("{}", n)
            }
        }
        Operand::Pair(a, b) => format!("{}, {}", a, b),
    }
}

/// Renders one instruction as a line, e.g. `0007 GET_LOCAL   2      ("x")`.
pub fn disassemble_instruction(chunk: &Chunk, ip: usize) -> String {
    let instr = &chunk.instructions[ip];
    let name = opcode_name(instr.op);
    let operand = operand_repr(chunk, instr.op, instr.operand);
    if operand.is_empty() {
        format!("{:04} {}", ip, name)
    } else {
        format!("{:04} {:<14} {}", ip, name, operand)
    }
}

/// Renders an entire chunk, one instruction per line.
pub fn disassemble_chunk(chunk: &Chunk) -> String {
    let mut out = String::new();
    for ip in 0..chunk.instructions.len() {
        out.push_str(&disassemble_instruction(chunk, ip));
        out.push('\n');
    }
    out
}

fn opcode_name(op: OpCode) -> &'static str {
    match op {
        OpCode::Const => "CONST",
        OpCode::True => "TRUE",
        OpCode::False => "FALSE",
        OpCode::NoneVal => "NONE",
        OpCode::Add => "ADD",
        OpCode::Sub => "SUB",
        OpCode::Mul => "MUL",
        OpCode::Div => "DIV",
        OpCode::Mod => "MOD",
        OpCode::Negate => "NEGATE",
        OpCode::And => "AND",
        OpCode::Or => "OR",
        OpCode::Not => "NOT",
        OpCode::Eq => "EQ",
        OpCode::Neq => "NEQ",
        OpCode::Gt => "GT",
        OpCode::Gte => "GTE",
        OpCode::Lt => "LT",
        OpCode::Lte => "LTE",
        OpCode::DefGlobal => "DEF_GLOBAL",
        OpCode::DefConstGlobal => "DEF_CONST_GLOBAL",
        OpCode::GetGlobal => "GET_GLOBAL",
        OpCode::SetGlobal => "SET_GLOBAL",
        OpCode::DefLocal => "DEF_LOCAL",
        OpCode::DefConstLocal => "DEF_CONST_LOCAL",
        OpCode::GetLocal => "GET_LOCAL",
        OpCode::SetLocal => "SET_LOCAL",
        OpCode::EnterScope => "ENTER_SCOPE",
        OpCode::ExitScope => "EXIT_SCOPE",
        OpCode::Jump => "JUMP",
        OpCode::JumpIfFalse => "JUMP_IF_FALSE",
        OpCode::Pop => "POP",
        OpCode::BuildList => "BUILD_LIST",
        OpCode::BuildRange => "BUILD_RANGE",
        OpCode::IndexGet => "INDEX_GET",
        OpCode::IndexSet => "INDEX_SET",
        OpCode::GetAttr => "GET_ATTR",
        OpCode::IterNew => "ITER_NEW",
        OpCode::IterNextOrJump => "ITER_NEXT_OR_JUMP",
        OpCode::Call => "CALL",
        OpCode::BuildKwargs => "BUILD_KWARGS",
        OpCode::CallKw => "CALL_KW",
        OpCode::Return => "RETURN",
        OpCode::Halt => "HALT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Operand;
    use crate::value::Value;

    #[test]
    fn constant_operand_shows_repr() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Int(42));
        chunk.emit(OpCode::Const, Operand::Single(idx), None);
        let line = disassemble_instruction(&chunk, 0);
        assert!(line.contains("CONST"));
        assert!(line.contains("42"));
    }

    #[test]
    fn no_operand_opcode_has_no_trailing_field() {
        let mut chunk = Chunk::new();
        chunk.emit(OpCode::Pop, Operand::None, None);
        assert_eq!(disassemble_instruction(&chunk, 0), "0000 POP");
    }

    #[test]
    fn jump_operand_is_a_plain_instruction_index_not_a_constant_repr() {
        let mut chunk = Chunk::new();
        chunk.emit(OpCode::Jump, Operand::Single(3), None);
        let line = disassemble_instruction(&chunk, 0);
        assert!(line.contains("JUMP"));
        assert!(line.ends_with('3'));
    }
}
