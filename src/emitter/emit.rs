use crate::{
    codegen::asm::{
        AsmBinaryOp, AsmInstruction, AsmOperand, AsmProgram, AsmType, AsmUnaryOp, ConditionCode,
    },
    emitter::util::db_list,
    Options,
};
use anyhow::Result;
use std::io::Write;

pub trait Emit {
    fn emit<W: Write>(&self, f: &mut W, options: &Options) -> Result<()>;
}

impl Emit for AsmProgram {
    fn emit<W: Write>(&self, f: &mut W, options: &Options) -> Result<()> {
        writeln!(f, "; minic output for {}", self.source)?;
        for name in &self.externs {
            writeln!(f, "extern {}", name)?;
        }

        writeln!(f)?;
        writeln!(f, "section .text")?;
        self.instructions.emit(f, options)?;

        writeln!(f)?;
        writeln!(f, "section .data")?;
        for (label, value) in self.constants.entries() {
            writeln!(f, "{}: db {}", label, db_list(value))?;
        }

        Ok(())
    }
}

impl Emit for Vec<AsmInstruction> {
    fn emit<W: Write>(&self, f: &mut W, options: &Options) -> Result<()> {
        for instr in self {
            instr.emit(f, options)?;
        }

        Ok(())
    }
}

impl Emit for AsmInstruction {
    fn emit<W: Write>(&self, f: &mut W, options: &Options) -> Result<()> {
        match self {
            AsmInstruction::Comment(text) => {
                if options.comments {
                    writeln!(f, "    ; {}", text)?;
                }
            }
            AsmInstruction::Global(name) => writeln!(f, "global {}", name)?,
            AsmInstruction::Symbol(name) => writeln!(f, "{}:", name)?,
            AsmInstruction::Label(label) => writeln!(f, "{}:", label)?,
            other => writeln!(f, "    {}", render(other))?,
        }

        Ok(())
    }
}

fn operand(op: &AsmOperand, asm_type: AsmType) -> String {
    match op {
        AsmOperand::Imm(n) => n.to_string(),
        AsmOperand::Register(reg) => reg.name(asm_type).to_string(),
        AsmOperand::Memory(..) | AsmOperand::Data(_) => {
            format!("{} {}", size_keyword(asm_type), address(op))
        }
    }
}

fn size_keyword(asm_type: AsmType) -> &'static str {
    match asm_type {
        AsmType::Byte => "byte",
        AsmType::Longword => "dword",
        AsmType::Quadword => "qword",
    }
}

/// Bracketed effective address without a size keyword.
fn address(op: &AsmOperand) -> String {
    match op {
        AsmOperand::Memory(base, 0) => format!("[{}]", base),
        AsmOperand::Memory(base, disp) => format!("[{}{:+}]", base, disp),
        AsmOperand::Data(label) => format!("[rel {}]", label),
        AsmOperand::Imm(n) => n.to_string(),
        AsmOperand::Register(reg) => reg.to_string(),
    }
}

fn condition(cc: ConditionCode) -> &'static str {
    match cc {
        ConditionCode::E => "e",
        ConditionCode::NE => "ne",
        ConditionCode::L => "l",
        ConditionCode::LE => "le",
        ConditionCode::G => "g",
        ConditionCode::GE => "ge",
    }
}

/// NASM text of a single instruction, without indentation.
pub fn render(instr: &AsmInstruction) -> String {
    match instr {
        AsmInstruction::Mov { asm_type, src, dst } => format!(
            "mov {}, {}",
            operand(dst, *asm_type),
            operand(src, *asm_type)
        ),
        AsmInstruction::MovZeroExtend { src, dst } => format!(
            "movzx {}, {}",
            dst.name(AsmType::Longword),
            operand(src, AsmType::Byte)
        ),
        AsmInstruction::Movsx { src, dst } => format!(
            "movsx {}, {}",
            dst.name(AsmType::Quadword),
            operand(src, AsmType::Byte)
        ),
        AsmInstruction::Lea { src, dst } => {
            format!("lea {}, {}", dst.name(AsmType::Quadword), address(src))
        }
        AsmInstruction::Unary {
            asm_type,
            op: AsmUnaryOp::Neg,
            operand: target,
        } => format!("neg {}", operand(target, *asm_type)),
        AsmInstruction::Binary {
            asm_type,
            op,
            src,
            dst,
        } => {
            let mnemonic = match op {
                AsmBinaryOp::Add => "add",
                AsmBinaryOp::Sub => "sub",
                AsmBinaryOp::Mul => "imul",
                AsmBinaryOp::Xor => "xor",
            };
            format!(
                "{} {}, {}",
                mnemonic,
                operand(dst, *asm_type),
                operand(src, *asm_type)
            )
        }
        AsmInstruction::Cmp { asm_type, src, dst } => format!(
            "cmp {}, {}",
            operand(dst, *asm_type),
            operand(src, *asm_type)
        ),
        AsmInstruction::Test { asm_type, src, dst } => format!(
            "test {}, {}",
            operand(dst, *asm_type),
            operand(src, *asm_type)
        ),
        AsmInstruction::Cqo => "cqo".to_string(),
        AsmInstruction::Idiv {
            asm_type,
            operand: divisor,
        } => format!("idiv {}", operand(divisor, *asm_type)),
        AsmInstruction::SetCC {
            condition: cc,
            operand: reg,
        } => format!("set{} {}", condition(*cc), reg.name(AsmType::Byte)),
        AsmInstruction::Jmp(label) => format!("jmp {}", label),
        AsmInstruction::JmpCC {
            condition: cc,
            target,
        } => format!("j{} {}", condition(*cc), target),
        AsmInstruction::Label(label) => format!("{}:", label),
        AsmInstruction::Call(name) => format!("call {}", name),
        AsmInstruction::Push(reg) => format!("push {}", reg),
        AsmInstruction::Pop(reg) => format!("pop {}", reg),
        AsmInstruction::Ret => "ret".to_string(),
        AsmInstruction::Comment(text) => format!("; {}", text),
        AsmInstruction::Global(name) => format!("global {}", name),
        AsmInstruction::Symbol(name) => format!("{}:", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::asm::{AsmRegister, ConstantPool, Label};

    #[test]
    fn byte_moves_use_sub_registers() {
        let load = AsmInstruction::Mov {
            asm_type: AsmType::Byte,
            src: AsmOperand::Imm(5),
            dst: AsmOperand::Register(AsmRegister::Di),
        };
        assert_eq!(render(&load), "mov dil, 5");

        let extend = AsmInstruction::MovZeroExtend {
            src: AsmOperand::Register(AsmRegister::Di),
            dst: AsmRegister::Di,
        };
        assert_eq!(render(&extend), "movzx edi, dil");

        let store = AsmInstruction::Mov {
            asm_type: AsmType::Byte,
            src: AsmOperand::Register(AsmRegister::Di),
            dst: AsmOperand::Memory(AsmRegister::Bp, -1),
        };
        assert_eq!(render(&store), "mov byte [rbp-1], dil");

        let sign = AsmInstruction::Movsx {
            src: AsmOperand::Memory(AsmRegister::Bp, -2),
            dst: AsmRegister::R9,
        };
        assert_eq!(render(&sign), "movsx r9, byte [rbp-2]");
    }

    #[test]
    fn memory_operands() {
        let walk = AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Memory(AsmRegister::Bp, 0),
            dst: AsmOperand::Register(AsmRegister::Si),
        };
        assert_eq!(render(&walk), "mov rsi, qword [rbp]");

        let param = AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Memory(AsmRegister::Bp, 16),
            dst: AsmOperand::Register(AsmRegister::R10),
        };
        assert_eq!(render(&param), "mov r10, qword [rbp+16]");

        let lea = AsmInstruction::Lea {
            src: AsmOperand::Data("str_0".to_string()),
            dst: AsmRegister::Cx,
        };
        assert_eq!(render(&lea), "lea rcx, [rel str_0]");

        let idiv = AsmInstruction::Idiv {
            asm_type: AsmType::Quadword,
            operand: AsmOperand::Memory(AsmRegister::Sp, 0),
        };
        assert_eq!(render(&idiv), "idiv qword [rsp]");
    }

    #[test]
    fn comparisons() {
        let set = AsmInstruction::SetCC {
            condition: ConditionCode::LE,
            operand: AsmRegister::R8,
        };
        assert_eq!(render(&set), "setle r8b");

        let jump = AsmInstruction::JmpCC {
            condition: ConditionCode::E,
            target: Label {
                id: 4,
                name: "if_end".to_string(),
            },
        };
        assert_eq!(render(&jump), "je .L4_if_end");
    }

    #[test]
    fn program_layout() {
        let mut constants = ConstantPool::new();
        constants.intern(r"hi\n");

        let program = AsmProgram {
            source: "t.mc".to_string(),
            externs: vec!["printf".to_string()],
            instructions: vec![
                AsmInstruction::Global("main".to_string()),
                AsmInstruction::Symbol("main".to_string()),
                AsmInstruction::Comment("body".to_string()),
                AsmInstruction::Ret,
            ],
            constants,
        };

        let mut out = vec![];
        program.emit(&mut out, &Options::default()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "; minic output for t.mc\n\
             extern printf\n\
             \n\
             section .text\n\
             global main\n\
             main:\n    \
             ; body\n    \
             ret\n\
             \n\
             section .data\n\
             str_0: db 104, 105, 10, 0\n"
        );

        let mut out = vec![];
        let quiet = Options {
            comments: false,
            ..Options::default()
        };
        program.emit(&mut out, &quiet).unwrap();
        assert!(!String::from_utf8(out).unwrap().contains("; body"));
    }
}
