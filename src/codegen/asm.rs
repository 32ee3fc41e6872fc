use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AsmRegister {
    Ax,
    Cx,
    Dx,
    Di,
    Si,
    R8,
    R9,
    R10,
    R11,
    Bp,
    Sp,
}

impl fmt::Display for AsmRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name(AsmType::Quadword))
    }
}

impl AsmRegister {
    /// NASM name of the register viewed at the given width.
    pub fn name(&self, asm_type: AsmType) -> &'static str {
        match asm_type {
            AsmType::Byte => match self {
                AsmRegister::Ax => "al",
                AsmRegister::Cx => "cl",
                AsmRegister::Dx => "dl",
                AsmRegister::Di => "dil",
                AsmRegister::Si => "sil",
                AsmRegister::R8 => "r8b",
                AsmRegister::R9 => "r9b",
                AsmRegister::R10 => "r10b",
                AsmRegister::R11 => "r11b",
                AsmRegister::Bp => "bpl",
                AsmRegister::Sp => "spl",
            },
            AsmType::Longword => match self {
                AsmRegister::Ax => "eax",
                AsmRegister::Cx => "ecx",
                AsmRegister::Dx => "edx",
                AsmRegister::Di => "edi",
                AsmRegister::Si => "esi",
                AsmRegister::R8 => "r8d",
                AsmRegister::R9 => "r9d",
                AsmRegister::R10 => "r10d",
                AsmRegister::R11 => "r11d",
                AsmRegister::Bp => "ebp",
                AsmRegister::Sp => "esp",
            },
            AsmType::Quadword => match self {
                AsmRegister::Ax => "rax",
                AsmRegister::Cx => "rcx",
                AsmRegister::Dx => "rdx",
                AsmRegister::Di => "rdi",
                AsmRegister::Si => "rsi",
                AsmRegister::R8 => "r8",
                AsmRegister::R9 => "r9",
                AsmRegister::R10 => "r10",
                AsmRegister::R11 => "r11",
                AsmRegister::Bp => "rbp",
                AsmRegister::Sp => "rsp",
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmType {
    Byte,
    Longword,
    Quadword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmOperand {
    Imm(i64),
    Register(AsmRegister),
    /* [reg + displacement] */
    Memory(AsmRegister, i64),
    /* rip-relative reference to a constant-pool label */
    Data(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionCode {
    E,  /* equal */
    NE, /* not equal */
    L,  /* less */
    LE, /* less or equal */
    G,  /* greater */
    GE, /* greater or equal */
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmUnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmBinaryOp {
    Add,
    Sub,
    Mul,
    Xor,
}

/// A numbered jump target. Rendered as a NASM local label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: usize,
    pub name: String,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".L{}_{}", self.id, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmInstruction {
    Mov {
        asm_type: AsmType,
        src: AsmOperand,
        dst: AsmOperand,
    },

    /* Zero-extend a byte into a full register. */
    MovZeroExtend {
        src: AsmOperand,
        dst: AsmRegister,
    },

    /* Sign-extend a byte into a full register. */
    Movsx {
        src: AsmOperand,
        dst: AsmRegister,
    },

    Lea {
        src: AsmOperand,
        dst: AsmRegister,
    },

    Unary {
        asm_type: AsmType,
        op: AsmUnaryOp,
        operand: AsmOperand,
    },

    /* dst <- dst op src */
    Binary {
        asm_type: AsmType,
        op: AsmBinaryOp,
        src: AsmOperand,
        dst: AsmOperand,
    },

    /* Sets flags from dst - src. */
    Cmp {
        asm_type: AsmType,
        src: AsmOperand,
        dst: AsmOperand,
    },

    Test {
        asm_type: AsmType,
        src: AsmOperand,
        dst: AsmOperand,
    },

    /* Sign-extends RAX into RDX:RAX ahead of a signed division. */
    Cqo,

    /* Signed division of RDX:RAX; quotient in RAX, remainder in RDX. */
    Idiv {
        asm_type: AsmType,
        operand: AsmOperand,
    },

    /* Sets the low byte of a register to 0 or 1 from the flags. */
    SetCC {
        condition: ConditionCode,
        operand: AsmRegister,
    },

    Jmp(Label),
    JmpCC {
        condition: ConditionCode,
        target: Label,
    },
    Label(Label),
    Call(String),
    Push(AsmRegister),
    Pop(AsmRegister),
    Ret,

    /* Human-readable annotation; dropped when comments are disabled. */
    Comment(String),
    /* `global name` */
    Global(String),
    /* `name:` for a procedure entry point */
    Symbol(String),
}

/// Deduplicated string constants, numbered in first-use order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantPool {
    strings: Vec<String>,
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool::default()
    }

    /// Label of the entry holding `value`, creating it on first use.
    pub fn intern(&mut self, value: &str) -> String {
        let index = match self.strings.iter().position(|s| s == value) {
            Some(index) => index,
            None => {
                self.strings.push(value.to_string());
                self.strings.len() - 1
            }
        };
        ConstantPool::label(index)
    }

    pub fn label(index: usize) -> String {
        format!("str_{}", index)
    }

    pub fn entries(&self) -> impl Iterator<Item = (String, &str)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(index, value)| (ConstantPool::label(index), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmProgram {
    /// Name of the source file, echoed in the header comment.
    pub source: String,
    pub externs: Vec<String>,
    pub instructions: Vec<AsmInstruction>,
    pub constants: ConstantPool,
}
