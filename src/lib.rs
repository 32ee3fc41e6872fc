pub mod driver;
pub mod error;
pub mod observe;
pub mod lexer {
    pub mod lex;
    pub mod util;
}
pub mod parser {
    pub mod ast;
    pub mod recursive_descent;
}
pub mod codegen {
    pub mod asm;
    pub mod gen;
    pub mod regalloc;
    pub mod scope;
}
pub mod emitter {
    pub mod emit;
    pub mod util;
}

/// Knobs shared by the generator and the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Interleave human-readable comments with the generated instructions.
    pub comments: bool,
    /// Verify the register file invariant after every statement.
    pub check_registers: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            comments: true,
            check_registers: true,
        }
    }
}
