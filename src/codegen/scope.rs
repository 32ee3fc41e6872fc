use crate::{
    codegen::{
        asm::{AsmRegister, Label},
        regalloc::{Location, PARAMETER_REGISTERS},
    },
    error::{CompileError, CompileResult},
    parser::ast::{NodeId, Type},
};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterClass {
    Integer(AsmRegister),
    /// Index among the stack-passed parameters.
    Memory(usize),
}

pub fn classify_parameters(params: &[Type]) -> Vec<ParameterClass> {
    let mut stack_args = 0;

    params
        .iter()
        .enumerate()
        .map(|(i, _)| match PARAMETER_REGISTERS.get(i) {
            Some(register) => ParameterClass::Integer(*register),
            None => {
                stack_args += 1;
                ParameterClass::Memory(stack_args - 1)
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub name: String,
    pub return_type: Type,
    pub params: Vec<(Type, ParameterClass)>,
    pub is_extern: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Byte offset from the declaring frame's `rbp`.
    Stack { offset: i64 },
    /// A register-class parameter, tracked through the register file.
    Register { location: Location },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub _type: Type,
    pub storage: Storage,
    /// Stack height of the declaring block.
    pub stack_height: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The outermost program block; it has no frame of its own.
    Entry,
    /// A procedure's top-level block; `end_label` is the return target.
    Procedure,
    /// A `while` body; `start_label`/`end_label` are continue/break targets.
    Loop,
    Plain,
}

#[derive(Debug, Clone)]
pub struct BlockScope {
    pub kind: ScopeKind,
    pub variables: HashMap<String, Variable>,
    pub procedures: HashMap<String, Procedure>,
    /// Frame offsets of the declarations directly inside this block.
    pub layout: HashMap<NodeId, i64>,
    pub stack_height: usize,
    pub local_bytes: i64,
    pub start_label: Option<Label>,
    pub end_label: Option<Label>,
    pub return_type: Option<Type>,
}

impl BlockScope {
    pub fn new(kind: ScopeKind, stack_height: usize) -> BlockScope {
        BlockScope {
            kind,
            variables: HashMap::new(),
            procedures: HashMap::new(),
            layout: HashMap::new(),
            stack_height,
            local_bytes: 0,
            start_label: None,
            end_label: None,
            return_type: None,
        }
    }

    /// Bump-allocate `decls` (in declaration order) below the frame pointer.
    /// Returns the 16-byte aligned reservation.
    pub fn lay_out(&mut self, decls: &[(NodeId, Type)]) -> i64 {
        let mut total = 0;
        for (id, _type) in decls {
            total += _type.size();
            self.layout.insert(*id, -total);
        }
        self.local_bytes = (total + 15) / 16 * 16;
        self.local_bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Continue,
    Break,
    Return,
}

/// The chain of block scopes from the program block to the innermost one.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    scopes: Vec<BlockScope>,
}

impl ScopeStack {
    pub fn new() -> ScopeStack {
        ScopeStack::default()
    }

    pub fn push(&mut self, scope: BlockScope) {
        self.scopes.push(scope);
    }

    pub fn pop(&mut self) -> Option<BlockScope> {
        self.scopes.pop()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn current(&self) -> CompileResult<&BlockScope> {
        self.scopes
            .last()
            .ok_or_else(|| CompileError::semantic(None, "no enclosing block"))
    }

    pub fn current_mut(&mut self) -> CompileResult<&mut BlockScope> {
        self.scopes
            .last_mut()
            .ok_or_else(|| CompileError::semantic(None, "no enclosing block"))
    }

    pub fn stack_height(&self) -> usize {
        self.scopes.last().map_or(0, |scope| scope.stack_height)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.variables.get(name))
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.procedures.get(name))
    }

    /// Innermost procedure-top scope.
    pub fn procedure_scope(&self) -> Option<&BlockScope> {
        self.scopes
            .iter()
            .rev()
            .find(|scope| scope.kind == ScopeKind::Procedure)
    }

    /// Walk outwards to the scope a jump leaves through. Returns the number
    /// of frames to tear down on the way and the label to jump to.
    pub fn jump_target(&self, jump: JumpKind) -> CompileResult<(usize, Label)> {
        for (crossed, scope) in self.scopes.iter().rev().enumerate() {
            let target = match (jump, scope.kind) {
                (JumpKind::Continue, ScopeKind::Loop) => scope.start_label.clone(),
                (JumpKind::Break, ScopeKind::Loop) | (JumpKind::Return, ScopeKind::Procedure) => {
                    scope.end_label.clone()
                }
                (JumpKind::Continue | JumpKind::Break, ScopeKind::Procedure)
                | (_, ScopeKind::Entry) => break,
                _ => continue,
            };

            return target
                .map(|label| (crossed, label))
                .ok_or_else(|| CompileError::semantic(None, "jump target has no label"));
        }

        let message = match jump {
            JumpKind::Continue => "'continue' outside of a loop",
            JumpKind::Break => "'break' outside of a loop",
            JumpKind::Return => "'return' outside of a procedure",
        };
        Err(CompileError::semantic(None, message))
    }
}
