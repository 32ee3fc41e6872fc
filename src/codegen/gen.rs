use crate::{
    codegen::{
        asm::{
            AsmBinaryOp, AsmInstruction, AsmOperand, AsmProgram, AsmRegister, AsmType,
            AsmUnaryOp, ConditionCode, ConstantPool, Label,
        },
        regalloc::{Location, RegisterFile, PARAMETER_REGISTERS},
        scope::{
            classify_parameters, BlockScope, JumpKind, ParameterClass, Procedure, ScopeKind,
            ScopeStack, Storage, Variable,
        },
    },
    error::{CompileError, CompileResult},
    observe::{Event, Mode, Observer, State},
    parser::ast::{
        Ast, BinaryExpression, BinaryExpressionKind, IfStatement, Literal, NodeId, NodeKind,
        ProcedureCall, ProcedureDeclaration, ReturnStatement, Type, UnaryExpression,
        UnaryExpressionKind, VariableAssignment, VariableDeclaration, WhileStatement,
    },
    Options,
};

/// What a block is entered as; decides its prologue, epilogue and labels.
enum BlockRole {
    Entry,
    Procedure {
        name: String,
        return_type: Type,
        params: Vec<(String, Type, ParameterClass)>,
    },
    Loop {
        head: Label,
        start: Label,
        end: Label,
    },
    Plain,
}

/// Single-pass code generator over a parsed program.
pub struct Generator<'a, 'o> {
    ast: &'a mut Ast,
    observer: Option<&'o mut dyn Observer>,
    options: Options,
    source: String,
    registers: RegisterFile,
    scopes: ScopeStack,
    instructions: Vec<AsmInstruction>,
    externs: Vec<String>,
    constants: ConstantPool,
    next_location: usize,
    next_label: usize,
    /// Bytes pushed since the current procedure was called, return address
    /// included.
    stack_depth: i64,
}

impl<'a, 'o> Generator<'a, 'o> {
    pub fn new(ast: &'a mut Ast, options: Options, source: &str) -> Generator<'a, 'o> {
        Generator {
            ast,
            observer: None,
            options,
            source: source.to_string(),
            registers: RegisterFile::new(),
            scopes: ScopeStack::new(),
            instructions: vec![],
            externs: vec![],
            constants: ConstantPool::new(),
            next_location: 0,
            next_label: 0,
            stack_depth: 0,
        }
    }

    pub fn with_observer(mut self, observer: &'o mut dyn Observer) -> Generator<'a, 'o> {
        self.observer = Some(observer);
        self
    }

    pub fn generate(mut self) -> CompileResult<AsmProgram> {
        let root = self
            .ast
            .root()
            .ok_or_else(|| CompileError::semantic(None, "empty program"))?;

        self.block(root, BlockRole::Entry)?;

        Ok(AsmProgram {
            source: self.source,
            externs: self.externs,
            instructions: self.instructions,
            constants: self.constants,
        })
    }

    fn notify(&mut self, event: Event) -> CompileResult<()> {
        match self.observer.as_deref_mut() {
            Some(observer) => observer.notify(&event),
            None => Ok(()),
        }
    }

    fn node_event(&mut self, id: NodeId, state: State) -> CompileResult<()> {
        let span = self.ast.span(id).clone();
        let name = self.ast.kind(id).name();
        self.notify(
            Event::new(Mode::Codegen, state)
                .at(&span)
                .with_node(id)
                .with_text(name),
        )
    }

    fn emit(&mut self, instruction: AsmInstruction) {
        self.instructions.push(instruction);
    }

    fn comment(&mut self, text: impl Into<String>) {
        if self.options.comments {
            self.instructions.push(AsmInstruction::Comment(text.into()));
        }
    }

    fn fresh_location(&mut self) -> Location {
        self.next_location += 1;
        Location(self.next_location - 1)
    }

    fn fresh_label(&mut self, name: &str) -> Label {
        self.next_label += 1;
        Label {
            id: self.next_label - 1,
            name: name.to_string(),
        }
    }

    fn semantic(&self, id: NodeId, message: impl Into<String>) -> CompileError {
        CompileError::semantic(Some(self.ast.span(id)), message)
    }

    /// Register for `location`, claiming one if needed. Emits nothing.
    fn register_for(&mut self, location: Location) -> CompileResult<AsmRegister> {
        let (register, fresh) = self.registers.allocate(location)?;
        if fresh {
            self.notify(
                Event::new(Mode::Codegen, State::RegisterSet).with_register(register, location),
            )?;
        }
        Ok(register)
    }

    fn register_of(&self, location: Location) -> CompileResult<AsmRegister> {
        self.registers
            .register_of(location)
            .ok_or_else(|| CompileError::resource(format!("{} is not in a register", location)))
    }

    fn claim_parameter(&mut self, register: AsmRegister, location: Location) -> CompileResult<()> {
        self.registers.claim(register, location, true)?;
        self.notify(
            Event::new(Mode::Codegen, State::ParameterSet).with_register(register, location),
        )
    }

    fn release(&mut self, location: Location) -> CompileResult<()> {
        if let Some(register) = self.registers.release(location) {
            self.notify(
                Event::new(Mode::Codegen, State::RegisterCleared)
                    .with_register(register, location),
            )?;
        }
        Ok(())
    }

    /// Move a live value to an empty register.
    fn relocate(&mut self, from: AsmRegister, to: AsmRegister) -> CompileResult<()> {
        self.emit(AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Register(from),
            dst: AsmOperand::Register(to),
        });
        let location = self.registers.relocate(from, to)?;
        self.notify(
            Event::new(Mode::Codegen, State::RegisterCleared).with_register(from, location),
        )?;
        self.notify(Event::new(Mode::Codegen, State::RegisterSet).with_register(to, location))
    }

    fn prologue(&mut self) {
        self.emit(AsmInstruction::Push(AsmRegister::Bp));
        self.emit(AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Register(AsmRegister::Sp),
            dst: AsmOperand::Register(AsmRegister::Bp),
        });
    }

    fn epilogue(&mut self) {
        self.emit(AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Register(AsmRegister::Bp),
            dst: AsmOperand::Register(AsmRegister::Sp),
        });
        self.emit(AsmInstruction::Pop(AsmRegister::Bp));
    }

    fn adjust_stack(&mut self, op: AsmBinaryOp, bytes: i64) {
        self.emit(AsmInstruction::Binary {
            asm_type: AsmType::Quadword,
            op,
            src: AsmOperand::Imm(bytes),
            dst: AsmOperand::Register(AsmRegister::Sp),
        });
    }

    /// Re-normalize the low byte of `register` to the full width.
    fn extend(&mut self, register: AsmRegister, _type: Type) {
        match _type {
            Type::U8 => self.emit(AsmInstruction::MovZeroExtend {
                src: AsmOperand::Register(register),
                dst: register,
            }),
            Type::S8 => self.emit(AsmInstruction::Movsx {
                src: AsmOperand::Register(register),
                dst: register,
            }),
            Type::Int | Type::Void => {}
        }
    }

    fn block(&mut self, id: NodeId, role: BlockRole) -> CompileResult<()> {
        self.node_event(id, State::NodeStart)?;

        let stmts = match self.ast.kind(id) {
            NodeKind::Block(block) => block.stmts.clone(),
            other => {
                return Err(self.semantic(id, format!("expected a block, found {}", other.name())))
            }
        };

        let decls: Vec<(NodeId, Type)> = stmts
            .iter()
            .filter_map(|stmt| match self.ast.kind(*stmt) {
                NodeKind::VariableDeclaration(decl) => Some((*stmt, decl._type)),
                _ => None,
            })
            .collect();

        let (kind, stack_height) = match role {
            BlockRole::Entry => (ScopeKind::Entry, 0),
            BlockRole::Procedure { .. } => (ScopeKind::Procedure, self.scopes.stack_height() + 1),
            BlockRole::Loop { .. } => (ScopeKind::Loop, self.scopes.stack_height() + 1),
            BlockRole::Plain => (ScopeKind::Plain, self.scopes.stack_height() + 1),
        };

        let mut scope = BlockScope::new(kind, stack_height);
        let reserved = scope.lay_out(&decls);
        match &role {
            BlockRole::Procedure {
                name, return_type, ..
            } => {
                scope.end_label = Some(self.fresh_label(&format!("{}_return", name)));
                scope.return_type = Some(*return_type);
            }
            BlockRole::Loop { start, end, .. } => {
                scope.start_label = Some(start.clone());
                scope.end_label = Some(end.clone());
            }
            BlockRole::Entry | BlockRole::Plain => {}
        }
        let end_label = scope.end_label.clone();

        let depth_on_entry = self.stack_depth;
        if !matches!(role, BlockRole::Entry) {
            self.prologue();
            self.stack_depth += 8;
        }
        if reserved > 0 {
            self.adjust_stack(AsmBinaryOp::Sub, reserved);
            self.stack_depth += reserved;
        }
        self.scopes.push(scope);

        let mut parameters = vec![];
        if let BlockRole::Procedure { params, .. } = &role {
            for (name, _type, class) in params {
                let storage = match class {
                    ParameterClass::Integer(register) => {
                        let location = self.fresh_location();
                        self.claim_parameter(*register, location)?;
                        parameters.push(location);
                        Storage::Register { location }
                    }
                    ParameterClass::Memory(index) => Storage::Stack {
                        offset: 16 + 8 * *index as i64,
                    },
                };
                self.scopes.current_mut()?.variables.insert(
                    name.clone(),
                    Variable {
                        name: name.clone(),
                        _type: *_type,
                        storage,
                        stack_height,
                    },
                );
            }
        }

        for stmt in stmts {
            self.statement(stmt)?;
            if self.options.check_registers {
                self.registers.check_consistency()?;
            }
        }

        match role {
            BlockRole::Entry => {
                if reserved > 0 {
                    self.adjust_stack(AsmBinaryOp::Add, reserved);
                }
            }
            BlockRole::Plain => self.epilogue(),
            BlockRole::Loop { head, start, end } => {
                self.emit(AsmInstruction::Label(start));
                self.epilogue();
                self.emit(AsmInstruction::Jmp(head));
                self.emit(AsmInstruction::Label(end));
                self.epilogue();
            }
            BlockRole::Procedure { .. } => {
                // falling off the end returns 0
                self.emit(AsmInstruction::Binary {
                    asm_type: AsmType::Longword,
                    op: AsmBinaryOp::Xor,
                    src: AsmOperand::Register(AsmRegister::Ax),
                    dst: AsmOperand::Register(AsmRegister::Ax),
                });
                if let Some(label) = end_label {
                    self.emit(AsmInstruction::Label(label));
                }
                self.epilogue();
                self.emit(AsmInstruction::Ret);
                for location in parameters {
                    self.release(location)?;
                }
            }
        }

        self.stack_depth = depth_on_entry;
        self.scopes.pop();
        self.node_event(id, State::NodeEnd)
    }

    fn statement(&mut self, id: NodeId) -> CompileResult<()> {
        self.node_event(id, State::NodeStart)?;

        match self.ast.kind(id).clone() {
            NodeKind::Block(_) => {
                self.comment("block");
                self.block(id, BlockRole::Plain)?;
            }
            NodeKind::ProcedureDeclaration(decl) => self.procedure(id, decl)?,
            NodeKind::ProcedureCall(call) => self.call(id, call)?,
            NodeKind::VariableDeclaration(decl) => self.declaration(id, decl)?,
            NodeKind::VariableAssignment(assign) => self.assignment(id, assign)?,
            NodeKind::If(stmt) => self.if_statement(stmt)?,
            NodeKind::While(stmt) => self.while_statement(stmt)?,
            NodeKind::Continue => self.jump(id, JumpKind::Continue)?,
            NodeKind::Break => self.jump(id, JumpKind::Break)?,
            NodeKind::Return(stmt) => self.return_statement(id, stmt)?,
            other => {
                return Err(self.semantic(id, format!("{} is not a statement", other.name())))
            }
        }

        self.node_event(id, State::NodeEnd)
    }

    fn procedure(&mut self, id: NodeId, decl: ProcedureDeclaration) -> CompileResult<()> {
        let types: Vec<Type> = decl.params.iter().map(|p| p._type).collect();
        let classes = classify_parameters(&types);

        self.scopes.current_mut()?.procedures.insert(
            decl.name.clone(),
            Procedure {
                name: decl.name.clone(),
                return_type: decl.return_type,
                params: types.iter().copied().zip(classes.iter().copied()).collect(),
                is_extern: decl.is_extern,
            },
        );

        if decl.is_extern {
            if !self.externs.contains(&decl.name) {
                self.externs.push(decl.name);
            }
            return Ok(());
        }

        let Some(body) = decl.body else {
            return Err(self.semantic(id, format!("procedure '{}' has no body", decl.name)));
        };
        if self.scopes.current()?.kind != ScopeKind::Entry {
            return Err(self.semantic(
                id,
                format!("procedure '{}' must be defined at top level", decl.name),
            ));
        }

        self.emit(AsmInstruction::Global(decl.name.clone()));
        self.emit(AsmInstruction::Symbol(decl.name.clone()));
        self.stack_depth = 8;

        let params = decl
            .params
            .into_iter()
            .zip(classes)
            .map(|(param, class)| (param.name, param._type, class))
            .collect();
        self.block(
            body,
            BlockRole::Procedure {
                name: decl.name,
                return_type: decl.return_type,
                params,
            },
        )?;

        self.stack_depth = 0;
        Ok(())
    }

    fn lookup(&self, id: NodeId, name: &str) -> CompileResult<Variable> {
        self.scopes
            .variable(name)
            .cloned()
            .ok_or_else(|| self.semantic(id, format!("undeclared identifier '{}'", name)))
    }

    /// Memory operand for a stack variable, walking saved frame pointers up
    /// to the declaring block. The temporary used for the walk, if any, must
    /// be released by the caller.
    fn address_of(
        &mut self,
        var: &Variable,
        offset: i64,
    ) -> CompileResult<(AsmOperand, Option<Location>)> {
        let hops = self.scopes.stack_height().saturating_sub(var.stack_height);
        if hops == 0 {
            return Ok((AsmOperand::Memory(AsmRegister::Bp, offset), None));
        }

        let temp = self.fresh_location();
        let register = self.register_for(temp)?;
        self.emit(AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Memory(AsmRegister::Bp, 0),
            dst: AsmOperand::Register(register),
        });
        for _ in 1..hops {
            self.emit(AsmInstruction::Mov {
                asm_type: AsmType::Quadword,
                src: AsmOperand::Memory(register, 0),
                dst: AsmOperand::Register(register),
            });
        }

        Ok((AsmOperand::Memory(register, offset), Some(temp)))
    }

    fn load_variable(&mut self, var: &Variable, dst: AsmRegister) -> CompileResult<()> {
        match var.storage {
            Storage::Register { location } => {
                let src = self.register_of(location)?;
                self.emit(AsmInstruction::Mov {
                    asm_type: AsmType::Quadword,
                    src: AsmOperand::Register(src),
                    dst: AsmOperand::Register(dst),
                });
            }
            Storage::Stack { offset } => {
                let (src, temp) = self.address_of(var, offset)?;
                self.emit(match var._type {
                    Type::U8 => AsmInstruction::MovZeroExtend { src, dst },
                    Type::S8 => AsmInstruction::Movsx { src, dst },
                    Type::Int | Type::Void => AsmInstruction::Mov {
                        asm_type: AsmType::Quadword,
                        src,
                        dst: AsmOperand::Register(dst),
                    },
                });
                if let Some(temp) = temp {
                    self.release(temp)?;
                }
            }
        }
        Ok(())
    }

    fn store_variable(&mut self, var: &Variable, src: AsmRegister) -> CompileResult<()> {
        match var.storage {
            Storage::Register { location } => {
                let dst = self.register_of(location)?;
                match var._type {
                    Type::U8 => self.emit(AsmInstruction::MovZeroExtend {
                        src: AsmOperand::Register(src),
                        dst,
                    }),
                    Type::S8 => self.emit(AsmInstruction::Movsx {
                        src: AsmOperand::Register(src),
                        dst,
                    }),
                    Type::Int | Type::Void => self.emit(AsmInstruction::Mov {
                        asm_type: AsmType::Quadword,
                        src: AsmOperand::Register(src),
                        dst: AsmOperand::Register(dst),
                    }),
                }
            }
            Storage::Stack { offset } => {
                let (dst, temp) = self.address_of(var, offset)?;
                let asm_type = if var._type.is_byte() {
                    AsmType::Byte
                } else {
                    AsmType::Quadword
                };
                self.emit(AsmInstruction::Mov {
                    asm_type,
                    src: AsmOperand::Register(src),
                    dst,
                });
                if let Some(temp) = temp {
                    self.release(temp)?;
                }
            }
        }
        Ok(())
    }

    fn declaration(&mut self, id: NodeId, decl: VariableDeclaration) -> CompileResult<()> {
        let offset = *self
            .scopes
            .current()?
            .layout
            .get(&id)
            .ok_or_else(|| self.semantic(id, format!("'{}' has no stack slot", decl.name)))?;

        let var = Variable {
            name: decl.name.clone(),
            _type: decl._type,
            storage: Storage::Stack { offset },
            stack_height: self.scopes.stack_height(),
        };
        self.comment(format!("{} {} @ rbp{:+}", decl._type, decl.name, offset));

        if let Some(init) = decl.init {
            let value = self.expression(init, decl._type)?;
            let register = self.register_of(value)?;
            self.store_variable(&var, register)?;
            self.release(value)?;
        }

        self.scopes
            .current_mut()?
            .variables
            .insert(decl.name, var);
        Ok(())
    }

    fn assignment(&mut self, id: NodeId, assign: VariableAssignment) -> CompileResult<()> {
        let var = self.lookup(id, &assign.name)?;
        self.comment(format!("{} = ...", assign.name));

        let value = self.expression(assign.value, var._type)?;
        let register = self.register_of(value)?;
        self.store_variable(&var, register)?;
        self.release(value)
    }

    /// Leave the zero flag set iff the value at `location` is zero. Frees it.
    fn test_zero(&mut self, location: Location) -> CompileResult<()> {
        let register = self.register_of(location)?;
        let copy = self.fresh_location();
        let copy_register = self.register_for(copy)?;
        self.emit(AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Register(register),
            dst: AsmOperand::Register(copy_register),
        });
        self.emit(AsmInstruction::Test {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Register(copy_register),
            dst: AsmOperand::Register(copy_register),
        });
        self.release(location)?;
        self.release(copy)
    }

    fn if_statement(&mut self, stmt: IfStatement) -> CompileResult<()> {
        let else_label = self.fresh_label("if_else");
        let end_label = self.fresh_label("if_end");

        self.comment("if");
        let condition = self.expression(stmt.condition, Type::Int)?;
        self.test_zero(condition)?;
        let target = if stmt.else_branch.is_some() {
            else_label.clone()
        } else {
            end_label.clone()
        };
        self.emit(AsmInstruction::JmpCC {
            condition: ConditionCode::E,
            target,
        });

        self.block(stmt.then_branch, BlockRole::Plain)?;

        if let Some(else_branch) = stmt.else_branch {
            self.emit(AsmInstruction::Jmp(end_label.clone()));
            self.emit(AsmInstruction::Label(else_label));
            match self.ast.kind(else_branch) {
                NodeKind::Block(_) => self.block(else_branch, BlockRole::Plain)?,
                _ => self.statement(else_branch)?,
            }
        }

        self.emit(AsmInstruction::Label(end_label));
        Ok(())
    }

    fn while_statement(&mut self, stmt: WhileStatement) -> CompileResult<()> {
        let head = self.fresh_label("while_head");
        let start = self.fresh_label("while_continue");
        let end = self.fresh_label("while_break");
        let exit = self.fresh_label("while_exit");

        self.comment("while");
        self.emit(AsmInstruction::Label(head.clone()));
        let condition = self.expression(stmt.condition, Type::Int)?;
        self.test_zero(condition)?;
        self.emit(AsmInstruction::JmpCC {
            condition: ConditionCode::E,
            target: exit.clone(),
        });

        self.block(stmt.body, BlockRole::Loop { head, start, end })?;

        self.emit(AsmInstruction::Label(exit));
        Ok(())
    }

    fn jump(&mut self, id: NodeId, kind: JumpKind) -> CompileResult<()> {
        let (teardowns, target) = self.scopes.jump_target(kind).map_err(|e| match e {
            CompileError::Semantic { span: None, message } => self.semantic(id, message),
            other => other,
        })?;

        for _ in 0..teardowns {
            self.epilogue();
        }
        self.emit(AsmInstruction::Jmp(target));
        Ok(())
    }

    fn return_statement(&mut self, id: NodeId, stmt: ReturnStatement) -> CompileResult<()> {
        let return_type = self
            .scopes
            .procedure_scope()
            .and_then(|scope| scope.return_type)
            .unwrap_or(Type::Int);

        if let Some(expr) = stmt.expr {
            if return_type == Type::Void {
                return Err(self.semantic(id, "void procedure returns a value"));
            }
            let value = self.expression(expr, return_type)?;
            let register = self.register_of(value)?;
            self.emit(AsmInstruction::Mov {
                asm_type: AsmType::Quadword,
                src: AsmOperand::Register(register),
                dst: AsmOperand::Register(AsmRegister::Ax),
            });
            self.release(value)?;
        }

        self.jump(id, JumpKind::Return)
    }

    fn call(&mut self, id: NodeId, call: ProcedureCall) -> CompileResult<()> {
        let procedure = self
            .scopes
            .procedure(&call.name)
            .cloned()
            .ok_or_else(|| self.semantic(id, format!("undeclared procedure '{}'", call.name)))?;

        if call.args.len() != procedure.params.len() {
            return Err(self.semantic(
                id,
                format!(
                    "procedure '{}' expects {} argument(s), got {}",
                    call.name,
                    procedure.params.len(),
                    call.args.len()
                ),
            ));
        }

        let mut targets = vec![];
        for (i, (_, class)) in procedure.params.iter().enumerate() {
            match class {
                ParameterClass::Integer(register) => targets.push(*register),
                ParameterClass::Memory(_) => {
                    return Err(self.semantic(
                        id,
                        format!(
                            "unsupported parameter class: argument {} of '{}' is passed on the stack",
                            i + 1,
                            call.name
                        ),
                    ))
                }
            }
        }

        self.comment(format!("call {}", call.name));

        let mut args = vec![];
        for (arg, (_type, _)) in call.args.iter().zip(procedure.params.iter()) {
            args.push(self.expression(*arg, *_type)?);
        }

        for (location, target) in args.iter().zip(targets.iter()) {
            let current = self.register_of(*location)?;
            if current == *target {
                continue;
            }
            if !self.registers.is_free(*target) {
                let spare = self
                    .registers
                    .first_free_except(&targets)
                    .or_else(|| self.registers.first_free_except(&[]))
                    .ok_or_else(|| CompileError::resource("no available register"))?;
                self.relocate(*target, spare)?;
            }
            let current = self.register_of(*location)?;
            self.relocate(current, *target)?;
        }

        self.emit(AsmInstruction::Binary {
            asm_type: AsmType::Longword,
            op: AsmBinaryOp::Xor,
            src: AsmOperand::Register(AsmRegister::Ax),
            dst: AsmOperand::Register(AsmRegister::Ax),
        });

        let saved = self.registers.occupied();
        for register in &saved {
            self.emit(AsmInstruction::Push(*register));
            self.stack_depth += 8;
        }

        let padded = self.stack_depth % 16 != 0;
        if padded {
            self.adjust_stack(AsmBinaryOp::Sub, 8);
            self.stack_depth += 8;
        }

        self.emit(AsmInstruction::Call(call.name.clone()));

        if padded {
            self.adjust_stack(AsmBinaryOp::Add, 8);
            self.stack_depth -= 8;
        }
        for register in saved.iter().rev() {
            self.emit(AsmInstruction::Pop(*register));
            self.stack_depth -= 8;
        }

        for location in args {
            self.release(location)?;
        }
        self.restore_parameters()
    }

    /// Move every parameter evicted during argument setup back home.
    fn restore_parameters(&mut self) -> CompileResult<()> {
        loop {
            let displaced = self.registers.displaced_parameters();
            let Some(&(_, _, blocked_home)) = displaced.first() else {
                return Ok(());
            };

            match displaced
                .iter()
                .find(|(_, _, home)| self.registers.is_free(*home))
            {
                Some(&(_, current, home)) => self.relocate(current, home)?,
                None => {
                    let spare = self
                        .registers
                        .first_free_except(&PARAMETER_REGISTERS)
                        .or_else(|| self.registers.first_free_except(&[blocked_home]))
                        .ok_or_else(|| CompileError::resource("no available register"))?;
                    self.relocate(blocked_home, spare)?;
                }
            }
        }
    }

    /// Evaluate an expression into a fresh Location. `context` is the type
    /// the value is headed for; literals are materialized at that width.
    fn expression(&mut self, id: NodeId, context: Type) -> CompileResult<Location> {
        self.node_event(id, State::NodeStart)?;
        let location = self.fresh_location();

        let data_type = match self.ast.kind(id).clone() {
            NodeKind::Literal(Literal::Integer(value)) => {
                let byte_max = match context {
                    Type::U8 => Some(u8::MAX as u64),
                    Type::S8 => Some(i8::MAX as u64),
                    Type::Int | Type::Void => None,
                };
                if byte_max.is_some_and(|max| value > max) {
                    return Err(self.semantic(
                        id,
                        format!("integer literal {} does not fit in {}", value, context),
                    ));
                }

                let register = self.register_for(location)?;
                if context.is_byte() {
                    self.emit(AsmInstruction::Mov {
                        asm_type: AsmType::Byte,
                        src: AsmOperand::Imm(value as i64),
                        dst: AsmOperand::Register(register),
                    });
                    self.extend(register, context);
                    context
                } else {
                    self.emit(AsmInstruction::Mov {
                        asm_type: AsmType::Quadword,
                        src: AsmOperand::Imm(value as i64),
                        dst: AsmOperand::Register(register),
                    });
                    Type::Int
                }
            }
            NodeKind::Literal(Literal::String(value)) => {
                let label = self.constants.intern(&value);
                let register = self.register_for(location)?;
                self.emit(AsmInstruction::Lea {
                    src: AsmOperand::Data(label),
                    dst: register,
                });
                Type::Int
            }
            NodeKind::Variable(var) => {
                let var = self.lookup(id, &var.name)?;
                let register = self.register_for(location)?;
                self.load_variable(&var, register)?;
                var._type
            }
            NodeKind::Unary(expr) => self.unary(location, expr, context)?,
            NodeKind::Binary(expr) => match expr.kind {
                BinaryExpressionKind::And | BinaryExpressionKind::Or => {
                    self.short_circuit(location, expr)?
                }
                _ => self.binary(location, expr)?,
            },
            other => {
                return Err(self.semantic(id, format!("{} is not an expression", other.name())))
            }
        };

        let node = self.ast.node_mut(id);
        node.location = Some(location);
        node.data_type = Some(data_type);

        self.node_event(id, State::NodeEnd)?;
        Ok(location)
    }

    fn data_type(&self, id: NodeId) -> Type {
        self.ast.node(id).data_type.unwrap_or(Type::Int)
    }

    fn unary(
        &mut self,
        location: Location,
        expr: UnaryExpression,
        context: Type,
    ) -> CompileResult<Type> {
        let operand_context = match expr.kind {
            UnaryExpressionKind::Plus => context,
            UnaryExpressionKind::Negate | UnaryExpressionKind::Not => Type::Int,
        };
        let operand = self.expression(expr.expr, operand_context)?;
        let register = self.register_of(operand)?;

        let copy = self.fresh_location();
        let copy_register = self.register_for(copy)?;
        self.emit(AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Register(register),
            dst: AsmOperand::Register(copy_register),
        });

        let data_type = match expr.kind {
            UnaryExpressionKind::Plus => self.data_type(expr.expr),
            UnaryExpressionKind::Negate => {
                self.emit(AsmInstruction::Unary {
                    asm_type: AsmType::Quadword,
                    op: AsmUnaryOp::Neg,
                    operand: AsmOperand::Register(copy_register),
                });
                Type::Int
            }
            UnaryExpressionKind::Not => {
                self.emit(AsmInstruction::Cmp {
                    asm_type: AsmType::Quadword,
                    src: AsmOperand::Imm(0),
                    dst: AsmOperand::Register(copy_register),
                });
                self.emit(AsmInstruction::SetCC {
                    condition: ConditionCode::E,
                    operand: copy_register,
                });
                self.extend(copy_register, Type::U8);
                Type::Int
            }
        };

        self.release(operand)?;
        self.registers.swap(copy_register, copy, location)?;
        Ok(data_type)
    }

    fn binary(&mut self, location: Location, expr: BinaryExpression) -> CompileResult<Type> {
        let lhs = self.expression(expr.lhs, Type::Int)?;
        let lhs_register = self.register_of(lhs)?;

        let copy = self.fresh_location();
        let copy_register = self.register_for(copy)?;
        self.emit(AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Register(lhs_register),
            dst: AsmOperand::Register(copy_register),
        });

        let rhs = self.expression(expr.rhs, Type::Int)?;
        let rhs_register = self.register_of(rhs)?;
        let copy_register = self.register_of(copy)?;

        let arithmetic = |op: AsmBinaryOp| AsmInstruction::Binary {
            asm_type: AsmType::Quadword,
            op,
            src: AsmOperand::Register(rhs_register),
            dst: AsmOperand::Register(copy_register),
        };

        let condition = match expr.kind {
            BinaryExpressionKind::Add => {
                self.emit(arithmetic(AsmBinaryOp::Add));
                None
            }
            BinaryExpressionKind::Sub => {
                self.emit(arithmetic(AsmBinaryOp::Sub));
                None
            }
            BinaryExpressionKind::Mul => {
                self.emit(arithmetic(AsmBinaryOp::Mul));
                None
            }
            BinaryExpressionKind::Div => {
                self.divide(copy_register, rhs_register);
                None
            }
            BinaryExpressionKind::Equal => Some(ConditionCode::E),
            BinaryExpressionKind::NotEqual => Some(ConditionCode::NE),
            BinaryExpressionKind::Less => Some(ConditionCode::L),
            BinaryExpressionKind::LessEqual => Some(ConditionCode::LE),
            BinaryExpressionKind::Greater => Some(ConditionCode::G),
            BinaryExpressionKind::GreaterEqual => Some(ConditionCode::GE),
            BinaryExpressionKind::And | BinaryExpressionKind::Or => {
                return Err(CompileError::resource("logical operator reached arithmetic lowering"))
            }
        };

        let data_type = match condition {
            Some(condition) => {
                self.emit(AsmInstruction::Cmp {
                    asm_type: AsmType::Quadword,
                    src: AsmOperand::Register(rhs_register),
                    dst: AsmOperand::Register(copy_register),
                });
                self.emit(AsmInstruction::SetCC {
                    condition,
                    operand: copy_register,
                });
                self.extend(copy_register, Type::U8);
                Type::Int
            }
            None => {
                let (lhs_type, rhs_type) = (self.data_type(expr.lhs), self.data_type(expr.rhs));
                if lhs_type == rhs_type && lhs_type.is_byte() {
                    self.extend(copy_register, lhs_type);
                    lhs_type
                } else {
                    Type::Int
                }
            }
        };

        self.release(lhs)?;
        self.release(rhs)?;
        self.registers.swap(copy_register, copy, location)?;
        Ok(data_type)
    }

    /// `dividend <- dividend / divisor` through rax/rdx, leaving every other
    /// register as it was.
    fn divide(&mut self, dividend: AsmRegister, divisor: AsmRegister) {
        let save_rdx = !self.registers.is_free(AsmRegister::Dx);
        if save_rdx {
            self.emit(AsmInstruction::Push(AsmRegister::Dx));
            self.stack_depth += 8;
        }

        self.emit(AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Register(dividend),
            dst: AsmOperand::Register(AsmRegister::Ax),
        });
        self.emit(AsmInstruction::Cqo);

        let operand = if save_rdx && divisor == AsmRegister::Dx {
            AsmOperand::Memory(AsmRegister::Sp, 0)
        } else {
            AsmOperand::Register(divisor)
        };
        self.emit(AsmInstruction::Idiv {
            asm_type: AsmType::Quadword,
            operand,
        });

        if save_rdx {
            self.emit(AsmInstruction::Pop(AsmRegister::Dx));
            self.stack_depth -= 8;
        }
        self.emit(AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Register(AsmRegister::Ax),
            dst: AsmOperand::Register(dividend),
        });
    }

    fn short_circuit(&mut self, location: Location, expr: BinaryExpression) -> CompileResult<Type> {
        let (name, decided) = match expr.kind {
            BinaryExpressionKind::And => ("and_end", ConditionCode::E),
            _ => ("or_end", ConditionCode::NE),
        };
        let end = self.fresh_label(name);

        let lhs = self.expression(expr.lhs, Type::Int)?;
        let result = self.fresh_location();
        let result_register = self.register_for(result)?;
        self.normalize_truth(lhs, result_register)?;
        self.release(lhs)?;

        self.emit(AsmInstruction::Cmp {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Imm(0),
            dst: AsmOperand::Register(result_register),
        });
        self.emit(AsmInstruction::JmpCC {
            condition: decided,
            target: end.clone(),
        });

        let rhs = self.expression(expr.rhs, Type::Int)?;
        self.normalize_truth(rhs, result_register)?;
        self.release(rhs)?;

        self.emit(AsmInstruction::Label(end));
        self.registers.swap(result_register, result, location)?;
        Ok(Type::Int)
    }

    /// `dst <- (value != 0)`
    fn normalize_truth(&mut self, value: Location, dst: AsmRegister) -> CompileResult<()> {
        let register = self.register_of(value)?;
        self.emit(AsmInstruction::Cmp {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Imm(0),
            dst: AsmOperand::Register(register),
        });
        self.emit(AsmInstruction::SetCC {
            condition: ConditionCode::NE,
            operand: dst,
        });
        self.extend(dst, Type::U8);
        Ok(())
    }
}

pub fn generate(ast: &mut Ast, options: Options, source: &str) -> CompileResult<AsmProgram> {
    Generator::new(ast, options, source).generate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer::lex::tokenize, observe::Recorder, parser::recursive_descent::parse};

    fn compile(src: &str) -> CompileResult<AsmProgram> {
        let mut ast = parse(tokenize(src, "t.mc")?)?;
        generate(&mut ast, Options::default(), "t.mc")
    }

    fn without_comments(program: &AsmProgram) -> Vec<AsmInstruction> {
        program
            .instructions
            .iter()
            .filter(|i| !matches!(i, AsmInstruction::Comment(_)))
            .cloned()
            .collect()
    }

    fn reg(register: AsmRegister) -> AsmOperand {
        AsmOperand::Register(register)
    }

    fn position(instructions: &[AsmInstruction], wanted: &AsmInstruction) -> usize {
        instructions
            .iter()
            .position(|i| i == wanted)
            .unwrap_or_else(|| panic!("{:?} not emitted", wanted))
    }

    #[test]
    fn byte_literal_store_reload_and_call() {
        let program =
            compile("extern void printf(u8 x); void main() { u8 a = 5; printf(a); }").unwrap();
        let code = without_comments(&program);

        assert_eq!(program.externs, vec!["printf".to_string()]);
        assert!(code.contains(&AsmInstruction::Symbol("main".to_string())));

        let load = position(
            &code,
            &AsmInstruction::Mov {
                asm_type: AsmType::Byte,
                src: AsmOperand::Imm(5),
                dst: reg(AsmRegister::Di),
            },
        );
        let store = position(
            &code,
            &AsmInstruction::Mov {
                asm_type: AsmType::Byte,
                src: reg(AsmRegister::Di),
                dst: AsmOperand::Memory(AsmRegister::Bp, -1),
            },
        );
        let reload = position(
            &code,
            &AsmInstruction::MovZeroExtend {
                src: AsmOperand::Memory(AsmRegister::Bp, -1),
                dst: AsmRegister::Di,
            },
        );
        let push = position(&code, &AsmInstruction::Push(AsmRegister::Di));
        let call = position(&code, &AsmInstruction::Call("printf".to_string()));
        let pop = position(&code, &AsmInstruction::Pop(AsmRegister::Di));

        assert!(load < store && store < reload && reload < push && push < call && call < pop);
    }

    #[test]
    fn break_tears_down_each_crossed_frame() {
        let program = compile(
            "void main() { int x = 1; while (x) { { { break; } } } }",
        )
        .unwrap();
        let code = without_comments(&program);

        let jmp = code
            .iter()
            .position(|i| matches!(i, AsmInstruction::Jmp(label) if label.name == "while_break"))
            .unwrap();
        assert_eq!(code[jmp - 1], AsmInstruction::Pop(AsmRegister::Bp));
        assert_eq!(code[jmp - 3], AsmInstruction::Pop(AsmRegister::Bp));
        assert!(!matches!(code[jmp - 5], AsmInstruction::Pop(AsmRegister::Bp)));
        assert_eq!(
            code[jmp - 2],
            AsmInstruction::Mov {
                asm_type: AsmType::Quadword,
                src: reg(AsmRegister::Bp),
                dst: reg(AsmRegister::Sp),
            }
        );
    }

    #[test]
    fn strings_are_deduplicated() {
        let program = compile(
            "extern void puts(int s); void main() { puts(\"hi\"); puts(\"hi\"); puts(\"yo\"); }",
        )
        .unwrap();
        let entries: Vec<_> = program.constants.entries().collect();
        assert_eq!(
            entries,
            vec![("str_0".to_string(), "hi"), ("str_1".to_string(), "yo")]
        );
    }

    #[test]
    fn calls_keep_the_stack_aligned() {
        let program = compile("extern void f(); void main() { f(); }").unwrap();
        let code = without_comments(&program);
        let call = position(&code, &AsmInstruction::Call("f".to_string()));
        // return address and saved rbp keep rsp aligned, so no padding
        assert_eq!(
            code[call - 1],
            AsmInstruction::Binary {
                asm_type: AsmType::Longword,
                op: AsmBinaryOp::Xor,
                src: reg(AsmRegister::Ax),
                dst: reg(AsmRegister::Ax),
            }
        );

        let program = compile("extern void f(int a); void main() { f(1); }").unwrap();
        let code = without_comments(&program);
        let call = position(&code, &AsmInstruction::Call("f".to_string()));
        assert_eq!(
            code[call - 1],
            AsmInstruction::Binary {
                asm_type: AsmType::Quadword,
                op: AsmBinaryOp::Sub,
                src: AsmOperand::Imm(8),
                dst: reg(AsmRegister::Sp),
            }
        );
    }

    #[test]
    fn arity_mismatch() {
        let err = compile("extern void f(int a); void main() { f(1, 2); }").unwrap_err();
        assert!(err.to_string().contains("expects 1 argument(s), got 2"));
    }

    #[test]
    fn stack_arguments_are_unsupported() {
        let err = compile(
            "extern void f(int a, int b, int c, int d, int e, int g, int h);
             void main() { f(1, 2, 3, 4, 5, 6, 7); }",
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Semantic { .. }));
        assert!(err.to_string().contains("unsupported parameter class"));
    }

    #[test]
    fn memory_parameters_are_readable() {
        let program = compile(
            "int f(int a, int b, int c, int d, int e, int g, int h) { return h; }",
        )
        .unwrap();
        assert!(program.instructions.contains(&AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: AsmOperand::Memory(AsmRegister::Bp, 16),
            dst: reg(AsmRegister::R10),
        }));
    }

    #[test]
    fn register_exhaustion_is_reported() {
        let err = compile(
            "void main() { int x = 1 + (1 + (1 + (1 + (1 + (1 + (1 + (1 + 1))))))); }",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "codegen error: no available register");
    }

    #[test]
    fn parameters_return_home_after_calls() {
        let program = compile(
            "extern void g(int x, int y); void f(int a, int b) { g(b, a); g(a, b); }",
        )
        .unwrap();
        let code = without_comments(&program);
        let last_call = code
            .iter()
            .rposition(|i| *i == AsmInstruction::Call("g".to_string()))
            .unwrap();
        let moved_back = |src: AsmRegister, dst: AsmRegister| {
            code[last_call..].contains(&AsmInstruction::Mov {
                asm_type: AsmType::Quadword,
                src: reg(src),
                dst: reg(dst),
            })
        };
        // a was parked in r8 and b in rdx while the arguments were placed
        assert!(moved_back(AsmRegister::R8, AsmRegister::Di));
        assert!(moved_back(AsmRegister::Dx, AsmRegister::Si));
    }

    #[test]
    fn outer_variables_walk_saved_frame_pointers() {
        let program = compile("void main() { int x = 1; { { x = 2; } } }").unwrap();
        let code = without_comments(&program);
        let store = code
            .iter()
            .position(|i| {
                matches!(i, AsmInstruction::Mov { dst: AsmOperand::Memory(base, -8), .. } if *base != AsmRegister::Bp)
            })
            .unwrap();
        assert!(matches!(
            code[store - 2],
            AsmInstruction::Mov {
                src: AsmOperand::Memory(AsmRegister::Bp, 0),
                ..
            }
        ));
        assert!(matches!(
            code[store - 1],
            AsmInstruction::Mov {
                src: AsmOperand::Memory(base, 0),
                dst: AsmOperand::Register(dst),
                ..
            } if base == dst
        ));
    }

    #[test]
    fn short_circuit_skips_the_right_operand() {
        let program = compile("void main() { int a = 0; int b = a && a / 0; }").unwrap();
        let code = without_comments(&program);
        let jump = code
            .iter()
            .position(|i| matches!(i, AsmInstruction::JmpCC { condition: ConditionCode::E, target } if target.name == "and_end"))
            .unwrap();
        let divide = position(&code, &AsmInstruction::Cqo);
        assert!(jump < divide);
    }

    #[test]
    fn return_moves_the_value_into_rax() {
        let program = compile("int main() { return 3; }").unwrap();
        let code = without_comments(&program);
        let mov = position(
            &code,
            &AsmInstruction::Mov {
                asm_type: AsmType::Quadword,
                src: reg(AsmRegister::Di),
                dst: reg(AsmRegister::Ax),
            },
        );
        assert!(matches!(&code[mov + 1], AsmInstruction::Jmp(label) if label.name == "main_return"));
        assert_eq!(code.last(), Some(&AsmInstruction::Ret));
    }

    #[test]
    fn nodes_are_annotated() {
        let tokens = tokenize("void main() { u8 a = 1; int b = a + a; }", "t.mc").unwrap();
        let mut ast = parse(tokens).unwrap();
        generate(&mut ast, Options::default(), "t.mc").unwrap();
        let sums: Vec<_> = (0..ast.len())
            .map(NodeId)
            .filter(|id| matches!(ast.kind(*id), NodeKind::Binary(_)))
            .collect();
        assert_eq!(sums.len(), 1);
        let node = ast.node(sums[0]);
        assert!(node.location.is_some());
        assert_eq!(node.data_type, Some(Type::U8));
    }

    #[test]
    fn allocation_emits_nothing() {
        let mut ast = Ast::new();
        let mut generator = Generator::new(&mut ast, Options::default(), "t.mc");
        let first = generator.register_for(Location(7)).unwrap();
        let again = generator.register_for(Location(7)).unwrap();
        assert_eq!(first, again);
        assert!(generator.instructions.is_empty());
    }

    #[test]
    fn register_events_are_reported() {
        let mut ast = parse(tokenize("void main() { int a = 1; }", "t.mc").unwrap()).unwrap();
        let mut recorder = Recorder::default();
        Generator::new(&mut ast, Options::default(), "t.mc")
            .with_observer(&mut recorder)
            .generate()
            .unwrap();
        let states = recorder.states(Mode::Codegen);
        assert!(states.contains(&State::RegisterSet));
        assert!(states.contains(&State::RegisterCleared));
    }

    fn quad_move(src: AsmRegister, dst: AsmRegister) -> AsmInstruction {
        AsmInstruction::Mov {
            asm_type: AsmType::Quadword,
            src: reg(src),
            dst: reg(dst),
        }
    }

    #[test]
    fn comparisons_set_and_zero_extend() {
        let cases = [
            ("==", ConditionCode::E),
            ("!=", ConditionCode::NE),
            ("<", ConditionCode::L),
            ("<=", ConditionCode::LE),
            (">", ConditionCode::G),
            (">=", ConditionCode::GE),
        ];

        for (op, condition) in cases {
            let program = compile(&format!(
                "void main() {{ int a = 1; int b = 2; int c = a {} b; }}",
                op
            ))
            .unwrap();
            let code = without_comments(&program);

            let cmp = position(
                &code,
                &AsmInstruction::Cmp {
                    asm_type: AsmType::Quadword,
                    src: reg(AsmRegister::Dx),
                    dst: reg(AsmRegister::Si),
                },
            );
            assert_eq!(
                code[cmp + 1],
                AsmInstruction::SetCC {
                    condition,
                    operand: AsmRegister::Si,
                },
                "{}",
                op
            );
            assert_eq!(
                code[cmp + 2],
                AsmInstruction::MovZeroExtend {
                    src: reg(AsmRegister::Si),
                    dst: AsmRegister::Si,
                }
            );
        }
    }

    #[test]
    fn conditions_are_tested_on_a_copy() {
        let program =
            compile("void main() { int x = 1; if (x) { x = 2; } else { x = 3; } }").unwrap();
        let code = without_comments(&program);

        let test = position(
            &code,
            &AsmInstruction::Test {
                asm_type: AsmType::Quadword,
                src: reg(AsmRegister::Si),
                dst: reg(AsmRegister::Si),
            },
        );
        assert_eq!(code[test - 1], quad_move(AsmRegister::Di, AsmRegister::Si));
        assert!(matches!(
            &code[test + 1],
            AsmInstruction::JmpCC { condition: ConditionCode::E, target } if target.name == "if_else"
        ));

        let program = compile("void main() { int x = 1; if (x) { x = 2; } }").unwrap();
        let code = without_comments(&program);
        assert!(code.iter().any(|i| matches!(
            i,
            AsmInstruction::JmpCC { condition: ConditionCode::E, target } if target.name == "if_end"
        )));
    }

    #[test]
    fn while_exits_when_the_condition_is_zero() {
        let program = compile("void main() { int x = 3; while (x) { x = x - 1; } }").unwrap();
        let code = without_comments(&program);

        let head = code
            .iter()
            .position(|i| matches!(i, AsmInstruction::Label(label) if label.name == "while_head"))
            .unwrap();
        let test = position(
            &code,
            &AsmInstruction::Test {
                asm_type: AsmType::Quadword,
                src: reg(AsmRegister::Si),
                dst: reg(AsmRegister::Si),
            },
        );
        assert!(head < test);
        assert_eq!(code[test - 1], quad_move(AsmRegister::Di, AsmRegister::Si));
        let exit = match &code[test + 1] {
            AsmInstruction::JmpCC {
                condition: ConditionCode::E,
                target,
            } => target.clone(),
            other => panic!("expected a conditional exit, found {:?}", other),
        };
        assert_eq!(exit.name, "while_exit");
        assert!(code[test..].contains(&AsmInstruction::Label(exit)));
    }

    #[test]
    fn continue_runs_the_loop_epilogue_before_the_head() {
        let program = compile(
            "void main() { int x = 3; while (x) { x = x - 1; { continue; } } }",
        )
        .unwrap();
        let code = without_comments(&program);

        let jmp = code
            .iter()
            .position(|i| matches!(i, AsmInstruction::Jmp(label) if label.name == "while_continue"))
            .unwrap();
        assert_eq!(code[jmp - 1], AsmInstruction::Pop(AsmRegister::Bp));
        assert_eq!(code[jmp - 2], quad_move(AsmRegister::Bp, AsmRegister::Sp));
        assert_ne!(code[jmp - 3], AsmInstruction::Pop(AsmRegister::Bp));

        let start = code
            .iter()
            .position(|i| matches!(i, AsmInstruction::Label(label) if label.name == "while_continue"))
            .unwrap();
        assert!(jmp < start);
        assert_eq!(code[start + 1], quad_move(AsmRegister::Bp, AsmRegister::Sp));
        assert_eq!(code[start + 2], AsmInstruction::Pop(AsmRegister::Bp));
        assert!(matches!(
            &code[start + 3],
            AsmInstruction::Jmp(label) if label.name == "while_head"
        ));
    }

    #[test]
    fn divisor_in_rdx_is_read_from_the_stack() {
        let program = compile("void main() { int a = 100; int b = 7; int c = a / b; }").unwrap();
        let code = without_comments(&program);

        let idiv = position(
            &code,
            &AsmInstruction::Idiv {
                asm_type: AsmType::Quadword,
                operand: AsmOperand::Memory(AsmRegister::Sp, 0),
            },
        );
        assert_eq!(code[idiv - 1], AsmInstruction::Cqo);
        assert_eq!(code[idiv - 2], quad_move(AsmRegister::Si, AsmRegister::Ax));
        assert_eq!(code[idiv - 3], AsmInstruction::Push(AsmRegister::Dx));
        assert_eq!(code[idiv + 1], AsmInstruction::Pop(AsmRegister::Dx));
        assert_eq!(code[idiv + 2], quad_move(AsmRegister::Ax, AsmRegister::Si));
    }

    #[test]
    fn negation_and_not_work_on_a_copy() {
        let program = compile("void main() { int a = 3; int b = -a; int c = !a; }").unwrap();
        let code = without_comments(&program);

        let neg = position(
            &code,
            &AsmInstruction::Unary {
                asm_type: AsmType::Quadword,
                op: AsmUnaryOp::Neg,
                operand: reg(AsmRegister::Si),
            },
        );
        assert_eq!(code[neg - 1], quad_move(AsmRegister::Di, AsmRegister::Si));

        let not = position(
            &code,
            &AsmInstruction::Cmp {
                asm_type: AsmType::Quadword,
                src: AsmOperand::Imm(0),
                dst: reg(AsmRegister::Si),
            },
        );
        assert!(neg < not);
        assert_eq!(code[not - 1], quad_move(AsmRegister::Di, AsmRegister::Si));
        assert_eq!(
            code[not + 1],
            AsmInstruction::SetCC {
                condition: ConditionCode::E,
                operand: AsmRegister::Si,
            }
        );
        assert_eq!(
            code[not + 2],
            AsmInstruction::MovZeroExtend {
                src: reg(AsmRegister::Si),
                dst: AsmRegister::Si,
            }
        );
    }

    #[test]
    fn byte_literals_must_fit() {
        let err = compile("void main() { u8 a = 300; }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "t.mc:1:22: semantic error: integer literal 300 does not fit in u8"
        );
        assert!(compile("void main() { s8 a = 128; }").is_err());
        assert!(compile("void main() { u8 a = 255; s8 b = 127; int c = 300; }").is_ok());

        let program = compile("void main() { u8 a = 255; }").unwrap();
        assert!(program.instructions.contains(&AsmInstruction::Mov {
            asm_type: AsmType::Byte,
            src: AsmOperand::Imm(255),
            dst: reg(AsmRegister::Di),
        }));
    }

    #[test]
    fn six_parameters_leave_two_scratch_registers() {
        let err = compile(
            "void f(int a, int b, int c, int d, int e, int g) { int x = a + b; }",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "codegen error: no available register");

        assert!(compile("void f(int a, int b, int c, int d, int e, int g) { int x = a; }").is_ok());
    }
}
