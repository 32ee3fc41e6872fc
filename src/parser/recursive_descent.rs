use crate::{
    error::{CompileError, CompileResult},
    lexer::lex::{Span, Token, TokenKind, TokenValue},
    observe::{Event, Mode, Observer, State},
    parser::ast::{
        Ast, BinaryExpression, BinaryExpressionKind, BlockStatement, IfStatement, Literal, NodeId,
        NodeKind, Parameter, ProcedureCall, ProcedureDeclaration, ReturnStatement, Type,
        UnaryExpression, UnaryExpressionKind, VariableAssignment, VariableDeclaration,
        VariableExpression, WhileStatement,
    },
};
use std::collections::HashSet;

/// Names visible in one lexical block. Used for diagnostics only.
#[derive(Debug, Default)]
struct Scope {
    variables: HashSet<String>,
    procedures: HashSet<String>,
}

pub struct Parser<'o> {
    tokens: Vec<Token>,
    pos: usize,
    ast: Ast,
    scopes: Vec<Scope>,
    loop_depth: usize,
    observer: Option<&'o mut dyn Observer>,
}

impl<'o> Parser<'o> {
    pub fn new(mut tokens: Vec<Token>) -> Parser<'o> {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let span = tokens
                .last()
                .map(|t| t.span.clone())
                .unwrap_or_else(|| Span::new("<input>", 1, 1));
            tokens.push(Token {
                kind: TokenKind::Eof,
                span,
                value: TokenValue::None,
            });
        }

        Parser {
            tokens,
            pos: 0,
            ast: Ast::new(),
            scopes: vec![],
            loop_depth: 0,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: &'o mut dyn Observer) -> Parser<'o> {
        self.observer = Some(observer);
        self
    }

    pub fn parse(mut self) -> CompileResult<Ast> {
        let span = self.current().span.clone();
        self.begin(&span)?;

        self.scopes.push(Scope::default());
        let mut stmts = vec![];
        while !self.check(TokenKind::Eof) {
            if !self.check(TokenKind::Extern) && !self.current().kind.is_type() {
                return Err(self.unexpected("procedure declaration"));
            }
            stmts.push(self.parse_procedure_declaration()?);
        }
        self.scopes.pop();

        let root = self.finish(NodeKind::Block(BlockStatement { stmts }), span)?;
        self.ast.set_root(root);
        Ok(self.ast)
    }

    fn current(&self) -> &Token {
        self.peek(0)
    }

    /// Token `n` positions ahead; the trailing `Eof` repeats forever.
    fn peek(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn check_many(&self, kinds: &[TokenKind]) -> bool {
        kinds.iter().any(|kind| self.check(*kind))
    }

    /// Consume the current token if it is one of `kinds`.
    fn accept(&mut self, kinds: &[TokenKind]) -> Option<Token> {
        if self.check_many(kinds) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind) -> CompileResult<Token> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        Err(self.unexpected(&kind.to_string()))
    }

    fn unexpected(&self, wanted: &str) -> CompileError {
        let token = self.current();
        CompileError::syntax(
            &token.span,
            format!("expected {}, found {}", wanted, token.kind),
        )
    }

    fn expect_identifier(&mut self) -> CompileResult<(String, Span)> {
        let token = self.expect(TokenKind::Identifier)?;
        let name = token.as_string().unwrap_or_default().to_string();
        Ok((name, token.span))
    }

    fn notify(&mut self, event: Event) -> CompileResult<()> {
        match self.observer.as_deref_mut() {
            Some(observer) => observer.notify(&event),
            None => Ok(()),
        }
    }

    fn begin(&mut self, span: &Span) -> CompileResult<()> {
        self.notify(Event::new(Mode::Parser, State::NodeStart).at(span))
    }

    fn finish(&mut self, kind: NodeKind, span: Span) -> CompileResult<NodeId> {
        let name = kind.name();
        let id = self.ast.push(kind, span.clone());
        self.notify(
            Event::new(Mode::Parser, State::NodeEnd)
                .at(&span)
                .with_node(id)
                .with_text(name),
        )?;
        Ok(id)
    }

    fn scope(&mut self) -> &mut Scope {
        if self.scopes.is_empty() {
            self.scopes.push(Scope::default());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn variable_in_scope(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|s| s.variables.contains(name))
    }

    fn procedure_in_scope(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|s| s.procedures.contains(name))
    }

    fn declare_variable(&mut self, name: &str, span: &Span) -> CompileResult<()> {
        if !self.scope().variables.insert(name.to_string()) {
            return Err(CompileError::semantic(
                Some(span),
                format!("redeclaration of '{}'", name),
            ));
        }
        Ok(())
    }

    fn parse_type(&mut self) -> CompileResult<Type> {
        let token = self.advance();
        match token.kind {
            TokenKind::Void => Ok(Type::Void),
            TokenKind::Int => Ok(Type::Int),
            TokenKind::U8 => Ok(Type::U8),
            TokenKind::S8 => Ok(Type::S8),
            other => Err(CompileError::syntax(
                &token.span,
                format!("expected type, found {}", other),
            )),
        }
    }

    fn parse_procedure_declaration(&mut self) -> CompileResult<NodeId> {
        let span = self.current().span.clone();
        self.begin(&span)?;

        let is_extern = self.accept(&[TokenKind::Extern]).is_some();
        let return_type = self.parse_type()?;
        let (name, name_span) = self.expect_identifier()?;

        self.expect(TokenKind::LParen)?;
        let mut params: Vec<Parameter> = vec![];
        if !self.check(TokenKind::RParen) {
            loop {
                let _type = self.parse_type()?;
                let (param, param_span) = self.expect_identifier()?;
                if _type == Type::Void {
                    return Err(CompileError::semantic(
                        Some(&param_span),
                        format!("parameter '{}' declared void", param),
                    ));
                }
                if params.iter().any(|p| p.name == param) {
                    return Err(CompileError::semantic(
                        Some(&param_span),
                        format!("duplicate parameter '{}'", param),
                    ));
                }
                params.push(Parameter {
                    name: param,
                    _type,
                    span: param_span,
                });
                if self.accept(&[TokenKind::Comma]).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        if !self.scope().procedures.insert(name.clone()) {
            return Err(CompileError::semantic(
                Some(&name_span),
                format!("redeclaration of procedure '{}'", name),
            ));
        }

        let body = if is_extern {
            self.expect(TokenKind::Semicolon)?;
            None
        } else {
            let names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
            Some(self.parse_block(&names)?)
        };

        self.finish(
            NodeKind::ProcedureDeclaration(ProcedureDeclaration {
                name,
                return_type,
                params,
                body,
                is_extern,
            }),
            span,
        )
    }

    fn parse_block(&mut self, preset: &[String]) -> CompileResult<NodeId> {
        let span = self.current().span.clone();
        self.begin(&span)?;
        self.expect(TokenKind::LBrace)?;

        self.scopes.push(Scope {
            variables: preset.iter().cloned().collect(),
            procedures: HashSet::new(),
        });

        let mut stmts = vec![];
        while !self.check_many(&[TokenKind::RBrace, TokenKind::Eof]) {
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        self.scopes.pop();

        self.finish(NodeKind::Block(BlockStatement { stmts }), span)
    }

    fn parse_statement(&mut self) -> CompileResult<NodeId> {
        match self.current().kind {
            TokenKind::LBrace => self.parse_block(&[]),
            TokenKind::While => self.parse_while_statement(),
            TokenKind::If => self.parse_if_statement(),
            TokenKind::Continue | TokenKind::Break => self.parse_jump_statement(),
            TokenKind::Return => self.parse_return_statement(),
            TokenKind::Extern => self.parse_procedure_declaration(),
            kind if kind.is_type() => self.parse_variable_declaration(),
            TokenKind::Identifier if self.peek(1).kind == TokenKind::LParen => {
                self.parse_procedure_call()
            }
            TokenKind::Identifier => self.parse_assignment(),
            _ => Err(self.unexpected("statement")),
        }
    }

    fn parse_variable_declaration(&mut self) -> CompileResult<NodeId> {
        let span = self.current().span.clone();
        self.begin(&span)?;

        let _type = self.parse_type()?;
        let (name, name_span) = self.expect_identifier()?;
        if _type == Type::Void {
            return Err(CompileError::semantic(
                Some(&name_span),
                format!("variable '{}' declared void", name),
            ));
        }

        let init = match self.accept(&[TokenKind::Equal]) {
            Some(_) => Some(self.parse_expression()?),
            None => None,
        };
        self.expect(TokenKind::Semicolon)?;
        self.declare_variable(&name, &name_span)?;

        self.finish(
            NodeKind::VariableDeclaration(VariableDeclaration { name, _type, init }),
            span,
        )
    }

    fn parse_assignment(&mut self) -> CompileResult<NodeId> {
        let span = self.current().span.clone();
        self.begin(&span)?;

        let (name, name_span) = self.expect_identifier()?;
        if !self.variable_in_scope(&name) {
            return Err(CompileError::semantic(
                Some(&name_span),
                format!("undeclared identifier '{}'", name),
            ));
        }
        self.expect(TokenKind::Equal)?;
        let value = self.parse_expression()?;
        self.expect(TokenKind::Semicolon)?;

        self.finish(
            NodeKind::VariableAssignment(VariableAssignment { name, value }),
            span,
        )
    }

    fn parse_procedure_call(&mut self) -> CompileResult<NodeId> {
        let span = self.current().span.clone();
        self.begin(&span)?;

        let (name, name_span) = self.expect_identifier()?;
        if !self.procedure_in_scope(&name) {
            return Err(CompileError::semantic(
                Some(&name_span),
                format!("undeclared procedure '{}'", name),
            ));
        }

        self.expect(TokenKind::LParen)?;
        let mut args = vec![];
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if self.accept(&[TokenKind::Comma]).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;

        self.finish(NodeKind::ProcedureCall(ProcedureCall { name, args }), span)
    }

    fn parse_if_statement(&mut self) -> CompileResult<NodeId> {
        let span = self.current().span.clone();
        self.begin(&span)?;

        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = self.parse_block(&[])?;

        let else_branch = if self.accept(&[TokenKind::Else]).is_some() {
            match self.current().kind {
                TokenKind::If => Some(self.parse_if_statement()?),
                TokenKind::LBrace => Some(self.parse_block(&[])?),
                _ => return Err(self.unexpected("'{' or 'if' after 'else'")),
            }
        } else {
            None
        };

        self.finish(
            NodeKind::If(IfStatement {
                condition,
                then_branch,
                else_branch,
            }),
            span,
        )
    }

    fn parse_while_statement(&mut self) -> CompileResult<NodeId> {
        let span = self.current().span.clone();
        self.begin(&span)?;

        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;

        self.loop_depth += 1;
        let body = self.parse_block(&[]);
        self.loop_depth -= 1;
        let body = body?;

        self.finish(NodeKind::While(WhileStatement { condition, body }), span)
    }

    fn parse_jump_statement(&mut self) -> CompileResult<NodeId> {
        let span = self.current().span.clone();
        self.begin(&span)?;

        let token = self.advance();
        if self.loop_depth == 0 {
            return Err(CompileError::semantic(
                Some(&token.span),
                format!("{} outside of a loop", token.kind),
            ));
        }
        self.expect(TokenKind::Semicolon)?;

        let kind = match token.kind {
            TokenKind::Continue => NodeKind::Continue,
            _ => NodeKind::Break,
        };
        self.finish(kind, span)
    }

    fn parse_return_statement(&mut self) -> CompileResult<NodeId> {
        let span = self.current().span.clone();
        self.begin(&span)?;

        self.expect(TokenKind::Return)?;
        let expr = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon)?;

        self.finish(NodeKind::Return(ReturnStatement { expr }), span)
    }

    pub fn parse_expression(&mut self) -> CompileResult<NodeId> {
        self.or()
    }

    fn binary(
        &mut self,
        kind: BinaryExpressionKind,
        lhs: NodeId,
        rhs: NodeId,
        span: Span,
    ) -> CompileResult<NodeId> {
        self.finish(NodeKind::Binary(BinaryExpression { kind, lhs, rhs }), span)
    }

    fn or(&mut self) -> CompileResult<NodeId> {
        let mut result = self.and()?;
        while let Some(op) = self.accept(&[TokenKind::DoublePipe]) {
            self.begin(&op.span)?;
            let rhs = self.and()?;
            result = self.binary(BinaryExpressionKind::Or, result, rhs, op.span)?;
        }
        Ok(result)
    }

    fn and(&mut self) -> CompileResult<NodeId> {
        let mut result = self.equality()?;
        while let Some(op) = self.accept(&[TokenKind::DoubleAmpersand]) {
            self.begin(&op.span)?;
            let rhs = self.equality()?;
            result = self.binary(BinaryExpressionKind::And, result, rhs, op.span)?;
        }
        Ok(result)
    }

    fn equality(&mut self) -> CompileResult<NodeId> {
        let mut result = self.relational()?;
        while let Some(op) = self.accept(&[TokenKind::DoubleEqual, TokenKind::BangEqual]) {
            self.begin(&op.span)?;
            let kind = match op.kind {
                TokenKind::DoubleEqual => BinaryExpressionKind::Equal,
                _ => BinaryExpressionKind::NotEqual,
            };
            let rhs = self.relational()?;
            result = self.binary(kind, result, rhs, op.span)?;
        }
        Ok(result)
    }

    fn relational(&mut self) -> CompileResult<NodeId> {
        let mut result = self.term()?;
        while let Some(op) = self.accept(&[
            TokenKind::Less,
            TokenKind::LessEqual,
            TokenKind::Greater,
            TokenKind::GreaterEqual,
        ]) {
            self.begin(&op.span)?;
            let kind = match op.kind {
                TokenKind::Less => BinaryExpressionKind::Less,
                TokenKind::LessEqual => BinaryExpressionKind::LessEqual,
                TokenKind::Greater => BinaryExpressionKind::Greater,
                _ => BinaryExpressionKind::GreaterEqual,
            };
            let rhs = self.term()?;
            result = self.binary(kind, result, rhs, op.span)?;
        }
        Ok(result)
    }

    fn term(&mut self) -> CompileResult<NodeId> {
        let mut result = self.factor()?;
        while let Some(op) = self.accept(&[TokenKind::Plus, TokenKind::Hyphen]) {
            self.begin(&op.span)?;
            let kind = match op.kind {
                TokenKind::Plus => BinaryExpressionKind::Add,
                _ => BinaryExpressionKind::Sub,
            };
            let rhs = self.factor()?;
            result = self.binary(kind, result, rhs, op.span)?;
        }
        Ok(result)
    }

    fn factor(&mut self) -> CompileResult<NodeId> {
        let mut result = self.unary()?;
        while let Some(op) = self.accept(&[TokenKind::Star, TokenKind::Slash]) {
            self.begin(&op.span)?;
            let kind = match op.kind {
                TokenKind::Star => BinaryExpressionKind::Mul,
                _ => BinaryExpressionKind::Div,
            };
            let rhs = self.unary()?;
            result = self.binary(kind, result, rhs, op.span)?;
        }
        Ok(result)
    }

    fn unary(&mut self) -> CompileResult<NodeId> {
        match self.accept(&[TokenKind::Plus, TokenKind::Hyphen, TokenKind::Bang]) {
            Some(op) => {
                self.begin(&op.span)?;
                let kind = match op.kind {
                    TokenKind::Plus => UnaryExpressionKind::Plus,
                    TokenKind::Hyphen => UnaryExpressionKind::Negate,
                    _ => UnaryExpressionKind::Not,
                };
                let expr = self.unary()?;
                self.finish(NodeKind::Unary(UnaryExpression { kind, expr }), op.span)
            }
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> CompileResult<NodeId> {
        let span = self.current().span.clone();

        match self.current().kind {
            TokenKind::Number => {
                self.begin(&span)?;
                let token = self.advance();
                let value = token.as_int().unwrap_or_default();
                self.finish(NodeKind::Literal(Literal::Integer(value)), span)
            }
            TokenKind::StringLiteral => {
                self.begin(&span)?;
                let token = self.advance();
                let value = token.as_string().unwrap_or_default().to_string();
                self.finish(NodeKind::Literal(Literal::String(value)), span)
            }
            TokenKind::Identifier => {
                self.begin(&span)?;
                let (name, name_span) = self.expect_identifier()?;
                if !self.variable_in_scope(&name) {
                    return Err(CompileError::semantic(
                        Some(&name_span),
                        format!("undeclared identifier '{}'", name),
                    ));
                }
                self.finish(NodeKind::Variable(VariableExpression { name }), span)
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

pub fn parse(tokens: Vec<Token>) -> CompileResult<Ast> {
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer::lex::tokenize, observe::Recorder};

    fn parse_src(src: &str) -> CompileResult<Ast> {
        parse(tokenize(src, "t.mc")?)
    }

    fn body_of_main(ast: &Ast) -> Vec<NodeId> {
        let root = ast.root().unwrap();
        let NodeKind::Block(program) = ast.kind(root) else {
            panic!("root is not a block")
        };
        let main = *program.stmts.last().unwrap();
        let NodeKind::ProcedureDeclaration(decl) = ast.kind(main) else {
            panic!("not a procedure")
        };
        let NodeKind::Block(body) = ast.kind(decl.body.unwrap()) else {
            panic!("body is not a block")
        };
        body.stmts.clone()
    }

    fn init_of(src: &str) -> String {
        let ast = parse_src(&format!(
            "void main() {{ int a = 1; int b = 2; int c = 3; int x = {}; }}",
            src
        ))
        .unwrap();
        let stmts = body_of_main(&ast);
        match ast.kind(*stmts.last().unwrap()) {
            NodeKind::VariableDeclaration(decl) => ast.expression(decl.init.unwrap()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn additive_is_left_associative() {
        assert_eq!(init_of("1 - 2 - 3"), "(- (- 1 2) 3)");
    }

    #[test]
    fn multiplication_binds_tighter() {
        assert_eq!(init_of("1 + 2 * 3"), "(+ 1 (* 2 3))");
        assert_eq!(init_of("(1 + 2) * 3"), "(* (+ 1 2) 3)");
    }

    #[test]
    fn precedence_ladder() {
        assert_eq!(init_of("a || b && c"), "(|| a (&& b c))");
        assert_eq!(init_of("a == b < c"), "(== a (< b c))");
        assert_eq!(init_of("!a == -b"), "(== (! a) (- b))");
        assert_eq!(init_of("- - 1"), "(- (- 1))");
        assert_eq!(init_of("a / b / c"), "(/ (/ a b) c)");
    }

    #[test]
    fn statements() {
        let ast = parse_src(
            "extern void printf(u8 x);
             void main() {
                 u8 a = 5;
                 while (a) { a = a - 1; if (a == 2) { break; } else if (a) { continue; } else { } }
                 printf(a);
                 return;
             }",
        )
        .unwrap();
        let kinds: Vec<_> = body_of_main(&ast)
            .into_iter()
            .map(|id| ast.kind(id).name())
            .collect();
        assert_eq!(kinds, vec!["declaration", "while", "call", "return"]);
    }

    #[test]
    fn children_point_back_to_parents() {
        let ast = parse_src("void main() { int x = 1 + 2; }").unwrap();
        let root = ast.root().unwrap();
        for id in (0..ast.len()).map(NodeId) {
            for child in ast.kind(id).children() {
                assert_eq!(ast.parent(child), Some(id));
            }
        }
        assert_eq!(ast.parent(root), None);
    }

    #[test]
    fn missing_semicolon() {
        let err = parse_src("void main() { int x = 1 }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "t.mc:1:25: syntax error: expected ';', found '}'"
        );
    }

    #[test]
    fn else_requires_block_or_if() {
        let err = parse_src("void main() { int x = 1; if (x) { } else x = 2; }").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn top_level_accepts_only_procedures() {
        let err = parse_src("int x = 1;").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn invalid_expression_start() {
        let err = parse_src("void main() { int x = *; }").unwrap_err();
        assert!(err.to_string().contains("expected expression, found '*'"));
    }

    #[test]
    fn undeclared_identifier() {
        let err = parse_src("void main() { x = 1; }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "t.mc:1:15: semantic error: undeclared identifier 'x'"
        );
    }

    #[test]
    fn undeclared_procedure() {
        let err = parse_src("void main() { foo(); }").unwrap_err();
        assert!(err.to_string().contains("undeclared procedure 'foo'"));
    }

    #[test]
    fn scopes_allow_shadowing_but_not_redeclaration() {
        assert!(parse_src("void main() { int x = 1; { int x = 2; } }").is_ok());
        let err = parse_src("void main() { int x = 1; int x = 2; }").unwrap_err();
        assert!(err.to_string().contains("redeclaration of 'x'"));
        assert!(parse_src("void main() { { int x = 1; } x = 2; }").is_err());
    }

    #[test]
    fn parameters_and_recursion_are_in_scope() {
        assert!(parse_src("int f(int n) { if (n) { f(n - 1); } return n; }").is_ok());
    }

    #[test]
    fn break_outside_loop() {
        let err = parse_src("void main() { break; }").unwrap_err();
        assert!(matches!(err, CompileError::Semantic { .. }));
    }

    #[test]
    fn void_variables_are_rejected() {
        let err = parse_src("void main() { void x; }").unwrap_err();
        assert!(err.to_string().contains("variable 'x' declared void"));
    }

    #[test]
    fn void_parameters_are_rejected() {
        let err = parse_src("void f(void x) { }").unwrap_err();
        assert_eq!(
            err.to_string(),
            "t.mc:1:13: semantic error: parameter 'x' declared void"
        );
        assert!(parse_src("extern void g(int a, void b);").is_err());
    }

    #[test]
    fn events_bracket_nodes() {
        let tokens = tokenize("void main() { }", "t.mc").unwrap();
        let mut recorder = Recorder::default();
        Parser::new(tokens).with_observer(&mut recorder).parse().unwrap();
        let states = recorder.states(Mode::Parser);
        let starts = states.iter().filter(|s| **s == State::NodeStart).count();
        let ends = states.iter().filter(|s| **s == State::NodeEnd).count();
        assert_eq!(starts, ends);
        assert_eq!(ends, 3);
    }
}
