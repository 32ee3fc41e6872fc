use crate::{codegen::regalloc::Location, lexer::lex::Span};
use std::fmt;

/// Stable index of a node inside an [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int,
    U8,
    S8,
}

impl Type {
    pub fn size(&self) -> i64 {
        match self {
            Type::Void => 0,
            Type::Int => 8,
            Type::U8 | Type::S8 => 1,
        }
    }

    pub fn is_byte(&self) -> bool {
        matches!(self, Type::U8 | Type::S8)
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Type::Int | Type::S8)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Void => "void",
            Type::Int => "int",
            Type::U8 => "u8",
            Type::S8 => "s8",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    pub stmts: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub _type: Type,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureDeclaration {
    pub name: String,
    pub return_type: Type,
    pub params: Vec<Parameter>,
    pub body: Option<NodeId>,
    pub is_extern: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureCall {
    pub name: String,
    pub args: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub name: String,
    pub _type: Type,
    pub init: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableAssignment {
    pub name: String,
    pub value: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    pub condition: NodeId,
    pub then_branch: NodeId,
    pub else_branch: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStatement {
    pub condition: NodeId,
    pub body: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStatement {
    pub expr: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryExpressionKind {
    Add,
    Sub,
    Mul,
    Div,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpression {
    pub kind: BinaryExpressionKind,
    pub lhs: NodeId,
    pub rhs: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryExpressionKind {
    Plus,
    Negate,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpression {
    pub kind: UnaryExpressionKind,
    pub expr: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(u64),
    /// Raw contents between the quotes; escapes are expanded at emission.
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableExpression {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Block(BlockStatement),
    ProcedureDeclaration(ProcedureDeclaration),
    ProcedureCall(ProcedureCall),
    VariableDeclaration(VariableDeclaration),
    VariableAssignment(VariableAssignment),
    If(IfStatement),
    While(WhileStatement),
    Continue,
    Break,
    Return(ReturnStatement),
    Binary(BinaryExpression),
    Unary(UnaryExpression),
    Literal(Literal),
    Variable(VariableExpression),
}

impl NodeKind {
    pub fn is_expression(&self) -> bool {
        matches!(
            self,
            NodeKind::Binary(_) | NodeKind::Unary(_) | NodeKind::Literal(_) | NodeKind::Variable(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Block(_) => "block",
            NodeKind::ProcedureDeclaration(_) => "procedure",
            NodeKind::ProcedureCall(_) => "call",
            NodeKind::VariableDeclaration(_) => "declaration",
            NodeKind::VariableAssignment(_) => "assignment",
            NodeKind::If(_) => "if",
            NodeKind::While(_) => "while",
            NodeKind::Continue => "continue",
            NodeKind::Break => "break",
            NodeKind::Return(_) => "return",
            NodeKind::Binary(_) => "binary",
            NodeKind::Unary(_) => "unary",
            NodeKind::Literal(_) => "literal",
            NodeKind::Variable(_) => "variable",
        }
    }

    /// Direct children in source order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Block(block) => block.stmts.clone(),
            NodeKind::ProcedureDeclaration(decl) => decl.body.into_iter().collect(),
            NodeKind::ProcedureCall(call) => call.args.clone(),
            NodeKind::VariableDeclaration(decl) => decl.init.into_iter().collect(),
            NodeKind::VariableAssignment(assign) => vec![assign.value],
            NodeKind::If(stmt) => {
                let mut children = vec![stmt.condition, stmt.then_branch];
                children.extend(stmt.else_branch);
                children
            }
            NodeKind::While(stmt) => vec![stmt.condition, stmt.body],
            NodeKind::Return(stmt) => stmt.expr.into_iter().collect(),
            NodeKind::Binary(expr) => vec![expr.lhs, expr.rhs],
            NodeKind::Unary(expr) => vec![expr.expr],
            NodeKind::Continue | NodeKind::Break | NodeKind::Literal(_) | NodeKind::Variable(_) => {
                vec![]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub parent: Option<NodeId>,
    /// Filled in by the generator for expression nodes.
    pub location: Option<Location>,
    /// Filled in by the generator for expression nodes.
    pub data_type: Option<Type>,
}

/// Arena holding every node of one program. Nodes refer to each other by
/// [`NodeId`]; parent links are plain indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ast {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Ast {
    pub fn new() -> Ast {
        Ast::default()
    }

    /// Add a node and adopt its children.
    pub fn push(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len());
        for child in kind.children() {
            self.nodes[child.0].parent = Some(id);
        }
        self.nodes.push(Node {
            kind,
            span,
            parent: None,
            location: None,
            data_type: None,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn span(&self, id: NodeId) -> &Span {
        &self.nodes[id.0].span
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// S-expression rendering of the subtree at `id`, used by `--parse`.
    pub fn render(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.render_into(id, 0, &mut out);
        out
    }

    fn render_into(&self, id: NodeId, indent: usize, out: &mut String) {
        let pad = "  ".repeat(indent);
        match self.kind(id) {
            NodeKind::Block(block) => {
                out.push_str(&format!("{}{{\n", pad));
                for stmt in &block.stmts {
                    self.render_into(*stmt, indent + 1, out);
                }
                out.push_str(&format!("{}}}\n", pad));
            }
            NodeKind::ProcedureDeclaration(decl) => {
                let params = decl
                    .params
                    .iter()
                    .map(|p| format!("{} {}", p._type, p.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                let prefix = if decl.is_extern { "extern " } else { "" };
                out.push_str(&format!(
                    "{}{}{} {}({})\n",
                    pad, prefix, decl.return_type, decl.name, params
                ));
                if let Some(body) = decl.body {
                    self.render_into(body, indent, out);
                }
            }
            NodeKind::ProcedureCall(call) => {
                let args = call
                    .args
                    .iter()
                    .map(|arg| self.expression(*arg))
                    .collect::<Vec<_>>()
                    .join(" ");
                out.push_str(&format!("{}(call {} {})\n", pad, call.name, args));
            }
            NodeKind::VariableDeclaration(decl) => match decl.init {
                Some(init) => out.push_str(&format!(
                    "{}(let {} {} {})\n",
                    pad,
                    decl._type,
                    decl.name,
                    self.expression(init)
                )),
                None => out.push_str(&format!("{}(let {} {})\n", pad, decl._type, decl.name)),
            },
            NodeKind::VariableAssignment(assign) => out.push_str(&format!(
                "{}(set {} {})\n",
                pad,
                assign.name,
                self.expression(assign.value)
            )),
            NodeKind::If(stmt) => {
                out.push_str(&format!("{}(if {}\n", pad, self.expression(stmt.condition)));
                self.render_into(stmt.then_branch, indent + 1, out);
                if let Some(else_branch) = stmt.else_branch {
                    out.push_str(&format!("{}else\n", pad));
                    self.render_into(else_branch, indent + 1, out);
                }
                out.push_str(&format!("{})\n", pad));
            }
            NodeKind::While(stmt) => {
                out.push_str(&format!("{}(while {}\n", pad, self.expression(stmt.condition)));
                self.render_into(stmt.body, indent + 1, out);
                out.push_str(&format!("{})\n", pad));
            }
            NodeKind::Continue => out.push_str(&format!("{}(continue)\n", pad)),
            NodeKind::Break => out.push_str(&format!("{}(break)\n", pad)),
            NodeKind::Return(stmt) => match stmt.expr {
                Some(expr) => out.push_str(&format!("{}(return {})\n", pad, self.expression(expr))),
                None => out.push_str(&format!("{}(return)\n", pad)),
            },
            NodeKind::Binary(_) | NodeKind::Unary(_) | NodeKind::Literal(_) | NodeKind::Variable(_) => {
                out.push_str(&format!("{}{}\n", pad, self.expression(id)))
            }
        }
    }

    /// Single-line S-expression of an expression subtree.
    pub fn expression(&self, id: NodeId) -> String {
        match self.kind(id) {
            NodeKind::Binary(expr) => {
                let op = match expr.kind {
                    BinaryExpressionKind::Add => "+",
                    BinaryExpressionKind::Sub => "-",
                    BinaryExpressionKind::Mul => "*",
                    BinaryExpressionKind::Div => "/",
                    BinaryExpressionKind::Equal => "==",
                    BinaryExpressionKind::NotEqual => "!=",
                    BinaryExpressionKind::Less => "<",
                    BinaryExpressionKind::LessEqual => "<=",
                    BinaryExpressionKind::Greater => ">",
                    BinaryExpressionKind::GreaterEqual => ">=",
                    BinaryExpressionKind::And => "&&",
                    BinaryExpressionKind::Or => "||",
                };
                format!(
                    "({} {} {})",
                    op,
                    self.expression(expr.lhs),
                    self.expression(expr.rhs)
                )
            }
            NodeKind::Unary(expr) => {
                let op = match expr.kind {
                    UnaryExpressionKind::Plus => "+",
                    UnaryExpressionKind::Negate => "-",
                    UnaryExpressionKind::Not => "!",
                };
                format!("({} {})", op, self.expression(expr.expr))
            }
            NodeKind::Literal(Literal::Integer(n)) => n.to_string(),
            NodeKind::Literal(Literal::String(s)) => format!("\"{}\"", s),
            NodeKind::Variable(var) => var.name.clone(),
            other => format!("<{}>", other.name()),
        }
    }
}
