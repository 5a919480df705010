use crate::span::Span;
use std::fmt;

/// A name as written in the source, with where it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Ident {
            name: name.into(),
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Decimal digits exactly as written.
    Number(String),
    /// Raw text between the quotes, escapes not yet decoded.
    Str(String),
    True,
    False,
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Literal {
        value: Literal,
        span: Span,
    },
    Variable(Ident),
    Assign {
        target: Ident,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        /// Position of the closing parenthesis.
        span: Span,
    },
    Grouping(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Print(Expr),
    Var {
        name: Ident,
        initializer: Option<Expr>,
    },
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Return {
        keyword: Span,
        value: Option<Expr>,
    },
    Block(Vec<Stmt>),
    Function(FunctionDecl),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        }
    }
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(digits) => f.write_str(digits),
            Literal::Str(text) => write!(f, "\"{text}\""),
            Literal::True => f.write_str("true"),
            Literal::False => f.write_str("false"),
            Literal::Null => f.write_str("null"),
        }
    }
}

/// Fully parenthesised prefix form, e.g. `(+ 1 (* 2 3))`.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Binary {
                op, left, right, ..
            } => write!(f, "({} {} {})", op.symbol(), left, right),
            Expr::Unary { op, operand, .. } => write!(f, "({} {})", op.symbol(), operand),
            Expr::Literal { value, .. } => write!(f, "{value}"),
            Expr::Variable(ident) => f.write_str(&ident.name),
            Expr::Assign { target, value } => write!(f, "(= {} {})", target.name, value),
            Expr::Call { callee, args, .. } => {
                write!(f, "(call {callee}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                f.write_str(")")
            }
            Expr::Grouping(inner) => write!(f, "(group {inner})"),
        }
    }
}
