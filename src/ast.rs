//! This module defines the tree the front end hands to the core, together with the native
//! [`Value`]s and static [`Type`]s that flow through the checker, compiler and VM.
//!
//! A program is always a [`NodeKind::Blk`] whose body is a [`NodeKind::Seq`]. The checker
//! fills in [`Node::ty`] on every node it visits; the compiler relies on those annotations
//! to decide which bindings own heap strings.
//!
//! Constructor functions such as [`lit`], [`nam`], [`binop`] and [`let_decl`] keep tree
//! construction short in the parser and in tests.

use std::fmt;

/// Type alias for number values in the interpreter. The surface language only has `i32`,
/// but the VM keeps numbers as doubles and truncates on division.
pub(crate) type NumberType = f64;

/// A native value: a literal in the tree, or the result handed back from the VM.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(NumberType),
    Bool(bool),
    String(String),
    Undefined,
    Null,
    /// The content of a slot whose `let` has not executed yet
    Unassigned,
    /// Opaque results; only their display form is observable
    Closure,
    Builtin,
    Blockframe,
    Callframe,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Unassigned => write!(f, "<unassigned>"),
            Value::Closure => write!(f, "<closure>"),
            Value::Builtin => write!(f, "<builtin>"),
            Value::Blockframe => write!(f, "<blockframe>"),
            Value::Callframe => write!(f, "<callframe>"),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(NumberType::from(n))
    }
}

impl From<NumberType> for Value {
    fn from(n: NumberType) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Helper function for creating Values from Rust literals
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Static types of the surface language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    I32,
    Bool,
    String,
    Void,
    Ref { mutable: bool, inner: Box<Type> },
    Function { params: Vec<Type>, ret: Box<Type> },
    /// Builtins accept any arguments and return the type of their first one
    Builtin { arity: usize },
}

impl Type {
    pub fn reference(mutable: bool, inner: Type) -> Type {
        Type::Ref {
            mutable,
            inner: Box::new(inner),
        }
    }

    /// Resolve a type name written in a source annotation
    pub fn from_name(name: &str) -> Option<Type> {
        match name {
            "i32" => Some(Type::I32),
            "bool" => Some(Type::Bool),
            "String" => Some(Type::String),
            "void" => Some(Type::Void),
            _ => None,
        }
    }

    /// Values of droppable types live on the heap with a single owner.
    pub fn is_droppable(&self) -> bool {
        matches!(self, Type::String)
    }

    /// Whether a value of type `actual` may be stored where `self` is expected.
    /// `&mut T` coerces to `& T`.
    pub fn accepts(&self, actual: &Type) -> bool {
        match (self, actual) {
            (
                Type::Ref {
                    mutable: false,
                    inner: expected,
                },
                Type::Ref { inner: found, .. },
            ) => expected == found,
            _ => self == actual,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::I32 => write!(f, "i32"),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "String"),
            Type::Void => write!(f, "void"),
            Type::Ref {
                mutable: true,
                inner,
            } => write!(f, "& mut {inner}"),
            Type::Ref {
                mutable: false,
                inner,
            } => write!(f, "& {inner}"),
            Type::Function { params, ret } => {
                write!(f, "(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") -> {ret}")
            }
            Type::Builtin { arity } => write!(f, "<builtin/{arity}>"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Deref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::Deref => "*",
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
        })
    }
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
        })
    }
}

/// A function parameter: `mut? name: type`
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub sym: String,
    pub mutable: bool,
    pub ty: Type,
}

/// A tree node. `ty` is empty until the checker has visited the node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Lit(Value),
    Nam(String),
    Unop {
        op: UnaryOp,
        frst: Box<Node>,
    },
    Binop {
        op: BinaryOp,
        frst: Box<Node>,
        scnd: Box<Node>,
    },
    Log {
        op: LogicalOp,
        frst: Box<Node>,
        scnd: Box<Node>,
    },
    Cond {
        pred: Box<Node>,
        cons: Box<Node>,
        alt: Box<Node>,
    },
    While {
        pred: Box<Node>,
        body: Box<Node>,
    },
    App {
        fun: Box<Node>,
        args: Vec<Node>,
    },
    Assmt {
        sym: String,
        expr: Box<Node>,
    },
    /// `*sym = expr`
    DerefAssmt {
        sym: String,
        expr: Box<Node>,
    },
    Blk {
        body: Box<Node>,
    },
    Seq {
        stmts: Vec<Node>,
    },
    Let {
        sym: String,
        mutable: bool,
        annotation: Option<Type>,
        expr: Box<Node>,
    },
    Const {
        sym: String,
        annotation: Option<Type>,
        expr: Box<Node>,
    },
    Ret {
        expr: Box<Node>,
    },
    Fun {
        sym: String,
        prms: Vec<Param>,
        ret: Type,
        body: Box<Node>,
    },
    /// `&sym` or `&mut sym`
    Ref {
        sym: String,
        mutable: bool,
    },
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Node { kind, ty: None }
    }

    /// The type the checker assigned to this node
    pub(crate) fn checked_type(&self) -> Result<&Type, crate::Error> {
        self.ty
            .as_ref()
            .ok_or_else(|| crate::Error::Internal(format!("node was not type checked: {self:?}")))
    }

    /// The statements of a block body: the items of a `seq`, or the node itself
    pub(crate) fn statements(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Seq { stmts } => stmts,
            _ => std::slice::from_ref(self),
        }
    }

    /// Whether evaluating this node always ends in a `return`
    pub(crate) fn diverges(&self) -> bool {
        match &self.kind {
            NodeKind::Ret { .. } => true,
            NodeKind::Blk { body } => body.diverges(),
            NodeKind::Seq { stmts } => stmts.iter().any(Node::diverges),
            NodeKind::Cond { cons, alt, .. } => cons.diverges() && alt.diverges(),
            _ => false,
        }
    }
}

pub fn lit<T: Into<Value>>(value: T) -> Node {
    Node::new(NodeKind::Lit(value.into()))
}

pub fn undefined() -> Node {
    Node::new(NodeKind::Lit(Value::Undefined))
}

pub fn nam<S: AsRef<str>>(sym: S) -> Node {
    Node::new(NodeKind::Nam(sym.as_ref().to_owned()))
}

pub fn unop(op: UnaryOp, frst: Node) -> Node {
    Node::new(NodeKind::Unop {
        op,
        frst: Box::new(frst),
    })
}

pub fn binop(op: BinaryOp, frst: Node, scnd: Node) -> Node {
    Node::new(NodeKind::Binop {
        op,
        frst: Box::new(frst),
        scnd: Box::new(scnd),
    })
}

pub fn log(op: LogicalOp, frst: Node, scnd: Node) -> Node {
    Node::new(NodeKind::Log {
        op,
        frst: Box::new(frst),
        scnd: Box::new(scnd),
    })
}

pub fn cond(pred: Node, cons: Node, alt: Node) -> Node {
    Node::new(NodeKind::Cond {
        pred: Box::new(pred),
        cons: Box::new(cons),
        alt: Box::new(alt),
    })
}

pub fn while_loop(pred: Node, body: Node) -> Node {
    Node::new(NodeKind::While {
        pred: Box::new(pred),
        body: Box::new(body),
    })
}

pub fn app(fun: Node, args: Vec<Node>) -> Node {
    Node::new(NodeKind::App {
        fun: Box::new(fun),
        args,
    })
}

pub fn assign<S: AsRef<str>>(sym: S, expr: Node) -> Node {
    Node::new(NodeKind::Assmt {
        sym: sym.as_ref().to_owned(),
        expr: Box::new(expr),
    })
}

pub fn deref_assign<S: AsRef<str>>(sym: S, expr: Node) -> Node {
    Node::new(NodeKind::DerefAssmt {
        sym: sym.as_ref().to_owned(),
        expr: Box::new(expr),
    })
}

pub fn blk(body: Node) -> Node {
    Node::new(NodeKind::Blk {
        body: Box::new(body),
    })
}

pub fn seq(stmts: Vec<Node>) -> Node {
    Node::new(NodeKind::Seq { stmts })
}

pub fn let_decl<S: AsRef<str>>(sym: S, mutable: bool, annotation: Option<Type>, expr: Node) -> Node {
    Node::new(NodeKind::Let {
        sym: sym.as_ref().to_owned(),
        mutable,
        annotation,
        expr: Box::new(expr),
    })
}

pub fn const_decl<S: AsRef<str>>(sym: S, annotation: Option<Type>, expr: Node) -> Node {
    Node::new(NodeKind::Const {
        sym: sym.as_ref().to_owned(),
        annotation,
        expr: Box::new(expr),
    })
}

pub fn ret(expr: Node) -> Node {
    Node::new(NodeKind::Ret {
        expr: Box::new(expr),
    })
}

pub fn fun<S: AsRef<str>>(sym: S, prms: Vec<Param>, ret: Type, body: Node) -> Node {
    Node::new(NodeKind::Fun {
        sym: sym.as_ref().to_owned(),
        prms,
        ret,
        body: Box::new(body),
    })
}

pub fn reference<S: AsRef<str>>(sym: S, mutable: bool) -> Node {
    Node::new(NodeKind::Ref {
        sym: sym.as_ref().to_owned(),
        mutable,
    })
}

#[cfg(test)]
mod helper_function_tests {
    use super::*;

    #[test]
    fn test_value_display_data_driven() {
        let test_cases = vec![
            (val(42), "42"),
            (val(-17), "-17"),
            (val(2.5), "2.5"),
            (val(true), "true"),
            (val("hello"), "hello"),
            (Value::Undefined, "undefined"),
            (Value::Null, "null"),
            (Value::Unassigned, "<unassigned>"),
            (Value::Closure, "<closure>"),
            (Value::Builtin, "<builtin>"),
            (Value::Blockframe, "<blockframe>"),
            (Value::Callframe, "<callframe>"),
        ];

        for (i, (value, expected)) in test_cases.iter().enumerate() {
            assert_eq!(
                value.to_string(),
                *expected,
                "Test case {} failed for {value:?}",
                i + 1
            );
        }
    }

    #[test]
    fn test_type_display_and_coercion() {
        let mut_ref = Type::reference(true, Type::I32);
        let shared_ref = Type::reference(false, Type::I32);

        assert_eq!(mut_ref.to_string(), "& mut i32");
        assert_eq!(shared_ref.to_string(), "& i32");
        assert_eq!(
            Type::Function {
                params: vec![Type::I32, Type::Bool],
                ret: Box::new(Type::String),
            }
            .to_string(),
            "(i32, bool) -> String"
        );

        assert!(shared_ref.accepts(&mut_ref));
        assert!(!mut_ref.accepts(&shared_ref));
        assert!(!Type::I32.accepts(&Type::Bool));
        assert!(!shared_ref.accepts(&Type::reference(true, Type::Bool)));
    }

    #[test]
    fn test_divergence() {
        let returns = blk(seq(vec![lit(1), ret(lit(2))]));
        let one_branch = cond(lit(true), blk(seq(vec![ret(lit(1))])), seq(vec![]));
        let both_branches = cond(
            lit(true),
            blk(seq(vec![ret(lit(1))])),
            blk(seq(vec![ret(lit(2))])),
        );

        assert!(returns.diverges());
        assert!(!one_branch.diverges());
        assert!(both_branches.diverges());
    }
}
