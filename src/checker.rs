//! Static type, mutability and borrow checking.
//!
//! The checker walks the tree once, annotating every node with its [`Type`] and stopping at
//! the first violation. It threads two environments:
//!
//! - a **type environment**: frames of `name -> {type, mutability, kind, borrowed owner}`,
//!   one per block plus one per function parameter list;
//! - a **borrow-count environment**: `owner -> {mutable, immutable}` counts, snapshotted when a
//!   block or call starts and restored when it ends, so borrows taken inside a scope are
//!   forgotten outside it.
//!
//! Function items cannot capture the locals of enclosing scopes; they may refer to other
//! functions, constants and builtins.

use std::collections::HashMap;

use tracing::trace;

use crate::Error;
use crate::ast::{BinaryOp, Node, NodeKind, Param, Type, UnaryOp, Value};
use crate::builtins::{builtin_ops, constants};

/// Frames 0 and 1 hold builtins and constants
const GLOBAL_FRAMES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    Variable,
    Argument,
    Function,
    Constant,
    Builtin,
}

#[derive(Debug, Clone)]
struct TypeEntry {
    ty: Type,
    mutable: bool,
    kind: BindingKind,
    /// The owner this binding holds a reference to, if it was initialised with `&owner`
    borrow: Option<String>,
}

impl TypeEntry {
    fn new(ty: Type, mutable: bool, kind: BindingKind) -> Self {
        TypeEntry {
            ty,
            mutable,
            kind,
            borrow: None,
        }
    }
}

#[derive(Debug, Default)]
struct TypeFrame {
    entries: HashMap<String, TypeEntry>,
    /// Set on the parameter frame of a function
    function_boundary: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct BorrowCount {
    mutable: usize,
    immutable: usize,
}

fn function_type(prms: &[Param], ret: &Type) -> Type {
    Type::Function {
        params: prms.iter().map(|p| p.ty.clone()).collect(),
        ret: Box::new(ret.clone()),
    }
}

fn literal_type(value: &Value) -> Result<Type, Error> {
    match value {
        Value::Number(_) => Ok(Type::I32),
        Value::Bool(_) => Ok(Type::Bool),
        Value::String(_) => Ok(Type::String),
        Value::Undefined => Ok(Type::Void),
        other => Err(Error::Internal(format!("{other} cannot appear as a literal"))),
    }
}

fn binop_type(op: BinaryOp, left: &Type, right: &Type) -> Result<Type, Error> {
    match (op, left, right) {
        (BinaryOp::Add, Type::String, Type::String) => Ok(Type::String),
        (
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem,
            Type::I32,
            Type::I32,
        ) => Ok(Type::I32),
        (BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge, Type::I32, Type::I32) => {
            Ok(Type::Bool)
        }
        (BinaryOp::Eq | BinaryOp::Ne, l, r)
            if l == r && matches!(l, Type::I32 | Type::Bool | Type::String) =>
        {
            Ok(Type::Bool)
        }
        _ => Err(Error::TypeError(format!(
            "type error in binary operation; `{op}` cannot be applied to {left} and {right}"
        ))),
    }
}

#[derive(Debug)]
pub struct Checker {
    frames: Vec<TypeFrame>,
    borrows: HashMap<String, BorrowCount>,
    /// Return types seen in each enclosing function body, innermost last
    returns: Vec<Vec<Type>>,
}

impl Default for Checker {
    fn default() -> Self {
        Checker::new()
    }
}

impl Checker {
    pub fn new() -> Self {
        let builtins = builtin_ops()
            .iter()
            .map(|op| {
                let entry = TypeEntry::new(op.ty(), false, BindingKind::Builtin);
                (op.name.to_owned(), entry)
            })
            .collect();
        let constants = constants()
            .iter()
            .map(|c| {
                let entry = TypeEntry::new(c.ty.clone(), false, BindingKind::Constant);
                (c.name.to_owned(), entry)
            })
            .collect();

        Checker {
            frames: vec![
                TypeFrame {
                    entries: builtins,
                    function_boundary: false,
                },
                TypeFrame {
                    entries: constants,
                    function_boundary: false,
                },
            ],
            borrows: HashMap::new(),
            returns: Vec::new(),
        }
    }

    /// Check a whole program and return the type of its value
    pub fn type_program(&mut self, program: &mut Node) -> Result<Type, Error> {
        if !matches!(program.kind, NodeKind::Blk { .. }) {
            return Err(Error::Internal("a program must be a block".into()));
        }
        self.check(program)
    }

    fn lookup(&self, sym: &str) -> Result<(usize, &TypeEntry), Error> {
        let boundary = self.frames.iter().rposition(|f| f.function_boundary);
        for (index, frame) in self.frames.iter().enumerate().rev() {
            if let Some(entry) = frame.entries.get(sym) {
                if let Some(boundary) = boundary
                    && (GLOBAL_FRAMES..boundary).contains(&index)
                    && matches!(entry.kind, BindingKind::Variable | BindingKind::Argument)
                {
                    return Err(Error::CaptureInFnItem(sym.to_owned()));
                }
                return Ok((index, entry));
            }
        }
        Err(Error::UnboundName(sym.to_owned()))
    }

    fn declare(&mut self, sym: &str, entry: TypeEntry) -> Result<(), Error> {
        trace!(sym, ty = %entry.ty, mutable = entry.mutable, "declare");
        self.frames
            .last_mut()
            .ok_or_else(|| Error::Internal(format!("declaration of {sym} outside any scope")))?
            .entries
            .insert(sym.to_owned(), entry);
        Ok(())
    }

    /// The owner an expression refers to, when it is `&owner` or a reference variable
    fn borrowed_owner(&self, expr: &Node) -> Option<String> {
        match &expr.kind {
            NodeKind::Ref { sym, .. } => Some(sym.clone()),
            NodeKind::Nam(sym) => self
                .lookup(sym)
                .ok()
                .and_then(|(_, entry)| entry.borrow.clone()),
            _ => None,
        }
    }

    /// The owner whose `String` an initializer takes over: a plain name, the first argument
    /// a builtin hands back, or a name from outside a block in its last position
    fn moved_owner(&self, expr: &Node) -> Option<String> {
        let owner = match &expr.kind {
            NodeKind::Nam(sym) => Some(sym.clone()),
            NodeKind::App { fun, args } => match (&fun.kind, args.first()) {
                (NodeKind::Nam(callee), Some(first))
                    if self
                        .lookup(callee)
                        .is_ok_and(|(_, entry)| entry.kind == BindingKind::Builtin) =>
                {
                    self.moved_owner(first)
                }
                _ => None,
            },
            NodeKind::Blk { body } => {
                let declared = |sym: &str| {
                    body.statements().iter().any(|stmt| {
                        matches!(&stmt.kind,
                            NodeKind::Let { sym: local, .. } | NodeKind::Const { sym: local, .. }
                                if local == sym)
                    })
                };
                body.statements()
                    .last()
                    .and_then(|stmt| self.moved_owner(stmt))
                    .filter(|sym| !declared(sym.as_str()))
            }
            _ => None,
        };
        owner.filter(|sym| {
            self.lookup(sym)
                .is_ok_and(|(_, entry)| entry.ty.is_droppable())
        })
    }

    /// Moving a `String` out of an owner is only allowed while nothing borrows it
    fn check_move(&self, expr: &Node) -> Result<(), Error> {
        if let Some(owner) = self.moved_owner(expr)
            && self
                .borrows
                .get(&owner)
                .is_some_and(|counts| counts.mutable + counts.immutable > 0)
        {
            return Err(Error::MoveWhileBorrowed(owner));
        }
        Ok(())
    }

    fn check(&mut self, node: &mut Node) -> Result<Type, Error> {
        let ty = self.infer(&mut node.kind)?;
        node.ty = Some(ty.clone());
        Ok(ty)
    }

    fn infer(&mut self, kind: &mut NodeKind) -> Result<Type, Error> {
        match kind {
            NodeKind::Lit(value) => literal_type(value),
            NodeKind::Nam(sym) => Ok(self.lookup(sym)?.1.ty.clone()),
            NodeKind::Unop { op, frst } => self.check_unop(*op, frst),
            NodeKind::Binop { op, frst, scnd } => {
                let left = self.check(frst)?;
                let right = self.check(scnd)?;
                binop_type(*op, &left, &right)
            }
            NodeKind::Log { op, frst, scnd } => {
                for operand in [frst, scnd] {
                    let ty = self.check(operand)?;
                    if ty != Type::Bool {
                        return Err(Error::TypeError(format!(
                            "type error in logical operation; `{op}` expects bool operands, found {ty}"
                        )));
                    }
                }
                Ok(Type::Bool)
            }
            NodeKind::Cond { pred, cons, alt } => {
                self.check_predicate(pred)?;
                let cons_type = self.check(cons)?;
                let alt_type = self.check(alt)?;
                Ok(if cons_type == alt_type {
                    cons_type
                } else {
                    Type::Void
                })
            }
            NodeKind::While { pred, body } => {
                self.check_predicate(pred)?;
                self.check(body)?;
                Ok(Type::Void)
            }
            NodeKind::App { fun, args } => self.check_application(fun, args),
            NodeKind::Assmt { sym, expr } => self.check_assignment(sym, expr),
            NodeKind::DerefAssmt { sym, expr } => self.check_deref_assignment(sym, expr),
            NodeKind::Blk { body } => self.check_block(body),
            NodeKind::Seq { stmts } => {
                let mut ty = Type::Void;
                for stmt in stmts {
                    ty = self.check(stmt)?;
                }
                Ok(ty)
            }
            NodeKind::Let {
                sym,
                mutable,
                annotation,
                expr,
            } => self.check_declaration(
                sym,
                annotation.as_ref(),
                expr,
                *mutable,
                BindingKind::Variable,
            ),
            NodeKind::Const {
                sym,
                annotation,
                expr,
            } => self.check_declaration(sym, annotation.as_ref(), expr, false, BindingKind::Constant),
            NodeKind::Ret { expr } => {
                if self.returns.is_empty() {
                    return Err(Error::TypeError(
                        "return statement outside of a function".into(),
                    ));
                }
                let ty = self.check(expr)?;
                if let Some(returns) = self.returns.last_mut() {
                    returns.push(ty.clone());
                }
                Ok(ty)
            }
            NodeKind::Fun {
                sym,
                prms,
                ret,
                body,
            } => self.check_function(sym, prms, ret, body),
            NodeKind::Ref { sym, mutable } => self.check_borrow(sym, *mutable),
        }
    }

    fn check_predicate(&mut self, pred: &mut Node) -> Result<(), Error> {
        match self.check(pred)? {
            Type::Bool => Ok(()),
            other => Err(Error::PredicateType(other)),
        }
    }

    fn check_unop(&mut self, op: UnaryOp, frst: &mut Node) -> Result<Type, Error> {
        let operand = self.check(frst)?;
        match (op, operand) {
            (UnaryOp::Neg, Type::I32) => Ok(Type::I32),
            (UnaryOp::Not, Type::Bool) => Ok(Type::Bool),
            (UnaryOp::Deref, operand) => self.dereference(frst, operand),
            (op, operand) => Err(Error::TypeError(format!(
                "type error in unary operation; `{op}` cannot be applied to {operand}"
            ))),
        }
    }

    /// Type of `*frst`. A reference variable's owner must still be in scope.
    fn dereference(&self, frst: &Node, operand: Type) -> Result<Type, Error> {
        let name = match &frst.kind {
            NodeKind::Nam(sym) => Some(sym.as_str()),
            _ => None,
        };
        if let Some(sym) = name {
            let (_, entry) = self.lookup(sym)?;
            if let Some(owner) = &entry.borrow {
                self.lookup(owner)?;
            }
        }

        match operand {
            Type::Ref { inner, .. } if inner.is_droppable() => Err(Error::MoveOutOfReference(
                name.unwrap_or("reference").to_owned(),
            )),
            Type::Ref { inner, .. } => Ok(*inner),
            other => Err(Error::TypeError(format!(
                "type `{other}` cannot be dereferenced"
            ))),
        }
    }

    fn check_application(&mut self, fun: &mut Node, args: &mut [Node]) -> Result<Type, Error> {
        let fun_type = self.check(fun)?;

        // borrows taken by arguments last only for the call
        let saved = self.borrows.clone();
        let arg_types = self.check_arguments(args, matches!(fun_type, Type::Builtin { .. }));
        self.borrows = saved;
        let arg_types = arg_types?;

        match fun_type {
            Type::Builtin { arity } => {
                if arg_types.len() != arity {
                    return Err(Error::TypeError(format!(
                        "type error in application; expected {arity} arguments, found {}",
                        arg_types.len()
                    )));
                }
                Ok(arg_types.into_iter().next().unwrap_or(Type::Void))
            }
            Type::Function { params, ret } => {
                if params.len() != arg_types.len() {
                    return Err(Error::TypeError(format!(
                        "type error in application; expected {} arguments, found {}",
                        params.len(),
                        arg_types.len()
                    )));
                }
                if !params.iter().zip(&arg_types).all(|(p, a)| p.accepts(a)) {
                    return Err(Error::ApplicationMismatch {
                        expected: params,
                        actual: arg_types,
                    });
                }
                Ok(*ret)
            }
            other => Err(Error::TypeError(format!(
                "type error in application; {other} is not a function type"
            ))),
        }
    }

    /// Named arguments to a function move into it; builtins only look at them
    fn check_arguments(&mut self, args: &mut [Node], builtin: bool) -> Result<Vec<Type>, Error> {
        let mut types = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            types.push(self.check(arg)?);
            if !builtin && matches!(arg.kind, NodeKind::Nam(_)) {
                self.check_move(arg)?;
            }
        }
        Ok(types)
    }

    fn check_assignment(&mut self, sym: &str, expr: &mut Node) -> Result<Type, Error> {
        let (index, entry) = self.lookup(sym)?;
        if !entry.mutable {
            return Err(match entry.kind {
                BindingKind::Argument => Error::AssignToImmutableArgument(sym.to_owned()),
                _ => Error::AssignToImmutableVariable(sym.to_owned()),
            });
        }
        let expected = entry.ty.clone();

        let found = self.check(expr)?;
        if !expected.accepts(&found) {
            return Err(Error::TypeMismatch {
                context: "assignment",
                expected,
                found,
            });
        }
        if !matches!(&expr.kind, NodeKind::Nam(src) if src == sym) {
            self.check_move(expr)?;
        }

        let borrow = self.borrowed_owner(expr);
        if let Some(entry) = self
            .frames
            .get_mut(index)
            .and_then(|frame| frame.entries.get_mut(sym))
        {
            entry.borrow = borrow;
        }
        Ok(found)
    }

    fn check_deref_assignment(&mut self, sym: &str, expr: &mut Node) -> Result<Type, Error> {
        let (inner, owner) = {
            let (_, entry) = self.lookup(sym)?;
            let inner = match &entry.ty {
                Type::Ref { mutable: false, .. } => {
                    return Err(Error::AssignThroughSharedReference(sym.to_owned()));
                }
                Type::Ref { inner, .. } => (**inner).clone(),
                other => {
                    return Err(Error::TypeError(format!(
                        "type `{other}` cannot be dereferenced"
                    )));
                }
            };
            (inner, entry.borrow.clone())
        };
        if let Some(owner) = owner {
            self.lookup(&owner)?;
        }

        let found = self.check(expr)?;
        if !inner.accepts(&found) {
            return Err(Error::TypeMismatch {
                context: "assignment",
                expected: inner,
                found,
            });
        }
        self.check_move(expr)?;
        Ok(found)
    }

    fn check_block(&mut self, body: &mut Node) -> Result<Type, Error> {
        // functions may be called before their declaration in the same block
        let mut frame = TypeFrame::default();
        for stmt in body.statements() {
            if let NodeKind::Fun { sym, prms, ret, .. } = &stmt.kind {
                let entry = TypeEntry::new(function_type(prms, ret), false, BindingKind::Function);
                frame.entries.insert(sym.clone(), entry);
            }
        }

        self.frames.push(frame);
        let saved = self.borrows.clone();
        let result = self.check(body);
        self.borrows = saved;
        self.frames.pop();
        result
    }

    fn check_declaration(
        &mut self,
        sym: &str,
        annotation: Option<&Type>,
        expr: &mut Node,
        mutable: bool,
        kind: BindingKind,
    ) -> Result<Type, Error> {
        let found = self.check(expr)?;
        self.check_move(expr)?;
        let ty = match annotation {
            Some(expected) if !expected.accepts(&found) => {
                return Err(Error::TypeMismatch {
                    context: "declaration",
                    expected: expected.clone(),
                    found,
                });
            }
            Some(expected) => expected.clone(),
            None => found.clone(),
        };

        let entry = TypeEntry {
            ty,
            mutable,
            kind,
            borrow: self.borrowed_owner(expr),
        };
        self.declare(sym, entry)?;
        Ok(found)
    }

    fn check_function(
        &mut self,
        sym: &str,
        prms: &[Param],
        ret: &Type,
        body: &mut Node,
    ) -> Result<Type, Error> {
        let fun_type = function_type(prms, ret);
        self.declare(
            sym,
            TypeEntry::new(fun_type.clone(), false, BindingKind::Function),
        )?;

        let params = prms
            .iter()
            .map(|p| {
                let entry = TypeEntry::new(p.ty.clone(), p.mutable, BindingKind::Argument);
                (p.sym.clone(), entry)
            })
            .collect();
        self.frames.push(TypeFrame {
            entries: params,
            function_boundary: true,
        });
        let saved = std::mem::take(&mut self.borrows);
        self.returns.push(Vec::new());

        let result = self.check(body);

        let returned = self.returns.pop().unwrap_or_default();
        self.borrows = saved;
        self.frames.pop();
        result?;

        if returned.is_empty() && *ret != Type::Void {
            return Err(Error::ReturnTypeMismatch {
                declared: ret.clone(),
                actual: Type::Void,
            });
        }
        if let Some(actual) = returned.into_iter().find(|actual| !ret.accepts(actual)) {
            return Err(Error::ReturnTypeMismatch {
                declared: ret.clone(),
                actual,
            });
        }
        Ok(fun_type)
    }

    fn check_borrow(&mut self, sym: &str, mutable: bool) -> Result<Type, Error> {
        let (_, entry) = self.lookup(sym)?;
        let (declared_mutable, ty) = (entry.mutable, entry.ty.clone());

        let counts = self.borrows.entry(sym.to_owned()).or_default();
        if mutable {
            if !declared_mutable {
                return Err(Error::BorrowOfImmutable(sym.to_owned()));
            }
            if counts.immutable > 0 {
                return Err(Error::MutableWhileImmutable(sym.to_owned()));
            }
            if counts.mutable > 0 {
                return Err(Error::DoubleMutableBorrow(sym.to_owned()));
            }
            counts.mutable += 1;
        } else {
            if counts.mutable > 0 {
                return Err(Error::ImmutableWhileMutable(sym.to_owned()));
            }
            counts.immutable += 1;
        }
        trace!(sym, mutable, ?counts, "borrow");
        Ok(Type::reference(mutable, ty))
    }
}

#[cfg(all(test, feature = "parser"))]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    enum TestResult {
        Typed(Type),
        SpecificError(&'static str),
    }
    use TestResult::*;

    fn check_source(source: &str) -> Result<Type, Error> {
        let mut program = parse_program(source)?;
        Checker::new().type_program(&mut program)
    }

    fn run_checker_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (source, expected)) in test_cases.into_iter().enumerate() {
            let test_id = format!("#{}", i + 1);
            match (check_source(source), expected) {
                (Ok(actual), Typed(ty)) => {
                    assert_eq!(actual, ty, "{test_id}: wrong type for {source}");
                }
                (Err(err), SpecificError(message)) => {
                    assert_eq!(err.to_string(), message, "{test_id}: wrong error for {source}");
                }
                (Ok(actual), SpecificError(message)) => {
                    panic!("{test_id}: expected error '{message}' for {source}, got {actual}")
                }
                (Err(err), Typed(ty)) => {
                    panic!("{test_id}: expected {ty} for {source}, got error '{err}'")
                }
            }
        }
    }

    #[test]
    fn test_inference() {
        run_checker_tests(vec![
            ("2 + 3;", Typed(Type::I32)),
            ("1 < 2 && !false;", Typed(Type::Bool)),
            ("String::from(\"a\") + String::from(\"b\");", Typed(Type::String)),
            ("let x = 5; let y = &x;", Typed(Type::reference(false, Type::I32))),
            ("let mut x = 5; let y = &mut x; *y;", Typed(Type::I32)),
            ("display(true);", Typed(Type::Bool)),
            ("I32_MAX;", Typed(Type::I32)),
            ("while false { 1; }", Typed(Type::Void)),
            (
                "fn f(a: i32, b: bool) -> i32 { return a; }",
                Typed(Type::Function {
                    params: vec![Type::I32, Type::Bool],
                    ret: Box::new(Type::I32),
                }),
            ),
            ("even(4); fn even(n: i32) -> bool { return n % 2 == 0; }", Typed(Type::Function {
                params: vec![Type::I32],
                ret: Box::new(Type::Bool),
            })),
        ]);
    }

    #[test]
    fn test_declaration_and_application_errors() {
        run_checker_tests(vec![
            ("x;", SpecificError("unbound name: x")),
            (
                "let x: i32 = true;",
                SpecificError("type error in declaration; expected i32, found bool"),
            ),
            (
                "let mut x = true; x = 2;",
                SpecificError("type error in assignment; expected bool, found i32"),
            ),
            (
                "let x = false; let z = &x; let mut a = 1; a = *z;",
                SpecificError("type error in assignment; expected i32, found bool"),
            ),
            (
                "fn test(a: i32) {} test(true);",
                SpecificError(
                    "type error in application:\nexpected parameter types: [ i32 ]\nactual argument types: [ bool ]",
                ),
            ),
            (
                "fn test(b: bool) {} let mut a = false; test(&a);",
                SpecificError(
                    "type error in application:\nexpected parameter types: [ bool ]\nactual argument types: [ & bool ]",
                ),
            ),
            (
                "fn test(mut a: i32) { a = 5; return a; } let x = 5; test(x);",
                SpecificError(
                    "type error in function declaration; declared return type: void, actual return type: i32",
                ),
            ),
            (
                "fn f() -> i32 { 1; }",
                SpecificError(
                    "type error in function declaration; declared return type: i32, actual return type: void",
                ),
            ),
            (
                "fn f(a: i32) {} f(1, 2);",
                SpecificError("type error in application; expected 1 arguments, found 2"),
            ),
            (
                "let x = 1; x(2);",
                SpecificError("type error in application; i32 is not a function type"),
            ),
            (
                "if 1 { 2; }",
                SpecificError("expected predicate type: bool, actual predicate type: i32"),
            ),
            (
                "1 + true;",
                SpecificError("type error in binary operation; `+` cannot be applied to i32 and bool"),
            ),
            ("return 1;", SpecificError("return statement outside of a function")),
            (
                "let x = 1; fn f() -> i32 { return x; }",
                SpecificError("can't capture dynamic environment in a fn item: `x`"),
            ),
        ]);
    }

    #[test]
    fn test_mutability_rules() {
        run_checker_tests(vec![
            (
                "let a = 1; a = 2;",
                SpecificError("cannot assign twice to immutable variable `a`"),
            ),
            (
                "fn test(a: i32) -> i32 { a = 5; return a; }",
                SpecificError("cannot assign to immutable argument `a`"),
            ),
            (
                "let x = false; let z = &x; *z = true;",
                SpecificError("cannot assign to `*z`, which is behind a `&` reference"),
            ),
            (
                "fn test(a: &i32, b: bool) { *a = 5; }",
                SpecificError("cannot assign to `*a`, which is behind a `&` reference"),
            ),
            ("fn test(mut a: i32) -> i32 { a = 5; return a; }", Typed(Type::Function {
                params: vec![Type::I32],
                ret: Box::new(Type::I32),
            })),
            ("let mut x = 1; let r = &mut x; *r = 2;", Typed(Type::I32)),
        ]);
    }

    #[test]
    fn test_borrow_rules() {
        run_checker_tests(vec![
            (
                "let x = 5; let y = &mut x;",
                SpecificError("cannot borrow `x` as mutable, as it is not declared as mutable"),
            ),
            (
                "let mut x = 5; let y = &mut x; let z = &mut x;",
                SpecificError("cannot borrow `x` as mutable more than once at a time"),
            ),
            (
                "let mut x = 5; let y = &mut x; let z = &x;",
                SpecificError("cannot borrow `x` as immutable because it is also borrowed as mutable"),
            ),
            (
                "let mut x = 5; let y = &x; let z = &mut x;",
                SpecificError("cannot borrow `x` as mutable because it is also borrowed as immutable"),
            ),
            ("let x = 5; let y = &x; let z = &x;", Typed(Type::reference(false, Type::I32))),
            (
                "let mut x = 5; { let y = &mut x; } let z = &mut x;",
                Typed(Type::reference(true, Type::I32)),
            ),
            (
                "let mut x = 5; let y = &mut x; { let z = &mut x; }",
                SpecificError("cannot borrow `x` as mutable more than once at a time"),
            ),
            (
                "fn test(mut a: &mut i32) {} let mut x = 1; test(&mut x); test(&mut x);",
                Typed(Type::Void),
            ),
            (
                "fn test(a: &mut i32) {} let mut x = 1; let b = &mut x; test(&mut x);",
                SpecificError("cannot borrow `x` as mutable more than once at a time"),
            ),
            (
                "fn test(a: &mut i32) {} let x = 7; test(&mut x);",
                SpecificError("cannot borrow `x` as mutable, as it is not declared as mutable"),
            ),
            ("fn test(a: &i32) {} let mut x = 7; test(&mut x);", Typed(Type::Void)),
            (
                "let mut y = 3; let mut r = &mut y; { let mut x = 5; r = &mut x; } *r;",
                SpecificError("unbound name: x"),
            ),
            (
                "let s = String::from(\"a\"); let r = &s; let t = *r;",
                SpecificError("cannot move out of `*r` which is behind a reference"),
            ),
        ]);
    }

    #[test]
    fn test_moves_out_of_borrowed_owners() {
        run_checker_tests(vec![
            (
                "{ let s = String::from(\"a\"); let r = &s; { let t = s; } display(r); }",
                SpecificError("cannot move out of `s` because it is borrowed"),
            ),
            (
                "let mut s = String::from(\"a\"); let r = &mut s; let t = display(s);",
                SpecificError("cannot move out of `s` because it is borrowed"),
            ),
            (
                "let s = String::from(\"a\"); let r = &s; let t = { s };",
                SpecificError("cannot move out of `s` because it is borrowed"),
            ),
            (
                "fn take(a: &String, b: String) {} let s = String::from(\"a\"); take(&s, s);",
                SpecificError("cannot move out of `s` because it is borrowed"),
            ),
            (
                "let s = String::from(\"a\"); let r = &s; let mut u = String::from(\"b\"); u = s;",
                SpecificError("cannot move out of `s` because it is borrowed"),
            ),
            // the borrow ends with its block
            (
                "let s = String::from(\"a\"); { let r = &s; } let t = s;",
                Typed(Type::String),
            ),
            // copies and builtins that only look at the owner are fine
            (
                "let mut x = 1; let r = &x; let y = x;",
                Typed(Type::I32),
            ),
            (
                "let s = String::from(\"a\"); let r = &s; display(s); display(r);",
                Typed(Type::reference(false, Type::String)),
            ),
            // a block's own local is not the outer owner
            (
                "let s = String::from(\"a\"); let r = &s; let t = { let s = String::from(\"b\"); s };",
                Typed(Type::String),
            ),
        ]);
    }
}
