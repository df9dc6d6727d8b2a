//! Lowering of a checked tree into bytecode.
//!
//! Besides emitting instructions, the compiler keeps a compile-time environment that mirrors
//! the VM's environment frame for frame. Each binding records whether it currently owns a
//! heap `String`:
//!
//! - `Some(true)`: the binding owns its value and must free it
//! - `Some(false)`: the value was moved out; any later use is an error
//! - `None`: nothing to free (copy types, functions, unassigned slots)
//!
//! Ownership moves on `let`, assignment, argument passing and `return`. Whenever an owner
//! goes out of scope or is overwritten, a `DROP` instruction is emitted for it. Branches are
//! compiled against independent copies of the environment and merged afterwards, with a move
//! in either branch counting as a move.

use std::mem;

use tracing::{debug, trace};

use crate::Error;
use crate::ast::{LogicalOp, Node, NodeKind, Param, Type, Value, lit};
use crate::builtins::{builtin_ops, constants};
use crate::bytecode::{Emitter, Instruction, Position, disassemble};
use crate::ownership::OwnershipLog;

const BUILTINS_FRAME: usize = 0;

#[derive(Debug, Clone, PartialEq)]
struct Binding {
    sym: String,
    owner: Option<bool>,
    ty: Type,
}

impl Binding {
    fn new(sym: &str, ty: Type) -> Self {
        Binding {
            sym: sym.to_owned(),
            owner: None,
            ty,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CompileEnvironment {
    frames: Vec<Vec<Binding>>,
}

impl CompileEnvironment {
    /// Frame 0 holds the builtins and frame 1 the constants, as in the VM's base environment
    fn global() -> Self {
        let builtins = builtin_ops()
            .iter()
            .map(|op| Binding::new(op.name, op.ty()))
            .collect();
        let constants = constants()
            .iter()
            .map(|c| Binding::new(c.name, c.ty.clone()))
            .collect();
        CompileEnvironment {
            frames: vec![builtins, constants],
        }
    }

    fn lookup(&self, sym: &str) -> Result<Position, Error> {
        for (frame, bindings) in self.frames.iter().enumerate().rev() {
            if let Some(slot) = bindings.iter().position(|b| b.sym == sym) {
                return Ok(Position::new(frame, slot));
            }
        }
        Err(Error::Internal(format!(
            "{sym} is not in the compile-time environment"
        )))
    }

    fn binding(&self, pos: Position) -> Result<&Binding, Error> {
        self.frames
            .get(pos.frame)
            .and_then(|frame| frame.get(pos.slot))
            .ok_or_else(|| Error::Internal(format!("no binding at {pos}")))
    }

    fn binding_mut(&mut self, pos: Position) -> Result<&mut Binding, Error> {
        self.frames
            .get_mut(pos.frame)
            .and_then(|frame| frame.get_mut(pos.slot))
            .ok_or_else(|| Error::Internal(format!("no binding at {pos}")))
    }

    fn innermost(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    /// Every binding that still owns its value, in frames `from` and above
    fn owners_from(&self, from: usize) -> Vec<(String, Position)> {
        self.frames
            .iter()
            .enumerate()
            .skip(from)
            .flat_map(|(frame, bindings)| {
                bindings
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| b.owner == Some(true))
                    .map(move |(slot, b)| (b.sym.clone(), Position::new(frame, slot)))
            })
            .collect()
    }

    /// Combine the states after two branches; a move in either branch wins
    fn merge(mut self, other: &CompileEnvironment) -> Self {
        for (frame, other_frame) in self.frames.iter_mut().zip(&other.frames) {
            for (binding, other_binding) in frame.iter_mut().zip(other_frame) {
                binding.owner = match (binding.owner, other_binding.owner) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    _ => None,
                };
            }
        }
        self
    }

    /// A binding that owned its value in `self` but has been moved in `later`
    fn first_moved_in(&self, later: &CompileEnvironment) -> Option<String> {
        self.frames
            .iter()
            .zip(&later.frames)
            .flat_map(|(before, after)| before.iter().zip(after))
            .find(|(before, after)| before.owner == Some(true) && after.owner == Some(false))
            .map(|(before, _)| before.sym.clone())
    }
}

/// Names a block declares directly, in order of first declaration
fn scan_declarations(body: &Node) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for stmt in body.statements() {
        let sym = match &stmt.kind {
            NodeKind::Let { sym, .. } | NodeKind::Const { sym, .. } | NodeKind::Fun { sym, .. } => {
                sym
            }
            _ => continue,
        };
        if !names.contains(sym) {
            names.push(sym.clone());
        }
    }
    names
}

/// What a compiled expression leaves on the operand stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Produced {
    /// A heap string that no binding owns; it must be freed if discarded
    FreshString,
    Plain,
}

#[derive(Debug)]
struct FunctionContext {
    name: String,
    params_frame: usize,
}

struct CallOperands {
    arity: usize,
    builtin: bool,
    first_argument: Produced,
}

pub struct Compiler {
    emitter: Emitter,
    ce: CompileEnvironment,
    log: OwnershipLog,
    functions: Vec<FunctionContext>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            emitter: Emitter::new(),
            ce: CompileEnvironment::global(),
            log: OwnershipLog::new(),
            functions: Vec::new(),
        }
    }

    /// Compile a checked program block into instructions ending in `DONE`
    pub fn compile_program(
        mut self,
        program: &Node,
    ) -> Result<(Vec<Instruction>, OwnershipLog), Error> {
        let NodeKind::Blk { body } = &program.kind else {
            return Err(Error::Internal("a program must be a block".into()));
        };
        self.compile_block(body, true)?;
        self.emitter.emit(Instruction::Done);

        let instructions = self.emitter.finish()?;
        debug!(
            instructions = instructions.len(),
            "compiled program:\n{}",
            disassemble(&instructions)
        );
        Ok((instructions, self.log))
    }

    fn compile(&mut self, node: &Node) -> Result<Produced, Error> {
        match &node.kind {
            NodeKind::Lit(value) => {
                self.emitter.emit(Instruction::Ldc(value.clone()));
                Ok(match value {
                    Value::String(_) => Produced::FreshString,
                    _ => Produced::Plain,
                })
            }
            NodeKind::Nam(sym) => {
                self.load(sym)?;
                Ok(Produced::Plain)
            }
            NodeKind::Unop { op, frst } => {
                self.compile(frst)?;
                self.emitter.emit(Instruction::Unop(*op));
                Ok(Produced::Plain)
            }
            NodeKind::Binop { op, frst, scnd } => {
                self.compile(frst)?;
                self.compile(scnd)?;
                self.emitter.emit(Instruction::Binop(*op));
                Ok(if node.checked_type()?.is_droppable() {
                    Produced::FreshString
                } else {
                    Produced::Plain
                })
            }
            NodeKind::Log { op, frst, scnd } => match op {
                LogicalOp::And => self.compile_conditional(frst, scnd, &lit(false), &Type::Bool),
                LogicalOp::Or => self.compile_conditional(frst, &lit(true), scnd, &Type::Bool),
            },
            NodeKind::Cond { pred, cons, alt } => {
                self.compile_conditional(pred, cons, alt, node.checked_type()?)
            }
            NodeKind::While { pred, body } => self.compile_while(pred, body),
            NodeKind::App { fun, args } => {
                let operands = self.compile_call_operands(fun, args)?;
                self.emitter.emit(Instruction::Call {
                    arity: operands.arity,
                });
                Ok(if operands.builtin {
                    operands.first_argument
                } else if node.checked_type()?.is_droppable() {
                    Produced::FreshString
                } else {
                    Produced::Plain
                })
            }
            NodeKind::Assmt { sym, expr } => {
                let produced = self.compile(expr)?;
                let pos = self.ce.lookup(sym)?;
                self.transfer_ownership(sym, pos, expr, produced)?;
                self.emitter.emit(Instruction::Assign {
                    sym: sym.clone(),
                    pos,
                });
                Ok(Produced::Plain)
            }
            NodeKind::DerefAssmt { sym, expr } => {
                self.compile(expr)?;
                let pos = self.resolve_unmoved(sym)?;
                if let Some(src) = self.aliased_source(expr) {
                    self.move_out(src, &format!("*{sym}"))?;
                }
                self.emitter.emit(Instruction::AssignDeref {
                    sym: sym.clone(),
                    pos,
                });
                Ok(Produced::Plain)
            }
            NodeKind::Blk { body } => self.compile_block(body, false),
            NodeKind::Seq { stmts } => self.compile_sequence(stmts),
            NodeKind::Let {
                sym,
                annotation,
                expr,
                ..
            }
            | NodeKind::Const {
                sym,
                annotation,
                expr,
            } => {
                let produced = self.compile(expr)?;
                let pos = self.ce.lookup(sym)?;
                let ty = match annotation {
                    Some(ty) => ty.clone(),
                    None => expr.checked_type()?.clone(),
                };
                self.ce.binding_mut(pos)?.ty = ty;
                self.transfer_ownership(sym, pos, expr, produced)?;
                self.emitter.emit(Instruction::Assign {
                    sym: sym.clone(),
                    pos,
                });
                Ok(Produced::Plain)
            }
            NodeKind::Ret { expr } => self.compile_return(expr),
            // the enclosing block compiled the function on entry
            NodeKind::Fun { sym, .. } => {
                self.load(sym)?;
                Ok(Produced::Plain)
            }
            NodeKind::Ref { sym, .. } => {
                let pos = self.resolve_unmoved(sym)?;
                self.emitter.emit(Instruction::Ldr {
                    sym: sym.clone(),
                    pos,
                });
                Ok(Produced::Plain)
            }
        }
    }

    fn resolve_unmoved(&self, sym: &str) -> Result<Position, Error> {
        let pos = self.ce.lookup(sym)?;
        if self.ce.binding(pos)?.owner == Some(false) {
            return Err(Error::UseOfMovedValue(sym.to_owned()));
        }
        Ok(pos)
    }

    fn load(&mut self, sym: &str) -> Result<(), Error> {
        let pos = self.resolve_unmoved(sym)?;
        self.emitter.emit(Instruction::Ld {
            sym: sym.to_owned(),
            pos,
        });
        Ok(())
    }

    fn discard(&mut self, produced: Produced) {
        self.emitter.emit(match produced {
            Produced::FreshString => Instruction::DropPop,
            Produced::Plain => Instruction::Pop,
        });
    }

    fn emit_drop(&mut self, owners: Vec<(String, Position)>) {
        if owners.is_empty() {
            return;
        }
        for (sym, pos) in &owners {
            trace!(sym, %pos, "drop");
        }
        self.emitter.emit(Instruction::Drop(owners));
    }

    /// Mark `sym` as moved into `to` if it owns a droppable value
    fn move_out(&mut self, sym: &str, to: &str) -> Result<(), Error> {
        let pos = self.ce.lookup(sym)?;
        let binding = self.ce.binding_mut(pos)?;
        if binding.ty.is_droppable() && binding.owner == Some(true) {
            binding.owner = Some(false);
            self.log.record(sym, to);
        }
        Ok(())
    }

    fn is_builtin(&self, sym: &str) -> bool {
        self.ce
            .lookup(sym)
            .is_ok_and(|pos| pos.frame == BUILTINS_FRAME)
    }

    /// The binding whose heap node `expr` evaluates to, without copying it.
    ///
    /// A builtin hands back its first argument, and a block may end in a name declared
    /// outside it. Binding such a value is a move from that binding.
    fn aliased_source<'a>(&self, expr: &'a Node) -> Option<&'a str> {
        match &expr.kind {
            NodeKind::Nam(sym) => Some(sym.as_str()),
            NodeKind::App { fun, args } => match &fun.kind {
                NodeKind::Nam(callee) if self.is_builtin(callee) => {
                    args.first().and_then(|arg| self.aliased_source(arg))
                }
                _ => None,
            },
            NodeKind::Blk { body } => body
                .statements()
                .last()
                .and_then(|stmt| self.aliased_source(stmt))
                .filter(|sym| !scan_declarations(body).iter().any(|local| local == *sym)),
            _ => None,
        }
    }

    /// Whether a call would receive a reference while the current function still has
    /// owners to drop. Such a call cannot reuse the caller's frame.
    fn lends_to_callee(&self, args: &[Node], params_frame: usize) -> bool {
        !self.ce.owners_from(params_frame).is_empty()
            && args
                .iter()
                .any(|arg| matches!(arg.checked_type(), Ok(Type::Ref { .. })))
    }

    /// Update ownership for `dest = expr`, dropping the value `dest` owned before.
    /// Runs after `expr` has been compiled and before the `ASSIGN`.
    fn transfer_ownership(
        &mut self,
        dest: &str,
        dest_pos: Position,
        expr: &Node,
        produced: Produced,
    ) -> Result<(), Error> {
        let binding = self.ce.binding(dest_pos)?;
        if !binding.ty.is_droppable() {
            return Ok(());
        }
        let source = self.aliased_source(expr);
        if source == Some(dest) {
            return Ok(());
        }
        if binding.owner == Some(true) {
            self.emit_drop(vec![(dest.to_owned(), dest_pos)]);
        }

        let owner = if let Some(src) = source {
            let src_pos = self.ce.lookup(src)?;
            let origin = self.ce.binding_mut(src_pos)?;
            if origin.owner == Some(true) {
                origin.owner = Some(false);
                self.log.record(src, dest);
                Some(true)
            } else {
                None
            }
        } else if produced == Produced::FreshString {
            if let NodeKind::App { fun, .. } = &expr.kind
                && let NodeKind::Nam(callee) = &fun.kind
                && !self.is_builtin(callee)
            {
                self.log.record(callee, dest);
            }
            Some(true)
        } else {
            None
        };
        self.ce.binding_mut(dest_pos)?.owner = owner;
        Ok(())
    }

    fn compile_sequence(&mut self, stmts: &[Node]) -> Result<Produced, Error> {
        if stmts.is_empty() {
            self.emitter.emit(Instruction::Ldc(Value::Undefined));
            return Ok(Produced::Plain);
        }
        let mut produced = Produced::Plain;
        for (i, stmt) in stmts.iter().enumerate() {
            if i > 0 {
                self.discard(produced);
            }
            produced = self.compile(stmt)?;
        }
        Ok(produced)
    }

    fn compile_block(&mut self, body: &Node, is_program: bool) -> Result<Produced, Error> {
        let locals = scan_declarations(body);
        self.emitter.emit(Instruction::EnterScope { num: locals.len() });
        self.ce.frames.push(
            locals
                .iter()
                .map(|sym| Binding::new(sym, Type::Void))
                .collect(),
        );
        let frame = self.ce.innermost();

        // functions are bound before the first statement runs
        for stmt in body.statements() {
            if let NodeKind::Fun {
                sym,
                prms,
                ret,
                body: fun_body,
            } = &stmt.kind
            {
                self.compile_function(sym, prms, ret, fun_body)?;
                let pos = self.ce.lookup(sym)?;
                self.emitter.emit(Instruction::Assign {
                    sym: sym.clone(),
                    pos,
                });
                self.emitter.emit(Instruction::Pop);
            }
        }

        let mut produced = self.compile(body)?;

        if !is_program {
            // an owned local in last position becomes the block's value
            let escaping = body.statements().last().and_then(|stmt| match &stmt.kind {
                NodeKind::Let { sym, .. }
                | NodeKind::Const { sym, .. }
                | NodeKind::Assmt { sym, .. } => Some(sym.as_str()),
                _ => self.aliased_source(stmt),
            });
            if let Some(sym) = escaping
                && let Ok(pos) = self.ce.lookup(sym)
                && pos.frame == frame
                && self.ce.binding(pos)?.owner == Some(true)
            {
                self.ce.binding_mut(pos)?.owner = Some(false);
                produced = Produced::FreshString;
            }
            let owners = self.ce.owners_from(frame);
            self.emit_drop(owners);
        }

        self.ce.frames.pop();
        self.emitter.emit(Instruction::ExitScope);
        Ok(produced)
    }

    fn compile_function(
        &mut self,
        sym: &str,
        prms: &[Param],
        ret: &Type,
        body: &Node,
    ) -> Result<(), Error> {
        let arity = prms.len();
        let addr = self.emitter.len() + 2;
        self.emitter.emit(Instruction::Ldf { arity, addr });
        let after = self.emitter.new_label();
        self.emitter.emit_goto(after);

        self.ce.frames.push(
            prms.iter()
                .map(|p| Binding {
                    sym: p.sym.clone(),
                    owner: p.ty.is_droppable().then_some(true),
                    ty: p.ty.clone(),
                })
                .collect(),
        );
        let params_frame = self.ce.innermost();
        self.functions.push(FunctionContext {
            name: sym.to_owned(),
            params_frame,
        });
        trace!(sym, arity, %ret, addr, "compile function");

        let produced = self.compile(body)?;
        self.discard(produced);
        let owners = self.ce.owners_from(params_frame);
        self.emit_drop(owners);
        self.emitter.emit(Instruction::Ldc(Value::Undefined));
        self.emitter.emit(Instruction::Reset);

        self.functions.pop();
        self.ce.frames.pop();
        self.emitter.bind(after);
        Ok(())
    }

    /// Function, then arguments, with ownership of named arguments moving to the callee
    fn compile_call_operands(&mut self, fun: &Node, args: &[Node]) -> Result<CallOperands, Error> {
        self.compile(fun)?;
        let callee = match &fun.kind {
            NodeKind::Nam(sym) => sym.as_str(),
            _ => "<anonymous>",
        };
        let builtin = self.is_builtin(callee);

        let mut first_argument = Produced::Plain;
        for (i, arg) in args.iter().enumerate() {
            let produced = self.compile(arg)?;
            if i == 0 {
                first_argument = produced;
            }
            if !builtin && let NodeKind::Nam(sym) = &arg.kind {
                self.move_out(sym, callee)?;
            }
        }

        Ok(CallOperands {
            arity: args.len(),
            builtin,
            first_argument,
        })
    }

    fn compile_return(&mut self, expr: &Node) -> Result<Produced, Error> {
        let (name, params_frame) = match self.functions.last() {
            Some(context) => (context.name.clone(), context.params_frame),
            None => return Err(Error::Internal("return outside of a function".into())),
        };

        if let NodeKind::App { fun, args } = &expr.kind
            && !matches!(&fun.kind, NodeKind::Nam(callee) if self.is_builtin(callee))
            && !self.lends_to_callee(args, params_frame)
        {
            let operands = self.compile_call_operands(fun, args)?;
            let owners = self.ce.owners_from(params_frame);
            self.emit_drop(owners);
            self.emitter.emit(Instruction::TailCall {
                arity: operands.arity,
            });
            return Ok(Produced::Plain);
        }

        self.compile(expr)?;
        // the returned value belongs to the caller from here on
        if let Some(sym) = self.aliased_source(expr) {
            let pos = self.ce.lookup(sym)?;
            if pos.frame >= params_frame {
                self.move_out(sym, &name)?;
            }
        }

        let owners = self.ce.owners_from(params_frame);
        self.emit_drop(owners);
        self.emitter.emit(Instruction::Reset);
        Ok(Produced::Plain)
    }

    fn compile_conditional(
        &mut self,
        pred: &Node,
        cons: &Node,
        alt: &Node,
        value_type: &Type,
    ) -> Result<Produced, Error> {
        self.compile(pred)?;
        let alternative = self.emitter.new_label();
        let cons_exit = self.emitter.new_label();
        let end = self.emitter.new_label();
        self.emitter.emit_jof(alternative);

        let before = self.ce.clone();
        let cons_produced = self.compile(cons)?;
        self.emitter.emit_goto(cons_exit);

        self.emitter.bind(alternative);
        let after_cons = mem::replace(&mut self.ce, before);
        let alt_produced = self.compile(alt)?;

        // both paths leave the same kind of value; a fresh string nobody uses is freed
        let produced = if cons_produced == alt_produced || value_type.is_droppable() {
            self.emitter.bind(cons_exit);
            if cons_produced == alt_produced {
                cons_produced
            } else {
                Produced::Plain
            }
        } else if cons_produced == Produced::FreshString {
            self.emitter.emit_goto(end);
            self.emitter.bind(cons_exit);
            self.release_fresh();
            Produced::Plain
        } else {
            self.release_fresh();
            self.emitter.bind(cons_exit);
            Produced::Plain
        };
        self.emitter.bind(end);

        // a branch that always returns does not reach the code after the conditional
        let after_alt = mem::take(&mut self.ce);
        self.ce = match (cons.diverges(), alt.diverges()) {
            (true, false) => after_alt,
            (false, true) => after_cons,
            _ => after_cons.merge(&after_alt),
        };

        Ok(produced)
    }

    /// Free the fresh string on top of the operand stack and leave `undefined` in its place
    fn release_fresh(&mut self) {
        self.emitter.emit(Instruction::DropPop);
        self.emitter.emit(Instruction::Ldc(Value::Undefined));
    }

    fn compile_while(&mut self, pred: &Node, body: &Node) -> Result<Produced, Error> {
        let start = self.emitter.new_label();
        let end = self.emitter.new_label();
        self.emitter.bind(start);
        self.compile(pred)?;
        self.emitter.emit_jof(end);

        let before = self.ce.clone();
        let produced = self.compile(body)?;
        self.discard(produced);
        self.emitter.emit_goto(start);
        self.emitter.bind(end);
        self.emitter.emit(Instruction::Ldc(Value::Undefined));

        // the next iteration would use the moved value
        if let Some(sym) = before.first_moved_in(&self.ce) {
            return Err(Error::UseOfMovedValue(sym));
        }
        Ok(Produced::Plain)
    }
}
