//! Instruction set and the two-pass emitter that produces it.
//!
//! Instructions address variables by compile-time [`Position`]s and jumps by absolute
//! instruction index. The emitter hands out [`Label`]s for forward jumps and patches them
//! once the whole program has been emitted.

use std::fmt;

use crate::Error;
use crate::ast::{BinaryOp, UnaryOp, Value};
pub use crate::heap::Position;

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Push a literal
    Ldc(Value),
    /// Push the value in a slot
    Ld { sym: String, pos: Position },
    /// Push a reference to a slot
    Ldr { sym: String, pos: Position },
    /// Store the top of the operand stack in a slot, leaving it in place
    Assign { sym: String, pos: Position },
    /// Store the top of the operand stack through the reference held in a slot
    AssignDeref { sym: String, pos: Position },
    Unop(UnaryOp),
    Binop(BinaryOp),
    Pop,
    /// Jump if the popped value is `false`
    Jof(usize),
    Goto(usize),
    EnterScope { num: usize },
    ExitScope,
    /// Push a closure whose code starts at `addr`
    Ldf { arity: usize, addr: usize },
    Call { arity: usize },
    TailCall { arity: usize },
    /// Return to the nearest call frame
    Reset,
    /// Free the values held by these slots
    Drop(Vec<(String, Position)>),
    /// Pop and free a temporary
    DropPop,
    Done,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Ldc(Value::String(s)) => write!(f, "LDC {s:?}"),
            Instruction::Ldc(value) => write!(f, "LDC {value}"),
            Instruction::Ld { sym, pos } => write!(f, "LD {sym} {pos}"),
            Instruction::Ldr { sym, pos } => write!(f, "LDR {sym} {pos}"),
            Instruction::Assign { sym, pos } => write!(f, "ASSIGN {sym} {pos}"),
            Instruction::AssignDeref { sym, pos } => write!(f, "ASSIGN_DEREF {sym} {pos}"),
            Instruction::Unop(op) => write!(f, "UNOP {op}"),
            Instruction::Binop(op) => write!(f, "BINOP {op}"),
            Instruction::Pop => write!(f, "POP"),
            Instruction::Jof(addr) => write!(f, "JOF {addr}"),
            Instruction::Goto(addr) => write!(f, "GOTO {addr}"),
            Instruction::EnterScope { num } => write!(f, "ENTER_SCOPE {num}"),
            Instruction::ExitScope => write!(f, "EXIT_SCOPE"),
            Instruction::Ldf { arity, addr } => write!(f, "LDF {arity} {addr}"),
            Instruction::Call { arity } => write!(f, "CALL {arity}"),
            Instruction::TailCall { arity } => write!(f, "TAIL_CALL {arity}"),
            Instruction::Reset => write!(f, "RESET"),
            Instruction::Drop(slots) => {
                write!(f, "DROP")?;
                for (sym, pos) in slots {
                    write!(f, " {sym}{pos}")?;
                }
                Ok(())
            }
            Instruction::DropPop => write!(f, "DROP_POP"),
            Instruction::Done => write!(f, "DONE"),
        }
    }
}

/// Render a program one instruction per line, prefixed by its index
pub fn disassemble(instructions: &[Instruction]) -> String {
    instructions
        .iter()
        .enumerate()
        .map(|(i, instruction)| format!("{i:>4}: {instruction}\n"))
        .collect()
}

/// A jump target that may not have an address yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Label(usize);

#[derive(Debug, Default)]
pub(crate) struct Emitter {
    code: Vec<Instruction>,
    labels: Vec<Option<usize>>,
    patches: Vec<(usize, Label)>,
}

impl Emitter {
    pub(crate) fn new() -> Self {
        Emitter::default()
    }

    /// Index the next instruction will get
    pub(crate) fn len(&self) -> usize {
        self.code.len()
    }

    pub(crate) fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    pub(crate) fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next instruction index
    pub(crate) fn bind(&mut self, label: Label) {
        if let Some(target) = self.labels.get_mut(label.0) {
            *target = Some(self.code.len());
        }
    }

    pub(crate) fn emit_goto(&mut self, label: Label) {
        self.patches.push((self.code.len(), label));
        self.code.push(Instruction::Goto(0));
    }

    pub(crate) fn emit_jof(&mut self, label: Label) {
        self.patches.push((self.code.len(), label));
        self.code.push(Instruction::Jof(0));
    }

    /// Resolve every jump to its label's address
    pub(crate) fn finish(mut self) -> Result<Vec<Instruction>, Error> {
        for (index, label) in self.patches {
            let target = self
                .labels
                .get(label.0)
                .copied()
                .flatten()
                .ok_or_else(|| Error::Internal(format!("jump at {index} to unbound label")))?;
            match self.code.get_mut(index) {
                Some(Instruction::Goto(addr) | Instruction::Jof(addr)) => *addr = target,
                other => {
                    return Err(Error::Internal(format!(
                        "cannot patch a jump into {other:?} at {index}"
                    )));
                }
            }
        }
        Ok(self.code)
    }
}
