//! Bytecode interpreter.
//!
//! The machine state is fully explicit: an operand stack (OS) of heap addresses, a runtime
//! stack (RTS) of block and call frames, the program counter and the current environment.
//! Guest calls never recurse on the host stack, and `TAIL_CALL` reuses the caller's call
//! frame, so deep tail recursion runs in constant RTS space.

use tracing::trace;

use crate::ast::{BinaryOp, NumberType, UnaryOp, Value};
use crate::builtins::{Builtins, builtin_ops, constants};
use crate::bytecode::{Instruction, Position};
use crate::heap::{Address, Heap};
use crate::{Config, Error};

#[derive(Debug)]
pub struct VirtualMachine {
    heap: Heap,
    builtins: Builtins,
    os: Vec<Address>,
    rts: Vec<Address>,
    pc: usize,
    env: Address,
    step_limit: Option<u64>,
    steps: u64,
    peak_rts: usize,
}

fn runtime(message: impl Into<String>) -> Error {
    Error::Runtime(message.into())
}

/// Arithmetic results must stay within `i32`, the only numeric surface type
fn checked_i32(op: BinaryOp, a: NumberType, b: NumberType, result: NumberType) -> Result<NumberType, Error> {
    if result < NumberType::from(i32::MIN) || result > NumberType::from(i32::MAX) {
        return Err(runtime(format!(
            "attempt to compute `{a} {op} {b}`, which would overflow"
        )));
    }
    Ok(result)
}

impl VirtualMachine {
    /// A machine whose environment holds the builtins frame and then the constants frame
    pub fn new(builtins: Builtins, config: &Config) -> Result<Self, Error> {
        let mut heap = Heap::new(config.heap_capacity)?;
        let builtin_frame = heap.allocate_builtin_frame(builtin_ops())?;
        let constant_frame = heap.allocate_constant_frame(constants())?;
        let empty = heap.allocate_environment(0)?;
        let env = heap.environment_extend(builtin_frame, empty)?;
        let env = heap.environment_extend(constant_frame, env)?;

        Ok(VirtualMachine {
            heap,
            builtins,
            os: Vec::new(),
            rts: Vec::new(),
            pc: 0,
            env,
            step_limit: config.step_limit,
            steps: 0,
            peak_rts: 0,
        })
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Deepest the runtime stack got during the last run
    pub fn peak_rts_depth(&self) -> usize {
        self.peak_rts
    }

    /// Instructions executed so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Execute `instructions` from the first until `DONE`, returning the value on top of the
    /// operand stack (or `undefined` if it is empty).
    pub fn run(&mut self, instructions: &[Instruction]) -> Result<Value, Error> {
        self.pc = 0;
        loop {
            let instruction = instructions
                .get(self.pc)
                .ok_or_else(|| Error::Internal(format!("no instruction at {}", self.pc)))?;
            if *instruction == Instruction::Done {
                break;
            }
            self.steps += 1;
            if self.step_limit.is_some_and(|limit| self.steps > limit) {
                return Err(runtime("step limit exceeded"));
            }
            trace!(
                pc = self.pc,
                %instruction,
                os = self.os.len(),
                rts = self.rts.len(),
                "execute"
            );
            self.pc += 1;
            self.execute(instruction)?;
            self.peak_rts = self.peak_rts.max(self.rts.len());
        }

        match self.os.last() {
            Some(&top) => self.heap.address_to_value(top),
            None => Ok(Value::Undefined),
        }
    }

    fn pop(&mut self) -> Result<Address, Error> {
        self.os
            .pop()
            .ok_or_else(|| Error::Internal("operand stack underflow".into()))
    }

    fn peek(&self) -> Result<Address, Error> {
        self.os
            .last()
            .copied()
            .ok_or_else(|| Error::Internal("operand stack underflow".into()))
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<(), Error> {
        match instruction {
            Instruction::Ldc(value) => {
                let address = self.heap.value_to_address(value)?;
                self.os.push(address);
            }
            Instruction::Ld { pos, .. } => {
                let address = self.heap.get_environment_value(self.env, *pos)?;
                if self.heap.is_unassigned(address) {
                    return Err(runtime("access of unassigned variable"));
                }
                self.os.push(address);
            }
            Instruction::Ldr { pos, .. } => {
                let frame = self.heap.get_child(self.env, pos.frame)?;
                let reference = self.heap.allocate_reference(frame, pos.slot)?;
                self.os.push(reference);
            }
            Instruction::Assign { pos, .. } => {
                let value = self.peek()?;
                self.heap.set_environment_value(self.env, *pos, value)?;
            }
            Instruction::AssignDeref { pos, .. } => {
                let value = self.peek()?;
                let reference = self.heap.get_environment_value(self.env, *pos)?;
                let (frame, slot) = self.heap.reference_target(reference)?;
                self.heap.set_child(frame, slot, value)?;
            }
            Instruction::Unop(op) => {
                let operand = self.pop()?;
                let result = self.apply_unop(*op, operand)?;
                self.os.push(result);
            }
            Instruction::Binop(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = self.apply_binop(*op, left, right)?;
                self.os.push(result);
            }
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Jof(addr) => {
                let predicate = self.pop()?;
                if self.heap.is_false(predicate) {
                    self.pc = *addr;
                }
            }
            Instruction::Goto(addr) => self.pc = *addr,
            Instruction::EnterScope { num } => {
                let blockframe = self.heap.allocate_blockframe(self.env)?;
                self.rts.push(blockframe);
                let frame = self.heap.allocate_frame(*num)?;
                self.env = self.heap.environment_extend(frame, self.env)?;
            }
            Instruction::ExitScope => {
                let blockframe = self
                    .rts
                    .pop()
                    .ok_or_else(|| Error::Internal("runtime stack underflow".into()))?;
                self.env = self.heap.blockframe_environment(blockframe)?;
                self.heap.free_node(blockframe)?;
            }
            Instruction::Ldf { arity, addr } => {
                let arity = u8::try_from(*arity)
                    .map_err(|_| runtime(format!("a function cannot take {arity} parameters")))?;
                let closure = self.heap.allocate_closure(arity, *addr, self.env)?;
                self.os.push(closure);
            }
            Instruction::Call { arity } => self.call(*arity, false)?,
            Instruction::TailCall { arity } => self.call(*arity, true)?,
            Instruction::Reset => self.reset()?,
            Instruction::Drop(slots) => {
                for (sym, pos) in slots {
                    self.drop_slot(sym, *pos)?;
                }
            }
            Instruction::DropPop => {
                let temporary = self.pop()?;
                self.heap.free_node(temporary)?;
            }
            Instruction::Done => {}
        }
        Ok(())
    }

    fn drop_slot(&mut self, sym: &str, pos: Position) -> Result<(), Error> {
        let address = self.heap.get_environment_value(self.env, pos)?;
        trace!(sym, %pos, %address, "drop");
        self.heap.free_node(address)?;
        let unassigned = self.heap.unassigned();
        self.heap.set_environment_value(self.env, pos, unassigned)
    }

    fn apply_unop(&mut self, op: UnaryOp, operand: Address) -> Result<Address, Error> {
        match op {
            UnaryOp::Deref => {
                if self.heap.is_reference(operand) {
                    let (frame, slot) = self.heap.reference_target(operand)?;
                    self.heap.get_child(frame, slot)
                } else {
                    Ok(operand)
                }
            }
            UnaryOp::Neg => match self.heap.address_to_value(operand)? {
                Value::Number(n) => self.heap.allocate_number(checked_i32(
                    BinaryOp::Sub,
                    0.0,
                    n,
                    -n,
                )?),
                other => Err(runtime(format!("- expects number, found: {other}"))),
            },
            UnaryOp::Not => match self.heap.address_to_value(operand)? {
                Value::Bool(b) => Ok(self.heap.boolean(!b)),
                other => Err(runtime(format!("! expects boolean, found: {other}"))),
            },
        }
    }

    fn apply_binop(&mut self, op: BinaryOp, left: Address, right: Address) -> Result<Address, Error> {
        let left = self.heap.address_to_value(left)?;
        let right = self.heap.address_to_value(right)?;

        match (op, &left, &right) {
            (BinaryOp::Eq, _, _) => return Ok(self.heap.boolean(left == right)),
            (BinaryOp::Ne, _, _) => return Ok(self.heap.boolean(left != right)),
            (BinaryOp::Add, Value::String(a), Value::String(b)) => {
                return self.heap.allocate_string(&format!("{a}{b}"));
            }
            _ => {}
        }

        let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
            return Err(runtime(format!(
                "{op} expects two numbers, found: {left}, {right}"
            )));
        };
        let (a, b) = (*a, *b);

        let number = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
                return Err(runtime("attempt to divide by zero"));
            }
            BinaryOp::Div => (a / b).trunc(),
            BinaryOp::Rem => a % b,
            BinaryOp::Lt => return Ok(self.heap.boolean(a < b)),
            BinaryOp::Gt => return Ok(self.heap.boolean(a > b)),
            BinaryOp::Le => return Ok(self.heap.boolean(a <= b)),
            BinaryOp::Ge => return Ok(self.heap.boolean(a >= b)),
            BinaryOp::Eq | BinaryOp::Ne => {
                return Err(Error::Internal(format!("{op} was not handled")));
            }
        };
        let number = checked_i32(op, a, b, number)?;
        self.heap.allocate_number(number)
    }

    /// Pop the callee and its arguments and transfer control to it
    fn call(&mut self, arity: usize, tail: bool) -> Result<(), Error> {
        let split = self
            .os
            .len()
            .checked_sub(arity + 1)
            .ok_or_else(|| Error::Internal("operand stack underflow in call".into()))?;
        let mut operands = self.os.split_off(split);
        let callee = operands.remove(0);
        let args = operands;

        if self.heap.is_builtin(callee) {
            let id = self.heap.builtin_id(callee)?;
            let values = args
                .iter()
                .map(|&arg| self.heap.address_to_value(arg))
                .collect::<Result<Vec<_>, _>>()?;
            self.builtins.call(id, &values)?;
            let result = args.first().copied().unwrap_or(self.heap.undefined());
            self.os.push(result);
            if tail {
                self.reset()?;
            }
            return Ok(());
        }

        if !self.heap.is_closure(callee) {
            let value = self.heap.address_to_value(callee)?;
            return Err(runtime(format!("{value} is not a function")));
        }
        let expected = usize::from(self.heap.closure_arity(callee)?);
        if expected != arity {
            return Err(runtime(format!(
                "expected {expected} arguments, found {arity}"
            )));
        }

        let frame = self.heap.allocate_frame(arity)?;
        for (slot, arg) in args.into_iter().enumerate() {
            self.heap.set_child(frame, slot, arg)?;
        }

        if tail {
            // blocks of the current invocation are finished; its call frame is reused
            while let Some(&top) = self.rts.last()
                && self.heap.is_blockframe(top)
            {
                self.rts.pop();
                self.heap.free_node(top)?;
            }
        } else {
            let callframe = self.heap.allocate_callframe(self.env, self.pc)?;
            self.rts.push(callframe);
        }

        let closure_env = self.heap.closure_environment(callee)?;
        self.env = self.heap.environment_extend(frame, closure_env)?;
        self.pc = self.heap.closure_pc(callee)?;
        Ok(())
    }

    /// Unwind to the nearest call frame and return to its caller
    fn reset(&mut self) -> Result<(), Error> {
        loop {
            let top = self
                .rts
                .pop()
                .ok_or_else(|| runtime("return outside of a function call"))?;
            if self.heap.is_callframe(top) {
                self.pc = self.heap.callframe_pc(top)?;
                self.env = self.heap.callframe_environment(top)?;
                self.heap.free_node(top)?;
                return Ok(());
            }
            self.heap.free_node(top)?;
        }
    }
}
