//! Minimal stack VM satisfying the contract consumed by the core (§6, §H)
//!
//! The core only requires that a step returns one of
//! `{OK, YIELD, WAITING, ERROR, HALTED}`, counts reductions against a
//! configurable limit, and exposes stack/globals for inspection. This gives
//! that contract a concrete instantiation so the end-to-end scenarios in
//! §8 have something to actually run.

use std::collections::HashMap;

use crate::bytecode::{Bytecode, Op};
use crate::error::BytecodeError;
use crate::types::{Pid, SendResult, SpawnOutcome, VmOutcome};
use crate::value::Value;

/// Operations a running VM needs from whatever owns it (a [`crate::block::Block`]
/// wired to a scheduler). Kept as a trait so `vm.rs` has no dependency on
/// `block.rs` or `scheduler.rs`.
pub trait VmHost {
    fn self_pid(&self) -> Pid;
    fn spawn_block(&self, code: Bytecode, caps: u32) -> SpawnOutcome;
    fn send(&self, target: Pid, value: Value) -> SendResult;
    /// Non-blocking pop. Returning `None` means "no message right now" —
    /// the VM will transition to `WAITING` via its returned outcome.
    fn receive(&self) -> Option<Value>;
}

pub struct Vm {
    code: Bytecode,
    pc: usize,
    stack: Vec<Value>,
    globals: HashMap<String, Value>,
    reduction_limit: u64,
    reductions: u64,
    error: Option<BytecodeError>,
    halted: bool,
}

impl Vm {
    pub fn new(code: Bytecode) -> Self {
        Vm {
            code,
            pc: 0,
            stack: Vec::new(),
            globals: HashMap::new(),
            reduction_limit: 10_000,
            reductions: 0,
            error: None,
            halted: false,
        }
    }

    pub fn set_reduction_limit(&mut self, limit: u64) {
        self.reduction_limit = limit;
    }

    /// Reductions actually consumed during the most recent [`Vm::run`] call.
    pub fn reductions_this_slice(&self) -> u64 {
        self.reductions
    }

    /// `vm_error(vm) → string?` (§6 VM contract). Stored internally as a
    /// typed [`BytecodeError`] and stringified here so the public surface
    /// matches the contract's signature.
    pub fn error(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    pub(crate) fn typed_error(&self) -> Option<&BytecodeError> {
        self.error.as_ref()
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn peek(&self, distance: usize) -> Option<&Value> {
        if distance >= self.stack.len() {
            return None;
        }
        self.stack.get(self.stack.len() - 1 - distance)
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    pub fn globals(&self) -> &HashMap<String, Value> {
        &self.globals
    }

    pub fn set_global(&mut self, key: impl Into<String>, value: Value) {
        self.globals.insert(key.into(), value);
    }

    /// Run one time slice, executing instructions until yield, halt, error,
    /// waiting, or reduction exhaustion (§5 Preemption).
    pub fn run(&mut self, host: &dyn VmHost) -> VmOutcome {
        if self.halted {
            return VmOutcome::Halted;
        }
        self.reductions = 0;

        loop {
            let ops_len = self.code.main().ops.len();
            if self.pc >= ops_len {
                self.halted = true;
                return VmOutcome::Halted;
            }
            if self.reductions >= self.reduction_limit {
                return VmOutcome::Yield;
            }

            let op = self.code.main().ops[self.pc].clone();
            self.pc += 1;
            self.reductions += 1;

            match op {
                Op::PushInt(i) => self.push(Value::Int(i)),
                Op::PushStr(s) => self.push(Value::Str(s)),
                Op::Pop => {
                    if self.pop().is_none() {
                        return self.fail("pop from empty stack");
                    }
                }
                Op::Dup => match self.peek(0) {
                    Some(v) => {
                        let v = v.clone();
                        self.push(v);
                    }
                    None => return self.fail("dup from empty stack"),
                },
                Op::Swap => {
                    let len = self.stack.len();
                    if len < 2 {
                        return self.fail("swap requires two stack elements");
                    }
                    self.stack.swap(len - 1, len - 2);
                }
                Op::Add => {
                    let (b, a) = match (self.pop(), self.pop()) {
                        (Some(b), Some(a)) => (b, a),
                        _ => return self.fail("stack underflow in add"),
                    };
                    match (a.as_int(), b.as_int()) {
                        (Some(a), Some(b)) => self.push(Value::Int(a + b)),
                        _ => return self.fail("add requires two integers"),
                    }
                }
                Op::Eq => {
                    let (b, a) = match (self.pop(), self.pop()) {
                        (Some(b), Some(a)) => (b, a),
                        _ => return self.fail("stack underflow in eq"),
                    };
                    self.push(Value::Bool(a == b));
                }
                Op::Jump(target) => {
                    if target > ops_len {
                        return self.fail("jump target out of range");
                    }
                    self.pc = target;
                }
                Op::JumpIfFalse(target) => {
                    let cond = match self.pop() {
                        Some(Value::Bool(b)) => b,
                        Some(_) => return self.fail("jump_if_false requires a boolean"),
                        None => return self.fail("stack underflow in jump_if_false"),
                    };
                    if !cond {
                        if target > ops_len {
                            return self.fail("jump target out of range");
                        }
                        self.pc = target;
                    }
                }
                Op::Spawn(func_index, caps) => {
                    let chunk = match self.code.function(func_index) {
                        Some(c) => c.clone(),
                        None => return self.fail_typed(BytecodeError::InvalidFunction(func_index)),
                    };
                    let child_code = Bytecode::new(chunk);
                    match host.spawn_block(child_code, caps) {
                        SpawnOutcome::Spawned(pid) => self.push(Value::Pid(pid)),
                        // A capability denial is recoverable for a TRAP_EXIT
                        // block: the op's failure value (an invalid pid) is
                        // pushed instead of terminating the block.
                        SpawnOutcome::CapabilityDenied => self.push(Value::Pid(Pid::INVALID)),
                        SpawnOutcome::Rejected => return self.fail("spawn denied or rejected by scheduler"),
                    }
                }
                Op::Send => {
                    let (value, target) = match (self.pop(), self.pop()) {
                        (Some(v), Some(Value::Pid(p))) => (v, p),
                        (Some(_), Some(_)) => return self.fail("send target must be a pid"),
                        _ => return self.fail("stack underflow in send"),
                    };
                    let result = host.send(target, value);
                    self.push(Value::Bool(result == SendResult::Ok));
                }
                Op::GetField(key) => {
                    let value = match self.pop() {
                        Some(v) => v,
                        None => return self.fail("stack underflow in get_field"),
                    };
                    let field = value.get(&key).cloned().unwrap_or(Value::Null);
                    self.push(field);
                }
                Op::Receive => match host.receive() {
                    Some(msg) => self.push(msg),
                    None => return VmOutcome::Waiting,
                },
                Op::Yield => return VmOutcome::Yield,
                Op::SelfPid => self.push(Value::Pid(host.self_pid())),
                Op::Halt => {
                    self.halted = true;
                    return VmOutcome::Halted;
                }
            }
        }
    }

    fn fail(&mut self, message: &str) -> VmOutcome {
        self.fail_typed(BytecodeError::Vm(message.to_string()))
    }

    fn fail_typed(&mut self, err: BytecodeError) -> VmOutcome {
        self.error = Some(err);
        VmOutcome::Error
    }
}
