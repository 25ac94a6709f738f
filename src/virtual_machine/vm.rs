//! Dispatch loop.
//!
//! The [`VM`] owns one [`ExecContext`] and an [`InstructionStream`]. Each
//! [`step`](VM::step) decodes the instruction at `pc`, applies its effect,
//! records a [`TraceRecord`] and advances `pc` by the instruction's width
//! (plus the width of the following instruction when a conditional skips it).
//! There is no backward jump, so every run terminates.

pub mod bindings;
pub mod context;
pub mod memory;
pub mod trace;
pub mod worker;

#[cfg(test)]
mod tests;

use crate::virtual_machine::config::VmConfig;
use crate::virtual_machine::errors::{Fault, VMError};
use crate::virtual_machine::files::FileAccess;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{Operand, Value};
use crate::virtual_machine::program::{Decoded, InstructionStream, Slot};
use crate::{info, warn};
use bindings::Bindings;
use context::{ExecContext, RunState};
use memory::MemoryStore;
use trace::{Outcome, TraceRecord};

/// Name every `call` result is bound to.
pub const CALL_RESULT: &str = "result";

/// Decodes operands by declared kind and dispatches to the instruction handler.
///
/// Handlers receive the mnemonic first, then `files` when declared with a
/// `files;` prefix, then one argument per operand:
/// - `Name` -> `String` (identifier taken literally)
/// - `Value` -> evaluated [`Value`]
/// - `Args` -> unevaluated `&[Operand]` list
macro_rules! exec_vm {
    // Entry point
    (
        vm = $vm:ident,
        files = $files:ident,
        decoded = $decoded:ident,
        { $( $variant:ident => $handler:ident $args:tt ),* $(,)? }
    ) => {{
        let instr_name = $decoded.instruction.mnemonic();
        let mut operands = $decoded.operands.iter().enumerate();
        match $decoded.instruction {
            $(
                Instruction::$variant => {
                    exec_vm!(@call $vm, $files, instr_name, operands, $handler, $args)
                }
            ),*
        }
    }};

    // Handler with file access (semicolon separator)
    (@call $vm:ident, $files:ident, $instr_name:ident, $ops:ident, $handler:ident,
        (files; $( $field:ident : $kind:ident ),* $(,)? )
    ) => {{
        $( let $field = exec_vm!(@read $vm, $instr_name, $ops, $kind)?; )*
        $vm.$handler($instr_name, $files, $( $field ),*)
    }};

    // Handler without file access
    (@call $vm:ident, $files:ident, $instr_name:ident, $ops:ident, $handler:ident,
        ( $( $field:ident : $kind:ident ),* $(,)? )
    ) => {{
        $( let $field = exec_vm!(@read $vm, $instr_name, $ops, $kind)?; )*
        $vm.$handler($instr_name, $( $field ),*)
    }};

    (@read $vm:ident, $instr_name:ident, $ops:ident, Name) => {{
        let (position, operand) = next_operand($instr_name, &mut $ops)?;
        read_name($instr_name, position, operand)
    }};

    (@read $vm:ident, $instr_name:ident, $ops:ident, Value) => {{
        let (_, operand) = next_operand($instr_name, &mut $ops)?;
        $vm.eval(operand)
    }};

    (@read $vm:ident, $instr_name:ident, $ops:ident, Args) => {{
        let (position, operand) = next_operand($instr_name, &mut $ops)?;
        read_args($instr_name, position, operand)
    }};
}

fn next_operand<'o>(
    instr: &'static str,
    ops: &mut impl Iterator<Item = (usize, &'o Operand)>,
) -> Result<(usize, &'o Operand), VMError> {
    ops.next().ok_or(VMError::TruncatedInstruction {
        mnemonic: instr,
        expected: 1,
        available: 0,
    })
}

fn read_name(instr: &'static str, position: usize, operand: &Operand) -> Result<String, VMError> {
    match operand {
        Operand::Ident(name) => Ok(name.clone()),
        other => Err(VMError::TypeMismatch {
            mnemonic: instr,
            position,
            expected: "Ident",
            actual: other.type_name(),
        }),
    }
}

fn read_args<'o>(
    instr: &'static str,
    position: usize,
    operand: &'o Operand,
) -> Result<&'o [Operand], VMError> {
    match operand {
        Operand::List(items) => Ok(items),
        other => Err(VMError::TypeMismatch {
            mnemonic: instr,
            position,
            expected: "List",
            actual: other.type_name(),
        }),
    }
}

fn address(instr: &'static str, position: usize, value: &Value) -> Result<u64, VMError> {
    let n = value.as_int(instr, position)?;
    u64::try_from(n).map_err(|_| VMError::TypeMismatch {
        mnemonic: instr,
        position,
        expected: "non-negative Int",
        actual: "Int",
    })
}

/// Final state of a finished (or abandoned) dispatch loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub state: RunState,
    pub bindings: Bindings,
    pub trace: Vec<TraceRecord>,
    pub fault: Option<Fault>,
    pub workers_spawned: usize,
}

impl RunReport {
    /// Text reported by `print` instructions, in order.
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.trace.iter().filter_map(|record| match &record.outcome {
            Outcome::Output(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Instruction-stream interpreter.
///
/// Borrows the immutable [`VmConfig`] and exclusively owns its execution
/// context. File operations go through the [`FileAccess`] passed to each step.
pub struct VM<'c> {
    config: &'c VmConfig,
    stream: InstructionStream,
    ctx: ExecContext,
    trace: Vec<TraceRecord>,
    fault: Option<Fault>,
    workers_spawned: usize,
}

impl<'c> VM<'c> {
    /// Creates a dispatch loop in the `Ready` state with empty bindings.
    pub fn new(config: &'c VmConfig, stream: InstructionStream) -> Self {
        Self::with_bindings(config, stream, Bindings::new())
    }

    /// Creates a dispatch loop seeded with existing bindings.
    pub fn with_bindings(config: &'c VmConfig, stream: InstructionStream, bindings: Bindings) -> Self {
        Self {
            config,
            stream,
            ctx: ExecContext::new(config.memory_mode(), bindings),
            trace: Vec::new(),
            fault: None,
            workers_spawned: 0,
        }
    }

    pub fn state(&self) -> RunState {
        self.ctx.state
    }

    pub fn pc(&self) -> usize {
        self.ctx.pc
    }

    pub fn bindings(&self) -> &Bindings {
        &self.ctx.bindings
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.ctx.memory
    }

    #[cfg(test)]
    pub(crate) fn memory_mut(&mut self) -> &mut MemoryStore {
        &mut self.ctx.memory
    }

    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Number of call workers started by this loop.
    pub fn workers_spawned(&self) -> usize {
        self.workers_spawned
    }

    /// Executes one instruction.
    ///
    /// Returns the state after the step. A step on a halted or faulted
    /// context is refused with [`VMError::ContextTerminated`] and changes
    /// nothing.
    pub fn step<F: FileAccess + ?Sized>(&mut self, files: &mut F) -> Result<RunState, Fault> {
        match self.ctx.state {
            state if state.is_terminated() => {
                return Err(Fault::new(
                    self.ctx.pc,
                    VMError::ContextTerminated {
                        state: state.as_str(),
                    },
                ));
            }
            RunState::Ready => self.ctx.state = RunState::Running,
            _ => {}
        }

        let index = self.ctx.pc;
        if index >= self.stream.len() {
            self.halt();
            return Ok(self.ctx.state);
        }

        let decoded = match self.stream.decode_at(index) {
            Ok(decoded) => decoded,
            Err(error) => {
                let mnemonic = self.describe_slot(index);
                return Err(self.fail(index, mnemonic, Vec::new(), error));
            }
        };

        match self.exec(&decoded, files) {
            Ok(outcome) => {
                let Decoded {
                    instruction,
                    operands,
                } = decoded;
                self.ctx.pc = index + instruction.width() + outcome.skipped();
                let halts = outcome == Outcome::Halt || self.ctx.pc >= self.stream.len();
                self.trace.push(TraceRecord::new(
                    index,
                    instruction.mnemonic(),
                    operands,
                    outcome,
                ));
                if halts {
                    self.halt();
                }
                Ok(self.ctx.state)
            }
            Err(error) => {
                let mnemonic = decoded.instruction.mnemonic().to_string();
                Err(self.fail(index, mnemonic, decoded.operands, error))
            }
        }
    }

    /// Steps until the context halts or faults.
    pub fn run<F: FileAccess + ?Sized>(&mut self, files: &mut F) -> Result<(), Fault> {
        while !self.ctx.state.is_terminated() {
            self.step(files)?;
        }
        match &self.fault {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            state: self.ctx.state,
            bindings: self.ctx.bindings,
            trace: self.trace,
            fault: self.fault,
            workers_spawned: self.workers_spawned,
        }
    }

    fn halt(&mut self) {
        self.ctx.state = RunState::Halted;
        info!("Halted after {} step(s)", self.trace.len());
    }

    fn fail(&mut self, index: usize, mnemonic: String, operands: Vec<Operand>, error: VMError) -> Fault {
        warn!("Fault at instruction {index} ({mnemonic}): {error}");
        self.trace.push(TraceRecord::new(
            index,
            mnemonic,
            operands,
            Outcome::Fault {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
        ));
        self.ctx.state = RunState::Faulted;
        let fault = Fault::new(index, error);
        self.fault = Some(fault.clone());
        fault
    }

    /// Trace label for a slot that failed to decode.
    fn describe_slot(&self, index: usize) -> String {
        match self.stream.slots().get(index) {
            Some(Slot::Op(code)) => match Instruction::try_from(*code) {
                Ok(instr) => instr.mnemonic().to_string(),
                Err(_) => format!("0x{code:02X}"),
            },
            _ => "<operand>".to_string(),
        }
    }

    /// Evaluates an operand in value position.
    fn eval(&self, operand: &Operand) -> Result<Value, VMError> {
        match operand {
            Operand::Lit(value) => Ok(value.clone()),
            Operand::Ident(name) => self.ctx.bindings.get(name).cloned(),
            Operand::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
        }
    }

    fn exec<F: FileAccess + ?Sized>(&mut self, decoded: &Decoded, files: &mut F) -> Result<Outcome, VMError> {
        exec_vm! {
            vm = self,
            files = files,
            decoded = decoded,
            {
                // Lifecycle
                Run => op_marker(),
                Exit => op_exit(),
                // Bindings
                Let => op_let(name: Name, value: Value),
                Assign => op_assign(name: Name, value: Value),
                // Calls and output
                Call => op_call(target: Name, args: Args),
                Print => op_print(value: Value),
                // Control flow
                If => op_branch(cond: Value),
                Else => op_marker(),
                While => op_branch(cond: Value),
                // Integer arithmetic
                Add => op_add(lhs: Value, rhs: Value),
                Sub => op_sub(lhs: Value, rhs: Value),
                Mul => op_mul(lhs: Value, rhs: Value),
                Div => op_div(lhs: Value, rhs: Value),
                // Memory
                Alloc => op_alloc(name: Name, size: Value),
                Free => op_free(addr: Value),
                Load => op_load(name: Name, addr: Value),
                Store => op_store(addr: Value, value: Value),
                // Delegated file access
                ReadFile => op_read_file(files; file: Value),
                WriteFile => op_write_file(files; file: Value, data: Value),
                // Exceptions
                Try => op_marker(),
                Catch => op_catch(exception: Value),
            }
        }
    }

    fn op_marker(&mut self, _instr: &'static str) -> Result<Outcome, VMError> {
        Ok(Outcome::Marker)
    }

    fn op_exit(&mut self, _instr: &'static str) -> Result<Outcome, VMError> {
        Ok(Outcome::Halt)
    }

    fn op_let(&mut self, _instr: &'static str, name: String, value: Value) -> Result<Outcome, VMError> {
        self.ctx.bindings.declare(name.clone(), value.clone());
        Ok(Outcome::Bound { name, value })
    }

    fn op_assign(&mut self, _instr: &'static str, name: String, value: Value) -> Result<Outcome, VMError> {
        self.ctx.bindings.assign(&name, value.clone())?;
        Ok(Outcome::Bound { name, value })
    }

    /// Checks the trust list before evaluating arguments, so an untrusted
    /// target never spawns a worker.
    fn op_call(&mut self, _instr: &'static str, target: String, args: &[Operand]) -> Result<Outcome, VMError> {
        if !self.config.is_trusted(&target) {
            return Err(VMError::UnsafeCall { name: target });
        }
        let args = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>, _>>()?;
        self.workers_spawned += 1;
        let value = worker::spawn_call(&target, args)?;
        self.ctx.bindings.declare(CALL_RESULT, value.clone());
        Ok(Outcome::Bound {
            name: CALL_RESULT.to_string(),
            value,
        })
    }

    fn op_print(&mut self, _instr: &'static str, value: Value) -> Result<Outcome, VMError> {
        Ok(Outcome::Output(value.to_output()))
    }

    /// Falsy condition: skip the whole following instruction. Nothing is
    /// skipped at the end of the stream or when the following instruction
    /// does not fully decode, so the next step faults at its index.
    fn op_branch(&mut self, _instr: &'static str, cond: Value) -> Result<Outcome, VMError> {
        if cond.is_truthy() {
            return Ok(Outcome::Branch {
                taken: true,
                skip: 0,
            });
        }
        let own_width = self.stream.instruction_at(self.ctx.pc)?.width();
        let skip = self
            .stream
            .decode_at(self.ctx.pc + own_width)
            .map_or(0, |next| next.instruction.width());
        Ok(Outcome::Branch {
            taken: false,
            skip: skip as u64,
        })
    }

    fn arith(
        instr: &'static str,
        lhs: &Value,
        rhs: &Value,
        op: fn(i64, i64) -> Value,
    ) -> Result<Outcome, VMError> {
        let a = lhs.as_int(instr, 0)?;
        let b = rhs.as_int(instr, 1)?;
        Ok(Outcome::Computed(op(a, b)))
    }

    fn op_add(&mut self, instr: &'static str, lhs: Value, rhs: Value) -> Result<Outcome, VMError> {
        Self::arith(instr, &lhs, &rhs, |a, b| Value::Int(a.wrapping_add(b)))
    }

    fn op_sub(&mut self, instr: &'static str, lhs: Value, rhs: Value) -> Result<Outcome, VMError> {
        Self::arith(instr, &lhs, &rhs, |a, b| Value::Int(a.wrapping_sub(b)))
    }

    fn op_mul(&mut self, instr: &'static str, lhs: Value, rhs: Value) -> Result<Outcome, VMError> {
        Self::arith(instr, &lhs, &rhs, |a, b| Value::Int(a.wrapping_mul(b)))
    }

    fn op_div(&mut self, instr: &'static str, lhs: Value, rhs: Value) -> Result<Outcome, VMError> {
        Self::arith(instr, &lhs, &rhs, worker::floor_div)
    }

    fn op_alloc(&mut self, instr: &'static str, name: String, size: Value) -> Result<Outcome, VMError> {
        let requested = size.as_int(instr, 1)?;
        let cells = u64::try_from(requested)
            .map_err(|_| VMError::InvalidAllocation { size: requested })?;
        let address = self.ctx.memory.allocate(cells)?;
        self.ctx
            .bindings
            .declare(name.clone(), Value::Int(address as i64));
        Ok(Outcome::Allocated {
            name,
            address,
            size: cells,
        })
    }

    fn op_free(&mut self, instr: &'static str, addr: Value) -> Result<Outcome, VMError> {
        let address = address(instr, 0, &addr)?;
        self.ctx.memory.free(address)?;
        Ok(Outcome::Freed { address })
    }

    fn op_load(&mut self, instr: &'static str, name: String, addr: Value) -> Result<Outcome, VMError> {
        let address = address(instr, 1, &addr)?;
        let value = self.ctx.memory.read(address)?;
        self.ctx.bindings.declare(name.clone(), value.clone());
        Ok(Outcome::Bound { name, value })
    }

    fn op_store(&mut self, instr: &'static str, addr: Value, value: Value) -> Result<Outcome, VMError> {
        let address = address(instr, 0, &addr)?;
        self.ctx.memory.write(address, &value)?;
        Ok(Outcome::Stored { address, value })
    }

    fn op_read_file<F: FileAccess + ?Sized>(
        &mut self,
        instr: &'static str,
        files: &mut F,
        file: Value,
    ) -> Result<Outcome, VMError> {
        let name = file.as_str(instr, 0)?.to_string();
        let value = files.read(&name).map_err(|reason| VMError::FileAccess {
            name: name.clone(),
            reason,
        })?;
        Ok(Outcome::FileRead { file: name, value })
    }

    fn op_write_file<F: FileAccess + ?Sized>(
        &mut self,
        instr: &'static str,
        files: &mut F,
        file: Value,
        data: Value,
    ) -> Result<Outcome, VMError> {
        let name = file.as_str(instr, 0)?.to_string();
        files.write(&name, &data).map_err(|reason| VMError::FileAccess {
            name: name.clone(),
            reason,
        })?;
        Ok(Outcome::FileWritten { file: name, data })
    }

    fn op_catch(&mut self, _instr: &'static str, exception: Value) -> Result<Outcome, VMError> {
        Ok(Outcome::Caught(exception))
    }
}

/// Runs `stream` to completion in a fresh context and returns the report.
pub fn execute<F: FileAccess + ?Sized>(
    config: &VmConfig,
    stream: InstructionStream,
    files: &mut F,
) -> RunReport {
    let mut vm = VM::new(config, stream);
    // The fault, if any, is carried by the report.
    let _ = vm.run(files);
    vm.into_report()
}
