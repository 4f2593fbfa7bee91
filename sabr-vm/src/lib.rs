//! The sabr virtual machine.
//!
//! A register-less stack machine over the flat bytecode: a data stack of
//! [`Value`]s, a switch-subject stack, for-loop frames, call frames with
//! scoped local dictionaries, and one linear memory pool. The dispatch loop
//! fetches the op at `pc` and lets the handler decide where execution goes
//! next; stack discipline is the program's responsibility, underflow is a
//! fatal error surfaced to the caller.

pub mod pool;

use std::{
    collections::HashMap,
    io::{self, BufRead, BufReader, Read, Write},
};

use indexmap::IndexMap;
use sabr_bytecode::{Bytecode, Op, Opcode};
use sabr_foundation::value::Value;
use thiserror::Error;

pub use pool::MemoryPool;

/// Cells in the memory pool unless the embedder chooses otherwise.
pub const DEFAULT_POOL_SIZE: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("data stack underflow")]
    DataStackUnderflow,
    #[error("switch stack underflow")]
    SwitchStackUnderflow,
    #[error("for-loop op outside a for loop")]
    StrayForOp,
    #[error("return without a call frame")]
    CallStackUnderflow,
    #[error("local scope ends without beginning")]
    StrayLocalEnd,
    #[error("member op outside a datagroup")]
    StrayMemberOp,
    #[error("array op outside an array literal")]
    StrayArrayOp,
    #[error("memory pool exhausted")]
    MemoryPoolExhausted,
    #[error("invalid memory pool operation")]
    InvalidPoolOperation,
    #[error("address {address} is outside the memory pool")]
    AddressOutOfRange { address: u64 },
    #[error("division by zero")]
    DivisionByZero,
    #[error("jump target {target} is not an op boundary")]
    InvalidJump { target: u64 },
    #[error("word #{id} is not defined")]
    UndefinedWord { id: u64 },
    #[error("word #{id} cannot be used this way")]
    InvalidBinding { id: u64 },
    #[error("for-loop type {0} is unknown")]
    InvalidForType(u64),
    #[error("value {value:#x} is not a character")]
    InvalidCharacter { value: u64 },
    #[error("invalid console input")]
    InvalidInput,
    #[error("built-in function {module}:{func} is not registered")]
    UnknownBif { module: u64, func: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What an identifier is bound to at runtime.
#[derive(Debug, Clone)]
pub enum Binding {
    /// A plain value; executing the word pushes it.
    Value(Value),
    /// A callable body; executing the word calls it.
    Lambda { addr: u64 },
    /// A pool address; executing the word fetches through it.
    Ref { addr: u64 },
    /// A struct layout; executing the word allocates an instance.
    Datagroup { members: Vec<u64> },
}

#[derive(Debug, Clone, Copy)]
enum ForKind {
    Signed,
    Unsigned,
    Float,
}

#[derive(Debug, Clone, Copy)]
struct ForFrame {
    kind: ForKind,
    current: Value,
    end: Value,
    step: Value,
    has_to: bool,
}

impl ForFrame {
    fn new(kind: ForKind) -> Self {
        let step = match kind {
            ForKind::Signed => Value::from_i64(1),
            ForKind::Unsigned => Value::from_u64(1),
            ForKind::Float => Value::from_f64(1.0),
        };
        Self {
            kind,
            current: Value::ZERO,
            end: Value::ZERO,
            step,
            has_to: false,
        }
    }

    /// Counting up runs while `current < end`, counting down while
    /// `current > end`; without `to` the loop only exits via `break`.
    fn should_continue(&self) -> bool {
        if !self.has_to {
            return true;
        }
        match self.kind {
            ForKind::Signed => {
                if self.step.as_i64() >= 0 {
                    self.current.as_i64() < self.end.as_i64()
                } else {
                    self.current.as_i64() > self.end.as_i64()
                }
            }
            ForKind::Unsigned => {
                if self.step.as_i64() >= 0 {
                    self.current.as_u64() < self.end.as_u64()
                } else {
                    self.current.as_u64() > self.end.as_u64()
                }
            }
            ForKind::Float => {
                if self.step.as_f64() >= 0.0 {
                    self.current.as_f64() < self.end.as_f64()
                } else {
                    self.current.as_f64() > self.end.as_f64()
                }
            }
        }
    }

    fn advance(&mut self) {
        self.current = match self.kind {
            ForKind::Signed | ForKind::Unsigned => {
                Value::from_i64(self.current.as_i64().wrapping_add(self.step.as_i64()))
            }
            ForKind::Float => Value::from_f64(self.current.as_f64() + self.step.as_f64()),
        };
    }
}

#[derive(Debug, Clone, Copy)]
struct CallFrame {
    return_pos: u64,
    locals_depth: usize,
    sizes_depth: usize,
}

/// A built-in function invoked through `call_bif`.
pub type BifFn = for<'io> fn(&mut Vm<'io>) -> Result<(), RuntimeError>;

enum Flow {
    Next,
    JumpTo(usize),
    Exit,
}

pub struct Vm<'io> {
    data_stack: Vec<Value>,
    switch_stack: Vec<Value>,
    for_stack: Vec<ForFrame>,
    call_stack: Vec<CallFrame>,
    globals: IndexMap<u64, Binding>,
    locals: Vec<IndexMap<u64, Binding>>,
    /// Per-scope `allot` totals; the base entry belongs to the top level.
    local_sizes: Vec<u64>,
    group_builds: Vec<(u64, Vec<u64>)>,
    array_builds: Vec<Vec<Value>>,
    pool: MemoryPool,
    bifs: HashMap<(u64, u64), BifFn>,
    input: Box<dyn BufRead + 'io>,
    output: Box<dyn Write + 'io>,
}

impl Vm<'static> {
    pub fn new(pool_size: usize) -> Self {
        Vm::with_io(
            pool_size,
            Box::new(BufReader::new(io::stdin())),
            Box::new(io::stdout()),
        )
    }
}

impl<'io> Vm<'io> {
    pub fn with_io(
        pool_size: usize,
        input: Box<dyn BufRead + 'io>,
        output: Box<dyn Write + 'io>,
    ) -> Self {
        Self {
            data_stack: vec![],
            switch_stack: vec![],
            for_stack: vec![],
            call_stack: vec![],
            globals: IndexMap::new(),
            locals: vec![],
            local_sizes: vec![0],
            group_builds: vec![],
            array_builds: vec![],
            pool: MemoryPool::new(pool_size),
            bifs: HashMap::new(),
            input,
            output,
        }
    }

    /// Registers a built-in function under a `(module, function)` pair.
    pub fn register_bif(&mut self, module: u64, func: u64, f: BifFn) {
        self.bifs.insert((module, func), f);
    }

    pub fn data_stack(&self) -> &[Value] {
        &self.data_stack
    }

    pub fn push(&mut self, value: Value) {
        self.data_stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.data_stack.pop().ok_or(RuntimeError::DataStackUnderflow)
    }

    pub fn memory(&mut self) -> &mut MemoryPool {
        &mut self.pool
    }

    pub fn run(&mut self, bytecode: &Bytecode) -> Result<(), RuntimeError> {
        tracing::debug!(ops = bytecode.ops().len(), "running");
        let mut index = 0usize;
        while index < bytecode.ops().len() {
            let op = bytecode.op(index);
            match self.step(op, index, bytecode)? {
                Flow::Next => index += 1,
                Flow::JumpTo(target) => index = target,
                Flow::Exit => break,
            }
        }
        self.output.flush()?;
        Ok(())
    }

    fn resolve(bytecode: &Bytecode, pos: u64) -> Result<usize, RuntimeError> {
        if pos == bytecode.current_pos() {
            return Ok(bytecode.ops().len());
        }
        bytecode
            .index_of_pos(pos)
            .ok_or(RuntimeError::InvalidJump { target: pos })
    }

    fn jump(bytecode: &Bytecode, pos: u64) -> Result<Flow, RuntimeError> {
        Ok(Flow::JumpTo(Self::resolve(bytecode, pos)?))
    }

    fn step(&mut self, op: Op, index: usize, bytecode: &Bytecode) -> Result<Flow, RuntimeError> {
        use Opcode as O;

        match op.opcode {
            O::None => (),
            O::Exit => return Ok(Flow::Exit),

            O::Value => self.push(op.operand),

            O::If => {
                let condition = self.pop()?;
                if condition.is_zero() {
                    return Self::jump(bytecode, op.operand.as_u64());
                }
            }
            O::Jump => return Self::jump(bytecode, op.operand.as_u64()),

            O::For => {
                let kind = match op.operand.as_u64() {
                    0 => ForKind::Signed,
                    1 => ForKind::Unsigned,
                    2 => ForKind::Float,
                    other => return Err(RuntimeError::InvalidForType(other)),
                };
                self.for_stack.push(ForFrame::new(kind));
            }
            O::ForFrom => {
                let value = self.pop()?;
                self.for_frame()?.current = value;
            }
            O::ForTo => {
                let value = self.pop()?;
                let frame = self.for_frame()?;
                frame.end = value;
                frame.has_to = true;
            }
            O::ForStep => {
                let value = self.pop()?;
                self.for_frame()?.step = value;
            }
            O::ForCheck => {
                let frame = *self.for_frame()?;
                if frame.should_continue() {
                    self.push(frame.current);
                } else {
                    return Self::jump(bytecode, op.operand.as_u64());
                }
            }
            O::ForNext => {
                self.for_frame()?.advance();
                return Self::jump(bytecode, op.operand.as_u64());
            }
            O::ForEnd => {
                self.for_stack.pop().ok_or(RuntimeError::StrayForOp)?;
            }

            O::Switch => {
                let subject = self.pop()?;
                self.switch_stack.push(subject);
            }
            O::SwitchCase => {
                let subject = *self
                    .switch_stack
                    .last()
                    .ok_or(RuntimeError::SwitchStackUnderflow)?;
                self.push(subject);
            }
            O::SwitchEnd => {
                self.switch_stack
                    .pop()
                    .ok_or(RuntimeError::SwitchStackUnderflow)?;
            }

            O::Lambda => {
                let body = bytecode.position_of(index) + 9;
                self.push(Value::from_u64(body));
                return Self::jump(bytecode, op.operand.as_u64());
            }
            O::Return => {
                let frame = self
                    .call_stack
                    .pop()
                    .ok_or(RuntimeError::CallStackUnderflow)?;
                self.unwind_scopes(frame)?;
                return Self::jump(bytecode, frame.return_pos);
            }
            O::Local => {
                self.locals.push(IndexMap::new());
                self.local_sizes.push(0);
            }
            O::LocalEnd => {
                if self.locals.pop().is_none() {
                    return Err(RuntimeError::StrayLocalEnd);
                }
                let size = self.local_sizes.pop().ok_or(RuntimeError::StrayLocalEnd)?;
                self.pool.free_local(size)?;
            }
            O::Define => {
                let addr = self.pop()?.as_u64();
                let id = self.pop()?.as_u64();
                self.globals.insert(id, Binding::Lambda { addr });
            }

            O::Datagroup => {
                let id = self.pop()?.as_u64();
                self.group_builds
                    .push((id, Vec::with_capacity(op.operand.as_u64() as usize)));
            }
            O::Member => {
                let member = self.pop()?.as_u64();
                self.group_builds
                    .last_mut()
                    .ok_or(RuntimeError::StrayMemberOp)?
                    .1
                    .push(member);
            }
            O::DatagroupEnd => {
                let (id, members) = self
                    .group_builds
                    .pop()
                    .ok_or(RuntimeError::StrayMemberOp)?;
                self.globals.insert(id, Binding::Datagroup { members });
            }
            O::DatagroupExec => {
                let id = self.pop()?.as_u64();
                return self.instantiate(id);
            }

            O::Set => {
                let id = self.pop()?.as_u64();
                let value = self.pop()?;
                self.bind(id, Binding::Value(value));
            }
            O::Exec => {
                let id = op.operand.as_u64();
                if id == 0 {
                    let addr = self.pop()?.as_u64();
                    return self.call(addr, index, bytecode);
                }
                match self.find(id)? {
                    Binding::Value(value) => self.push(value),
                    Binding::Lambda { addr } => return self.call(addr, index, bytecode),
                    Binding::Ref { addr } => {
                        let value = self.pool.read(addr)?;
                        self.push(value);
                    }
                    Binding::Datagroup { .. } => return self.instantiate(id),
                }
            }
            O::Addr => {
                let id = self.pop()?.as_u64();
                match self.find(id)? {
                    Binding::Value(value) => self.push(value),
                    Binding::Lambda { addr } | Binding::Ref { addr } => {
                        self.push(Value::from_u64(addr))
                    }
                    Binding::Datagroup { .. } => {
                        return Err(RuntimeError::InvalidBinding { id })
                    }
                }
            }
            O::Ref => {
                let id = self.pop()?.as_u64();
                let addr = self.pop()?.as_u64();
                self.bind(id, Binding::Ref { addr });
            }

            O::CallBif => {
                let func = self.pop()?.as_u64();
                let module = self.pop()?.as_u64();
                let f = *self
                    .bifs
                    .get(&(module, func))
                    .ok_or(RuntimeError::UnknownBif { module, func })?;
                f(self)?;
            }

            O::Add => self.binary_i64(|a, b| Ok(a.wrapping_add(b)))?,
            O::Sub => self.binary_i64(|a, b| Ok(a.wrapping_sub(b)))?,
            O::Mul => self.binary_i64(|a, b| Ok(a.wrapping_mul(b)))?,
            O::Div => self.binary_i64(|a, b| a.checked_div(b).ok_or(RuntimeError::DivisionByZero))?,
            O::Mod => self.binary_i64(|a, b| a.checked_rem(b).ok_or(RuntimeError::DivisionByZero))?,
            O::Udiv => {
                self.binary_u64(|a, b| a.checked_div(b).ok_or(RuntimeError::DivisionByZero))?
            }
            O::Umod => {
                self.binary_u64(|a, b| a.checked_rem(b).ok_or(RuntimeError::DivisionByZero))?
            }
            O::Neg => self.unary(|v| Value::from_i64(v.as_i64().wrapping_neg()))?,
            O::Inc => self.unary(|v| Value::from_i64(v.as_i64().wrapping_add(1)))?,
            O::Dec => self.unary(|v| Value::from_i64(v.as_i64().wrapping_sub(1)))?,

            O::Equ => self.compare(|a, b| a.as_u64() == b.as_u64())?,
            O::Neq => self.compare(|a, b| a.as_u64() != b.as_u64())?,
            O::Grt => self.compare(|a, b| a.as_i64() > b.as_i64())?,
            O::Geq => self.compare(|a, b| a.as_i64() >= b.as_i64())?,
            O::Lst => self.compare(|a, b| a.as_i64() < b.as_i64())?,
            O::Leq => self.compare(|a, b| a.as_i64() <= b.as_i64())?,
            O::Ugrt => self.compare(|a, b| a.as_u64() > b.as_u64())?,
            O::Ugeq => self.compare(|a, b| a.as_u64() >= b.as_u64())?,
            O::Ulst => self.compare(|a, b| a.as_u64() < b.as_u64())?,
            O::Uleq => self.compare(|a, b| a.as_u64() <= b.as_u64())?,

            O::Fadd => self.binary_f64(|a, b| a + b)?,
            O::Fsub => self.binary_f64(|a, b| a - b)?,
            O::Fmul => self.binary_f64(|a, b| a * b)?,
            O::Fdiv => self.binary_f64(|a, b| a / b)?,
            O::Fmod => self.binary_f64(|a, b| a % b)?,
            O::Fneg => self.unary(|v| Value::from_f64(-v.as_f64()))?,
            O::Fequ => self.compare(|a, b| a.as_f64() == b.as_f64())?,
            O::Fneq => self.compare(|a, b| a.as_f64() != b.as_f64())?,
            O::Fgrt => self.compare(|a, b| a.as_f64() > b.as_f64())?,
            O::Fgeq => self.compare(|a, b| a.as_f64() >= b.as_f64())?,
            O::Flst => self.compare(|a, b| a.as_f64() < b.as_f64())?,
            O::Fleq => self.compare(|a, b| a.as_f64() <= b.as_f64())?,

            O::Band => self.binary_u64(|a, b| Ok(a & b))?,
            O::Bor => self.binary_u64(|a, b| Ok(a | b))?,
            O::Bxor => self.binary_u64(|a, b| Ok(a ^ b))?,
            O::Bnot => self.unary(|v| Value::from_u64(!v.as_u64()))?,
            O::Blsft => self.binary_u64(|a, b| Ok(a.wrapping_shl(b as u32)))?,
            O::Brsft => self.binary_u64(|a, b| Ok(a.wrapping_shr(b as u32)))?,

            O::Drop => self.shuffle(1, &[])?,
            O::Nip => self.shuffle(2, &[1])?,
            O::Dup => self.shuffle(1, &[0, 0])?,
            O::Over => self.shuffle(2, &[0, 1, 0])?,
            O::Tuck => self.shuffle(2, &[1, 0, 1])?,
            O::Swap => self.shuffle(2, &[1, 0])?,
            O::Rot => self.shuffle(3, &[1, 2, 0])?,
            O::Tdrop => self.shuffle(4, &[])?,
            O::Tnip => self.shuffle(4, &[2, 3])?,
            O::Tdup => self.shuffle(2, &[0, 1, 0, 1])?,
            O::Tover => self.shuffle(4, &[0, 1, 2, 3, 0, 1])?,
            O::Ttuck => self.shuffle(4, &[2, 3, 0, 1, 2, 3])?,
            O::Tswap => self.shuffle(4, &[2, 3, 0, 1])?,
            O::Trot => self.shuffle(6, &[2, 3, 4, 5, 0, 1])?,

            O::Alloc => {
                let count = self.pop()?.as_u64();
                let base = self.pool.alloc_global(count)?;
                self.push(Value::from_u64(base));
            }
            O::Resize => {
                let count = self.pop()?.as_u64();
                let base = self.pop()?.as_u64();
                self.pool.resize_global(base, count)?;
                self.push(Value::from_u64(base));
            }
            O::Free => {
                let count = self.pop()?.as_u64();
                self.pool.free_global(count)?;
            }
            O::Allot => {
                let count = self.pop()?.as_u64();
                let base = self.pool.alloc_local(count)?;
                *self
                    .local_sizes
                    .last_mut()
                    .expect("the base size entry is never popped") += count;
                self.push(Value::from_u64(base));
            }
            O::Fetch => {
                let address = self.pop()?.as_u64();
                let value = self.pool.read(address)?;
                self.push(value);
            }
            O::Store => {
                let address = self.pop()?.as_u64();
                let value = self.pop()?;
                self.pool.write(address, value)?;
            }

            O::Array => self.array_builds.push(vec![]),
            O::ArrayComma => {
                let value = self.pop()?;
                self.array_builds
                    .last_mut()
                    .ok_or(RuntimeError::StrayArrayOp)?
                    .push(value);
            }
            O::ArrayEnd => {
                let values = self.array_builds.pop().ok_or(RuntimeError::StrayArrayOp)?;
                let base = self.store_array(&values)?;
                self.push(Value::from_u64(base));
            }

            O::Itof => self.unary(|v| Value::from_f64(v.as_i64() as f64))?,
            O::Utof => self.unary(|v| Value::from_f64(v.as_u64() as f64))?,
            O::Ftoi => self.unary(|v| Value::from_i64(v.as_f64() as i64))?,
            O::Ftou => self.unary(|v| Value::from_u64(v.as_f64() as u64))?,

            O::Getc => {
                self.output.flush()?;
                let value = match self.read_char()? {
                    Some(c) => Value::from_u64(c as u64),
                    None => Value::from_i64(-1),
                };
                self.push(value);
            }
            O::Geti => {
                let line = self.read_line()?;
                let value: i64 = line.trim().parse().map_err(|_| RuntimeError::InvalidInput)?;
                self.push(Value::from_i64(value));
            }
            O::Getu => {
                let line = self.read_line()?;
                let value: u64 = line.trim().parse().map_err(|_| RuntimeError::InvalidInput)?;
                self.push(Value::from_u64(value));
            }
            O::Getf => {
                let line = self.read_line()?;
                let value: f64 = line.trim().parse().map_err(|_| RuntimeError::InvalidInput)?;
                self.push(Value::from_f64(value));
            }
            O::Gets => {
                let line = self.read_line()?;
                let values: Vec<Value> = line
                    .trim_end_matches(['\r', '\n'])
                    .chars()
                    .map(|c| Value::from_u64(c as u64))
                    .collect();
                let base = self.store_array(&values)?;
                self.push(Value::from_u64(base));
            }

            O::Putc => {
                let value = self.pop()?;
                let c = Self::to_char(value)?;
                write!(self.output, "{c}")?;
            }
            O::Puti => {
                let value = self.pop()?;
                write!(self.output, "{}", value.as_i64())?;
            }
            O::Putu => {
                let value = self.pop()?;
                write!(self.output, "{}", value.as_u64())?;
            }
            O::Putf => {
                let value = self.pop()?;
                write!(self.output, "{:?}", value.as_f64())?;
            }
            O::Puts => {
                let base = self.pop()?.as_u64();
                let length = self.pool.read(base)?.as_u64();
                for offset in 0..length {
                    let c = Self::to_char(self.pool.read(base + 1 + offset)?)?;
                    write!(self.output, "{c}")?;
                }
            }
            O::Show => {
                let rendered: Vec<String> = self
                    .data_stack
                    .iter()
                    .map(|v| v.as_u64().to_string())
                    .collect();
                writeln!(self.output, "[{}]", rendered.join(" "))?;
            }
        }
        Ok(Flow::Next)
    }

    fn for_frame(&mut self) -> Result<&mut ForFrame, RuntimeError> {
        self.for_stack.last_mut().ok_or(RuntimeError::StrayForOp)
    }

    fn find(&self, id: u64) -> Result<Binding, RuntimeError> {
        self.locals
            .last()
            .and_then(|local| local.get(&id))
            .or_else(|| self.globals.get(&id))
            .cloned()
            .ok_or(RuntimeError::UndefinedWord { id })
    }

    fn bind(&mut self, id: u64, binding: Binding) {
        match self.locals.last_mut() {
            Some(local) => {
                local.insert(id, binding);
            }
            None => {
                self.globals.insert(id, binding);
            }
        }
    }

    fn call(&mut self, addr: u64, index: usize, bytecode: &Bytecode) -> Result<Flow, RuntimeError> {
        self.call_stack.push(CallFrame {
            return_pos: bytecode.position_of(index) + 9,
            locals_depth: self.locals.len(),
            sizes_depth: self.local_sizes.len(),
        });
        Self::jump(bytecode, addr)
    }

    /// Releases local dictionaries and allotments a frame leaves behind, so
    /// an early return cannot leak them.
    fn unwind_scopes(&mut self, frame: CallFrame) -> Result<(), RuntimeError> {
        self.locals.truncate(frame.locals_depth);
        while self.local_sizes.len() > frame.sizes_depth {
            let size = self.local_sizes.pop().expect("length was just checked");
            self.pool.free_local(size)?;
        }
        Ok(())
    }

    fn instantiate(&mut self, id: u64) -> Result<Flow, RuntimeError> {
        let Binding::Datagroup { members } = self.find(id)? else {
            return Err(RuntimeError::InvalidBinding { id });
        };
        let base = self.pool.alloc_global(members.len() as u64)?;
        self.push(Value::from_u64(base));
        Ok(Flow::Next)
    }

    /// Writes `[len, values…]` into the pool and returns the base address.
    fn store_array(&mut self, values: &[Value]) -> Result<u64, RuntimeError> {
        let base = self.pool.alloc_global(values.len() as u64 + 1)?;
        self.pool.write(base, Value::from_u64(values.len() as u64))?;
        for (offset, &value) in values.iter().enumerate() {
            self.pool.write(base + 1 + offset as u64, value)?;
        }
        Ok(base)
    }

    fn to_char(value: Value) -> Result<char, RuntimeError> {
        u32::try_from(value.as_u64())
            .ok()
            .and_then(char::from_u32)
            .ok_or(RuntimeError::InvalidCharacter {
                value: value.as_u64(),
            })
    }

    fn read_char(&mut self) -> Result<Option<char>, RuntimeError> {
        let mut bytes = [0u8; 4];
        if self.input.read(&mut bytes[..1])? == 0 {
            return Ok(None);
        }
        let len = match bytes[0] {
            b if b & 0x80 == 0 => 1,
            b if b & 0xE0 == 0xC0 => 2,
            b if b & 0xF0 == 0xE0 => 3,
            b if b & 0xF8 == 0xF0 => 4,
            _ => return Err(RuntimeError::InvalidInput),
        };
        if len > 1 {
            self.input.read_exact(&mut bytes[1..len])?;
        }
        std::str::from_utf8(&bytes[..len])
            .map_err(|_| RuntimeError::InvalidInput)
            .map(|s| s.chars().next())
    }

    fn read_line(&mut self) -> Result<String, RuntimeError> {
        self.output.flush()?;
        let mut line = String::new();
        self.input.read_line(&mut line)?;
        Ok(line)
    }

    fn unary(&mut self, f: impl FnOnce(Value) -> Value) -> Result<(), RuntimeError> {
        let value = self.pop()?;
        self.push(f(value));
        Ok(())
    }

    fn binary_i64(
        &mut self,
        f: impl FnOnce(i64, i64) -> Result<i64, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = f(a.as_i64(), b.as_i64())?;
        self.push(Value::from_i64(result));
        Ok(())
    }

    fn binary_u64(
        &mut self,
        f: impl FnOnce(u64, u64) -> Result<u64, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = f(a.as_u64(), b.as_u64())?;
        self.push(Value::from_u64(result));
        Ok(())
    }

    fn binary_f64(&mut self, f: impl FnOnce(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(Value::from_f64(f(a.as_f64(), b.as_f64())));
        Ok(())
    }

    fn compare(&mut self, f: impl FnOnce(Value, Value) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(Value::from_bool(f(a, b)));
        Ok(())
    }

    fn shuffle(&mut self, depth: usize, order: &[usize]) -> Result<(), RuntimeError> {
        if self.data_stack.len() < depth {
            return Err(RuntimeError::DataStackUnderflow);
        }
        let taken: Vec<Value> = self.data_stack.split_off(self.data_stack.len() - depth);
        for &i in order {
            self.data_stack.push(taken[i]);
        }
        Ok(())
    }
}
