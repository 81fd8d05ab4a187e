//! Stack-machine evaluator for action bytecode.
//!
//! [`Vm`] executes one decoded script at a time against shared movie state:
//! the global variable object, the four global registers, the active constant
//! pool and the playback position. Function, With and Try bodies run as
//! nested regions over the same byte buffer so branch offsets keep their
//! stream meaning.

use std::collections::HashMap;
use std::io::Write;
use std::ops::Range;
use std::rc::Rc;
use std::time::Instant;

use action::{Action, CatchVar, DecodedAction, Function2Flags, PushValue, Reader};
use encoding_rs::WINDOWS_1252;

use crate::coerce::{self, Num};
use crate::error::{Result, RuntimeError};
use crate::object::{self, FunctionData, ObjectData, ObjectRef};
use crate::random::Random;
use crate::scope::ScopeChain;
use crate::value::Value;

const CALL_DEPTH_LIMIT: u32 = 256;
const GLOBAL_REGISTERS: usize = 4;

/// How a region of bytecode finished.
enum Flow {
    Normal,
    Return(Value),
    Thrown(Value),
}

/// Register file for the running activation. Scripts and plain functions
/// share the four globals; a function2 call allocates its own slots.
enum Registers {
    Global,
    Local(Vec<Value>),
}

pub struct Vm<W: Write> {
    sink: W,
    globals: ObjectRef,
    global_registers: [Value; GLOBAL_REGISTERS],
    constant_pool: Vec<Rc<str>>,
    random: Random,
    started: Instant,
    property_overrides: HashMap<i32, Value>,
    pub(crate) frames: Vec<Vec<Rc<[u8]>>>,
    pub(crate) labels: HashMap<String, usize>,
    pub(crate) current_frame: usize,
    pub(crate) playing: bool,
    pub(crate) pending_frame: Option<usize>,
}

impl<W: Write> Vm<W> {
    /// A fresh evaluator writing trace output to `sink`, with the random
    /// generator seeded from the clock.
    pub fn new(sink: W) -> Self {
        Self::build(sink, Random::from_clock())
    }

    /// Like [`Vm::new`] but with a fixed random seed, for reproducible runs.
    pub fn with_seed(sink: W, seed: u32) -> Self {
        Self::build(sink, Random::new(seed))
    }

    fn build(sink: W, random: Random) -> Self {
        Self {
            sink,
            globals: ObjectData::new_object(),
            global_registers: std::array::from_fn(|_| Value::Undefined),
            constant_pool: Vec::new(),
            random,
            started: Instant::now(),
            property_overrides: HashMap::new(),
            frames: Vec::new(),
            labels: HashMap::new(),
            current_frame: 0,
            playing: true,
            pending_frame: None,
        }
    }

    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Runs one complete script. The constant pool resets, the operand stack
    /// starts empty, and an uncaught throw is reported to the trace sink
    /// rather than treated as a hard error.
    pub fn execute_script(&mut self, code: &[u8]) -> Result<()> {
        self.run_script(Rc::from(code))
    }

    pub(crate) fn run_script(&mut self, script: Rc<[u8]>) -> Result<()> {
        self.constant_pool.clear();
        let mut stack = Vec::new();
        let mut scopes = ScopeChain::new(self.globals.clone());
        let mut registers = Registers::Global;
        let region = 0..script.len();
        match self.run(&script, region, &mut stack, &mut scopes, &mut registers, 0)? {
            Flow::Thrown(value) => {
                let line = format!("[Uncaught exception: {}]", coerce::to_string(&value));
                self.trace_line(&line)
            }
            _ => Ok(()),
        }
    }

    /// Executes `region` of `script` until it ends, returns, or throws.
    fn run(
        &mut self,
        script: &Rc<[u8]>,
        region: Range<usize>,
        stack: &mut Vec<Value>,
        scopes: &mut ScopeChain,
        registers: &mut Registers,
        depth: u32,
    ) -> Result<Flow> {
        let mut reader = Reader::new(&script[..region.end]);
        reader.set_pos(region.start);

        loop {
            scopes.pop_expired_withs(reader.pos());
            let Some(decoded) = reader.read_action()? else {
                break;
            };
            let DecodedAction {
                offset,
                next,
                action,
            } = decoded;

            match action {
                Action::End => break,

                // SWF4 arithmetic keeps single precision when both operands
                // stayed floats; any double or string conversion widens.
                Action::Add => numeric_binary(stack, offset, |a, b| a + b, |a, b| a + b)?,
                Action::Subtract => numeric_binary(stack, offset, |a, b| a - b, |a, b| a - b)?,
                Action::Multiply => numeric_binary(stack, offset, |a, b| a * b, |a, b| a * b)?,
                Action::Divide => divide_like(stack, offset, |a, b| a / b, |a, b| a / b)?,
                Action::Modulo => divide_like(stack, offset, |a, b| a % b, |a, b| a % b)?,

                Action::Equals => numeric_test(stack, offset, |a, b| a == b)?,
                Action::Less => numeric_test(stack, offset, |a, b| a < b)?,
                Action::And => numeric_test(stack, offset, |a, b| a != 0.0 && b != 0.0)?,
                Action::Or => numeric_test(stack, offset, |a, b| a != 0.0 || b != 0.0)?,
                Action::Not => {
                    let value = coerce::to_f64(&pop(stack, offset)?);
                    stack.push(Value::F32(if value == 0.0 { 1.0 } else { 0.0 }));
                }

                Action::StringEquals => string_test(stack, offset, |a, b| a == b)?,
                Action::StringLess => string_test(stack, offset, |a, b| a < b)?,
                Action::StringGreater => string_test(stack, offset, |a, b| a > b)?,
                Action::StringAdd => {
                    let right = coerce::to_string(&pop(stack, offset)?);
                    let mut left = coerce::to_string(&pop(stack, offset)?);
                    left.push_str(&right);
                    stack.push(Value::string(left));
                }
                Action::StringLength => {
                    let text = coerce::to_string(&pop(stack, offset)?);
                    stack.push(Value::F32(text.len() as f32));
                }
                Action::MbStringLength => {
                    let text = coerce::to_string(&pop(stack, offset)?);
                    stack.push(Value::F32(text.chars().count() as f32));
                }
                Action::StringExtract => {
                    let count = coerce::to_f64(&pop(stack, offset)?);
                    let index = coerce::to_f64(&pop(stack, offset)?);
                    let text = coerce::to_string(&pop(stack, offset)?);
                    let (start, end) = clamp_span(text.len(), index, count);
                    let piece = String::from_utf8_lossy(&text.as_bytes()[start..end]);
                    stack.push(Value::string(piece.into_owned()));
                }
                Action::MbStringExtract => {
                    let count = coerce::to_f64(&pop(stack, offset)?);
                    let index = coerce::to_f64(&pop(stack, offset)?);
                    let text = coerce::to_string(&pop(stack, offset)?);
                    let chars = text.chars().count();
                    let (start, end) = clamp_span(chars, index, count);
                    let piece: String = text.chars().skip(start).take(end - start).collect();
                    stack.push(Value::string(piece));
                }
                Action::CharToAscii => {
                    let text = coerce::to_string(&pop(stack, offset)?);
                    let code = match text.chars().next() {
                        Some(c) => ((c as u32) & 0xFF) as f32,
                        None => f32::NAN,
                    };
                    stack.push(Value::F32(code));
                }
                Action::MbCharToAscii => {
                    let text = coerce::to_string(&pop(stack, offset)?);
                    let code = match text.chars().next() {
                        Some(c) => c as u32 as f32,
                        None => 0.0,
                    };
                    stack.push(Value::F32(code));
                }
                Action::AsciiToChar => {
                    let code = (coerce::to_f64(&pop(stack, offset)?) as i64 & 0xFF) as u8;
                    let text = if code == 0 {
                        String::new()
                    } else {
                        WINDOWS_1252.decode(&[code]).0.into_owned()
                    };
                    stack.push(Value::string(text));
                }
                Action::MbAsciiToChar => {
                    let code = coerce::to_f64(&pop(stack, offset)?);
                    let text = if code.is_finite() && code >= 1.0 && code <= f64::from(char::MAX as u32) {
                        char::from_u32(code as u32).map(String::from).unwrap_or_default()
                    } else {
                        String::new()
                    };
                    stack.push(Value::string(text));
                }

                Action::ToInteger => {
                    let n = coerce::to_f64(&pop(stack, offset)?);
                    let truncated = if n.is_finite() { (n as i32) as f32 } else { 0.0 };
                    stack.push(Value::F32(truncated));
                }
                Action::ToNumber => {
                    let value = pop(stack, offset)?;
                    stack.push(match coerce::to_number(&value) {
                        Num::F32(f) => Value::F32(f),
                        Num::F64(f) => Value::F64(f),
                    });
                }
                Action::ToString => {
                    let value = pop(stack, offset)?;
                    stack.push(Value::string(coerce::to_string(&value)));
                }
                Action::Increment => step_number(stack, offset, 1.0)?,
                Action::Decrement => step_number(stack, offset, -1.0)?,
                Action::TypeOf => {
                    let value = pop(stack, offset)?;
                    stack.push(Value::string(value.type_name()));
                }
                Action::TargetPath => {
                    let value = pop(stack, offset)?;
                    stack.push(match value {
                        Value::Object(_) => Value::string("_root"),
                        _ => Value::string(""),
                    });
                }

                Action::Add2 => {
                    let right = pop(stack, offset)?;
                    let left = pop(stack, offset)?;
                    // Objects concatenate through their printed form, the
                    // closest this model gets to ToPrimitive.
                    let stringy = matches!(left, Value::Str(_) | Value::Object(_))
                        || matches!(right, Value::Str(_) | Value::Object(_));
                    if stringy {
                        let mut text = coerce::to_string(&left);
                        text.push_str(&coerce::to_string(&right));
                        stack.push(Value::string(text));
                    } else {
                        match (coerce::to_number(&left), coerce::to_number(&right)) {
                            (Num::F32(a), Num::F32(b)) => stack.push(Value::F32(a + b)),
                            (a, b) => stack.push(Value::F64(a.as_f64() + b.as_f64())),
                        }
                    }
                }
                Action::Less2 => ordered_test(stack, offset, |a, b| a < b, |a, b| a < b)?,
                Action::Greater => ordered_test(stack, offset, |a, b| a > b, |a, b| a > b)?,
                Action::Equals2 => {
                    let right = pop(stack, offset)?;
                    let left = pop(stack, offset)?;
                    stack.push(Value::Bool(abstract_eq(&left, &right)));
                }
                Action::StrictEquals => {
                    let right = pop(stack, offset)?;
                    let left = pop(stack, offset)?;
                    stack.push(Value::Bool(left.strict_eq(&right)));
                }
                Action::InstanceOf => {
                    let constructor = pop(stack, offset)?;
                    let target = pop(stack, offset)?;
                    let result = match (&target, &constructor) {
                        (Value::Object(target), Value::Object(constructor)) => {
                            object::instance_of(target, constructor)
                        }
                        _ => false,
                    };
                    stack.push(Value::Bool(result));
                }

                Action::BitAnd => bit_binary(stack, offset, |a, b| a & b)?,
                Action::BitOr => bit_binary(stack, offset, |a, b| a | b)?,
                Action::BitXor => bit_binary(stack, offset, |a, b| a ^ b)?,
                Action::BitLShift => bit_binary(stack, offset, |a, b| a << (b & 0x1F))?,
                Action::BitRShift => bit_binary(stack, offset, |a, b| a >> (b & 0x1F))?,
                Action::BitURShift => {
                    let shift = coerce::to_i32(&pop(stack, offset)?) & 0x1F;
                    let value = coerce::to_i32(&pop(stack, offset)?) as u32;
                    stack.push(Value::F64(f64::from(value >> shift)));
                }

                Action::Pop => {
                    pop(stack, offset)?;
                }
                Action::PushDuplicate => {
                    let Some(top) = stack.last().cloned() else {
                        return Err(RuntimeError::StackUnderflow { offset });
                    };
                    stack.push(top);
                }
                Action::StackSwap => {
                    let a = pop(stack, offset)?;
                    let b = pop(stack, offset)?;
                    stack.push(a);
                    stack.push(b);
                }

                Action::Push(values) => {
                    for value in values {
                        let pushed = match value {
                            PushValue::Str(text) => Value::string(text),
                            PushValue::F32(f) => Value::F32(f),
                            PushValue::Null => Value::Null,
                            PushValue::Undefined => Value::Undefined,
                            PushValue::Register(index) => self.load_register(registers, index),
                            PushValue::Bool(b) => Value::Bool(b),
                            PushValue::F64(f) => Value::F64(f),
                            PushValue::I32(i) => Value::I32(i),
                            PushValue::Constant8(index) => self.constant_value(usize::from(index)),
                            PushValue::Constant16(index) => self.constant_value(usize::from(index)),
                        };
                        stack.push(pushed);
                    }
                }
                Action::ConstantPool(pool) => {
                    self.constant_pool = pool.into_iter().map(Rc::from).collect();
                }
                Action::StoreRegister(index) => {
                    let Some(top) = stack.last().cloned() else {
                        return Err(RuntimeError::StackUnderflow { offset });
                    };
                    self.store_register(registers, index, top);
                }

                Action::Jump { offset: branch } => {
                    let target = next as i64 + i64::from(branch);
                    reader.set_pos(validate_jump(target, &region, offset)?);
                }
                Action::If { offset: branch } => {
                    let condition = pop(stack, offset)?;
                    if coerce::to_bool(&condition) {
                        let target = next as i64 + i64::from(branch);
                        reader.set_pos(validate_jump(target, &region, offset)?);
                    }
                }

                Action::GetVariable => {
                    let name = coerce::to_string(&pop(stack, offset)?);
                    let value = match scopes.resolve(&name) {
                        Some(value) => value,
                        None if name == "_root" => Value::Object(self.globals.clone()),
                        None => Value::string(""),
                    };
                    stack.push(value);
                }
                Action::SetVariable => {
                    let value = pop(stack, offset)?;
                    let name = coerce::to_string(&pop(stack, offset)?);
                    scopes.set(&name, value);
                }
                Action::DefineLocal => {
                    let value = pop(stack, offset)?;
                    let name = coerce::to_string(&pop(stack, offset)?);
                    scopes.define_local(&name, value);
                }
                Action::DefineLocal2 => {
                    let name = coerce::to_string(&pop(stack, offset)?);
                    scopes.declare_local(&name);
                }
                Action::Delete => {
                    let name = coerce::to_string(&pop(stack, offset)?);
                    let target = pop(stack, offset)?;
                    if let Value::Object(object) = target {
                        object::delete_member(&object, &name);
                    }
                    // The original reports success even for absent members.
                    stack.push(Value::Bool(true));
                }
                Action::Delete2 => {
                    let name = coerce::to_string(&pop(stack, offset)?);
                    scopes.delete(&name);
                    stack.push(Value::Bool(true));
                }

                Action::GetMember => {
                    let name = coerce::to_string(&pop(stack, offset)?);
                    let target = pop(stack, offset)?;
                    let value = match &target {
                        Value::Object(object) => {
                            object::get_member(object, &name).unwrap_or(Value::Undefined)
                        }
                        Value::Str(text) if name == "length" => {
                            Value::F32(text.chars().count() as f32)
                        }
                        _ => Value::Undefined,
                    };
                    stack.push(value);
                }
                Action::SetMember => {
                    let value = pop(stack, offset)?;
                    let name = coerce::to_string(&pop(stack, offset)?);
                    let target = pop(stack, offset)?;
                    if let Value::Object(object) = target {
                        object::set_member(&object, &name, value);
                    }
                }
                Action::InitArray => {
                    let elements = pop_args(stack, offset)?;
                    stack.push(Value::Object(ObjectData::new_array(elements)));
                }
                Action::InitObject => {
                    let count = pop_count(stack, offset)?;
                    let mut pairs = Vec::new();
                    for _ in 0..count {
                        let value = pop(stack, offset)?;
                        let name = coerce::to_string(&pop(stack, offset)?);
                        pairs.push((name, value));
                    }
                    let object = ObjectData::new_object();
                    // Pairs pop in reverse source order; keep declaration
                    // order for enumeration.
                    for (name, value) in pairs.into_iter().rev() {
                        object::set_member(&object, &name, value);
                    }
                    stack.push(Value::Object(object));
                }
                Action::Enumerate => {
                    let name = coerce::to_string(&pop(stack, offset)?);
                    stack.push(Value::Undefined);
                    if let Some(Value::Object(object)) = scopes.resolve(&name) {
                        for key in object::own_keys(&object) {
                            stack.push(Value::string(key));
                        }
                    }
                }
                Action::Enumerate2 => {
                    let value = pop(stack, offset)?;
                    stack.push(Value::Undefined);
                    if let Value::Object(object) = value {
                        for key in object::own_keys(&object) {
                            stack.push(Value::string(key));
                        }
                    }
                }

                Action::NewObject => {
                    let name = coerce::to_string(&pop(stack, offset)?);
                    let args = pop_args(stack, offset)?;
                    match scopes.resolve(&name) {
                        Some(Value::Object(constructor))
                            if constructor.borrow().is_function() =>
                        {
                            let flow = self.construct(&constructor, args, depth)?;
                            if let Some(flow) = finish_call(stack, flow) {
                                return Ok(flow);
                            }
                        }
                        _ => stack.push(Value::Object(ObjectData::new_object())),
                    }
                }
                Action::NewMethod => {
                    let name_value = pop(stack, offset)?;
                    let target = pop(stack, offset)?;
                    let args = pop_args(stack, offset)?;
                    let constructor = match (&name_value, &target) {
                        (Value::Undefined, Value::Object(object)) => Some(object.clone()),
                        (name, Value::Object(object)) => {
                            let name = coerce::to_string(name);
                            if name.is_empty() {
                                Some(object.clone())
                            } else {
                                match object::get_member(object, &name) {
                                    Some(Value::Object(member)) => Some(member),
                                    _ => None,
                                }
                            }
                        }
                        _ => None,
                    };
                    match constructor {
                        Some(constructor) if constructor.borrow().is_function() => {
                            let flow = self.construct(&constructor, args, depth)?;
                            if let Some(flow) = finish_call(stack, flow) {
                                return Ok(flow);
                            }
                        }
                        _ => stack.push(Value::Undefined),
                    }
                }
                Action::CastOp => {
                    let target = pop(stack, offset)?;
                    let constructor = pop(stack, offset)?;
                    let result = match (&target, &constructor) {
                        (Value::Object(object), Value::Object(constructor))
                            if object::instance_of(object, constructor) =>
                        {
                            target.clone()
                        }
                        _ => Value::Null,
                    };
                    stack.push(result);
                }
                Action::ImplementsOp => {
                    let constructor = pop(stack, offset)?;
                    let count = pop_count(stack, offset)?;
                    let mut interfaces = Vec::new();
                    for _ in 0..count {
                        let interface = pop(stack, offset)?;
                        if let Value::Object(interface) = interface {
                            if let Some(Value::Object(prototype)) =
                                object::get_member(&interface, "prototype")
                            {
                                interfaces.push(prototype);
                            }
                        }
                    }
                    match constructor {
                        Value::Object(constructor) => {
                            if let Some(Value::Object(prototype)) =
                                object::get_member(&constructor, "prototype")
                            {
                                prototype.borrow_mut().interfaces.extend(interfaces);
                            } else {
                                log::warn!("ImplementsOp target has no prototype");
                            }
                        }
                        _ => log::warn!("ImplementsOp target is not an object"),
                    }
                }
                Action::Extends => {
                    let superclass = pop(stack, offset)?;
                    let subclass = pop(stack, offset)?;
                    if let (Value::Object(superclass), Value::Object(subclass)) =
                        (superclass, subclass)
                    {
                        let prototype = ObjectData::new_object();
                        if let Some(Value::Object(super_proto)) =
                            object::get_member(&superclass, "prototype")
                        {
                            prototype.borrow_mut().proto = Some(super_proto);
                        }
                        object::set_member(
                            &prototype,
                            "__constructor__",
                            Value::Object(superclass),
                        );
                        object::set_member(&subclass, "prototype", Value::Object(prototype));
                    }
                }

                Action::DefineFunction {
                    name,
                    params,
                    body_len,
                } => {
                    let function = FunctionData {
                        name: name.clone(),
                        script: script.clone(),
                        body: next - body_len..next,
                        params: params.into_iter().map(|name| (0, name)).collect(),
                        register_count: 0,
                        flags: Function2Flags::default(),
                        function2: false,
                    };
                    let value = Value::Object(ObjectData::new_function(function));
                    if name.is_empty() {
                        stack.push(value);
                    } else {
                        scopes.define_local(&name, value);
                    }
                }
                Action::DefineFunction2 {
                    name,
                    register_count,
                    flags,
                    params,
                    body_len,
                } => {
                    let function = FunctionData {
                        name: name.clone(),
                        script: script.clone(),
                        body: next - body_len..next,
                        params,
                        register_count,
                        flags,
                        function2: true,
                    };
                    let value = Value::Object(ObjectData::new_function(function));
                    if name.is_empty() {
                        stack.push(value);
                    } else {
                        scopes.define_local(&name, value);
                    }
                }
                Action::CallFunction => {
                    let name = coerce::to_string(&pop(stack, offset)?);
                    let args = pop_args(stack, offset)?;
                    match scopes.resolve(&name) {
                        Some(Value::Object(callee)) if callee.borrow().is_function() => {
                            let flow =
                                self.call_function(&callee, Value::Undefined, args, depth)?;
                            if let Some(flow) = finish_call(stack, flow) {
                                return Ok(flow);
                            }
                        }
                        _ if name == "parseInt" => {
                            let text = args.first().map(coerce::to_string).unwrap_or_default();
                            stack.push(Value::F32(parse_int_prefix(&text) as f32));
                        }
                        _ => {
                            log::debug!("call to undefined function {name:?}");
                            stack.push(Value::Undefined);
                        }
                    }
                }
                Action::CallMethod => {
                    let name_value = pop(stack, offset)?;
                    let target = pop(stack, offset)?;
                    let args = pop_args(stack, offset)?;
                    let name = match &name_value {
                        Value::Undefined => String::new(),
                        other => coerce::to_string(other),
                    };
                    if name.is_empty() {
                        // The object itself is the callee.
                        match &target {
                            Value::Object(callee) if callee.borrow().is_function() => {
                                let callee = callee.clone();
                                let flow =
                                    self.call_function(&callee, Value::Undefined, args, depth)?;
                                if let Some(flow) = finish_call(stack, flow) {
                                    return Ok(flow);
                                }
                            }
                            _ => stack.push(Value::Undefined),
                        }
                    } else {
                        match &target {
                            Value::Object(object) => {
                                match object::get_member(object, &name) {
                                    Some(Value::Object(method))
                                        if method.borrow().is_function() =>
                                    {
                                        let this = Value::Object(object.clone());
                                        let flow =
                                            self.call_function(&method, this, args, depth)?;
                                        if let Some(flow) = finish_call(stack, flow) {
                                            return Ok(flow);
                                        }
                                    }
                                    _ => {
                                        log::debug!("call to undefined method {name:?}");
                                        stack.push(Value::Undefined);
                                    }
                                }
                            }
                            Value::Str(text) => {
                                stack.push(string_method(text, &name));
                            }
                            _ => stack.push(Value::Undefined),
                        }
                    }
                }
                Action::Return => {
                    let value = pop(stack, offset)?;
                    return Ok(Flow::Return(value));
                }
                Action::Throw => {
                    let value = pop(stack, offset)?;
                    return Ok(Flow::Thrown(value));
                }

                Action::With { body_len } => {
                    let target = pop(stack, offset)?;
                    match target {
                        Value::Object(object) => {
                            scopes.push_with(object, next);
                            reader.set_pos(next - body_len);
                        }
                        other => {
                            // Reader already stands past the skipped body.
                            log::warn!(
                                "with target {:?} is not an object; skipping body",
                                coerce::to_string(&other)
                            );
                        }
                    }
                }
                Action::Try(block) => {
                    let body_start = next - block.try_len - block.catch_len - block.finally_len;
                    let try_region = body_start..body_start + block.try_len;
                    let catch_region = try_region.end..try_region.end + block.catch_len;
                    let finally_region = catch_region.end..catch_region.end + block.finally_len;

                    let mut flow =
                        self.run(script, try_region, stack, scopes, registers, depth)?;
                    if let Flow::Thrown(thrown) = flow {
                        if block.has_catch() {
                            match &block.catch_var {
                                CatchVar::Name(name) => scopes.define_local(name, thrown),
                                CatchVar::Register(index) => {
                                    self.store_register(registers, *index, thrown)
                                }
                            }
                            flow =
                                self.run(script, catch_region, stack, scopes, registers, depth)?;
                        } else {
                            flow = Flow::Thrown(thrown);
                        }
                    }
                    // The finally body runs on every exit, including a
                    // return; its own non-normal exit wins over the pending
                    // one.
                    if block.has_finally() {
                        let cleanup =
                            self.run(script, finally_region, stack, scopes, registers, depth)?;
                        if !matches!(cleanup, Flow::Normal) {
                            flow = cleanup;
                        }
                    }
                    if !matches!(flow, Flow::Normal) {
                        return Ok(flow);
                    }
                }

                Action::GetProperty => {
                    let index = coerce::to_f64(&pop(stack, offset)?) as i32;
                    let target = coerce::to_string(&pop(stack, offset)?);
                    if is_root_path(&target) {
                        let value = self
                            .property_overrides
                            .get(&index)
                            .cloned()
                            .or_else(|| self.property_default(index))
                            .unwrap_or(Value::Undefined);
                        stack.push(value);
                    } else {
                        log::warn!("property read on unknown target {target:?}");
                        stack.push(Value::Undefined);
                    }
                }
                Action::SetProperty => {
                    let value = pop(stack, offset)?;
                    let index = coerce::to_f64(&pop(stack, offset)?) as i32;
                    let target = coerce::to_string(&pop(stack, offset)?);
                    if is_root_path(&target) {
                        self.property_overrides.insert(index, value);
                    } else {
                        log::warn!("property write on unknown target {target:?}");
                    }
                }

                Action::Trace => {
                    let value = pop(stack, offset)?;
                    let line = coerce::trace_string(&value);
                    self.trace_line(&line)?;
                }
                Action::GetTime => {
                    stack.push(Value::F32(self.started.elapsed().as_millis() as f32));
                }
                Action::RandomNumber => {
                    let range = coerce::to_f64(&pop(stack, offset)?) as i32;
                    let result = self.random.next_below(range);
                    stack.push(Value::F32(result as f32));
                }

                Action::Play => self.playing = true,
                Action::Stop => self.playing = false,
                Action::NextFrame => {
                    self.pending_frame = Some(self.current_frame + 1);
                }
                Action::PreviousFrame => {
                    self.pending_frame = Some(self.current_frame.saturating_sub(1));
                }
                Action::GotoFrame(frame) => {
                    let frame = usize::from(frame);
                    if frame < self.frames.len() {
                        self.pending_frame = Some(frame);
                    } else {
                        log::warn!("GotoFrame {frame} is outside the movie");
                    }
                }
                Action::GotoFrame2 {
                    set_play,
                    scene_bias,
                } => {
                    let value = pop(stack, offset)?;
                    match self.resolve_frame(&value, scene_bias) {
                        Some(index) => {
                            self.pending_frame = Some(index);
                            self.playing = set_play;
                        }
                        None => log::warn!(
                            "GotoFrame2 target {:?} does not resolve",
                            coerce::to_string(&value)
                        ),
                    }
                }
                Action::GotoLabel(label) => match self.labels.get(&label) {
                    Some(&index) => self.pending_frame = Some(index),
                    None => log::warn!("unknown frame label {label:?}"),
                },
                Action::Call => {
                    let value = pop(stack, offset)?;
                    match self.resolve_frame(&value, 0) {
                        Some(index) => {
                            let scripts = self.frames[index].clone();
                            let saved = std::mem::take(&mut self.constant_pool);
                            for script in scripts {
                                self.run_script(script)?;
                            }
                            self.constant_pool = saved;
                        }
                        None => log::warn!(
                            "call to missing frame {:?}",
                            coerce::to_string(&value)
                        ),
                    }
                }
                Action::WaitForFrame { .. } => {
                    // Headless movies are fully loaded; never skip.
                }
                Action::WaitForFrame2 { .. } => {
                    pop(stack, offset)?;
                }

                Action::GetUrl { url, target } => {
                    log::info!("GetURL {url:?} target {target:?}");
                }
                Action::GetUrl2 {
                    send_vars_method,
                    load_target,
                    load_variables,
                } => {
                    let target = coerce::to_string(&pop(stack, offset)?);
                    let url = coerce::to_string(&pop(stack, offset)?);
                    let method = match send_vars_method {
                        1 => "GET",
                        2 => "POST",
                        _ => "NONE",
                    };
                    log::info!(
                        "GetURL2 {url:?} target {target:?} method {method} \
                         load_target={load_target} load_variables={load_variables}"
                    );
                }
                Action::SetTarget(name) => {
                    if !name.is_empty() {
                        log::warn!("SetTarget {name:?}: timeline targets are not supported");
                    }
                }
                Action::SetTarget2 => {
                    let target = coerce::to_string(&pop(stack, offset)?);
                    if !target.is_empty() {
                        log::warn!("SetTarget {target:?}: timeline targets are not supported");
                    }
                }
                Action::CloneSprite => {
                    let depth = coerce::to_f64(&pop(stack, offset)?);
                    let target = coerce::to_string(&pop(stack, offset)?);
                    let source = coerce::to_string(&pop(stack, offset)?);
                    log::debug!("CloneSprite {source:?} -> {target:?} at depth {depth}");
                }
                Action::RemoveSprite => {
                    let target = coerce::to_string(&pop(stack, offset)?);
                    log::debug!("RemoveSprite {target:?}");
                }
                Action::StartDrag => {
                    let target = coerce::to_string(&pop(stack, offset)?);
                    let _lock_center = pop(stack, offset)?;
                    let constrain = pop(stack, offset)?;
                    if coerce::to_bool(&constrain) {
                        let _y2 = pop(stack, offset)?;
                        let _x2 = pop(stack, offset)?;
                        let _y1 = pop(stack, offset)?;
                        let _x1 = pop(stack, offset)?;
                    }
                    log::debug!("StartDrag {target:?}");
                }
                Action::EndDrag => log::debug!("EndDrag"),
                Action::ToggleQuality => log::debug!("ToggleQuality"),
                Action::StopSounds => log::debug!("StopSounds"),

                Action::Unknown { opcode, .. } => {
                    log::debug!("skipping unknown opcode {opcode:#04x}");
                }
            }
        }

        Ok(Flow::Normal)
    }

    /// Invokes a function object. Returns the callee's exit: `Return` with
    /// its value (undefined when the body falls off the end), or a `Thrown`
    /// that the caller's handlers may catch.
    fn call_function(
        &mut self,
        callee: &ObjectRef,
        this: Value,
        args: Vec<Value>,
        depth: u32,
    ) -> Result<Flow> {
        if depth >= CALL_DEPTH_LIMIT {
            return Err(RuntimeError::RecursionLimit(CALL_DEPTH_LIMIT));
        }
        let function = {
            let data = callee.borrow();
            match data.function() {
                Some(function) => function.clone(),
                None => return Ok(Flow::Return(Value::Undefined)),
            }
        };

        let mut scopes = ScopeChain::for_call(self.globals.clone());
        let mut registers = if function.function2 {
            Registers::Local(vec![Value::Undefined; usize::from(function.register_count)])
        } else {
            Registers::Global
        };

        for (index, (register, name)) in function.params.iter().enumerate() {
            let value = args.get(index).cloned().unwrap_or(Value::Undefined);
            if *register > 0 {
                self.store_register(&mut registers, *register, value);
            } else {
                scopes.define_local(name, value);
            }
        }
        let arguments = Value::Object(ObjectData::new_array(args));

        if function.function2 {
            let flags = function.flags;
            let mut slot = 1u8;
            let mut preload = |registers: &mut Registers, vm: &mut Self, value: Value| {
                vm.store_register(registers, slot, value);
                slot += 1;
            };
            if flags.contains(Function2Flags::PRELOAD_THIS) {
                preload(&mut registers, self, this.clone());
            } else if !flags.contains(Function2Flags::SUPPRESS_THIS) {
                scopes.define_local("this", this.clone());
            }
            if flags.contains(Function2Flags::PRELOAD_ARGUMENTS) {
                preload(&mut registers, self, arguments.clone());
            } else if !flags.contains(Function2Flags::SUPPRESS_ARGUMENTS) {
                scopes.define_local("arguments", arguments.clone());
            }
            if flags.contains(Function2Flags::PRELOAD_SUPER) {
                preload(&mut registers, self, Value::Undefined);
            } else if !flags.contains(Function2Flags::SUPPRESS_SUPER) {
                scopes.define_local("super", Value::Undefined);
            }
            if flags.contains(Function2Flags::PRELOAD_ROOT) {
                preload(&mut registers, self, Value::Object(self.globals.clone()));
            }
            if flags.contains(Function2Flags::PRELOAD_PARENT) {
                preload(&mut registers, self, Value::Undefined);
            }
            if flags.contains(Function2Flags::PRELOAD_GLOBAL) {
                let globals = Value::Object(self.globals.clone());
                preload(&mut registers, self, globals);
            }
        } else {
            scopes.define_local("this", this);
            scopes.define_local("arguments", arguments);
        }

        let mut stack = Vec::new();
        let flow = self.run(
            &function.script,
            function.body.clone(),
            &mut stack,
            &mut scopes,
            &mut registers,
            depth + 1,
        )?;
        Ok(match flow {
            Flow::Normal => Flow::Return(Value::Undefined),
            other => other,
        })
    }

    /// `new` semantics: fresh object wired to the constructor's prototype,
    /// constructor invoked with `this` bound, explicit object returns win.
    fn construct(
        &mut self,
        constructor: &ObjectRef,
        args: Vec<Value>,
        depth: u32,
    ) -> Result<Flow> {
        let object = ObjectData::new_object();
        if let Some(Value::Object(prototype)) = object::get_member(constructor, "prototype") {
            object.borrow_mut().proto = Some(prototype);
        }
        let this = Value::Object(object.clone());
        let flow = self.call_function(constructor, this, args, depth)?;
        Ok(match flow {
            Flow::Thrown(value) => Flow::Thrown(value),
            Flow::Return(Value::Object(replacement)) => Flow::Return(Value::Object(replacement)),
            _ => Flow::Return(Value::Object(object)),
        })
    }

    fn trace_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.sink, "{line}")?;
        self.sink.flush()?;
        Ok(())
    }

    fn constant_value(&self, index: usize) -> Value {
        match self.constant_pool.get(index) {
            Some(text) => Value::Str(text.clone()),
            None => {
                log::warn!("constant pool index {index} is out of range");
                Value::Undefined
            }
        }
    }

    fn store_register(&mut self, registers: &mut Registers, index: u8, value: Value) {
        let slot = match registers {
            Registers::Global => self.global_registers.get_mut(usize::from(index)),
            Registers::Local(slots) => slots.get_mut(usize::from(index)),
        };
        match slot {
            Some(slot) => *slot = value,
            None => log::warn!("register {index} is out of range"),
        }
    }

    fn load_register(&self, registers: &Registers, index: u8) -> Value {
        let slot = match registers {
            Registers::Global => self.global_registers.get(usize::from(index)),
            Registers::Local(slots) => slots.get(usize::from(index)),
        };
        slot.cloned().unwrap_or(Value::Undefined)
    }

    /// Maps a popped frame operand (1-based number or label, plus a scene
    /// bias) to a frame index, refusing targets outside the movie.
    fn resolve_frame(&self, value: &Value, bias: u16) -> Option<usize> {
        let index = match value {
            Value::Str(text) => match self.labels.get(text.as_ref()) {
                Some(&index) => Some(index + usize::from(bias)),
                None => frame_index(coerce::parse_number(text) + f64::from(bias)),
            },
            other => frame_index(coerce::to_f64(other) + f64::from(bias)),
        }?;
        (index < self.frames.len()).then_some(index)
    }

    /// The fixed root-target property table, one slot per SWF property
    /// index. `_currentframe`, `_totalframes` and `_framesloaded` are live.
    fn property_default(&self, index: i32) -> Option<Value> {
        Some(match index {
            0 | 1 | 10 | 20 | 21 => Value::F32(0.0),
            2 | 3 | 6 => Value::F32(100.0),
            4 => Value::F32((self.current_frame + 1) as f32),
            5 | 12 => Value::F32(self.frames.len() as f32),
            7 | 16 | 17 => Value::F32(1.0),
            8 => Value::F32(550.0),
            9 => Value::F32(400.0),
            11 | 13 => Value::string("_root"),
            14 | 15 => Value::string(""),
            18 => Value::F32(5.0),
            19 => Value::F32(2.0),
            _ => return None,
        })
    }
}

fn pop(stack: &mut Vec<Value>, offset: usize) -> Result<Value> {
    stack.pop().ok_or(RuntimeError::StackUnderflow { offset })
}

fn pop_count(stack: &mut Vec<Value>, offset: usize) -> Result<usize> {
    let count = coerce::to_f64(&pop(stack, offset)?);
    Ok(if count.is_finite() && count > 0.0 {
        count as usize
    } else {
        0
    })
}

/// Pops a count, then that many values. The first pop is element zero.
fn pop_args(stack: &mut Vec<Value>, offset: usize) -> Result<Vec<Value>> {
    let count = pop_count(stack, offset)?;
    let mut args = Vec::new();
    for _ in 0..count {
        args.push(pop(stack, offset)?);
    }
    Ok(args)
}

fn finish_call(stack: &mut Vec<Value>, flow: Flow) -> Option<Flow> {
    match flow {
        Flow::Thrown(value) => Some(Flow::Thrown(value)),
        Flow::Return(value) => {
            stack.push(value);
            None
        }
        Flow::Normal => {
            stack.push(Value::Undefined);
            None
        }
    }
}

fn validate_jump(target: i64, region: &Range<usize>, offset: usize) -> Result<usize> {
    if target < region.start as i64 || target > region.end as i64 {
        return Err(RuntimeError::JumpOutOfRange { offset, target });
    }
    Ok(target as usize)
}

fn numeric_binary(
    stack: &mut Vec<Value>,
    offset: usize,
    single: impl Fn(f32, f32) -> f32,
    double: impl Fn(f64, f64) -> f64,
) -> Result<()> {
    let right = coerce::to_number(&pop(stack, offset)?);
    let left = coerce::to_number(&pop(stack, offset)?);
    stack.push(match (left, right) {
        (Num::F32(a), Num::F32(b)) => Value::F32(single(a, b)),
        (a, b) => Value::F64(double(a.as_f64(), b.as_f64())),
    });
    Ok(())
}

/// Divide and Modulo share the SWF4 zero-divisor rule: the result is the
/// literal string `#ERROR#`.
fn divide_like(
    stack: &mut Vec<Value>,
    offset: usize,
    single: impl Fn(f32, f32) -> f32,
    double: impl Fn(f64, f64) -> f64,
) -> Result<()> {
    let right = coerce::to_number(&pop(stack, offset)?);
    let left = coerce::to_number(&pop(stack, offset)?);
    if right.as_f64() == 0.0 {
        stack.push(Value::string("#ERROR#"));
        return Ok(());
    }
    stack.push(match (left, right) {
        (Num::F32(a), Num::F32(b)) => Value::F32(single(a, b)),
        (a, b) => Value::F64(double(a.as_f64(), b.as_f64())),
    });
    Ok(())
}

fn numeric_test(
    stack: &mut Vec<Value>,
    offset: usize,
    test: impl Fn(f64, f64) -> bool,
) -> Result<()> {
    let right = coerce::to_f64(&pop(stack, offset)?);
    let left = coerce::to_f64(&pop(stack, offset)?);
    stack.push(Value::F32(if test(left, right) { 1.0 } else { 0.0 }));
    Ok(())
}

fn string_test(
    stack: &mut Vec<Value>,
    offset: usize,
    test: impl Fn(&str, &str) -> bool,
) -> Result<()> {
    let right = coerce::to_string(&pop(stack, offset)?);
    let left = coerce::to_string(&pop(stack, offset)?);
    stack.push(Value::F32(if test(&left, &right) { 1.0 } else { 0.0 }));
    Ok(())
}

/// Less2/Greater: lexical when both operands are strings, numeric otherwise
/// (NaN comparisons are false).
fn ordered_test(
    stack: &mut Vec<Value>,
    offset: usize,
    strings: impl Fn(&str, &str) -> bool,
    numbers: impl Fn(f64, f64) -> bool,
) -> Result<()> {
    let right = pop(stack, offset)?;
    let left = pop(stack, offset)?;
    let result = match (&left, &right) {
        (Value::Str(a), Value::Str(b)) => strings(a, b),
        _ => numbers(coerce::to_f64(&left), coerce::to_f64(&right)),
    };
    stack.push(Value::Bool(result));
    Ok(())
}

fn bit_binary(
    stack: &mut Vec<Value>,
    offset: usize,
    op: impl Fn(i32, i32) -> i32,
) -> Result<()> {
    let right = coerce::to_i32(&pop(stack, offset)?);
    let left = coerce::to_i32(&pop(stack, offset)?);
    stack.push(Value::I32(op(left, right)));
    Ok(())
}

fn step_number(stack: &mut Vec<Value>, offset: usize, delta: f64) -> Result<()> {
    let value = pop(stack, offset)?;
    stack.push(match coerce::to_number(&value) {
        Num::F32(f) => Value::F32(f + delta as f32),
        Num::F64(f) => Value::F64(f + delta),
    });
    Ok(())
}

/// ECMA-style abstract equality over this value model: null and undefined
/// are mutually equal, mixed primitives compare numerically, objects only
/// by identity.
fn abstract_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null | Value::Undefined, Value::Null | Value::Undefined) => true,
        (Value::Null | Value::Undefined, _) | (_, Value::Null | Value::Undefined) => false,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
        _ => coerce::to_f64(left) == coerce::to_f64(right),
    }
}

/// Clamps a StringExtract index/count pair to `[0, length]`.
fn clamp_span(length: usize, index: f64, count: f64) -> (usize, usize) {
    let start = if index.is_finite() && index > 0.0 {
        (index as usize).min(length)
    } else {
        0
    };
    let take = if count.is_finite() && count > 0.0 {
        (count as usize).min(length - start)
    } else {
        0
    };
    (start, start + take)
}

/// One-based frame operand to zero-based index; non-positive numbers miss.
fn frame_index(n: f64) -> Option<usize> {
    if n.is_finite() && n >= 1.0 {
        Some(n as usize - 1)
    } else {
        None
    }
}

fn is_root_path(target: &str) -> bool {
    target.is_empty() || target == "_root"
}

/// Leading decimal integer, or NaN if the text does not start with one.
fn parse_int_prefix(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return f64::NAN;
    }
    match digits[..end].parse::<f64>() {
        Ok(n) => sign * n,
        Err(_) => f64::NAN,
    }
}

fn string_method(text: &str, name: &str) -> Value {
    match name {
        "toUpperCase" => Value::string(text.to_uppercase()),
        "toLowerCase" => Value::string(text.to_lowercase()),
        _ => Value::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action::Writer;

    fn assemble(actions: &[Action]) -> Vec<u8> {
        let mut writer = Writer::new(6);
        for action in actions {
            writer.action(action).expect("action assembles");
        }
        writer.action(&Action::End).expect("action assembles");
        writer.into_bytes()
    }

    fn run_bytes(code: &[u8]) -> String {
        let mut vm = Vm::with_seed(Vec::new(), 7);
        vm.execute_script(code).expect("script runs");
        String::from_utf8(vm.into_sink()).expect("trace output is UTF-8")
    }

    fn run_actions(actions: &[Action]) -> String {
        run_bytes(&assemble(actions))
    }

    fn push(value: PushValue) -> Action {
        Action::Push(vec![value])
    }

    fn push_f32(f: f32) -> Action {
        push(PushValue::F32(f))
    }

    fn push_str(s: &str) -> Action {
        push(PushValue::Str(s.to_string()))
    }

    #[test]
    fn arithmetic_keeps_single_precision() {
        let out = run_actions(&[
            push_f32(0.1),
            push_f32(0.2),
            Action::Add,
            Action::Trace,
            push(PushValue::F64(0.5)),
            push_f32(0.25),
            Action::Subtract,
            Action::Trace,
        ]);
        assert_eq!(out, "0.300000011920929\n0.25\n");
    }

    #[test]
    fn division_by_zero_pushes_the_error_string() {
        let out = run_actions(&[
            push_f32(5.0),
            push_f32(0.0),
            Action::Divide,
            Action::Trace,
            push_f32(5.0),
            push_f32(0.0),
            Action::Modulo,
            Action::Trace,
            push_f32(7.0),
            push_f32(2.0),
            Action::Divide,
            Action::Trace,
        ]);
        assert_eq!(out, "#ERROR#\n#ERROR#\n3.5\n");
    }

    #[test]
    fn comparisons_push_swf4_floats() {
        let out = run_actions(&[
            push_f32(5.0),
            push_f32(5.0),
            Action::Equals,
            Action::Trace,
            push_f32(5.0),
            push_f32(3.0),
            Action::Less,
            Action::Trace,
            push_f32(0.0),
            Action::Not,
            Action::Trace,
        ]);
        assert_eq!(out, "1\n0\n1\n");
    }

    #[test]
    fn equals2_follows_abstract_equality() {
        let out = run_actions(&[
            push_f32(5.0),
            push_str("5"),
            Action::Equals2,
            Action::Trace,
            push(PushValue::Null),
            push(PushValue::Undefined),
            Action::Equals2,
            Action::Trace,
            push(PushValue::Null),
            push_f32(0.0),
            Action::Equals2,
            Action::Trace,
            push(PushValue::Bool(true)),
            push_f32(1.0),
            Action::Equals2,
            Action::Trace,
        ]);
        assert_eq!(out, "1\n1\n0\n1\n");
    }

    #[test]
    fn string_group_operates_on_bytes_and_chars() {
        let out = run_actions(&[
            push_str("foo"),
            push_str("bar"),
            Action::StringAdd,
            Action::Trace,
            push_str("h\u{e9}llo"),
            Action::StringLength,
            Action::Trace,
            push_str("h\u{e9}llo"),
            Action::MbStringLength,
            Action::Trace,
            push_str("Hello, World!"),
            push_f32(0.0),
            push_f32(5.0),
            Action::StringExtract,
            Action::Trace,
            push_str("A"),
            Action::CharToAscii,
            Action::Trace,
            push_f32(233.0),
            Action::AsciiToChar,
            Action::Trace,
        ]);
        assert_eq!(out, "foobar\n6\n5\nHello\n65\n\u{e9}\n");
    }

    #[test]
    fn to_integer_truncates_toward_zero() {
        let out = run_actions(&[
            push_f32(3.7),
            Action::ToInteger,
            Action::Trace,
            push_f32(-3.7),
            Action::ToInteger,
            Action::Trace,
        ]);
        assert_eq!(out, "3\n-3\n");
    }

    #[test]
    fn bit_group_masks_shift_counts() {
        let out = run_actions(&[
            push_f32(6.0),
            push_f32(3.0),
            Action::BitAnd,
            Action::Trace,
            push_f32(1.0),
            push_f32(33.0),
            Action::BitLShift,
            Action::Trace,
            push_f32(-1.0),
            push_f32(28.0),
            Action::BitURShift,
            Action::Trace,
        ]);
        assert_eq!(out, "2\n2\n15\n");
    }

    #[test]
    fn registers_store_without_popping() {
        let out = run_actions(&[
            push_f32(42.0),
            Action::StoreRegister(0),
            Action::Trace,
            push(PushValue::Register(0)),
            Action::Trace,
        ]);
        // The first trace consumes the still-present original value.
        assert_eq!(out, "42\n42\n");
    }

    #[test]
    fn constant_pool_push_types_index_the_pool() {
        let out = run_actions(&[
            Action::ConstantPool(vec!["hello".to_string(), "world".to_string()]),
            push(PushValue::Constant8(1)),
            Action::Trace,
            push(PushValue::Constant8(9)),
            Action::Trace,
        ]);
        assert_eq!(out, "world\nundefined\n");
    }

    #[test]
    fn backward_jumps_drive_loops() {
        let out = run_actions(&[
            push_f32(3.0),
            Action::StoreRegister(1),
            Action::Pop,
            // loop: trace r1; r1 -= 1; repeat while r1 != 0
            push(PushValue::Register(1)),
            Action::Trace,
            push(PushValue::Register(1)),
            push_f32(1.0),
            Action::Subtract,
            Action::StoreRegister(1),
            Action::Pop,
            push(PushValue::Register(1)),
            push_f32(0.0),
            Action::Equals,
            Action::Not,
            Action::If { offset: -45 },
        ]);
        assert_eq!(out, "3\n2\n1\n");
    }

    #[test]
    fn variables_resolve_and_misses_push_the_empty_string() {
        let out = run_actions(&[
            push_str("x"),
            push_f32(12.0),
            Action::SetVariable,
            push_str("x"),
            Action::GetVariable,
            Action::Trace,
            push_str("missing"),
            Action::GetVariable,
            Action::StringLength,
            Action::Trace,
        ]);
        assert_eq!(out, "12\n0\n");
    }

    #[test]
    fn objects_enumerate_in_declaration_order() {
        let out = run_actions(&[
            push_str("a"),
            push_f32(1.0),
            push_str("b"),
            push_f32(2.0),
            push_str("c"),
            push_f32(3.0),
            push_f32(3.0),
            Action::InitObject,
            Action::StoreRegister(0),
            Action::Pop,
            push_str("obj"),
            push(PushValue::Register(0)),
            Action::SetVariable,
            push_str("obj"),
            Action::Enumerate,
            Action::Trace,
            Action::Trace,
            Action::Trace,
            Action::Trace,
        ]);
        assert_eq!(out, "c\nb\na\nundefined\n");
    }

    #[test]
    fn member_access_covers_arrays_and_strings() {
        let out = run_actions(&[
            push_f32(30.0),
            push_f32(20.0),
            push_f32(10.0),
            push_f32(3.0),
            Action::InitArray,
            Action::StoreRegister(0),
            Action::Pop,
            push(PushValue::Register(0)),
            push_str("length"),
            Action::GetMember,
            Action::Trace,
            push(PushValue::Register(0)),
            push_str("1"),
            Action::GetMember,
            Action::Trace,
            push_str("hello"),
            push_str("length"),
            Action::GetMember,
            Action::Trace,
        ]);
        assert_eq!(out, "3\n20\n5\n");
    }

    #[test]
    fn delete_reports_success_unconditionally() {
        let out = run_actions(&[
            push_f32(0.0),
            Action::InitObject,
            Action::StoreRegister(0),
            Action::Pop,
            push(PushValue::Register(0)),
            push_str("missing"),
            Action::Delete,
            Action::Trace,
        ]);
        assert_eq!(out, "1\n");
    }

    #[test]
    fn call_method_reaches_string_builtins() {
        let out = run_actions(&[
            push_f32(0.0),
            push_str("abc"),
            push_str("toUpperCase"),
            Action::CallMethod,
            Action::Trace,
            push_f32(0.0),
            push_str("ODD"),
            push_str("toLowerCase"),
            Action::CallMethod,
            Action::Trace,
        ]);
        assert_eq!(out, "ABC\nodd\n");
    }

    #[test]
    fn parse_int_is_a_builtin() {
        let out = run_actions(&[
            push_str("42abc"),
            push_f32(1.0),
            push_str("parseInt"),
            Action::CallFunction,
            Action::Trace,
            push_str("abc"),
            push_f32(1.0),
            push_str("parseInt"),
            Action::CallFunction,
            Action::Trace,
        ]);
        assert_eq!(out, "42\nnan\n");
    }

    #[test]
    fn random_numbers_are_seed_deterministic() {
        let expected = Random::new(7).next_below(100);
        let out = run_actions(&[push_f32(100.0), Action::RandomNumber, Action::Trace]);
        assert_eq!(out, format!("{expected}\n"));
    }

    #[test]
    fn property_table_answers_for_the_root_target() {
        let out = run_actions(&[
            push_str(""),
            push_f32(8.0),
            Action::GetProperty,
            Action::Trace,
            push_str("_root"),
            push_f32(19.0),
            Action::GetProperty,
            Action::Trace,
            push_str(""),
            push_f32(0.0),
            push_f32(12.5),
            Action::SetProperty,
            push_str(""),
            push_f32(0.0),
            Action::GetProperty,
            Action::Trace,
            push_str(""),
            push_f32(99.0),
            Action::GetProperty,
            Action::Trace,
        ]);
        assert_eq!(out, "550\n2\n12.5\nundefined\n");
    }

    #[test]
    fn functions_bind_parameters_and_return() {
        let body = assemble_body(&[
            push_str("x"),
            Action::GetVariable,
            push_f32(2.0),
            Action::Multiply,
            Action::Return,
        ]);
        let mut writer = Writer::new(6);
        writer
            .action(&Action::DefineFunction {
                name: "double".to_string(),
                params: vec!["x".to_string()],
                body_len: body.len(),
            })
            .expect("action assembles");
        writer.raw(&body);
        for action in [
            push_f32(21.0),
            push_f32(1.0),
            push_str("double"),
            Action::CallFunction,
            Action::Trace,
        ] {
            writer.action(&action).expect("action assembles");
        }
        writer.action(&Action::End).expect("action assembles");
        assert_eq!(run_bytes(&writer.into_bytes()), "42\n");
    }

    #[test]
    fn function2_parameters_land_in_registers() {
        let body = assemble_body(&[
            push(PushValue::Register(1)),
            push(PushValue::Register(1)),
            Action::Multiply,
            Action::Return,
        ]);
        let mut writer = Writer::new(6);
        writer
            .action(&Action::DefineFunction2 {
                name: "square".to_string(),
                register_count: 2,
                flags: Function2Flags(
                    Function2Flags::SUPPRESS_THIS | Function2Flags::SUPPRESS_ARGUMENTS,
                ),
                params: vec![(1, "n".to_string())],
                body_len: body.len(),
            })
            .expect("action assembles");
        writer.raw(&body);
        for action in [
            push_f32(6.0),
            push_f32(1.0),
            push_str("square"),
            Action::CallFunction,
            Action::Trace,
        ] {
            writer.action(&action).expect("action assembles");
        }
        writer.action(&Action::End).expect("action assembles");
        assert_eq!(run_bytes(&writer.into_bytes()), "36\n");
    }

    #[test]
    fn constructors_wire_prototypes() {
        let body = assemble_body(&[
            push_str("this"),
            Action::GetVariable,
            push_str("x"),
            push_f32(5.0),
            Action::SetMember,
        ]);
        let mut writer = Writer::new(6);
        writer
            .action(&Action::DefineFunction {
                name: "Thing".to_string(),
                params: Vec::new(),
                body_len: body.len(),
            })
            .expect("action assembles");
        writer.raw(&body);
        for action in [
            push_str("t"),
            push_f32(0.0),
            push_str("Thing"),
            Action::NewObject,
            Action::SetVariable,
            push_str("t"),
            Action::GetVariable,
            push_str("x"),
            Action::GetMember,
            Action::Trace,
            push_str("t"),
            Action::GetVariable,
            push_str("Thing"),
            Action::GetVariable,
            Action::InstanceOf,
            Action::Trace,
        ] {
            writer.action(&action).expect("action assembles");
        }
        writer.action(&Action::End).expect("action assembles");
        assert_eq!(run_bytes(&writer.into_bytes()), "5\n1\n");
    }

    #[test]
    fn with_bodies_resolve_against_the_pushed_object() {
        let body = assemble_body(&[push_str("x"), Action::GetVariable, Action::Trace]);
        let mut writer = Writer::new(6);
        for action in [
            push_str("x"),
            push_f32(10.0),
            push_f32(1.0),
            Action::InitObject,
        ] {
            writer.action(&action).expect("action assembles");
        }
        writer
            .action(&Action::With {
                body_len: body.len(),
            })
            .expect("action assembles");
        writer.raw(&body);
        writer.action(&Action::End).expect("action assembles");
        assert_eq!(run_bytes(&writer.into_bytes()), "10\n");
    }

    #[test]
    fn thrown_values_reach_the_catch_and_finally_runs() {
        let try_body = assemble_body(&[
            push_str("boom"),
            Action::Throw,
            push_str("unreachable"),
            Action::Trace,
        ]);
        let catch_body = assemble_body(&[push_str("e"), Action::GetVariable, Action::Trace]);
        let finally_body = assemble_body(&[push_str("done"), Action::Trace]);
        let mut writer = Writer::new(6);
        writer
            .action(&Action::Try(action::TryBlock {
                try_len: try_body.len(),
                catch_len: catch_body.len(),
                finally_len: finally_body.len(),
                catch_var: CatchVar::Name("e".to_string()),
            }))
            .expect("action assembles");
        writer.raw(&try_body);
        writer.raw(&catch_body);
        writer.raw(&finally_body);
        writer.action(&Action::End).expect("action assembles");
        assert_eq!(run_bytes(&writer.into_bytes()), "boom\ndone\n");
    }

    #[test]
    fn a_return_inside_try_still_runs_the_finally_body() {
        let try_body = assemble_body(&[push_f32(7.0), Action::Return]);
        let finally_body = assemble_body(&[push_str("cleanup"), Action::Trace]);
        let mut inner = Writer::new(6);
        inner
            .action(&Action::Try(action::TryBlock {
                try_len: try_body.len(),
                catch_len: 0,
                finally_len: finally_body.len(),
                catch_var: CatchVar::Name("e".to_string()),
            }))
            .expect("action assembles");
        inner.raw(&try_body);
        inner.raw(&finally_body);
        let body = inner.into_bytes();

        let mut writer = Writer::new(6);
        writer
            .action(&Action::DefineFunction {
                name: "f".to_string(),
                params: Vec::new(),
                body_len: body.len(),
            })
            .expect("action assembles");
        writer.raw(&body);
        for action in [
            push_f32(0.0),
            push_str("f"),
            Action::CallFunction,
            Action::Trace,
        ] {
            writer.action(&action).expect("action assembles");
        }
        writer.action(&Action::End).expect("action assembles");
        assert_eq!(run_bytes(&writer.into_bytes()), "cleanup\n7\n");
    }

    #[test]
    fn uncaught_throws_report_and_do_not_kill_the_vm() {
        let mut vm = Vm::with_seed(Vec::new(), 7);
        vm.execute_script(&assemble(&[push_str("kaboom"), Action::Throw]))
            .expect("script runs");
        vm.execute_script(&assemble(&[push_str("next"), Action::Trace]))
            .expect("script runs");
        let out = String::from_utf8(vm.into_sink()).expect("trace output is UTF-8");
        assert_eq!(out, "[Uncaught exception: kaboom]\nnext\n");
    }

    #[test]
    fn mb_ascii_to_char_covers_code_point_edges() {
        let cases: &[(f32, &str, &str)] = &[
            (-1.0, "negative", ""),
            (0.0, "zero", ""),
            (127.0, "max_1byte", "\u{7f}"),
            (128.0, "min_2byte", "\u{80}"),
            (2047.0, "max_2byte", "\u{7ff}"),
            (2048.0, "min_3byte", "\u{800}"),
            (55295.0, "before_surrogate", "\u{d7ff}"),
            (55296.0, "surrogate_start", ""),
            (57343.0, "surrogate_end", ""),
            (57344.0, "after_surrogate", "\u{e000}"),
            (65535.0, "max_3byte", "\u{ffff}"),
            (65536.0, "min_4byte", "\u{10000}"),
            (1114111.0, "max_unicode", "\u{10ffff}"),
            (1114112.0, "beyond_unicode", ""),
        ];
        let mut actions = Vec::new();
        let mut expected = String::new();
        for &(code, label, ch) in cases {
            actions.extend([
                push_f32(code),
                Action::MbAsciiToChar,
                push_str(label),
                Action::StringAdd,
                Action::Trace,
            ]);
            expected.push_str(ch);
            expected.push_str(label);
            expected.push('\n');
        }
        assert_eq!(run_actions(&actions), expected);
    }

    #[test]
    fn add2_concatenates_when_either_side_is_a_string() {
        let out = run_actions(&[
            push_f32(3.0),
            push_f32(5.0),
            Action::Add2,
            Action::Trace,
            push_str("Total: "),
            push_f32(42.0),
            Action::Add2,
            Action::Trace,
            push_f32(5.0),
            push_str(" items"),
            Action::Add2,
            Action::Trace,
        ]);
        assert_eq!(out, "8\nTotal: 42\n5 items\n");
    }

    #[test]
    fn enumerate2_pushes_names_behind_a_terminator() {
        let out = run_actions(&[
            push_str("a"),
            push_f32(1.0),
            push_str("b"),
            push_f32(2.0),
            push_str("c"),
            push_f32(3.0),
            push_f32(3.0),
            Action::InitObject,
            Action::Enumerate2,
            Action::Trace,
            Action::Trace,
            Action::Trace,
            Action::Trace,
            push_str("Done"),
            Action::Trace,
        ]);
        assert_eq!(out, "c\nb\na\nundefined\nDone\n");
    }

    #[test]
    fn extends_wires_the_subclass_prototype_chain() {
        let mut writer = Writer::new(6);
        for name in ["Animal", "Dog"] {
            writer
                .action(&Action::DefineFunction {
                    name: name.to_string(),
                    params: Vec::new(),
                    body_len: 0,
                })
                .expect("action assembles");
        }
        for action in [
            push_str("Dog"),
            Action::GetVariable,
            push_str("Animal"),
            Action::GetVariable,
            Action::Extends,
            // Dog.prototype.__proto__ is Animal.prototype
            push_str("Dog"),
            Action::GetVariable,
            push_str("prototype"),
            Action::GetMember,
            push_str("__proto__"),
            Action::GetMember,
            push_str("Animal"),
            Action::GetVariable,
            push_str("prototype"),
            Action::GetMember,
            Action::StrictEquals,
            Action::Trace,
            // a new Dog is an Animal
            push_f32(0.0),
            push_str("Dog"),
            Action::NewObject,
            push_str("Animal"),
            Action::GetVariable,
            Action::InstanceOf,
            Action::Trace,
        ] {
            writer.action(&action).expect("action assembles");
        }
        writer.action(&Action::End).expect("action assembles");
        assert_eq!(run_bytes(&writer.into_bytes()), "1\n1\n");
    }

    #[test]
    fn cast_op_yields_null_unless_an_instance() {
        let mut writer = Writer::new(6);
        writer
            .action(&Action::DefineFunction {
                name: "Animal".to_string(),
                params: Vec::new(),
                body_len: 0,
            })
            .expect("action assembles");
        for action in [
            // primitives never cast
            push_f32(1.0),
            push_f32(2.0),
            Action::CastOp,
            Action::TypeOf,
            Action::Trace,
            // a plain object is not an Animal
            push_str("Animal"),
            Action::GetVariable,
            push_f32(0.0),
            Action::InitObject,
            Action::CastOp,
            Action::TypeOf,
            Action::Trace,
            // a constructed Animal casts to itself
            push_str("Animal"),
            Action::GetVariable,
            push_f32(0.0),
            push_str("Animal"),
            Action::NewObject,
            Action::CastOp,
            Action::TypeOf,
            Action::Trace,
        ] {
            writer.action(&action).expect("action assembles");
        }
        writer.action(&Action::End).expect("action assembles");
        assert_eq!(run_bytes(&writer.into_bytes()), "null\nnull\nobject\n");
    }

    #[test]
    fn new_method_constructs_through_the_named_member() {
        let body = assemble_body(&[
            push_str("this"),
            Action::GetVariable,
            push_str("size"),
            push_str("n"),
            Action::GetVariable,
            Action::SetMember,
        ]);
        let mut writer = Writer::new(6);
        writer.action(&push_str("make")).expect("action assembles");
        writer
            .action(&Action::DefineFunction {
                name: String::new(),
                params: vec!["n".to_string()],
                body_len: body.len(),
            })
            .expect("action assembles");
        writer.raw(&body);
        for action in [
            push_f32(1.0),
            Action::InitObject,
            Action::StoreRegister(0),
            Action::Pop,
            push_f32(5.0),
            push_f32(1.0),
            push(PushValue::Register(0)),
            push_str("make"),
            Action::NewMethod,
            push_str("size"),
            Action::GetMember,
            Action::Trace,
            push_str("done"),
            Action::Trace,
        ] {
            writer.action(&action).expect("action assembles");
        }
        writer.action(&Action::End).expect("action assembles");
        assert_eq!(run_bytes(&writer.into_bytes()), "5\ndone\n");
    }

    fn assemble_body(actions: &[Action]) -> Vec<u8> {
        let mut writer = Writer::new(6);
        for action in actions {
            writer.action(action).expect("action assembles");
        }
        writer.into_bytes()
    }
}
