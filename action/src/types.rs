use crate::Opcode;

/// One item of a Push action's payload. A single Push may carry several.
#[derive(Debug, Clone, PartialEq)]
pub enum PushValue {
    Str(String),
    F32(f32),
    Null,
    Undefined,
    Register(u8),
    Bool(bool),
    F64(f64),
    I32(i32),
    /// Constant pool reference, 8-bit form.
    Constant8(u8),
    /// Constant pool reference, 16-bit form.
    Constant16(u16),
}

impl PushValue {
    pub fn type_code(&self) -> u8 {
        match self {
            PushValue::Str(_) => 0,
            PushValue::F32(_) => 1,
            PushValue::Null => 2,
            PushValue::Undefined => 3,
            PushValue::Register(_) => 4,
            PushValue::Bool(_) => 5,
            PushValue::F64(_) => 6,
            PushValue::I32(_) => 7,
            PushValue::Constant8(_) => 8,
            PushValue::Constant16(_) => 9,
        }
    }
}

/// DefineFunction2 behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Function2Flags(pub u16);

impl Function2Flags {
    pub const PRELOAD_THIS: u16 = 0x01;
    pub const PRELOAD_ARGUMENTS: u16 = 0x02;
    pub const PRELOAD_SUPER: u16 = 0x04;
    pub const PRELOAD_ROOT: u16 = 0x08;
    pub const PRELOAD_PARENT: u16 = 0x10;
    pub const PRELOAD_GLOBAL: u16 = 0x20;
    pub const SUPPRESS_THIS: u16 = 0x80;
    pub const SUPPRESS_ARGUMENTS: u16 = 0x100;
    pub const SUPPRESS_SUPER: u16 = 0x200;

    pub fn contains(self, bit: u16) -> bool {
        self.0 & bit != 0
    }
}

/// Decoded Try action header. The three bodies sit at the end of the record's
/// region, back to back, in try/catch/finally order.
#[derive(Debug, Clone, PartialEq)]
pub struct TryBlock {
    pub try_len: usize,
    pub catch_len: usize,
    pub finally_len: usize,
    /// A named catch variable, or the register it binds to.
    pub catch_var: CatchVar,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatchVar {
    Name(String),
    Register(u8),
}

impl TryBlock {
    pub fn has_catch(&self) -> bool {
        self.catch_len > 0
    }

    pub fn has_finally(&self) -> bool {
        self.finally_len > 0
    }
}

/// A decoded action. Function, With and Try bodies are NOT nested here: the
/// variants record body lengths and the bodies remain in the byte stream, so
/// jump offsets keep their meaning.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    End,
    NextFrame,
    PreviousFrame,
    Play,
    Stop,
    ToggleQuality,
    StopSounds,
    Add,
    Subtract,
    Multiply,
    Divide,
    Equals,
    Less,
    And,
    Or,
    Not,
    StringEquals,
    StringLength,
    StringExtract,
    Pop,
    ToInteger,
    GetVariable,
    SetVariable,
    SetTarget2,
    StringAdd,
    GetProperty,
    SetProperty,
    CloneSprite,
    RemoveSprite,
    Trace,
    StartDrag,
    EndDrag,
    StringLess,
    Throw,
    CastOp,
    ImplementsOp,
    RandomNumber,
    MbStringLength,
    CharToAscii,
    AsciiToChar,
    GetTime,
    MbStringExtract,
    MbCharToAscii,
    MbAsciiToChar,
    Delete,
    Delete2,
    DefineLocal,
    CallFunction,
    Return,
    Modulo,
    NewObject,
    DefineLocal2,
    InitArray,
    InitObject,
    TypeOf,
    TargetPath,
    Enumerate,
    Add2,
    Less2,
    Equals2,
    ToNumber,
    ToString,
    PushDuplicate,
    StackSwap,
    GetMember,
    SetMember,
    Increment,
    Decrement,
    CallMethod,
    NewMethod,
    InstanceOf,
    Enumerate2,
    BitAnd,
    BitOr,
    BitXor,
    BitLShift,
    BitRShift,
    BitURShift,
    StrictEquals,
    Greater,
    StringGreater,
    Extends,
    Call,

    Push(Vec<PushValue>),
    ConstantPool(Vec<String>),
    /// Branch offset relative to the byte after this action.
    Jump {
        offset: i16,
    },
    /// Conditional branch, same offset base as `Jump`.
    If {
        offset: i16,
    },
    GotoFrame(u16),
    GotoFrame2 {
        set_play: bool,
        scene_bias: u16,
    },
    GotoLabel(String),
    GetUrl {
        url: String,
        target: String,
    },
    GetUrl2 {
        send_vars_method: u8,
        load_target: bool,
        load_variables: bool,
    },
    StoreRegister(u8),
    SetTarget(String),
    WaitForFrame {
        frame: u16,
        skip_count: u8,
    },
    WaitForFrame2 {
        skip_count: u8,
    },
    DefineFunction {
        name: String,
        params: Vec<String>,
        body_len: usize,
    },
    DefineFunction2 {
        name: String,
        register_count: u8,
        flags: Function2Flags,
        /// `(register, name)` per parameter; register 0 means name-only.
        params: Vec<(u8, String)>,
        body_len: usize,
    },
    Try(TryBlock),
    With {
        body_len: usize,
    },
    /// Opcode this codec does not model; kept so streams can still be listed.
    Unknown {
        opcode: u8,
        payload: Vec<u8>,
    },
}

impl Action {
    /// Body bytes that follow this action in the stream, if any.
    pub fn trailing_body_len(&self) -> usize {
        match self {
            Action::DefineFunction { body_len, .. }
            | Action::DefineFunction2 { body_len, .. }
            | Action::With { body_len } => *body_len,
            Action::Try(block) => block.try_len + block.catch_len + block.finally_len,
            _ => 0,
        }
    }

    pub fn opcode(&self) -> Option<Opcode> {
        use Action::*;
        Some(match self {
            End => Opcode::End,
            NextFrame => Opcode::NextFrame,
            PreviousFrame => Opcode::PreviousFrame,
            Play => Opcode::Play,
            Stop => Opcode::Stop,
            ToggleQuality => Opcode::ToggleQuality,
            StopSounds => Opcode::StopSounds,
            Add => Opcode::Add,
            Subtract => Opcode::Subtract,
            Multiply => Opcode::Multiply,
            Divide => Opcode::Divide,
            Equals => Opcode::Equals,
            Less => Opcode::Less,
            And => Opcode::And,
            Or => Opcode::Or,
            Not => Opcode::Not,
            StringEquals => Opcode::StringEquals,
            StringLength => Opcode::StringLength,
            StringExtract => Opcode::StringExtract,
            Pop => Opcode::Pop,
            ToInteger => Opcode::ToInteger,
            GetVariable => Opcode::GetVariable,
            SetVariable => Opcode::SetVariable,
            SetTarget2 => Opcode::SetTarget2,
            StringAdd => Opcode::StringAdd,
            GetProperty => Opcode::GetProperty,
            SetProperty => Opcode::SetProperty,
            CloneSprite => Opcode::CloneSprite,
            RemoveSprite => Opcode::RemoveSprite,
            Trace => Opcode::Trace,
            StartDrag => Opcode::StartDrag,
            EndDrag => Opcode::EndDrag,
            StringLess => Opcode::StringLess,
            Throw => Opcode::Throw,
            CastOp => Opcode::CastOp,
            ImplementsOp => Opcode::ImplementsOp,
            RandomNumber => Opcode::RandomNumber,
            MbStringLength => Opcode::MbStringLength,
            CharToAscii => Opcode::CharToAscii,
            AsciiToChar => Opcode::AsciiToChar,
            GetTime => Opcode::GetTime,
            MbStringExtract => Opcode::MbStringExtract,
            MbCharToAscii => Opcode::MbCharToAscii,
            MbAsciiToChar => Opcode::MbAsciiToChar,
            Delete => Opcode::Delete,
            Delete2 => Opcode::Delete2,
            DefineLocal => Opcode::DefineLocal,
            CallFunction => Opcode::CallFunction,
            Return => Opcode::Return,
            Modulo => Opcode::Modulo,
            NewObject => Opcode::NewObject,
            DefineLocal2 => Opcode::DefineLocal2,
            InitArray => Opcode::InitArray,
            InitObject => Opcode::InitObject,
            TypeOf => Opcode::TypeOf,
            TargetPath => Opcode::TargetPath,
            Enumerate => Opcode::Enumerate,
            Add2 => Opcode::Add2,
            Less2 => Opcode::Less2,
            Equals2 => Opcode::Equals2,
            ToNumber => Opcode::ToNumber,
            ToString => Opcode::ToString,
            PushDuplicate => Opcode::PushDuplicate,
            StackSwap => Opcode::StackSwap,
            GetMember => Opcode::GetMember,
            SetMember => Opcode::SetMember,
            Increment => Opcode::Increment,
            Decrement => Opcode::Decrement,
            CallMethod => Opcode::CallMethod,
            NewMethod => Opcode::NewMethod,
            InstanceOf => Opcode::InstanceOf,
            Enumerate2 => Opcode::Enumerate2,
            BitAnd => Opcode::BitAnd,
            BitOr => Opcode::BitOr,
            BitXor => Opcode::BitXor,
            BitLShift => Opcode::BitLShift,
            BitRShift => Opcode::BitRShift,
            BitURShift => Opcode::BitURShift,
            StrictEquals => Opcode::StrictEquals,
            Greater => Opcode::Greater,
            StringGreater => Opcode::StringGreater,
            Extends => Opcode::Extends,
            Call => Opcode::Call,
            Push(_) => Opcode::Push,
            ConstantPool(_) => Opcode::ConstantPool,
            Jump { .. } => Opcode::Jump,
            If { .. } => Opcode::If,
            GotoFrame(_) => Opcode::GotoFrame,
            GotoFrame2 { .. } => Opcode::GotoFrame2,
            GotoLabel(_) => Opcode::GotoLabel,
            GetUrl { .. } => Opcode::GetUrl,
            GetUrl2 { .. } => Opcode::GetUrl2,
            StoreRegister(_) => Opcode::StoreRegister,
            SetTarget(_) => Opcode::SetTarget,
            WaitForFrame { .. } => Opcode::WaitForFrame,
            WaitForFrame2 { .. } => Opcode::WaitForFrame2,
            DefineFunction { .. } => Opcode::DefineFunction,
            DefineFunction2 { .. } => Opcode::DefineFunction2,
            Try(_) => Opcode::Try,
            With { .. } => Opcode::With,
            Unknown { .. } => return None,
        })
    }
}
