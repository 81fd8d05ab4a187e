use encoding_rs::WINDOWS_1252;

use crate::types::{Action, CatchVar, Function2Flags, PushValue, TryBlock};
use crate::{ActionError, Opcode, Result};

/// A decoded action and where it sits in the stream. For function, With and
/// Try records `next` always points one past the body region, whichever
/// layout stored the bodies, so they occupy `[next - trailing_body_len(), next)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAction {
    pub offset: usize,
    pub next: usize,
    pub action: Action,
}

/// Linear decoder over a DoAction payload. Function/With/Try bodies are
/// stepped over as opaque regions; callers descend into
/// `[next - trailing_body_len(), next)` with `set_pos`.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Decodes the next action, or returns `None` at the end of the stream.
    pub fn read_action(&mut self) -> Result<Option<DecodedAction>> {
        let offset = self.pos;
        let Some(&byte) = self.data.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;

        let opcode = Opcode::from_u8(byte);
        let has_payload = byte >= 0x80;
        let payload = if has_payload {
            let len = self.read_len(offset)?;
            let start = self.pos;
            let end = start
                .checked_add(len)
                .filter(|&end| end <= self.data.len())
                .ok_or(ActionError::Truncated { offset })?;
            self.pos = end;
            &self.data[start..end]
        } else {
            &[][..]
        };

        let (action, embedded) = match opcode {
            Some(op) => self.parse_payload(op, payload, offset)?,
            None => {
                log::warn!("unknown opcode {byte:#04x} at offset {offset}");
                let action = Action::Unknown {
                    opcode: byte,
                    payload: payload.to_vec(),
                };
                (action, 0)
            }
        };

        // Function, With and Try bodies normally follow the record, but some
        // emitters fold them into the declared payload length. Step over
        // trailing bodies so `next` lands one past the body region in both
        // layouts.
        if embedded == 0 {
            let trailing = action.trailing_body_len();
            if trailing > 0 {
                self.pos = self
                    .pos
                    .checked_add(trailing)
                    .filter(|&end| end <= self.data.len())
                    .ok_or(ActionError::Truncated { offset })?;
            }
        }

        Ok(Some(DecodedAction {
            offset,
            next: self.pos,
            action,
        }))
    }

    fn read_len(&mut self, offset: usize) -> Result<usize> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 2)
            .ok_or(ActionError::Truncated { offset })?;
        self.pos += 2;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]) as usize)
    }

    /// Parses one action's payload. Returns the action together with the
    /// number of unconsumed payload bytes, which is non-zero only when a
    /// body-carrying record embeds its bodies in the declared length.
    fn parse_payload(&self, op: Opcode, payload: &[u8], offset: usize) -> Result<(Action, usize)> {
        let mut cur = Cursor {
            data: payload,
            pos: 0,
            base: offset,
        };
        let action = match op {
            Opcode::End => Action::End,
            Opcode::NextFrame => Action::NextFrame,
            Opcode::PreviousFrame => Action::PreviousFrame,
            Opcode::Play => Action::Play,
            Opcode::Stop => Action::Stop,
            Opcode::ToggleQuality => Action::ToggleQuality,
            Opcode::StopSounds => Action::StopSounds,
            Opcode::Add => Action::Add,
            Opcode::Subtract => Action::Subtract,
            Opcode::Multiply => Action::Multiply,
            Opcode::Divide => Action::Divide,
            Opcode::Equals => Action::Equals,
            Opcode::Less => Action::Less,
            Opcode::And => Action::And,
            Opcode::Or => Action::Or,
            Opcode::Not => Action::Not,
            Opcode::StringEquals => Action::StringEquals,
            Opcode::StringLength => Action::StringLength,
            Opcode::StringExtract => Action::StringExtract,
            Opcode::Pop => Action::Pop,
            Opcode::ToInteger => Action::ToInteger,
            Opcode::GetVariable => Action::GetVariable,
            Opcode::SetVariable => Action::SetVariable,
            Opcode::SetTarget2 => Action::SetTarget2,
            Opcode::StringAdd => Action::StringAdd,
            Opcode::GetProperty => Action::GetProperty,
            Opcode::SetProperty => Action::SetProperty,
            Opcode::CloneSprite => Action::CloneSprite,
            Opcode::RemoveSprite => Action::RemoveSprite,
            Opcode::Trace => Action::Trace,
            Opcode::StartDrag => Action::StartDrag,
            Opcode::EndDrag => Action::EndDrag,
            Opcode::StringLess => Action::StringLess,
            Opcode::Throw => Action::Throw,
            Opcode::CastOp => Action::CastOp,
            Opcode::ImplementsOp => Action::ImplementsOp,
            Opcode::RandomNumber => Action::RandomNumber,
            Opcode::MbStringLength => Action::MbStringLength,
            Opcode::CharToAscii => Action::CharToAscii,
            Opcode::AsciiToChar => Action::AsciiToChar,
            Opcode::GetTime => Action::GetTime,
            Opcode::MbStringExtract => Action::MbStringExtract,
            Opcode::MbCharToAscii => Action::MbCharToAscii,
            Opcode::MbAsciiToChar => Action::MbAsciiToChar,
            Opcode::Delete => Action::Delete,
            Opcode::Delete2 => Action::Delete2,
            Opcode::DefineLocal => Action::DefineLocal,
            Opcode::CallFunction => Action::CallFunction,
            Opcode::Return => Action::Return,
            Opcode::Modulo => Action::Modulo,
            Opcode::NewObject => Action::NewObject,
            Opcode::DefineLocal2 => Action::DefineLocal2,
            Opcode::InitArray => Action::InitArray,
            Opcode::InitObject => Action::InitObject,
            Opcode::TypeOf => Action::TypeOf,
            Opcode::TargetPath => Action::TargetPath,
            Opcode::Enumerate => Action::Enumerate,
            Opcode::Add2 => Action::Add2,
            Opcode::Less2 => Action::Less2,
            Opcode::Equals2 => Action::Equals2,
            Opcode::ToNumber => Action::ToNumber,
            Opcode::ToString => Action::ToString,
            Opcode::PushDuplicate => Action::PushDuplicate,
            Opcode::StackSwap => Action::StackSwap,
            Opcode::GetMember => Action::GetMember,
            Opcode::SetMember => Action::SetMember,
            Opcode::Increment => Action::Increment,
            Opcode::Decrement => Action::Decrement,
            Opcode::CallMethod => Action::CallMethod,
            Opcode::NewMethod => Action::NewMethod,
            Opcode::InstanceOf => Action::InstanceOf,
            Opcode::Enumerate2 => Action::Enumerate2,
            Opcode::BitAnd => Action::BitAnd,
            Opcode::BitOr => Action::BitOr,
            Opcode::BitXor => Action::BitXor,
            Opcode::BitLShift => Action::BitLShift,
            Opcode::BitRShift => Action::BitRShift,
            Opcode::BitURShift => Action::BitURShift,
            Opcode::StrictEquals => Action::StrictEquals,
            Opcode::Greater => Action::Greater,
            Opcode::StringGreater => Action::StringGreater,
            Opcode::Extends => Action::Extends,
            // Call carries a length field that is always zero.
            Opcode::Call => {
                if !payload.is_empty() {
                    log::debug!("Call action with {} payload bytes ignored", payload.len());
                }
                return Ok((Action::Call, 0));
            }

            Opcode::Push => {
                let mut values = Vec::new();
                while cur.remaining() > 0 {
                    values.push(cur.read_push_value()?);
                }
                Action::Push(values)
            }
            Opcode::ConstantPool => {
                let count = cur.read_u16()?;
                let mut strings = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    strings.push(cur.read_str()?);
                }
                Action::ConstantPool(strings)
            }
            Opcode::Jump => Action::Jump {
                offset: cur.read_i16()?,
            },
            Opcode::If => Action::If {
                offset: cur.read_i16()?,
            },
            Opcode::GotoFrame => Action::GotoFrame(cur.read_u16()?),
            Opcode::GotoFrame2 => {
                let flags = cur.read_u8()?;
                let scene_bias = if flags & 0x02 != 0 { cur.read_u16()? } else { 0 };
                Action::GotoFrame2 {
                    set_play: flags & 0x01 != 0,
                    scene_bias,
                }
            }
            Opcode::GotoLabel => Action::GotoLabel(cur.read_str()?),
            Opcode::GetUrl => Action::GetUrl {
                url: cur.read_str()?,
                target: cur.read_str()?,
            },
            Opcode::GetUrl2 => {
                let flags = cur.read_u8()?;
                Action::GetUrl2 {
                    send_vars_method: flags >> 6,
                    load_target: flags & 0x02 != 0,
                    load_variables: flags & 0x01 != 0,
                }
            }
            Opcode::StoreRegister => Action::StoreRegister(cur.read_u8()?),
            Opcode::SetTarget => Action::SetTarget(cur.read_str()?),
            Opcode::WaitForFrame => Action::WaitForFrame {
                frame: cur.read_u16()?,
                skip_count: cur.read_u8()?,
            },
            Opcode::WaitForFrame2 => Action::WaitForFrame2 {
                skip_count: cur.read_u8()?,
            },
            Opcode::DefineFunction => {
                let name = cur.read_str()?;
                let count = cur.read_u16()?;
                let mut params = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    params.push(cur.read_str()?);
                }
                let body_len = cur.read_u16()? as usize;
                Action::DefineFunction {
                    name,
                    params,
                    body_len,
                }
            }
            Opcode::DefineFunction2 => {
                let name = cur.read_str()?;
                let count = cur.read_u16()?;
                let register_count = cur.read_u8()?;
                let flags = Function2Flags(cur.read_u16()?);
                let mut params = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let register = cur.read_u8()?;
                    params.push((register, cur.read_str()?));
                }
                let body_len = cur.read_u16()? as usize;
                Action::DefineFunction2 {
                    name,
                    register_count,
                    flags,
                    params,
                    body_len,
                }
            }
            Opcode::Try => {
                let flags = cur.read_u8()?;
                let try_len = cur.read_u16()? as usize;
                let catch_len = cur.read_u16()? as usize;
                let finally_len = cur.read_u16()? as usize;
                let catch_var = if flags & 0x04 != 0 {
                    CatchVar::Register(cur.read_u8()?)
                } else {
                    CatchVar::Name(cur.read_str()?)
                };
                Action::Try(TryBlock {
                    try_len,
                    catch_len: if flags & 0x01 != 0 { catch_len } else { 0 },
                    finally_len: if flags & 0x02 != 0 { finally_len } else { 0 },
                    catch_var,
                })
            }
            Opcode::With => Action::With {
                body_len: cur.read_u16()? as usize,
            },
        };

        let leftover = cur.remaining();
        if leftover > 0 && leftover != action.trailing_body_len() {
            return Err(ActionError::PayloadMismatch {
                declared: payload.len(),
                decoded: cur.pos,
                offset,
            });
        }
        Ok((action, leftover))
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.pos).ok_or(ActionError::Truncated {
            offset: self.base,
        })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes([self.read_u8()?, self.read_u8()?]))
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut bytes = [0u8; 4];
        for byte in &mut bytes {
            *byte = self.read_u8()?;
        }
        Ok(i32::from_le_bytes(bytes))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_i32()? as u32))
    }

    // Push doubles are stored with the high 32-bit word first.
    fn read_f64(&mut self) -> Result<f64> {
        let mut bytes = [0u8; 8];
        for byte in &mut bytes {
            *byte = self.read_u8()?;
        }
        let bits = (u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])) << 32)
            | u64::from(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]));
        Ok(f64::from_bits(bits))
    }

    fn read_str(&mut self) -> Result<String> {
        let start = self.pos;
        let nul = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(ActionError::UnterminatedString {
                offset: self.base,
            })?;
        let bytes = &self.data[start..start + nul];
        self.pos = start + nul + 1;
        // Real archives mix encodings whatever the file version claims: take
        // valid UTF-8 at face value, fall back to WINDOWS_1252 otherwise.
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_owned()),
            Err(_) => Ok(WINDOWS_1252.decode(bytes).0.into_owned()),
        }
    }

    fn read_push_value(&mut self) -> Result<PushValue> {
        let kind = self.read_u8()?;
        Ok(match kind {
            0 => PushValue::Str(self.read_str()?),
            1 => PushValue::F32(self.read_f32()?),
            2 => PushValue::Null,
            3 => PushValue::Undefined,
            4 => PushValue::Register(self.read_u8()?),
            5 => PushValue::Bool(self.read_u8()? != 0),
            6 => PushValue::F64(self.read_f64()?),
            7 => PushValue::I32(self.read_i32()?),
            8 => PushValue::Constant8(self.read_u8()?),
            9 => PushValue::Constant16(self.read_u16()?),
            _ => {
                return Err(ActionError::BadPushType {
                    kind,
                    offset: self.base,
                })
            }
        })
    }
}
