use byteorder::{LittleEndian, WriteBytesExt};
use encoding_rs::WINDOWS_1252;

use crate::types::{Action, CatchVar, PushValue};
use crate::{Opcode, Result};

/// Encoding mirror of the `Reader`. Body-carrying actions write their header
/// and operands only; callers append the body bytes with `raw` so that the
/// stream layout matches what the decoder expects.
pub struct Writer {
    out: Vec<u8>,
    version: u8,
}

impl Writer {
    pub fn new(version: u8) -> Self {
        Self {
            out: Vec::new(),
            version,
        }
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    /// Appends raw bytes, used for pre-encoded function/With/Try bodies.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    pub fn action(&mut self, action: &Action) -> Result<()> {
        if let Action::Unknown { opcode, payload } = action {
            if *opcode >= 0x80 {
                self.write_opcode_and_length(*opcode, payload.len())?;
                self.out.extend_from_slice(payload);
            } else {
                self.out.push(*opcode);
            }
            return Ok(());
        }

        let opcode = action
            .opcode()
            .expect("every non-Unknown action maps to an opcode");
        if !opcode.has_payload() {
            self.out.push(opcode as u8);
            return Ok(());
        }

        let payload = self.encode_payload(action)?;
        self.write_opcode_and_length(opcode as u8, payload.len())?;
        self.out.extend_from_slice(&payload);
        Ok(())
    }

    fn write_opcode_and_length(&mut self, opcode: u8, length: usize) -> Result<()> {
        self.out.push(opcode);
        self.out.write_u16::<LittleEndian>(length as u16)?;
        Ok(())
    }

    fn encode_payload(&self, action: &Action) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match action {
            Action::Push(values) => {
                for value in values {
                    buf.push(value.type_code());
                    match value {
                        PushValue::Str(s) => self.put_str(&mut buf, s),
                        PushValue::F32(f) => buf.extend_from_slice(&f.to_le_bytes()),
                        PushValue::Null | PushValue::Undefined => (),
                        PushValue::Register(r) => buf.push(*r),
                        PushValue::Bool(b) => buf.push(u8::from(*b)),
                        // High 32-bit word first, matching the reader.
                        PushValue::F64(f) => {
                            let bits = f.to_bits();
                            buf.extend_from_slice(&((bits >> 32) as u32).to_le_bytes());
                            buf.extend_from_slice(&(bits as u32).to_le_bytes());
                        }
                        PushValue::I32(i) => buf.extend_from_slice(&i.to_le_bytes()),
                        PushValue::Constant8(i) => buf.push(*i),
                        PushValue::Constant16(i) => {
                            buf.write_u16::<LittleEndian>(*i)?;
                        }
                    }
                }
            }
            Action::ConstantPool(strings) => {
                buf.write_u16::<LittleEndian>(strings.len() as u16)?;
                for s in strings {
                    self.put_str(&mut buf, s);
                }
            }
            Action::Jump { offset } | Action::If { offset } => {
                buf.write_i16::<LittleEndian>(*offset)?;
            }
            Action::GotoFrame(frame) => buf.write_u16::<LittleEndian>(*frame)?,
            Action::GotoFrame2 {
                set_play,
                scene_bias,
            } => {
                let mut flags = u8::from(*set_play);
                if *scene_bias != 0 {
                    flags |= 0x02;
                }
                buf.push(flags);
                if *scene_bias != 0 {
                    buf.write_u16::<LittleEndian>(*scene_bias)?;
                }
            }
            Action::GotoLabel(label) => self.put_str(&mut buf, label),
            Action::GetUrl { url, target } => {
                self.put_str(&mut buf, url);
                self.put_str(&mut buf, target);
            }
            Action::GetUrl2 {
                send_vars_method,
                load_target,
                load_variables,
            } => {
                let mut flags = send_vars_method << 6;
                if *load_target {
                    flags |= 0x02;
                }
                if *load_variables {
                    flags |= 0x01;
                }
                buf.push(flags);
            }
            Action::StoreRegister(register) => buf.push(*register),
            Action::SetTarget(target) => self.put_str(&mut buf, target),
            Action::WaitForFrame { frame, skip_count } => {
                buf.write_u16::<LittleEndian>(*frame)?;
                buf.push(*skip_count);
            }
            Action::WaitForFrame2 { skip_count } => buf.push(*skip_count),
            Action::DefineFunction {
                name,
                params,
                body_len,
            } => {
                self.put_str(&mut buf, name);
                buf.write_u16::<LittleEndian>(params.len() as u16)?;
                for param in params {
                    self.put_str(&mut buf, param);
                }
                buf.write_u16::<LittleEndian>(*body_len as u16)?;
            }
            Action::DefineFunction2 {
                name,
                register_count,
                flags,
                params,
                body_len,
            } => {
                self.put_str(&mut buf, name);
                buf.write_u16::<LittleEndian>(params.len() as u16)?;
                buf.push(*register_count);
                buf.write_u16::<LittleEndian>(flags.0)?;
                for (register, param) in params {
                    buf.push(*register);
                    self.put_str(&mut buf, param);
                }
                buf.write_u16::<LittleEndian>(*body_len as u16)?;
            }
            Action::Try(block) => {
                let mut flags = 0u8;
                if block.catch_len > 0 {
                    flags |= 0x01;
                }
                if block.finally_len > 0 {
                    flags |= 0x02;
                }
                if matches!(block.catch_var, CatchVar::Register(_)) {
                    flags |= 0x04;
                }
                buf.push(flags);
                buf.write_u16::<LittleEndian>(block.try_len as u16)?;
                buf.write_u16::<LittleEndian>(block.catch_len as u16)?;
                buf.write_u16::<LittleEndian>(block.finally_len as u16)?;
                match &block.catch_var {
                    CatchVar::Name(name) => self.put_str(&mut buf, name),
                    CatchVar::Register(register) => buf.push(*register),
                }
            }
            Action::With { body_len } => {
                buf.write_u16::<LittleEndian>(*body_len as u16)?;
            }
            Action::Call => (),
            Action::Unknown { .. } => unreachable!("handled by caller"),
            _ => unreachable!("single-byte action has no payload"),
        }
        Ok(buf)
    }

    fn put_str(&self, buf: &mut Vec<u8>, text: &str) {
        if self.version >= 6 {
            buf.extend_from_slice(text.as_bytes());
        } else {
            let (bytes, _, _) = WINDOWS_1252.encode(text);
            buf.extend_from_slice(&bytes);
        }
        buf.push(0);
    }
}
