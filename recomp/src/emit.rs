//! Per-script C emission.
//!
//! One script translates in two passes over the same byte stream: pass 1
//! collects every offset that needs a `label_<offset>:`, pass 2 re-decodes and
//! emits one C statement group per action. Function, With and Try bodies are
//! emitted inline between begin/end runtime calls, so stream offsets (and
//! therefore label names) stay unique across the whole script.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

use action::{Action, CatchVar, PushValue, Reader};

use crate::strings::{escape_c, StringPool};
use crate::{RecompError, Result};

pub(crate) struct ScriptEmitter<'a> {
    code: &'a [u8],
    pool: &'a mut StringPool,
    labels: BTreeSet<usize>,
    /// WaitForFrame action offset -> the offset its skip count resolves to.
    skips: HashMap<usize, usize>,
    /// Active constant pool, as string-pool ids.
    constants: Vec<usize>,
    out: String,
}

impl<'a> ScriptEmitter<'a> {
    /// Translates one DoAction payload into the body of a `script_<id>`
    /// function, interning string literals into the shared pool.
    pub fn translate(code: &'a [u8], pool: &'a mut StringPool) -> Result<String> {
        let mut emitter = ScriptEmitter {
            code,
            pool,
            labels: BTreeSet::new(),
            skips: HashMap::new(),
            constants: Vec::new(),
            out: String::new(),
        };
        emitter.collect_labels(0..code.len())?;
        emitter.emit_region(0..code.len())?;
        if emitter.labels.contains(&code.len()) {
            // A branch one past the last action needs a landing statement.
            emitter.out.push_str(&format!("label_{}: ;\n", code.len()));
        }
        Ok(emitter.out)
    }

    fn collect_labels(&mut self, region: Range<usize>) -> Result<()> {
        let mut reader = Reader::new(&self.code[..region.end]);
        reader.set_pos(region.start);
        while reader.pos() < region.end {
            let Some(decoded) = reader.read_action()? else {
                break;
            };
            match &decoded.action {
                Action::Jump { offset } | Action::If { offset } => {
                    let target = self.branch_target(decoded.next, *offset, decoded.offset)?;
                    self.labels.insert(target);
                }
                Action::WaitForFrame { skip_count, .. }
                | Action::WaitForFrame2 { skip_count } => {
                    let target = self.skip_target(decoded.next, *skip_count, region.end)?;
                    self.labels.insert(target);
                    self.skips.insert(decoded.offset, target);
                }
                _ => (),
            }
            let body = decoded.action.trailing_body_len();
            if body > 0 {
                self.collect_labels(decoded.next - body..decoded.next)?;
            }
        }
        Ok(())
    }

    fn emit_region(&mut self, region: Range<usize>) -> Result<()> {
        let mut reader = Reader::new(&self.code[..region.end]);
        reader.set_pos(region.start);
        while reader.pos() < region.end {
            let Some(decoded) = reader.read_action()? else {
                break;
            };
            if self.labels.contains(&decoded.offset) {
                self.out.push_str(&format!("label_{}:\n", decoded.offset));
            }
            let offset = decoded.offset;
            let next = decoded.next;

            match decoded.action {
                Action::End => (),

                Action::Push(values) => {
                    for value in values {
                        self.emit_push(value, offset)?;
                    }
                }
                Action::ConstantPool(strings) => {
                    self.constants = strings.iter().map(|s| self.pool.intern(s)).collect();
                    self.line(format!("/* constant pool: {} entries */", self.constants.len()));
                }

                Action::Jump { offset: branch } => {
                    let target = self.branch_target(next, branch, offset)?;
                    self.line(format!("goto label_{target};"));
                }
                Action::If { offset: branch } => {
                    let target = self.branch_target(next, branch, offset)?;
                    self.line(format!(
                        "if (evaluateCondition(stack, sp)) goto label_{target};"
                    ));
                }
                Action::WaitForFrame { frame, .. } => {
                    let target = self.skips[&offset];
                    self.line(format!(
                        "if (!actionWaitForFrame(stack, sp, {frame})) goto label_{target};"
                    ));
                }
                Action::WaitForFrame2 { .. } => {
                    let target = self.skips[&offset];
                    self.line(format!(
                        "if (!actionWaitForFrame2(stack, sp)) goto label_{target};"
                    ));
                }

                Action::StoreRegister(register) => {
                    self.line(format!("actionStoreRegister(stack, sp, {register});"));
                }
                Action::GotoFrame(frame) => {
                    self.line(format!("actionGotoFrame(stack, sp, {frame});"));
                }
                Action::GotoFrame2 {
                    set_play,
                    scene_bias,
                } => {
                    self.line(format!(
                        "actionGotoFrame2(stack, sp, {}, {scene_bias});",
                        u8::from(set_play)
                    ));
                }
                Action::GotoLabel(label) => {
                    let id = self.pool.intern(&label);
                    self.line(format!("actionGotoLabel(stack, sp, str_{id});"));
                }
                Action::SetTarget(target) => {
                    let id = self.pool.intern(&target);
                    self.line(format!("actionSetTarget(stack, sp, str_{id});"));
                }
                Action::GetUrl { url, target } => {
                    let url_id = self.pool.intern(&url);
                    let target_id = self.pool.intern(&target);
                    self.line(format!(
                        "actionGetUrl(stack, sp, str_{url_id}, str_{target_id});"
                    ));
                }
                Action::GetUrl2 {
                    send_vars_method,
                    load_target,
                    load_variables,
                } => {
                    self.line(format!(
                        "actionGetUrl2(stack, sp, {send_vars_method}, {}, {});",
                        u8::from(load_target),
                        u8::from(load_variables)
                    ));
                }

                Action::DefineFunction {
                    name,
                    params,
                    body_len,
                } => {
                    self.line(format!(
                        "actionDefineFunctionBegin(stack, sp, \"{}\", {}, {body_len});",
                        escape_c(&name),
                        params.len()
                    ));
                    for param in &params {
                        self.line(format!(
                            "actionFunctionParam(stack, sp, 0, \"{}\");",
                            escape_c(param)
                        ));
                    }
                    self.emit_region(next - body_len..next)?;
                    self.line("actionDefineFunctionEnd(stack, sp);");
                }
                Action::DefineFunction2 {
                    name,
                    register_count,
                    flags,
                    params,
                    body_len,
                } => {
                    self.line(format!(
                        "actionDefineFunction2Begin(stack, sp, \"{}\", {register_count}, \
                         0x{:04X}, {}, {body_len});",
                        escape_c(&name),
                        flags.0,
                        params.len()
                    ));
                    for (register, param) in &params {
                        self.line(format!(
                            "actionFunctionParam(stack, sp, {register}, \"{}\");",
                            escape_c(param)
                        ));
                    }
                    self.emit_region(next - body_len..next)?;
                    self.line("actionDefineFunctionEnd(stack, sp);");
                }
                Action::Try(block) => {
                    let body_start =
                        next - block.try_len - block.catch_len - block.finally_len;
                    self.line(format!(
                        "actionTryBegin(stack, sp, {}, {}, {});",
                        block.try_len, block.catch_len, block.finally_len
                    ));
                    match &block.catch_var {
                        CatchVar::Name(name) => self.line(format!(
                            "actionTryCatchName(stack, sp, \"{}\");",
                            escape_c(name)
                        )),
                        CatchVar::Register(register) => self.line(format!(
                            "actionTryCatchRegister(stack, sp, {register});"
                        )),
                    }
                    self.emit_region(body_start..body_start + block.try_len)?;
                    if block.has_catch() {
                        self.line("actionTryCatch(stack, sp);");
                        let start = body_start + block.try_len;
                        self.emit_region(start..start + block.catch_len)?;
                    }
                    if block.has_finally() {
                        self.line("actionTryFinally(stack, sp);");
                        let start = body_start + block.try_len + block.catch_len;
                        self.emit_region(start..start + block.finally_len)?;
                    }
                    self.line("actionTryEnd(stack, sp);");
                }
                Action::With { body_len } => {
                    self.line(format!("actionWithStart(stack, sp, {body_len});"));
                    self.emit_region(next - body_len..next)?;
                    self.line("actionWithEnd(stack, sp);");
                }

                Action::Unknown { opcode, .. } => {
                    log::warn!("unknown opcode {opcode:#04x} at offset {offset} left as comment");
                    self.line(format!("/* unknown opcode 0x{opcode:02X} */"));
                }

                other => {
                    let opcode = other
                        .opcode()
                        .expect("every remaining action maps to an opcode");
                    self.line(format!("action{opcode:?}(stack, sp);"));
                }
            }
        }
        Ok(())
    }

    fn emit_push(&mut self, value: PushValue, offset: usize) -> Result<()> {
        match value {
            PushValue::Str(text) => {
                let id = self.pool.intern(&text);
                self.line(format!("PUSH_STR_ID(str_{id}, {}, {id});", text.len()));
            }
            PushValue::F32(f) => self.line(format!(
                "PUSH(ACTION_STACK_VALUE_F32, 0x{:08X});",
                f.to_bits()
            )),
            PushValue::F64(f) => self.line(format!(
                "PUSH(ACTION_STACK_VALUE_F64, 0x{:016X}ULL);",
                f.to_bits()
            )),
            PushValue::I32(i) => self.line(format!(
                "PUSH(ACTION_STACK_VALUE_I32, 0x{:08X});",
                i as u32
            )),
            PushValue::Bool(b) => self.line(format!(
                "PUSH(ACTION_STACK_VALUE_BOOLEAN, {});",
                u8::from(b)
            )),
            PushValue::Null => self.line("PUSH(ACTION_STACK_VALUE_NULL, 0);"),
            PushValue::Undefined => self.line("PUSH(ACTION_STACK_VALUE_UNDEFINED, 0);"),
            PushValue::Register(register) => {
                self.line(format!("actionPushRegister(stack, sp, {register});"));
            }
            PushValue::Constant8(index) => self.emit_constant(usize::from(index), offset)?,
            PushValue::Constant16(index) => self.emit_constant(usize::from(index), offset)?,
        }
        Ok(())
    }

    // Pool strings are declared elsewhere, so the length is left to strlen.
    fn emit_constant(&mut self, index: usize, offset: usize) -> Result<()> {
        let id = *self
            .constants
            .get(index)
            .ok_or(RecompError::BadConstantIndex { index, offset })?;
        self.line(format!("PUSH_STR_ID(str_{id}, strlen(str_{id}), {id});"));
        Ok(())
    }

    fn line(&mut self, text: impl AsRef<str>) {
        self.out.push('\t');
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn branch_target(&self, next: usize, branch: i16, at: usize) -> Result<usize> {
        let target = next as i64 + i64::from(branch);
        if target < 0 || target > self.code.len() as i64 {
            return Err(RecompError::BranchOutOfRange { offset: at, target });
        }
        Ok(target as usize)
    }

    /// Resolves a WaitForFrame skip count: `count` whole actions forward.
    fn skip_target(&self, from: usize, count: u8, end: usize) -> Result<usize> {
        let mut reader = Reader::new(&self.code[..end]);
        reader.set_pos(from);
        for _ in 0..count {
            if reader.read_action()?.is_none() {
                break;
            }
        }
        Ok(reader.pos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action::Writer;

    fn assemble(actions: &[Action]) -> Vec<u8> {
        let mut writer = Writer::new(6);
        for action in actions {
            writer.action(action).unwrap();
        }
        writer.action(&Action::End).unwrap();
        writer.into_bytes()
    }

    fn translate(code: &[u8]) -> (String, StringPool) {
        let mut pool = StringPool::new();
        let out = ScriptEmitter::translate(code, &mut pool).unwrap();
        (out, pool)
    }

    fn push(value: PushValue) -> Action {
        Action::Push(vec![value])
    }

    #[test]
    fn simple_ops_become_runtime_calls() {
        let code = assemble(&[
            push(PushValue::F32(4.5)),
            push(PushValue::F32(3.5)),
            Action::Add,
            Action::Trace,
        ]);
        let (out, _) = translate(&code);
        assert_eq!(
            out,
            "\tPUSH(ACTION_STACK_VALUE_F32, 0x40900000);\n\
             \tPUSH(ACTION_STACK_VALUE_F32, 0x40600000);\n\
             \tactionAdd(stack, sp);\n\
             \tactionTrace(stack, sp);\n"
        );
    }

    #[test]
    fn string_literals_deduplicate_across_pushes() {
        let code = assemble(&[
            push(PushValue::Str("hello".to_string())),
            push(PushValue::Str("world".to_string())),
            push(PushValue::Str("hello".to_string())),
            Action::StringAdd,
        ]);
        let (out, pool) = translate(&code);
        assert_eq!(pool.len(), 2);
        assert_eq!(out.matches("PUSH_STR_ID(str_0, 5, 0);").count(), 2);
        assert_eq!(out.matches("PUSH_STR_ID(str_1, 5, 1);").count(), 1);
    }

    #[test]
    fn branches_emit_labels_and_gotos() {
        // 0: If +1 (over the Play at 5), 5: Play, 6: Stop, 7: End
        let code = assemble(&[Action::If { offset: 1 }, Action::Play, Action::Stop]);
        let (out, _) = translate(&code);
        assert_eq!(
            out,
            "\tif (evaluateCondition(stack, sp)) goto label_6;\n\
             \tactionPlay(stack, sp);\n\
             label_6:\n\
             \tactionStop(stack, sp);\n"
        );
    }

    #[test]
    fn backward_jumps_target_earlier_labels() {
        // 0: Trace, 1: Jump -6 (back to the Trace)
        let code = assemble(&[Action::Trace, Action::Jump { offset: -6 }]);
        let (out, _) = translate(&code);
        assert_eq!(
            out,
            "label_0:\n\
             \tactionTrace(stack, sp);\n\
             \tgoto label_0;\n"
        );
    }

    #[test]
    fn jump_past_the_end_lands_on_a_null_statement() {
        let code = assemble(&[Action::Jump { offset: 1 }]);
        let (out, _) = translate(&code);
        assert_eq!(out, format!("\tgoto label_{0};\nlabel_{0}: ;\n", code.len()));
    }

    #[test]
    fn out_of_range_branch_is_an_error() {
        let code = assemble(&[Action::Jump { offset: -100 }]);
        let mut pool = StringPool::new();
        assert!(matches!(
            ScriptEmitter::translate(&code, &mut pool),
            Err(RecompError::BranchOutOfRange { .. })
        ));
    }

    #[test]
    fn constant_pool_references_resolve_to_interned_strings() {
        let code = assemble(&[
            Action::ConstantPool(vec!["alpha".to_string(), "beta".to_string()]),
            push(PushValue::Constant8(1)),
            push(PushValue::Constant8(0)),
        ]);
        let (out, pool) = translate(&code);
        assert_eq!(pool.len(), 2);
        assert!(out.contains("/* constant pool: 2 entries */"));
        assert!(out.contains("PUSH_STR_ID(str_1, strlen(str_1), 1);"));
        assert!(out.contains("PUSH_STR_ID(str_0, strlen(str_0), 0);"));
    }

    #[test]
    fn constant_index_out_of_range_is_an_error() {
        let code = assemble(&[push(PushValue::Constant8(3))]);
        let mut pool = StringPool::new();
        assert!(matches!(
            ScriptEmitter::translate(&code, &mut pool),
            Err(RecompError::BadConstantIndex { index: 3, .. })
        ));
    }

    #[test]
    fn wait_for_frame_skips_whole_actions() {
        // WaitForFrame skipping the two Play actions that follow it.
        let code = assemble(&[
            Action::WaitForFrame {
                frame: 1,
                skip_count: 2,
            },
            Action::Play,
            Action::Play,
            Action::Stop,
        ]);
        let (out, _) = translate(&code);
        assert_eq!(
            out,
            "\tif (!actionWaitForFrame(stack, sp, 1)) goto label_8;\n\
             \tactionPlay(stack, sp);\n\
             \tactionPlay(stack, sp);\n\
             label_8:\n\
             \tactionStop(stack, sp);\n"
        );
    }

    #[test]
    fn function_bodies_emit_inline_between_begin_and_end() {
        let body = {
            let mut writer = Writer::new(6);
            writer.action(&Action::Trace).unwrap();
            writer.into_bytes()
        };
        let mut writer = Writer::new(6);
        writer
            .action(&Action::DefineFunction {
                name: "f".to_string(),
                params: vec!["x".to_string()],
                body_len: body.len(),
            })
            .unwrap();
        writer.raw(&body);
        writer.action(&Action::End).unwrap();

        let (out, _) = translate(&writer.into_bytes());
        assert_eq!(
            out,
            "\tactionDefineFunctionBegin(stack, sp, \"f\", 1, 1);\n\
             \tactionFunctionParam(stack, sp, 0, \"x\");\n\
             \tactionTrace(stack, sp);\n\
             \tactionDefineFunctionEnd(stack, sp);\n"
        );
    }

    #[test]
    fn try_sections_emit_in_order() {
        let try_body = assemble(&[Action::Throw])[..2].to_vec(); // Throw only
        let catch_body = {
            let mut writer = Writer::new(6);
            writer.action(&Action::Pop).unwrap();
            writer.into_bytes()
        };
        let finally_body = {
            let mut writer = Writer::new(6);
            writer.action(&Action::Stop).unwrap();
            writer.into_bytes()
        };
        let mut writer = Writer::new(6);
        writer
            .action(&Action::Try(action::TryBlock {
                try_len: 1,
                catch_len: catch_body.len(),
                finally_len: finally_body.len(),
                catch_var: CatchVar::Name("e".to_string()),
            }))
            .unwrap();
        writer.raw(&try_body[..1]);
        writer.raw(&catch_body);
        writer.raw(&finally_body);
        writer.action(&Action::End).unwrap();

        let (out, _) = translate(&writer.into_bytes());
        assert_eq!(
            out,
            "\tactionTryBegin(stack, sp, 1, 1, 1);\n\
             \tactionTryCatchName(stack, sp, \"e\");\n\
             \tactionThrow(stack, sp);\n\
             \tactionTryCatch(stack, sp);\n\
             \tactionPop(stack, sp);\n\
             \tactionTryFinally(stack, sp);\n\
             \tactionStop(stack, sp);\n\
             \tactionTryEnd(stack, sp);\n"
        );
    }

    #[test]
    fn with_bodies_sit_between_start_and_end() {
        let body = {
            let mut writer = Writer::new(6);
            writer.action(&Action::GetVariable).unwrap();
            writer.into_bytes()
        };
        let mut writer = Writer::new(6);
        writer
            .action(&Action::With {
                body_len: body.len(),
            })
            .unwrap();
        writer.raw(&body);
        writer.action(&Action::End).unwrap();

        let (out, _) = translate(&writer.into_bytes());
        assert_eq!(
            out,
            "\tactionWithStart(stack, sp, 1);\n\
             \tactionGetVariable(stack, sp);\n\
             \tactionWithEnd(stack, sp);\n"
        );
    }

    #[test]
    fn register_pushes_and_stores_carry_the_index() {
        let code = assemble(&[
            push(PushValue::Register(2)),
            Action::StoreRegister(1),
            push(PushValue::Bool(true)),
            push(PushValue::Null),
            push(PushValue::Undefined),
            push(PushValue::I32(-7)),
        ]);
        let (out, _) = translate(&code);
        assert!(out.contains("actionPushRegister(stack, sp, 2);"));
        assert!(out.contains("actionStoreRegister(stack, sp, 1);"));
        assert!(out.contains("PUSH(ACTION_STACK_VALUE_BOOLEAN, 1);"));
        assert!(out.contains("PUSH(ACTION_STACK_VALUE_NULL, 0);"));
        assert!(out.contains("PUSH(ACTION_STACK_VALUE_UNDEFINED, 0);"));
        assert!(out.contains("PUSH(ACTION_STACK_VALUE_I32, 0xFFFFFFF9);"));
    }
}
