//! Static translation of a movie's scripts into C sources targeting the
//! companion runtime's `action*` API. Scripts get ids in encounter order;
//! frame membership lands in the `tag_main.c` dispatch.

mod emit;
pub mod strings;

use std::fmt::Write;
use std::fs;
use std::path::Path;

use movie::Movie;
use thiserror::Error;

use crate::emit::ScriptEmitter;
use crate::strings::{escape_c, StringPool};

#[derive(Debug, Error)]
pub enum RecompError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bytecode: {0}")]
    Action(#[from] action::ActionError),

    #[error("branch target {target} falls outside the script at offset {offset}")]
    BranchOutOfRange { offset: usize, target: i64 },

    #[error("constant pool index {index} is out of range at offset {offset}")]
    BadConstantIndex { index: usize, offset: usize },
}

pub type Result<T> = std::result::Result<T, RecompError>;

/// The three generated sources, ready to be written out.
#[derive(Debug)]
pub struct Translation {
    pub script_decls: String,
    pub script_defs: String,
    pub tag_main: String,
}

impl Translation {
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        fs::write(dir.join("script_decls.h"), &self.script_decls)?;
        fs::write(dir.join("script_defs.c"), &self.script_defs)?;
        fs::write(dir.join("tag_main.c"), &self.tag_main)?;
        Ok(())
    }
}

/// Walks a movie's frames, translating every DoAction script.
pub struct Translator {
    pool: StringPool,
    scripts: Vec<String>,
    /// Script ids per frame, in execution order.
    manifest: Vec<Vec<usize>>,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator {
    pub fn new() -> Self {
        Self {
            pool: StringPool::new(),
            scripts: Vec::new(),
            manifest: Vec::new(),
        }
    }

    pub fn translate(mut self, movie: &Movie) -> Result<Translation> {
        for frame in movie.frames() {
            let mut ids = Vec::with_capacity(frame.scripts.len());
            for script in &frame.scripts {
                let id = self.scripts.len();
                let body = ScriptEmitter::translate(script, &mut self.pool)?;
                self.scripts.push(body);
                ids.push(id);
            }
            self.manifest.push(ids);
        }
        log::info!(
            "translated {} scripts over {} frames, {} pooled strings",
            self.scripts.len(),
            self.manifest.len(),
            self.pool.len()
        );
        Ok(self.render())
    }

    fn render(self) -> Translation {
        let mut decls = String::from("#pragma once\n\ntypedef unsigned int u32;\n\n");
        for id in 0..self.scripts.len() {
            writeln!(decls, "void script_{id}(char* stack, u32* sp);").expect("writes to String");
        }

        let mut defs = String::from(
            "#include <string.h>\n\n#include \"actionmodern/action.h\"\n#include \"script_decls.h\"\n",
        );
        if !self.pool.is_empty() {
            defs.push('\n');
            for (id, text) in self.pool.iter() {
                writeln!(defs, "static const char str_{id}[] = \"{}\";", escape_c(text))
                    .expect("writes to String");
            }
        }
        for (id, body) in self.scripts.iter().enumerate() {
            write!(defs, "\nvoid script_{id}(char* stack, u32* sp)\n{{\n{body}}}\n")
                .expect("writes to String");
        }

        let mut tag_main = String::from("#include \"script_decls.h\"\n\n");
        writeln!(tag_main, "const u32 frame_count = {};", self.manifest.len())
            .expect("writes to String");
        tag_main.push_str("\nvoid tag_main(u32 frame, char* stack, u32* sp)\n{\n");
        tag_main.push_str("\tswitch (frame)\n\t{\n");
        for (frame, ids) in self.manifest.iter().enumerate() {
            writeln!(tag_main, "\t\tcase {frame}:").expect("writes to String");
            for id in ids {
                writeln!(tag_main, "\t\t\tscript_{id}(stack, sp);").expect("writes to String");
            }
            tag_main.push_str("\t\t\tbreak;\n");
        }
        tag_main.push_str("\t}\n}\n");

        Translation {
            script_decls: decls,
            script_defs: defs,
            tag_main,
        }
    }
}
