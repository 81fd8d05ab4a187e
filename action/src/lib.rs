pub mod opcode;
pub mod reader;
pub mod types;
pub mod writer;

pub use opcode::Opcode;
pub use reader::{DecodedAction, Reader};
pub use types::{Action, CatchVar, Function2Flags, PushValue, TryBlock};
pub use writer::Writer;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated action payload at offset {offset}")]
    Truncated { offset: usize },

    #[error("unterminated string at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("unknown push value type {kind} at offset {offset}")]
    BadPushType { kind: u8, offset: usize },

    #[error("payload length {declared} disagrees with decoded size {decoded} at offset {offset}")]
    PayloadMismatch {
        declared: usize,
        decoded: usize,
        offset: usize,
    },
}

pub type Result<T> = std::result::Result<T, ActionError>;
