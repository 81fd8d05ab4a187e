use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bytecode: {0}")]
    Action(#[from] action::ActionError),

    #[error("stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },

    #[error("branch target {target} falls outside the script at offset {offset}")]
    JumpOutOfRange { offset: usize, target: i64 },

    #[error("call depth limit ({0}) exceeded")]
    RecursionLimit(u32),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
