pub mod coerce;
pub mod error;
pub mod interpreter;
pub mod object;
pub mod player;
pub mod random;
pub mod scope;
pub mod value;

pub use error::{Result, RuntimeError};
pub use interpreter::Vm;
pub use player::Player;
pub use value::Value;
