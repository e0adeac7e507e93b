pub mod command;
pub mod frame;
pub mod mode;

pub use command::{Command, CommandSpec, FieldMismatch, InvalidCommand, RawItem};
pub use frame::{CommandKind, Frame};
pub use mode::FlightMode;
