//! Tool implementations exposed to the Warden agent: shell command
//! execution, arithmetic, and policy-checked file access.

mod arguments;
mod calculate;
mod command;
mod file;

pub use calculate::CalculateTool;
pub use command::CommandTool;
pub use file::{FileReadTool, FileWriteTool};
