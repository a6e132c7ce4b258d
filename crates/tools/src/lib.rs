//! Built-in tools: `bash` (backs `TERMINAL_COMMAND`) and `calculate`.

pub mod bash;
pub mod calculate;

pub use bash::BashTool;
pub use calculate::CalculateTool;
