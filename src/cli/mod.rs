pub mod commands;
pub mod output;

pub use commands::{ChatArgs, CliArgs, Commands, EngineArgs, GreetArgs, OutputFormatArg, ProbeArgs};
pub use output::{OutputFormat, OutputFormatter};
