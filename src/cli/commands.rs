use clap::{Parser, Subcommand, ValueEnum};
use genai::adapter::AdapterKind;
use std::path::PathBuf;
use tracing::Level;

/// On-device LLM orchestration: probe, load with fallbacks, serve prompts
#[derive(Parser, Debug)]
#[command(
    name = "local-inference",
    about = "Run prompts against a shared local LLM engine with fallback loading",
    version,
    author,
    long_about = "local-inference checks whether this device can host a local LLM, loads one \
                  engine through a fallback chain (background worker, main thread, lighter \
                  model), and serializes prompts against it with streaming and cancellation."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        global = true,
        value_name = "LEVEL",
        value_parser = parse_log_level,
        help = "Set logging level (trace, debug, info, warn, error)"
    )]
    pub log_level: Option<Level>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Check whether this device supports local inference",
        long_about = "Detects memory, CPU cores and accelerator presence and prints the \
                      capability verdict with every unmet requirement.\n\n\
                      Examples:\n  \
                      local-inference probe\n  \
                      local-inference probe --format json\n  \
                      local-inference probe --config"
    )]
    Probe(ProbeArgs),

    #[command(
        about = "Answer prompts with the local engine",
        long_about = "Loads the engine (showing progress) and answers PROMPT, or every line of \
                      standard input when PROMPT is omitted. Ctrl-C cancels in-flight work.\n\n\
                      Examples:\n  \
                      local-inference chat \"What is Rust?\"\n  \
                      local-inference chat --stream --persona me.toml \"Who are you?\"\n  \
                      echo hello | local-inference chat --no-worker --model llama3.2:3b"
    )]
    Chat(ChatArgs),

    #[command(
        about = "Generate the greeter's opening question",
        long_about = "Asks the engine for a yes/no question identifying IT professionals, \
                      retrying up to 3 times and falling back to a fixed question."
    )]
    Greet(GreetArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ProbeArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(long, help = "Also print the effective engine configuration")]
    pub config: bool,
}

/// Engine selection shared by the commands that load a model
#[derive(Parser, Debug, Clone, Default)]
pub struct EngineArgs {
    #[arg(
        short = 'b',
        long,
        value_parser = parse_adapter_kind,
        help = "Engine backend (defaults to LOCAL_INFERENCE_PROVIDER or ollama)"
    )]
    pub backend: Option<AdapterKind>,

    #[arg(short = 'm', long, value_name = "MODEL", help = "Primary model id")]
    pub model: Option<String>,

    #[arg(
        long,
        value_name = "MODEL",
        help = "Lighter model tried last (empty string disables it)"
    )]
    pub fallback_model: Option<String>,

    #[arg(long, help = "Skip the background worker strategy")]
    pub no_worker: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ChatArgs {
    #[arg(value_name = "PROMPT", help = "Prompt to answer (reads stdin lines when omitted)")]
    pub prompt: Option<String>,

    #[arg(short = 's', long, help = "Print the answer as it is generated")]
    pub stream: bool,

    #[arg(long, value_name = "TEXT", conflicts_with = "persona", help = "System prompt")]
    pub system: Option<String>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Persona profile (TOML or JSON) rendered into the system prompt"
    )]
    pub persona: Option<PathBuf>,

    #[arg(long, value_name = "N", help = "Maximum tokens to generate")]
    pub max_tokens: Option<u32>,

    #[arg(long, value_name = "FLOAT", help = "Sampling temperature")]
    pub temperature: Option<f32>,

    #[arg(long, value_name = "FLOAT", help = "Nucleus sampling probability")]
    pub top_p: Option<f32>,

    #[arg(long, value_name = "SEQ", help = "Stop sequence (repeatable)")]
    pub stop: Vec<String>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Cancel an answer that takes longer than this"
    )]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct GreetArgs {
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

fn parse_adapter_kind(s: &str) -> Result<AdapterKind, String> {
    crate::config::parse_provider(s).map_err(|e| e.to_string())
}

fn parse_log_level(s: &str) -> Result<Level, String> {
    crate::util::logging::parse_level(s)
        .ok_or_else(|| format!("unknown level '{}', expected trace, debug, info, warn or error", s))
}
