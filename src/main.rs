use local_inference::cli::commands::{ChatArgs, CliArgs, Commands, EngineArgs, GreetArgs, ProbeArgs};
use local_inference::cli::output::OutputFormatter;
use local_inference::persona::{
    build_persona_prompt, greeter_question, PersonaProfile, DEFAULT_MAX_PROJECTS,
    GREETER_ATTEMPTS, GREETER_RETRY_DELAY,
};
use local_inference::progress::{LoggingHandler, ProgressEvent, ProgressHandler};
use local_inference::util::logging::{init_logging, LogSettings};
use local_inference::{
    probe, Coordinator, GenAIProvider, GenerateOptions, HardwareDetector, InferenceError,
    OrchestratorConfig, Status, SubmitOptions, NAME, VERSION,
};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn, Level};

const EXIT_UNSUPPORTED: i32 = 2;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Probe(probe_args) => handle_probe(probe_args),
        Commands::Chat(chat_args) => handle_chat(chat_args, args.quiet).await,
        Commands::Greet(greet_args) => handle_greet(greet_args, args.quiet).await,
    };

    process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let settings = LogSettings::from_config(&OrchestratorConfig::default());
    let settings = if let Some(level) = args.log_level {
        settings.with_level(level)
    } else if args.verbose {
        settings.with_level(Level::DEBUG)
    } else if args.quiet {
        settings.with_level(Level::ERROR)
    } else {
        settings
    };

    init_logging(settings);
}

fn handle_probe(args: &ProbeArgs) -> i32 {
    let hints = HardwareDetector::detect();
    let report = probe(&hints);
    let formatter = OutputFormatter::new(args.format.into());

    match formatter.format_probe(&report, &hints) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            error!("Failed to format capability report: {}", e);
            return 1;
        }
    }

    if args.config {
        let config = match OrchestratorConfig::from_env() {
            Ok(config) => config,
            Err(e) => {
                error!("Invalid environment configuration: {}", e);
                return 1;
            }
        };
        match formatter.format_config(&config) {
            Ok(output) => println!("\n{}", output),
            Err(e) => {
                error!("Failed to format configuration: {}", e);
                return 1;
            }
        }
    }

    if report.supported {
        0
    } else {
        EXIT_UNSUPPORTED
    }
}

fn build_config(args: &EngineArgs) -> Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::from_env().context("Invalid environment configuration")?;
    if let Some(provider) = args.backend {
        debug!("Provider explicitly set to: {}", provider.as_str());
        config = config.with_provider(provider);
    }
    if let Some(ref model) = args.model {
        debug!("Model overridden to: {}", model);
        config = config.with_model(model.clone());
    }
    if let Some(ref fallback) = args.fallback_model {
        config = config.with_fallback_model(Some(fallback.clone()).filter(|f| !f.is_empty()));
    }
    if args.no_worker {
        config = config.with_worker(false);
    }

    config.validate().context("Invalid configuration")?;
    debug!("{}", config);
    Ok(config)
}

fn build_coordinator(args: &EngineArgs) -> Result<Coordinator> {
    let config = build_config(args)?;
    let provider = GenAIProvider::new(config.provider, config.request_timeout())
        .with_endpoint(config.api_base_url.clone());
    Ok(Coordinator::new(
        config,
        Arc::new(provider),
        HardwareDetector::detect(),
    ))
}

fn progress_bar(quiet: bool) -> (ProgressBar, Arc<dyn ProgressHandler>) {
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    let style = ProgressStyle::with_template("{spinner} [{bar:30}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));

    let handle = bar.clone();
    let handler: Arc<dyn ProgressHandler> = Arc::new(move |event: &ProgressEvent| match event {
        ProgressEvent::StageStarted { stage, model_id } => {
            handle.set_position(0);
            handle.set_message(format!("{} ({})", model_id, stage));
        }
        ProgressEvent::Progress { fraction, text, .. } => {
            handle.set_position((fraction * 100.0).round() as u64);
            if let Some(text) = text {
                handle.set_message(text.clone());
            }
        }
        ProgressEvent::StageFailed { .. } => handle.println(format!("\u{26A0} {}", event)),
        ProgressEvent::Ready { .. } | ProgressEvent::Failed { .. } => {}
    });
    (bar, handler)
}

/// Loads the shared engine, reporting progress; `Err` carries the exit code
async fn ensure_engine(
    coordinator: &Coordinator,
    system_prompt: Option<String>,
    quiet: bool,
) -> std::result::Result<(), i32> {
    let (bar, handler) = progress_bar(quiet);
    let bar_subscription = coordinator.on_progress(handler);
    let log_subscription = coordinator.on_progress(Arc::new(LoggingHandler));

    let result = coordinator.ensure(system_prompt).await;
    bar.finish_and_clear();
    bar_subscription.unsubscribe();
    log_subscription.unsubscribe();

    match result {
        Ok(()) if coordinator.status() == Status::Unsupported => {
            let reasons: Vec<String> = coordinator
                .capability_report()
                .reasons
                .iter()
                .map(ToString::to_string)
                .collect();
            eprintln!(
                "Local inference is not supported on this device ({})",
                reasons.join(", ")
            );
            Err(EXIT_UNSUPPORTED)
        }
        Ok(()) => {
            info!(
                model = %coordinator.model_id().unwrap_or_default(),
                mode = ?coordinator.execution_mode(),
                "Engine ready"
            );
            Ok(())
        }
        Err(e) => {
            error!("Engine failed to load: {}", e);
            Err(1)
        }
    }
}

fn install_interrupt_handler(coordinator: &Coordinator) -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    let coordinator = coordinator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight requests");
            flag.store(true, Ordering::SeqCst);
            coordinator.cancel_all();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            process::exit(130);
        }
    });
    interrupted
}

fn resolve_system_prompt(args: &ChatArgs) -> Result<Option<String>> {
    if let Some(ref path) = args.persona {
        let profile = PersonaProfile::from_file(path)
            .with_context(|| format!("Failed to load persona {}", path.display()))?;
        return Ok(Some(build_persona_prompt(&profile, DEFAULT_MAX_PROJECTS)));
    }
    Ok(args.system.clone())
}

fn submit_options(args: &ChatArgs) -> SubmitOptions {
    let mut generate = GenerateOptions::default();
    if let Some(max_tokens) = args.max_tokens {
        generate = generate.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = args.temperature {
        generate = generate.with_temperature(temperature);
    }
    if let Some(top_p) = args.top_p {
        generate = generate.with_top_p(top_p);
    }
    if !args.stop.is_empty() {
        generate = generate.with_stop(args.stop.clone());
    }

    if args.stream {
        SubmitOptions::streaming()
            .with_on_chunk(|chunk| {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            })
            .with_generate(generate)
    } else {
        SubmitOptions::default().with_generate(generate)
    }
}

async fn answer(
    coordinator: &Coordinator,
    args: &ChatArgs,
    prompt: &str,
) -> std::result::Result<String, InferenceError> {
    let handle = coordinator.submit_cancelable(prompt, submit_options(args));
    debug!(request_id = %handle.id(), "Prompt submitted");

    let Some(secs) = args.timeout else {
        return handle.await;
    };
    let canceller = handle.canceller();
    match tokio::time::timeout(Duration::from_secs(secs), handle).await {
        Ok(result) => result,
        Err(_) => {
            canceller.cancel();
            warn!("No answer within {}s, request cancelled", secs);
            Err(InferenceError::Cancelled)
        }
    }
}

async fn answer_and_print(coordinator: &Coordinator, args: &ChatArgs, prompt: &str) -> bool {
    match answer(coordinator, args, prompt).await {
        Ok(text) => {
            if args.stream {
                println!();
            } else {
                println!("{}", text);
            }
            true
        }
        Err(e) if e.is_cancelled() => {
            if args.stream {
                println!();
            }
            eprintln!("Request cancelled");
            false
        }
        Err(e) => {
            if args.stream {
                println!();
            }
            error!("Request failed: {}", e);
            false
        }
    }
}

async fn handle_chat(args: &ChatArgs, quiet: bool) -> i32 {
    let system_prompt = match resolve_system_prompt(args) {
        Ok(prompt) => prompt,
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    };
    let coordinator = match build_coordinator(&args.engine) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("\nPlease check your environment variables and command-line arguments.");
            return 1;
        }
    };

    if let Err(code) = ensure_engine(&coordinator, system_prompt, quiet).await {
        return code;
    }
    let interrupted = install_interrupt_handler(&coordinator);

    if let Some(ref prompt) = args.prompt {
        return if answer_and_print(&coordinator, args, prompt).await {
            0
        } else {
            1
        };
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut all_ok = true;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read standard input: {}", e);
                return 1;
            }
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        all_ok &= answer_and_print(&coordinator, args, prompt).await;
    }

    if all_ok && !interrupted.load(Ordering::SeqCst) {
        0
    } else {
        1
    }
}

async fn handle_greet(args: &GreetArgs, quiet: bool) -> i32 {
    let coordinator = match build_coordinator(&args.engine) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    };

    // The greeter always answers; load problems only change which question
    if let Err(code) = ensure_engine(&coordinator, None, quiet).await {
        debug!(exit_code = code, "Engine unavailable, greeting with the fallback question");
    }

    let question = greeter_question(&coordinator, GREETER_ATTEMPTS, GREETER_RETRY_DELAY).await;
    println!("{}", question);
    0
}
