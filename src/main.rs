//! CLI entry point for the autonomous coding session loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde_json::Value;

use autocoder::config::{Credentials, load_config};
use autocoder::core::mode::{ModeRequest, RunMode};
use autocoder::core::outcome::SessionOutcome;
use autocoder::driver::{self, DriverConfig, RunOutcome, StopReason};
use autocoder::exit_codes;
use autocoder::io::claude::ClaudeFactory;
use autocoder::io::copilot::CopilotFactory;
use autocoder::io::paths::ProjectPaths;
use autocoder::io::progress::count_passing;
use autocoder::io::provider::ProviderKind;
use autocoder::io::security::AllowListPolicy;
use autocoder::logging;
use autocoder::session::{SessionObserver, SessionReport};

const RULE: &str = "======================================================================";
const THIN_RULE: &str = "----------------------------------------------------------------------";

#[derive(Parser)]
#[command(
    name = "autocoder",
    version,
    about = "Autonomous coding session loop that drives an AI backend until a feature list passes"
)]
struct Cli {
    /// Project directory the agent works in (created if missing).
    #[arg(long, default_value = "project")]
    project_dir: PathBuf,

    /// Model identifier (structured backend only).
    #[arg(long, default_value = "claude-sonnet-4-5")]
    model: String,

    /// Stop after this many sessions (unlimited if omitted).
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Run mode selection.
    #[arg(long, value_enum, default_value = "auto")]
    mode: ModeRequest,

    /// AI backend.
    #[arg(long, value_enum, default_value = "claude")]
    provider: ProviderKind,

    /// Application spec copied into the project for initializer runs.
    #[arg(long)]
    spec_file: Option<PathBuf>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let paths = ProjectPaths::new(&cli.project_dir);
    std::fs::create_dir_all(&paths.root)?;
    let harness = load_config(&paths.config_path)?;

    // Credentials are read once here and passed into client construction;
    // missing credentials fail before the loop starts.
    let credentials = Credentials::from_env();
    if cli.provider == ProviderKind::Claude {
        credentials.require_token()?;
    }

    print_banner(&cli);
    let mode = driver::prepare_run(&paths, cli.mode, cli.spec_file.as_deref())?;
    print_mode_notes(&paths, mode);

    let config = DriverConfig::from_harness(&harness, cli.max_iterations);
    let mut observer = ConsoleObserver {
        paths: paths.clone(),
    };
    let policy = Arc::new(AllowListPolicy::default());

    let outcome = match cli.provider {
        ProviderKind::Claude => {
            let factory = ClaudeFactory::new(
                &paths.root,
                &paths.settings_path,
                &harness.claude_command,
                &cli.model,
                credentials,
                policy,
                harness.max_line_bytes,
            );
            driver::run_loop(&paths, mode, &config, &factory, &mut observer)?
        }
        ProviderKind::Copilot => {
            let factory = CopilotFactory::new(
                &paths.root,
                &paths.copilot_config_dir,
                &harness.copilot_command,
                policy,
            );
            driver::run_loop(&paths, mode, &config, &factory, &mut observer)?
        }
    };

    print_final_summary(&paths, &outcome);
    Ok(exit_code_for(&outcome.stop))
}

fn exit_code_for(stop: &StopReason) -> i32 {
    match stop {
        StopReason::Complete => exit_codes::OK,
        StopReason::InitializerFailed => exit_codes::INITIALIZER_FAILED,
        StopReason::CorruptedFeatureList { .. } => exit_codes::CORRUPTED_FEATURE_LIST,
        StopReason::RateLimited { .. } => exit_codes::RATE_LIMITED,
        StopReason::IterationLimitReached { .. } => exit_codes::ITERATION_LIMIT,
    }
}

fn print_banner(cli: &Cli) {
    println!("\n{RULE}");
    println!("  AUTONOMOUS CODING AGENT");
    println!("{RULE}");
    println!("\nBackend: {}", cli.provider.as_str());
    println!("Project directory: {}", cli.project_dir.display());
    if cli.provider == ProviderKind::Claude {
        println!("Model: {}", cli.model);
    }
    match cli.max_iterations {
        Some(max) => println!("Max iterations: {max}"),
        None => println!("Max iterations: unlimited (will run until completion)"),
    }
    println!();
}

fn print_mode_notes(paths: &ProjectPaths, mode: RunMode) {
    match mode {
        RunMode::GreenfieldInit => {
            println!("Fresh start - running the greenfield initializer.");
            println!("The first session can take a long time while the agent");
            println!("generates the feature list. Watch for [Tool: ...] output.");
        }
        RunMode::EnhancementInit => {
            println!("Existing project detected - running the enhancement initializer.");
            println!("The agent is analyzing the codebase; this can take a while.");
        }
        RunMode::Continue => {
            println!("Continuing existing autonomous session.");
            print_progress(paths);
        }
    }
}

fn print_progress(paths: &ProjectPaths) {
    let (passing, total) = count_passing(&paths.feature_list_path);
    if total > 0 {
        let percentage = (passing as f64 / total as f64) * 100.0;
        println!("\nProgress: {passing}/{total} features passing ({percentage:.1}%)");
    } else {
        println!("\nProgress: feature_list.json not yet created");
    }
}

fn print_final_summary(paths: &ProjectPaths, outcome: &RunOutcome) {
    println!("\n{RULE}");
    match &outcome.stop {
        StopReason::Complete => {
            println!("  ALL FEATURES COMPLETE");
            println!("{RULE}");
            println!("\nEvery feature in feature_list.json is passing; nothing left to do.");
        }
        StopReason::InitializerFailed => {
            println!("  INITIALIZER FAILED");
            println!("{RULE}");
            println!("\nThe initializer session finished but feature_list.json was not created.");
            println!("The loop cannot continue without a feature list defining the work.");
            println!("Review the session output under .autocoder/sessions/ and retry.");
        }
        StopReason::CorruptedFeatureList { message } => {
            println!("  CORRUPTED FEATURE LIST");
            println!("{RULE}");
            println!("\nfeature_list.json exists but is unusable: {message}");
            println!("Fix the file by hand (a JSON array of feature objects) and retry.");
        }
        StopReason::RateLimited { message } => {
            println!("  RATE LIMIT REACHED - STOPPING");
            println!("{RULE}");
            println!("\n{message}");
            println!("\nWait for the reset time, then run again to resume.");
        }
        StopReason::IterationLimitReached { max } => {
            println!("  ITERATION LIMIT REACHED");
            println!("{RULE}");
            println!("\nStopped after {max} sessions.");
            println!("Run again (or drop --max-iterations) to continue.");
        }
    }
    println!("\nSessions run: {}", outcome.sessions_run);
    println!("Project directory: {}", paths.root.display());
    print_progress(paths);
    println!("{THIN_RULE}");
}

/// Console reporting for streamed sessions.
struct ConsoleObserver {
    paths: ProjectPaths,
}

impl SessionObserver for ConsoleObserver {
    fn session_started(&mut self, iteration: u32, mode: RunMode) {
        let kind = if mode.is_initializer() {
            "INITIALIZER"
        } else {
            "CODING AGENT"
        };
        println!("\n{RULE}");
        println!("  SESSION {iteration}: {kind}");
        println!("{RULE}\n");
        println!("Sending prompt to AI agent...\n");
    }

    fn stream_text(&mut self, text: &str) {
        print!("{text}");
        flush_stdout();
    }

    fn tool_call(&mut self, name: &str, args: &Value) {
        println!("\n[Tool: {name}]");
        let args_str = args.to_string();
        if args_str.len() > 200 {
            println!("   Input: {}...", truncate(&args_str, 200));
        } else {
            println!("   Input: {args_str}");
        }
        flush_stdout();
    }

    fn tool_result(&mut self, content: &str, is_error: bool) {
        if is_error {
            println!("   [Error] {}", truncate(content, 500));
        } else {
            println!("   [Done]");
        }
        flush_stdout();
    }

    fn tool_blocked(&mut self, content: &str) {
        println!("   [BLOCKED] {}", truncate(content, 500));
        flush_stdout();
    }

    fn process_done(&mut self, exit_code: i32) {
        if exit_code != 0 {
            println!("\n[Process exited with code {exit_code}]");
        }
    }

    fn rate_limited(&mut self, content: &str) {
        println!("\nWARNING: rate limit reached\n{content}");
    }

    fn session_finished(&mut self, report: &SessionReport) {
        println!("\n{THIN_RULE}");
        match &report.outcome {
            SessionOutcome::Continue { .. } => {}
            SessionOutcome::RecoverableError { .. } => {
                println!("Session encountered an error.");
                println!("The agent will be informed and retry with an adapted approach.");
            }
            SessionOutcome::LargeResponseError { .. } => {
                println!("A tool response exceeded the buffer limit.");
                println!("The agent will be informed and adapt its approach.");
            }
            SessionOutcome::RateLimited { .. } => {}
        }
        print_progress(&self.paths);
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    let mut cut = limit.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

fn flush_stdout() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
}
