//! NovaScholar CLI
//!
//! Terminal front end for generating, taking and reviewing AP practice
//! exams.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use nova_report::json::JsonGenerator;
use nova_report::render::{status_line, QuestionRenderer, RenderStyle};
use nova_report::{format_clock, MarkdownGenerator, ResultsSummary};
use nova_session::{
    Accommodation, Config, Difficulty, ExamController, ExamMode, ExamRequestConfig, FileStore,
    GeminiBackend, HistoryEntry, LengthClass, SessionEvent, SessionStatus, SettingsManager,
    StructureTable,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Remaining-time marks announced during a timed exam.
const TIME_WARNINGS: [u64; 3] = [600, 300, 60];

/// NovaScholar - AP practice exams
///
/// Generates AP-style practice exams with a language model, runs them in
/// the terminal with an optional countdown, and keeps graded results.
#[derive(Parser, Debug)]
#[command(name = "nova")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: novascholar.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Directory for settings, the saved session and history
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new exam and take it
    Exam {
        /// Subject, e.g. "AP Biology"
        #[arg(short, long)]
        subject: String,

        /// Topic to focus the questions on
        #[arg(short, long, default_value = "")]
        topic: String,

        /// Exam length
        #[arg(short, long, default_value_t = LengthClass::Quick)]
        length: LengthClass,

        /// Timing mode
        #[arg(short, long, default_value_t = ExamMode::Timed)]
        mode: ExamMode,

        /// Question difficulty
        #[arg(short, long, default_value_t = Difficulty::Medium)]
        difficulty: Difficulty,
    },

    /// Continue a saved in-progress exam
    Resume,

    /// Browse graded exams
    #[command(subcommand)]
    History(HistoryCommand),

    /// Show or change accommodations
    #[command(subcommand)]
    Settings(SettingsCommand),

    /// List known subjects and their exam structure
    Subjects,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// List graded exams, oldest first
    List,
    /// Print the results document of one exam
    Show {
        /// History entry id
        id: String,
    },
    /// Export one exam's results
    Export {
        /// History entry id
        id: String,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Md)]
        format: ExportFormat,
        /// Write to this file instead of standard output
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Delete every graded exam
    Clear,
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Show accommodation flags
    Show,
    /// Flip one accommodation flag
    Toggle {
        /// large-text, high-contrast, dyslexia-font or extended-time
        name: Accommodation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Md,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, data_dir = ?args.data_dir, "Starting");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    config.validate()?;

    let store = FileStore::new(config.data_path());
    let mut settings = SettingsManager::load(store.clone());

    match args.command {
        Command::Exam {
            subject,
            topic,
            length,
            mode,
            difficulty,
        } => {
            let request =
                ExamRequestConfig::new(subject, topic, length, mode).with_difficulty(difficulty);
            let controller = build_controller(config, store, &settings)?;
            start_exam(&controller, request).await?;
            run_exam_loop(&controller, renderer(&settings)).await
        }
        Command::Resume => {
            let controller = build_controller(config, store, &settings)?;
            resume_exam(&controller).await?;
            run_exam_loop(&controller, renderer(&settings)).await
        }
        Command::History(command) => {
            let controller = build_controller(config, store, &settings)?;
            run_history(&controller, command).await
        }
        Command::Settings(SettingsCommand::Show) => {
            print_settings(&settings);
            Ok(())
        }
        Command::Settings(SettingsCommand::Toggle { name }) => {
            let value = settings.toggle(name);
            println!("{name}: {}", on_off(value));
            Ok(())
        }
        Command::Subjects => {
            print_subjects(&StructureTable::builtin());
            Ok(())
        }
    }
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn build_controller(
    config: Config,
    store: FileStore,
    settings: &SettingsManager,
) -> anyhow::Result<ExamController> {
    if config.endpoint.api_key().is_none() {
        tracing::warn!(
            env = %config.endpoint.api_key_env,
            "No API key set; requests will be sent without one"
        );
    }
    let backend = GeminiBackend::from_config(&config)?;
    Ok(ExamController::builder(config, Arc::new(backend))
        .accommodations(settings.current())
        .store(store)
        .build())
}

fn renderer(settings: &SettingsManager) -> QuestionRenderer {
    QuestionRenderer::new(RenderStyle::from_accommodations(&settings.current()))
}

// ============================================================================
// Exam
// ============================================================================

async fn start_exam(controller: &ExamController, request: ExamRequestConfig) -> anyhow::Result<()> {
    let blueprint = controller
        .table()
        .blueprint(&request.subject, request.length_class);
    if !blueprint.known_subject {
        println!(
            "'{}' is not a known subject; using a generic exam structure.",
            request.subject.trim()
        );
    }
    println!(
        "Generating {} ({}, {})...",
        blueprint.describe(),
        request.length_class,
        request.mode
    );

    controller.start_exam(request).await?;

    if let Some(session) = controller.session().await {
        println!();
        println!("{}", session.exam_title());
        match session.time_left_seconds() {
            Some(seconds) => println!("Time allowed: {}", format_clock(seconds)),
            None => println!("Untimed"),
        }
    }
    Ok(())
}

async fn resume_exam(controller: &ExamController) -> anyhow::Result<()> {
    let Some(status) = controller.resume().await else {
        anyhow::bail!(
            "There is no exam in progress\n\nSuggestion: Start one with 'nova exam --subject <SUBJECT>'"
        );
    };
    tracing::info!(status = %status, "Resuming exam");

    match status {
        SessionStatus::Configuring => {
            // The previous generation never finished; ask again.
            let Some(session) = controller.session().await else {
                return Ok(());
            };
            if let Some(error) = session.last_error() {
                println!("Previous attempt failed: {error}");
            }
            start_exam(controller, session.config().clone()).await
        }
        SessionStatus::Grading => {
            println!("Your answers have not been graded yet. Type 'retry' to submit them again.");
            Ok(())
        }
        _ => Ok(()),
    }
}

/// A command typed during an exam.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ExamInput {
    Answer(String),
    Next,
    Previous,
    GoTo(i64),
    Reveal,
    Submit,
    Quit,
    Help,
    Show,
    Unknown(String),
}

impl ExamInput {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(w, r)| (w, r.trim()));

        match word.to_lowercase().as_str() {
            "a" if !rest.is_empty() => Self::Answer(rest.to_string()),
            "n" => Self::Next,
            "p" => Self::Previous,
            "g" => rest.parse::<i64>().map_or_else(
                |_| Self::Unknown(line.to_string()),
                |n| Self::GoTo(n.saturating_sub(1)),
            ),
            "r" => Self::Reveal,
            "s" | "retry" => Self::Submit,
            "q" => Self::Quit,
            "h" | "?" => Self::Help,
            "" => Self::Show,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

enum Flow {
    Continue,
    Done,
}

async fn run_exam_loop(controller: &ExamController, renderer: QuestionRenderer) -> anyhow::Result<()> {
    let mut events = controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut auto_submitting = false;

    print_help();
    show_current(controller, &renderer).await;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    println!("Input closed. Your exam is saved; continue with 'nova resume'.");
                    return Ok(());
                };
                if let Flow::Done = handle_input(controller, &renderer, ExamInput::parse(&line)).await? {
                    return Ok(());
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Tick(tick)) if TIME_WARNINGS.contains(&tick.time_left_seconds) => {
                    println!("[{} remaining]", format_clock(tick.time_left_seconds));
                }
                Ok(SessionEvent::TimeExpired) => {
                    auto_submitting = true;
                    println!();
                    println!("Time is up. Submitting your answers...");
                }
                Ok(SessionEvent::Error(error)) if auto_submitting => {
                    auto_submitting = false;
                    eprintln!("Error: {}", error.message);
                    if error.retryable {
                        println!("Type 'retry' to submit again.");
                    }
                }
                Ok(SessionEvent::Graded(graded)) => {
                    let entry = controller.history_entry(&graded.entry_id).await?;
                    print_results(&entry);
                    return Ok(());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event receiver lagged");
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

async fn handle_input(
    controller: &ExamController,
    renderer: &QuestionRenderer,
    input: ExamInput,
) -> anyhow::Result<Flow> {
    let outcome = match input {
        ExamInput::Answer(text) => controller.answer_current(&text).await,
        ExamInput::Next => {
            if !controller.next().await {
                println!("This is the last question.");
            }
            Ok(())
        }
        ExamInput::Previous => {
            if !controller.previous().await {
                println!("This is the first question.");
            }
            Ok(())
        }
        ExamInput::GoTo(index) => {
            if !controller.navigate(index).await {
                println!("No such question.");
            }
            Ok(())
        }
        ExamInput::Reveal => controller.reveal_current().await,
        ExamInput::Submit => {
            println!("Submitting your answers for grading...");
            match controller.submit().await {
                Ok(entry) => {
                    print_results(&entry);
                    return Ok(Flow::Done);
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    if e.is_retryable() {
                        println!("Type 'retry' to submit again.");
                    }
                    return Ok(Flow::Continue);
                }
            }
        }
        ExamInput::Quit => match controller.abandon().await {
            Ok(()) => {
                println!("Exam abandoned.");
                return Ok(Flow::Done);
            }
            Err(e) => Err(e),
        },
        ExamInput::Help => {
            print_help();
            return Ok(Flow::Continue);
        }
        ExamInput::Show => Ok(()),
        ExamInput::Unknown(line) => {
            println!("Unknown command '{line}'. Type 'h' for help.");
            return Ok(Flow::Continue);
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
    }
    show_current(controller, renderer).await;
    Ok(Flow::Continue)
}

async fn show_current(controller: &ExamController, renderer: &QuestionRenderer) {
    let Some(session) = controller.session().await else {
        return;
    };
    if session.status() == SessionStatus::Grading {
        println!("Waiting for grading. Type 'retry' if the last submission failed.");
        return;
    }
    let Some(question) = session.current_question() else {
        return;
    };

    println!();
    println!("{}", status_line(&session));
    println!(
        "{}",
        renderer.render(
            question,
            session.questions().len(),
            session.answers().get(&question.id),
            session.revealed().contains(&question.id),
        )
    );
    print!("> ");
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

fn print_help() {
    println!("Commands:");
    println!("  a <answer>   answer (MCQ letter, free text, or A=..;B=.. for parts)");
    println!("  n / p        next / previous question");
    println!("  g <number>   go to question");
    println!("  r            reveal the answer (practice mode)");
    println!("  s            submit for grading");
    println!("  retry        submit again after a grading failure");
    println!("  q            quit and discard this exam");
}

fn print_results(entry: &HistoryEntry) {
    let summary = ResultsSummary::from_entry(entry);
    println!();
    println!("=== {} Results ===", summary.subject);
    println!("AP score estimate: {} / 5", summary.ap_score);
    println!("Raw score: {}", summary.raw_score);
    if let Some(pct) = summary.mcq.percentage() {
        println!(
            "Multiple choice: {}/{} ({pct}%)",
            summary.mcq.correct, summary.mcq.total
        );
    }
    println!(
        "Answered: {}/{}",
        summary.answered, summary.total_questions
    );
    println!();
    println!("{}", entry.report.feedback.trim());
    println!();
    println!("Full results: nova history show {}", entry.id);
}

// ============================================================================
// History, Settings, Subjects
// ============================================================================

async fn run_history(controller: &ExamController, command: HistoryCommand) -> anyhow::Result<()> {
    match command {
        HistoryCommand::List => {
            let entries = controller.history().await;
            if entries.is_empty() {
                println!("No graded exams yet.");
            }
            for entry in &entries {
                println!(
                    "{}  {}  {:<28}  {}/5  {}",
                    entry.id,
                    entry.completed_at.format("%Y-%m-%d %H:%M"),
                    entry.config.subject,
                    entry.report.ap_score_estimate,
                    entry.report.raw_score
                );
            }
        }
        HistoryCommand::Show { id } => {
            let entry = controller.history_entry(&id).await?;
            println!("{}", MarkdownGenerator::new(&entry).generate());
        }
        HistoryCommand::Export { id, format, output } => {
            let entry = controller.history_entry(&id).await?;
            export_entry(&entry, format, output.as_deref())?;
        }
        HistoryCommand::Clear => {
            controller.clear_history().await;
            println!("History cleared.");
        }
    }
    Ok(())
}

fn export_entry(entry: &HistoryEntry, format: ExportFormat, output: Option<&Path>) -> anyhow::Result<()> {
    match (format, output) {
        (ExportFormat::Json, Some(path)) => JsonGenerator::entry(entry).write_to_file(path, true)?,
        (ExportFormat::Json, None) => println!("{}", JsonGenerator::entry(entry).generate_pretty()?),
        (ExportFormat::Md, Some(path)) => std::fs::write(path, MarkdownGenerator::new(entry).generate())?,
        (ExportFormat::Md, None) => println!("{}", MarkdownGenerator::new(entry).generate()),
    }
    if let Some(path) = output {
        println!("Exported {} to {}", entry.id, path.display());
    }
    Ok(())
}

fn print_settings(settings: &SettingsManager) {
    let current = settings.current();
    println!("Accommodations:");
    for which in Accommodation::ALL {
        println!("  {:<14} {}", which.as_str(), on_off(current.get(which)));
    }
}

fn print_subjects(table: &StructureTable) {
    for (name, structure) in table.subjects() {
        let blueprint = table.blueprint(name, LengthClass::Full);
        println!("{name} ({} min)", structure.time_budget_minutes);
        println!("  {}", blueprint.describe());
    }
}

const fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}
