use std::io::{self, ErrorKind, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use glimpse_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use glimpse_contracts::events::EventWriter;
use glimpse_contracts::session::{HistoryPolicy, Session, SessionState, Turn};
use glimpse_contracts::uploads::ImageUpload;
use glimpse_engine::{
    build_provider, Mode, ModelConfig, ModelOverrides, TurnController, TurnOutcome,
};
use serde_json::{json, Map, Value};

#[derive(Debug, Parser)]
#[command(
    name = "glimpse",
    version,
    about = "Chat with a local vision model about your images"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat session.
    Chat(ChatArgs),
    /// Describe each image once and print the transcript.
    Describe(DescribeArgs),
    /// Pin one image and ask it a list of questions.
    Ask(AskArgs),
}

#[derive(Debug, Args)]
struct ModelArgs {
    /// Provider name (ollama, dryrun).
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Model server address, e.g. http://127.0.0.1:11434.
    #[arg(long)]
    host: Option<String>,
    /// Transport timeout for one model call; 0 waits indefinitely.
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Append structured session events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long, default_value = "describe")]
    mode: Mode,
    /// Keep at most this many turns (1 or more); unbounded when omitted.
    #[arg(long)]
    max_turns: Option<NonZeroUsize>,
    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Debug, Parser)]
struct DescribeArgs {
    #[arg(required = true)]
    images: Vec<PathBuf>,
    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Debug, Parser)]
struct AskArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(required = true, value_parser = parse_question)]
    questions: Vec<String>,
    #[command(flatten)]
    model: ModelArgs,
}

const EMPTY_SESSION_HINT: &str = "Upload an image with /upload <path> to get started!";

const TIPS: &[&str] = &[
    "Clear images: upload high-quality, well-lit images for better descriptions",
    "Supported formats: JPG, PNG, GIF, BMP, and WebP",
    "File size: keep files under 10MB for faster processing",
    "Content: the model can describe objects, people, scenes, colors, and mood",
];

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("glimpse error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Describe(args) => run_describe(args),
        Command::Ask(args) => run_ask(args),
    }
}

fn build_controller(mode: Mode, args: &ModelArgs) -> Result<(TurnController, ModelConfig)> {
    let config = ModelConfig::resolve(ModelOverrides {
        provider: args.provider.clone(),
        model: args.model.clone(),
        host: args.host.clone(),
        timeout_secs: args.timeout_secs,
    })?;
    let provider = build_provider(&config)?;
    let mut controller = TurnController::new(mode, provider, config.model.clone());
    if let Some(path) = args.events.as_ref() {
        let events = EventWriter::for_new_session(path);
        events.emit(
            "session_started",
            json_object(json!({
                "mode": mode.as_str(),
                "provider": config.provider,
                "model": config.model,
                "host": config.host,
                "timeout_secs": config.timeout.map(|value| value.as_secs()),
            })),
        )?;
        controller = controller.with_events(events);
    }
    Ok((controller, config))
}

fn finish_session(controller: &TurnController, session: &Session) {
    if let Some(events) = controller.events() {
        if let Err(err) = events.emit(
            "session_finished",
            json_object(json!({ "turns": session.len() })),
        ) {
            eprintln!("glimpse warning: event log write failed (session_finished): {err:#}");
        }
    }
    flush_warnings(controller);
}

fn flush_warnings(controller: &TurnController) {
    for warning in controller.take_warnings() {
        eprintln!("glimpse warning: {warning}");
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let (controller, config) = build_controller(args.mode, &args.model)?;
    let policy = args
        .max_turns
        .map(HistoryPolicy::Capped)
        .unwrap_or_default();
    let mut session = Session::with_policy(policy);

    print_banner(&controller, &config);

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                if controller.mode() == Mode::QandA {
                    println!("Any other text is asked about the pinned image.");
                }
            }
            "tips" => print_tips(),
            "status" => println!("{}", status_line(&controller, &session)),
            "history" => {
                if session.is_empty() {
                    println!("{EMPTY_SESSION_HINT}");
                }
                for turn in session.turns() {
                    println!("{}", format_turn(turn, None));
                }
            }
            "clear" => {
                controller.clear(&mut session);
                println!("Chat history cleared.");
            }
            "upload" => {
                let Some(path) = value_as_non_empty_string(intent.command_args.get("path")) else {
                    println!("/upload requires a path");
                    continue;
                };
                match load_upload(&controller, Path::new(&path)) {
                    Ok(upload) => {
                        if controller.mode() == Mode::Describe {
                            println!("Analyzing image...");
                        }
                        let outcome = controller.handle_upload(&mut session, &upload);
                        print_outcome(&session, &outcome, Some(upload.name()));
                    }
                    Err(err) => println!("Upload failed: {err:#}"),
                }
            }
            "ask" => {
                let question = intent.prompt.clone().unwrap_or_default();
                if session.state() == SessionState::ImagePinned {
                    println!("Thinking...");
                }
                let outcome = controller.handle_question(&mut session, &question);
                print_outcome(&session, &outcome, None);
            }
            "quit" => break,
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            _ => {}
        }
        flush_warnings(&controller);
    }

    finish_session(&controller, &session);
    Ok(())
}

fn run_describe(args: DescribeArgs) -> Result<i32> {
    let (controller, _config) = build_controller(Mode::Describe, &args.model)?;
    let mut session = Session::new();
    let mut unreadable = 0usize;
    for path in &args.images {
        let upload = match load_upload(&controller, path) {
            Ok(upload) => upload,
            Err(err) => {
                eprintln!("Skipping {}: {err:#}", path.display());
                unreadable += 1;
                continue;
            }
        };
        let outcome = controller.handle_upload(&mut session, &upload);
        print_outcome(&session, &outcome, Some(upload.name()));
        flush_warnings(&controller);
    }
    finish_session(&controller, &session);
    Ok(if unreadable > 0 { 1 } else { 0 })
}

fn run_ask(args: AskArgs) -> Result<i32> {
    let (controller, _config) = build_controller(Mode::QandA, &args.model)?;
    let mut session = Session::new();
    let upload = match load_upload(&controller, &args.image) {
        Ok(upload) => upload,
        Err(err) => {
            finish_session(&controller, &session);
            return Err(err);
        }
    };
    let outcome = controller.handle_upload(&mut session, &upload);
    print_outcome(&session, &outcome, Some(upload.name()));
    for question in &args.questions {
        let outcome = controller.handle_question(&mut session, question);
        print_outcome(&session, &outcome, None);
        flush_warnings(&controller);
    }
    finish_session(&controller, &session);
    Ok(0)
}

/// Reads an image from disk, logging an `upload_rejected` event when it is unusable.
fn load_upload(controller: &TurnController, path: &Path) -> Result<ImageUpload> {
    ImageUpload::from_path(path).map_err(|err| {
        controller.reject_upload(&path.display().to_string(), format!("{err:#}"));
        err
    })
}

fn parse_question(raw: &str) -> Result<String, String> {
    if raw.trim().is_empty() {
        return Err("questions must not be empty".to_string());
    }
    Ok(raw.to_string())
}

fn print_banner(controller: &TurnController, config: &ModelConfig) {
    println!("🖼️  Glimpse ({} mode)", controller.mode());
    println!(
        "Model: {} via {} ({})",
        controller.model(),
        controller.provider_name(),
        config.host
    );
    println!("How to use:");
    for (idx, step) in usage_steps(controller.mode()).iter().enumerate() {
        println!("  {}. {step}", idx + 1);
    }
    print_tips();
    println!("{EMPTY_SESSION_HINT} Type /help for commands.");
}

fn usage_steps(mode: Mode) -> &'static [&'static str] {
    match mode {
        Mode::Describe => &[
            "Upload an image with /upload <path>",
            "The model describes it automatically",
            "Read the description in the chat",
        ],
        Mode::QandA => &[
            "Upload an image with /upload <path>",
            "Ask any question about it",
            "Upload a different image, or /clear, to start over",
        ],
    }
}

fn print_tips() {
    println!("Tips for best results:");
    for tip in TIPS {
        println!("  - {tip}");
    }
}

fn status_line(controller: &TurnController, session: &Session) -> String {
    let state = match session.pinned() {
        Some(pinned) => format!("ImagePinned {}", pinned.name()),
        None => "NoImage".to_string(),
    };
    format!(
        "mode={} state={} turns={}",
        controller.mode(),
        state,
        session.len()
    )
}

/// Number of turns an outcome appended at the end of the session.
fn outcome_turns(outcome: &TurnOutcome) -> usize {
    match outcome {
        TurnOutcome::Answered { .. } | TurnOutcome::Failed { .. } => 2,
        TurnOutcome::Pinned { .. } => 1,
        TurnOutcome::Unchanged | TurnOutcome::Rejected { .. } => 0,
    }
}

fn print_outcome(session: &Session, outcome: &TurnOutcome, image_name: Option<&str>) {
    match outcome {
        TurnOutcome::Unchanged => {
            if let Some(name) = image_name {
                println!("{name} is already the active image.");
            }
        }
        TurnOutcome::Rejected { reason } => println!("{reason}"),
        _ => {
            let count = outcome_turns(outcome);
            let mut recent: Vec<&Turn> = session.turns().rev().take(count).collect();
            recent.reverse();
            for turn in recent {
                println!("{}", format_turn(turn, image_name));
            }
        }
    }
}

fn format_turn(turn: &Turn, image_name: Option<&str>) -> String {
    let avatar = turn.avatar().unwrap_or_else(|| turn.role().avatar());
    let mut out = format!("{avatar} {}: {}", turn.role(), turn.content());
    if let Some(image) = turn.image() {
        out.push_str(&format!(
            "\n   [image: {}, {} bytes]",
            image_name.unwrap_or("uploaded image"),
            image.len()
        ));
    }
    out
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glimpse_engine::providers::DryrunProvider;

    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn png(name: &str) -> ImageUpload {
        match ImageUpload::from_bytes(name, PNG_HEADER.to_vec()) {
            Ok(upload) => upload,
            Err(err) => panic!("test upload rejected: {err:#}"),
        }
    }

    #[test]
    fn chat_args_parse_mode_and_cap() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "glimpse",
            "chat",
            "--mode",
            "qa",
            "--max-turns",
            "10",
            "--provider",
            "dryrun",
        ])?;
        let Command::Chat(args) = cli.command else {
            panic!("expected chat subcommand");
        };
        assert_eq!(args.mode, Mode::QandA);
        assert_eq!(args.max_turns.map(NonZeroUsize::get), Some(10));
        assert_eq!(args.model.provider.as_deref(), Some("dryrun"));
        assert!(args.model.events.is_none());
        Ok(())
    }

    #[test]
    fn chat_defaults_to_describe_mode() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["glimpse", "chat"])?;
        let Command::Chat(args) = cli.command else {
            panic!("expected chat subcommand");
        };
        assert_eq!(args.mode, Mode::Describe);
        assert_eq!(args.max_turns, None);
        Ok(())
    }

    #[test]
    fn ask_requires_image_and_question() {
        assert!(Cli::try_parse_from(["glimpse", "ask", "What breed?"]).is_err());
        assert!(Cli::try_parse_from(["glimpse", "ask", "--image", "dog.png"]).is_err());
        assert!(Cli::try_parse_from(["glimpse", "describe"]).is_err());
        assert!(Cli::try_parse_from(["glimpse", "chat", "--mode", "poem"]).is_err());
    }

    #[test]
    fn max_turns_must_be_positive() -> anyhow::Result<()> {
        assert!(Cli::try_parse_from(["glimpse", "chat", "--max-turns", "0"]).is_err());
        assert!(Cli::try_parse_from(["glimpse", "chat", "--max-turns", "-2"]).is_err());

        let cli = Cli::try_parse_from(["glimpse", "chat", "--max-turns", "1"])?;
        let Command::Chat(args) = cli.command else {
            panic!("expected chat subcommand");
        };
        let policy = args.max_turns.map(HistoryPolicy::Capped).unwrap_or_default();
        assert_eq!(policy, HistoryPolicy::Capped(NonZeroUsize::MIN));
        Ok(())
    }

    #[test]
    fn blank_questions_fail_before_any_model_call() -> anyhow::Result<()> {
        let blank = Cli::try_parse_from([
            "glimpse", "ask", "--image", "dog.png", "What breed?", "   ",
        ]);
        assert!(blank.is_err());

        let cli = Cli::try_parse_from([
            "glimpse", "ask", "--image", "dog.png", "What breed?", "How old?",
        ])?;
        let Command::Ask(args) = cli.command else {
            panic!("expected ask subcommand");
        };
        assert_eq!(args.questions, vec!["What breed?", "How old?"]);
        Ok(())
    }

    #[test]
    fn unusable_upload_is_logged_as_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let notes = temp.path().join("notes.txt");
        std::fs::write(&notes, "not an image")?;
        let events_path = temp.path().join("events.jsonl");
        let args = ModelArgs {
            provider: Some("dryrun".to_string()),
            model: None,
            host: None,
            timeout_secs: None,
            events: Some(events_path.clone()),
        };
        let (controller, _config) = build_controller(Mode::QandA, &args)?;
        let session = Session::new();

        let err = load_upload(&controller, &notes)
            .err()
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();
        assert!(err.contains("not a supported image type"), "{err}");
        finish_session(&controller, &session);

        let events = std::fs::read_to_string(&events_path)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?;
        let types: Vec<&str> = events
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec!["session_started", "upload_rejected", "session_finished"]
        );
        assert_eq!(events[1]["source"], json!(notes.display().to_string()));
        assert_eq!(events[1]["reason"], json!(err));
        Ok(())
    }

    #[test]
    fn format_turn_shows_avatar_role_and_image_line() {
        let turn = Turn::user_with_image("Please describe this image:", Arc::from(vec![0u8; 42]));
        assert_eq!(
            format_turn(&turn, Some("cat.jpg")),
            "👤 user: Please describe this image:\n   [image: cat.jpg, 42 bytes]"
        );
        assert_eq!(
            format_turn(&turn, None),
            "👤 user: Please describe this image:\n   [image: uploaded image, 42 bytes]"
        );
        let reply = Turn::assistant("A tabby cat.");
        assert_eq!(format_turn(&reply, None), "🤖 assistant: A tabby cat.");
    }

    #[test]
    fn outcome_turns_counts_appended_turns() {
        assert_eq!(
            outcome_turns(&TurnOutcome::Answered {
                text: "x".to_string()
            }),
            2
        );
        assert_eq!(
            outcome_turns(&TurnOutcome::Failed {
                diagnostic: "Error: x".to_string()
            }),
            2
        );
        assert_eq!(
            outcome_turns(&TurnOutcome::Pinned {
                name: "dog.png".to_string()
            }),
            1
        );
        assert_eq!(outcome_turns(&TurnOutcome::Unchanged), 0);
    }

    #[test]
    fn status_line_reports_pinned_image() {
        let controller = TurnController::new(Mode::QandA, Box::new(DryrunProvider), "m");
        let mut session = Session::new();
        assert_eq!(
            status_line(&controller, &session),
            "mode=qa state=NoImage turns=0"
        );
        controller.handle_upload(&mut session, &png("dog.png"));
        assert_eq!(
            status_line(&controller, &session),
            "mode=qa state=ImagePinned dog.png turns=1"
        );
    }

    #[test]
    fn events_flag_writes_session_start_and_finish() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let args = ModelArgs {
            provider: Some("dryrun".to_string()),
            model: Some("llava".to_string()),
            host: None,
            timeout_secs: None,
            events: Some(events_path.clone()),
        };
        let (controller, config) = build_controller(Mode::Describe, &args)?;
        assert_eq!(config.model, "llava");
        let mut session = Session::new();
        let outcome = controller.handle_upload(&mut session, &png("cat.png"));
        assert!(matches!(outcome, TurnOutcome::Answered { .. }));
        finish_session(&controller, &session);

        let types = std::fs::read_to_string(&events_path)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(types.first().map(String::as_str), Some("session_started"));
        assert_eq!(types.last().map(String::as_str), Some("session_finished"));
        Ok(())
    }

    #[test]
    fn value_as_non_empty_string_trims() {
        assert_eq!(
            value_as_non_empty_string(Some(&json!("  cat.jpg "))),
            Some("cat.jpg".to_string())
        );
        assert_eq!(value_as_non_empty_string(Some(&json!("   "))), None);
        assert_eq!(value_as_non_empty_string(Some(&json!(3))), None);
        assert_eq!(value_as_non_empty_string(None), None);
    }

    #[test]
    fn usage_steps_differ_by_mode() {
        assert_eq!(usage_steps(Mode::Describe).len(), 3);
        assert!(usage_steps(Mode::QandA)[1].contains("question"));
        assert!(TIPS.iter().any(|tip| tip.contains("10MB")));
    }
}
