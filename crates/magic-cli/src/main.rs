use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use magic_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use magic_contracts::events::EventWriter;
use magic_contracts::Session;
use magic_engine::{artifact_dimensions, new_session_id, EditOrchestrator, EditOutcome, EditorConfig};

const DEFAULT_INSTRUCTION: &str = "Remove the flag from the woman's shoulders and replace it with a clean white shirt. Keep the original face and background.";

#[derive(Debug, Parser)]
#[command(name = "magic-edit", version, about = "Instruction-driven image editor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: upload, edit, retry, reset, save.
    Chat(ChatArgs),
    /// One-shot edit of a single image.
    Edit(EditArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, env = "MAGIC_EDIT_MODEL")]
    model: Option<String>,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value = DEFAULT_INSTRUCTION)]
    prompt: String,
    #[arg(long, default_value = ".")]
    out: PathBuf,
    /// Also write a side-by-side comparison PNG.
    #[arg(long)]
    compare: bool,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, env = "MAGIC_EDIT_MODEL")]
    model: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("magic-edit error: {err:#}");
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
        Command::Edit(args) => run_edit(args),
    }
}

fn open_orchestrator(
    out: &Path,
    events: Option<&Path>,
    model: Option<String>,
) -> Result<EditOrchestrator> {
    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    let events_path = events
        .map(Path::to_path_buf)
        .unwrap_or_else(|| out.join("events.jsonl"));
    let config = EditorConfig::from_env().with_model(model);
    let orchestrator =
        EditOrchestrator::from_config(&config, EventWriter::new(events_path, new_session_id()))?;
    if let Some(reason) = orchestrator.selection().fallback_reason.as_deref() {
        if orchestrator.selection().requested.is_some() {
            eprintln!("{reason}");
        }
    }
    Ok(orchestrator)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut orchestrator = open_orchestrator(&args.out, args.events.as_deref(), args.model)?;
    let mut instruction = DEFAULT_INSTRUCTION.to_string();

    println!("Magic editor started. Type /help for commands.");
    println!("Model: {}", orchestrator.selection().model.name);
    println!(
        "Session {} logging to {}",
        orchestrator.events().session_id(),
        orchestrator.events().path().display()
    );
    if let Some(path) = args.image.as_deref() {
        println!("{}", upload(&mut orchestrator, path));
    }

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

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action.as_str() {
            "noop" => {}
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Any other text becomes the instruction and is applied.");
            }
            "upload" => match intent.arg("path") {
                Some(path) => println!("{}", upload(&mut orchestrator, Path::new(path))),
                None => println!("/upload requires a path"),
            },
            "set_prompt" => match intent.prompt.as_deref().map(str::trim) {
                Some(text) if !text.is_empty() => {
                    instruction = text.to_string();
                    println!("Instruction set.");
                }
                _ => println!("Instruction: {instruction}"),
            },
            "apply" => apply(&mut orchestrator, &instruction)?,
            "edit" => {
                if let Some(text) = intent.prompt.as_deref() {
                    instruction = text.trim().to_string();
                }
                apply(&mut orchestrator, &instruction)?;
            }
            "reset" => {
                orchestrator.reset()?;
                println!("Session reset.");
            }
            "status" => {
                for row in render_status(orchestrator.session()) {
                    println!("{row}");
                }
                println!("Instruction: {instruction}");
            }
            "save" => {
                let target = intent.arg("path").map(Path::new);
                match orchestrator.export_edited(target, &args.out) {
                    Ok(path) => println!("Saved {}", path.display()),
                    Err(err) => println!("Save failed: {err:#}"),
                }
            }
            "compare" => {
                let target = intent.arg("path").map(Path::new);
                match orchestrator.export_comparison(target, &args.out) {
                    Ok(path) => println!("Comparison written to {}", path.display()),
                    Err(err) => println!("Compare failed: {err:#}"),
                }
            }
            "set_model" => match intent.arg("model") {
                Some(model) => match orchestrator.set_model(model) {
                    Ok(selection) => {
                        if let Some(reason) = selection.fallback_reason.as_deref() {
                            println!("{reason}");
                        }
                        println!("Model set to {}", selection.model.name);
                    }
                    Err(err) => println!("Model change failed: {err:#}"),
                },
                None => println!("Model: {}", orchestrator.selection().model.name),
            },
            _ => println!("Unknown command. Type /help for commands."),
        }
    }

    orchestrator.finish()?;
    Ok(())
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let mut orchestrator = open_orchestrator(&args.out, args.events.as_deref(), args.model)?;
    orchestrator.load_image(&args.image)?;

    if orchestrator.request_edit(&args.prompt)?.is_none() {
        anyhow::bail!("no image loaded");
    }
    eprintln!("Processing Magic...");
    orchestrator.wait()?;

    if let Some(message) = orchestrator.session().last_error() {
        eprintln!("{message}");
        orchestrator.finish()?;
        return Ok(1);
    }
    let edited = orchestrator.export_edited(None, &args.out)?;
    println!("{}", edited.display());
    if args.compare {
        let compared = orchestrator.export_comparison(None, &args.out)?;
        println!("{}", compared.display());
    }
    orchestrator.finish()?;
    Ok(0)
}

/// Loads `path` and describes the outcome. Failures read the same as the
/// session's `last_error`.
fn upload(orchestrator: &mut EditOrchestrator, path: &Path) -> String {
    match orchestrator.load_image(path) {
        Ok(()) => match orchestrator.session().original() {
            Some(original) => format!("Loaded {} ({})", path.display(), describe_artifact(original)),
            None => format!("Loaded {}", path.display()),
        },
        Err(err) => orchestrator
            .session()
            .last_error()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{err:#}")),
    }
}

fn apply(orchestrator: &mut EditOrchestrator, instruction: &str) -> Result<()> {
    if orchestrator.request_edit(instruction)?.is_none() {
        println!("Upload an image first.");
        return Ok(());
    }
    println!("Processing Magic...");
    if let Some(outcome) = orchestrator.wait()? {
        println!("{}", describe_outcome(&outcome, orchestrator.session()));
    }
    Ok(())
}

fn describe_outcome(outcome: &EditOutcome, session: &Session) -> String {
    match outcome {
        EditOutcome::Succeeded { .. } => match session.edited() {
            Some(edited) => format!("Result ready ({}). Use /save to export.", describe_artifact(edited)),
            None => "Result ready.".to_string(),
        },
        EditOutcome::Failed { message, .. } => format!("Edit failed: {message}"),
        EditOutcome::Discarded { token } => format!("Ignored superseded edit #{token}."),
    }
}

fn describe_artifact(artifact: &magic_contracts::ImageArtifact) -> String {
    let size = artifact_dimensions(artifact)
        .map(|(width, height)| format!("{width}x{height}"))
        .unwrap_or_else(|| "unknown size".to_string());
    format!(
        "{}, {size}, {} bytes, {}",
        artifact.mime_type(),
        artifact.len(),
        artifact.digest()
    )
}

fn render_status(session: &Session) -> Vec<String> {
    let mut rows = Vec::new();
    match session.preview() {
        Some(preview) => rows.push(format!(
            "{}: {}",
            preview.label,
            describe_artifact(preview.artifact)
        )),
        None => rows.push("No image uploaded.".to_string()),
    }
    if session.edited().is_some() {
        if let Some(original) = session.original() {
            rows.push(format!("Original: {}", describe_artifact(original)));
        }
    }
    if session.is_editing() {
        rows.push("Processing Magic...".to_string());
    }
    if let Some(error) = session.last_error() {
        rows.push(format!("Error: {error}"));
    }
    rows
}
