//! `flashmemo` command-line front end.
//!
//! Loads `config.json`, starts logging, builds one `AppContext` and runs a
//! single subcommand against it.

use clap::{Parser, Subcommand};
use flashmemo_core::{
    init_from_config, AppConfig, AppContext, CaptureError, CapturePayload, CaptureService,
    FileSummary, KnowledgeAgent, NoteType, ReconcileReport, Response, StorageError,
};
use std::error::Error;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "flashmemo")]
#[command(about = "Capture notes and ask questions about them")]
struct Cli {
    /// Path to the JSON config file; created with defaults when missing
    #[arg(long, env = "FLASHMEMO_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new note; reads stdin when no content is given
    Capture {
        content: Option<String>,

        #[arg(short, long)]
        title: Option<String>,

        /// Tag, repeatable; the first one decides placement
        #[arg(short = 'g', long = "tag")]
        tags: Vec<String>,

        /// text, image or audio
        #[arg(short, long, default_value = "text")]
        kind: String,

        /// Where the capture came from, e.g. clipboard
        #[arg(long)]
        source: Option<String>,
    },

    /// List notes under a tag, newest first
    List { tag: String },

    /// List all tags
    Tags,

    /// Print one note
    Show {
        tag: String,
        /// Note name or id
        note: String,
    },

    /// Replace a note's title, content or tags
    Update {
        tag: String,
        /// Note name or id
        note: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        content: Option<String>,

        /// Replacement tags, repeatable
        #[arg(short = 'g', long = "tag")]
        tags: Vec<String>,
    },

    /// Ask a question; lists notes or answers from them
    Ask { query: String },

    /// Interactive chat with history; `/clear` resets it
    Chat,

    /// Remove stale artifacts left by interrupted updates
    Reconcile,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = AppConfig::load_or_create(&cli.config)?;
    if let Err(err) = init_from_config(&config) {
        eprintln!("warning: file logging disabled: {err}");
    }
    let context = AppContext::from_config(&config)?;

    match cli.command {
        Commands::Capture {
            content,
            title,
            tags,
            kind,
            source,
        } => {
            let content = match content {
                Some(content) => content,
                None => read_stdin()?,
            };
            let kind = NoteType::parse(&kind).ok_or_else(|| format!("unknown note kind `{kind}`"))?;
            let mut payload = CapturePayload::text(content).with_kind(kind).with_tags(tags);
            if let Some(title) = title {
                payload = payload.with_title(title);
            }
            if let Some(source) = source {
                payload = payload.with_origin("source", source);
            }

            match CaptureService::from_context(&context).ingest(payload) {
                Ok(note) => println!("saved {} [{}] {}", note.id, note.tags.join(", "), note.title),
                Err(CaptureError::Validation(err)) => return Err(format!("rejected: {err}").into()),
                Err(err) => return Err(err.into()),
            }
        }
        Commands::List { tag } => print_summaries(&context.store().list_files(&tag)?),
        Commands::Tags => {
            for tag in context.store().list_tags()? {
                println!("{tag}");
            }
        }
        Commands::Show { tag, note } => {
            let note = context.store().load(&tag, &note)?;
            println!("# {}", note.title);
            println!("id: {}", note.id);
            println!("type: {}", note.kind);
            println!("tags: {}", note.tags.join(", "));
            println!("created: {}", note.created_at.to_rfc3339());
            println!();
            println!("{}", note.content);
        }
        Commands::Update {
            tag,
            note,
            title,
            content,
            tags,
        } => {
            let store = context.store();
            let mut note = store.load(&tag, &note)?;
            if let Some(title) = title {
                note.title = title;
            }
            if let Some(content) = content {
                note.content = content;
            }
            if !tags.is_empty() {
                note.tags = tags;
            }
            match store.update(&note) {
                Ok(id) => println!("updated {id}"),
                Err(StorageError::PartialUpdate(warning)) => {
                    println!("updated {}", warning.note_id);
                    eprintln!("warning: {warning}; run `flashmemo reconcile` to clean up");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Ask { query } => match KnowledgeAgent::from_context(&context).answer(&query)? {
            Response::Matches(matches) => print_summaries(&matches),
            Response::Answer { text, sources } => {
                println!("{text}");
                if !sources.is_empty() {
                    println!();
                    for (index, source) in sources.iter().enumerate() {
                        println!("[{}] {} ({})", index + 1, source.title, source.id);
                    }
                }
            }
        },
        Commands::Chat => chat_loop(&KnowledgeAgent::from_context(&context))?,
        Commands::Reconcile => print_report(&context.store().reconcile()?),
    }
    Ok(())
}

fn read_stdin() -> io::Result<String> {
    let mut content = String::new();
    io::stdin().read_to_string(&mut content)?;
    Ok(content)
}

fn chat_loop(agent: &KnowledgeAgent) -> Result<(), Box<dyn Error>> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => return Ok(()),
            "/clear" => {
                agent.clear_history();
                println!("(history cleared)");
            }
            message => match agent.chat(message) {
                Ok(reply) => println!("{reply}"),
                Err(err) => eprintln!("error: {err}"),
            },
        }
    }
}

fn print_summaries(summaries: &[FileSummary]) {
    if summaries.is_empty() {
        println!("(no notes)");
        return;
    }
    for summary in summaries {
        let modified = summary
            .modified_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{modified}  {:<12} {}  {}", summary.tag, summary.id, summary.name);
    }
}

fn print_report(report: &ReconcileReport) {
    println!("resumed updates: {}", report.resumed);
    for location in &report.removed {
        println!("removed {location}");
    }
    for failure in &report.failures {
        eprintln!("failed: {failure}");
    }
}
