use std::env;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use lisa_contracts::catalog::{CatalogResolver, PartCatalog, ResolveImage};
use lisa_contracts::chat::{Interceptor, Role};
use lisa_contracts::events::EventWriter;
use lisa_engine::{ListingResolver, RemoteTurnClient, TurnController};
use uuid::Uuid;

const DEFAULT_API_BASE: &str = "https://chatbot-backend-kucx.onrender.com";
const DEFAULT_CONTENT_API_BASE: &str =
    "https://api.github.com/repos/lisa-chat/train-parts/contents";
const DEFAULT_ASSET_BASE: &str =
    "https://raw.githubusercontent.com/lisa-chat/train-parts/main";

#[derive(Parser)]
#[command(name = "lisa-rs", about = "Lisa train-parts chat client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat session against the Lisa assistant.
    Chat(ChatArgs),
}

#[derive(Args)]
struct ChatArgs {
    /// Remote assistant base URL (env: LISA_API_BASE).
    #[arg(long)]
    api_base: Option<String>,

    /// Directory-listing API base for dynamic resolution
    /// (env: LISA_CONTENT_API_BASE).
    #[arg(long)]
    content_api_base: Option<String>,

    /// Raw-content base URL for part images (env: LISA_ASSET_BASE).
    #[arg(long)]
    asset_base: Option<String>,

    /// Transcript path; one JSON event per line.
    #[arg(long, default_value = "events.jsonl")]
    events: PathBuf,

    /// Resolve part keywords through the listing API instead of the
    /// built-in catalog.
    #[arg(long)]
    dynamic: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lisa-rs error: {err:#}");
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
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let api_base = args
        .api_base
        .clone()
        .or_else(|| non_empty_env("LISA_API_BASE"))
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let content_api_base = args
        .content_api_base
        .clone()
        .or_else(|| non_empty_env("LISA_CONTENT_API_BASE"))
        .unwrap_or_else(|| DEFAULT_CONTENT_API_BASE.to_string());
    let asset_base = args
        .asset_base
        .clone()
        .or_else(|| non_empty_env("LISA_ASSET_BASE"))
        .unwrap_or_else(|| DEFAULT_ASSET_BASE.to_string());

    let catalog = PartCatalog::new(None);
    let keywords: Vec<String> = catalog.keywords().map(str::to_string).collect();
    let resolver: Box<dyn ResolveImage> = if args.dynamic {
        Box::new(ListingResolver::new(content_api_base, asset_base)?)
    } else {
        Box::new(CatalogResolver::new(catalog, asset_base))
    };

    let session_id = Uuid::new_v4().to_string();
    let events = EventWriter::new(&args.events, session_id);
    let mut controller = TurnController::new(
        Interceptor::new(keywords, resolver),
        Box::new(RemoteTurnClient::new(api_base)?),
        events,
    );

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Lisa chat started. Type /help for commands.");

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
        match input.trim() {
            "" => continue,
            "/help" => {
                println!("Commands: /help /quit");
                println!("Anything else is sent to the assistant; asking to see a known");
                println!("train part is answered locally with an image link.");
                continue;
            }
            "/quit" | "/exit" => break,
            _ => {}
        }

        let before = controller.messages().len();
        controller.submit(input);
        for message in &controller.messages()[before..] {
            if message.role == Role::User {
                continue;
            }
            println!("{}", message.content);
            if let Some(attachment) = &message.attachment {
                println!("  [image] {}", attachment.url);
            }
        }
    }

    Ok(())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
