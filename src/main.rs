//! duet CLI entry point

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use duet::agent::{new_thread, Backend, ConsoleHandler, MessageOpt, Thread, ThreadDeps, WorkspacePrompt};
use duet::config::{self, Config};
use duet::http::OpenAiClient;
use duet::persistence::{ConversationStore, JsonFileStore};
use duet::platform::{EnvSnapshot, PlatformCatalog, Resolver};
use duet::tools::{PlainRenderer, ToolRunner};
use duet::{projection, ui};

#[derive(Parser)]
#[command(name = "duet")]
#[command(about = "Coding agent speaking both OpenAI protocols")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Message to send; interactive mode when omitted
        #[arg(short, long)]
        message: Option<String>,

        /// Continue a stored conversation
        #[arg(long)]
        resume: Option<String>,

        /// Do not persist the conversation
        #[arg(long)]
        no_save: bool,

        /// Image to attach to the first message (path or HTTPS URL); repeatable
        #[arg(long = "image")]
        images: Vec<String>,

        /// Compact the history once this share of the context window is used (0 disables)
        #[arg(long, default_value_t = 0.8)]
        compact_ratio: f64,
    },

    /// Print a stored conversation
    Show {
        /// Conversation ID
        id: String,

        /// Print UI events as JSON lines instead of messages
        #[arg(long)]
        events: bool,
    },

    /// Show resolved provider settings
    Status,
}

/// Token of the turn in flight, cancelled by Ctrl+C.
type TurnSlot = Arc<Mutex<Option<CancellationToken>>>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let turn: TurnSlot = Arc::new(Mutex::new(None));
    let slot = turn.clone();
    ctrlc::set_handler(move || {
        let running = slot.lock().ok().and_then(|guard| guard.clone());
        match running {
            Some(token) => {
                ui::print_warning("Cancelling turn...");
                token.cancel();
            }
            None => {
                println!("\nBye!");
                std::process::exit(0);
            }
        }
    })
    .ok();

    let cli = Cli::parse();
    let config = config::load().context("loading ~/.duet/config.json")?;
    let resolver = Resolver::new(Arc::new(PlatformCatalog::builtin()), EnvSnapshot::capture());
    let store = JsonFileStore::new(config::conversations_dir());

    match cli.command {
        Commands::Chat {
            message,
            resume,
            no_save,
            images,
            compact_ratio,
        } => {
            let opt = MessageOpt {
                images,
                compact_ratio,
                ..MessageOpt::default()
            };
            run_chat(config, resolver, store, turn, message, resume, no_save, opt).await?
        }
        Commands::Show { id, events } => show(&store, &id, events)?,
        Commands::Status => status(&config, &resolver, &store),
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_chat(
    mut config: Config,
    resolver: Resolver,
    store: JsonFileStore,
    turn: TurnSlot,
    message: Option<String>,
    resume: Option<String>,
    no_save: bool,
    mut opt: MessageOpt,
) -> Result<()> {
    config.workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    config.validate(resolver.catalog())?;
    let resolution = resolver.resolve(&config);
    let client = Arc::new(OpenAiClient::new(&resolution)?);

    let deps = ThreadDeps::new(
        Backend::from_client(client),
        Arc::new(ToolRunner::new_with_defaults()),
        Arc::new(WorkspacePrompt::new(&config.workspace)),
    )
    .with_store(Arc::new(store))
    .with_resolver(resolver);

    let model = config.model.clone();
    let mut thread = new_thread(config, deps)?;
    thread.enable_persistence(!no_save);
    if let Some(id) = resume {
        thread.set_conversation_id(&id);
        thread.enable_persistence(true);
        thread
            .load_conversation()
            .await
            .with_context(|| format!("resuming conversation {}", id))?;
        ui::print_success(&format!("Resumed {}", id));
    }

    ui::print_header(&model, &resolution.platform, resolution.api_mode.as_str());
    let handler = ConsoleHandler::new();

    if let Some(message) = message {
        send(thread.as_mut(), &message, &handler, opt, &turn).await?;
        return Ok(());
    }

    loop {
        print!("› ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }
        if input.is_empty() {
            continue;
        }
        if input == "/compact" {
            if let Err(e) = compact(thread.as_mut(), &turn).await {
                ui::print_error(&e.to_string());
            }
            continue;
        }

        let turn_opt = MessageOpt {
            images: std::mem::take(&mut opt.images),
            ..opt.clone()
        };
        if let Err(e) = send(thread.as_mut(), input, &handler, turn_opt, &turn).await {
            ui::print_error(&e.to_string());
        }
    }

    if thread.is_persisted() {
        ui::print_field("conversation", thread.conversation_id());
    }
    Ok(())
}

async fn send(
    thread: &mut dyn Thread,
    message: &str,
    handler: &ConsoleHandler,
    opt: MessageOpt,
    turn: &TurnSlot,
) -> Result<()> {
    let cancel = CancellationToken::new();
    set_turn(turn, Some(cancel.clone()));
    let result = thread.send_message(message, handler, opt, &cancel).await;
    set_turn(turn, None);
    result?;

    let usage = thread.usage();
    ui::print_field(
        "usage",
        &format!(
            "{} in / {} out tokens, ${:.4}",
            usage.input_tokens + usage.cache_read_input_tokens,
            usage.output_tokens,
            usage.total_cost()
        ),
    );
    Ok(())
}

async fn compact(thread: &mut dyn Thread, turn: &TurnSlot) -> Result<()> {
    let cancel = CancellationToken::new();
    set_turn(turn, Some(cancel.clone()));
    let result = thread.compact_context(&cancel).await;
    set_turn(turn, None);
    result?;

    if thread.is_persisted() {
        thread.save_conversation(false).await?;
    }
    ui::print_success("Conversation compacted");
    Ok(())
}

fn set_turn(turn: &TurnSlot, token: Option<CancellationToken>) {
    if let Ok(mut guard) = turn.lock() {
        *guard = token;
    }
}

fn show(store: &JsonFileStore, id: &str, events: bool) -> Result<()> {
    let record = store.load(id)?;

    if events {
        for event in projection::record_events(&record)? {
            println!("{}", serde_json::to_string(&event)?);
        }
        return Ok(());
    }

    if !record.summary.is_empty() {
        ui::print_field("summary", &record.summary);
        ui::print_rule();
    }
    for message in projection::record_messages(&record, &PlainRenderer)? {
        println!("{}: {}\n", message.role.as_str(), message.content);
    }
    Ok(())
}

fn status(config: &Config, resolver: &Resolver, store: &JsonFileStore) {
    println!("duet status\n");

    if let Err(e) = config.validate(resolver.catalog()) {
        ui::print_error(&e.to_string());
    }

    let resolution = resolver.resolve(config);
    let credential = if std::env::var(&resolution.api_key_env_var).is_ok() {
        format!("{} (set)", resolution.api_key_env_var)
    } else {
        format!("{} (not set)", resolution.api_key_env_var)
    };

    ui::print_field("model", &config.model);
    ui::print_field("weak model", &config.weak_model);
    ui::print_field("platform", &resolution.platform);
    ui::print_field("api mode", resolution.api_mode.as_str());
    ui::print_field("base url", &resolution.base_url);
    ui::print_field("credential", &credential);

    match store.list() {
        Ok(ids) => ui::print_field("conversations", &ids.len().to_string()),
        Err(e) => ui::print_warning(&format!("Could not list conversations: {}", e)),
    }
}
