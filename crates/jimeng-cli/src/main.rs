use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use jimeng_contracts::chat::Command as PluginCommand;
use jimeng_contracts::config::PluginConfig;
use jimeng_contracts::host::{Context, EventContext, Plugin, Reply};
use jimeng_engine::{help_text, JimengPlugin, SweepReport};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jimeng", version, about = "Jimeng image generation chat plugin host")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Route chat lines from stdin through the plugin.
    Chat(ChatArgs),
    /// Generate images for one prompt.
    Generate(GenerateArgs),
    /// Run one cleanup pass over the image directory.
    Clean(CleanArgs),
    /// Print the plugin usage text.
    Usage(UsageArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    config: PathBuf,
    /// Append plugin activity records (JSONL) to this file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Print replies as JSON lines with base64 image data.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    prompt: String,
    /// Append plugin activity records (JSONL) to this file.
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct CleanArgs {
    #[arg(long)]
    config: PathBuf,
    /// Remove every image instead of only expired ones.
    #[arg(long)]
    all: bool,
}

#[derive(Debug, Parser)]
struct UsageArgs {
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    verbose: bool,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(target: "jimeng", "{err:#}");
            eprintln!("jimeng error: {err:#}");
            std::process::exit(1);
        }
    }
}

// Logs go to stderr; stdout carries replies.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
        Command::Clean(args) => run_clean(args),
        Command::Usage(args) => {
            let config = PluginConfig::load(&args.config)?;
            print!("{}", help_text(&config, args.verbose));
            Ok(0)
        }
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let config = PluginConfig::load(&args.config)?;
    let plugin = JimengPlugin::new(config, args.events.as_deref())?;
    let meta = plugin.meta();
    println!(
        "{} {} loaded. Prefixes: {}",
        meta.name,
        meta.version,
        plugin.config().drawing_prefixes.join(", ")
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    let mut input = stdin.lock();
    loop {
        if !args.json {
            print!("> ");
            stdout.flush()?;
        }

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let content = line.trim_end_matches(['\n', '\r']);
        if content.trim().is_empty() {
            continue;
        }

        let mut event = EventContext::new(Context::text(content));
        plugin.on_handle_context(&mut event);
        match (&event.reply, event.is_handled()) {
            (Some(reply), true) => print_reply(reply, args.json)?,
            _ => {
                if args.json {
                    println!("{}", json!({"handled": false}));
                } else {
                    println!("(not handled by {})", meta.name);
                }
            }
        }
    }
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let prompt = args.prompt.trim();
    if prompt.is_empty() {
        bail!("--prompt must not be empty");
    }
    let plugin = JimengPlugin::new(PluginConfig::load(&args.config)?, args.events.as_deref())?;
    let reply = plugin.handle_command(PluginCommand::Generate {
        prompt: prompt.to_string(),
    })?;
    print_reply(&reply, args.json)?;
    Ok(if reply.is_error() { 1 } else { 0 })
}

fn run_clean(args: CleanArgs) -> Result<i32> {
    let plugin = JimengPlugin::new(PluginConfig::load(&args.config)?, None)?;
    if args.all {
        let reply = plugin.handle_command(PluginCommand::CleanAll)?;
        print_reply(&reply, false)?;
        return Ok(if reply.is_error() { 1 } else { 0 });
    }
    let report = plugin.clean_old_images();
    println!("{}", format_sweep_report(&report));
    Ok(if report.is_clean() { 0 } else { 1 })
}

fn print_reply(reply: &Reply, as_json: bool) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if as_json {
        writeln!(stdout, "{}", reply_to_json(reply))?;
    } else {
        for line in render_reply(reply) {
            writeln!(stdout, "{line}")?;
        }
    }
    Ok(())
}

fn render_reply(reply: &Reply) -> Vec<String> {
    match reply {
        Reply::Text(text) => vec![text.trim_end().to_string()],
        Reply::Error(text) => vec![format!("[error] {text}")],
        Reply::Image(bytes) => vec![format!("[image] {} bytes", bytes.len())],
        Reply::Batch { text, replies } => {
            let mut lines = vec![text.clone()];
            lines.extend(replies.iter().flat_map(render_reply));
            lines
        }
    }
}

fn reply_to_json(reply: &Reply) -> Value {
    match reply {
        Reply::Text(text) => json!({"type": "text", "content": text}),
        Reply::Error(text) => json!({"type": "error", "content": text}),
        Reply::Image(bytes) => json!({
            "type": "image",
            "bytes": bytes.len(),
            "data": BASE64.encode(bytes),
        }),
        Reply::Batch { text, replies } => json!({
            "type": "batch",
            "content": text,
            "replies": replies.iter().map(reply_to_json).collect::<Vec<Value>>(),
        }),
    }
}

fn format_sweep_report(report: &SweepReport) -> String {
    if let Some(err) = &report.scan_error {
        return format!("Cleanup failed: {err}");
    }
    let mut text = format!(
        "Removed {} expired image(s), kept {}",
        report.removed.len(),
        report.kept
    );
    if !report.failed.is_empty() {
        text.push_str(&format!(", {} failed", report.failed.len()));
    }
    text
}
