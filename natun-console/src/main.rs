use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use clap::Parser;
use natun_console::{
    AgentApi, AgentClient, ClipboardSink, Console, ConsoleEvent, ConsoleSettings, CopyField,
    FileStore, SystemClipboard,
    config::{self, ConfigError, ConfigOverrides, ConsoleConfig},
};
use natun_core::{ConnectionPhase, ConnectionPresentation, KeyValueStore};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser, Debug)]
#[command(name = "natun-console", about = "Operator console for the local natun agent")]
struct ConsoleArgs {
    /// Base URL of the local agent API.
    #[arg(long)]
    agent_url: Option<String>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// How long copy feedback stays visible.
    #[arg(long)]
    feedback_ms: Option<u64>,
    #[arg(long)]
    request_timeout_ms: Option<u64>,
    /// Where config, state and logs live. Defaults to NATUN_CONSOLE_DIR, then the
    /// platform data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

/// Stdout belongs to the operator, so logs go to a file (stderr as fallback).
fn init_logging(log_path: &Path) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    if let Some(dir) = log_path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .init();
}

/// Saved config overlaid with command-line values. An unreadable saved config is
/// replaced by defaults; an invalid result is an error.
fn resolve_config(args: &ConsoleArgs, dir: &Path) -> Result<ConsoleConfig, ConfigError> {
    let path = config::config_path(dir);
    let saved = match config::load_config(&path) {
        Ok(saved) => saved.unwrap_or_default(),
        Err(err) => {
            warn!("ignoring saved config: {err}");
            ConsoleConfig::default()
        }
    };

    let overrides = ConfigOverrides {
        agent_url: args.agent_url.clone(),
        poll_interval_ms: args.poll_interval_ms,
        feedback_ms: args.feedback_ms,
        request_timeout_ms: args.request_timeout_ms,
    };
    let resolved = saved.apply(&overrides);
    resolved.validate()?;

    if let Err(err) = config::save_config(&path, &resolved) {
        warn!("failed to save config: {err}");
    }
    Ok(resolved)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = ConsoleArgs::parse();
    let dir = config::data_dir(args.data_dir.as_deref());
    init_logging(&config::log_path(&dir));

    let cfg = match resolve_config(&args, &dir) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("invalid configuration: {err}");
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let client = match cfg
        .agent_url()
        .map_err(natun_console::ApiError::from)
        .and_then(|url| AgentClient::new(url, cfg.request_timeout()))
    {
        Ok(client) => client,
        Err(err) => {
            error!("failed to create agent client: {err}");
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    info!(agent_url = %client.base_url(), data_dir = %dir.display(), "natun console starting");
    let settings = ConsoleSettings {
        poll_interval: cfg.poll_interval(),
        feedback_duration: cfg.feedback_duration(),
    };
    let store = FileStore::new(config::state_path(&dir));
    let (mut console, mut events) =
        Console::new(Arc::new(client), store, SystemClipboard::new(), settings);

    console.start();
    println!("natun console, agent at {}", cfg.agent_url.trim());
    print_help();
    run_repl(&mut console, &mut events).await;
    console.shutdown();
    info!("natun console exiting");
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

async fn run_repl<A, S, C>(
    console: &mut Console<A, S, C>,
    events: &mut mpsc::UnboundedReceiver<ConsoleEvent>,
) where
    A: AgentApi,
    S: KeyValueStore,
    C: ClipboardSink,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut reporter = Reporter::new(console);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if handle_line(console, line.trim()) == Flow::Quit {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!("failed to read operator input: {err}");
                    break;
                }
            },
            Some(event) = events.recv() => console.handle_event(event),
        }
        reporter.report(console);
    }
}

fn handle_line<A, S, C>(console: &mut Console<A, S, C>, line: &str) -> Flow
where
    A: AgentApi,
    S: KeyValueStore,
    C: ClipboardSink,
{
    if console.is_connect_prompt_open() {
        let password = if line.is_empty() {
            console.connect_password().to_owned()
        } else {
            line.to_owned()
        };
        if password.is_empty() {
            console.close_connect_prompt();
            println!("connect cancelled");
            return Flow::Continue;
        }
        match console.connect(&password) {
            Ok(()) => println!("connecting to {}...", console.target_id()),
            Err(err) => println!("{err} (empty line cancels)"),
        }
        return Flow::Continue;
    }

    if console.is_reset_prompt_open() && !console.is_reset_pending() {
        if line.is_empty() {
            console.close_reset_prompt();
            println!("reset cancelled");
            return Flow::Continue;
        }
        match console.reset_password(line) {
            Ok(()) => println!("changing password..."),
            Err(err) => println!("{err} (empty line cancels)"),
        }
        return Flow::Continue;
    }

    if let Some(id) = console.pending_delete().map(str::to_owned) {
        if matches!(line.to_ascii_lowercase().as_str(), "y" | "yes") {
            match console.confirm_delete() {
                Ok(()) => println!("removed {id}"),
                Err(err) => println!("{err}"),
            }
        } else {
            console.cancel_delete();
            println!("kept {id}");
        }
        return Flow::Continue;
    }

    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) => {}
        (Some("help"), _) => print_help(),
        (Some("status"), _) => print_status(console),
        (Some("recent"), _) => print_recent(console),
        (Some("connect"), Some(code)) => match console.open_connect_prompt(code) {
            Ok(()) if console.connect_password().is_empty() => {
                println!("password for {} (empty line cancels):", console.target_id());
            }
            Ok(()) => println!(
                "password for {} (empty line uses the saved one):",
                console.target_id()
            ),
            Err(err) => println!("{err}"),
        },
        (Some("quick"), Some(which)) => {
            let id = resolve_recent(console, which);
            match console.quick_connect(&id) {
                Ok(()) => println!("connecting to {id}..."),
                Err(err) => println!("{err}"),
            }
        }
        (Some("forget"), Some(which)) => {
            let id = resolve_recent(console, which);
            match console.request_delete(&id) {
                Ok(()) => println!("remove {id} from recent devices? [y/N]"),
                Err(err) => println!("{err}"),
            }
        }
        (Some("reset"), _) => {
            if console.is_reset_pending() {
                println!("a password reset is already in progress");
            } else {
                console.open_reset_prompt();
                println!("new password, 6 digits (empty line cancels):");
            }
        }
        (Some("copy"), Some(field)) => {
            let field = match field {
                "id" => CopyField::ClientId,
                "password" => CopyField::Password,
                "peer-ip" => CopyField::PeerIp,
                other => {
                    println!("unknown field {other}, use id, password or peer-ip");
                    return Flow::Continue;
                }
            };
            if console.copy(field) {
                println!("{}", console.copy_label(field));
            } else {
                println!("nothing to copy yet");
            }
        }
        (Some("quit" | "exit"), _) => return Flow::Quit,
        _ => println!("unknown command, type `help`"),
    }
    Flow::Continue
}

/// Accepts either a device id or its 1-based position in the recent list.
fn resolve_recent<A, S, C>(console: &Console<A, S, C>, which: &str) -> String
where
    A: AgentApi,
    S: KeyValueStore,
    C: ClipboardSink,
{
    which
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|index| console.recent_devices().get(index))
        .map(|device| device.id.clone())
        .unwrap_or_else(|| which.to_owned())
}

fn print_help() {
    println!("commands:");
    println!("  status              local device, peer and connection state");
    println!("  connect <code>      connect to a peer by its 8-character code");
    println!("  recent              recently connected devices");
    println!("  quick <id|n>        reconnect to a recent device");
    println!("  forget <id|n>       remove a recent device");
    println!("  reset               change this device's password");
    println!("  copy <field>        copy id, password or peer-ip to the clipboard");
    println!("  quit");
}

fn print_status<A, S, C>(console: &Console<A, S, C>)
where
    A: AgentApi,
    S: KeyValueStore,
    C: ClipboardSink,
{
    let device = console.local_device();
    let peer = console.peer();
    let info = console.connection_info();
    println!("this device");
    println!(
        "  id        {}  [{}]",
        device.client_id,
        console.copy_label(CopyField::ClientId)
    );
    println!(
        "  password  {}  [{}]",
        device.password,
        console.copy_label(CopyField::Password)
    );
    println!("  ip        {}", device.ip);
    println!("  nat       {}", device.nat_type);
    println!("peer");
    println!("  id        {}", peer.client_id);
    println!(
        "  ip        {}  [{}]",
        peer.ip,
        console.copy_label(CopyField::PeerIp)
    );
    println!("  latency   {}", peer.latency);
    println!("  mode      {}", info.mode);
    println!("{}", describe(console.presentation()));
}

fn print_recent<A, S, C>(console: &Console<A, S, C>)
where
    A: AgentApi,
    S: KeyValueStore,
    C: ClipboardSink,
{
    let devices = console.recent_devices();
    if devices.is_empty() {
        println!("no recent devices");
        return;
    }
    for (index, device) in devices.iter().enumerate() {
        println!(
            "  {}. {}  last connected {}",
            index + 1,
            device.id,
            device.last_connected_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn describe(presentation: &ConnectionPresentation) -> String {
    let phase = match presentation.phase {
        ConnectionPhase::Connected => "online",
        ConnectionPhase::Connecting => "connecting",
        ConnectionPhase::Failed => "failed",
        ConnectionPhase::Disconnected => "offline",
    };
    format!("[{phase}] {}", presentation.message)
}

/// Prints what changed since the previous event so the operator sees progress
/// without asking for `status`.
struct Reporter {
    presentation: ConnectionPresentation,
    device_loaded: bool,
    resetting: bool,
}

impl Reporter {
    fn new<A, S, C>(console: &Console<A, S, C>) -> Self
    where
        A: AgentApi,
        S: KeyValueStore,
        C: ClipboardSink,
    {
        Self {
            presentation: console.presentation().clone(),
            device_loaded: console.local_device().is_loaded(),
            resetting: console.is_reset_pending(),
        }
    }

    fn report<A, S, C>(&mut self, console: &mut Console<A, S, C>)
    where
        A: AgentApi,
        S: KeyValueStore,
        C: ClipboardSink,
    {
        for alert in console.take_alerts() {
            println!("! {alert}");
        }

        if console.presentation() != &self.presentation {
            self.presentation = console.presentation().clone();
            println!("{}", describe(&self.presentation));
        }

        let loaded = console.local_device().is_loaded();
        if loaded != self.device_loaded {
            self.device_loaded = loaded;
            if loaded {
                let device = console.local_device();
                println!(
                    "agent ready: id {} password {}",
                    device.client_id, device.password
                );
            } else {
                println!("agent unreachable, retrying");
            }
        }

        if self.resetting && !console.is_reset_pending() {
            match console.reset_error() {
                Some(message) => println!("{message} (empty line cancels)"),
                None => println!("password changed to {}", console.local_device().password),
            }
        }
        self.resetting = console.is_reset_pending();
    }
}
