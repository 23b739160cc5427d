use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use lookout_client::config::parse_bool_flag;
use lookout_client::{
    HttpProjectApi, ProjectApi, ProjectView, ProjectViewHandle, SyncConfig, ViewSnapshot,
};
use lookout_core::RequestKind;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};
use url::Url;

const DEFAULT_API_BASE: &str = "http://localhost:8080/";

#[derive(Parser, Debug)]
#[command(name = "lookout-watch")]
struct Args {
    /// Project to mount.
    project_id: String,
    #[arg(long, default_value = "")]
    api_base: String,
    #[arg(long, default_value = "")]
    ws_base: String,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long)]
    log_stdout: bool,
}

struct RuntimeConfig {
    project_id: String,
    sync: SyncConfig,
    log_dir: String,
    log_stdout: bool,
}

struct LogGuard {
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout_enabled: bool,
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchCommand {
    Submit { kind: RequestKind, instruction: String },
    Publish,
    Switch(Option<String>),
    Retry,
    Visible(bool),
    Quit,
    Help,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args)?;
    let _log_guard = init_logging(&config);

    let api: Arc<dyn ProjectApi> =
        Arc::new(HttpProjectApi::new(config.sync.clone()).context("build http client")?);
    let view = ProjectView::mount(config.sync.clone(), config.project_id.clone(), api)
        .context("mount project view")?;
    info!("watch_started: project={}", config.project_id);
    println!("watching {} (type /help for commands)", config.project_id);

    let render = tokio::spawn(render_loop(view.subscribe()));
    let outcome = command_loop(&view).await;
    view.shutdown().await;
    render.abort();
    outcome
}

async fn command_loop(view: &ProjectViewHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };
        let Some(command) = parse_command(&line) else {
            continue;
        };
        match command {
            WatchCommand::Quit => return Ok(()),
            WatchCommand::Help => print_help(),
            WatchCommand::Submit { kind, instruction } => match view.submit(instruction, kind).await {
                Ok(receipt) => println!(
                    "{} submitted {} ({:?})",
                    stamp(),
                    receipt.request_id,
                    receipt.disposition
                ),
                Err(err) => println!("{} submit failed: {}", stamp(), err.user_message()),
            },
            WatchCommand::Publish => {
                if let Err(err) = view.publish().await {
                    println!("{} publish failed: {}", stamp(), err.user_message());
                }
            }
            WatchCommand::Switch(conversation_id) => view.switch_session(conversation_id)?,
            WatchCommand::Retry => view.retry_initialization()?,
            WatchCommand::Visible(visible) => view.set_visible(visible)?,
        }
    }
}

async fn render_loop(mut rx: tokio::sync::watch::Receiver<ViewSnapshot>) {
    let mut previous = rx.borrow_and_update().clone();
    for line in describe_changes(None, &previous) {
        println!("{} {line}", stamp());
    }
    while rx.changed().await.is_ok() {
        let next = rx.borrow_and_update().clone();
        for line in describe_changes(Some(&previous), &next) {
            println!("{} {line}", stamp());
        }
        previous = next;
    }
}

fn stamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn print_help() {
    println!("  <text>            submit an act request");
    println!("  /chat <text>      submit a chat request");
    println!("  /publish          deploy the project");
    println!("  /switch [id]      switch conversation (none = all)");
    println!("  /retry            reconnect and reload");
    println!("  /hide, /show      toggle visibility");
    println!("  /quit");
}

fn parse_command(line: &str) -> Option<WatchCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(WatchCommand::Submit {
            kind: RequestKind::Act,
            instruction: line.to_string(),
        });
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match name {
        "chat" if !arg.is_empty() => WatchCommand::Submit {
            kind: RequestKind::Chat,
            instruction: arg.to_string(),
        },
        "act" if !arg.is_empty() => WatchCommand::Submit {
            kind: RequestKind::Act,
            instruction: arg.to_string(),
        },
        "publish" | "deploy" => WatchCommand::Publish,
        "switch" => WatchCommand::Switch((!arg.is_empty()).then(|| arg.to_string())),
        "retry" => WatchCommand::Retry,
        "hide" => WatchCommand::Visible(false),
        "show" => WatchCommand::Visible(true),
        "quit" | "exit" => WatchCommand::Quit,
        _ => WatchCommand::Help,
    };
    Some(command)
}

/// Log-style lines for whatever changed between two snapshots.
fn describe_changes(previous: Option<&ViewSnapshot>, next: &ViewSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    if previous.map(|prev| prev.connection) != Some(next.connection) {
        lines.push(format!("push {}", next.connection));
        if next.connection_lost {
            lines.push("connection lost; /retry to reconnect".to_string());
        }
    }
    if previous.map(|prev| prev.project_status) != Some(next.project_status)
        || previous.map(|prev| &prev.project_message) != Some(&next.project_message)
    {
        match next.project_message.as_deref() {
            Some(message) => lines.push(format!("project {} ({message})", next.project_status)),
            None => lines.push(format!("project {}", next.project_status)),
        }
    }
    for record in &next.requests {
        let before = previous.and_then(|prev| {
            prev.requests
                .iter()
                .find(|old| old.request_id == record.request_id)
        });
        if before.map(|old| old.status) == Some(record.status) {
            continue;
        }
        match record.error.as_deref() {
            Some(error) => lines.push(format!(
                "{} {} {}: {error}",
                record.kind, record.request_id, record.status
            )),
            None => lines.push(format!("{} {} {}", record.kind, record.request_id, record.status)),
        }
    }
    if previous.map(|prev| &prev.deployment) != Some(&next.deployment) {
        let job = &next.deployment;
        let detail = job
            .url
            .as_deref()
            .or(job.error.as_deref())
            .or(job.deployment_id.as_deref());
        match detail {
            Some(detail) => lines.push(format!("deploy {} {detail}", job.status)),
            None => lines.push(format!("deploy {}", job.status)),
        }
    }
    for message in next.messages.iter() {
        let before = previous.and_then(|prev| prev.messages.iter().find(|old| old.id == message.id));
        match before {
            None => lines.push(format!("[{}] {}", message.role, first_line(&message.content))),
            Some(old) if old.content != message.content => {
                lines.push(format!("[{}] …{}", message.role, last_line(&message.content)))
            }
            Some(_) => {}
        }
    }
    lines
}

fn first_line(content: &str) -> &str {
    content.lines().find(|line| !line.trim().is_empty()).unwrap_or("")
}

fn last_line(content: &str) -> &str {
    content
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
}

fn load_config(args: Args) -> Result<RuntimeConfig> {
    let api_base = Url::parse(&resolve_api_base(&args.api_base)).context("parse api base")?;
    let mut sync = SyncConfig::from_env(api_base)?;
    if let Some(ws_base) = resolve_ws_base(&args.ws_base) {
        sync = sync.with_ws_base(Url::parse(&ws_base).context("parse ws base")?);
    }
    Ok(RuntimeConfig {
        project_id: args.project_id,
        sync,
        log_dir: resolve_log_dir(&args.log_dir),
        log_stdout: args.log_stdout || resolve_log_stdout(),
    })
}

fn resolve_api_base(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    if let Ok(value) = env::var("LOOKOUT_API_BASE") {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    DEFAULT_API_BASE.to_string()
}

fn resolve_ws_base(flag: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    env::var("LOOKOUT_WS_BASE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_log_dir(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = env::var("LOOKOUT_LOG_DIR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    ".lookout/logs".to_string()
}

fn resolve_log_stdout() -> bool {
    env::var("LOOKOUT_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false)
}

fn init_logging(config: &RuntimeConfig) -> Option<LogGuard> {
    let level = env::var("LOOKOUT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir, &config.project_id) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let stdout_enabled = config.log_stdout;
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), stdout_enabled));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

impl MultiWriter {
    fn new(file: Option<Arc<StdMutex<std::fs::File>>>, stdout_enabled: bool) -> Self {
        Self {
            stdout_enabled,
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stdout_enabled {
            let _ = io::stdout().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stdout_enabled {
            let _ = io::stdout().flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str, project_id: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let path = dir.join(format!("lookout-watch-{}.log", sanitize_component(project_id)));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(StdMutex::new(file))),
    })
}

fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_client::deployment_monitor::DeploymentJob;
    use lookout_core::{ConnectionState, DeploymentStatus};

    fn snapshot() -> ViewSnapshot {
        ViewSnapshot {
            project_id: "p1".to_string(),
            connection: ConnectionState::Connecting,
            is_connected: false,
            connection_lost: false,
            has_active_requests: false,
            server_busy: false,
            requests: Vec::new(),
            deployment: DeploymentJob::default(),
            messages: Vec::new().into(),
            transcript: Vec::new().into(),
            project_status: Default::default(),
            project_message: None,
            remote_session: None,
            active_conversation: None,
            visible: true,
        }
    }

    #[test]
    fn plain_lines_submit_acts() {
        assert_eq!(
            parse_command("  add a footer "),
            Some(WatchCommand::Submit {
                kind: RequestKind::Act,
                instruction: "add a footer".to_string()
            })
        );
        assert_eq!(
            parse_command("/chat why is the build slow?"),
            Some(WatchCommand::Submit {
                kind: RequestKind::Chat,
                instruction: "why is the build slow?".to_string()
            })
        );
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn slash_commands_parse() {
        assert_eq!(parse_command("/publish"), Some(WatchCommand::Publish));
        assert_eq!(
            parse_command("/switch conv-2"),
            Some(WatchCommand::Switch(Some("conv-2".to_string())))
        );
        assert_eq!(parse_command("/switch"), Some(WatchCommand::Switch(None)));
        assert_eq!(parse_command("/hide"), Some(WatchCommand::Visible(false)));
        assert_eq!(parse_command("/chat"), Some(WatchCommand::Help));
        assert_eq!(parse_command("/quit"), Some(WatchCommand::Quit));
    }

    #[test]
    fn unchanged_snapshot_prints_nothing() {
        let base = snapshot();
        assert!(describe_changes(Some(&base), &base).is_empty());
        assert_eq!(describe_changes(None, &base)[0], "push connecting");
    }

    #[test]
    fn deployment_and_connection_changes_are_described() {
        let base = snapshot();
        let mut next = base.clone();
        next.connection = ConnectionState::Failed;
        next.connection_lost = true;
        next.deployment = DeploymentJob {
            status: DeploymentStatus::Ready,
            url: Some("https://site.example".to_string()),
            ..DeploymentJob::default()
        };
        let lines = describe_changes(Some(&base), &next);
        assert_eq!(
            lines,
            vec![
                "push failed".to_string(),
                "connection lost; /retry to reconnect".to_string(),
                "deploy ready https://site.example".to_string(),
            ]
        );
    }

    #[test]
    fn sanitizes_log_file_names() {
        assert_eq!(sanitize_component("proj/1 x"), "proj_1_x");
    }
}
