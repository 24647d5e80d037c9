use anyhow::{Context, Result};
use clap::{Arg, Command};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod app;
mod chat;
mod composer;
mod config;
mod remote;
mod ui;

use app::App;
use config::Config;
use remote::HttpBackend;

const HUDDLE_LOGO: &str = r#"
 ██                  ██      ██ ██
 ██                  ██      ██ ██
 ████████  ██    ██  ██████████ ██  ██████
 ██    ██  ██    ██  ██  ██  ██ ██ ██    ██
 ██    ██  ██    ██  ██  ██  ██ ██ ████████
 ██    ██  ██    ██  ██  ██  ██ ██ ██
 ██    ██  ████████  ██  ██  ██ ██  ██████
"#;

fn show_startup_logo() {
    print!("\x1B[2J\x1B[1;1H");

    let colors = [
        "\x1B[38;5;24m",
        "\x1B[38;5;25m",
        "\x1B[38;5;31m",
        "\x1B[38;5;37m",
        "\x1B[38;5;43m",
        "\x1B[38;5;49m",
        "\x1B[38;5;85m",
        "\x1B[38;5;121m",
    ];
    for (i, line) in HUDDLE_LOGO.lines().enumerate() {
        if i < colors.len() && !line.trim().is_empty() {
            println!("{}{}\x1B[0m", colors[i], line);
        } else {
            println!("{line}");
        }
    }

    println!("\n\x1B[38;5;37m=== huddle v0.3.0 - terminal team chat ===\x1B[0m");
    println!("\x1B[38;5;43mChannels, threads and direct messages from your terminal\x1B[0m");
    println!("\x1B[38;5;49mPress any key to continue...\x1B[0m\n");

    let _ = std::io::Read::read(&mut std::io::stdin(), &mut [0u8; 1]);
}

fn init_logging() {
    let Some(path) = Config::log_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(file) = std::fs::File::create(&path) else {
        return;
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("huddle=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("huddle")
        .version("0.3.0")
        .about("Terminal client for team chat workspaces")
        .arg(
            Arg::new("server")
                .long("server")
                .value_name("URL")
                .help("Chat server base URL (overrides config)"),
        )
        .arg(
            Arg::new("token")
                .long("token")
                .value_name("TOKEN")
                .help("API token (overrides config)"),
        )
        .arg(
            Arg::new("workspace")
                .short('w')
                .long("workspace")
                .value_name("WORKSPACE")
                .help("Workspace id (overrides config)"),
        )
        .arg(
            Arg::new("channel")
                .short('c')
                .long("channel")
                .value_name("NAME")
                .help("Auto-join a channel on startup"),
        )
        .arg(
            Arg::new("no-logo")
                .long("no-logo")
                .action(clap::ArgAction::SetTrue)
                .help("Skip the startup logo"),
        )
        .get_matches();

    init_logging();
    let config = Config::load()?;

    let server_url = matches
        .get_one::<String>("server")
        .cloned()
        .or(config.server_url)
        .context("no server URL; pass --server or set server_url in config.toml")?;
    let token = matches
        .get_one::<String>("token")
        .cloned()
        .or(config.token)
        .context("no API token; pass --token or set token in config.toml")?;
    let workspace = matches
        .get_one::<String>("workspace")
        .cloned()
        .or(config.workspace)
        .context("no workspace; pass --workspace or set workspace in config.toml")?;
    let auto_channel = matches
        .get_one::<String>("channel")
        .cloned()
        .or(config.default_channel);

    if !matches.get_flag("no-logo") {
        show_startup_logo();
    }

    let backend = Arc::new(HttpBackend::new(&server_url, &token)?);
    let workspace_id: chat::WorkspaceId = workspace.as_str().into();

    let (update_tx, update_rx) = mpsc::unbounded_channel();
    backend.spawn_watch(workspace_id.clone(), update_tx);

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let terminal_backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(terminal_backend)?;

    let backend: Arc<dyn remote::Backend> = backend;
    let mut app = App::new(backend, workspace_id, update_rx, auto_channel.as_deref()).await?;
    let res = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {err:?}");
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    let mut last_tick = Instant::now();
    let tick_rate = Duration::from_millis(250);

    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        let timeout_duration = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if event::poll(timeout_duration)? {
            let event = event::read()?;
            app.handle_input(event).await?;
        }

        if last_tick.elapsed() >= tick_rate {
            app.on_tick().await?;
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
