mod config;
mod server;
mod simulation;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::{PacketLossConfig, ServerConfig};
use server::{GameServer, ServerCommand, ServerStats};
use tui::TuiState;

#[derive(Parser)]
#[command(name = "arena-server")]
#[command(about = "Arena game server")]
struct Args {
    #[arg(short, long, help = "TOML file with server settings")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long, help = "Name advertised to the server browser")]
    name: Option<String>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(short, long)]
    max_players: Option<usize>,

    #[arg(long, help = "Do not broadcast discovery beacons")]
    no_discovery: bool,

    #[arg(long)]
    headless: bool,

    #[arg(long, help = "Enable packet loss simulation on outgoing datagrams")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(max_players) = self.max_players {
            config.max_players = max_players;
        }
        if self.no_discovery {
            config.discovery = false;
        }
        if self.simulate_packet_loss {
            config.packet_loss = Some(PacketLossConfig {
                loss_percent: self.loss_percent,
                min_latency_ms: self.min_latency,
                max_latency_ms: self.max_latency,
                jitter_ms: self.jitter,
            });
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let headless = args.headless;
    let config = args.into_config()?;

    if headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut server = GameServer::new(&config)
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    log::info!("'{}' listening on {}", config.name, server.local_addr());

    let running = server.running();
    let status = server.status();
    let commands = server.commands();
    let handle = server.spawn()?;

    let result = if headless {
        wait_for_ctrl_c(&running)
    } else {
        run_with_tui(&running, &status, &commands).map_err(anyhow::Error::from)
    };

    running.store(false, Ordering::SeqCst);
    if handle.join().is_err() {
        anyhow::bail!("server thread panicked");
    }
    log::info!("Server shut down");
    result
}

fn wait_for_ctrl_c(running: &AtomicBool) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        tokio::signal::ctrl_c().await?;
        log::info!("interrupt received, shutting down");
        running.store(false, Ordering::SeqCst);
        Ok::<_, anyhow::Error>(())
    })
}

fn run_with_tui(
    running: &AtomicBool,
    status: &Arc<Mutex<ServerStats>>,
    commands: &Sender<ServerCommand>,
) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut tui_state = TuiState::default();

    while running.load(Ordering::SeqCst) {
        let stats = match status.lock() {
            Ok(stats) => stats.clone(),
            Err(_) => break,
        };

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let players = stats.players.len();
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Up => tui_state.select_prev(players),
                        KeyCode::Down => tui_state.select_next(players),
                        KeyCode::Char('k') | KeyCode::Char('K') => {
                            if let Some(index) = tui_state.selected(players) {
                                // The server thread only goes away after `running` clears.
                                let _ = commands.send(ServerCommand::Kick(stats.players[index].id));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        terminal.draw(|frame| {
            tui::render(frame, &stats, &tui_state);
        })?;
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
