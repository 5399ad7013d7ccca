//! ==============================================================================
//! main.rs - sensor console entry point
//! ==============================================================================
//!
//! purpose:
//!     a terminal front end for the sensor gateway. lists sensors, shows the
//!     selected sensor's readings and light state, and toggles the light.
//!
//! responsibilities:
//!     - load configuration and install the log subscriber
//!     - build the http gateway client and the session console
//!     - run the render loop: stdin commands, cache changes, poll ticks
//!
//! relationships:
//!     - uses: sensor_console::Console (all state and gateway traffic)
//!     - uses: view.rs (command parsing, screen rendering)
//!
//! architecture:
//!
//! ```text
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                   render loop (this file)                │
//!     │  ┌────────────┐  ┌───────────────┐  ┌─────────────────┐  │
//!     │  │ stdin      │  │ cache changes │  │ poll tick       │  │
//!     │  │ commands   │  │ (watch rev)   │  │ (optional)      │  │
//!     │  └─────┬──────┘  └───────┬───────┘  └────────┬────────┘  │
//!     │        └─────────────────┼───────────────────┘           │
//!     │                    ┌─────┴─────┐                          │
//!     │                    │  console  │ <- spawned fetch tasks   │
//!     │                    └─────┬─────┘                          │
//!     └──────────────────────────┼───────────────────────────────┘
//!                                │ http
//!                         ┌──────┴──────┐
//!                         │   gateway   │
//!                         └─────────────┘
//! ```
//!
//! ==============================================================================

mod view;

use anyhow::{Context, Result};
use sensor_console::config::LoggingConfig;
use sensor_console::{ClientError, Console, ConsoleConfig, HttpGateway, LightAck, QueryCache, QueryStatus};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use view::Command;

type SharedConsole = Console<HttpGateway>;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    let config = ConsoleConfig::load_or_default();
    init_logging(&config.logging);
    config.log_summary();

    // step 2: build the gateway client and the session console
    let gateway = HttpGateway::new(&config.gateway).context("failed to build gateway client")?;
    let base_url = gateway.base_url().to_string();
    let console = Console::new(gateway, QueryCache::new(config.cache.retry_policy()));

    // step 3: first load of the sensor list, in the background
    let (notices, notice_rx) = mpsc::unbounded_channel();
    spawn_sensor_list(&console, &notices, false);

    // step 4: render loop
    run_view(console, base_url, config.polling.interval(), notices, notice_rx).await
}

fn init_logging(logging: &LoggingConfig) {
    // stderr, so log lines do not land inside the rendered screen
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ==============================================================================
// render loop
// ==============================================================================

async fn run_view(
    console: SharedConsole,
    base_url: String,
    poll_interval: Option<Duration>,
    notices: mpsc::UnboundedSender<String>,
    mut notice_rx: mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut changes = console.subscribe();
    let mut poll = poll_interval.map(|every| {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });
    let mut notice: Option<String> = None;

    draw(&console, &base_url, notice.as_deref())?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                // any input dismisses the last notice
                notice = None;
                match view::parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => handle_command(&console, command, &notices),
                    Err(message) => notice = Some(message),
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(message) = notice_rx.recv() => {
                notice = Some(message);
            }
            _ = tick(&mut poll) => {
                tracing::debug!("poll tick");
                spawn_readings(&console, true);
            }
        }

        draw(&console, &base_url, notice.as_deref())?;
    }

    Ok(())
}

async fn tick(poll: &mut Option<tokio::time::Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn draw(console: &SharedConsole, base_url: &str, notice: Option<&str>) -> Result<()> {
    let screen = view::render(&console.snapshot(), base_url, notice);
    let mut stdout = std::io::stdout().lock();
    // clear + home
    write!(stdout, "\x1b[2J\x1b[H{}> ", screen)?;
    stdout.flush()?;
    Ok(())
}

// ==============================================================================
// commands
// ==============================================================================

fn handle_command(console: &SharedConsole, command: Command, notices: &mpsc::UnboundedSender<String>) {
    match command {
        Command::Sensors => spawn_sensor_list(console, notices, true),
        Command::Select(id) => {
            let listed = console.snapshot().sensors.sensors().map(|ids| ids.contains(&id));
            if listed == Some(false) {
                let _ = notices.send(format!("sensor {} is not in the list", id));
                return;
            }
            if console.select(Some(id)) {
                spawn_readings(console, false);
            }
        }
        Command::Clear => {
            console.select(None);
        }
        Command::Refresh => spawn_readings(console, true),
        Command::Toggle => {
            let console = console.clone();
            let notices = notices.clone();
            tokio::spawn(async move {
                let message = match console.toggle_light().await {
                    Ok(ack) => {
                        // no-op unless the toggle left the entry stale
                        console.selected_readings().await;
                        match ack {
                            LightAck::Reading(r) => format!("light is now {}", if r.light_on { "on" } else { "off" }),
                            LightAck::State(s) => format!("light set {}", if s.light_on { "on" } else { "off" }),
                        }
                    }
                    Err(e @ ClientError::Conflict(_)) => {
                        console.sensors().await;
                        e.to_string()
                    }
                    Err(e) => e.to_string(),
                };
                let _ = notices.send(message);
            });
        }
        Command::Peek => {
            let console = console.clone();
            let notices = notices.clone();
            tokio::spawn(async move {
                let message = match console.peek_latest().await {
                    Ok(Some(reading)) => format!("latest {}", view::describe_reading(&reading)),
                    Ok(None) => "gateway has no readings for this sensor".to_string(),
                    Err(e) => e.to_string(),
                };
                let _ = notices.send(message);
            });
        }
        Command::Help => {
            let _ = notices.send(view::HELP.to_string());
        }
        // handled by the loop
        Command::Quit => {}
    }
}

fn spawn_sensor_list(console: &SharedConsole, notices: &mpsc::UnboundedSender<String>, refresh: bool) {
    let console = console.clone();
    let notices = notices.clone();
    tokio::spawn(async move {
        let entry = if refresh {
            console.refresh_sensors().await
        } else {
            console.sensors().await
        };
        if entry.status == QueryStatus::Error {
            let _ = notices.send("could not load the sensor list".to_string());
        }
    });
}

/// Load the selected sensor's readings; a no-op with nothing selected.
fn spawn_readings(console: &SharedConsole, refresh: bool) {
    let console = console.clone();
    tokio::spawn(async move {
        // failures land in the entry and show up on the next render
        if refresh {
            console.refresh_selected().await;
        } else {
            console.selected_readings().await;
        }
    });
}
