//! ==============================================================================
//! view.rs - terminal projection of the console state
//! ==============================================================================
//!
//! purpose:
//!     turns a ConsoleSnapshot into text, and a line of input into a Command.
//!     rendering is a pure function: same snapshot, same screen.
//!
//! relationships:
//!     - used by: main.rs (render loop)
//!     - reads: sensor_console::ConsoleSnapshot
//!
//! ==============================================================================

use chrono::{DateTime, Local, TimeZone};
use sensor_console::{ConsoleSnapshot, QueryEntry, QueryStatus, Reading, SensorId};
use std::fmt::{Display, Write as _};

/// how many of the most recent readings are listed
const HISTORY_ROWS: usize = 10;

pub const HELP: &str = "commands: sensors | select <id> | clear | toggle | refresh | peek | help | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Sensors,
    Select(SensorId),
    Clear,
    Toggle,
    Refresh,
    Peek,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(HELP.to_string());
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "sensors" | "list" => Command::Sensors,
        "select" | "s" => {
            let id = words
                .next()
                .ok_or_else(|| "usage: select <id>".to_string())?;
            let id = id.parse().map_err(|_| format!("not a sensor id: {}", id))?;
            Command::Select(SensorId(id))
        }
        "clear" => Command::Clear,
        "toggle" | "t" => Command::Toggle,
        "refresh" | "r" => Command::Refresh,
        "peek" => Command::Peek,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command: {} ({})", other, HELP)),
    };

    if words.next().is_some() {
        return Err(format!("too many arguments ({})", HELP));
    }
    Ok(command)
}

pub fn render(snapshot: &ConsoleSnapshot, gateway: &str, notice: Option<&str>) -> String {
    render_in(snapshot, gateway, notice, &Local)
}

pub fn render_in<Tz>(snapshot: &ConsoleSnapshot, gateway: &str, notice: Option<&str>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut out = String::new();
    let _ = writeln!(out, "sensor console @ {}", gateway);
    let _ = writeln!(out, "{}", "-".repeat(60));

    // sensor "buttons"
    let _ = write!(out, "sensors: ");
    match snapshot.sensors.sensors() {
        Some(ids) if !ids.is_empty() => {
            let buttons: Vec<String> = ids
                .iter()
                .map(|id| {
                    if Some(*id) == snapshot.selected {
                        format!("[*{}*]", id)
                    } else {
                        format!("[{}]", id)
                    }
                })
                .collect();
            let _ = write!(out, "{}", buttons.join(" "));
        }
        Some(_) => {
            let _ = write!(out, "(none)");
        }
        None => {}
    }
    let _ = writeln!(out, "{}", status_suffix(&snapshot.sensors));

    match (&snapshot.selected, &snapshot.readings) {
        (Some(id), Some(entry)) => {
            let _ = writeln!(out, "\nsensor {}{}", id, status_suffix(entry));
            render_history(&mut out, entry.readings().unwrap_or_default(), tz);
            let _ = writeln!(out, "light: {}", snapshot.light);
        }
        _ => {
            let _ = writeln!(out, "\nselect a sensor to view data");
        }
    }

    if let Some(notice) = notice {
        let _ = writeln!(out, "\n! {}", notice);
    }
    let _ = writeln!(out, "{}", "-".repeat(60));
    out
}

fn status_suffix(entry: &QueryEntry) -> String {
    match entry.status {
        QueryStatus::Idle => "  (not loaded)".to_string(),
        QueryStatus::Loading => "  (loading...)".to_string(),
        QueryStatus::Success => String::new(),
        QueryStatus::Error => match &entry.error {
            Some(e) => format!("  (error: {})", e),
            None => "  (error)".to_string(),
        },
    }
}

fn render_history<Tz>(out: &mut String, readings: &[Reading], tz: &Tz)
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if readings.is_empty() {
        let _ = writeln!(out, "  no readings");
        return;
    }

    let _ = writeln!(
        out,
        "  {:<10} {:>8} {:>8} {:>10} {:>6}",
        "time", "temp", "humid", "lux", "light"
    );
    let skip = readings.len().saturating_sub(HISTORY_ROWS);
    for r in &readings[skip..] {
        let _ = writeln!(
            out,
            "  {:<10} {:>8.1} {:>8.1} {:>10.1} {:>6}",
            clock(r.timestamp, tz),
            r.temperature,
            r.humidity,
            r.luminosity,
            if r.light_on { "on" } else { "off" }
        );
    }
    if skip > 0 {
        let _ = writeln!(out, "  ({} older readings)", skip);
    }
}

fn clock<Tz>(timestamp: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match DateTime::from_timestamp(timestamp, 0) {
        Some(utc) => utc.with_timezone(tz).format("%H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

pub fn describe_reading(reading: &Reading) -> String {
    format!(
        "at {}: {:.1}C, {:.1}% humidity, {:.1} lux, light {}",
        clock(reading.timestamp, &Local),
        reading.temperature,
        reading.humidity,
        reading.luminosity,
        if reading.light_on { "on" } else { "off" }
    )
}
