//! Debug console and port listing.

use anyhow::{Context, Result};
use console::style;
use log::debug;
use sdoboot::{MemoryRx, NativeRx, SerialConfig, SerialInput};
use std::fs;
use std::io::{self, Write as _};
use std::path::Path;
use std::time::Duration;

use crate::{Cli, CliError};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Assemble console commands from a serial port and print one per line.
pub(crate) fn cmd_console(cli: &Cli, port: &str, baud: u32) -> Result<()> {
    let rx = NativeRx::open(&SerialConfig::new(port, baud))
        .map_err(|e| CliError::Device(format!("cannot open {port}: {e}")))?;

    if !cli.quiet {
        eprintln!(
            "{} Listening on {} at {baud} baud (Ctrl+C to exit)",
            style("📡").cyan(),
            style(rx.name()).green()
        );
    }

    let mut input = SerialInput::new(rx);
    let mut stdout = io::stdout();
    loop {
        match input.next_command(POLL_INTERVAL)? {
            Some(command) => {
                writeln!(stdout, "{command}")?;
                stdout.flush()?;
            },
            None => return Err(CliError::Cancelled("console closed".into()).into()),
        }
    }
}

/// Replay a capture file through the line assembler.
///
/// The capture is fed one line at a time, as a host typing at the console
/// would, so the receive buffer limit applies per line.
pub(crate) fn cmd_console_replay(path: &Path) -> Result<()> {
    let capture =
        fs::read(path).with_context(|| format!("Failed to read capture {}", path.display()))?;

    for command in replay(&capture)? {
        println!("{command}");
    }
    Ok(())
}

fn replay(capture: &[u8]) -> Result<Vec<String>> {
    let mut input = SerialInput::new(MemoryRx::new());
    let mut commands = Vec::new();

    for line in capture.split_inclusive(|&b| b == b'\n' || b == b'\r') {
        input
            .rx_mut()
            .push(line);
        input.check_host()?;
        if let Some(command) = input.take_command() {
            if command.is_empty() {
                continue;
            }
            commands.push(command);
        }
    }

    if !input.buffered().is_empty() {
        debug!(
            "{} trailing bytes without a terminator ignored",
            input.buffered().len()
        );
    }
    Ok(commands)
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = sdoboot::list_ports().map_err(|e| CliError::Device(e.to_string()))?;

    if json {
        let ports: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "vid": p.vid,
                    "pid": p.pid,
                    "product": p.product,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Available ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("(none)").dim());
    }
    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        eprintln!(
            "  {} {}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_cleans_each_line() {
        let commands = replay(b"reset node\r\nstatus # query\nver\x08r\n").unwrap();
        assert_eq!(commands, vec!["RESETNODE", "STATUS", "VER"]);
    }

    #[test]
    fn test_replay_ignores_unterminated_tail() {
        let commands = replay(b"boot\npartial").unwrap();
        assert_eq!(commands, vec!["BOOT"]);
    }

    #[test]
    fn test_replay_skips_blank_lines() {
        let commands = replay(b"\n\n  \nid\n").unwrap();
        assert_eq!(commands, vec!["ID"]);
    }
}
