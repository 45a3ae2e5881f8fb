//! Loopback simulation of a bootloader session.
//!
//! The image is cut into commands no larger than the channel capacity.
//! Each command is downloaded segment by segment from inside the channel's
//! read loop, read back by the emulated bootloader core, acknowledged with
//! a response and finally uploaded again by the emulated master.

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use sdoboot::{
    CommChannel, NodeId, SdoClient, SystemClock, WaitBudget, decode_ack, encode_ack,
    host::ACK_OK,
};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::{Cli, CliError, use_fancy_output, was_interrupted};

/// Effective simulation settings.
#[derive(Debug, Clone)]
pub(crate) struct SimulateOptions {
    pub capacity: usize,
    pub fragment_size: usize,
    pub timeout_units: u8,
    pub node_id: Option<u8>,
}

/// Transfer summary.
#[derive(Debug, Serialize)]
pub(crate) struct SimulateReport {
    pub image: String,
    pub bytes: usize,
    pub commands: usize,
    pub segments: u64,
    pub capacity: usize,
    pub fragment_size: usize,
    pub node_id: Option<u8>,
    pub resets: u32,
    pub elapsed_ms: u128,
}

/// Run a loopback transfer of `image` and return the summary.
pub(crate) fn run_simulation(
    image: &Path,
    data: &[u8],
    options: &SimulateOptions,
    progress: &ProgressBar,
) -> Result<SimulateReport> {
    if data.is_empty() {
        return Err(CliError::Usage(format!("image {} is empty", image.display())).into());
    }
    let node_id = options
        .node_id
        .map(NodeId::try_from)
        .transpose()
        .map_err(|e| CliError::Usage(e.to_string()))?;

    let client = SdoClient::with_fragment_size(options.fragment_size)
        .map_err(|e| CliError::Usage(e.to_string()))?;
    let mut channel = CommChannel::new(options.capacity, client, SystemClock::new())
        .map_err(|e| CliError::Usage(e.to_string()))?;
    let budget = WaitBudget::from_units(options.timeout_units);

    channel.start();
    let started = Instant::now();
    let mut command = vec![0u8; options.capacity];
    let mut commands = 0;

    for chunk in data.chunks(options.capacity) {
        if was_interrupted() {
            channel.stop();
            return Err(CliError::Cancelled("simulation interrupted".into()).into());
        }

        let (client, mailbox) = channel.parts_mut();
        client.begin_download(mailbox, chunk)?;

        let received = match channel.read(&mut command, budget) {
            Ok(n) => n,
            Err(err) => {
                if let Some(cause) = channel.hooks_mut().take_error() {
                    warn!("Download failed: {cause}");
                }
                channel.reset();
                channel.stop();
                return Err(err).with_context(|| format!("command {commands} not received"));
            },
        };
        if command[..received] != *chunk {
            channel.reset();
            bail!("command {commands} corrupted in transfer");
        }

        let ack = encode_ack(ACK_OK, received)?;
        channel.write(&ack)?;

        let (client, mailbox) = channel.parts_mut();
        let response = client.upload(mailbox)?;
        let (status, len) = decode_ack(&response)?;
        if status != ACK_OK || usize::from(len) != received {
            bail!("unexpected acknowledgement {status:#04x} for {len} bytes");
        }

        commands += 1;
        progress.inc(received as u64);
        debug!("Command {commands}: {received} bytes acknowledged");
    }

    channel.stop();
    progress.finish_and_clear();

    Ok(SimulateReport {
        image: image.display().to_string(),
        bytes: data.len(),
        commands,
        segments: channel.hooks().segments_sent(),
        capacity: channel.capacity(),
        fragment_size: options.fragment_size,
        node_id: node_id.map(NodeId::get),
        resets: channel.reset_count(),
        elapsed_ms: started.elapsed().as_millis(),
    })
}

/// Simulate command implementation.
pub(crate) fn cmd_simulate(
    cli: &Cli,
    image: &Path,
    options: &SimulateOptions,
    json: bool,
) -> Result<()> {
    let data = fs::read(image)
        .with_context(|| format!("Failed to read image {}", image.display()))?;

    let progress = if cli.quiet || json || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(data.len() as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let report = run_simulation(image, &data, options, &progress)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !cli.quiet {
        eprintln!(
            "{} {} bytes in {} commands ({} segments, {} ms)",
            style("✓").green().bold(),
            report.bytes,
            report.commands,
            report.segments,
            report.elapsed_ms
        );
        if let Some(id) = report.node_id {
            eprintln!("    {} node-ID {id}", style("•").dim());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn options(capacity: usize, fragment_size: usize) -> SimulateOptions {
        SimulateOptions {
            capacity,
            fragment_size,
            timeout_units: 0xFF,
            node_id: None,
        }
    }

    #[test]
    fn test_simulation_splits_by_capacity() {
        let data: Vec<u8> = (0..=255u8).cycle().take(150).collect();
        let report = run_simulation(
            &PathBuf::from("image.bin"),
            &data,
            &options(64, 7),
            &ProgressBar::hidden(),
        )
        .unwrap();

        assert_eq!(report.bytes, 150);
        assert_eq!(report.commands, 3);
        // Downloads 10 + 10 + 4 segments; each ack upload is one segment.
        assert_eq!(report.segments, 24 + 3);
        assert_eq!(report.resets, 0);
    }

    #[test]
    fn test_simulation_with_small_fragments() {
        let report = run_simulation(
            &PathBuf::from("image.bin"),
            &[0x5A; 20],
            &options(300, 3),
            &ProgressBar::hidden(),
        )
        .unwrap();

        assert_eq!(report.commands, 1);
        assert_eq!(report.segments, 7 + 1);
    }

    #[test]
    fn test_empty_image_is_usage_error() {
        let err = run_simulation(
            &PathBuf::from("empty.bin"),
            &[],
            &options(64, 7),
            &ProgressBar::hidden(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_invalid_node_id_is_usage_error() {
        let mut opts = options(64, 7);
        opts.node_id = Some(200);
        let err = run_simulation(
            &PathBuf::from("image.bin"),
            &[1, 2, 3],
            &opts,
            &ProgressBar::hidden(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }
}
