//! The backup runner: drives the imaging command against a block device.

use crate::job::BackupJob;
use crate::prompt::{self, Prompt};
use crate::stream::{self, StreamEvent};
use anyhow::{Context, Result, anyhow, bail};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// What a completed copy looked like.
#[derive(Clone, Debug)]
pub struct BackupReport {
    /// Raw size of the source device in bytes.
    pub device_size: u64,
    /// Size of the written image file in bytes.
    pub file_size: u64,
    /// Wall-clock time of the copy.
    pub elapsed: Duration,
}

/// The result of a backup run that did not error.
pub enum BackupOutcome {
    /// The image was written and synced.
    Completed(BackupReport),
    /// The user declined to overwrite an existing output file.
    Declined,
}

fn parse_size(stdout: &str) -> Result<u64> {
    stdout
        .trim()
        .parse()
        .with_context(|| format!("blockdev reported a non-numeric size: {stdout:?}"))
}

/// Queries the raw byte size of a block device via `blockdev --getsize64`.
///
/// There is no degraded mode here: without the size there is nothing to put
/// the progress stream or the later shrink savings in relation to, so
/// callers abort the run on an error.
pub fn device_size(device: &Path) -> Result<u64> {
    let output = Command::new("blockdev")
        .arg("--getsize64")
        .arg(device)
        .output()
        .context("could not run blockdev")?;

    if !output.status.success() {
        bail!(
            "blockdev --getsize64 {} exited with {}",
            device.display(),
            output.status
        );
    }

    parse_size(&String::from_utf8_lossy(&output.stdout))
}

fn dd_args(job: &BackupJob) -> Vec<String> {
    vec![
        format!("if={}", job.source_device.display()),
        format!("of={}", job.output_file.display()),
        format!("bs={}", job.block_size),
        "status=progress".to_string(),
        // Data must reach stable storage before dd reports success.
        "conv=fsync".to_string(),
    ]
}

fn dd_command(job: &BackupJob) -> Command {
    let mut command = stream::elevated("dd");
    command.args(dd_args(job));
    command
}

/// Copies the source device of `job` to its output file with `dd`.
///
/// The imaging command runs under sudo with its combined output streamed
/// line-by-line through `on_line`; that stream is the user's only progress
/// indicator.
///
/// # Arguments
///
/// * `job` - The device/file/block-size triple to copy.
/// * `prompt` - Channel for the overwrite confirmation when the output file
///   already exists.
/// * `running` - Cleared by the caller's interrupt handler; the child is
///   killed at the next output line and the run fails.
/// * `on_start` - Called once with the device size, before the copy begins.
/// * `on_command` - Called once with the rendered command line.
/// * `on_line` - Called for every line of dd output, as produced.
///
/// # Errors
///
/// Fails if the size query fails, the child cannot be spawned, dd exits
/// non-zero, or the user interrupts the copy. An interrupted or failed copy
/// leaves the partial output file in place: a truncated disk image can
/// still be worth salvaging, and the next run asks before overwriting it.
pub fn run(
    job: &BackupJob,
    prompt: &mut dyn Prompt,
    running: Arc<AtomicBool>,
    on_start: impl FnOnce(u64),
    on_command: impl FnOnce(&str),
    mut on_line: impl FnMut(&str),
) -> Result<BackupOutcome> {
    let device_size = device_size(&job.source_device).with_context(|| {
        format!(
            "could not determine the size of {}",
            job.source_device.display()
        )
    })?;
    on_start(device_size);

    if job.output_file.exists() {
        let answer = prompt.ask(&format!(
            "⚠️  {} already exists. Overwrite? (j/n)",
            job.output_file.display()
        ));
        if !answer.as_deref().is_some_and(prompt::is_yes) {
            return Ok(BackupOutcome::Declined);
        }
    }

    let command = dd_command(job);
    on_command(&stream::render(&command));

    let started = Instant::now();
    let mut stream = stream::spawn(command)?;
    let mut exit = None;

    while let Some(event) = stream.next() {
        match event {
            StreamEvent::Line(line) => {
                on_line(&line);
                if !running.load(Ordering::SeqCst) {
                    stream.kill();
                }
            }
            StreamEvent::Exited(status) => exit = Some(status),
        }
    }

    if !running.load(Ordering::SeqCst) {
        return Err(anyhow!("backup interrupted by user"));
    }

    let status = exit.ok_or_else(|| anyhow!("the imaging process vanished without an exit status"))?;
    if !status.success() {
        bail!("dd exited with {status}");
    }

    let file_size = std::fs::metadata(&job.output_file)
        .with_context(|| format!("could not stat {}", job.output_file.display()))?
        .len();

    Ok(BackupOutcome::Completed(BackupReport {
        device_size,
        file_size,
        elapsed: started.elapsed(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dd_invocation_matches_the_documented_command_line() {
        let job = BackupJob::new("/dev/sdb", "backup.img", "4M");
        assert_eq!(
            dd_args(&job),
            [
                "if=/dev/sdb",
                "of=backup.img",
                "bs=4M",
                "status=progress",
                "conv=fsync",
            ]
        );
        assert_eq!(
            stream::render(&dd_command(&job)),
            "sudo dd if=/dev/sdb of=backup.img bs=4M status=progress conv=fsync"
        );
    }

    #[test]
    fn block_size_is_forwarded_verbatim() {
        let job = BackupJob::new("/dev/mmcblk0", "pi.img", "1M");
        assert!(dd_args(&job).contains(&"bs=1M".to_string()));
    }

    #[test]
    fn parses_blockdev_output() {
        assert_eq!(parse_size("64021856256\n").unwrap(), 64_021_856_256);
        assert!(parse_size("").is_err());
        assert!(parse_size("sixty-four GB").is_err());
    }
}
