//! The shrink runner: drives pishrink against a finished image.
//!
//! Shrinking is strictly optional: every failure mode here is reported and
//! survived, with one exception: when pishrink is missing and the user does
//! not want to keep the unshrunk image either, the run fails.

use crate::job::BackupJob;
use crate::prompt::{self, Prompt};
use crate::stream::{self, StreamEvent};
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Where pishrink usually ends up when it is not on the PATH.
const INSTALL_LOCATIONS: [&str; 3] = [
    "/usr/local/bin/pishrink.sh",
    "/usr/bin/pishrink.sh",
    "./pishrink.sh",
];

/// Sizes of the images before and after shrinking.
#[derive(Clone, Debug)]
pub struct ShrinkReport {
    pub original_size: u64,
    pub shrunk_size: u64,
    pub shrunk_file: PathBuf,
    pub elapsed: Duration,
}

impl ShrinkReport {
    /// Bytes reclaimed by shrinking.
    pub fn saved(&self) -> u64 {
        self.original_size.saturating_sub(self.shrunk_size)
    }

    /// Share of the original image reclaimed, in percent.
    pub fn percentage(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        self.saved() as f64 / self.original_size as f64 * 100.0
    }
}

/// The result of a shrink run that did not error.
pub enum ShrinkOutcome {
    Shrunk(ShrinkReport),
    /// pishrink is not installed and the user chose to keep the image as-is.
    SkippedMissingTool,
    /// pishrink exited non-zero; the original image is untouched.
    Failed(ExitStatus),
    /// pishrink reported success but its output file never appeared.
    MissingOutput,
}

fn is_executable(path: &Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::X_OK).is_ok()
}

fn which(program: &str) -> Option<PathBuf> {
    let output = Command::new("which").arg(program).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() { None } else { Some(PathBuf::from(path)) }
}

fn find_in(locations: &[PathBuf]) -> Option<PathBuf> {
    locations.iter().find(|path| is_executable(path)).cloned()
}

/// Looks for the pishrink executable on the PATH, then in the usual install
/// locations. Returns `None` instead of an error; the caller decides
/// whether a missing tool matters.
pub fn find_pishrink() -> Option<PathBuf> {
    if let Some(path) = which("pishrink.sh") {
        return Some(path);
    }
    find_in(&INSTALL_LOCATIONS.map(PathBuf::from))
}

/// Shrinks the finished image of `job` into a second file.
///
/// pishrink runs under sudo against (original, shrunk) as two distinct
/// files; an in-place shrink would re-use the loop device of the source and
/// conflict with it. Output is streamed through `on_line` as in the backup
/// runner.
///
/// # Arguments
///
/// * `job` - The finished backup; the shrunk path is derived from its
///   output file.
/// * `prompt` - Channel for the proceed-without-shrinking question when the
///   tool is missing.
/// * `running` - Cleared by the caller's interrupt handler.
/// * `on_start` - Called once with the tool path and the original image
///   size, before the child is spawned.
/// * `on_missing` - Called once if pishrink cannot be found, before the
///   proceed question; the CLI prints installation guidance here.
/// * `on_command` - Called once with the rendered command line.
/// * `on_line` - Called for every line of pishrink output, as produced.
///
/// # Errors
///
/// Fails if the original image cannot be read, if the user interrupts the
/// shrink (the partial shrunk file is removed best-effort), or if pishrink
/// is missing and the user declines to continue without it. A pishrink
/// failure is NOT an error; it comes back as [`ShrinkOutcome::Failed`] so
/// the run can still finish normally.
pub fn run(
    job: &BackupJob,
    prompt: &mut dyn Prompt,
    running: Arc<AtomicBool>,
    on_start: impl FnOnce(&Path, u64),
    on_missing: impl FnOnce(),
    on_command: impl FnOnce(&str),
    mut on_line: impl FnMut(&str),
) -> Result<ShrinkOutcome> {
    let Some(pishrink) = find_pishrink() else {
        on_missing();
        let answer = prompt.ask("Continue without shrinking? (j/n)");
        if answer.as_deref().is_some_and(prompt::is_yes) {
            return Ok(ShrinkOutcome::SkippedMissingTool);
        }
        return Err(anyhow!("pishrink.sh is required but not installed"));
    };

    let original_size = std::fs::metadata(&job.output_file)
        .with_context(|| format!("could not stat {}", job.output_file.display()))?
        .len();
    on_start(&pishrink, original_size);

    let shrunk_file = job.shrunk_file();
    let mut command = stream::elevated(&pishrink);
    command.arg("-v").arg(&job.output_file).arg(&shrunk_file);
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
        // Unlike a partial disk image, a half-written shrunk file has no
        // salvage value; drop it.
        if shrunk_file.exists() {
            let _ = std::fs::remove_file(&shrunk_file);
        }
        return Err(anyhow!("shrink interrupted by user"));
    }

    let status = exit.ok_or_else(|| anyhow!("the shrink process vanished without an exit status"))?;
    if !status.success() {
        return Ok(ShrinkOutcome::Failed(status));
    }
    if !shrunk_file.exists() {
        return Ok(ShrinkOutcome::MissingOutput);
    }

    let shrunk_size = std::fs::metadata(&shrunk_file)
        .with_context(|| format!("could not stat {}", shrunk_file.display()))?
        .len();

    Ok(ShrinkOutcome::Shrunk(ShrinkReport {
        original_size,
        shrunk_size,
        shrunk_file,
        elapsed: started.elapsed(),
    }))
}
