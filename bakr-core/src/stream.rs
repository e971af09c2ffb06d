//! Live streaming of an external command's output.
//!
//! The imaging and shrinking commands report progress as plain text while
//! they run, and that text is the user's only progress indicator. This
//! module turns a spawned child into a blocking iterator: one
//! [`StreamEvent::Line`] per output line (stdout and stderr merged,
//! delivered as produced), then exactly one [`StreamEvent::Exited`] with the
//! child's exit status once both pipes close.

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::JoinHandle;

/// One event from a running child process.
#[derive(Debug)]
pub enum StreamEvent {
    /// A line of combined stdout/stderr output.
    Line(String),
    /// The process finished. Always the final event of a stream.
    Exited(ExitStatus),
}

/// A blocking iterator over a child's output, ending in its exit status.
pub struct CommandStream {
    child: Child,
    lines: Receiver<String>,
    readers: Vec<JoinHandle<()>>,
    finished: bool,
}

fn forward_lines(source: impl Read + Send + 'static, lines: Sender<String>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(source).lines().map_while(Result::ok) {
            if lines.send(line).is_err() {
                break;
            }
        }
    })
}

/// Spawns `command` and returns a stream over its combined output.
pub fn spawn(mut command: Command) -> Result<CommandStream> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("could not spawn {:?}", command.get_program()))?;

    let stdout = child.stdout.take().context("child stdout was not piped")?;
    let stderr = child.stderr.take().context("child stderr was not piped")?;

    let (tx, lines) = channel();
    let readers = vec![
        forward_lines(stdout, tx.clone()),
        forward_lines(stderr, tx),
    ];

    Ok(CommandStream {
        child,
        lines,
        readers,
        finished: false,
    })
}

impl CommandStream {
    /// Kills the child. Harmless if it has already exited; a child running
    /// under sudo may refuse the signal, but the terminal's own interrupt
    /// reaches the whole foreground process group anyway.
    pub fn kill(&mut self) {
        let _ = self.child.kill();
    }
}

impl Iterator for CommandStream {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        match self.lines.recv() {
            Ok(line) => Some(StreamEvent::Line(line)),
            // Both senders are gone: the pipes are closed, reap the child.
            Err(_) => {
                self.finished = true;
                for reader in self.readers.drain(..) {
                    let _ = reader.join();
                }
                self.child.wait().ok().map(StreamEvent::Exited)
            }
        }
    }
}

/// Builds a command running `program` with elevated privileges. Raw device
/// reads and loop-device setup both need root.
pub fn elevated(program: impl AsRef<OsStr>) -> Command {
    let mut command = Command::new("sudo");
    command.arg(program);
    command
}

/// Renders a command the way a user would type it, for echoing before it
/// runs.
pub fn render(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }

    #[test]
    fn merges_both_pipes_and_ends_with_the_exit_status() {
        let stream = spawn(sh("printf 'one\\ntwo\\n'; echo three >&2; exit 3")).unwrap();

        let mut lines = Vec::new();
        let mut status = None;
        for event in stream {
            match event {
                StreamEvent::Line(line) => lines.push(line),
                StreamEvent::Exited(s) => {
                    assert!(status.is_none(), "Exited must be the final event");
                    status = Some(s);
                }
            }
        }

        lines.sort();
        assert_eq!(lines, ["one", "three", "two"]);
        assert_eq!(status.unwrap().code(), Some(3));
    }

    #[test]
    fn reports_success() {
        let events: Vec<_> = spawn(sh("true")).unwrap().collect();
        match events.last() {
            Some(StreamEvent::Exited(status)) => assert!(status.success()),
            other => panic!("expected a terminal Exited event, got {other:?}"),
        }
    }

    #[test]
    fn stream_is_fused_after_exit() {
        let mut stream = spawn(sh("true")).unwrap();
        while stream.next().is_some() {}
        assert!(stream.next().is_none());
    }

    #[test]
    fn renders_program_and_args() {
        let mut command = Command::new("dd");
        command.args(["if=/dev/sdb", "of=backup.img", "bs=4M"]);
        assert_eq!(render(&command), "dd if=/dev/sdb of=backup.img bs=4M");
    }

    #[test]
    fn elevated_prefixes_sudo() {
        let command = elevated("dd");
        assert_eq!(render(&command), "sudo dd");
    }
}
