//! The core, UI-agnostic library for the `bakr` backup utility.
//!
//! `bakr-core` is designed to be used as a library by any front-end, whether
//! it's a command-line interface (like `bakr`) or a graphical user
//! interface. It discovers block devices and orchestrates the two external
//! programs that do the heavy lifting: `dd` for the raw copy and
//! `pishrink.sh` for shrinking the finished image. The library itself moves
//! no device bytes.
//!
//! The library is structured into several key modules:
//! - [`device`]: Block device inventory (`lsblk`) and the removable flag.
//! - [`job`]: The immutable [`job::BackupJob`] triple and filename rules.
//! - [`backup`]: Runs the imaging command with live progress streaming.
//! - [`shrink`]: Runs the shrink command and reports the savings.
//! - [`stream`]: The blocking iterator over a child's combined output.
//! - [`prompt`]: The injectable prompt channel for confirmations.
//! - [`format`]: Human-readable byte sizes.
//!
//! The primary entry points are [`backup::run`] and [`shrink::run`]. Both
//! are synchronous, report progress via callbacks, and ask their safety
//! questions through a caller-supplied [`prompt::Prompt`], so a front-end
//! decides how everything looks, and tests can drive the whole flow with
//! scripted answers.
//!
//! ## Example: Backing up a device with live progress
//!
//! ```rust,no_run
//! use bakr_core::backup::{self, BackupOutcome};
//! use bakr_core::job::BackupJob;
//! use bakr_core::prompt::Prompt;
//! use std::sync::{Arc, atomic::AtomicBool};
//! use anyhow::Result;
//!
//! /// Answers every confirmation with yes.
//! struct AcceptAll;
//!
//! impl Prompt for AcceptAll {
//!     fn ask(&mut self, _question: &str) -> Option<String> {
//!         Some("j".to_string())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let job = BackupJob::new("/dev/sdb", "backup.img", "4M");
//!
//!     // A shared flag to allow for graceful cancellation.
//!     let running = Arc::new(AtomicBool::new(true));
//!
//!     let outcome = backup::run(
//!         &job,
//!         &mut AcceptAll,
//!         running,
//!         |size| println!("device holds {size} bytes"),
//!         |command| println!("running: {command}"),
//!         |line| println!("{line}"),
//!     )?;
//!
//!     if let BackupOutcome::Completed(report) = outcome {
//!         println!("done in {:.1}s", report.elapsed.as_secs_f64());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod device;
pub mod format;
pub mod job;
pub mod prompt;
pub mod shrink;
pub mod stream;
