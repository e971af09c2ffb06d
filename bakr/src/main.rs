use anyhow::{Result, bail};
use bakr_core::backup::{self, BackupOutcome};
use bakr_core::device;
use bakr_core::format::format_size;
use bakr_core::job::{self, BackupJob};
use bakr_core::prompt::{Prompt, is_yes};
use bakr_core::shrink::{self, ShrinkOutcome, ShrinkReport};
use clap::Parser;
use console::style;
use dialoguer::{Input, theme::ColorfulTheme};
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

mod select;

#[derive(Parser)]
#[command(name = "bakr")]
#[command(about = "A safe, interactive SD card backup tool", version)]
#[command(after_help = "\
Examples:
  bakr                                   interactive device selection
  bakr /dev/sdb backup.img               direct backup
  bakr /dev/mmcblk0 raspi-backup.img
  bakr /dev/sdb backup.img --no-shrink
  bakr /dev/sdb backup.img --block-size 1M

dd and pishrink run under sudo; expect a password prompt.")]
struct Cli {
    /// Source device (e.g. /dev/sdb or /dev/mmcblk0); interactive selection when omitted
    device: Option<PathBuf>,

    /// Output image file (default: backup_<device>_<YYYYMMDD_HHMMSS>.img)
    output: Option<PathBuf>,

    /// Block size forwarded to dd
    #[arg(short = 'b', long = "block-size", default_value = "4M")]
    block_size: String,

    /// Skip shrinking the finished image with pishrink
    #[arg(long)]
    no_shrink: bool,
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// `ECHOCTL` is the terminal flag that causes Ctrl+C to be printed as `^C`,
/// which would smear over the progress stream of a running copy. The
/// original terminal state is restored when this struct is dropped.
struct TermRestorer {
    #[cfg(unix)]
    original: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            Self {
                original: Self::disable_echoctl(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    #[cfg(unix)]
    fn disable_echoctl() -> Option<Termios> {
        if !stdout().is_terminal() {
            return None;
        }
        let fd = stdout().as_raw_fd();
        let original = Termios::from_fd(fd).ok()?;
        let mut raw = original;
        raw.c_lflag &= !ECHOCTL;
        tcsetattr(fd, TCSANOW, &raw).ok()?;
        Some(original)
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(ref original) = self.original {
            tcsetattr(stdout().as_raw_fd(), TCSANOW, original).ok();
        }
    }
}

/// The terminal-backed implementation of the core prompt channel.
struct TermPrompt {
    theme: ColorfulTheme,
    running: Arc<AtomicBool>,
}

impl TermPrompt {
    fn new(running: Arc<AtomicBool>) -> Self {
        Self {
            theme: ColorfulTheme::default(),
            running,
        }
    }
}

impl Prompt for TermPrompt {
    fn ask(&mut self, question: &str) -> Option<String> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        Input::<String>::with_theme(&self.theme)
            .with_prompt(question)
            .allow_empty(true)
            .interact_text()
            .ok()
    }
}

fn banner(message: &str) {
    println!("\n{}", "=".repeat(60));
    println!("{message}");
    println!("{}", "=".repeat(60));
}

/// Sanity-checks a device path the user supplied directly, bypassing the
/// interactive selection. Returns `false` for a clean, user-chosen abort.
fn check_supplied_device(device: &Path, prompt: &mut dyn Prompt) -> Result<bool> {
    if !device.exists() {
        bail!(
            "device {} not found (tip: run without arguments for interactive selection)",
            device.display()
        );
    }

    if !device::looks_like_block_device(device) {
        println!(
            "{} {} does not look like a block device!",
            style("⚠️  Warning:").yellow().bold(),
            device.display()
        );
        let answer = prompt.ask("Continue anyway? (j/n)");
        if !answer.as_deref().is_some_and(is_yes) {
            println!("Cancelled.");
            return Ok(false);
        }
    }

    Ok(true)
}

/// Runs the copy and reports it. Returns `false` for a clean, user-chosen
/// abort (declined overwrite).
fn run_backup(job: &BackupJob, prompt: &mut dyn Prompt, running: Arc<AtomicBool>) -> Result<bool> {
    println!(
        "\n🔍 Creating a backup of {}",
        style(job.source_device.display()).cyan()
    );
    println!(
        "📁 Output file: {}",
        style(job.output_file.display()).cyan()
    );

    let outcome = backup::run(
        job,
        prompt,
        running,
        |device_size| {
            println!("💾 Device size: {}", format_size(device_size));
            println!("\n📋 Starting the dd copy...");
            println!("{}", "=".repeat(60));
        },
        |command| println!("🔧 Command: {command}\n"),
        |line| println!("{line}"),
    )?;

    match outcome {
        BackupOutcome::Completed(report) => {
            println!(
                "\n✅ Backup finished in {:.1} seconds",
                report.elapsed.as_secs_f64()
            );
            println!("{}", "=".repeat(60));
            println!("📊 Backup size: {}", format_size(report.file_size));
            Ok(true)
        }
        BackupOutcome::Declined => {
            println!("Cancelled.");
            Ok(false)
        }
    }
}

fn print_install_guidance() {
    println!("{}", style("⚠️  pishrink.sh not found!").yellow().bold());
    println!();
    println!("📥 Install it with:");
    println!("   wget https://raw.githubusercontent.com/Drewsif/PiShrink/master/pishrink.sh");
    println!("   chmod +x pishrink.sh");
    println!("   sudo mv pishrink.sh /usr/local/bin/");
    println!();
}

fn offer_delete_original(job: &BackupJob, report: &ShrinkReport, prompt: &mut dyn Prompt) {
    println!("\n{}", "-".repeat(60));
    let answer = prompt.ask("❓ Delete the original image to reclaim space? (j/n)");
    if answer.as_deref().is_some_and(is_yes) {
        match std::fs::remove_file(&job.output_file) {
            Ok(()) => {
                println!("✅ {} deleted", job.output_file.display());
                println!("📁 Remaining image: {}", report.shrunk_file.display());
            }
            Err(e) => println!("⚠️  Could not delete {}: {e}", job.output_file.display()),
        }
    } else {
        println!("💾 Keeping both images:");
        println!("   - original: {}", job.output_file.display());
        println!("   - shrunk:   {}", report.shrunk_file.display());
    }
}

/// Runs the shrink step and reports it. Only the missing-tool decline and
/// an interrupt bubble up as errors; a failed shrink is reported and
/// survived.
fn run_shrink(job: &BackupJob, prompt: &mut dyn Prompt, running: Arc<AtomicBool>) -> Result<()> {
    println!("\n\n🔄 Shrinking the image with pishrink...");
    println!("{}", "=".repeat(60));

    let shrunk_file = job.shrunk_file();
    let outcome = shrink::run(
        job,
        prompt,
        running,
        |tool, original_size| {
            println!("✓ pishrink found: {}", tool.display());
            println!("📊 Original size: {}", format_size(original_size));
            println!("📁 Shrunk image: {}", shrunk_file.display());
        },
        print_install_guidance,
        |command| println!("🔧 Command: {command}\n"),
        |line| println!("{line}"),
    )?;

    match outcome {
        ShrinkOutcome::Shrunk(report) => {
            println!(
                "\n✅ Shrink finished in {:.1} seconds",
                report.elapsed.as_secs_f64()
            );
            println!("{}", "=".repeat(60));
            println!(
                "📊 Original: {} -> {}",
                format_size(report.original_size),
                job.output_file.display()
            );
            println!(
                "📊 Shrunk:   {} -> {}",
                format_size(report.shrunk_size),
                report.shrunk_file.display()
            );
            println!(
                "💾 Saved: {} ({:.1}%)",
                format_size(report.saved()),
                report.percentage()
            );
            offer_delete_original(job, &report, prompt);
        }
        ShrinkOutcome::SkippedMissingTool => println!("\n⏭️  No shrink performed."),
        ShrinkOutcome::Failed(status) => {
            println!("\n⚠️  pishrink exited with {status}");
            println!("💡 Tip: try shrinking the image manually with:");
            println!(
                "   sudo pishrink.sh {} {}",
                job.output_file.display(),
                shrunk_file.display()
            );
        }
        ShrinkOutcome::MissingOutput => {
            println!(
                "\n⚠️  The shrunk image {} was never created",
                shrunk_file.display()
            );
        }
    }

    Ok(())
}

fn run(cli: Cli, running: Arc<AtomicBool>) -> Result<()> {
    let mut prompt = TermPrompt::new(running.clone());

    let source_device = match cli.device {
        Some(device) => {
            if !check_supplied_device(&device, &mut prompt)? {
                return Ok(());
            }
            device
        }
        None => {
            let devices = device::list_block_devices();
            match select::select_device(&devices, &mut prompt) {
                select::Selection::Confirmed(path) => path,
                select::Selection::Cancelled | select::Selection::NoDevices => return Ok(()),
            }
        }
    };

    let output_file = cli
        .output
        .unwrap_or_else(|| job::default_output_file(&source_device));
    let job = BackupJob::new(source_device, output_file, cli.block_size);

    banner("🔧 SD Card Backup Tool");

    if !run_backup(&job, &mut prompt, running.clone())? {
        return Ok(());
    }

    if cli.no_shrink {
        println!("\n⏭️  Shrinking skipped (--no-shrink)");
    } else {
        run_shrink(&job, &mut prompt, running)?;
    }

    banner("🎉 Done!");
    Ok(())
}

fn main() -> ExitCode {
    // This guard will be dropped when main() exits, restoring the terminal.
    let _term_restorer = TermRestorer::new();

    // This flag allows for graceful cancellation of the running step.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("{} {e}", style("❌ error:").red().bold());
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();

    match run(cli, running) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\n{} {e:#}", style("❌ error:").red().bold());
            ExitCode::FAILURE
        }
    }
}
