//! Interactive device selection.
//!
//! Filters the inventory down to whole disks, renders them with their
//! partitions, and walks the user through a two-stage confirmation before
//! handing back a device path. The flow is a one-way state machine:
//! AwaitingIndex re-prompts on invalid input, but a rejected confirmation
//! is terminal: there is no way back to the index prompt, the selection
//! has to be restarted.

use bakr_core::device::{self, BlockDevice, DeviceType};
use bakr_core::prompt::Prompt;
use console::style;
use std::path::PathBuf;

/// The exact token that confirms a destructive-read selection. Deliberate
/// friction: case-sensitive and distinct from a plain yes/no.
const CONFIRM_TOKEN: &str = "JA";
/// Backs out of the index prompt.
const CANCEL_TOKEN: &str = "q";

/// A numbered entry in the selection menu.
pub struct SelectableDevice<'a> {
    pub number: usize,
    pub path: PathBuf,
    pub removable: bool,
    pub device: &'a BlockDevice,
}

/// How a selection attempt ended.
#[derive(Debug, PartialEq)]
pub enum Selection {
    Confirmed(PathBuf),
    Cancelled,
    NoDevices,
}

/// What to do with one line of index input.
enum IndexInput {
    Pick(usize),
    Cancel,
    Invalid(String),
}

/// Builds the menu: whole disks only, with a fresh 1-based numbering.
/// Partitions and loop devices are never selectable.
fn candidates(devices: &[BlockDevice]) -> Vec<SelectableDevice<'_>> {
    devices
        .iter()
        .filter(|device| device.kind == DeviceType::Disk)
        .enumerate()
        .map(|(index, device)| SelectableDevice {
            number: index + 1,
            path: device.path(),
            removable: device::is_removable(&device.name),
            device,
        })
        .collect()
}

fn handle_index_input(input: &str, count: usize) -> IndexInput {
    let input = input.trim();
    if input.eq_ignore_ascii_case(CANCEL_TOKEN) {
        return IndexInput::Cancel;
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => IndexInput::Pick(n - 1),
        Ok(_) => IndexInput::Invalid(format!("Please enter a number between 1 and {count}!")),
        Err(_) => IndexInput::Invalid("Invalid input, please enter a number!".to_string()),
    }
}

/// Only an exact-case match of the token proceeds; everything else cancels.
fn confirmation_accepted(input: &str) -> bool {
    input.trim() == CONFIRM_TOKEN
}

fn render_menu(candidates: &[SelectableDevice]) {
    println!();
    println!("{}", "=".repeat(80));
    println!("🔍 AVAILABLE DRIVES");
    println!("{}", "=".repeat(80));

    for entry in candidates {
        let icon = if entry.removable { "💾" } else { "💿" };
        println!();
        println!(
            "[{}] {} {}",
            entry.number,
            icon,
            style(&entry.device.name).bold()
        );
        println!("    {}", entry.device);
        for child in &entry.device.children {
            println!("      ├─ {child}");
        }
    }

    println!();
    println!("{}", "=".repeat(80));
    println!("💾 = removable media (SD card, USB)  |  💿 = fixed disk");
    println!("{}", "=".repeat(80));
}

fn render_warning(entry: &SelectableDevice) {
    println!();
    println!(
        "{}",
        style("⚠️  WARNING: ALL DATA ON THIS DEVICE WILL BE READ!")
            .red()
            .bold()
    );
    println!();
    println!("Selected device: {}", style(entry.path.display()).cyan());
    println!("Size: {}", entry.device.size.as_deref().unwrap_or("N/A"));
    if let Some(model) = entry.device.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        println!("Model: {model}");
    }

    let mounted = entry.device.mounted_partitions();
    if !mounted.is_empty() {
        println!();
        println!(
            "{}",
            style("⚠️  The following partitions are mounted:").yellow()
        );
        for (name, mountpoint) in mounted {
            println!("   - {name} -> {mountpoint}");
        }
        println!();
        println!("💡 Tip: unmount them first with: sudo umount /dev/...");
    }
}

/// Walks the user through picking a backup source from the inventory.
pub fn select_device(devices: &[BlockDevice], prompt: &mut dyn Prompt) -> Selection {
    if devices.is_empty() {
        println!("\n❌ No devices found!");
        return Selection::NoDevices;
    }

    let candidates = candidates(devices);
    if candidates.is_empty() {
        println!("\n❌ No suitable drives found!");
        return Selection::NoDevices;
    }

    render_menu(&candidates);

    let picked = loop {
        let Some(input) = prompt.ask(&format!(
            "➜ Pick a drive [1-{}] or '{CANCEL_TOKEN}' to cancel",
            candidates.len()
        )) else {
            println!("Cancelled.");
            return Selection::Cancelled;
        };

        match handle_index_input(&input, candidates.len()) {
            IndexInput::Pick(index) => break &candidates[index],
            IndexInput::Cancel => {
                println!("Cancelled.");
                return Selection::Cancelled;
            }
            IndexInput::Invalid(hint) => println!("❌ {hint}"),
        }
    };

    render_warning(picked);

    let confirmed = prompt
        .ask(&format!(
            "❓ Really create a backup of {}? ({CONFIRM_TOKEN}/no)",
            picked.path.display()
        ))
        .is_some_and(|answer| confirmation_accepted(&answer));

    if confirmed {
        Selection::Confirmed(picked.path.clone())
    } else {
        println!("❌ Cancelled. Confirming requires typing '{CONFIRM_TOKEN}' exactly (uppercase).");
        Selection::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Feeds a fixed list of answers; a drained script means closed input.
    struct Scripted(VecDeque<String>);

    impl Scripted {
        fn new(answers: &[&str]) -> Self {
            Self(answers.iter().map(|a| (*a).to_string()).collect())
        }
    }

    impl Prompt for Scripted {
        fn ask(&mut self, _question: &str) -> Option<String> {
            self.0.pop_front()
        }
    }

    fn disk(name: &str) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            size: Some("59.5G".to_string()),
            kind: DeviceType::Disk,
            mountpoint: None,
            label: None,
            fstype: None,
            model: None,
            children: Vec::new(),
        }
    }

    fn non_disk(name: &str, kind: DeviceType) -> BlockDevice {
        BlockDevice {
            kind,
            ..disk(name)
        }
    }

    #[test]
    fn offers_exactly_the_disks() {
        let devices = vec![
            disk("sda"),
            non_disk("sda1", DeviceType::Part),
            non_disk("loop0", DeviceType::Loop),
            disk("sdb"),
            non_disk("sr0", DeviceType::Other),
        ];
        let entries = candidates(&devices);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].number, 1);
        assert_eq!(entries[0].path, PathBuf::from("/dev/sda"));
        assert_eq!(entries[1].number, 2);
        assert_eq!(entries[1].path, PathBuf::from("/dev/sdb"));
    }

    #[test]
    fn empty_inventory_is_a_terminal_no_devices() {
        assert_eq!(
            select_device(&[], &mut Scripted::new(&["1", "JA"])),
            Selection::NoDevices
        );
    }

    #[test]
    fn partitions_alone_are_no_devices() {
        let devices = vec![non_disk("sda1", DeviceType::Part)];
        assert_eq!(
            select_device(&devices, &mut Scripted::new(&["1", "JA"])),
            Selection::NoDevices
        );
    }

    #[test]
    fn exact_token_confirms_the_picked_path() {
        let devices = vec![disk("sda"), disk("sdb")];
        assert_eq!(
            select_device(&devices, &mut Scripted::new(&["2", "JA"])),
            Selection::Confirmed(PathBuf::from("/dev/sdb"))
        );
    }

    #[test]
    fn invalid_input_reprompts_until_a_valid_index() {
        let devices = vec![disk("sda"), disk("sdb")];
        assert_eq!(
            select_device(&devices, &mut Scripted::new(&["abc", "0", "7", "1", "JA"])),
            Selection::Confirmed(PathBuf::from("/dev/sda"))
        );
    }

    #[test]
    fn cancel_token_cancels_the_index_prompt() {
        let devices = vec![disk("sda")];
        assert_eq!(
            select_device(&devices, &mut Scripted::new(&["q"])),
            Selection::Cancelled
        );
    }

    #[test]
    fn closed_input_cancels() {
        let devices = vec![disk("sda")];
        assert_eq!(
            select_device(&devices, &mut Scripted::new(&[])),
            Selection::Cancelled
        );
    }

    #[test]
    fn lowercase_ja_cancels_instead_of_reprompting() {
        let devices = vec![disk("sda")];
        // The trailing "JA" must never be consumed: a rejected confirmation
        // is terminal, not a second chance.
        assert_eq!(
            select_device(&devices, &mut Scripted::new(&["1", "ja", "JA"])),
            Selection::Cancelled
        );
    }

    #[test]
    fn yes_is_not_the_confirmation_token() {
        let devices = vec![disk("sda")];
        assert_eq!(
            select_device(&devices, &mut Scripted::new(&["1", "yes"])),
            Selection::Cancelled
        );
    }

    #[test]
    fn token_with_surrounding_whitespace_still_confirms() {
        let devices = vec![disk("sda")];
        assert_eq!(
            select_device(&devices, &mut Scripted::new(&["1", "  JA  "])),
            Selection::Confirmed(PathBuf::from("/dev/sda"))
        );
    }
}
