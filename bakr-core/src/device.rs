//! Block device discovery.
//!
//! The inventory comes from `lsblk --json`, which reports every block device
//! known to the kernel together with its partitions as nested children. The
//! removable flag is read separately from `/sys/block`, the same place the
//! kernel exposes it to udev.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// The lsblk columns the inventory asks for.
const LSBLK_COLUMNS: &str = "NAME,SIZE,TYPE,MOUNTPOINT,LABEL,FSTYPE,MODEL";

/// The lsblk device type. Only whole disks are ever offered as backup
/// sources; everything else is informational.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(from = "String")]
pub enum DeviceType {
    Disk,
    Part,
    Loop,
    /// Anything else lsblk can report (rom, crypt, lvm, ...).
    Other,
}

impl From<String> for DeviceType {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "disk" => DeviceType::Disk,
            "part" => DeviceType::Part,
            "loop" => DeviceType::Loop,
            _ => DeviceType::Other,
        }
    }
}

/// A block device as reported by `lsblk`, with its partitions nested
/// beneath it.
#[derive(Clone, Debug, Deserialize)]
pub struct BlockDevice {
    /// The kernel name of the device (e.g. "sdb").
    pub name: String,
    /// Size as a display string (e.g. "59.5G"), as rendered by lsblk.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(rename = "type")]
    pub kind: DeviceType,
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Partitions of this device, in the order lsblk reports them.
    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    /// The absolute device path (e.g. `/dev/sdb`).
    pub fn path(&self) -> PathBuf {
        Path::new("/dev").join(&self.name)
    }

    /// The partitions of this device that are currently mounted, as
    /// `(name, mountpoint)` pairs.
    pub fn mounted_partitions(&self) -> Vec<(&str, &str)> {
        self.children
            .iter()
            .filter_map(|child| {
                child
                    .mountpoint
                    .as_deref()
                    .map(|mountpoint| (child.name.as_str(), mountpoint))
            })
            .collect()
    }

    fn details(&self) -> String {
        let mut details = Vec::new();
        if let Some(model) = self.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            details.push(format!("Model: {model}"));
        }
        if let Some(label) = &self.label {
            details.push(format!("Label: {label}"));
        }
        if let Some(fstype) = &self.fstype {
            details.push(format!("FS: {fstype}"));
        }
        if let Some(mountpoint) = &self.mountpoint {
            details.push(format!("⚠️  mounted at {mountpoint}"));
        }
        details.join(", ")
    }
}

impl fmt::Display for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<15} {:>10}",
            self.name,
            self.size.as_deref().unwrap_or("N/A")
        )?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, "  [{details}]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<BlockDevice>,
}

fn parse_lsblk(json: &[u8]) -> Result<Vec<BlockDevice>> {
    let parsed: LsblkOutput =
        serde_json::from_slice(json).context("could not parse lsblk output")?;
    Ok(parsed.blockdevices)
}

fn query_lsblk() -> Result<Vec<BlockDevice>> {
    let output = Command::new("lsblk")
        .args(["-J", "-o", LSBLK_COLUMNS])
        .output()
        .context("could not run lsblk")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("lsblk exited with {}: {}", output.status, stderr.trim());
    }

    parse_lsblk(&output.stdout)
}

/// Lists all block devices known to the kernel.
///
/// Any failure (lsblk missing, non-zero exit, malformed JSON) degrades to an
/// empty list with a diagnostic on stderr; callers treat an empty list as
/// "no devices found", not as an error to propagate.
pub fn list_block_devices() -> Vec<BlockDevice> {
    match query_lsblk() {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("❌ Could not list block devices: {e:#}");
            Vec::new()
        }
    }
}

fn removable_flag(sys_block: &Path, name: &str) -> bool {
    fs::read_to_string(sys_block.join(name).join("removable"))
        .map(|s| s.trim() == "1")
        .unwrap_or(false)
}

/// Returns true only if the kernel marks `name` as removable media.
///
/// Any read failure (missing entry, permissions) yields `false`; the device
/// is then shown as a fixed disk, the more alarming of the two icons.
pub fn is_removable(name: &str) -> bool {
    removable_flag(Path::new("/sys/block"), name)
}

fn sysfs_entry_exists(sys_block: &Path, device: &Path) -> bool {
    let Some(base) = device.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    // Partition names drop their trailing digits (sdb1 -> sdb), but names
    // like mmcblk0 are already whole disks, so check both spellings.
    let stripped = base.trim_end_matches(|c: char| c.is_ascii_digit());
    sys_block.join(base).is_dir() || (!stripped.is_empty() && sys_block.join(stripped).is_dir())
}

/// Best-effort probe for "does this path name a block device".
///
/// This is a sanity check against typos, not a security boundary; callers
/// warn and ask instead of refusing when it fails.
pub fn looks_like_block_device(device: &Path) -> bool {
    sysfs_entry_exists(Path::new("/sys/block"), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSBLK_SAMPLE: &str = r#"{
        "blockdevices": [
            {
                "name": "nvme0n1", "size": "931.5G", "type": "disk",
                "mountpoint": null, "label": null, "fstype": null,
                "model": "Samsung SSD 980",
                "children": [
                    {"name": "nvme0n1p1", "size": "512M", "type": "part",
                     "mountpoint": "/boot/efi", "label": null, "fstype": "vfat", "model": null},
                    {"name": "nvme0n1p2", "size": "931G", "type": "part",
                     "mountpoint": "/", "label": "root", "fstype": "ext4", "model": null}
                ]
            },
            {
                "name": "sdb", "size": "59.5G", "type": "disk",
                "mountpoint": null, "label": null, "fstype": null,
                "model": "MassStorageClass",
                "children": [
                    {"name": "sdb1", "size": "59.5G", "type": "part",
                     "mountpoint": null, "label": "PI", "fstype": "ext4", "model": null}
                ]
            },
            {"name": "loop0", "size": "4K", "type": "loop",
             "mountpoint": "/snap/core/1", "label": null, "fstype": null, "model": null},
            {"name": "sr0", "size": "1024M", "type": "rom",
             "mountpoint": null, "label": null, "fstype": null, "model": "DVD-RW"}
        ]
    }"#;

    #[test]
    fn parses_nested_inventory() {
        let devices = parse_lsblk(LSBLK_SAMPLE.as_bytes()).unwrap();
        assert_eq!(devices.len(), 4);

        let nvme = &devices[0];
        assert_eq!(nvme.kind, DeviceType::Disk);
        assert_eq!(nvme.children.len(), 2);
        assert_eq!(nvme.path(), PathBuf::from("/dev/nvme0n1"));

        assert_eq!(devices[2].kind, DeviceType::Loop);
        // Unknown lsblk types collapse into Other.
        assert_eq!(devices[3].kind, DeviceType::Other);
    }

    #[test]
    fn missing_optional_fields_are_tolerated() {
        let devices =
            parse_lsblk(br#"{"blockdevices": [{"name": "sdc", "type": "disk"}]}"#).unwrap();
        assert_eq!(devices[0].name, "sdc");
        assert!(devices[0].size.is_none());
        assert!(devices[0].children.is_empty());
    }

    #[test]
    fn rejects_malformed_output() {
        assert!(parse_lsblk(b"not json").is_err());
        assert!(parse_lsblk(br#"{"blockdevices": [{"type": "disk"}]}"#).is_err());
    }

    #[test]
    fn mounted_partitions_skips_unmounted_children() {
        let devices = parse_lsblk(LSBLK_SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            devices[0].mounted_partitions(),
            vec![("nvme0n1p1", "/boot/efi"), ("nvme0n1p2", "/")]
        );
        assert!(devices[1].mounted_partitions().is_empty());
    }

    #[test]
    fn display_annotates_model_label_and_mounts() {
        let devices = parse_lsblk(LSBLK_SAMPLE.as_bytes()).unwrap();
        let line = devices[1].children[0].to_string();
        assert!(line.contains("sdb1"));
        assert!(line.contains("Label: PI"));
        assert!(line.contains("FS: ext4"));
        assert!(!line.contains("mounted at"));

        let root = devices[0].children[1].to_string();
        assert!(root.contains("⚠️  mounted at /"));
    }

    #[test]
    fn removable_flag_requires_exactly_one() {
        let sys_block = tempfile::tempdir().unwrap();
        let entry = sys_block.path().join("sdb");
        fs::create_dir(&entry).unwrap();

        fs::write(entry.join("removable"), "1\n").unwrap();
        assert!(removable_flag(sys_block.path(), "sdb"));

        fs::write(entry.join("removable"), "0\n").unwrap();
        assert!(!removable_flag(sys_block.path(), "sdb"));

        fs::write(entry.join("removable"), "yes").unwrap();
        assert!(!removable_flag(sys_block.path(), "sdb"));

        assert!(!removable_flag(sys_block.path(), "missing"));
    }

    #[test]
    fn block_device_probe_strips_partition_digits() {
        let sys_block = tempfile::tempdir().unwrap();
        fs::create_dir(sys_block.path().join("sdb")).unwrap();
        fs::create_dir(sys_block.path().join("mmcblk0")).unwrap();

        assert!(sysfs_entry_exists(sys_block.path(), Path::new("/dev/sdb")));
        assert!(sysfs_entry_exists(sys_block.path(), Path::new("/dev/sdb1")));
        assert!(sysfs_entry_exists(sys_block.path(), Path::new("/dev/mmcblk0")));
        assert!(!sysfs_entry_exists(sys_block.path(), Path::new("/dev/sdz")));
        assert!(!sysfs_entry_exists(sys_block.path(), Path::new("/")));
    }
}
