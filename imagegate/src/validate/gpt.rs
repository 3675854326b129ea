//! GPT partition-table parsing and layout checks.

use crate::core::CheckReport;
use crate::errors::{ImagegateError, Result};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Type codes of the expected partitions, in on-disk order.
pub const EXPECTED_LAYOUT: [&str; 4] = [CODE_RECOVERY, CODE_ESP, CODE_MSR, CODE_OS_DATA];

/// Recovery partition.
pub const CODE_RECOVERY: &str = "2700";
/// EFI system partition.
pub const CODE_ESP: &str = "EF00";
/// Microsoft reserved partition.
pub const CODE_MSR: &str = "0C01";
/// Basic data partition holding the OS.
pub const CODE_OS_DATA: &str = "0700";

/// Sectors reserved after the last partition for the backup header (1) and
/// the backup partition array (32).
pub const BACKUP_GPT_SECTORS: u64 = 33;

static SECTOR_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:sector size \(logical(?:/physical)?\)|logical sector size)\s*:\s*(\d+)")
        .unwrap_or_else(|e| panic!("invalid sector size pattern: {e}"))
});

static PARTITION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s+(\d+)\s+(\d+)\s+(\S+)\s+(\S+)\s+([0-9A-Fa-f]{4})\b\s*(.*)$")
        .unwrap_or_else(|e| panic!("invalid partition line pattern: {e}"))
});

/// One row of the partition report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// 1-based partition number.
    pub index: u32,
    /// First sector.
    pub start: u64,
    /// Last sector, inclusive.
    pub end: u64,
    /// Human-readable size, e.g. `529.0 MiB`.
    pub size: String,
    /// Four-digit type code, uppercased.
    pub code: String,
    /// Partition label.
    pub name: String,
}

/// A parsed partition report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionTable {
    /// Logical sector size in bytes.
    pub sector_size: u64,
    /// Entries in report order.
    pub partitions: Vec<Partition>,
}

impl PartitionTable {
    /// Parses the textual report printed by `sgdisk -p`.
    ///
    /// Only lines starting with a digit are partition rows; everything else
    /// is header text.
    pub fn parse(report: &str) -> Result<Self> {
        let sector_size = SECTOR_SIZE
            .captures(report)
            .and_then(|c| c.get(1))
            .ok_or_else(|| ImagegateError::parse("partition report has no sector size"))?
            .as_str()
            .parse::<u64>()
            .map_err(|e| ImagegateError::parse(format!("bad sector size: {e}")))?;

        let mut partitions = Vec::new();
        for line in report.lines() {
            if !line.trim_start().starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            let caps = PARTITION_LINE
                .captures(line)
                .ok_or_else(|| ImagegateError::parse(format!("malformed partition line: '{line}'")))?;
            let number = |i: usize| -> Result<u64> {
                caps[i]
                    .parse::<u64>()
                    .map_err(|e| ImagegateError::parse(format!("bad number in '{line}': {e}")))
            };
            let index = u32::try_from(number(1)?)
                .map_err(|e| ImagegateError::parse(format!("bad partition index in '{line}': {e}")))?;
            partitions.push(Partition {
                index,
                start: number(2)?,
                end: number(3)?,
                size: format!("{} {}", &caps[4], &caps[5]),
                code: caps[6].to_ascii_uppercase(),
                name: caps[7].trim().to_string(),
            });
        }

        Ok(Self {
            sector_size,
            partitions,
        })
    }

    /// Highest end sector across all partitions.
    #[must_use]
    pub fn last_end(&self) -> Option<u64> {
        self.partitions.iter().map(|p| p.end).max()
    }

    /// Type codes in table order.
    #[must_use]
    pub fn codes(&self) -> Vec<&str> {
        self.partitions.iter().map(|p| p.code.as_str()).collect()
    }

    /// Largest file size a shrunk image with this table may have.
    #[must_use]
    pub fn expected_max_size(&self) -> Option<u64> {
        self.last_end()
            .map(|end| expected_max_size(end, self.sector_size))
    }
}

/// `(last_end + 1 + 33) * sector_size`.
#[must_use]
pub fn expected_max_size(last_end: u64, sector_size: u64) -> u64 {
    (last_end + 1 + BACKUP_GPT_SECTORS) * sector_size
}

/// True when `sgdisk -v` output reports a clean table.
#[must_use]
pub fn integrity_ok(verify_output: &str) -> bool {
    verify_output.contains("No problems found")
}

/// Records the partition count, order and trailing-partition checks.
pub fn check_partition_layout(table: &PartitionTable, report: &mut CheckReport) {
    let count = table.partitions.len();
    report.assert(
        count == EXPECTED_LAYOUT.len(),
        format!("partition table has {count} entries"),
        format!(
            "partition table has {count} entries, expected {}",
            EXPECTED_LAYOUT.len()
        ),
    );

    let codes = table.codes();
    report.assert(
        codes == EXPECTED_LAYOUT,
        format!("partition types in order {}", EXPECTED_LAYOUT.join(", ")),
        format!(
            "partition types are {}, expected {}",
            codes.join(", "),
            EXPECTED_LAYOUT.join(", ")
        ),
    );

    match table.partitions.last() {
        Some(last) if last.code == CODE_OS_DATA => {
            report.pass(format!("last partition ({}) is OS data", last.index));
        }
        Some(last) if last.code == CODE_RECOVERY => report.fail(format!(
            "last partition ({}) is a trailing recovery partition",
            last.index
        )),
        Some(last) => report.fail(format!(
            "last partition ({}) has type {}, expected {CODE_OS_DATA}",
            last.index, last.code
        )),
        None => report.fail("partition table is empty"),
    }
}

/// Records whether an image of `actual_size` bytes was shrunk to `table`.
pub fn check_shrunk_size(table: &PartitionTable, actual_size: u64, report: &mut CheckReport) {
    let Some(max) = table.expected_max_size() else {
        report.fail("cannot compute expected image size without partitions");
        return;
    };
    report.assert(
        actual_size <= max,
        format!("image size {actual_size} is within shrunk bound {max}"),
        format!("image size {actual_size} exceeds shrunk bound {max}; was it shrunk?"),
    );
}
