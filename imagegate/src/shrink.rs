//! Output image creation and post-install shrinking.

use crate::errors::{ImagegateError, Result};
use crate::process::Cmd;
use crate::validate::PartitionTable;
use std::path::Path;
use tracing::{info, warn};

/// Size of a freshly created output image.
pub const DEFAULT_IMAGE_SIZE: &str = "30G";

/// Sectors left after the last partition for the secondary GPT.
pub const SECONDARY_GPT_SECTORS: u64 = 34;

/// The command that creates a blank raw image of `size` at `path`.
#[must_use]
pub fn create_image_command(path: &Path, size: &str) -> Cmd {
    Cmd::new("qemu-img")
        .args(["create", "-f", "raw"])
        .arg(path)
        .arg(size)
}

/// Creates a blank raw image at `path`.
pub async fn create_output_image(path: &Path, size: &str) -> Result<()> {
    create_image_command(path, size).run_checked().await?;
    info!(path = %path.display(), size, "Created output image");
    Ok(())
}

/// Reads the partition table of `image`.
pub async fn read_partition_table(image: &Path) -> Result<PartitionTable> {
    let output = Cmd::new("sgdisk").arg("-p").arg(image).run_checked().await?;
    PartitionTable::parse(&output.stdout)
}

/// Sector size and highest end sector across every partition of `image`.
pub async fn last_partition_end(image: &Path) -> Result<(u64, u64)> {
    let table = read_partition_table(image).await?;
    let last = table.last_end().ok_or_else(|| {
        ImagegateError::parse(format!("no partition entries in {}", image.display()))
    })?;
    Ok((table.sector_size, last))
}

/// Size in bytes `image` is shrunk to: room for every partition plus the
/// secondary GPT.
#[must_use]
pub fn shrunk_size(sector_size: u64, last_end: u64) -> u64 {
    (last_end + SECONDARY_GPT_SECTORS) * sector_size
}

/// Trims unused space from the end of `image` and rewrites its secondary GPT.
pub async fn shrink_image(image: &Path) -> Result<u64> {
    let (sector_size, last_end) = last_partition_end(image).await?;
    let new_size = shrunk_size(sector_size, last_end);
    let size_arg = new_size.to_string();

    let with_flag = Cmd::new("qemu-img")
        .args(["resize", "--shrink", "-f", "raw"])
        .arg(image)
        .arg(&size_arg)
        .run_checked()
        .await;
    if let Err(e) = with_flag {
        warn!("qemu-img resize --shrink failed, retrying without the flag: {}", e);
        Cmd::new("qemu-img")
            .args(["resize", "-f", "raw"])
            .arg(image)
            .arg(&size_arg)
            .run_checked()
            .await?;
    }

    repair_secondary_gpt(image).await?;
    info!(image = %image.display(), new_size, last_end, sector_size, "Shrunk image");
    Ok(new_size)
}

/// Moves the backup GPT structures to the end of the (resized) disk.
pub async fn repair_secondary_gpt(image: &Path) -> Result<()> {
    Cmd::new("sgdisk").arg("-e").arg(image).run_checked().await?;
    Ok(())
}
