//! Firmware images and their hardware-compatible checksum.

use std::path::Path;

use log::{debug, info};

use crate::checksum;
use crate::error::{Error, Result};

/// Largest image accepted unless told otherwise.
pub const DEFAULT_MAX_SIZE: usize = 1024 * 1024;

/// Value of erased flash, used for gaps between HEX records.
pub const GAP_FILL: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    base_address: u32,
    data: Vec<u8>,
}

impl FirmwareImage {
    pub fn from_bin(data: Vec<u8>, base_address: u32) -> Self {
        Self { base_address, data }
    }

    /// Parses Intel HEX text into one contiguous image.
    ///
    /// The image starts at the lowest address any record touches.
    pub fn from_ihex(text: &str, max_size: usize) -> Result<Self> {
        let mut upper: u32 = 0;
        let mut segmented = false;
        let mut chunks: Vec<(u32, Vec<u8>)> = Vec::new();

        for record in ihex::Reader::new(text) {
            match record? {
                ihex::Record::Data { offset, value } => {
                    let room = 0x1_0000 - offset as usize;
                    if segmented && value.len() > room {
                        // Offsets wrap inside a 64 KiB segment.
                        chunks.push((upper + offset as u32, value[..room].to_vec()));
                        chunks.push((upper, value[room..].to_vec()));
                    } else {
                        chunks.push((upper + offset as u32, value));
                    }
                }
                ihex::Record::ExtendedLinearAddress(high) => {
                    upper = (high as u32) << 16;
                    segmented = false;
                }
                ihex::Record::ExtendedSegmentAddress(segment) => {
                    upper = (segment as u32) << 4;
                    segmented = true;
                }
                ihex::Record::EndOfFile => break,
                _ => {}
            }
        }

        let Some(base_address) = chunks.iter().map(|(addr, _)| *addr).min() else {
            return Ok(Self::from_bin(Vec::new(), 0));
        };
        let end = chunks
            .iter()
            .map(|(addr, value)| *addr as u64 + value.len() as u64)
            .max()
            .unwrap_or(base_address as u64);

        let size = (end - base_address as u64) as usize;
        if size > max_size {
            return Err(Error::FirmwareTooLarge);
        }

        let mut data = vec![GAP_FILL; size];
        for (addr, value) in chunks {
            let start = (addr - base_address) as usize;
            data[start..start + value.len()].copy_from_slice(&value);
        }

        debug!("Parsed HEX image: {} bytes at {:#010x}", size, base_address);
        Ok(Self { base_address, data })
    }

    /// Loads `.hex`/`.ihex` files as Intel HEX and anything else as raw binary.
    pub fn load(path: impl AsRef<Path>, max_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let is_hex = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihex"))
            .unwrap_or(false);

        let image = if is_hex {
            Self::from_ihex(&std::fs::read_to_string(path)?, max_size)?
        } else {
            let data = std::fs::read(path)?;
            if data.len() > max_size {
                return Err(Error::FirmwareTooLarge);
            }
            Self::from_bin(data, 0)
        };

        info!(
            "Loaded firmware {} ({} bytes, CRC {:#010x})",
            path.display(),
            image.len(),
            image.checksum()
        );
        Ok(image)
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checksum the target computes over the flashed image.
    pub fn checksum(&self) -> u32 {
        checksum::checksum(&self.data)
    }

    pub fn verify(&self, expected: u32) -> bool {
        self.checksum() == expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE_HEX: &str = "\
:020000040800F2
:080000000010002001020304BE
:04000C00AABBCCDDE2
:00000001FF
";

    #[test]
    fn hex_gaps_are_filled() {
        let image = FirmwareImage::from_ihex(IMAGE_HEX, DEFAULT_MAX_SIZE).unwrap();
        assert_eq!(image.base_address(), 0x0800_0000);
        assert_eq!(
            image.data(),
            &[
                0x00, 0x10, 0x00, 0x20, 0x01, 0x02, 0x03, 0x04, 0xFF, 0xFF, 0xFF, 0xFF, 0xAA,
                0xBB, 0xCC, 0xDD
            ]
        );
        assert_eq!(image.checksum(), 0x895D_F237);
        assert!(image.verify(0x895D_F237));
        assert!(!image.verify(0));
    }

    #[test]
    fn segment_offsets_wrap_at_64k() {
        let text = ":020000021000EC\n:04FFFE001122334455\n:00000001FF\n";
        let image = FirmwareImage::from_ihex(text, DEFAULT_MAX_SIZE).unwrap();
        assert_eq!(image.base_address(), 0x1_0000);
        assert_eq!(image.len(), 0x1_0000);
        assert_eq!(&image.data()[..2], &[0x33, 0x44]);
        assert_eq!(&image.data()[0xFFFE..], &[0x11, 0x22]);
        assert!(image.data()[2..0xFFFE].iter().all(|&b| b == GAP_FILL));
    }

    #[test]
    fn hex_over_limit_is_rejected() {
        assert!(matches!(
            FirmwareImage::from_ihex(IMAGE_HEX, 8),
            Err(Error::FirmwareTooLarge)
        ));
    }

    #[test]
    fn bad_hex_checksum_is_reported() {
        let broken = ":080000000010002001020304BF\n:00000001FF\n";
        assert!(matches!(
            FirmwareImage::from_ihex(broken, DEFAULT_MAX_SIZE),
            Err(Error::HexFile(_))
        ));
    }

    #[test]
    fn empty_hex_is_empty_image() {
        let image = FirmwareImage::from_ihex(":00000001FF\n", DEFAULT_MAX_SIZE).unwrap();
        assert!(image.is_empty());
        assert_eq!(image.checksum(), checksum::DEFAULT_SEED);
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = std::env::temp_dir().join(format!("hslink-fw-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let hex_path = dir.join("app.hex");
        std::fs::write(&hex_path, IMAGE_HEX).unwrap();
        let bin_path = dir.join("app.bin");
        std::fs::write(&bin_path, [0x78, 0x56, 0x34, 0x12]).unwrap();

        let hex = FirmwareImage::load(&hex_path, DEFAULT_MAX_SIZE).unwrap();
        assert_eq!(hex.len(), 16);

        let bin = FirmwareImage::load(&bin_path, DEFAULT_MAX_SIZE).unwrap();
        assert_eq!(bin.base_address(), 0);
        assert_eq!(bin.checksum(), 0xDF8A_8A2B);

        assert!(matches!(
            FirmwareImage::load(&bin_path, 2),
            Err(Error::FirmwareTooLarge)
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
