use std::{fmt, fs, path::Path};

use crate::{address::LogicalAddress, data::DataPreconverter, error::Error, mem_block::ByteBlock};

/// Size of every ROM image the board serves.
pub const ROM_SIZE: usize = 16 * 1024;
/// Width of the label patched into the announcement image.
pub const LABEL_LEN: usize = 32;
/// Where the announcement ROM keeps its placeholder label.
pub const DEFAULT_LABEL_OFFSET: usize = 290;

type ImageBlock = ByteBlock<ROM_SIZE>;

/// A ROM image in logical byte order, as supplied by the asset loader.
#[derive(Clone, PartialEq, Eq)]
pub struct RomImage(ImageBlock);

impl RomImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        ImageBlock::from_slice(bytes)
            .map(Self)
            .ok_or(Error::ImageSize {
                actual: bytes.len(),
            })
    }

    /// Image filled with a single value, e.g. `0xFF` for erased flash.
    pub fn filled(value: u8) -> Self {
        Self(ImageBlock::filled(value))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Copy of this image with `label` written at `offset`.
    ///
    /// The label is truncated or space padded to [`LABEL_LEN`] bytes.
    pub fn with_label(&self, offset: usize, label: &[u8]) -> Result<Self, Error> {
        let end = offset
            .checked_add(LABEL_LEN)
            .filter(|&end| end <= ROM_SIZE)
            .ok_or(Error::LabelOutOfRange {
                offset,
                len: LABEL_LEN,
            })?;

        let mut patched = self.clone();
        let field = &mut patched.0[offset..end];
        field.fill(b' ');
        let len = label.len().min(LABEL_LEN);
        field[..len].copy_from_slice(&label[..len]);
        Ok(patched)
    }

    /// Reorders every byte for the data lines. Consumes the image, so an image
    /// can only ever be converted once.
    pub fn preconvert(mut self, conv: &DataPreconverter) -> PreparedImage {
        conv.preconvert_slice(&mut self.0);
        PreparedImage(self.0)
    }
}

impl fmt::Debug for RomImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RomImage")
            .field("len", &ROM_SIZE)
            .field("head", &&self.0[..4])
            .finish()
    }
}

/// A ROM image already in data-line order, ready to be driven onto the bus.
#[derive(Clone, PartialEq, Eq)]
pub struct PreparedImage(ImageBlock);

impl PreparedImage {
    #[inline]
    pub fn byte(&self, address: LogicalAddress) -> u8 {
        self.0[address.index() & (ROM_SIZE - 1)]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PreparedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedImage")
            .field("len", &ROM_SIZE)
            .field("head", &&self.0[..4])
            .finish()
    }
}

/// Fixed-width label shown by the announcement image, space padded.
pub fn label_bytes(text: &str) -> [u8; LABEL_LEN] {
    let mut label = [b' '; LABEL_LEN];
    let bytes = text.as_bytes();
    let len = bytes.len().min(LABEL_LEN);
    label[..len].copy_from_slice(&bytes[..len]);
    label
}

/// Load a ROM image from an in-memory buffer, rejecting anything that is not
/// exactly [`ROM_SIZE`] bytes.
pub fn load_rom_image(bytes: &[u8]) -> Result<RomImage, Error> {
    RomImage::from_bytes(bytes)
}

/// Load a ROM image directly from disk.
pub fn load_rom_image_from_file<P>(path: P) -> Result<RomImage, Error>
where
    P: AsRef<Path>,
{
    let bytes = fs::read(path)?;
    load_rom_image(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::LineMap;

    #[test]
    fn rejects_wrong_sizes() {
        assert!(matches!(
            RomImage::from_bytes(&[0; ROM_SIZE - 1]),
            Err(Error::ImageSize { actual }) if actual == ROM_SIZE - 1
        ));
        assert!(matches!(
            RomImage::from_bytes(&vec![0; ROM_SIZE + 1]),
            Err(Error::ImageSize { actual }) if actual == ROM_SIZE + 1
        ));
        assert!(RomImage::from_bytes(&vec![0; ROM_SIZE]).is_ok());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_rom_image_from_file("/nonexistent/zxrom/48.rom").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn label_is_padded_and_placed() {
        let template = RomImage::filled(0);
        let patched = template
            .with_label(DEFAULT_LABEL_OFFSET, b"Manic Miner")
            .expect("label fits");

        let field = &patched.as_bytes()[DEFAULT_LABEL_OFFSET..DEFAULT_LABEL_OFFSET + LABEL_LEN];
        assert_eq!(&field[..11], b"Manic Miner");
        assert!(field[11..].iter().all(|&b| b == b' '));
        assert_eq!(patched.as_bytes()[DEFAULT_LABEL_OFFSET - 1], 0);
        assert_eq!(patched.as_bytes()[DEFAULT_LABEL_OFFSET + LABEL_LEN], 0);
        // The template is untouched.
        assert!(template.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn long_label_is_truncated() {
        let patched = RomImage::filled(0)
            .with_label(0, &[b'x'; 40])
            .expect("label fits");
        assert!(patched.as_bytes()[..LABEL_LEN].iter().all(|&b| b == b'x'));
        assert_eq!(patched.as_bytes()[LABEL_LEN], 0);
    }

    #[test]
    fn label_past_the_end_is_rejected() {
        let err = RomImage::filled(0)
            .with_label(ROM_SIZE - 8, b"late")
            .unwrap_err();
        assert!(matches!(err, Error::LabelOutOfRange { .. }));
        assert!(RomImage::filled(0).with_label(usize::MAX, b"x").is_err());
    }

    #[test]
    fn preconvert_rewrites_every_byte() {
        let conv = DataPreconverter::new(&LineMap::ZX_PICO).expect("valid wiring");
        let mut raw = vec![0u8; ROM_SIZE];
        raw[0] = 0xF3;
        raw[ROM_SIZE - 1] = 0x08;
        let prepared = RomImage::from_bytes(&raw).expect("size").preconvert(&conv);

        assert_eq!(prepared.byte(LogicalAddress::from_masked(0)), 0xEB);
        assert_eq!(prepared.byte(LogicalAddress::from_masked(0x3FFF)), 0x10);
        assert_eq!(prepared.byte(LogicalAddress::from_masked(1)), 0x00);
    }

    #[test]
    fn label_bytes_pads() {
        let label = label_bytes("48K");
        assert_eq!(&label[..3], b"48K");
        assert!(label[3..].iter().all(|&b| b == b' '));
    }
}
