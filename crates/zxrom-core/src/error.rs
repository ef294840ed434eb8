use std::fmt;

use crate::image::ROM_SIZE;

#[derive(Debug)]
pub enum Error {
    /// A line map names a GPIO outside the 32-line sample.
    LineOutOfRange { role: &'static str, line: u8 },
    /// Two roles in a line map share one GPIO.
    DuplicateLine { role: &'static str, line: u8 },
    /// Data pins must sit in one contiguous 8-line window so a byte can be
    /// written with a single masked store.
    DataWindowNotContiguous { base: u8 },
    /// ROM image is not exactly [`ROM_SIZE`] bytes.
    ImageSize { actual: usize },
    /// A label patch does not fit inside the announcement image.
    LabelOutOfRange { offset: usize, len: usize },
    /// A bank store needs at least one cycled image.
    NoBanks,
    /// More banks than the switcher can index.
    TooManyBanks { count: usize, max: usize },
    /// An address trigger or selection refers to an image that was never added.
    UnknownImage { name: String },
    /// The selected variant needs a line the line map does not route.
    MissingLine { role: &'static str },
    /// Two-phase switching needs an announcement image.
    MissingAnnouncement,
    /// Pulse width must be non-zero and shorter than the period.
    InvalidPulseTiming { period_ticks: u32, width_ticks: u32 },
    /// Wrapper for I/O errors (reading ROM images, spawning a pulse thread).
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LineOutOfRange { role, line } => {
                write!(f, "{role} line GP{line} is outside the 32-line sample")
            }
            Self::DuplicateLine { role, line } => {
                write!(f, "{role} line GP{line} is already assigned")
            }
            Self::DataWindowNotContiguous { base } => write!(
                f,
                "data lines must occupy GP{base}..GP{} contiguously",
                base + 7
            ),
            Self::ImageSize { actual } => {
                write!(f, "ROM image expected {ROM_SIZE} bytes, got {actual}")
            }
            Self::LabelOutOfRange { offset, len } => write!(
                f,
                "label of {len} bytes at offset {offset} does not fit a {ROM_SIZE}-byte image"
            ),
            Self::NoBanks => write!(f, "at least one ROM bank is required"),
            Self::TooManyBanks { count, max } => {
                write!(f, "{count} ROM banks configured, at most {max} supported")
            }
            Self::UnknownImage { name } => write!(f, "no ROM image named {name:?}"),
            Self::MissingLine { role } => write!(f, "line map does not route a {role} line"),
            Self::MissingAnnouncement => {
                write!(f, "announced switching needs an announcement image")
            }
            Self::InvalidPulseTiming {
                period_ticks,
                width_ticks,
            } => write!(
                f,
                "pulse width of {width_ticks} ticks does not fit a period of {period_ticks} ticks"
            ),
            Self::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
