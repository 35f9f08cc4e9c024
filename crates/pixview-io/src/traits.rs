//! Reader trait shared by the viewer's format decoders.

use crate::{DecodedImage, DecodeResult};
use std::path::Path;

/// Format reader trait.
///
/// Each format provides a reader struct (e.g. [`crate::psd::PsdReader`])
/// implementing this trait, so the viewer's loader can sniff magic bytes
/// and dispatch without caring about per-format options.
///
/// # Type Parameter
///
/// * `O` - Reader options type. Use `()` if no options are needed.
pub trait FormatReader<O: Default = ()>: Send + Sync {
    /// Format name for identification and error messages (uppercase).
    fn format_name(&self) -> &'static str;

    /// File extensions this format uses (lowercase, without dot).
    fn extensions(&self) -> &'static [&'static str];

    /// Checks whether this reader can parse the file based on its first
    /// bytes. Called during format auto-detection; must be cheap.
    fn can_read(&self, header: &[u8]) -> bool;

    /// Reads an image from a file path.
    fn read<P: AsRef<Path>>(&self, path: P) -> DecodeResult<DecodedImage>;

    /// Reads an image from a memory buffer holding the complete file.
    fn read_from_memory(&self, data: &[u8]) -> DecodeResult<DecodedImage>;

    /// Creates a reader with specific options.
    fn with_options(options: O) -> Self
    where
        Self: Sized;
}
