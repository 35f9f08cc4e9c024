//! Color transforms into display sRGB.

use crate::{IccError, IccResult, PixelLayout};
use lcms2::{CIExyY, GlobalContext, Intent, PixelFormat, Profile, Transform as LcmsTransform};

/// D50 white point, the connection-space illuminant used by Lab profiles.
const D50: CIExyY = CIExyY {
    x: 0.3457,
    y: 0.3585,
    Y: 1.0,
};

/// A color transform from a decoded image's native space into sRGB.
///
/// The transform is applied in place over an interleaved 8-bit pixel
/// buffer with an arbitrary row stride. For the 4-channel layouts
/// ([`PixelLayout::LabA`], [`PixelLayout::Bgra`]) only the three color
/// bytes of each pixel are rewritten; the alpha byte passes through
/// untouched.
///
/// # Example
///
/// ```rust
/// use pixview_icc::{PixelLayout, SrgbTransform};
///
/// let transform = SrgbTransform::lab(PixelLayout::Lab).unwrap();
///
/// // One mid-gray Lab pixel (L = 50%, a = b = neutral).
/// let mut pixels = [128u8, 128, 128];
/// transform.apply(&mut pixels, 1, 1, 3);
/// ```
pub struct SrgbTransform {
    inner: LcmsTransform<[u8; 3], [u8; 3]>,
    layout: PixelLayout,
}

impl SrgbTransform {
    /// Creates a transform from 8-bit CIELAB to sRGB, written back in
    /// B,G,R byte order.
    ///
    /// `layout` selects whether pixels carry a trailing alpha byte and
    /// must be [`PixelLayout::Lab`] or [`PixelLayout::LabA`].
    pub fn lab(layout: PixelLayout) -> IccResult<Self> {
        if !matches!(layout, PixelLayout::Lab | PixelLayout::LabA) {
            return Err(IccError::UnsupportedLayout(format!("{layout:?}")));
        }
        let src = Profile::new_lab4_context(GlobalContext::new(), &D50)
            .map_err(|e| IccError::CreateFailed(e.to_string()))?;
        let dst = Profile::new_srgb();
        let inner = LcmsTransform::new(
            &src,
            PixelFormat::Lab_8,
            &dst,
            PixelFormat::BGR_8,
            Intent::Perceptual,
        )
        .map_err(|e| IccError::TransformFailed(e.to_string()))?;

        Ok(Self { inner, layout })
    }

    /// Creates a transform from an embedded ICC profile to sRGB.
    ///
    /// The source pixels are read, and the result written, in B,G,R byte
    /// order. `layout` must be [`PixelLayout::Bgr`] or
    /// [`PixelLayout::Bgra`].
    ///
    /// # Errors
    ///
    /// Returns an error if the profile bytes are not a parseable ICC
    /// profile or describe a color space lcms2 cannot map to 8-bit BGR.
    pub fn from_profile_bytes(data: &[u8], layout: PixelLayout) -> IccResult<Self> {
        if !matches!(layout, PixelLayout::Bgr | PixelLayout::Bgra) {
            return Err(IccError::UnsupportedLayout(format!("{layout:?}")));
        }
        let src = Profile::new_icc(data)
            .map_err(|e| IccError::InvalidProfile(e.to_string()))?;
        let dst = Profile::new_srgb();
        let inner = LcmsTransform::new(
            &src,
            PixelFormat::BGR_8,
            &dst,
            PixelFormat::BGR_8,
            Intent::Perceptual,
        )
        .map_err(|e| IccError::TransformFailed(e.to_string()))?;

        Ok(Self { inner, layout })
    }

    /// Returns the pixel layout this transform was created for.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Applies the transform in place to a row-strided pixel buffer.
    ///
    /// `pixels` holds `height` rows of `stride` bytes each; only the
    /// first `width * channels` bytes of every row are color data, the
    /// rest is padding. Rows beyond the buffer end are ignored.
    pub fn apply(&self, pixels: &mut [u8], width: u32, height: u32, stride: usize) {
        let channels = self.layout.channels();
        let row_bytes = width as usize * channels;
        let mut scratch: Vec<[u8; 3]> = vec![[0; 3]; width as usize];

        for row in pixels.chunks_exact_mut(stride).take(height as usize) {
            if row.len() < row_bytes {
                break;
            }
            for (px, s) in row.chunks_exact(channels).zip(scratch.iter_mut()) {
                s.copy_from_slice(&px[..3]);
            }
            self.inner.transform_in_place(&mut scratch);
            for (px, s) in row.chunks_exact_mut(channels).zip(scratch.iter()) {
                px[..3].copy_from_slice(s);
            }
        }
    }
}

impl std::fmt::Debug for SrgbTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrgbTransform")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
