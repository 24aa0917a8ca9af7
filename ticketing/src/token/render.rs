//! Barcode rendering.

use crate::error::{Result, TicketingError};
use image::{ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

/// Turns a wire value into a scannable PNG.
pub trait BarcodeRenderer: Send + Sync {
    /// Renders `value` as PNG bytes.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Render`] when the value cannot be encoded.
    fn render(&self, value: &str) -> Result<Vec<u8>>;
}

/// QR code renderer: error correction level M, square modules, quiet zone.
#[derive(Debug, Clone, Copy)]
pub struct QrRenderer {
    module_px: u32,
}

impl QrRenderer {
    /// Renderer with `module_px` pixels per module
    #[must_use]
    pub const fn new(module_px: u32) -> Self {
        Self { module_px }
    }
}

impl Default for QrRenderer {
    fn default() -> Self {
        Self::new(8)
    }
}

impl BarcodeRenderer for QrRenderer {
    fn render(&self, value: &str) -> Result<Vec<u8>> {
        let code = QrCode::with_error_correction_level(value.as_bytes(), EcLevel::M)
            .map_err(|e| TicketingError::Render(format!("QR encoding: {e}")))?;
        let image = code
            .render::<Luma<u8>>()
            .module_dimensions(self.module_px, self.module_px)
            .quiet_zone(true)
            .build();

        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| TicketingError::Render(format!("PNG encoding: {e}")))?;
        Ok(png.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;

    #[test]
    fn renders_png_with_quiet_zone() {
        let png = QrRenderer::default().render("TKT-ABCDEFGHJKMNPQRS").unwrap();
        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
        // Version 1 is 21 modules wide, plus 4 quiet modules on each side.
        assert!(decoded.width() >= (21 + 8) * 8);
        assert_eq!(decoded.width(), decoded.height());
    }
}
