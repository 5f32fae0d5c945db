//! Input validation before ingest.

use std::path::Path;

use crate::config::LimitsConfig;
use crate::error::DeriveError;

/// Validates uploaded bytes before they are decoded or stored.
pub struct Validator {
    limits: LimitsConfig,
}

impl Validator {
    /// Create a new validator with the given limits.
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Perform quick validation before full decode.
    ///
    /// Checks:
    /// - Payload size is within limits
    /// - Payload starts with valid image magic bytes
    pub fn validate_bytes(&self, bytes: &[u8], label: &Path) -> Result<(), DeriveError> {
        let max_bytes = self.limits.max_file_size_mb * 1024 * 1024;
        let len = bytes.len() as u64;
        if len > max_bytes {
            return Err(DeriveError::FileTooLarge {
                path: label.to_path_buf(),
                size_mb: len / (1024 * 1024),
                max_mb: self.limits.max_file_size_mb,
            });
        }

        if bytes.len() < 4 {
            return Err(DeriveError::Decode {
                path: label.to_path_buf(),
                message: "File too small to be a valid image".to_string(),
            });
        }

        let mut header = [0u8; 12];
        let bytes_read = bytes.len().min(header.len());
        header[..bytes_read].copy_from_slice(&bytes[..bytes_read]);

        if !Self::is_valid_image_header(&header, bytes_read) {
            return Err(DeriveError::Decode {
                path: label.to_path_buf(),
                message: "Unrecognized image format (invalid magic bytes)".to_string(),
            });
        }

        Ok(())
    }

    /// Check if the header bytes match known image formats.
    fn is_valid_image_header(header: &[u8; 12], bytes_read: usize) -> bool {
        if bytes_read < 4 {
            return false;
        }

        // JPEG: FF D8 FF
        if header[..3] == [0xFF, 0xD8, 0xFF] {
            return true;
        }

        // PNG: 89 50 4E 47
        if header[..4] == [0x89, b'P', b'N', b'G'] {
            return true;
        }

        // GIF: GIF8
        if &header[..4] == b"GIF8" {
            return true;
        }

        // WebP: RIFF....WEBP
        if &header[..4] == b"RIFF" {
            return bytes_read < 12 || &header[8..12] == b"WEBP";
        }

        // BMP: BM
        if &header[..2] == b"BM" {
            return true;
        }

        // TIFF: II (little-endian) or MM (big-endian) followed by version 42
        if header[..4] == [b'I', b'I', 0x2A, 0x00] || header[..4] == [b'M', b'M', 0x00, 0x2A] {
            return true;
        }

        // AVIF: ftyp box at offset 4
        bytes_read >= 12 && &header[4..8] == b"ftyp"
    }
}
