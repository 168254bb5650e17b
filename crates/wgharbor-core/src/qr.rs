//! QR encoding of client configs: PNG bytes, a base64 data URL, or an
//! ASCII block rendering for terminals.

use std::io::Cursor;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::Luma;
use qrcode::{Color, EcLevel, QrCode};

#[derive(Debug, thiserror::Error)]
pub enum QrError {
    #[error("no data to encode")]
    Empty,

    #[error("invalid WireGuard configuration format")]
    InvalidConfig,

    #[error("unsupported format: {0} (supported: png, base64, terminal)")]
    UnsupportedFormat(String),

    #[error("QR encoding failed: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

type Result<T> = std::result::Result<T, QrError>;

/// Requested output representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrFormat {
    Png,
    Base64,
    Terminal,
}

impl FromStr for QrFormat {
    type Err = QrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "png" => Ok(Self::Png),
            "base64" => Ok(Self::Base64),
            "terminal" => Ok(Self::Terminal),
            other => Err(QrError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl QrFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Base64 => "base64",
            Self::Terminal => "terminal",
        }
    }
}

/// Generated QR code in the requested representation.
#[derive(Debug)]
pub enum QrOutput {
    Png(Vec<u8>),
    Text(String),
}

/// QR generator with a pixel-size hint and recovery level.
#[derive(Debug, Clone, Copy)]
pub struct QrGenerator {
    size: u32,
    level: EcLevel,
}

impl Default for QrGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl QrGenerator {
    /// Defaults: 256 px, medium error correction. Non-positive sizes fall
    /// back to the default.
    pub fn new() -> Self {
        Self {
            size: 256,
            level: EcLevel::M,
        }
    }

    pub fn with_size(size: u32) -> Self {
        Self {
            size: if size == 0 { 256 } else { size },
            level: EcLevel::M,
        }
    }

    fn encode(&self, content: &str) -> Result<QrCode> {
        if content.is_empty() {
            return Err(QrError::Empty);
        }
        Ok(QrCode::with_error_correction_level(
            content.as_bytes(),
            self.level,
        )?)
    }

    /// PNG bytes at (at least) the requested pixel size.
    pub fn png(&self, content: &str) -> Result<Vec<u8>> {
        let code = self.encode(content)?;
        let img = code
            .render::<Luma<u8>>()
            .min_dimensions(self.size, self.size)
            .build();

        let mut bytes = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(bytes)
    }

    /// `data:image/png;base64,…` of the PNG bytes.
    pub fn base64(&self, content: &str) -> Result<String> {
        let png = self.png(content)?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
    }

    /// Two-cell-wide block rendering with a one-module border, colors
    /// inverted so the code scans against a dark terminal.
    pub fn terminal(&self, content: &str) -> Result<String> {
        let code = self.encode(content)?;
        let width = code.width();
        let colors = code.to_colors();

        let mut out = String::new();
        let border: String = "██".repeat(width);

        out.push_str("  ");
        out.push_str(&border);
        out.push('\n');

        for row in 0..width {
            out.push_str("██");
            for col in 0..width {
                match colors[row * width + col] {
                    Color::Dark => out.push_str("  "),
                    Color::Light => out.push_str("██"),
                }
            }
            out.push_str("██\n");
        }

        out.push_str("  ");
        out.push_str(&border);
        out.push('\n');

        Ok(out)
    }

    pub fn generate(&self, content: &str, format: QrFormat) -> Result<QrOutput> {
        match format {
            QrFormat::Png => self.png(content).map(QrOutput::Png),
            QrFormat::Base64 => self.base64(content).map(QrOutput::Text),
            QrFormat::Terminal => self.terminal(content).map(QrOutput::Text),
        }
    }
}

/// Encode a WireGuard client config, refusing anything that is missing
/// either of the two section headers.
pub fn wireguard_config_qr(config: &str, format: QrFormat, size: u32) -> Result<QrOutput> {
    if config.is_empty() {
        return Err(QrError::Empty);
    }
    if !config.contains("[Interface]") || !config.contains("[Peer]") {
        return Err(QrError::InvalidConfig);
    }
    QrGenerator::with_size(size).generate(config, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = "[Interface]\nPrivateKey = abc\nAddress = 10.0.0.2/32\n\n[Peer]\nPublicKey = def\nEndpoint = vpn.example.com:51820\nAllowedIPs = 0.0.0.0/0\n";

    #[test]
    fn png_output_has_png_magic() {
        let png = QrGenerator::new().png(SAMPLE_CONFIG).unwrap();
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn base64_output_is_a_data_url() {
        let data = QrGenerator::new().base64(SAMPLE_CONFIG).unwrap();
        assert!(data.starts_with("data:image/png;base64,"));
        assert!(BASE64
            .decode(data.trim_start_matches("data:image/png;base64,"))
            .is_ok());
    }

    #[test]
    fn terminal_output_is_bordered_blocks() {
        let art = QrGenerator::new().terminal(SAMPLE_CONFIG).unwrap();
        let lines: Vec<&str> = art.lines().collect();
        assert!(lines.len() > 21);
        assert!(lines[0].starts_with("  ██"));
        assert!(lines[1].starts_with("██"));
        assert!(lines[1].ends_with("██"));
        // Every row has the same rendered width.
        let width = lines[1].chars().count();
        assert!(lines[1..lines.len() - 1]
            .iter()
            .all(|l| l.chars().count() == width));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(QrGenerator::new().png(""), Err(QrError::Empty)));
        assert!(matches!(
            wireguard_config_qr("", QrFormat::Png, 256),
            Err(QrError::Empty)
        ));
    }

    #[test]
    fn wireguard_wrapper_requires_both_sections() {
        assert!(matches!(
            wireguard_config_qr("[Interface]\nPrivateKey = abc\n", QrFormat::Png, 256),
            Err(QrError::InvalidConfig)
        ));
        assert!(matches!(
            wireguard_config_qr("[Peer]\nPublicKey = abc\n", QrFormat::Png, 256),
            Err(QrError::InvalidConfig)
        ));
        assert!(wireguard_config_qr(SAMPLE_CONFIG, QrFormat::Terminal, 256).is_ok());
    }

    #[test]
    fn format_parsing() {
        assert_eq!("png".parse::<QrFormat>().unwrap(), QrFormat::Png);
        assert_eq!("base64".parse::<QrFormat>().unwrap(), QrFormat::Base64);
        assert_eq!("terminal".parse::<QrFormat>().unwrap(), QrFormat::Terminal);
        assert!(matches!(
            "bogus".parse::<QrFormat>(),
            Err(QrError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn zero_size_falls_back_to_default() {
        let png = QrGenerator::with_size(0).png(SAMPLE_CONFIG).unwrap();
        assert!(!png.is_empty());
    }
}
