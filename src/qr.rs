//! Adapter over the QR encode/scan capabilities.
//!
//! Encoding wraps the `qrcode` crate with a forced version so both barcode
//! layers land on the same grid size. The encoder is a pure function:
//! identical `(payload, version, ec_level)` inputs always produce an
//! identical matrix, including the penalty-scored mask selection. The
//! pattern-binding security property of the whole system rests on that
//! contract, not on any encoder internals.
//!
//! Scanning renders a matrix back to a luma raster with a quiet zone and
//! hands it to `rqrr` for finder-pattern detection, format extraction and
//! Reed-Solomon correction.

use qrcode::{Color, QrCode, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matrix::BitMatrix;

/// Smallest supported QR version.
pub const MIN_VERSION: u8 = 1;
/// Largest supported QR version.
pub const MAX_VERSION: u8 = 40;

/// Quiet-zone width, in modules, added to the transient scan render.
const QUIET_ZONE: usize = 4;
/// Pixels per module in the transient scan render.
const SCAN_SCALE: usize = 8;

/// Error-correction level of a QR layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcLevel {
    /// ~7% recovery.
    L,
    /// ~15% recovery.
    M,
    /// ~25% recovery.
    Q,
    /// ~30% recovery.
    H,
}

impl EcLevel {
    pub(crate) fn to_qrcode(self) -> qrcode::EcLevel {
        match self {
            EcLevel::L => qrcode::EcLevel::L,
            EcLevel::M => qrcode::EcLevel::M,
            EcLevel::Q => qrcode::EcLevel::Q,
            EcLevel::H => qrcode::EcLevel::H,
        }
    }

    /// Map the raw two-bit error-correction indicator from a scanned
    /// format-information field. The QR bit patterns are not in L..H
    /// order: 0b00 is M and 0b01 is L.
    pub(crate) fn from_format_bits(bits: u16) -> Option<Self> {
        match bits {
            0 => Some(EcLevel::M),
            1 => Some(EcLevel::L),
            2 => Some(EcLevel::H),
            3 => Some(EcLevel::Q),
            _ => None,
        }
    }
}

impl std::fmt::Display for EcLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = match self {
            EcLevel::L => 'L',
            EcLevel::M => 'M',
            EcLevel::Q => 'Q',
            EcLevel::H => 'H',
        };
        write!(f, "{}", c)
    }
}

/// Failure to turn bytes into a matrix or a matrix back into bytes.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload cannot be encoded at the requested version/EC level.
    #[error("qr encoding failed: {0}")]
    Encode(String),

    /// The requested version is outside 1..=40.
    #[error("unsupported qr version {0}")]
    Version(u8),

    /// The matrix dimensions do not correspond to any QR version.
    #[error("matrix side {0} is not a valid qr grid size")]
    Side(usize),

    /// The scanner found no code in the rendered matrix.
    #[error("no scannable code found in matrix")]
    NoCode,

    /// The scanner found a grid but could not decode it.
    #[error("matrix scan failed: {0}")]
    Scan(String),

    /// A decoded payload did not parse as the expected structure.
    #[error("decoded payload is not a valid {what}: {detail}")]
    Malformed {
        what: &'static str,
        detail: String,
    },
}

/// Result of scanning a single-layer matrix.
#[derive(Debug, Clone)]
pub struct Scan {
    /// Decoded payload text.
    pub text: String,
    /// QR version, derived from the grid side.
    pub version: u8,
    /// Error-correction level read from the format information, when the
    /// indicator bits map to a known level.
    pub ec_level: Option<EcLevel>,
    /// Mask pattern read from the format information.
    pub mask: u8,
}

/// Matrix side for a QR version.
pub fn side_for_version(version: u8) -> usize {
    17 + 4 * version as usize
}

/// QR version for a matrix side, or `DecodeError::Side`.
pub fn version_for_side(side: usize) -> Result<u8, DecodeError> {
    if side < 21 || (side - 17) % 4 != 0 {
        return Err(DecodeError::Side(side));
    }
    let version = (side - 17) / 4;
    if version > MAX_VERSION as usize {
        return Err(DecodeError::Side(side));
    }
    Ok(version as u8)
}

/// Encode `payload` at a fixed version and EC level.
///
/// Deterministic: this is a pure function of its inputs. Fails when the
/// payload does not fit the requested version.
pub fn encode(payload: &[u8], version: u8, ec_level: EcLevel) -> Result<BitMatrix, DecodeError> {
    if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
        return Err(DecodeError::Version(version));
    }
    let code = QrCode::with_version(
        payload,
        Version::Normal(version as i16),
        ec_level.to_qrcode(),
    )
    .map_err(|e| DecodeError::Encode(format!("{:?}", e)))?;

    let side = code.width();
    let colors = code.to_colors();
    let mut matrix = BitMatrix::new(side, side);
    for (i, color) in colors.iter().enumerate() {
        if *color == Color::Dark {
            matrix.set(i % side, i / side, true);
        }
    }
    Ok(matrix)
}

/// Smallest version that holds `payload` at `ec_level`.
pub fn fit_version(payload: &[u8], ec_level: EcLevel) -> Result<u8, DecodeError> {
    let code = QrCode::with_error_correction_level(payload, ec_level.to_qrcode())
        .map_err(|e| DecodeError::Encode(format!("{:?}", e)))?;
    match code.version() {
        Version::Normal(v) => Ok(v as u8),
        Version::Micro(_) => Err(DecodeError::Side(code.width())),
    }
}

/// Scan a single-layer matrix back into its payload.
///
/// The matrix is rendered at `SCAN_SCALE` pixels per module inside a
/// `QUIET_ZONE`-module white margin; the margin exists only in this
/// transient render, never in persisted images.
pub fn scan(matrix: &BitMatrix) -> Result<Scan, DecodeError> {
    if !matrix.is_square() {
        return Err(DecodeError::Side(matrix.width().max(matrix.height())));
    }
    let version = version_for_side(matrix.width())?;

    let (pixels, raster_side) = render_for_scan(matrix);
    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(raster_side, raster_side, |x, y| {
            pixels[y * raster_side + x]
        });
    let grids = prepared.detect_grids();
    let grid = grids.first().ok_or(DecodeError::NoCode)?;
    let (meta, text) = grid
        .decode()
        .map_err(|e| DecodeError::Scan(format!("{:?}", e)))?;

    Ok(Scan {
        text,
        version,
        ec_level: EcLevel::from_format_bits(meta.ecc_level),
        mask: meta.mask as u8,
    })
}

fn render_for_scan(matrix: &BitMatrix) -> (Vec<u8>, usize) {
    let side = matrix.width();
    let raster_side = (side + 2 * QUIET_ZONE) * SCAN_SCALE;
    let mut pixels = vec![255u8; raster_side * raster_side];
    for y in 0..side {
        for x in 0..side {
            if !matrix.get(x, y) {
                continue;
            }
            let px0 = (x + QUIET_ZONE) * SCAN_SCALE;
            let py0 = (y + QUIET_ZONE) * SCAN_SCALE;
            for py in py0..py0 + SCAN_SCALE {
                let row = py * raster_side;
                for px in px0..px0 + SCAN_SCALE {
                    pixels[row + px] = 0;
                }
            }
        }
    }
    (pixels, raster_side)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_deterministic() {
        let a = encode(b"pattern binding test", 5, EcLevel::M).unwrap();
        let b = encode(b"pattern binding test", 5, EcLevel::M).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.width(), side_for_version(5));
    }

    #[test]
    fn different_payloads_differ() {
        let a = encode(b"Product-123", 5, EcLevel::M).unwrap();
        let b = encode(b"Product-124", 5, EcLevel::M).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn version_side_round_trip() {
        for v in [MIN_VERSION, 7, MAX_VERSION] {
            assert_eq!(version_for_side(side_for_version(v)).unwrap(), v);
        }
        assert!(version_for_side(20).is_err());
        assert!(version_for_side(22).is_err());
    }

    #[test]
    fn fit_version_grows_with_payload() {
        let small = fit_version(b"abc", EcLevel::M).unwrap();
        let big = fit_version(&[b'a'; 400], EcLevel::M).unwrap();
        assert!(small < big);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        // Version 1 at EC level M holds far less than 200 bytes.
        let err = encode(&[b'x'; 200], 1, EcLevel::M).unwrap_err();
        assert!(matches!(err, DecodeError::Encode(_)));
    }

    #[test]
    fn scan_round_trips_encode() {
        let payload = b"{\"d\":\"scan round trip\",\"u\":\"0001\"}";
        let matrix = encode(payload, 4, EcLevel::M).unwrap();
        let scan = scan(&matrix).unwrap();
        assert_eq!(scan.text.as_bytes(), payload);
        assert_eq!(scan.version, 4);
        assert_eq!(scan.ec_level, Some(EcLevel::M));
        assert!(scan.mask <= 7);
    }

    #[test]
    fn scan_rejects_blank_matrix() {
        let blank = BitMatrix::new(25, 25);
        assert!(scan(&blank).is_err());
    }
}
