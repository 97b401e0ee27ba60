//! Device linking helpers.
//!
//! A device links either by scanning a QR payload or by typing a numeric
//! pairing code on the phone. The lifecycle manager only forwards raw
//! payloads; turning them into something a person can use happens here.

use crate::whatsapp::error::{WaError, WaResult};
use image::{ImageFormat, Luma};
use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// How a fresh session links to the phone.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PairingMethod {
    /// Emit QR payloads for the linked-devices scanner.
    #[default]
    QrCode,
    /// Request a pairing code for `phone_number`.
    PhoneNumber,
}

fn encode(payload: &str) -> WaResult<QrCode> {
    QrCode::new(payload.as_bytes())
        .map_err(|e| WaError::invalid_parameter("QR payload cannot be encoded").with_details(e.to_string()))
}

/// Half-height block art, light on dark, suitable for most terminals.
pub fn render_qr_terminal(payload: &str) -> WaResult<String> {
    Ok(encode(payload)?
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// PNG bytes, at least `min_size` pixels square.
pub fn render_qr_png(payload: &str, min_size: u32) -> WaResult<Vec<u8>> {
    let img = encode(payload)?
        .render::<Luma<u8>>()
        .min_dimensions(min_size, min_size)
        .build();

    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, ImageFormat::Png)
        .map_err(|e| WaError::internal("PNG encoding failed").with_details(e.to_string()))?;
    Ok(png.into_inner())
}

/// Random eight-digit code, for transports that mint codes locally.
pub fn generate_pairing_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..100_000_000);
    format!("{:08}", n)
}

/// Split an eight-character code into two groups of four.
pub fn format_pairing_code(code: &str) -> String {
    match (code.len(), code.get(..4), code.get(4..)) {
        (8, Some(head), Some(tail)) => format!("{}-{}", head, tail),
        _ => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pairing_code() {
        assert_eq!(format_pairing_code("12345678"), "1234-5678");
        assert_eq!(format_pairing_code("ABCD1234"), "ABCD-1234");
        assert_eq!(format_pairing_code("123"), "123");
    }

    #[test]
    fn test_generated_code_is_eight_digits() {
        for _ in 0..32 {
            let code = generate_pairing_code();
            assert_eq!(code.len(), 8);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_terminal_art_has_rows() {
        let art = render_qr_terminal("2@abc,def,ghi").unwrap();
        assert!(art.lines().count() > 10);
    }

    #[test]
    fn test_png_signature_and_size() {
        let png = render_qr_png("2@abc,def,ghi", 200).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let img = image::load_from_memory(&png).unwrap();
        assert!(img.width() >= 200);
    }

    #[test]
    fn test_pairing_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&PairingMethod::PhoneNumber).unwrap(),
            "\"phoneNumber\""
        );
        assert_eq!(PairingMethod::default(), PairingMethod::QrCode);
    }
}
