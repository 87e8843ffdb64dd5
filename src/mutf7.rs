//! Decoding of IMAP mailbox names ("modified UTF-7", RFC 3501 §5.1.3).
//!
//! Printable ASCII stands for itself, `&-` is a literal `&`, and anything
//! else is UTF-16BE wrapped in `&...-` using base64 with `,` in place of `/`
//! and no padding.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use crate::error::{ReportError, Result};

const MUTF7: GeneralPurpose = GeneralPurpose::new(
    &alphabet::IMAP_MUTF7,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

fn invalid(name: &str, reason: impl Into<String>) -> ReportError {
    ReportError::InvalidFolderName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Turn a wire-format folder name into a display string.
pub fn decode_folder_name(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('-')
            .ok_or_else(|| invalid(raw, "unterminated shift sequence"))?;
        let encoded = &after[..end];
        if encoded.is_empty() {
            out.push('&');
        } else {
            let bytes = MUTF7
                .decode(encoded)
                .map_err(|e| invalid(raw, e.to_string()))?;
            if bytes.len() % 2 != 0 {
                return Err(invalid(raw, "odd number of UTF-16 bytes"));
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            let decoded = String::from_utf16(&units).map_err(|e| invalid(raw, e.to_string()))?;
            out.push_str(&decoded);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
