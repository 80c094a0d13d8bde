//! Reversible mapping between user-facing filenames and flat storage keys.
//!
//! Encoded keys look like `<token>__<base64url(name)>[.<ext>]`. The token is a
//! random UUID rendered as 32 hex digits, so it never contains the `__`
//! delimiter and the first `__` in a key always separates token from payload.
//! The trailing extension is a plain-text copy kept for content-type sniffing
//! and is ignored when decoding.

use base64::{
    Engine as _, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use uuid::Uuid;

/// Separator between the random token and the encoded name.
pub const DELIMITER: &str = "__";

const NAME_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Build a fresh, collision-proof storage key for `display_name`.
pub fn encode(display_name: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    let payload = NAME_ENGINE.encode(display_name.as_bytes());

    match plain_extension(display_name) {
        Some(ext) => format!("{token}{DELIMITER}{payload}.{ext}"),
        None => format!("{token}{DELIMITER}{payload}"),
    }
}

/// Recover the display name from a storage key.
///
/// Keys without the delimiter are backend-native names and come back as-is.
/// Anything that fails to decode also falls back to the raw key.
pub fn decode(storage_key: &str) -> String {
    let Some((_, tail)) = storage_key.split_once(DELIMITER) else {
        return storage_key.to_string();
    };

    if let Some(name) = decode_payload(tail) {
        return name;
    }

    tail.rsplit_once('.')
        .and_then(|(payload, _ext)| decode_payload(payload))
        .unwrap_or_else(|| storage_key.to_string())
}

fn decode_payload(payload: &str) -> Option<String> {
    let bytes = NAME_ENGINE.decode(payload).ok()?;
    String::from_utf8(bytes).ok()
}

/// Extension worth echoing after the payload: non-empty, ASCII alphanumeric,
/// and attached to a non-empty stem (so `.bashrc` has none).
fn plain_extension(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 16 {
        return None;
    }
    ext.chars()
        .all(|c| c.is_ascii_alphanumeric())
        .then_some(ext)
}
