use base64::Engine;
use std::io::Cursor;
use std::path::Path;

/// Splits a data URI into (mime, payload bytes). Non-base64 payloads are
/// taken verbatim.
pub(crate) fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}

pub(crate) fn encode_data_uri(mime: &str, data: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(data)
    )
}

/// Resolves an opaque image reference to raw bytes: data URI first, then
/// filesystem path. `None` means the caller degrades to a placeholder.
pub(crate) fn load_image_bytes(source: &str) -> Option<(Option<String>, Vec<u8>)> {
    if let Some((mime, data)) = parse_data_uri(source) {
        return Some((Some(mime), data));
    }
    let bytes = std::fs::read(Path::new(source)).ok()?;
    Some((None, bytes))
}

/// Intrinsic pixel dimensions without a full decode; header sniff only.
pub(crate) fn image_dimensions(source: &str) -> Option<(u32, u32)> {
    let (_, bytes) = load_image_bytes(source)?;
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
