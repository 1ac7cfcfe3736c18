use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};

use crate::{FailureKind, PageFetchError};

/// Decode a page body to UTF-8: BOM, then the Content-Type charset, then chardetng.
pub(crate) fn decode_body(
    bytes: &[u8],
    content_type: Option<&str>,
) -> Result<String, PageFetchError> {
    let encoding = Encoding::for_bom(bytes)
        .map(|(encoding, _)| encoding)
        .or_else(|| {
            content_type
                .and_then(charset_label)
                .and_then(|label| Encoding::for_label(label.as_bytes()))
        })
        .unwrap_or_else(|| {
            let mut detector = EncodingDetector::new();
            detector.feed(bytes, true);
            detector.guess(None, true)
        });

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors && encoding != UTF_8 {
        return Err(PageFetchError::new(
            FailureKind::Decode,
            format!("body is not valid {}", encoding.name()),
        ));
    }
    // Stray invalid bytes in UTF-8 pages are replaced; contacts survive that.
    Ok(text.into_owned())
}

fn charset_label(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches(['"', '\'']).to_string())
        } else {
            None
        }
    })
}
