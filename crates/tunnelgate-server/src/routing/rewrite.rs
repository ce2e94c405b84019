//! HTML base-path rewriting

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Assignment the frontend ships with when served from `/`
pub const BASE_MARKER: &[u8] = br#"window.__dynamic_base__ = "/""#;

/// Assignment that serves the same frontend from under a channel prefix
pub fn channel_marker(channel: &str) -> Vec<u8> {
    format!(r#"window.__dynamic_base__ = "/proxy/{channel}/""#).into_bytes()
}

/// Whether a `Content-Type` value is HTML
pub fn is_html(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/html")
}

/// Replace every base marker in `body` with the channel marker
pub fn rewrite_html(body: &[u8], channel: &str) -> Vec<u8> {
    replace_all(body, BASE_MARKER, &channel_marker(channel))
}

/// Decompress, rewrite and recompress a gzip-encoded HTML body
pub fn rewrite_gzip_html(body: &[u8], channel: &str) -> io::Result<Vec<u8>> {
    let mut plain = Vec::new();
    GzDecoder::new(body).read_to_end(&mut plain)?;

    let rewritten = rewrite_html(&plain, channel);

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&rewritten)?;
    encoder.finish()
}

fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(pos) = rest.windows(needle.len()).position(|w| w == needle) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(replacement);
        rest = &rest[pos + needle.len()..];
    }
    out.extend_from_slice(rest);
    out
}
