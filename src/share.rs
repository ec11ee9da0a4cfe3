//! Snippet source helpers: pulling code out of markdown and the
//! base64 payloads used in shareable playground links.

use crate::error::{SandboxError, SandboxResult};
use base64::Engine;
use percent_encoding::percent_decode_str;

const FENCE: &str = "```";
const TS_FENCE: &str = "```typescript";

/// Body of the first ```` ```typescript ```` fenced block, or an empty string.
pub fn extract_code(raw: &str) -> &str {
    let mut search = 0;
    while let Some(found) = raw[search..].find(TS_FENCE) {
        let after = search + found + TS_FENCE.len();
        search = after;

        let tail = &raw[after..];
        let leading = &tail[..tail.len() - tail.trim_start().len()];
        let Some(newline) = leading.rfind('\n') else {
            continue;
        };
        let body = &tail[newline + 1..];
        if let Some(end) = body.find(FENCE) {
            return &body[..end];
        }
    }
    ""
}

/// Encode snippet source for a share link: base64 of the UTF-8 bytes,
/// percent-encoded for use in a URL component.
pub fn encode_share(source: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(source.as_bytes());
    url::form_urlencoded::byte_serialize(encoded.as_bytes()).collect()
}

/// Reverse [`encode_share`]. A `%` not followed by two hex digits is
/// reported as malformed.
pub fn decode_share(payload: &str) -> SandboxResult<String> {
    let payload = payload.trim();
    if let Some(offset) = malformed_escape(payload) {
        return Err(SandboxError::SharePayload(format!(
            "malformed escape at offset {}",
            offset
        )));
    }
    let unescaped: Vec<u8> = percent_decode_str(payload).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(unescaped)
        .map_err(|e| SandboxError::SharePayload(format!("invalid base64: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| SandboxError::SharePayload(format!("invalid UTF-8: {}", e)))
}

fn malformed_escape(payload: &str) -> Option<usize> {
    payload.match_indices('%').map(|(offset, _)| offset).find(|&offset| {
        let hex = payload.as_bytes().get(offset + 1..offset + 3);
        !hex.is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit))
    })
}
