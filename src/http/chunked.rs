use crate::error::ParseError;

/// Marks the zero-length chunk that ends a chunked body.
pub const TERMINATOR: &[u8] = b"\r\n0\r\n\r\n";

/// Decodes a `Transfer-Encoding: chunked` body.
///
/// `data` starts right after the header terminator. Each chunk is a hex
/// size line (extensions after `;` ignored), exactly that many bytes, and a
/// CRLF. Decoding stops at the zero-size chunk; trailers are ignored.
pub fn decode(data: &[u8]) -> Result<Vec<u8>, ParseError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = find(&data[pos..], b"\r\n")
            .map(|offset| pos + offset)
            .ok_or(ParseError::TruncatedChunk)?;
        let line = String::from_utf8_lossy(&data[pos..line_end]);
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| ParseError::InvalidChunkSize(line.to_string()))?;
        pos = line_end + 2;

        if size == 0 {
            return Ok(body);
        }

        let end = pos.checked_add(size).ok_or(ParseError::TruncatedChunk)?;
        if end > data.len() {
            return Err(ParseError::TruncatedChunk);
        }
        body.extend_from_slice(&data[pos..end]);
        pos = end;

        if !data[pos..].starts_with(b"\r\n") {
            return Err(ParseError::MissingChunkDelimiter);
        }
        pos += 2;
    }
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
