//! Wire codec for the subset of RESP the stages exercise.
//!
//! Encoding is strict: every command is framed as an array of bulk strings,
//! exactly as a conformant server must parse it. The validation predicates
//! are lenient on purpose so near-conformant servers are not failed for
//! cosmetic deviations.

/// Line terminator used by every RESP frame.
pub const CRLF: &[u8] = b"\r\n";

const STATUS_SIGIL: u8 = b'+';
const ERROR_SIGIL: u8 = b'-';
const INTEGER_SIGIL: u8 = b':';
const BULK_SIGIL: u8 = b'$';
const ARRAY_SIGIL: u8 = b'*';

/// Encode a command as an array of bulk strings.
///
/// `["ECHO", "hello"]` becomes `*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n`.
pub fn encode_command<S: AsRef<str>>(args: &[S]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.len() * 16);
    out.push(ARRAY_SIGIL);
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(CRLF);

    for arg in args {
        let arg = arg.as_ref().as_bytes();
        out.push(BULK_SIGIL);
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(CRLF);
        out.extend_from_slice(arg);
        out.extend_from_slice(CRLF);
    }

    out
}

/// True iff `bytes` begins with `+<expected>\r\n`.
pub fn is_simple_status(bytes: &[u8], expected: &str) -> bool {
    let mut frame = Vec::with_capacity(expected.len() + 3);
    frame.push(STATUS_SIGIL);
    frame.extend_from_slice(expected.as_bytes());
    frame.extend_from_slice(CRLF);
    bytes.starts_with(&frame)
}

/// True iff `bytes` holds a length-prefixed bulk string whose payload
/// contains `expected`.
///
/// The payload is everything after the first well-formed `$<len>` header
/// line; the declared length is not enforced, so stray whitespace around
/// the value is tolerated.
pub fn is_bulk_string(bytes: &[u8], expected: &str) -> bool {
    let needle = expected.as_bytes();

    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == BULK_SIGIL)
        .filter_map(|(pos, _)| parse_length_header(&bytes[pos + 1..]).map(|h| (pos, h)))
        .any(|(pos, (len, header_len))| {
            if len < 0 {
                return false;
            }
            let payload = &bytes[pos + 1 + header_len..];
            contains(payload, needle)
        })
}

/// True iff `bytes` carries the null bulk string (`$-1`) or, as a lenient
/// fallback, a case-insensitive `nil` token.
pub fn is_null_bulk_string(bytes: &[u8]) -> bool {
    if contains(bytes, b"$-1") {
        return true;
    }
    String::from_utf8_lossy(bytes).to_lowercase().contains("nil")
}

/// Strictly decode one bulk string frame at the start of `bytes`.
///
/// Returns `None` for the null bulk string, an incomplete frame, or
/// anything that is not a bulk string.
pub fn decode_bulk_string(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.first() != Some(&BULK_SIGIL) {
        return None;
    }
    let (len, header_len) = parse_strict_header(&bytes[1..])?;
    let len = usize::try_from(len).ok()?;
    let start = 1 + header_len;
    let end = start.checked_add(len)?;
    if bytes.len() < end + CRLF.len() || &bytes[end..end + CRLF.len()] != CRLF {
        return None;
    }
    Some(&bytes[start..end])
}

/// True once `bytes` holds at least one complete reply frame.
///
/// Input that does not start with a RESP sigil is considered complete as
/// soon as it contains a newline, since its framing cannot be known.
pub fn is_complete_frame(bytes: &[u8]) -> bool {
    match bytes.first().copied() {
        None => false,
        Some(STATUS_SIGIL | ERROR_SIGIL | INTEGER_SIGIL | BULK_SIGIL | ARRAY_SIGIL) => {
            frame_len(bytes).is_some()
        }
        Some(_) => bytes.contains(&b'\n'),
    }
}

/// Render raw reply bytes for diagnostics, escaping control characters.
pub fn render_bytes(bytes: &[u8]) -> String {
    bytes.escape_ascii().to_string()
}

fn frame_len(bytes: &[u8]) -> Option<usize> {
    let sigil = *bytes.first()?;
    let line_end = find(bytes, CRLF)?;

    match sigil {
        STATUS_SIGIL | ERROR_SIGIL | INTEGER_SIGIL => Some(line_end + CRLF.len()),
        BULK_SIGIL => {
            let (len, header_len) = parse_strict_header(&bytes[1..])?;
            if len < 0 {
                return Some(1 + header_len);
            }
            let total = 1 + header_len + usize::try_from(len).ok()? + CRLF.len();
            (bytes.len() >= total).then_some(total)
        }
        ARRAY_SIGIL => {
            let (count, header_len) = parse_strict_header(&bytes[1..])?;
            let mut offset = 1 + header_len;
            for _ in 0..count.max(0) {
                offset += frame_len(&bytes[offset..])?;
            }
            Some(offset)
        }
        _ => None,
    }
}

/// Parse `<len>\r\n` (the bytes after a sigil). Returns the length and the
/// number of header bytes consumed, terminator included.
fn parse_strict_header(bytes: &[u8]) -> Option<(i64, usize)> {
    let line_end = find(bytes, CRLF)?;
    let len = std::str::from_utf8(&bytes[..line_end]).ok()?.parse().ok()?;
    Some((len, line_end + CRLF.len()))
}

/// Like [`parse_strict_header`] but accepts a bare `\n` terminator and
/// surrounding spaces.
fn parse_length_header(bytes: &[u8]) -> Option<(i64, usize)> {
    let line_end = bytes.iter().position(|b| *b == b'\n')?;
    let text = std::str::from_utf8(&bytes[..line_end]).ok()?;
    let len = text.trim().parse().ok()?;
    Some((len, line_end + 1))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || find(haystack, needle).is_some()
}
