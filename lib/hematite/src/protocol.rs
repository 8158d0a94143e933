//! Pure pieces of the wire protocol: inline command line handling and
//! reply fragment construction. A command is an inline line terminated by
//! LF (CR before it optional), space-separated; a command flagged BULK
//! carries its last argument as a byte count followed by that many raw
//! bytes plus CRLF.

/// Longest accepted inline line, terminator excluded.
pub const MAX_INLINE_SIZE: usize = 1024;
/// Most arguments a single command may carry.
pub const MAX_ARGS: usize = 16;
/// Largest accepted bulk payload.
pub const MAX_BULK_SIZE: i64 = 1024 * 1024 * 1024;
/// Bytes pulled off the socket per readable event.
pub const QUERY_CHUNK: usize = 1024;

/// Locates the first LF in the buffer and splits off the line before it,
/// with a trailing CR stripped. Returns the line and the number of buffer
/// bytes consumed (terminator included).
pub fn extract_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut line = &buf[..pos];
    if let Some((&b'\r', rest)) = line.split_last() {
        line = rest;
    }
    Some((line, pos + 1))
}

/// Splits an inline line on single spaces, dropping empty tokens. Tokens
/// beyond [`MAX_ARGS`] are discarded.
pub fn split_inline(line: &[u8]) -> Vec<Vec<u8>> {
    line.split(|&b| b == b' ')
        .filter(|token| !token.is_empty())
        .take(MAX_ARGS)
        .map(|token| token.to_vec())
        .collect()
}

/// Leading-integer parse with C `atoi` semantics: optional surrounding
/// garbage is ignored, a missing number reads as zero.
pub fn atoi(bytes: &[u8]) -> i64 {
    let mut iter = bytes.iter().skip_while(|b| b.is_ascii_whitespace()).peekable();
    let negative = match iter.peek() {
        Some(&&b'-') => {
            iter.next();
            true
        }
        Some(&&b'+') => {
            iter.next();
            false
        }
        _ => false,
    };
    let mut value: i64 = 0;
    for &b in iter {
        if !b.is_ascii_digit() {
            break;
        }
        value = value
            .wrapping_mul(10)
            .wrapping_add(i64::from(b - b'0'));
    }
    if negative {
        -value
    } else {
        value
    }
}

/// `+TEXT\r\n`
#[inline]
pub fn status(text: &str) -> Vec<u8> {
    format!("+{}\r\n", text).into_bytes()
}

/// `-ERR TEXT\r\n`
#[inline]
pub fn error(text: &str) -> Vec<u8> {
    format!("-ERR {}\r\n", text).into_bytes()
}

/// `N\r\n`
#[inline]
pub fn integer(value: i64) -> Vec<u8> {
    format!("{}\r\n", value).into_bytes()
}

/// The length line preceding a bulk payload; a negative length renders the
/// absent-value marker instead.
#[inline]
pub fn bulk_header(len: i64) -> Vec<u8> {
    if len < 0 {
        b"nil\r\n".to_vec()
    } else {
        format!("{}\r\n", len).into_bytes()
    }
}

/// The count line opening a multi-bulk reply; a negative count renders the
/// absent-list marker.
#[inline]
pub fn multibulk_header(count: i64) -> Vec<u8> {
    bulk_header(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_line_strips_terminators() {
        assert_eq!(extract_line(b"ping\r\nrest"), Some((&b"ping"[..], 6)));
        assert_eq!(extract_line(b"ping\nrest"), Some((&b"ping"[..], 5)));
        assert_eq!(extract_line(b"partial"), None);
    }

    #[test]
    fn test_extract_line_empty() {
        assert_eq!(extract_line(b"\r\n"), Some((&b""[..], 2)));
        assert_eq!(extract_line(b"\n"), Some((&b""[..], 1)));
    }

    #[test]
    fn test_split_inline_drops_empty_tokens() {
        let args = split_inline(b"set  foo   bar");
        assert_eq!(args, vec![b"set".to_vec(), b"foo".to_vec(), b"bar".to_vec()]);
        assert!(split_inline(b"   ").is_empty());
    }

    #[test]
    fn test_split_inline_caps_arguments() {
        let line: Vec<u8> = (0..40)
            .map(|i| format!("a{}", i))
            .collect::<Vec<_>>()
            .join(" ")
            .into_bytes();
        assert_eq!(split_inline(&line).len(), MAX_ARGS);
    }

    #[test]
    fn test_atoi() {
        assert_eq!(atoi(b"123"), 123);
        assert_eq!(atoi(b"-17"), -17);
        assert_eq!(atoi(b"  42"), 42);
        assert_eq!(atoi(b"12abc"), 12);
        assert_eq!(atoi(b"abc"), 0);
        assert_eq!(atoi(b""), 0);
    }

    #[test]
    fn test_reply_builders() {
        assert_eq!(status("OK"), b"+OK\r\n".to_vec());
        assert_eq!(error("unknown command"), b"-ERR unknown command\r\n".to_vec());
        assert_eq!(integer(-3), b"-3\r\n".to_vec());
        assert_eq!(bulk_header(3), b"3\r\n".to_vec());
        assert_eq!(bulk_header(-1), b"nil\r\n".to_vec());
        assert_eq!(multibulk_header(2), b"2\r\n".to_vec());
        assert_eq!(multibulk_header(-1), b"nil\r\n".to_vec());
    }
}
