//! Line protocol understood by the servo firmware: `"<address>,<angle>\n"`.

/// Encode one positioning command.
pub fn encode_command(address: u8, angle: u16) -> Vec<u8> {
    format!("{address},{angle}\n").into_bytes()
}

/// Parse one command line, with or without its trailing newline.
pub fn decode_command(line: &[u8]) -> Option<(u8, u16)> {
    let text = std::str::from_utf8(line).ok()?;
    let text = text.strip_suffix('\n').unwrap_or(text);
    let text = text.strip_suffix('\r').unwrap_or(text);
    let (address, angle) = text.split_once(',')?;
    Some((address.trim().parse().ok()?, angle.trim().parse().ok()?))
}

/// Split a byte stream into newline-terminated lines. Trailing partial data is dropped.
pub fn split_lines(stream: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, b) in stream.iter().enumerate() {
        if *b == b'\n' {
            out.push(&stream[start..=i]);
            start = i + 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_ascii_line() {
        assert_eq!(encode_command(2, 90), b"2,90\n".to_vec());
        assert_eq!(encode_command(31, 0), b"31,0\n".to_vec());
    }

    #[test]
    fn decodes_with_and_without_terminator() {
        assert_eq!(decode_command(b"7,180\n"), Some((7, 180)));
        assert_eq!(decode_command(b"7,180\r\n"), Some((7, 180)));
        assert_eq!(decode_command(b"7,180"), Some((7, 180)));
        assert_eq!(decode_command(b"7;180\n"), None);
        assert_eq!(decode_command(b"x,1\n"), None);
    }

    #[test]
    fn splits_complete_lines_only() {
        let lines = split_lines(b"2,90\n3,45\n4,");
        assert_eq!(lines, vec![&b"2,90\n"[..], &b"3,45\n"[..]]);
    }
}
