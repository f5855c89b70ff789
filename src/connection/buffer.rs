//! Output buffer behind `wait_for_any`
//!
//! Program output arrives in arbitrary chunks. The buffer decodes it as
//! UTF-8 without splitting a multi-byte character across two reads and
//! matches the accumulated text against an ordered pattern list.

use regex::Regex;

use super::ExpectMatch;

#[derive(Debug, Default)]
pub struct ExpectBuffer {
    text: String,
    /// Tail of an incomplete UTF-8 sequence, completed by the next push
    remainder: Vec<u8>,
}

impl ExpectBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        let mut bytes = std::mem::take(&mut self.remainder);
        bytes.extend_from_slice(data);

        let safe_end = find_utf8_safe_boundary(&bytes);
        self.remainder = bytes.split_off(safe_end);
        self.text.push_str(&String::from_utf8_lossy(&bytes));
    }

    pub fn push_str(&mut self, data: &str) {
        self.push(data.as_bytes());
    }

    /// Try the patterns in list order; the first one matching anywhere in
    /// the buffer wins. On success the buffer is consumed up to the end of
    /// the match.
    pub fn find(&mut self, patterns: &[Regex]) -> Option<ExpectMatch> {
        let (index, start, end) = patterns.iter().enumerate().find_map(|(index, pattern)| {
            pattern
                .find(&self.text)
                .map(|m| (index, m.start(), m.end()))
        })?;

        let rest = self.text.split_off(end);
        let matched = self.text.split_off(start);
        let before = std::mem::replace(&mut self.text, rest);

        Some(ExpectMatch {
            index,
            matched,
            before,
        })
    }

    /// Drain everything decoded so far
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Length of the longest prefix of `buf` that does not end inside a
/// multi-byte UTF-8 sequence.
fn find_utf8_safe_boundary(buf: &[u8]) -> usize {
    let len = buf.len();
    let mut i = len;

    // A UTF-8 character is at most 4 bytes
    while i > 0 && i > len.saturating_sub(4) {
        let byte = buf[i - 1];

        if byte & 0x80 == 0 {
            return i;
        }
        if byte & 0xC0 == 0x80 {
            i -= 1;
            continue;
        }

        let char_len = if byte & 0xF8 == 0xF0 {
            4
        } else if byte & 0xF0 == 0xE0 {
            3
        } else if byte & 0xE0 == 0xC0 {
            2
        } else {
            return len;
        };

        let start = i - 1;
        return if len - start >= char_len { len } else { start };
    }

    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Vec<Regex> {
        list.iter().map(|p| Regex::new(p).unwrap()).collect()
    }

    #[test]
    fn test_list_order_breaks_ties() {
        let mut buffer = ExpectBuffer::new();
        buffer.push_str("Last login: today\r\nroot@web:~# ");

        // Both patterns match; the first listed wins even though the
        // second one matches earlier in the text
        let m = buffer
            .find(&patterns(&[r"[^\s]*@[^\r\n]*:[^\r\n]*[$#]", "Last login"]))
            .unwrap();
        assert_eq!(m.index, 0);
        assert_eq!(m.matched, "root@web:~#");
        assert_eq!(m.before, "Last login: today\r\n");
    }

    #[test]
    fn test_match_consumes_through_end() {
        let mut buffer = ExpectBuffer::new();
        buffer.push_str("motd\r\nPassword: trailing");

        let m = buffer.find(&patterns(&["assword:"])).unwrap();
        assert_eq!(m.before, "motd\r\nP");
        assert_eq!(m.matched, "assword:");
        assert_eq!(buffer.as_str(), " trailing");
    }

    #[test]
    fn test_no_match_keeps_buffer() {
        let mut buffer = ExpectBuffer::new();
        buffer.push_str("nothing here");

        assert!(buffer.find(&patterns(&["mysql>"])).is_none());
        assert_eq!(buffer.take(), "nothing here");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_split_multibyte_sequence() {
        let mut buffer = ExpectBuffer::new();
        let bytes = "密码:".as_bytes();

        buffer.push(&bytes[..2]);
        assert!(buffer.is_empty());
        buffer.push(&bytes[2..]);
        assert_eq!(buffer.as_str(), "密码:");
    }

    #[test]
    fn test_utf8_safe_boundary() {
        assert_eq!(find_utf8_safe_boundary(b"hello"), 5);
        assert_eq!(find_utf8_safe_boundary(&[0xE4, 0xBD, 0xA0, 0xE5, 0xA5]), 3);
        assert_eq!(find_utf8_safe_boundary("你好".as_bytes()), 6);
        assert_eq!(find_utf8_safe_boundary(&[]), 0);
    }
}
