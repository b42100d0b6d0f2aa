// Binary wire framing for the control API.
//
// Every message is a *sentence*: a run of length-prefixed UTF-8 *words*
// terminated by a zero-length word. Requests carry a command path word
// (`/ip/firewall/address-list/print`) followed by attribute (`=key=value`)
// and query (`?key=value`) words. Replies open with a type word: `!re` for
// a data record, `!done` to close the reply, `!trap` for a command error,
// `!fatal` when the session is beyond recovery.

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};

use crate::error::Error;

/// One flat record from a reply (`!re` attributes, or the `!done` payload).
pub type FlatRecord = BTreeMap<String, String>;

/// A request parameter: attribute for writes, query for prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Attr(String, String),
    Query(String, String),
}

impl Param {
    /// Attribute word (`=key=value`), used on write verbs.
    pub fn attr(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Attr(key.into(), value.into())
    }

    /// Query word (`?key=value`), used to filter print verbs.
    pub fn query(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Query(key.into(), value.into())
    }

    pub(crate) fn word(&self) -> String {
        match self {
            Self::Attr(k, v) => format!("={k}={v}"),
            Self::Query(k, v) => format!("?{k}={v}"),
        }
    }
}

/// Reply type word opening each response sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyWord {
    Re,
    Done,
    Trap,
    Fatal,
}

impl ReplyWord {
    pub(crate) fn parse(word: &str) -> Result<Self, Error> {
        match word {
            "!re" => Ok(Self::Re),
            "!done" => Ok(Self::Done),
            "!trap" => Ok(Self::Trap),
            "!fatal" => Ok(Self::Fatal),
            other => Err(Error::Protocol(format!("unknown reply word {other:?}"))),
        }
    }
}

/// Parse the attribute words of a reply sentence into a flat record.
///
/// Words that are not `=key=value` attributes (positional `!fatal` reasons,
/// `.tag` words) are collected under an empty key so the caller can still
/// surface them in error messages.
pub(crate) fn parse_attributes<'a>(words: impl Iterator<Item = &'a str>) -> FlatRecord {
    let mut record = FlatRecord::new();
    for word in words {
        if let Some(rest) = word.strip_prefix('=') {
            match rest.split_once('=') {
                Some((key, value)) => record.insert(key.to_owned(), value.to_owned()),
                None => record.insert(rest.to_owned(), String::new()),
            };
        } else {
            record
                .entry(String::new())
                .and_modify(|v| {
                    v.push(' ');
                    v.push_str(word);
                })
                .or_insert_with(|| word.to_owned());
        }
    }
    record
}

/// Encode a full sentence (words + terminator) into a buffer.
pub(crate) fn encode_sentence<'a>(words: impl IntoIterator<Item = &'a str>) -> BytesMut {
    let mut buf = BytesMut::new();
    for word in words {
        encode_length(word.len(), &mut buf);
        buf.put_slice(word.as_bytes());
    }
    buf.put_u8(0);
    buf
}

/// Encode a word length using the API's variable-width prefix scheme.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn encode_length(len: usize, buf: &mut BytesMut) {
    let len = len as u32;
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else if len < 0x4000 {
        buf.put_u16(len as u16 | 0x8000);
    } else if len < 0x20_0000 {
        let v = len | 0x00C0_0000;
        buf.put_u8((v >> 16) as u8);
        buf.put_u16(v as u16);
    } else if len < 0x1000_0000 {
        buf.put_u32(len | 0xE000_0000);
    } else {
        buf.put_u8(0xF0);
        buf.put_u32(len);
    }
}

/// Width (in extra bytes) and high bits of a length prefix, keyed by its
/// first byte. Returns `(extra_bytes, seed_value)`.
pub(crate) fn length_prefix(first: u8) -> Result<(usize, u32), Error> {
    if first & 0x80 == 0 {
        Ok((0, u32::from(first)))
    } else if first & 0xC0 == 0x80 {
        Ok((1, u32::from(first & 0x3F)))
    } else if first & 0xE0 == 0xC0 {
        Ok((2, u32::from(first & 0x1F)))
    } else if first & 0xF0 == 0xE0 {
        Ok((3, u32::from(first & 0x0F)))
    } else if first == 0xF0 {
        Ok((4, 0))
    } else {
        // 0xF1..=0xFF are reserved control bytes.
        Err(Error::Protocol(format!(
            "reserved length prefix byte 0x{first:02X}"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encoded(len: usize) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_length(len, &mut buf);
        buf.to_vec()
    }

    fn decoded(bytes: &[u8]) -> u32 {
        let (extra, mut value) = length_prefix(bytes[0]).unwrap();
        for b in &bytes[1..=extra] {
            value = (value << 8) | u32::from(*b);
        }
        value
    }

    #[test]
    fn short_lengths_are_single_byte() {
        assert_eq!(encoded(0), vec![0]);
        assert_eq!(encoded(0x7F), vec![0x7F]);
    }

    #[test]
    fn length_encoding_round_trips_across_boundaries() {
        for len in [
            0usize, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, 0x0FFF_FFFF,
        ] {
            let bytes = encoded(len);
            assert_eq!(decoded(&bytes), u32::try_from(len).unwrap(), "len={len:#x}");
        }
    }

    #[test]
    fn reserved_prefix_bytes_are_rejected() {
        assert!(length_prefix(0xF1).is_err());
        assert!(length_prefix(0xFF).is_err());
    }

    #[test]
    fn sentence_ends_with_zero_word() {
        let buf = encode_sentence(["/login"]);
        assert_eq!(buf.last(), Some(&0u8));
        assert_eq!(buf[0], 6); // "/login" is six bytes
    }

    #[test]
    fn attribute_words_parse_into_records() {
        let record = parse_attributes(["=name=gw-1", "=address=10.0.0.1", "=empty="].into_iter());
        assert_eq!(record.get("name").map(String::as_str), Some("gw-1"));
        assert_eq!(record.get("address").map(String::as_str), Some("10.0.0.1"));
        assert_eq!(record.get("empty").map(String::as_str), Some(""));
    }

    #[test]
    fn positional_words_are_kept_for_diagnostics() {
        let record = parse_attributes(["not kidding", "still here"].into_iter());
        assert_eq!(
            record.get("").map(String::as_str),
            Some("not kidding still here")
        );
    }

    #[test]
    fn param_words_carry_their_sigils() {
        assert_eq!(Param::attr("list", "isolated").word(), "=list=isolated");
        assert_eq!(Param::query("address", "10.0.0.2").word(), "?address=10.0.0.2");
    }
}
