//! Read identifier stream.
//!
//! `Tokenize` splits each id into digit and non-digit runs. When an id has
//! the same shape as its predecessor (same token kinds, same text tokens) it
//! is stored as zigzag deltas of its numeric fields; otherwise it is stored
//! verbatim. Typical Illumina ids differ from their neighbour only in tile
//! and coordinate fields, so most of them shrink to a handful of bytes.

use crate::error::{Error, Result};
use crate::format::CodecFamily;
use crate::types::IdMode;
use crate::varint::{put_signed, put_varint, ByteCursor};

const VERSION: u8 = 1;
const MAX_ID_LEN: usize = 1 << 20;
/// Longest digit run treated as a number (fits comfortably in `i64`).
const MAX_NUMERIC_DIGITS: usize = 18;

const LITERAL: u8 = 0;
const SAME_SHAPE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Num(u64),
}

fn tokenize(id: &str) -> Vec<Token<'_>> {
    let bytes = id.as_bytes();
    let mut tokens = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let digits = bytes[start].is_ascii_digit();
        let mut end = start + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() == digits {
            end += 1;
        }
        let run = &id[start..end];
        let canonical = digits
            && run.len() <= MAX_NUMERIC_DIGITS
            && (run.len() == 1 || !run.starts_with('0'));
        match run.parse::<u64>() {
            Ok(n) if canonical => tokens.push(Token::Num(n)),
            _ => tokens.push(Token::Text(run)),
        }
        start = end;
    }
    tokens
}

fn same_shape(a: &[Token<'_>], b: &[Token<'_>]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|pair| match pair {
            (Token::Text(x), Token::Text(y)) => x == y,
            (Token::Num(_), Token::Num(_)) => true,
            _ => false,
        })
}

/// Encodes `ids`, returning the stream codec tag and the raw stream.
pub fn encode_ids<'a>(ids: impl Iterator<Item = &'a str>, mode: IdMode) -> (u8, Vec<u8>) {
    let mut out = Vec::new();
    match mode {
        IdMode::Exact => {
            for id in ids {
                put_varint(&mut out, id.len() as u64);
                out.extend_from_slice(id.as_bytes());
            }
            (CodecFamily::Raw.tag(VERSION), out)
        }
        IdMode::Tokenize => {
            let mut prev: Vec<Token<'a>> = Vec::new();
            let mut first = true;
            for id in ids {
                let tokens = tokenize(id);
                if !first && same_shape(&prev, &tokens) {
                    out.push(SAME_SHAPE);
                    for (p, t) in prev.iter().zip(&tokens) {
                        if let (Token::Num(a), Token::Num(b)) = (p, t) {
                            put_signed(&mut out, *b as i64 - *a as i64);
                        }
                    }
                } else {
                    out.push(LITERAL);
                    put_varint(&mut out, id.len() as u64);
                    out.extend_from_slice(id.as_bytes());
                }
                prev = tokens;
                first = false;
            }
            (CodecFamily::Tokenized.tag(VERSION), out)
        }
        IdMode::Discard => (CodecFamily::Discarded.tag(VERSION), out),
    }
}

/// Decodes `count` ids. Discarded ids come back as empty strings; the
/// output stage numbers them.
pub fn decode_ids(tag: u8, stream: &[u8], count: usize) -> Result<Vec<String>> {
    let (family, _) = CodecFamily::from_tag(tag)?;
    let mut cur = ByteCursor::new(stream, "id stream");
    let mut ids = Vec::with_capacity(count);
    match family {
        CodecFamily::Raw => {
            for _ in 0..count {
                let len = cur.length(MAX_ID_LEN)?;
                ids.push(utf8(cur.bytes(len)?)?);
            }
        }
        CodecFamily::Tokenized => {
            for i in 0..count {
                let id = match cur.u8()? {
                    LITERAL => {
                        let len = cur.length(MAX_ID_LEN)?;
                        utf8(cur.bytes(len)?)?
                    }
                    SAME_SHAPE if i > 0 => {
                        let prev = tokenize(&ids[i - 1]);
                        let mut id = String::with_capacity(ids[i - 1].len() + 2);
                        for token in prev {
                            match token {
                                Token::Text(t) => id.push_str(t),
                                Token::Num(n) => {
                                    let value = match (n as i64).checked_add(cur.signed()?) {
                                        Some(v) if v >= 0 => v,
                                        _ => {
                                            return Err(Error::format(format!(
                                                "id {i}: numeric field decodes out of range"
                                            )))
                                        }
                                    };
                                    id.push_str(&value.to_string());
                                }
                            }
                        }
                        id
                    }
                    other => {
                        return Err(Error::format(format!("id {i}: invalid token flag {other}")));
                    }
                };
                ids.push(id);
            }
        }
        CodecFamily::Discarded => ids.resize(count, String::new()),
        other => return Err(Error::format(format!("{other:?} is not an id codec"))),
    }
    if !cur.is_empty() {
        return Err(Error::format(format!(
            "id stream has {} trailing bytes",
            cur.remaining()
        )));
    }
    Ok(ids)
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::format("id is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ILLUMINA: [&str; 4] = [
        "A00123:8:H5KJ2DSXX:1:1101:10004:1000 1:N:0:ACGT",
        "A00123:8:H5KJ2DSXX:1:1101:10022:1000 1:N:0:ACGT",
        "A00123:8:H5KJ2DSXX:1:1101:9985:1016 1:N:0:ACGT",
        "SRR001.7 length=0150",
    ];

    #[test]
    fn test_tokenized_ids_are_lossless_and_smaller() {
        let (tag, stream) = encode_ids(ILLUMINA.iter().copied(), IdMode::Tokenize);
        let decoded = decode_ids(tag, &stream, ILLUMINA.len()).unwrap();
        assert_eq!(decoded, ILLUMINA);
        let (_, exact) = encode_ids(ILLUMINA.iter().copied(), IdMode::Exact);
        assert!(stream.len() < exact.len());
    }

    #[test]
    fn test_leading_zeros_stay_text() {
        let tokens = tokenize("r007x10");
        assert_eq!(
            tokens,
            vec![Token::Text("r"), Token::Text("007"), Token::Text("x"), Token::Num(10)]
        );
    }

    #[test]
    fn test_discarded_ids_decode_empty() {
        let (tag, stream) = encode_ids(["a", "b"].into_iter(), IdMode::Discard);
        assert!(stream.is_empty());
        assert_eq!(decode_ids(tag, &stream, 2).unwrap(), vec![String::new(), String::new()]);
    }

    #[test]
    fn test_same_shape_without_predecessor_rejected() {
        assert!(decode_ids(CodecFamily::Tokenized.tag(1), &[SAME_SHAPE], 1).is_err());
    }
}
