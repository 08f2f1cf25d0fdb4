//! RouterOS API wire protocol: length-prefixed words grouped into
//! sentences, replies as `!re` records terminated by `!done`.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::RouterError;

/// Longest word the reader will accept. Router replies are small; anything
/// beyond this indicates a desynchronized stream.
const MAX_WORD_LEN: u32 = 1 << 22;

/// Encodes a word length using the RouterOS variable-length scheme.
pub fn encode_length(len: u32) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x4000 {
        let v = len | 0x8000;
        vec![(v >> 8) as u8, v as u8]
    } else if len < 0x20_0000 {
        let v = len | 0xC0_0000;
        vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else if len < 0x1000_0000 {
        let v = len | 0xE000_0000;
        vec![(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else {
        vec![
            0xF0,
            (len >> 24) as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
        ]
    }
}

/// Decodes a word length from its leading bytes. `rest` receives how many
/// continuation bytes follow the control byte.
pub fn decode_length_prefix(first: u8) -> (u32, usize) {
    if first < 0x80 {
        (first as u32, 0)
    } else if first & 0xC0 == 0x80 {
        ((first & 0x3F) as u32, 1)
    } else if first & 0xE0 == 0xC0 {
        ((first & 0x1F) as u32, 2)
    } else if first & 0xF0 == 0xE0 {
        ((first & 0x0F) as u32, 3)
    } else {
        (0, 4)
    }
}

pub async fn read_length<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32, RouterError> {
    let first = r.read_u8().await.map_err(io_err)?;
    let (mut len, extra) = decode_length_prefix(first);
    for _ in 0..extra {
        let b = r.read_u8().await.map_err(io_err)?;
        len = (len << 8) | b as u32;
    }
    if len > MAX_WORD_LEN {
        return Err(RouterError::Protocol(format!(
            "word length {len} exceeds limit"
        )));
    }
    Ok(len)
}

pub async fn read_word<R: AsyncRead + Unpin>(r: &mut R) -> Result<String, RouterError> {
    let len = read_length(r).await?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await.map_err(io_err)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub async fn write_word<W: AsyncWrite + Unpin>(w: &mut W, word: &str) -> Result<(), RouterError> {
    w.write_all(&encode_length(word.len() as u32))
        .await
        .map_err(io_err)?;
    w.write_all(word.as_bytes()).await.map_err(io_err)?;
    Ok(())
}

/// Writes a command sentence (command word plus attribute/query words) and
/// the terminating empty word.
pub async fn write_sentence<W: AsyncWrite + Unpin>(
    w: &mut W,
    words: &[&str],
) -> Result<(), RouterError> {
    for word in words {
        write_word(w, word).await?;
    }
    w.write_all(&[0]).await.map_err(io_err)?;
    w.flush().await.map_err(io_err)?;
    Ok(())
}

/// Reads one sentence: words until the zero-length terminator.
pub async fn read_sentence<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<String>, RouterError> {
    let mut words = Vec::new();
    loop {
        let word = read_word(r).await?;
        if word.is_empty() {
            return Ok(words);
        }
        words.push(word);
    }
}

/// One `!re` record, attributes keyed without the `=` prefixes.
pub type Record = HashMap<String, String>;

/// A complete reply: the `!re` records that arrived before `!done`.
#[derive(Debug, Default)]
pub struct Reply {
    pub records: Vec<Record>,
}

/// Reads sentences until `!done`, collecting `!re` records. A `!trap` or
/// `!fatal` sentence fails the reply with the router's message.
pub async fn read_reply<R: AsyncRead + Unpin>(r: &mut R) -> Result<Reply, RouterError> {
    let mut reply = Reply::default();
    let mut trap: Option<String> = None;
    loop {
        let sentence = read_sentence(r).await?;
        let Some(kind) = sentence.first() else {
            continue;
        };
        match kind.as_str() {
            "!re" => reply.records.push(parse_attributes(&sentence[1..])),
            "!trap" => {
                let attrs = parse_attributes(&sentence[1..]);
                trap = Some(
                    attrs
                        .get("message")
                        .cloned()
                        .unwrap_or_else(|| "unspecified trap".to_string()),
                );
            }
            "!fatal" => {
                let msg = sentence.get(1).cloned().unwrap_or_default();
                return Err(RouterError::Protocol(format!("fatal: {msg}")));
            }
            "!done" => {
                return match trap {
                    Some(msg) => Err(RouterError::Trap(msg)),
                    None => Ok(reply),
                };
            }
            other => {
                return Err(RouterError::Protocol(format!(
                    "unexpected reply word {other:?}"
                )));
            }
        }
    }
}

fn parse_attributes(words: &[String]) -> Record {
    let mut attrs = Record::new();
    for word in words {
        let Some(rest) = word.strip_prefix('=') else {
            continue;
        };
        match rest.split_once('=') {
            Some((k, v)) => attrs.insert(k.to_string(), v.to_string()),
            None => attrs.insert(rest.to_string(), String::new()),
        };
    }
    attrs
}

fn io_err(e: std::io::Error) -> RouterError {
    RouterError::Unreachable(e.to_string())
}
