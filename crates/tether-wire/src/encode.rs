//! The command document format.

use serde::{Deserialize, Serialize};
use tether_core::{CommandPayload, Param};

use crate::error::WireError;

pub(crate) const PREFIX: &[u8] = b"{\"commands\":[";
pub(crate) const SEPARATOR: u8 = b',';
pub(crate) const SUFFIX: &[u8] = b"]}";
/// End-of-document sentinel following the JSON.
pub const SENTINEL: u8 = b'0';

#[derive(Serialize)]
struct ParamRef<'a> {
    value: &'a Param,
}

#[derive(Serialize)]
struct CommandRef<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    params: Vec<ParamRef<'a>>,
}

/// Encode one command object (no framing).
pub(crate) fn encode_command(payload: &CommandPayload) -> Result<Vec<u8>, WireError> {
    let params = payload.params();
    if let Some(index) = params.iter().position(|p| !p.is_finite()) {
        return Err(WireError::NonFiniteParameter {
            command: payload.type_name(),
            index,
        });
    }
    let doc = CommandRef {
        kind: payload.type_name(),
        params: params.iter().map(|value| ParamRef { value }).collect(),
    };
    Ok(serde_json::to_vec(&doc)?)
}

/// Framed size of a document holding `count` commands of `body` total bytes.
pub(crate) fn framed_len(count: usize, body: usize) -> usize {
    PREFIX.len() + body + count.saturating_sub(1) + SUFFIX.len() + 1
}

/// Write the framed document for pre-encoded commands into `out`.
pub(crate) fn frame<'a>(commands: impl IntoIterator<Item = &'a [u8]>, out: &mut Vec<u8>) {
    out.clear();
    out.extend_from_slice(PREFIX);
    for (i, bytes) in commands.into_iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.extend_from_slice(bytes);
    }
    out.extend_from_slice(SUFFIX);
    out.push(SENTINEL);
}

/// Encode a full command document, sentinel included.
pub fn encode(commands: &[CommandPayload]) -> Result<Vec<u8>, WireError> {
    let encoded = commands
        .iter()
        .map(encode_command)
        .collect::<Result<Vec<_>, _>>()?;
    let body: usize = encoded.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(framed_len(encoded.len(), body));
    frame(encoded.iter().map(Vec::as_slice), &mut out);
    Ok(out)
}

/// A decoded command, as the simulator sees it.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct WireCommand {
    /// Wire type name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Parameter values in order.
    #[serde(deserialize_with = "params")]
    pub params: Vec<Param>,
}

impl WireCommand {
    /// Parameter `i` as text.
    pub fn text(&self, i: usize) -> Option<&str> {
        match self.params.get(i)? {
            Param::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parameter `i` as a number (integers widen).
    pub fn number(&self, i: usize) -> Option<f64> {
        match self.params.get(i)? {
            Param::Int(v) => Some(*v as f64),
            Param::Float(v) => Some(*v),
            Param::Text(_) => None,
        }
    }

    /// Parameters `i..i+3` as a vector.
    pub fn vec3(&self, i: usize) -> Option<[f64; 3]> {
        Some([self.number(i)?, self.number(i + 1)?, self.number(i + 2)?])
    }
}

fn params<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<Param>, D::Error> {
    #[derive(Deserialize)]
    struct Entry {
        value: Param,
    }
    let entries = Vec::<Entry>::deserialize(d)?;
    Ok(entries.into_iter().map(|e| e.value).collect())
}

#[derive(Deserialize)]
struct Document {
    commands: Vec<WireCommand>,
}

/// Parse a command document from the start of `bytes`.
///
/// Bytes after the sentinel are ignored: the command buffer is never
/// cleared, so a short document is followed by the tail of older ones.
pub fn decode(bytes: &[u8]) -> Result<Vec<WireCommand>, WireError> {
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Document>();
    let doc = match stream.next() {
        Some(Ok(doc)) => doc,
        Some(Err(e)) => {
            return Err(WireError::Malformed {
                reason: e.to_string(),
            })
        }
        None => {
            return Err(WireError::Malformed {
                reason: "empty buffer".to_string(),
            })
        }
    };
    let end = stream.byte_offset();
    if bytes.get(end) != Some(&SENTINEL) {
        return Err(WireError::Malformed {
            reason: format!("missing '0' sentinel at byte {end}"),
        });
    }
    Ok(doc.commands)
}
