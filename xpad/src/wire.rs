//! Request/reply framing between a device proxy and a device server.
//!
//! Each message is a single JSON document terminated by LF (0x0A). The client
//! writes one [`Request`] line and reads back exactly one [`Reply`] line.
//!
//! ```text
//! -> {"device":"det/xpad/xpad.1","op":"command","name":"LoadConfig","arg":{"type":"long_array","value":[4,0]}}
//! <- {"status":"ok","value":{"type":"void"}}
//! ```
//!
//! Failed calls reply with the full record stack:
//!
//! ```text
//! <- {"status":"failed","errors":[{"reason":"XPAD_HardwareError","desc":"...","origin":"...","severity":"ERR"}]}
//! ```

use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::failure::{reasons, DevError, DevFailed, DevResult};
use crate::proxy::DeviceData;

/// Longest accepted message line, terminator included.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// One call against a named device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub device: String,
    #[serde(flatten)]
    pub call: Call,
}

/// The operation requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    Ping,
    State,
    Status,
    ReadAttribute {
        name: String,
    },
    WriteAttribute {
        name: String,
        value: DeviceData,
    },
    Command {
        name: String,
        #[serde(default)]
        arg: DeviceData,
    },
}

impl Call {
    /// Short label for logging.
    pub fn label(&self) -> String {
        match self {
            Call::Ping => "ping".to_string(),
            Call::State => "state".to_string(),
            Call::Status => "status".to_string(),
            Call::ReadAttribute { name } => format!("read {name}"),
            Call::WriteAttribute { name, .. } => format!("write {name}"),
            Call::Command { name, .. } => format!("command {name}"),
        }
    }
}

/// Answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok {
        #[serde(default)]
        value: DeviceData,
    },
    Failed {
        errors: Vec<DevError>,
    },
}

impl Reply {
    pub fn from_result(result: DevResult<DeviceData>) -> Self {
        match result {
            Ok(value) => Reply::Ok { value },
            Err(failure) => Reply::Failed {
                errors: failure.errors,
            },
        }
    }

    pub fn into_result(self) -> DevResult<DeviceData> {
        match self {
            Reply::Ok { value } => Ok(value),
            Reply::Failed { errors } => Err(DevFailed::from_records(errors)),
        }
    }
}

fn communication_failed(desc: String, origin: &str) -> DevFailed {
    DevFailed::new(reasons::COMMUNICATION_FAILED, desc, origin)
}

/// Serialize a message as one LF-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> DevResult<Vec<u8>> {
    let mut line = serde_json::to_vec(message)
        .map_err(|e| communication_failed(format!("Cannot encode message: {e}"), "wire::encode_line"))?;
    line.push(b'\n');
    Ok(line)
}

/// Parse one line (with or without terminator).
pub fn decode_line<'de, T: Deserialize<'de>>(line: &'de str) -> DevResult<T> {
    serde_json::from_str(line.trim_end_matches(['\r', '\n'])).map_err(|e| {
        communication_failed(format!("Malformed message: {e}"), "wire::decode_line")
    })
}

/// Read one LF-terminated line, bounded by [`MAX_LINE_BYTES`].
///
/// Returns `Ok(None)` on a clean end of stream before any byte was read.
pub fn read_line<R: BufRead>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut bytes = Vec::new();
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            if bytes.is_empty() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed in the middle of a message",
            ));
        }

        let (consumed, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        bytes.extend_from_slice(&available[..consumed]);
        reader.consume(consumed);

        if bytes.len() > MAX_LINE_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("message exceeds {MAX_LINE_BYTES} bytes"),
            ));
        }
        if done {
            break;
        }
    }

    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    #[test]
    fn test_request_shape() {
        let request = Request {
            device: "det/xpad/xpad.1".to_string(),
            call: Call::Command {
                name: "LoadConfig".to_string(),
                arg: DeviceData::LongArray(vec![4, 0]),
            },
        };
        let line = String::from_utf8(encode_line(&request).unwrap()).unwrap();
        assert_eq!(
            line,
            "{\"device\":\"det/xpad/xpad.1\",\"op\":\"command\",\"name\":\"LoadConfig\",\"arg\":{\"type\":\"long_array\",\"value\":[4,0]}}\n"
        );
        let back: Request = decode_line(&line).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_command_arg_defaults_to_void() {
        let request: Request =
            decode_line(r#"{"device":"a/b/c","op":"command","name":"Snap"}"#).unwrap();
        assert_eq!(
            request.call,
            Call::Command {
                name: "Snap".to_string(),
                arg: DeviceData::Void
            }
        );
    }

    #[test]
    fn test_failed_reply_into_result() {
        let reply: Reply = decode_line(
            r#"{"status":"failed","errors":[{"reason":"R","desc":"D","origin":"O","severity":"WARN"}]}"#,
        )
        .unwrap();
        let failure = reply.into_result().unwrap_err();
        assert_eq!(failure.reason(), Some("R"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_line::<Reply>("not json").unwrap_err();
        assert_eq!(err.reason(), Some(reasons::COMMUNICATION_FAILED));
    }

    #[test]
    fn test_read_line_splits_messages() {
        let mut reader = BufReader::new(Cursor::new(b"one\ntwo\n".to_vec()));
        assert_eq!(read_line(&mut reader).unwrap().as_deref(), Some("one\n"));
        assert_eq!(read_line(&mut reader).unwrap().as_deref(), Some("two\n"));
        assert_eq!(read_line(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_read_line_truncated_message() {
        let mut reader = BufReader::new(Cursor::new(b"partial".to_vec()));
        let err = read_line(&mut reader).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_line_enforces_limit() {
        let data = vec![b'x'; MAX_LINE_BYTES + 10];
        let mut reader = BufReader::new(Cursor::new(data));
        let err = read_line(&mut reader).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
