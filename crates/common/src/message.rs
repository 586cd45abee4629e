//! Line-oriented wire messages.
//!
//! Every message is a single `verb(arg, ...)` line whose arguments are
//!  JSON values, optionally named with a `key=` prefix:
//!
//! ```text
//! propose(["bucket","path"], "datum", [t0, t1])
//! dismiss(["bucket","path"], "datum", [t0, null])
//! signed(mtype="signed", what="<hash>", peerid="<signer>", signature="<sig>")
//! ping()
//! pong()
//! ```
//!
//! Rendering is canonical, so a message built in memory hashes the same
//!  as the text a peer would have signed for it.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::bucket::Address;
use crate::clock::Timestamp;
use crate::validity::Validity;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouldNotInterpret {
    #[error("not of the form verb(args): {0:?}")]
    Syntax(String),
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),
    #[error("bad arguments for {verb}: {reason}")]
    Arguments { verb: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Propose {
        bucket: Address,
        data: String,
        validity: Validity,
    },
    Dismiss {
        bucket: Address,
        data: String,
        validity: Validity,
    },
    /// `signer` vouches for the message whose content hash is `what`
    Signature {
        what: String,
        signer: String,
        signature: String,
    },
    Ping,
    Pong,
}

impl Message {
    pub fn propose(bucket: &[String], data: impl Into<String>, validity: Validity) -> Self {
        Message::Propose {
            bucket: bucket.to_vec(),
            data: data.into(),
            validity,
        }
    }

    pub fn dismiss(bucket: &[String], data: impl Into<String>, validity: Validity) -> Self {
        Message::Dismiss {
            bucket: bucket.to_vec(),
            data: data.into(),
            validity,
        }
    }

    pub fn signature(
        what: impl Into<String>,
        signer: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Message::Signature {
            what: what.into(),
            signer: signer.into(),
            signature: signature.into(),
        }
    }

    pub fn interpret(line: &str) -> Result<Self, CouldNotInterpret> {
        let line = line.trim();
        let open = line
            .find('(')
            .ok_or_else(|| CouldNotInterpret::Syntax(line.to_string()))?;
        if !line.ends_with(')') {
            return Err(CouldNotInterpret::Syntax(line.to_string()));
        }
        let verb = line[..open].trim();
        let args = parse_args(verb, &line[open + 1..line.len() - 1])?;

        match verb {
            "propose" | "dismiss" => {
                let [bucket, data, validity] = positional::<3>(verb, args)?;
                let bucket = as_address(verb, bucket)?;
                let data = as_string(verb, "data", data)?;
                let validity = as_validity(verb, validity)?;
                Ok(if verb == "propose" {
                    Message::Propose {
                        bucket,
                        data,
                        validity,
                    }
                } else {
                    Message::Dismiss {
                        bucket,
                        data,
                        validity,
                    }
                })
            }
            "signed" => {
                let mut what = None;
                let mut signer = None;
                let mut signature = None;
                for (name, value) in args {
                    let Some(name) = name else {
                        return Err(bad(verb, "expected keyword arguments"));
                    };
                    match name.as_str() {
                        "mtype" => {
                            if value != Value::String("signed".to_string()) {
                                return Err(bad(verb, "mtype must be \"signed\""));
                            }
                        }
                        "what" => what = Some(as_string(verb, "what", value)?),
                        "peerid" => signer = Some(as_string(verb, "peerid", value)?),
                        "signature" => signature = Some(as_string(verb, "signature", value)?),
                        other => return Err(bad(verb, &format!("unexpected keyword {}", other))),
                    }
                }
                match (what, signer, signature) {
                    (Some(what), Some(signer), Some(signature)) => Ok(Message::Signature {
                        what,
                        signer,
                        signature,
                    }),
                    _ => Err(bad(verb, "requires what, peerid and signature")),
                }
            }
            "ping" | "pong" => {
                if !args.is_empty() {
                    return Err(bad(verb, "takes no arguments"));
                }
                Ok(if verb == "ping" {
                    Message::Ping
                } else {
                    Message::Pong
                })
            }
            other => Err(CouldNotInterpret::UnknownVerb(other.to_string())),
        }
    }

    /// Canonical wire text
    pub fn to_wire(&self) -> String {
        self.to_string()
    }
}

impl FromStr for Message {
    type Err = CouldNotInterpret;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Message::interpret(s)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Propose {
                bucket,
                data,
                validity,
            } => write!(f, "propose({}, {}, {})", json(bucket), json(data), validity),
            Message::Dismiss {
                bucket,
                data,
                validity,
            } => write!(f, "dismiss({}, {}, {})", json(bucket), json(data), validity),
            Message::Signature {
                what,
                signer,
                signature,
            } => write!(
                f,
                "signed(mtype=\"signed\", what={}, peerid={}, signature={})",
                json(what),
                json(signer),
                json(signature)
            ),
            Message::Ping => write!(f, "ping()"),
            Message::Pong => write!(f, "pong()"),
        }
    }
}

/// Content address of a wire message: hex SHA-256 of its exact text
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn bad(verb: &str, reason: &str) -> CouldNotInterpret {
    CouldNotInterpret::Arguments {
        verb: verb.to_string(),
        reason: reason.to_string(),
    }
}

type Arg = (Option<String>, Value);

fn parse_args(verb: &str, inner: &str) -> Result<Vec<Arg>, CouldNotInterpret> {
    let mut args = Vec::new();
    let mut rest = inner.trim_start();
    while !rest.is_empty() {
        let (name, after) = split_keyword(rest);
        let mut stream = serde_json::Deserializer::from_str(after).into_iter::<Value>();
        let value = match stream.next() {
            Some(Ok(value)) => value,
            Some(Err(e)) => return Err(bad(verb, &e.to_string())),
            None => return Err(bad(verb, "missing argument")),
        };
        rest = after[stream.byte_offset()..].trim_start();
        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
            if rest.is_empty() {
                return Err(bad(verb, "trailing comma"));
            }
        } else if !rest.is_empty() {
            return Err(bad(verb, "expected a comma between arguments"));
        }
        args.push((name, value));
    }
    Ok(args)
}

/// Split a leading `ident=` off an argument, if present
fn split_keyword(s: &str) -> (Option<String>, &str) {
    let ident_len = s
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_alphabetic() || *c == '_' || (*i > 0 && c.is_ascii_digit()))
        .count();
    if ident_len == 0 {
        return (None, s);
    }
    match s[ident_len..].trim_start().strip_prefix('=') {
        Some(after) => (Some(s[..ident_len].to_string()), after.trim_start()),
        None => (None, s),
    }
}

fn positional<const N: usize>(verb: &str, args: Vec<Arg>) -> Result<[Value; N], CouldNotInterpret> {
    if args.iter().any(|(name, _)| name.is_some()) {
        return Err(bad(verb, "expected positional arguments"));
    }
    let count = args.len();
    args.into_iter()
        .map(|(_, value)| value)
        .collect::<Vec<_>>()
        .try_into()
        .map_err(|_| bad(verb, &format!("expected {} arguments, got {}", N, count)))
}

fn as_string(verb: &str, what: &str, value: Value) -> Result<String, CouldNotInterpret> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(bad(verb, &format!("{} must be a string, got {}", what, other))),
    }
}

fn as_address(verb: &str, value: Value) -> Result<Address, CouldNotInterpret> {
    match value {
        Value::String(s) => Ok(vec![s]),
        Value::Array(parts) => parts
            .into_iter()
            .map(|part| as_string(verb, "bucket segment", part))
            .collect(),
        other => Err(bad(verb, &format!("bucket must be a list, got {}", other))),
    }
}

fn as_bound(verb: &str, value: &Value) -> Result<Option<Timestamp>, CouldNotInterpret> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(whole_seconds))
            .map(Some)
            .ok_or_else(|| bad(verb, &format!("bad timestamp {}", n))),
        other => Err(bad(verb, &format!("bad timestamp {}", other))),
    }
}

/// Floor a fractional timestamp, `None` when it does not fit an `i64`
fn whole_seconds(f: f64) -> Option<Timestamp> {
    let floored = f.floor();
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    if floored.is_finite() && floored >= i64::MIN as f64 && floored < i64::MAX as f64 {
        Some(floored as Timestamp)
    } else {
        None
    }
}

fn as_validity(verb: &str, value: Value) -> Result<Validity, CouldNotInterpret> {
    match value {
        Value::Array(bounds) if bounds.len() == 2 => Ok(Validity::new(
            as_bound(verb, &bounds[0])?,
            as_bound(verb, &bounds[1])?,
        )),
        other => Err(bad(verb, &format!("validity must be [t0, t1], got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> Address {
        vec!["files".to_string()]
    }

    #[test]
    fn test_interpret_propose() {
        let m = Message::interpret(r#"propose(["files"], "h1", [100, 200])"#).unwrap();
        assert_eq!(m, Message::propose(&files(), "h1", Validity::between(100, 200)));
    }

    #[test]
    fn test_interpret_dismiss_with_open_end() {
        let m = Message::interpret(r#"dismiss(["a", "b"], "x", [5, null])"#).unwrap();
        let path = vec!["a".to_string(), "b".to_string()];
        assert_eq!(m, Message::dismiss(&path, "x", Validity::since(5)));
    }

    #[test]
    fn test_interpret_fractional_timestamps() {
        let m = Message::interpret(r#"propose(["files"], "h1", [1.9, null])"#).unwrap();
        assert_eq!(m, Message::propose(&files(), "h1", Validity::since(1)));
    }

    #[test]
    fn test_out_of_range_timestamps() {
        for line in [
            r#"propose(["files"], "x", [-1e300, null])"#,
            r#"propose(["files"], "x", [0, 1e19])"#,
            r#"dismiss(["files"], "x", [18446744073709551615, null])"#,
        ] {
            assert!(
                matches!(
                    Message::interpret(line),
                    Err(CouldNotInterpret::Arguments { .. })
                ),
                "accepted {:?}",
                line
            );
        }
        assert!(Message::interpret(r#"propose(["files"], "x", [-9.0e18, null])"#).is_ok());
    }

    #[test]
    fn test_interpret_signature() {
        let m = Message::interpret(
            r#"signed(mtype="signed", what="abc", peerid="alice", signature="sig")"#,
        )
        .unwrap();
        assert_eq!(m, Message::signature("abc", "alice", "sig"));
    }

    #[test]
    fn test_interpret_ping_pong() {
        assert_eq!(Message::interpret("ping()").unwrap(), Message::Ping);
        assert_eq!(Message::interpret("  pong( ) ").unwrap(), Message::Pong);
    }

    #[test]
    fn test_rendering_is_canonical() {
        let m = Message::propose(&files(), "h1", Validity::since(0));
        assert_eq!(m.to_wire(), r#"propose(["files"], "h1", [0, null])"#);
        assert_eq!(Message::interpret(&m.to_wire()).unwrap(), m);

        let s = Message::signature("abc", "alice", "sig");
        assert_eq!(
            s.to_wire(),
            r#"signed(mtype="signed", what="abc", peerid="alice", signature="sig")"#
        );
    }

    #[test]
    fn test_rendering_escapes_quotes() {
        let m = Message::propose(&files(), "a \"quoted\" value", Validity::forever());
        assert_eq!(Message::interpret(&m.to_wire()).unwrap(), m);
    }

    #[test]
    fn test_malformed_lines() {
        for line in [
            "",
            "propose",
            r#"propose(["files"], "h1", [0, null]"#,
            r#"propose(["files"], "h1")"#,
            r#"propose(["files"], 3, [0, null])"#,
            r#"propose(["files"], "h1", [0])"#,
            r#"propose(["files"] "h1", [0, null])"#,
            r#"propose(["files"], "h1", [0, null],)"#,
            r#"signed(what="abc", peerid="alice")"#,
            "ping(1)",
            "hello()",
        ] {
            assert!(Message::interpret(line).is_err(), "accepted {:?}", line);
        }
    }

    #[test]
    fn test_content_hash_is_hex_sha256() {
        let h = content_hash("ping()");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash("ping()"));
        assert_ne!(h, content_hash("pong()"));
    }
}
