use std::io::{self, Write};

use base64::{engine::general_purpose, Engine};
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::{signature::SignError, uri::Uri};

/// Query parameter carrying the truncated digest.
pub const SIG_PARAM: &str = "sig";

/// Query parameter carrying the encoded signature options.
pub const SIGOPTS_PARAM: &str = "sigopts";

/// Which version of the URL signing wire format is used. The scheme determines how the
/// options payload is encoded into `sigopts` and how the signing string fed to SHA-256
/// is assembled. Signer and verifier (usually a CDN edge) must agree on the scheme.
///
/// In both schemes the canonical path is the URL path followed by `?` and the raw query
/// string when the query is non-empty, with a `/` prepended if it does not already start
/// with one.
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, Hash)]
pub enum SignatureScheme {
    /// The legacy format.
    ///
    /// `sigopts` is `pct(base64(json(json(options))))`: the options JSON is itself
    /// encoded as a JSON string literal before base64, with `/` and non-ASCII characters
    /// escaped the way PHP's `json_encode` escapes them. `sig` and `sigopts` are both
    /// removed from the query before signing, and the base64 payload is spliced into the
    /// signing string instead:
    ///
    /// ```text
    /// canonical ":" [ base64-options ] ":" key
    /// ```
    V1,

    /// The current format, and the default.
    ///
    /// `sigopts` is `pct(json(options))` and is attached to the URL before signing, so it
    /// is covered as part of the query. Only `sig` is removed before signing:
    ///
    /// ```text
    /// canonical ":" key
    /// ```
    #[default]
    V2,
}

impl SignatureScheme {
    /// Encode `options` into the `sigopts` payload, before percent-encoding.
    pub fn encode_options<O>(&self, options: &O) -> Result<String, SignError>
        where O: Serialize + ?Sized,
    {
        match self {
            SignatureScheme::V1 => {
                let inner = to_php_json(options)?;
                let outer = to_php_json(&inner)?;
                Ok(general_purpose::STANDARD.encode(outer))
            }
            SignatureScheme::V2 => serde_json::to_string(options).map_err(SignError::Encoding),
        }
    }

    /// Build the exact byte string that gets hashed for `uri`.
    ///
    /// Any `sig` parameter on `uri` is ignored. For [SignatureScheme::V1] the options
    /// payload is read back from the `sigopts` parameter, so `uri` must look exactly like
    /// the signed URL.
    pub fn signing_input(&self, uri: &Uri, sign_key: impl AsRef<[u8]>) -> Result<Bytes, SignError> {
        let sign_key = sign_key.as_ref();
        if sign_key.is_empty() {
            return Err(SignError::EmptyKey);
        }
        let unsigned = uri.clone().without_query_value(SIG_PARAM);
        let mut buffer = BytesMut::with_capacity(unsigned.path().len() + unsigned.query().len() + 64);
        match self {
            SignatureScheme::V1 => {
                let options = match unsigned.query_value(SIGOPTS_PARAM) {
                    Some(raw) => Some(urlencoding::decode(raw)
                        .map_err(|err| SignError::InvalidOptions(err.to_string()))?
                        .into_owned()),
                    None => None,
                };
                write_canonical(&mut buffer, &unsigned.without_query_value(SIGOPTS_PARAM));
                buffer.put_u8(b':');
                if let Some(options) = options {
                    buffer.extend_from_slice(options.as_bytes());
                }
                buffer.put_u8(b':');
            }
            SignatureScheme::V2 => {
                write_canonical(&mut buffer, &unsigned);
                buffer.put_u8(b':');
            }
        }
        buffer.extend_from_slice(sign_key);
        Ok(buffer.freeze())
    }
}

fn write_canonical(buffer: &mut BytesMut, uri: &Uri) {
    let path = uri.path();
    if !path.starts_with('/') {
        buffer.put_u8(b'/');
    }
    buffer.extend_from_slice(path.as_bytes());
    let query = uri.query();
    if !query.is_empty() {
        buffer.put_u8(b'?');
        buffer.extend_from_slice(query.as_bytes());
    }
}

fn to_php_json<O: Serialize + ?Sized>(value: &O) -> Result<String, SignError> {
    let mut out = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, PhpFormatter);
    value.serialize(&mut serializer).map_err(SignError::Encoding)?;
    String::from_utf8(out)
        .map_err(|err| SignError::Encoding(serde::ser::Error::custom(err)))
}

/// JSON formatter matching the default escaping of PHP's `json_encode`, which legacy
/// verifiers reproduce byte for byte.
struct PhpFormatter;

impl serde_json::ser::Formatter for PhpFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
        where W: ?Sized + Write,
    {
        let mut start = 0;
        for (index, c) in fragment.char_indices() {
            if c != '/' && c.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..index].as_bytes())?;
            if c == '/' {
                writer.write_all(b"\\/")?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
            start = index + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}
