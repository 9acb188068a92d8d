//! Verification of signed URLs, mirroring what a CDN edge does with them.

use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::{
    scheme::{SignatureScheme, SIGOPTS_PARAM, SIG_PARAM},
    signature::{get_signature_with_scheme, SignError},
    uri::IntoUri,
};

#[derive(Debug, Error)]
pub enum VerifyError {
    /// The URL could not be parsed, or the signature could not be recomputed.
    #[error(transparent)]
    Sign(#[from] SignError),

    /// The URL carries no `sig` parameter.
    #[error("URL is not signed")]
    MissingSignature,

    /// The embedded signature does not match the recomputed one.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// `sigopts` is present but does not decode to a JSON object.
    #[error("invalid sigopts: {0}")]
    InvalidOptions(String),

    /// The `until` option lies in the past.
    #[error("URL expired at {until}")]
    Expired { until: DateTime<Utc> },
}

/// Decoded `sigopts` of a verified URL.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct SignatureOptions {
    /// Expiry of the URL, if one was signed in.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,

    /// Any other options, kept as raw JSON.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Verify `url` against `sign_key` using the current [SignatureScheme], treating `now`
/// as the current time for expiry checks.
pub fn verify_url<U: IntoUri>(
        url: U,
        sign_key: impl AsRef<[u8]>,
        now: DateTime<Utc>,
    ) -> Result<SignatureOptions, VerifyError> {
    verify_url_with_scheme(SignatureScheme::default(), url, sign_key, now)
}

/// Like [verify_url], reading the system clock.
pub fn verify_url_now<U: IntoUri>(
        url: U,
        sign_key: impl AsRef<[u8]>,
    ) -> Result<SignatureOptions, VerifyError> {
    verify_url(url, sign_key, Utc::now())
}

/// Verify `url` using an explicit wire-format `scheme`.
///
/// The embedded `sig` is compared in constant time against the signature recomputed
/// over the URL with `sig` removed. On success the decoded `sigopts` are returned
/// (empty if the URL has none).
pub fn verify_url_with_scheme<U: IntoUri>(
        scheme: SignatureScheme,
        url: U,
        sign_key: impl AsRef<[u8]>,
        now: DateTime<Utc>,
    ) -> Result<SignatureOptions, VerifyError> {
    let uri = url.into_uri()?;
    let embedded = uri.query_value(SIG_PARAM).ok_or(VerifyError::MissingSignature)?;
    let expected = get_signature_with_scheme(scheme, &uri, sign_key)?;
    if !bool::from(embedded.as_bytes().ct_eq(expected.as_bytes())) {
        log::debug!("signature mismatch for {}", uri.path());
        return Err(VerifyError::SignatureMismatch);
    }

    let options = match uri.query_value(SIGOPTS_PARAM) {
        Some(raw) => decode_options(scheme, raw)?,
        None => SignatureOptions::default(),
    };
    if let Some(until) = options.until {
        if until < now {
            log::debug!("signed URL {} expired at {}", uri.path(), until);
            return Err(VerifyError::Expired { until });
        }
    }
    Ok(options)
}

fn decode_options(scheme: SignatureScheme, raw: &str) -> Result<SignatureOptions, VerifyError> {
    let invalid = |err: &dyn std::fmt::Display| VerifyError::InvalidOptions(err.to_string());
    let decoded = urlencoding::decode(raw).map_err(|err| invalid(&err))?;
    let json = match scheme {
        SignatureScheme::V1 => {
            let outer = general_purpose::STANDARD.decode(decoded.as_bytes())
                .map_err(|err| invalid(&err))?;
            serde_json::from_slice::<String>(&outer).map_err(|err| invalid(&err))?
        }
        SignatureScheme::V2 => decoded.into_owned(),
    };
    serde_json::from_str(&json).map_err(|err| invalid(&err))
}
