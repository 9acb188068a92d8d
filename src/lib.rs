//! Deterministic URL signing for CDN edge verification.
//!
//! A signed URL carries a `sig` query parameter: the first 16 hex characters of
//! `SHA-256(canonical-path-and-query ":" key)`. Optional metadata such as an expiry
//! travels in a `sigopts` parameter that is covered by the signature, so an edge that
//! knows the key can reject tampered or expired URLs without any server-side state.
//!
//! ```
//! use chrono::{TimeZone, Utc};
//!
//! let until = Utc.with_ymd_and_hms(2024, 1, 1, 0, 3, 0).unwrap();
//! let signed = url_sign::sign_url("https://cdn.example/image.jpg", "secret", Some(&until)).unwrap();
//! assert!(signed.to_string().starts_with(
//!     "https://cdn.example/image.jpg?sigopts=%7B%22until%22%3A%222024-01-01T00%3A05%3A00%2B00%3A00%22%7D&sig="));
//! ```
#![forbid(unsafe_code)]

mod digest;
mod scheme;
mod signature;
pub mod uri;
pub mod verify;

pub use digest::{SIGNATURE_LEN, truncated_sha256_hex};

pub use scheme::{
    SignatureScheme,
    SIG_PARAM,
    SIGOPTS_PARAM,
};

pub use signature::{
    DEFAULT_ROUND_DATE_UP_TO,
    SignError,
    get_signature,
    get_signature_with_scheme,
    round_expiry,
    sign_url,
    sign_url_rounded,
    sign_url_unexpiring,
    sign_url_with_options,
    sign_url_with_scheme,
};

pub use uri::{IntoUri, Uri};

pub use verify::{
    SignatureOptions,
    VerifyError,
    verify_url,
    verify_url_now,
    verify_url_with_scheme,
};
