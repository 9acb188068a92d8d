use std::{fmt, str::FromStr};

use crate::signature::SignError;

/// An immutable URL value that keeps every component exactly as it was written.
///
/// Unlike a fully normalizing URL parser, [Uri] never re-encodes or reorders anything.
/// Only the query parameters touched through [Uri::with_query_value] and
/// [Uri::without_query_value] change; everything else serializes back byte for byte.
/// This matters because the signature covers the raw path and query exactly as the
/// CDN will see them.
///
/// Scheme and authority are optional, so both `https://cdn.example/a.jpg?w=10` and
/// `/a.jpg?w=10` are valid inputs.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Uri {
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

impl Uri {
    /// Parse a URL string. See [SignError::MalformedUrl] for what gets rejected.
    pub fn parse(input: &str) -> Result<Self, SignError> {
        if let Some(bad) = input.chars().find(|c| c.is_ascii_control() || c.is_whitespace()) {
            return Err(SignError::MalformedUrl(format!(
                "unexpected character {:?} in {:?}", bad, input)));
        }

        let (rest, fragment) = match input.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment.to_string())),
            None => (input, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query.to_string())),
            None => (rest, None),
        };

        let (scheme, rest) = match split_scheme(rest) {
            Some((scheme, rest)) => (Some(scheme.to_string()), rest),
            None => (None, rest),
        };

        let (authority, path) = match rest.strip_prefix("//") {
            Some(after) => {
                let end = after.find('/').unwrap_or(after.len());
                let (authority, path) = after.split_at(end);
                validate_authority(authority, input)?;
                (Some(authority.to_string()), path)
            }
            None => (None, rest),
        };

        Ok(Self {
            scheme,
            authority,
            path: path.to_string(),
            query,
            fragment,
        })
    }

    /// The scheme, without the trailing `:`.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// The authority (`user@host:port`), without the leading `//`.
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// The host part of the authority, if any. IPv6 literals keep their brackets.
    pub fn host(&self) -> Option<&str> {
        self.authority.as_deref().map(|authority| split_host_port(authority).0)
    }

    /// The port part of the authority, if one was given.
    pub fn port(&self) -> Option<u16> {
        self.authority.as_deref()
            .and_then(|authority| split_host_port(authority).1)
            .and_then(|port| port.parse().ok())
    }

    /// The raw path. May be empty, and may not start with `/` for relative inputs.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, without the leading `?`. Empty if there is none.
    pub fn query(&self) -> &str {
        self.query.as_deref().unwrap_or("")
    }

    /// The fragment, without the leading `#`.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Returns the raw (still percent-encoded) value of the first query parameter
    /// whose decoded name equals `key`. A parameter without `=` yields `""`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query_pairs()
            .find(|pair| pair_has_key(pair, key))
            .map(|pair| pair.split_once('=').map(|(_, value)| value).unwrap_or(""))
    }

    /// Returns true if any query parameter has the decoded name `key`.
    pub fn has_query_value(&self, key: &str) -> bool {
        self.query_pairs().any(|pair| pair_has_key(pair, key))
    }

    /// Removes every query parameter named `key` and appends `key=value` at the end of
    /// the query. `value` is inserted as given, so it must already be percent-encoded;
    /// only `&`, `=` and `#` are escaped so the query structure stays intact.
    pub fn with_query_value(self, key: &str, value: &str) -> Self {
        let mut uri = self.without_query_value(key);
        let pair = format!("{}={}", escape_query_part(key), escape_query_part(value));
        uri.query = Some(match uri.query.take() {
            Some(query) if !query.is_empty() => format!("{}&{}", query, pair),
            _ => pair,
        });
        uri
    }

    /// Removes every query parameter named `key`, keeping the order and exact encoding
    /// of the others. A query left empty is dropped entirely.
    pub fn without_query_value(mut self, key: &str) -> Self {
        if !self.has_query_value(key) {
            return self;
        }
        let kept = self.query_pairs()
            .filter(|pair| !pair_has_key(pair, key))
            .collect::<Vec<_>>()
            .join("&");
        self.query = if kept.is_empty() { None } else { Some(kept) };
        self
    }

    fn query_pairs(&self) -> impl Iterator<Item = &str> {
        self.query.as_deref()
            .filter(|query| !query.is_empty())
            .into_iter()
            .flat_map(|query| query.split('&'))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}:", scheme)?;
        }
        if let Some(authority) = &self.authority {
            write!(f, "//{}", authority)?;
        }
        f.write_str(&self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = SignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.to_string()
    }
}

/// Anything the signing functions accept as a URL: strings are parsed, [Uri] values
/// are used as they are.
///
/// Support for URL types from other crates can be enabled with the following
/// **features**, all of which are off by default.
/// - `http`: the [http](https://crates.io/crates/http) crate's `Uri`.
/// - `url`: the [url](https://crates.io/crates/url) crate's `Url`.
pub trait IntoUri {
    /// Convert into a [Uri], failing with [SignError::MalformedUrl] if the input
    /// cannot be parsed.
    fn into_uri(self) -> Result<Uri, SignError>;
}

impl IntoUri for Uri {
    fn into_uri(self) -> Result<Uri, SignError> {
        Ok(self)
    }
}

impl IntoUri for &Uri {
    fn into_uri(self) -> Result<Uri, SignError> {
        Ok(self.clone())
    }
}

impl IntoUri for &str {
    fn into_uri(self) -> Result<Uri, SignError> {
        Uri::parse(self)
    }
}

impl IntoUri for String {
    fn into_uri(self) -> Result<Uri, SignError> {
        Uri::parse(&self)
    }
}

impl IntoUri for &String {
    fn into_uri(self) -> Result<Uri, SignError> {
        Uri::parse(self)
    }
}

fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let colon = input.find(':')?;
    let scheme = &input[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic()
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }
    Some((scheme, &input[colon + 1..]))
}

fn split_host_port(authority: &str) -> (&str, Option<&str>) {
    let host_port = authority.rsplit_once('@').map(|(_, hp)| hp).unwrap_or(authority);
    if host_port.starts_with('[') {
        return match host_port.find(']') {
            Some(end) => {
                let (host, rest) = host_port.split_at(end + 1);
                (host, rest.strip_prefix(':'))
            }
            None => (host_port, None),
        };
    }
    match host_port.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (host_port, None),
    }
}

fn validate_authority(authority: &str, input: &str) -> Result<(), SignError> {
    let (host, port) = split_host_port(authority);
    if host.starts_with('[') && !host.ends_with(']') {
        return Err(SignError::MalformedUrl(format!("unterminated IPv6 host in {:?}", input)));
    }
    if let Some(port) = port {
        if host.is_empty() {
            return Err(SignError::MalformedUrl(format!("port without host in {:?}", input)));
        }
        if !port.is_empty() && port.parse::<u16>().is_err() {
            return Err(SignError::MalformedUrl(format!("invalid port {:?} in {:?}", port, input)));
        }
    }
    Ok(())
}

fn pair_has_key(pair: &str, key: &str) -> bool {
    let name = pair.split_once('=').map(|(name, _)| name).unwrap_or(pair);
    match urlencoding::decode(name) {
        Ok(decoded) => decoded == key,
        Err(_) => name == key,
    }
}

fn escape_query_part(part: &str) -> String {
    part.replace('&', "%26").replace('=', "%3D").replace('#', "%23")
}

/// Adds support for the [http](https://crates.io/crates/http) crate's `Uri` as an
/// input URL.
///
/// Requires the `http` feature to be enabled.
#[cfg(feature = "http")]
mod http {
    use super::{IntoUri, Uri};
    use crate::signature::SignError;

    impl IntoUri for ::http::Uri {
        fn into_uri(self) -> Result<Uri, SignError> {
            (&self).into_uri()
        }
    }

    impl IntoUri for &::http::Uri {
        fn into_uri(self) -> Result<Uri, SignError> {
            Uri::parse(&self.to_string())
        }
    }

    impl TryFrom<Uri> for ::http::Uri {
        type Error = SignError;

        fn try_from(uri: Uri) -> Result<Self, Self::Error> {
            let text = uri.to_string();
            text.parse().map_err(|err: ::http::uri::InvalidUri| {
                SignError::MalformedUrl(format!("{}: {:?}", err, text))
            })
        }
    }
}

/// Adds support for the [url](https://crates.io/crates/url) crate's `Url` as an
/// input URL.
///
/// Requires the `url` feature to be enabled.
#[cfg(feature = "url")]
mod url {
    use super::{IntoUri, Uri};
    use crate::signature::SignError;

    impl IntoUri for ::url::Url {
        fn into_uri(self) -> Result<Uri, SignError> {
            Uri::parse(self.as_str())
        }
    }

    impl IntoUri for &::url::Url {
        fn into_uri(self) -> Result<Uri, SignError> {
            Uri::parse(self.as_str())
        }
    }

    impl TryFrom<Uri> for ::url::Url {
        type Error = SignError;

        fn try_from(uri: Uri) -> Result<Self, Self::Error> {
            let text = uri.to_string();
            ::url::Url::parse(&text)
                .map_err(|err| SignError::MalformedUrl(format!("{}: {:?}", err, text)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute_url() {
        let uri = Uri::parse("https://user@cdn.example:8443/dir/a.jpg?w=10&h=20#top").unwrap();
        assert_eq!(uri.scheme(), Some("https"));
        assert_eq!(uri.authority(), Some("user@cdn.example:8443"));
        assert_eq!(uri.host(), Some("cdn.example"));
        assert_eq!(uri.port(), Some(8443));
        assert_eq!(uri.path(), "/dir/a.jpg");
        assert_eq!(uri.query(), "w=10&h=20");
        assert_eq!(uri.fragment(), Some("top"));
    }

    #[test]
    fn test_parse_relative_inputs() {
        let uri = Uri::parse("foo/bar?a=1").unwrap();
        assert_eq!(uri.scheme(), None);
        assert_eq!(uri.authority(), None);
        assert_eq!(uri.path(), "foo/bar");
        assert_eq!(uri.query(), "a=1");

        let empty = Uri::parse("").unwrap();
        assert_eq!(empty.path(), "");
        assert_eq!(empty.query(), "");
    }

    #[test]
    fn test_parse_ipv6_host() {
        let uri = Uri::parse("http://[::1]:8080/x").unwrap();
        assert_eq!(uri.host(), Some("[::1]"));
        assert_eq!(uri.port(), Some(8080));
        assert_eq!(uri.path(), "/x");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["http://:80/x", "http://host:http/x", "/a b.jpg", "http://[::1/x", "/a\n"] {
            match Uri::parse(input) {
                Err(SignError::MalformedUrl(_)) => {}
                other => panic!("expected MalformedUrl for {:?}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_round_trip_preserves_encoding() {
        for input in [
            "https://cdn.example/a%20b.jpg?x=%7E&y=a+b&&z#frag",
            "//cdn.example/path?",
            "file:///etc/hosts",
            "mailto:someone@example.com",
            "relative/path",
        ] {
            assert_eq!(Uri::parse(input).unwrap().to_string(), input);
        }
    }

    #[test]
    fn test_with_query_value_replaces_and_appends() {
        let uri = Uri::parse("/a.jpg?sig=old&w=10&sig=older&h=20").unwrap();
        let uri = uri.with_query_value("sig", "new");
        assert_eq!(uri.query(), "w=10&h=20&sig=new");
        assert_eq!(uri.query_value("sig"), Some("new"));
    }

    #[test]
    fn test_with_query_value_on_empty_query() {
        let uri = Uri::parse("/a.jpg?").unwrap().with_query_value("sig", "abc");
        assert_eq!(uri.to_string(), "/a.jpg?sig=abc");
    }

    #[test]
    fn test_with_query_value_escapes_structure() {
        let uri = Uri::parse("/a.jpg").unwrap().with_query_value("k", "a&b=c#d");
        assert_eq!(uri.query(), "k=a%26b%3Dc%23d");
    }

    #[test]
    fn test_without_query_value_keeps_other_pairs() {
        let uri = Uri::parse("/a.jpg?b=2&sigopts=x&a=%41#f").unwrap();
        let uri = uri.without_query_value("sigopts");
        assert_eq!(uri.to_string(), "/a.jpg?b=2&a=%41#f");
        let uri = uri.without_query_value("missing");
        assert_eq!(uri.to_string(), "/a.jpg?b=2&a=%41#f");
    }

    #[test]
    fn test_without_query_value_drops_empty_query() {
        let uri = Uri::parse("https://cdn.example/a.jpg?sig=1").unwrap();
        assert_eq!(uri.without_query_value("sig").to_string(), "https://cdn.example/a.jpg");
    }

    #[test]
    fn test_query_keys_are_compared_decoded() {
        let uri = Uri::parse("/a.jpg?s%69g=1&flag").unwrap();
        assert!(uri.has_query_value("sig"));
        assert_eq!(uri.query_value("flag"), Some(""));
        assert_eq!(uri.without_query_value("sig").query(), "flag");
    }

    #[test]
    fn test_into_uri_inputs() {
        let from_str = "/a.jpg?x=1".into_uri().unwrap();
        let from_string = String::from("/a.jpg?x=1").into_uri().unwrap();
        let from_ref = (&from_str).into_uri().unwrap();
        assert_eq!(from_str, from_string);
        assert_eq!(from_str, from_ref);
        assert_eq!(String::from(from_ref), "/a.jpg?x=1");
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_into_uri_from_http() {
        let http_uri: ::http::Uri = "https://cdn.example/a.jpg?w=1".parse().unwrap();
        let uri = http_uri.into_uri().unwrap();
        assert_eq!(uri.path(), "/a.jpg");
        assert_eq!(uri.query(), "w=1");

        let signed = crate::sign_url_unexpiring(uri, "k").unwrap();
        let expected = signed.to_string();
        let back = ::http::Uri::try_from(signed).unwrap();
        assert_eq!(back.to_string(), expected);
        assert_eq!(back.path(), "/a.jpg");
        assert!(back.query().unwrap().starts_with("w=1&sig="));
    }

    #[cfg(feature = "url")]
    #[test]
    fn test_into_uri_from_url() {
        let url = ::url::Url::parse("https://cdn.example/a.jpg?w=1").unwrap();
        let uri = url.into_uri().unwrap();
        assert_eq!(uri.host(), Some("cdn.example"));
        assert_eq!(uri.query(), "w=1");

        let signed = crate::sign_url_unexpiring(uri, "k").unwrap();
        let expected = signed.to_string();
        let back = ::url::Url::try_from(signed).unwrap();
        assert_eq!(back.as_str(), expected);
        assert!(back.query_pairs().any(|(key, _)| key == "sig"));
    }

    #[cfg(feature = "url")]
    #[test]
    fn test_relative_uri_is_not_a_url() {
        let uri = Uri::parse("/a.jpg?w=1").unwrap();
        assert!(matches!(::url::Url::try_from(uri), Err(SignError::MalformedUrl(_))));
    }
}
