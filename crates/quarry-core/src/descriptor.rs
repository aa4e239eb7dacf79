//! Canonical request identity used for caching and rate accounting.

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::http_client::HttpMethod;

/// Immutable description of one logical provider request.
///
/// Query parameters are sorted by name and then value on construction, so
/// two descriptors built from the same parameters in a different order are
/// equal and hash identically. Identity covers the body only through its
/// BLAKE3 digest; the body itself is carried for sending.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: HttpMethod,
    host: String,
    path: String,
    params: Vec<(String, String)>,
    body_hash: String,
    body: Option<Arc<str>>,
}

impl PartialEq for RequestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.host == other.host
            && self.path == other.path
            && self.params == other.params
            && self.body_hash == other.body_hash
    }
}

impl Eq for RequestDescriptor {}

impl Hash for RequestDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.method.hash(state);
        self.host.hash(state);
        self.path.hash(state);
        self.params.hash(state);
        self.body_hash.hash(state);
    }
}

impl RequestDescriptor {
    pub fn new<I, K, V>(
        method: HttpMethod,
        host: impl Into<String>,
        path: impl Into<String>,
        params: I,
        body: Option<&str>,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params: Vec<(String, String)> = params
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        params.sort();

        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        Self {
            method,
            host: host.into().trim().to_ascii_lowercase(),
            path,
            params,
            body_hash: blake3::hash(body.unwrap_or_default().as_bytes())
                .to_hex()
                .to_string(),
            body: body.map(Arc::from),
        }
    }

    pub fn get<I, K, V>(host: impl Into<String>, path: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(HttpMethod::Get, host, path, params, None)
    }

    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    /// Host the rate limiter accounts this request against.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn body_hash(&self) -> &str {
        &self.body_hash
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// HTTPS URL for this request with `extra` query parameters appended
    /// after the canonical ones. Used to attach per-call values such as the
    /// crumb without making them part of the identity.
    pub fn url_with(&self, extra: &[(&str, &str)]) -> String {
        let mut url = format!("https://{}{}", self.host, self.path);
        let canonical = self
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()));
        let query = canonical
            .chain(extra.iter().copied())
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        url
    }

    pub fn url(&self) -> String {
        self.url_with(&[])
    }

    /// Stable hex digest of the canonical form, used by the durable tier.
    pub fn cache_key(&self) -> String {
        blake3::hash(self.to_string().as_bytes()).to_hex().to_string()
    }
}

impl Display for RequestDescriptor {
    /// Canonical form: `METHOD host/path?sorted-params #body-hash`.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}{}", self.method.as_str(), self.host, self.path)?;
        for (index, (name, value)) in self.params.iter().enumerate() {
            let separator = if index == 0 { '?' } else { '&' };
            write!(
                f,
                "{separator}{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            )?;
        }
        write!(f, " #{}", self.body_hash)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    fn hash_of(descriptor: &RequestDescriptor) -> u64 {
        let mut hasher = DefaultHasher::new();
        descriptor.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn parameter_order_does_not_change_identity() {
        let a = RequestDescriptor::get(
            "query2.finance.yahoo.com",
            "/v8/finance/chart/AAPL",
            [("interval", "1d"), ("range", "1mo"), ("events", "div,splits")],
        );
        let b = RequestDescriptor::get(
            "Query2.Finance.Yahoo.com",
            "/v8/finance/chart/AAPL",
            [("events", "div,splits"), ("range", "1mo"), ("interval", "1d")],
        );

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn different_params_or_bodies_are_distinct() {
        let daily = RequestDescriptor::get("h", "/p", [("interval", "1d")]);
        let weekly = RequestDescriptor::get("h", "/p", [("interval", "1wk")]);
        assert_ne!(daily, weekly);
        assert_ne!(daily.cache_key(), weekly.cache_key());

        let empty = RequestDescriptor::new(HttpMethod::Post, "h", "/p", [("a", "1")], None);
        let with_body =
            RequestDescriptor::new(HttpMethod::Post, "h", "/p", [("a", "1")], Some("{}"));
        assert_ne!(empty, with_body);
        assert_eq!(empty.body_hash(), blake3::hash(b"").to_hex().as_str());
    }

    #[test]
    fn url_appends_extra_params_after_canonical_ones() {
        let descriptor = RequestDescriptor::get(
            "query2.finance.yahoo.com",
            "v8/finance/chart/^GSPC",
            [("range", "1mo"), ("interval", "1d")],
        );
        assert_eq!(
            descriptor.url_with(&[("crumb", "a/b")]),
            "https://query2.finance.yahoo.com/v8/finance/chart/^GSPC?interval=1d&range=1mo&crumb=a%2Fb"
        );
        assert_eq!(descriptor.param("range"), Some("1mo"));
    }
}
