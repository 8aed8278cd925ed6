pub mod http;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpTransport;

/// Where the probed parameter lives in the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamLocation {
    Query,
    Body,
}

/// One parameter of one target that payloads are written into.
#[derive(Clone, Debug)]
pub struct InsertionPoint {
    pub url: reqwest::Url,
    pub method: reqwest::Method,
    pub location: ParamLocation,
    pub name: String,
    pub base_value: String,
    /// Form pairs sent as the request body, in their original order. For `Body`
    /// points the probed pair is rewritten in place.
    pub body_pairs: Vec<(String, String)>,
}

impl InsertionPoint {
    pub fn query(url: reqwest::Url, name: &str, base_value: &str) -> Self {
        Self {
            url,
            method: reqwest::Method::GET,
            location: ParamLocation::Query,
            name: name.to_string(),
            base_value: base_value.to_string(),
            body_pairs: Vec::new(),
        }
    }

    pub fn label(&self) -> String {
        let location = match self.location {
            ParamLocation::Query => "query",
            ParamLocation::Body => "body",
        };
        format!("{} {} [{}:{}]", self.method, self.url, location, self.name)
    }
}

/// A request descriptor handed to the transport: which point, which value,
/// and whether a cache-busting query parameter must be added.
#[derive(Clone, Debug)]
pub struct ProbeRequest<'a> {
    pub point: &'a InsertionPoint,
    pub value: String,
    pub cache_buster: bool,
}

/// A response as seen by the fingerprinting code, together with the exact
/// bytes of the request that produced it.
#[derive(Clone, Debug, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub request: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build request for {point}: {source}")]
    Build {
        point: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {point} failed: {source}")]
    Send {
        point: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read response body from {point}: {source}")]
    Body {
        point: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to setup proxy: {proxy}: {source}")]
    ProxySetup {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid header '{header}'")]
    InvalidHeader { header: String },

    #[error("transport closed: {message}")]
    Closed { message: String },
}

/// The HTTP collaborator. Sends one request, returns one response; retrying is
/// left to the implementation and failures are never turned into responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ProbeRequest<'_>) -> Result<RawResponse, TransportError>;
}

/// Decoded pairs of a urlencoded form body, in order.
pub fn form_pairs(body: Option<&str>) -> Vec<(String, String)> {
    body.map(|b| {
        url::form_urlencoded::parse(b.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    })
    .unwrap_or_default()
}

/// Enumerates the parameters of a target: query pairs, plus form pairs when a
/// urlencoded body is supplied.
pub fn insertion_points(
    url: &reqwest::Url,
    method: &reqwest::Method,
    body: Option<&str>,
) -> Vec<InsertionPoint> {
    let mut points = Vec::new();
    let query_pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let pairs = form_pairs(body);

    for (name, value) in query_pairs.iter() {
        points.push(InsertionPoint {
            url: url.clone(),
            method: method.clone(),
            location: ParamLocation::Query,
            name: name.clone(),
            base_value: value.clone(),
            body_pairs: pairs.clone(),
        });
    }
    for (name, value) in pairs.iter() {
        points.push(InsertionPoint {
            url: url.clone(),
            method: method.clone(),
            location: ParamLocation::Body,
            name: name.clone(),
            base_value: value.clone(),
            body_pairs: pairs.clone(),
        });
    }
    points
}
