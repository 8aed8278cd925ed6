use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{redirect, Proxy};
use tracing::trace;
use url::form_urlencoded;

use super::{ParamLocation, ProbeRequest, RawResponse, Transport, TransportError};
use crate::utils;

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:95.0) Gecko/20100101 Firefox/95.0";

#[derive(Clone, Debug)]
pub struct HttpTransportOptions {
    pub timeout_seconds: usize,
    pub proxy: Option<String>,
    pub header: Option<String>,
    /// Requests per second, shared by every evaluation using this transport.
    pub rate: u32,
    pub follow_redirects: bool,
}

impl Default for HttpTransportOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            proxy: None,
            header: None,
            rate: 50,
            follow_redirects: false,
        }
    }
}

/// reqwest-backed transport. Sends each probe once; a failed send is returned
/// as an error, never retried.
pub struct HttpTransport {
    client: reqwest::Client,
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    extra_header: Option<(HeaderName, HeaderValue)>,
}

impl HttpTransport {
    pub fn new(options: &HttpTransportOptions) -> Result<Self, TransportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(USER_AGENT),
        );

        let policy = if options.follow_redirects {
            redirect::Policy::limited(10)
        } else {
            redirect::Policy::none()
        };

        //no certs
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(policy)
            .timeout(Duration::from_secs(options.timeout_seconds as u64))
            .danger_accept_invalid_hostnames(true)
            .danger_accept_invalid_certs(true);

        if let Some(proxy) = options.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy_cfg = Proxy::all(proxy).map_err(|source| TransportError::ProxySetup {
                proxy: proxy.to_string(),
                source,
            })?;
            builder = builder.proxy(proxy_cfg);
        }

        let client = builder
            .build()
            .map_err(|source| TransportError::ClientBuild { source })?;

        let extra_header = match options.header.as_deref().filter(|h| !h.trim().is_empty()) {
            Some(raw) => Some(parse_header(raw)?),
            None => None,
        };

        let limiter = NonZeroU32::new(options.rate)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));

        Ok(Self {
            client,
            limiter,
            extra_header,
        })
    }

    fn build_request(
        &self,
        request: &ProbeRequest<'_>,
    ) -> Result<reqwest::Request, TransportError> {
        let point = request.point;
        let mut url = point.url.clone();

        let mut query = form_urlencoded::Serializer::new(String::new());
        let mut written = false;
        for (k, v) in point.url.query_pairs() {
            if point.location == ParamLocation::Query && k == point.name.as_str() {
                query.append_pair(&k, &request.value);
                written = true;
            } else {
                query.append_pair(&k, &v);
            }
        }
        if point.location == ParamLocation::Query && !written {
            query.append_pair(&point.name, &request.value);
        }
        if request.cache_buster {
            query.append_pair(&utils::random_token(8), &utils::random_token(4));
        }
        let query = query.finish();
        if query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&query));
        }

        let mut builder = self.client.request(point.method.clone(), url);
        if !point.body_pairs.is_empty() || point.location == ParamLocation::Body {
            let mut body = form_urlencoded::Serializer::new(String::new());
            let mut written = false;
            for (k, v) in point.body_pairs.iter() {
                if point.location == ParamLocation::Body && k == &point.name {
                    body.append_pair(k, &request.value);
                    written = true;
                } else {
                    body.append_pair(k, v);
                }
            }
            if point.location == ParamLocation::Body && !written {
                body.append_pair(&point.name, &request.value);
            }
            builder = builder
                .header(
                    reqwest::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(body.finish());
        }
        if let Some((key, value)) = self.extra_header.as_ref() {
            builder = builder.header(key.clone(), value.clone());
        }

        builder.build().map_err(|source| TransportError::Build {
            point: point.label(),
            source,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ProbeRequest<'_>) -> Result<RawResponse, TransportError> {
        let req = self.build_request(request)?;
        let raw_request = render_request(&req);

        if let Some(limiter) = self.limiter.as_ref() {
            limiter.until_ready().await;
        }

        trace!(url = %req.url(), "sending probe");
        let resp = self
            .client
            .execute(req)
            .await
            .map_err(|source| TransportError::Send {
                point: request.point.label(),
                source,
            })?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_lowercase(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|source| TransportError::Body {
                point: request.point.label(),
                source,
            })?
            .to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
            request: raw_request,
        })
    }
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), TransportError> {
    let invalid = || TransportError::InvalidHeader {
        header: raw.to_string(),
    };
    let (key, value) = raw.split_once(':').ok_or_else(invalid)?;
    let key = HeaderName::from_str(key.trim()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|_| invalid())?;
    Ok((key, value))
}

/// Renders the request the way it goes over the wire (HTTP/1.1 framing),
/// minus the client's default headers.
pub(crate) fn render_request(req: &reqwest::Request) -> Vec<u8> {
    let url = req.url();
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    let mut host = url.host_str().unwrap_or_default().to_string();
    if let Some(port) = url.port() {
        host.push_str(&format!(":{port}"));
    }

    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", req.method(), target).as_bytes());
    out.extend_from_slice(format!("Host: {host}\r\n").as_bytes());
    for (k, v) in req.headers().iter() {
        out.extend_from_slice(k.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(v.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    if let Some(body) = req.body().and_then(|b| b.as_bytes()) {
        out.extend_from_slice(body);
    }
    out
}
