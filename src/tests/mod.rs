use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::enumerator::{GuessConfig, ParamGuesser};
use crate::injector::{InjectorConfig, InjectorError, PayloadInjector};
use crate::observation::{ReflectionSource, ReflectionState, INPUT_REFLECTIONS};
use crate::probe::{catalog, Probe};
use crate::runner::{FindingKind, Options, Runner};
use crate::transport::{InsertionPoint, ProbeRequest, RawResponse, Transport, TransportError};

/// Answers every request from a closure over (sent value, call index).
struct Scripted<F> {
    calls: Mutex<usize>,
    respond: F,
}

impl<F> Scripted<F>
where
    F: Fn(&str, usize) -> RawResponse + Send + Sync,
{
    fn new(respond: F) -> Self {
        Self {
            calls: Mutex::new(0),
            respond,
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl<F> Transport for Scripted<F>
where
    F: Fn(&str, usize) -> RawResponse + Send + Sync,
{
    async fn send(&self, request: &ProbeRequest<'_>) -> Result<RawResponse, TransportError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls - 1
        };
        let mut resp = (self.respond)(&request.value, call);
        if resp.request.is_empty() {
            resp.request = format!("GET /?{}={}", request.point.name, request.value).into_bytes();
        }
        Ok(resp)
    }
}

struct Broken;

#[async_trait]
impl Transport for Broken {
    async fn send(&self, _request: &ProbeRequest<'_>) -> Result<RawResponse, TransportError> {
        Err(TransportError::Closed {
            message: "connection reset".to_string(),
        })
    }
}

fn response(status: u16, body: &str) -> RawResponse {
    RawResponse {
        status,
        headers: vec![("content-type".to_string(), "text/html".to_string())],
        body: body.as_bytes().to_vec(),
        request: Vec::new(),
    }
}

fn point() -> InsertionPoint {
    let url = reqwest::Url::parse("http://example.com/?q=1").unwrap();
    InsertionPoint::query(url, "q", "1")
}

fn noise(n: usize) -> Vec<String> {
    vec![String::new(); n]
}

/// 500 whenever an unescaped `z'z` reaches the backend.
fn quote_sensitive(value: &str, _call: usize) -> RawResponse {
    if value.contains("z'z") {
        response(500, "<html>oops</html>")
    } else {
        response(200, "<html>ok</html>")
    }
}

#[tokio::test]
async fn identical_break_response_is_rejected_at_seed() {
    let transport = Scripted::new(|_: &str, _| response(200, "<html>ok</html>"));
    let point = point();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default());
    let baseline = injector.baseline(&noise(4)).await.unwrap();
    let probe = catalog::probe("backslash").unwrap();

    assert!(injector.fuzz(&baseline, &probe).await.unwrap().is_none());
    assert_eq!(transport.calls(), 5);
}

#[tokio::test]
async fn division_matching_baseline_is_rejected_at_seed() {
    let transport = Scripted::new(|_: &str, _| response(200, "<html>ok</html>"));
    let point = point();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default());
    let baseline = injector.baseline(&noise(4)).await.unwrap();
    let probe = catalog::probe("numeric-division").unwrap();

    assert!(injector.fuzz(&baseline, &probe).await.unwrap().is_none());
    assert_eq!(transport.calls(), 5);
}

#[tokio::test]
async fn division_by_zero_error_is_confirmed() {
    let transport = Scripted::new(|value: &str, _| {
        if value.contains("/0") {
            response(500, "<html>error</html>")
        } else {
            response(200, "<html>ok</html>")
        }
    });
    let point = point();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default());
    let baseline = injector.baseline(&noise(4)).await.unwrap();
    let probe = catalog::probe("numeric-division").unwrap();

    let evidence = injector.fuzz(&baseline, &probe).await.unwrap().unwrap();
    assert_eq!(evidence.break_payload(), "1/0");
    assert_eq!(evidence.escape_payload(), "1/1");
    assert_eq!(
        evidence.break_group.fingerprint().get(INPUT_REFLECTIONS),
        Some(&crate::observation::AttributeValue::Incalculable)
    );
    let diffs = evidence.differences();
    let status = diffs.iter().find(|d| d.attribute == "statuscode").unwrap();
    assert_eq!(status.break_value.to_string(), "500");
    assert_eq!(status.no_break_value.to_string(), "200");
    assert_eq!(transport.calls(), 24);
}

fn marker(consistent: bool) -> Probe {
    Probe::builder("marker")
        .breaks(["BRK"])
        .escapes(["ESC"])
        .require_consistent_evidence(consistent)
        .build()
        .unwrap()
}

/// 500 for the break marker. The escape marker gets 200 or 404 in pairs of
/// calls, so the escape class never keeps a stable status.
fn flapping_escape(value: &str, call: usize) -> RawResponse {
    if value.contains("BRK") {
        response(500, "<html>ok</html>")
    } else if value.contains("ESC") && (call / 2) % 2 == 1 {
        response(404, "<html>ok</html>")
    } else {
        response(200, "<html>ok</html>")
    }
}

#[tokio::test]
async fn consistent_evidence_rejects_break_fitting_escape_group() {
    let transport = Scripted::new(flapping_escape);
    let point = point();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default());
    let baseline = injector.baseline(&noise(4)).await.unwrap();

    assert!(injector.fuzz(&baseline, &marker(true)).await.unwrap().is_none());
    // the escape at call 7 drops the status from the escape group; the
    // break sample at call 8 then fits that group
    assert_eq!(transport.calls(), 9);
}

#[tokio::test]
async fn lenient_marker_accepts_unstable_escape_status() {
    let transport = Scripted::new(flapping_escape);
    let point = point();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default());
    let baseline = injector.baseline(&noise(4)).await.unwrap();

    let evidence = injector
        .fuzz(&baseline, &marker(false))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(evidence.probe, "marker");
    assert!(!evidence.no_break_group.fingerprint().contains_key("statuscode"));
    assert_eq!(transport.calls(), 24);
}

#[tokio::test]
async fn consistent_evidence_checks_break_in_reversed_round() {
    // only the reversed round's escape (call 8) answers 404
    let respond = |value: &str, call: usize| {
        if value.contains("BRK") {
            response(500, "<html>ok</html>")
        } else if value.contains("ESC") && call == 8 {
            response(404, "<html>ok</html>")
        } else {
            response(200, "<html>ok</html>")
        }
    };
    let point = point();
    let config = InjectorConfig {
        confirmations: 1,
        ..Default::default()
    };

    let strict = Scripted::new(respond);
    let injector = PayloadInjector::new(&strict, &point, config);
    let baseline = injector.baseline(&noise(4)).await.unwrap();
    assert!(injector.fuzz(&baseline, &marker(true)).await.unwrap().is_none());
    assert_eq!(strict.calls(), 10);

    let lenient = Scripted::new(respond);
    let injector = PayloadInjector::new(&lenient, &point, config);
    let baseline = injector.baseline(&noise(4)).await.unwrap();
    assert!(injector.fuzz(&baseline, &marker(false)).await.unwrap().is_some());
    assert_eq!(lenient.calls(), 10);
}

#[tokio::test]
async fn status_split_survives_confirmation() {
    let transport = Scripted::new(quote_sensitive);
    let point = point();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default());
    let baseline = injector.baseline(&noise(4)).await.unwrap();
    let probe = catalog::probe("apostrophe").unwrap();

    let evidence = injector.fuzz(&baseline, &probe).await.unwrap().unwrap();
    assert_eq!(evidence.probe, "apostrophe");
    assert!(evidence.break_payload().contains("z'z"));
    assert!(!evidence.escape_payload().contains("z'z"));

    let diffs = evidence.differences();
    let status = diffs.iter().find(|d| d.attribute == "statuscode").unwrap();
    assert_eq!(status.break_value.to_string(), "500");
    assert_eq!(status.no_break_value.to_string(), "200");

    // baseline + seed + first escape + 8 interleaved rounds + reversed round
    assert_eq!(transport.calls(), 4 + 2 + 16 + 2);
}

#[tokio::test]
async fn noisy_header_is_narrowed_out() {
    let transport = Scripted::new(|value: &str, call| {
        let mut resp = quote_sensitive(value, call);
        resp.headers
            .push(("x-request-id".to_string(), format!("req-{call}")));
        resp
    });
    let point = point();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default());
    let baseline = injector.baseline(&noise(4)).await.unwrap();
    assert!(!baseline.attributes().contains_key("headers:x-request-id"));
    assert!(baseline.attributes().contains_key("headers:content-type"));

    let probe = catalog::probe("apostrophe").unwrap();
    let evidence = injector.fuzz(&baseline, &probe).await.unwrap().unwrap();
    let diffs = evidence.differences();
    assert!(diffs.iter().any(|d| d.attribute == "statuscode"));
    assert!(diffs.iter().all(|d| d.attribute != "headers:x-request-id"));
}

#[tokio::test]
async fn varying_echo_makes_reflections_dynamic() {
    let transport = Scripted::new(|value: &str, call| response(200, &value.repeat(call % 3 + 1)));
    let point = point();
    let config = InjectorConfig {
        reflection_source: ReflectionSource::Response,
        ..Default::default()
    };
    let injector = PayloadInjector::new(&transport, &point, config);
    let baseline = injector.baseline(&noise(3)).await.unwrap();

    assert_eq!(baseline.reflections(), ReflectionState::Dynamic);
    assert!(!baseline.fingerprint().contains_key(INPUT_REFLECTIONS));
}

#[tokio::test]
async fn doubled_request_reflection_goes_dynamic() {
    let transport = Scripted::new(|value: &str, call| {
        let mut resp = response(200, "<html>ok</html>");
        if call % 2 == 1 {
            resp.request = format!("GET /?q={value}&echo={value}").into_bytes();
        }
        resp
    });
    let point = point();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default());

    let first = injector.baseline(&noise(1)).await.unwrap();
    assert_eq!(first.reflections(), ReflectionState::Count(1));

    let mut merged = first.clone();
    merged.merge_with(&injector.baseline(&noise(1)).await.unwrap());
    assert_eq!(merged.reflections(), ReflectionState::Dynamic);
    assert!(!merged.fingerprint().contains_key(INPUT_REFLECTIONS));

    merged.merge_with(&first);
    assert_eq!(merged.reflections(), ReflectionState::Dynamic);
}

#[tokio::test]
async fn steady_echo_keeps_reflection_count() {
    let transport = Scripted::new(|value: &str, _| response(200, &value.repeat(2)));
    let point = point();
    let config = InjectorConfig {
        reflection_source: ReflectionSource::Response,
        ..Default::default()
    };
    let injector = PayloadInjector::new(&transport, &point, config);
    let baseline = injector.baseline(&noise(3)).await.unwrap();

    assert_eq!(baseline.reflections(), ReflectionState::Count(2));
}

#[tokio::test]
async fn alternating_backend_is_rejected_by_reversed_round() {
    let transport = Scripted::new(|_: &str, call| {
        if call % 2 == 0 {
            response(200, "<html>ok</html>")
        } else {
            response(500, "<html>ok</html>")
        }
    });
    let point = point();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default());
    let baseline = injector.baseline(&noise(4)).await.unwrap();
    assert!(!baseline.attributes().contains_key("statuscode"));

    let probe = catalog::probe("apostrophe").unwrap();
    assert!(injector.fuzz(&baseline, &probe).await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_evaluation_reports_nothing() {
    let transport = Scripted::new(quote_sensitive);
    let point = point();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default())
        .with_cancellation(cancel);
    let baseline = injector.baseline(&noise(4)).await.unwrap();
    let probe = catalog::probe("apostrophe").unwrap();

    assert!(injector.fuzz(&baseline, &probe).await.unwrap().is_none());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn transport_failure_aborts_evaluation() {
    let point = point();
    let injector = PayloadInjector::new(&Broken, &point, InjectorConfig::default());
    let probe = catalog::probe("apostrophe").unwrap();
    let baseline = crate::observation::Observation::new();

    let err = injector.fuzz(&baseline, &probe).await.unwrap_err();
    assert!(matches!(
        err,
        InjectorError::Transport(TransportError::Closed { .. })
    ));
}

#[tokio::test]
async fn guesser_finds_backend_parameter() {
    let transport = Scripted::new(|value: &str, _| {
        if value.contains("&debug=") {
            response(500, "<html>debug</html>")
        } else {
            response(200, "<html>ok</html>")
        }
    });
    let point = point();
    let injector = PayloadInjector::new(&transport, &point, InjectorConfig::default());
    let guesser = ParamGuesser::new(GuessConfig::new(vec![
        "admin".to_string(),
        "debug".to_string(),
    ]));

    let found = guesser.guess(&injector).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "debug");
    assert_eq!(found[0].evidence.break_payload(), "&debug=zq1");
}

#[tokio::test]
async fn runner_reports_confirmed_injection() {
    let transport = Scripted::new(quote_sensitive);
    let runner = Runner::new(Options {
        urls: vec!["http://example.com/?q=1".to_string()],
        probes: vec!["apostrophe".to_string(), "backslash".to_string()],
        confirmations: 2,
        baseline_samples: 2,
        ..Default::default()
    })
    .unwrap();

    let result = runner
        .run_with_transport(&transport, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(result.points_tested, 1);
    assert_eq!(result.errors, 0);
    assert!(!result.cancelled);
    assert_eq!(result.findings.len(), 1);
    let finding = &result.findings[0];
    assert_eq!(finding.kind, FindingKind::Injection);
    assert_eq!(finding.param, "q");
    assert_eq!(finding.probe, "apostrophe");
}

#[tokio::test]
async fn runner_counts_failed_evaluations() {
    let runner = Runner::new(Options {
        urls: vec!["http://example.com/?q=1&page=2".to_string()],
        ..Default::default()
    })
    .unwrap();

    let result = runner
        .run_with_transport(&Broken, CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(result.points_tested, 2);
    assert_eq!(result.errors, 2);
    assert!(result.findings.is_empty());
}

mod http {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::transport::http::HttpTransportOptions;
    use crate::transport::{HttpTransport, InsertionPoint, ProbeRequest, Transport};

    #[tokio::test]
    async fn http_transport_returns_status_headers_body_and_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "shoes'z"))
            .respond_with(
                ResponseTemplate::new(503)
                    .insert_header("X-Backend", "db1")
                    .set_body_string("sql syntax error"),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&HttpTransportOptions::default()).unwrap();
        let url = reqwest::Url::parse(&format!("{}/search?q=shoes", server.uri())).unwrap();
        let point = InsertionPoint::query(url, "q", "shoes");
        let resp = transport
            .send(&ProbeRequest {
                point: &point,
                value: "shoes'z".to_string(),
                cache_buster: false,
            })
            .await
            .unwrap();

        assert_eq!(resp.status, 503);
        assert!(resp
            .headers
            .iter()
            .any(|(k, v)| k == "x-backend" && v == "db1"));
        assert_eq!(resp.body, b"sql syntax error".to_vec());
        let raw = String::from_utf8(resp.request).unwrap();
        assert!(raw.starts_with("GET /search?q=shoes%27z HTTP/1.1\r\n"));
    }
}
