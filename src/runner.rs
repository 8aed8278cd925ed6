use std::time::Duration;

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::enumerator::{GuessConfig, ParamGuesser};
use crate::injector::{AttributeDiff, Evidence, InjectorConfig, InjectorError, PayloadInjector};
use crate::observation::ReflectionSource;
use crate::probe::{catalog, Probe, ProbeError};
use crate::transport::http::HttpTransportOptions;
use crate::transport::{
    self, HttpTransport, InsertionPoint, ParamLocation, Transport, TransportError,
};
use crate::utils;

#[derive(Clone, Debug)]
pub enum WordlistSource {
    FilePath(String),
    Inline(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct Options {
    pub urls: Vec<String>,
    pub input_file: Option<String>,
    pub method: reqwest::Method,
    /// Urlencoded form body; its pairs become insertion points too.
    pub body: Option<String>,
    /// Only test these parameters. Names missing from a target are added to it.
    pub params: Vec<String>,
    /// Catalog probes to run; empty runs them all.
    pub probes: Vec<String>,
    /// Candidate backend parameter names. Discovery is skipped when unset.
    pub wordlist: Option<WordlistSource>,
    pub rate: u32,
    pub concurrency: u32,
    pub timeout_seconds: usize,
    pub proxy: Option<String>,
    pub follow_redirects: bool,
    pub header: Option<String>,
    pub confirmations: usize,
    pub baseline_samples: usize,
    pub reflection_source: ReflectionSource,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            input_file: None,
            method: reqwest::Method::GET,
            body: None,
            params: Vec::new(),
            probes: Vec::new(),
            wordlist: None,
            rate: 50,
            concurrency: 4,
            timeout_seconds: 10,
            proxy: None,
            follow_redirects: false,
            header: None,
            confirmations: crate::injector::CONFIRMATIONS,
            baseline_samples: 4,
            reflection_source: ReflectionSource::Request,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("no targets provided (urls and input_file are both empty)")]
    NoTargets,

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("confirmations must be at least 1")]
    InvalidConfirmations,

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("baseline_samples must be at least 1")]
    InvalidBaselineSamples,

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("failed to open file for {kind}: {path}: {source}")]
    FileOpen {
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read lines for {kind}: {path}: {source}")]
    FileRead {
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set up transport: {source}")]
    Transport {
        #[source]
        source: TransportError,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Injection,
    BackendParameter,
}

/// A confirmed difference, ready for reporting.
#[derive(Clone, Debug, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub url: String,
    pub method: String,
    pub location: String,
    pub param: String,
    pub probe: String,
    pub break_payload: String,
    pub escape_payload: String,
    pub samples: usize,
    pub differences: Vec<AttributeDiff>,
}

impl Finding {
    pub fn from_evidence(point: &InsertionPoint, kind: FindingKind, evidence: &Evidence) -> Self {
        let location = match point.location {
            ParamLocation::Query => "query",
            ParamLocation::Body => "body",
        };
        Self {
            kind,
            url: point.url.to_string(),
            method: point.method.to_string(),
            location: location.to_string(),
            param: point.name.clone(),
            probe: evidence.probe.clone(),
            break_payload: evidence.break_payload().to_string(),
            escape_payload: evidence.escape_payload().to_string(),
            samples: evidence.break_group.samples() + evidence.no_break_group.samples(),
            differences: evidence.differences(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScanResult {
    pub started_at: Instant,
    pub elapsed: Duration,
    pub points_tested: usize,
    pub findings: Vec<Finding>,
    pub errors: usize,
    pub cancelled: bool,
}

#[derive(Clone, Debug)]
pub struct Runner {
    options: Options,
}

impl Runner {
    pub fn new(options: Options) -> Result<Self, RunnerError> {
        if options.urls.is_empty() && options.input_file.is_none() {
            return Err(RunnerError::NoTargets);
        }
        if options.confirmations == 0 {
            return Err(RunnerError::InvalidConfirmations);
        }
        if options.concurrency == 0 {
            return Err(RunnerError::InvalidConcurrency);
        }
        if options.baseline_samples == 0 {
            return Err(RunnerError::InvalidBaselineSamples);
        }
        catalog::select(&options.probes)?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<ScanResult, RunnerError> {
        self.run_with_progress(cancel, None).await
    }

    pub async fn run_with_progress(
        &self,
        cancel: CancellationToken,
        pb: Option<ProgressBar>,
    ) -> Result<ScanResult, RunnerError> {
        let transport = HttpTransport::new(&HttpTransportOptions {
            timeout_seconds: self.options.timeout_seconds,
            proxy: self.options.proxy.clone(),
            header: self.options.header.clone(),
            rate: self.options.rate,
            follow_redirects: self.options.follow_redirects,
        })
        .map_err(|source| RunnerError::Transport { source })?;
        self.run_with_transport(&transport, cancel, pb).await
    }

    /// Runs the scan over any transport. Each insertion point is evaluated
    /// with its own baseline and accumulators; up to `concurrency` points are
    /// in flight at once.
    pub async fn run_with_transport<T: Transport + ?Sized>(
        &self,
        transport: &T,
        cancel: CancellationToken,
        pb: Option<ProgressBar>,
    ) -> Result<ScanResult, RunnerError> {
        let started_at = Instant::now();
        let points = self.insertion_points().await?;
        let probes = catalog::select(&self.options.probes)?;
        let guesser = match self.options.wordlist.as_ref() {
            Some(source) => Some(ParamGuesser::new(GuessConfig::new(
                load_wordlist(source).await?,
            ))),
            None => None,
        };
        let config = InjectorConfig {
            confirmations: self.options.confirmations,
            reflection_source: self.options.reflection_source,
        };
        let samples = self.options.baseline_samples;

        if let Some(pb) = pb.as_ref() {
            pb.set_length(points.len() as u64);
        }

        let outcomes: Vec<Result<Vec<Finding>, InjectorError>> = stream::iter(points.iter())
            .map(|point| {
                let probes = &probes;
                let guesser = guesser.as_ref();
                let cancel = cancel.clone();
                let pb = pb.clone();
                async move {
                    if let Some(pb) = pb.as_ref() {
                        pb.set_message(point.label());
                    }
                    let out = evaluate_point(
                        transport, point, probes, guesser, config, samples, cancel,
                    )
                    .await;
                    if let Some(pb) = pb.as_ref() {
                        pb.inc(1);
                    }
                    out
                }
            })
            .buffer_unordered(self.options.concurrency as usize)
            .collect()
            .await;

        let mut findings = Vec::new();
        let mut errors = 0;
        for outcome in outcomes {
            match outcome {
                Ok(found) => findings.extend(found),
                Err(e) => {
                    warn!(error = %e, "evaluation aborted");
                    errors += 1;
                }
            }
        }

        Ok(ScanResult {
            started_at,
            elapsed: started_at.elapsed(),
            points_tested: points.len(),
            findings,
            errors,
            cancelled: cancel.is_cancelled(),
        })
    }

    async fn insertion_points(&self) -> Result<Vec<InsertionPoint>, RunnerError> {
        let mut urls = self.options.urls.clone();
        if let Some(path) = self.options.input_file.as_deref() {
            urls.extend(read_lines("input_file", path).await?);
        }
        let urls = utils::parse_wordlist(&urls.join("\n"));
        if urls.is_empty() {
            return Err(RunnerError::NoTargets);
        }

        let form = transport::form_pairs(self.options.body.as_deref());
        let mut points = Vec::new();
        for raw in urls.iter() {
            let url = reqwest::Url::parse(raw).map_err(|_| RunnerError::InvalidUrl {
                url: raw.to_string(),
            })?;
            let mut found =
                transport::insertion_points(&url, &self.options.method, self.options.body.as_deref());
            if !self.options.params.is_empty() {
                found.retain(|p| self.options.params.contains(&p.name));
                for name in self.options.params.iter() {
                    if !found.iter().any(|p| &p.name == name) {
                        // added to the form when there is one, so the rest of the body is still sent
                        points.push(InsertionPoint {
                            url: url.clone(),
                            method: self.options.method.clone(),
                            location: if form.is_empty() {
                                ParamLocation::Query
                            } else {
                                ParamLocation::Body
                            },
                            name: name.clone(),
                            base_value: String::new(),
                            body_pairs: form.clone(),
                        });
                    }
                }
            }
            if found.is_empty() && self.options.params.is_empty() {
                debug!(url = raw.as_str(), "target has no parameters to test");
            }
            points.extend(found);
        }
        Ok(points)
    }
}

async fn evaluate_point<T: Transport + ?Sized>(
    transport: &T,
    point: &InsertionPoint,
    probes: &[Probe],
    guesser: Option<&ParamGuesser>,
    config: InjectorConfig,
    baseline_samples: usize,
    cancel: CancellationToken,
) -> Result<Vec<Finding>, InjectorError> {
    let injector = PayloadInjector::new(transport, point, config).with_cancellation(cancel);
    let noise = vec![String::new(); baseline_samples];
    let baseline = injector.baseline(&noise).await?;

    let mut findings = Vec::new();
    for probe in probes.iter() {
        if injector.is_cancelled() {
            return Ok(findings);
        }
        if let Some(evidence) = injector.fuzz(&baseline, probe).await? {
            findings.push(Finding::from_evidence(
                point,
                FindingKind::Injection,
                &evidence,
            ));
        }
    }

    if let Some(guesser) = guesser {
        for guessed in guesser.guess(&injector).await? {
            findings.push(Finding::from_evidence(
                point,
                FindingKind::BackendParameter,
                &guessed.evidence,
            ));
        }
    }
    Ok(findings)
}

async fn read_lines(kind: &'static str, path: &str) -> Result<Vec<String>, RunnerError> {
    let file = File::open(path)
        .await
        .map_err(|source| RunnerError::FileOpen {
            kind,
            path: path.to_string(),
            source,
        })?;
    let mut lines = BufReader::new(file).lines();
    let mut out = Vec::new();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|source| RunnerError::FileRead {
            kind,
            path: path.to_string(),
            source,
        })?
    {
        out.push(line);
    }
    Ok(out)
}

pub async fn load_wordlist(source: &WordlistSource) -> Result<Vec<String>, RunnerError> {
    match source {
        WordlistSource::FilePath(path) => {
            let lines = read_lines("wordlist", path).await?;
            Ok(utils::parse_wordlist(&lines.join("\n")))
        }
        WordlistSource::Inline(words) => Ok(utils::parse_wordlist(&words.join("\n"))),
    }
}
