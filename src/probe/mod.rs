pub mod catalog;

use thiserror::Error;

/// How a payload is combined with the parameter's original value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Append,
    Prepend,
    Replace,
}

impl Placement {
    pub fn apply(&self, base: &str, payload: &str) -> String {
        match self {
            Placement::Append => format!("{base}{payload}"),
            Placement::Prepend => format!("{payload}{base}"),
            Placement::Replace => payload.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe name is empty")]
    EmptyName,

    #[error("probe '{name}' has no break payloads")]
    NoBreakPayloads { name: String },

    #[error("probe '{name}' has no escape sets")]
    NoEscapeSets { name: String },

    #[error("probe '{name}' has an empty escape set at index {index}")]
    EmptyEscapeSet { name: String, index: usize },

    #[error("unknown probe '{name}'")]
    UnknownProbe { name: String },
}

/// A planned differential test: payloads expected to break the backend's
/// parsing, and sets of alternatives expected not to.
///
/// A `Probe` is immutable and can be shared. Drawing payloads goes through a
/// [`ProbeCursor`], which belongs to a single evaluation.
#[derive(Clone, Debug)]
pub struct Probe {
    name: String,
    break_payloads: Vec<String>,
    escape_sets: Vec<Vec<String>>,
    placement: Placement,
    random_anchor: bool,
    cache_buster: bool,
    require_consistent_evidence: bool,
}

impl Probe {
    pub fn builder(name: &str) -> ProbeBuilder {
        ProbeBuilder {
            name: name.to_string(),
            break_payloads: Vec::new(),
            escape_sets: Vec::new(),
            placement: Placement::Append,
            random_anchor: true,
            require_consistent_evidence: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn break_payloads(&self) -> &[String] {
        &self.break_payloads
    }

    pub fn escape_sets(&self) -> &[Vec<String>] {
        &self.escape_sets
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn uses_random_anchor(&self) -> bool {
        self.random_anchor
    }

    pub fn uses_cache_buster(&self) -> bool {
        self.cache_buster
    }

    pub fn requires_consistent_evidence(&self) -> bool {
        self.require_consistent_evidence
    }

    /// Number of alternatives in the widest escape set.
    pub fn escape_width(&self) -> usize {
        self.escape_sets.iter().map(|s| s.len()).max().unwrap_or(0)
    }

    pub fn cursor(&self) -> ProbeCursor<'_> {
        ProbeCursor {
            probe: self,
            next_break: 0,
            next_escape: 0,
        }
    }
}

pub struct ProbeBuilder {
    name: String,
    break_payloads: Vec<String>,
    escape_sets: Vec<Vec<String>>,
    placement: Placement,
    random_anchor: bool,
    require_consistent_evidence: bool,
}

impl ProbeBuilder {
    pub fn breaks<I, S>(mut self, payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.break_payloads.extend(payloads.into_iter().map(Into::into));
        self
    }

    pub fn escapes<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.escape_sets
            .push(alternatives.into_iter().map(Into::into).collect());
        self
    }

    pub fn placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn random_anchor(mut self, enabled: bool) -> Self {
        self.random_anchor = enabled;
        self
    }

    pub fn require_consistent_evidence(mut self, enabled: bool) -> Self {
        self.require_consistent_evidence = enabled;
        self
    }

    pub fn build(self) -> Result<Probe, ProbeError> {
        if self.name.trim().is_empty() {
            return Err(ProbeError::EmptyName);
        }
        if self.break_payloads.is_empty() {
            return Err(ProbeError::NoBreakPayloads { name: self.name });
        }
        if self.escape_sets.is_empty() {
            return Err(ProbeError::NoEscapeSets { name: self.name });
        }
        if let Some(index) = self.escape_sets.iter().position(|s| s.is_empty()) {
            return Err(ProbeError::EmptyEscapeSet {
                name: self.name,
                index,
            });
        }
        Ok(Probe {
            name: self.name,
            break_payloads: self.break_payloads,
            escape_sets: self.escape_sets,
            placement: self.placement,
            random_anchor: self.random_anchor,
            // without an anchor every request would be byte-identical
            cache_buster: !self.random_anchor,
            require_consistent_evidence: self.require_consistent_evidence,
        })
    }
}

/// Round-robin draw state over a probe's payload pools. Every draw advances,
/// so consecutive rounds send different payloads when alternatives exist.
#[derive(Clone, Debug)]
pub struct ProbeCursor<'a> {
    probe: &'a Probe,
    next_break: usize,
    next_escape: usize,
}

impl<'a> ProbeCursor<'a> {
    pub fn probe(&self) -> &'a Probe {
        self.probe
    }

    pub fn next_break(&mut self) -> &'a str {
        let pool = &self.probe.break_payloads;
        let payload = &pool[self.next_break % pool.len()];
        self.next_break += 1;
        payload
    }

    pub fn next_escape_set(&mut self) -> &'a [String] {
        let pool = &self.probe.escape_sets;
        let set = &pool[self.next_escape % pool.len()];
        self.next_escape += 1;
        set
    }

    /// Alternative `k` of the next escape set, wrapping within narrower sets.
    pub fn next_escape(&mut self, k: usize) -> &'a str {
        let set = self.next_escape_set();
        &set[k % set.len()]
    }
}
