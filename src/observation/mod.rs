use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::fingerprint;
use crate::transport::RawResponse;

pub const INPUT_REFLECTIONS: &str = "input_reflections";

pub const MIN_ANCHOR_LEN: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Text(String),
    Map(BTreeMap<String, String>),
    /// Reflection count for a sample sent without an anchor.
    Incalculable,
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "{v}"),
            AttributeValue::Text(v) => write!(f, "{v}"),
            AttributeValue::Map(m) => {
                let parts: Vec<String> = m.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            AttributeValue::Incalculable => write!(f, "incalculable"),
        }
    }
}

pub type Fingerprint = BTreeMap<String, AttributeValue>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReflectionState {
    Unset,
    Count(u32),
    Dynamic,
    Incalculable,
}

impl ReflectionState {
    fn merged(self, incoming: ReflectionState) -> ReflectionState {
        match self {
            ReflectionState::Unset => incoming,
            ReflectionState::Incalculable => ReflectionState::Incalculable,
            current if current != incoming => ReflectionState::Dynamic,
            current => current,
        }
    }
}

/// Which bytes the anchor is counted in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReflectionSource {
    #[default]
    Request,
    Response,
}

impl ReflectionSource {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "request" | "req" => Some(Self::Request),
            "response" | "resp" => Some(Self::Response),
            _ => None,
        }
    }
}

/// Non-overlapping, on raw bytes.
pub fn count_occurrences(haystack: &[u8], needle: &[u8]) -> u32 {
    if needle.len() < MIN_ANCHOR_LEN || haystack.len() < needle.len() {
        return 0;
    }
    let mut count = 0;
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            count += 1;
            i += needle.len();
        } else {
            i += 1;
        }
    }
    count
}

#[derive(Clone, Debug)]
pub struct Observation {
    payload: String,
    anchor: String,
    reflections: ReflectionState,
    attributes: Fingerprint,
    samples: usize,
}

impl Default for Observation {
    fn default() -> Self {
        Self::new()
    }
}

impl Observation {
    /// An empty accumulator. The first merge adopts the incoming sample as is.
    pub fn new() -> Self {
        Self {
            payload: String::new(),
            anchor: String::new(),
            reflections: ReflectionState::Unset,
            attributes: Fingerprint::new(),
            samples: 0,
        }
    }

    pub fn from_response(
        resp: &RawResponse,
        payload: &str,
        anchor: &str,
        source: ReflectionSource,
    ) -> Self {
        let reflections = if anchor.is_empty() {
            ReflectionState::Incalculable
        } else {
            let haystack = match source {
                ReflectionSource::Request => &resp.request,
                ReflectionSource::Response => &resp.body,
            };
            ReflectionState::Count(count_occurrences(haystack, anchor.as_bytes()))
        };

        Self {
            payload: payload.to_string(),
            anchor: anchor.to_string(),
            reflections,
            attributes: extract_attributes(resp),
            samples: 1,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    pub fn reflections(&self) -> ReflectionState {
        self.reflections
    }

    pub fn attributes(&self) -> &Fingerprint {
        &self.attributes
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn merge_response(
        &mut self,
        resp: &RawResponse,
        payload: &str,
        anchor: &str,
        source: ReflectionSource,
    ) -> &mut Self {
        let incoming = Observation::from_response(resp, payload, anchor, source);
        self.merge_with(&incoming)
    }

    pub fn merge_with(&mut self, other: &Observation) -> &mut Self {
        if other.samples == 0 {
            return self;
        }
        if self.samples == 0 {
            self.payload = other.payload.clone();
            self.anchor = other.anchor.clone();
            self.attributes = other.attributes.clone();
        } else {
            self.attributes
                .retain(|k, v| other.attributes.get(k).map_or(false, |o| o == v));
        }
        self.reflections = self.reflections.merged(other.reflections);
        self.samples += other.samples;
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut print = self.attributes.clone();
        match self.reflections {
            ReflectionState::Count(n) => {
                print.insert(INPUT_REFLECTIONS.to_string(), AttributeValue::Int(n as i64));
            }
            ReflectionState::Incalculable => {
                print.insert(INPUT_REFLECTIONS.to_string(), AttributeValue::Incalculable);
            }
            ReflectionState::Dynamic | ReflectionState::Unset => {}
        }
        print
    }
}

// one `headers:<name>` entry per header
fn extract_attributes(resp: &RawResponse) -> Fingerprint {
    let mut out = Fingerprint::new();
    for (kw, count) in fingerprint::count_keywords(&resp.body) {
        out.insert(kw.to_string(), AttributeValue::Int(count as i64));
    }
    for (key, value) in fingerprint::analyze_attributes(resp).into_attributes() {
        match value {
            AttributeValue::Map(headers) => {
                for (name, v) in headers {
                    out.insert(format!("{key}:{name}"), AttributeValue::Text(v));
                }
            }
            other => {
                out.insert(key, other);
            }
        }
    }
    out
}
