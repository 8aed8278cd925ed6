use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::compare;
use crate::observation::{AttributeValue, Observation, ReflectionSource};
use crate::probe::{Placement, Probe, ProbeCursor};
use crate::transport::{InsertionPoint, ProbeRequest, Transport, TransportError};
use crate::utils;

pub const CONFIRMATIONS: usize = 8;

#[derive(Clone, Copy, Debug)]
pub struct InjectorConfig {
    pub confirmations: usize,
    pub reflection_source: ReflectionSource,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            confirmations: CONFIRMATIONS,
            reflection_source: ReflectionSource::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum InjectorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttributeDiff {
    pub attribute: String,
    pub break_value: AttributeValue,
    pub no_break_value: AttributeValue,
}

#[derive(Clone, Debug)]
pub struct Evidence {
    pub probe: String,
    pub break_group: Observation,
    pub no_break_group: Observation,
}

impl Evidence {
    pub fn break_payload(&self) -> &str {
        self.break_group.payload()
    }

    pub fn escape_payload(&self) -> &str {
        self.no_break_group.payload()
    }

    /// Attributes invariant in both groups whose values differ.
    pub fn differences(&self) -> Vec<AttributeDiff> {
        let no_break = self.no_break_group.fingerprint();
        self.break_group
            .fingerprint()
            .into_iter()
            .filter_map(|(attribute, break_value)| {
                let no_break_value = no_break.get(&attribute)?;
                if *no_break_value == break_value {
                    return None;
                }
                Some(AttributeDiff {
                    attribute,
                    break_value,
                    no_break_value: no_break_value.clone(),
                })
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug)]
enum Latest {
    Break,
    NoBreak,
}

pub struct PayloadInjector<'a, T: Transport + ?Sized> {
    transport: &'a T,
    point: &'a InsertionPoint,
    config: InjectorConfig,
    cancel: CancellationToken,
}

impl<'a, T: Transport + ?Sized> PayloadInjector<'a, T> {
    pub fn new(transport: &'a T, point: &'a InsertionPoint, config: InjectorConfig) -> Self {
        Self {
            transport,
            point,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn point(&self) -> &InsertionPoint {
        self.point
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn send_observation(
        &self,
        payload: &str,
        placement: Placement,
        random_anchor: bool,
        cache_buster: bool,
    ) -> Result<Observation, InjectorError> {
        let anchor = if random_anchor {
            utils::generate_canary()
        } else {
            String::new()
        };
        let request = ProbeRequest {
            point: self.point,
            value: placement.apply(&self.point.base_value, &format!("{anchor}{payload}")),
            cache_buster,
        };
        let resp = self.transport.send(&request).await?;
        Ok(Observation::from_response(
            &resp,
            payload,
            &anchor,
            self.config.reflection_source,
        ))
    }

    /// One sample outside of any probe. Unanchored samples are cache-busted.
    pub async fn observe(
        &self,
        payload: &str,
        placement: Placement,
        random_anchor: bool,
    ) -> Result<Observation, InjectorError> {
        self.send_observation(payload, placement, random_anchor, !random_anchor)
            .await
    }

    async fn attack(&self, probe: &Probe, payload: &str) -> Result<Observation, InjectorError> {
        self.send_observation(
            payload,
            probe.placement(),
            probe.uses_random_anchor(),
            probe.uses_cache_buster(),
        )
        .await
    }

    pub async fn baseline(&self, noise: &[String]) -> Result<Observation, InjectorError> {
        let mut baseline = Observation::new();
        for payload in noise.iter() {
            if self.is_cancelled() {
                break;
            }
            let sample = self.observe(payload, Placement::Append, true).await?;
            baseline.merge_with(&sample);
        }
        Ok(baseline)
    }

    /// `Ok(None)` means no confirmed difference.
    pub async fn fuzz(
        &self,
        baseline: &Observation,
        probe: &Probe,
    ) -> Result<Option<Evidence>, InjectorError> {
        if self.is_cancelled() {
            return Ok(None);
        }
        let mut cursor = probe.cursor();

        let break_attack = self.attack(probe, cursor.next_break()).await?;
        if compare::identical_where_measured(baseline, &break_attack) {
            debug!(
                probe = probe.name(),
                point = %self.point.label(),
                "break payload matches baseline"
            );
            return Ok(None);
        }

        for k in 0..probe.escape_width() {
            if self.is_cancelled() {
                return Ok(None);
            }
            let mut no_break_attack = self.attack(probe, cursor.next_escape(k)).await?;
            no_break_attack.merge_with(baseline);

            if compare::identical(&no_break_attack, &break_attack) {
                continue;
            }
            if let Some(evidence) = self
                .verify(&mut cursor, no_break_attack, &break_attack, k)
                .await?
            {
                info!(
                    probe = probe.name(),
                    point = %self.point.label(),
                    break_payload = evidence.break_payload(),
                    escape_payload = evidence.escape_payload(),
                    "confirmed behavioural difference"
                );
                return Ok(Some(evidence));
            }
        }
        Ok(None)
    }

    async fn verify(
        &self,
        cursor: &mut ProbeCursor<'_>,
        no_break_seed: Observation,
        break_seed: &Observation,
        chosen_escape: usize,
    ) -> Result<Option<Evidence>, InjectorError> {
        let probe = cursor.probe();
        let mut merged_break = Observation::new();
        merged_break.merge_with(break_seed);
        let mut merged_no_break = Observation::new();
        merged_no_break.merge_with(&no_break_seed);
        let mut no_break_sample = no_break_seed;

        for round in 0..self.config.confirmations {
            if self.is_cancelled() {
                return Ok(None);
            }

            let break_sample = self.attack(probe, cursor.next_break()).await?;
            merged_break.merge_with(&break_sample);
            if no_difference(
                probe,
                &merged_no_break,
                &merged_break,
                &no_break_sample,
                &break_sample,
                Latest::Break,
            ) {
                debug!(probe = probe.name(), round, "break sample lost the difference");
                return Ok(None);
            }

            no_break_sample = self.attack(probe, cursor.next_escape(chosen_escape)).await?;
            merged_no_break.merge_with(&no_break_sample);
            if no_difference(
                probe,
                &merged_no_break,
                &merged_break,
                &no_break_sample,
                &break_sample,
                Latest::NoBreak,
            ) {
                debug!(probe = probe.name(), round, "escape sample lost the difference");
                return Ok(None);
            }
        }

        if self.is_cancelled() {
            return Ok(None);
        }

        // reversed order: escape first, then break
        let no_break_sample = self.attack(probe, cursor.next_escape(chosen_escape)).await?;
        merged_no_break.merge_with(&no_break_sample);
        let break_sample = self.attack(probe, cursor.next_break()).await?;
        merged_break.merge_with(&break_sample);
        let reordered_away = [Latest::Break, Latest::NoBreak].into_iter().any(|latest| {
            no_difference(
                probe,
                &merged_no_break,
                &merged_break,
                &no_break_sample,
                &break_sample,
                latest,
            )
        });
        if reordered_away {
            debug!(probe = probe.name(), "difference did not survive reordering");
            return Ok(None);
        }

        Ok(Some(Evidence {
            probe: probe.name().to_string(),
            break_group: merged_break,
            no_break_group: merged_no_break,
        }))
    }
}

fn no_difference(
    probe: &Probe,
    merged_no_break: &Observation,
    merged_break: &Observation,
    no_break_sample: &Observation,
    break_sample: &Observation,
    latest: Latest,
) -> bool {
    if compare::similar_ish(merged_no_break, merged_break, no_break_sample, break_sample) {
        return true;
    }
    if !probe.requires_consistent_evidence() {
        return false;
    }
    match latest {
        Latest::Break => compare::similar(merged_no_break, break_sample),
        Latest::NoBreak => compare::similar(merged_break, no_break_sample),
    }
}
