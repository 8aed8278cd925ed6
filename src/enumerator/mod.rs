use tracing::debug;

use crate::compare;
use crate::injector::{Evidence, InjectorError, PayloadInjector};
use crate::probe::{Placement, Probe};
use crate::transport::Transport;
use crate::utils;

#[derive(Clone, Debug)]
pub struct GuessConfig {
    pub candidates: Vec<String>,
    /// Made-up names merged into the baseline.
    pub noise_requests: usize,
    pub junk_value: String,
}

impl GuessConfig {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            noise_requests: 4,
            junk_value: "zq1".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GuessedParam {
    pub name: String,
    pub evidence: Evidence,
}

pub struct ParamGuesser {
    config: GuessConfig,
}

impl ParamGuesser {
    pub fn new(config: GuessConfig) -> Self {
        Self { config }
    }

    fn injection(&self, name: &str) -> String {
        format!("&{}={}", name, self.config.junk_value)
    }

    fn probe_for(&self, name: &str) -> Option<Probe> {
        Probe::builder(&format!("backend-param:{name}"))
            .breaks([self.injection(name)])
            .escapes([
                self.injection(&format!("{name}z")),
                self.injection(&format!("z{name}")),
            ])
            .require_consistent_evidence(true)
            .build()
            .ok()
    }

    pub async fn guess<T: Transport + ?Sized>(
        &self,
        injector: &PayloadInjector<'_, T>,
    ) -> Result<Vec<GuessedParam>, InjectorError> {
        let noise: Vec<String> = (0..self.config.noise_requests.max(1))
            .map(|_| self.injection(&utils::random_token(8)))
            .collect();
        let baseline = injector.baseline(&noise).await?;

        let mut found = Vec::new();
        for name in self.config.candidates.iter() {
            if injector.is_cancelled() {
                break;
            }
            let candidate = injector
                .observe(&self.injection(name), Placement::Append, true)
                .await?;
            if compare::similar(&baseline, &candidate) {
                continue;
            }
            let probe = match self.probe_for(name) {
                Some(probe) => probe,
                None => continue,
            };
            debug!(param = name.as_str(), point = %injector.point().label(), "candidate changed the response");
            if let Some(evidence) = injector.fuzz(&baseline, &probe).await? {
                found.push(GuessedParam {
                    name: name.clone(),
                    evidence,
                });
            }
        }
        Ok(found)
    }
}
