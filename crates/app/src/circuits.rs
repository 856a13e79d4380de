//! Shared per-target circuit breakers with write-through persistence.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use autoedge_domain::circuit::{Admission, CircuitPolicy, CircuitState, CircuitStatus};
use autoedge_domain::error::{AutoEdgeError, CircuitOpenError};
use autoedge_domain::time::Timestamp;

use crate::ports::CircuitStore;

/// Change of a breaker's status, reported so callers can publish it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitTransition {
    pub target: String,
    pub from: CircuitStatus,
    pub to: CircuitStatus,
}

/// Registry of every target's [`CircuitState`].
///
/// All updates happen under one async mutex and are persisted before the
/// lock is released, so concurrent workers never lose an update.
pub struct CircuitRegistry<S> {
    store: Arc<S>,
    policy: CircuitPolicy,
    states: Mutex<HashMap<String, CircuitState>>,
}

impl<S: CircuitStore> CircuitRegistry<S> {
    pub fn new(store: Arc<S>, policy: CircuitPolicy) -> Self {
        Self {
            store,
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Load persisted breakers.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn load(&self) -> Result<usize, AutoEdgeError> {
        let circuits = self.store.list_circuits().await?;
        let mut states = self.states.lock().await;
        let count = circuits.len();
        for mut circuit in circuits {
            // a trial in flight at shutdown never reported back
            circuit.trial_in_flight = false;
            states.insert(circuit.target.clone(), circuit);
        }
        Ok(count)
    }

    #[must_use]
    pub fn policy(&self) -> CircuitPolicy {
        self.policy
    }

    /// Admit a call on every target, or none.
    ///
    /// When one target refuses, trials admitted on the others are given back.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::CircuitOpen`] for the first refusing target,
    /// or a storage error.
    pub async fn admit_all(
        &self,
        targets: &[String],
        now: Timestamp,
    ) -> Result<Vec<CircuitTransition>, AutoEdgeError> {
        let mut states = self.states.lock().await;
        let mut admitted = Vec::new();
        let mut transitions = Vec::new();
        let mut refusal = None;
        for target in targets {
            let circuit = states
                .entry(target.clone())
                .or_insert_with(|| CircuitState::closed(target.clone()));
            let before = circuit.state;
            match circuit.admit(&self.policy, now) {
                Admission::Allowed => {}
                Admission::Trial => {
                    admitted.push(target.clone());
                    if before != circuit.state {
                        transitions.push(CircuitTransition {
                            target: target.clone(),
                            from: before,
                            to: circuit.state,
                        });
                    }
                }
                Admission::Rejected { retry_after } => {
                    refusal = Some(CircuitOpenError {
                        target: target.clone(),
                        retry_after_ms: u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    });
                    break;
                }
            }
        }
        if refusal.is_some() {
            for target in &admitted {
                if let Some(circuit) = states.get_mut(target) {
                    circuit.release_trial();
                }
            }
        }
        for target in &admitted {
            if let Some(circuit) = states.get(target) {
                self.store.save_circuit(circuit).await?;
            }
        }
        match refusal {
            Some(refusal) => Err(refusal.into()),
            None => Ok(transitions),
        }
    }

    /// Give back trials admitted for calls that will not happen.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn release(&self, targets: &[String]) -> Result<(), AutoEdgeError> {
        let mut states = self.states.lock().await;
        for target in targets {
            if let Some(circuit) = states.get_mut(target)
                && circuit.trial_in_flight
            {
                circuit.release_trial();
                self.store.save_circuit(circuit).await?;
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn record_success(
        &self,
        target: &str,
    ) -> Result<Option<CircuitTransition>, AutoEdgeError> {
        let mut states = self.states.lock().await;
        let circuit = states
            .entry(target.to_string())
            .or_insert_with(|| CircuitState::closed(target));
        let before = circuit.clone();
        circuit.record_success();
        if *circuit == before {
            return Ok(None);
        }
        self.store.save_circuit(circuit).await?;
        Ok((before.state != circuit.state).then(|| CircuitTransition {
            target: target.to_string(),
            from: before.state,
            to: circuit.state,
        }))
    }

    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn record_failure(
        &self,
        target: &str,
        now: Timestamp,
    ) -> Result<Option<CircuitTransition>, AutoEdgeError> {
        let mut states = self.states.lock().await;
        let circuit = states
            .entry(target.to_string())
            .or_insert_with(|| CircuitState::closed(target));
        let before = circuit.state;
        let opened = circuit.record_failure(&self.policy, now);
        self.store.save_circuit(circuit).await?;
        Ok(opened.then(|| CircuitTransition {
            target: target.to_string(),
            from: before,
            to: CircuitStatus::Open,
        }))
    }

    pub async fn get(&self, target: &str) -> Option<CircuitState> {
        self.states.lock().await.get(target).cloned()
    }

    pub async fn list(&self) -> Vec<CircuitState> {
        let mut circuits: Vec<_> = self.states.lock().await.values().cloned().collect();
        circuits.sort_by(|a, b| a.target.cmp(&b.target));
        circuits
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::InMemoryStorage;

    fn registry(store: &Arc<InMemoryStorage>) -> CircuitRegistry<InMemoryStorage> {
        CircuitRegistry::new(
            Arc::clone(store),
            CircuitPolicy {
                threshold: 2,
                cooldown: Duration::from_secs(30),
            },
        )
    }

    #[tokio::test]
    async fn should_persist_failures_and_open_on_threshold() {
        let store = Arc::new(InMemoryStorage::default());
        let registry = registry(&store);
        let now = autoedge_domain::time::now();
        assert!(registry.record_failure("entity:a", now).await.unwrap().is_none());
        let opened = registry.record_failure("entity:a", now).await.unwrap();
        assert_eq!(opened.map(|t| t.to), Some(CircuitStatus::Open));
        let persisted = store.list_circuits().await.unwrap();
        assert_eq!(persisted[0].state, CircuitStatus::Open);
    }

    #[tokio::test]
    async fn should_refuse_all_targets_when_one_is_open() {
        let store = Arc::new(InMemoryStorage::default());
        let registry = registry(&store);
        let now = autoedge_domain::time::now();
        registry.record_failure("entity:b", now).await.unwrap();
        registry.record_failure("entity:b", now).await.unwrap();
        let err = registry
            .admit_all(&["entity:a".to_string(), "entity:b".to_string()], now)
            .await
            .unwrap_err();
        assert!(matches!(err, AutoEdgeError::CircuitOpen(CircuitOpenError { target, .. }) if target == "entity:b"));
    }

    #[tokio::test]
    async fn should_release_sibling_trial_when_refused() {
        let store = Arc::new(InMemoryStorage::default());
        let registry = registry(&store);
        let start = autoedge_domain::time::now();
        let b_opened = autoedge_domain::time::after(start, Duration::from_secs(20));
        for _ in 0..2 {
            registry.record_failure("entity:a", start).await.unwrap();
            registry.record_failure("entity:b", b_opened).await.unwrap();
        }

        let later = autoedge_domain::time::after(start, Duration::from_secs(31));
        let targets = ["entity:a".to_string(), "entity:b".to_string()];
        assert!(registry.admit_all(&targets, later).await.is_err());

        let a = registry.get("entity:a").await.unwrap();
        assert_eq!(a.state, CircuitStatus::HalfOpen);
        assert!(!a.trial_in_flight);
        let retry = registry.admit_all(&targets[..1], later).await.unwrap();
        assert!(retry.is_empty(), "already half-open, no new transition");
        assert!(registry.get("entity:a").await.unwrap().trial_in_flight);
    }

    #[tokio::test]
    async fn should_reload_state_without_trials_in_flight() {
        let store = Arc::new(InMemoryStorage::default());
        let mut circuit = CircuitState::closed("entity:a");
        circuit.state = CircuitStatus::HalfOpen;
        circuit.trial_in_flight = true;
        store.save_circuit(&circuit).await.unwrap();

        let registry = registry(&store);
        assert_eq!(registry.load().await.unwrap(), 1);
        assert!(!registry.get("entity:a").await.unwrap().trial_in_flight);
    }
}
