//! Rollout stages, canary routing and the global kill switch.
//!
//! During a canary the *active* version is the candidate and the
//! *previous* version keeps serving the remaining triggers. Routing hashes
//! the trigger identity, so a given trigger always lands on the same side.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AutoEdgeError, RolloutError, ValidationError};
use crate::id::SpecId;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum RolloutStage {
    /// `percentage` of triggers run the active version, the rest the previous one.
    Canary { percentage: u8 },
    Full,
    /// No new task for the spec; resumes into the remembered stage.
    Paused {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_percentage: Option<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutState {
    pub spec_id: SpecId,
    #[serde(flatten)]
    pub stage: RolloutStage,
    pub active_version: u32,
    pub previous_version: Option<u32>,
    pub updated_at: Timestamp,
}

impl RolloutState {
    /// State after deploying `version` on top of `current`.
    #[must_use]
    pub fn deployed(
        spec_id: SpecId,
        version: u32,
        current: Option<&RolloutState>,
        now: Timestamp,
    ) -> Self {
        let previous_version = match current {
            Some(state) if state.active_version != version => Some(state.active_version),
            Some(state) => state.previous_version,
            None => None,
        };
        Self {
            spec_id,
            stage: RolloutStage::Full,
            active_version: version,
            previous_version,
            updated_at: now,
        }
    }

    /// Route `percentage` of triggers to `candidate_version`.
    ///
    /// While a canary is already running only the percentage changes.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidPercentage`] outside `1..=99`
    /// - [`RolloutError::Paused`] while paused
    /// - [`RolloutError::NoCandidateVersion`] when `candidate_version` is not newer
    pub fn set_canary(
        &mut self,
        candidate_version: u32,
        percentage: u8,
        now: Timestamp,
    ) -> Result<(), AutoEdgeError> {
        if !(1..=99).contains(&percentage) {
            return Err(ValidationError::InvalidPercentage { percentage }.into());
        }
        match self.stage {
            RolloutStage::Paused { .. } => {
                return Err(RolloutError::Paused {
                    spec_id: self.spec_id.to_string(),
                }
                .into());
            }
            RolloutStage::Canary { .. } => {}
            RolloutStage::Full => {
                if candidate_version <= self.active_version {
                    return Err(RolloutError::NoCandidateVersion {
                        spec_id: self.spec_id.to_string(),
                        active_version: self.active_version,
                    }
                    .into());
                }
                self.previous_version = Some(self.active_version);
                self.active_version = candidate_version;
            }
        }
        self.stage = RolloutStage::Canary { percentage };
        self.updated_at = now;
        Ok(())
    }

    /// Move a canary to full rollout.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError::NotInCanary`] when no canary is running.
    pub fn promote(&mut self, now: Timestamp) -> Result<(), RolloutError> {
        if !matches!(self.stage, RolloutStage::Canary { .. }) {
            return Err(RolloutError::NotInCanary {
                spec_id: self.spec_id.to_string(),
            });
        }
        self.stage = RolloutStage::Full;
        self.updated_at = now;
        Ok(())
    }

    /// Reactivate the previous version; the retired version gets no new task.
    ///
    /// Returns the retired version.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError::NothingToRollBack`] without a previous version.
    pub fn rollback(&mut self, now: Timestamp) -> Result<u32, RolloutError> {
        let Some(previous) = self.previous_version.take() else {
            return Err(RolloutError::NothingToRollBack {
                spec_id: self.spec_id.to_string(),
            });
        };
        let retired = self.active_version;
        self.active_version = previous;
        self.stage = match self.stage {
            RolloutStage::Paused { .. } => RolloutStage::Paused {
                resume_percentage: None,
            },
            RolloutStage::Canary { .. } | RolloutStage::Full => RolloutStage::Full,
        };
        self.updated_at = now;
        Ok(retired)
    }

    pub fn pause(&mut self, now: Timestamp) {
        let resume_percentage = match self.stage {
            RolloutStage::Paused { .. } => return,
            RolloutStage::Canary { percentage } => Some(percentage),
            RolloutStage::Full => None,
        };
        self.stage = RolloutStage::Paused { resume_percentage };
        self.updated_at = now;
    }

    pub fn resume(&mut self, now: Timestamp) {
        if let RolloutStage::Paused { resume_percentage } = self.stage {
            self.stage = match resume_percentage {
                Some(percentage) => RolloutStage::Canary { percentage },
                None => RolloutStage::Full,
            };
            self.updated_at = now;
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        matches!(self.stage, RolloutStage::Paused { .. })
    }

    /// Version that handles the trigger, `None` while paused.
    #[must_use]
    pub fn route(&self, trigger_identity: &str) -> Option<u32> {
        match self.stage {
            RolloutStage::Full => Some(self.active_version),
            RolloutStage::Canary { percentage } => {
                if bucket(self.spec_id, trigger_identity) < percentage {
                    Some(self.active_version)
                } else {
                    Some(self.previous_version.unwrap_or(self.active_version))
                }
            }
            RolloutStage::Paused { .. } => None,
        }
    }

    /// Whether tasks bound to `version` may still be dispatched.
    #[must_use]
    pub fn is_routable(&self, version: u32) -> bool {
        match self.stage {
            RolloutStage::Full => version == self.active_version,
            RolloutStage::Canary { .. } => {
                version == self.active_version || Some(version) == self.previous_version
            }
            RolloutStage::Paused { .. } => false,
        }
    }
}

/// Deterministic bucket in `0..100` for a trigger of a spec.
#[must_use]
pub fn bucket(spec_id: SpecId, trigger_identity: &str) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(spec_id.as_uuid().as_bytes());
    hasher.update(trigger_identity.as_bytes());
    let digest = hasher.finalize();
    let mut head = [0_u8; 8];
    head.copy_from_slice(&digest[..8]);
    // < 100, always fits
    u8::try_from(u64::from_be_bytes(head) % 100).unwrap_or(0)
}

/// Global emergency stop; supersedes every per-spec rollout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitch {
    pub engaged: bool,
    pub changed_at: Option<Timestamp>,
}
