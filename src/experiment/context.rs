//! Experiment context shared by the sink and the scan driver.

use serde::{Deserialize, Serialize};

/// Who is measuring and which auxiliary devices are sampled alongside scans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentContext {
    /// Proposal identifier, also used in file names.
    pub proposal: String,
    /// Facility contact for this experiment.
    pub local_contact: String,
    /// Users on the experiment.
    pub users: Vec<String>,
    /// Device names re-sampled into the `detectors` group on every write.
    pub detectors: Vec<String>,
    /// Device names re-sampled into the `environment` group on every write.
    pub environment: Vec<String>,
}

impl ExperimentContext {
    pub fn is_detector(&self, name: &str) -> bool {
        self.detectors.iter().any(|d| d == name)
    }

    pub fn is_environment(&self, name: &str) -> bool {
        self.environment.iter().any(|d| d == name)
    }

    /// User list as stored in the file header.
    pub fn users_text(&self) -> String {
        self.users.join(", ")
    }
}

/// Builder for [`ExperimentContext`].
#[derive(Default)]
pub struct ExperimentContextBuilder {
    inner: ExperimentContext,
}

impl ExperimentContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proposal(mut self, proposal: &str) -> Self {
        self.inner.proposal = proposal.to_string();
        self
    }

    pub fn local_contact(mut self, contact: &str) -> Self {
        self.inner.local_contact = contact.to_string();
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.inner.users.push(user.to_string());
        self
    }

    pub fn detector(mut self, name: &str) -> Self {
        self.inner.detectors.push(name.to_string());
        self
    }

    pub fn environment(mut self, name: &str) -> Self {
        self.inner.environment.push(name.to_string());
        self
    }

    pub fn build(self) -> ExperimentContext {
        self.inner
    }
}
