use serde::{Deserialize, Serialize};

use crate::probe::ProbeStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthEntry {
    /// Target probed, as `ip:port`.
    pub ip: String,
    pub status: ProbeStatus,
}

/// Reachability of every member, in membership order.
///
/// Built fresh for each request; serializes as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthReport {
    pub entries: Vec<HealthEntry>,
}

impl HealthReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, status: ProbeStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
