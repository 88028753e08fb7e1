//! Resource Keys
//!
//! Ready-made operation key for managed resources addressed by region,
//! organization, and name. Any `Eq + Hash + Clone + Debug` type works as a
//! registry key; this one just covers the common case.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the resource an operation acts on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Region the resource lives in, if the deployment is regional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Owning organization
    pub organization: String,
    /// Resource name, unique within the organization
    pub name: String,
}

impl ResourceKey {
    /// Key for a resource outside any region
    pub fn new(organization: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            region: None,
            organization: organization.into(),
            name: name.into(),
        }
    }

    /// Set the region
    #[must_use]
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(region) = &self.region {
            write!(f, "{region}/")?;
        }
        write!(f, "{}/{}", self.organization, self.name)
    }
}
