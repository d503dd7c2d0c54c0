use crate::dvh::{Dvh, DvhQueryError};
use crate::types::{StructureInfo, StructureKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanFiles {
    pub rtstruct_ref: String,
    pub rtdose_ref: String,
}

impl PlanFiles {
    pub fn new(rtstruct_ref: impl Into<String>, rtdose_ref: impl Into<String>) -> Self {
        Self {
            rtstruct_ref: rtstruct_ref.into(),
            rtdose_ref: rtdose_ref.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("unknown structure set {0}")]
    UnknownStructureSet(String),
    #[error("{0}")]
    Unavailable(String),
}

pub trait PlanSource {
    fn list_plans(&self) -> Result<BTreeMap<String, PlanFiles>, SourceError>;
}

/// Structures of one structure set. Key order is the candidate order used
/// for tie-breaking during matching.
pub trait StructureSource {
    fn get_structures(
        &self,
        rtstruct_ref: &str,
    ) -> Result<BTreeMap<StructureKey, StructureInfo>, SourceError>;
}

pub trait DvhSource {
    type Output: Dvh;

    fn get_dvh(&self, plan: &PlanFiles, key: &StructureKey) -> Result<Self::Output, DvhQueryError>;
}
