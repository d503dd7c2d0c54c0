use crate::dvh::{CumulativeDvh, DvhQueryError, DEFAULT_BIN_WIDTH_GY};
use crate::source::{DvhSource, PlanFiles, PlanSource, SourceError, StructureSource};
use crate::types::{StructureInfo, StructureKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

fn default_bin_width() -> f64 {
    DEFAULT_BIN_WIDTH_GY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedStructure {
    pub key: StructureKey,
    #[serde(flatten)]
    pub info: StructureInfo,
    /// Cumulative DVH in cc per dose bin. Absent when no dose was exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<Vec<f64>>,
}

/// One plan as written by the planning system's export script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExport {
    pub plan_id: String,
    pub rtstruct_ref: String,
    pub rtdose_ref: String,
    #[serde(default = "default_bin_width")]
    pub bin_width_gy: f64,
    #[serde(default)]
    pub structures: Vec<ExportedStructure>,
}

impl PlanExport {
    pub fn files(&self) -> PlanFiles {
        PlanFiles::new(&self.rtstruct_ref, &self.rtdose_ref)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref).map_err(|source| ExportError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;
        let ext = path_ref
            .extension()
            .and_then(|v| v.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let export: Self = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&raw)?,
            "json" => serde_json::from_str(&raw)?,
            _ => return Err(ExportError::UnsupportedFormat(ext)),
        };
        if export.plan_id.trim().is_empty() {
            return Err(ExportError::MissingPlanId(path_ref.to_path_buf()));
        }
        Ok(export)
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml parse failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported export extension '{0}'; expected .yaml/.yml/.json")]
    UnsupportedFormat(String),
    #[error("{0} has no plan_id")]
    MissingPlanId(PathBuf),
    #[error("plan {0} exported twice")]
    DuplicatePlan(String),
}

/// Serves plans, structure sets and DVHs from a fixed list of export files.
#[derive(Debug, Default, Clone)]
pub struct PlanExportSource {
    exports: Vec<PlanExport>,
}

impl PlanExportSource {
    pub fn new(exports: Vec<PlanExport>) -> Result<Self, ExportError> {
        let mut source = Self::default();
        for export in exports {
            source.push(export)?;
        }
        Ok(source)
    }

    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ExportError> {
        let exports = paths
            .iter()
            .map(PlanExport::from_path)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(exports)
    }

    pub fn push(&mut self, export: PlanExport) -> Result<(), ExportError> {
        if self.exports.iter().any(|e| e.plan_id == export.plan_id) {
            return Err(ExportError::DuplicatePlan(export.plan_id));
        }
        debug!(plan = %export.plan_id, structures = export.structures.len(), "plan export loaded");
        self.exports.push(export);
        Ok(())
    }

    pub fn exports(&self) -> &[PlanExport] {
        &self.exports
    }
}

impl PlanSource for PlanExportSource {
    fn list_plans(&self) -> Result<BTreeMap<String, PlanFiles>, SourceError> {
        Ok(self
            .exports
            .iter()
            .map(|e| (e.plan_id.clone(), e.files()))
            .collect())
    }
}

impl StructureSource for PlanExportSource {
    fn get_structures(
        &self,
        rtstruct_ref: &str,
    ) -> Result<BTreeMap<StructureKey, StructureInfo>, SourceError> {
        let export = self
            .exports
            .iter()
            .find(|e| e.rtstruct_ref == rtstruct_ref)
            .ok_or_else(|| SourceError::UnknownStructureSet(rtstruct_ref.to_string()))?;
        Ok(export
            .structures
            .iter()
            .map(|s| (s.key.clone(), s.info.clone()))
            .collect())
    }
}

impl DvhSource for PlanExportSource {
    type Output = CumulativeDvh;

    fn get_dvh(
        &self,
        plan: &PlanFiles,
        key: &StructureKey,
    ) -> Result<CumulativeDvh, DvhQueryError> {
        let unavailable = |message: &str| DvhQueryError::Unavailable {
            key: key.clone(),
            message: message.to_string(),
        };
        let export = self
            .exports
            .iter()
            .find(|e| e.rtstruct_ref == plan.rtstruct_ref && e.rtdose_ref == plan.rtdose_ref)
            .ok_or_else(|| unavailable("plan not exported"))?;
        let structure = export
            .structures
            .iter()
            .find(|s| &s.key == key)
            .ok_or_else(|| unavailable("structure not in structure set"))?;
        let counts = structure
            .counts
            .as_ref()
            .ok_or_else(|| unavailable("no dose histogram exported"))?;
        Ok(CumulativeDvh::with_bin_width(counts.clone(), export.bin_width_gy))
    }
}
