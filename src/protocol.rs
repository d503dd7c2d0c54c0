use crate::types::{CalcType, Operator};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Volume (cc) at which point "max dose" constraints are defined.
pub const MAX_DOSE_VOLUME: f64 = 0.03;

fn default_max_dose_volume() -> f64 {
    MAX_DOSE_VOLUME
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintRow {
    pub template_roi: String,
    pub calc_type: CalcType,
    pub operator: Operator,
    pub threshold_value: f64,
    pub input_value: f64,
    pub string_rep: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fractionation {
    pub name: String,
    pub constraints: Vec<ConstraintRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    pub fractionations: Vec<Fractionation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolCatalog {
    #[serde(default = "default_max_dose_volume")]
    pub max_dose_volume_cc: f64,
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
    pub protocols: Vec<Protocol>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    #[error("unknown protocol {0}")]
    Protocol(String),
    #[error("unknown fractionation {fractionation} for protocol {protocol}")]
    Fractionation {
        protocol: String,
        fractionation: String,
    },
    #[error("unknown plan {0}")]
    Plan(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
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
    #[error("unsupported catalog extension '{0}'; expected .yaml/.yml/.json")]
    UnsupportedFormat(String),
    #[error("duplicate protocol {0}")]
    DuplicateProtocol(String),
    #[error("duplicate fractionation {fractionation} in protocol {protocol}")]
    DuplicateFractionation {
        protocol: String,
        fractionation: String,
    },
    #[error("invalid constraint '{string_rep}' in {protocol}/{fractionation}: {reason}")]
    InvalidRow {
        protocol: String,
        fractionation: String,
        string_rep: String,
        reason: String,
    },
}

impl ProtocolCatalog {
    pub fn from_yaml_str(input: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_yaml::from_str(input)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json_str(input: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_json::from_str(input)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref).map_err(|source| CatalogError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;
        let ext = path_ref
            .extension()
            .and_then(|v| v.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&raw),
            "json" => Self::from_json_str(&raw),
            _ => Err(CatalogError::UnsupportedFormat(ext)),
        }
    }

    pub fn list_protocols(&self) -> Vec<String> {
        self.protocols.iter().map(|p| p.name.clone()).collect()
    }

    pub fn default_protocol(&self) -> Option<&str> {
        self.protocols.first().map(|p| p.name.as_str())
    }

    pub fn list_fractionations(&self, protocol: &str) -> Result<Vec<String>, NotFoundError> {
        Ok(self
            .protocol(protocol)?
            .fractionations
            .iter()
            .map(|f| f.name.clone())
            .collect())
    }

    pub fn get_constraint_rows(
        &self,
        protocol: &str,
        fractionation: &str,
    ) -> Result<&[ConstraintRow], NotFoundError> {
        self.protocol(protocol)?
            .fractionations
            .iter()
            .find(|f| f.name == fractionation)
            .map(|f| f.constraints.as_slice())
            .ok_or_else(|| NotFoundError::Fractionation {
                protocol: protocol.to_string(),
                fractionation: fractionation.to_string(),
            })
    }

    fn protocol(&self, name: &str) -> Result<&Protocol, NotFoundError> {
        self.protocols
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| NotFoundError::Protocol(name.to_string()))
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let mut protocols = HashSet::new();
        for protocol in &self.protocols {
            if !protocols.insert(protocol.name.as_str()) {
                return Err(CatalogError::DuplicateProtocol(protocol.name.clone()));
            }
            let mut fractionations = HashSet::new();
            for fx in &protocol.fractionations {
                if !fractionations.insert(fx.name.as_str()) {
                    return Err(CatalogError::DuplicateFractionation {
                        protocol: protocol.name.clone(),
                        fractionation: fx.name.clone(),
                    });
                }
                for row in &fx.constraints {
                    let reason = if row.template_roi.trim().is_empty() {
                        Some("empty template roi")
                    } else if !row.threshold_value.is_finite() {
                        Some("threshold is not finite")
                    } else if !row.input_value.is_finite() {
                        Some("input value is not finite")
                    } else {
                        None
                    };
                    if let Some(reason) = reason {
                        return Err(CatalogError::InvalidRow {
                            protocol: protocol.name.clone(),
                            fractionation: fx.name.clone(),
                            string_rep: row.string_rep.clone(),
                            reason: reason.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
