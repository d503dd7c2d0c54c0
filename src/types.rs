use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalcType {
    Volume,
    Dose,
    Mean,
    MVS,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">")]
    GreaterThan,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::LessThan => "<",
            Self::GreaterThan => ">",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Row verdict. `Unresolved` renders as an empty cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
    #[default]
    #[serde(rename = "")]
    Unresolved,
}

impl Verdict {
    /// Strict comparison: a value equal to the threshold fails for either operator.
    pub fn judge(value: Option<f64>, operator: Operator, threshold: f64) -> Self {
        let Some(value) = value else {
            return Self::Unresolved;
        };
        let passed = match operator {
            Operator::LessThan => value < threshold,
            Operator::GreaterThan => value > threshold,
        };
        if passed {
            Self::Pass
        } else {
            Self::Fail
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "Pass",
            Self::Fail => "Fail",
            Self::Unresolved => "",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructureKey(String);

impl StructureKey {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StructureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureInfo {
    pub name: String,
    #[serde(rename = "type", default)]
    pub structure_type: String,
}

impl StructureInfo {
    pub fn new(name: impl AsRef<str>, structure_type: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().to_string(),
            structure_type: structure_type.as_ref().trim().to_string(),
        }
    }

    pub fn is_marker(&self) -> bool {
        self.structure_type.eq_ignore_ascii_case("MARKER")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    pub key: StructureKey,
    pub name: String,
    #[serde(rename = "type", default)]
    pub structure_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "cc")]
    Cc,
    #[serde(rename = "Gy")]
    Gy,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cc => f.write_str("cc"),
            Self::Gy => f.write_str("Gy"),
        }
    }
}

/// Unit-qualified DVH query result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn cc(value: f64) -> Self {
        Self {
            value,
            unit: Unit::Cc,
        }
    }

    pub fn gy(value: f64) -> Self {
        Self {
            value,
            unit: Unit::Gy,
        }
    }

    pub fn magnitude(self) -> f64 {
        self.value
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}
