use crate::dvh::{Dvh, DvhQueryError};
use crate::protocol::ConstraintRow;
use crate::types::{CalcType, Verdict};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub value: f64,
    pub verdict: Verdict,
}

/// Computes the constraint value for `row` and judges it against the row's
/// threshold. `known_mean` is the mean dose already shown on the row, if any.
pub fn evaluate(
    row: &ConstraintRow,
    dvh: &dyn Dvh,
    known_mean: Option<f64>,
) -> Result<Evaluation, DvhQueryError> {
    let value = constraint_value(row, dvh, known_mean)?;
    Ok(Evaluation {
        value,
        verdict: Verdict::judge(Some(value), row.operator, row.threshold_value),
    })
}

pub fn constraint_value(
    row: &ConstraintRow,
    dvh: &dyn Dvh,
    known_mean: Option<f64>,
) -> Result<f64, DvhQueryError> {
    match row.calc_type {
        CalcType::Volume => Ok(dvh.dose_constraint(row.input_value)?.magnitude()),
        CalcType::Dose => Ok(dvh.volume_constraint(row.input_value)?.magnitude()),
        CalcType::Mean => Ok(known_mean.unwrap_or_else(|| dvh.mean())),
        CalcType::MVS => {
            let covered = dvh.volume_constraint(row.input_value)?.magnitude();
            Ok(dvh.volume() - covered)
        }
    }
}
