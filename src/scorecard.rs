use crate::aliases::AliasMatcher;
use crate::dvh::{Dvh, DvhCurve, DvhQueryError};
use crate::evaluate::{evaluate, Evaluation};
use crate::protocol::{ConstraintRow, NotFoundError, ProtocolCatalog};
use crate::source::{DvhSource, PlanFiles, PlanSource, SourceError, StructureSource};
use crate::types::{Structure, StructureKey, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ScorecardError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("protocol catalog is empty")]
    EmptyCatalog,
    #[error("no plan selected")]
    NoPlanSelected,
    #[error("structure {0} is not in the selected plan")]
    UnknownStructure(String),
    #[error("row {index} out of range for {len} rows")]
    RowOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardRow {
    #[serde(flatten)]
    pub rule: ConstraintRow,
    pub roi_name: String,
    pub roi_key: Option<StructureKey>,
    pub volume: Option<f64>,
    pub min_dose: Option<f64>,
    pub mean_dose: Option<f64>,
    pub max_dose: Option<f64>,
    pub constraint_calc: Option<f64>,
    pub pass_fail: Verdict,
}

impl ScorecardRow {
    pub fn new(rule: ConstraintRow) -> Self {
        Self {
            rule,
            roi_name: String::new(),
            roi_key: None,
            volume: None,
            min_dose: None,
            mean_dose: None,
            max_dose: None,
            constraint_calc: None,
            pass_fail: Verdict::Unresolved,
        }
    }

    pub fn template_roi(&self) -> &str {
        &self.rule.template_roi
    }

    pub fn constraint(&self) -> &str {
        &self.rule.string_rep
    }

    pub fn is_bound(&self) -> bool {
        self.roi_key.is_some()
    }

    fn bind(&mut self, name: &str, key: StructureKey) {
        self.roi_name = name.to_string();
        self.roi_key = Some(key);
    }

    fn clear_binding(&mut self) {
        self.roi_name.clear();
        self.roi_key = None;
    }

    fn clear_computed(&mut self) {
        self.volume = None;
        self.min_dose = None;
        self.mean_dose = None;
        self.max_dose = None;
        self.constraint_calc = None;
        self.pass_fail = Verdict::Unresolved;
    }

    fn apply_dvh(&mut self, dvh: &dyn Dvh) {
        self.volume = Some(dvh.volume());
        self.min_dose = Some(dvh.min());
        self.mean_dose = Some(dvh.mean());
        self.max_dose = Some(dvh.max());
    }

    fn apply_evaluation(&mut self, evaluation: Option<Evaluation>) {
        self.constraint_calc = evaluation.map(|e| e.value);
        self.pass_fail = evaluation.map_or(Verdict::Unresolved, |e| e.verdict);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Empty,
    Skeleton,
    Matching,
    Evaluated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    Evaluating,
    ComputingDvhs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: Stage,
    pub current: usize,
    pub total: usize,
}

impl Progress {
    fn idle() -> Self {
        Self {
            stage: Stage::Idle,
            current: 0,
            total: 0,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Stage::Idle => f.write_str("Idle"),
            Stage::Evaluating => write!(f, "Evaluating {} of {}", self.current, self.total),
            Stage::ComputingDvhs => {
                write!(f, "Calculating DVH {} of {}", self.current, self.total)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub protocol: String,
    pub fractionation: String,
    pub plan: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScorecardSummary {
    pub rows: usize,
    pub passed: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub unbound: usize,
}

type ProgressObserver = Box<dyn FnMut(&Progress)>;

/// Scorecard for one protocol/fractionation/plan selection. Every operation
/// runs to completion before returning, leaving the table in the
/// `Evaluated` phase (or `Empty` when no rows remain).
pub struct ScorecardState<S, D>
where
    S: StructureSource,
    D: DvhSource,
{
    catalog: Arc<ProtocolCatalog>,
    structures: S,
    dvhs: D,
    matcher: AliasMatcher,
    protocol: String,
    fractionation: String,
    plans: BTreeMap<String, PlanFiles>,
    plan: Option<String>,
    candidates: Vec<Structure>,
    rows: Vec<ScorecardRow>,
    overrides: BTreeMap<String, String>,
    dvh_cache: HashMap<StructureKey, Result<D::Output, DvhQueryError>>,
    phase: Phase,
    progress: Progress,
    observer: Option<ProgressObserver>,
}

impl<S, D> ScorecardState<S, D>
where
    S: StructureSource,
    D: DvhSource,
{
    /// Starts on the catalog's first protocol and its first fractionation.
    pub fn new(
        catalog: Arc<ProtocolCatalog>,
        structures: S,
        dvhs: D,
    ) -> Result<Self, ScorecardError> {
        let protocol = catalog
            .default_protocol()
            .ok_or(ScorecardError::EmptyCatalog)?
            .to_string();
        let fractionation = catalog
            .list_fractionations(&protocol)?
            .into_iter()
            .next()
            .ok_or_else(|| NotFoundError::Fractionation {
                protocol: protocol.clone(),
                fractionation: String::new(),
            })?;
        let rows = skeleton(catalog.get_constraint_rows(&protocol, &fractionation)?);
        let matcher = AliasMatcher::new().with_aliases(catalog.aliases.clone());
        let mut state = Self {
            catalog,
            structures,
            dvhs,
            matcher,
            protocol,
            fractionation,
            plans: BTreeMap::new(),
            plan: None,
            candidates: Vec::new(),
            rows,
            overrides: BTreeMap::new(),
            dvh_cache: HashMap::new(),
            phase: Phase::Skeleton,
            progress: Progress::idle(),
            observer: None,
        };
        let _ = state.rebind_and_evaluate();
        Ok(state)
    }

    pub fn with_match_threshold(mut self, threshold: u8) -> Self {
        self.matcher = self.matcher.with_threshold(threshold);
        let _ = self.rebind_and_evaluate();
        self
    }

    pub fn with_progress_observer(mut self, observer: impl FnMut(&Progress) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn catalog(&self) -> &ProtocolCatalog {
        &self.catalog
    }

    pub fn rows(&self) -> &[ScorecardRow] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&ScorecardRow> {
        self.rows.get(index)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn overrides(&self) -> &BTreeMap<String, String> {
        &self.overrides
    }

    pub fn candidates(&self) -> &[Structure] {
        &self.candidates
    }

    pub fn cached_dvh_count(&self) -> usize {
        self.dvh_cache.len()
    }

    pub fn plan_ids(&self) -> Vec<String> {
        self.plans.keys().cloned().collect()
    }

    pub fn selection(&self) -> Selection {
        Selection {
            protocol: self.protocol.clone(),
            fractionation: self.fractionation.clone(),
            plan: self.plan.clone(),
        }
    }

    /// Sorted distinct template ROIs of the current rows.
    pub fn template_roi_options(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|r| r.rule.template_roi.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Empty choice first, then candidate names in candidate order.
    pub fn structure_options(&self) -> Vec<String> {
        std::iter::once(String::new())
            .chain(self.candidates.iter().map(|c| c.name.clone()))
            .collect()
    }

    pub fn binding_for(&self, template_roi: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|r| r.rule.template_roi == template_roi)
            .map(|r| r.roi_name.as_str())
    }

    pub fn summary(&self) -> ScorecardSummary {
        let mut summary = ScorecardSummary {
            rows: self.rows.len(),
            ..ScorecardSummary::default()
        };
        for row in &self.rows {
            match (row.is_bound(), row.pass_fail) {
                (false, _) => summary.unbound += 1,
                (true, Verdict::Pass) => summary.passed += 1,
                (true, Verdict::Fail) => summary.failed += 1,
                (true, Verdict::Unresolved) => summary.unresolved += 1,
            }
        }
        summary
    }

    /// Switches protocol, keeping the current fractionation when the new
    /// protocol defines it and falling back to its first one otherwise.
    pub fn set_protocol(&mut self, name: &str) -> Result<ScorecardSummary, ScorecardError> {
        let fractionations = self.catalog.list_fractionations(name)?;
        let fractionation = if fractionations.contains(&self.fractionation) {
            self.fractionation.clone()
        } else {
            fractionations
                .into_iter()
                .next()
                .ok_or_else(|| NotFoundError::Fractionation {
                    protocol: name.to_string(),
                    fractionation: self.fractionation.clone(),
                })?
        };
        self.select(name, &fractionation)
    }

    pub fn set_fractionation(&mut self, name: &str) -> Result<ScorecardSummary, ScorecardError> {
        let protocol = self.protocol.clone();
        self.select(&protocol, name)
    }

    /// Rebuilds the row table for the current selection, restoring deleted rows.
    pub fn reset(&mut self) -> Result<ScorecardSummary, ScorecardError> {
        let protocol = self.protocol.clone();
        let fractionation = self.fractionation.clone();
        self.select(&protocol, &fractionation)
    }

    fn select(
        &mut self,
        protocol: &str,
        fractionation: &str,
    ) -> Result<ScorecardSummary, ScorecardError> {
        let rows = skeleton(self.catalog.get_constraint_rows(protocol, fractionation)?);
        info!(protocol, fractionation, rows = rows.len(), "protocol selected");
        self.protocol = protocol.to_string();
        self.fractionation = fractionation.to_string();
        self.rows = rows;
        self.phase = Phase::Skeleton;
        Ok(self.rebind_and_evaluate())
    }

    /// Rescans the plan list. A selected plan that disappeared is replaced by
    /// the first listed plan, or cleared when none remain.
    pub fn refresh_plans(&mut self, source: &dyn PlanSource) -> Result<(), ScorecardError> {
        self.plans = source.list_plans()?;
        info!(plans = self.plans.len(), "plan list refreshed");
        let still_listed = self
            .plan
            .as_ref()
            .map_or(false, |id| self.plans.contains_key(id));
        if still_listed {
            return Ok(());
        }
        match self.plans.keys().next().cloned() {
            Some(first) => {
                let _ = self.set_plan(&first)?;
            }
            None => {
                self.clear_plan();
                let _ = self.rebind_and_evaluate();
            }
        }
        Ok(())
    }

    pub fn set_plan(&mut self, plan_id: &str) -> Result<ScorecardSummary, ScorecardError> {
        let files = self
            .plans
            .get(plan_id)
            .cloned()
            .ok_or_else(|| NotFoundError::Plan(plan_id.to_string()))?;
        // Cache and overrides go before the structure list is reloaded.
        self.clear_plan();
        let structures = self.structures.get_structures(&files.rtstruct_ref)?;
        self.candidates = structures
            .into_iter()
            .filter(|(_, info)| !info.is_marker())
            .map(|(key, info)| Structure {
                key,
                name: info.name,
                structure_type: info.structure_type,
            })
            .collect();
        self.plan = Some(plan_id.to_string());
        info!(plan = plan_id, candidates = self.candidates.len(), "plan selected");
        Ok(self.rebind_and_evaluate())
    }

    /// Binds every row of `template_roi` to `structure_name`. An empty name
    /// drops the override and blanks those rows until the next rebind.
    pub fn set_override(
        &mut self,
        template_roi: &str,
        structure_name: &str,
    ) -> Result<ScorecardSummary, ScorecardError> {
        let indices = self.indices_for(template_roi);
        if structure_name.is_empty() {
            self.overrides.remove(template_roi);
            for &i in &indices {
                self.rows[i].clear_binding();
                self.rows[i].clear_computed();
            }
            debug!(template_roi, "override cleared");
            return Ok(self.summary());
        }

        if self.plan.is_none() {
            return Err(ScorecardError::NoPlanSelected);
        }
        let key = self
            .key_for(structure_name)
            .ok_or_else(|| ScorecardError::UnknownStructure(structure_name.to_string()))?;
        self.overrides
            .insert(template_roi.to_string(), structure_name.to_string());
        info!(template_roi, structure_name, rows = indices.len(), "override set");

        let total = indices.len();
        for (n, &i) in indices.iter().enumerate() {
            self.report(Stage::Evaluating, n + 1, total);
            self.rows[i].bind(structure_name, key.clone());
            self.rows[i].clear_computed();
            self.evaluate_row(i);
        }
        self.report(Stage::Idle, 0, 0);
        Ok(self.summary())
    }

    /// Keeps `template_roi` unbound across rebinds until the override is
    /// cleared or the plan changes.
    pub fn exclude_roi(&mut self, template_roi: &str) -> ScorecardSummary {
        self.overrides
            .insert(template_roi.to_string(), String::new());
        for i in self.indices_for(template_roi) {
            self.rows[i].clear_binding();
            self.rows[i].clear_computed();
        }
        self.summary()
    }

    pub fn rebind_and_evaluate(&mut self) -> ScorecardSummary {
        self.phase = Phase::Matching;
        let templates: Vec<&str> = self.rows.iter().map(|r| r.rule.template_roi.as_str()).collect();
        let names: Vec<&str> = self.candidates.iter().map(|c| c.name.as_str()).collect();
        let bindings = self.matcher.match_rois(&templates, &names, &self.overrides);

        for row in &mut self.rows {
            let name = bindings
                .get(&row.rule.template_roi)
                .map(String::as_str)
                .unwrap_or_default();
            let key = (!name.is_empty())
                .then(|| key_in(&self.candidates, name))
                .flatten();
            match key {
                Some(key) => row.bind(name, key),
                None => row.clear_binding(),
            }
            row.clear_computed();
        }

        let bound: Vec<usize> = (0..self.rows.len()).filter(|&i| self.rows[i].is_bound()).collect();
        let total = bound.len();
        for (n, &i) in bound.iter().enumerate() {
            self.report(Stage::Evaluating, n + 1, total);
            self.evaluate_row(i);
        }
        self.report(Stage::Idle, 0, 0);
        self.phase = if self.rows.is_empty() {
            Phase::Empty
        } else {
            Phase::Evaluated
        };

        let summary = self.summary();
        info!(
            passed = summary.passed,
            failed = summary.failed,
            unresolved = summary.unresolved,
            unbound = summary.unbound,
            "scorecard evaluated"
        );
        summary
    }

    /// Removes rows by index. Nothing is removed when any index is out of range.
    pub fn delete_rows(&mut self, indices: &[usize]) -> Result<usize, ScorecardError> {
        let mut ordered: Vec<usize> = indices.to_vec();
        ordered.sort_unstable_by(|a, b| b.cmp(a));
        ordered.dedup();
        if let Some(&index) = ordered.first() {
            if index >= self.rows.len() {
                return Err(ScorecardError::RowOutOfRange {
                    index,
                    len: self.rows.len(),
                });
            }
        }
        for &index in &ordered {
            self.rows.remove(index);
        }
        if self.rows.is_empty() {
            self.phase = Phase::Empty;
        }
        Ok(ordered.len())
    }

    /// Normalized DVH curve of every candidate structure. Structures whose DVH
    /// cannot be computed are skipped.
    pub fn dvh_curves(&mut self) -> Vec<DvhCurve> {
        let Some(files) = self.plan.as_ref().and_then(|id| self.plans.get(id)).cloned() else {
            return Vec::new();
        };
        let total = self.candidates.len();
        let mut curves = Vec::with_capacity(total);
        for n in 0..total {
            self.report(Stage::ComputingDvhs, n + 1, total);
            let candidate = &self.candidates[n];
            match cached_dvh(&mut self.dvh_cache, &self.dvhs, &files, &candidate.key) {
                Ok(dvh) => curves.push(DvhCurve::from_dvh(
                    candidate.name.clone(),
                    candidate.key.clone(),
                    dvh,
                )),
                Err(err) => warn!(roi = %candidate.name, error = %err, "dvh unavailable"),
            }
        }
        self.report(Stage::Idle, 0, 0);
        curves
    }

    fn clear_plan(&mut self) {
        self.overrides.clear();
        self.dvh_cache.clear();
        self.candidates.clear();
        self.plan = None;
        for row in &mut self.rows {
            row.clear_binding();
            row.clear_computed();
        }
    }

    fn indices_for(&self, template_roi: &str) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.rule.template_roi == template_roi)
            .map(|(i, _)| i)
            .collect()
    }

    fn key_for(&self, name: &str) -> Option<StructureKey> {
        key_in(&self.candidates, name)
    }

    fn evaluate_row(&mut self, index: usize) {
        let Some(files) = self.plan.as_ref().and_then(|id| self.plans.get(id)) else {
            return;
        };
        let row = &mut self.rows[index];
        let Some(key) = row.roi_key.as_ref() else {
            return;
        };
        match cached_dvh(&mut self.dvh_cache, &self.dvhs, files, key) {
            Ok(dvh) => {
                row.apply_dvh(dvh);
                match evaluate(&row.rule, dvh, row.mean_dose) {
                    Ok(evaluation) => row.apply_evaluation(Some(evaluation)),
                    Err(err) => {
                        warn!(
                            row = index,
                            constraint = %row.rule.string_rep,
                            error = %err,
                            "constraint query failed"
                        );
                        row.apply_evaluation(None);
                    }
                }
            }
            Err(err) => {
                warn!(row = index, roi = %row.roi_name, error = %err, "dvh unavailable");
                row.clear_computed();
            }
        }
    }

    fn report(&mut self, stage: Stage, current: usize, total: usize) {
        self.progress = Progress {
            stage,
            current,
            total,
        };
        if stage != Stage::Idle {
            debug!(progress = %self.progress, "scorecard progress");
        }
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.progress);
        }
    }
}

fn skeleton(rows: &[ConstraintRow]) -> Vec<ScorecardRow> {
    rows.iter().cloned().map(ScorecardRow::new).collect()
}

fn key_in(candidates: &[Structure], name: &str) -> Option<StructureKey> {
    candidates
        .iter()
        .find(|c| c.name == name)
        .map(|c| c.key.clone())
}

fn cached_dvh<'a, D: DvhSource>(
    cache: &'a mut HashMap<StructureKey, Result<D::Output, DvhQueryError>>,
    source: &D,
    files: &PlanFiles,
    key: &StructureKey,
) -> Result<&'a D::Output, &'a DvhQueryError> {
    let entry: &'a Result<D::Output, DvhQueryError> = match cache.entry(key.clone()) {
        Entry::Occupied(hit) => {
            debug!(key = %key, "dvh cache hit");
            hit.into_mut()
        }
        Entry::Vacant(slot) => {
            debug!(key = %key, "computing dvh");
            slot.insert(source.get_dvh(files, key))
        }
    };
    entry.as_ref()
}
