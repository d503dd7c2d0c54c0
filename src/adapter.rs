use crate::dvh::{CumulativeDvh, Dvh, DvhQueryError};
use crate::source::{DvhSource, PlanFiles, PlanSource, SourceError, StructureSource};
use crate::types::{StructureInfo, StructureKey};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default, Clone)]
pub struct StaticPlanSource {
    plans: BTreeMap<String, PlanFiles>,
}

impl StaticPlanSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, plan_id: impl AsRef<str>, files: PlanFiles) {
        self.plans.insert(plan_id.as_ref().trim().to_string(), files);
    }
}

impl PlanSource for StaticPlanSource {
    fn list_plans(&self) -> Result<BTreeMap<String, PlanFiles>, SourceError> {
        Ok(self.plans.clone())
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticStructureSource {
    sets: HashMap<String, BTreeMap<StructureKey, StructureInfo>>,
}

impl StaticStructureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        rtstruct_ref: impl AsRef<str>,
        key: impl AsRef<str>,
        info: StructureInfo,
    ) {
        self.sets
            .entry(rtstruct_ref.as_ref().to_string())
            .or_default()
            .insert(StructureKey::new(key), info);
    }
}

impl StructureSource for StaticStructureSource {
    fn get_structures(
        &self,
        rtstruct_ref: &str,
    ) -> Result<BTreeMap<StructureKey, StructureInfo>, SourceError> {
        self.sets
            .get(rtstruct_ref)
            .cloned()
            .ok_or_else(|| SourceError::UnknownStructureSet(rtstruct_ref.to_string()))
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticDvhSource {
    dvhs: HashMap<(PlanFiles, StructureKey), CumulativeDvh>,
}

impl StaticDvhSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, plan: &PlanFiles, key: impl AsRef<str>, dvh: CumulativeDvh) {
        self.dvhs.insert((plan.clone(), StructureKey::new(key)), dvh);
    }
}

impl DvhSource for StaticDvhSource {
    type Output = CumulativeDvh;

    fn get_dvh(
        &self,
        plan: &PlanFiles,
        key: &StructureKey,
    ) -> Result<CumulativeDvh, DvhQueryError> {
        self.dvhs
            .get(&(plan.clone(), key.clone()))
            .cloned()
            .ok_or_else(|| DvhQueryError::Unavailable {
                key: key.clone(),
                message: format!("no dose for {}", plan.rtdose_ref),
            })
    }
}

pub struct FnDvhSource<F> {
    compute: F,
}

impl<F> FnDvhSource<F> {
    pub fn new(compute: F) -> Self {
        Self { compute }
    }
}

impl<F, T> DvhSource for FnDvhSource<F>
where
    F: Fn(&PlanFiles, &StructureKey) -> Result<T, DvhQueryError>,
    T: Dvh,
{
    type Output = T;

    fn get_dvh(&self, plan: &PlanFiles, key: &StructureKey) -> Result<T, DvhQueryError> {
        (self.compute)(plan, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_structure_source_groups_by_structure_set() {
        let mut source = StaticStructureSource::new();
        source.insert("RS.1", "2", StructureInfo::new("Heart", "ORGAN"));
        source.insert("RS.1", "1", StructureInfo::new("BODY", "EXTERNAL"));
        let structures = source.get_structures("RS.1").unwrap();
        let names: Vec<&str> = structures.values().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["BODY", "Heart"]);
        assert_eq!(
            source.get_structures("RS.2").unwrap_err(),
            SourceError::UnknownStructureSet("RS.2".to_string())
        );
    }

    #[test]
    fn static_dvh_source_is_keyed_by_plan_and_structure() {
        let plan = PlanFiles::new("RS.1", "RD.1");
        let other = PlanFiles::new("RS.1", "RD.2");
        let mut source = StaticDvhSource::new();
        source.insert(&plan, "7", CumulativeDvh::new(vec![3.0, 1.0]));

        assert_eq!(source.get_dvh(&plan, &StructureKey::new("7")).unwrap().volume(), 3.0);
        assert!(matches!(
            source.get_dvh(&other, &StructureKey::new("7")),
            Err(DvhQueryError::Unavailable { .. })
        ));
    }

    #[test]
    fn fn_dvh_source_delegates_to_closure() {
        let source = FnDvhSource::new(|_: &PlanFiles, key: &StructureKey| {
            if key.as_str() == "1" {
                Ok(CumulativeDvh::new(vec![2.0]))
            } else {
                Err(DvhQueryError::EmptyHistogram)
            }
        });
        let plan = PlanFiles::new("RS", "RD");
        assert_eq!(source.get_dvh(&plan, &StructureKey::new("1")).unwrap().volume(), 2.0);
        assert!(source.get_dvh(&plan, &StructureKey::new("2")).is_err());
    }

    #[test]
    fn static_plan_source_lists_sorted_plan_ids() {
        let mut plans = StaticPlanSource::new();
        plans.insert("Lung SBRT", PlanFiles::new("RS.2", "RD.2"));
        plans.insert("Liver SBRT", PlanFiles::new("RS.1", "RD.1"));
        let listed = plans.list_plans().unwrap();
        assert_eq!(listed.keys().collect::<Vec<_>>(), vec!["Liver SBRT", "Lung SBRT"]);
    }
}
