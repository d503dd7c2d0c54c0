use crate::similarity::{Similarity, WeightedRatio};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Minimum score (0-100) for an automatic template ROI binding.
pub const MATCH_THRESHOLD: u8 = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiMatch {
    pub candidate: String,
    pub candidate_index: usize,
    pub score: u8,
}

#[derive(Clone)]
pub struct AliasMatcher {
    threshold: u8,
    scorer: Arc<dyn Similarity>,
    aliases: BTreeMap<String, Vec<String>>,
}

impl fmt::Debug for AliasMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliasMatcher")
            .field("threshold", &self.threshold)
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

impl Default for AliasMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasMatcher {
    pub fn new() -> Self {
        Self {
            threshold: MATCH_THRESHOLD,
            scorer: Arc::new(WeightedRatio),
            aliases: BTreeMap::new(),
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold.min(100);
        self
    }

    pub fn with_scorer(mut self, scorer: impl Similarity + 'static) -> Self {
        self.scorer = Arc::new(scorer);
        self
    }

    /// Extra names tried for a template ROI, e.g. `"Spinal Cord" -> ["Cord"]`.
    pub fn with_aliases(mut self, aliases: BTreeMap<String, Vec<String>>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Highest scoring candidate regardless of the threshold. Ties go to the
    /// earliest candidate.
    pub fn best_match<C: AsRef<str>>(&self, template: &str, candidates: &[C]) -> Option<RoiMatch> {
        let mut best: Option<RoiMatch> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let candidate = candidate.as_ref();
            let score = self.score_template(template, candidate);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(RoiMatch {
                    candidate: candidate.to_string(),
                    candidate_index: index,
                    score,
                });
            }
        }
        best
    }

    /// Binds every template to a candidate name, or to `""` when nothing
    /// clears the threshold. Overrides replace the automatic result, an empty
    /// override included.
    pub fn match_rois<T, C>(
        &self,
        templates: &[T],
        candidates: &[C],
        overrides: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String>
    where
        T: AsRef<str>,
        C: AsRef<str>,
    {
        let mut out = BTreeMap::new();
        for template in templates {
            let template = template.as_ref();
            if out.contains_key(template) {
                continue;
            }
            let auto = match self.best_match(template, candidates) {
                Some(found) if found.score >= self.threshold => {
                    debug!(
                        template,
                        candidate = %found.candidate,
                        score = found.score,
                        "roi matched"
                    );
                    found.candidate
                }
                Some(found) => {
                    debug!(
                        template,
                        best = %found.candidate,
                        score = found.score,
                        "roi below threshold"
                    );
                    String::new()
                }
                None => String::new(),
            };
            out.insert(template.to_string(), auto);
        }
        for (template, value) in overrides {
            if let Some(slot) = out.get_mut(template) {
                *slot = value.clone();
            }
        }
        out
    }

    fn score_template(&self, template: &str, candidate: &str) -> u8 {
        let direct = self.scorer.score(template, candidate);
        self.aliases
            .get(template)
            .into_iter()
            .flatten()
            .map(|alias| self.scorer.score(alias, candidate))
            .fold(direct, u8::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn heart_prv_binds_to_heart() {
        let matcher = AliasMatcher::new();
        let result = matcher.match_rois(
            &["Heart"],
            &names(&["Liver", "Heart_PRV", "BODY"]),
            &BTreeMap::new(),
        );
        assert_eq!(result["Heart"], "Heart_PRV");
    }

    #[test]
    fn below_threshold_yields_empty_binding() {
        let matcher = AliasMatcher::new();
        let result = matcher.match_rois(&["Heart"], &names(&["Liver", "PTV"]), &BTreeMap::new());
        assert_eq!(result["Heart"], "");
    }

    #[test]
    fn ties_go_to_first_candidate() {
        let matcher = AliasMatcher::new();
        let result = matcher.match_rois(
            &["Heart"],
            &names(&["Heart_PRV", "heart"]),
            &BTreeMap::new(),
        );
        assert_eq!(result["Heart"], "heart");

        let exact_only = AliasMatcher::new().with_scorer(|_: &str, _: &str| -> u8 { 90 });
        let result = exact_only.match_rois(&["Heart"], &names(&["B", "A"]), &BTreeMap::new());
        assert_eq!(result["Heart"], "B");
    }

    #[test]
    fn overrides_win_even_when_empty() {
        let matcher = AliasMatcher::new();
        let mut overrides = BTreeMap::new();
        overrides.insert("Heart".to_string(), "Liver".to_string());
        overrides.insert("Esophagus".to_string(), String::new());
        overrides.insert("Not In Protocol".to_string(), "Liver".to_string());

        let result = matcher.match_rois(
            &["Heart", "Esophagus"],
            &names(&["Heart", "Esophagus", "Liver"]),
            &overrides,
        );
        assert_eq!(result["Heart"], "Liver");
        assert_eq!(result["Esophagus"], "");
        assert!(!result.contains_key("Not In Protocol"));
    }

    #[test]
    fn aliases_extend_template_names() {
        let mut aliases = BTreeMap::new();
        aliases.insert("Spinal Cord".to_string(), vec!["SC".to_string()]);
        let candidates = names(&["sc", "Lung_L"]);

        let plain = AliasMatcher::new();
        let result = plain.match_rois(&["Spinal Cord"], &candidates, &BTreeMap::new());
        assert_eq!(result["Spinal Cord"], "");

        let with_alias = AliasMatcher::new().with_aliases(aliases);
        assert_eq!(
            with_alias.match_rois(&["Spinal Cord"], &candidates, &BTreeMap::new())["Spinal Cord"],
            "sc"
        );
    }

    #[test]
    fn threshold_is_configurable() {
        let strict = AliasMatcher::new().with_threshold(95);
        let result = strict.match_rois(&["Heart"], &names(&["Heart_PRV"]), &BTreeMap::new());
        assert_eq!(result["Heart"], "");
        assert_eq!(strict.threshold(), 95);
    }

    #[test]
    fn short_template_binds_at_length_ratio_8() {
        let matcher = AliasMatcher::new();
        let candidates = names(&["rib left posterior ribs1"]);
        let result = matcher.match_rois(&["Rib"], &candidates, &BTreeMap::new());
        assert_eq!(result["Rib"], "rib left posterior ribs1");
    }

    proptest! {
        #[test]
        fn matching_is_deterministic(
            templates in proptest::collection::vec("[A-Za-z_ ]{1,12}", 1..6),
            candidates in proptest::collection::vec("[A-Za-z_ ]{1,12}", 0..8),
        ) {
            let matcher = AliasMatcher::new();
            let first = matcher.match_rois(&templates, &candidates, &BTreeMap::new());
            let second = matcher.match_rois(&templates, &candidates, &BTreeMap::new());
            prop_assert_eq!(first, second);
        }
    }
}
