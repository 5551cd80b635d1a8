//! Labeled calibration cases and the objective the optimizer climbs.

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::chart::{Chart, Pillar};
use crate::constants::DEFAULT_MAX_ITERATIONS;
use crate::error::{CalibrationError, ChartError};
use crate::evaluate::{Category, Classification};
use crate::params::ParameterSet;
use crate::pipeline::simulate;
use crate::token::Stem;

/// Expected outcome for a case. At least one of the two must be present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Label {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Target category scores (shares of weighted energy).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<Category, f64>,
}

impl Label {
    pub fn is_empty(&self) -> bool {
        self.classification.is_none() && self.categories.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationCase {
    pub name: String,
    pub chart: Chart,
    pub label: Label,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireCase {
    name: String,
    pillars: Vec<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    decade: Option<String>,
    #[serde(default)]
    year: Option<String>,
    #[serde(default)]
    label: Label,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireCaseSet {
    cases: Vec<WireCase>,
}

impl WireCase {
    fn chart(&self) -> Result<Chart, ChartError> {
        let mut chart = Chart::parse(&self.pillars)?;
        if let Some(r) = &self.reference {
            chart = chart.with_reference(r.parse::<Stem>()?);
        }
        if let Some(d) = &self.decade {
            chart = chart.with_decade(d.parse::<Pillar>()?);
        }
        if let Some(y) = &self.year {
            chart = chart.with_year(y.parse::<Pillar>()?);
        }
        Ok(chart)
    }
}

/// Outcome of one case under one parameter set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaseOutcome {
    pub name: String,
    pub predicted: Classification,
    pub expected: Option<Classification>,
    /// Squared category-score errors summed over the case's targets.
    pub category_error: f64,
    pub category_targets: usize,
    pub converged: bool,
}

impl CaseOutcome {
    pub fn correct(&self) -> Option<bool> {
        self.expected.map(|e| e == self.predicted)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaseSetReport {
    pub score: f64,
    pub accuracy: f64,
    pub category_mse: f64,
    pub outcomes: Vec<CaseOutcome>,
}

/// Validated, immutable set of labeled cases.
#[derive(Clone, Debug)]
pub struct CaseSet {
    cases: Vec<CalibrationCase>,
    max_iterations: usize,
    category_loss_weight: f64,
}

impl CaseSet {
    pub fn new(cases: Vec<CalibrationCase>) -> Result<Self, CalibrationError> {
        if cases.is_empty() {
            return Err(CalibrationError::InvalidCaseSet("no cases".into()));
        }
        let mut seen = HashSet::new();
        for case in &cases {
            if !seen.insert(case.name.as_str()) {
                return Err(CalibrationError::InvalidCaseSet(format!(
                    "duplicate case name {:?}",
                    case.name
                )));
            }
            if case.label.is_empty() {
                return Err(CalibrationError::InvalidCaseSet(format!(
                    "case {:?} has no label",
                    case.name
                )));
            }
            if let Some((c, v)) = case.label.categories.iter().find(|(_, v)| !v.is_finite()) {
                return Err(CalibrationError::InvalidCaseSet(format!(
                    "case {:?}: {c} target {v} is not finite",
                    case.name
                )));
            }
        }
        Ok(Self {
            cases,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            category_loss_weight: 1.0,
        })
    }

    /// Parse and validate a case-set document. Every chart is checked
    /// before anything is simulated.
    pub fn from_json(json: &str) -> Result<Self, CalibrationError> {
        let wire: WireCaseSet = serde_json::from_str(json)?;
        let cases = wire
            .cases
            .into_iter()
            .map(|w| {
                let chart = w.chart().map_err(|source| CalibrationError::Case {
                    name: w.name.clone(),
                    source,
                })?;
                Ok(CalibrationCase {
                    name: w.name,
                    chart,
                    label: w.label,
                })
            })
            .collect::<Result<Vec<_>, CalibrationError>>()?;
        Self::new(cases)
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_category_loss_weight(mut self, weight: f64) -> Self {
        self.category_loss_weight = weight;
        self
    }

    pub fn cases(&self) -> &[CalibrationCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Simulate every case in parallel and aggregate once, in case order.
    pub fn report(&self, params: &ParameterSet) -> CaseSetReport {
        let outcomes: Vec<CaseOutcome> = self
            .cases
            .par_iter()
            .map(|case| {
                let out = simulate(&case.chart, params, self.max_iterations);
                let mut category_error = 0.0;
                for (category, target) in &case.label.categories {
                    let diff = out.evaluation.scores.get(*category) - target;
                    category_error += diff * diff;
                }
                CaseOutcome {
                    name: case.name.clone(),
                    predicted: out.classification(),
                    expected: case.label.classification,
                    category_error,
                    category_targets: case.label.categories.len(),
                    converged: out.converged,
                }
            })
            .collect();

        let labeled = outcomes.iter().filter(|o| o.expected.is_some()).count();
        let correct = outcomes.iter().filter(|o| o.correct() == Some(true)).count();
        let accuracy = if labeled > 0 {
            correct as f64 / labeled as f64
        } else {
            0.0
        };
        let targets: usize = outcomes.iter().map(|o| o.category_targets).sum();
        let category_mse = if targets > 0 {
            outcomes.iter().map(|o| o.category_error).sum::<f64>() / targets as f64
        } else {
            0.0
        };

        CaseSetReport {
            score: accuracy - self.category_loss_weight * category_mse,
            accuracy,
            category_mse,
            outcomes,
        }
    }
}

/// Quantity the optimizer maximizes.
pub trait Objective: Sync {
    fn score(&self, params: &ParameterSet) -> f64;
}

impl<F> Objective for F
where
    F: Fn(&ParameterSet) -> f64 + Sync,
{
    fn score(&self, params: &ParameterSet) -> f64 {
        self(params)
    }
}

impl Objective for CaseSet {
    fn score(&self, params: &ParameterSet) -> f64 {
        self.report(params).score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASES: &str = r#"{
        "cases": [
            { "name": "wood", "pillars": ["JiaYin", "YiMao", "JiaYin", "YiHai"],
              "label": { "classification": "dominant_support" } },
            { "name": "mixed", "pillars": ["GengShen", "JiaYin", "WuChen", "GuiHai"],
              "reference": "Wu", "year": "BingWu",
              "label": { "categories": { "companion": 0.3, "wealth": 0.1 } } }
        ]
    }"#;

    #[test]
    fn test_from_json() {
        let set = CaseSet::from_json(CASES).unwrap();
        assert_eq!(set.len(), 2);
        let mixed = &set.cases()[1];
        assert_eq!(mixed.chart.reference, Some(Stem::Wu));
        assert!(mixed.chart.year.is_some());
        assert_eq!(mixed.label.categories.len(), 2);
    }

    #[test]
    fn test_bad_chart_names_case() {
        let json = r#"{ "cases": [
            { "name": "short", "pillars": ["JiaYin"], "label": { "classification": "balanced" } }
        ] }"#;
        match CaseSet::from_json(json) {
            Err(CalibrationError::Case { name, source }) => {
                assert_eq!(name, "short");
                assert_eq!(source, ChartError::PillarCount(1));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_sets() {
        assert!(matches!(
            CaseSet::from_json(r#"{ "cases": [] }"#),
            Err(CalibrationError::InvalidCaseSet(_))
        ));
        let unlabeled = r#"{ "cases": [
            { "name": "a", "pillars": ["JiaYin", "YiMao", "JiaYin", "YiHai"] }
        ] }"#;
        assert!(matches!(
            CaseSet::from_json(unlabeled),
            Err(CalibrationError::InvalidCaseSet(_))
        ));
        let duplicate = r#"{ "cases": [
            { "name": "a", "pillars": ["JiaYin", "YiMao", "JiaYin", "YiHai"], "label": { "classification": "balanced" } },
            { "name": "a", "pillars": ["JiaYin", "YiMao", "JiaYin", "YiHai"], "label": { "classification": "balanced" } }
        ] }"#;
        assert!(matches!(
            CaseSet::from_json(duplicate),
            Err(CalibrationError::InvalidCaseSet(_))
        ));
        assert!(matches!(
            CaseSet::from_json("not json"),
            Err(CalibrationError::Json(_))
        ));
    }

    #[test]
    fn test_report_is_deterministic() {
        let set = CaseSet::from_json(CASES).unwrap();
        let p = ParameterSet::default();
        let a = set.report(&p);
        let b = set.report(&p);
        assert_eq!(a, b);
        assert_eq!(a.outcomes[0].name, "wood");
        assert!(a.accuracy == 0.0 || a.accuracy == 1.0);
        assert!(a.category_mse >= 0.0);
        assert_eq!(set.score(&p), a.score);
    }

    #[test]
    fn test_closure_objective() {
        let objective = |p: &ParameterSet| -p.flow.damping;
        assert_eq!(objective.score(&ParameterSet::default()), -0.5);
    }
}
