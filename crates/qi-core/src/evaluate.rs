//! Converged-state evaluation: relational categories, net force and the
//! three-way classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::PropagationResult;
use crate::graph::{Node, NodeRole};
use crate::params::ParameterSet;
use crate::token::Element;

/// Relationship of an element to the reference element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Companion,
    Resource,
    Output,
    Wealth,
    Officer,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Companion,
        Category::Resource,
        Category::Output,
        Category::Wealth,
        Category::Officer,
    ];

    pub fn of(element: Element, reference: Element) -> Category {
        if element == reference {
            Category::Companion
        } else if element.generates() == reference {
            Category::Resource
        } else if reference.generates() == element {
            Category::Output
        } else if reference.controls() == element {
            Category::Wealth
        } else {
            Category::Officer
        }
    }

    /// Companion and Resource strengthen the reference; the rest weaken it.
    pub fn supports(self) -> bool {
        matches!(self, Category::Companion | Category::Resource)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Companion => "companion",
            Category::Resource => "resource",
            Category::Output => "output",
            Category::Wealth => "wealth",
            Category::Officer => "officer",
        }
    }

    fn weight(self, params: &ParameterSet) -> f64 {
        let e = &params.evaluation;
        match self {
            Category::Companion => e.companion_weight,
            Category::Resource => e.resource_weight,
            Category::Output => e.output_weight,
            Category::Wealth => e.wealth_weight,
            Category::Officer => e.officer_weight,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    DominantSupport,
    Balanced,
    DominantOpposition,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::DominantSupport => "dominant_support",
            Classification::Balanced => "balanced",
            Classification::DominantOpposition => "dominant_opposition",
        }
    }

    /// Classification with support and opposition exchanged.
    pub fn mirrored(self) -> Classification {
        match self {
            Classification::DominantSupport => Classification::DominantOpposition,
            Classification::Balanced => Classification::Balanced,
            Classification::DominantOpposition => Classification::DominantSupport,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "dominant_support" | "support" => Ok(Classification::DominantSupport),
            "balanced" => Ok(Classification::Balanced),
            "dominant_opposition" | "opposition" => Ok(Classification::DominantOpposition),
            _ => Err(format!("unknown classification: {s:?}")),
        }
    }
}

/// One value per category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub companion: f64,
    pub resource: f64,
    pub output: f64,
    pub wealth: f64,
    pub officer: f64,
}

impl CategoryScores {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Companion => self.companion,
            Category::Resource => self.resource,
            Category::Output => self.output,
            Category::Wealth => self.wealth,
            Category::Officer => self.officer,
        }
    }

    fn slot(&mut self, category: Category) -> &mut f64 {
        match category {
            Category::Companion => &mut self.companion,
            Category::Resource => &mut self.resource,
            Category::Output => &mut self.output,
            Category::Wealth => &mut self.wealth,
            Category::Officer => &mut self.officer,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, f64)> + '_ {
        Category::ALL.into_iter().map(|c| (c, self.get(c)))
    }
}

/// Which categories count as support when forming the net force.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Sides {
    #[default]
    Standard,
    /// Support and opposition exchanged.
    Swapped,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub reference: Element,
    /// Weighted energy per category.
    pub aggregates: CategoryScores,
    /// Aggregates as a share of total weighted energy.
    pub scores: CategoryScores,
    pub total: f64,
    pub net_force: f64,
    pub band: f64,
    pub classification: Classification,
    pub collapse: Option<Element>,
}

/// Evaluation weight of a node by role.
pub fn role_weight(node: &Node, params: &ParameterSet) -> f64 {
    let e = &params.evaluation;
    match node.role {
        NodeRole::PillarStem => e.stem_weight,
        NodeRole::PillarBranch => e.branch_weight,
        NodeRole::HiddenSecondary | NodeRole::HiddenTertiary => e.hidden_weight,
        NodeRole::DecadeStem | NodeRole::DecadeBranch | NodeRole::YearStem | NodeRole::YearBranch => {
            e.overlay_weight
        }
    }
}

/// Net force from category aggregates.
pub fn net_force(aggregates: &CategoryScores, params: &ParameterSet, sides: Sides) -> f64 {
    let mut support = 0.0;
    let mut oppose = 0.0;
    for (category, value) in aggregates.iter() {
        let weighted = category.weight(params) * value;
        if category.supports() {
            support += weighted;
        } else {
            oppose += weighted;
        }
    }
    match sides {
        Sides::Standard => support - oppose,
        Sides::Swapped => oppose - support,
    }
}

pub fn evaluate(result: &PropagationResult, reference: Element, params: &ParameterSet) -> Evaluation {
    evaluate_with(result, reference, params, Sides::Standard)
}

/// [`evaluate`] with an explicit choice of which side counts as support.
/// `Sides::Swapped` negates the net force and mirrors the classification,
/// including the one forced by a collapse.
pub fn evaluate_with(
    result: &PropagationResult,
    reference: Element,
    params: &ParameterSet,
    sides: Sides,
) -> Evaluation {
    let mut aggregates = CategoryScores::default();
    for node in result.graph.nodes() {
        let weighted = role_weight(node, params) * node.current_energy.get();
        *aggregates.slot(Category::of(node.element, reference)) += weighted;
    }
    let total: f64 = aggregates.iter().map(|(_, v)| v).sum();

    let mut scores = CategoryScores::default();
    if total > 0.0 {
        for c in Category::ALL {
            *scores.slot(c) = aggregates.get(c) / total;
        }
    }

    let net = net_force(&aggregates, params, sides);
    let band = params.evaluation.neutral_band_abs + params.evaluation.neutral_band_rel * total;
    let standard = sides == Sides::Standard;
    let classification = match result.collapse {
        Some(element) if Category::of(element, reference).supports() == standard => {
            Classification::DominantSupport
        }
        Some(_) => Classification::DominantOpposition,
        None if net > band => Classification::DominantSupport,
        None if net < -band => Classification::DominantOpposition,
        None => Classification::Balanced,
    };

    Evaluation {
        reference,
        aggregates,
        scores,
        total,
        net_force: net,
        band,
        classification,
        collapse: result.collapse,
    }
}
