//! Fixed-point energy propagation over an interaction [`Graph`].
//!
//! Each pass is a Jacobi update: every contribution is computed from the
//! previous pass's energies, then all nodes are written at once. Structural
//! transformations found after a pass retype their member nodes and
//! re-derive the affected edges before the next pass begins.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::constants::{DEFAULT_MAX_ITERATIONS, EPSILON, TOLERANCE};
use crate::energy::Energy;
use crate::graph::{Graph, NodeId};
use crate::params::ParameterSet;
use crate::relation::{LockKind, RelationKind};
use crate::token::Element;

/// Positive contribution kinds; saturation applies within a kind.
#[derive(Clone, Copy)]
enum SupportKind {
    Generation = 0,
    Rooting = 1,
    Combination = 2,
    Lock = 3,
}

const SUPPORT_KINDS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TransformSource {
    Combination,
    Lock { kind: LockKind },
}

/// A retyping applied mid-run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    /// Pass after which the retyping happened (1-based).
    pub iteration: usize,
    pub source: TransformSource,
    pub element: Element,
    pub members: Vec<NodeId>,
}

/// What one pass did.
#[derive(Clone, Debug, Default)]
pub struct StepReport {
    pub change: f64,
    pub transformations: Vec<Transformation>,
    pub released: Vec<NodeId>,
}

impl StepReport {
    fn settled(&self, tolerance: f64) -> bool {
        self.change < tolerance && self.transformations.is_empty() && self.released.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct PropagationResult {
    /// Final graph state: node energies, element tags and derived edges.
    pub graph: Graph,
    pub converged: bool,
    pub iterations: usize,
    pub collapse: Option<Element>,
    pub transformations: Vec<Transformation>,
    /// Vault branches whose reservoir was released.
    pub vaults_released: Vec<NodeId>,
    pub last_change: f64,
}

impl PropagationResult {
    pub fn element_totals(&self) -> [f64; 5] {
        self.graph.element_totals()
    }
}

/// Stepwise propagation driver. Owns its graph for the duration of a run.
pub struct Propagation<'p> {
    graph: Graph,
    params: &'p ParameterSet,
    tolerance: f64,
    iteration: usize,
    /// Vault releases, added to the base of the stored node on every pass.
    injected: Vec<f64>,
    transformations: Vec<Transformation>,
    released: Vec<NodeId>,
}

impl<'p> Propagation<'p> {
    pub fn new(graph: Graph, params: &'p ParameterSet) -> Self {
        let injected = vec![0.0; graph.capacity()];
        Self {
            graph,
            params,
            tolerance: TOLERANCE,
            iteration: 0,
            injected,
            transformations: Vec::new(),
            released: Vec::new(),
        }
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Release every vault whose branch is struck by a live clash. Returns
    /// the branches released in this call.
    pub fn trigger_vaults(&mut self, prev: &[f64]) -> Vec<NodeId> {
        let mut released = Vec::new();
        for i in 0..self.graph.vaults().len() {
            let vault = &self.graph.vaults()[i];
            if vault.released {
                continue;
            }
            let branch = vault.branch;
            let struck = self.graph.incident(branch).any(|e| {
                e.kind == RelationKind::Clash
                    && !e.suppressed
                    && prev[e.source.0] > EPSILON
                    && prev[e.target.0] > EPSILON
            });
            if !struck {
                continue;
            }
            let vault = &mut self.graph.vaults_mut()[i];
            let store = vault.store;
            let amount = vault.release();
            self.injected[store.0] += amount;
            debug!(branch = %branch, store = %store, amount, "vault released");
            released.push(branch);
        }
        released
    }

    /// Run one pass.
    pub fn step(&mut self) -> StepReport {
        self.iteration += 1;
        let params = self.params;
        let retention = params.interaction.suppressed_retention;
        let damping = params.flow.damping;

        let cap = self.graph.capacity();
        if self.injected.len() < cap {
            self.injected.resize(cap, 0.0);
        }
        let mut prev = vec![0.0; cap];
        let mut base = vec![0.0; cap];
        for n in self.graph.nodes() {
            prev[n.id.0] = n.current_energy.get();
            base[n.id.0] = n.initial_energy.get();
        }

        let released = self.trigger_vaults(&prev);
        for (b, extra) in base.iter_mut().zip(&self.injected) {
            *b += extra;
        }

        let mut support: Vec<[Vec<f64>; SUPPORT_KINDS]> = vec![Default::default(); cap];
        let mut loss = vec![0.0; cap];

        for e in self.graph.edges() {
            let w = e.weight(retention) * damping;
            if w == 0.0 {
                continue;
            }
            let (s, t) = (e.source.0, e.target.0);
            match e.kind {
                RelationKind::Generation => {
                    support[t][SupportKind::Generation as usize].push(prev[s] * w);
                    loss[s] += params.flow.output_drain * prev[s] * w;
                }
                RelationKind::Rooting => {
                    support[t][SupportKind::Rooting as usize].push(prev[s] * w);
                }
                RelationKind::Control => {
                    loss[t] += prev[s] * w;
                    loss[s] += params.flow.control_cost * prev[s] * w;
                }
                RelationKind::Clash => {
                    loss[t] += prev[s] * w;
                    loss[s] += prev[t] * w;
                }
                RelationKind::Combination { .. } => {
                    let ratio = if self.graph.is_pair_transformed(e.source, e.target) {
                        1.0
                    } else {
                        params.interaction.partial_combination_ratio
                    };
                    let kind = SupportKind::Combination as usize;
                    support[t][kind].push(prev[s] * w * ratio);
                    support[s][kind].push(prev[t] * w * ratio);
                }
            }
        }

        for lock in self.graph.locks() {
            let mut w = params.interaction.lock_strength * damping;
            if !lock.full {
                w *= params.interaction.partial_lock_ratio;
            }
            if lock.suppressed {
                w *= retention;
            }
            if w == 0.0 || lock.members.len() < 2 {
                continue;
            }
            let others = (lock.members.len() - 1) as f64;
            for m in &lock.members {
                let sum: f64 = lock
                    .members
                    .iter()
                    .filter(|o| *o != m)
                    .map(|o| prev[o.0])
                    .sum();
                support[m.0][SupportKind::Lock as usize].push(sum / others * w);
            }
        }

        let keep = 1.0 - params.flow.entropy;
        let saturation = params.flow.rooting_saturation;
        let mut change: f64 = 0.0;
        for node in self.graph.nodes_mut() {
            let i = node.id.0;
            let gained: f64 = support[i]
                .iter_mut()
                .map(|c| saturated(c, saturation))
                .sum();
            let next = ((base[i] + gained - loss[i]) * keep).max(0.0);
            change = change.max((next - prev[i]).abs());
            node.current_energy = Energy::new(next);
        }

        let transformations = self.transform();
        trace!(
            iteration = self.iteration,
            change,
            transformed = transformations.len(),
            "pass complete"
        );
        self.transformations.extend(transformations.iter().cloned());
        self.released.extend(released.iter().copied());
        StepReport {
            change,
            transformations,
            released,
        }
    }

    /// Retype members of every live combination or full lock whose
    /// resultant element dominates, then re-derive their edges.
    fn transform(&mut self) -> Vec<Transformation> {
        let totals = self.graph.element_totals();
        let total: f64 = totals.iter().sum();
        if total <= EPSILON {
            return Vec::new();
        }
        let season = self.graph.season().season();
        let interaction = &self.params.interaction;
        let dominates = |element: Element| {
            let mut share = totals[element.index()] / total;
            if element == season {
                share *= interaction.season_transform_boost;
            }
            share >= interaction.transform_threshold
        };

        let mut found = Vec::new();
        for e in self.graph.edges() {
            if let RelationKind::Combination { resultant } = e.kind
                && !e.suppressed
                && !self.graph.is_pair_transformed(e.source, e.target)
                && dominates(resultant)
            {
                found.push(Transformation {
                    iteration: self.iteration,
                    source: TransformSource::Combination,
                    element: resultant,
                    members: vec![e.source, e.target],
                });
            }
        }
        let mut locks = Vec::new();
        for (i, lock) in self.graph.locks().iter().enumerate() {
            if lock.full && !lock.suppressed && !lock.transformed && dominates(lock.resultant) {
                locks.push(i);
                found.push(Transformation {
                    iteration: self.iteration,
                    source: TransformSource::Lock { kind: lock.kind },
                    element: lock.resultant,
                    members: lock.members.clone(),
                });
            }
        }
        if found.is_empty() {
            return found;
        }

        for i in locks {
            self.graph.locks_mut()[i].transformed = true;
        }
        let mut retyped = Vec::new();
        for t in &found {
            if let (TransformSource::Combination, [a, b]) = (t.source, t.members.as_slice()) {
                self.graph.mark_pair_transformed(*a, *b);
            }
            for m in &t.members {
                if let Some(node) = self.graph.node_mut(*m)
                    && node.retype(t.element)
                {
                    retyped.push(*m);
                }
            }
            debug!(
                iteration = t.iteration,
                element = %t.element,
                members = t.members.len(),
                "transformation"
            );
        }
        for m in retyped {
            self.graph.rederive_incident(m, self.params);
        }
        // Resolved bonds no longer outrank anything
        self.graph.recompute_suppression();
        found
    }

    /// Step until settled or `max_iterations` passes have run.
    pub fn run(mut self, max_iterations: usize) -> PropagationResult {
        let mut converged = false;
        let mut last_change = 0.0;
        while self.iteration < max_iterations {
            let report = self.step();
            last_change = report.change;
            if report.settled(self.tolerance) {
                converged = true;
                break;
            }
        }
        self.finish(converged, last_change)
    }

    fn finish(mut self, converged: bool, last_change: f64) -> PropagationResult {
        let confidence = if converged {
            1.0
        } else if last_change > 0.0 {
            (self.tolerance / last_change).clamp(0.0, 1.0)
        } else {
            0.0
        };
        for node in self.graph.nodes_mut() {
            node.current_energy = node.current_energy.with_confidence(confidence);
        }
        let collapse = collapse(&self.graph.element_totals(), self.params.interaction.collapse_ratio);
        debug!(
            iterations = self.iteration,
            converged,
            last_change,
            collapse = ?collapse,
            "propagation finished"
        );
        PropagationResult {
            graph: self.graph,
            converged,
            iterations: self.iteration,
            collapse,
            transformations: self.transformations,
            vaults_released: self.released,
            last_change,
        }
    }
}

/// Sum contributions largest first, scaling the m-th by `(1 - rate)^m`.
fn saturated(contributions: &mut [f64], rate: f64) -> f64 {
    contributions.sort_by(|a, b| b.total_cmp(a));
    let keep = 1.0 - rate;
    let mut scale = 1.0;
    let mut sum = 0.0;
    for c in contributions.iter() {
        sum += c * scale;
        scale *= keep;
    }
    sum
}

/// Element whose total dwarfs every other by `ratio`, if any.
pub fn collapse(totals: &[f64; 5], ratio: f64) -> Option<Element> {
    let mut ranked: Vec<(Element, f64)> = Element::ALL.iter().map(|e| (*e, totals[e.index()])).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (top, first) = ranked[0];
    let second = ranked[1].1;
    if first <= EPSILON {
        return None;
    }
    if second <= EPSILON || first >= ratio * second {
        Some(top)
    } else {
        None
    }
}

/// Run a graph to convergence or the iteration cap. The input graph is
/// left untouched.
pub fn propagate(graph: &Graph, params: &ParameterSet, max_iterations: usize) -> PropagationResult {
    Propagation::new(graph.clone(), params).run(max_iterations)
}

pub fn propagate_default(graph: &Graph, params: &ParameterSet) -> PropagationResult {
    propagate(graph, params, DEFAULT_MAX_ITERATIONS)
}
