//! Chart in, engine output out.
//!
//! [`EngineOutput`] is the contract handed to downstream pattern libraries
//! through [`PatternConsumer`]. Energies are exported as annotated values,
//! so consumers that only want a number can read the bare projection.

use serde::{Deserialize, Serialize};

use crate::chart::{Chart, Pillar};
use crate::energy::Energy;
use crate::engine::{Transformation, propagate};
use crate::evaluate::{Classification, Evaluation, evaluate};
use crate::graph::{Graph, NodeId, NodeRole, OverlayScale, Position};
use crate::params::ParameterSet;
use crate::token::{Element, Token};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub token: Token,
    pub role: NodeRole,
    pub position: Position,
    pub element: Element,
    pub version: u32,
    pub initial: Energy,
    pub energy: Energy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementTotal {
    pub element: Element,
    pub energy: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    pub chart: String,
    pub nodes: Vec<NodeReport>,
    pub totals: Vec<ElementTotal>,
    pub evaluation: Evaluation,
    pub collapse: Option<Element>,
    pub converged: bool,
    pub iterations: usize,
    pub transformations: Vec<Transformation>,
    pub vaults_released: Vec<NodeId>,
}

impl EngineOutput {
    pub fn classification(&self) -> Classification {
        self.evaluation.classification
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Downstream boundary: anything that turns engine output into its own
/// findings. Consumers never reach back into the engine.
pub trait PatternConsumer {
    type Finding;

    fn consume(&mut self, output: &EngineOutput) -> Self::Finding;
}

impl<F, T> PatternConsumer for F
where
    F: FnMut(&EngineOutput) -> T,
{
    type Finding = T;

    fn consume(&mut self, output: &EngineOutput) -> T {
        self(output)
    }
}

fn run_graph(chart: &Chart, graph: &Graph, params: &ParameterSet, max_iterations: usize) -> EngineOutput {
    let result = propagate(graph, params, max_iterations);
    let evaluation = evaluate(&result, chart.reference_element(), params);
    let totals = result.element_totals();

    EngineOutput {
        chart: chart.to_string(),
        nodes: result
            .graph
            .nodes()
            .map(|n| NodeReport {
                id: n.id,
                token: n.token,
                role: n.role,
                position: n.position,
                element: n.element,
                version: n.version,
                initial: n.initial_energy,
                energy: n.current_energy,
            })
            .collect(),
        totals: Element::ALL
            .iter()
            .map(|e| ElementTotal {
                element: *e,
                energy: totals[e.index()],
            })
            .collect(),
        evaluation,
        collapse: result.collapse,
        converged: result.converged,
        iterations: result.iterations,
        transformations: result.transformations,
        vaults_released: result.vaults_released,
    }
}

/// Build, propagate and evaluate one chart. Parameters are clamped into
/// range first.
pub fn simulate(chart: &Chart, params: &ParameterSet, max_iterations: usize) -> EngineOutput {
    let params = params.clone().clamped();
    let graph = Graph::build(chart, &params);
    run_graph(chart, &graph, &params, max_iterations)
}

/// Re-evaluates one natal chart under a sequence of overlays, swapping the
/// overlay nodes in place rather than rebuilding the graph.
pub struct Timeline {
    chart: Chart,
    graph: Graph,
    params: ParameterSet,
    max_iterations: usize,
}

impl Timeline {
    pub fn new(chart: Chart, params: &ParameterSet, max_iterations: usize) -> Self {
        let params = params.clone().clamped();
        let graph = Graph::build(&chart, &params);
        Self {
            chart,
            graph,
            params,
            max_iterations,
        }
    }

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn set_decade(&mut self, decade: Option<Pillar>) {
        self.chart.decade = decade;
        self.graph.set_overlay(OverlayScale::Decade, decade, &self.params);
    }

    pub fn set_year(&mut self, year: Option<Pillar>) {
        self.chart.year = year;
        self.graph.set_overlay(OverlayScale::Year, year, &self.params);
    }

    pub fn current(&self) -> EngineOutput {
        run_graph(&self.chart, &self.graph, &self.params, self.max_iterations)
    }

    /// Evaluate each year in turn and hand the output to `consumer`.
    pub fn years<C: PatternConsumer>(&mut self, years: &[Pillar], consumer: &mut C) -> Vec<C::Finding> {
        years
            .iter()
            .map(|year| {
                self.set_year(Some(*year));
                consumer.consume(&self.current())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_MAX_ITERATIONS;

    fn chart() -> Chart {
        Chart::parse(&["GengShen", "JiaYin", "WuChen", "GuiHai"]).unwrap()
    }

    #[test]
    fn test_simulate_deterministic() {
        let p = ParameterSet::default();
        let a = simulate(&chart(), &p, DEFAULT_MAX_ITERATIONS);
        let b = simulate(&chart(), &p, DEFAULT_MAX_ITERATIONS);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn test_output_json_round_trip() {
        let out = simulate(&chart(), &ParameterSet::default(), DEFAULT_MAX_ITERATIONS);
        let back = EngineOutput::from_json(&out.to_json().unwrap()).unwrap();
        assert_eq!(back.nodes.len(), out.nodes.len());
        for (a, b) in out.nodes.iter().zip(&back.nodes) {
            assert_eq!(a.energy.get().to_bits(), b.energy.get().to_bits());
            assert_eq!(a.energy.confidence(), b.energy.confidence());
        }
        assert_eq!(back.classification(), out.classification());
    }

    #[test]
    fn test_simulate_clamps_params() {
        let mut wild = ParameterSet::default();
        wild.flow.damping = 50.0;
        let mut tame = ParameterSet::default();
        tame.flow.damping = 1.0;
        let a = simulate(&chart(), &wild, DEFAULT_MAX_ITERATIONS);
        let b = simulate(&chart(), &tame, DEFAULT_MAX_ITERATIONS);
        assert_eq!(a, b);
    }

    #[test]
    fn test_timeline_matches_full_simulation() {
        let p = ParameterSet::default();
        let years: Vec<Pillar> = ["BingWu", "DingWei", "WuShen"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let mut timeline = Timeline::new(chart(), &p, DEFAULT_MAX_ITERATIONS);
        let mut collect = |out: &EngineOutput| out.evaluation.net_force;
        let incremental = timeline.years(&years, &mut collect);

        for (year, net) in years.iter().zip(incremental) {
            let full = simulate(&chart().with_year(*year), &p, DEFAULT_MAX_ITERATIONS);
            assert!((full.evaluation.net_force - net).abs() < 1e-9);
        }
        assert_eq!(timeline.chart().year, years.last().copied());
    }

    #[test]
    fn test_decade_overlay_swap() {
        let p = ParameterSet::default();
        let decade: Pillar = "DingYou".parse().unwrap();
        let mut timeline = Timeline::new(chart(), &p, DEFAULT_MAX_ITERATIONS);
        timeline.set_decade(Some(decade));
        let full = simulate(&chart().with_decade(decade), &p, DEFAULT_MAX_ITERATIONS);
        assert_eq!(timeline.current().chart, full.chart);
        assert!((timeline.current().evaluation.net_force - full.evaluation.net_force).abs() < 1e-9);

        timeline.set_decade(None);
        let bare = simulate(&chart(), &p, DEFAULT_MAX_ITERATIONS);
        assert_eq!(timeline.current().nodes.len(), bare.nodes.len());
    }

    #[test]
    fn test_consumer_sees_every_year() {
        struct Tally(Vec<Classification>);
        impl PatternConsumer for Tally {
            type Finding = ();
            fn consume(&mut self, output: &EngineOutput) {
                self.0.push(output.classification());
            }
        }

        let mut timeline = Timeline::new(chart(), &ParameterSet::default(), DEFAULT_MAX_ITERATIONS);
        let years: Vec<Pillar> = vec!["JiaZi".parse().unwrap(), "YiChou".parse().unwrap()];
        let mut tally = Tally(Vec::new());
        timeline.years(&years, &mut tally);
        assert_eq!(tally.0.len(), 2);
    }
}
