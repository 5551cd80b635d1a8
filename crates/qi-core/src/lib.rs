//! qi: chart energy propagation engine.
//!
//! A chart of four (stem, branch) pillars becomes an interaction graph whose
//! nodes exchange energy through generation, control, rooting, clash and
//! combination relations until a fixed point. The converged state is
//! evaluated against a reference element, and a hill-climbing calibrator
//! tunes the engine's parameters against labeled cases.
//!
//! Zero I/O: persistence and transport live in `qi-store` and `qi-cli`.

pub mod calibrate;
pub mod chart;
pub mod constants;
pub mod energy;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod graph;
pub mod optimizer;
pub mod params;
pub mod pipeline;
pub mod relation;
pub mod token;

pub use calibrate::{CalibrationCase, CaseOutcome, CaseSet, CaseSetReport, Label, Objective};
pub use chart::{Chart, Pillar};
pub use constants::{DEFAULT_MAX_ITERATIONS, EPSILON, PILLAR_COUNT, TOLERANCE};
pub use energy::Energy;
pub use engine::{Propagation, PropagationResult, Transformation, propagate};
pub use error::{CalibrationError, ChartError, Result};
pub use evaluate::{Category, CategoryScores, Classification, Evaluation, Sides, evaluate, evaluate_with};
pub use graph::{Graph, Node, NodeId, NodeRole, OverlayScale, Position};
pub use optimizer::{
    Cancellation, CheckpointSink, NullSink, OptimizationState, OptimizerConfig, Outcome,
    SinkError, StopReason, optimize,
};
pub use params::{Group, ParameterSet, Tunable, tunable, tunables};
pub use pipeline::{EngineOutput, PatternConsumer, Timeline, simulate};
pub use token::{Branch, Element, Stem, Token};
