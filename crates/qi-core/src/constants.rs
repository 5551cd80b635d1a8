/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f64 = 1e-10;

/// Number of natal pillars in a chart (year, month, day, hour)
pub const PILLAR_COUNT: usize = 4;

/// Index of the pillar whose branch governs the season (month)
pub const SEASON_PILLAR: usize = 1;

/// Index of the pillar whose stem is the default reference token (day)
pub const REFERENCE_PILLAR: usize = 2;

/// Maximum pillar distance at which a pair combination can bind
pub const COMBINATION_REACH: usize = 1;

/// Pillar distance assigned to any pair involving an overlay node
pub const OVERLAY_DISTANCE: usize = 1;

/// Default hard cap on propagation passes
pub const DEFAULT_MAX_ITERATIONS: usize = 200;

/// Convergence threshold on the largest per-node energy change in a pass
pub const TOLERANCE: f64 = 1e-9;
