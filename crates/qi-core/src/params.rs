//! Engine tunables.
//!
//! Parameters are plain `f64` fields grouped into four independently
//! lockable groups. Each field is also registered in a static table of
//! [`Tunable`]s carrying its dotted name, valid range and default, which is
//! what the calibration optimizer walks. Values outside a range are clamped,
//! never rejected.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Foundation,
    Flow,
    Interaction,
    Evaluation,
}

impl Group {
    pub const ALL: [Group; 4] = [
        Group::Foundation,
        Group::Flow,
        Group::Interaction,
        Group::Evaluation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Group::Foundation => "foundation",
            Group::Flow => "flow",
            Group::Interaction => "interaction",
            Group::Evaluation => "evaluation",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Group> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered parameter: name, group, declared range and default, plus
/// accessors into a [`ParameterSet`].
pub struct Tunable {
    pub name: &'static str,
    pub group: Group,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    read: fn(&ParameterSet) -> f64,
    write: fn(&mut ParameterSet, f64),
}

impl Tunable {
    pub fn get(&self, params: &ParameterSet) -> f64 {
        (self.read)(params)
    }

    /// Write a value, clamped into range. NaN falls back to the default.
    pub fn set(&self, params: &mut ParameterSet, value: f64) {
        (self.write)(params, self.clamp(value));
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(self.min, self.max)
        }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

impl fmt::Debug for Tunable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunable")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("default", &self.default)
            .finish()
    }
}

macro_rules! parameter_group {
    (
        $(#[$meta:meta])*
        $name:ident => $slot:ident, $group:expr;
        $( $(#[$fmeta:meta])* $field:ident: [$min:expr, $max:expr] = $default:expr, )*
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
        #[serde(default, deny_unknown_fields)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: f64, )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self { $( $field: $default, )* }
            }
        }

        impl $name {
            pub const TUNABLES: &'static [Tunable] = &[
                $(
                    Tunable {
                        name: concat!(stringify!($slot), ".", stringify!($field)),
                        group: $group,
                        min: $min,
                        max: $max,
                        default: $default,
                        read: |p| p.$slot.$field,
                        write: |p, v| p.$slot.$field = v,
                    },
                )*
            ];
        }
    };
}

parameter_group! {
    /// Initial energy table and seasonal multipliers.
    Foundation => foundation, Group::Foundation;
    stem_base: [0.1, 5.0] = 1.0,
    branch_base: [0.1, 5.0] = 1.2,
    /// Fraction of `branch_base` given to a secondary hidden stem.
    hidden_secondary_ratio: [0.0, 1.0] = 0.5,
    hidden_tertiary_ratio: [0.0, 1.0] = 0.3,
    year_pillar: [0.1, 3.0] = 0.8,
    month_pillar: [0.1, 3.0] = 1.2,
    day_pillar: [0.1, 3.0] = 1.0,
    hour_pillar: [0.1, 3.0] = 0.9,
    decade_weight: [0.0, 3.0] = 0.8,
    year_weight: [0.0, 3.0] = 0.6,
    prosperous: [1.0, 3.0] = 1.5,
    favored: [0.5, 2.0] = 1.2,
    trapped: [0.2, 1.5] = 0.85,
    dead: [0.1, 1.5] = 0.7,
}

parameter_group! {
    /// Generation/control transfer and global leak.
    Flow => flow, Group::Flow;
    /// Global multiplier on every transfer. 1.0 means undamped.
    damping: [0.0, 1.0] = 0.5,
    /// Per-pass leak toward zero.
    entropy: [0.0, 0.5] = 0.05,
    /// Fraction of generated energy the source loses.
    output_drain: [0.0, 1.0] = 0.3,
    /// Fraction of suppression the controlling node pays.
    control_cost: [0.0, 1.0] = 0.2,
    /// Per-pillar distance decay base.
    distance_decay: [0.05, 1.0] = 0.7,
    same_pillar_bonus: [0.5, 3.0] = 1.3,
    generation_strength: [0.0, 2.0] = 0.4,
    control_strength: [0.0, 2.0] = 0.35,
    rooting_weight: [0.0, 2.0] = 0.5,
    /// Diminishing-returns rate for repeated same-kind support.
    rooting_saturation: [0.0, 0.95] = 0.4,
}

parameter_group! {
    /// Clash, combination, lock, vault and collapse behaviour.
    Interaction => interaction, Group::Interaction;
    clash_strength: [0.0, 2.0] = 0.4,
    combination_strength: [0.0, 2.0] = 0.3,
    partial_combination_ratio: [0.0, 1.0] = 0.5,
    lock_strength: [0.0, 2.0] = 0.35,
    partial_lock_ratio: [0.0, 1.0] = 0.5,
    /// Share of total energy the resultant element needs to transform.
    transform_threshold: [0.05, 1.0] = 0.35,
    season_transform_boost: [1.0, 3.0] = 1.5,
    vault_multiplier: [0.0, 5.0] = 1.5,
    /// Effect kept by a relation outranked on a shared node.
    suppressed_retention: [0.0, 1.0] = 0.0,
    collapse_ratio: [1.5, 20.0] = 4.0,
}

parameter_group! {
    /// Net-force weights and the neutral band.
    Evaluation => evaluation, Group::Evaluation;
    companion_weight: [0.0, 2.0] = 1.0,
    resource_weight: [0.0, 2.0] = 1.0,
    output_weight: [0.0, 2.0] = 1.0,
    wealth_weight: [0.0, 2.0] = 1.0,
    officer_weight: [0.0, 2.0] = 1.0,
    stem_weight: [0.0, 3.0] = 1.0,
    branch_weight: [0.0, 3.0] = 1.0,
    hidden_weight: [0.0, 3.0] = 0.6,
    overlay_weight: [0.0, 3.0] = 0.8,
    neutral_band_abs: [0.0, 10.0] = 0.0,
    /// Band width as a fraction of total weighted energy.
    neutral_band_rel: [0.0, 2.0] = 0.1,
}

/// Complete parameter snapshot handed to the engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParameterSet {
    pub foundation: Foundation,
    pub flow: Flow,
    pub interaction: Interaction,
    pub evaluation: Evaluation,
}

/// Every registered tunable, in group order.
pub fn tunables() -> impl Iterator<Item = &'static Tunable> {
    Foundation::TUNABLES
        .iter()
        .chain(Flow::TUNABLES)
        .chain(Interaction::TUNABLES)
        .chain(Evaluation::TUNABLES)
}

pub fn tunable(name: &str) -> Option<&'static Tunable> {
    tunables().find(|t| t.name == name)
}

impl ParameterSet {
    /// Clamp every field into its declared range. Returns the names of the
    /// fields that changed.
    pub fn clamp(&mut self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        for t in tunables() {
            let before = t.get(self);
            t.set(self, before);
            if t.get(self).to_bits() != before.to_bits() {
                changed.push(t.name);
            }
        }
        changed
    }

    pub fn clamped(mut self) -> Self {
        self.clamp();
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        tunable(name).map(|t| t.get(self))
    }

    /// Set a tunable by dotted name, clamped. Returns false for unknown names.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match tunable(name) {
            Some(t) => {
                t.set(self, value);
                true
            }
            None => false,
        }
    }

    /// Flat `(name, value)` view, in registry order.
    pub fn values(&self) -> Vec<(&'static str, f64)> {
        tunables().map(|t| (t.name, t.get(self))).collect()
    }

    pub fn pillar_weight(&self, index: usize) -> f64 {
        match index {
            0 => self.foundation.year_pillar,
            1 => self.foundation.month_pillar,
            2 => self.foundation.day_pillar,
            _ => self.foundation.hour_pillar,
        }
    }
}
