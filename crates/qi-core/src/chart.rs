use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{PILLAR_COUNT, REFERENCE_PILLAR, SEASON_PILLAR};
use crate::error::{ChartError, Result};
use crate::token::{Branch, Element, Stem};

/// A positional (stem, branch) slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pillar {
    pub stem: Stem,
    pub branch: Branch,
}

impl Pillar {
    pub fn new(stem: Stem, branch: Branch) -> Self {
        Self { stem, branch }
    }
}

static PILLAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(jia|yi|bing|ding|wu|ji|geng|xin|ren|gui)[\s\-_/]?(zi|chou|yin|mao|chen|si|wu|wei|shen|you|xu|hai)$",
    )
    .unwrap()
});

impl FromStr for Pillar {
    type Err = ChartError;

    /// Accepts `JiaZi`, `jia-zi`, `Jia Zi` and `甲子`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let chars: Vec<char> = trimmed.chars().collect();
        if chars.len() == 2
            && let (Some(stem), Some(branch)) =
                (Stem::from_glyph(chars[0]), Branch::from_glyph(chars[1]))
        {
            return Ok(Pillar::new(stem, branch));
        }

        let caps = PILLAR
            .captures(trimmed)
            .ok_or_else(|| ChartError::MalformedPillar(s.to_string()))?;
        Ok(Pillar::new(caps[1].parse()?, caps[2].parse()?))
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.stem, self.branch)
    }
}

/// Chart input: four natal pillars plus optional reference token and
/// temporal overlays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pillars: [Pillar; PILLAR_COUNT],
    #[serde(default)]
    pub reference: Option<Stem>,
    #[serde(default)]
    pub decade: Option<Pillar>,
    #[serde(default)]
    pub year: Option<Pillar>,
}

impl Chart {
    /// Build a chart, rejecting anything but exactly four pillars.
    pub fn new(pillars: &[Pillar]) -> Result<Self> {
        let pillars: [Pillar; PILLAR_COUNT] = pillars
            .try_into()
            .map_err(|_| ChartError::PillarCount(pillars.len()))?;
        Ok(Self {
            pillars,
            reference: None,
            decade: None,
            year: None,
        })
    }

    /// Parse pillars from text tokens such as `["JiaZi", "BingYin", ...]`.
    pub fn parse<S: AsRef<str>>(pillars: &[S]) -> Result<Self> {
        if pillars.len() != PILLAR_COUNT {
            return Err(ChartError::PillarCount(pillars.len()));
        }
        let parsed = pillars
            .iter()
            .map(|p| p.as_ref().parse())
            .collect::<Result<Vec<Pillar>>>()?;
        Self::new(&parsed)
    }

    pub fn with_reference(mut self, reference: Stem) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_decade(mut self, decade: Pillar) -> Self {
        self.decade = Some(decade);
        self
    }

    pub fn with_year(mut self, year: Pillar) -> Self {
        self.year = Some(year);
        self
    }

    pub fn pillars(&self) -> &[Pillar; PILLAR_COUNT] {
        &self.pillars
    }

    /// Month branch: the governing-season token.
    pub fn season_branch(&self) -> Branch {
        self.pillars[SEASON_PILLAR].branch
    }

    pub fn season(&self) -> Element {
        self.season_branch().season()
    }

    /// Reference token, defaulting to the day stem.
    pub fn reference_stem(&self) -> Stem {
        self.reference
            .unwrap_or(self.pillars[REFERENCE_PILLAR].stem)
    }

    pub fn reference_element(&self) -> Element {
        self.reference_stem().element()
    }
}

impl fmt::Display for Chart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let natal: Vec<String> = self.pillars.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", natal.join(" "))?;
        if let Some(d) = self.decade {
            write!(f, " | decade {d}")?;
        }
        if let Some(y) = self.year {
            write!(f, " | year {y}")?;
        }
        Ok(())
    }
}
