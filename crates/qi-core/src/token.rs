//! Chart tokens: the ten stems, the twelve branches, and the five elements
//! they carry.
//!
//! Tokens are immutable. What changes during a simulation is the element tag
//! of the node that holds a token, never the token itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChartError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    Wood,
    Fire,
    Earth,
    Metal,
    Water,
}

impl Element {
    pub const ALL: [Element; 5] = [
        Element::Wood,
        Element::Fire,
        Element::Earth,
        Element::Metal,
        Element::Water,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The element this one feeds on the generation cycle.
    pub fn generates(self) -> Element {
        Self::ALL[(self.index() + 1) % 5]
    }

    /// The element this one suppresses on the control cycle.
    pub fn controls(self) -> Element {
        Self::ALL[(self.index() + 2) % 5]
    }

    /// The element that feeds this one.
    pub fn generated_by(self) -> Element {
        Self::ALL[(self.index() + 4) % 5]
    }

    /// The element that suppresses this one.
    pub fn controlled_by(self) -> Element {
        Self::ALL[(self.index() + 3) % 5]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Element::Wood => "wood",
            Element::Fire => "fire",
            Element::Earth => "earth",
            Element::Metal => "metal",
            Element::Water => "water",
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Yang,
    Yin,
}

/// Seasonal standing of an element relative to the element governing the
/// season.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Same element as the season.
    Prosperous,
    /// Generated by the season.
    Favored,
    /// Generates the season.
    Resting,
    /// Controls the season.
    Trapped,
    /// Controlled by the season.
    Dead,
}

impl Phase {
    pub fn of(element: Element, season: Element) -> Phase {
        if element == season {
            Phase::Prosperous
        } else if season.generates() == element {
            Phase::Favored
        } else if element.generates() == season {
            Phase::Resting
        } else if element.controls() == season {
            Phase::Trapped
        } else {
            Phase::Dead
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stem {
    Jia,
    Yi,
    Bing,
    Ding,
    Wu,
    Ji,
    Geng,
    Xin,
    Ren,
    Gui,
}

impl Stem {
    pub const ALL: [Stem; 10] = [
        Stem::Jia,
        Stem::Yi,
        Stem::Bing,
        Stem::Ding,
        Stem::Wu,
        Stem::Ji,
        Stem::Geng,
        Stem::Xin,
        Stem::Ren,
        Stem::Gui,
    ];

    const NAMES: [&'static str; 10] = [
        "Jia", "Yi", "Bing", "Ding", "Wu", "Ji", "Geng", "Xin", "Ren", "Gui",
    ];

    const GLYPHS: [char; 10] = ['甲', '乙', '丙', '丁', '戊', '己', '庚', '辛', '壬', '癸'];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn element(self) -> Element {
        Element::ALL[self.index() / 2]
    }

    pub fn polarity(self) -> Polarity {
        if self.index() % 2 == 0 {
            Polarity::Yang
        } else {
            Polarity::Yin
        }
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self.index()]
    }

    pub fn glyph(self) -> char {
        Self::GLYPHS[self.index()]
    }

    pub fn from_glyph(c: char) -> Option<Stem> {
        Self::GLYPHS.iter().position(|g| *g == c).map(|i| Self::ALL[i])
    }
}

impl FromStr for Stem {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next())
            && let Some(stem) = Stem::from_glyph(c)
        {
            return Ok(stem);
        }
        Self::NAMES
            .iter()
            .position(|n| n.eq_ignore_ascii_case(trimmed))
            .map(|i| Self::ALL[i])
            .ok_or_else(|| ChartError::UnknownToken(s.to_string()))
    }
}

impl fmt::Display for Stem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Branches in cycle order. Index distance 6 is maximal phase separation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Branch {
    Zi,
    Chou,
    Yin,
    Mao,
    Chen,
    Si,
    Wu,
    Wei,
    Shen,
    You,
    Xu,
    Hai,
}

impl Branch {
    pub const ALL: [Branch; 12] = [
        Branch::Zi,
        Branch::Chou,
        Branch::Yin,
        Branch::Mao,
        Branch::Chen,
        Branch::Si,
        Branch::Wu,
        Branch::Wei,
        Branch::Shen,
        Branch::You,
        Branch::Xu,
        Branch::Hai,
    ];

    const NAMES: [&'static str; 12] = [
        "Zi", "Chou", "Yin", "Mao", "Chen", "Si", "Wu", "Wei", "Shen", "You", "Xu", "Hai",
    ];

    const GLYPHS: [char; 12] = [
        '子', '丑', '寅', '卯', '辰', '巳', '午', '未', '申', '酉', '戌', '亥',
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Element of the branch's main qi.
    pub fn element(self) -> Element {
        match self {
            Branch::Zi | Branch::Hai => Element::Water,
            Branch::Yin | Branch::Mao => Element::Wood,
            Branch::Si | Branch::Wu => Element::Fire,
            Branch::Shen | Branch::You => Element::Metal,
            Branch::Chou | Branch::Chen | Branch::Wei | Branch::Xu => Element::Earth,
        }
    }

    pub fn polarity(self) -> Polarity {
        if self.index() % 2 == 0 {
            Polarity::Yang
        } else {
            Polarity::Yin
        }
    }

    /// Element governing the season when this branch holds the month.
    /// Same table as the main qi: the four earth branches close each season.
    pub fn season(self) -> Element {
        self.element()
    }

    /// Secondary and tertiary hidden stems. The main hidden stem is carried
    /// by the branch node itself.
    pub fn hidden(self) -> &'static [Stem] {
        match self {
            Branch::Zi => &[],
            Branch::Chou => &[Stem::Gui, Stem::Xin],
            Branch::Yin => &[Stem::Bing, Stem::Wu],
            Branch::Mao => &[],
            Branch::Chen => &[Stem::Yi, Stem::Gui],
            Branch::Si => &[Stem::Geng, Stem::Wu],
            Branch::Wu => &[Stem::Ji],
            Branch::Wei => &[Stem::Ding, Stem::Yi],
            Branch::Shen => &[Stem::Ren, Stem::Wu],
            Branch::You => &[],
            Branch::Xu => &[Stem::Xin, Stem::Ding],
            Branch::Hai => &[Stem::Jia],
        }
    }

    /// Element held in reserve when this branch is a vault.
    pub fn vault(self) -> Option<Element> {
        match self {
            Branch::Chen => Some(Element::Water),
            Branch::Xu => Some(Element::Fire),
            Branch::Chou => Some(Element::Metal),
            Branch::Wei => Some(Element::Wood),
            _ => None,
        }
    }

    /// Branch at maximal phase separation.
    pub fn opposite(self) -> Branch {
        Self::ALL[(self.index() + 6) % 12]
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self.index()]
    }

    pub fn glyph(self) -> char {
        Self::GLYPHS[self.index()]
    }

    pub fn from_glyph(c: char) -> Option<Branch> {
        Self::GLYPHS.iter().position(|g| *g == c).map(|i| Self::ALL[i])
    }
}

impl FromStr for Branch {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next())
            && let Some(branch) = Branch::from_glyph(c)
        {
            return Ok(branch);
        }
        Self::NAMES
            .iter()
            .position(|n| n.eq_ignore_ascii_case(trimmed))
            .map(|i| Self::ALL[i])
            .ok_or_else(|| ChartError::UnknownToken(s.to_string()))
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An atomic chart symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Token {
    Stem(Stem),
    Branch(Branch),
}

impl Token {
    pub fn element(self) -> Element {
        match self {
            Token::Stem(s) => s.element(),
            Token::Branch(b) => b.element(),
        }
    }

    pub fn polarity(self) -> Polarity {
        match self {
            Token::Stem(s) => s.polarity(),
            Token::Branch(b) => b.polarity(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Stem(s) => s.fmt(f),
            Token::Branch(b) => b.fmt(f),
        }
    }
}
