//! Relation classifier.
//!
//! Pure functions from a pair of chart participants (plus distance and
//! season context) to a typed relation with a base strength. Multi-token
//! harmonic locks are found separately by [`find_locks`] since they are not
//! pairwise.

use serde::{Deserialize, Serialize};

use crate::constants::COMBINATION_REACH;
use crate::params::ParameterSet;
use crate::token::{Branch, Element, Stem, Token};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RelationKind {
    /// Source element feeds target element.
    Generation,
    /// Source element suppresses target element.
    Control,
    /// Branch or hidden stem supporting a stem of the same element.
    Rooting,
    /// Branches at maximal phase separation. Symmetric.
    Clash,
    /// Stem or branch pair that can merge into `resultant`. Symmetric.
    Combination { resultant: Element },
}

impl RelationKind {
    pub fn tier(self) -> Tier {
        match self {
            RelationKind::Generation | RelationKind::Control | RelationKind::Rooting => Tier::Flow,
            RelationKind::Clash => Tier::Clash,
            RelationKind::Combination { .. } => Tier::PartialCombination,
        }
    }

    pub fn is_symmetric(self) -> bool {
        matches!(self, RelationKind::Clash | RelationKind::Combination { .. })
    }

    pub fn label(self) -> &'static str {
        match self {
            RelationKind::Generation => "generation",
            RelationKind::Control => "control",
            RelationKind::Rooting => "rooting",
            RelationKind::Clash => "clash",
            RelationKind::Combination { .. } => "combination",
        }
    }
}

/// Priority tiers. On a shared node, a higher tier suppresses the energetic
/// effect of every lower tier touching that node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Flow = 1,
    Clash = 2,
    PartialCombination = 3,
    FullLock = 4,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Relation {
    pub kind: RelationKind,
    pub strength: f64,
}

/// One side of a candidate relation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Participant {
    pub token: Token,
    /// Current element tag, which differs from the token's after a
    /// transformation.
    pub element: Element,
    /// Hidden sub-tokens only take part in element flow.
    pub hidden: bool,
}

impl Participant {
    pub fn main(token: Token) -> Self {
        Self {
            token,
            element: token.element(),
            hidden: false,
        }
    }

    pub fn hidden(stem: Stem) -> Self {
        Self {
            token: Token::Stem(stem),
            element: stem.element(),
            hidden: true,
        }
    }

    fn is_main_stem(&self) -> bool {
        !self.hidden && matches!(self.token, Token::Stem(_))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RelationContext<'p> {
    /// Pillar separation.
    pub distance: usize,
    /// Governing-season token (month branch).
    pub season: Branch,
    pub params: &'p ParameterSet,
}

/// Resultant element of a stem pair combination, if any.
pub fn stem_combination(a: Stem, b: Stem) -> Option<Element> {
    let (lo, hi) = if a.index() <= b.index() { (a, b) } else { (b, a) };
    // Pairs are five apart: Jia+Ji, Yi+Geng, Bing+Xin, Ding+Ren, Wu+Gui
    if hi.index() != lo.index() + 5 {
        return None;
    }
    Some(match lo {
        Stem::Jia => Element::Earth,
        Stem::Yi => Element::Metal,
        Stem::Bing => Element::Water,
        Stem::Ding => Element::Wood,
        _ => Element::Fire,
    })
}

/// Resultant element of a branch pair (six-harmony) combination, if any.
pub fn branch_combination(a: Branch, b: Branch) -> Option<Element> {
    use Branch::*;
    let pair = if a.index() <= b.index() { (a, b) } else { (b, a) };
    match pair {
        (Zi, Chou) => Some(Element::Earth),
        (Yin, Hai) => Some(Element::Wood),
        (Mao, Xu) => Some(Element::Fire),
        (Chen, You) => Some(Element::Metal),
        (Si, Shen) => Some(Element::Water),
        (Wu, Wei) => Some(Element::Fire),
        _ => None,
    }
}

pub fn is_clash(a: Branch, b: Branch) -> bool {
    a.opposite() == b
}

/// Classify the relation from `a` to `b`.
///
/// Precedence within a pair: combination, then clash, then element flow.
/// Symmetric relations are returned for either argument order.
pub fn classify(a: Participant, b: Participant, ctx: &RelationContext<'_>) -> Option<Relation> {
    let p = ctx.params;

    if !a.hidden && !b.hidden {
        let combined = match (a.token, b.token) {
            (Token::Stem(x), Token::Stem(y)) => stem_combination(x, y),
            (Token::Branch(x), Token::Branch(y)) => branch_combination(x, y),
            _ => None,
        };
        if let Some(resultant) = combined
            && ctx.distance <= COMBINATION_REACH
        {
            let mut strength = p.interaction.combination_strength;
            if resultant == ctx.season.season() {
                strength *= p.interaction.season_transform_boost;
            }
            return Some(Relation {
                kind: RelationKind::Combination { resultant },
                strength,
            });
        }

        if let (Token::Branch(x), Token::Branch(y)) = (a.token, b.token)
            && is_clash(x, y)
        {
            return Some(Relation {
                kind: RelationKind::Clash,
                strength: p.interaction.clash_strength,
            });
        }
    }

    if a.element == b.element {
        if b.is_main_stem() && !a.is_main_stem() {
            return Some(Relation {
                kind: RelationKind::Rooting,
                strength: p.flow.rooting_weight,
            });
        }
        return None;
    }
    if a.element.generates() == b.element {
        return Some(Relation {
            kind: RelationKind::Generation,
            strength: p.flow.generation_strength,
        });
    }
    if a.element.controls() == b.element {
        return Some(Relation {
            kind: RelationKind::Control,
            strength: p.flow.control_strength,
        });
    }
    None
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    /// Three-harmony trine. Two members including the centre count partially.
    Trine,
    /// Directional meeting of a season's three branches. Full only.
    Seasonal,
}

struct LockPattern {
    kind: LockKind,
    branches: [Branch; 3],
    /// Index into `branches` of the member a partial lock must include.
    center: usize,
    resultant: Element,
}

const LOCK_PATTERNS: [LockPattern; 8] = [
    LockPattern { kind: LockKind::Trine, branches: [Branch::Shen, Branch::Zi, Branch::Chen], center: 1, resultant: Element::Water },
    LockPattern { kind: LockKind::Trine, branches: [Branch::Hai, Branch::Mao, Branch::Wei], center: 1, resultant: Element::Wood },
    LockPattern { kind: LockKind::Trine, branches: [Branch::Yin, Branch::Wu, Branch::Xu], center: 1, resultant: Element::Fire },
    LockPattern { kind: LockKind::Trine, branches: [Branch::Si, Branch::You, Branch::Chou], center: 1, resultant: Element::Metal },
    LockPattern { kind: LockKind::Seasonal, branches: [Branch::Yin, Branch::Mao, Branch::Chen], center: 1, resultant: Element::Wood },
    LockPattern { kind: LockKind::Seasonal, branches: [Branch::Si, Branch::Wu, Branch::Wei], center: 1, resultant: Element::Fire },
    LockPattern { kind: LockKind::Seasonal, branches: [Branch::Shen, Branch::You, Branch::Xu], center: 1, resultant: Element::Metal },
    LockPattern { kind: LockKind::Seasonal, branches: [Branch::Hai, Branch::Zi, Branch::Chou], center: 1, resultant: Element::Water },
];

/// A harmonic lock found among a set of branch holders.
#[derive(Clone, Debug, PartialEq)]
pub struct LockMatch<K> {
    pub kind: LockKind,
    pub resultant: Element,
    pub full: bool,
    /// Every holder of a participating branch.
    pub members: Vec<K>,
}

impl<K> LockMatch<K> {
    pub fn tier(&self) -> Tier {
        if self.full {
            Tier::FullLock
        } else {
            Tier::PartialCombination
        }
    }
}

/// Find harmonic locks among `(key, branch)` holders. Keys are returned in
/// input order.
pub fn find_locks<K: Copy>(holders: &[(K, Branch)]) -> Vec<LockMatch<K>> {
    let mut found = Vec::new();
    for pattern in &LOCK_PATTERNS {
        let present: Vec<bool> = pattern
            .branches
            .iter()
            .map(|b| holders.iter().any(|(_, h)| h == b))
            .collect();
        let count = present.iter().filter(|p| **p).count();
        let full = count == 3;
        let partial = pattern.kind == LockKind::Trine && count == 2 && present[pattern.center];
        if !full && !partial {
            continue;
        }
        let members = holders
            .iter()
            .filter(|(_, h)| pattern.branches.contains(h))
            .map(|(k, _)| *k)
            .collect();
        found.push(LockMatch {
            kind: pattern.kind,
            resultant: pattern.resultant,
            full,
            members,
        });
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(params: &ParameterSet, distance: usize) -> RelationContext<'_> {
        RelationContext {
            distance,
            season: Branch::Zi,
            params,
        }
    }

    fn stem(s: Stem) -> Participant {
        Participant::main(Token::Stem(s))
    }

    fn branch(b: Branch) -> Participant {
        Participant::main(Token::Branch(b))
    }

    #[test]
    fn test_generation_and_control_directed() {
        let p = ParameterSet::default();
        let c = ctx(&p, 1);
        let r = classify(stem(Stem::Jia), stem(Stem::Bing), &c).unwrap();
        assert_eq!(r.kind, RelationKind::Generation);
        assert_eq!(r.strength, p.flow.generation_strength);
        // Fire does not generate wood; wood generates fire
        assert!(classify(stem(Stem::Bing), stem(Stem::Jia), &c).is_none());

        let r = classify(stem(Stem::Geng), stem(Stem::Jia), &c).unwrap();
        assert_eq!(r.kind, RelationKind::Control);
    }

    #[test]
    fn test_clash_symmetric() {
        let p = ParameterSet::default();
        let c = ctx(&p, 3);
        let ab = classify(branch(Branch::Zi), branch(Branch::Wu), &c).unwrap();
        let ba = classify(branch(Branch::Wu), branch(Branch::Zi), &c).unwrap();
        assert_eq!(ab.kind, RelationKind::Clash);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_combination_outranks_flow() {
        let p = ParameterSet::default();
        // Jia controls Ji, but the pair combines into earth
        let r = classify(stem(Stem::Jia), stem(Stem::Ji), &ctx(&p, 1)).unwrap();
        assert_eq!(
            r.kind,
            RelationKind::Combination {
                resultant: Element::Earth
            }
        );
    }

    #[test]
    fn test_combination_needs_adjacency() {
        let p = ParameterSet::default();
        let r = classify(stem(Stem::Jia), stem(Stem::Ji), &ctx(&p, 2)).unwrap();
        assert_eq!(r.kind, RelationKind::Control);
    }

    #[test]
    fn test_combination_boosted_in_season() {
        let p = ParameterSet::default();
        let in_season = RelationContext {
            distance: 1,
            season: Branch::Chen,
            params: &p,
        };
        let r = classify(stem(Stem::Jia), stem(Stem::Ji), &in_season).unwrap();
        assert!(
            (r.strength
                - p.interaction.combination_strength * p.interaction.season_transform_boost)
                .abs()
                < 1e-12
        );
    }

    #[test]
    fn test_hidden_never_structural() {
        let p = ParameterSet::default();
        let a = Participant::hidden(Stem::Jia);
        let r = classify(a, stem(Stem::Ji), &ctx(&p, 0)).unwrap();
        assert_eq!(r.kind, RelationKind::Control);
    }

    #[test]
    fn test_rooting() {
        let p = ParameterSet::default();
        let c = ctx(&p, 0);
        let r = classify(branch(Branch::Yin), stem(Stem::Jia), &c).unwrap();
        assert_eq!(r.kind, RelationKind::Rooting);
        let r = classify(Participant::hidden(Stem::Jia), stem(Stem::Yi), &c).unwrap();
        assert_eq!(r.kind, RelationKind::Rooting);
        // Stems do not root each other, and stems do not root branches
        assert!(classify(stem(Stem::Jia), stem(Stem::Yi), &c).is_none());
        assert!(classify(stem(Stem::Jia), branch(Branch::Yin), &c).is_none());
    }

    #[test]
    fn test_retyped_element_drives_flow() {
        let p = ParameterSet::default();
        let mut jia = stem(Stem::Jia);
        jia.element = Element::Earth;
        let r = classify(jia, stem(Stem::Geng), &ctx(&p, 2)).unwrap();
        assert_eq!(r.kind, RelationKind::Generation);
    }

    #[test]
    fn test_all_clash_pairs() {
        let clashes = Branch::ALL
            .iter()
            .flat_map(|a| Branch::ALL.iter().map(move |b| (*a, *b)))
            .filter(|(a, b)| is_clash(*a, *b))
            .count();
        assert_eq!(clashes, 12);
    }

    #[test]
    fn test_full_trine() {
        let holders = [(0, Branch::Shen), (1, Branch::Zi), (2, Branch::Chen), (3, Branch::Wu)];
        let locks = find_locks(&holders);
        let water: Vec<_> = locks
            .iter()
            .filter(|l| l.resultant == Element::Water)
            .collect();
        assert_eq!(water.len(), 1);
        assert!(water[0].full);
        assert_eq!(water[0].members, vec![0, 1, 2]);
        assert_eq!(water[0].tier(), Tier::FullLock);
    }

    #[test]
    fn test_partial_trine_needs_center() {
        let with_center = find_locks(&[(0, Branch::Zi), (1, Branch::Chen)]);
        assert_eq!(with_center.len(), 1);
        assert!(!with_center[0].full);
        assert_eq!(with_center[0].tier(), Tier::PartialCombination);

        let without_center = find_locks(&[(0, Branch::Shen), (1, Branch::Chen)]);
        assert!(without_center.is_empty());
    }

    #[test]
    fn test_seasonal_meeting_full_only() {
        let partial = find_locks(&[(0, Branch::Yin), (1, Branch::Mao)]);
        assert!(partial.is_empty());
        let full = find_locks(&[(0, Branch::Yin), (1, Branch::Mao), (2, Branch::Chen)]);
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].kind, LockKind::Seasonal);
        assert_eq!(full[0].resultant, Element::Wood);
    }

    #[test]
    fn test_tier_order() {
        assert!(Tier::FullLock > Tier::PartialCombination);
        assert!(Tier::PartialCombination > Tier::Clash);
        assert!(Tier::Clash > Tier::Flow);
    }
}
