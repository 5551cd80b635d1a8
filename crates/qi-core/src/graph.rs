//! Interaction graph built from a chart.
//!
//! Nodes live in stable slots: a [`NodeId`] is a slot index that stays valid
//! for as long as its node lives, so overlay nodes can be added and removed
//! without disturbing the ids of natal nodes. Slots freed by a removed
//! overlay are handed out again to the next nodes added, which keeps the
//! slot count bounded across repeated overlay swaps. Edges, locks and
//! suppression flags are derived state and are re-derived whenever a node's
//! element tag or the node set changes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chart::{Chart, Pillar};
use crate::constants::OVERLAY_DISTANCE;
use crate::energy::Energy;
use crate::params::ParameterSet;
use crate::relation::{
    LockKind, Participant, RelationContext, RelationKind, Tier, classify, find_locks,
};
use crate::token::{Branch, Element, Phase, Token};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    PillarStem,
    PillarBranch,
    HiddenSecondary,
    HiddenTertiary,
    DecadeStem,
    DecadeBranch,
    YearStem,
    YearBranch,
}

impl NodeRole {
    pub fn is_hidden(self) -> bool {
        matches!(self, NodeRole::HiddenSecondary | NodeRole::HiddenTertiary)
    }

    pub fn is_overlay(self) -> bool {
        matches!(
            self,
            NodeRole::DecadeStem | NodeRole::DecadeBranch | NodeRole::YearStem | NodeRole::YearBranch
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::PillarStem => "stem",
            NodeRole::PillarBranch => "branch",
            NodeRole::HiddenSecondary => "hidden2",
            NodeRole::HiddenTertiary => "hidden3",
            NodeRole::DecadeStem => "decade_stem",
            NodeRole::DecadeBranch => "decade_branch",
            NodeRole::YearStem => "year_stem",
            NodeRole::YearBranch => "year_branch",
        }
    }
}

/// Where a node sits in the chart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Natal(usize),
    Decade,
    Year,
}

impl Position {
    pub fn distance(self, other: Position) -> usize {
        match (self, other) {
            (Position::Natal(a), Position::Natal(b)) => a.abs_diff(b),
            (a, b) if a == b => 0,
            _ => OVERLAY_DISTANCE,
        }
    }
}

/// Temporal overlay scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayScale {
    Decade,
    Year,
}

impl OverlayScale {
    fn position(self) -> Position {
        match self {
            OverlayScale::Decade => Position::Decade,
            OverlayScale::Year => Position::Year,
        }
    }
}

/// Mutable unit of simulation.
///
/// The element tag starts as the token's element and changes only through
/// [`Node::retype`], which bumps `version`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub token: Token,
    pub role: NodeRole,
    pub position: Position,
    pub element: Element,
    pub version: u32,
    pub initial_energy: Energy,
    pub current_energy: Energy,
    /// Owning branch, for hidden sub-tokens.
    pub parent: Option<NodeId>,
}

impl Node {
    pub fn participant(&self) -> Participant {
        Participant {
            token: self.token,
            element: self.element,
            hidden: self.role.is_hidden(),
        }
    }

    /// Set the element tag. Returns false when the tag is already `element`.
    pub fn retype(&mut self, element: Element) -> bool {
        if self.element == element {
            return false;
        }
        self.element = element;
        self.version += 1;
        true
    }

    pub fn branch(&self) -> Option<Branch> {
        match self.token {
            Token::Branch(b) if !self.role.is_hidden() => Some(b),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: RelationKind,
    pub strength: f64,
    /// Distance decay multiplier.
    pub decay: f64,
    /// Position modifier (vertical same-pillar pairs).
    pub modifier: f64,
    /// Outranked by a higher-tier relation on a shared node.
    pub suppressed: bool,
}

impl Edge {
    pub fn touches(&self, n: NodeId) -> bool {
        self.source == n || self.target == n
    }

    pub fn other(&self, n: NodeId) -> NodeId {
        if self.source == n { self.target } else { self.source }
    }

    /// Transfer weight before the per-pass damping factor.
    pub fn weight(&self, retention: f64) -> f64 {
        let w = self.strength * self.decay * self.modifier;
        if self.suppressed { w * retention } else { w }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub kind: LockKind,
    pub resultant: Element,
    pub full: bool,
    pub members: Vec<NodeId>,
    pub suppressed: bool,
    pub transformed: bool,
}

impl Lock {
    pub fn tier(&self) -> Tier {
        if self.full {
            Tier::FullLock
        } else {
            Tier::PartialCombination
        }
    }
}

/// Dormant reservoir held by a vault branch, released into its stored
/// element's hidden node once a clash strikes the branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vault {
    pub branch: NodeId,
    pub store: NodeId,
    pub element: Element,
    pub reservoir: f64,
    pub released: bool,
}

impl Vault {
    /// Release the reservoir. Returns the released amount, zero if the vault
    /// was already open.
    pub fn release(&mut self) -> f64 {
        if self.released {
            return 0.0;
        }
        self.released = true;
        self.reservoir
    }
}

#[derive(Clone, Debug)]
pub struct Graph {
    slots: Vec<Option<Node>>,
    edges: Vec<Edge>,
    locks: Vec<Lock>,
    vaults: Vec<Vault>,
    transformed_pairs: BTreeSet<(NodeId, NodeId)>,
    season: Branch,
}

fn phase_multiplier(phase: Phase, params: &ParameterSet) -> f64 {
    let f = &params.foundation;
    match phase {
        Phase::Prosperous => f.prosperous,
        Phase::Favored => f.favored,
        Phase::Resting => 1.0,
        Phase::Trapped => f.trapped,
        Phase::Dead => f.dead,
    }
}

/// Initial energy from the role/position table, scaled by seasonal phase.
pub fn initial_energy(
    role: NodeRole,
    position: Position,
    element: Element,
    season: Branch,
    params: &ParameterSet,
) -> f64 {
    let f = &params.foundation;
    let base = match role {
        NodeRole::PillarStem | NodeRole::DecadeStem | NodeRole::YearStem => f.stem_base,
        NodeRole::PillarBranch | NodeRole::DecadeBranch | NodeRole::YearBranch => f.branch_base,
        NodeRole::HiddenSecondary => f.branch_base * f.hidden_secondary_ratio,
        NodeRole::HiddenTertiary => f.branch_base * f.hidden_tertiary_ratio,
    };
    let positional = match position {
        Position::Natal(i) => params.pillar_weight(i),
        Position::Decade => f.decade_weight,
        Position::Year => f.year_weight,
    };
    base * positional * phase_multiplier(Phase::of(element, season.season()), params)
}

impl Graph {
    /// Empty graph governed by `season`. Nodes and edges may be added by
    /// hand; [`Graph::build`] is the usual entry point.
    pub fn new(season: Branch) -> Self {
        Self {
            slots: Vec::new(),
            edges: Vec::new(),
            locks: Vec::new(),
            vaults: Vec::new(),
            transformed_pairs: BTreeSet::new(),
            season,
        }
    }

    pub fn build(chart: &Chart, params: &ParameterSet) -> Self {
        let mut graph = Self::new(chart.season_branch());
        for (i, pillar) in chart.pillars().iter().enumerate() {
            graph.push_pillar(*pillar, Position::Natal(i), params);
        }
        if let Some(decade) = chart.decade {
            graph.push_pillar(decade, Position::Decade, params);
        }
        if let Some(year) = chart.year {
            graph.push_pillar(year, Position::Year, params);
        }
        graph.derive_all(params);
        graph
    }

    pub fn season(&self) -> Branch {
        self.season
    }

    // --- Nodes ---

    /// Add a node with an explicit initial energy. No edges are derived.
    pub fn add_node(
        &mut self,
        token: Token,
        role: NodeRole,
        position: Position,
        initial: f64,
        parent: Option<NodeId>,
    ) -> NodeId {
        let free = self.slots.iter().position(Option::is_none);
        let id = NodeId(free.unwrap_or(self.slots.len()));
        let node = Some(Node {
            id,
            token,
            role,
            position,
            element: token.element(),
            version: 0,
            initial_energy: Energy::new(initial),
            current_energy: Energy::new(initial),
            parent,
        });
        match free {
            Some(slot) => self.slots[slot] = node,
            None => self.slots.push(node),
        }
        id
    }

    fn push_pillar(&mut self, pillar: Pillar, position: Position, params: &ParameterSet) -> Vec<NodeId> {
        let (stem_role, branch_role) = match position {
            Position::Natal(_) => (NodeRole::PillarStem, NodeRole::PillarBranch),
            Position::Decade => (NodeRole::DecadeStem, NodeRole::DecadeBranch),
            Position::Year => (NodeRole::YearStem, NodeRole::YearBranch),
        };
        let season = self.season;
        let energy = |role, element| initial_energy(role, position, element, season, params);

        let stem = self.add_node(
            Token::Stem(pillar.stem),
            stem_role,
            position,
            energy(stem_role, pillar.stem.element()),
            None,
        );
        let branch = self.add_node(
            Token::Branch(pillar.branch),
            branch_role,
            position,
            energy(branch_role, pillar.branch.element()),
            None,
        );
        let mut added = vec![stem, branch];

        if matches!(position, Position::Natal(_)) {
            let roles = [NodeRole::HiddenSecondary, NodeRole::HiddenTertiary];
            for (role, hidden) in roles.into_iter().zip(pillar.branch.hidden()) {
                let id = self.add_node(
                    Token::Stem(*hidden),
                    role,
                    position,
                    energy(role, hidden.element()),
                    Some(branch),
                );
                added.push(id);
                if pillar.branch.vault() == Some(hidden.element()) {
                    let reservoir =
                        params.interaction.vault_multiplier * energy(role, hidden.element());
                    self.vaults.push(Vault {
                        branch,
                        store: id,
                        element: hidden.element(),
                        reservoir,
                        released: false,
                    });
                }
            }
        }
        added
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.0).and_then(|s| s.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots.get_mut(id.0).and_then(|s| s.as_mut())
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().flatten()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.slots.iter_mut().flatten()
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// Slot capacity; energy vectors indexed by `NodeId.0` need this length.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // --- Edges, locks, vaults ---

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Add a hand-built edge. Suppression is recomputed.
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
        self.recompute_suppression();
    }

    pub fn outgoing(&self, n: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges
            .iter()
            .filter(move |e| e.source == n || (e.kind.is_symmetric() && e.target == n))
    }

    pub fn incident(&self, n: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.touches(n))
    }

    pub fn locks(&self) -> &[Lock] {
        &self.locks
    }

    pub fn locks_mut(&mut self) -> &mut [Lock] {
        &mut self.locks
    }

    pub fn vaults(&self) -> &[Vault] {
        &self.vaults
    }

    pub fn vaults_mut(&mut self) -> &mut [Vault] {
        &mut self.vaults
    }

    pub fn is_pair_transformed(&self, a: NodeId, b: NodeId) -> bool {
        self.transformed_pairs.contains(&ordered(a, b))
    }

    pub fn mark_pair_transformed(&mut self, a: NodeId, b: NodeId) {
        self.transformed_pairs.insert(ordered(a, b));
    }

    // --- Derivation ---

    fn derive_all(&mut self, params: &ParameterSet) {
        self.edges.clear();
        let ids: Vec<NodeId> = self.nodes().map(|n| n.id).collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                self.derive_pair(*a, *b, params);
            }
        }
        self.refresh_locks();
        self.recompute_suppression();
    }

    /// Derive the pairwise edges between `a` and `b`, with `a < b`.
    fn derive_pair(&mut self, a: NodeId, b: NodeId, params: &ParameterSet) {
        let (Some(na), Some(nb)) = (self.node(a), self.node(b)) else {
            return;
        };
        // A hidden stem and its own branch are one token
        if na.parent == Some(b) || nb.parent == Some(a) {
            return;
        }
        if na.parent.is_some() && na.parent == nb.parent {
            return;
        }

        let distance = na.position.distance(nb.position);
        let ctx = RelationContext {
            distance,
            season: self.season,
            params,
        };
        let decay = params.flow.distance_decay.powi(distance as i32);
        let modifier = if distance == 0 {
            params.flow.same_pillar_bonus
        } else {
            1.0
        };
        let (pa, pb) = (na.participant(), nb.participant());

        let mut derived = Vec::with_capacity(2);
        if let Some(r) = classify(pa, pb, &ctx) {
            derived.push((a, b, r));
        }
        if let Some(r) = classify(pb, pa, &ctx)
            && !r.kind.is_symmetric()
        {
            derived.push((b, a, r));
        }
        for (source, target, r) in derived {
            self.edges.push(Edge {
                source,
                target,
                kind: r.kind,
                strength: r.strength,
                decay,
                modifier,
                suppressed: false,
            });
        }
    }

    /// Re-derive every pairwise edge touching `n` from its current element
    /// tag, then recompute suppression.
    pub fn rederive_incident(&mut self, n: NodeId, params: &ParameterSet) {
        self.edges.retain(|e| !e.touches(n));
        let others: Vec<NodeId> = self.nodes().map(|m| m.id).filter(|m| *m != n).collect();
        for m in others {
            let (a, b) = ordered(n, m);
            self.derive_pair(a, b, params);
        }
        self.recompute_suppression();
    }

    fn refresh_locks(&mut self) {
        let holders: Vec<(NodeId, Branch)> = self
            .nodes()
            .filter_map(|n| n.branch().map(|b| (n.id, b)))
            .collect();
        self.locks = find_locks(&holders)
            .into_iter()
            .map(|m| Lock {
                kind: m.kind,
                resultant: m.resultant,
                full: m.full,
                members: m.members,
                suppressed: false,
                transformed: false,
            })
            .collect();
    }

    /// Apply the tie-break policy: for every node, the highest live tier
    /// touching it suppresses all lower tiers touching it. Transformed
    /// combinations and locks have resolved and no longer outrank anything.
    pub fn recompute_suppression(&mut self) {
        let mut top = vec![Tier::Flow; self.slots.len()];
        for e in &self.edges {
            if self.is_resolved(e) {
                continue;
            }
            let t = e.kind.tier();
            for n in [e.source, e.target] {
                top[n.0] = top[n.0].max(t);
            }
        }
        for l in &self.locks {
            if l.transformed {
                continue;
            }
            for m in &l.members {
                top[m.0] = top[m.0].max(l.tier());
            }
        }

        let resolved: Vec<bool> = self.edges.iter().map(|e| self.is_resolved(e)).collect();
        for (e, resolved) in self.edges.iter_mut().zip(resolved) {
            let t = e.kind.tier();
            e.suppressed = !resolved && (top[e.source.0] > t || top[e.target.0] > t);
        }
        for l in &mut self.locks {
            let t = l.tier();
            l.suppressed = !l.transformed && l.members.iter().any(|m| top[m.0] > t);
        }
    }

    fn is_resolved(&self, e: &Edge) -> bool {
        matches!(e.kind, RelationKind::Combination { .. })
            && self.is_pair_transformed(e.source, e.target)
    }

    // --- Incremental overlays ---

    /// Add, replace or remove the overlay pillar at `scale` without
    /// rebuilding the rest of the graph. Only edges touching the changed
    /// nodes are derived; natal node ids are unchanged.
    pub fn set_overlay(&mut self, scale: OverlayScale, pillar: Option<Pillar>, params: &ParameterSet) {
        let position = scale.position();
        let stale: Vec<NodeId> = self
            .nodes()
            .filter(|n| n.position == position)
            .map(|n| n.id)
            .collect();
        for id in &stale {
            self.slots[id.0] = None;
        }
        self.edges
            .retain(|e| !stale.contains(&e.source) && !stale.contains(&e.target));
        self.transformed_pairs
            .retain(|(a, b)| !stale.contains(a) && !stale.contains(b));

        if let Some(pillar) = pillar {
            let added = self.push_pillar(pillar, position, params);
            let existing: Vec<NodeId> = self
                .nodes()
                .map(|n| n.id)
                .filter(|id| !added.contains(id))
                .collect();
            for (i, n) in added.iter().enumerate() {
                for m in existing.iter().chain(&added[i + 1..]) {
                    let (a, b) = ordered(*n, *m);
                    self.derive_pair(a, b, params);
                }
            }
        }
        self.refresh_locks();
        self.recompute_suppression();
    }

    // --- Aggregates ---

    /// Current energy summed per element tag, indexed by `Element::index`.
    pub fn element_totals(&self) -> [f64; 5] {
        let mut totals = [0.0; 5];
        for n in self.nodes() {
            totals[n.element.index()] += n.current_energy.get();
        }
        totals
    }
}

fn ordered(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Stem;

    fn chart(pillars: [&str; 4]) -> Chart {
        Chart::parse(&pillars).unwrap()
    }

    fn find(graph: &Graph, token: Token, role: NodeRole) -> NodeId {
        graph
            .nodes()
            .find(|n| n.token == token && n.role == role)
            .map(|n| n.id)
            .unwrap()
    }

    #[test]
    fn test_node_set_includes_hidden() {
        let p = ParameterSet::default();
        // Zi: no extra hidden, Chou: 2, Yin: 2, Mao: none
        let g = Graph::build(&chart(["JiaZi", "YiChou", "BingYin", "DingMao"]), &p);
        assert_eq!(g.node_count(), 8 + 4);
        let hidden = g.nodes().filter(|n| n.role.is_hidden()).count();
        assert_eq!(hidden, 4);
        for n in g.nodes().filter(|n| n.role.is_hidden()) {
            let parent = g.node(n.parent.unwrap()).unwrap();
            assert_eq!(parent.role, NodeRole::PillarBranch);
            assert_eq!(parent.position, n.position);
        }
    }

    #[test]
    fn test_initial_energy_table() {
        let p = ParameterSet::default();
        let g = Graph::build(&chart(["JiaZi", "YiChou", "BingYin", "DingMao"]), &p);
        // Season is Chou (earth). Jia wood controls earth: trapped.
        let jia = g.node(find(&g, Token::Stem(Stem::Jia), NodeRole::PillarStem)).unwrap();
        let expected = p.foundation.stem_base * p.foundation.year_pillar * p.foundation.trapped;
        assert!((jia.initial_energy.get() - expected).abs() < 1e-12);

        // Hidden sub-tokens start lower than their branch
        let chou = find(&g, Token::Branch(Branch::Chou), NodeRole::PillarBranch);
        let branch_energy = g.node(chou).unwrap().initial_energy;
        for n in g.nodes().filter(|n| n.parent == Some(chou)) {
            assert!(n.initial_energy < branch_energy);
        }
    }

    #[test]
    fn test_season_prosperous_multiplier() {
        let p = ParameterSet::default();
        let g = Graph::build(&chart(["GengShen", "JiaYin", "WuChen", "GuiHai"]), &p);
        let jia = g.node(find(&g, Token::Stem(Stem::Jia), NodeRole::PillarStem)).unwrap();
        let expected = p.foundation.stem_base * p.foundation.month_pillar * p.foundation.prosperous;
        assert!((jia.initial_energy.get() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_distance_decay_monotonic() {
        let p = ParameterSet::default();
        let g = Graph::build(&chart(["GengShen", "JiaYin", "WuChen", "GuiHai"]), &p);
        let mut decays: Vec<(usize, f64)> = Vec::new();
        for e in g.edges() {
            let d = g
                .node(e.source)
                .unwrap()
                .position
                .distance(g.node(e.target).unwrap().position);
            decays.push((d, e.decay));
        }
        for (d1, k1) in &decays {
            for (d2, k2) in &decays {
                if d1 < d2 {
                    assert!(k1 > k2, "decay must fall with distance: {d1}->{k1}, {d2}->{k2}");
                }
            }
        }
    }

    #[test]
    fn test_hidden_not_linked_to_own_branch() {
        let p = ParameterSet::default();
        let g = Graph::build(&chart(["JiaZi", "YiChou", "BingYin", "DingMao"]), &p);
        for n in g.nodes().filter(|n| n.role.is_hidden()) {
            let parent = n.parent.unwrap();
            assert!(g.incident(n.id).all(|e| e.other(n.id) != parent));
        }
    }

    #[test]
    fn test_clash_suppresses_flow_on_shared_node() {
        let p = ParameterSet::default();
        // Zi (year) and Wu (month) clash; no combination or lock touches them
        let g = Graph::build(&chart(["GengZi", "JiaWu", "GengYou", "GengYou"]), &p);
        let zi = find(&g, Token::Branch(Branch::Zi), NodeRole::PillarBranch);
        let wu = find(&g, Token::Branch(Branch::Wu), NodeRole::PillarBranch);
        let clash = g
            .edges()
            .iter()
            .find(|e| e.kind == RelationKind::Clash && e.touches(zi) && e.touches(wu))
            .unwrap();
        assert!(!clash.suppressed);
        for e in g.incident(zi).filter(|e| e.kind.tier() == Tier::Flow) {
            assert!(e.suppressed, "{e:?} should be outranked by the clash");
        }
    }

    #[test]
    fn test_combination_suppresses_clash() {
        let p = ParameterSet::default();
        // Zi+Chou combine (adjacent); Wu clashes Zi
        let g = Graph::build(&chart(["GengZi", "GengChou", "GengShen", "JiaWu"]), &p);
        let zi = find(&g, Token::Branch(Branch::Zi), NodeRole::PillarBranch);
        let clash = g
            .edges()
            .iter()
            .find(|e| e.kind == RelationKind::Clash && e.touches(zi))
            .unwrap();
        assert!(clash.suppressed);
        let combo = g
            .edges()
            .iter()
            .find(|e| matches!(e.kind, RelationKind::Combination { .. }) && e.touches(zi))
            .unwrap();
        assert!(!combo.suppressed);
    }

    #[test]
    fn test_vault_seeded() {
        let p = ParameterSet::default();
        let g = Graph::build(&chart(["GengChen", "JiaXu", "GengShen", "GengShen"]), &p);
        assert_eq!(g.vaults().len(), 2);
        for v in g.vaults() {
            let store = g.node(v.store).unwrap();
            assert_eq!(store.element, v.element);
            assert_eq!(store.parent, Some(v.branch));
            assert!(
                (v.reservoir - p.interaction.vault_multiplier * store.initial_energy.get()).abs()
                    < 1e-12
            );
        }
    }

    #[test]
    fn test_vault_release_once() {
        let mut v = Vault {
            branch: NodeId(0),
            store: NodeId(1),
            element: Element::Water,
            reservoir: 2.0,
            released: false,
        };
        assert_eq!(v.release(), 2.0);
        assert_eq!(v.release(), 0.0);
        assert!(v.released);
    }

    #[test]
    fn test_overlay_incremental_matches_full_build() {
        let p = ParameterSet::default();
        let natal = chart(["GengShen", "JiaYin", "WuChen", "GuiHai"]);
        let year: Pillar = "BingWu".parse().unwrap();

        let mut incremental = Graph::build(&natal, &p);
        let before: Vec<NodeId> = incremental.nodes().map(|n| n.id).collect();
        incremental.set_overlay(OverlayScale::Year, Some(year), &p);
        let full = Graph::build(&natal.clone().with_year(year), &p);

        assert_eq!(incremental.node_count(), full.node_count());
        assert_eq!(incremental.edges().len(), full.edges().len());
        assert_eq!(incremental.locks().len(), full.locks().len());
        // Natal ids are stable
        for id in before {
            assert!(incremental.node(id).is_some());
        }

        incremental.set_overlay(OverlayScale::Year, None, &p);
        let bare = Graph::build(&natal, &p);
        assert_eq!(incremental.node_count(), bare.node_count());
        assert_eq!(incremental.edges().len(), bare.edges().len());
        assert!(incremental.nodes().all(|n| !n.role.is_overlay()));
    }

    #[test]
    fn test_overlay_replace_keeps_single_pillar() {
        let p = ParameterSet::default();
        let mut g = Graph::build(&chart(["GengShen", "JiaYin", "WuChen", "GuiHai"]), &p);
        g.set_overlay(OverlayScale::Year, Some("BingWu".parse().unwrap()), &p);
        g.set_overlay(OverlayScale::Year, Some("DingWei".parse().unwrap()), &p);
        let year_nodes: Vec<&Node> = g.nodes().filter(|n| n.position == Position::Year).collect();
        assert_eq!(year_nodes.len(), 2);
        assert!(year_nodes.iter().any(|n| n.token == Token::Stem(Stem::Ding)));
    }

    #[test]
    fn test_overlay_swaps_reuse_slots() {
        let p = ParameterSet::default();
        let natal = chart(["GengShen", "JiaYin", "WuChen", "GuiHai"]);
        let mut g = Graph::build(&natal, &p);
        g.set_overlay(OverlayScale::Decade, Some("JiaZi".parse().unwrap()), &p);
        g.set_overlay(OverlayScale::Year, Some("BingWu".parse().unwrap()), &p);
        let capacity = g.capacity();
        let natal_ids: Vec<NodeId> = g
            .nodes()
            .filter(|n| !n.role.is_overlay())
            .map(|n| n.id)
            .collect();

        let years = ["DingWei", "WuShen", "JiYou", "GengXu", "XinHai"];
        for year in years.iter().cycle().take(20) {
            g.set_overlay(OverlayScale::Year, Some(year.parse().unwrap()), &p);
            assert_eq!(g.capacity(), capacity);
            assert_eq!(g.node_count(), capacity);
        }
        for id in &natal_ids {
            assert!(!g.node(*id).unwrap().role.is_overlay());
        }

        // Same relations as a fresh build of the final chart
        let full = Graph::build(
            &natal
                .clone()
                .with_decade("JiaZi".parse().unwrap())
                .with_year("XinHai".parse().unwrap()),
            &p,
        );
        assert_eq!(g.node_count(), full.node_count());
        assert_eq!(g.edges().len(), full.edges().len());
        assert_eq!(g.locks().len(), full.locks().len());
    }

    #[test]
    fn test_rederive_after_retype() {
        let p = ParameterSet::default();
        let mut g = Graph::build(&chart(["GengShen", "JiaYin", "WuChen", "GuiHai"]), &p);
        let jia = find(&g, Token::Stem(Stem::Jia), NodeRole::PillarStem);
        assert!(g.node_mut(jia).unwrap().retype(Element::Earth));
        assert_eq!(g.node(jia).unwrap().version, 1);
        g.rederive_incident(jia, &p);
        // Earth generates metal: Jia now feeds the metal nodes
        let feeds_metal = g.outgoing(jia).any(|e| {
            e.kind == RelationKind::Generation && g.node(e.target).unwrap().element == Element::Metal
        });
        assert!(feeds_metal);
    }
}
