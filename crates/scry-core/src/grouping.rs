//! Proximity clustering of human players into groups.
//!
//! Before activity starts, players of the same group tend to stand together.
//! Every player within `threshold` of another is linked; connected
//! components become groups. The component that contains the local player
//! is the local squad.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{GroupMap, SessionContext};
use crate::entity::{EntityKind, GROUP_SOLO, GROUP_SQUAD};
use crate::math::Vec3;
use crate::registry::EntityRegistry;

/// Default link distance.
pub const DEFAULT_GROUP_DISTANCE: f32 = 15.0;

/// How multi-member groups are numbered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupIdPolicy {
    /// Number groups 1, 2, ... afresh on every pass.
    #[default]
    Fresh,
    /// Reuse a member's id from the previous pass when no other group has
    /// claimed it; new groups continue after the highest id seen.
    Stable,
}

/// One candidate player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupNode {
    pub id: i32,
    pub position: Vec3,
}

/// Result of one clustering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupAssignment {
    pub groups: GroupMap,
    /// Members of the local player's component.
    pub teammates: HashSet<i32>,
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Cluster with fresh numbering.
pub fn cluster(local: Option<Vec3>, nodes: &[GroupNode], threshold: f32) -> GroupAssignment {
    cluster_with_policy(local, nodes, threshold, GroupIdPolicy::Fresh, &GroupMap::new())
}

/// Cluster `nodes` around the optional local position.
///
/// Components are visited in order of their first node, so the same input
/// always yields the same numbering.
pub fn cluster_with_policy(
    local: Option<Vec3>,
    nodes: &[GroupNode],
    threshold: f32,
    policy: GroupIdPolicy,
    previous: &GroupMap,
) -> GroupAssignment {
    let mut assignment = GroupAssignment::default();
    if nodes.is_empty() {
        return assignment;
    }

    let mut positions: Vec<Vec3> = nodes.iter().map(|n| n.position).collect();
    let local_index = local.map(|p| {
        positions.push(p);
        positions.len() - 1
    });

    let threshold_sq = threshold * threshold;
    let mut uf = UnionFind::new(positions.len());
    for i in 0..positions.len() {
        for j in i + 1..positions.len() {
            if positions[i].distance_squared(positions[j]) <= threshold_sq {
                uf.union(i, j);
            }
        }
    }

    let local_root = local_index.map(|i| uf.find(i));
    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut first_seen: HashMap<usize, usize> = HashMap::new();
    for i in 0..nodes.len() {
        let root = uf.find(i);
        let key = *first_seen.entry(root).or_insert(i);
        components.entry(key).or_default().push(i);
    }

    let mut claimed: HashSet<i32> = HashSet::new();
    let mut next_id = match policy {
        GroupIdPolicy::Fresh => 1,
        GroupIdPolicy::Stable => previous.values().copied().filter(|g| *g > 0).max().unwrap_or(0) + 1,
    };

    for members in components.values() {
        let root = uf.find(members[0]);
        if Some(root) == local_root {
            for &m in members {
                assignment.groups.insert(nodes[m].id, GROUP_SQUAD);
                assignment.teammates.insert(nodes[m].id);
            }
            continue;
        }
        if members.len() < 2 {
            assignment.groups.insert(nodes[members[0]].id, GROUP_SOLO);
            continue;
        }

        let reused = match policy {
            GroupIdPolicy::Fresh => None,
            GroupIdPolicy::Stable => members
                .iter()
                .filter_map(|&m| previous.get(&nodes[m].id).copied())
                .filter(|g| *g > 0 && !claimed.contains(g))
                .min(),
        };
        let group = reused.unwrap_or_else(|| {
            let id = next_id;
            next_id += 1;
            id
        });
        claimed.insert(group);
        for &m in members {
            assignment.groups.insert(nodes[m].id, group);
        }
    }
    assignment
}

/// Cluster the registry's human PMCs and publish the result.
///
/// The context's group map is replaced as a whole, then each entity picks up
/// its new group and teammate flag.
pub fn refresh_groups(
    registry: &EntityRegistry,
    ctx: &SessionContext,
    threshold: f32,
    policy: GroupIdPolicy,
) -> GroupAssignment {
    let local = registry.local().position();
    let candidates: Vec<_> = registry
        .snapshot()
        .into_iter()
        .filter(|e| !e.is_local() && e.is_active() && e.id().is_some())
        .filter(|e| matches!(e.kind(), EntityKind::Pmc | EntityKind::Teammate))
        .filter(|e| e.position().is_normal())
        .collect();
    let nodes: Vec<GroupNode> = candidates
        .iter()
        .filter_map(|e| {
            e.id().map(|id| GroupNode {
                id,
                position: e.position(),
            })
        })
        .collect();

    let local = local.is_normal().then_some(local);
    let assignment = cluster_with_policy(local, &nodes, threshold, policy, &ctx.groups());

    ctx.replace_groups(assignment.groups.clone());
    for entity in &candidates {
        let Some(id) = entity.id() else {
            continue;
        };
        let teammate = assignment.teammates.contains(&id);
        entity.set_group(assignment.groups.get(&id).copied().unwrap_or(GROUP_SOLO));
        entity.set_teammate(teammate);
        ctx.set_teammate(id, teammate);
    }
    debug!(
        "Grouped {} players, {} teammates",
        nodes.len(),
        assignment.teammates.len()
    );
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn node(id: i32, x: f32, z: f32) -> GroupNode {
        GroupNode {
            id,
            position: Vec3::new(x, 0.0, z),
        }
    }

    #[test]
    fn test_local_component_is_squad_and_far_player_is_solo() {
        let nodes = [node(1, 1.0, 0.0), node(2, 100.0, 0.0)];
        let result = cluster(Some(Vec3::ZERO), &nodes, DEFAULT_GROUP_DISTANCE);
        assert_eq!(result.groups[&1], GROUP_SQUAD);
        assert_eq!(result.groups[&2], GROUP_SOLO);
        assert_eq!(result.teammates, HashSet::from([1]));
    }

    #[test]
    fn test_pair_without_local_gets_fresh_positive_id() {
        let nodes = [node(1, 0.0, 0.0), node(2, 1.0, 0.0)];
        let result = cluster(None, &nodes, DEFAULT_GROUP_DISTANCE);
        assert_eq!(result.groups[&1], result.groups[&2]);
        assert!(result.groups[&1] > 0);
        assert!(result.teammates.is_empty());
    }

    #[test]
    fn test_chain_links_transitively() {
        // 1 and 3 are 20 apart, but 2 bridges them
        let nodes = [node(1, 0.0, 0.0), node(2, 10.0, 0.0), node(3, 20.0, 0.0), node(4, 200.0, 0.0), node(5, 205.0, 0.0)];
        let result = cluster(None, &nodes, 15.0);
        assert_eq!(result.groups[&1], 1);
        assert_eq!(result.groups[&3], 1);
        assert_eq!(result.groups[&4], 2);
        assert_eq!(result.groups[&5], 2);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let nodes = [node(1, 0.0, 0.0), node(2, 15.0, 0.0)];
        let result = cluster(None, &nodes, 15.0);
        assert_eq!(result.groups[&1], result.groups[&2]);
    }

    #[test]
    fn test_stable_policy_keeps_previous_ids() {
        let nodes = [node(1, 0.0, 0.0), node(2, 1.0, 0.0), node(3, 100.0, 0.0), node(4, 101.0, 0.0)];
        let previous = GroupMap::from([(3, 7), (4, 7), (1, 2)]);
        let result = cluster_with_policy(None, &nodes, 15.0, GroupIdPolicy::Stable, &previous);
        assert_eq!(result.groups[&1], 2);
        assert_eq!(result.groups[&3], 7);

        let fresh = cluster_with_policy(None, &nodes, 15.0, GroupIdPolicy::Fresh, &previous);
        assert_eq!(fresh.groups[&1], 1);
        assert_eq!(fresh.groups[&3], 2);
    }

    #[test]
    fn test_stable_policy_allocates_after_highest_seen() {
        let nodes = [node(1, 0.0, 0.0), node(2, 1.0, 0.0)];
        let previous = GroupMap::from([(9, 4)]);
        let result = cluster_with_policy(None, &nodes, 15.0, GroupIdPolicy::Stable, &previous);
        assert_eq!(result.groups[&1], 5);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(cluster(Some(Vec3::ZERO), &[], 15.0), GroupAssignment::default());
    }

    fn nodes_strategy() -> impl Strategy<Value = Vec<GroupNode>> {
        prop::collection::vec((-100.0f32..100.0, -100.0f32..100.0), 0..24).prop_map(|points| {
            points
                .into_iter()
                .enumerate()
                .map(|(i, (x, z))| node(i as i32, x, z))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn test_every_node_is_assigned(nodes in nodes_strategy(), with_local in any::<bool>()) {
            let local = with_local.then_some(Vec3::ZERO);
            let result = cluster(local, &nodes, 15.0);
            prop_assert_eq!(result.groups.len(), nodes.len());
            for g in result.groups.values() {
                prop_assert!(*g == GROUP_SOLO || *g == GROUP_SQUAD || *g > 0);
            }
        }

        #[test]
        fn test_close_pairs_share_a_group(nodes in nodes_strategy()) {
            let result = cluster(None, &nodes, 15.0);
            for a in &nodes {
                for b in &nodes {
                    if a.id != b.id && a.position.distance(b.position) < 14.9 {
                        prop_assert_eq!(result.groups[&a.id], result.groups[&b.id]);
                        prop_assert!(result.groups[&a.id] > 0);
                    }
                }
            }
        }

        #[test]
        fn test_fresh_ids_are_dense(nodes in nodes_strategy()) {
            let result = cluster(None, &nodes, 15.0);
            let ids: HashSet<i32> = result.groups.values().copied().filter(|g| *g > 0).collect();
            for g in 1..=ids.len() as i32 {
                prop_assert!(ids.contains(&g));
            }
        }

        #[test]
        fn test_squad_exactly_matches_teammates(nodes in nodes_strategy()) {
            let result = cluster(Some(Vec3::ZERO), &nodes, 15.0);
            for n in &nodes {
                let squad = result.groups[&n.id] == GROUP_SQUAD;
                prop_assert_eq!(squad, result.teammates.contains(&n.id));
            }
        }
    }
}
