//! Shortest undetectable logical error over graphlike (≤2-symptom) errors.
//!
//! Builds an adjacency graph with a node per detector plus a boundary node,
//! an edge per graphlike error mechanism carrying the mask of observables it
//! flips, then breadth-first searches for the shortest chain of edges whose
//! symptoms cancel while the accumulated observable mask does not.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::debug;

use skuld_dem::{DemInstructionType, DemTarget, DetectorErrorModel};

use crate::error::{SearchError, SearchResult};

/// Sentinel index for the boundary node.
pub const BOUNDARY_NODE: u64 = u64::MAX;

/// One directed half of a graphlike error mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjEdge {
    /// The node at the far side (or [`BOUNDARY_NODE`]).
    pub opposite_node_index: u64,
    /// Observables this mechanism flips.
    pub crossing_observable_mask: u64,
}

/// A detector node and its incident mechanisms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdjNode {
    pub edges: Vec<AdjEdge>,
}

/// The detector adjacency graph of a model's graphlike error mechanisms.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjGraph {
    pub nodes: Vec<AdjNode>,
    /// Mask of a symptomless mechanism flipping observables, if any: a
    /// distance-1 witness.
    pub distance_1_error_mask: u64,
}

impl AdjGraph {
    fn new(node_count: usize) -> Self {
        Self {
            nodes: vec![AdjNode::default(); node_count],
            distance_1_error_mask: 0,
        }
    }

    fn add_outward_edge(&mut self, src: u64, dst: u64, obs_mask: u64) {
        let node = &mut self.nodes[src as usize];
        // Mechanism lists are short; a linear duplicate scan wins over a set.
        let edge = AdjEdge {
            opposite_node_index: dst,
            crossing_observable_mask: obs_mask,
        };
        if !node.edges.contains(&edge) {
            node.edges.push(edge);
        }
    }

    fn add_edges_from_targets_with_no_separators(
        &mut self,
        targets: &[DemTarget],
        ignore_ungraphlike_errors: bool,
    ) -> SearchResult<()> {
        let mut detectors = [0u64; 2];
        let mut num_detectors = 0usize;
        let mut obs_mask = 0u64;
        for t in targets {
            if t.is_relative_detector_id() {
                if num_detectors == 2 {
                    if ignore_ungraphlike_errors {
                        return Ok(());
                    }
                    return Err(SearchError::UngraphlikeError {
                        symptoms: targets
                            .iter()
                            .filter(|t| t.is_relative_detector_id())
                            .count(),
                    });
                }
                detectors[num_detectors] = t.raw_id();
                num_detectors += 1;
            } else if t.is_observable_id() {
                obs_mask ^= 1u64 << t.raw_id();
            }
        }

        match num_detectors {
            1 => self.add_outward_edge(detectors[0], BOUNDARY_NODE, obs_mask),
            2 => {
                self.add_outward_edge(detectors[0], detectors[1], obs_mask);
                self.add_outward_edge(detectors[1], detectors[0], obs_mask);
            }
            0 if obs_mask != 0 && self.distance_1_error_mask == 0 => {
                self.distance_1_error_mask = obs_mask;
            }
            _ => {}
        }
        Ok(())
    }

    fn add_edges_from_separable_targets(
        &mut self,
        targets: &[DemTarget],
        ignore_ungraphlike_errors: bool,
    ) -> SearchResult<()> {
        for component in targets.split(|t| t.is_separator()) {
            self.add_edges_from_targets_with_no_separators(component, ignore_ungraphlike_errors)?;
        }
        Ok(())
    }

    /// Builds the graph from every nonzero-probability error mechanism of a
    /// model, with loop shifts applied.
    pub fn from_dem(
        model: &DetectorErrorModel,
        ignore_ungraphlike_errors: bool,
    ) -> SearchResult<AdjGraph> {
        let num_observables = model.count_observables();
        if num_observables > 64 {
            return Err(SearchError::TooManyObservables(num_observables));
        }
        let mut result = AdjGraph::new(model.count_detectors() as usize);
        let flat = model.flattened();
        for inst in flat.instructions() {
            if inst.kind == DemInstructionType::Error && flat.args_of(inst)[0] != 0.0 {
                result.add_edges_from_separable_targets(
                    flat.targets_of(inst),
                    ignore_ungraphlike_errors,
                )?;
            }
        }
        Ok(result)
    }
}

/// A search state: the detection event being moved (`det_active`), the one
/// being held in place (`det_held`), and the observable mask accumulated by
/// the moves. Both events being gone (or equal) means no symptoms remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SearchState {
    det_active: u64,
    det_held: u64,
    obs_mask: u64,
}

impl SearchState {
    const VACUOUS: SearchState = SearchState {
        det_active: BOUNDARY_NODE,
        det_held: BOUNDARY_NODE,
        obs_mask: 0,
    };

    fn is_undetected(self) -> bool {
        self.det_active == self.det_held
    }

    /// Order-normalized key: the pair of excitations is unordered, and a
    /// cancelled pair collapses onto the boundary.
    fn canonical(self) -> SearchState {
        if self.det_active < self.det_held {
            self
        } else if self.det_active > self.det_held {
            SearchState {
                det_active: self.det_held,
                det_held: self.det_active,
                obs_mask: self.obs_mask,
            }
        } else {
            SearchState {
                det_active: BOUNDARY_NODE,
                det_held: BOUNDARY_NODE,
                obs_mask: self.obs_mask,
            }
        }
    }

    /// The error mechanism transforming `other` into `self`: its symptoms
    /// are the non-cancelling detectors, its observables the mask change.
    fn transition_as_error_targets(self, other: SearchState) -> Vec<DemTarget> {
        let mut nodes = [
            self.det_active,
            self.det_held,
            other.det_active,
            other.det_held,
            BOUNDARY_NODE,
        ];
        nodes.sort_unstable();

        let mut targets = vec![];
        let mut k = 0;
        while k < 4 {
            if nodes[k] == nodes[k + 1] {
                k += 2;
            } else {
                targets.push(DemTarget::relative_detector_id(nodes[k]));
                k += 1;
            }
        }

        let mut dif_mask = self.obs_mask ^ other.obs_mask;
        let mut obs_id = 0;
        while dif_mask != 0 {
            if dif_mask & 1 != 0 {
                targets.push(DemTarget::observable_id(obs_id));
            }
            dif_mask >>= 1;
            obs_id += 1;
        }
        targets
    }
}

fn backtrack_path(
    back_map: &FxHashMap<SearchState, SearchState>,
    final_state: SearchState,
) -> DetectorErrorModel {
    let mut steps: Vec<Vec<DemTarget>> = vec![];
    let mut cur_state = final_state.canonical();
    loop {
        let prev_state = back_map[&cur_state];
        steps.push(cur_state.transition_as_error_targets(prev_state));
        if prev_state.is_undetected() {
            break;
        }
        cur_state = prev_state.canonical();
    }
    steps.sort();

    let mut out = DetectorErrorModel::new();
    for targets in steps {
        out.append_error(1.0, &targets)
            .expect("transition targets are sorted symptoms");
    }
    out
}

/// Finds a shortest set of graphlike error mechanisms whose symptoms cancel
/// but whose observable effect does not: an undetectable logical error.
///
/// Every mechanism in the result carries probability 1 (meaning "required"),
/// and each separator-split component of the model's errors counts as its
/// own mechanism.
pub fn shortest_graphlike_undetectable_logical_error(
    model: &DetectorErrorModel,
    ignore_ungraphlike_errors: bool,
) -> SearchResult<DetectorErrorModel> {
    let graph = AdjGraph::from_dem(model, ignore_ungraphlike_errors)?;

    if graph.distance_1_error_mask != 0 {
        let s1 = SearchState {
            det_active: BOUNDARY_NODE,
            det_held: BOUNDARY_NODE,
            obs_mask: graph.distance_1_error_mask,
        };
        let mut out = DetectorErrorModel::new();
        out.append_error(1.0, &s1.transition_as_error_targets(SearchState::VACUOUS))
            .expect("observable-only targets are valid");
        return Ok(out);
    }

    let mut queue: VecDeque<SearchState> = VecDeque::new();
    let mut back_map: FxHashMap<SearchState, SearchState> = FxHashMap::default();
    // Mark the vacuous dead-end state as already seen.
    back_map.insert(SearchState::VACUOUS, SearchState::VACUOUS);

    // Search starts from any and all edges crossing an observable.
    for (node1, node) in graph.nodes.iter().enumerate() {
        for e in &node.edges {
            let node2 = e.opposite_node_index;
            if (node1 as u64) < node2 && e.crossing_observable_mask != 0 {
                let start = SearchState {
                    det_active: node1 as u64,
                    det_held: node2,
                    obs_mask: e.crossing_observable_mask,
                }
                .canonical();
                if back_map.insert(start, SearchState::VACUOUS).is_none() {
                    queue.push_back(start);
                }
            }
        }
    }

    // Breadth-first chase of the active excitation until all symptoms cancel
    // while a frame change survives.
    while let Some(cur) = queue.pop_front() {
        debug_assert_ne!(cur.det_active, BOUNDARY_NODE);
        for e in &graph.nodes[cur.det_active as usize].edges {
            let next = SearchState {
                det_active: e.opposite_node_index,
                det_held: cur.det_held,
                obs_mask: e.crossing_observable_mask ^ cur.obs_mask,
            };
            let key = next.canonical();
            if back_map.contains_key(&key) {
                continue;
            }
            back_map.insert(key, cur);
            if next.is_undetected() {
                debug_assert_ne!(next.obs_mask, 0);
                debug!(states = back_map.len(), "graphlike search found a witness");
                return Ok(backtrack_path(&back_map, next));
            }
            // Canonicalizing keeps the remaining excitation (if only one is
            // left) in the active slot, since the boundary sorts last.
            queue.push_back(key);
        }
    }

    Err(SearchError::NoUndetectableLogicalError)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dem(text: &str) -> DetectorErrorModel {
        text.parse().unwrap()
    }

    fn search(text: &str) -> SearchResult<DetectorErrorModel> {
        shortest_graphlike_undetectable_logical_error(&dem(text), false)
    }

    #[test]
    fn test_no_errors_at_all() {
        assert!(matches!(
            search(""),
            Err(SearchError::NoUndetectableLogicalError)
        ));
        assert!(matches!(
            search("error(0.1) D0 L0"),
            Err(SearchError::NoUndetectableLogicalError)
        ));
        assert!(matches!(
            search("error(0.1) D0\nerror(0.1) D0 D1\nerror(0.1) D1"),
            Err(SearchError::NoUndetectableLogicalError)
        ));
    }

    #[test]
    fn test_distance_1() {
        assert_eq!(
            search("error(0.1) L0").unwrap().to_string(),
            "error(1) L0"
        );
    }

    #[test]
    fn test_distance_2_through_boundary() {
        assert_eq!(
            search("error(0.1) D0\nerror(0.1) D0 L0").unwrap().to_string(),
            "error(1) D0\nerror(1) D0 L0"
        );
    }

    #[test]
    fn test_distance_2_two_observables() {
        assert_eq!(
            search("error(0.1) D0 L0\nerror(0.1) D0 L1").unwrap().to_string(),
            "error(1) D0 L0\nerror(1) D0 L1"
        );
    }

    #[test]
    fn test_chain_through_detectors() {
        let result = search(
            "error(0.1) D0\nerror(0.1) D0 D1 L0\nerror(0.1) D1 D2\nerror(0.1) D2",
        )
        .unwrap();
        assert_eq!(result.count_errors(), 4);
        assert_eq!(result.count_observables(), 1);
    }

    #[test]
    fn test_separators_split_mechanisms() {
        // The composite error's components participate individually.
        assert_eq!(
            search("error(0.1) D0 L0 ^ D1 D2\nerror(0.1) D0").unwrap().to_string(),
            "error(1) D0\nerror(1) D0 L0"
        );
    }

    #[test]
    fn test_ungraphlike_rejected_or_ignored() {
        let model = dem("error(0.1) D0 D1 D2\nerror(0.1) L0");
        assert!(matches!(
            shortest_graphlike_undetectable_logical_error(&model, false),
            Err(SearchError::UngraphlikeError { symptoms: 3 })
        ));
        let result = shortest_graphlike_undetectable_logical_error(&model, true).unwrap();
        assert_eq!(result.to_string(), "error(1) L0");
    }

    #[test]
    fn test_zero_probability_errors_are_not_mechanisms() {
        assert!(matches!(
            search("error(0) L0"),
            Err(SearchError::NoUndetectableLogicalError)
        ));
    }

    #[test]
    fn test_repetition_code_distance() {
        // Distance-5 repetition code: 4 bulk edges plus 2 boundary edges,
        // logical crossing on one boundary.
        let model = dem(
            "
            error(0.01) D0 L0
            error(0.01) D0 D1
            error(0.01) D1 D2
            error(0.01) D2 D3
            error(0.01) D3
        ",
        );
        let result = shortest_graphlike_undetectable_logical_error(&model, false).unwrap();
        assert_eq!(result.count_errors(), 5);
    }

    #[test]
    fn test_loops_are_searched_without_unrolling_the_text() {
        let model = dem(
            "
            error(0.01) D0 L0
            repeat 6 {
                error(0.01) D0 D1
                shift_detectors 1
            }
            error(0.01) D0
        ",
        );
        let result = shortest_graphlike_undetectable_logical_error(&model, false).unwrap();
        assert_eq!(result.count_errors(), 8);
    }
}
