//! Shortest undetectable logical error over arbitrary-degree ("hyperedge")
//! error mechanisms.
//!
//! Generalizes the graphlike search: a state carries the whole set of
//! currently-excited detectors instead of at most two, bounded by a
//! caller-supplied limit. Each transition applies one error mechanism,
//! toggling its symptoms into the set and its observables into the mask.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::debug;

use skuld_dem::{DemInstructionType, DemTarget, DetectorErrorModel};

use crate::error::{SearchError, SearchResult};

/// One decomposed error mechanism: its sorted symptoms and observable mask.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mechanism {
    detectors: Vec<u64>,
    obs_mask: u64,
}

/// A search state: the sorted excited-detector set plus accumulated mask.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SearchState {
    detectors: Vec<u64>,
    obs_mask: u64,
}

fn symmetric_difference(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut result = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                result.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                result.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }
    result.extend_from_slice(&a[i..]);
    result.extend_from_slice(&b[j..]);
    result
}

fn collect_mechanisms(
    model: &DetectorErrorModel,
    max_edge_degree: usize,
) -> SearchResult<Vec<Mechanism>> {
    let num_observables = model.count_observables();
    if num_observables > 64 {
        return Err(SearchError::TooManyObservables(num_observables));
    }

    let flat = model.flattened();
    let mut mechanisms: Vec<Mechanism> = vec![];
    for inst in flat.instructions() {
        if inst.kind != DemInstructionType::Error || flat.args_of(inst)[0] == 0.0 {
            continue;
        }
        for component in flat.targets_of(inst).split(|t| t.is_separator()) {
            let mut detectors: Vec<u64> = component
                .iter()
                .filter(|t| t.is_relative_detector_id())
                .map(|t| t.raw_id())
                .collect();
            detectors.sort_unstable();
            // Two identical symptoms inside one mechanism cancel.
            let mut deduped = vec![];
            let mut k = 0;
            while k < detectors.len() {
                if k + 1 < detectors.len() && detectors[k] == detectors[k + 1] {
                    k += 2;
                } else {
                    deduped.push(detectors[k]);
                    k += 1;
                }
            }
            let mut obs_mask = 0u64;
            for t in component {
                if t.is_observable_id() {
                    obs_mask ^= 1u64 << t.raw_id();
                }
            }
            if deduped.len() > max_edge_degree {
                continue;
            }
            let mechanism = Mechanism {
                detectors: deduped,
                obs_mask,
            };
            if !mechanisms.contains(&mechanism) {
                mechanisms.push(mechanism);
            }
        }
    }
    Ok(mechanisms)
}

fn mechanism_as_error_targets(mechanism: &Mechanism) -> Vec<DemTarget> {
    let mut targets: Vec<DemTarget> = mechanism
        .detectors
        .iter()
        .map(|&d| DemTarget::relative_detector_id(d))
        .collect();
    let mut mask = mechanism.obs_mask;
    let mut obs_id = 0;
    while mask != 0 {
        if mask & 1 != 0 {
            targets.push(DemTarget::observable_id(obs_id));
        }
        mask >>= 1;
        obs_id += 1;
    }
    targets
}

/// Finds a shortest set of error mechanisms (of any symptom degree) whose
/// combined symptoms cancel but whose observable effect does not.
///
/// `max_excited_detectors` bounds the symptom sets the breadth-first search
/// is willing to carry, and `max_edge_degree` drops mechanisms with more
/// symptoms than that; both bound the exponential blowup hyperedges allow.
pub fn shortest_undetectable_logical_error(
    model: &DetectorErrorModel,
    max_excited_detectors: usize,
    max_edge_degree: usize,
) -> SearchResult<DetectorErrorModel> {
    let mechanisms = collect_mechanisms(model, max_edge_degree)?;

    let empty = SearchState {
        detectors: vec![],
        obs_mask: 0,
    };
    let mut back_map: FxHashMap<SearchState, (SearchState, usize)> = FxHashMap::default();
    let mut queue: VecDeque<SearchState> = VecDeque::new();

    back_map.insert(empty.clone(), (empty.clone(), usize::MAX));
    queue.push_back(empty);

    while let Some(cur) = queue.pop_front() {
        for (index, mechanism) in mechanisms.iter().enumerate() {
            let next = SearchState {
                detectors: symmetric_difference(&cur.detectors, &mechanism.detectors),
                obs_mask: cur.obs_mask ^ mechanism.obs_mask,
            };
            if next.detectors.len() > max_excited_detectors {
                continue;
            }
            if back_map.contains_key(&next) {
                continue;
            }
            back_map.insert(next.clone(), (cur.clone(), index));
            if next.detectors.is_empty() && next.obs_mask != 0 {
                debug!(states = back_map.len(), "hyperedge search found a witness");
                return Ok(backtrack(&back_map, &mechanisms, next));
            }
            queue.push_back(next);
        }
    }

    Err(SearchError::NoUndetectableLogicalError)
}

fn backtrack(
    back_map: &FxHashMap<SearchState, (SearchState, usize)>,
    mechanisms: &[Mechanism],
    final_state: SearchState,
) -> DetectorErrorModel {
    let mut steps: Vec<Vec<DemTarget>> = vec![];
    let mut cur = final_state;
    loop {
        let (prev, index) = &back_map[&cur];
        if *index == usize::MAX {
            break;
        }
        steps.push(mechanism_as_error_targets(&mechanisms[*index]));
        cur = prev.clone();
    }
    steps.sort();

    let mut out = DetectorErrorModel::new();
    for targets in steps {
        out.append_error(1.0, &targets)
            .expect("mechanism targets are sorted symptoms");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dem(text: &str) -> DetectorErrorModel {
        text.parse().unwrap()
    }

    fn search(text: &str) -> SearchResult<DetectorErrorModel> {
        shortest_undetectable_logical_error(&dem(text), usize::MAX, usize::MAX)
    }

    #[test]
    fn test_no_witness() {
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
        assert_eq!(search("error(0.1) L0").unwrap().to_string(), "error(1) L0");
    }

    #[test]
    fn test_distance_2() {
        assert_eq!(
            search("error(0.1) D0\nerror(0.1) D0 L0").unwrap().to_string(),
            "error(1) D0\nerror(1) D0 L0"
        );
        assert_eq!(
            search("error(0.1) D0 L0\nerror(0.1) D0 L1").unwrap().to_string(),
            "error(1) D0 L0\nerror(1) D0 L1"
        );
        assert_eq!(
            search("error(0.1) D0 D1 L0\nerror(0.1) D0 D1 L1").unwrap().to_string(),
            "error(1) D0 D1 L0\nerror(1) D0 D1 L1"
        );
    }

    #[test]
    fn test_hyperedges_participate() {
        // A weight-3 mechanism cancelled by three boundary mechanisms.
        let result = search(
            "
            error(0.1) D0 D1 D2 L0
            error(0.1) D0
            error(0.1) D1
            error(0.1) D2
        ",
        )
        .unwrap();
        assert_eq!(result.count_errors(), 4);
        assert_eq!(
            result.to_string(),
            "error(1) D0\nerror(1) D0 D1 D2 L0\nerror(1) D1\nerror(1) D2"
        );
    }

    #[test]
    fn test_symptom_bound_prunes() {
        let model = dem(
            "
            error(0.1) D0 D1 D2 L0
            error(0.1) D0
            error(0.1) D1
            error(0.1) D2
        ",
        );
        // Carrying three excitations is required; a bound of 2 must fail.
        assert!(matches!(
            shortest_undetectable_logical_error(&model, 2, usize::MAX),
            Err(SearchError::NoUndetectableLogicalError)
        ));
        assert!(shortest_undetectable_logical_error(&model, 3, usize::MAX).is_ok());
    }

    #[test]
    fn test_edge_degree_bound_drops_mechanisms() {
        let model = dem(
            "
            error(0.1) D0 D1 D2 L0
            error(0.1) D0
            error(0.1) D1
            error(0.1) D2
        ",
        );
        assert!(matches!(
            shortest_undetectable_logical_error(&model, usize::MAX, 2),
            Err(SearchError::NoUndetectableLogicalError)
        ));
    }

    #[test]
    fn test_matches_graphlike_on_graphlike_models() {
        let text = "
            error(0.01) D0 L0
            error(0.01) D0 D1
            error(0.01) D1 D2
            error(0.01) D2
        ";
        let hyper = search(text).unwrap();
        let graph =
            crate::graphlike::shortest_graphlike_undetectable_logical_error(&dem(text), false)
                .unwrap();
        assert_eq!(hyper.count_errors(), graph.count_errors());
    }

    #[test]
    fn test_duplicate_symptoms_cancel_within_a_mechanism() {
        // D0 appearing twice in one mechanism is a net no-op on D0, leaving
        // a pure observable flip.
        assert_eq!(
            search("error(0.1) D0 D0 L0").unwrap().to_string(),
            "error(1) L0"
        );
    }
}
