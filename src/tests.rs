//! Integration Tests for the MPF Hierarchy
//!
//! Cross-module tests: SOM learning behaviour, unit passes inside a tree, and
//! complete evaluations with snapshots.

use crate::board::{is_valid_move, BoardAgent, Side, EMPTY};
use crate::config::{HierarchyConfig, LevelShape, ReinforcementMode};
use crate::hierarchy::Hierarchy;
use crate::snapshot::{list_snapshots, load_snapshot, AFTER_BACKWARD, AFTER_FORWARD};
use crate::som::{CovarianceMode, KernelKind, Som, SomConfig};
use crate::unit::{MpfUnit, UnitConfig};
use ndarray::{aview1, Array1, Array2};
use tempfile::TempDir;

fn sensors(n: usize, input_dim: usize, seed: u64) -> Vec<MpfUnit> {
    (0..n)
        .map(|i| {
            MpfUnit::new(
                UnitConfig::sensor(input_dim, (4, 4), KernelKind::Online)
                    .with_seed(seed + i as u64),
            )
            .unwrap()
        })
        .collect()
}

fn small_hierarchy(leaves: usize, levels: usize, seed: u64) -> Hierarchy {
    let config = HierarchyConfig::new(levels)
        .with_shapes(
            LevelShape::new((3, 3), (3, 3)),
            LevelShape::new((5, 5), (4, 4)),
        )
        .with_seed(seed);
    Hierarchy::with_config(sensors(leaves, 2, seed), config).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// SOM LEARNING TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod som_tests {
    use super::*;

    #[test]
    fn test_online_winner_lands_on_input() {
        let mut som = Som::new(SomConfig::new(4, 4, 3, KernelKind::Online).with_seed(1)).unwrap();
        let input = [0.3, 0.6, 0.9];

        let (bmu, _) = som.feed(aview1(&input)).unwrap();
        let (again, weights) = som.find_bmu(aview1(&input), false).unwrap();

        assert_eq!(bmu, again);
        assert!(som.last_model_bias().unwrap() < 1e-9);
        for (w, x) in weights.iter().zip(input.iter()) {
            assert!((w - x).abs() < 1e-12);
        }
    }

    #[test]
    fn test_parameterless_reduces_error() {
        let config = SomConfig::new(5, 5, 2, KernelKind::Parameterless).with_seed(4);
        let mut som = Som::new(config).unwrap();
        let input = [0.1, 0.9];

        let (_, before) = som.find_bmu(aview1(&input), false).unwrap();
        let dist_before = (&before - &aview1(&input)).mapv(|d| d * d).sum();
        for _ in 0..10 {
            som.feed(aview1(&input)).unwrap();
        }
        let (_, after) = som.find_bmu(aview1(&input), false).unwrap();
        let dist_after = (&after - &aview1(&input)).mapv(|d| d * d).sum();

        assert!(dist_after <= dist_before);
    }

    #[test]
    fn test_predictor_learns_cycle() {
        // two well separated inputs with fixed winners
        let weights = Array2::from_shape_vec((2, 2), vec![0.0, 0.0, 1.0, 1.0]).unwrap();
        let config = SomConfig::new(2, 1, 2, KernelKind::Online).with_seed(3);
        let mut som = Som::from_weights(config, weights).unwrap();
        som.init_predictor();

        for _ in 0..5 {
            som.feed(aview1(&[0.0, 0.0])).unwrap();
            som.feed(aview1(&[1.0, 1.0])).unwrap();
        }

        som.find_bmu(aview1(&[0.0, 0.0]), true).unwrap();
        let prediction = som.predict_next_activation().unwrap();
        assert!(prediction[1] > prediction[0]);
    }

    #[test]
    fn test_mixture_samples_near_weights() {
        let mut som = Som::new(SomConfig::new(3, 3, 2, KernelKind::Online).with_seed(9)).unwrap();
        som.init_generative_mixture(CovarianceMode::Full);

        let mut weights = Array1::zeros(9);
        weights[4] = 1.0;
        let samples = som.generate(weights.view(), 20).unwrap();
        assert_eq!(samples.dim(), (20, 2));
        assert!(samples.iter().all(|v| v.is_finite()));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HIERARCHY EVALUATION TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod hierarchy_tests {
    use super::*;

    #[test]
    fn test_same_seed_same_predictions() {
        let mut a = small_hierarchy(4, 3, 21);
        let mut b = small_hierarchy(4, 3, 21);

        for t in 0..4 {
            let x = t as f64 / 4.0;
            let input = [x, 1.0 - x, 0.2, 0.8, x, x, 0.5, 0.1];
            let out_a = a.evaluate(&input, 0.5).unwrap();
            let out_b = b.evaluate(&input, 0.5).unwrap();
            assert_eq!(out_a, out_b);
        }
        assert_eq!(a.output(), b.output());
    }

    #[test]
    fn test_output_matches_leaf_accumulators() {
        let mut h = small_hierarchy(3, 3, 5);
        let out = h.evaluate(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], -0.5).unwrap();

        for (leaf, range) in h.leaves().iter().zip(h.leaf_ranges()) {
            let slice = h.output().slice(ndarray::s![range.clone()]).to_owned();
            assert_eq!(&slice, leaf.accumulator());
        }
        assert_eq!(&out, h.leaves()[2].accumulator());
    }

    #[test]
    fn test_deep_hierarchy_single_root() {
        let mut h = small_hierarchy(8, 4, 2);
        assert_eq!(h.units().iter().filter(|u| u.parent().is_none()).count(), 1);
        assert_eq!(h.root().level(), 3);

        h.evaluate(&[0.5; 16], 1.0).unwrap();
        assert_eq!(h.time(), 1);
    }

    #[test]
    fn test_derivative_reinforcement_reaches_units() {
        let config = HierarchyConfig::new(3)
            .with_shapes(
                LevelShape::new((3, 3), (3, 3)),
                LevelShape::new((4, 4), (3, 3)),
            )
            .with_reinforcement(ReinforcementMode::Derivative { decay: 1.0 })
            .with_seed(8);
        let mut h = Hierarchy::with_config(sensors(2, 2, 8), config).unwrap();

        h.evaluate(&[0.5; 4], 0.5).unwrap();
        assert!((h.reinforcement().prime() - 0.5).abs() < 1e-12);
        h.evaluate(&[0.5; 4], 0.5).unwrap();
        assert_eq!(h.reinforcement().prime(), 0.0);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SNAPSHOT TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod snapshot_tests {
    use super::*;

    #[test]
    fn test_dump_contains_both_phases_and_all_units() {
        let temp_dir = TempDir::new().unwrap();
        let config = HierarchyConfig::new(3)
            .with_shapes(
                LevelShape::new((3, 3), (3, 3)),
                LevelShape::new((4, 4), (3, 3)),
            )
            .with_dump(3, temp_dir.path())
            .with_seed(12);
        let mut h = Hierarchy::with_config(sensors(4, 2, 12), config).unwrap();

        for _ in 0..4 {
            h.evaluate(&[0.25; 8], 0.0).unwrap();
        }

        let dumps = list_snapshots(temp_dir.path()).unwrap();
        assert_eq!(dumps.iter().map(|(t, _)| *t).collect::<Vec<_>>(), vec![0, 3]);

        let record = load_snapshot(&dumps[1].1).unwrap();
        assert_eq!(record.time, 3);
        let forward = record.phase(AFTER_FORWARD).unwrap();
        let backward = record.phase(AFTER_BACKWARD).unwrap();

        assert_eq!(forward.units.len(), h.units().len());
        assert!(forward.units.contains_key("unit_L0__000"));
        assert!(forward.units.contains_key("unit_L1__004"));
        assert!(backward.units.contains_key("unit_L2__006"));
        assert_eq!(backward.output.len(), 8);

        let root = &backward.units["unit_L2__006"];
        assert!(root.temporal.is_some());
        assert!(root.spatial.transitions.is_some());
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BOARD AGENT TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod board_tests {
    use super::*;

    #[test]
    fn test_agent_fills_board_legally() {
        let mut agent = BoardAgent::with_seed(Side::Nought, 30).unwrap();
        let mut field: Array2<f64> = Array2::zeros((3, 3));

        // opponent always takes the last free cell
        for _ in 0..4 {
            let cells = field.as_slice_mut().unwrap();
            if let Some(cell) = cells.iter_mut().rev().find(|c| **c == EMPTY) {
                *cell = Side::Cross.value();
            }
            let before: Vec<f64> = field.iter().copied().collect();
            agent.make_move(&mut field, 0.0).unwrap();
            let after: Vec<f64> = field.iter().copied().collect();
            assert!(is_valid_move(&before, &after, Side::Nought));
        }

        let free = field.iter().filter(|c| **c == EMPTY).count();
        assert_eq!(free, 1);
    }
}
