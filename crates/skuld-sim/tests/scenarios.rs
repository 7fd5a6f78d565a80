//! End-to-end simulator scenarios.

use rand::SeedableRng;
use rand::rngs::StdRng;

use skuld_circuit::{Circuit, GateTarget};
use skuld_sim::{
    Format01Writer, SimError, TableauSimulator, circuit_to_tableau, reference_sample_circuit,
};
use skuld_stab::PauliString;

fn circuit(text: &str) -> Circuit {
    text.parse().unwrap()
}

fn sample(text: &str, seed: u64) -> Vec<bool> {
    TableauSimulator::sample_circuit(&circuit(text), StdRng::seed_from_u64(seed), 0).unwrap()
}

#[test]
fn bell_state_measurements_agree_and_both_values_occur() {
    let mut seen_zero = false;
    let mut seen_one = false;
    for seed in 0..64 {
        let record = sample("H 0\nCNOT 0 1\nM 0 1", seed);
        assert_eq!(record.len(), 2);
        assert_eq!(record[0], record[1]);
        seen_zero |= !record[0];
        seen_one |= record[0];
    }
    assert!(seen_zero && seen_one);

    // The preparation maps the |00⟩ stabilizers onto {+XX, +ZZ}.
    let t = circuit_to_tableau(&circuit("H 0\nCNOT 0 1")).unwrap();
    assert_eq!(t.z_image(0).to_string(), "+XX");
    assert_eq!(t.z_image(1).to_string(), "+ZZ");
}

#[test]
fn repeated_measurement_is_idempotent() {
    let c = circuit("R 0\nM 0\nM 0\nDETECTOR rec[-1] rec[-2]");
    assert_eq!(c.count_detectors(), 1);
    for seed in 0..32 {
        let record =
            TableauSimulator::sample_circuit(&c, StdRng::seed_from_u64(seed), 0).unwrap();
        assert_eq!(record[0], record[1]);
    }
}

#[test]
fn plus_state_measurement_is_uniform() {
    let shots = 4000;
    let mut ones = 0;
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(99), 1);
    for _ in 0..shots {
        sim.apply_operation(skuld_circuit::GateId::Rx, &[GateTarget::qubit(0)], &[])
            .unwrap();
        sim.measure_z(&[GateTarget::qubit(0)], &[]).unwrap();
        ones += u32::from(*sim.measurement_record.storage.last().unwrap());
    }
    let expected = shots as f64 / 2.0;
    let sigma = (shots as f64 * 0.25).sqrt();
    assert!((ones as f64 - expected).abs() < 5.0 * sigma);
}

#[test]
fn classical_feedback_copies_the_measured_bit() {
    for seed in 0..48 {
        let record = sample("H 0\nM 0\nCX rec[-1] 1\nM 1", seed);
        assert_eq!(record[0], record[1]);
    }
    // And the circuit has no single tableau because of the measurement.
    assert!(matches!(
        circuit_to_tableau(&circuit("M 0\nCX rec[-1] 1")),
        Err(SimError::NotUnitary { .. })
    ));
}

#[test]
fn record_editing_is_rejected_without_state_change() {
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(0), 2);
    sim.measure_z(&[GateTarget::qubit(0)], &[]).unwrap();
    let before = sim.inv_state.clone();
    let err = sim.apply_operation(
        skuld_circuit::GateId::Cx,
        &[GateTarget::qubit(1), GateTarget::rec(1)],
        &[],
    );
    assert!(matches!(err, Err(SimError::RecordEditing { .. })));
    assert_eq!(sim.inv_state, before);
}

#[test]
fn sweep_bits_read_as_zero() {
    let record = sample("M 0\nCX sweep[0] 1\nM 1", 7);
    assert!(!record[1]);
}

#[test]
fn mpp_measures_bell_parities_deterministically() {
    for seed in 0..32 {
        let record = sample("H 0\nCNOT 0 1\nMPP X0*X1 Z0*Z1", seed);
        assert_eq!(record, vec![false, false]);
    }
    // Inverting one factor inverts the product's result.
    for seed in 0..8 {
        let record = sample("H 0\nCNOT 0 1\nMPP !X0*X1", seed);
        assert_eq!(record, vec![true]);
    }
}

#[test]
fn mpp_overlapping_products_measure_sequentially() {
    // ZZ then XX on a Bell pair share qubits but are simultaneously
    // deterministic.
    for seed in 0..16 {
        let record = sample("H 0\nCNOT 0 1\nMPP Z0*Z1 X0*X1 Z0*Z1", seed);
        assert_eq!(record, vec![false, false, false]);
    }
}

#[test]
fn mpp_single_qubit_terms_match_plain_measurements() {
    for seed in 0..16 {
        let record = sample("X 1\nMPP Z0 Z1\nM 0 1", seed);
        assert_eq!(record[0], record[2]);
        assert_eq!(record[1], record[3]);
        assert_eq!(record[1], true);
    }
}

#[test]
fn x_and_y_basis_measurements() {
    // |+⟩ measured in X is deterministically 0; |-⟩ is 1.
    for seed in 0..8 {
        assert_eq!(sample("H 0\nMX 0", seed), vec![false]);
        assert_eq!(sample("H 0\nZ 0\nMX 0", seed), vec![true]);
        // S|+⟩ = |i⟩ measured in Y.
        assert_eq!(sample("H 0\nS 0\nMY 0", seed), vec![false]);
        assert_eq!(sample("H 0\nS_DAG 0\nMY 0", seed), vec![true]);
    }
}

#[test]
fn measure_reset_forces_ground_state() {
    for seed in 0..16 {
        let record = sample("X 0\nMR 0\nM 0", seed);
        assert_eq!(record, vec![true, false]);
        let record = sample("H 0\nMR 0\nM 0", seed);
        assert_eq!(record[1], false);
        let record = sample("H 0\nMRX 0\nMX 0", seed);
        assert_eq!(record[1], false);
        let record = sample("H 0\nMRY 0\nMY 0", seed);
        assert_eq!(record[1], false);
    }
}

#[test]
fn deterministic_noise_probabilities() {
    // Probability-1 errors always fire; probability-0 never do.
    assert_eq!(sample("X_ERROR(1) 0\nM 0", 3), vec![true]);
    assert_eq!(sample("X_ERROR(0) 0\nM 0", 3), vec![false]);
    assert_eq!(sample("Y_ERROR(1) 0\nM 0", 3), vec![true]);
    assert_eq!(sample("Z_ERROR(1) 0\nM 0", 3), vec![false]);
    assert_eq!(sample("H 0\nZ_ERROR(1) 0\nMX 0", 3), vec![true]);
    assert_eq!(sample("E(1) X0 X2\nM 0 1 2", 3), vec![true, false, true]);
}

#[test]
fn noisy_measurement_flips_at_the_given_rate() {
    let shots = 2000;
    let mut flips = 0;
    for seed in 0..shots {
        let record = sample("M(0.25) 0", seed);
        flips += u32::from(record[0]);
    }
    let expected = shots as f64 * 0.25;
    let sigma = (shots as f64 * 0.25 * 0.75).sqrt();
    assert!((flips as f64 - expected).abs() < 5.0 * sigma);
}

#[test]
fn depolarize1_rate_matches() {
    let shots = 3000;
    let mut flips = 0;
    // DEPOLARIZE1 flips a Z measurement with probability 2p/3.
    for seed in 0..shots {
        let record = sample("DEPOLARIZE1(0.3) 0\nM 0", seed);
        flips += u32::from(record[0]);
    }
    let p_flip = 0.3 * 2.0 / 3.0;
    let expected = shots as f64 * p_flip;
    let sigma = (shots as f64 * p_flip * (1.0 - p_flip)).sqrt();
    assert!((flips as f64 - expected).abs() < 5.0 * sigma);
}

#[test]
fn pauli_channel_1_is_exhaustive() {
    // With probabilities (1, 0, 0) the channel is a deterministic X.
    assert_eq!(sample("PAULI_CHANNEL_1(1, 0, 0) 0\nM 0", 0), vec![true]);
    assert_eq!(sample("PAULI_CHANNEL_1(0, 0, 1) 0\nM 0", 0), vec![false]);
    assert_eq!(
        sample("H 0\nPAULI_CHANNEL_1(0, 0, 1) 0\nMX 0", 0),
        vec![true]
    );
}

#[test]
fn pauli_channel_2_deterministic_case() {
    // Probability 1 on the IX case flips only the second qubit.
    let mut args = vec!["0"; 15];
    args[0] = "1"; // case IX
    let text = format!("PAULI_CHANNEL_2({}) 0 1\nM 0 1", args.join(", "));
    let record = TableauSimulator::sample_circuit(
        &circuit(&text),
        StdRng::seed_from_u64(0),
        0,
    )
    .unwrap();
    assert_eq!(record, vec![false, true]);
}

#[test]
fn correlated_error_streak_semantics() {
    // E fires, so the ELSE does not.
    assert_eq!(
        sample("E(1) X0\nELSE_CORRELATED_ERROR(1) X1\nM 0 1", 0),
        vec![true, false]
    );
    // E cannot fire, so the ELSE does.
    assert_eq!(
        sample("E(0) X0\nELSE_CORRELATED_ERROR(1) X1\nM 0 1", 0),
        vec![false, true]
    );
    // A fresh E resets the streak.
    assert_eq!(
        sample("E(1) X0\nE(1) X1\nM 0 1", 0),
        vec![true, true]
    );
}

#[test]
fn kickback_of_random_measurement_anticommutes() {
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(11), 2);
    sim.apply_operation(skuld_circuit::GateId::H, &[GateTarget::qubit(0)], &[])
        .unwrap();
    sim.apply_operation(
        skuld_circuit::GateId::Cx,
        &[GateTarget::qubit(0), GateTarget::qubit(1)],
        &[],
    )
    .unwrap();

    let (_result, kickback) = sim.measure_kickback_z(GateTarget::qubit(0));
    let kickback = kickback.expect("entangled measurement is random");
    let mut z0 = PauliString::identity(2);
    z0.set(0, skuld_stab::Pauli::Z);
    assert!(!kickback.commutes(&z0));

    // Re-measuring is now deterministic and kickback-free.
    let (result2, kickback2) = sim.measure_kickback_z(GateTarget::qubit(0));
    assert!(kickback2.is_none());
    assert_eq!(result2, sim.measurement_record.storage[0]);
}

#[test]
fn kickback_variants_conjugate_the_frame() {
    // |0⟩: an X-basis measurement is random and kicks back something that
    // anticommutes with the measured X observable.
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(3), 1);
    let (_result, kick) = sim.measure_kickback_x(GateTarget::qubit(0));
    let kick = kick.expect("X measurement of |0> is random");
    let x0: PauliString = "+X".parse().unwrap();
    assert!(!kick.commutes(&x0));

    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(4), 1);
    let (_result, kick) = sim.measure_kickback_y(GateTarget::qubit(0));
    let kick = kick.expect("Y measurement of |0> is random");
    let y0: PauliString = "+Y".parse().unwrap();
    assert!(!kick.commutes(&y0));
}

#[test]
fn peek_bloch_tracks_single_qubit_states() {
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(0), 2);
    assert_eq!(sim.peek_bloch(0).to_string(), "+Z");
    sim.apply_operation(skuld_circuit::GateId::X, &[GateTarget::qubit(0)], &[])
        .unwrap();
    assert_eq!(sim.peek_bloch(0).to_string(), "-Z");
    sim.apply_operation(skuld_circuit::GateId::H, &[GateTarget::qubit(0)], &[])
        .unwrap();
    assert_eq!(sim.peek_bloch(0).to_string(), "-X");
    // Entangled qubits have no single-qubit stabilizer.
    sim.apply_operation(
        skuld_circuit::GateId::Cx,
        &[GateTarget::qubit(0), GateTarget::qubit(1)],
        &[],
    )
    .unwrap();
    assert_eq!(sim.peek_bloch(0).to_string(), "+_");
}

#[test]
fn peek_observable_expectation_on_bell_state() {
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(0), 2);
    sim.run_circuit(&circuit("H 0\nCNOT 0 1")).unwrap();

    let expect = |s: &str| sim.peek_observable_expectation(&s.parse().unwrap());
    assert_eq!(expect("+XX"), 1);
    assert_eq!(expect("+ZZ"), 1);
    assert_eq!(expect("-XX"), -1);
    assert_eq!(expect("+YY"), -1);
    assert_eq!(expect("+Z_"), 0);
    // Peeking must not disturb the state.
    assert_eq!(expect("+XX"), 1);
    assert_eq!(sim.measurement_record.len(), 0);
}

#[test]
fn canonical_stabilizers_of_bell_state() {
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(0), 2);
    sim.run_circuit(&circuit("H 0\nCNOT 0 1")).unwrap();
    let stabilizers: Vec<String> = sim
        .canonical_stabilizers()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(stabilizers, vec!["+XX", "+ZZ"]);
}

#[test]
fn reference_sample_is_noiseless_and_biased() {
    let c = circuit("X_ERROR(1) 0\nM(0.5) 0\nH 1\nM 1");
    let reference = reference_sample_circuit(&c).unwrap();
    // Noise stripped: the X error and measurement flip never fire, and the
    // random |+⟩ measurement resolves to the biased 0 outcome.
    assert_eq!(reference, vec![false, false]);
}

#[test]
fn streaming_execution_flushes_per_chunk() {
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(1), 0);
    let mut writer = Format01Writer::new(Vec::new());
    let input = "X 0\nM 0\nREPEAT 2 {\n    M 0\n}\nM !0\n";
    sim.run_stream(input.as_bytes(), &mut writer).unwrap();
    assert_eq!(writer.into_inner(), b"1110\n");
}

#[test]
fn streaming_rejects_bad_instructions() {
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(1), 0);
    let mut writer = Format01Writer::new(Vec::new());
    let err = sim.run_stream("FLURB 0\n".as_bytes(), &mut writer);
    assert!(err.is_err());
}

#[test]
fn set_num_qubits_grows_and_shrinks() {
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(5), 1);
    sim.run_circuit(&circuit("H 0\nCNOT 0 1\nCNOT 0 2")).unwrap();
    assert_eq!(sim.num_qubits(), 3);
    // Shrinking collapses the discarded qubits and keeps a valid state.
    sim.set_num_qubits(2);
    assert_eq!(sim.num_qubits(), 2);
    assert!(sim.inv_state.satisfies_invariants());
    sim.measure_z(&[GateTarget::qubit(0), GateTarget::qubit(1)], &[])
        .unwrap();
    let r = &sim.measurement_record.storage;
    assert_eq!(r[0], r[1]);
}

#[test]
fn growing_simulator_keeps_new_qubits_in_ground_state() {
    let mut sim = TableauSimulator::new(StdRng::seed_from_u64(5), 1);
    sim.run_circuit(&circuit("X 0")).unwrap();
    sim.ensure_large_enough_for_qubits(40);
    sim.measure_z(&[GateTarget::qubit(0), GateTarget::qubit(39)], &[])
        .unwrap();
    assert_eq!(sim.measurement_record.storage, vec![true, false]);
}

#[test]
fn huge_repeat_counts_only_affect_structural_queries() {
    let c = circuit("REPEAT 1000000000000 {\n    M 0\n}");
    assert_eq!(c.count_measurements(), 1_000_000_000_000);
    // (Executing it would take forever; the count must not.)
}

#[test]
fn inverted_measurement_targets_flip_reported_results() {
    assert_eq!(sample("M !0", 0), vec![true]);
    assert_eq!(sample("X 0\nM !0", 0), vec![false]);
}
