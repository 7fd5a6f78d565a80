//! The tableau simulator: Clifford circuit evolution with measurement
//! collapse, resets, noise channels, and classical feedback.
//!
//! The simulator tracks the *inverse* of the net Clifford applied so far.
//! With that convention a forward gate becomes a composition of the gate's
//! inverse before the tracked operation, which is the word-parallel row
//! update, and a Z-basis measurement of qubit `q` reads row `q` of the
//! tracked Z images directly.

use std::io::BufRead;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rustc_hash::FxHashSet;
use tracing::debug;

use skuld_bits::RareHits;
use skuld_circuit::{Circuit, GateId, GateTarget, Instruction};
use skuld_stab::{Pauli, PauliString, Tableau, TransposedTableau};

use crate::error::{SimError, SimResult};
use crate::record::MeasureRecord;
use crate::writer::RecordWriter;

/// Stabilizer-state simulator over a caller-owned random number generator.
#[derive(Clone)]
pub struct TableauSimulator<R: Rng> {
    /// The inverse of the net Clifford applied so far.
    pub inv_state: Tableau,
    rng: R,
    /// Tie-break for non-deterministic measurements: 0 samples fairly,
    /// positive forces 0 results, negative forces 1 results.
    sign_bias: i8,
    /// The log of measurement results.
    pub measurement_record: MeasureRecord,
    /// Whether the streak of `E`/`ELSE_CORRELATED_ERROR` already fired.
    last_correlated_error_occurred: bool,
}

impl<R: Rng> TableauSimulator<R> {
    /// A fresh all-|0⟩ simulator on `num_qubits` qubits.
    pub fn new(rng: R, num_qubits: usize) -> Self {
        Self::with_sign_bias(rng, num_qubits, 0)
    }

    /// A fresh simulator with a forced measurement tie-break.
    pub fn with_sign_bias(rng: R, num_qubits: usize, sign_bias: i8) -> Self {
        Self {
            inv_state: Tableau::identity(num_qubits),
            rng,
            sign_bias,
            measurement_record: MeasureRecord::new(),
            last_correlated_error_occurred: false,
        }
    }

    #[inline]
    pub fn num_qubits(&self) -> usize {
        self.inv_state.num_qubits()
    }

    /// Grows the state so `num_qubits` qubits exist (new ones in |0⟩).
    pub fn ensure_large_enough_for_qubits(&mut self, num_qubits: usize) {
        if num_qubits <= self.num_qubits() {
            return;
        }
        debug!(from = self.num_qubits(), to = num_qubits, "growing simulator state");
        self.inv_state.expand(num_qubits);
    }

    /// Resizes to exactly `new_num_qubits`. Shrinking collapses and fully
    /// decouples the discarded qubits first.
    pub fn set_num_qubits(&mut self, new_num_qubits: usize) {
        if new_num_qubits >= self.num_qubits() {
            self.ensure_large_enough_for_qubits(new_num_qubits);
            return;
        }

        {
            let mut guard = TransposedTableau::new(&mut self.inv_state);
            for q in new_num_qubits..guard.tableau().num_qubits() {
                collapse_isolate_qubit_z(&mut guard, q, &mut self.rng, self.sign_bias);
            }
        }

        let old = &self.inv_state;
        let mut new_state = Tableau::identity(new_num_qubits);
        for q in 0..new_num_qubits {
            let mut x = PauliString::identity(new_num_qubits);
            let mut z = PauliString::identity(new_num_qubits);
            let old_x = old.x_image(q);
            let old_z = old.z_image(q);
            for k in 0..new_num_qubits {
                x.set(k, old_x.get(k));
                z.set(k, old_z.get(k));
            }
            x.sign = old_x.sign;
            z.sign = old_z.sign;
            new_state.set_row(skuld_stab::Half::X, q, &x);
            new_state.set_row(skuld_stab::Half::Z, q, &z);
        }
        self.inv_state = new_state;
    }

    // =========================================================================
    // Determinism tests.
    // =========================================================================

    /// Whether an X-basis measurement of `target` has a forced outcome.
    pub fn is_deterministic_x(&self, target: usize) -> bool {
        self.inv_state.xs.xt.row(target).iter().all(|&w| w == 0)
    }

    /// Whether a Y-basis measurement of `target` has a forced outcome.
    pub fn is_deterministic_y(&self, target: usize) -> bool {
        self.inv_state.xs.xt.row(target) == self.inv_state.zs.xt.row(target)
    }

    /// Whether a Z-basis measurement of `target` has a forced outcome.
    pub fn is_deterministic_z(&self, target: usize) -> bool {
        self.inv_state.zs.xt.row(target).iter().all(|&w| w == 0)
    }

    // =========================================================================
    // Circuit execution.
    // =========================================================================

    /// Runs a whole circuit, growing the state to fit it.
    pub fn run_circuit(&mut self, circuit: &Circuit) -> SimResult<()> {
        self.ensure_large_enough_for_qubits(circuit.count_qubits() as usize);
        self.run_ops(circuit)
    }

    fn run_ops(&mut self, circuit: &Circuit) -> SimResult<()> {
        for inst in circuit.instructions() {
            if inst.gate == GateId::Repeat {
                let reps = circuit.repeat_count_of(inst);
                let body = circuit.repeat_body_of(inst);
                for _ in 0..reps {
                    self.run_ops(body)?;
                }
            } else {
                self.apply_instruction(circuit, inst)?;
            }
        }
        Ok(())
    }

    /// Executes one (non-repeat) instruction.
    ///
    /// Validation failures surface before any state mutation; annotations
    /// are no-ops here.
    pub fn apply_instruction(&mut self, circuit: &Circuit, inst: &Instruction) -> SimResult<()> {
        let targets = circuit.targets_of(inst);
        let args = circuit.args_of(inst);
        self.apply_operation(inst.gate, targets, args)
    }

    /// Executes one operation given raw targets and arguments.
    pub fn apply_operation(
        &mut self,
        gate: GateId,
        targets: &[GateTarget],
        args: &[f64],
    ) -> SimResult<()> {
        skuld_circuit::circuit::validate_instruction(gate, args, targets)?;
        match gate {
            GateId::I => Ok(()),
            GateId::X => self.for_qubits(targets, Tableau::prepend_x),
            GateId::Y => self.for_qubits(targets, Tableau::prepend_y),
            GateId::Z => self.for_qubits(targets, Tableau::prepend_z),
            GateId::H => self.for_qubits(targets, Tableau::prepend_h_xz),
            GateId::HXY => self.for_qubits(targets, Tableau::prepend_h_xy),
            GateId::HYZ => self.for_qubits(targets, Tableau::prepend_h_yz),
            // Inverted handlers: the tracked tableau is the inverse.
            GateId::S => self.for_qubits(targets, Tableau::prepend_sqrt_z_dag),
            GateId::SDag => self.for_qubits(targets, Tableau::prepend_sqrt_z),
            GateId::SqrtX => self.for_qubits(targets, Tableau::prepend_sqrt_x_dag),
            GateId::SqrtXDag => self.for_qubits(targets, Tableau::prepend_sqrt_x),
            GateId::SqrtY => self.for_qubits(targets, Tableau::prepend_sqrt_y_dag),
            GateId::SqrtYDag => self.for_qubits(targets, Tableau::prepend_sqrt_y),
            GateId::CXyz => self.for_qubits(targets, Tableau::prepend_c_zyx),
            GateId::CZyx => self.for_qubits(targets, Tableau::prepend_c_xyz),

            GateId::Swap => self.for_qubit_pairs(targets, Tableau::prepend_swap),
            GateId::ISwap => self.for_qubit_pairs(targets, Tableau::prepend_iswap_dag),
            GateId::ISwapDag => self.for_qubit_pairs(targets, Tableau::prepend_iswap),
            GateId::Xcx => self.for_qubit_pairs(targets, Tableau::prepend_xcx),
            GateId::Xcy => self.for_qubit_pairs(targets, Tableau::prepend_xcy),
            GateId::Ycx => self.for_qubit_pairs(targets, Tableau::prepend_ycx),
            GateId::Ycy => self.for_qubit_pairs(targets, Tableau::prepend_ycy),
            GateId::SqrtXx => self.for_qubit_pairs(targets, Tableau::prepend_sqrt_xx_dag),
            GateId::SqrtXxDag => self.for_qubit_pairs(targets, Tableau::prepend_sqrt_xx),
            GateId::SqrtYy => self.for_qubit_pairs(targets, Tableau::prepend_sqrt_yy_dag),
            GateId::SqrtYyDag => self.for_qubit_pairs(targets, Tableau::prepend_sqrt_yy),
            GateId::SqrtZz => self.for_qubit_pairs(targets, Tableau::prepend_sqrt_zz_dag),
            GateId::SqrtZzDag => self.for_qubit_pairs(targets, Tableau::prepend_sqrt_zz),

            GateId::Cx => self.do_zcx(targets),
            GateId::Cy => self.do_zcy(targets),
            GateId::Cz => self.do_zcz(targets),
            GateId::Xcz => self.do_xcz(targets),
            GateId::Ycz => self.do_ycz(targets),

            GateId::M => self.measure_z(targets, args),
            GateId::Mx => self.measure_x(targets, args),
            GateId::My => self.measure_y(targets, args),
            GateId::Mr => self.measure_reset_z(targets, args),
            GateId::Mrx => self.measure_reset_x(targets, args),
            GateId::Mry => self.measure_reset_y(targets, args),
            GateId::R => {
                self.reset_z(targets);
                Ok(())
            }
            GateId::Rx => {
                self.reset_x(targets);
                Ok(())
            }
            GateId::Ry => {
                self.reset_y(targets);
                Ok(())
            }
            GateId::Mpp => self.do_mpp(targets, args),

            GateId::XError => {
                self.do_pauli_error(targets, args[0], false, true);
                Ok(())
            }
            GateId::YError => {
                self.do_pauli_error(targets, args[0], true, true);
                Ok(())
            }
            GateId::ZError => {
                self.do_pauli_error(targets, args[0], true, false);
                Ok(())
            }
            GateId::Depolarize1 => {
                self.do_depolarize1(targets, args[0]);
                Ok(())
            }
            GateId::Depolarize2 => {
                self.do_depolarize2(targets, args[0]);
                Ok(())
            }
            GateId::PauliChannel1 => {
                self.do_pauli_channel_1(targets, args);
                Ok(())
            }
            GateId::PauliChannel2 => {
                self.do_pauli_channel_2(targets, args);
                Ok(())
            }
            GateId::CorrelatedError => {
                self.last_correlated_error_occurred = false;
                self.do_else_correlated_error(targets, args);
                Ok(())
            }
            GateId::ElseCorrelatedError => {
                self.do_else_correlated_error(targets, args);
                Ok(())
            }

            GateId::Detector
            | GateId::ObservableInclude
            | GateId::Tick
            | GateId::QubitCoords
            | GateId::ShiftCoords => Ok(()),

            GateId::Repeat => Err(SimError::BadInstruction {
                gate: "REPEAT",
                problem: "blocks must be executed through run_circuit".to_string(),
            }),
        }
    }

    fn for_qubits(
        &mut self,
        targets: &[GateTarget],
        op: fn(&mut Tableau, usize),
    ) -> SimResult<()> {
        for t in targets {
            op(&mut self.inv_state, t.value() as usize);
        }
        Ok(())
    }

    fn for_qubit_pairs(
        &mut self,
        targets: &[GateTarget],
        op: fn(&mut Tableau, usize, usize),
    ) -> SimResult<()> {
        for pair in targets.chunks_exact(2) {
            op(
                &mut self.inv_state,
                pair[0].value() as usize,
                pair[1].value() as usize,
            );
        }
        Ok(())
    }

    // =========================================================================
    // Controlled gates with classical-feedback controls.
    // =========================================================================

    fn read_classical_bit(&self, target: GateTarget) -> SimResult<bool> {
        if target.is_sweep() {
            // Shot-to-shot configuration belongs to frame-based sampling
            // layers; a lone simulator reads every sweep bit as 0.
            return Ok(false);
        }
        debug_assert!(target.is_record());
        self.measurement_record.lookback(target.value() as u64)
    }

    fn single_cx(&mut self, c: GateTarget, t: GateTarget) -> SimResult<()> {
        if !c.is_classical_bit() && !t.is_classical_bit() {
            self.inv_state.prepend_zcx(c.value() as usize, t.value() as usize);
        } else if t.is_classical_bit() {
            return Err(SimError::RecordEditing {
                target: t.to_string(),
            });
        } else if self.read_classical_bit(c)? {
            self.inv_state.prepend_x(t.value() as usize);
        }
        Ok(())
    }

    fn single_cy(&mut self, c: GateTarget, t: GateTarget) -> SimResult<()> {
        if !c.is_classical_bit() && !t.is_classical_bit() {
            self.inv_state.prepend_zcy(c.value() as usize, t.value() as usize);
        } else if t.is_classical_bit() {
            return Err(SimError::RecordEditing {
                target: t.to_string(),
            });
        } else if self.read_classical_bit(c)? {
            self.inv_state.prepend_y(t.value() as usize);
        }
        Ok(())
    }

    fn do_zcx(&mut self, targets: &[GateTarget]) -> SimResult<()> {
        for pair in targets.chunks_exact(2) {
            self.single_cx(pair[0], pair[1])?;
        }
        Ok(())
    }

    fn do_zcy(&mut self, targets: &[GateTarget]) -> SimResult<()> {
        for pair in targets.chunks_exact(2) {
            self.single_cy(pair[0], pair[1])?;
        }
        Ok(())
    }

    fn do_xcz(&mut self, targets: &[GateTarget]) -> SimResult<()> {
        for pair in targets.chunks_exact(2) {
            self.single_cx(pair[1], pair[0])?;
        }
        Ok(())
    }

    fn do_ycz(&mut self, targets: &[GateTarget]) -> SimResult<()> {
        for pair in targets.chunks_exact(2) {
            self.single_cy(pair[1], pair[0])?;
        }
        Ok(())
    }

    fn do_zcz(&mut self, targets: &[GateTarget]) -> SimResult<()> {
        for pair in targets.chunks_exact(2) {
            let (q1, q2) = (pair[0], pair[1]);
            if !q1.is_classical_bit() && !q2.is_classical_bit() {
                self.inv_state.prepend_zcz(q1.value() as usize, q2.value() as usize);
            } else if !q2.is_classical_bit() {
                if self.read_classical_bit(q1)? {
                    self.inv_state.prepend_z(q2.value() as usize);
                }
            } else if !q1.is_classical_bit() {
                if self.read_classical_bit(q2)? {
                    self.inv_state.prepend_z(q1.value() as usize);
                }
            }
            // Both classical: no effect.
        }
        Ok(())
    }

    // =========================================================================
    // Measurement protocol.
    // =========================================================================

    fn collapse_z(&mut self, targets: &[GateTarget]) {
        let collapse_targets: Vec<usize> = targets
            .iter()
            .map(|t| t.value() as usize)
            .filter(|&q| !self.is_deterministic_z(q))
            .collect();

        // Only pay for the transpose when something actually collapses.
        if !collapse_targets.is_empty() {
            let mut guard = TransposedTableau::new(&mut self.inv_state);
            for q in collapse_targets {
                collapse_qubit_z(&mut guard, q, &mut self.rng, self.sign_bias);
            }
        }
    }

    fn collapse_with_conjugation(
        &mut self,
        targets: &[GateTarget],
        is_deterministic: fn(&Self, usize) -> bool,
        rotate: fn(&mut Tableau, usize),
    ) {
        let mut unique: Vec<usize> = targets
            .iter()
            .map(|t| t.value() as usize)
            .filter(|&q| !is_deterministic(self, q))
            .collect();
        unique.sort_unstable();
        unique.dedup();

        if !unique.is_empty() {
            for &q in &unique {
                rotate(&mut self.inv_state, q);
            }
            {
                let mut guard = TransposedTableau::new(&mut self.inv_state);
                for &q in &unique {
                    collapse_qubit_z(&mut guard, q, &mut self.rng, self.sign_bias);
                }
            }
            for &q in &unique {
                rotate(&mut self.inv_state, q);
            }
        }
    }

    fn collapse_x(&mut self, targets: &[GateTarget]) {
        self.collapse_with_conjugation(targets, Self::is_deterministic_x, Tableau::prepend_h_xz);
    }

    fn collapse_y(&mut self, targets: &[GateTarget]) {
        self.collapse_with_conjugation(targets, Self::is_deterministic_y, Tableau::prepend_h_yz);
    }

    fn noisify_new_measurements(&mut self, args: &[f64], num_results: usize) {
        let Some(&p) = args.first() else {
            return;
        };
        if num_results == 0 {
            return;
        }
        let last = self.measurement_record.len() - 1;
        let storage = &mut self.measurement_record.storage;
        RareHits::for_samples(p, num_results as u64, &mut self.rng, |k| {
            storage[last - k as usize] = !storage[last - k as usize];
        });
    }

    /// Z-basis measurement of every target.
    pub fn measure_z(&mut self, targets: &[GateTarget], args: &[f64]) -> SimResult<()> {
        self.collapse_z(targets);
        for t in targets {
            let q = t.value() as usize;
            let b = self.inv_state.zs.signs.get(q) ^ t.is_inverted();
            self.measurement_record.record_result(b);
        }
        self.noisify_new_measurements(args, targets.len());
        Ok(())
    }

    /// X-basis measurement of every target.
    pub fn measure_x(&mut self, targets: &[GateTarget], args: &[f64]) -> SimResult<()> {
        self.collapse_x(targets);
        for t in targets {
            let q = t.value() as usize;
            let b = self.inv_state.xs.signs.get(q) ^ t.is_inverted();
            self.measurement_record.record_result(b);
        }
        self.noisify_new_measurements(args, targets.len());
        Ok(())
    }

    /// Y-basis measurement of every target.
    pub fn measure_y(&mut self, targets: &[GateTarget], args: &[f64]) -> SimResult<()> {
        self.collapse_y(targets);
        for t in targets {
            let q = t.value() as usize;
            let b = self.inv_state.eval_y_obs(q).sign ^ t.is_inverted();
            self.measurement_record.record_result(b);
        }
        self.noisify_new_measurements(args, targets.len());
        Ok(())
    }

    /// Measure then force |0⟩. Resets run per-target because the same qubit
    /// may appear more than once.
    pub fn measure_reset_z(&mut self, targets: &[GateTarget], args: &[f64]) -> SimResult<()> {
        self.collapse_z(targets);
        for t in targets {
            let q = t.value() as usize;
            let b = self.inv_state.zs.signs.get(q) ^ t.is_inverted();
            self.measurement_record.record_result(b);
            self.inv_state.xs.signs.set(q, false);
            self.inv_state.zs.signs.set(q, false);
        }
        self.noisify_new_measurements(args, targets.len());
        Ok(())
    }

    /// Measure in X then force |+⟩.
    pub fn measure_reset_x(&mut self, targets: &[GateTarget], args: &[f64]) -> SimResult<()> {
        self.collapse_x(targets);
        for t in targets {
            let q = t.value() as usize;
            let b = self.inv_state.xs.signs.get(q) ^ t.is_inverted();
            self.measurement_record.record_result(b);
            self.inv_state.xs.signs.set(q, false);
            self.inv_state.zs.signs.set(q, false);
        }
        self.noisify_new_measurements(args, targets.len());
        Ok(())
    }

    /// Measure in Y then force |i⟩.
    pub fn measure_reset_y(&mut self, targets: &[GateTarget], args: &[f64]) -> SimResult<()> {
        self.collapse_y(targets);
        for t in targets {
            let q = t.value() as usize;
            let cur_sign = self.inv_state.eval_y_obs(q).sign;
            self.measurement_record.record_result(cur_sign ^ t.is_inverted());
            let flip = cur_sign;
            self.inv_state.zs.signs.xor_bit(q, flip);
        }
        self.noisify_new_measurements(args, targets.len());
        Ok(())
    }

    /// Forces targets into |0⟩.
    pub fn reset_z(&mut self, targets: &[GateTarget]) {
        self.collapse_z(targets);
        for t in targets {
            let q = t.value() as usize;
            self.inv_state.xs.signs.set(q, false);
            self.inv_state.zs.signs.set(q, false);
        }
    }

    /// Forces targets into |+⟩.
    pub fn reset_x(&mut self, targets: &[GateTarget]) {
        self.collapse_x(targets);
        for t in targets {
            let q = t.value() as usize;
            self.inv_state.xs.signs.set(q, false);
            self.inv_state.zs.signs.set(q, false);
        }
    }

    /// Forces targets into |i⟩.
    pub fn reset_y(&mut self, targets: &[GateTarget]) {
        self.collapse_y(targets);
        for t in targets {
            let q = t.value() as usize;
            self.inv_state.xs.signs.set(q, false);
            self.inv_state.zs.signs.set(q, false);
            let flip = self.inv_state.eval_y_obs(q).sign;
            self.inv_state.zs.signs.xor_bit(q, flip);
        }
    }

    /// Measures a Z observable and also reports the anticommuting frame
    /// Pauli ("kickback") when the outcome was random.
    pub fn measure_kickback_z(&mut self, target: GateTarget) -> (bool, Option<PauliString>) {
        let flipped = target.is_inverted();
        let q = target.value() as usize;
        let has_kickback = !self.is_deterministic_z(q);

        let mut kickback = None;
        let mut guard = TransposedTableau::new(&mut self.inv_state);
        if has_kickback {
            let pivot = collapse_qubit_z(&mut guard, q, &mut self.rng, self.sign_bias)
                .expect("non-deterministic measurements have a pivot");
            kickback = Some(guard.unsigned_x_input(pivot));
        }
        let result = guard.tableau().zs.signs.get(q) ^ flipped;
        self.measurement_record.record_result(result);

        // Fully isolate so later kickback queries don't keep targeting this
        // qubit.
        collapse_isolate_qubit_z(&mut guard, q, &mut self.rng, self.sign_bias);

        (result, kickback)
    }

    /// X-basis variant of [`Self::measure_kickback_z`].
    pub fn measure_kickback_x(&mut self, target: GateTarget) -> (bool, Option<PauliString>) {
        let q = target.value() as usize;
        self.inv_state.prepend_h_xz(q);
        let (result, mut kickback) = self.measure_kickback_z(target);
        self.inv_state.prepend_h_xz(q);
        if let Some(k) = &mut kickback {
            // Conjugate the kickback by the basis rotation.
            let x = k.xs.get(q);
            let z = k.zs.get(q);
            k.xs.set(q, z);
            k.zs.set(q, x);
        }
        (result, kickback)
    }

    /// Y-basis variant of [`Self::measure_kickback_z`].
    pub fn measure_kickback_y(&mut self, target: GateTarget) -> (bool, Option<PauliString>) {
        let q = target.value() as usize;
        self.inv_state.prepend_h_yz(q);
        let (result, mut kickback) = self.measure_kickback_z(target);
        self.inv_state.prepend_h_yz(q);
        if let Some(k) = &mut kickback {
            let z = k.zs.get(q);
            k.xs.xor_bit(q, z);
        }
        (result, kickback)
    }

    // =========================================================================
    // Pauli product measurement.
    // =========================================================================

    fn do_mpp(&mut self, targets: &[GateTarget], args: &[f64]) -> SimResult<()> {
        // Split the target stream into products at the combiners.
        let mut groups: Vec<Vec<GateTarget>> = vec![];
        let mut joined = false;
        for &t in targets {
            if t.is_combiner() {
                joined = true;
            } else if joined {
                groups.last_mut().unwrap().push(t);
                joined = false;
            } else {
                groups.push(vec![t]);
            }
        }

        // Batch non-overlapping products; overlapping ones flush separately.
        let mut batch: Vec<Vec<GateTarget>> = vec![];
        let mut used: FxHashSet<u32> = FxHashSet::default();
        for group in groups {
            let mut qubits: Vec<u32> = group.iter().map(|t| t.value()).collect();
            qubits.sort_unstable();
            if qubits.windows(2).any(|w| w[0] == w[1]) {
                return Err(SimError::BadInstruction {
                    gate: "MPP",
                    problem: "a Pauli product uses the same qubit twice".to_string(),
                });
            }
            if qubits.iter().any(|q| used.contains(q)) {
                self.flush_mpp_batch(&batch, args)?;
                batch.clear();
                used.clear();
            }
            used.extend(qubits);
            batch.push(group);
        }
        self.flush_mpp_batch(&batch, args)
    }

    fn flush_mpp_batch(&mut self, batch: &[Vec<GateTarget>], args: &[f64]) -> SimResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut h_xz: Vec<usize> = vec![];
        let mut h_yz: Vec<usize> = vec![];
        let mut cnots: Vec<(usize, usize)> = vec![];
        let mut measure_targets: Vec<GateTarget> = vec![];
        for group in batch {
            let anchor = group[0].value();
            let mut inverted = false;
            for t in group {
                inverted ^= t.is_inverted();
                let q = t.value() as usize;
                match t.pauli_component() {
                    Pauli::X => h_xz.push(q),
                    Pauli::Y => h_yz.push(q),
                    Pauli::Z => {}
                    Pauli::I => {
                        return Err(SimError::BadInstruction {
                            gate: "MPP",
                            problem: "identity Pauli target in a product".to_string(),
                        });
                    }
                }
                if q as u32 != anchor {
                    cnots.push((q, anchor as usize));
                }
            }
            measure_targets.push(if inverted {
                GateTarget::inverted_qubit(anchor)
            } else {
                GateTarget::qubit(anchor)
            });
        }

        // Rotate every term into Z, chain each product onto its anchor,
        // measure the anchors, then undo the chaining and rotations.
        for &q in &h_xz {
            self.inv_state.prepend_h_xz(q);
        }
        for &q in &h_yz {
            self.inv_state.prepend_h_yz(q);
        }
        for &(c, t) in &cnots {
            self.inv_state.prepend_zcx(c, t);
        }
        self.measure_z(&measure_targets, args)?;
        for &(c, t) in cnots.iter().rev() {
            self.inv_state.prepend_zcx(c, t);
        }
        for &q in &h_yz {
            self.inv_state.prepend_h_yz(q);
        }
        for &q in &h_xz {
            self.inv_state.prepend_h_xz(q);
        }
        Ok(())
    }

    // =========================================================================
    // Noise channels. Sampling never fails; probabilities were validated at
    // instruction level.
    // =========================================================================

    fn do_pauli_error(&mut self, targets: &[GateTarget], p: f64, flip_x: bool, flip_z: bool) {
        let rng = &mut self.rng;
        let inv_state = &mut self.inv_state;
        RareHits::for_samples(p, targets.len() as u64, rng, |k| {
            let q = targets[k as usize].value() as usize;
            // An X error flips every Z image's sign and vice versa.
            if flip_z {
                inv_state.zs.signs.xor_bit(q, true);
            }
            if flip_x {
                inv_state.xs.signs.xor_bit(q, true);
            }
        });
    }

    fn do_depolarize1(&mut self, targets: &[GateTarget], p: f64) {
        for k in skuld_bits::sample_hit_indices(p, targets.len() as u64, &mut self.rng) {
            let q = targets[k as usize].value() as usize;
            let case: u8 = 1 + self.rng.gen_range(0..3);
            self.inv_state.xs.signs.xor_bit(q, case & 1 != 0);
            self.inv_state.zs.signs.xor_bit(q, case & 2 != 0);
        }
    }

    fn do_depolarize2(&mut self, targets: &[GateTarget], p: f64) {
        let pairs = (targets.len() / 2) as u64;
        for s in skuld_bits::sample_hit_indices(p, pairs, &mut self.rng) {
            let case: u8 = 1 + self.rng.gen_range(0..15);
            let q1 = targets[(s << 1) as usize].value() as usize;
            let q2 = targets[(s << 1) as usize + 1].value() as usize;
            self.inv_state.xs.signs.xor_bit(q1, case & 1 != 0);
            self.inv_state.zs.signs.xor_bit(q1, case & 2 != 0);
            self.inv_state.xs.signs.xor_bit(q2, case & 4 != 0);
            self.inv_state.zs.signs.xor_bit(q2, case & 8 != 0);
        }
    }

    fn apply_pauli_case(&mut self, q: usize, case: usize) {
        match case {
            1 => self.inv_state.prepend_x(q),
            2 => self.inv_state.prepend_y(q),
            3 => self.inv_state.prepend_z(q),
            _ => {}
        }
    }

    fn do_pauli_channel_1(&mut self, targets: &[GateTarget], args: &[f64]) {
        for t in targets {
            let r: f64 = self.rng.r#gen();
            let q = t.value() as usize;
            let mut acc = 0.0;
            let mut chosen = 0;
            for (k, &p) in args.iter().enumerate() {
                acc += p;
                if r < acc {
                    chosen = k + 1;
                    break;
                }
            }
            self.apply_pauli_case(q, chosen);
        }
    }

    fn do_pauli_channel_2(&mut self, targets: &[GateTarget], args: &[f64]) {
        for pair in targets.chunks_exact(2) {
            let r: f64 = self.rng.r#gen();
            let mut acc = 0.0;
            let mut chosen = 0;
            for (k, &p) in args.iter().enumerate() {
                acc += p;
                if r < acc {
                    chosen = k + 1;
                    break;
                }
            }
            if chosen != 0 {
                self.apply_pauli_case(pair[0].value() as usize, chosen >> 2);
                self.apply_pauli_case(pair[1].value() as usize, chosen & 3);
            }
        }
    }

    fn do_else_correlated_error(&mut self, targets: &[GateTarget], args: &[f64]) {
        if self.last_correlated_error_occurred {
            return;
        }
        self.last_correlated_error_occurred = self.rng.gen_bool(args[0]);
        if !self.last_correlated_error_occurred {
            return;
        }
        for t in targets {
            let q = t.value() as usize;
            let (x, z) = t.pauli_component().to_xz();
            if x {
                self.inv_state.prepend_x(q);
            }
            if z {
                self.inv_state.prepend_z(q);
            }
        }
    }

    /// Deterministically applies a Pauli operator to the state.
    pub fn apply_pauli_product(&mut self, paulis: &PauliString) {
        self.inv_state.prepend_pauli(paulis);
    }

    // =========================================================================
    // Peeks and derived state.
    // =========================================================================

    /// The single-qubit Pauli stabilizing `target`, or identity when the
    /// qubit is entangled.
    pub fn peek_bloch(&self, target: usize) -> PauliString {
        let x = self.inv_state.x_image(target);
        let z = self.inv_state.z_image(target);

        let mut result = PauliString::identity(1);
        if !x.xs.not_zero() {
            result.sign = x.sign;
            result.set(0, Pauli::X);
        } else if !z.xs.not_zero() {
            result.sign = z.sign;
            result.set(0, Pauli::Z);
        } else if self.inv_state.xs.xt.row(target) == self.inv_state.zs.xt.row(target) {
            let y = self.inv_state.eval_y_obs(target);
            result.sign = y.sign;
            result.set(0, Pauli::Y);
        }
        result
    }

    /// Deterministic, Gaussian-eliminated stabilizer generators of the
    /// current state.
    pub fn canonical_stabilizers(&self) -> Vec<PauliString> {
        let t = self
            .inv_state
            .inverse()
            .expect("simulator states satisfy the tableau invariants");
        let n = t.num_qubits();
        let mut stabilizers: Vec<PauliString> = (0..n).map(|k| t.z_image(k)).collect();

        let mut min_pivot = 0;
        for q in 0..n {
            for b in 0..2 {
                let has_term = |s: &PauliString| {
                    if b == 0 { s.xs.get(q) } else { s.zs.get(q) }
                };
                let Some(pivot) = (min_pivot..n).find(|&k| has_term(&stabilizers[k])) else {
                    continue;
                };
                for s in 0..n {
                    if s != pivot && has_term(&stabilizers[s]) {
                        let (dst, src) = disjoint_pair(&mut stabilizers, s, pivot);
                        *dst *= &*src;
                    }
                }
                stabilizers.swap(min_pivot, pivot);
                min_pivot += 1;
            }
        }
        stabilizers
    }

    /// The expectation of a Pauli observable: ±1 when determined, 0 when the
    /// outcome would be random. Runs on a clone; the state is untouched.
    pub fn peek_observable_expectation(&self, observable: &PauliString) -> i8
    where
        R: Clone,
    {
        let mut state = self.clone();

        // Kick the observable onto an ancilla's Z observable.
        let n = state.num_qubits().max(observable.num_qubits());
        state.ensure_large_enough_for_qubits(n + 1);
        let anc = n;
        if observable.sign {
            state.inv_state.prepend_x(anc);
        }
        for i in 0..observable.num_qubits() {
            match observable.get(i) {
                Pauli::I => {}
                Pauli::X => state.inv_state.prepend_xcx(i, anc),
                Pauli::Z => state.inv_state.prepend_zcx(i, anc),
                Pauli::Y => state.inv_state.prepend_ycx(i, anc),
            }
        }

        if !state.is_deterministic_z(anc) {
            return 0;
        }
        state
            .measure_z(&[GateTarget::qubit(anc as u32)], &[])
            .expect("plain measurement cannot fail");
        if *state.measurement_record.storage.last().unwrap() {
            -1
        } else {
            1
        }
    }

    // =========================================================================
    // Sampling entry points.
    // =========================================================================

    /// Simulates a whole circuit and returns its measurement record.
    pub fn sample_circuit(circuit: &Circuit, rng: R, sign_bias: i8) -> SimResult<Vec<bool>> {
        let mut sim =
            TableauSimulator::with_sign_bias(rng, circuit.count_qubits() as usize, sign_bias);
        sim.run_circuit(circuit)?;
        Ok(sim.measurement_record.storage)
    }

    /// Parses and executes instructions incrementally, flushing measurement
    /// results through `writer` after each balanced chunk.
    pub fn run_stream<In: BufRead, W: RecordWriter + ?Sized>(
        &mut self,
        input: In,
        writer: &mut W,
    ) -> SimResult<()> {
        let mut pending = String::new();
        let mut depth: usize = 0;
        for line in input.lines() {
            let line = line?;
            let code = line.split('#').next().unwrap_or("");
            depth += code.matches('{').count();
            depth = depth.saturating_sub(code.matches('}').count());
            pending.push_str(&line);
            pending.push('\n');
            if depth == 0 {
                self.run_stream_chunk(&pending, writer)?;
                pending.clear();
            }
        }
        if !pending.trim().is_empty() {
            self.run_stream_chunk(&pending, writer)?;
        }
        writer.write_end()?;
        Ok(())
    }

    fn run_stream_chunk<W: RecordWriter + ?Sized>(
        &mut self,
        text: &str,
        writer: &mut W,
    ) -> SimResult<()> {
        let chunk = Circuit::from_text_with_measurement_context(
            text,
            self.measurement_record.len() as u64,
        )?;
        debug!(
            instructions = chunk.instructions().len(),
            "executing streamed chunk"
        );
        self.run_circuit(&chunk)?;
        self.measurement_record.write_unwritten_results_to(writer)?;
        Ok(())
    }
}

/// Noiseless sample with a deterministic tie-break, used as the reference
/// frame for frame-based sampling layers.
pub fn reference_sample_circuit(circuit: &Circuit) -> SimResult<Vec<bool>> {
    let noiseless = circuit.without_noise();
    TableauSimulator::sample_circuit(&noiseless, StdRng::seed_from_u64(0), 1)
}

fn disjoint_pair<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (lo, hi) = items.split_at_mut(b);
        (&mut lo[a], &hi[0])
    } else {
        let (lo, hi) = items.split_at_mut(a);
        (&mut hi[0], &lo[b])
    }
}

/// Collapses a Z-basis measurement of `target` inside a transposed view.
///
/// Finds a generator whose image anticommutes with the measurement, cancels
/// it out of every other generator with phantom controlled gates at the
/// beginning of time, rotates it into a pure Z generator, and samples the
/// outcome. Returns the pivot generator, or `None` when the measurement was
/// already deterministic.
fn collapse_qubit_z<R: Rng>(
    guard: &mut TransposedTableau<'_>,
    target: usize,
    rng: &mut R,
    sign_bias: i8,
) -> Option<usize> {
    let n = guard.tableau().num_qubits();

    let mut pivot = 0;
    while pivot < n && !guard.tableau().zs.xt.get(pivot, target) {
        pivot += 1;
    }
    if pivot == n {
        return None;
    }

    for k in pivot + 1..n {
        if guard.tableau().zs.xt.get(k, target) {
            guard.append_zcx(pivot, k);
        }
    }

    if guard.tableau().zs.zt.get(pivot, target) {
        guard.append_h_yz(pivot);
    } else {
        guard.append_h_xz(pivot);
    }

    let result_if_measured = if sign_bias == 0 {
        rng.r#gen()
    } else {
        sign_bias < 0
    };
    if guard.tableau().zs.signs.get(target) != result_if_measured {
        guard.append_x(pivot);
    }

    Some(pivot)
}

/// Collapses `target` and then rewrites the tableau so its Z image is
/// exactly ±Z and its X image exactly ±X, fully decoupling the qubit.
fn collapse_isolate_qubit_z<R: Rng>(
    guard: &mut TransposedTableau<'_>,
    target: usize,
    rng: &mut R,
    sign_bias: i8,
) {
    collapse_qubit_z(guard, target, rng, sign_bias);

    let n = guard.tableau().num_qubits();

    // Make the Z image contain Z_target.
    for q in 0..n {
        if guard.tableau().zs.zt.get(q, target) {
            if q != target {
                guard.append_swap(q, target);
            }
            break;
        }
    }

    // Cancel every other Z term out of the Z image.
    for q in 0..n {
        if q != target && guard.tableau().zs.zt.get(q, target) {
            guard.append_zcx(q, target);
        }
    }

    // The X image anticommutes with Z_target, so it holds X or Y there;
    // normalize to X.
    if guard.tableau().xs.zt.get(target, target) {
        guard.append_s(target);
    }

    // Cancel every other term out of the X image.
    for q in 0..n {
        if q != target {
            let x = guard.tableau().xs.xt.get(q, target);
            let z = guard.tableau().xs.zt.get(q, target);
            match (x, z) {
                (true, false) => guard.append_zcx(target, q),
                (false, true) => guard.append_zcz(target, q),
                (true, true) => guard.append_zcy(target, q),
                (false, false) => {}
            }
        }
    }
}
