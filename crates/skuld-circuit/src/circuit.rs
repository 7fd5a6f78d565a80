//! The circuit container: instructions, nested repeat blocks, and the
//! monotonic pools their argument/target spans point into.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CircuitError, CircuitResult};
use crate::gate::{ArgCount, GateFlags, GateId};
use crate::parser;
use crate::target::GateTarget;

/// An (offset, length) index into one of a circuit's pools.
///
/// Spans stay valid for the lifetime of the owning circuit: the pools only
/// grow, and copying a circuit re-pools the spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    offset: u32,
    length: u32,
}

impl Span {
    const EMPTY: Span = Span { offset: 0, length: 0 };

    #[inline]
    fn range(self) -> std::ops::Range<usize> {
        self.offset as usize..(self.offset + self.length) as usize
    }

    #[inline]
    pub fn len(self) -> usize {
        self.length as usize
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.length == 0
    }
}

/// One instruction: a gate plus spans into the owning circuit's pools.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    pub gate: GateId,
    pub args: Span,
    pub targets: Span,
}

/// A growable pool whose tail is staged and then committed. Instruction
/// validation runs before any staging, so failed appends never touch the
/// pool.
#[derive(Debug, Clone)]
struct MonotonicPool<T> {
    items: Vec<T>,
    committed: usize,
}

impl<T> Default for MonotonicPool<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            committed: 0,
        }
    }
}

impl<T: Copy> MonotonicPool<T> {
    fn push_tail(&mut self, value: T) {
        self.items.push(value);
    }

    fn extend_tail(&mut self, values: &[T]) {
        self.items.extend_from_slice(values);
    }

    fn commit_tail(&mut self) -> Span {
        let span = Span {
            offset: self.committed as u32,
            length: (self.items.len() - self.committed) as u32,
        };
        self.committed = self.items.len();
        span
    }

    fn clear(&mut self) {
        self.items.clear();
        self.committed = 0;
    }
}

/// Structural counts of a circuit, computed without unrolling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStats {
    pub num_qubits: u64,
    pub num_measurements: u64,
    pub num_detectors: u64,
    pub num_observables: u64,
    pub num_ticks: u64,
    pub num_sweep_bits: u64,
    pub max_lookback: u64,
}

/// A stabilizer circuit: an ordered instruction list plus the bodies of its
/// `REPEAT` blocks.
///
/// Built by [`Circuit::append`], parsed from the text format with
/// [`str::parse`], printed canonically with `Display`.
#[derive(Clone, Default)]
pub struct Circuit {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) blocks: Vec<Circuit>,
    arg_pool: MonotonicPool<f64>,
    target_pool: MonotonicPool<GateTarget>,
}

impl Circuit {
    /// An empty circuit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the text format.
    pub fn from_text(text: &str) -> CircuitResult<Self> {
        parser::parse_circuit(text)
    }

    /// Parses text that continues an execution which already produced
    /// `prior_measurements` results (used by streaming execution).
    pub fn from_text_with_measurement_context(
        text: &str,
        prior_measurements: u64,
    ) -> CircuitResult<Self> {
        parser::parse_circuit_with_context(text, prior_measurements)
    }

    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The parens arguments of an instruction.
    #[inline]
    pub fn args_of(&self, instruction: &Instruction) -> &[f64] {
        &self.arg_pool.items[instruction.args.range()]
    }

    /// The targets of an instruction.
    #[inline]
    pub fn targets_of(&self, instruction: &Instruction) -> &[GateTarget] {
        &self.target_pool.items[instruction.targets.range()]
    }

    /// The repetition count of a `REPEAT` instruction.
    pub fn repeat_count_of(&self, instruction: &Instruction) -> u64 {
        debug_assert_eq!(instruction.gate, GateId::Repeat);
        let t = self.targets_of(instruction);
        ((t[1].data as u64) << 32) | t[2].data as u64
    }

    /// The body of a `REPEAT` instruction.
    pub fn repeat_body_of(&self, instruction: &Instruction) -> &Circuit {
        debug_assert_eq!(instruction.gate, GateId::Repeat);
        &self.blocks[self.targets_of(instruction)[0].data as usize]
    }

    /// Removes all instructions and blocks and resets the pools. Any spans
    /// previously handed out are invalidated.
    pub fn clear(&mut self) {
        self.instructions.clear();
        self.blocks.clear();
        self.arg_pool.clear();
        self.target_pool.clear();
    }

    /// Appends an instruction, fusing it into the previous instruction when
    /// the gate is fusable and the gate/arguments match.
    ///
    /// Validation happens before any pool mutation; on error the circuit is
    /// unchanged.
    pub fn append(
        &mut self,
        gate: GateId,
        targets: &[GateTarget],
        args: &[f64],
    ) -> CircuitResult<()> {
        validate_instruction(gate, args, targets)?;
        self.append_unchecked(gate, targets, args);
        Ok(())
    }

    pub(crate) fn append_unchecked(&mut self, gate: GateId, targets: &[GateTarget], args: &[f64]) {
        let data = gate.data();
        if data.is_fusable() {
            if let Some(last) = self.instructions.last() {
                if last.gate == gate && self.args_of(last) == args {
                    // The previous instruction's targets end exactly at the
                    // committed pool tail, so its span can grow in place.
                    self.target_pool.extend_tail(targets);
                    self.target_pool.commit_tail();
                    self.instructions.last_mut().unwrap().targets.length += targets.len() as u32;
                    return;
                }
            }
        }
        self.arg_pool.extend_tail(args);
        self.target_pool.extend_tail(targets);
        let args = self.arg_pool.commit_tail();
        let targets = self.target_pool.commit_tail();
        self.instructions.push(Instruction { gate, args, targets });
    }

    /// Appends a `REPEAT repeat_count { body }` block.
    pub fn append_repeat_block(&mut self, repeat_count: u64, body: Circuit) -> CircuitResult<()> {
        if repeat_count == 0 {
            return Err(CircuitError::ZeroRepeatCount);
        }
        if body.instructions.is_empty() {
            return Err(CircuitError::EmptyRepeatBlock);
        }
        let block_index = self.blocks.len() as u32;
        self.blocks.push(body);
        self.target_pool.push_tail(GateTarget { data: block_index });
        self.target_pool.push_tail(GateTarget {
            data: (repeat_count >> 32) as u32,
        });
        self.target_pool.push_tail(GateTarget {
            data: repeat_count as u32,
        });
        let targets = self.target_pool.commit_tail();
        self.instructions.push(Instruction {
            gate: GateId::Repeat,
            args: Span::EMPTY,
            targets,
        });
        Ok(())
    }

    /// Appends every instruction of `other` (without fusing across the seam).
    pub fn append_circuit(&mut self, other: &Circuit) {
        if std::ptr::eq(self, other) {
            let copy = other.clone();
            self.append_circuit(&copy);
            return;
        }
        for inst in &other.instructions {
            if inst.gate == GateId::Repeat {
                let reps = other.repeat_count_of(inst);
                let body = other.repeat_body_of(inst).clone();
                self.append_repeat_block(reps, body)
                    .expect("repeat blocks of a valid circuit stay valid");
            } else {
                self.arg_pool.extend_tail(other.args_of(inst));
                self.target_pool.extend_tail(other.targets_of(inst));
                let args = self.arg_pool.commit_tail();
                let targets = self.target_pool.commit_tail();
                self.instructions.push(Instruction {
                    gate: inst.gate,
                    args,
                    targets,
                });
            }
        }
    }

    /// Repeats the whole circuit `repetitions` times, represented as a single
    /// `REPEAT` block. Zero clears; one is a no-op.
    pub fn repeat_in_place(&mut self, repetitions: u64) {
        if repetitions == 0 {
            self.clear();
            return;
        }
        if repetitions == 1 || self.instructions.is_empty() {
            return;
        }
        let body = std::mem::take(self);
        self.append_repeat_block(repetitions, body)
            .expect("non-empty body with nonzero repetitions");
    }

    /// A new circuit built from the instructions selected by
    /// `start, start+step, …` (`length` of them). Repeat blocks are copied
    /// structurally, never unrolled; the slice owns its own pools.
    pub fn get_slice(&self, start: usize, step: isize, length: usize) -> Circuit {
        let mut result = Circuit::new();
        for k in 0..length {
            let index = (start as isize + step * k as isize) as usize;
            let inst = &self.instructions[index];
            if inst.gate == GateId::Repeat {
                result
                    .append_repeat_block(self.repeat_count_of(inst), self.repeat_body_of(inst).clone())
                    .expect("repeat blocks of a valid circuit stay valid");
            } else {
                result.append_unchecked(inst.gate, self.targets_of(inst), self.args_of(inst));
            }
        }
        result
    }

    /// Invokes `body` once per executed operation, in execution order,
    /// entering repeat blocks the number of times they repeat.
    pub fn for_each_operation<F: FnMut(&Circuit, &Instruction)>(&self, body: &mut F) {
        for inst in &self.instructions {
            if inst.gate == GateId::Repeat {
                let reps = self.repeat_count_of(inst);
                let block = self.repeat_body_of(inst);
                for _ in 0..reps {
                    block.for_each_operation(body);
                }
            } else {
                body(self, inst);
            }
        }
    }

    // =========================================================================
    // Structural queries (cost proportional to the static text, not the
    // unrolled execution).
    // =========================================================================

    /// Number of measurement results one execution produces.
    pub fn count_measurements(&self) -> u64 {
        let mut total: u64 = 0;
        for inst in &self.instructions {
            if inst.gate == GateId::Repeat {
                let reps = self.repeat_count_of(inst);
                let per = self.repeat_body_of(inst).count_measurements();
                total = total.saturating_add(per.saturating_mul(reps));
            } else {
                total = total.saturating_add(self.measurement_count_of(inst));
            }
        }
        total
    }

    /// Number of results a single (non-repeat) instruction produces.
    pub fn measurement_count_of(&self, instruction: &Instruction) -> u64 {
        let data = instruction.gate.data();
        if !data.flags.contains(GateFlags::PRODUCES_RESULTS) {
            return 0;
        }
        if data.flags.contains(GateFlags::TARGETS_COMBINERS) {
            // Each combiner joins two Pauli targets into one product, so the
            // group count is the target count minus the combiner count.
            let targets = self.targets_of(instruction);
            let combiners = targets.iter().filter(|t| t.is_combiner()).count() as u64;
            return targets.len() as u64 - 2 * combiners;
        }
        instruction.targets.len() as u64
    }

    /// Number of detectors one execution declares.
    pub fn count_detectors(&self) -> u64 {
        let mut total: u64 = 0;
        for inst in &self.instructions {
            if inst.gate == GateId::Repeat {
                let reps = self.repeat_count_of(inst);
                let per = self.repeat_body_of(inst).count_detectors();
                total = total.saturating_add(per.saturating_mul(reps));
            } else if inst.gate == GateId::Detector {
                total = total.saturating_add(1);
            }
        }
        total
    }

    /// One more than the largest observable index mentioned anywhere.
    /// Observables are indexed globally, so loops do not multiply this.
    pub fn count_observables(&self) -> u64 {
        let mut max_plus_one: u64 = 0;
        for inst in &self.instructions {
            if inst.gate == GateId::Repeat {
                max_plus_one = max_plus_one.max(self.repeat_body_of(inst).count_observables());
            } else if inst.gate == GateId::ObservableInclude {
                let index = self.args_of(inst)[0] as u64;
                max_plus_one = max_plus_one.max(index + 1);
            }
        }
        max_plus_one
    }

    /// One more than the largest qubit index mentioned by any static target.
    pub fn count_qubits(&self) -> u64 {
        let mut max_plus_one: u64 = 0;
        for inst in &self.instructions {
            if inst.gate == GateId::Repeat {
                max_plus_one = max_plus_one.max(self.repeat_body_of(inst).count_qubits());
            } else {
                for t in self.targets_of(inst) {
                    if t.has_qubit_value() && !t.is_combiner() {
                        max_plus_one = max_plus_one.max(t.value() as u64 + 1);
                    }
                }
            }
        }
        max_plus_one
    }

    /// Number of TICK instructions one execution passes.
    pub fn count_ticks(&self) -> u64 {
        let mut total: u64 = 0;
        for inst in &self.instructions {
            if inst.gate == GateId::Repeat {
                let reps = self.repeat_count_of(inst);
                let per = self.repeat_body_of(inst).count_ticks();
                total = total.saturating_add(per.saturating_mul(reps));
            } else if inst.gate == GateId::Tick {
                total = total.saturating_add(1);
            }
        }
        total
    }

    /// One more than the largest sweep-bit index mentioned anywhere.
    pub fn count_sweep_bits(&self) -> u64 {
        let mut max_plus_one: u64 = 0;
        for inst in &self.instructions {
            if inst.gate == GateId::Repeat {
                max_plus_one = max_plus_one.max(self.repeat_body_of(inst).count_sweep_bits());
            } else {
                for t in self.targets_of(inst) {
                    if t.is_sweep() {
                        max_plus_one = max_plus_one.max(t.value() as u64 + 1);
                    }
                }
            }
        }
        max_plus_one
    }

    /// The deepest measurement-record lookback any instruction uses.
    pub fn max_lookback(&self) -> u64 {
        let mut max: u64 = 0;
        for inst in &self.instructions {
            if inst.gate == GateId::Repeat {
                max = max.max(self.repeat_body_of(inst).max_lookback());
            } else {
                for t in self.targets_of(inst) {
                    if t.is_record() {
                        max = max.max(t.value() as u64);
                    }
                }
            }
        }
        max
    }

    /// All structural counts at once.
    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            num_qubits: self.count_qubits(),
            num_measurements: self.count_measurements(),
            num_detectors: self.count_detectors(),
            num_observables: self.count_observables(),
            num_ticks: self.count_ticks(),
            num_sweep_bits: self.count_sweep_bits(),
            max_lookback: self.max_lookback(),
        }
    }

    /// A structurally identical circuit with every noise operation removed
    /// and measurement noise arguments stripped. Single pass over the static
    /// text.
    pub fn without_noise(&self) -> Circuit {
        let mut result = Circuit::new();
        for inst in &self.instructions {
            let data = inst.gate.data();
            if data.is_noise() {
                continue;
            }
            if inst.gate == GateId::Repeat {
                result
                    .append_repeat_block(
                        self.repeat_count_of(inst),
                        self.repeat_body_of(inst).without_noise(),
                    )
                    .expect("noiseless bodies keep their instructions");
                continue;
            }
            let args = if data.flags.contains(GateFlags::PRODUCES_NOISY_RESULTS) {
                &[][..]
            } else {
                self.args_of(inst)
            };
            result.append_unchecked(inst.gate, self.targets_of(inst), args);
        }
        result
    }

    // =========================================================================
    // Detector coordinates.
    // =========================================================================

    /// The accumulated coordinate shift of one full execution.
    pub fn final_coord_shift(&self) -> Vec<f64> {
        let mut shift = vec![];
        for inst in &self.instructions {
            if inst.gate == GateId::ShiftCoords {
                vec_pad_add_mul(&mut shift, self.args_of(inst), 1.0);
            } else if inst.gate == GateId::Repeat {
                let reps = self.repeat_count_of(inst);
                let per = self.repeat_body_of(inst).final_coord_shift();
                vec_pad_add_mul(&mut shift, &per, reps as f64);
            }
        }
        shift
    }

    /// The coordinate tuple of the `index`-th detector, found by scanning
    /// the static text and descending into loops analytically (a loop whose
    /// body declares `m` detectors contributes `⌊k/m⌋` copies of its
    /// per-iteration shift before the `k mod m`-th body detector is read).
    pub fn coords_of_detector(&self, index: u64) -> CircuitResult<Vec<f64>> {
        let mut shift = vec![];
        let mut remaining = index;
        self.coords_helper(&mut remaining, &mut shift)
            .ok_or(CircuitError::DetectorIndexTooLarge {
                index,
                available: self.count_detectors(),
            })
    }

    /// The coordinate tuples of several detectors at once.
    pub fn detector_coordinates(
        &self,
        indices: &[u64],
    ) -> CircuitResult<rustc_hash::FxHashMap<u64, Vec<f64>>> {
        let mut out = rustc_hash::FxHashMap::default();
        for &index in indices {
            out.insert(index, self.coords_of_detector(index)?);
        }
        Ok(out)
    }

    fn coords_helper(&self, remaining: &mut u64, shift: &mut Vec<f64>) -> Option<Vec<f64>> {
        for inst in &self.instructions {
            match inst.gate {
                GateId::Detector => {
                    if *remaining == 0 {
                        let args = self.args_of(inst);
                        let mut coords = args.to_vec();
                        for (k, c) in coords.iter_mut().enumerate() {
                            if k < shift.len() {
                                *c += shift[k];
                            }
                        }
                        return Some(coords);
                    }
                    *remaining -= 1;
                }
                GateId::ShiftCoords => {
                    vec_pad_add_mul(shift, self.args_of(inst), 1.0);
                }
                GateId::Repeat => {
                    let body = self.repeat_body_of(inst);
                    let reps = self.repeat_count_of(inst);
                    let per = body.count_detectors();
                    let delta = body.final_coord_shift();
                    if per > 0 && *remaining / per < reps {
                        let iteration = *remaining / per;
                        *remaining %= per;
                        vec_pad_add_mul(shift, &delta, iteration as f64);
                        return body.coords_helper(remaining, shift);
                    }
                    *remaining -= per.saturating_mul(reps);
                    vec_pad_add_mul(shift, &delta, reps as f64);
                }
                _ => {}
            }
        }
        None
    }
}

/// `accumulator[k] += scale * addend[k]`, growing the accumulator as needed.
pub(crate) fn vec_pad_add_mul(accumulator: &mut Vec<f64>, addend: &[f64], scale: f64) {
    while accumulator.len() < addend.len() {
        accumulator.push(0.0);
    }
    for (a, &b) in accumulator.iter_mut().zip(addend) {
        *a += scale * b;
    }
}

/// Checks an instruction's arguments and targets against its gate's
/// registry entry. Pure: touches no pools.
pub fn validate_instruction(
    gate: GateId,
    args: &[f64],
    targets: &[GateTarget],
) -> CircuitResult<()> {
    let data = gate.data();
    let name = data.name;

    let args_ok = match data.arg_count {
        ArgCount::Exactly(n) => args.len() == n,
        ArgCount::ZeroOrOne => args.len() <= 1,
        ArgCount::Any => true,
    };
    if !args_ok {
        return Err(CircuitError::WrongArgumentCount {
            gate: name,
            expected: data.arg_count.to_string(),
            got: args.len(),
        });
    }

    if data.flags.contains(GateFlags::ARGS_ARE_DISJOINT_PROBABILITIES) {
        let mut sum = 0.0;
        for &a in args {
            if !(0.0..=1.0).contains(&a) {
                return Err(CircuitError::InvalidProbability { gate: name, value: a });
            }
            sum += a;
        }
        if args.len() > 1 && sum > 1.0 + 1e-6 {
            return Err(CircuitError::ProbabilitiesExceedUnity { gate: name, sum });
        }
    }

    if data.flags.contains(GateFlags::ARGS_ARE_UNSIGNED_INTS) {
        for &a in args {
            if a < 0.0 || a.fract() != 0.0 || !a.is_finite() {
                return Err(CircuitError::ExpectedUnsignedInteger { gate: name, value: a });
            }
        }
    }

    if data.flags.contains(GateFlags::TAKES_NO_TARGETS) && !targets.is_empty() {
        return Err(CircuitError::TakesNoTargets { gate: name });
    }

    if data.flags.contains(GateFlags::ONLY_TARGETS_MEASUREMENT_RECORD) {
        for t in targets {
            if !t.is_record() {
                return Err(CircuitError::InvalidTargetKind {
                    gate: name,
                    target: t.to_string(),
                });
            }
        }
        return Ok(());
    }

    if data.flags.contains(GateFlags::TARGETS_PAULI_STRING) {
        let combiners_allowed = data.flags.contains(GateFlags::TARGETS_COMBINERS);
        let mut previous_was_pauli = false;
        for t in targets {
            if t.is_combiner() {
                if !combiners_allowed || !previous_was_pauli {
                    return Err(CircuitError::DanglingCombiner { gate: name });
                }
                previous_was_pauli = false;
            } else if t.is_pauli() {
                if t.is_inverted() && !data.flags.contains(GateFlags::PRODUCES_RESULTS) {
                    return Err(CircuitError::InvalidTargetKind {
                        gate: name,
                        target: t.to_string(),
                    });
                }
                previous_was_pauli = true;
            } else {
                return Err(CircuitError::InvalidTargetKind {
                    gate: name,
                    target: t.to_string(),
                });
            }
        }
        if !targets.is_empty() && !previous_was_pauli {
            return Err(CircuitError::DanglingCombiner { gate: name });
        }
        return Ok(());
    }

    let bits_allowed = data.flags.contains(GateFlags::CAN_TARGET_BITS);
    let inversion_allowed = data.flags.contains(GateFlags::PRODUCES_RESULTS);
    for t in targets {
        let acceptable = if t.is_combiner() || t.is_pauli() {
            false
        } else if t.is_classical_bit() {
            bits_allowed
        } else {
            !t.is_inverted() || inversion_allowed
        };
        if !acceptable {
            return Err(CircuitError::InvalidTargetKind {
                gate: name,
                target: t.to_string(),
            });
        }
    }

    if data.flags.contains(GateFlags::TARGETS_PAIRS) {
        if targets.len() % 2 != 0 {
            return Err(CircuitError::ExpectedPairedTargets {
                gate: name,
                got: targets.len(),
            });
        }
        for pair in targets.chunks_exact(2) {
            if pair[0].has_qubit_value()
                && pair[1].has_qubit_value()
                && pair[0].value() == pair[1].value()
            {
                return Err(CircuitError::DuplicateQubitInPair {
                    gate: name,
                    qubit: pair[0].value(),
                });
            }
        }
    }

    Ok(())
}

impl PartialEq for Circuit {
    fn eq(&self, other: &Self) -> bool {
        if self.instructions.len() != other.instructions.len() {
            return false;
        }
        for (a, b) in self.instructions.iter().zip(&other.instructions) {
            if a.gate != b.gate {
                return false;
            }
            if a.gate == GateId::Repeat {
                if self.repeat_count_of(a) != other.repeat_count_of(b)
                    || self.repeat_body_of(a) != other.repeat_body_of(b)
                {
                    return false;
                }
            } else if self.args_of(a) != other.args_of(b)
                || self.targets_of(a) != other.targets_of(b)
            {
                return false;
            }
        }
        true
    }
}

impl FromStr for Circuit {
    type Err = CircuitError;

    fn from_str(text: &str) -> CircuitResult<Self> {
        Circuit::from_text(text)
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[f64]) -> fmt::Result {
    if args.is_empty() {
        return Ok(());
    }
    write!(f, "(")?;
    for (k, a) in args.iter().enumerate() {
        if k != 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    write!(f, ")")
}

fn write_targets(f: &mut fmt::Formatter<'_>, targets: &[GateTarget]) -> fmt::Result {
    let mut glue_next = false;
    for t in targets {
        if t.is_combiner() {
            write!(f, "*")?;
            glue_next = true;
        } else {
            if !glue_next {
                write!(f, " ")?;
            }
            write!(f, "{t}")?;
            glue_next = false;
        }
    }
    Ok(())
}

fn write_circuit(f: &mut fmt::Formatter<'_>, circuit: &Circuit, indent: usize) -> fmt::Result {
    let mut first = true;
    for inst in &circuit.instructions {
        if !first {
            writeln!(f)?;
        }
        first = false;
        write!(f, "{:indent$}", "")?;
        if inst.gate == GateId::Repeat {
            writeln!(f, "REPEAT {} {{", circuit.repeat_count_of(inst))?;
            write_circuit(f, circuit.repeat_body_of(inst), indent + 4)?;
            writeln!(f)?;
            write!(f, "{:indent$}}}", "")?;
        } else {
            write!(f, "{}", inst.gate.name())?;
            write_args(f, circuit.args_of(inst))?;
            write_targets(f, circuit.targets_of(inst))?;
        }
    }
    Ok(())
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_circuit(f, self, 0)
    }
}

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(text: &str) -> Circuit {
        Circuit::from_text(text).unwrap()
    }

    #[test]
    fn test_append_and_fuse() {
        let mut circuit = Circuit::new();
        circuit.append(GateId::H, &[GateTarget::qubit(0)], &[]).unwrap();
        circuit.append(GateId::H, &[GateTarget::qubit(1)], &[]).unwrap();
        assert_eq!(circuit.instructions().len(), 1);
        assert_eq!(circuit.to_string(), "H 0 1");

        circuit.append(GateId::X, &[GateTarget::qubit(0)], &[]).unwrap();
        circuit.append(GateId::H, &[GateTarget::qubit(2)], &[]).unwrap();
        assert_eq!(circuit.instructions().len(), 3);
    }

    #[test]
    fn test_args_block_fusion() {
        let mut circuit = Circuit::new();
        circuit
            .append(GateId::XError, &[GateTarget::qubit(0)], &[0.25])
            .unwrap();
        circuit
            .append(GateId::XError, &[GateTarget::qubit(1)], &[0.125])
            .unwrap();
        assert_eq!(circuit.instructions().len(), 2);
        circuit
            .append(GateId::XError, &[GateTarget::qubit(2)], &[0.125])
            .unwrap();
        assert_eq!(circuit.instructions().len(), 2);
        assert_eq!(circuit.to_string(), "X_ERROR(0.25) 0\nX_ERROR(0.125) 1 2");
    }

    #[test]
    fn test_tick_never_fuses() {
        let mut circuit = Circuit::new();
        circuit.append(GateId::Tick, &[], &[]).unwrap();
        circuit.append(GateId::Tick, &[], &[]).unwrap();
        assert_eq!(circuit.instructions().len(), 2);
    }

    #[test]
    fn test_validation_failure_leaves_circuit_unchanged() {
        let mut circuit = Circuit::new();
        circuit.append(GateId::H, &[GateTarget::qubit(0)], &[]).unwrap();
        let before = circuit.to_string();

        assert!(circuit
            .append(GateId::XError, &[GateTarget::qubit(0)], &[1.5])
            .is_err());
        assert!(circuit
            .append(GateId::Cx, &[GateTarget::qubit(0)], &[])
            .is_err());
        assert!(circuit
            .append(GateId::Cx, &[GateTarget::qubit(3), GateTarget::qubit(3)], &[])
            .is_err());
        assert!(circuit
            .append(GateId::H, &[GateTarget::rec(1)], &[])
            .is_err());
        assert!(circuit
            .append(GateId::Detector, &[GateTarget::qubit(0)], &[])
            .is_err());
        assert!(circuit.append(GateId::Tick, &[GateTarget::qubit(0)], &[]).is_err());
        assert_eq!(circuit.to_string(), before);
    }

    #[test]
    fn test_pauli_channel_validation() {
        let mut circuit = Circuit::new();
        assert!(circuit
            .append(
                GateId::PauliChannel1,
                &[GateTarget::qubit(0)],
                &[0.5, 0.4, 0.2]
            )
            .is_err());
        // Slight float overshoot inside the tolerance is accepted.
        circuit
            .append(
                GateId::PauliChannel1,
                &[GateTarget::qubit(0)],
                &[0.5, 0.3, 0.2000000001]
            )
            .unwrap();
    }

    #[test]
    fn test_counts_without_unrolling() {
        let circuit = c("
            R 0 1 2
            M 0 1
            REPEAT 1000000000000 {
                M 2
                DETECTOR rec[-1]
            }
            OBSERVABLE_INCLUDE(3) rec[-1]
        ");
        assert_eq!(circuit.count_qubits(), 3);
        assert_eq!(circuit.count_measurements(), 1_000_000_000_002);
        assert_eq!(circuit.count_detectors(), 1_000_000_000_000);
        assert_eq!(circuit.count_observables(), 4);
        assert_eq!(circuit.max_lookback(), 1);
    }

    #[test]
    fn test_counts_saturate() {
        let mut body = Circuit::new();
        body.append(GateId::M, &[GateTarget::qubit(0)], &[]).unwrap();
        let mut inner = Circuit::new();
        inner.append_repeat_block(u64::MAX / 2, body).unwrap();
        let mut circuit = Circuit::new();
        circuit.append_repeat_block(u64::MAX / 2, inner).unwrap();
        assert_eq!(circuit.count_measurements(), u64::MAX);
    }

    #[test]
    fn test_counts_match_unrolled() {
        let circuit = c("
            H 0
            REPEAT 3 {
                M 0 1
                REPEAT 2 {
                    TICK
                    M 2
                }
                DETECTOR rec[-1]
            }
        ");
        let mut unrolled_measurements = 0;
        let mut unrolled_ticks = 0;
        let mut unrolled_detectors = 0;
        circuit.for_each_operation(&mut |c, inst| {
            unrolled_measurements += c.measurement_count_of(inst);
            unrolled_ticks += u64::from(inst.gate == GateId::Tick);
            unrolled_detectors += u64::from(inst.gate == GateId::Detector);
        });
        assert_eq!(circuit.count_measurements(), unrolled_measurements);
        assert_eq!(circuit.count_ticks(), unrolled_ticks);
        assert_eq!(circuit.count_detectors(), unrolled_detectors);
        assert_eq!(circuit.count_measurements(), 12);
        assert_eq!(circuit.count_ticks(), 6);
        assert_eq!(circuit.count_detectors(), 3);
    }

    #[test]
    fn test_mpp_measurement_count() {
        let circuit = c("MPP X0*X1 Z2 Y3*Y4*Y5");
        assert_eq!(circuit.count_measurements(), 3);
    }

    #[test]
    fn test_without_noise() {
        let circuit = c("
            X_ERROR(0.125) 0
            H 0
            DEPOLARIZE1(0.01) 0
            M(0.02) 0
            DETECTOR rec[-1]
            REPEAT 5 {
                Y_ERROR(0.25) 1
                M 1
            }
        ");
        let clean = circuit.without_noise();
        assert_eq!(
            clean.to_string(),
            "H 0\nM 0\nDETECTOR rec[-1]\nREPEAT 5 {\n    M 1\n}"
        );
        assert_eq!(clean.count_measurements(), circuit.count_measurements());
        assert_eq!(clean.count_detectors(), circuit.count_detectors());
        assert_eq!(clean.count_qubits(), circuit.count_qubits());
        assert_eq!(clean.max_lookback(), circuit.max_lookback());
    }

    #[test]
    fn test_repeat_in_place() {
        let mut circuit = c("X 0");
        circuit.repeat_in_place(3);
        assert_eq!(circuit.to_string(), "REPEAT 3 {\n    X 0\n}");

        let mut circuit = c("X 0");
        circuit.repeat_in_place(1);
        assert_eq!(circuit.to_string(), "X 0");

        let mut circuit = c("X 0");
        circuit.repeat_in_place(0);
        assert_eq!(circuit.to_string(), "");
    }

    #[test]
    fn test_append_circuit_has_fusion_barrier() {
        let mut a = c("X 0");
        let b = c("X 1");
        a.append_circuit(&b);
        assert_eq!(a.instructions().len(), 2);
    }

    #[test]
    fn test_get_slice() {
        let circuit = c("
            H 0
            CX 0 1
            REPEAT 2 {
                M 0
            }
            X 3
        ");
        let sliced = circuit.get_slice(1, 2, 2);
        assert_eq!(sliced.to_string(), "CX 0 1\nX 3");
        let block_only = circuit.get_slice(2, 1, 1);
        assert_eq!(block_only.to_string(), "REPEAT 2 {\n    M 0\n}");
    }

    #[test]
    fn test_coords_of_detector_basic() {
        let circuit = c("
            M 0
            DETECTOR(1, 2) rec[-1]
            SHIFT_COORDS(10)
            M 0
            DETECTOR(3) rec[-1]
        ");
        assert_eq!(circuit.coords_of_detector(0).unwrap(), vec![1.0, 2.0]);
        assert_eq!(circuit.coords_of_detector(1).unwrap(), vec![13.0]);
        assert!(matches!(
            circuit.coords_of_detector(2),
            Err(CircuitError::DetectorIndexTooLarge { index: 2, available: 2 })
        ));

        let batch = circuit.detector_coordinates(&[0, 1]).unwrap();
        assert_eq!(batch[&0], vec![1.0, 2.0]);
        assert_eq!(batch[&1], vec![13.0]);
        assert!(circuit.detector_coordinates(&[0, 9]).is_err());
    }

    #[test]
    fn test_coords_of_detector_inside_huge_loop() {
        let circuit = c("
            REPEAT 1000000000 {
                M 0
                DETECTOR(0, 5) rec[-1]
                DETECTOR(1, 5) rec[-1]
                SHIFT_COORDS(2, 0)
            }
        ");
        assert_eq!(circuit.coords_of_detector(0).unwrap(), vec![0.0, 5.0]);
        assert_eq!(circuit.coords_of_detector(3).unwrap(), vec![3.0, 5.0]);
        let far = 2 * 999_999_999 + 1;
        assert_eq!(
            circuit.coords_of_detector(far).unwrap(),
            vec![2.0 * 999_999_999.0 + 1.0, 5.0]
        );
    }

    #[test]
    fn test_stats_round_trip_through_json() {
        let circuit = c("M 0 1\nDETECTOR rec[-1]");
        let stats = circuit.stats();
        let json = serde_json::to_string(&stats).unwrap();
        let back: CircuitStats = serde_json::from_str(&json).unwrap();
        assert_eq!(stats, back);
        assert_eq!(stats.num_measurements, 2);
    }

    #[test]
    fn test_zero_and_empty_repeat_rejected() {
        let mut circuit = Circuit::new();
        assert!(matches!(
            circuit.append_repeat_block(0, c("X 0")),
            Err(CircuitError::ZeroRepeatCount)
        ));
        assert!(matches!(
            circuit.append_repeat_block(5, Circuit::new()),
            Err(CircuitError::EmptyRepeatBlock)
        ));
    }
}
