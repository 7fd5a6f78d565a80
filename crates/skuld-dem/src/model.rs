//! The detector error model container.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;

use crate::error::{DemError, DemResult};
use crate::parser;
use crate::target::DemTarget;

/// Kinds of error-model instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DemInstructionType {
    /// A probabilistic error mechanism with its symptoms.
    Error,
    /// A detector declaration carrying coordinates.
    Detector,
    /// A logical observable declaration.
    LogicalObservable,
    /// Shifts the running detector offset and coordinate origin.
    ShiftDetectors,
    /// A nested repeat block.
    RepeatBlock,
}

impl DemInstructionType {
    pub fn name(self) -> &'static str {
        match self {
            DemInstructionType::Error => "error",
            DemInstructionType::Detector => "detector",
            DemInstructionType::LogicalObservable => "logical_observable",
            DemInstructionType::ShiftDetectors => "shift_detectors",
            DemInstructionType::RepeatBlock => "repeat",
        }
    }
}

/// An (offset, length) index into one of a model's pools.
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

/// One error-model instruction: a type plus spans into the owning model's
/// pools. `RepeatBlock` instructions hold `[block_index, rep_hi, rep_lo]`
/// in their target span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemInstruction {
    pub kind: DemInstructionType,
    pub args: Span,
    pub targets: Span,
}

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

/// A detector error model: a list of error/annotation instructions plus the
/// bodies of its repeat blocks, mirroring the circuit container's pool
/// discipline.
#[derive(Clone, Default)]
pub struct DetectorErrorModel {
    pub(crate) instructions: Vec<DemInstruction>,
    pub(crate) blocks: Vec<DetectorErrorModel>,
    arg_pool: MonotonicPool<f64>,
    target_pool: MonotonicPool<DemTarget>,
}

impl DetectorErrorModel {
    /// An empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the text format.
    pub fn from_text(text: &str) -> DemResult<Self> {
        parser::parse_detector_error_model(text)
    }

    #[inline]
    pub fn instructions(&self) -> &[DemInstruction] {
        &self.instructions
    }

    #[inline]
    pub fn args_of(&self, instruction: &DemInstruction) -> &[f64] {
        &self.arg_pool.items[instruction.args.range()]
    }

    #[inline]
    pub fn targets_of(&self, instruction: &DemInstruction) -> &[DemTarget] {
        &self.target_pool.items[instruction.targets.range()]
    }

    /// The repetition count of a repeat block instruction.
    pub fn repeat_count_of(&self, instruction: &DemInstruction) -> u64 {
        debug_assert_eq!(instruction.kind, DemInstructionType::RepeatBlock);
        let t = self.targets_of(instruction);
        (t[1].data << 32) | t[2].data
    }

    /// The body of a repeat block instruction.
    pub fn repeat_body_of(&self, instruction: &DemInstruction) -> &DetectorErrorModel {
        debug_assert_eq!(instruction.kind, DemInstructionType::RepeatBlock);
        &self.blocks[self.targets_of(instruction)[0].data as usize]
    }

    /// Removes everything; previously handed-out spans are invalidated.
    pub fn clear(&mut self) {
        self.instructions.clear();
        self.blocks.clear();
        self.arg_pool.clear();
        self.target_pool.clear();
    }

    fn push_instruction(&mut self, kind: DemInstructionType, args: &[f64], targets: &[DemTarget]) {
        self.arg_pool.extend_tail(args);
        self.target_pool.extend_tail(targets);
        let args = self.arg_pool.commit_tail();
        let targets = self.target_pool.commit_tail();
        self.instructions.push(DemInstruction { kind, args, targets });
    }

    /// Appends `error(probability) targets…`.
    pub fn append_error(&mut self, probability: f64, targets: &[DemTarget]) -> DemResult<()> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(DemError::InvalidProbability(probability));
        }
        let mut previous_was_symptom = false;
        for t in targets {
            if t.is_separator() {
                if !previous_was_symptom {
                    return Err(DemError::DanglingSeparator);
                }
                previous_was_symptom = false;
            } else {
                previous_was_symptom = true;
            }
        }
        if !targets.is_empty() && !previous_was_symptom {
            return Err(DemError::DanglingSeparator);
        }
        self.push_instruction(DemInstructionType::Error, &[probability], targets);
        Ok(())
    }

    /// Appends `detector(coords…) Dk`.
    pub fn append_detector(&mut self, coords: &[f64], target: DemTarget) -> DemResult<()> {
        if !target.is_relative_detector_id() {
            return Err(DemError::MalformedInstruction {
                instruction: "detector",
                problem: format!("target {target} is not a detector id"),
            });
        }
        self.push_instruction(DemInstructionType::Detector, coords, &[target]);
        Ok(())
    }

    /// Appends `logical_observable Lk`.
    pub fn append_logical_observable(&mut self, target: DemTarget) -> DemResult<()> {
        if !target.is_observable_id() {
            return Err(DemError::MalformedInstruction {
                instruction: "logical_observable",
                problem: format!("target {target} is not an observable id"),
            });
        }
        self.push_instruction(DemInstructionType::LogicalObservable, &[], &[target]);
        Ok(())
    }

    /// Appends `shift_detectors(coord_shift…) detector_shift`.
    pub fn append_shift_detectors(&mut self, coord_shift: &[f64], detector_shift: u64) {
        self.push_instruction(
            DemInstructionType::ShiftDetectors,
            coord_shift,
            &[DemTarget {
                data: detector_shift,
            }],
        );
    }

    /// Appends `repeat repeat_count { body }`.
    pub fn append_repeat_block(
        &mut self,
        repeat_count: u64,
        body: DetectorErrorModel,
    ) -> DemResult<()> {
        if repeat_count == 0 {
            return Err(DemError::ZeroRepeatCount);
        }
        let block_index = self.blocks.len() as u64;
        self.blocks.push(body);
        self.push_instruction(
            DemInstructionType::RepeatBlock,
            &[],
            &[
                DemTarget { data: block_index },
                DemTarget {
                    data: repeat_count >> 32,
                },
                DemTarget {
                    data: repeat_count & 0xFFFF_FFFF,
                },
            ],
        );
        Ok(())
    }

    /// Appends every instruction of `other`.
    pub fn append_model(&mut self, other: &DetectorErrorModel) {
        if std::ptr::eq(self, other) {
            let copy = other.clone();
            self.append_model(&copy);
            return;
        }
        for inst in &other.instructions {
            if inst.kind == DemInstructionType::RepeatBlock {
                self.append_repeat_block(
                    other.repeat_count_of(inst),
                    other.repeat_body_of(inst).clone(),
                )
                .expect("repeat blocks of a valid model stay valid");
            } else {
                self.push_instruction(inst.kind, other.args_of(inst), other.targets_of(inst));
            }
        }
    }

    /// Repeats the whole model, represented as one repeat block.
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
            .expect("nonzero repetitions");
    }

    /// A new model from the instructions selected by `start, start+step, …`.
    pub fn get_slice(&self, start: usize, step: isize, length: usize) -> DetectorErrorModel {
        let mut result = DetectorErrorModel::new();
        for k in 0..length {
            let index = (start as isize + step * k as isize) as usize;
            let inst = &self.instructions[index];
            if inst.kind == DemInstructionType::RepeatBlock {
                result
                    .append_repeat_block(self.repeat_count_of(inst), self.repeat_body_of(inst).clone())
                    .expect("repeat blocks of a valid model stay valid");
            } else {
                result.push_instruction(inst.kind, self.args_of(inst), self.targets_of(inst));
            }
        }
        result
    }

    // =========================================================================
    // Structural queries.
    // =========================================================================

    /// Total detector-offset advance of one full execution.
    pub fn total_detector_shift(&self) -> u64 {
        let mut total: u64 = 0;
        for inst in &self.instructions {
            match inst.kind {
                DemInstructionType::ShiftDetectors => {
                    total = total.saturating_add(self.targets_of(inst)[0].data);
                }
                DemInstructionType::RepeatBlock => {
                    let per = self.repeat_body_of(inst).total_detector_shift();
                    total = total.saturating_add(per.saturating_mul(self.repeat_count_of(inst)));
                }
                _ => {}
            }
        }
        total
    }

    /// The detector offset and coordinate shift after one full execution.
    pub fn final_detector_and_coord_shift(&self) -> (u64, Vec<f64>) {
        let mut detector_offset: u64 = 0;
        let mut coord_shift = vec![];
        for inst in &self.instructions {
            match inst.kind {
                DemInstructionType::ShiftDetectors => {
                    vec_pad_add_mul(&mut coord_shift, self.args_of(inst), 1.0);
                    detector_offset =
                        detector_offset.saturating_add(self.targets_of(inst)[0].data);
                }
                DemInstructionType::RepeatBlock => {
                    let reps = self.repeat_count_of(inst);
                    let (d, c) = self.repeat_body_of(inst).final_detector_and_coord_shift();
                    vec_pad_add_mul(&mut coord_shift, &c, reps as f64);
                    detector_offset = detector_offset.saturating_add(d.saturating_mul(reps));
                }
                _ => {}
            }
        }
        (detector_offset, coord_shift)
    }

    /// One more than the largest detector id reachable in one execution,
    /// with loop shifts applied analytically.
    pub fn count_detectors(&self) -> u64 {
        let mut offset: u64 = 1;
        let mut max_num: u64 = 0;
        for inst in &self.instructions {
            match inst.kind {
                DemInstructionType::LogicalObservable => {}
                DemInstructionType::ShiftDetectors => {
                    offset = offset.saturating_add(self.targets_of(inst)[0].data);
                }
                DemInstructionType::RepeatBlock => {
                    let block = self.repeat_body_of(inst);
                    let n = block.count_detectors();
                    let reps = self.repeat_count_of(inst);
                    let block_shift = block.total_detector_shift();
                    offset = offset.saturating_add(block_shift.saturating_mul(reps));
                    if reps > 0 && n > 0 {
                        max_num = max_num.max(offset.saturating_add(n - 1) - block_shift);
                    }
                }
                DemInstructionType::Detector | DemInstructionType::Error => {
                    for t in self.targets_of(inst) {
                        if t.is_relative_detector_id() {
                            max_num = max_num.max(offset.saturating_add(t.raw_id()));
                        }
                    }
                }
            }
        }
        max_num
    }

    /// One more than the largest observable id mentioned anywhere.
    pub fn count_observables(&self) -> u64 {
        let mut max_num: u64 = 0;
        for inst in &self.instructions {
            match inst.kind {
                DemInstructionType::ShiftDetectors | DemInstructionType::Detector => {}
                DemInstructionType::RepeatBlock => {
                    max_num = max_num.max(self.repeat_body_of(inst).count_observables());
                }
                DemInstructionType::LogicalObservable | DemInstructionType::Error => {
                    for t in self.targets_of(inst) {
                        if t.is_observable_id() {
                            max_num = max_num.max(t.raw_id() + 1);
                        }
                    }
                }
            }
        }
        max_num
    }

    /// Number of error instructions one execution applies.
    pub fn count_errors(&self) -> u64 {
        let mut total: u64 = 0;
        for inst in &self.instructions {
            match inst.kind {
                DemInstructionType::RepeatBlock => {
                    let per = self.repeat_body_of(inst).count_errors();
                    total = total.saturating_add(per.saturating_mul(self.repeat_count_of(inst)));
                }
                DemInstructionType::Error => total = total.saturating_add(1),
                _ => {}
            }
        }
        total
    }

    // =========================================================================
    // Transformations.
    // =========================================================================

    /// A model with every repeat block unrolled and every detector id /
    /// coordinate shifted by the offsets accumulated at its point of
    /// execution. The result contains no repeat or shift instructions.
    pub fn flattened(&self) -> DetectorErrorModel {
        let mut result = DetectorErrorModel::new();
        let mut coord_shift = vec![];
        let mut detector_shift: u64 = 0;
        self.flatten_into(&mut coord_shift, &mut detector_shift, &mut result);
        result
    }

    fn flatten_into(
        &self,
        coord_shift: &mut Vec<f64>,
        detector_shift: &mut u64,
        out: &mut DetectorErrorModel,
    ) {
        for inst in &self.instructions {
            match inst.kind {
                DemInstructionType::ShiftDetectors => {
                    vec_pad_add_mul(coord_shift, self.args_of(inst), 1.0);
                    *detector_shift += self.targets_of(inst)[0].data;
                }
                DemInstructionType::RepeatBlock => {
                    let body = self.repeat_body_of(inst);
                    for _ in 0..self.repeat_count_of(inst) {
                        body.flatten_into(coord_shift, detector_shift, out);
                    }
                }
                DemInstructionType::LogicalObservable => {
                    out.push_instruction(inst.kind, &[], self.targets_of(inst));
                }
                DemInstructionType::Detector => {
                    let mut coords = self.args_of(inst).to_vec();
                    for (k, c) in coords.iter_mut().enumerate() {
                        if k < coord_shift.len() {
                            *c += coord_shift[k];
                        }
                    }
                    let mut targets = self.targets_of(inst).to_vec();
                    for t in &mut targets {
                        t.shift_if_detector_id(*detector_shift);
                    }
                    out.push_instruction(inst.kind, &coords, &targets);
                }
                DemInstructionType::Error => {
                    let mut targets = self.targets_of(inst).to_vec();
                    for t in &mut targets {
                        t.shift_if_detector_id(*detector_shift);
                    }
                    out.push_instruction(inst.kind, self.args_of(inst), &targets);
                }
            }
        }
    }

    /// A copy with every error probability rounded to `digits` decimal
    /// digits, recursing into repeat blocks.
    pub fn rounded(&self, digits: u8) -> DetectorErrorModel {
        let scale = 10f64.powi(digits as i32);
        let mut result = DetectorErrorModel::new();
        for inst in &self.instructions {
            match inst.kind {
                DemInstructionType::RepeatBlock => {
                    result
                        .append_repeat_block(
                            self.repeat_count_of(inst),
                            self.repeat_body_of(inst).rounded(digits),
                        )
                        .expect("repeat blocks of a valid model stay valid");
                }
                DemInstructionType::Error => {
                    let rounded_args: Vec<f64> = self
                        .args_of(inst)
                        .iter()
                        .map(|a| (a * scale).round() / scale)
                        .collect();
                    result.push_instruction(inst.kind, &rounded_args, self.targets_of(inst));
                }
                _ => {
                    result.push_instruction(inst.kind, self.args_of(inst), self.targets_of(inst));
                }
            }
        }
        result
    }

    /// Equality up to an absolute tolerance on instruction arguments.
    pub fn approx_equals(&self, other: &DetectorErrorModel, atol: f64) -> bool {
        if self.instructions.len() != other.instructions.len() {
            return false;
        }
        for (a, b) in self.instructions.iter().zip(&other.instructions) {
            if a.kind != b.kind {
                return false;
            }
            if a.kind == DemInstructionType::RepeatBlock {
                if self.repeat_count_of(a) != other.repeat_count_of(b)
                    || !self.repeat_body_of(a).approx_equals(other.repeat_body_of(b), atol)
                {
                    return false;
                }
                continue;
            }
            if self.targets_of(a) != other.targets_of(b) {
                return false;
            }
            let (xs, ys) = (self.args_of(a), other.args_of(b));
            if xs.len() != ys.len() || xs.iter().zip(ys).any(|(x, y)| (x - y).abs() > atol) {
                return false;
            }
        }
        true
    }

    /// The coordinates of each requested detector index.
    ///
    /// Indices a `shift_detectors` skips past, or that no `detector`
    /// instruction declares, get empty coordinate lists.
    pub fn detector_coordinates(
        &self,
        indices: &[u64],
    ) -> DemResult<FxHashMap<u64, Vec<f64>>> {
        let num_detectors = self.count_detectors();
        for &index in indices {
            if index >= num_detectors {
                return Err(DemError::DetectorIndexTooLarge {
                    index,
                    available: num_detectors,
                });
            }
        }

        let mut out = FxHashMap::default();
        let mut remaining: usize = indices.len();
        let mut coord_shift = vec![];
        let mut detector_offset: u64 = 0;
        self.coords_into(indices, &mut remaining, &mut coord_shift, &mut detector_offset, &mut out);
        for &index in indices {
            out.entry(index).or_default();
        }
        Ok(out)
    }

    fn coords_into(
        &self,
        indices: &[u64],
        remaining: &mut usize,
        coord_shift: &mut Vec<f64>,
        detector_offset: &mut u64,
        out: &mut FxHashMap<u64, Vec<f64>>,
    ) -> bool {
        for inst in &self.instructions {
            if *remaining == 0 {
                return true;
            }
            match inst.kind {
                DemInstructionType::ShiftDetectors => {
                    vec_pad_add_mul(coord_shift, self.args_of(inst), 1.0);
                    *detector_offset += self.targets_of(inst)[0].data;
                }
                DemInstructionType::Detector => {
                    for t in self.targets_of(inst) {
                        let index = t.raw_id() + *detector_offset;
                        if indices.contains(&index) && !out.contains_key(&index) {
                            let mut coords = self.args_of(inst).to_vec();
                            for (k, c) in coords.iter_mut().enumerate() {
                                if k < coord_shift.len() {
                                    *c += coord_shift[k];
                                }
                            }
                            out.insert(index, coords);
                            *remaining -= 1;
                        }
                    }
                }
                DemInstructionType::RepeatBlock => {
                    let body = self.repeat_body_of(inst);
                    for _ in 0..self.repeat_count_of(inst) {
                        if body.coords_into(indices, remaining, coord_shift, detector_offset, out) {
                            return true;
                        }
                    }
                }
                _ => {}
            }
        }
        *remaining == 0
    }
}

/// `accumulator[k] += scale * addend[k]`, growing the accumulator as needed.
fn vec_pad_add_mul(accumulator: &mut Vec<f64>, addend: &[f64], scale: f64) {
    while accumulator.len() < addend.len() {
        accumulator.push(0.0);
    }
    for (a, &b) in accumulator.iter_mut().zip(addend) {
        *a += scale * b;
    }
}

impl PartialEq for DetectorErrorModel {
    fn eq(&self, other: &Self) -> bool {
        if self.instructions.len() != other.instructions.len() {
            return false;
        }
        for (a, b) in self.instructions.iter().zip(&other.instructions) {
            if a.kind != b.kind {
                return false;
            }
            if a.kind == DemInstructionType::RepeatBlock {
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

impl FromStr for DetectorErrorModel {
    type Err = DemError;

    fn from_str(text: &str) -> DemResult<Self> {
        DetectorErrorModel::from_text(text)
    }
}

fn write_model(
    f: &mut fmt::Formatter<'_>,
    model: &DetectorErrorModel,
    indent: usize,
) -> fmt::Result {
    let mut first = true;
    for inst in &model.instructions {
        if !first {
            writeln!(f)?;
        }
        first = false;
        write!(f, "{:indent$}", "")?;
        match inst.kind {
            DemInstructionType::RepeatBlock => {
                writeln!(f, "repeat {} {{", model.repeat_count_of(inst))?;
                write_model(f, model.repeat_body_of(inst), indent + 4)?;
                writeln!(f)?;
                write!(f, "{:indent$}}}", "")?;
            }
            DemInstructionType::ShiftDetectors => {
                write!(f, "shift_detectors")?;
                write_args(f, model.args_of(inst))?;
                write!(f, " {}", model.targets_of(inst)[0].data)?;
            }
            kind => {
                write!(f, "{}", kind.name())?;
                write_args(f, model.args_of(inst))?;
                for t in model.targets_of(inst) {
                    write!(f, " {t}")?;
                }
            }
        }
    }
    Ok(())
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

impl fmt::Display for DetectorErrorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_model(f, self, 0)
    }
}

impl fmt::Debug for DetectorErrorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}
