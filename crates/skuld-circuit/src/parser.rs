//! Recursive-descent parser for the circuit text format.

use crate::circuit::Circuit;
use crate::error::{CircuitError, CircuitResult};
use crate::gate::{GateFlags, GateId};
use crate::lexer::{SpannedToken, Token, tokenize};
use crate::target::{GateTarget, TARGET_VALUE_MASK};

use skuld_stab::Pauli;

/// Parses a complete circuit from its text form.
pub fn parse_circuit(text: &str) -> CircuitResult<Circuit> {
    parse_circuit_with_context(text, 0)
}

/// Parses a circuit that continues an existing execution:
/// `prior_measurements` results are already in the record, so lookbacks may
/// reach that far past the start of this text.
pub fn parse_circuit_with_context(text: &str, prior_measurements: u64) -> CircuitResult<Circuit> {
    let mut parser = Parser::new(text)?;
    let mut circuit = Circuit::new();
    let mut measurements: u64 = prior_measurements;
    parser.parse_block_contents(&mut circuit, &mut measurements, false)?;
    Ok(circuit)
}

/// Parser state over the token list.
struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> CircuitResult<Self> {
        let tokens = tokenize(source).map_err(|(snippet, line)| CircuitError::InvalidToken {
            snippet,
            line,
        })?;
        Ok(Self { tokens, pos: 0 })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map_or(1, |t| t.line)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos)?.token.clone();
        self.pos += 1;
        Some(token)
    }

    fn consume(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> CircuitError {
        match self.peek() {
            Some(found) => CircuitError::UnexpectedToken {
                line: self.line(),
                expected: expected.to_string(),
                found: found.to_string(),
            },
            None => CircuitError::UnexpectedEof(format!("expected {expected}")),
        }
    }

    fn skip_blank_lines(&mut self) {
        while self.consume(&Token::Newline) {}
    }

    /// Parses instructions until end of input, or until the closing `}` when
    /// inside a repeat block. `measurements` runs through the parse so
    /// record lookbacks can be bounds-checked where they appear.
    fn parse_block_contents(
        &mut self,
        circuit: &mut Circuit,
        measurements: &mut u64,
        inside_block: bool,
    ) -> CircuitResult<()> {
        loop {
            self.skip_blank_lines();
            match self.peek() {
                None => {
                    if inside_block {
                        return Err(CircuitError::UnexpectedEof(
                            "a repeat block is missing its closing '}'".to_string(),
                        ));
                    }
                    return Ok(());
                }
                Some(Token::RBrace) => {
                    if inside_block {
                        self.pos += 1;
                        return Ok(());
                    }
                    return Err(self.unexpected("an instruction"));
                }
                _ => self.parse_instruction_line(circuit, measurements)?,
            }
        }
    }

    fn parse_instruction_line(
        &mut self,
        circuit: &mut Circuit,
        measurements: &mut u64,
    ) -> CircuitResult<()> {
        let line = self.line();
        let name = match self.advance() {
            Some(Token::Identifier(name)) => name,
            _ => {
                self.pos -= 1;
                return Err(self.unexpected("an instruction name"));
            }
        };
        let gate = GateId::from_name(&name).ok_or(CircuitError::UnknownGate {
            name: name.clone(),
            line,
        })?;

        if gate == GateId::Repeat {
            return self.parse_repeat_block(circuit, measurements);
        }

        let args = self.parse_parens_args()?;
        let targets = self.parse_targets(gate, *measurements)?;
        self.expect_end_of_line()?;

        circuit.append(gate, &targets, &args)?;
        let produced = circuit.measurement_count_of(circuit.instructions().last().unwrap());
        // Fused instructions share one entry, so count just this line's
        // contribution.
        let this_line = if gate.data().flags.contains(GateFlags::PRODUCES_RESULTS) {
            if gate.data().flags.contains(GateFlags::TARGETS_COMBINERS) {
                let combiners = targets.iter().filter(|t| t.is_combiner()).count() as u64;
                targets.len() as u64 - 2 * combiners
            } else {
                targets.len() as u64
            }
        } else {
            0
        };
        debug_assert!(produced >= this_line);
        *measurements = measurements.saturating_add(this_line);
        Ok(())
    }

    fn parse_repeat_block(
        &mut self,
        circuit: &mut Circuit,
        measurements: &mut u64,
    ) -> CircuitResult<()> {
        let reps = match self.advance() {
            Some(Token::Int(n)) => n,
            Some(_) => {
                self.pos -= 1;
                return Err(self.unexpected("a repetition count"));
            }
            None => return Err(self.unexpected("a repetition count")),
        };
        if reps == 0 {
            return Err(CircuitError::ZeroRepeatCount);
        }
        if !self.consume(&Token::LBrace) {
            return Err(self.unexpected("'{' on the same line as REPEAT"));
        }
        if !self.consume(&Token::Newline) && self.peek().is_some() {
            return Err(self.unexpected("a newline after '{'"));
        }

        let before = *measurements;
        let mut body = Circuit::new();
        self.parse_block_contents(&mut body, measurements, true)?;
        let per_iteration = *measurements - before;
        *measurements = before.saturating_add(per_iteration.saturating_mul(reps));

        circuit.append_repeat_block(reps, body)
    }

    fn parse_parens_args(&mut self) -> CircuitResult<Vec<f64>> {
        let mut args = vec![];
        if !self.consume(&Token::LParen) {
            return Ok(args);
        }
        loop {
            let negative = self.consume(&Token::Minus);
            let value = match self.advance() {
                Some(Token::Float(v)) => v,
                Some(Token::Int(v)) => v as f64,
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.unexpected("a numeric argument"));
                }
                None => return Err(self.unexpected("a numeric argument")),
            };
            args.push(if negative { -value } else { value });
            if self.consume(&Token::Comma) {
                continue;
            }
            if self.consume(&Token::RParen) {
                return Ok(args);
            }
            return Err(self.unexpected("',' or ')'"));
        }
    }

    fn parse_targets(&mut self, gate: GateId, measurements: u64) -> CircuitResult<Vec<GateTarget>> {
        let mut targets = vec![];
        loop {
            match self.peek() {
                None | Some(Token::Newline) | Some(Token::RBrace) => return Ok(targets),
                Some(Token::Int(_)) => {
                    let Some(Token::Int(q)) = self.advance() else {
                        unreachable!()
                    };
                    targets.push(GateTarget::qubit(checked_qubit(q)?));
                }
                Some(Token::Bang) => {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Int(q)) => {
                            targets.push(GateTarget::inverted_qubit(checked_qubit(q)?));
                        }
                        Some(Token::Identifier(word)) => {
                            let (p, q) = parse_pauli_word(&word)
                                .ok_or_else(|| self.unexpected("a Pauli target after '!'"))?;
                            targets.push(GateTarget::pauli(checked_qubit(q)?, p, true));
                        }
                        Some(_) => {
                            self.pos -= 1;
                            return Err(self.unexpected("a target after '!'"));
                        }
                        None => return Err(self.unexpected("a target after '!'")),
                    }
                }
                Some(Token::Star) => {
                    self.pos += 1;
                    targets.push(GateTarget::combiner());
                }
                Some(Token::Identifier(word)) => {
                    let word = word.clone();
                    self.pos += 1;
                    if word.eq_ignore_ascii_case("rec") {
                        let k = self.parse_bracketed_lookback()?;
                        if k > measurements {
                            return Err(CircuitError::LookbackOutOfRange {
                                lookback: k,
                                available: measurements,
                            });
                        }
                        targets.push(GateTarget::rec(k as u32));
                    } else if word.eq_ignore_ascii_case("sweep") {
                        let k = self.parse_bracketed_index()?;
                        targets.push(GateTarget::sweep(checked_qubit(k)?));
                    } else if let Some((p, q)) = parse_pauli_word(&word) {
                        targets.push(GateTarget::pauli(checked_qubit(q)?, p, false));
                    } else {
                        self.pos -= 1;
                        return Err(self.unexpected(&format!("a target for {}", gate.name())));
                    }
                }
                _ => return Err(self.unexpected(&format!("a target for {}", gate.name()))),
            }
        }
    }

    /// `[-k]` with `1 ≤ k < 2^24`.
    fn parse_bracketed_lookback(&mut self) -> CircuitResult<u64> {
        if !self.consume(&Token::LBracket) {
            return Err(self.unexpected("'['"));
        }
        if !self.consume(&Token::Minus) {
            return Err(self.unexpected("a negative lookback"));
        }
        let k = match self.advance() {
            Some(Token::Int(k)) => k,
            Some(_) => {
                self.pos -= 1;
                return Err(self.unexpected("a lookback distance"));
            }
            None => return Err(self.unexpected("a lookback distance")),
        };
        if !self.consume(&Token::RBracket) {
            return Err(self.unexpected("']'"));
        }
        if k == 0 || k >= TARGET_VALUE_MASK as u64 {
            return Err(CircuitError::LookbackOutOfRange {
                lookback: k,
                available: TARGET_VALUE_MASK as u64 - 1,
            });
        }
        Ok(k)
    }

    /// `[k]` with `k ≥ 0`.
    fn parse_bracketed_index(&mut self) -> CircuitResult<u64> {
        if !self.consume(&Token::LBracket) {
            return Err(self.unexpected("'['"));
        }
        let k = match self.advance() {
            Some(Token::Int(k)) => k,
            Some(_) => {
                self.pos -= 1;
                return Err(self.unexpected("a sweep-bit index"));
            }
            None => return Err(self.unexpected("a sweep-bit index")),
        };
        if !self.consume(&Token::RBracket) {
            return Err(self.unexpected("']'"));
        }
        Ok(k)
    }

    fn expect_end_of_line(&mut self) -> CircuitResult<()> {
        match self.peek() {
            None | Some(Token::RBrace) => Ok(()),
            Some(Token::Newline) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.unexpected("end of line")),
        }
    }
}

fn checked_qubit(q: u64) -> CircuitResult<u32> {
    if q > TARGET_VALUE_MASK as u64 {
        return Err(CircuitError::QubitTooLarge { qubit: q });
    }
    Ok(q as u32)
}

/// Splits `X5` / `y12` / `Z0` into its Pauli letter and qubit index.
fn parse_pauli_word(word: &str) -> Option<(Pauli, u64)> {
    let mut chars = word.chars();
    let letter = chars.next()?;
    let pauli = match letter {
        'X' | 'x' => Pauli::X,
        'Y' | 'y' => Pauli::Y,
        'Z' | 'z' => Pauli::Z,
        _ => return None,
    };
    let digits = chars.as_str();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((pauli, digits.parse().ok()?))
}
