//! Recursive-descent parser for the error-model text format.

use crate::error::{DemError, DemResult};
use crate::lexer::{SpannedToken, Token, tokenize};
use crate::model::DetectorErrorModel;
use crate::target::DemTarget;

/// Parses a complete detector error model from its text form.
pub fn parse_detector_error_model(text: &str) -> DemResult<DetectorErrorModel> {
    let mut parser = Parser::new(text)?;
    let mut model = DetectorErrorModel::new();
    parser.parse_block_contents(&mut model, false)?;
    Ok(model)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> DemResult<Self> {
        let tokens =
            tokenize(source).map_err(|(snippet, line)| DemError::InvalidToken { snippet, line })?;
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

    fn unexpected(&self, expected: &str) -> DemError {
        match self.peek() {
            Some(found) => DemError::UnexpectedToken {
                line: self.line(),
                expected: expected.to_string(),
                found: found.to_string(),
            },
            None => DemError::UnexpectedEof(format!("expected {expected}")),
        }
    }

    fn skip_blank_lines(&mut self) {
        while self.consume(&Token::Newline) {}
    }

    fn parse_block_contents(
        &mut self,
        model: &mut DetectorErrorModel,
        inside_block: bool,
    ) -> DemResult<()> {
        loop {
            self.skip_blank_lines();
            match self.peek() {
                None => {
                    if inside_block {
                        return Err(DemError::UnexpectedEof(
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
                _ => self.parse_instruction_line(model)?,
            }
        }
    }

    fn parse_instruction_line(&mut self, model: &mut DetectorErrorModel) -> DemResult<()> {
        let line = self.line();
        let name = match self.advance() {
            Some(Token::Identifier(name)) => name.to_ascii_lowercase(),
            Some(_) => {
                self.pos -= 1;
                return Err(self.unexpected("an instruction name"));
            }
            None => return Err(self.unexpected("an instruction name")),
        };

        match name.as_str() {
            "error" => {
                let args = self.parse_parens_args()?;
                if args.len() != 1 {
                    return Err(DemError::MalformedInstruction {
                        instruction: "error",
                        problem: format!("expected exactly 1 argument, got {}", args.len()),
                    });
                }
                let targets = self.parse_symptom_targets()?;
                self.expect_end_of_line()?;
                model.append_error(args[0], &targets)
            }
            "detector" => {
                let args = self.parse_parens_args()?;
                let target = self.parse_one_symptom_target("a detector id")?;
                self.expect_end_of_line()?;
                model.append_detector(&args, target)
            }
            "logical_observable" => {
                let target = self.parse_one_symptom_target("an observable id")?;
                self.expect_end_of_line()?;
                model.append_logical_observable(target)
            }
            "shift_detectors" => {
                let args = self.parse_parens_args()?;
                let shift = match self.advance() {
                    Some(Token::Int(v)) => v,
                    Some(_) => {
                        self.pos -= 1;
                        return Err(self.unexpected("a detector shift"));
                    }
                    None => return Err(self.unexpected("a detector shift")),
                };
                self.expect_end_of_line()?;
                model.append_shift_detectors(&args, shift);
                Ok(())
            }
            "repeat" => {
                let reps = match self.advance() {
                    Some(Token::Int(n)) => n,
                    Some(_) => {
                        self.pos -= 1;
                        return Err(self.unexpected("a repetition count"));
                    }
                    None => return Err(self.unexpected("a repetition count")),
                };
                if reps == 0 {
                    return Err(DemError::ZeroRepeatCount);
                }
                if !self.consume(&Token::LBrace) {
                    return Err(self.unexpected("'{' after the repetition count"));
                }
                if !self.consume(&Token::Newline) && self.peek().is_some() {
                    return Err(self.unexpected("a newline after '{'"));
                }
                let mut body = DetectorErrorModel::new();
                self.parse_block_contents(&mut body, true)?;
                model.append_repeat_block(reps, body)
            }
            _ => Err(DemError::UnknownInstruction { name, line }),
        }
    }

    fn parse_parens_args(&mut self) -> DemResult<Vec<f64>> {
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

    fn parse_symptom_targets(&mut self) -> DemResult<Vec<DemTarget>> {
        let mut targets = vec![];
        loop {
            match self.peek() {
                None | Some(Token::Newline) | Some(Token::RBrace) => return Ok(targets),
                Some(Token::Caret) => {
                    self.pos += 1;
                    targets.push(DemTarget::separator());
                }
                Some(Token::Identifier(_)) => {
                    let target = self.parse_one_symptom_target("a detector or observable id")?;
                    targets.push(target);
                }
                _ => return Err(self.unexpected("a detector or observable id")),
            }
        }
    }

    fn parse_one_symptom_target(&mut self, expected: &str) -> DemResult<DemTarget> {
        let word = match self.advance() {
            Some(Token::Identifier(word)) => word,
            Some(_) => {
                self.pos -= 1;
                return Err(self.unexpected(expected));
            }
            None => return Err(self.unexpected(expected)),
        };
        let mut chars = word.chars();
        let prefix = chars.next();
        let digits = chars.as_str();
        let id: Option<u64> = if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            None
        } else {
            digits.parse().ok()
        };
        match (prefix, id) {
            (Some('D') | Some('d'), Some(id)) => Ok(DemTarget::relative_detector_id(id)),
            (Some('L') | Some('l'), Some(id)) => Ok(DemTarget::observable_id(id)),
            _ => {
                self.pos -= 1;
                Err(self.unexpected(expected))
            }
        }
    }

    fn expect_end_of_line(&mut self) -> DemResult<()> {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> DetectorErrorModel {
        parse_detector_error_model(text).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let text = "error(0.125) D0 D1 ^ L0\ndetector(1, 2) D0\nshift_detectors(1.5) 2\nlogical_observable L0";
        assert_eq!(parse(text).to_string(), text);
    }

    #[test]
    fn test_repeat_round_trip() {
        let text = "repeat 100 {\n    error(0.25) D0 D1\n    shift_detectors 1\n}";
        assert_eq!(parse(text).to_string(), text);
    }

    #[test]
    fn test_comments_blank_lines_and_case() {
        let model = parse("\n# intro\nERROR(0.25) D0 # trailing\n\n");
        assert_eq!(model.to_string(), "error(0.25) D0");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse_detector_error_model("oops(0.1) D0"),
            Err(DemError::UnknownInstruction { .. })
        ));
        assert!(matches!(
            parse_detector_error_model("error(1.5) D0"),
            Err(DemError::InvalidProbability(_))
        ));
        assert!(parse_detector_error_model("error(0.1) ^ D0").is_err());
        assert!(parse_detector_error_model("error(0.1) D0 ^ ^ D1").is_err());
        assert!(parse_detector_error_model("error(0.1, 0.2) D0").is_err());
        assert!(parse_detector_error_model("repeat 0 {\n    error(0.1) D0\n}").is_err());
        assert!(parse_detector_error_model("repeat 5 {\n    error(0.1) D0").is_err());
        assert!(parse_detector_error_model("detector L0").is_err());
        assert!(parse_detector_error_model("error(0.1) Q5").is_err());
    }

    #[test]
    fn test_scientific_notation_probabilities() {
        let model = parse("error(1e-3) D0");
        let inst = model.instructions()[0];
        assert!((model.args_of(&inst)[0] - 1e-3).abs() < 1e-12);
    }
}
