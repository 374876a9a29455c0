//! Dice-arithmetic expression language: validation, parsing, evaluation.
//!
//! The grammar is whitespace-separated `XdY` terms joined by `+`, `-` or `*`
//! with no precedence, folded strictly left to right. Integer constants are
//! legal only as the final term of an expression.

use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric sentinel returned to scripts when a dice expression fails to
/// validate.
pub const SENTINEL_BAD_DICE: i64 = -9999;

static XDY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([1-9][0-9]*)d([1-9][0-9]*)$").expect("xdy pattern"));
static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("integer pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("dice expression is empty")]
    Empty,
    #[error("malformed dice expression: {0}")]
    Malformed(String),
    #[error("invalid dice term: {term} in {expr}")]
    BadTerm { term: String, expr: String },
    #[error("invalid dice operator: {op} in {expr}")]
    BadOperator { op: String, expr: String },
    #[error("dice expression must begin with a die roll: {0}")]
    LeadingConstant(String),
    #[error("constant term must end the expression: {0}")]
    DanglingConstant(String),
}

/// Operator joining two adjacent terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiceOp {
    Add,
    Sub,
    Mul,
}

impl DiceOp {
    fn apply(self, acc: i64, next: i64) -> i64 {
        match self {
            Self::Add => acc.wrapping_add(next),
            Self::Sub => acc.wrapping_sub(next),
            Self::Mul => acc.wrapping_mul(next),
        }
    }
}

/// One term of a dice expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiceTerm {
    /// `count` independent samples of `uniform{1..=sides}`, summed.
    Roll { count: u32, sides: u32 },
    Constant(i64),
}

/// A validated, pre-parsed dice expression.
///
/// `ops[i]` joins `terms[i]` to `terms[i + 1]`, so `ops` is always exactly
/// one shorter than `terms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DicePlan {
    terms: Vec<DiceTerm>,
    ops: Vec<DiceOp>,
}

impl DicePlan {
    /// The plan for a uniform table: one die with as many sides as the
    /// table has entries.
    pub fn uniform(sides: usize) -> Self {
        Self {
            terms: vec![DiceTerm::Roll {
                count: 1,
                sides: sides as u32,
            }],
            ops: Vec::new(),
        }
    }

    /// Validate and parse an expression such as `2d6 + 1d4 - 3`.
    pub fn parse(expr: &str) -> Result<Self, DiceError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(DiceError::Empty);
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        // xdy (op term)* always has an odd token count; an even count means
        // a trailing operator or missing term.
        if tokens.len() % 2 == 0 {
            return Err(DiceError::Malformed(expr.to_string()));
        }

        let mut terms = Vec::with_capacity(tokens.len() / 2 + 1);
        let mut ops = Vec::with_capacity(tokens.len() / 2);
        let mut i = 0;
        while i < tokens.len() {
            let tok = tokens[i];

            if INTEGER.is_match(tok) {
                if terms.is_empty() {
                    return Err(DiceError::LeadingConstant(expr.to_string()));
                }
                if i + 1 != tokens.len() {
                    return Err(DiceError::DanglingConstant(expr.to_string()));
                }
                let value = tok.parse::<i64>().map_err(|_| DiceError::BadTerm {
                    term: tok.to_string(),
                    expr: expr.to_string(),
                })?;
                terms.push(DiceTerm::Constant(value));
                break;
            }

            let Some(caps) = XDY.captures(tok) else {
                return Err(DiceError::BadTerm {
                    term: tok.to_string(),
                    expr: expr.to_string(),
                });
            };
            let count = caps[1].parse::<u32>().map_err(|_| DiceError::BadTerm {
                term: tok.to_string(),
                expr: expr.to_string(),
            })?;
            let sides = caps[2].parse::<u32>().map_err(|_| DiceError::BadTerm {
                term: tok.to_string(),
                expr: expr.to_string(),
            })?;
            terms.push(DiceTerm::Roll { count, sides });

            if i + 1 < tokens.len() {
                let op = match tokens[i + 1] {
                    "+" => DiceOp::Add,
                    "-" => DiceOp::Sub,
                    "*" => DiceOp::Mul,
                    other => {
                        return Err(DiceError::BadOperator {
                            op: other.to_string(),
                            expr: expr.to_string(),
                        })
                    }
                };
                ops.push(op);
                i += 2;
            } else {
                i += 1;
            }
        }

        Ok(Self { terms, ops })
    }

    /// Evaluate the plan, folding term results left to right.
    pub fn roll(&self, rng: &mut impl Rng) -> i64 {
        let mut values = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            values.push(match term {
                DiceTerm::Roll { count, sides } => {
                    let mut sum = 0i64;
                    for _ in 0..*count {
                        sum += rng.gen_range(1..=i64::from(*sides));
                    }
                    sum
                }
                DiceTerm::Constant(c) => *c,
            });
        }

        let Some(&first) = values.first() else {
            return 0;
        };
        let mut total = first;
        for (op, value) in self.ops.iter().zip(values.iter().skip(1)) {
            total = op.apply(total, *value);
        }
        total
    }

    /// The closed interval every evaluation of this plan falls into, under
    /// the same left-to-right folding as `roll`.
    pub fn bounds(&self) -> (i64, i64) {
        let term_bounds = |term: &DiceTerm| match term {
            DiceTerm::Roll { count, sides } => (
                i64::from(*count),
                i64::from(*count) * i64::from(*sides),
            ),
            DiceTerm::Constant(c) => (*c, *c),
        };

        let Some(first) = self.terms.first() else {
            return (0, 0);
        };
        let (mut lo, mut hi) = term_bounds(first);
        for (op, term) in self.ops.iter().zip(self.terms.iter().skip(1)) {
            let (nlo, nhi) = term_bounds(term);
            let candidates = [
                op.apply(lo, nlo),
                op.apply(lo, nhi),
                op.apply(hi, nlo),
                op.apply(hi, nhi),
            ];
            lo = candidates.iter().copied().min().unwrap_or(lo);
            hi = candidates.iter().copied().max().unwrap_or(hi);
        }
        (lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn parse_single_die() {
        let plan = DicePlan::parse("1d6").unwrap();
        assert_eq!(plan.bounds(), (1, 6));
    }

    #[test]
    fn parse_compound_with_constant() {
        let plan = DicePlan::parse("2d6 + 3").unwrap();
        assert_eq!(plan.bounds(), (5, 15));
    }

    #[test]
    fn parse_rejects_even_token_count() {
        assert_eq!(
            DicePlan::parse("1d6 +"),
            Err(DiceError::Malformed("1d6 +".to_string()))
        );
    }

    #[test]
    fn parse_rejects_empty() {
        assert_eq!(DicePlan::parse(""), Err(DiceError::Empty));
        assert_eq!(DicePlan::parse("   "), Err(DiceError::Empty));
    }

    #[test]
    fn parse_rejects_leading_constant() {
        assert!(matches!(
            DicePlan::parse("3"),
            Err(DiceError::LeadingConstant(_))
        ));
        assert!(matches!(
            DicePlan::parse("3 + 1d4"),
            Err(DiceError::LeadingConstant(_))
        ));
    }

    #[test]
    fn parse_rejects_constant_mid_expression() {
        assert!(matches!(
            DicePlan::parse("1d4 + 3 * 1d6"),
            Err(DiceError::DanglingConstant(_))
        ));
    }

    #[test]
    fn parse_rejects_zero_count_or_sides() {
        assert!(matches!(DicePlan::parse("0d6"), Err(DiceError::BadTerm { .. })));
        assert!(matches!(DicePlan::parse("1d0"), Err(DiceError::BadTerm { .. })));
        assert!(matches!(DicePlan::parse("1d"), Err(DiceError::BadTerm { .. })));
        assert!(matches!(DicePlan::parse("d6"), Err(DiceError::BadTerm { .. })));
    }

    #[test]
    fn parse_rejects_unknown_operator() {
        assert!(matches!(
            DicePlan::parse("1d6 / 1d4"),
            Err(DiceError::BadOperator { .. })
        ));
    }

    #[test]
    fn roll_one_sided_die_is_deterministic() {
        let plan = DicePlan::parse("1d1").unwrap();
        assert_eq!(plan.roll(&mut rng()), 1);
    }

    #[test]
    fn roll_times_zero_is_zero() {
        let plan = DicePlan::parse("5d6 * 0").unwrap();
        let mut r = rng();
        for _ in 0..20 {
            assert_eq!(plan.roll(&mut r), 0);
        }
    }

    #[test]
    fn roll_stays_within_bounds() {
        let plan = DicePlan::parse("2d6 + 1d4 - 2").unwrap();
        let (lo, hi) = plan.bounds();
        let mut r = rng();
        for _ in 0..500 {
            let v = plan.roll(&mut r);
            assert!(v >= lo && v <= hi, "{v} outside [{lo}, {hi}]");
        }
    }

    #[test]
    fn fold_is_left_to_right_without_precedence() {
        // 1d1 + 1d1 * 2 folds as (1 + 1) * 2, not 1 + (1 * 2).
        let plan = DicePlan::parse("1d1 + 1d1 * 2").unwrap();
        assert_eq!(plan.roll(&mut rng()), 4);
    }

    #[test]
    fn uniform_plan_covers_entry_count() {
        let plan = DicePlan::uniform(8);
        assert_eq!(plan.bounds(), (1, 8));
        let mut r = rng();
        for _ in 0..200 {
            let v = plan.roll(&mut r);
            assert!((1..=8).contains(&v));
        }
    }

    #[test]
    fn subtraction_can_go_negative() {
        let plan = DicePlan::parse("1d1 - 5").unwrap();
        assert_eq!(plan.roll(&mut rng()), -4);
        assert_eq!(plan.bounds(), (-4, -4));
    }
}
