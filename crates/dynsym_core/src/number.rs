//! Scalars produced by the evaluator.
//!
//! Integral literals stay integral as long as the arithmetic allows it, which is what
//! quantifier bounds rely on. As soon as one operand carries partials the result is a
//! [`Dual`], the plain operand being lifted with an empty derivative map.

use crate::autodiff::{Dual, Elementary};
use crate::error::{ModelError, Result, Span};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
    Dual(Dual),
}

impl Number {
    /// Parses a literal, as an integer when it is lexically integral.
    pub fn parse_literal(text: &str) -> Option<Number> {
        if let Ok(i) = text.parse::<i64>() {
            return Some(Number::Int(i));
        }
        text.parse::<f64>().ok().map(Number::Float)
    }

    pub fn nan() -> Number {
        Number::Float(f64::NAN)
    }

    pub fn value(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
            Number::Dual(d) => d.value,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn into_dual(self) -> Dual {
        match self {
            Number::Dual(d) => d,
            other => Dual::from(other.value()),
        }
    }

    pub fn is_dual(&self) -> bool {
        matches!(self, Number::Dual(_))
    }

    /// Binary arithmetic shared by every operator: integer fast path, dual path, float path.
    fn binary(
        self,
        rhs: Number,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
        dual_op: fn(&Dual, &Dual) -> Dual,
    ) -> Number {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => match int_op(a, b) {
                Some(i) => Number::Int(i),
                None => Number::Float(float_op(a as f64, b as f64)),
            },
            (a, b) if a.is_dual() || b.is_dual() => {
                Number::Dual(dual_op(&a.into_dual(), &b.into_dual()))
            }
            (a, b) => Number::Float(float_op(a.value(), b.value())),
        }
    }

    pub fn try_div(self, rhs: Number) -> Result<Number> {
        if rhs.value() == 0.0 {
            return Err(ModelError::DivisionByZero {
                location: Span::default(),
            });
        }
        if self.is_dual() || rhs.is_dual() {
            return self.into_dual().try_div(&rhs.into_dual()).map(Number::Dual);
        }
        Ok(Number::Float(self.value() / rhs.value()))
    }

    pub fn try_pow(self, exponent: Number) -> Result<Number> {
        if let (Number::Int(a), Number::Int(b)) = (&self, &exponent) {
            if let Some(p) = u32::try_from(*b).ok().and_then(|b| a.checked_pow(b)) {
                return Ok(Number::Int(p));
            }
        }
        // the dual path owns the domain checks
        let result = self.into_dual().try_pow(&exponent.into_dual())?;
        if result.is_constant() {
            Ok(Number::Float(result.value))
        } else {
            Ok(Number::Dual(result))
        }
    }

    pub fn apply(self, function: Elementary) -> Result<Number> {
        match self {
            Number::Dual(d) => d.apply(function).map(Number::Dual),
            other => function
                .eval(other.value(), false)
                .map(|(value, _)| Number::Float(value)),
        }
    }

    pub fn abs(self) -> Number {
        match self {
            Number::Int(i) => i.checked_abs().map_or(Number::Float((i as f64).abs()), Number::Int),
            Number::Float(f) => Number::Float(f.abs()),
            Number::Dual(d) => Number::Dual(d.abs()),
        }
    }

    pub fn floor(self) -> Number {
        match self {
            Number::Dual(d) => Number::Dual(d.floor()),
            other => integral(other.value().floor()),
        }
    }

    pub fn ceil(self) -> Number {
        match self {
            Number::Dual(d) => Number::Dual(d.ceil()),
            other => integral(other.value().ceil()),
        }
    }

    /// Ties go to `self`; with a dual operand the partials of the winner are kept.
    pub fn max(self, other: Number) -> Number {
        if self.is_dual() || other.is_dual() {
            return Number::Dual(self.into_dual().max(other.into_dual()));
        }
        if self.value() >= other.value() {
            self
        } else {
            other
        }
    }

    pub fn min(self, other: Number) -> Number {
        if self.is_dual() || other.is_dual() {
            return Number::Dual(self.into_dual().min(other.into_dual()));
        }
        if self.value() <= other.value() {
            self
        } else {
            other
        }
    }
}

fn integral(x: f64) -> Number {
    if x.is_finite() && x.abs() < i64::MAX as f64 {
        Number::Int(x as i64)
    } else {
        Number::Float(x)
    }
}

impl Add for Number {
    type Output = Number;
    fn add(self, rhs: Number) -> Number {
        self.binary(rhs, i64::checked_add, |a, b| a + b, |a, b| a + b)
    }
}

impl Sub for Number {
    type Output = Number;
    fn sub(self, rhs: Number) -> Number {
        self.binary(rhs, i64::checked_sub, |a, b| a - b, |a, b| a - b)
    }
}

impl Mul for Number {
    type Output = Number;
    fn mul(self, rhs: Number) -> Number {
        self.binary(rhs, i64::checked_mul, |a, b| a * b, |a, b| a * b)
    }
}

impl Neg for Number {
    type Output = Number;
    fn neg(self) -> Number {
        match self {
            Number::Int(i) => i.checked_neg().map_or(Number::Float(-(i as f64)), Number::Int),
            Number::Float(f) => Number::Float(-f),
            Number::Dual(d) => Number::Dual(-d),
        }
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::Float(value)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<Dual> for Number {
    fn from(value: Dual) -> Self {
        Number::Dual(value)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => write!(f, "{x}"),
            Number::Dual(d) => write!(f, "{} (+{} partials)", d.value, d.derivatives.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::DerivKey;

    #[test]
    fn literals_keep_their_integrality() {
        assert_eq!(Number::parse_literal("3"), Some(Number::Int(3)));
        assert_eq!(Number::parse_literal("0.5"), Some(Number::Float(0.5)));
        assert_eq!(Number::parse_literal("1e-3"), Some(Number::Float(0.001)));
        assert_eq!(Number::parse_literal("x"), None);
    }

    #[test]
    fn integer_arithmetic_stays_integral_except_division() {
        assert_eq!(Number::Int(2) + Number::Int(3), Number::Int(5));
        assert_eq!(Number::Int(2) * Number::Int(3), Number::Int(6));
        assert_eq!(Number::Int(2).try_pow(Number::Int(3)).unwrap(), Number::Int(8));
        assert_eq!(
            Number::Int(6).try_div(Number::Int(3)).unwrap(),
            Number::Float(2.0)
        );
        assert_eq!(Number::Int(i64::MAX) + Number::Int(1), Number::Float(i64::MAX as f64 + 1.0));
    }

    #[test]
    fn mixed_operands_lift_to_dual() {
        let x = Number::Dual(Dual::seeded(2.0, DerivKey::new("x", 0)));
        let y = Number::Int(3) * x;
        match y {
            Number::Dual(d) => {
                assert_eq!(d.value, 6.0);
                assert_eq!(d.derivative(&DerivKey::new("x", 0)), 3.0);
            }
            other => panic!("expected a dual, got {other:?}"),
        }
    }

    #[test]
    fn division_by_any_zero_fails() {
        for numerator in [Number::Int(1), Number::Float(-2.5), Number::Int(0)] {
            let err = numerator.try_div(Number::Float(0.0)).unwrap_err();
            assert!(matches!(err, ModelError::DivisionByZero { .. }));
        }
    }

    #[test]
    fn scalar_rounding_and_selection() {
        assert_eq!(Number::Float(1.7).floor(), Number::Int(1));
        assert_eq!(Number::Float(1.2).ceil(), Number::Int(2));
        assert_eq!(Number::Int(-4).abs(), Number::Int(4));
        assert_eq!(Number::Int(1).max(Number::Float(1.0)), Number::Int(1));
        assert_eq!(Number::Int(5).min(Number::Float(2.5)), Number::Float(2.5));
    }

    #[test]
    fn zero_to_a_negative_power_divides_by_zero() {
        let err = Number::Int(0).try_pow(Number::Int(-1)).unwrap_err();
        assert!(matches!(err, ModelError::DivisionByZero { .. }));
        let err = Number::Float(0.0).try_pow(Number::Float(-0.5)).unwrap_err();
        assert!(matches!(err, ModelError::DivisionByZero { .. }));
        assert_eq!(Number::Float(0.0).try_pow(Number::Int(0)).unwrap(), Number::Float(1.0));
    }

    #[test]
    fn negative_base_with_fractional_exponent_is_a_domain_error() {
        let err = Number::Float(-8.0).try_pow(Number::Float(0.5)).unwrap_err();
        assert!(matches!(err, ModelError::ArithmeticDomain { .. }));
        assert_eq!(
            Number::Float(-2.0).try_pow(Number::Int(2)).unwrap(),
            Number::Float(4.0)
        );
    }
}
