use crate::error::{ModelError, Result, Span};
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// Identifies one partial derivative: a symbol observed at a given shift.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DerivKey {
    pub name: String,
    pub shift: i64,
}

impl DerivKey {
    pub fn new(name: impl Into<String>, shift: i64) -> Self {
        Self {
            name: name.into(),
            shift,
        }
    }
}

impl fmt::Display for DerivKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shift {
            0 => write!(f, "{}[t]", self.name),
            s if s > 0 => write!(f, "{}[t+{}]", self.name, s),
            s => write!(f, "{}[t{}]", self.name, s),
        }
    }
}

/// Dual number for forward mode AD with a sparse set of partials.
/// value: real part
/// derivatives: one coefficient per seeded key, absent keys are zero
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dual {
    pub value: f64,
    pub derivatives: BTreeMap<DerivKey, f64>,
}

impl Dual {
    pub fn new(value: f64, derivatives: BTreeMap<DerivKey, f64>) -> Self {
        Self { value, derivatives }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(value, BTreeMap::new())
    }

    /// A value carrying a unit derivative with respect to `key`.
    pub fn seeded(value: f64, key: DerivKey) -> Self {
        Self::new(value, BTreeMap::from([(key, 1.0)]))
    }

    pub fn derivative(&self, key: &DerivKey) -> f64 {
        self.derivatives.get(key).copied().unwrap_or(0.0)
    }

    pub fn is_constant(&self) -> bool {
        self.derivatives.is_empty()
    }

    /// Chain rule for a unary function with derivative `slope` at `self.value`.
    fn chain(&self, value: f64, slope: f64) -> Self {
        let derivatives = self
            .derivatives
            .iter()
            .map(|(k, d)| (k.clone(), d * slope))
            .collect();
        Self::new(value, derivatives)
    }

    /// Combines the partials of both operands over the union of their keys.
    fn merge(&self, rhs: &Dual, value: f64, rule: impl Fn(f64, f64) -> f64) -> Self {
        let mut derivatives = BTreeMap::new();
        for key in self.derivatives.keys().chain(rhs.derivatives.keys()) {
            if derivatives.contains_key(key) {
                continue;
            }
            let d = rule(self.derivative(key), rhs.derivative(key));
            derivatives.insert(key.clone(), d);
        }
        Self::new(value, derivatives)
    }

    pub fn try_div(&self, rhs: &Dual) -> Result<Dual> {
        let (a, b) = (self.value, rhs.value);
        if b == 0.0 {
            return Err(ModelError::DivisionByZero {
                location: Span::default(),
            });
        }
        Ok(self.merge(rhs, a / b, |da, db| (da * b - db * a) / (b * b)))
    }

    pub fn try_pow(&self, exponent: &Dual) -> Result<Dual> {
        let (a, b) = (self.value, exponent.value);
        if a == 0.0 && b < 0.0 {
            return Err(ModelError::DivisionByZero {
                location: Span::default(),
            });
        }
        if a < 0.0 && b.fract() != 0.0 {
            return Err(ModelError::ArithmeticDomain {
                function: "pow",
                argument: a,
            });
        }
        if exponent.is_zero() {
            return Ok(Dual::one());
        }
        let value = a.powf(b);

        if exponent.is_constant() {
            // d(a^n) = n a^(n-1) da
            return Ok(self.chain(value, b * a.powf(b - 1.0)));
        }

        // d(a^b) = a^b (db ln a + b da / a)
        if a <= 0.0 {
            return Err(ModelError::ArithmeticDomain {
                function: "pow",
                argument: a,
            });
        }
        let ln_a = a.ln();
        Ok(self.merge(exponent, value, |da, db| {
            value * (db * ln_a + b * da / a)
        }))
    }

    pub fn apply(&self, function: Elementary) -> Result<Dual> {
        let (value, slope) = function.eval(self.value, !self.is_constant())?;
        Ok(self.chain(value, slope))
    }

    /// Sign is taken as +1 at exactly zero.
    pub fn abs(&self) -> Dual {
        let sign = if self.value >= 0.0 { 1.0 } else { -1.0 };
        self.chain(self.value.abs(), sign)
    }

    /// Floor with a derivative pinned to zero, including at integers.
    pub fn floor(&self) -> Dual {
        self.chain(self.value.floor(), 0.0)
    }

    pub fn ceil(&self) -> Dual {
        self.chain(self.value.ceil(), 0.0)
    }

    /// Keeps the partials of the selected operand only. Ties go to `self`.
    pub fn max(self, other: Dual) -> Dual {
        if self.value >= other.value {
            self
        } else {
            other
        }
    }

    pub fn min(self, other: Dual) -> Dual {
        if self.value <= other.value {
            self
        } else {
            other
        }
    }
}

impl<'a> Add<&'a Dual> for &'a Dual {
    type Output = Dual;
    fn add(self, rhs: &'a Dual) -> Dual {
        self.merge(rhs, self.value + rhs.value, |da, db| da + db)
    }
}

impl<'a> Sub<&'a Dual> for &'a Dual {
    type Output = Dual;
    fn sub(self, rhs: &'a Dual) -> Dual {
        self.merge(rhs, self.value - rhs.value, |da, db| da - db)
    }
}

impl<'a> Mul<&'a Dual> for &'a Dual {
    type Output = Dual;
    fn mul(self, rhs: &'a Dual) -> Dual {
        let (a, b) = (self.value, rhs.value);
        self.merge(rhs, a * b, |da, db| da * b + db * a)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        &self + &rhs
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        &self - &rhs
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        &self * &rhs
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        self.chain(-self.value, -1.0)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.value == 0.0 && self.derivatives.values().all(|d| *d == 0.0)
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl From<f64> for Dual {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

/// Transcendental functions with a closed-form derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elementary {
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Asin,
    Acos,
    Atan,
    Exp,
    Log,
    Log10,
    Log2,
    Sqrt,
}

impl Elementary {
    pub fn name(self) -> &'static str {
        match self {
            Elementary::Sin => "sin",
            Elementary::Cos => "cos",
            Elementary::Tan => "tan",
            Elementary::Sinh => "sinh",
            Elementary::Cosh => "cosh",
            Elementary::Tanh => "tanh",
            Elementary::Asin => "asin",
            Elementary::Acos => "acos",
            Elementary::Atan => "atan",
            Elementary::Exp => "exp",
            Elementary::Log => "log",
            Elementary::Log10 => "log10",
            Elementary::Log2 => "log2",
            Elementary::Sqrt => "sqrt",
        }
    }

    /// Returns `(f(x), f'(x))`. When `differentiable` is set the domain excludes
    /// the points where the derivative is infinite.
    pub fn eval(self, x: f64, differentiable: bool) -> Result<(f64, f64)> {
        let domain = |ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(ModelError::ArithmeticDomain {
                    function: self.name(),
                    argument: x,
                })
            }
        };

        // NaN stands in for an unresolved lax lookup and propagates unchanged
        if x.is_nan() {
            return Ok((f64::NAN, f64::NAN));
        }

        let pair = match self {
            Elementary::Sin => (x.sin(), x.cos()),
            Elementary::Cos => (x.cos(), -x.sin()),
            Elementary::Tan => {
                let c = x.cos();
                (x.tan(), 1.0 / (c * c))
            }
            Elementary::Sinh => (x.sinh(), x.cosh()),
            Elementary::Cosh => (x.cosh(), x.sinh()),
            Elementary::Tanh => {
                let t = x.tanh();
                (t, 1.0 - t * t)
            }
            Elementary::Asin => {
                domain(if differentiable { x.abs() < 1.0 } else { x.abs() <= 1.0 })?;
                (x.asin(), 1.0 / (1.0 - x * x).sqrt())
            }
            Elementary::Acos => {
                domain(if differentiable { x.abs() < 1.0 } else { x.abs() <= 1.0 })?;
                (x.acos(), -1.0 / (1.0 - x * x).sqrt())
            }
            Elementary::Atan => (x.atan(), 1.0 / (1.0 + x * x)),
            Elementary::Exp => {
                let e = x.exp();
                (e, e)
            }
            Elementary::Log => {
                domain(x > 0.0)?;
                (x.ln(), 1.0 / x)
            }
            Elementary::Log10 => {
                domain(x > 0.0)?;
                (x.log10(), 1.0 / (x * std::f64::consts::LN_10))
            }
            Elementary::Log2 => {
                domain(x > 0.0)?;
                (x.log2(), 1.0 / (x * std::f64::consts::LN_2))
            }
            Elementary::Sqrt => {
                domain(if differentiable { x > 0.0 } else { x >= 0.0 })?;
                let s = x.sqrt();
                (s, 0.5 / s)
            }
        };
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x_at(value: f64) -> Dual {
        Dual::seeded(value, DerivKey::new("x", 0))
    }

    fn dx(d: &Dual) -> f64 {
        d.derivative(&DerivKey::new("x", 0))
    }

    #[test]
    fn chain_rule_through_sin_and_exp() {
        let x = x_at(0.5);
        let squared = &x * &x;
        let f = squared.apply(Elementary::Sin).unwrap() + x.apply(Elementary::Exp).unwrap();

        let expected_value = 0.25_f64.sin() + 0.5_f64.exp();
        let expected_slope = 2.0 * 0.5 * 0.25_f64.cos() + 0.5_f64.exp();
        assert!((f.value - expected_value).abs() < 1e-9);
        assert!((dx(&f) - expected_slope).abs() < 1e-9);
    }

    #[test]
    fn product_and_quotient_rules_use_key_union() {
        let x = x_at(3.0);
        let y = Dual::seeded(2.0, DerivKey::new("y", -1));

        let p = &x * &y;
        assert_eq!(p.value, 6.0);
        assert_eq!(dx(&p), 2.0);
        assert_eq!(p.derivative(&DerivKey::new("y", -1)), 3.0);

        let q = x.try_div(&y).unwrap();
        assert!((q.value - 1.5).abs() < 1e-12);
        assert!((dx(&q) - 0.5).abs() < 1e-12);
        assert!((q.derivative(&DerivKey::new("y", -1)) + 0.75).abs() < 1e-12);
    }

    #[test]
    fn subtraction_negates_the_subtrahend() {
        let d = Dual::constant(1.0) - x_at(4.0);
        assert_eq!(d.value, -3.0);
        assert_eq!(dx(&d), -1.0);
    }

    #[test]
    fn division_by_zero_is_rejected() {
        let err = x_at(1.0).try_div(&Dual::constant(0.0)).unwrap_err();
        assert!(matches!(err, ModelError::DivisionByZero { .. }));
    }

    #[test]
    fn power_rule_with_constant_and_dual_exponent() {
        let x = x_at(2.0);
        let cube = x.try_pow(&Dual::constant(3.0)).unwrap();
        assert_eq!(cube.value, 8.0);
        assert!((dx(&cube) - 12.0).abs() < 1e-12);

        // x^x at 2: derivative is 2^2 (ln 2 + 1)
        let self_pow = x.try_pow(&x).unwrap();
        assert!((dx(&self_pow) - 4.0 * (2.0_f64.ln() + 1.0)).abs() < 1e-12);

        let err = x_at(-1.0).try_pow(&x).unwrap_err();
        assert!(matches!(err, ModelError::ArithmeticDomain { .. }));
    }

    #[test]
    fn abs_uses_positive_sign_at_zero() {
        assert_eq!(dx(&x_at(0.0).abs()), 1.0);
        assert_eq!(dx(&x_at(-2.0).abs()), -1.0);
    }

    #[test]
    fn floor_and_ceil_have_zero_derivative() {
        let f = x_at(1.7).floor();
        assert_eq!(f.value, 1.0);
        assert_eq!(dx(&f), 0.0);
        let c = x_at(1.2).ceil();
        assert_eq!(c.value, 2.0);
        assert_eq!(dx(&c), 0.0);
    }

    #[test]
    fn min_max_propagate_only_the_selected_operand() {
        let x = x_at(1.0);
        let y = Dual::seeded(3.0, DerivKey::new("y", 0));
        let hi = x.clone().max(y.clone());
        assert_eq!(hi.value, 3.0);
        assert_eq!(dx(&hi), 0.0);
        let lo = x.clone().min(y);
        assert_eq!(dx(&lo), 1.0);

        let tie = x.clone().max(Dual::constant(1.0));
        assert_eq!(dx(&tie), 1.0);
    }

    #[test]
    fn log_outside_domain_fails() {
        let err = x_at(0.0).apply(Elementary::Log).unwrap_err();
        assert!(matches!(err, ModelError::ArithmeticDomain { function: "log", .. }));
        assert!(Elementary::Sqrt.eval(0.0, false).is_ok());
        assert!(Elementary::Sqrt.eval(0.0, true).is_err());
    }

    #[test]
    fn inverse_trig_derivatives() {
        let x = x_at(0.5);
        let a = x.apply(Elementary::Atan).unwrap();
        assert!((dx(&a) - 1.0 / 1.25).abs() < 1e-12);
        let s = x.apply(Elementary::Asin).unwrap();
        assert!((dx(&s) - 1.0 / 0.75_f64.sqrt()).abs() < 1e-12);
        let l = x.apply(Elementary::Log2).unwrap();
        assert!((dx(&l) - 1.0 / (0.5 * 2.0_f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn every_slope_matches_a_central_difference() {
        let functions = [
            Elementary::Sin,
            Elementary::Cos,
            Elementary::Tan,
            Elementary::Sinh,
            Elementary::Cosh,
            Elementary::Tanh,
            Elementary::Asin,
            Elementary::Acos,
            Elementary::Atan,
            Elementary::Exp,
            Elementary::Log,
            Elementary::Log10,
            Elementary::Log2,
            Elementary::Sqrt,
        ];
        let (x, h) = (0.4, 1e-5);
        for f in functions {
            let (_, slope) = f.eval(x, true).unwrap();
            let (up, _) = f.eval(x + h, false).unwrap();
            let (down, _) = f.eval(x - h, false).unwrap();
            let numeric = (up - down) / (2.0 * h);
            assert!((slope - numeric).abs() < 1e-7, "{} slope {slope} vs {numeric}", f.name());

            let chained = x_at(x).apply(f).unwrap();
            assert_eq!(dx(&chained), slope, "{}", f.name());
        }
    }

    #[test]
    fn inverse_cosine_domain_tightens_with_partials() {
        assert!(Elementary::Acos.eval(1.0, false).is_ok());
        let err = x_at(1.0).apply(Elementary::Acos).unwrap_err();
        assert!(matches!(err, ModelError::ArithmeticDomain { function: "acos", .. }));
    }

    #[test]
    fn nan_passes_through_every_function() {
        for f in [Elementary::Log, Elementary::Sqrt, Elementary::Asin, Elementary::Acos] {
            let (value, slope) = f.eval(f64::NAN, true).unwrap();
            assert!(value.is_nan() && slope.is_nan(), "{}", f.name());
        }
        let y = x_at(f64::NAN).apply(Elementary::Log10).unwrap();
        assert!(y.value.is_nan());
        assert!(dx(&y).is_nan());
    }

    #[test]
    fn zero_exponent_gives_one() {
        let y = x_at(3.0).try_pow(&Dual::zero()).unwrap();
        assert_eq!(y, Dual::one());
        assert_eq!(dx(&y), 0.0);

        let x = x_at(2.5);
        assert_eq!(&x + &Dual::zero(), x);
        assert_eq!(&x * &Dual::one(), x);
        assert_eq!(Dual::from(2.5), Dual::constant(2.5));
    }

    #[test]
    fn zero_to_a_negative_power_divides_by_zero() {
        let err = Dual::zero().try_pow(&Dual::constant(-1.0)).unwrap_err();
        assert!(matches!(err, ModelError::DivisionByZero { .. }));
    }
}
