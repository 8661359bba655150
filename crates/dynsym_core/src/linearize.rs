//! Linearization of a classified model around a point.
//!
//! A [`Linearizer`] owns one registry and one ordered equation list. The phases run in this
//! order, each callable on its own:
//!
//! 1. [`Linearizer::classify`] executes assignments and collects equations.
//! 2. [`Linearizer::steady_residuals`] evaluates every equation at the steady state.
//! 3. [`Linearizer::ordering`] fixes the column order of the coefficient matrices.
//! 4. [`Linearizer::seed`] injects dual numbers at shifts -1, 0 and +1.
//! 5. [`Linearizer::dual_residuals`] re-evaluates the equations in `Bare` context.
//! 6. [`assemble`] reads the partials into `A` (lead), `B` (current), `C` (lag) and `D`
//!    (exogenous).

use crate::ast::{Expr, ExprKind, Symbol};
use crate::autodiff::{DerivKey, Dual};
use crate::error::{Diagnostic, Result};
use crate::evaluator::{Context, Evaluator, LookupPolicy};
use crate::number::Number;
use crate::parser::{parse_block, BlockKind};
use crate::registry::Registry;
use anyhow::Context as _;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const SHIFTS: [i64; 3] = [-1, 0, 1];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearizeSettings {
    pub policy: LookupPolicy,
}

/// Values an endogenous variable takes around the current period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShiftValues {
    pub lag: f64,
    pub current: f64,
    pub lead: f64,
}

impl ShiftValues {
    pub fn uniform(value: f64) -> Self {
        Self {
            lag: value,
            current: value,
            lead: value,
        }
    }

    fn at(&self, shift: i64) -> f64 {
        match shift {
            s if s < 0 => self.lag,
            0 => self.current,
            _ => self.lead,
        }
    }
}

/// Point at which residuals and partials are evaluated. Names left out fall back to their
/// steady state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationState {
    pub endogenous: HashMap<String, ShiftValues>,
    pub exogenous: HashMap<String, f64>,
}

impl EvaluationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endogenous(mut self, name: impl Into<String>, values: ShiftValues) -> Self {
        self.endogenous.insert(name.into(), values);
        self
    }

    /// Same value at the lag, the current period and the lead.
    pub fn uniform(self, name: impl Into<String>, value: f64) -> Self {
        self.with_endogenous(name, ShiftValues::uniform(value))
    }

    pub fn with_exogenous(mut self, name: impl Into<String>, value: f64) -> Self {
        self.exogenous.insert(name.into(), value);
        self
    }
}

/// Column order of the coefficient matrices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolOrdering {
    /// Variables in order of first reference across the equations.
    pub endogenous: Vec<String>,
    /// Processes in declaration order.
    pub exogenous: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SteadyState {
    pub endogenous: Vec<f64>,
    pub exogenous: Vec<f64>,
}

/// `A`, `B`, `C` are `n x k` (lead, current, lag); `D` is `n x m`.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientMatrices {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub c: DMatrix<f64>,
    pub d: DMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    pub endogenous: Vec<String>,
    pub exogenous: Vec<String>,
    pub constants: Vec<(String, f64)>,
    pub steady_state: SteadyState,
    pub steady_residuals: Vec<f64>,
    pub residuals: Vec<f64>,
    pub matrices: CoefficientMatrices,
    pub diagnostics: Vec<Diagnostic>,
}

/// Reads the partial derivatives of each residual into the four coefficient matrices.
/// Missing keys are exact zeros.
pub fn assemble(residuals: &[Dual], ordering: &SymbolOrdering) -> CoefficientMatrices {
    let n = residuals.len();
    let block = |names: &[String], shift: i64| {
        let keys: Vec<DerivKey> = names
            .iter()
            .map(|name| DerivKey::new(name.as_str(), shift))
            .collect();
        DMatrix::from_fn(n, keys.len(), |i, j| residuals[i].derivative(&keys[j]))
    };

    CoefficientMatrices {
        a: block(&ordering.endogenous, 1),
        b: block(&ordering.endogenous, 0),
        c: block(&ordering.endogenous, -1),
        d: block(&ordering.exogenous, 0),
    }
}

#[derive(Debug, Default)]
pub struct Linearizer {
    registry: Registry,
    equations: Vec<Expr>,
    settings: LinearizeSettings,
}

impl Linearizer {
    pub fn new(settings: LinearizeSettings) -> Self {
        Self {
            registry: Registry::new(),
            equations: Vec::new(),
            settings,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn equations(&self) -> &[Expr] {
        &self.equations
    }

    /// Executes the assignments of `tree` and appends its equations to the ordered list.
    /// May be called once per source block.
    pub fn classify(&mut self, tree: &Expr) -> Result<()> {
        match &tree.kind {
            ExprKind::Equality(..) => self.equations.push(tree.clone()),
            ExprKind::EquationBlock(items) => self.equations.extend(items.iter().cloned()),
            _ => {
                let mut evaluator = Evaluator::new(&mut self.registry, self.settings.policy);
                evaluator.evaluate(tree, Context::Bare)?;
                self.equations.extend(evaluator.take_equations());
            }
        }

        let mut names = Vec::new();
        for equation in &self.equations {
            equation.collect_variables(&mut names);
        }
        for name in &names {
            self.registry.discover_variable(name);
        }
        tracing::debug!(
            equations = self.equations.len(),
            variables = names.len(),
            processes = self.registry.processes().len(),
            "classified model"
        );
        Ok(())
    }

    /// One residual per equation, every reference read at its steady state. Not checked
    /// against zero.
    pub fn steady_residuals(&mut self) -> Result<Vec<f64>> {
        let mut evaluator = Evaluator::new(&mut self.registry, self.settings.policy);
        self.equations
            .iter()
            .map(|equation| {
                evaluator
                    .number(equation, Context::Steady)
                    .map(|n| n.value())
            })
            .collect()
    }

    pub fn ordering(&self) -> SymbolOrdering {
        let mut endogenous = Vec::new();
        for equation in &self.equations {
            equation.collect_variables(&mut endogenous);
        }
        endogenous.retain(|name| !self.registry.is_process(name));

        SymbolOrdering {
            endogenous,
            exogenous: self.registry.processes().to_vec(),
        }
    }

    pub fn steady_state(&mut self, ordering: &SymbolOrdering) -> Result<SteadyState> {
        let endogenous = ordering
            .endogenous
            .iter()
            .map(|name| self.steady_point(name))
            .collect::<Result<Vec<_>>>()?;
        let exogenous = ordering
            .exogenous
            .iter()
            .map(|name| self.steady_point(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(SteadyState {
            endogenous,
            exogenous,
        })
    }

    /// Unresolved names are reported at their first reference in the equations.
    fn steady_point(&mut self, name: &str) -> Result<f64> {
        let at = self
            .equations
            .iter()
            .find_map(|equation| equation.first_reference(name))
            .unwrap_or_default();
        self.registry
            .resolve(&Symbol::steady(name), Context::Steady, self.settings.policy, at)
            .map(|n| n.value())
    }

    /// Replaces every injection with unit-seeded duals at `state`. Names absent from `state`
    /// take their entry in `steady`.
    pub fn seed(
        &mut self,
        ordering: &SymbolOrdering,
        steady: &SteadyState,
        state: &EvaluationState,
    ) {
        self.inject(ordering, steady, state, |value, key| {
            Number::Dual(Dual::seeded(value, key))
        })
    }

    fn inject(
        &mut self,
        ordering: &SymbolOrdering,
        steady: &SteadyState,
        state: &EvaluationState,
        make: impl Fn(f64, DerivKey) -> Number,
    ) {
        self.registry.clear_injections();
        for (name, fallback) in ordering.endogenous.iter().zip(&steady.endogenous) {
            let values = state
                .endogenous
                .get(name)
                .copied()
                .unwrap_or_else(|| ShiftValues::uniform(*fallback));
            for shift in SHIFTS {
                let number = make(values.at(shift), DerivKey::new(name.as_str(), shift));
                self.registry.inject(name, shift, number);
            }
        }
        for (name, fallback) in ordering.exogenous.iter().zip(&steady.exogenous) {
            let value = state.exogenous.get(name).copied().unwrap_or(*fallback);
            let number = make(value, DerivKey::new(name.as_str(), 0));
            self.registry.inject(name, 0, number);
        }
    }

    /// One dual residual per equation against the current injections.
    pub fn dual_residuals(&mut self) -> Result<Vec<Dual>> {
        let mut evaluator = Evaluator::new(&mut self.registry, self.settings.policy);
        self.equations
            .iter()
            .map(|equation| {
                evaluator
                    .number(equation, Context::Bare)
                    .map(Number::into_dual)
            })
            .collect()
    }

    /// Plain residuals at `state`, without derivatives.
    pub fn residuals(&mut self, state: &EvaluationState) -> Result<Vec<f64>> {
        let ordering = self.ordering();
        let steady = self.steady_state(&ordering)?;
        self.inject(&ordering, &steady, state, |value, _| Number::Float(value));
        let result = self.bare_values();
        self.registry.clear_injections();
        result
    }

    fn bare_values(&mut self) -> Result<Vec<f64>> {
        let mut evaluator = Evaluator::new(&mut self.registry, self.settings.policy);
        self.equations
            .iter()
            .map(|equation| {
                evaluator
                    .number(equation, Context::Bare)
                    .map(|n| n.value())
            })
            .collect()
    }

    /// Residuals at `date`, reading every variable from its value series.
    pub fn residuals_at(&mut self, date: i64) -> Result<Vec<f64>> {
        let mut evaluator = Evaluator::new(&mut self.registry, self.settings.policy);
        self.equations
            .iter()
            .map(|equation| {
                evaluator
                    .number(equation, Context::Dynamic(date))
                    .map(|n| n.value())
            })
            .collect()
    }

    pub fn linearize(&mut self, state: &EvaluationState) -> Result<LinearModel> {
        let steady_residuals = self.steady_residuals()?;
        let ordering = self.ordering();
        tracing::debug!(
            equations = self.equations.len(),
            endogenous = ordering.endogenous.len(),
            exogenous = ordering.exogenous.len(),
            "linearizing"
        );
        let steady_state = self.steady_state(&ordering)?;

        self.seed(&ordering, &steady_state, state);
        let duals = self.dual_residuals();
        self.registry.clear_injections();
        let duals = duals?;

        let matrices = assemble(&duals, &ordering);
        let residuals = duals.iter().map(|d| d.value).collect();
        let constants = self
            .registry
            .constants()
            .map(|(name, value)| (name.to_string(), value.value()))
            .collect();

        Ok(LinearModel {
            endogenous: ordering.endogenous,
            exogenous: ordering.exogenous,
            constants,
            steady_state,
            steady_residuals,
            residuals,
            matrices,
            diagnostics: self.registry.diagnostics().to_vec(),
        })
    }
}

/// Parses `source` as a free block and linearizes it at its steady state.
pub fn read_model(source: &str, settings: LinearizeSettings) -> anyhow::Result<LinearModel> {
    let tree = parse_block(source, BlockKind::Free).context("failed to parse model source")?;
    let mut linearizer = Linearizer::new(settings);
    linearizer
        .classify(&tree)
        .context("failed to classify model")?;
    linearizer
        .linearize(&EvaluationState::default())
        .context("failed to linearize model")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ModelError, Span};

    const AR1: &str = "
        rho := 0.9
        a[~] := 0
        epsilon[t] := N(0, 0.01)
        a[t] = rho*a[t-1] + epsilon[t]
    ";

    const GROWTH: &str = "
        beta := 0.96
        alpha := 0.3
        k[~] := 2
        c[~] := 1
        c[t] = beta*c[t+1]*k[t]^alpha
        k[t] = k[t-1]^alpha - c[t]
    ";

    fn linearizer(source: &str, policy: LookupPolicy) -> Linearizer {
        let tree = parse_block(source, BlockKind::Free).unwrap();
        let mut linearizer = Linearizer::new(LinearizeSettings { policy });
        linearizer.classify(&tree).unwrap();
        linearizer
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn autoregressive_process_coefficients() {
        let model = read_model(AR1, LinearizeSettings::default()).unwrap();
        assert_eq!(model.endogenous, vec!["a"]);
        assert_eq!(model.exogenous, vec!["epsilon"]);

        let m = &model.matrices;
        assert_eq!(m.a.shape(), (1, 1));
        assert_eq!(m.d.shape(), (1, 1));
        assert_eq!(m.a[(0, 0)], 0.0);
        assert_eq!(m.b[(0, 0)], -1.0);
        assert!(close(m.c[(0, 0)], 0.9));
        assert_eq!(m.d[(0, 0)], 1.0);

        assert_eq!(model.steady_residuals, vec![0.0]);
        assert_eq!(model.residuals, vec![0.0]);
        assert_eq!(model.steady_state.exogenous, vec![0.0]);
        assert_eq!(model.constants, vec![("rho".to_string(), 0.9)]);
    }

    #[test]
    fn matrices_hold_analytic_partials_and_exact_zeros() {
        let model = read_model(GROWTH, LinearizeSettings::default()).unwrap();
        assert_eq!(model.endogenous, vec!["c", "k"]);
        assert!(model.exogenous.is_empty());

        let m = &model.matrices;
        for block in [&m.a, &m.b, &m.c] {
            assert_eq!(block.shape(), (2, 2));
        }
        assert_eq!(m.d.shape(), (2, 0));

        let k_alpha = 2f64.powf(0.3);
        let dk = 0.3 * 2f64.powf(-0.7);
        assert!(close(m.a[(0, 0)], 0.96 * k_alpha));
        assert_eq!(m.a[(0, 1)], 0.0);
        assert_eq!(m.a.row(1).iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0]);

        assert_eq!(m.b[(0, 0)], -1.0);
        assert!(close(m.b[(0, 1)], 0.96 * dk));
        assert_eq!(m.b[(1, 0)], -1.0);
        assert_eq!(m.b[(1, 1)], -1.0);

        assert_eq!(m.c[(0, 0)], 0.0);
        assert_eq!(m.c[(0, 1)], 0.0);
        assert_eq!(m.c[(1, 0)], 0.0);
        assert!(close(m.c[(1, 1)], dk));
    }

    #[test]
    fn classification_is_reproducible() {
        let first = linearizer(GROWTH, LookupPolicy::Strict).ordering();
        let second = linearizer(GROWTH, LookupPolicy::Strict).ordering();
        assert_eq!(first, second);
    }

    #[test]
    fn processes_are_exogenous_wherever_they_are_declared() {
        let source = "
            y[t] = u[t] + 0.5*y[t-1] + v[t]
            u[t] := N(0, 1)
            y[~] := 0
            v[t] := N(0, 2)
        ";
        let lin = linearizer(source, LookupPolicy::Strict);
        let ordering = lin.ordering();
        assert_eq!(ordering.endogenous, vec!["y"]);
        assert_eq!(ordering.exogenous, vec!["u", "v"]);
        assert_eq!(lin.registry().variables(), &["y".to_string()]);
    }

    #[test]
    fn equation_blocks_are_collected_across_calls() {
        let mut lin = Linearizer::new(LinearizeSettings::default());
        let assignments = parse_block("rho := 0.5\nx[~] := 1", BlockKind::Assignment).unwrap();
        let equations = parse_block("x[t] = rho*x[t-1]", BlockKind::Equation).unwrap();
        lin.classify(&assignments).unwrap();
        lin.classify(&equations).unwrap();
        assert_eq!(lin.equations().len(), 1);
        assert_eq!(lin.steady_residuals().unwrap(), vec![-0.5]);
    }

    #[test]
    fn steady_residuals_are_informational() {
        let model = read_model("y[~] := 1\ny[t] = 2*y[t-1]", LinearizeSettings::default())
            .unwrap();
        assert_eq!(model.steady_residuals, vec![1.0]);
        assert_eq!(model.matrices.c[(0, 0)], 2.0);
    }

    #[test]
    fn residuals_at_an_evaluation_state() {
        let mut lin = linearizer(AR1, LookupPolicy::Strict);
        let state = EvaluationState::new()
            .with_endogenous(
                "a",
                ShiftValues {
                    lag: 1.0,
                    current: 0.5,
                    lead: 0.0,
                },
            )
            .with_exogenous("epsilon", 0.1);
        let residuals = lin.residuals(&state).unwrap();
        assert!(close(residuals[0], 0.9 + 0.1 - 0.5));

        // partials of a linear model do not depend on the point
        let model = lin.linearize(&state).unwrap();
        assert!(close(model.residuals[0], 0.5));
        assert!(close(model.matrices.c[(0, 0)], 0.9));
    }

    #[test]
    fn residuals_along_value_series() {
        let source = "
            rho := 0.9
            a[0] := 1
            a[1] := 0.5
            a[t] = rho*a[t-1]
        ";
        let mut lin = linearizer(source, LookupPolicy::Strict);
        let residuals = lin.residuals_at(1).unwrap();
        assert!(close(residuals[0], 0.4));

        let err = lin.residuals_at(0).unwrap_err();
        assert!(matches!(err, ModelError::UndefinedSymbol { ref symbol, .. } if symbol == "a[-1]"));
    }

    #[test]
    fn residuals_at_the_last_representable_date() {
        let source = "rho := 0.9\na[t] = rho*a[t+1]";
        let mut lin = linearizer(source, LookupPolicy::Lax);
        let residuals = lin.residuals_at(i64::MAX).unwrap();
        assert!(residuals[0].is_nan());
        assert_eq!(lin.registry().diagnostics().len(), 2);
    }

    #[test]
    fn missing_steady_state_fails_strict_and_degrades_lax() {
        let source = "x[t] = 0.5*x[t-1]";
        let mut strict = linearizer(source, LookupPolicy::Strict);
        let err = strict.linearize(&EvaluationState::default()).unwrap_err();
        assert!(matches!(err, ModelError::UndefinedSymbol { category: "variable", .. }));

        let mut lax = linearizer(source, LookupPolicy::Lax);
        let model = lax.linearize(&EvaluationState::default()).unwrap();
        assert!(model.steady_state.endogenous[0].is_nan());
        assert_eq!(model.matrices.b.shape(), (1, 1));

        // one diagnostic per reference, each at a real source position
        let locations: Vec<Span> = model.diagnostics.iter().map(|d| d.location).collect();
        assert_eq!(locations, vec![Span::new(1, 1), Span::new(1, 12)]);
    }

    #[test]
    fn lax_placeholders_flow_through_restricted_functions() {
        let source = "y[t] = log(y[t-1]) + sqrt(z[t]) + acos(w[t-1])";
        let model = read_model(source, LinearizeSettings { policy: LookupPolicy::Lax }).unwrap();
        assert_eq!(model.endogenous, vec!["y", "z", "w"]);
        assert!(model.steady_residuals[0].is_nan());
        assert!(model.residuals[0].is_nan());
        assert_eq!(model.matrices.c.shape(), (1, 3));

        let err = read_model(source, LinearizeSettings::default()).unwrap_err();
        assert!(format!("{err:#}").contains("undefined variable"));
    }

    #[test]
    fn steady_values_feed_the_seed_without_new_lookups() {
        let mut lin = linearizer(AR1, LookupPolicy::Strict);
        let ordering = lin.ordering();
        let steady = SteadyState {
            endogenous: vec![2.0],
            exogenous: vec![0.5],
        };
        lin.seed(&ordering, &steady, &EvaluationState::new());
        let residuals = lin.dual_residuals().unwrap();
        assert!(close(residuals[0].value, 0.9 * 2.0 + 0.5 - 2.0));
        assert_eq!(residuals[0].derivative(&DerivKey::new("epsilon", 0)), 1.0);
    }

    #[test]
    fn injections_are_cleared_after_linearizing() {
        let mut lin = linearizer(AR1, LookupPolicy::Strict);
        lin.linearize(&EvaluationState::default()).unwrap();
        assert!(lin.registry().injected("a", 0).is_none());
        assert!(lin.registry().injected("epsilon", 0).is_none());
    }

    #[test]
    fn assembly_fills_absent_keys_with_zero() {
        let ordering = SymbolOrdering {
            endogenous: vec!["x".into(), "y".into()],
            exogenous: vec!["e".into()],
        };
        let residuals = vec![
            Dual::seeded(0.0, DerivKey::new("y", -1)),
            Dual::constant(3.0),
        ];
        let m = assemble(&residuals, &ordering);
        assert_eq!(m.c[(0, 1)], 1.0);
        assert_eq!(m.c.iter().filter(|v| **v != 0.0).count(), 1);
        assert_eq!(m.d, DMatrix::zeros(2, 1));
        assert_eq!(m.a, DMatrix::zeros(2, 2));
    }

    #[test]
    fn read_model_reports_the_failing_stage() {
        let err = read_model("a[t] = ", LinearizeSettings::default()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse model source"));

        let err = read_model("z[t] := 3", LinearizeSettings::default()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to classify model"));
    }
}
