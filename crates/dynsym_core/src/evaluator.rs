//! Tree-walking evaluator.
//!
//! The evaluation context travels as an explicit argument through every recursive call, so a
//! quantified assignment evaluates its body under `Dynamic(date)` without touching any state
//! that outlives the call.

use crate::ast::{BinaryOp, Expr, ExprKind, Symbol, TimeIndex};
use crate::error::{ModelError, Result, Span};
use crate::functions::Builtin;
use crate::number::Number;
use crate::registry::{ProcessDescriptor, Registry};
use serde::{Deserialize, Serialize};

/// How symbol references are resolved during one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Every value or variable reference reads its steady state.
    Steady,
    /// References are resolved at absolute date `date + shift` from the value series.
    Dynamic(i64),
    /// Variables read the shift-indexed values injected into the registry.
    Bare,
}

/// What happens when a symbol cannot be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupPolicy {
    /// Abort the pass with `UndefinedSymbol`.
    #[default]
    Strict,
    /// Substitute NaN and record a diagnostic.
    Lax,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Number(Number),
    Many(Vec<Outcome>),
    Unit,
}

impl Outcome {
    pub fn number(&self) -> Option<&Number> {
        match self {
            Outcome::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.number().map(Number::value)
    }
}

pub struct Evaluator<'r> {
    registry: &'r mut Registry,
    policy: LookupPolicy,
    equations: Vec<Expr>,
}

impl<'r> Evaluator<'r> {
    pub fn new(registry: &'r mut Registry, policy: LookupPolicy) -> Self {
        Self {
            registry,
            policy,
            equations: Vec::new(),
        }
    }

    /// Fails fast on any undefined symbol.
    pub fn strict(registry: &'r mut Registry) -> Self {
        Self::new(registry, LookupPolicy::Strict)
    }

    /// Degrades undefined symbols to NaN; arithmetic errors still abort.
    pub fn lax(registry: &'r mut Registry) -> Self {
        Self::new(registry, LookupPolicy::Lax)
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Equations deferred by free blocks, in source order.
    pub fn take_equations(&mut self) -> Vec<Expr> {
        std::mem::take(&mut self.equations)
    }

    pub fn evaluate(&mut self, expr: &Expr, ctx: Context) -> Result<Outcome> {
        match &expr.kind {
            ExprKind::Assignment { target, value } => self.assign(target, value, ctx, expr.span),
            ExprKind::QuantifiedAssignment {
                lower,
                upper,
                target,
                value,
            } => self.quantified_assign(lower, upper, target, value, ctx, expr.span),
            ExprKind::AssignmentBlock(items) | ExprKind::EquationBlock(items) => {
                let results = items
                    .iter()
                    .map(|item| self.evaluate(item, ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Outcome::Many(results))
            }
            ExprKind::FreeBlock(items) => {
                let mut results = Vec::new();
                for item in items {
                    match &item.kind {
                        _ if item.is_equation() => self.equations.push(item.clone()),
                        ExprKind::EquationBlock(equations) => {
                            self.equations.extend(equations.iter().cloned())
                        }
                        _ => results.push(self.evaluate(item, ctx)?),
                    }
                }
                Ok(Outcome::Many(results))
            }
            _ => self.number(expr, ctx).map(Outcome::Number),
        }
    }

    /// Evaluates an expression that must produce a number. Equations yield `right - left`.
    pub fn number(&mut self, expr: &Expr, ctx: Context) -> Result<Number> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Number(text) => {
                Number::parse_literal(text).ok_or_else(|| ModelError::InvalidLiteral {
                    text: text.clone(),
                    location: span,
                })
            }
            ExprKind::Symbol(symbol) => self.registry.resolve(symbol, ctx, self.policy, span),
            ExprKind::Call { function, args } => self.call(function, args, ctx, span),
            ExprKind::Binary(op, left, right) => {
                let l = self.number(left, ctx)?;
                let r = self.number(right, ctx)?;
                let result = match op {
                    BinaryOp::Add => Ok(l + r),
                    BinaryOp::Sub => Ok(l - r),
                    BinaryOp::Mul => Ok(l * r),
                    BinaryOp::Div => l.try_div(r),
                    BinaryOp::Pow => l.try_pow(r),
                };
                result.map_err(|e| e.at(span))
            }
            ExprKind::Neg(inner) => Ok(-self.number(inner, ctx)?),
            ExprKind::Equality(left, right) => {
                let l = self.number(left, ctx)?;
                let r = self.number(right, ctx)?;
                Ok(r - l)
            }
            _ => match self.evaluate(expr, ctx)? {
                Outcome::Number(n) => Ok(n),
                _ => Err(ModelError::NotAValue { location: span }),
            },
        }
    }

    fn call(&mut self, function: &str, args: &[Expr], ctx: Context, span: Span) -> Result<Number> {
        let builtin = Builtin::lookup(function).ok_or_else(|| ModelError::UndefinedSymbol {
            category: "function",
            symbol: function.to_string(),
            location: span,
        })?;
        let args = args
            .iter()
            .map(|arg| self.number(arg, ctx))
            .collect::<Result<Vec<_>>>()?;
        builtin.call(args).map_err(|e| e.at(span))
    }

    fn assign(&mut self, target: &Symbol, value: &Expr, ctx: Context, span: Span) -> Result<Outcome> {
        let name = target.name.as_str();
        match target.index {
            TimeIndex::Timeless => {
                let v = self.number(value, ctx)?;
                self.registry.define_constant(name, v.clone(), span);
                Ok(Outcome::Number(v))
            }
            TimeIndex::Date(date) => {
                let v = self.number(value, ctx)?;
                self.registry.define_value(name, date, v.clone());
                Ok(Outcome::Number(v))
            }
            TimeIndex::Steady => {
                let v = self.number(value, ctx)?;
                self.registry.record_steady_state(name, v.clone());
                Ok(Outcome::Number(v))
            }
            TimeIndex::Shift(0) => {
                let descriptor = self.process_descriptor(target, value, ctx)?;
                self.registry.define_process(name, descriptor, span)?;
                Ok(Outcome::Unit)
            }
            TimeIndex::Shift(_) => Err(ModelError::InvalidAssignmentTarget {
                target: target.to_string(),
                reason: "processes are declared at the current period only",
                location: span,
            }),
        }
    }

    fn process_descriptor(
        &mut self,
        target: &Symbol,
        value: &Expr,
        ctx: Context,
    ) -> Result<ProcessDescriptor> {
        match &value.kind {
            ExprKind::Call { function, args } if Builtin::lookup(function) == Some(Builtin::Normal) => {
                if args.len() != Builtin::Normal.arity() {
                    return Err(ModelError::Arity {
                        function: function.clone(),
                        expected: Builtin::Normal.arity(),
                        found: args.len(),
                    });
                }
                let mean = self.number(&args[0], ctx)?.value();
                let spread = self.number(&args[1], ctx)?.value();
                Ok(ProcessDescriptor::normal(mean, spread))
            }
            _ => Err(ModelError::ProcessDescriptorMisuse {
                message: format!("`{target}` must be assigned a process such as N(mean, spread)"),
                location: value.span,
            }),
        }
    }

    fn quantified_assign(
        &mut self,
        lower: &Expr,
        upper: &Expr,
        target: &Symbol,
        value: &Expr,
        ctx: Context,
        span: Span,
    ) -> Result<Outcome> {
        let lo = self.number(lower, ctx)?;
        let hi = self.number(upper, ctx)?;
        let (first, end) = match (lo.as_int(), hi.as_int()) {
            (Some(first), Some(end)) if first < end => (first, end),
            _ => {
                return Err(ModelError::InvalidQuantifierBounds {
                    lower: lo.to_string(),
                    upper: hi.to_string(),
                })
            }
        };
        if target.index != TimeIndex::Shift(0) {
            return Err(ModelError::InvalidAssignmentTarget {
                target: target.to_string(),
                reason: "a quantified assignment defines `name[t]`",
                location: span,
            });
        }

        tracing::trace!(name = %target.name, first, end, "quantified assignment");
        for date in first..end {
            let v = self.number(value, Context::Dynamic(date))?;
            self.registry.define_value(&target.name, date, v);
        }
        Ok(Outcome::Unit)
    }
}
