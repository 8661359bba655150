//! Symbol registry: constants, value series, processes, discovered variables and steady states.
//!
//! Every entry is addressed structurally by name plus date or shift; nothing is keyed by a
//! formatted string. Resolution rules depend on the evaluation [`Context`]:
//!
//! | reference | `Steady`      | `Dynamic(d)`         | `Bare`              |
//! |-----------|---------------|----------------------|---------------------|
//! | `c`       | constant      | constant (`t` is `d`) | constant           |
//! | `e[3]`    | steady state  | value at 3           | value at 3          |
//! | `a[t+s]`  | steady state  | value at `d + s`     | injected at shift s |
//! | `a[~]`    | steady state  | steady state         | steady state        |

use crate::ast::{Symbol, TimeIndex};
use crate::error::{Diagnostic, ModelError, Result, Span};
use crate::evaluator::{Context, LookupPolicy};
use crate::number::Number;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    Normal,
}

/// Distribution of an exogenous process. Its mean is the steady state of the process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub distribution: Distribution,
    pub mean: f64,
    pub spread: f64,
}

impl ProcessDescriptor {
    pub fn normal(mean: f64, spread: f64) -> Self {
        Self {
            distribution: Distribution::Normal,
            mean,
            spread,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Registry {
    constants: HashMap<String, Number>,
    constant_order: Vec<String>,
    values: HashMap<String, BTreeMap<i64, Number>>,
    processes: HashMap<String, ProcessDescriptor>,
    process_order: Vec<String>,
    variables: Vec<String>,
    injected: HashMap<String, BTreeMap<i64, Number>>,
    steady_state: HashMap<String, Number>,
    diagnostics: Vec<Diagnostic>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last definition wins; a redefinition is reported, never rejected.
    pub fn define_constant(&mut self, name: &str, value: Number, at: Span) {
        if self.constants.contains_key(name) {
            self.warn(format!("constant `{name}` redefined"), at);
        } else {
            self.constant_order.push(name.to_string());
        }
        self.constants.insert(name.to_string(), value);
    }

    pub fn define_process(
        &mut self,
        name: &str,
        descriptor: ProcessDescriptor,
        at: Span,
    ) -> Result<()> {
        if self.processes.contains_key(name) {
            return Err(ModelError::Redefinition {
                name: name.to_string(),
                location: at,
            });
        }
        self.processes.insert(name.to_string(), descriptor);
        self.process_order.push(name.to_string());
        self.record_steady_state(name, Number::Float(descriptor.mean));
        Ok(())
    }

    pub fn define_value(&mut self, name: &str, date: i64, value: Number) {
        self.values
            .entry(name.to_string())
            .or_default()
            .insert(date, value);
    }

    /// Idempotent. Process names are never recorded as variables.
    pub fn discover_variable(&mut self, name: &str) {
        if !self.processes.contains_key(name) && !self.variables.iter().any(|v| v == name) {
            self.variables.push(name.to_string());
        }
    }

    /// First write wins. Returns whether the value was stored.
    pub fn record_steady_state(&mut self, name: &str, value: Number) -> bool {
        if self.steady_state.contains_key(name) {
            return false;
        }
        self.steady_state.insert(name.to_string(), value);
        true
    }

    /// Supplies the value a variable takes at `shift` during a `Bare` pass.
    pub fn inject(&mut self, name: &str, shift: i64, value: Number) {
        self.injected
            .entry(name.to_string())
            .or_default()
            .insert(shift, value);
    }

    pub fn clear_injections(&mut self) {
        self.injected.clear();
    }

    pub fn constant(&self, name: &str) -> Option<&Number> {
        self.constants.get(name)
    }

    /// Constants in first-definition order.
    pub fn constants(&self) -> impl Iterator<Item = (&str, &Number)> {
        self.constant_order
            .iter()
            .filter_map(|name| self.constants.get(name).map(|v| (name.as_str(), v)))
    }

    pub fn value(&self, name: &str, date: i64) -> Option<&Number> {
        self.values.get(name).and_then(|series| series.get(&date))
    }

    pub fn series(&self, name: &str) -> Option<&BTreeMap<i64, Number>> {
        self.values.get(name)
    }

    pub fn process(&self, name: &str) -> Option<&ProcessDescriptor> {
        self.processes.get(name)
    }

    pub fn is_process(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    /// Process names in declaration order.
    pub fn processes(&self) -> &[String] {
        &self.process_order
    }

    /// Discovered variable names in discovery order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn steady_state(&self, name: &str) -> Option<&Number> {
        self.steady_state.get(name)
    }

    pub fn injected(&self, name: &str, shift: i64) -> Option<&Number> {
        self.injected.get(name).and_then(|shifts| shifts.get(&shift))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn warn(&mut self, message: String, at: Span) {
        tracing::warn!(location = %at, "{}", message);
        self.diagnostics.push(Diagnostic {
            message,
            location: at,
        });
    }

    /// Looks a symbol up under `ctx`. Variables are discovered on every read.
    pub fn resolve(
        &mut self,
        symbol: &Symbol,
        ctx: Context,
        policy: LookupPolicy,
        at: Span,
    ) -> Result<Number> {
        let name = symbol.name.as_str();
        let found = match symbol.index {
            TimeIndex::Timeless => match ctx {
                Context::Dynamic(date) if name == "t" => Some(Number::Int(date)),
                _ => self.constants.get(name).cloned(),
            },
            TimeIndex::Date(date) => match ctx {
                Context::Steady => self.steady_state.get(name).cloned(),
                Context::Dynamic(_) | Context::Bare => self.value(name, date).cloned(),
            },
            TimeIndex::Shift(shift) => {
                self.discover_variable(name);
                match ctx {
                    Context::Steady => self.steady_state.get(name).cloned(),
                    Context::Dynamic(date) => date
                        .checked_add(shift)
                        .and_then(|at| self.value(name, at))
                        .cloned(),
                    Context::Bare => self.injected(name, shift).cloned(),
                }
            }
            TimeIndex::Steady => {
                self.discover_variable(name);
                self.steady_state.get(name).cloned()
            }
        };

        match found {
            Some(number) => Ok(number),
            None => self.unresolved(symbol, ctx, policy, at),
        }
    }

    fn unresolved(
        &mut self,
        symbol: &Symbol,
        ctx: Context,
        policy: LookupPolicy,
        at: Span,
    ) -> Result<Number> {
        let category = symbol.category().label();
        // render what was actually looked up
        let looked_up = match (symbol.index, ctx) {
            (TimeIndex::Timeless, _) => symbol.name.clone(),
            (_, Context::Steady) | (TimeIndex::Steady, _) => format!("{}[~]", symbol.name),
            (TimeIndex::Shift(shift), Context::Dynamic(date)) => match date.checked_add(shift) {
                Some(at) => format!("{}[{}]", symbol.name, at),
                None => format!("{}[{}{:+}]", symbol.name, date, shift),
            },
            _ => symbol.to_string(),
        };

        match policy {
            LookupPolicy::Strict => Err(ModelError::UndefinedSymbol {
                category,
                symbol: looked_up,
                location: at,
            }),
            LookupPolicy::Lax => {
                let message = format!("undefined {category} `{looked_up}`, using NaN");
                // one diagnostic per reference, however many passes read it
                let reported = self
                    .diagnostics
                    .iter()
                    .any(|d| d.location == at && d.message == message);
                if !reported {
                    self.warn(message, at);
                }
                Ok(Number::nan())
            }
        }
    }

    /// Steady state of a symbol that must be a variable or a process.
    pub fn steady_value(&self, name: &str) -> Option<f64> {
        self.steady_state.get(name).map(Number::value)
    }
}
