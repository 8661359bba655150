//! Abstract syntax tree consumed by the evaluator.

use crate::error::Span;
use std::fmt;

/// Time descriptor attached to a symbol reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeIndex {
    /// `alpha`: a constant.
    Timeless,
    /// `e[3]`: a value at a literal date.
    Date(i64),
    /// `a[t+1]`: a variable relative to the current period.
    Shift(i64),
    /// `a[~]`: a variable at its steady state.
    Steady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolCategory {
    Constant,
    Value,
    Variable,
}

impl SymbolCategory {
    pub fn label(self) -> &'static str {
        match self {
            SymbolCategory::Constant => "constant",
            SymbolCategory::Value => "value",
            SymbolCategory::Variable => "variable",
        }
    }
}

/// A symbol reference addressed by name and time descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub index: TimeIndex,
}

impl Symbol {
    pub fn constant(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: TimeIndex::Timeless,
        }
    }

    pub fn value(name: impl Into<String>, date: i64) -> Self {
        Self {
            name: name.into(),
            index: TimeIndex::Date(date),
        }
    }

    pub fn variable(name: impl Into<String>, shift: i64) -> Self {
        Self {
            name: name.into(),
            index: TimeIndex::Shift(shift),
        }
    }

    pub fn steady(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: TimeIndex::Steady,
        }
    }

    pub fn category(&self) -> SymbolCategory {
        match self.index {
            TimeIndex::Timeless => SymbolCategory::Constant,
            TimeIndex::Date(_) => SymbolCategory::Value,
            TimeIndex::Shift(_) | TimeIndex::Steady => SymbolCategory::Variable,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            TimeIndex::Timeless => write!(f, "{}", self.name),
            TimeIndex::Date(d) => write!(f, "{}[{}]", self.name, d),
            TimeIndex::Shift(0) => write!(f, "{}[t]", self.name),
            TimeIndex::Shift(s) if s > 0 => write!(f, "{}[t+{}]", self.name, s),
            TimeIndex::Shift(s) => write!(f, "{}[t{}]", self.name, s),
            TimeIndex::Steady => write!(f, "{}[~]", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Literal kept as written; integral lexemes evaluate to integers.
    Number(String),
    Symbol(Symbol),
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    /// `left = right`, evaluating to `right - left`.
    Equality(Box<Expr>, Box<Expr>),
    Assignment {
        target: Symbol,
        value: Box<Expr>,
    },
    /// `∀t∈[lower, upper): target := value`
    QuantifiedAssignment {
        lower: Box<Expr>,
        upper: Box<Expr>,
        target: Symbol,
        value: Box<Expr>,
    },
    AssignmentBlock(Vec<Expr>),
    EquationBlock(Vec<Expr>),
    FreeBlock(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn number(text: impl Into<String>) -> Self {
        Self::new(ExprKind::Number(text.into()), Span::default())
    }

    pub fn symbol(symbol: Symbol) -> Self {
        Self::new(ExprKind::Symbol(symbol), Span::default())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::new(
            ExprKind::Binary(op, Box::new(left), Box::new(right)),
            Span::default(),
        )
    }

    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(
            ExprKind::Call {
                function: function.into(),
                args,
            },
            Span::default(),
        )
    }

    pub fn equality(left: Expr, right: Expr) -> Self {
        Self::new(
            ExprKind::Equality(Box::new(left), Box::new(right)),
            Span::default(),
        )
    }

    pub fn assignment(target: Symbol, value: Expr) -> Self {
        Self::new(
            ExprKind::Assignment {
                target,
                value: Box::new(value),
            },
            Span::default(),
        )
    }

    pub fn is_equation(&self) -> bool {
        matches!(self.kind, ExprKind::Equality(..))
    }

    /// Names referenced as variables, in order of first appearance (depth-first, left to right).
    pub fn variable_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    /// Span of the first node reading `name` as a variable.
    pub fn first_reference(&self, name: &str) -> Option<Span> {
        match &self.kind {
            ExprKind::Number(_) => None,
            ExprKind::Symbol(symbol) => (symbol.category() == SymbolCategory::Variable
                && symbol.name == name)
                .then_some(self.span),
            ExprKind::Call { args, .. } => args.iter().find_map(|a| a.first_reference(name)),
            ExprKind::Binary(_, l, r) | ExprKind::Equality(l, r) => {
                l.first_reference(name).or_else(|| r.first_reference(name))
            }
            ExprKind::Neg(inner) => inner.first_reference(name),
            ExprKind::Assignment { value, .. } => value.first_reference(name),
            ExprKind::QuantifiedAssignment {
                lower,
                upper,
                value,
                ..
            } => [lower, upper, value]
                .into_iter()
                .find_map(|e| e.first_reference(name)),
            ExprKind::AssignmentBlock(items)
            | ExprKind::EquationBlock(items)
            | ExprKind::FreeBlock(items) => items.iter().find_map(|e| e.first_reference(name)),
        }
    }

    pub(crate) fn collect_variables(&self, names: &mut Vec<String>) {
        match &self.kind {
            ExprKind::Number(_) => {}
            ExprKind::Symbol(symbol) => {
                if symbol.category() == SymbolCategory::Variable && !names.contains(&symbol.name) {
                    names.push(symbol.name.clone());
                }
            }
            ExprKind::Call { args, .. } => args.iter().for_each(|a| a.collect_variables(names)),
            ExprKind::Binary(_, l, r) | ExprKind::Equality(l, r) => {
                l.collect_variables(names);
                r.collect_variables(names);
            }
            ExprKind::Neg(inner) => inner.collect_variables(names),
            ExprKind::Assignment { value, .. } => value.collect_variables(names),
            ExprKind::QuantifiedAssignment {
                lower,
                upper,
                value,
                ..
            } => {
                lower.collect_variables(names);
                upper.collect_variables(names);
                value.collect_variables(names);
            }
            ExprKind::AssignmentBlock(items)
            | ExprKind::EquationBlock(items)
            | ExprKind::FreeBlock(items) => items.iter().for_each(|e| e.collect_variables(names)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_render_with_their_time_index() {
        assert_eq!(Symbol::constant("beta").to_string(), "beta");
        assert_eq!(Symbol::value("e", -2).to_string(), "e[-2]");
        assert_eq!(Symbol::variable("k", 0).to_string(), "k[t]");
        assert_eq!(Symbol::variable("k", 1).to_string(), "k[t+1]");
        assert_eq!(Symbol::variable("k", -1).to_string(), "k[t-1]");
        assert_eq!(Symbol::steady("k").to_string(), "k[~]");
    }

    #[test]
    fn variable_names_follow_first_reference_order() {
        // c[t] = k[t-1] + c[t+1] * z[t]
        let eq = Expr::equality(
            Expr::symbol(Symbol::variable("c", 0)),
            Expr::binary(
                BinaryOp::Add,
                Expr::symbol(Symbol::variable("k", -1)),
                Expr::binary(
                    BinaryOp::Mul,
                    Expr::symbol(Symbol::variable("c", 1)),
                    Expr::symbol(Symbol::variable("z", 0)),
                ),
            ),
        );
        assert_eq!(eq.variable_names(), vec!["c", "k", "z"]);
    }

    #[test]
    fn first_reference_locates_the_leftmost_read() {
        let lag = Expr::new(ExprKind::Symbol(Symbol::variable("x", -1)), Span::new(1, 12));
        let eq = Expr::equality(
            Expr::new(ExprKind::Symbol(Symbol::variable("x", 0)), Span::new(1, 1)),
            Expr::binary(BinaryOp::Mul, Expr::number("0.5"), lag),
        );
        assert_eq!(eq.first_reference("x"), Some(Span::new(1, 1)));
        assert_eq!(eq.first_reference("y"), None);
        let constant = Expr::new(ExprKind::Symbol(Symbol::constant("x")), Span::new(2, 2));
        assert_eq!(constant.first_reference("x"), None);
    }
}
