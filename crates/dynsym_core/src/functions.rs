use crate::autodiff::Elementary;
use crate::error::{ModelError, Result, Span};
use crate::number::Number;

/// Functions callable from model equations. The table is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Elementary(Elementary),
    Abs,
    Floor,
    Ceil,
    Min,
    Max,
    Pow,
    /// `N(mean, spread)`: only valid on the right of a process declaration.
    Normal,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        let builtin = match name {
            "sin" => Builtin::Elementary(Elementary::Sin),
            "cos" => Builtin::Elementary(Elementary::Cos),
            "tan" => Builtin::Elementary(Elementary::Tan),
            "sinh" => Builtin::Elementary(Elementary::Sinh),
            "cosh" => Builtin::Elementary(Elementary::Cosh),
            "tanh" => Builtin::Elementary(Elementary::Tanh),
            "asin" => Builtin::Elementary(Elementary::Asin),
            "acos" => Builtin::Elementary(Elementary::Acos),
            "atan" => Builtin::Elementary(Elementary::Atan),
            "exp" => Builtin::Elementary(Elementary::Exp),
            "log" => Builtin::Elementary(Elementary::Log),
            "log10" => Builtin::Elementary(Elementary::Log10),
            "log2" => Builtin::Elementary(Elementary::Log2),
            "sqrt" => Builtin::Elementary(Elementary::Sqrt),
            "abs" => Builtin::Abs,
            "floor" => Builtin::Floor,
            "ceil" => Builtin::Ceil,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "pow" => Builtin::Pow,
            "N" => Builtin::Normal,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Elementary(f) => f.name(),
            Builtin::Abs => "abs",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Pow => "pow",
            Builtin::Normal => "N",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Min | Builtin::Max | Builtin::Pow | Builtin::Normal => 2,
            _ => 1,
        }
    }

    fn arguments<const N: usize>(self, args: Vec<Number>) -> Result<[Number; N]> {
        let found = args.len();
        args.try_into().map_err(|_| ModelError::Arity {
            function: self.name().to_string(),
            expected: N,
            found,
        })
    }

    pub fn call(self, args: Vec<Number>) -> Result<Number> {
        match self {
            Builtin::Elementary(f) => {
                let [x] = self.arguments(args)?;
                x.apply(f)
            }
            Builtin::Abs => {
                let [x] = self.arguments(args)?;
                Ok(x.abs())
            }
            Builtin::Floor => {
                let [x] = self.arguments(args)?;
                Ok(x.floor())
            }
            Builtin::Ceil => {
                let [x] = self.arguments(args)?;
                Ok(x.ceil())
            }
            Builtin::Min => {
                let [a, b] = self.arguments(args)?;
                Ok(a.min(b))
            }
            Builtin::Max => {
                let [a, b] = self.arguments(args)?;
                Ok(a.max(b))
            }
            Builtin::Pow => {
                let [a, b] = self.arguments(args)?;
                a.try_pow(b)
            }
            Builtin::Normal => Err(ModelError::ProcessDescriptorMisuse {
                message: "N(mean, spread) is only valid as the right-hand side of a process declaration"
                    .to_string(),
                location: Span::default(),
            }),
        }
    }
}
