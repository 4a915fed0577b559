use crate::utils::{exponential_decay, linear_decay, rational_decay, step_decay};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Decay curve applied to a non-negative quantity (product age in days,
/// number of past impressions).
///
/// Parsed from `none`, `rational`, `linear:<ttl>`, `exponential:<half_life>`
/// or `step:<ttl>`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum DecayFunction {
    #[default]
    None,
    Linear {
        ttl: f64,
    },
    Rational,
    Exponential {
        half_life: f64,
    },
    /// 1 below `ttl`, -1 from `ttl` onwards (the item is then dropped)
    Step {
        ttl: f64,
    },
}

impl DecayFunction {
    pub fn factor(&self, x: f64) -> f64 {
        match *self {
            DecayFunction::None => 1.0,
            DecayFunction::Linear { ttl } => linear_decay(x, ttl),
            DecayFunction::Rational => rational_decay(x),
            DecayFunction::Exponential { half_life } => exponential_decay(x, half_life),
            DecayFunction::Step { ttl } => step_decay(x, 1.0, -1.0, ttl),
        }
    }
}

impl FromStr for DecayFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let (name, param) = match s.split_once(':') {
            Some((name, param)) => (name, Some(param)),
            None => (s.as_str(), None),
        };

        let parse_param = |param: Option<&str>| -> Result<f64, String> {
            let raw = param.ok_or_else(|| format!("decay function '{}' needs a parameter", name))?;
            let value: f64 = raw
                .parse()
                .map_err(|_| format!("invalid decay parameter '{}'", raw))?;
            if value <= 0.0 {
                return Err(format!("decay parameter must be positive, got {}", value));
            }
            Ok(value)
        };

        match name {
            "" | "none" => Ok(DecayFunction::None),
            "rational" => Ok(DecayFunction::Rational),
            "linear" => Ok(DecayFunction::Linear {
                ttl: parse_param(param)?,
            }),
            "exponential" => Ok(DecayFunction::Exponential {
                half_life: parse_param(param)?,
            }),
            "step" => Ok(DecayFunction::Step {
                ttl: parse_param(param)?,
            }),
            other => Err(format!("unknown decay function '{}'", other)),
        }
    }
}

impl TryFrom<String> for DecayFunction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DecayFunction> for String {
    fn from(value: DecayFunction) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DecayFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecayFunction::None => write!(f, "none"),
            DecayFunction::Rational => write!(f, "rational"),
            DecayFunction::Linear { ttl } => write!(f, "linear:{}", ttl),
            DecayFunction::Exponential { half_life } => write!(f, "exponential:{}", half_life),
            DecayFunction::Step { ttl } => write!(f, "step:{}", ttl),
        }
    }
}
