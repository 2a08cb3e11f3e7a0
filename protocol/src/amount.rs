use serde::{Deserialize, Serialize};

/// Largest magnitude accepted for an amount. Above 2^53 an `f64` can no
/// longer represent every integer.
const MAX_WHOLE_AMOUNT: f64 = 9_007_199_254_740_991.0;

/// Amount as sent by a client: either a JSON number or a numeric string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(f64),
    Text(String),
}

impl AmountInput {
    /// Returns the amount if it is a finite whole number in range.
    pub fn whole(&self) -> Option<i64> {
        let value = match self {
            AmountInput::Number(value) => *value,
            AmountInput::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        if !value.is_finite() || value.fract() != 0.0 || value.abs() > MAX_WHOLE_AMOUNT {
            return None;
        }
        Some(value as i64)
    }

    /// Returns the amount if it is a strictly positive whole number.
    pub fn positive(&self) -> Option<u64> {
        self.whole()
            .filter(|value| *value > 0)
            .map(|value| value as u64)
    }
}

impl From<u64> for AmountInput {
    fn from(value: u64) -> Self {
        AmountInput::Number(value as f64)
    }
}
