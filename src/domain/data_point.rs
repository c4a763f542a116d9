// Per-key aggregation configuration
use super::expression::{Expression, ExpressionError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Median,
    Max,
    Latest,
    Mode,
    Average,
    Min,
    Sum,
}

/// Numeric transform applied to aggregated and latest values.
#[derive(Clone)]
pub struct ValueTransform {
    description: String,
    func: Arc<dyn Fn(f64) -> f64 + Send + Sync>,
}

impl ValueTransform {
    pub fn new<F>(description: impl Into<String>, func: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            func: Arc::new(func),
        }
    }

    pub fn from_expression(source: &str) -> Result<Self, ExpressionError> {
        let expression = Expression::parse(source)?;
        Ok(Self::new(source, move |x| expression.evaluate(x)))
    }

    pub fn apply(&self, value: f64) -> f64 {
        (self.func)(value)
    }
}

impl fmt::Debug for ValueTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueTransform").field(&self.description).finish()
    }
}

#[derive(Debug, Clone)]
pub struct DataPointConfig {
    pub aggregation_type: AggregationType,
    pub fraction_digits: Option<u32>,
    pub raw_value_transformer: Option<ValueTransform>,
}

impl DataPointConfig {
    pub fn new(aggregation_type: AggregationType) -> Self {
        Self {
            aggregation_type,
            fraction_digits: None,
            raw_value_transformer: None,
        }
    }

    pub fn with_fraction_digits(mut self, digits: u32) -> Self {
        self.fraction_digits = Some(digits);
        self
    }

    pub fn with_transform(mut self, transform: ValueTransform) -> Self {
        self.raw_value_transformer = Some(transform);
        self
    }

    /// Transform then round, in that order.
    pub fn finish_value(&self, value: f64) -> f64 {
        let value = match &self.raw_value_transformer {
            Some(transform) => transform.apply(value),
            None => value,
        };
        match self.fraction_digits {
            Some(digits) => round_to(value, digits),
            None => value,
        }
    }
}

pub type DataPointConfigs = BTreeMap<String, DataPointConfig>;

// Beyond this many digits the scaled value loses integer precision.
const MAX_ROUNDING_DIGITS: u32 = 15;

/// Decimal rounding, half away from zero.
pub fn round_to(value: f64, digits: u32) -> f64 {
    if !value.is_finite() || digits > MAX_ROUNDING_DIGITS {
        return value;
    }
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_to(2.6, 0), 3.0);
        assert_eq!(round_to(2.5, 0), 3.0);
        assert_eq!(round_to(-2.5, 0), -3.0);
        assert_eq!(round_to(1.234, 2), 1.23);
        assert_eq!(round_to(1.0 / 3.0, 20), 1.0 / 3.0);
        assert!(round_to(f64::NAN, 1).is_nan());
    }

    #[test]
    fn test_finish_value_transforms_before_rounding() {
        let config = DataPointConfig::new(AggregationType::Max)
            .with_fraction_digits(0)
            .with_transform(ValueTransform::from_expression("x / 1000 * 14").unwrap());
        assert_eq!(config.finish_value(1000.0), 14.0);
        assert_eq!(config.finish_value(1100.0), 15.0);
    }

    #[test]
    fn test_closure_transform() {
        let config = DataPointConfig::new(AggregationType::Sum)
            .with_transform(ValueTransform::new("double", |v| v * 2.0));
        assert_eq!(config.finish_value(2.5), 5.0);
        assert_eq!(
            format!("{:?}", config.raw_value_transformer.unwrap()),
            "ValueTransform(\"double\")"
        );
    }

    #[test]
    fn test_aggregation_type_names() {
        let parsed: Vec<AggregationType> =
            serde_json::from_str(r#"["median","max","latest","mode","average","min","sum"]"#)
                .unwrap();
        assert_eq!(parsed.len(), 7);
        assert_eq!(parsed[0], AggregationType::Median);
    }
}
