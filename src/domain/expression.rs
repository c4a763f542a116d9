// Arithmetic transform expressions over a single raw value `x`
//
// Used by data point configuration, e.g. `x / 1000 * 14` turns an anemometer
// voltage in millivolts into a wind speed. Parsing and evaluation are done by
// evalexpr; `abs` and `sqrt` are registered on top of its builtins.
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, EvalexprResult,
    Function, HashMapContext, Node, Value,
};
use std::fmt;
use thiserror::Error;

pub const VARIABLE: &str = "x";

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("invalid expression: {0}")]
    Syntax(#[source] EvalexprError),
    #[error("unknown variable '{0}', only 'x' is available")]
    UnknownVariable(String),
    #[error("evaluation failed: {0}")]
    Evaluation(#[source] EvalexprError),
}

/// A precompiled transform expression.
#[derive(Clone)]
pub struct Expression {
    source: String,
    tree: Node,
}

impl Expression {
    /// Compiles `source` and evaluates it once so unknown functions and
    /// wrong argument counts surface at load time.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tree = evalexpr::build_operator_tree(source).map_err(ExpressionError::Syntax)?;

        if let Some(name) = tree.iter_variable_identifiers().find(|name| *name != VARIABLE) {
            return Err(ExpressionError::UnknownVariable(name.to_string()));
        }

        let expression = Self {
            source: source.to_string(),
            tree,
        };
        expression
            .try_evaluate(1.0)
            .map_err(ExpressionError::Evaluation)?;
        Ok(expression)
    }

    pub fn try_evaluate(&self, x: f64) -> EvalexprResult<f64> {
        let context = context_for(x)?;
        to_f64(&self.tree.eval_with_context(&context)?)
    }

    /// Evaluation errors at runtime yield `NaN`, like an unparseable reading.
    pub fn evaluate(&self, x: f64) -> f64 {
        match self.try_evaluate(x) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(expression = %self.source, error = %err, "Transform evaluation failed");
                f64::NAN
            }
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.source).finish()
    }
}

fn to_f64(value: &Value) -> EvalexprResult<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        _ => Err(EvalexprError::expected_number(value.clone())),
    }
}

fn context_for(x: f64) -> EvalexprResult<HashMapContext> {
    let mut context = HashMapContext::new();
    context.set_value(VARIABLE.to_string(), Value::Float(x))?;
    context.set_function(
        "abs".to_string(),
        Function::new(|args| Ok(Value::Float(to_f64(args)?.abs()))),
    )?;
    context.set_function(
        "sqrt".to_string(),
        Function::new(|args| Ok(Value::Float(to_f64(args)?.sqrt()))),
    )?;
    Ok(context)
}
