//! Expression evaluation over a read-only JSON scope.
//!
//! The scope root is a JSON object; bare identifiers resolve to its keys.
//! Member and index access into a resolved value is lenient (missing paths
//! yield `null`), but an unknown root identifier is an error so typos in
//! predicates fail loudly instead of silently evaluating falsey.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;
use serde_json::Value;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::ExprError;
use crate::parser::parse;
use crate::value::{as_number, compare, equals, number_value, to_display_string, truthy, type_name};

/// Compiles and evaluates expressions, caching compiled forms by source
/// string and compiled regexes by pattern for the lifetime of the evaluator
/// (the engine holds one per run).
#[derive(Default)]
pub struct Evaluator {
    compiled: Mutex<HashMap<String, Arc<Expr>>>,
    regexes: Mutex<HashMap<String, Regex>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `source`, reusing the per-run cache.
    pub fn compile(&self, source: &str) -> Result<Arc<Expr>, ExprError> {
        if let Some(expr) = self
            .compiled
            .lock()
            .expect("expression cache poisoned")
            .get(source)
        {
            return Ok(expr.clone());
        }
        let expr = Arc::new(parse(source)?);
        self.compiled
            .lock()
            .expect("expression cache poisoned")
            .insert(source.to_string(), expr.clone());
        Ok(expr)
    }

    /// Compile and evaluate `source` against `scope`.
    pub fn eval_source(&self, source: &str, scope: &Value) -> Result<Value, ExprError> {
        let expr = self.compile(source)?;
        self.eval(&expr, scope)
    }

    /// Compile and evaluate `source` as a boolean predicate.
    pub fn eval_predicate(&self, source: &str, scope: &Value) -> Result<bool, ExprError> {
        Ok(truthy(&self.eval_source(source, scope)?))
    }

    pub fn eval(&self, expr: &Expr, scope: &Value) -> Result<Value, ExprError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => scope
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                Ok(Value::Array(values))
            }
            Expr::Member { object, field } => {
                let object = self.eval(object, scope)?;
                Ok(object.get(field.as_str()).cloned().unwrap_or(Value::Null))
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                Ok(index_value(&object, &index))
            }
            Expr::Call { name, args } => self.call_helper(name, args, scope),
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&operand))),
                    UnaryOp::Neg => number_value(-as_number(&operand)?),
                }
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right, scope),
        }
    }

    fn binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &Value,
    ) -> Result<Value, ExprError> {
        // Short-circuit logic before evaluating the right side.
        match op {
            BinaryOp::Or => {
                let left = self.eval(left, scope)?;
                if truthy(&left) {
                    return Ok(Value::Bool(true));
                }
                let right = self.eval(right, scope)?;
                return Ok(Value::Bool(truthy(&right)));
            }
            BinaryOp::And => {
                let left = self.eval(left, scope)?;
                if !truthy(&left) {
                    return Ok(Value::Bool(false));
                }
                let right = self.eval(right, scope)?;
                return Ok(Value::Bool(truthy(&right)));
            }
            _ => {}
        }

        let left = self.eval(left, scope)?;
        let right = self.eval(right, scope)?;
        match op {
            BinaryOp::Eq => Ok(Value::Bool(equals(&left, &right))),
            BinaryOp::Ne => Ok(Value::Bool(!equals(&left, &right))),
            BinaryOp::Lt => Ok(Value::Bool(compare(&left, &right)?.is_lt())),
            BinaryOp::Le => Ok(Value::Bool(compare(&left, &right)?.is_le())),
            BinaryOp::Gt => Ok(Value::Bool(compare(&left, &right)?.is_gt())),
            BinaryOp::Ge => Ok(Value::Bool(compare(&left, &right)?.is_ge())),
            BinaryOp::Match => self.regex_match(&left, &right),
            BinaryOp::Add => {
                if left.is_string() || right.is_string() {
                    Ok(Value::String(format!(
                        "{}{}",
                        to_display_string(&left),
                        to_display_string(&right)
                    )))
                } else {
                    number_value(as_number(&left)? + as_number(&right)?)
                }
            }
            BinaryOp::Sub => number_value(as_number(&left)? - as_number(&right)?),
            BinaryOp::Mul => number_value(as_number(&left)? * as_number(&right)?),
            BinaryOp::Div => number_value(as_number(&left)? / as_number(&right)?),
            BinaryOp::Rem => number_value(as_number(&left)? % as_number(&right)?),
            BinaryOp::Or | BinaryOp::And => unreachable!("handled above"),
        }
    }

    fn regex_match(&self, left: &Value, right: &Value) -> Result<Value, ExprError> {
        let (haystack, pattern) = match (left, right) {
            (Value::String(h), Value::String(p)) => (h, p),
            (l, r) => {
                return Err(ExprError::Type(format!(
                    "`=~` requires string operands, got {} and {}",
                    type_name(l),
                    type_name(r)
                )))
            }
        };
        use std::collections::hash_map::Entry;
        let mut cache = self.regexes.lock().expect("regex cache poisoned");
        let regex = match cache.entry(pattern.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let compiled = Regex::new(pattern)
                    .map_err(|e| ExprError::Type(format!("invalid regex: {e}")))?;
                entry.insert(compiled)
            }
        };
        Ok(Value::Bool(regex.is_match(haystack)))
    }

    fn call_helper(&self, name: &str, args: &[Expr], scope: &Value) -> Result<Value, ExprError> {
        match name {
            "length" => {
                let [arg] = expect_args::<1>(name, args)?;
                let value = self.eval(arg, scope)?;
                let len = match &value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    Value::Null => 0,
                    other => {
                        return Err(ExprError::Type(format!(
                            "length() is undefined for {}",
                            type_name(other)
                        )))
                    }
                };
                Ok(Value::from(len))
            }
            "contains" => {
                let [coll, needle] = expect_args::<2>(name, args)?;
                let coll = self.eval(coll, scope)?;
                let needle = self.eval(needle, scope)?;
                match &coll {
                    Value::Array(items) => Ok(Value::Bool(items.iter().any(|v| equals(v, &needle)))),
                    Value::String(s) => match &needle {
                        Value::String(sub) => Ok(Value::Bool(s.contains(sub.as_str()))),
                        other => Err(ExprError::Type(format!(
                            "contains() on a string needs a string needle, got {}",
                            type_name(other)
                        ))),
                    },
                    other => Err(ExprError::Type(format!(
                        "contains() is undefined for {}",
                        type_name(other)
                    ))),
                }
            }
            "hasMinPermission" => {
                let [level] = expect_args::<1>(name, args)?;
                let level = self.eval(level, scope)?;
                let level = level.as_str().ok_or_else(|| {
                    ExprError::Type("hasMinPermission() needs a permission level string".to_string())
                })?;
                let required = association_rank(level).ok_or_else(|| {
                    ExprError::Type(format!("unknown permission level `{level}`"))
                })?;
                Ok(Value::Bool(self.actor_rank(scope) >= required))
            }
            "isOwner" => {
                expect_args::<0>(name, args)?;
                Ok(Value::Bool(
                    self.actor_rank(scope) == association_rank("OWNER").unwrap_or(u8::MAX),
                ))
            }
            "always" => {
                expect_args::<0>(name, args)?;
                Ok(Value::Bool(true))
            }
            other => Err(ExprError::Type(format!("unknown function `{other}`"))),
        }
    }

    fn actor_rank(&self, scope: &Value) -> u8 {
        scope
            .get("event")
            .and_then(|e| e.get("actor_association"))
            .and_then(|a| a.as_str())
            .and_then(association_rank)
            .unwrap_or(0)
    }
}

fn index_value(object: &Value, index: &Value) -> Value {
    match (object, index) {
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Object(map), Value::String(key)) => {
            map.get(key.as_str()).cloned().unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

fn association_rank(level: &str) -> Option<u8> {
    match level {
        "NONE" => Some(1),
        "FIRST_TIMER" => Some(2),
        "FIRST_TIME_CONTRIBUTOR" => Some(3),
        "CONTRIBUTOR" => Some(4),
        "COLLABORATOR" => Some(5),
        "MEMBER" => Some(6),
        "OWNER" => Some(7),
        _ => None,
    }
}

fn expect_args<'a, const N: usize>(
    name: &str,
    args: &'a [Expr],
) -> Result<&'a [Expr; N], ExprError> {
    args.try_into().map_err(|_| {
        ExprError::Type(format!(
            "{name}() takes {N} argument{}, got {}",
            if N == 1 { "" } else { "s" },
            args.len()
        ))
    })
}
