//! Expression evaluator
//!
//! A tree-walker computing dynamically typed values from expressions
//! and JSON documents. Evaluation is deliberately total: a missing
//! path, a type mismatch, or an undefined operator combination
//! produces null (or false for equality tests), never an error.
//!
//! The evaluator's one side effect is aggregate accumulation: when
//! the driver has decided a document passes the predicate, it feeds
//! the document through every call in the field list, advancing the
//! accumulator held inside each [`Call`] node. Reading a call's value
//! back out resets its accumulator so the statement can be reused
//! across batches.

use crate::ast::{Call, Expr, Literal, RegexLiteral, SelectStatement};
use crate::token::Token;
use std::fmt;

/// A dynamically typed runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent, mistyped, or undefined
    Null,
    /// Boolean
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// String
    String(String),
    /// Compiled regular expression
    Regex(RegexLiteral),
    /// List of values
    List(Vec<Value>),
}

impl Value {
    /// The primitive data type of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Float(_) => DataType::Float,
            Value::Integer(_) => DataType::Integer,
            Value::String(_) => DataType::String,
            Value::Boolean(_) => DataType::Boolean,
            _ => DataType::Unknown,
        }
    }

    /// The value as a float when it is numeric.
    fn as_numeric(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// The primitive data types a value can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Not one of the primitive types
    Unknown,
    /// 64-bit float
    Float,
    /// 64-bit signed integer
    Integer,
    /// String of text
    String,
    /// Boolean
    Boolean,
    /// Any field value
    AnyField,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Unknown => "unknown",
            DataType::Float => "float",
            DataType::Integer => "integer",
            DataType::String => "string",
            DataType::Boolean => "boolean",
            DataType::AnyField => "field",
        };
        f.write_str(s)
    }
}

/// A document the evaluator can walk by segment path.
///
/// The single required operation keeps the evaluator independent of
/// the JSON representation; [`serde_json::Value`] is the reference
/// implementation.
pub trait Document {
    /// Walk the document along `segments` and return the typed leaf
    /// value. Absent paths and non-leaf values yield [`Value::Null`].
    fn field(&self, segments: &[String]) -> Value;
}

impl Document for serde_json::Value {
    fn field(&self, segments: &[String]) -> Value {
        let mut node = self;
        for segment in segments {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Value::Null,
            }
        }
        match node {
            serde_json::Value::Number(n) => {
                // Whole numbers keep integer typing; anything written
                // with a fractional part becomes a float.
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            _ => Value::Null,
        }
    }
}

/// Evaluate an expression against a document.
///
/// Evaluating a [`Call`] returns its finalized aggregate value and
/// resets the accumulator.
pub fn eval(expr: &Expr, doc: &dyn Document) -> Value {
    match expr {
        Expr::Literal(lit) => literal_value(lit),
        Expr::Paren(inner) => eval(inner, doc),
        Expr::VarRef(r) => doc.field(&r.segments),
        Expr::Binary(b) => {
            let lhs = eval(&b.lhs, doc);
            let rhs = eval(&b.rhs, doc);
            eval_binary(b.op, lhs, rhs)
        }
        Expr::Call(call) => call.finalize(),
    }
}

/// Evaluate an expression and return whether the result is boolean
/// true.
pub fn eval_bool(expr: &Expr, doc: &dyn Document) -> bool {
    matches!(eval(expr, doc), Value::Boolean(true))
}

/// Feed one matching document into every aggregate call in the
/// statement's field list, in declaration order.
pub fn accumulate_fields(stmt: &SelectStatement, doc: &dyn Document) {
    for field in &stmt.fields {
        accumulate(&field.expr, doc);
    }
}

/// Walk a field expression and advance the accumulator of every call
/// encountered.
pub fn accumulate(expr: &Expr, doc: &dyn Document) {
    match expr {
        Expr::Call(call) => call.accumulate(doc),
        Expr::Binary(b) => {
            accumulate(&b.lhs, doc);
            accumulate(&b.rhs, doc);
        }
        Expr::Paren(inner) => accumulate(inner, doc),
        Expr::VarRef(_) | Expr::Literal(_) => {}
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Integer(v) => Value::Integer(*v),
        Literal::Number(v) => Value::Float(*v),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Regex(re) => Value::Regex(re.clone()),
        Literal::List(vals) => Value::List(vals.iter().map(literal_value).collect()),
    }
}

/// Dispatch a binary operation on the left operand's runtime type.
///
/// Integers coerce to float when the other side is float and stay
/// integer otherwise. Equality between incompatible types is false;
/// ordering between incompatible types is null; logical operators on
/// non-booleans are null. Division by zero yields float zero.
fn eval_binary(op: Token, lhs: Value, rhs: Value) -> Value {
    use crate::token::Token::*;

    match &lhs {
        Value::Boolean(l) => {
            let l = *l;
            let (r, ok) = match rhs {
                Value::Boolean(r) => (r, true),
                _ => (false, false),
            };
            match op {
                And => Value::Boolean(ok && l && r),
                Or => Value::Boolean(ok && (l || r)),
                Eq => Value::Boolean(ok && l == r),
                Neq => Value::Boolean(ok && l != r),
                _ => Value::Null,
            }
        }
        Value::Float(l) => {
            let l = *l;
            let (r, ok) = match &rhs {
                Value::Float(r) => (*r, true),
                Value::Integer(r) => (*r as f64, true),
                _ => (0.0, false),
            };
            match op {
                In => Value::Boolean(in_list(&lhs, &rhs)),
                Ni => Value::Boolean(!in_list(&lhs, &rhs)),
                Eq => Value::Boolean(ok && l == r),
                Neq => Value::Boolean(ok && l != r),
                Lt if ok => Value::Boolean(l < r),
                Lte if ok => Value::Boolean(l <= r),
                Gt if ok => Value::Boolean(l > r),
                Gte if ok => Value::Boolean(l >= r),
                Add if ok => Value::Float(l + r),
                Sub if ok => Value::Float(l - r),
                Mul if ok => Value::Float(l * r),
                Div if ok => {
                    if r == 0.0 {
                        Value::Float(0.0)
                    } else {
                        Value::Float(l / r)
                    }
                }
                _ => Value::Null,
            }
        }
        Value::Integer(l) => {
            let l = *l;
            if let Value::Float(r) = &rhs {
                // One float side promotes the whole operation.
                let (lf, r) = (l as f64, *r);
                match op {
                    Eq => Value::Boolean(lf == r),
                    Neq => Value::Boolean(lf != r),
                    Lt => Value::Boolean(lf < r),
                    Lte => Value::Boolean(lf <= r),
                    Gt => Value::Boolean(lf > r),
                    Gte => Value::Boolean(lf >= r),
                    Add => Value::Float(lf + r),
                    Sub => Value::Float(lf - r),
                    Mul => Value::Float(lf * r),
                    Div => {
                        if r == 0.0 {
                            Value::Float(0.0)
                        } else {
                            Value::Float(lf / r)
                        }
                    }
                    _ => Value::Null,
                }
            } else {
                let (r, ok) = match &rhs {
                    Value::Integer(r) => (*r, true),
                    _ => (0, false),
                };
                match op {
                    In => Value::Boolean(in_list(&lhs, &rhs)),
                    Ni => Value::Boolean(!in_list(&lhs, &rhs)),
                    Eq => Value::Boolean(ok && l == r),
                    Neq => Value::Boolean(ok && l != r),
                    Lt if ok => Value::Boolean(l < r),
                    Lte if ok => Value::Boolean(l <= r),
                    Gt if ok => Value::Boolean(l > r),
                    Gte if ok => Value::Boolean(l >= r),
                    Add if ok => Value::Integer(l.wrapping_add(r)),
                    Sub if ok => Value::Integer(l.wrapping_sub(r)),
                    Mul if ok => Value::Integer(l.wrapping_mul(r)),
                    Div if ok => {
                        if r == 0 {
                            Value::Float(0.0)
                        } else {
                            Value::Integer(l.wrapping_div(r))
                        }
                    }
                    _ => Value::Null,
                }
            }
        }
        Value::String(l) => match op {
            In => Value::Boolean(in_list(&lhs, &rhs)),
            Ni => Value::Boolean(!in_list(&lhs, &rhs)),
            Eq => Value::Boolean(matches!(&rhs, Value::String(r) if l == r)),
            Neq => Value::Boolean(matches!(&rhs, Value::String(r) if l != r)),
            EqRegex => Value::Boolean(matches!(&rhs, Value::Regex(re) if re.0.is_match(l))),
            NeqRegex => Value::Boolean(matches!(&rhs, Value::Regex(re) if !re.0.is_match(l))),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

/// True iff the value deep-equals at least one element of the list.
/// Anything other than a list on the right is simply no match.
fn in_list(val: &Value, list: &Value) -> bool {
    match list {
        Value::List(vals) => vals.iter().any(|v| v == val),
        _ => false,
    }
}

impl Call {
    fn argument(&self, doc: &dyn Document) -> Option<f64> {
        self.args.first().and_then(|arg| eval(arg, doc).as_numeric())
    }

    /// Advance the accumulator for one matching document. Non-numeric
    /// argument values skip the update for numeric aggregates; names
    /// outside the aggregate set accumulate nothing.
    pub(crate) fn accumulate(&self, doc: &dyn Document) {
        let st = &self.state;
        match self.name.as_str() {
            "count" => st.count.set(st.count.get() + 1),
            "sum" | "avg" => {
                if let Some(v) = self.argument(doc) {
                    st.result.set(st.result.get() + v);
                    st.count.set(st.count.get() + 1);
                }
            }
            "max" => {
                if let Some(v) = self.argument(doc) {
                    if st.first.get() {
                        st.result.set(v);
                        st.first.set(false);
                    } else if v > st.result.get() {
                        st.result.set(v);
                    }
                    st.count.set(st.count.get() + 1);
                }
            }
            "min" => {
                if let Some(v) = self.argument(doc) {
                    if st.first.get() {
                        st.result.set(v);
                        st.first.set(false);
                    } else if v < st.result.get() {
                        st.result.set(v);
                    }
                    st.count.set(st.count.get() + 1);
                }
            }
            "first" => {
                if let Some(v) = self.argument(doc) {
                    if st.first.get() {
                        st.result.set(v);
                        st.first.set(false);
                    }
                    st.count.set(st.count.get() + 1);
                }
            }
            "last" => {
                if let Some(v) = self.argument(doc) {
                    st.result.set(v);
                    st.count.set(st.count.get() + 1);
                }
            }
            _ => {}
        }
    }

    /// Read the final aggregated value and reset the accumulator to
    /// its initial state.
    pub(crate) fn finalize(&self) -> Value {
        let st = &self.state;
        let value = match self.name.as_str() {
            "count" => st.count.get() as f64,
            "avg" if st.count.get() > 0 => st.result.get() / st.count.get() as f64,
            _ => st.result.get(),
        };
        st.reset();
        Value::Float(value)
    }
}
