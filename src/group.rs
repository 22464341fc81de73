//! Group flattening and the batch driver
//!
//! A statement with GROUP BY dimensions is flattened into one
//! concrete statement per observed dimension tuple: every dimension
//! is pinned with an equality against the value it takes in a
//! document, the original WHERE predicate is conjoined last, and the
//! canonical printed form of the resulting predicate becomes the
//! partition key.
//!
//! The driver ties the pipeline together for a batch: parse, flatten,
//! filter, accumulate, and emit one point per field per partition.

use crate::ast::{BinaryExpr, Expr, Literal, SelectStatement, Statement};
use crate::error::QueryResult;
use crate::eval::{accumulate_fields, eval, Value};
use crate::parser;
use crate::token::Token;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single emitted metric point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// The finalized metric value
    pub metric: f64,
    /// Wall-clock timestamp, epoch seconds
    pub ts: i64,
}

impl SelectStatement {
    /// Flatten a statement with dimensions into a map from partition
    /// key to a cloned statement whose predicate pins every dimension
    /// to the value observed in some document. Documents that agree
    /// on every dimension value collapse onto the same key.
    pub fn flatten_by_group(
        &self,
        docs: &[serde_json::Value],
    ) -> HashMap<String, SelectStatement> {
        let mut predicates: HashMap<String, Expr> = HashMap::new();

        for doc in docs {
            let mut root: Option<Expr> = None;
            for dim in &self.dimensions {
                let value = match eval(&dim.expr, doc) {
                    Value::String(s) => Literal::String(s),
                    Value::Float(f) => Literal::Number(f),
                    Value::Integer(i) => Literal::Integer(i),
                    Value::Boolean(b) => Literal::Boolean(b),
                    // A dimension the document does not carry is not
                    // pinned for it.
                    _ => continue,
                };
                let eq = Expr::Binary(BinaryExpr::new(
                    Token::Eq,
                    dim.expr.clone(),
                    Expr::Literal(value),
                ));
                root = Some(match root {
                    None => Expr::Binary(BinaryExpr::new(
                        Token::And,
                        Expr::Literal(Literal::Boolean(true)),
                        eq,
                    )),
                    Some(prev) => Expr::Binary(BinaryExpr::new(Token::And, prev, eq)),
                });
            }

            let mut predicate =
                root.unwrap_or_else(|| Expr::Literal(Literal::Boolean(true)));
            if let Some(cond) = &self.condition {
                predicate = Expr::Binary(BinaryExpr::new(Token::And, predicate, cond.clone()));
            }
            predicates.insert(predicate.to_string(), predicate);
        }

        let mut flattened = HashMap::new();
        for (key, predicate) in predicates {
            let mut stmt = self.clone();
            stmt.condition = Some(predicate);
            flattened.insert(key, stmt);
        }
        flattened
    }

    /// Emit one point per field, in declaration order, by reading the
    /// finalized accumulator values. Every point carries the current
    /// wall time.
    pub fn eval_metrics(&self) -> Vec<Point> {
        let ts = Utc::now().timestamp();
        self.fields
            .iter()
            .map(|field| {
                let metric = match eval(&field.expr, &serde_json::Value::Null) {
                    Value::Float(v) => v,
                    Value::Integer(v) => v as f64,
                    other => {
                        tracing::warn!(
                            field = %field,
                            value = ?other,
                            "field did not finalize to a number, emitting 0"
                        );
                        0.0
                    }
                };
                Point { metric, ts }
            })
            .collect()
    }
}

/// Evaluate a statement over a batch of documents, returning metric
/// points keyed by partition.
///
/// The statement is parsed, flattened by GROUP BY (a single partition
/// keyed by the printed WHERE predicate, or `"true"`, when no
/// dimensions are present), and every partition's predicate is tested
/// against every document in batch order. Matching documents feed the
/// aggregates; one point per field is emitted per partition.
pub fn eval_sql(
    query: &str,
    docs: &[serde_json::Value],
) -> QueryResult<HashMap<String, Vec<Point>>> {
    let Statement::Select(stmt) = parser::parse_statement(query)?;

    let partitions = if stmt.dimensions.is_empty() {
        let key = stmt
            .condition
            .as_ref()
            .map(Expr::to_string)
            .unwrap_or_else(|| "true".to_string());
        HashMap::from([(key, stmt)])
    } else {
        stmt.flatten_by_group(docs)
    };

    tracing::debug!(
        partitions = partitions.len(),
        docs = docs.len(),
        "evaluating statement"
    );

    let mut points = HashMap::new();
    for (key, stmt) in &partitions {
        for doc in docs {
            match &stmt.condition {
                None => accumulate_fields(stmt, doc),
                Some(cond) => match eval(cond, doc) {
                    Value::Boolean(true) => accumulate_fields(stmt, doc),
                    Value::Boolean(false) => {}
                    other => {
                        tracing::warn!(
                            predicate = %cond,
                            value = ?other,
                            "WHERE predicate did not evaluate to a boolean"
                        );
                    }
                },
            }
        }
        points.insert(key.clone(), stmt.eval_metrics());
    }
    Ok(points)
}

/// [`eval_sql`] over raw JSON text. Documents that fail to parse are
/// skipped with a warning.
pub fn eval_sql_str(query: &str, docs: &[&str]) -> QueryResult<HashMap<String, Vec<Point>>> {
    let parsed: Vec<serde_json::Value> = docs
        .iter()
        .filter_map(|doc| match serde_json::from_str(doc) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(error = %err, "skipping unparseable document");
                None
            }
        })
        .collect();
    eval_sql(query, &parsed)
}
