//! # Sift
//!
//! An embedded query engine for a SQL-like language over streams of
//! JSON documents, producing time-series metric points.
//!
//! A statement names aggregate functions over JSON-path-addressed
//! fields, restricts the document stream with a boolean predicate,
//! and optionally partitions results along one or more dimensions:
//!
//! ```text
//! SELECT sum(tcp.in_bytes + tcp.out_bytes) AS total
//! FROM flows
//! WHERE uid = 1 AND proto != 'icmp'
//! GROUP BY tcp.src_ip, tcp.dst_ip
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! text → Scanner → Parser → SelectStatement → flatten by group
//!      → predicate filter → aggregate accumulation → Points
//! ```
//!
//! - [`scanner`]: hand-written lexical scanner with one-token
//!   lookahead and on-demand regex scanning
//! - [`parser`]: recursive-descent parser with operator precedence
//!   and statement validation
//! - [`ast`]: the typed syntax tree and its canonical printer
//! - [`eval`]: the tree-walking evaluator and aggregate accumulators
//! - [`group`]: GROUP BY flattening and the batch driver
//!
//! ## Quick start
//!
//! ```rust
//! use serde_json::json;
//!
//! let docs: Vec<serde_json::Value> = (0..3)
//!     .map(|i| json!({"uid": 1, "tcp": {"in_bytes": 10 * i, "out_bytes": 20}}))
//!     .collect();
//!
//! let points = sift::eval_sql(
//!     "SELECT sum(tcp.in_bytes + tcp.out_bytes) FROM flows WHERE uid = 1",
//!     &docs,
//! )?;
//!
//! let partition = &points["uid = 1"];
//! assert_eq!(partition[0].metric, 90.0);
//! # Ok::<(), sift::QueryError>(())
//! ```
//!
//! ## Reuse and concurrency
//!
//! A parsed statement owns mutable accumulator state inside its
//! aggregate calls, so a statement must not be shared across threads
//! while it is being driven. Parse once, then clone per worker: a
//! clone shares no accumulator with its source and every read of a
//! final value resets the state for the next batch.

pub mod ast;
pub mod error;
pub mod eval;
pub mod group;
pub mod parser;
pub mod scanner;
pub mod token;

pub use ast::{
    BinaryExpr, Call, Dimension, Expr, Field, Literal, Measurement, Query, RegexLiteral,
    SelectStatement, Statement, VarRef,
};
pub use error::{QueryError, QueryResult};
pub use eval::{accumulate, accumulate_fields, eval, eval_bool, DataType, Document, Value};
pub use group::{eval_sql, eval_sql_str, Point};
pub use parser::{parse_expr, parse_query, parse_statement, Parser};
pub use scanner::Scanner;
pub use token::{Pos, Token};
