//! Abstract syntax tree
//!
//! The typed AST for the query language: a closed expression sum type,
//! the statement types built from it, traversal helpers, and the
//! canonical printer. Printing any node and re-parsing the output
//! yields an equal AST (accumulator state aside), which is what makes
//! printed predicates usable as partition keys.

use crate::token::{lookup, Token};
use regex::Regex;
use std::cell::Cell;
use std::fmt;

/// An expression that can be evaluated to a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A reference to a document field, addressed by dot-separated
    /// segments
    VarRef(VarRef),
    /// A literal value
    Literal(Literal),
    /// A parenthesized expression
    Paren(Box<Expr>),
    /// An operation between two expressions
    Binary(BinaryExpr),
    /// An aggregate function call carrying its accumulator
    Call(Call),
}

/// A static literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Number(f64),
    /// Unescaped string text
    String(String),
    /// Boolean
    Boolean(bool),
    /// Compiled regular expression
    Regex(RegexLiteral),
    /// Ordered heterogeneous list of literals
    List(Vec<Literal>),
}

/// A reference to a variable.
///
/// `val` is the full dotted name; `segments` holds the dot-split
/// components used as the JSON path.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    /// Full name as written, segments joined with `.`
    pub val: String,
    /// Ordered path segments; never empty
    pub segments: Vec<String>,
}

impl VarRef {
    /// Build a reference from its path segments.
    pub fn new(segments: Vec<String>) -> Self {
        Self {
            val: segments.join("."),
            segments,
        }
    }
}

/// A compiled regular expression literal.
///
/// Wraps [`regex::Regex`] so expressions can be compared; two regex
/// literals are equal when their patterns are.
#[derive(Debug, Clone)]
pub struct RegexLiteral(pub Regex);

impl PartialEq for RegexLiteral {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

/// An operation between two expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    /// The operator token
    pub op: Token,
    /// Left operand
    pub lhs: Box<Expr>,
    /// Right operand
    pub rhs: Box<Expr>,
}

impl BinaryExpr {
    pub(crate) fn new(op: Token, lhs: Expr, rhs: Expr) -> Self {
        Self {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

/// Mutable accumulator state inside a [`Call`].
///
/// The only mutable data in any AST node. The evaluator advances it
/// per matching document and resets it when the final value is read,
/// so a statement can be reused across batches.
#[derive(Debug)]
pub struct Accumulator {
    pub(crate) result: Cell<f64>,
    pub(crate) count: Cell<i64>,
    pub(crate) first: Cell<bool>,
}

impl Accumulator {
    pub(crate) fn new() -> Self {
        Self {
            result: Cell::new(0.0),
            count: Cell::new(0),
            first: Cell::new(true),
        }
    }

    pub(crate) fn reset(&self) {
        self.result.set(0.0);
        self.count.set(0);
        self.first.set(true);
    }
}

/// An aggregate function call.
#[derive(Debug)]
pub struct Call {
    /// Lowercase function name
    pub name: String,
    /// Argument expressions; never contain another call
    pub args: Vec<Expr>,
    pub(crate) state: Accumulator,
}

impl Call {
    /// Create a call with a fresh accumulator. The name is lowercased.
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            args,
            state: Accumulator::new(),
        }
    }
}

// A cloned call never shares accumulator state with its source.
impl Clone for Call {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            args: self.args.clone(),
            state: Accumulator::new(),
        }
    }
}

// Calls compare structurally; accumulator state is transient.
impl PartialEq for Call {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.args == other.args
    }
}

/// An expression bundled with an optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// The field expression
    pub expr: Expr,
    /// Optional `AS` alias
    pub alias: Option<String>,
}

impl Field {
    /// The output name of the field: the alias if set, else the call
    /// name, binary-expression name, or variable name.
    pub fn name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.expr {
            Expr::Call(call) => call.name.clone(),
            Expr::Binary(b) => binary_expr_name(b),
            Expr::Paren(inner) => Field {
                expr: (**inner).clone(),
                alias: None,
            }
            .name(),
            Expr::VarRef(r) => r.val.clone(),
            Expr::Literal(_) => String::new(),
        }
    }
}

/// An expression used to partition the document stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    /// The dimension expression
    pub expr: Expr,
}

/// A single named data source.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Source name
    pub name: String,
}

/// A command for extracting metric points from a document stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    /// Expressions returned from the selection
    pub fields: Vec<Field>,
    /// Data sources that fields are extracted from
    pub sources: Vec<Measurement>,
    /// The WHERE predicate, evaluated per document
    pub condition: Option<Expr>,
    /// GROUP BY dimensions
    pub dimensions: Vec<Dimension>,
    /// True when the statement has no aggregate calls
    pub is_raw_query: bool,
    /// Removes duplicate rows from raw queries; reserved for callers
    pub dedupe: bool,
}

impl SelectStatement {
    /// Identifier names referenced in the WHERE clause, in order.
    pub fn names_in_where(&self) -> Vec<String> {
        match &self.condition {
            Some(cond) => walk_names(cond),
            None => Vec::new(),
        }
    }

    /// Identifier names referenced in the SELECT clause, in order.
    pub fn names_in_select(&self) -> Vec<String> {
        self.fields
            .iter()
            .flat_map(|f| walk_names(&f.expr))
            .collect()
    }

    /// All function calls in the field list, in declaration order.
    pub fn function_calls(&self) -> Vec<&Call> {
        self.fields
            .iter()
            .flat_map(|f| walk_function_calls(&f.expr))
            .collect()
    }

    /// Function calls grouped per field, preserving field order.
    pub fn function_calls_by_position(&self) -> Vec<Vec<&Call>> {
        self.fields
            .iter()
            .map(|f| walk_function_calls(&f.expr))
            .collect()
    }

    /// Output column names, one per field: aliases first, then
    /// generated names with `_N` suffixes resolving conflicts.
    pub fn column_names(&self) -> Vec<String> {
        use std::collections::HashMap;

        let mut names: HashMap<String, usize> = HashMap::new();
        let mut columns = vec![String::new(); self.fields.len()];

        // Aliases take their names outright.
        for (i, field) in self.fields.iter().enumerate() {
            if let Some(alias) = &field.alias {
                columns[i] = alias.clone();
                names.insert(alias.clone(), 1);
            }
        }

        // Generated names defer to aliases and earlier fields.
        for (i, field) in self.fields.iter().enumerate() {
            if !columns[i].is_empty() {
                continue;
            }
            let mut name = field.name();
            if let Some(&count) = names.get(&name) {
                let mut count = count;
                loop {
                    let resolved = format!("{name}_{count}");
                    if !names.contains_key(&resolved) {
                        names.insert(name.clone(), count + 1);
                        name = resolved;
                        break;
                    }
                    count += 1;
                }
            }
            *names.entry(name.clone()).or_insert(0) += 1;
            columns[i] = name;
        }
        columns
    }
}

/// A single command. The grammar currently has one statement form.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// A SELECT statement
    Select(SelectStatement),
}

/// A parsed list of semicolon-separated statements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// The statements, in source order
    pub statements: Vec<Statement>,
}

/// Output names for a list of fields: alias, else function name, else
/// referenced field name.
pub fn field_alias_names(fields: &[Field]) -> Vec<String> {
    fields.iter().map(Field::name).collect()
}

/// Referenced identifier names for a list of fields.
pub fn field_names(fields: &[Field]) -> Vec<String> {
    let mut names = Vec::new();
    for f in fields {
        match &f.expr {
            Expr::Call(call) => names.push(call.name.clone()),
            Expr::VarRef(r) => names.push(r.val.clone()),
            Expr::Binary(_) | Expr::Paren(_) => names.extend(walk_names(&f.expr)),
            Expr::Literal(_) => {}
        }
    }
    names
}

/// Walks an expression and returns every referenced identifier name
/// in depth-first order. Call arguments contribute their direct
/// variable references.
pub fn walk_names(expr: &Expr) -> Vec<String> {
    match expr {
        Expr::VarRef(r) => vec![r.val.clone()],
        Expr::Call(call) => call
            .args
            .iter()
            .filter_map(|arg| match arg {
                Expr::VarRef(r) => Some(r.val.clone()),
                _ => None,
            })
            .collect(),
        Expr::Binary(b) => {
            let mut names = walk_names(&b.lhs);
            names.extend(walk_names(&b.rhs));
            names
        }
        Expr::Paren(inner) => walk_names(inner),
        Expr::Literal(_) => Vec::new(),
    }
}

/// Walks an expression and returns every function call made, without
/// descending into call arguments.
pub fn walk_function_calls(expr: &Expr) -> Vec<&Call> {
    match expr {
        Expr::Call(call) => vec![call],
        Expr::Binary(b) => {
            let mut calls = walk_function_calls(&b.lhs);
            calls.extend(walk_function_calls(&b.rhs));
            calls
        }
        Expr::Paren(inner) => walk_function_calls(inner),
        Expr::VarRef(_) | Expr::Literal(_) => Vec::new(),
    }
}

/// The generated name of a binary expression: referenced identifiers
/// and call names joined with underscores.
pub fn binary_expr_name(expr: &BinaryExpr) -> String {
    fn collect(expr: &Expr, names: &mut Vec<String>) {
        match expr {
            Expr::VarRef(r) => names.push(r.val.clone()),
            Expr::Call(call) => names.push(call.name.clone()),
            Expr::Binary(b) => {
                collect(&b.lhs, names);
                collect(&b.rhs, names);
            }
            Expr::Paren(inner) => collect(inner, names),
            Expr::Literal(_) => {}
        }
    }
    let mut names = Vec::new();
    collect(&expr.lhs, &mut names);
    collect(&expr.rhs, &mut names);
    names.join("_")
}

/// True if the expression has a term constraining the `time`
/// identifier.
pub fn has_time_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Binary(b) => {
            if b.op == Token::And || b.op == Token::Or {
                return has_time_expr(&b.lhs) || has_time_expr(&b.rhs);
            }
            matches!(&*b.lhs, Expr::VarRef(r) if r.val.eq_ignore_ascii_case("time"))
        }
        Expr::Paren(inner) => has_time_expr(inner),
        _ => false,
    }
}

/// True if the expression constrains nothing but the `time`
/// identifier.
pub fn only_time_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Binary(b) => {
            if b.op == Token::And || b.op == Token::Or {
                return only_time_expr(&b.lhs) && only_time_expr(&b.rhs);
            }
            matches!(&*b.lhs, Expr::VarRef(r) if r.val.eq_ignore_ascii_case("time"))
        }
        Expr::Paren(inner) => only_time_expr(inner),
        _ => false,
    }
}

/// Returns the source name that matches a field name. Always returns
/// the empty string; sources carry no field mapping.
pub fn match_source(_sources: &[Measurement], _name: &str) -> String {
    String::new()
}

/// True if the identifier must be double-quoted when printed: it is a
/// keyword, starts with something other than a letter or underscore,
/// or contains non-identifier characters.
fn ident_needs_quotes(ident: &str) -> bool {
    if lookup(ident) != Token::Ident {
        return true;
    }
    for (i, ch) in ident.chars().enumerate() {
        let ok = if i == 0 {
            ch.is_ascii_alphabetic() || ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || ch == '_'
        };
        if !ok {
            return true;
        }
    }
    false
}

/// Quotes identifier segments, joining them with dots. Every segment
/// other than a trailing plain identifier is double-quoted; embedded
/// quotes are escaped.
pub fn quote_ident(segments: &[&str]) -> String {
    let mut buf = String::new();
    let last = segments.len().saturating_sub(1);
    for (i, segment) in segments.iter().enumerate() {
        let needs_quote = ident_needs_quotes(segment) || (i < last && !segment.is_empty());
        if needs_quote {
            buf.push('"');
        }
        buf.push_str(&segment.replace('"', "\\\""));
        if needs_quote {
            buf.push('"');
        }
        if i < last {
            buf.push('.');
        }
    }
    buf
}

/// Quotes a string literal in single quotes, escaping backslashes,
/// quotes and newlines.
pub fn quote_string(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n");
    format!("'{escaped}'")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::VarRef(r) => r.fmt(f),
            Expr::Literal(lit) => lit.fmt(f),
            Expr::Paren(inner) => write!(f, "({inner})"),
            Expr::Binary(b) => b.fmt(f),
            Expr::Call(call) => call.fmt(f),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(v) => write!(f, "{v}"),
            Literal::Number(v) => write!(f, "{v:.3}"),
            Literal::String(s) => f.write_str(&quote_string(s)),
            Literal::Boolean(b) => f.write_str(if *b { "true" } else { "false" }),
            Literal::Regex(re) => re.fmt(f),
            Literal::List(vals) => {
                f.write_str("[")?;
                for (i, val) in vals.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    val.fmt(f)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl fmt::Display for RegexLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.0.as_str().replace('/', "\\/"))
    }
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let segments: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        f.write_str(&quote_ident(&segments))
    }
}

impl fmt::Display for BinaryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            arg.fmt(f)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.expr.fmt(f)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {}", quote_ident(&[alias.as_str()]))?;
        }
        Ok(())
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.expr.fmt(f)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            field.fmt(f)?;
        }
        if !self.sources.is_empty() {
            f.write_str(" FROM ")?;
            for (i, source) in self.sources.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                source.fmt(f)?;
            }
        }
        if let Some(cond) = &self.condition {
            write!(f, " WHERE {cond}")?;
        }
        if !self.dimensions.is_empty() {
            f.write_str(" GROUP BY ")?;
            for (i, dim) in self.dimensions.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                dim.fmt(f)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(stmt) => stmt.fmt(f),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stmt) in self.statements.iter().enumerate() {
            if i > 0 {
                f.write_str(";\n")?;
            }
            stmt.fmt(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_expr, parse_statement};

    fn select(s: &str) -> SelectStatement {
        match parse_statement(s).unwrap() {
            Statement::Select(stmt) => stmt,
        }
    }

    #[test]
    fn test_names_in_select() {
        let stmt = select("select count(asdf), count(bar) from cpu");
        assert_eq!(stmt.names_in_select(), vec!["asdf", "bar"]);
    }

    #[test]
    fn test_names_in_where() {
        let stmt = select(
            "select sum(xxx) from cpu where time > 23 AND (asdf = 'jkl' OR (foo = 'bar' AND baz = 'bar'))",
        );
        assert_eq!(stmt.names_in_where(), vec!["time", "asdf", "foo", "baz"]);
    }

    #[test]
    fn test_function_calls_by_position() {
        let stmt = select("select sum(a), max(b) + min(c) from m");
        let per_field = stmt.function_calls_by_position();
        assert_eq!(per_field.len(), 2);
        assert_eq!(per_field[0].len(), 1);
        assert_eq!(per_field[1].len(), 2);
        assert_eq!(stmt.function_calls().len(), 3);
    }

    #[test]
    fn test_is_raw_query_flag() {
        let cases = [
            ("select value1, value2 from foo", true),
            ("select mean(value) from foo group by bar", false),
            ("select sum(value), max(value) from foo", false),
        ];
        for (s, raw) in cases {
            assert_eq!(select(s).is_raw_query, raw, "{s}");
        }
    }

    #[test]
    fn test_binary_expr_name() {
        let cases = [
            ("value + 1", "value"),
            ("\"user\" / total", "user_total"),
            ("(\"user\" + total) / total", "user_total_total"),
        ];
        for (s, name) in cases {
            match parse_expr(s).unwrap() {
                Expr::Binary(b) => assert_eq!(binary_expr_name(&b), name, "{s}"),
                other => panic!("expected binary expression for {s}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_only_time_expr() {
        let cases = [
            ("SELECT value FROM myseries WHERE value > 1", false),
            ("SELECT value FROM foo WHERE time >= 946684805", true),
            (
                "SELECT value FROM foo WHERE time >= 946684805 AND time < 946684900",
                true,
            ),
            (
                "SELECT value FROM foo WHERE time >= 946684805 AND asdf = 'bar'",
                false,
            ),
            (
                "SELECT value FROM foo WHERE asdf = 'jkl' AND (time >= 946684805 AND time < 946684900)",
                false,
            ),
        ];
        for (s, expected) in cases {
            let stmt = select(s);
            let cond = stmt.condition.as_ref().unwrap();
            assert_eq!(only_time_expr(cond), expected, "{s}");
            if expected {
                assert!(has_time_expr(cond), "{s}");
            }
        }
    }

    #[test]
    fn test_quote_string() {
        let cases = [
            ("", "''"),
            ("foo", "'foo'"),
            ("foo\nbar", "'foo\\nbar'"),
            ("foo bar\\\\", "'foo bar\\\\\\\\'"),
            ("'foo'", "'\\'foo\\''"),
        ];
        for (input, expected) in cases {
            assert_eq!(quote_string(input), expected, "{input:?}");
        }
    }

    #[test]
    fn test_quote_ident() {
        let cases: [(&[&str], &str); 9] = [
            (&[""], ""),
            (&["select"], "\"select\""),
            (&["in-bytes"], "\"in-bytes\""),
            (&["foo", "bar"], "\"foo\".bar"),
            (&["foo", "", "bar"], "\"foo\"..bar"),
            (&["foo bar", "baz"], "\"foo bar\".baz"),
            (&["foo.bar", "baz"], "\"foo.bar\".baz"),
            (&["foo.bar", "rp", "baz"], "\"foo.bar\".\"rp\".baz"),
            (&["foo.bar", "rp", "1baz"], "\"foo.bar\".\"rp\".\"1baz\""),
        ];
        for (segments, expected) in cases {
            assert_eq!(quote_ident(segments), expected, "{segments:?}");
        }
    }

    #[test]
    fn test_field_names_and_aliases() {
        struct Case {
            fields: &'static [&'static str],
            names: &'static [&'static str],
            aliases: &'static [&'static str],
        }
        let cases = [
            Case {
                fields: &["value+value"],
                names: &["value", "value"],
                aliases: &["value_value"],
            },
            Case {
                fields: &["value+value", "temperature"],
                names: &["value", "value", "temperature"],
                aliases: &["value_value", "temperature"],
            },
            Case {
                fields: &["mean(value)"],
                names: &["mean"],
                aliases: &["mean"],
            },
            Case {
                fields: &["mean(value) + max(value)"],
                names: &["value", "value"],
                aliases: &["mean_max"],
            },
            Case {
                fields: &["(value)"],
                names: &["value"],
                aliases: &["value"],
            },
            Case {
                fields: &["(value + value)"],
                names: &["value", "value"],
                aliases: &["value_value"],
            },
            Case {
                fields: &["(mean(value))"],
                names: &["value"],
                aliases: &["mean"],
            },
            Case {
                fields: &["(mean(value) + max(value))"],
                names: &["value"; 2],
                aliases: &["mean_max"],
            },
        ];

        for case in cases {
            let fields: Vec<Field> = case
                .fields
                .iter()
                .map(|s| Field {
                    expr: parse_expr(s).unwrap(),
                    alias: None,
                })
                .collect();
            assert_eq!(field_names(&fields), case.names, "{:?}", case.fields);
            assert_eq!(field_alias_names(&fields), case.aliases, "{:?}", case.fields);
        }
    }

    #[test]
    fn test_column_names() {
        fn var(name: &str) -> Field {
            Field {
                expr: Expr::VarRef(VarRef::new(vec![name.to_string()])),
                alias: None,
            }
        }

        let stmt = SelectStatement {
            fields: vec![var("value"), var("value"), var("value_1")],
            ..Default::default()
        };
        assert_eq!(stmt.column_names(), vec!["value", "value_1", "value_1_1"]);

        let stmt = SelectStatement {
            fields: vec![var("value"), var("value_1"), var("value")],
            ..Default::default()
        };
        assert_eq!(stmt.column_names(), vec!["value", "value_1", "value_2"]);

        let stmt = SelectStatement {
            fields: vec![
                var("value"),
                Field {
                    expr: Expr::VarRef(VarRef::new(vec!["total".to_string()])),
                    alias: Some("value".to_string()),
                },
                var("value"),
            ],
            ..Default::default()
        };
        assert_eq!(stmt.column_names(), vec!["value_1", "value", "value_2"]);
    }

    #[test]
    fn test_clone_resets_accumulators() {
        let stmt = select("select sum(x) from m where uid = 1");
        let doc: serde_json::Value = serde_json::json!({"uid": 1, "x": 5});
        crate::eval::accumulate_fields(&stmt, &doc);
        crate::eval::accumulate_fields(&stmt, &doc);

        let clone = stmt.clone();
        crate::eval::accumulate_fields(&clone, &doc);

        // The original still holds its two updates; the clone started
        // fresh and holds one.
        let original = crate::eval::eval(&stmt.fields[0].expr, &serde_json::Value::Null);
        let cloned = crate::eval::eval(&clone.fields[0].expr, &serde_json::Value::Null);
        assert_eq!(original, crate::eval::Value::Float(10.0));
        assert_eq!(cloned, crate::eval::Value::Float(5.0));
    }

    #[test]
    fn test_statement_display_round_trip() {
        let cases = [
            "SELECT sum(x) FROM m",
            "SELECT sum(\"tcp\".in_bytes + \"tcp\".out_bytes) AS total FROM x WHERE uid = 1",
            "SELECT count(v) FROM m WHERE host =~ /us-[we]\\/st/ GROUP BY \"tcp\".src_ip, \"tcp\".dst_ip",
            "SELECT max(v), min(v) FROM m WHERE a = 'it\\'s' AND b IN [1, 'two', true]",
            "SELECT mean(v) FROM m WHERE x = 100.500 OR y < -12",
        ];
        for s in cases {
            let stmt = parse_statement(s).unwrap();
            let printed = stmt.to_string();
            let reparsed = parse_statement(&printed)
                .unwrap_or_else(|e| panic!("reparse of {printed:?} failed: {e}"));
            assert_eq!(stmt, reparsed, "round trip of {s:?} via {printed:?}");
        }
    }

    #[test]
    fn test_match_source_is_empty() {
        let sources = vec![Measurement {
            name: "cpu".to_string(),
        }];
        assert_eq!(match_source(&sources, "cpu.value"), "");
    }
}
