//! Query parser
//!
//! A recursive-descent parser over the token stream. Expressions are
//! built by precedence climbing: each new operator is inserted down
//! the right spine of the tree until it meets a subtree that binds at
//! least as tightly, which also gives left associativity within a
//! level. After an `=~` or `!~` the scanner is switched into regex
//! mode for the right-hand side, and `IN`/`NI` require a bracketed
//! list of literals.
//!
//! Statement validation runs as part of parsing; the first violated
//! rule wins.

use crate::ast::{
    walk_function_calls, BinaryExpr, Call, Dimension, Expr, Field, Literal, Measurement, Query,
    RegexLiteral, SelectStatement, Statement, VarRef,
};
use crate::error::{QueryError, QueryResult};
use crate::scanner::{is_whitespace, Scanner};
use crate::token::{tokstr, Pos, Token};
use regex::Regex;
use std::collections::HashMap;

/// Aggregates that may coexist with bare references in a field list.
const SELECTORS: [&str; 8] = [
    "top",
    "bottom",
    "max",
    "min",
    "first",
    "last",
    "percentile",
    "sample",
];

/// Parse a single statement and require EOF after it.
pub fn parse_statement(s: &str) -> QueryResult<Statement> {
    Parser::new(s).parse_statement()
}

/// Parse a semicolon-separated list of statements.
pub fn parse_query(s: &str) -> QueryResult<Query> {
    Parser::new(s).parse_query()
}

/// Parse a single expression.
pub fn parse_expr(s: &str) -> QueryResult<Expr> {
    Parser::new(s).parse_expr()
}

/// The query parser.
pub struct Parser {
    s: Scanner,
    /// Unscanned tokens, innermost last
    buf: Vec<(Token, Pos, String)>,
    params: HashMap<String, serde_json::Value>,
}

impl Parser {
    /// Create a parser over the given input.
    pub fn new(input: &str) -> Self {
        Self {
            s: Scanner::new(input),
            buf: Vec::new(),
            params: HashMap::new(),
        }
    }

    /// Supply values for `$name` bound parameters.
    pub fn set_params(&mut self, params: HashMap<String, serde_json::Value>) {
        self.params = params;
    }

    /// Parse a list of statements separated by semicolons.
    pub fn parse_query(&mut self) -> QueryResult<Query> {
        let mut statements = Vec::new();
        let mut semi = true;
        loop {
            let (tok, pos, lit) = self.scan_ignore_whitespace();
            match tok {
                Token::Eof => return Ok(Query { statements }),
                Token::Semicolon => semi = true,
                _ => {
                    if !semi {
                        return Err(QueryError::parse(tokstr(tok, &lit), ";", pos));
                    }
                    self.unscan(tok, pos, lit);
                    statements.push(self.parse_statement_internal()?);
                    semi = false;
                }
            }
        }
    }

    /// Parse exactly one statement, requiring EOF after it.
    pub fn parse_statement(&mut self) -> QueryResult<Statement> {
        let stmt = self.parse_statement_internal()?;
        let (tok, pos, lit) = self.scan_ignore_whitespace();
        if tok != Token::Eof {
            return Err(QueryError::parse(tokstr(tok, &lit), "EOF", pos));
        }
        Ok(stmt)
    }

    fn parse_statement_internal(&mut self) -> QueryResult<Statement> {
        let (tok, pos, lit) = self.scan_ignore_whitespace();
        match tok {
            Token::Select => Ok(Statement::Select(self.parse_select_statement()?)),
            _ => Err(QueryError::parse(tokstr(tok, &lit), "SELECT", pos)),
        }
    }

    fn parse_select_statement(&mut self) -> QueryResult<SelectStatement> {
        let (fields, field_positions) = self.parse_fields()?;
        let mut stmt = SelectStatement {
            fields,
            ..Default::default()
        };

        let (tok, pos, lit) = self.scan_ignore_whitespace();
        if tok == Token::From {
            stmt.sources = vec![Measurement {
                name: self.parse_ident()?,
            }];
        } else {
            self.unscan(tok, pos, lit);
        }

        let (tok, pos, lit) = self.scan_ignore_whitespace();
        if tok == Token::Where {
            stmt.condition = Some(self.parse_expr()?);
        } else {
            self.unscan(tok, pos, lit);
        }

        let (tok, pos, lit) = self.scan_ignore_whitespace();
        if tok == Token::Group {
            let (tok, pos, lit) = self.scan_ignore_whitespace();
            if tok != Token::By {
                return Err(QueryError::parse(tokstr(tok, &lit), "BY", pos));
            }
            stmt.dimensions = self.parse_dimensions()?;
        } else {
            self.unscan(tok, pos, lit);
        }

        stmt.is_raw_query = stmt.function_calls().is_empty();
        validate_statement(&stmt, &field_positions)?;
        Ok(stmt)
    }

    /// Parse the comma-separated field list, recording where each
    /// field starts for validation errors.
    fn parse_fields(&mut self) -> QueryResult<(Vec<Field>, Vec<Pos>)> {
        let mut fields = Vec::new();
        let mut positions = Vec::new();
        loop {
            let (tok, pos, lit) = self.scan_ignore_whitespace();
            self.unscan(tok, pos, lit);
            positions.push(pos);

            let expr = self.parse_expr()?;
            let alias = self.parse_alias()?;
            fields.push(Field { expr, alias });

            let (tok, pos, lit) = self.scan_ignore_whitespace();
            if tok != Token::Comma {
                self.unscan(tok, pos, lit);
                break;
            }
        }
        Ok((fields, positions))
    }

    fn parse_alias(&mut self) -> QueryResult<Option<String>> {
        let (tok, pos, lit) = self.scan_ignore_whitespace();
        if tok != Token::As {
            self.unscan(tok, pos, lit);
            return Ok(None);
        }
        Ok(Some(self.parse_ident()?))
    }

    fn parse_ident(&mut self) -> QueryResult<String> {
        let (tok, pos, lit) = self.scan_ignore_whitespace();
        if tok != Token::Ident {
            return Err(QueryError::parse(tokstr(tok, &lit), "identifier", pos));
        }
        Ok(lit)
    }

    fn parse_dimensions(&mut self) -> QueryResult<Vec<Dimension>> {
        let mut dims = Vec::new();
        loop {
            dims.push(Dimension {
                expr: Expr::VarRef(self.parse_var_ref()?),
            });
            let (tok, pos, lit) = self.scan_ignore_whitespace();
            if tok != Token::Comma {
                self.unscan(tok, pos, lit);
                break;
            }
        }
        Ok(dims)
    }

    /// Parse an expression with operator precedence.
    pub fn parse_expr(&mut self) -> QueryResult<Expr> {
        let mut root = self.parse_unary_expr()?;

        loop {
            let (op, pos, lit) = self.scan_ignore_whitespace();
            if !op.is_operator() {
                self.unscan(op, pos, lit);
                return Ok(root);
            }

            let rhs = if op == Token::EqRegex || op == Token::NeqRegex {
                match self.parse_regex()? {
                    Some(re) => re,
                    None => {
                        let (tok, pos, lit) = self.scan_ignore_whitespace();
                        return Err(QueryError::parse(tokstr(tok, &lit), "regex", pos));
                    }
                }
            } else if op == Token::In || op == Token::Ni {
                let (tok, pos, lit) = self.scan_ignore_whitespace();
                if tok != Token::LBracket {
                    return Err(QueryError::parse(tokstr(tok, &lit), "[", pos));
                }
                self.parse_list()?
            } else {
                self.parse_unary_expr()?
            };

            root = insert_operator(root, op, rhs);
        }
    }

    fn parse_unary_expr(&mut self) -> QueryResult<Expr> {
        let (tok, pos, lit) = self.scan_ignore_whitespace();
        if tok == Token::LParen {
            let expr = self.parse_expr()?;
            let (tok, pos, lit) = self.scan_ignore_whitespace();
            if tok != Token::RParen {
                return Err(QueryError::parse(tokstr(tok, &lit), ")", pos));
            }
            return Ok(Expr::Paren(Box::new(expr)));
        }
        self.unscan(tok, pos, lit);

        let (tok, pos, lit) = self.scan_ignore_whitespace();
        match tok {
            Token::Ident => {
                // An identifier immediately followed by `(` is a call.
                let (tok0, pos0, lit0) = self.scan();
                if tok0 == Token::LParen {
                    return Ok(Expr::Call(self.parse_call(&lit)?));
                }
                self.unscan(tok0, pos0, lit0);
                self.unscan(Token::Ident, pos, lit);
                Ok(Expr::VarRef(self.parse_var_ref()?))
            }
            Token::String => Ok(Expr::Literal(Literal::String(lit))),
            Token::Number => match lit.parse::<f64>() {
                Ok(v) => Ok(Expr::Literal(Literal::Number(v))),
                Err(_) => Err(QueryError::parse_message("unable to parse number", pos)),
            },
            Token::Integer => match lit.parse::<i64>() {
                Ok(v) => Ok(Expr::Literal(Literal::Integer(v))),
                Err(_) => Err(QueryError::parse_message("unable to parse integer", pos)),
            },
            Token::True | Token::False => {
                Ok(Expr::Literal(Literal::Boolean(tok == Token::True)))
            }
            Token::LBracket => self.parse_list(),
            Token::BoundParam => self.bind_parameter(&lit),
            _ => Err(QueryError::parse(
                tokstr(tok, &lit),
                "identifier, string, number, bool",
                pos,
            )),
        }
    }

    /// Parse a variable reference: one or more dot-separated
    /// identifier segments, with no whitespace between them.
    fn parse_var_ref(&mut self) -> QueryResult<VarRef> {
        let mut segments = vec![self.parse_ident()?];
        loop {
            let (tok, pos, lit) = self.scan();
            if tok != Token::Dot {
                self.unscan(tok, pos, lit);
                break;
            }
            let (tok, pos, lit) = self.scan();
            if tok != Token::Ident {
                return Err(QueryError::parse(tokstr(tok, &lit), "identifier", pos));
            }
            segments.push(lit);
        }
        Ok(VarRef::new(segments))
    }

    /// Parse a function call. The name and opening paren have been
    /// consumed; the name is lowercased and the accumulator starts
    /// fresh.
    fn parse_call(&mut self, name: &str) -> QueryResult<Call> {
        let (tok, pos, lit) = self.scan_ignore_whitespace();
        if tok == Token::RParen {
            return Ok(Call::new(name, Vec::new()));
        }
        self.unscan(tok, pos, lit);

        let mut args = vec![self.parse_expr()?];
        loop {
            let (tok, pos, lit) = self.scan_ignore_whitespace();
            if tok != Token::Comma {
                self.unscan(tok, pos, lit);
                break;
            }
            args.push(self.parse_expr()?);
        }

        let (tok, pos, lit) = self.scan();
        if tok != Token::RParen {
            return Err(QueryError::parse(tokstr(tok, &lit), ")", pos));
        }
        Ok(Call::new(name, args))
    }

    /// Parse a bracket-delimited list of literals. The opening
    /// bracket has been consumed.
    fn parse_list(&mut self) -> QueryResult<Expr> {
        let mut vals = Vec::new();
        loop {
            let (tok, pos, lit) = self.scan_ignore_whitespace();
            let val = match tok {
                Token::String => Literal::String(lit),
                Token::Integer => match lit.parse::<i64>() {
                    Ok(v) => Literal::Integer(v),
                    Err(_) => {
                        return Err(QueryError::parse_message("unable to parse integer", pos))
                    }
                },
                Token::Number => match lit.parse::<f64>() {
                    Ok(v) => Literal::Number(v),
                    Err(_) => {
                        return Err(QueryError::parse_message("unable to parse number", pos))
                    }
                },
                Token::True | Token::False => Literal::Boolean(tok == Token::True),
                _ => {
                    return Err(QueryError::parse(
                        tokstr(tok, &lit),
                        "string, number, bool",
                        pos,
                    ))
                }
            };
            vals.push(val);

            let (tok, pos, lit) = self.scan_ignore_whitespace();
            match tok {
                Token::Comma => {}
                Token::RBracket => break,
                _ => return Err(QueryError::parse(tokstr(tok, &lit), "]", pos)),
            }
        }
        Ok(Expr::Literal(Literal::List(vals)))
    }

    /// Scan the right-hand side of a regex operator. Returns `None`
    /// when the next input is not a regex, leaving it unconsumed.
    fn parse_regex(&mut self) -> QueryResult<Option<Expr>> {
        debug_assert!(self.buf.is_empty(), "regex scan needs an empty token buffer");

        if self.s.peek_rune().is_some_and(is_whitespace) {
            let (tok, pos, lit) = self.scan();
            if tok != Token::Ws {
                self.unscan(tok, pos, lit);
            }
        }
        if self.s.peek_rune() != Some('/') {
            return Ok(None);
        }

        let (tok, pos, lit) = self.s.scan_regex();
        match tok {
            Token::Regex => match Regex::new(&lit) {
                Ok(re) => Ok(Some(Expr::Literal(Literal::Regex(RegexLiteral(re))))),
                Err(err) => Err(QueryError::parse_message(err.to_string(), pos)),
            },
            Token::BadRegex => Err(QueryError::parse_message(format!("bad regex: {lit}"), pos)),
            _ => Err(QueryError::parse(tokstr(tok, &lit), "regex", pos)),
        }
    }

    fn bind_parameter(&mut self, lit: &str) -> QueryResult<Expr> {
        let key = lit.trim_start_matches('$');
        if key.is_empty() {
            return Err(QueryError::validation("empty bound parameter"));
        }
        match self.params.get(key) {
            Some(serde_json::Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    Ok(Expr::Literal(Literal::Integer(i)))
                } else if let Some(f) = n.as_f64() {
                    Ok(Expr::Literal(Literal::Number(f)))
                } else {
                    Err(QueryError::validation(format!(
                        "unable to bind parameter {lit}"
                    )))
                }
            }
            Some(serde_json::Value::String(s)) => Ok(Expr::Literal(Literal::String(s.clone()))),
            Some(serde_json::Value::Bool(b)) => Ok(Expr::Literal(Literal::Boolean(*b))),
            Some(_) => Err(QueryError::validation(format!(
                "unable to bind parameter {lit}"
            ))),
            None => Err(QueryError::validation(format!("missing parameter: {lit}"))),
        }
    }

    fn scan(&mut self) -> (Token, Pos, String) {
        match self.buf.pop() {
            Some(entry) => entry,
            None => self.s.scan(),
        }
    }

    fn scan_ignore_whitespace(&mut self) -> (Token, Pos, String) {
        loop {
            let entry = self.scan();
            if entry.0 != Token::Ws {
                return entry;
            }
        }
    }

    fn unscan(&mut self, tok: Token, pos: Pos, lit: String) {
        self.buf.push((tok, pos, lit));
    }
}

/// Insert `op rhs` into the expression tree, descending the right
/// spine while the existing operator binds less tightly.
fn insert_operator(node: Expr, op: Token, rhs: Expr) -> Expr {
    match node {
        Expr::Binary(b) if b.op.precedence() < op.precedence() => Expr::Binary(BinaryExpr {
            op: b.op,
            lhs: b.lhs,
            rhs: Box::new(insert_operator(*b.rhs, op, rhs)),
        }),
        other => Expr::Binary(BinaryExpr::new(op, other, rhs)),
    }
}

fn validate_statement(stmt: &SelectStatement, field_positions: &[Pos]) -> QueryResult<()> {
    validate_fields(stmt, field_positions)?;
    validate_aggregates(stmt)?;
    if let Some(cond) = &stmt.condition {
        validate_condition(cond)?;
    }
    Ok(())
}

fn validate_fields(stmt: &SelectStatement, field_positions: &[Pos]) -> QueryResult<()> {
    for (i, field) in stmt.fields.iter().enumerate() {
        if let Some(op) = find_invalid_field_operator(&field.expr) {
            return Err(QueryError::InvalidOperator {
                op,
                pos: field_positions.get(i).copied().unwrap_or_default(),
            });
        }
        match &field.expr {
            Expr::Binary(_) => validate_field_binary(&field.expr)?,
            Expr::Paren(_) | Expr::Call(_) | Expr::VarRef(_) => {}
            Expr::Literal(_) => {
                return Err(QueryError::validation(format!(
                    "invalid field {} in SELECT field, at least one function",
                    field.expr
                )))
            }
        }
    }
    Ok(())
}

/// First operator outside `+ - * /` anywhere in a field expression,
/// in pre-order.
fn find_invalid_field_operator(expr: &Expr) -> Option<Token> {
    match expr {
        Expr::Binary(b) => {
            if !matches!(
                b.op,
                Token::Add | Token::Sub | Token::Mul | Token::Div
            ) {
                return Some(b.op);
            }
            find_invalid_field_operator(&b.lhs).or_else(|| find_invalid_field_operator(&b.rhs))
        }
        Expr::Paren(inner) => find_invalid_field_operator(inner),
        Expr::Call(call) => call.args.iter().find_map(find_invalid_field_operator),
        Expr::VarRef(_) | Expr::Literal(_) => None,
    }
}

fn validate_aggregates(stmt: &SelectStatement) -> QueryResult<()> {
    for field in &stmt.fields {
        for call in walk_function_calls(&field.expr) {
            validate_aggregate_mixing(stmt)?;
            if call.args.len() != 1 {
                return Err(QueryError::validation(format!(
                    "invalid number of arguments for {}, expected 1, got {}",
                    call.name,
                    call.args.len()
                )));
            }
            if call.name == "count" && !matches!(call.args[0], Expr::VarRef(_)) {
                return Err(QueryError::validation("expected field argument in count()"));
            }
            match &call.args[0] {
                Expr::VarRef(_) => {}
                Expr::Binary(_) => validate_argument_binary(&call.args[0])?,
                _ => {
                    return Err(QueryError::validation(format!(
                        "expected field argument in {}()",
                        call.name
                    )))
                }
            }
        }
    }
    Ok(())
}

/// Aggregates and bare references may only mix when every call is a
/// selector and exactly one aggregate field is present.
fn validate_aggregate_mixing(stmt: &SelectStatement) -> QueryResult<()> {
    let mut names = std::collections::HashSet::new();
    let mut num_aggregates = 0;
    for field in &stmt.fields {
        let calls = walk_function_calls(&field.expr);
        for call in &calls {
            names.insert(call.name.as_str());
        }
        if !calls.is_empty() {
            num_aggregates += 1;
        }
    }

    let only_selectors = names.iter().all(|name| SELECTORS.contains(name));
    if only_selectors {
        if num_aggregates == 1 {
            return Ok(());
        }
        if num_aggregates > 1 && stmt.fields.len() != num_aggregates {
            return Err(QueryError::validation(
                "mixing multiple selector functions with tags or fields is not supported",
            ));
        }
    }

    if num_aggregates != 0 && num_aggregates != stmt.fields.len() {
        return Err(QueryError::validation(
            "mixing aggregate and non-aggregate queries is not supported",
        ));
    }
    Ok(())
}

#[derive(Default)]
struct BinaryExprValidator {
    calls: bool,
    refs: bool,
    err: Option<QueryError>,
}

impl BinaryExprValidator {
    fn visit(&mut self, expr: &Expr) {
        if self.err.is_some() {
            return;
        }
        match expr {
            Expr::Call(call) => {
                self.calls = true;
                // Binary arguments get their own pass; call arguments
                // are otherwise not descended into.
                for arg in &call.args {
                    if matches!(arg, Expr::Binary(_)) {
                        self.err = validate_field_binary(arg).err();
                        return;
                    }
                }
            }
            Expr::VarRef(_) => self.refs = true,
            Expr::Binary(b) => {
                self.visit(&b.lhs);
                self.visit(&b.rhs);
            }
            Expr::Paren(inner) => self.visit(inner),
            Expr::Literal(_) => {}
        }
    }
}

fn validate_field_binary(expr: &Expr) -> QueryResult<()> {
    let mut v = BinaryExprValidator::default();
    v.visit(expr);
    if let Some(err) = v.err {
        return Err(err);
    }
    if v.calls && v.refs {
        return Err(QueryError::validation(
            "binary expressions cannot mix aggregates and raw fields",
        ));
    }
    Ok(())
}

fn validate_argument_binary(expr: &Expr) -> QueryResult<()> {
    let mut v = BinaryExprValidator::default();
    v.visit(expr);
    if let Some(err) = v.err {
        return Err(err);
    }
    if v.calls {
        return Err(QueryError::validation(
            "argument binary expressions cannot mix function",
        ));
    }
    if !v.refs {
        return Err(QueryError::validation(
            "argument binary expressions at least one key",
        ));
    }
    Ok(())
}

/// Ordering and arithmetic operators never apply to strings in a
/// predicate.
fn validate_condition(expr: &Expr) -> QueryResult<()> {
    match expr {
        Expr::Binary(b) => {
            let typed_op = matches!(
                b.op,
                Token::Lt
                    | Token::Lte
                    | Token::Gt
                    | Token::Gte
                    | Token::Mul
                    | Token::Div
                    | Token::Add
                    | Token::Sub
            );
            if typed_op
                && (matches!(&*b.lhs, Expr::Literal(Literal::String(_)))
                    || matches!(&*b.rhs, Expr::Literal(Literal::String(_))))
            {
                return Err(QueryError::validation(format!(
                    "invalid filter, unsupport op {} for string",
                    b.op
                )));
            }
            validate_condition(&b.lhs)?;
            validate_condition(&b.rhs)
        }
        Expr::Paren(inner) => validate_condition(inner),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Expr {
        Expr::Literal(Literal::Integer(v))
    }

    fn num(v: f64) -> Expr {
        Expr::Literal(Literal::Number(v))
    }

    fn boolean(v: bool) -> Expr {
        Expr::Literal(Literal::Boolean(v))
    }

    fn string(v: &str) -> Expr {
        Expr::Literal(Literal::String(v.to_string()))
    }

    fn var(name: &str) -> Expr {
        Expr::VarRef(VarRef::new(vec![name.to_string()]))
    }

    fn regex(pattern: &str) -> Expr {
        Expr::Literal(Literal::Regex(RegexLiteral(Regex::new(pattern).unwrap())))
    }

    fn binary(op: Token, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(BinaryExpr::new(op, lhs, rhs))
    }

    #[test]
    fn test_parse_query_empty() {
        let q = parse_query("").unwrap();
        assert!(q.statements.is_empty());
    }

    #[test]
    fn test_parse_query_multiple_statements() {
        let q = parse_query("SELECT sum(a) FROM x; SELECT count(b) FROM y").unwrap();
        assert_eq!(q.statements.len(), 2);
        assert_eq!(
            q.to_string(),
            "SELECT sum(a) FROM x;\nSELECT count(b) FROM y"
        );
    }

    #[test]
    fn test_parse_query_error_position() {
        let err = parse_query("SELECT").unwrap_err();
        assert_eq!(
            err.to_string(),
            "found EOF, expected identifier, string, number, bool at line 1, char 8"
        );
    }

    #[test]
    fn test_parse_statement_errors() {
        let cases = [
            ("", "found EOF, expected SELECT at line 1, char 1"),
            (
                "SELECT",
                "found EOF, expected identifier, string, number, bool at line 1, char 8",
            ),
            (
                "SELECT count(max(value)) FROM myseries",
                "expected field argument in count()",
            ),
            (
                "SELECT count(distinct('value')) FROM myseries",
                "expected field argument in count()",
            ),
            (
                "SELECT min(max(value)) FROM myseries",
                "expected field argument in min()",
            ),
            (
                "SELECT min(distinct(value)) FROM myseries",
                "expected field argument in min()",
            ),
            (
                "SELECT max(max(value)) FROM myseries",
                "expected field argument in max()",
            ),
            (
                "SELECT sum(max(value)) FROM myseries",
                "expected field argument in sum()",
            ),
            (
                "SELECT count(value), value FROM foo",
                "mixing aggregate and non-aggregate queries is not supported",
            ),
            (
                "select count() from myseries",
                "invalid number of arguments for count, expected 1, got 0",
            ),
            (
                "SELECT value = 2 FROM cpu",
                "invalid operator = in SELECT clause at line 1, char 8; operator is intended for WHERE clause",
            ),
            (
                "SELECT s =~ /foo/ FROM cpu",
                "invalid operator =~ in SELECT clause at line 1, char 8; operator is intended for WHERE clause",
            ),
            (
                "SELECT count(foo + sum(bar)) FROM cpu",
                "expected field argument in count()",
            ),
            (
                "SELECT (count(foo + sum(bar))) FROM cpu",
                "expected field argument in count()",
            ),
            (
                "SELECT sum(value) + count(foo + sum(bar)) FROM cpu",
                "binary expressions cannot mix aggregates and raw fields",
            ),
            (
                "select sum(tcp.in_pkts) from packetbeat  uid = 1",
                "found uid, expected EOF at line 1, char 42",
            ),
            (
                "SELECT sum(v) FROM m WHERE p < 'x'",
                "invalid filter, unsupport op < for string",
            ),
            (
                "SELECT sum(v) FROM m WHERE 'a' + p = 'b'",
                "invalid filter, unsupport op + for string",
            ),
            (
                "SELECT sum(1) FROM m",
                "expected field argument in sum()",
            ),
            (
                "SELECT 2 FROM m",
                "invalid field 2 in SELECT field, at least one function",
            ),
        ];

        for (s, expected) in cases {
            let err = parse_statement(s).unwrap_err();
            assert_eq!(err.to_string(), expected, "input {s:?}");
        }
    }

    #[test]
    fn test_parse_statement_accepts_valid_queries() {
        let cases = [
            "select max(tcp.in_pkts) from packetbeat where uid = 1",
            "select avg(tcp.in_pkts) from packetbeat  ",
            "select value1, value2 from foo",
            "select mean(value) from foo group by bar",
            "select max(value), host from cpu",
            "SELECT sum(a.b) FROM x WHERE c IN [1, 2, 3] GROUP BY d.e, f",
            "SELECT sum(in_bytes + out_bytes) / 8 AS rate FROM flows WHERE proto != 'icmp'",
        ];
        for s in cases {
            parse_statement(s).unwrap_or_else(|e| panic!("{s:?} failed: {e}"));
        }
    }

    #[test]
    fn test_parse_expr_primitives() {
        assert_eq!(parse_expr("100.0").unwrap(), num(100.0));
        assert_eq!(parse_expr("100").unwrap(), int(100));
        assert_eq!(parse_expr("'foo bar'").unwrap(), string("foo bar"));
        assert_eq!(parse_expr("true").unwrap(), boolean(true));
        assert_eq!(parse_expr("false").unwrap(), boolean(false));
        assert_eq!(parse_expr("my_ident").unwrap(), var("my_ident"));
    }

    #[test]
    fn test_parse_expr_precedence() {
        assert_eq!(
            parse_expr("1 + 2").unwrap(),
            binary(Token::Add, int(1), int(2))
        );
        assert_eq!(
            parse_expr("1 * 2 + 3").unwrap(),
            binary(Token::Add, binary(Token::Mul, int(1), int(2)), int(3))
        );
        assert_eq!(
            parse_expr("1 + 2 * 3").unwrap(),
            binary(Token::Add, int(1), binary(Token::Mul, int(2), int(3)))
        );
        assert_eq!(
            parse_expr("(1 + 2) * 3").unwrap(),
            binary(
                Token::Mul,
                Expr::Paren(Box::new(binary(Token::Add, int(1), int(2)))),
                int(3)
            )
        );
        // Left associativity within a level.
        assert_eq!(
            parse_expr("1 * 2 * 3").unwrap(),
            binary(Token::Mul, binary(Token::Mul, int(1), int(2)), int(3))
        );
        // The new operator descends the right spine to its level.
        assert_eq!(
            parse_expr("1 OR 2 AND 3 = 4").unwrap(),
            binary(
                Token::Or,
                int(1),
                binary(Token::And, int(2), binary(Token::Eq, int(3), int(4)))
            )
        );
    }

    #[test]
    fn test_parse_expr_complex() {
        assert_eq!(
            parse_expr("value + 3 < 30 AND 1 + 2 OR true").unwrap(),
            binary(
                Token::Or,
                binary(
                    Token::And,
                    binary(
                        Token::Lt,
                        binary(Token::Add, var("value"), int(3)),
                        int(30)
                    ),
                    binary(Token::Add, int(1), int(2))
                ),
                boolean(true)
            )
        );
    }

    #[test]
    fn test_parse_expr_regex() {
        assert_eq!(
            parse_expr("region =~ /us.*/").unwrap(),
            binary(Token::EqRegex, var("region"), regex("us.*"))
        );
        assert_eq!(
            parse_expr(r"url =~ /http\:\/\/www\.example\.com/").unwrap(),
            binary(
                Token::EqRegex,
                var("url"),
                regex(r"http\://www\.example\.com")
            )
        );
        assert_eq!(
            parse_expr("host !~ /backup$/").unwrap(),
            binary(Token::NeqRegex, var("host"), regex("backup$"))
        );
    }

    #[test]
    fn test_parse_expr_calls() {
        assert_eq!(
            parse_expr("my_func()").unwrap(),
            Expr::Call(Call::new("my_func", Vec::new()))
        );
        assert_eq!(
            parse_expr("my_func(1, 2 + 3)").unwrap(),
            Expr::Call(Call::new(
                "my_func",
                vec![int(1), binary(Token::Add, int(2), int(3))]
            ))
        );
        // Call names are lowercased.
        assert_eq!(
            parse_expr("SUM(value)").unwrap(),
            Expr::Call(Call::new("sum", vec![var("value")]))
        );
    }

    #[test]
    fn test_parse_expr_var_ref_segments() {
        match parse_expr("tcp.in_bytes").unwrap() {
            Expr::VarRef(r) => {
                assert_eq!(r.val, "tcp.in_bytes");
                assert_eq!(r.segments, vec!["tcp", "in_bytes"]);
            }
            other => panic!("expected var ref, got {other:?}"),
        }
        match parse_expr("\"foo.bar\".baz").unwrap() {
            Expr::VarRef(r) => {
                assert_eq!(r.val, "foo.bar.baz");
                assert_eq!(r.segments, vec!["foo.bar", "baz"]);
            }
            other => panic!("expected var ref, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_expr_in_requires_list() {
        assert_eq!(
            parse_expr("x IN [1, 'two', true]").unwrap(),
            binary(
                Token::In,
                var("x"),
                Expr::Literal(Literal::List(vec![
                    Literal::Integer(1),
                    Literal::String("two".to_string()),
                    Literal::Boolean(true),
                ]))
            )
        );
        let err = parse_expr("x IN 1").unwrap_err();
        assert_eq!(err.to_string(), "found 1, expected [ at line 1, char 6");
    }

    #[test]
    fn test_parse_alias() {
        let stmt = parse_statement("SELECT sum(value) AS total FROM cpu").unwrap();
        let Statement::Select(stmt) = stmt;
        assert_eq!(stmt.fields[0].alias.as_deref(), Some("total"));
        assert_eq!(stmt.sources[0].name, "cpu");
    }

    #[test]
    fn test_parse_group_by_dimensions() {
        let stmt = parse_statement("SELECT sum(x) FROM p GROUP BY tcp.src_ip, tcp.dst_ip").unwrap();
        let Statement::Select(stmt) = stmt;
        assert_eq!(stmt.dimensions.len(), 2);
        assert_eq!(stmt.dimensions[0].expr.to_string(), "\"tcp\".src_ip");
    }

    #[test]
    fn test_bound_parameters() {
        let mut p = Parser::new("SELECT sum(x) FROM m WHERE region = $region AND uid = $uid");
        p.set_params(HashMap::from([
            ("region".to_string(), serde_json::json!("west")),
            ("uid".to_string(), serde_json::json!(42)),
        ]));
        let stmt = p.parse_statement().unwrap();
        assert_eq!(
            stmt.to_string(),
            "SELECT sum(x) FROM m WHERE region = 'west' AND uid = 42"
        );

        let err = parse_statement("SELECT sum(x) FROM m WHERE region = $region").unwrap_err();
        assert_eq!(err.to_string(), "missing parameter: $region");
    }

    #[test]
    fn test_bad_regex_is_a_parse_error() {
        let err = parse_expr("host =~ /unclosed").unwrap_err();
        assert!(
            err.to_string().starts_with("bad regex:"),
            "unexpected error {err}"
        );
        assert!(parse_expr("host =~ /va[lid/").is_err());
    }

    #[test]
    fn test_print_parse_round_trip() {
        let cases = [
            "SELECT count(asdf), count(bar) FROM cpu",
            "SELECT sum(xxx) FROM cpu WHERE time > 23 AND (asdf = 'jkl' OR (foo = 'bar' AND baz = 'bar'))",
            "SELECT max(v) FROM m WHERE region =~ /us-.*/ OR region !~ /eu-.*/",
            "SELECT sum(a) FROM m WHERE b IN [1, 2] AND c NI ['x', 'y']",
            "SELECT mean(v) AS avg_v FROM m GROUP BY host",
        ];
        for s in cases {
            let stmt = parse_statement(s).unwrap();
            let printed = stmt.to_string();
            let reparsed = parse_statement(&printed)
                .unwrap_or_else(|e| panic!("reparse of {printed:?} failed: {e}"));
            assert_eq!(stmt, reparsed, "round trip of {s:?}");
        }
    }
}
