use sift_error::{Diagnostic, Location};
use tracing::trace;

use crate::ast::{
    ApplyKind, BinaryOperator, ColumnExpr, ComparisonOperator, CteNode, ErrorNode, Expr,
    FromAlias, FromNode, FunctionExpr, GroupByNode, HavingNode, Ident, JoinKind, JoinStrategy,
    LikeKind, Literal, LogicalOperator, MissingNode, OrderByItem, OrderByNode, QueryExpr,
    SelectItem, SelectNode, SelectQuery, SetOpNode, SetOperator, SkipNode, SkippedTokensNode,
    Statement, TakeNode, UnaryOperator, WhenThen, WhereNode,
};
use crate::diagnostics::{self, DiagnosticBag, snippet};
use crate::keywords::{Keyword, closest_keywords};
use crate::tokens::{InvalidReason, Span, Token, TokenWithLocation, Tokenizer};

/// Maximum number of tokens thrown away by a single panic mode recovery.
pub const MAX_PANIC_SKIP: usize = 64;

/// Default cap on the number of diagnostics collected for a single parse.
pub const DEFAULT_MAX_DIAGNOSTICS: usize = 32;

const PREC_OR: u8 = 10;
const PREC_AND: u8 = 20;
const PREC_NOT: u8 = 30;
const PREC_IS: u8 = 40;
const PREC_COMPARISON: u8 = 50; // <=, =, etc
const PREC_CONTAINMENT: u8 = 60; // IN, LIKE, RLIKE
const PREC_ADD_SUB: u8 = 80;
const PREC_MUL_DIV_MOD: u8 = 90;
const PREC_UNARY: u8 = 100;

const PREC_SET_UNION_EXCEPT: u8 = 10;
const PREC_SET_INTERSECT: u8 = 20;

/// Keywords that start a clause of a select query.
const CLAUSE_KEYWORDS: &[Keyword] = &[
    Keyword::FROM,
    Keyword::WHERE,
    Keyword::GROUP,
    Keyword::HAVING,
    Keyword::ORDER,
    Keyword::SKIP,
    Keyword::TAKE,
];

/// Keywords panic mode recovery stops at.
const SYNC_KEYWORDS: &[Keyword] = &[
    Keyword::SELECT,
    Keyword::FROM,
    Keyword::WHERE,
    Keyword::GROUP,
    Keyword::HAVING,
    Keyword::ORDER,
    Keyword::SKIP,
    Keyword::TAKE,
    Keyword::UNION,
    Keyword::EXCEPT,
    Keyword::INTERSECT,
];

/// Result of parsing a query.
///
/// A statement is always produced. If `diagnostics` contains errors, the
/// statement contains recovery nodes and must not be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutput {
    pub statement: Statement,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error())
    }
}

/// Parse a query using the default diagnostics limit.
pub fn parse(src: &str) -> ParseOutput {
    Parser::new(src).parse()
}

/// Parsing was stopped because the diagnostics limit was reached.
#[derive(Debug)]
struct ParseAbort;

type PResult<T> = Result<T, ParseAbort>;

#[derive(Debug)]
pub struct Parser<'a> {
    src: &'a str,
    toks: Vec<TokenWithLocation>,
    /// Index of token we should process next.
    idx: usize,
    /// Errors from the tokenizer, reported at the start of the parse.
    lexical: Vec<(&'static str, String, Span)>,
    diagnostics: DiagnosticBag,
    max_diagnostics: usize,
    eof_span: Span,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        let mut toks = Vec::new();
        let mut lexical = Vec::new();

        // Invalid tokens are reported and dropped so the grammar never sees
        // them.
        for tok in Tokenizer::new(src).tokenize() {
            match tok.token {
                Token::Invalid(invalid) => {
                    let (code, msg) = match invalid.reason {
                        InvalidReason::UnrecognizedCharacter => (
                            diagnostics::UNRECOGNIZED_CHARACTER,
                            format!("Unrecognized character '{}'", invalid.text),
                        ),
                        InvalidReason::UnterminatedString => (
                            diagnostics::UNTERMINATED_STRING,
                            "Unterminated string literal".to_string(),
                        ),
                        InvalidReason::UnterminatedBracket => (
                            diagnostics::UNTERMINATED_BRACKET,
                            format!("Unterminated bracket identifier '{}'", invalid.text),
                        ),
                    };
                    lexical.push((code, msg, tok.span));
                }
                _ => toks.push(tok),
            }
        }

        let line = 1 + src.matches('\n').count();
        let col = 1 + src.rsplit('\n').next().map(|s| s.chars().count()).unwrap_or(0);
        let eof_span = Span {
            start: src.len(),
            end: src.len(),
            line,
            col,
        };

        Parser {
            src,
            toks,
            idx: 0,
            lexical,
            diagnostics: DiagnosticBag::new(),
            max_diagnostics: DEFAULT_MAX_DIAGNOSTICS,
            eof_span,
        }
    }

    /// Set the maximum number of diagnostics to collect before giving up.
    pub fn with_max_diagnostics(mut self, max: usize) -> Self {
        self.max_diagnostics = max.max(1);
        self
    }

    pub fn parse(mut self) -> ParseOutput {
        let statement = match self.parse_statement() {
            Ok(statement) => statement,
            Err(ParseAbort) => Statement {
                ctes: Vec::new(),
                body: QueryExpr::Error(ErrorNode {
                    message: "Parsing stopped after too many errors".to_string(),
                    span: self.current_span(),
                }),
            },
        };

        trace!(
            tokens = self.toks.len(),
            diagnostics = self.diagnostics.len(),
            "parsed statement"
        );

        ParseOutput {
            statement,
            diagnostics: self.diagnostics.into_vec(),
        }
    }

    fn parse_statement(&mut self) -> PResult<Statement> {
        for (code, msg, span) in std::mem::take(&mut self.lexical) {
            self.report(code, msg, span)?;
        }

        if self.peek().is_none() {
            self.report(diagnostics::UNEXPECTED_EOF, "Empty query", self.eof_span)?;
            return Ok(Statement {
                ctes: Vec::new(),
                body: QueryExpr::Error(ErrorNode {
                    message: "Empty query".to_string(),
                    span: self.eof_span,
                }),
            });
        }

        let ctes = if self.parse_keyword(Keyword::WITH) {
            self.parse_ctes()?
        } else {
            Vec::new()
        };

        let mut body = self.parse_query_expr(0)?;
        self.consume_token(&Token::SemiColon);

        while let Some(tok) = self.peek() {
            let span = tok.span;
            let msg = format!("Unexpected {} after end of query", describe(&tok.token));
            self.report(diagnostics::UNEXPECTED_TOKEN, msg, span)?;

            let skipped = self.recover_skip();
            let resumes_clause = self
                .peek_keyword()
                .is_some_and(|kw| CLAUSE_KEYWORDS.contains(&kw));
            match &mut body {
                QueryExpr::Select(select) if resumes_clause => {
                    select.skipped.push(skipped);
                    self.parse_clauses(select)?;
                }
                _ => self.idx = self.toks.len(),
            }
            self.consume_token(&Token::SemiColon);
        }

        Ok(Statement { ctes, body })
    }

    fn parse_ctes(&mut self) -> PResult<Vec<CteNode>> {
        let mut ctes = Vec::new();
        loop {
            let span = self.current_span();
            let name = match self.parse_ident("CTE name")? {
                Some(name) => name,
                None => Ident::new(""),
            };
            self.expect_keyword(Keyword::AS)?;
            self.expect_token(&Token::LeftParen, "'('")?;
            let query = self.parse_query_expr(0)?;
            self.expect_token(&Token::RightParen, "')'")?;
            ctes.push(CteNode { name, query, span });

            if !self.consume_token(&Token::Comma) {
                break;
            }
            self.skip_duplicate_delimiters(&Token::Comma)?;
        }
        Ok(ctes)
    }

    fn parse_query_expr(&mut self, min_prec: u8) -> PResult<QueryExpr> {
        let mut left = self.parse_query_term()?;

        loop {
            let (op, prec) = match self.peek_keyword() {
                Some(Keyword::UNION) => (SetOperator::Union, PREC_SET_UNION_EXCEPT),
                Some(Keyword::EXCEPT) => (SetOperator::Except, PREC_SET_UNION_EXCEPT),
                Some(Keyword::INTERSECT) => (SetOperator::Intersect, PREC_SET_INTERSECT),
                _ => break,
            };
            if min_prec >= prec {
                break;
            }

            let span = self.current_span();
            self.next();
            let op = if op == SetOperator::Union && self.parse_keyword(Keyword::ALL) {
                SetOperator::UnionAll
            } else {
                op
            };

            // `UNION (a, b)` is a key list, `UNION (select ...)` is a
            // parenthesized query.
            let keys = if self.peek_is(&Token::LeftParen) && !self.starts_query_at(1) {
                self.next();
                let keys = self.parse_comma_separated(|p| p.parse_ident_or_empty("key column"))?;
                self.expect_token(&Token::RightParen, "')'")?;
                Some(keys)
            } else {
                None
            };

            let right = self.parse_query_expr(prec)?;
            left = QueryExpr::SetOp(Box::new(SetOpNode {
                left,
                right,
                op,
                keys,
                span,
            }));
        }

        Ok(left)
    }

    fn parse_query_term(&mut self) -> PResult<QueryExpr> {
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => {
                self.report_expected("SELECT")?;
                return Ok(QueryExpr::Error(ErrorNode {
                    message: "Missing query".to_string(),
                    span: self.eof_span,
                }));
            }
        };

        match &tok.token {
            Token::LeftParen => {
                self.next();
                let query = self.parse_query_expr(0)?;
                self.expect_token(&Token::RightParen, "')'")?;
                Ok(query)
            }
            Token::Word(w) if w.keyword == Some(Keyword::SELECT) => self.parse_select(),
            Token::Word(w)
                if w.keyword.is_none() && closest_keywords(&w.value).contains(&Keyword::SELECT) =>
            {
                let msg = format!("Unknown keyword '{}', did you mean SELECT?", w.value);
                self.report(diagnostics::UNKNOWN_KEYWORD, msg, tok.span)?;
                self.parse_select()
            }
            _ => {
                self.report_expected("SELECT")?;
                self.synchronize();
                if self.peek_is_keyword(Keyword::SELECT) {
                    self.parse_select()
                } else {
                    Ok(QueryExpr::Error(ErrorNode {
                        message: "Expected a query".to_string(),
                        span: tok.span,
                    }))
                }
            }
        }
    }

    /// Parse a select query. The current token is SELECT, or a misspelling of
    /// it that has already been reported.
    fn parse_select(&mut self) -> PResult<QueryExpr> {
        let span = self.current_span();
        self.next();

        let items = self.parse_select_list()?;
        let mut query = SelectQuery::new(SelectNode { items }, span);

        if self.parse_keyword(Keyword::FROM) || self.parse_misspelled_keyword(Keyword::FROM)? {
            query.from = Some(self.parse_from()?);
        }

        self.parse_clauses(&mut query)?;

        Ok(QueryExpr::Select(Box::new(query)))
    }

    /// Parse the clauses following FROM.
    ///
    /// Clauses out of order are reported but still parsed. Anything that
    /// isn't a clause is skipped with panic mode recovery.
    fn parse_clauses(&mut self, query: &mut SelectQuery) -> PResult<()> {
        // Position of the last clause parsed.
        let mut stage = 0;

        loop {
            let (keyword, misspelled) = match self.peek_keyword() {
                Some(kw) if CLAUSE_KEYWORDS.contains(&kw) => (kw, false),
                _ => match self.misspelled_clause_keyword(0) {
                    Some(kw) => (kw, true),
                    None => {
                        if self.at_query_end() {
                            return Ok(());
                        }
                        self.report_expected("a clause")?;
                        let skipped = self.recover_skip();
                        query.skipped.push(skipped);
                        continue;
                    }
                },
            };

            let span = self.current_span();
            if misspelled {
                self.parse_misspelled_keyword(keyword)?;
            } else {
                self.next();
            }

            let clause_stage = match keyword {
                Keyword::FROM => 0,
                Keyword::WHERE => 1,
                Keyword::GROUP => 2,
                Keyword::HAVING => 3,
                Keyword::ORDER => 4,
                Keyword::SKIP => 5,
                _ => 6, // TAKE
            };
            if clause_stage <= stage || keyword == Keyword::FROM {
                let msg = format!("{keyword} clause is out of place");
                self.report(diagnostics::MISPLACED_CLAUSE, msg, span)?;
            }
            stage = stage.max(clause_stage);

            match keyword {
                Keyword::FROM => {
                    let from = self.parse_from()?;
                    if query.from.is_none() {
                        query.from = Some(from);
                    }
                }
                Keyword::WHERE => {
                    let expr = self.parse_expr()?;
                    if query.where_clause.is_none() {
                        query.where_clause = Some(WhereNode { expr });
                    }
                }
                Keyword::GROUP => {
                    self.expect_keyword(Keyword::BY)?;
                    let exprs = self.parse_comma_separated(|p| p.parse_expr())?;
                    if query.group_by.is_none() {
                        query.group_by = Some(GroupByNode {
                            exprs,
                            having: None,
                        });
                    }
                }
                Keyword::HAVING => {
                    let expr = self.parse_expr()?;
                    match &mut query.group_by {
                        Some(group_by) if group_by.having.is_none() => {
                            group_by.having = Some(HavingNode { expr });
                        }
                        Some(_) => (),
                        None => {
                            self.report(
                                diagnostics::MISPLACED_CLAUSE,
                                "HAVING requires GROUP BY",
                                span,
                            )?;
                        }
                    }
                }
                Keyword::ORDER => {
                    self.expect_keyword(Keyword::BY)?;
                    let items = self.parse_comma_separated(|p| {
                        let expr = p.parse_expr()?;
                        let descending = matches!(
                            p.parse_one_of_keywords(&[Keyword::ASC, Keyword::DESC]),
                            Some(Keyword::DESC)
                        );
                        Ok(OrderByItem { expr, descending })
                    })?;
                    if query.order_by.is_none() {
                        query.order_by = Some(OrderByNode { items });
                    }
                }
                Keyword::SKIP => {
                    let count = self.parse_row_count()?;
                    if query.skip.is_none() {
                        query.skip = Some(SkipNode { count });
                    }
                }
                _ => {
                    let count = self.parse_row_count()?;
                    if query.take.is_none() {
                        query.take = Some(TakeNode { count });
                    }
                }
            }
        }
    }

    fn parse_row_count(&mut self) -> PResult<u64> {
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => {
                self.report_expected("a row count")?;
                return Ok(0);
            }
        };

        match &tok.token {
            Token::Number { value, unit } => {
                self.next();
                let is_int_unit = match unit {
                    None => true,
                    Some(unit) => matches!(unit.to_ascii_lowercase().as_str(), "i" | "l"),
                };
                match value.parse::<u64>() {
                    Ok(v) if is_int_unit => Ok(v),
                    _ => {
                        let msg = format!("Invalid row count '{}'", tok.token);
                        self.report(diagnostics::INVALID_NUMBER, msg, tok.span)?;
                        Ok(0)
                    }
                }
            }
            _ => {
                self.report_expected("a row count")?;
                Ok(0)
            }
        }
    }

    fn parse_select_list(&mut self) -> PResult<Vec<SelectItem>> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse_select_item()?);

            if self.consume_token(&Token::Comma) {
                self.skip_duplicate_delimiters(&Token::Comma)?;
                continue;
            }
            if self.starts_expression() {
                let span = self.current_span();
                self.report(diagnostics::MISSING_TOKEN, "Missing ',' between select items", span)?;
                continue;
            }
            break;
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> PResult<SelectItem> {
        if self.consume_token(&Token::Mul) {
            return Ok(SelectItem::Wildcard);
        }

        if let Some(qualifier) = self.ident_at(0) {
            if self.peek_nth_is(1, &Token::Period) && self.peek_nth_is(2, &Token::Mul) {
                self.idx += 3;
                return Ok(SelectItem::QualifiedWildcard(qualifier));
            }
        }

        let expr = self.parse_expr()?;
        let alias = self.parse_alias()?;
        Ok(SelectItem::Expr { expr, alias })
    }

    /// Parse an optional alias, with or without AS.
    fn parse_alias(&mut self) -> PResult<Option<Ident>> {
        if self.parse_keyword(Keyword::AS) {
            return self.parse_ident("alias");
        }

        if self.misspelled_clause_keyword(0).is_some() {
            return Ok(None);
        }

        match self.ident_at(0) {
            Some(ident) => {
                self.next();
                Ok(Some(ident))
            }
            None => Ok(None),
        }
    }

    fn parse_from_alias(&mut self) -> PResult<Option<FromAlias>> {
        Ok(self.parse_alias()?.map(FromAlias::new))
    }

    fn parse_from(&mut self) -> PResult<FromNode> {
        let mut left = self.parse_from_primary()?;

        loop {
            let join_kind = if self.parse_keyword(Keyword::INNER) {
                self.expect_keyword(Keyword::JOIN)?;
                Some(JoinKind::Inner)
            } else if self.parse_keyword(Keyword::JOIN) {
                Some(JoinKind::Inner)
            } else if self.parse_keyword(Keyword::LEFT) {
                self.parse_keyword(Keyword::OUTER);
                self.expect_keyword(Keyword::JOIN)?;
                Some(JoinKind::LeftOuter)
            } else if self.parse_keyword(Keyword::RIGHT) {
                self.parse_keyword(Keyword::OUTER);
                self.expect_keyword(Keyword::JOIN)?;
                Some(JoinKind::RightOuter)
            } else {
                None
            };

            if let Some(kind) = join_kind {
                let right = self.parse_from_primary()?;
                self.expect_keyword(Keyword::ON)?;
                let condition = self.parse_expr()?;
                left = FromNode::Join {
                    left: Box::new(left),
                    right: Box::new(right),
                    kind,
                    condition,
                    strategy: JoinStrategy::NestedLoop,
                };
                continue;
            }

            let apply_kind = if self.parse_keyword(Keyword::CROSS) {
                self.expect_keyword(Keyword::APPLY)?;
                Some(ApplyKind::Cross)
            } else if self.parse_keyword(Keyword::OUTER) {
                self.expect_keyword(Keyword::APPLY)?;
                Some(ApplyKind::Outer)
            } else {
                None
            };

            if let Some(kind) = apply_kind {
                let right = self.parse_from_primary()?;
                left = FromNode::Apply {
                    left: Box::new(left),
                    right: Box::new(right),
                    kind,
                };
                continue;
            }

            if self.parse_keyword(Keyword::PIVOT) {
                left = self.parse_pivot(left)?;
                continue;
            }

            break;
        }

        Ok(left)
    }

    fn parse_from_primary(&mut self) -> PResult<FromNode> {
        let span = self.current_span();
        let tok = match self.peek() {
            Some(tok) => tok.token.clone(),
            None => {
                self.report_expected("a source")?;
                return Ok(FromNode::Error(ErrorNode {
                    message: "Missing source".to_string(),
                    span,
                }));
            }
        };

        match tok {
            Token::Hash => {
                self.next();
                self.parse_schema_method(span)
            }
            Token::LeftParen => {
                self.next();
                let query = self.parse_query_expr(0)?;
                self.expect_token(&Token::RightParen, "')'")?;
                let alias = self.parse_from_alias()?;
                Ok(FromNode::Subquery {
                    query: Box::new(query),
                    alias,
                })
            }
            _ => match self.ident_at(0) {
                // `schema.method()` with the '#' left off.
                Some(_)
                    if self.peek_nth_is(1, &Token::Period)
                        && self.ident_at(2).is_some()
                        && self.peek_nth_is(3, &Token::LeftParen) =>
                {
                    self.report(diagnostics::MISSING_TOKEN, "Missing '#' before schema name", span)?;
                    self.parse_schema_method(span)
                }
                Some(name) => {
                    self.next();
                    let alias = self.parse_from_alias()?;
                    Ok(FromNode::Reference { name, alias, span })
                }
                None => {
                    self.report_expected("a source")?;
                    Ok(FromNode::Error(ErrorNode {
                        message: format!("Expected a source, found {}", describe(&tok)),
                        span,
                    }))
                }
            },
        }
    }

    /// Parse `schema.method(args) [alias]`, the '#' having been consumed.
    fn parse_schema_method(&mut self, span: Span) -> PResult<FromNode> {
        let schema = self.parse_ident_or_empty("schema name")?;
        self.expect_token(&Token::Period, "'.'")?;
        let method = self.parse_ident_or_empty("method name")?;
        let args = self.parse_paren_expr_list()?;
        let alias = self.parse_from_alias()?;
        Ok(FromNode::SchemaMethod {
            schema,
            method,
            args,
            alias,
            span,
        })
    }

    /// Parse `PIVOT (Agg(expr) FOR column IN (v1, ...)) [alias]`, PIVOT having
    /// been consumed.
    fn parse_pivot(&mut self, source: FromNode) -> PResult<FromNode> {
        let span = self.current_span();
        self.expect_token(&Token::LeftParen, "'('")?;

        let aggregate = self.parse_subexpr(PREC_CONTAINMENT)?;
        self.expect_keyword(Keyword::FOR)?;
        let for_column = self.parse_subexpr(PREC_CONTAINMENT)?;
        self.expect_keyword(Keyword::IN)?;
        let value_exprs = self.parse_paren_expr_list()?;
        self.expect_token(&Token::RightParen, "')'")?;
        let alias = self.parse_from_alias()?;

        let aggregate = match aggregate {
            Expr::Function(func) => func,
            _ => {
                self.report(
                    diagnostics::UNEXPECTED_TOKEN,
                    "PIVOT requires an aggregate function call",
                    span,
                )?;
                return Ok(FromNode::Error(ErrorNode {
                    message: "Invalid PIVOT aggregate".to_string(),
                    span,
                }));
            }
        };

        let for_column = match for_column {
            Expr::Column(col) => col,
            _ => {
                self.report(
                    diagnostics::UNEXPECTED_TOKEN,
                    "PIVOT FOR requires a column",
                    span,
                )?;
                return Ok(FromNode::Error(ErrorNode {
                    message: "Invalid PIVOT column".to_string(),
                    span,
                }));
            }
        };

        let mut values = Vec::with_capacity(value_exprs.len());
        for expr in value_exprs {
            match expr {
                Expr::Literal(lit) => values.push(lit),
                _ => {
                    self.report(
                        diagnostics::UNEXPECTED_TOKEN,
                        "PIVOT values must be literals",
                        span,
                    )?;
                    return Ok(FromNode::Error(ErrorNode {
                        message: "Invalid PIVOT value".to_string(),
                        span,
                    }));
                }
            }
        }

        Ok(FromNode::Pivot {
            source: Box::new(source),
            aggregate,
            for_column,
            values,
            alias,
        })
    }

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_subexpr(0)
    }

    fn parse_subexpr(&mut self, precedence: u8) -> PResult<Expr> {
        let mut expr = self.parse_prefix()?;

        loop {
            let next_precedence = self.infix_precedence();
            if precedence >= next_precedence {
                break;
            }

            expr = self.parse_infix(expr, next_precedence)?;
        }

        Ok(expr)
    }

    fn infix_precedence(&self) -> u8 {
        let tok = match self.peek() {
            Some(tok) => &tok.token,
            None => return 0,
        };

        match tok {
            Token::Word(w) => match w.keyword {
                Some(Keyword::OR) => PREC_OR,
                Some(Keyword::AND) => PREC_AND,
                Some(Keyword::IS) => PREC_IS,
                Some(Keyword::IN) | Some(Keyword::LIKE) | Some(Keyword::RLIKE) => PREC_CONTAINMENT,
                Some(Keyword::NOT) => match self.peek_nth(1).and_then(|t| t.keyword()) {
                    Some(Keyword::IN) | Some(Keyword::LIKE) | Some(Keyword::RLIKE) => {
                        PREC_CONTAINMENT
                    }
                    _ => 0,
                },
                _ => 0,
            },
            Token::Eq
            | Token::DoubleEq
            | Token::Neq
            | Token::Lt
            | Token::LtEq
            | Token::Gt
            | Token::GtEq => PREC_COMPARISON,
            Token::Plus | Token::Minus => PREC_ADD_SUB,
            Token::Mul | Token::Div | Token::Mod => PREC_MUL_DIV_MOD,
            _ => 0,
        }
    }

    fn parse_prefix(&mut self) -> PResult<Expr> {
        let tok = match self.peek() {
            Some(tok) => tok.clone(),
            None => {
                self.report_expected("an expression")?;
                return Ok(Expr::Missing(MissingNode {
                    expected: "expression".to_string(),
                    span: self.eof_span,
                }));
            }
        };

        let expr = match tok.token {
            Token::Number { value, unit } => {
                self.next();
                self.parse_number(&value, unit.as_deref(), tok.span)?
            }
            Token::StringLiteral(s) => {
                self.next();
                Expr::Literal(Literal::String(s))
            }
            Token::Minus => {
                self.next();
                let integer = match self.peek().map(|t| &t.token) {
                    Some(Token::Number { value, unit }) if is_integer_form(value, unit.as_deref()) => {
                        Some((value.clone(), unit.clone()))
                    }
                    _ => None,
                };
                match integer {
                    // Sign folded into the literal so i64::MIN parses.
                    Some((value, unit)) => {
                        self.next();
                        self.parse_number(&format!("-{value}"), unit.as_deref(), tok.span)?
                    }
                    None => Expr::Unary {
                        op: UnaryOperator::Minus,
                        expr: Box::new(self.parse_subexpr(PREC_UNARY)?),
                    },
                }
            }
            Token::Plus => {
                self.next();
                Expr::Unary {
                    op: UnaryOperator::Plus,
                    expr: Box::new(self.parse_subexpr(PREC_UNARY)?),
                }
            }
            Token::LeftParen => {
                self.next();
                let expr = self.parse_expr()?;
                self.expect_token(&Token::RightParen, "')'")?;
                expr
            }
            Token::Word(ref w) if w.keyword.is_some() => match w.keyword {
                Some(Keyword::NULL) => {
                    self.next();
                    Expr::Literal(Literal::Null)
                }
                Some(Keyword::TRUE) => {
                    self.next();
                    Expr::Literal(Literal::Boolean(true))
                }
                Some(Keyword::FALSE) => {
                    self.next();
                    Expr::Literal(Literal::Boolean(false))
                }
                Some(Keyword::NOT) => {
                    self.next();
                    Expr::Unary {
                        op: UnaryOperator::Not,
                        expr: Box::new(self.parse_subexpr(PREC_NOT)?),
                    }
                }
                Some(Keyword::CASE) => {
                    self.next();
                    self.parse_case()?
                }
                _ => return self.missing_expression(),
            },
            Token::Word(_) | Token::BracketIdent(_) => {
                let ident = match self.ident_at(0) {
                    Some(ident) => ident,
                    None => return self.missing_expression(),
                };
                self.next();

                if self.peek_is(&Token::LeftParen) {
                    self.parse_function(ident, tok.span)?
                } else if self.peek_is(&Token::Period) && self.ident_at(1).is_some() {
                    self.next();
                    let name = self.parse_ident_or_empty("column name")?;
                    Expr::Column(ColumnExpr::new(Some(ident), name, tok.span))
                } else {
                    Expr::Column(ColumnExpr::new(None, ident, tok.span))
                }
            }
            _ => return self.missing_expression(),
        };

        // Property access, e.g. `a.Doc.City` or `Func(x).Field`.
        let mut expr = expr;
        while self.peek_is(&Token::Period) {
            let name = match self.ident_at(1) {
                Some(name) => name,
                None => break,
            };
            self.idx += 2;
            expr = Expr::Property {
                expr: Box::new(expr),
                name,
            };
        }

        Ok(expr)
    }

    /// Report a missing expression without consuming anything.
    fn missing_expression(&mut self) -> PResult<Expr> {
        let span = self.current_span();
        self.report_expected("an expression")?;
        Ok(Expr::Missing(MissingNode {
            expected: "expression".to_string(),
            span,
        }))
    }

    fn parse_number(&mut self, value: &str, unit: Option<&str>, span: Span) -> PResult<Expr> {
        let has_point = value.contains('.');
        let unit = unit.map(|u| u.to_ascii_lowercase());

        let as_integer = match unit.as_deref() {
            None => !has_point,
            Some("i") | Some("l") => {
                if has_point {
                    let msg = format!("Integer suffix on decimal number '{value}'");
                    return self.invalid_number(msg, span);
                }
                true
            }
            Some("d") | Some("m") => false,
            Some(other) => {
                let msg = format!("Unknown numeric suffix '{other}'");
                return self.invalid_number(msg, span);
            }
        };

        if as_integer {
            match value.parse::<i64>() {
                Ok(v) => Ok(Expr::Literal(Literal::Integer(v))),
                Err(_) => {
                    let msg = format!("Integer literal '{value}' out of range");
                    self.invalid_number(msg, span)
                }
            }
        } else {
            Ok(Expr::Literal(Literal::Decimal(value.to_string())))
        }
    }

    fn invalid_number(&mut self, msg: String, span: Span) -> PResult<Expr> {
        self.report(diagnostics::INVALID_NUMBER, msg.clone(), span)?;
        Ok(Expr::Error(ErrorNode { message: msg, span }))
    }

    fn parse_function(&mut self, name: Ident, span: Span) -> PResult<Expr> {
        let star = self.peek_nth_is(1, &Token::Mul) && self.peek_nth_is(2, &Token::RightParen);
        let args = if star {
            self.idx += 3;
            Vec::new()
        } else {
            self.parse_paren_expr_list()?
        };

        Ok(Expr::Function(FunctionExpr {
            name,
            args,
            star,
            span,
            resolved: None,
        }))
    }

    /// Parse a CASE expression, CASE having been consumed.
    fn parse_case(&mut self) -> PResult<Expr> {
        let mut when_then = Vec::new();
        while self.parse_keyword(Keyword::WHEN) {
            let when = self.parse_expr()?;
            self.expect_keyword(Keyword::THEN)?;
            let then = self.parse_expr()?;
            when_then.push(WhenThen { when, then });
        }

        if when_then.is_empty() {
            self.report_expected("WHEN")?;
        }

        let else_expr = if self.parse_keyword(Keyword::ELSE) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };

        self.expect_keyword(Keyword::END)?;

        Ok(Expr::Case {
            when_then,
            else_expr,
        })
    }

    fn parse_infix(&mut self, prefix: Expr, precedence: u8) -> PResult<Expr> {
        let tok = match self.next() {
            Some(tok) => tok,
            None => return Ok(prefix),
        };

        let left = Box::new(prefix);

        let expr = match tok.token {
            Token::Word(w) => match w.keyword {
                Some(Keyword::OR) => Expr::Logical {
                    left,
                    op: LogicalOperator::Or,
                    right: Box::new(self.parse_subexpr(precedence)?),
                },
                Some(Keyword::AND) => Expr::Logical {
                    left,
                    op: LogicalOperator::And,
                    right: Box::new(self.parse_subexpr(precedence)?),
                },
                Some(Keyword::IS) => {
                    let negated = self.parse_keyword(Keyword::NOT);
                    self.expect_keyword(Keyword::NULL)?;
                    Expr::IsNull {
                        expr: left,
                        negated,
                    }
                }
                Some(Keyword::NOT) => {
                    // Guaranteed to be followed by IN, LIKE, or RLIKE.
                    let keyword = self.next().and_then(|t| t.keyword());
                    self.parse_containment(left, keyword, true, precedence)?
                }
                keyword => self.parse_containment(left, keyword, false, precedence)?,
            },
            Token::Eq | Token::DoubleEq => Expr::Comparison {
                left,
                op: ComparisonOperator::Eq,
                right: Box::new(self.parse_subexpr(precedence)?),
            },
            Token::Neq => Expr::Comparison {
                left,
                op: ComparisonOperator::NotEq,
                right: Box::new(self.parse_subexpr(precedence)?),
            },
            Token::Lt => Expr::Comparison {
                left,
                op: ComparisonOperator::Lt,
                right: Box::new(self.parse_subexpr(precedence)?),
            },
            Token::LtEq => Expr::Comparison {
                left,
                op: ComparisonOperator::LtEq,
                right: Box::new(self.parse_subexpr(precedence)?),
            },
            Token::Gt => Expr::Comparison {
                left,
                op: ComparisonOperator::Gt,
                right: Box::new(self.parse_subexpr(precedence)?),
            },
            Token::GtEq => Expr::Comparison {
                left,
                op: ComparisonOperator::GtEq,
                right: Box::new(self.parse_subexpr(precedence)?),
            },
            Token::Plus => self.parse_binary(left, BinaryOperator::Plus, precedence)?,
            Token::Minus => self.parse_binary(left, BinaryOperator::Minus, precedence)?,
            Token::Mul => self.parse_binary(left, BinaryOperator::Multiply, precedence)?,
            Token::Div => self.parse_binary(left, BinaryOperator::Divide, precedence)?,
            Token::Mod => self.parse_binary(left, BinaryOperator::Modulo, precedence)?,
            other => {
                // Precedence lookup only returns non-zero for the tokens
                // above.
                let msg = format!("Unexpected {} in expression", describe(&other));
                self.report(diagnostics::UNEXPECTED_TOKEN, msg, tok.span)?;
                return Ok(*left);
            }
        };

        Ok(expr)
    }

    fn parse_binary(&mut self, left: Box<Expr>, op: BinaryOperator, precedence: u8) -> PResult<Expr> {
        Ok(Expr::Binary {
            left,
            op,
            right: Box::new(self.parse_subexpr(precedence)?),
        })
    }

    fn parse_containment(
        &mut self,
        left: Box<Expr>,
        keyword: Option<Keyword>,
        negated: bool,
        precedence: u8,
    ) -> PResult<Expr> {
        match keyword {
            Some(Keyword::IN) => {
                let list = self.parse_paren_expr_list()?;
                Ok(Expr::InList {
                    expr: left,
                    list,
                    negated,
                })
            }
            Some(Keyword::LIKE) | Some(Keyword::RLIKE) => {
                let kind = if keyword == Some(Keyword::LIKE) {
                    LikeKind::Like
                } else {
                    LikeKind::RLike
                };
                Ok(Expr::Like {
                    expr: left,
                    pattern: Box::new(self.parse_subexpr(precedence)?),
                    negated,
                    kind,
                })
            }
            _ => {
                let span = self.current_span();
                self.report(
                    diagnostics::UNEXPECTED_TOKEN,
                    "Expected IN, LIKE, or RLIKE",
                    span,
                )?;
                Ok(*left)
            }
        }
    }

    /// Parse `( expr, ... )`.
    fn parse_paren_expr_list(&mut self) -> PResult<Vec<Expr>> {
        self.expect_token(&Token::LeftParen, "'('")?;
        if self.consume_token(&Token::RightParen) {
            return Ok(Vec::new());
        }
        let exprs = self.parse_comma_separated(|p| p.parse_expr())?;
        self.expect_token(&Token::RightParen, "')'")?;
        Ok(exprs)
    }

    /// Parse one or more comma separated items.
    ///
    /// A duplicated comma is deleted, and a missing comma between two items
    /// is inserted.
    fn parse_comma_separated<T, F>(&mut self, mut f: F) -> PResult<Vec<T>>
    where
        F: FnMut(&mut Self) -> PResult<T>,
    {
        let mut items = Vec::new();
        loop {
            items.push(f(self)?);

            if self.consume_token(&Token::Comma) {
                self.skip_duplicate_delimiters(&Token::Comma)?;
                continue;
            }
            if self.starts_expression() {
                let span = self.current_span();
                self.report(diagnostics::MISSING_TOKEN, "Missing ','", span)?;
                continue;
            }
            break;
        }
        Ok(items)
    }

    /// Returns true if the next token can begin an expression.
    fn starts_expression(&self) -> bool {
        match self.peek().map(|t| &t.token) {
            Some(Token::Number { .. })
            | Some(Token::StringLiteral(_))
            | Some(Token::BracketIdent(_))
            | Some(Token::LeftParen)
            | Some(Token::Minus)
            | Some(Token::Plus) => true,
            Some(Token::Word(w)) => match w.keyword {
                None => self.misspelled_clause_keyword(0).is_none(),
                Some(kw) => matches!(
                    kw,
                    Keyword::NULL | Keyword::TRUE | Keyword::FALSE | Keyword::NOT | Keyword::CASE
                ),
            },
            _ => false,
        }
    }

    /// Returns true if the next tokens begin a query, used to tell a
    /// parenthesized query from a parenthesized list.
    fn starts_query_at(&self, n: usize) -> bool {
        match self.peek_nth(n).map(|t| &t.token) {
            Some(Token::LeftParen) => true,
            Some(tok) => matches!(tok.keyword(), Some(Keyword::SELECT) | Some(Keyword::WITH)),
            None => false,
        }
    }

    /// Returns true if the current select query can't continue.
    fn at_query_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(tok) => match &tok.token {
                Token::SemiColon | Token::RightParen => true,
                tok => matches!(
                    tok.keyword(),
                    Some(Keyword::UNION) | Some(Keyword::EXCEPT) | Some(Keyword::INTERSECT)
                ),
            },
        }
    }

    /// Check if the token at `n` looks like a misspelled clause keyword.
    ///
    /// The word must not be a keyword, one of its closest keywords must start
    /// a clause, and it must be followed by something that continues a clause.
    /// The last check keeps aliases like `orders` in `from x orders where`
    /// from being mistaken for ORDER.
    fn misspelled_clause_keyword(&self, n: usize) -> Option<Keyword> {
        let word = match self.peek_nth(n).map(|t| &t.token) {
            Some(Token::Word(w)) if w.keyword.is_none() => w,
            _ => return None,
        };
        let suggestion = closest_keywords(&word.value)
            .into_iter()
            .find(|kw| CLAUSE_KEYWORDS.contains(kw))?;

        match self.peek_nth(n + 1).map(|t| &t.token) {
            None | Some(Token::Comma) | Some(Token::RightParen) | Some(Token::SemiColon) => None,
            Some(tok) => match tok.keyword() {
                Some(kw) if SYNC_KEYWORDS.contains(&kw) || kw == Keyword::AS => None,
                Some(Keyword::INNER)
                | Some(Keyword::LEFT)
                | Some(Keyword::RIGHT)
                | Some(Keyword::JOIN)
                | Some(Keyword::CROSS)
                | Some(Keyword::OUTER)
                | Some(Keyword::ON) => None,
                _ => Some(suggestion),
            },
        }
    }

    /// Consume a misspelling of `keyword` if the current token is one.
    fn parse_misspelled_keyword(&mut self, keyword: Keyword) -> PResult<bool> {
        if self.misspelled_clause_keyword(0) != Some(keyword) {
            return Ok(false);
        }
        if let Some(tok) = self.next() {
            let msg = format!("Unknown keyword '{}', did you mean {keyword}?", tok.token);
            self.report(diagnostics::UNKNOWN_KEYWORD, msg, tok.span)?;
        }
        Ok(true)
    }

    /// Expect a keyword, recovering if it's not there.
    ///
    /// A near miss (e.g. `THNE`) is accepted as the keyword. An unexpected
    /// token directly before the keyword is deleted. Otherwise the keyword is
    /// treated as inserted.
    fn expect_keyword(&mut self, keyword: Keyword) -> PResult<()> {
        if self.parse_keyword(keyword) {
            return Ok(());
        }

        if let Some(tok) = self.peek().cloned() {
            if let Token::Word(w) = &tok.token {
                if w.keyword.is_none() && closest_keywords(&w.value).contains(&keyword) {
                    self.next();
                    let msg = format!("Unknown keyword '{}', did you mean {keyword}?", w.value);
                    return self.report(diagnostics::UNKNOWN_KEYWORD, msg, tok.span);
                }
            }

            if self.peek_nth(1).is_some_and(|t| t.is_keyword(keyword)) {
                self.next();
                let msg = format!("Unexpected {} before {keyword}", describe(&tok.token));
                self.report(diagnostics::UNEXPECTED_TOKEN, msg, tok.span)?;
                self.next();
                return Ok(());
            }
        }

        let span = self.current_span();
        self.report(diagnostics::MISSING_TOKEN, format!("Missing {keyword}"), span)
    }

    /// Expect a punctuation token, recovering if it's not there.
    ///
    /// An unexpected token directly before the expected one is deleted,
    /// otherwise the token is treated as inserted.
    fn expect_token(&mut self, expected: &Token, desc: &str) -> PResult<()> {
        if self.consume_token(expected) {
            return Ok(());
        }

        if let Some(tok) = self.peek().cloned() {
            if self.peek_nth_is(1, expected) {
                self.idx += 2;
                let msg = format!("Unexpected {} before {desc}", describe(&tok.token));
                return self.report(diagnostics::UNEXPECTED_TOKEN, msg, tok.span);
            }
        }

        let span = self.current_span();
        self.report(diagnostics::MISSING_TOKEN, format!("Missing {desc}"), span)
    }

    fn skip_duplicate_delimiters(&mut self, delim: &Token) -> PResult<()> {
        while self.peek_is(delim) {
            let span = self.current_span();
            self.next();
            self.report(
                diagnostics::DUPLICATE_DELIMITER,
                format!("Duplicate '{delim}'"),
                span,
            )?;
        }
        Ok(())
    }

    /// Panic mode recovery. Skip tokens up to the next synchronization point.
    fn synchronize(&mut self) -> Option<SkippedTokensNode> {
        let start = self.idx;
        while let Some(tok) = self.peek() {
            if self.idx - start >= MAX_PANIC_SKIP || is_sync_point(&tok.token) {
                break;
            }
            self.idx += 1;
        }
        self.skipped_since(start)
    }

    /// Like `synchronize`, but always skips at least one token.
    fn recover_skip(&mut self) -> SkippedTokensNode {
        if let Some(skipped) = self.synchronize() {
            return skipped;
        }
        let start = self.idx;
        if self.idx < self.toks.len() {
            self.idx += 1;
        }
        self.skipped_since(start).unwrap_or(SkippedTokensNode {
            tokens: Vec::new(),
            span: self.eof_span,
        })
    }

    fn skipped_since(&self, start: usize) -> Option<SkippedTokensNode> {
        let skipped = &self.toks[start..self.idx];
        let first = skipped.first()?;
        let last = skipped.last()?;
        Some(SkippedTokensNode {
            tokens: skipped.iter().map(|t| t.token.to_string()).collect(),
            span: first.span.merge(&last.span),
        })
    }

    fn parse_ident(&mut self, what: &str) -> PResult<Option<Ident>> {
        match self.ident_at(0) {
            Some(ident) => {
                self.next();
                Ok(Some(ident))
            }
            None => {
                self.report_expected(what)?;
                Ok(None)
            }
        }
    }

    fn parse_ident_or_empty(&mut self, what: &str) -> PResult<Ident> {
        Ok(self.parse_ident(what)?.unwrap_or_else(|| Ident::new("")))
    }

    /// Get an identifier at `n` tokens ahead without consuming it.
    fn ident_at(&self, n: usize) -> Option<Ident> {
        match self.peek_nth(n).map(|t| &t.token) {
            Some(Token::Word(w)) if w.keyword.is_none() => Some(Ident::new(w.value.clone())),
            Some(Token::BracketIdent(s)) => Some(Ident::bracketed(s.clone())),
            _ => None,
        }
    }

    fn report(&mut self, code: &'static str, msg: impl Into<String>, span: Span) -> PResult<()> {
        let location = span.location();
        if self.diagnostics.len() >= self.max_diagnostics {
            let msg = format!(
                "Too many errors, stopped after {} diagnostics",
                self.max_diagnostics
            );
            self.push_diagnostic(diagnostics::TOO_MANY_ERRORS, msg, location);
            return Err(ParseAbort);
        }
        self.push_diagnostic(code, msg.into(), location);
        Ok(())
    }

    fn push_diagnostic(&mut self, code: &'static str, msg: String, location: Location) {
        let diag = Diagnostic::error(code, msg, location).with_snippet(snippet(self.src, location));
        self.diagnostics.push(diag);
    }

    fn report_expected(&mut self, expected: &str) -> PResult<()> {
        match self.peek() {
            Some(tok) => {
                let span = tok.span;
                let msg = format!("Expected {expected}, found {}", describe(&tok.token));
                self.report(diagnostics::UNEXPECTED_TOKEN, msg, span)
            }
            None => {
                let msg = format!("Expected {expected}, found end of query");
                self.report(diagnostics::UNEXPECTED_EOF, msg, self.eof_span)
            }
        }
    }

    /// Parse a single keyword.
    fn parse_keyword(&mut self, keyword: Keyword) -> bool {
        if self.peek_is_keyword(keyword) {
            self.idx += 1;
            return true;
        }
        false
    }

    fn parse_one_of_keywords(&mut self, keywords: &[Keyword]) -> Option<Keyword> {
        let keyword = self.peek_keyword()?;
        if keywords.contains(&keyword) {
            self.idx += 1;
            return Some(keyword);
        }
        None
    }

    /// Consume the next token if it matches.
    fn consume_token(&mut self, tok: &Token) -> bool {
        if self.peek_is(tok) {
            self.idx += 1;
            return true;
        }
        false
    }

    fn peek(&self) -> Option<&TokenWithLocation> {
        self.toks.get(self.idx)
    }

    fn peek_nth(&self, n: usize) -> Option<&TokenWithLocation> {
        self.toks.get(self.idx + n)
    }

    fn peek_is(&self, tok: &Token) -> bool {
        self.peek_nth_is(0, tok)
    }

    fn peek_nth_is(&self, n: usize, tok: &Token) -> bool {
        self.peek_nth(n).is_some_and(|t| &t.token == tok)
    }

    fn peek_keyword(&self) -> Option<Keyword> {
        self.peek().and_then(|t| t.keyword())
    }

    fn peek_is_keyword(&self, keyword: Keyword) -> bool {
        self.peek_keyword() == Some(keyword)
    }

    fn next(&mut self) -> Option<TokenWithLocation> {
        let tok = self.toks.get(self.idx).cloned();
        if tok.is_some() {
            self.idx += 1;
        }
        tok
    }

    fn current_span(&self) -> Span {
        match self.peek() {
            Some(tok) => tok.span,
            None => self.eof_span,
        }
    }
}

/// Whether a number token is read as an integer literal.
fn is_integer_form(value: &str, unit: Option<&str>) -> bool {
    !value.contains('.')
        && unit.is_none_or(|u| u.eq_ignore_ascii_case("i") || u.eq_ignore_ascii_case("l"))
}

fn is_sync_point(tok: &Token) -> bool {
    match tok {
        Token::LeftParen | Token::RightParen | Token::SemiColon => true,
        tok => tok.keyword().is_some_and(|kw| SYNC_KEYWORDS.contains(&kw)),
    }
}

fn describe(tok: &Token) -> String {
    match tok.keyword() {
        Some(kw) => format!("keyword {kw}"),
        None => format!("'{tok}'"),
    }
}
