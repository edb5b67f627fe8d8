//! Resolve names and types, producing a [`StatementPlan`].
//!
//! Sub-queries, CTEs and both sides of set operations become materialize
//! steps so that every select reads only from row sources and tables.

pub mod node_stack;
pub mod rewrite;
pub mod scope;

use hashbrown::HashMap;
use sift_error::{Result, SiftError};
use sift_parser::ast::{
    Expr, FromAlias, FromNode, FunctionExpr, JoinStrategy, Literal, QueryExpr, ResolvedColumn,
    ResolvedFunction, SelectItem, SelectNode, SelectQuery, Statement, UnaryOperator, WhenThen,
};
use sift_parser::datatype::DataType;
use sift_parser::tokens::Span;
use tracing::trace;

use self::node_stack::NodeStack;
use self::rewrite::map_children;
use self::scope::{Scope, ScopeLeaf, synthetic_column, with_suggestions};
use crate::cache::CacheService;
use crate::config::CompileOptions;
use crate::functions::{FunctionRef, FunctionRegistry};
use crate::passes::cte::order_ctes;
use crate::passes::pivot::{self, PivotInput};
use crate::passes::setop;
use crate::plan::{
    AggregatePlan, FromPlan, GroupingPlan, LeafPlan, LeafSource, MaterializeStep, QueryPlan,
    SelectPlan, SetOpPlan, StatementPlan,
};
use crate::scalar::ScalarValue;
use crate::schema::{SchemaColumn, SchemaProvider};
use crate::table::Column;

#[derive(Debug, Clone)]
struct BoundTable {
    table: String,
    columns: Vec<Column>,
}

/// Where an expression appears.
#[derive(Debug, Clone, Copy)]
struct ExprContext {
    clause: &'static str,
    allow_aggregates: bool,
}

impl ExprContext {
    const fn new(clause: &'static str, allow_aggregates: bool) -> Self {
        ExprContext {
            clause,
            allow_aggregates,
        }
    }
}

#[derive(Debug)]
pub struct Binder<'a> {
    provider: &'a dyn SchemaProvider,
    cache: &'a CacheService,
    options: &'a CompileOptions,
    functions: FunctionRegistry,
    steps: Vec<MaterializeStep>,
    /// CTEs and internal tables by lowercase name.
    tables: HashMap<String, BoundTable>,
    next_slot: usize,
    next_table: usize,
    next_arena: usize,
}

impl<'a> Binder<'a> {
    pub fn new(
        provider: &'a dyn SchemaProvider,
        cache: &'a CacheService,
        options: &'a CompileOptions,
    ) -> Self {
        Binder {
            provider,
            cache,
            options,
            functions: FunctionRegistry,
            steps: Vec::new(),
            tables: HashMap::new(),
            next_slot: 0,
            next_table: 0,
            next_arena: 0,
        }
    }

    pub fn bind_statement(mut self, stmt: &Statement) -> Result<StatementPlan> {
        for idx in order_ctes(&stmt.ctes)? {
            let cte = &stmt.ctes[idx];
            let plan = self.bind_query(&cte.query)?;
            let name = cte.name.value.to_ascii_lowercase();
            let table = format!("__cte_{name}");
            let columns = plan.columns().to_vec();
            trace!(cte = %cte.name, ?columns, "bound cte");

            self.steps.push(MaterializeStep {
                table: table.clone(),
                query: plan,
            });
            self.tables.insert(name, BoundTable { table, columns });
        }

        let body = self.bind_query(&stmt.body)?;

        Ok(StatementPlan {
            steps: self.steps,
            body,
        })
    }

    fn materialize(&mut self, prefix: &str, query: QueryPlan) -> BoundTable {
        let table = format!("__{prefix}{}", self.next_table);
        self.next_table += 1;
        let columns = query.columns().to_vec();
        self.steps.push(MaterializeStep {
            table: table.clone(),
            query,
        });
        BoundTable { table, columns }
    }

    fn bind_query(&mut self, query: &QueryExpr) -> Result<QueryPlan> {
        match query {
            QueryExpr::Select(select) => Ok(QueryPlan::Select(Box::new(self.bind_select(select)?))),
            QueryExpr::SetOp(node) => {
                let left = self.bind_query(&node.left)?;
                let right = self.bind_query(&node.right)?;
                let keys = setop::resolve_keys(
                    node.op,
                    node.keys.as_deref(),
                    left.columns(),
                    right.columns(),
                )?;
                let columns = setop::output_columns(left.columns(), right.columns());

                let left = self.materialize("setop", left);
                let right = self.materialize("setop", right);

                Ok(QueryPlan::SetOp(SetOpPlan {
                    left: left.table,
                    right: right.table,
                    op: node.op,
                    keys,
                    columns,
                }))
            }
            QueryExpr::Error(err) => Err(SiftError::semantic(format!(
                "Cannot bind invalid query: {}",
                err.message
            ))),
        }
    }

    fn bind_select(&mut self, query: &SelectQuery) -> Result<SelectPlan> {
        let mut scope = Scope::new();
        let from = match &query.from {
            Some(from) => Some(self.bind_from(from, &mut scope)?),
            None => None,
        };

        let filter = match &query.where_clause {
            Some(where_clause) => {
                let expr =
                    self.bind_expr(&where_clause.expr, &scope, ExprContext::new("WHERE", false))?;
                expect_boolean(&expr, "WHERE")?;
                Some(expr)
            }
            None => None,
        };

        let grouped = query.group_by.is_some() || self.has_aggregates(query);
        let mut grouping = if grouped {
            let exprs = query
                .group_by
                .as_ref()
                .map(|g| g.exprs.as_slice())
                .unwrap_or_default();
            let keys = exprs
                .iter()
                .map(|e| self.bind_expr(e, &scope, ExprContext::new("GROUP BY", false)))
                .collect::<Result<Vec<_>>>()?;
            Some(GroupState::new(scope.leaves.len(), keys))
        } else {
            None
        };

        let ctx = ExprContext::new("SELECT", grouped);
        let mut projections = Vec::new();
        let mut columns = Vec::new();

        for item in &query.select.items {
            let expanded: Vec<(String, Expr)> = match item {
                SelectItem::Wildcard => {
                    if scope.leaves.is_empty() {
                        return Err(SiftError::semantic("SELECT * requires a FROM clause"));
                    }
                    scope.leaves.iter().flat_map(leaf_columns).collect()
                }
                SelectItem::QualifiedWildcard(qualifier) => {
                    let leaf = scope.find_leaf(&qualifier.value).ok_or_else(|| {
                        with_suggestions(
                            SiftError::semantic(format!("Unknown source '{}'", qualifier.value))
                                .with_field("source", &qualifier.value),
                            &qualifier.value,
                            scope.leaves.iter().map(|l| l.alias.as_str()),
                        )
                    })?;
                    leaf_columns(leaf).collect()
                }
                SelectItem::Expr { expr, alias } => {
                    let bound = self.bind_expr(expr, &scope, ctx)?;
                    let name = match alias {
                        Some(alias) => alias.value.clone(),
                        None => output_name(expr),
                    };
                    vec![(name, bound)]
                }
            };

            for (name, expr) in expanded {
                let expr = match &mut grouping {
                    Some(grouping) => grouping.rewrite(expr, "SELECT")?,
                    None => expr,
                };
                columns.push(Column::new(name, expr.return_type()));
                projections.push(expr);
            }
        }

        let having = match query.group_by.as_ref().and_then(|g| g.having.as_ref()) {
            Some(having) => {
                let expr = self.bind_expr(&having.expr, &scope, ExprContext::new("HAVING", true))?;
                let expr = match &mut grouping {
                    Some(grouping) => grouping.rewrite(expr, "HAVING")?,
                    None => expr,
                };
                expect_boolean(&expr, "HAVING")?;
                Some(expr)
            }
            None => None,
        };

        let mut order_by = Vec::new();
        if let Some(node) = &query.order_by {
            for item in &node.items {
                // Output column names, including select aliases, win over
                // source columns.
                let by_name = match &item.expr {
                    Expr::Column(col) if col.qualifier.is_none() => columns
                        .iter()
                        .position(|c| c.name == col.name.value)
                        .or_else(|| {
                            columns
                                .iter()
                                .position(|c| c.name.eq_ignore_ascii_case(&col.name.value))
                        }),
                    _ => None,
                };

                let pos = match by_name {
                    Some(pos) => pos,
                    None => {
                        let expr = self.bind_expr(
                            &item.expr,
                            &scope,
                            ExprContext::new("ORDER BY", grouped),
                        )?;
                        let expr = match &mut grouping {
                            Some(grouping) => grouping.rewrite(expr, "ORDER BY")?,
                            None => expr,
                        };
                        let id = expr.id();
                        match projections.iter().position(|p| p.id() == id) {
                            Some(pos) => pos,
                            None => {
                                projections.push(expr);
                                projections.len() - 1
                            }
                        }
                    }
                };
                order_by.push((pos, item.descending));
            }
        }

        let slot_count = scope.leaves.len() + usize::from(grouping.is_some());
        let slot_base = self.next_slot;
        self.next_slot += slot_count;

        let grouping = match grouping {
            Some(state) => {
                let arena = format!("groups{}", self.next_arena);
                self.next_arena += 1;
                Some(state.into_plan(arena))
            }
            None => None,
        };

        Ok(SelectPlan {
            slot_base,
            slot_count,
            from,
            filter,
            grouping,
            having,
            projections,
            columns,
            order_by,
            skip: query.skip.map(|s| s.count),
            take: query.take.map(|t| t.count),
        })
    }

    fn has_aggregates(&self, query: &SelectQuery) -> bool {
        let mut found = false;
        let mut check = |expr: &Expr| {
            expr.walk(&mut |e| {
                if let Expr::Function(func) = e {
                    if matches!(
                        self.functions.find(&func.name.value),
                        Some(FunctionRef::Aggregate(_, _))
                    ) {
                        found = true;
                    }
                }
            })
        };

        for item in &query.select.items {
            if let SelectItem::Expr { expr, .. } = item {
                check(expr);
            }
        }
        if let Some(having) = query.group_by.as_ref().and_then(|g| g.having.as_ref()) {
            check(&having.expr);
        }
        if let Some(order_by) = &query.order_by {
            for item in &order_by.items {
                check(&item.expr);
            }
        }
        found
    }

    fn bind_from(&mut self, from: &FromNode, scope: &mut Scope) -> Result<FromPlan> {
        match from {
            FromNode::SchemaMethod {
                schema,
                method,
                args,
                alias,
                ..
            } => {
                let args = args
                    .iter()
                    .map(|arg| {
                        self.bind_expr(arg, scope, ExprContext::new("source arguments", false))
                    })
                    .collect::<Result<Vec<_>>>()?;
                // Arguments only known per row are unknown while compiling.
                let params: Vec<_> = args.iter().map(constant_value).collect();

                let found = self.provider.get_schema(&schema.value)?.ok_or_else(|| {
                    SiftError::semantic(format!("Unknown schema '{}'", schema.value))
                        .with_field("schema", &schema.value)
                })?;
                let table = self.cache.get_table(
                    self.provider.id(),
                    &schema.value,
                    found.as_ref(),
                    &method.value,
                    &params,
                )?;
                let table = match table {
                    Some(table) => table,
                    None => {
                        let names = found.method_names();
                        return Err(with_suggestions(
                            SiftError::semantic(format!(
                                "Unknown method '{}.{}'",
                                schema.value, method.value
                            ))
                            .with_field("schema", &schema.value)
                            .with_field("method", &method.value),
                            &method.value,
                            names.iter().map(|n| n.as_str()),
                        ));
                    }
                };

                let slot = scope.leaves.len();
                let alias = leaf_alias(alias.as_ref(), &method.value);
                scope.leaves.push(ScopeLeaf {
                    slot,
                    alias: alias.clone(),
                    other_names: Vec::new(),
                    columns: table.columns.clone(),
                });

                Ok(FromPlan::Leaf(LeafPlan {
                    slot,
                    alias,
                    source: LeafSource::Schema {
                        schema: schema.value.clone(),
                        method: method.value.clone(),
                        args,
                    },
                    columns: table.columns,
                    used_columns: None,
                }))
            }
            FromNode::Reference { name, alias, .. } => {
                if let Some(bound) = self.tables.get(&name.value.to_ascii_lowercase()) {
                    let source = LeafSource::Materialized {
                        table: bound.table.clone(),
                    };
                    let columns = bound.columns.clone();
                    return Ok(table_leaf(scope, alias.as_ref(), &name.value, source, &columns));
                }
                if let Some(table) = self.options.memory_table(&name.value) {
                    let source = LeafSource::Memory {
                        name: name.value.clone(),
                    };
                    let columns = table.columns().to_vec();
                    return Ok(table_leaf(scope, alias.as_ref(), &name.value, source, &columns));
                }

                let candidates: Vec<&str> = self
                    .tables
                    .keys()
                    .filter(|k| !k.starts_with("__"))
                    .map(|k| k.as_str())
                    .chain(self.options.memory_table_names())
                    .collect();
                Err(with_suggestions(
                    SiftError::semantic(format!("Unknown table '{}'", name.value))
                        .with_field("table", &name.value),
                    &name.value,
                    candidates.into_iter(),
                ))
            }
            FromNode::Cte { name, alias } => {
                let bound = self
                    .tables
                    .get(&name.value.to_ascii_lowercase())
                    .cloned()
                    .ok_or_else(|| {
                        SiftError::semantic(format!("Unknown CTE '{}'", name.value))
                            .with_field("table", &name.value)
                    })?;
                let source = LeafSource::Materialized { table: bound.table };
                Ok(table_leaf(scope, alias.as_ref(), &name.value, source, &bound.columns))
            }
            FromNode::Memory { name, alias } => {
                let table = self.options.memory_table(&name.value).ok_or_else(|| {
                    SiftError::semantic(format!("Unknown table '{}'", name.value))
                        .with_field("table", &name.value)
                })?;
                let columns = table.columns().to_vec();
                let source = LeafSource::Memory {
                    name: name.value.clone(),
                };
                Ok(table_leaf(scope, alias.as_ref(), &name.value, source, &columns))
            }
            FromNode::Subquery { query, alias } => {
                let plan = self.bind_query(query)?;
                let bound = self.materialize("subquery", plan);
                let source = LeafSource::Materialized { table: bound.table };
                Ok(table_leaf(scope, alias.as_ref(), "subquery", source, &bound.columns))
            }
            FromNode::Pivot {
                source,
                aggregate,
                for_column,
                values,
                alias,
            } => {
                let source_aliases: Vec<String> = source
                    .leaves()
                    .iter()
                    .filter_map(|leaf| leaf.alias().map(|a| a.name.value.clone()))
                    .collect();

                let mut source_query =
                    SelectQuery::new(SelectNode { items: vec![SelectItem::Wildcard] }, Span::EMPTY);
                source_query.from = Some(source.as_ref().clone());
                let source_plan = self.bind_query(&QueryExpr::Select(Box::new(source_query)))?;
                let source_table = self.materialize("pivot_source", source_plan);
                self.tables
                    .insert(source_table.table.clone(), source_table.clone());

                let lowered = pivot::lower_pivot(PivotInput {
                    source_table: &source_table.table,
                    source_columns: &source_table.columns,
                    source_aliases: &source_aliases,
                    aggregate,
                    for_column,
                    values,
                })?;
                let plan = self.bind_query(&lowered)?;
                let bound = self.materialize("pivot", plan);
                let source = LeafSource::Materialized { table: bound.table };
                Ok(table_leaf(scope, alias.as_ref(), "pivot", source, &bound.columns))
            }
            FromNode::Join {
                left,
                right,
                kind,
                condition,
                ..
            } => {
                let left = self.bind_from(left, scope)?;
                let right = self.bind_from(right, scope)?;
                let condition = self.bind_expr(condition, scope, ExprContext::new("ON", false))?;
                expect_boolean(&condition, "ON")?;

                Ok(FromPlan::Join {
                    left: Box::new(left),
                    right: Box::new(right),
                    kind: *kind,
                    condition,
                    strategy: JoinStrategy::NestedLoop,
                })
            }
            FromNode::Apply { left, right, kind } => {
                let left = self.bind_from(left, scope)?;
                let right = self.bind_from(right, scope)?;
                Ok(FromPlan::Apply {
                    left: Box::new(left),
                    right: Box::new(right),
                    kind: *kind,
                })
            }
            FromNode::Error(err) => Err(SiftError::semantic(format!(
                "Cannot bind invalid source: {}",
                err.message
            ))),
        }
    }

    fn bind_expr(&self, expr: &Expr, scope: &Scope, ctx: ExprContext) -> Result<Expr> {
        let mut stack = NodeStack::new();
        self.visit_expr(expr, scope, ctx, &mut stack)?;
        stack.finish(ctx.clause)
    }

    /// Bind children first, then pop them as operands of the parent.
    fn visit_expr(
        &self,
        expr: &Expr,
        scope: &Scope,
        ctx: ExprContext,
        stack: &mut NodeStack,
    ) -> Result<()> {
        match expr {
            Expr::Literal(_) | Expr::Error(_) | Expr::Missing(_) => stack.push(expr.clone()),
            Expr::Column(col) => stack.push(scope.resolve_column(col)?),
            Expr::Property { expr: inner, name } => {
                self.visit_expr(inner, scope, ctx, stack)?;
                let [inner] = stack.pop_n::<1>(".")?;
                stack.push(Expr::Property {
                    expr: Box::new(inner),
                    name: name.clone(),
                });
            }
            Expr::Unary { op, expr: inner } => {
                self.visit_expr(inner, scope, ctx, stack)?;
                let [operand] = stack.pop_n::<1>(&op.to_string())?;
                let t = operand.return_type();
                let ok = match op {
                    UnaryOperator::Not => matches!(t, DataType::Boolean | DataType::Any),
                    UnaryOperator::Plus | UnaryOperator::Minus => {
                        t.is_numeric() || t == DataType::Any
                    }
                };
                if !ok {
                    return Err(SiftError::semantic(format!("Cannot apply '{op}' to {t}"))
                        .with_field("operator", op));
                }
                stack.push(Expr::Unary {
                    op: *op,
                    expr: Box::new(operand),
                });
            }
            Expr::Binary { left, op, right } => {
                self.visit_expr(left, scope, ctx, stack)?;
                self.visit_expr(right, scope, ctx, stack)?;
                let [left, right] = stack.pop_n::<2>(op.symbol())?;
                let (lt, rt) = (left.return_type(), right.return_type());
                let ok = lt == DataType::Any
                    || rt == DataType::Any
                    || (lt.is_numeric() && rt.is_numeric())
                    || (op.symbol() == "+" && lt == DataType::Utf8 && rt == DataType::Utf8);
                if !ok {
                    return Err(type_mismatch(op.symbol(), lt, rt));
                }
                stack.push(Expr::Binary {
                    left: Box::new(left),
                    op: *op,
                    right: Box::new(right),
                });
            }
            Expr::Comparison { left, op, right } => {
                self.visit_expr(left, scope, ctx, stack)?;
                self.visit_expr(right, scope, ctx, stack)?;
                let [left, right] = stack.pop_n::<2>(op.symbol())?;
                check_comparable(op.symbol(), &left, &right)?;
                stack.push(Expr::Comparison {
                    left: Box::new(left),
                    op: *op,
                    right: Box::new(right),
                });
            }
            Expr::Logical { left, op, right } => {
                self.visit_expr(left, scope, ctx, stack)?;
                self.visit_expr(right, scope, ctx, stack)?;
                let name = op.to_string();
                let [left, right] = stack.pop_n::<2>(&name)?;
                expect_boolean(&left, &name)?;
                expect_boolean(&right, &name)?;
                stack.push(Expr::Logical {
                    left: Box::new(left),
                    op: *op,
                    right: Box::new(right),
                });
            }
            Expr::IsNull {
                expr: inner,
                negated,
            } => {
                self.visit_expr(inner, scope, ctx, stack)?;
                let [operand] = stack.pop_n::<1>("IS NULL")?;
                stack.push(Expr::IsNull {
                    expr: Box::new(operand),
                    negated: *negated,
                });
            }
            Expr::InList {
                expr: inner,
                list,
                negated,
            } => {
                self.visit_expr(inner, scope, ctx, stack)?;
                for item in list {
                    self.visit_expr(item, scope, ctx, stack)?;
                }
                let mut operands = stack.pop_many("IN", list.len() + 1)?;
                let target = operands.remove(0);
                for item in &operands {
                    check_comparable("IN", &target, item)?;
                }
                stack.push(Expr::InList {
                    expr: Box::new(target),
                    list: operands,
                    negated: *negated,
                });
            }
            Expr::Like {
                expr: inner,
                pattern,
                negated,
                kind,
            } => {
                self.visit_expr(inner, scope, ctx, stack)?;
                self.visit_expr(pattern, scope, ctx, stack)?;
                let name = kind.to_string();
                let [inner, pattern] = stack.pop_n::<2>(&name)?;
                for operand in [&inner, &pattern] {
                    let t = operand.return_type();
                    if !matches!(t, DataType::Utf8 | DataType::Any) {
                        return Err(SiftError::semantic(format!(
                            "{name} requires string operands, found {t}"
                        ))
                        .with_field("operator", &name));
                    }
                }
                stack.push(Expr::Like {
                    expr: Box::new(inner),
                    pattern: Box::new(pattern),
                    negated: *negated,
                    kind: *kind,
                });
            }
            Expr::Case {
                when_then,
                else_expr,
            } => {
                for wt in when_then {
                    self.visit_expr(&wt.when, scope, ctx, stack)?;
                    self.visit_expr(&wt.then, scope, ctx, stack)?;
                }
                if let Some(else_expr) = else_expr {
                    self.visit_expr(else_expr, scope, ctx, stack)?;
                }

                let count = when_then.len() * 2 + usize::from(else_expr.is_some());
                let mut operands = stack.pop_many("CASE", count)?;
                let else_expr = match else_expr {
                    Some(_) => operands.pop().map(Box::new),
                    None => None,
                };

                let mut bound = Vec::with_capacity(when_then.len());
                let mut operands = operands.into_iter();
                while let (Some(when), Some(then)) = (operands.next(), operands.next()) {
                    expect_boolean(&when, "WHEN")?;
                    bound.push(WhenThen { when, then });
                }

                let case = Expr::Case {
                    when_then: bound,
                    else_expr,
                };
                check_case_branches(&case)?;
                stack.push(case);
            }
            Expr::Function(func) => self.visit_function(func, scope, ctx, stack)?,
        }
        Ok(())
    }

    fn visit_function(
        &self,
        func: &FunctionExpr,
        scope: &Scope,
        ctx: ExprContext,
        stack: &mut NodeStack,
    ) -> Result<()> {
        for arg in &func.args {
            self.visit_expr(arg, scope, ctx, stack)?;
        }
        let name = func.name.value.as_str();
        let args = stack.pop_many(name, func.args.len())?;

        let resolved = match self.functions.find(name) {
            None => {
                let suggestions = self.functions.suggest(name);
                let mut err = SiftError::semantic(format!("Unknown function '{name}'"))
                    .with_field("function", name.to_string());
                if !suggestions.is_empty() {
                    err = err.with_field("suggestions", suggestions.join(", "));
                }
                return Err(err);
            }
            Some(FunctionRef::Scalar(id, function)) => {
                if func.star {
                    return Err(SiftError::semantic(format!(
                        "'{name}(*)' is not a valid function call"
                    ))
                    .with_field("function", name.to_string()));
                }
                let types: Vec<_> = args.iter().map(Expr::return_type).collect();
                ResolvedFunction {
                    id,
                    is_aggregate: false,
                    return_type: function.return_type(&types)?,
                }
            }
            Some(FunctionRef::Aggregate(id, function)) => {
                if !ctx.allow_aggregates {
                    return Err(SiftError::semantic(format!(
                        "Aggregate function '{name}' is not allowed in {}",
                        ctx.clause
                    ))
                    .with_field("function", name.to_string())
                    .with_field("clause", ctx.clause));
                }
                if func.star && !function.accepts_star() {
                    return Err(SiftError::semantic(format!(
                        "'{name}(*)' is not a valid function call"
                    ))
                    .with_field("function", name.to_string()));
                }
                if args.iter().any(contains_aggregate) {
                    return Err(SiftError::semantic(format!(
                        "Aggregate function calls cannot be nested in '{name}'"
                    ))
                    .with_field("function", name.to_string()));
                }
                let types: Vec<_> = if func.star {
                    vec![DataType::Any]
                } else {
                    args.iter().map(Expr::return_type).collect()
                };
                ResolvedFunction {
                    id,
                    is_aggregate: true,
                    return_type: function.return_type(&types)?,
                }
            }
        };

        stack.push(Expr::Function(FunctionExpr {
            name: func.name.clone(),
            args,
            star: func.star,
            span: func.span,
            resolved: Some(resolved),
        }));
        Ok(())
    }
}

/// Grouping keys and aggregates collected while binding a grouped select.
#[derive(Debug)]
struct GroupState {
    slot: usize,
    keys: Vec<Expr>,
    key_ids: Vec<String>,
    aggregates: Vec<(String, AggregatePlan)>,
}

impl GroupState {
    fn new(slot: usize, keys: Vec<Expr>) -> Self {
        let key_ids = keys.iter().map(|k| k.id()).collect();
        GroupState {
            slot,
            keys,
            key_ids,
            aggregates: Vec::new(),
        }
    }

    /// Replace group keys and aggregate calls with columns of the group row.
    ///
    /// Errors on any remaining column not covered by a key.
    fn rewrite(&mut self, expr: Expr, clause: &'static str) -> Result<Expr> {
        let id = expr.id();
        if let Some(pos) = self.key_ids.iter().position(|k| *k == id) {
            return Ok(synthetic_column(
                &output_name(&expr),
                ResolvedColumn {
                    source: self.slot,
                    index: pos,
                    data_type: self.keys[pos].return_type(),
                },
            ));
        }

        match expr {
            Expr::Function(FunctionExpr {
                name,
                args,
                star,
                resolved: Some(resolved),
                ..
            }) if resolved.is_aggregate => {
                let idx = match self.aggregates.iter().position(|(agg_id, _)| *agg_id == id) {
                    Some(idx) => idx,
                    None => {
                        let plan = AggregatePlan {
                            name: format!("agg{}", self.aggregates.len()),
                            function: resolved.id,
                            arg: if star { None } else { args.into_iter().next() },
                        };
                        self.aggregates.push((id, plan));
                        self.aggregates.len() - 1
                    }
                };
                Ok(synthetic_column(
                    &name.value,
                    ResolvedColumn {
                        source: self.slot,
                        index: self.keys.len() + idx,
                        data_type: resolved.return_type,
                    },
                ))
            }
            Expr::Column(col) => Err(SiftError::semantic(format!(
                "Column '{}' must appear in GROUP BY or be used in an aggregate function",
                Expr::Column(col.clone())
            ))
            .with_field("column", &col.name.value)
            .with_field("clause", clause)),
            other => map_children(other, &mut |child| self.rewrite(child, clause)),
        }
    }

    fn into_plan(self, arena: String) -> GroupingPlan {
        GroupingPlan {
            arena,
            slot: self.slot,
            keys: self.keys,
            aggregates: self.aggregates.into_iter().map(|(_, plan)| plan).collect(),
        }
    }
}

fn leaf_alias(alias: Option<&FromAlias>, fallback: &str) -> String {
    match alias {
        Some(alias) => alias.name.value.clone(),
        None => fallback.to_string(),
    }
}

fn table_leaf(
    scope: &mut Scope,
    alias: Option<&FromAlias>,
    name: &str,
    source: LeafSource,
    columns: &[Column],
) -> FromPlan {
    let slot = scope.leaves.len();
    let alias = leaf_alias(alias, name);
    let columns: Vec<_> = columns
        .iter()
        .enumerate()
        .map(|(idx, c)| SchemaColumn::new(c.name.clone(), idx, c.data_type))
        .collect();

    scope.leaves.push(ScopeLeaf {
        slot,
        alias: alias.clone(),
        other_names: vec![name.to_string()],
        columns: columns.clone(),
    });

    FromPlan::Leaf(LeafPlan {
        slot,
        alias,
        source,
        columns,
        used_columns: None,
    })
}

/// Bound columns for every column of a leaf, named after the column.
fn leaf_columns(leaf: &ScopeLeaf) -> impl Iterator<Item = (String, Expr)> + '_ {
    leaf.columns.iter().map(|c| {
        let expr = synthetic_column(
            &c.name,
            ResolvedColumn {
                source: leaf.slot,
                index: c.index,
                data_type: c.data_type,
            },
        );
        (c.name.clone(), expr)
    })
}

/// Name of an output column written without an alias.
fn output_name(expr: &Expr) -> String {
    match expr {
        Expr::Column(col) => col.name.value.clone(),
        Expr::Property { name, .. } => name.value.clone(),
        Expr::Function(func) => func.name.value.clone(),
        other => other.to_string(),
    }
}

/// Value of an expression known while compiling, null otherwise.
fn constant_value(expr: &Expr) -> ScalarValue {
    match expr {
        Expr::Literal(lit) => ScalarValue::from_literal(lit).unwrap_or_default(),
        Expr::Unary {
            op: UnaryOperator::Minus,
            expr,
        } => match expr.as_ref() {
            Expr::Literal(Literal::Integer(v)) => {
                v.checked_neg().map(ScalarValue::Int64).unwrap_or_default()
            }
            Expr::Literal(lit @ Literal::Decimal(_)) => match ScalarValue::from_literal(lit) {
                Ok(ScalarValue::Decimal(d)) => ScalarValue::Decimal(-d),
                _ => ScalarValue::Null,
            },
            _ => ScalarValue::Null,
        },
        _ => ScalarValue::Null,
    }
}

fn contains_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| {
        if let Expr::Function(FunctionExpr {
            resolved: Some(resolved),
            ..
        }) = e
        {
            found |= resolved.is_aggregate;
        }
    });
    found
}

fn type_mismatch(op: &str, left: DataType, right: DataType) -> SiftError {
    SiftError::semantic(format!("Cannot apply '{op}' to {left} and {right}"))
        .with_field("operator", op.to_string())
        .with_field("left", left)
        .with_field("right", right)
}

fn check_comparable(op: &str, left: &Expr, right: &Expr) -> Result<()> {
    let (lt, rt) = (left.return_type(), right.return_type());
    match DataType::common_supertype(lt, rt) {
        Some(_) => Ok(()),
        None => Err(type_mismatch(op, lt, rt)),
    }
}

fn expect_boolean(expr: &Expr, clause: &str) -> Result<()> {
    match expr.return_type() {
        DataType::Boolean | DataType::Any => Ok(()),
        other => Err(SiftError::semantic(format!(
            "{clause} requires a boolean expression, found {other}"
        ))
        .with_field("clause", clause.to_string())),
    }
}

fn check_case_branches(case: &Expr) -> Result<()> {
    let Expr::Case {
        when_then,
        else_expr,
    } = case
    else {
        return Ok(());
    };

    let mut types = when_then
        .iter()
        .map(|wt| &wt.then)
        .chain(else_expr.iter().map(|e| e.as_ref()))
        .filter(|e| !matches!(e, Expr::Literal(Literal::Null)))
        .map(|e| e.return_type());
    let Some(first) = types.next() else {
        return Ok(());
    };
    for t in types {
        if DataType::common_supertype(first, t).is_none() {
            return Err(SiftError::semantic(format!(
                "CASE branches have incompatible types {first} and {t}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use sift_error::ErrorKind;
    use sift_parser::parse;

    use super::*;
    use crate::config::EngineConfig;
    use crate::passes::alias::assign_aliases;
    use crate::schema::memory::{MemorySchema, MemorySchemaProvider};
    use crate::table::Table;

    fn provider() -> MemorySchemaProvider {
        let people = Table::new(
            "people",
            vec![
                Column::new("Name", DataType::Utf8),
                Column::new("City", DataType::Utf8),
                Column::new("Age", DataType::Int64),
            ],
        );
        let cities = Table::new(
            "cities",
            vec![
                Column::new("City", DataType::Utf8),
                Column::new("Population", DataType::Int64),
            ],
        );
        MemorySchemaProvider::new().with_schema(
            "src",
            MemorySchema::new()
                .with_table("people", people)
                .with_table("cities", cities),
        )
    }

    fn bind(query: &str) -> Result<StatementPlan> {
        let out = parse(query);
        assert!(!out.has_errors(), "{:?}", out.diagnostics);
        let mut stmt = out.statement;
        assign_aliases(&mut stmt, 0);

        let provider = provider();
        let cache = CacheService::new(&EngineConfig::default());
        let options = CompileOptions::default();
        Binder::new(&provider, &cache, &options).bind_statement(&stmt)
    }

    fn body_select(plan: &StatementPlan) -> &SelectPlan {
        match &plan.body {
            QueryPlan::Select(select) => select,
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn output_columns_typed() {
        let plan = bind("SELECT Name, Age + 1 AS Next, Upper(City) FROM #src.people()").unwrap();
        let select = body_select(&plan);
        assert_eq!(
            vec![
                Column::new("Name", DataType::Utf8),
                Column::new("Next", DataType::Int64),
                Column::new("Upper", DataType::Utf8),
            ],
            select.columns
        );
    }

    #[test]
    fn grouped_select_rewritten() {
        let plan =
            bind("SELECT City, Count(*), Sum(Age) FROM #src.people() GROUP BY City").unwrap();
        let select = body_select(&plan);
        let grouping = select.grouping.as_ref().unwrap();
        assert_eq!(1, grouping.slot);
        assert_eq!(1, grouping.keys.len());
        assert_eq!(2, grouping.aggregates.len());
        assert!(grouping.aggregates[0].arg.is_none());

        // Every projection reads from the group row.
        for projection in &select.projections {
            assert_eq!(vec![1], rewrite::referenced_slots(projection));
        }
    }

    #[test]
    fn duplicate_aggregates_shared() {
        let plan = bind(
            "SELECT City, Count(*) FROM #src.people() GROUP BY City HAVING Count(*) > 1 \
             ORDER BY Count(*) DESC",
        )
        .unwrap();
        let select = body_select(&plan);
        assert_eq!(1, select.grouping.as_ref().unwrap().aggregates.len());
        assert_eq!(vec![(1, true)], select.order_by);
        assert!(!select.has_hidden_columns());
    }

    #[test]
    fn order_by_alias_and_hidden_column() {
        let plan = bind("SELECT Name AS N FROM #src.people() ORDER BY N, Age DESC").unwrap();
        let select = body_select(&plan);
        assert_eq!(vec![(0, false), (1, true)], select.order_by);
        assert_eq!(1, select.columns.len());
        assert_eq!(2, select.projections.len());
    }

    #[test]
    fn ctes_and_subqueries_materialized() {
        let plan = bind(
            "WITH adults AS (SELECT Name FROM #src.people() WHERE Age >= 18) \
             SELECT a.Name FROM adults a JOIN (SELECT City FROM #src.cities()) c ON 1 = 1",
        )
        .unwrap();
        let tables: Vec<_> = plan.steps.iter().map(|s| s.table.as_str()).collect();
        assert_eq!(vec!["__cte_adults", "__subquery0"], tables);
    }

    #[test]
    fn semantic_errors() {
        // (query, field expected on the error)
        let tests = [
            ("SELECT Nme FROM #src.people()", "suggestions"),
            ("SELECT City FROM #src.people() p JOIN #src.cities() c ON 1 = 1", "sources"),
            ("SELECT Name FROM #src.people() GROUP BY City", "column"),
            ("SELECT Name FROM #src.peeple()", "method"),
            ("SELECT Name FROM #nope.people()", "schema"),
            ("SELECT Name FROM missing", "table"),
            ("SELECT Uper(Name) FROM #src.people()", "function"),
            ("SELECT Name FROM #src.people() WHERE Count(*) > 1", "clause"),
            ("SELECT Name + 1 FROM #src.people()", "operator"),
            ("SELECT Name FROM #src.people() WHERE Age", "clause"),
        ];

        for (query, field) in tests {
            let err = bind(query).unwrap_err();
            assert_eq!(ErrorKind::Semantic, err.kind(), "{query}: {err}");
            assert!(err.has_field(field), "{query}: {err}");
        }
    }

    #[test]
    fn memory_tables_resolve() {
        let mut stmt = parse("SELECT Id FROM numbers").statement;
        assign_aliases(&mut stmt, 0);

        let provider = provider();
        let cache = CacheService::new(&EngineConfig::default());
        let options = CompileOptions::default().with_memory_table(
            "Numbers",
            Table::new("numbers", vec![Column::new("Id", DataType::Int64)]),
        );
        let plan = Binder::new(&provider, &cache, &options)
            .bind_statement(&stmt)
            .unwrap();
        let select = body_select(&plan);
        match select.from.as_ref().unwrap() {
            FromPlan::Leaf(leaf) => assert!(matches!(leaf.source, LeafSource::Memory { .. })),
            other => panic!("unexpected: {other:?}"),
        }
        let _ = Arc::new(plan);
    }
}
