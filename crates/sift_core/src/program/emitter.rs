//! Turn a [`StatementPlan`] into a [`Program`].
//!
//! Every FROM leaf becomes a loop:
//!
//! ```text
//!       Open(slot)
//! loop: NextRow(slot, end)
//!       <body>
//!       Jump(loop)
//! end:  Close(slot)
//! ```
//!
//! Joins nest the right leaf's loop inside the left's. The innermost body
//! filters, then either accumulates into groups or emits a row.

use std::sync::Arc;

use regex::RegexBuilder;
use sift_error::{OptionExt, Result, SiftError};
use sift_parser::ast::{
    ApplyKind, BinaryOperator, Expr, JoinKind, JoinStrategy, LikeKind, Literal, UnaryOperator,
};
use sift_parser::datatype::DataType;
use tracing::trace;

use super::{Instruction, Phase, Program, StackKind};
use crate::plan::{
    FromPlan, GroupingPlan, LeafPlan, LeafSource, QueryPlan, RESULT_TABLE, SelectPlan,
    StatementPlan,
};
use crate::scalar::ScalarValue;
use crate::table::Column;

type Label = usize;

/// Emits the body of a loop. Gets the label to jump to for skipping the
/// current row.
type BodyFn<'b> = dyn FnMut(&mut Emitter, Label) -> Result<()> + 'b;

#[derive(Debug, Default)]
pub struct Emitter {
    instructions: Vec<Instruction>,
    /// Label id to instruction index.
    labels: Vec<Option<usize>>,
    registers: usize,
    builds: usize,
    slots: usize,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_statement(mut self, plan: &StatementPlan) -> Result<Program> {
        self.push(Instruction::Phase(Phase::Begin));
        for step in &plan.steps {
            trace!(table = %step.table, "emitting materialize step");
            self.emit_query(&step.query, &step.table)?;
        }
        self.emit_query(&plan.body, RESULT_TABLE)?;
        self.push(Instruction::Phase(Phase::End));
        self.push(Instruction::Exit);

        self.finish()
    }

    fn finish(mut self) -> Result<Program> {
        for instr in &mut self.instructions {
            if let Some(target) = instr.target_mut() {
                *target = self
                    .labels
                    .get(*target)
                    .copied()
                    .flatten()
                    .ok_or_else(|| SiftError::new(format!("Unbound label {target}")))?;
            }
        }

        Ok(Program {
            instructions: self.instructions,
            slot_count: self.slots,
            register_count: self.registers,
            output: RESULT_TABLE.to_string(),
        })
    }

    fn push(&mut self, instr: Instruction) {
        self.instructions.push(instr);
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        self.labels.len() - 1
    }

    fn bind(&mut self, label: Label) {
        self.labels[label] = Some(self.instructions.len());
    }

    fn new_register(&mut self) -> usize {
        self.registers += 1;
        self.registers - 1
    }

    fn emit_query(&mut self, query: &QueryPlan, output: &str) -> Result<()> {
        match query {
            QueryPlan::Select(select) => self.emit_select(select, output),
            QueryPlan::SetOp(setop) => {
                self.push(Instruction::SetOperation {
                    op: setop.op,
                    left: setop.left.clone(),
                    right: setop.right.clone(),
                    output: output.to_string(),
                    keys: setop.keys.clone(),
                    columns: setop.columns.clone(),
                });
                Ok(())
            }
        }
    }

    fn emit_select(&mut self, select: &SelectPlan, output: &str) -> Result<()> {
        let base = select.slot_base;
        self.slots = self.slots.max(base + select.slot_count);

        let mut columns = select.columns.clone();
        for (idx, hidden) in select.projections[select.columns.len()..].iter().enumerate() {
            columns.push(Column::new(format!("__order{idx}"), hidden.return_type()));
        }
        self.push(Instruction::CreateTable {
            name: output.to_string(),
            columns,
        });
        if let Some(grouping) = &select.grouping {
            self.push(Instruction::CreateGroups {
                arena: grouping.arena.clone(),
            });
        }

        self.push(Instruction::Phase(Phase::From));
        let mut body = |em: &mut Emitter, skip: Label| em.emit_row(select, output, skip);
        match &select.from {
            Some(from) => self.emit_from(from, base, &mut body)?,
            None => {
                // A select without FROM produces one row.
                let end = self.new_label();
                body(self, end)?;
                self.bind(end);
            }
        }

        if let Some(grouping) = &select.grouping {
            self.emit_group_output(select, grouping, output)?;
        }

        if !select.order_by.is_empty() {
            self.push(Instruction::SortTable {
                table: output.to_string(),
                keys: select.order_by.clone(),
            });
        }
        if select.has_hidden_columns() {
            self.push(Instruction::TruncateTable {
                table: output.to_string(),
                width: select.columns.len(),
            });
        }
        if select.skip.is_some() || select.take.is_some() {
            self.push(Instruction::SkipTake {
                table: output.to_string(),
                skip: select.skip,
                take: select.take,
            });
        }

        Ok(())
    }

    /// Innermost body of a select's loops.
    fn emit_row(&mut self, select: &SelectPlan, output: &str, skip: Label) -> Result<()> {
        let base = select.slot_base;

        self.push(Instruction::Phase(Phase::Where));
        if let Some(filter) = &select.filter {
            self.emit_expr(filter, base, StackKind::Bool)?;
            self.push(Instruction::JumpIfFalse(skip));
        }

        match &select.grouping {
            Some(grouping) => {
                self.push(Instruction::Phase(Phase::GroupBy));
                for key in &grouping.keys {
                    self.emit_expr(key, base, StackKind::Object)?;
                }
                self.push(Instruction::EnterGroup {
                    arena: grouping.arena.clone(),
                    key_count: grouping.keys.len(),
                });
                for agg in &grouping.aggregates {
                    if let Some(arg) = &agg.arg {
                        self.emit_expr(arg, base, StackKind::Object)?;
                    }
                    self.push(Instruction::Accumulate {
                        arena: grouping.arena.clone(),
                        name: agg.name.clone(),
                        function: agg.function,
                        has_arg: agg.arg.is_some(),
                    });
                }
            }
            None => {
                self.push(Instruction::Phase(Phase::Select));
                self.emit_projections(select, output)?;
            }
        }

        Ok(())
    }

    fn emit_projections(&mut self, select: &SelectPlan, output: &str) -> Result<()> {
        for projection in &select.projections {
            self.emit_expr(projection, select.slot_base, StackKind::Object)?;
        }
        self.push(Instruction::EmitRow {
            table: output.to_string(),
            count: select.projections.len(),
        });
        Ok(())
    }

    fn emit_group_output(
        &mut self,
        select: &SelectPlan,
        grouping: &GroupingPlan,
        output: &str,
    ) -> Result<()> {
        if grouping.keys.is_empty() {
            self.push(Instruction::EnsureAccumulators {
                arena: grouping.arena.clone(),
                aggregates: grouping
                    .aggregates
                    .iter()
                    .map(|agg| (agg.name.clone(), agg.function))
                    .collect(),
            });
        }

        let slot = select.slot_base + grouping.slot;
        let aggregates: Arc<[String]> = grouping.aggregates.iter().map(|a| a.name.clone()).collect();
        self.push(Instruction::OpenGroups {
            slot,
            arena: grouping.arena.clone(),
            aggregates,
            keyed: !grouping.keys.is_empty(),
        });

        let start = self.new_label();
        let end = self.new_label();
        self.bind(start);
        self.push(Instruction::NextRow { slot, on_end: end });
        self.push(Instruction::Phase(Phase::Select));
        if let Some(having) = &select.having {
            self.emit_expr(having, select.slot_base, StackKind::Bool)?;
            self.push(Instruction::JumpIfFalse(start));
        }
        self.emit_projections(select, output)?;
        self.push(Instruction::Jump(start));
        self.bind(end);
        self.push(Instruction::Close { slot });

        Ok(())
    }

    fn emit_from(&mut self, from: &FromPlan, base: usize, body: &mut BodyFn<'_>) -> Result<()> {
        match from {
            FromPlan::Leaf(leaf) => self.emit_leaf_loop(leaf, base, body),
            FromPlan::Join {
                left,
                right,
                kind,
                condition,
                strategy,
            } => {
                let right_leaf = as_leaf(right)?;
                match strategy {
                    JoinStrategy::Hash {
                        left_keys,
                        right_keys,
                    } => self.emit_hash_join(
                        left, right_leaf, *kind, left_keys, right_keys, base, body,
                    ),
                    JoinStrategy::NestedLoop if *kind == JoinKind::RightOuter => {
                        self.emit_right_outer_join(left, right_leaf, condition, base, body)
                    }
                    JoinStrategy::NestedLoop => {
                        let outer = *kind == JoinKind::LeftOuter;
                        let right_slots = slots(right, base);
                        self.emit_from(left, base, &mut |em, _| {
                            em.emit_matched(outer, &right_slots, body, &mut |em, matched| {
                                em.emit_leaf_loop(right_leaf, base, &mut |em, skip| {
                                    em.emit_expr(condition, base, StackKind::Bool)?;
                                    em.push(Instruction::JumpIfFalse(skip));
                                    matched(em, skip)
                                })
                            })
                        })
                    }
                }
            }
            FromPlan::Apply { left, right, kind } => {
                let right_leaf = as_leaf(right)?;
                let outer = *kind == ApplyKind::Outer;
                let right_slots = slots(right, base);
                self.emit_from(left, base, &mut |em, _| {
                    em.emit_matched(outer, &right_slots, body, &mut |em, matched| {
                        em.emit_leaf_loop(right_leaf, base, matched)
                    })
                })
            }
        }
    }

    /// Emit `inner`, which runs `body` for every matching row. For outer
    /// joins, `body` runs once more with `null_slots` null-extended if
    /// nothing matched.
    fn emit_matched(
        &mut self,
        outer: bool,
        null_slots: &[usize],
        body: &mut BodyFn<'_>,
        inner: &mut dyn FnMut(&mut Emitter, &mut BodyFn<'_>) -> Result<()>,
    ) -> Result<()> {
        if !outer {
            return inner(self, body);
        }

        let reg = self.new_register();
        self.push(Instruction::SetRegister { reg, value: false });
        inner(self, &mut |em, skip| {
            em.push(Instruction::SetRegister { reg, value: true });
            body(em, skip)
        })?;

        let done = self.new_label();
        self.push(Instruction::JumpIfSet { reg, target: done });
        self.push(Instruction::NullExtend {
            slots: null_slots.to_vec(),
        });
        body(self, done)?;
        self.bind(done);

        Ok(())
    }

    fn emit_right_outer_join(
        &mut self,
        left: &FromPlan,
        right: &LeafPlan,
        condition: &Expr,
        base: usize,
        body: &mut BodyFn<'_>,
    ) -> Result<()> {
        let left_slots = slots(left, base);
        self.emit_leaf_loop(right, base, &mut |em, _| {
            em.emit_matched(true, &left_slots, body, &mut |em, matched| {
                em.emit_from(left, base, &mut |em, skip| {
                    em.emit_expr(condition, base, StackKind::Bool)?;
                    em.push(Instruction::JumpIfFalse(skip));
                    matched(em, skip)
                })
            })
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_hash_join(
        &mut self,
        left: &FromPlan,
        right: &LeafPlan,
        kind: JoinKind,
        left_keys: &[Expr],
        right_keys: &[Expr],
        base: usize,
        body: &mut BodyFn<'_>,
    ) -> Result<()> {
        let build = format!("__build{}", self.builds);
        self.builds += 1;
        let slot = base + right.slot;

        self.push(Instruction::CreateBuild {
            name: build.clone(),
            width: right.width(),
            key_count: right_keys.len(),
        });
        self.emit_leaf_loop(right, base, &mut |em, _| {
            for key in right_keys {
                em.emit_expr(key, base, StackKind::Object)?;
            }
            em.push(Instruction::InsertBuild {
                name: build.clone(),
                slot,
            });
            Ok(())
        })?;
        self.push(Instruction::FinishBuild {
            name: build.clone(),
        });

        let outer = kind == JoinKind::LeftOuter;
        self.emit_from(left, base, &mut |em, _| {
            em.emit_matched(outer, &[slot], body, &mut |em, matched| {
                for key in left_keys {
                    em.emit_expr(key, base, StackKind::Object)?;
                }
                em.push(Instruction::OpenProbe {
                    slot,
                    build: build.clone(),
                    key_count: left_keys.len(),
                });
                em.emit_loop(slot, matched)
            })
        })
    }

    fn emit_leaf_loop(&mut self, leaf: &LeafPlan, base: usize, body: &mut BodyFn<'_>) -> Result<()> {
        let slot = base + leaf.slot;
        match &leaf.source {
            LeafSource::Schema {
                schema,
                method,
                args,
            } => {
                for arg in args {
                    self.emit_expr(arg, base, StackKind::Object)?;
                }
                self.push(Instruction::OpenSource {
                    slot,
                    schema: schema.clone(),
                    method: method.clone(),
                    argc: args.len(),
                    used_columns: leaf.used_columns.clone(),
                });
            }
            LeafSource::Materialized { table } => self.push(Instruction::OpenTable {
                slot,
                table: table.clone(),
            }),
            LeafSource::Memory { name } => self.push(Instruction::OpenMemory {
                slot,
                name: name.to_ascii_lowercase(),
            }),
        }
        self.emit_loop(slot, body)
    }

    /// Loop over an opened cursor.
    fn emit_loop(&mut self, slot: usize, body: &mut BodyFn<'_>) -> Result<()> {
        let start = self.new_label();
        let end = self.new_label();
        self.bind(start);
        self.push(Instruction::NextRow { slot, on_end: end });
        body(self, start)?;
        self.push(Instruction::Jump(start));
        self.bind(end);
        self.push(Instruction::Close { slot });
        Ok(())
    }

    /// Emit an expression leaving its value on the `want` stack.
    pub fn emit_expr(&mut self, expr: &Expr, base: usize, want: StackKind) -> Result<()> {
        let kind = self.emit_value(expr, base)?;
        if kind != want {
            self.push(Instruction::Convert {
                from: kind,
                to: want,
            });
        }
        Ok(())
    }

    /// Emit an expression, returning the stack its value ends up on.
    fn emit_value(&mut self, expr: &Expr, base: usize) -> Result<StackKind> {
        Ok(match expr {
            Expr::Literal(lit) => self.emit_literal(lit)?,
            Expr::Column(col) => {
                let resolved = col.resolved.as_ref().required("resolved column")?;
                let kind = StackKind::for_type(resolved.data_type);
                self.push(Instruction::LoadColumn {
                    slot: base + resolved.source,
                    index: resolved.index,
                    kind,
                });
                kind
            }
            Expr::Property { expr, name } => {
                self.emit_expr(expr, base, StackKind::Object)?;
                self.push(Instruction::GetProperty {
                    name: name.value.clone(),
                });
                StackKind::Object
            }
            Expr::Unary { op, expr } => match op {
                UnaryOperator::Plus => self.emit_value(expr, base)?,
                UnaryOperator::Minus => {
                    let kind = match StackKind::for_type(expr.return_type()) {
                        kind @ (StackKind::Int | StackKind::Decimal) => kind,
                        _ => StackKind::Object,
                    };
                    self.emit_expr(expr, base, kind)?;
                    self.emit_guarded(&[kind], kind, Instruction::Negate(kind));
                    kind
                }
                UnaryOperator::Not => {
                    self.emit_expr(expr, base, StackKind::Bool)?;
                    self.push(Instruction::Not);
                    StackKind::Bool
                }
            },
            Expr::Binary { left, op, right } => {
                let kind = arithmetic_kind(*op, left.return_type(), right.return_type());
                self.emit_expr(left, base, kind)?;
                self.emit_expr(right, base, kind)?;
                let instr = match kind {
                    StackKind::Int => Instruction::ArithInt(*op),
                    StackKind::Decimal => Instruction::ArithDecimal(*op),
                    StackKind::Str => Instruction::Concat,
                    _ => Instruction::ArithObject(*op),
                };
                self.emit_guarded(&[kind, kind], kind, instr);
                kind
            }
            Expr::Comparison { left, op, right } => {
                let kind = DataType::common_supertype(left.return_type(), right.return_type())
                    .map(StackKind::for_type)
                    .unwrap_or(StackKind::Object);
                self.emit_expr(left, base, kind)?;
                self.emit_expr(right, base, kind)?;
                self.emit_guarded(
                    &[kind, kind],
                    StackKind::Bool,
                    Instruction::Compare { op: *op, kind },
                );
                StackKind::Bool
            }
            Expr::Logical { left, op, right } => {
                self.emit_expr(left, base, StackKind::Bool)?;
                self.emit_expr(right, base, StackKind::Bool)?;
                self.push(Instruction::Logical(*op));
                StackKind::Bool
            }
            Expr::IsNull { expr, negated } => {
                let kind = self.emit_value(expr, base)?;
                self.push(Instruction::IsNull {
                    kind,
                    negated: *negated,
                });
                StackKind::Bool
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                self.emit_expr(expr, base, StackKind::Object)?;
                for item in list {
                    self.emit_expr(item, base, StackKind::Object)?;
                }
                self.push(Instruction::InList {
                    count: list.len(),
                    negated: *negated,
                });
                StackKind::Bool
            }
            Expr::Like {
                expr,
                pattern,
                negated,
                kind,
            } => {
                self.emit_expr(expr, base, StackKind::Str)?;
                match pattern.as_ref() {
                    Expr::Literal(Literal::String(pattern)) => {
                        self.push(Instruction::LikeConst {
                            regex: like_regex(*kind, pattern)?,
                            negated: *negated,
                        });
                    }
                    pattern => {
                        self.emit_expr(pattern, base, StackKind::Str)?;
                        self.push(Instruction::Like {
                            kind: *kind,
                            negated: *negated,
                        });
                    }
                }
                StackKind::Bool
            }
            Expr::Case {
                when_then,
                else_expr,
            } => {
                let kind = StackKind::for_type(expr.return_type());
                let end = self.new_label();
                for wt in when_then {
                    let next = self.new_label();
                    self.emit_expr(&wt.when, base, StackKind::Bool)?;
                    self.push(Instruction::JumpIfFalse(next));
                    self.emit_expr(&wt.then, base, kind)?;
                    self.push(Instruction::Jump(end));
                    self.bind(next);
                }
                match else_expr {
                    Some(else_expr) => self.emit_expr(else_expr, base, kind)?,
                    None => self.push(Instruction::PushNull(kind)),
                }
                self.bind(end);
                kind
            }
            Expr::Function(func) => {
                let resolved = func.resolved.as_ref().required("resolved function")?;
                if resolved.is_aggregate {
                    return Err(SiftError::new(format!(
                        "Aggregate '{}' outside of a grouped select",
                        func.name
                    )));
                }
                for arg in &func.args {
                    self.emit_expr(arg, base, StackKind::Object)?;
                }
                self.push(Instruction::CallScalar {
                    id: resolved.id,
                    argc: func.args.len(),
                });
                StackKind::Object
            }
            Expr::Error(_) | Expr::Missing(_) => {
                return Err(SiftError::new("Cannot emit an expression with syntax errors"));
            }
        })
    }

    fn emit_literal(&mut self, lit: &Literal) -> Result<StackKind> {
        Ok(match ScalarValue::from_literal(lit)? {
            ScalarValue::Null => {
                self.push(Instruction::PushNull(StackKind::Object));
                StackKind::Object
            }
            ScalarValue::Boolean(b) => {
                self.push(Instruction::PushBool(b));
                StackKind::Bool
            }
            ScalarValue::Int64(i) => {
                self.push(Instruction::PushInt(i));
                StackKind::Int
            }
            ScalarValue::Decimal(d) => {
                self.push(Instruction::PushDecimal(d));
                StackKind::Decimal
            }
            ScalarValue::Utf8(s) => {
                self.push(Instruction::PushStr(s));
                StackKind::Str
            }
            ScalarValue::Struct(_) => {
                return Err(SiftError::new("Struct literals are not supported"));
            }
        })
    }

    /// Emit `instr` behind a null guard so it never sees a null operand.
    fn emit_guarded(&mut self, operands: &[StackKind], result: StackKind, instr: Instruction) {
        let end = self.new_label();
        self.push(Instruction::NullGuard {
            operands: operands.to_vec(),
            result,
            target: end,
        });
        self.push(instr);
        self.bind(end);
    }
}

fn as_leaf(from: &FromPlan) -> Result<&LeafPlan> {
    match from {
        FromPlan::Leaf(leaf) => Ok(leaf),
        _ => Err(SiftError::new("Right side of a join must be a single source")),
    }
}

fn slots(from: &FromPlan, base: usize) -> Vec<usize> {
    from.slots().into_iter().map(|s| base + s).collect()
}

fn arithmetic_kind(op: BinaryOperator, left: DataType, right: DataType) -> StackKind {
    match (left, right) {
        (DataType::Int64, DataType::Int64) => StackKind::Int,
        (DataType::Utf8, DataType::Utf8) if op == BinaryOperator::Plus => StackKind::Str,
        (l, r) if l.is_numeric() && r.is_numeric() => StackKind::Decimal,
        _ => StackKind::Object,
    }
}

/// Compile a LIKE or RLIKE pattern.
///
/// LIKE matches the whole value case-insensitively with `%` for any run of
/// characters and `_` for one character. RLIKE is a regular expression
/// searched anywhere in the value.
pub fn like_regex(kind: LikeKind, pattern: &str) -> Result<regex::Regex> {
    let (source, case_insensitive) = match kind {
        LikeKind::Like => {
            let mut source = String::with_capacity(pattern.len() + 2);
            source.push('^');
            for c in pattern.chars() {
                match c {
                    '%' => source.push_str(".*"),
                    '_' => source.push('.'),
                    c => source.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
                }
            }
            source.push('$');
            (source, true)
        }
        LikeKind::RLike => (pattern.to_string(), false),
    };

    RegexBuilder::new(&source)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| {
            SiftError::semantic(format!("Invalid {kind} pattern '{pattern}'"))
                .with_field("pattern", pattern.to_string())
                .with_source(Box::new(e))
        })
}
