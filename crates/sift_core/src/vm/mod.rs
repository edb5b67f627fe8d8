//! Stack machine running [`Program`]s.

pub mod cursor;
pub mod frame;
pub mod phase;
pub mod stack;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashSet;
use parking_lot::Mutex;
use sift_error::{OptionExt, Result, SiftError};
use sift_parser::ast::{BinaryOperator, ComparisonOperator, LogicalOperator, SetOperator};
use sift_parser::datatype::DataType;
use tracing::trace;
use uuid::Uuid;

use self::cursor::{Cursor, SlotRow};
use self::frame::{HashBuild, StackFrame};
use self::phase::PhaseListener;
use self::stack::non_null;
use crate::cancel::CancellationToken;
use crate::functions::FunctionRegistry;
use crate::functions::scalar::call_scalar;
use crate::group::{GroupArena, ROOT_GROUP};
use crate::key::{GroupKey, Key};
use crate::program::emitter::like_regex;
use crate::program::{Instruction, Program, StackKind};
use crate::scalar::{ScalarValue, arithmetic, decimal_op, int_op};
use crate::schema::background::BackgroundRowSource;
use crate::schema::{RowSource, RowSourceContext, SchemaProvider};
use crate::table::{Column, Table};

/// Everything a run needs besides the program.
#[derive(Debug)]
pub struct RunContext<'a> {
    pub provider: &'a dyn SchemaProvider,
    pub memory_tables: &'a BTreeMap<String, Arc<Table>>,
    pub token: &'a CancellationToken,
    pub listener: Option<&'a PhaseListener>,
    pub query_id: Uuid,
    /// Zero reads row sources on the executing thread.
    pub channel_capacity: usize,
    pub chunk_size: usize,
    /// Receives the number of rows read once the run ends.
    pub rows_processed: &'a AtomicU64,
}

#[derive(Debug, Default)]
pub struct Vm {
    frame: StackFrame,
}

impl Vm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a program to completion, returning its output table.
    ///
    /// The frame is cleared afterwards whether the run succeeded or not.
    pub fn run(&mut self, program: &Program, ctx: &RunContext<'_>) -> Result<Table> {
        let guard = RunGuard {
            frame: &mut self.frame,
            rows_processed: ctx.rows_processed,
        };
        guard.frame.prepare(program);

        guard.frame.execute_program(program, ctx).map_err(|e| {
            e.with_field("query_id", ctx.query_id)
                .with_field("phase", guard.frame.phase.current())
        })
    }

    pub fn is_clear(&self) -> bool {
        self.frame.is_clear()
    }
}

/// Publishes the row count and clears the frame on every exit path.
struct RunGuard<'a> {
    frame: &'a mut StackFrame,
    rows_processed: &'a AtomicU64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.rows_processed.store(
            self.frame.rows_processed.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.frame.clear();
    }
}

/// Idle VMs of a compiled query.
#[derive(Debug, Default)]
pub struct VmPool {
    idle: Mutex<Vec<Vm>>,
}

impl VmPool {
    pub fn take(&self) -> Vm {
        self.idle.lock().pop().unwrap_or_default()
    }

    pub fn put(&self, vm: Vm) {
        self.idle.lock().push(vm);
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

impl StackFrame {
    fn execute_program(&mut self, program: &Program, ctx: &RunContext<'_>) -> Result<Table> {
        ctx.token.check()?;

        while !self.exit {
            let instr = program.instructions.get(self.ip).ok_or_else(|| {
                SiftError::new(format!("Instruction pointer {} out of range", self.ip))
            })?;
            self.ip += 1;
            self.execute(instr, ctx)?;
        }

        let table = self
            .tables
            .remove(&program.output)
            .required("output table")?;
        Ok(Arc::try_unwrap(table).unwrap_or_else(|table| table.as_ref().clone()))
    }

    fn execute(&mut self, instr: &Instruction, ctx: &RunContext<'_>) -> Result<()> {
        match instr {
            Instruction::PushNull(kind) => self.stacks.push_null(*kind),
            Instruction::PushBool(v) => self.stacks.bools.push(Some(*v)),
            Instruction::PushInt(v) => self.stacks.ints.push(Some(*v)),
            Instruction::PushDecimal(v) => self.stacks.decimals.push(Some(*v)),
            Instruction::PushStr(v) => self.stacks.strs.push(Some(v.clone())),
            Instruction::LoadColumn { slot, index, kind } => {
                let value = self.column_value(*slot, *index)?;
                self.stacks.push_value(*kind, value)?;
            }
            Instruction::Convert { from, to } => {
                let value = self.stacks.pop_value(*from, "convert")?;
                self.stacks.push_value(*to, value)?;
            }
            Instruction::NullGuard {
                operands,
                result,
                target,
            } => self.null_guard(operands, *result, *target)?,

            Instruction::ArithInt(op) => {
                let (a, b) = self.stacks.ints.pop_operands(op.symbol())?;
                self.stacks.ints.push(Some(int_op(*op, a, b)?));
            }
            Instruction::ArithDecimal(op) => {
                let (a, b) = self.stacks.decimals.pop_operands(op.symbol())?;
                self.stacks.decimals.push(Some(decimal_op(*op, a, b)?));
            }
            Instruction::ArithObject(op) => {
                let (a, b) = self.stacks.objects.pop_operands(op.symbol())?;
                self.stacks.push_object(arithmetic(*op, &a, &b)?);
            }
            Instruction::Concat => {
                let (a, b) = self.stacks.strs.pop_operands("+")?;
                self.stacks.strs.push(Some(a + &b));
            }
            Instruction::Negate(kind) => self.negate(*kind)?,
            Instruction::Compare { op, kind } => {
                let (left, right) = self.stacks.pop_value_pair(*kind, op.symbol())?;
                let result = compare(*op, &left, &right)?;
                self.stacks.bools.push(Some(result));
            }
            Instruction::Logical(op) => {
                let name = op.to_string();
                let (left, right) = self.stacks.bools.pop_pair(&name)?;
                self.stacks.bools.push(kleene(*op, left, right));
            }
            Instruction::Not => {
                let value = self.stacks.bools.pop("NOT")?;
                self.stacks.bools.push(value.map(|v| !v));
            }
            Instruction::IsNull { kind, negated } => {
                let value = self.stacks.pop_value(*kind, "IS NULL")?;
                self.stacks.bools.push(Some(value.is_null() != *negated));
            }
            Instruction::InList { count, negated } => {
                let mut values = self.stacks.pop_objects("IN", count + 1)?;
                let target = values.remove(0);
                let result = if target.is_null() {
                    None
                } else if values.iter().any(|v| v.key_eq(&target)) {
                    Some(true)
                } else if values.iter().any(ScalarValue::is_null) {
                    None
                } else {
                    Some(false)
                };
                self.stacks.bools.push(result.map(|r| r != *negated));
            }
            Instruction::Like { kind, negated } => {
                let name = kind.to_string();
                let (value, pattern) = self.stacks.strs.pop_pair(&name)?;
                let result = match (value, pattern) {
                    (Some(value), Some(pattern)) => {
                        Some(like_regex(*kind, &pattern)?.is_match(&value) != *negated)
                    }
                    _ => None,
                };
                self.stacks.bools.push(result);
            }
            Instruction::LikeConst { regex, negated } => {
                let value = self.stacks.strs.pop("LIKE")?;
                self.stacks
                    .bools
                    .push(value.map(|v| regex.is_match(&v) != *negated));
            }
            Instruction::CallScalar { id, argc } => {
                let func = FunctionRegistry.scalar(*id)?;
                let args = self.stacks.pop_objects(func.name(), *argc)?;
                let value = call_scalar(func, &args)?;
                self.stacks.push_object(value);
            }
            Instruction::GetProperty { name } => {
                let value = self.stacks.objects.pop(".")?;
                let value = match value {
                    Some(value) => value.property(name)?,
                    None => ScalarValue::Null,
                };
                self.stacks.push_object(value);
            }

            Instruction::Jump(target) => self.ip = *target,
            Instruction::JumpIfFalse(target) => {
                if self.stacks.bools.pop("WHERE")? != Some(true) {
                    self.ip = *target;
                }
            }
            Instruction::SetRegister { reg, value } => {
                *self
                    .registers
                    .get_mut(*reg)
                    .ok_or_else(|| SiftError::new(format!("Register {reg} out of range")))? =
                    *value;
            }
            Instruction::JumpIfSet { reg, target } => {
                let set = self
                    .registers
                    .get(*reg)
                    .copied()
                    .ok_or_else(|| SiftError::new(format!("Register {reg} out of range")))?;
                if set {
                    self.ip = *target;
                }
            }

            Instruction::OpenSource {
                slot,
                schema,
                method,
                argc,
                used_columns,
            } => {
                let args = self.stacks.pop_objects(method, *argc)?;
                let source = self.open_source(schema, method, &args, used_columns, ctx)?;
                self.set_cursor(*slot, Some(Cursor::Source(source)))?;
            }
            Instruction::OpenTable { slot, table } => {
                let table = self.table(table)?.clone();
                self.set_cursor(*slot, Some(Cursor::Table { table, next: 0 }))?;
            }
            Instruction::OpenMemory { slot, name } => {
                let table = ctx
                    .memory_tables
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SiftError::execution(format!("Missing table '{name}'")))?;
                self.set_cursor(*slot, Some(Cursor::Table { table, next: 0 }))?;
            }
            Instruction::OpenProbe {
                slot,
                build,
                key_count,
            } => {
                let key = Key::new(self.stacks.pop_objects("probe", *key_count)?);
                let build = self
                    .builds
                    .get(build)
                    .ok_or_else(|| SiftError::new(format!("Missing hash build '{build}'")))?;
                let index = build.index.required("hash build index")?;
                // Null keys never match.
                let rows = if key.has_null() {
                    Vec::new()
                } else {
                    build.table.lookup(index, &key).to_vec()
                };
                let cursor = Cursor::Rows {
                    table: build.table.clone(),
                    rows,
                    next: 0,
                };
                self.set_cursor(*slot, Some(cursor))?;
            }
            Instruction::OpenGroups {
                slot,
                arena,
                aggregates,
                keyed,
            } => {
                let groups = {
                    let groups = self
                        .groups
                        .get(arena)
                        .ok_or_else(|| SiftError::new(format!("Missing group arena '{arena}'")))?;
                    if *keyed {
                        groups.group(ROOT_GROUP)?.children().to_vec()
                    } else {
                        vec![ROOT_GROUP]
                    }
                };
                let cursor = Cursor::Groups {
                    arena: arena.clone(),
                    aggregates: aggregates.clone(),
                    groups,
                    next: 0,
                };
                self.set_cursor(*slot, Some(cursor))?;
            }
            Instruction::NextRow { slot, on_end } => {
                ctx.token.check()?;
                let cursor = self
                    .cursors
                    .get_mut(*slot)
                    .and_then(Option::as_mut)
                    .ok_or_else(|| SiftError::new(format!("No open cursor for slot {slot}")))?;
                let counts = cursor.counts_rows();
                match cursor.next_row()? {
                    Some(row) => {
                        if counts {
                            self.count_row();
                        }
                        self.set_slot(*slot, row)?;
                    }
                    None => self.ip = *on_end,
                }
            }
            Instruction::Close { slot } => {
                self.set_cursor(*slot, None)?;
                self.set_slot(*slot, SlotRow::Empty)?;
            }
            Instruction::NullExtend { slots } => {
                for slot in slots {
                    self.set_slot(*slot, SlotRow::Empty)?;
                }
            }

            Instruction::CreateBuild {
                name,
                width,
                key_count,
            } => {
                let columns = (0..width + key_count)
                    .map(|idx| Column::new(format!("c{idx}"), DataType::Any))
                    .collect();
                self.builds.insert(
                    name.clone(),
                    HashBuild {
                        table: Arc::new(Table::new(name.clone(), columns)),
                        width: *width,
                        key_count: *key_count,
                        index: None,
                    },
                );
            }
            Instruction::InsertBuild { name, slot } => {
                let (width, key_count) = {
                    let build = self.build(name)?;
                    (build.width, build.key_count)
                };
                let keys = self.stacks.pop_objects("build", key_count)?;
                let mut row = Vec::with_capacity(width + key_count);
                for index in 0..width {
                    row.push(self.column_value(*slot, index)?);
                }
                row.extend(keys);

                let build = self.build_mut(name)?;
                Arc::make_mut(&mut build.table).add_row(row)?;
            }
            Instruction::FinishBuild { name } => {
                let build = self.build_mut(name)?;
                let keys = (build.width..build.width + build.key_count).collect();
                build.index = Some(Arc::make_mut(&mut build.table).create_index(keys)?);
                trace!(%name, rows = build.table.num_rows(), "hash build finished");
            }

            Instruction::CreateGroups { arena } => {
                self.groups.insert(arena.clone(), GroupArena::new());
            }
            Instruction::EnterGroup { arena, key_count } => {
                let keys = self.stacks.pop_objects("GROUP BY", *key_count)?;
                let arena = self.arena_mut(arena)?;
                let group = if keys.is_empty() {
                    ROOT_GROUP
                } else {
                    arena.child(ROOT_GROUP, GroupKey::new(keys))?
                };
                self.current_group = Some(group);
            }
            Instruction::Accumulate {
                arena,
                name,
                function,
                has_arg,
            } => {
                let func = FunctionRegistry.aggregate(*function)?;
                let value = if *has_arg {
                    self.stacks.objects.pop(func.name())?.unwrap_or_default()
                } else {
                    ScalarValue::Boolean(true)
                };
                let group = self.current_group.required("current group")?;
                self.arena_mut(arena)?
                    .accumulate(group, name, || func.new_accumulator(), &value)?;
            }
            Instruction::EnsureAccumulators { arena, aggregates } => {
                let arena = self.arena_mut(arena)?;
                for (name, function) in aggregates {
                    let func = FunctionRegistry.aggregate(*function)?;
                    arena.ensure_accumulator(ROOT_GROUP, name, || func.new_accumulator())?;
                }
            }

            Instruction::CreateTable { name, columns } => {
                self.tables.insert(
                    name.clone(),
                    Arc::new(Table::new(name.clone(), columns.clone())),
                );
            }
            Instruction::EmitRow { table, count } => {
                let values = self.stacks.pop_objects("emit", *count)?;
                let table = self.table_mut(table)?;
                let row = coerce_row(values, table.columns())?;
                table.add_row(row)?;
            }
            Instruction::SortTable { table, keys } => self.table_mut(table)?.sort_by_columns(keys),
            Instruction::TruncateTable { table, width } => {
                self.table_mut(table)?.truncate_columns(*width)
            }
            Instruction::SkipTake { table, skip, take } => {
                self.table_mut(table)?.skip_take(*skip, *take)
            }
            Instruction::SetOperation {
                op,
                left,
                right,
                output,
                keys,
                columns,
            } => {
                let left = self.table(left)?.clone();
                let right = self.table(right)?.clone();
                let table = set_operation(*op, &left, &right, output, keys, columns)?;
                self.tables.insert(output.clone(), Arc::new(table));
            }

            Instruction::Phase(phase) => {
                trace!(%phase, "entering phase");
                self.phase.enter(*phase, ctx.listener);
            }
            Instruction::Exit => self.exit = true,
        }

        Ok(())
    }

    fn null_guard(&mut self, operands: &[StackKind], result: StackKind, target: usize) -> Result<()> {
        let mut counts: Vec<(StackKind, usize)> = Vec::with_capacity(2);
        for kind in operands {
            match counts.iter_mut().find(|(k, _)| k == kind) {
                Some((_, n)) => *n += 1,
                None => counts.push((*kind, 1)),
            }
        }

        let mut has_null = false;
        for (kind, n) in &counts {
            match self.stacks.top_has_null(*kind, *n) {
                Some(null) => has_null |= null,
                // Let the guarded instruction report the missing operands.
                None => return Ok(()),
            }
        }

        if has_null {
            for (kind, n) in counts {
                self.stacks.discard(kind, n, "null guard")?;
            }
            self.stacks.push_null(result);
            self.ip = target;
        }
        Ok(())
    }

    fn negate(&mut self, kind: StackKind) -> Result<()> {
        match kind {
            StackKind::Int => {
                let value = non_null(self.stacks.ints.pop("-")?, "-")?;
                let value = value
                    .checked_neg()
                    .ok_or_else(|| SiftError::execution(format!("Integer overflow: -{value}")))?;
                self.stacks.ints.push(Some(value));
            }
            StackKind::Decimal => {
                let value = non_null(self.stacks.decimals.pop("-")?, "-")?;
                self.stacks.decimals.push(Some(-value));
            }
            StackKind::Object => {
                let value = non_null(self.stacks.objects.pop("-")?, "-")?;
                let value = arithmetic(BinaryOperator::Minus, &ScalarValue::Int64(0), &value)?;
                self.stacks.push_object(value);
            }
            other => {
                return Err(SiftError::new(format!("Cannot negate values on the {other:?} stack")));
            }
        }
        Ok(())
    }

    fn open_source(
        &mut self,
        schema: &str,
        method: &str,
        args: &[ScalarValue],
        used_columns: &Option<Vec<String>>,
        ctx: &RunContext<'_>,
    ) -> Result<Box<dyn RowSource>> {
        ctx.token.check()?;

        let found = ctx.provider.get_schema(schema)?.ok_or_else(|| {
            SiftError::execution(format!("Unknown schema '{schema}'"))
                .with_field("schema", schema.to_string())
        })?;

        if self.temp_dir.is_none() {
            self.temp_dir = Some(tempfile::Builder::new().prefix("sift-").tempdir()?);
        }
        let source_ctx = RowSourceContext {
            used_columns: used_columns.clone(),
            token: ctx.token.clone(),
            temp_dir: self.temp_dir.as_ref().map(|d| d.path().to_path_buf()),
        };

        trace!(%schema, %method, ?used_columns, "opening row source");
        let source = found.get_row_source(method, &source_ctx, args)?;
        if ctx.channel_capacity == 0 {
            return Ok(source);
        }
        Ok(Box::new(BackgroundRowSource::spawn(
            source,
            ctx.channel_capacity,
            ctx.chunk_size,
            ctx.token.clone(),
        )?))
    }

    fn build(&self, name: &str) -> Result<&HashBuild> {
        self.builds
            .get(name)
            .ok_or_else(|| SiftError::new(format!("Missing hash build '{name}'")))
    }

    fn build_mut(&mut self, name: &str) -> Result<&mut HashBuild> {
        self.builds
            .get_mut(name)
            .ok_or_else(|| SiftError::new(format!("Missing hash build '{name}'")))
    }
}

fn compare(op: ComparisonOperator, left: &ScalarValue, right: &ScalarValue) -> Result<bool> {
    if left.is_null() || right.is_null() {
        return Err(SiftError::execution(format!("Null operand for '{}'", op.symbol()))
            .with_field("operator", op.symbol()));
    }

    let ord = || {
        left.partial_compare(right).ok_or_else(|| {
            SiftError::execution(format!("Cannot compare {left} and {right}"))
                .with_field("operator", op.symbol())
        })
    };
    Ok(match op {
        ComparisonOperator::Eq => left.key_eq(right),
        ComparisonOperator::NotEq => !left.key_eq(right),
        ComparisonOperator::Lt => ord()?.is_lt(),
        ComparisonOperator::LtEq => ord()?.is_le(),
        ComparisonOperator::Gt => ord()?.is_gt(),
        ComparisonOperator::GtEq => ord()?.is_ge(),
    })
}

/// Three-valued AND/OR. Null means unknown.
fn kleene(op: LogicalOperator, left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match op {
        LogicalOperator::And => match (left, right) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        LogicalOperator::Or => match (left, right) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    }
}

/// Cast values that don't fit their column's type.
fn coerce_row(values: Vec<ScalarValue>, columns: &[Column]) -> Result<Vec<ScalarValue>> {
    values
        .into_iter()
        .zip(columns)
        .map(|(value, column)| match value.datatype() {
            Some(t) if !column.data_type.is_assignable_from(t) => value.cast(column.data_type),
            _ => Ok(value),
        })
        .collect()
}

fn set_operation(
    op: SetOperator,
    left: &Table,
    right: &Table,
    output: &str,
    keys: &[usize],
    columns: &[Column],
) -> Result<Table> {
    let key_of = |row: &[ScalarValue]| Key::new(keys.iter().map(|&k| row[k].clone()).collect());
    let mut out = Table::new(output, columns.to_vec());

    match op {
        SetOperator::UnionAll => {
            for row in left.rows().iter().chain(right.rows()) {
                out.add_row(coerce_row(row.clone(), columns)?)?;
            }
        }
        SetOperator::Union => {
            let mut seen = HashSet::new();
            for row in left.rows().iter().chain(right.rows()) {
                if seen.insert(key_of(row.as_slice())) {
                    out.add_row(coerce_row(row.clone(), columns)?)?;
                }
            }
        }
        SetOperator::Except | SetOperator::Intersect => {
            let right_keys: HashSet<_> = right
                .rows()
                .iter()
                .map(|row| key_of(row.as_slice()))
                .collect();
            let keep_present = op == SetOperator::Intersect;
            for row in left.rows() {
                if right_keys.contains(&key_of(row.as_slice())) == keep_present {
                    out.add_row(coerce_row(row.clone(), columns)?)?;
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_error::ErrorKind;

    use super::*;
    use crate::schema::memory::MemorySchemaProvider;

    fn run(instructions: Vec<Instruction>) -> (Result<Table>, Vm) {
        let program = Program {
            instructions,
            slot_count: 0,
            register_count: 0,
            output: "out".to_string(),
        };
        let provider = MemorySchemaProvider::new();
        let memory_tables = BTreeMap::new();
        let token = CancellationToken::new();
        let rows = AtomicU64::new(0);
        let ctx = RunContext {
            provider: &provider,
            memory_tables: &memory_tables,
            token: &token,
            listener: None,
            query_id: Uuid::nil(),
            channel_capacity: 0,
            chunk_size: 1,
            rows_processed: &rows,
        };

        let mut vm = Vm::new();
        let result = vm.run(&program, &ctx);
        (result, vm)
    }

    fn single_value(instructions: Vec<Instruction>) -> ScalarValue {
        let mut all = vec![Instruction::CreateTable {
            name: "out".to_string(),
            columns: vec![Column::new("v", DataType::Any)],
        }];
        all.extend(instructions);
        all.push(Instruction::EmitRow {
            table: "out".to_string(),
            count: 1,
        });
        all.push(Instruction::Exit);

        let table = run(all).0.unwrap();
        table.row(0).unwrap()[0].clone()
    }

    #[test]
    fn binary_underflow_reports_depth() {
        let (result, vm) = run(vec![
            Instruction::PushInt(1),
            Instruction::ArithInt(BinaryOperator::Plus),
            Instruction::Exit,
        ]);
        let err = result.unwrap_err();
        assert_eq!(ErrorKind::Execution, err.kind());
        assert_eq!(Some("+"), err.field("operator"));
        assert_eq!(Some("2"), err.field("required"));
        assert_eq!(Some("1"), err.field("actual"));
        assert_eq!(Some("begin"), err.field("phase"));
        assert!(err.has_field("query_id"));
        assert!(vm.is_clear());
    }

    #[test]
    fn compare_underflow_reports_depth() {
        let tests = [(vec![], "0"), (vec![Instruction::PushInt(1)], "1")];

        for (pushes, actual) in tests {
            let mut instructions = pushes;
            instructions.push(Instruction::Compare {
                op: ComparisonOperator::Lt,
                kind: StackKind::Int,
            });
            instructions.push(Instruction::Exit);

            let (result, vm) = run(instructions);
            let err = result.unwrap_err();
            assert_eq!(ErrorKind::Execution, err.kind());
            assert_eq!(Some("<"), err.field("operator"));
            assert_eq!(Some("2"), err.field("required"));
            assert_eq!(Some(actual), err.field("actual"));
            assert!(vm.is_clear());
        }
    }

    #[test]
    fn logical_underflow_reports_depth() {
        let (result, _) = run(vec![
            Instruction::PushBool(true),
            Instruction::Logical(LogicalOperator::And),
            Instruction::Exit,
        ]);
        let err = result.unwrap_err();
        assert_eq!(Some("AND"), err.field("operator"));
        assert_eq!(Some("2"), err.field("required"));
        assert_eq!(Some("1"), err.field("actual"));
    }

    #[test]
    fn unguarded_null_operand() {
        let (result, _) = run(vec![
            Instruction::PushInt(1),
            Instruction::PushNull(StackKind::Int),
            Instruction::ArithInt(BinaryOperator::Multiply),
            Instruction::Exit,
        ]);
        let err = result.unwrap_err();
        assert!(err.message().contains("Null operand"), "{err}");
        assert_eq!(Some("*"), err.field("operator"));
    }

    #[test]
    fn null_guard_propagates_null() {
        let value = single_value(vec![
            Instruction::PushInt(1),
            Instruction::PushNull(StackKind::Int),
            Instruction::NullGuard {
                operands: vec![StackKind::Int, StackKind::Int],
                result: StackKind::Int,
                target: 5,
            },
            Instruction::ArithInt(BinaryOperator::Plus),
            Instruction::Convert {
                from: StackKind::Int,
                to: StackKind::Object,
            },
        ]);
        assert_eq!(ScalarValue::Null, value);
    }

    #[test]
    fn three_valued_logic() {
        // (left, op, right, expected)
        let tests = [
            (None, LogicalOperator::And, Some(false), Some(false)),
            (None, LogicalOperator::And, Some(true), None),
            (None, LogicalOperator::Or, Some(true), Some(true)),
            (None, LogicalOperator::Or, Some(false), None),
            (Some(true), LogicalOperator::And, Some(true), Some(true)),
            (Some(false), LogicalOperator::Or, Some(false), Some(false)),
        ];

        for (left, op, right, expected) in tests {
            assert_eq!(expected, kleene(op, left, right), "{left:?} {op} {right:?}");
        }
    }

    #[test]
    fn set_operations_by_key() {
        let columns = vec![
            Column::new("Name", DataType::Utf8),
            Column::new("N", DataType::Int64),
        ];
        let table = |rows: &[(&str, i64)]| {
            let mut t = Table::new("t", columns.clone());
            for (name, n) in rows {
                t.add_row(vec![ScalarValue::from(*name), ScalarValue::Int64(*n)])
                    .unwrap();
            }
            t
        };
        let left = table(&[("a", 1), ("b", 2), ("a", 3)]);
        let right = table(&[("b", 20), ("c", 30)]);

        // (op, expected N values)
        let tests = [
            (SetOperator::UnionAll, vec![1, 2, 3, 20, 30]),
            (SetOperator::Union, vec![1, 2, 30]),
            (SetOperator::Except, vec![1, 3]),
            (SetOperator::Intersect, vec![2]),
        ];

        for (op, expected) in tests {
            let out = set_operation(op, &left, &right, "out", &[0], &columns).unwrap();
            let ns: Vec<_> = out
                .rows()
                .iter()
                .map(|row| row[1].try_as_i64().unwrap())
                .collect();
            assert_eq!(expected, ns, "{op}");
        }
    }

    #[test]
    fn vm_pool_reuses_vms() {
        let pool = VmPool::default();
        let vm = pool.take();
        pool.put(vm);
        assert_eq!(1, pool.idle_count());
        let _vm = pool.take();
        assert_eq!(0, pool.idle_count());
    }
}
