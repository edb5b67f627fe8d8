//! Instructions executed by the VM.
//!
//! A program is a flat list of instructions. Values are passed on five typed
//! stacks, control flow uses absolute jump targets.

pub mod emitter;

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use rust_decimal::Decimal;
use sift_parser::ast::{
    BinaryOperator, ComparisonOperator, LikeKind, LogicalOperator, SetOperator,
};
use sift_parser::datatype::DataType;

use crate::table::Column;

/// Which typed stack holds a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackKind {
    Bool,
    Int,
    Decimal,
    Str,
    /// Any value, including structs and values of unknown type.
    Object,
}

impl StackKind {
    pub const fn for_type(data_type: DataType) -> Self {
        match data_type {
            DataType::Boolean => Self::Bool,
            DataType::Int64 => Self::Int,
            DataType::Decimal => Self::Decimal,
            DataType::Utf8 => Self::Str,
            DataType::Struct | DataType::Any => Self::Object,
        }
    }

    /// Type values are cast to when pushed on this stack.
    pub const fn data_type(self) -> DataType {
        match self {
            Self::Bool => DataType::Boolean,
            Self::Int => DataType::Int64,
            Self::Decimal => DataType::Decimal,
            Self::Str => DataType::Utf8,
            Self::Object => DataType::Any,
        }
    }
}

/// Execution phases reported to a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Begin,
    From,
    Where,
    GroupBy,
    Select,
    End,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Begin => "begin",
            Self::From => "from",
            Self::Where => "where",
            Self::GroupBy => "group_by",
            Self::Select => "select",
            Self::End => "end",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub enum Instruction {
    PushNull(StackKind),
    PushBool(bool),
    PushInt(i64),
    PushDecimal(Decimal),
    PushStr(String),
    /// Push a column of the row currently in a slot.
    LoadColumn {
        slot: usize,
        index: usize,
        kind: StackKind,
    },
    /// Move the top value from one stack to another, casting it.
    Convert {
        from: StackKind,
        to: StackKind,
    },
    /// If any of the top operands is null, pop them, push null on `result`
    /// and jump to `target`.
    NullGuard {
        operands: Vec<StackKind>,
        result: StackKind,
        target: usize,
    },

    ArithInt(BinaryOperator),
    ArithDecimal(BinaryOperator),
    /// Arithmetic on values typed at runtime.
    ArithObject(BinaryOperator),
    /// String concatenation.
    Concat,
    Negate(StackKind),
    Compare {
        op: ComparisonOperator,
        kind: StackKind,
    },
    /// AND/OR with three-valued logic.
    Logical(LogicalOperator),
    Not,
    IsNull {
        kind: StackKind,
        negated: bool,
    },
    /// Pop `count` list values and the tested value from the object stack.
    InList {
        count: usize,
        negated: bool,
    },
    /// Pop a pattern and a value from the string stack.
    Like {
        kind: LikeKind,
        negated: bool,
    },
    /// LIKE against a pattern compiled ahead of time.
    LikeConst {
        regex: Regex,
        negated: bool,
    },
    /// Pop `argc` objects and call a scalar function.
    CallScalar {
        id: usize,
        argc: usize,
    },
    GetProperty {
        name: String,
    },

    Jump(usize),
    /// Pop a boolean and jump if it's false or null.
    JumpIfFalse(usize),
    SetRegister {
        reg: usize,
        value: bool,
    },
    JumpIfSet {
        reg: usize,
        target: usize,
    },

    /// Pop `argc` objects as arguments and open a schema row source.
    OpenSource {
        slot: usize,
        schema: String,
        method: String,
        argc: usize,
        used_columns: Option<Vec<String>>,
    },
    OpenTable {
        slot: usize,
        table: String,
    },
    OpenMemory {
        slot: usize,
        name: String,
    },
    /// Pop `key_count` objects and open the rows of a hash build matching
    /// them.
    OpenProbe {
        slot: usize,
        build: String,
        key_count: usize,
    },
    /// Iterate the groups of an arena. Keyed arenas iterate the children of
    /// the root, unkeyed ones only the root.
    OpenGroups {
        slot: usize,
        arena: String,
        aggregates: Arc<[String]>,
        keyed: bool,
    },
    /// Advance a slot's cursor, jumping to `on_end` once exhausted.
    NextRow {
        slot: usize,
        on_end: usize,
    },
    Close {
        slot: usize,
    },
    /// Set slots to an all-null row, for the unmatched side of outer joins.
    NullExtend {
        slots: Vec<usize>,
    },

    /// Start the build side of a hash join.
    CreateBuild {
        name: String,
        width: usize,
        key_count: usize,
    },
    /// Pop `key_count` objects and store them with the row in `slot`.
    InsertBuild {
        name: String,
        slot: usize,
    },
    FinishBuild {
        name: String,
    },

    CreateGroups {
        arena: String,
    },
    /// Pop `key_count` objects and make the matching group current.
    EnterGroup {
        arena: String,
        key_count: usize,
    },
    /// Fold a value into an accumulator of the current group. Pops an object
    /// if `has_arg`, otherwise counts the row.
    Accumulate {
        arena: String,
        name: String,
        function: usize,
        has_arg: bool,
    },
    /// Make sure the root group has every accumulator, so aggregates over no
    /// rows still produce a row.
    EnsureAccumulators {
        arena: String,
        aggregates: Vec<(String, usize)>,
    },

    CreateTable {
        name: String,
        columns: Vec<Column>,
    },
    /// Pop `count` objects and append them as a row.
    EmitRow {
        table: String,
        count: usize,
    },
    SortTable {
        table: String,
        keys: Vec<(usize, bool)>,
    },
    TruncateTable {
        table: String,
        width: usize,
    },
    SkipTake {
        table: String,
        skip: Option<u64>,
        take: Option<u64>,
    },
    SetOperation {
        op: SetOperator,
        left: String,
        right: String,
        output: String,
        keys: Vec<usize>,
        columns: Vec<Column>,
    },

    Phase(Phase),
    Exit,
}

impl Instruction {
    /// Jump target of this instruction, if any.
    pub(crate) fn target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Self::Jump(target)
            | Self::JumpIfFalse(target)
            | Self::JumpIfSet { target, .. }
            | Self::NullGuard { target, .. }
            | Self::NextRow {
                on_end: target, ..
            } => Some(target),
            _ => None,
        }
    }
}

/// A compiled statement.
#[derive(Debug)]
pub struct Program {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) slot_count: usize,
    pub(crate) register_count: usize,
    /// Table returned once the program exits.
    pub(crate) output: String,
}

impl Program {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn output_table(&self) -> &str {
        &self.output
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, instr) in self.instructions.iter().enumerate() {
            writeln!(f, "{idx:04} {instr:?}")?;
        }
        Ok(())
    }
}
