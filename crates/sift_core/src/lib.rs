//! Compiler and virtual machine for sift queries.
//!
//! A query is parsed, bound against a [`schema::SchemaProvider`], lowered to a
//! flat [`program::Program`] and run by a stack based [`vm::Vm`].

pub mod binder;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod functions;
pub mod group;
pub mod key;
pub mod passes;
pub mod plan;
pub mod program;
pub mod scalar;
pub mod schema;
pub mod table;
pub mod vm;

pub use cancel::CancellationToken;
pub use config::{CompileOptions, EngineConfig};
pub use engine::{CompiledQuery, QueryEngine};
pub use program::Phase;
pub use scalar::ScalarValue;
pub use schema::memory::{MemorySchema, MemorySchemaProvider};
pub use table::{Column, Table};
pub use vm::phase::PhaseListener;
