//! Flat record model.
//!
//! A [`FlatRecord`] is one sorted key to scalar map per sampling cycle,
//! produced by [`flatten`] from a [`crate::model::Snapshot`] and consumed
//! by the exporter. [`Schema`] is the ordered column set a tabular
//! writer is built against. [`delta_record`] differences two records of
//! one run.

mod delta;
mod flatten;
mod registry;
mod schema;
mod value;

pub use delta::{
    DELTA_DURATION_KEY, DELTA_END_KEY, DELTA_START_KEY, DeltaScope, delta_record,
    is_counter_field,
};
pub use flatten::{
    ACCELERATOR_COUNT_KEY, ACCELERATOR_JSON_KEY, ACCELERATOR_PREFIX, FlattenOptions,
    PROCESS_COUNT_KEY, PROCESS_JSON_KEY, PROCESS_PREFIX, RecordLayout, flatten,
};
pub use registry::{
    ACCELERATOR_FIELDS, CONTAINER_FIELDS, FieldSpec, NestedSpec, PROCESS_FIELDS, SYSTEM_FIELDS,
};
pub use schema::{Column, Schema};
pub use value::{FlatRecord, FlatValue, TIMESTAMP_KEY, ValueKind, record_timestamp};
