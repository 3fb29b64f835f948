//! Common orchestration abstractions for SONiC managers.
//!
//! - [`SyncMap`]: map that never creates entries on lookup
//! - [`KeyOpFieldsValues`]: a configuration table entry
//! - [`TaskStatus`]: outcome of processing one entry

mod sync_map;
mod table;
mod task;

pub use sync_map::SyncMap;
pub use table::{FieldValue, KeyOpFieldsValues, Operation};
pub use task::{TaskError, TaskResult, TaskResultExt, TaskStatus};
