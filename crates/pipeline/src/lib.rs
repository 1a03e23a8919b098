//! Batch upload pipeline.
//!
//! The [`Orchestrator`] drives one run through
//! `Idle → Enumerating → Packing → Uploading → Completed`:
//!
//! 1. **Enumerate**: walk the source tree into [`FileRecord`]s
//! 2. **Pack**: group the records into size-bounded batches
//! 3. **Upload**: send pending batches through the retrying uploader
//! 4. **Record**: advance the durable cursor over the contiguous prefix
//!    of uploaded batches, and clear it when the run completes
//!
//! A failed or cancelled run leaves the cursor on the last contiguous
//! success, so the next run resumes from the first batch not uploaded.
//!
//! [`FileRecord`]: batchvault_scanner::FileRecord

pub mod context;
pub mod cursor;
pub mod error;
pub mod orchestrator;
pub mod types;

pub use context::RunContext;
pub use cursor::ContiguousCursor;
pub use error::RunError;
pub use orchestrator::{Orchestrator, destination_name, new_run_label};
pub use types::{OversizePolicy, PipelineConfig, RunEvent, RunState, RunSummary};
