mod runtime;

pub use runtime::admission::{Admission, Permit};
pub use runtime::coordinator::{Coordinator, CoordinatorConfig};
pub use runtime::extractor::{CommandExtractor, Extractor, GENERATED_MARKER, TAIL_LINES};
pub use runtime::storage::{TaskStore, TaskSummary};
pub use runtime::types::{
    validate_url, Artifact, CoordinatorError, TaskFailure, TaskId, TaskStatus, TaskStatusView,
};
