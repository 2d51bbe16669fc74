pub mod error;
pub mod types;
pub mod value;

pub use error::{Result, SyncError};
pub use types::{FieldPatch, OrderBy, RecordId, Row, SortDirection, TenantKey, patch_of};
pub use value::{compare_values, render_scalar, values_equal};
