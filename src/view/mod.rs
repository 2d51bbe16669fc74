//! Read-only helpers consumers apply to a snapshot.

pub mod derived;
pub mod pagination;

pub use derived::{counts_by, name_index, search};
pub use pagination::{Page, paginate};
