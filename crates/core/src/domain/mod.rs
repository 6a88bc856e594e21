pub mod fields;
pub mod policy;

pub use policy::{PolicyRecord, ResultTable};
