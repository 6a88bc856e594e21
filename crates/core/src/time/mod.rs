pub mod period;

pub use period::{DateRange, DateRangeCalculator, Period};
