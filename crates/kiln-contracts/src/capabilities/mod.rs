mod spec;
mod table;

pub use spec::{CapabilitySpec, DurationRule, ResolutionRule};
pub use table::CapabilityTable;
