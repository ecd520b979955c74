pub mod planner;
pub mod registry;
pub mod staleness;
