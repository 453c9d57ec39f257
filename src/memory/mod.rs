//! 记忆层：跨 run 的背景（目标与结论）与单次 run 的工作记忆

pub mod carryover;
pub mod working;

pub use carryover::{PriorRun, RunCarryover};
pub use working::WorkingMemory;
