//! Multi-wallet private transfers: every source shields into the pool, then
//! every destination is paid out of it.

pub mod desk;
pub mod machine;
pub mod plan;

pub use desk::{DeskSnapshot, TransferDesk, TransferEvent, TransferServices, DEFAULT_QUOTE_TTL};
pub use machine::{
    LegAction, LegResult, Phase, TransferMachine, TransferProgress, TransferSummary, UnshieldEntry,
    UnshieldOutcome,
};
pub use plan::{build_plan, cap_to_balance, split_evenly, ShieldLeg, TransferPlan, UnshieldLeg};
