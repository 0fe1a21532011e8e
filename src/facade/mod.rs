pub mod target;
pub mod upgrader;

pub use target::UpgradeTarget;
pub use upgrader::{UpgradeOutcome, UpgradePlan, Upgrader, UpgraderBuilder};
