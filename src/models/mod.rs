pub mod carrier;
pub mod session;

pub use carrier::{CarrierConfig, CarrierPair, SessionPlan, StimulationMode};
pub use session::SessionSummary;
