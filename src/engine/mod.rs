pub mod clock;
pub mod controller;
pub mod events;
pub mod state;

pub use clock::SessionClock;
pub use controller::{EngineController, EngineSnapshot};
pub use events::{EngineEvent, EventBus};
pub use state::{EngineState, EngineStatus};
