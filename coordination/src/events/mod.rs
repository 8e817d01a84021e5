//! Event-driven observation of repair sessions
//!
//! The controller publishes a [`RepairEvent`] for every dispatch, report,
//! decision and transition. Observers subscribe through the [`EventBus`];
//! nothing in the control path depends on anyone listening.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Controller  │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{
    EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter, FilteredReceiver,
    SharedEventBus,
};
pub use types::RepairEvent;
