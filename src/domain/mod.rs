//! Static reference data: SKUs, the production schedule, and the
//! microstop/breakdown libraries. Everything here is read-only after
//! load; only configuration tunes the stochastic rates in
//! [`microstops`].

pub mod breakdowns;
pub mod microstops;
pub mod schedule;
pub mod sku;

pub use breakdowns::{minor_breakdown_duration_sec, MajorBreakdown};
pub use microstops::{Fingerprint, MicrostopCode};
pub use schedule::{BlockPayload, ChangeoverType, Order, Schedule, ScheduledBlock};
pub use sku::{Sku, SkuTable};
