pub mod clock;
pub mod gzip;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
