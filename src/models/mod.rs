pub mod instrument;
pub mod job;
pub mod period;
pub mod series;

pub use instrument::{Instrument, MonthCode};
pub use job::DownloadJob;
pub use period::Period;
pub use series::{Metadata, PriceSeries};
