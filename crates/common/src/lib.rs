pub mod cache;
pub mod time;

pub use cache::{QueryCache, QueryKey};
pub use time::{Clock, Sleeper, SystemClock, TokioSleeper, now_ms};
