//! Relay server: the LINE webhook listener plus the Discord gateway task.
//!
//! One port serves `POST /line` and a health probe on `GET /`. The Discord session runs
//! as an independent task; the two share only the read-only relay service.

mod routes;
mod run;

pub use routes::{router, RelayState};
pub use run::{run_relay, serve};
