pub mod accuracy;
pub mod admin;
pub mod context;
pub mod feed;
pub mod metrics;
pub mod persistence;
pub mod pipeline;
pub mod predictor;
pub mod scheduler;

pub use accuracy::*;
pub use admin::*;
pub use context::*;
pub use feed::*;
pub use metrics::*;
pub use persistence::*;
pub use pipeline::*;
pub use predictor::*;
pub use scheduler::*;
