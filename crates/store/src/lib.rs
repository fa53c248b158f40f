pub mod error;
pub mod keys;
pub mod snapshot;

pub use error::*;
pub use keys::*;
pub use snapshot::*;
