pub mod accuracy;
pub mod error;
pub mod events;
pub mod features;
pub mod predictions;
pub mod weights;

pub use accuracy::*;
pub use error::*;
pub use events::*;
pub use features::{keys, FeatureSnapshot, FeatureSnapshotBuilder, Matchup};
pub use predictions::*;
pub use weights::*;
