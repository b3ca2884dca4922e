mod types;

pub use types::{FeaturesConfig, FleetConfig, RequeueConfig, RetryConfig};
