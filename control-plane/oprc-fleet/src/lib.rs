pub mod asg;
pub mod cloud;
pub mod config;
pub mod controller;
pub mod crd;
pub mod network;
pub mod tags;

pub use controller::run_controllers;

use tracing_subscriber::{
    EnvFilter, filter::LevelFilter, layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Install the fmt subscriber. `RUST_LOG` wins, `default_env` fills in.
pub fn init_tracing(default_env: &str) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();
    let filter = match default_env.parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}
