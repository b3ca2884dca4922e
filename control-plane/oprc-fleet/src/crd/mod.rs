pub mod cluster;
pub mod common;
pub mod machine_pool;
