//! uplink-storage: OpenDAL operator factory + reachability check

pub mod health;
pub mod operator;

pub use health::{check_health, is_healthy};
pub use operator::{build_from_core_config, build_operator, Credentials};
