//! Per-ISP thresholds and operator-defined rules.

mod model;
mod repository;
mod store;
mod validation;

pub use model::{Comparison, IspConfig, Metric, NewRule, Rule};
pub use repository::RuleRepository;
pub use store::RuleStore;
pub use validation::{ValidationError, validate_isp_config, validate_rule};
