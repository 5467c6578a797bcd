//! Application Services
//!
//! Provider registry, metrics evaluation and order routing.

mod evaluator;
mod registry;
mod router;
mod settings;

pub use evaluator::MetricsEvaluator;
pub use registry::{ProviderEntry, ProviderRegistry, RegistrySnapshot};
pub use router::{OrderRouter, RoutingStatistics};
pub use settings::{RouterSettings, SessionSchedule, SessionWindow};
