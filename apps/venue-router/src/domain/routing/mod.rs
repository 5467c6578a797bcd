//! Routing Domain
//!
//! Pure routing logic: strategies and weights, provider scoring, proportional
//! allocation, and the plan/leg types the router hands back.
//!
//! # Module Structure
//!
//! - [`strategy`]: Strategy weight table and custom weights
//! - [`scoring`]: Metric normalization, scores and confidence
//! - [`allocation`]: Floor-and-remainder proportional split
//! - [`result`]: Routing plans and leg outcomes

pub mod allocation;
pub mod result;
pub mod scoring;
pub mod strategy;

pub use allocation::allocate_proportional;
pub use result::{LegResult, RoutingAlternative, RoutingResult};
pub use scoring::{MAX_SCORE, ScoredProvider, confidence, score_providers};
pub use strategy::{RoutingPriority, RoutingStrategy, ScoringWeights};
