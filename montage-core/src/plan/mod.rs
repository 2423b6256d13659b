pub mod error;
pub mod models;
pub mod planner;

pub use error::{PlanError, PlanResult};
pub use models::{
    ClipPlan, Layout, MontageRequest, PlanWindow, Resolution, TextOverlay, VariationPlan,
};
pub use planner::{PlannerConfig, TimelinePlanner};
