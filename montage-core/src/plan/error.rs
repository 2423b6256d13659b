use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid montage configuration: {0}")]
    InvalidConfig(String),
    #[error(
        "invalid source range: start cut {start_cut}s with end cut {end_cut}s from the end \
         leaves {usable:.1}s usable of a {duration:.1}s source"
    )]
    InvalidRange {
        start_cut: f64,
        end_cut: f64,
        duration: f64,
        usable: f64,
    },
}

pub type PlanResult<T> = std::result::Result<T, PlanError>;
