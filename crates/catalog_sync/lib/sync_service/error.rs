use thiserror::Error;
use tokio::task::JoinError;

use super::types::{FailureReason, FetchError, StoreError};
use crate::config::ConfigError;
use crate::orchestrator::SchedulerError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] JoinError),

    #[error("Orchestration error: {0}")]
    Orchestration(String),
}

impl From<&Error> for FailureReason {
    fn from(error: &Error) -> Self {
        match error {
            Error::Fetch(fetch) => FailureReason::from(fetch),
            Error::Store(_)
            | Error::Scheduler(_)
            | Error::Config(_)
            | Error::TaskJoin(_)
            | Error::Orchestration(_) => FailureReason::Unknown,
        }
    }
}
