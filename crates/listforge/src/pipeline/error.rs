use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::ratelimit::Service;

/// Why a stage gave up on an item. Always a permanent per-item failure.
#[derive(Error, Debug, Clone)]
pub enum StageFailure {
    #[error("{service}: {source}")]
    Rejected {
        service: Service,
        #[source]
        source: CollaboratorError,
    },

    #[error("{service}: gave up after {attempts} attempts: {source}")]
    Exhausted {
        service: Service,
        attempts: u32,
        #[source]
        source: CollaboratorError,
    },
}

impl StageFailure {
    pub fn service(&self) -> Service {
        match self {
            StageFailure::Rejected { service, .. } | StageFailure::Exhausted { service, .. } => {
                *service
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StageFailure::Rejected {
                source: CollaboratorError::NotFound,
                ..
            }
        )
    }
}
