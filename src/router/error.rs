use crate::registry::Feature;
use thiserror::Error;

/// Filter that emptied the candidate set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EliminatingConstraint {
    /// Nothing registered at all
    EmptyPool,
    Availability,
    RequiredFeatures(Vec<Feature>),
    MaxCost,
    MaxLatency,
    MinQuality,
}

impl std::fmt::Display for EliminatingConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPool => write!(f, "empty provider pool"),
            Self::Availability => write!(f, "availability"),
            Self::RequiredFeatures(features) => {
                let names: Vec<String> = features.iter().map(|f| f.to_string()).collect();
                write!(f, "required features [{}]", names.join(", "))
            }
            Self::MaxCost => write!(f, "max_cost"),
            Self::MaxLatency => write!(f, "max_latency"),
            Self::MinQuality => write!(f, "min_quality"),
        }
    }
}

/// Router errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error("No suitable provider: {reason}")]
    NoSuitableProvider {
        reason: String,
        constraint: EliminatingConstraint,
    },

    #[error("Provider call failed on {provider_id}: {message}")]
    ProviderCall {
        provider_id: String,
        message: String,
    },

    #[error("Provider call cancelled")]
    Cancelled,
}

impl RouterError {
    pub(crate) fn no_suitable(constraint: EliminatingConstraint, detail: String) -> Self {
        let reason = match constraint {
            EliminatingConstraint::EmptyPool => "no providers registered".to_string(),
            ref c => format!("all candidates eliminated by {} ({})", c, detail),
        };
        RouterError::NoSuitableProvider { reason, constraint }
    }
}
