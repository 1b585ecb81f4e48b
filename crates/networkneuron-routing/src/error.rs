//! Error types for routing and session operations

use networkneuron_protocol::{NodeId, RouteId, SessionId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouteError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouteError {
    #[error("No route found")]
    NotFound,

    #[error("Route {0} expired")]
    Expired(RouteId),

    #[error("Route hop {0} is gone")]
    PeerGone(NodeId),

    #[error("Next hop congested on route {0}")]
    Congested(RouteId),

    #[error("Route invalid: {0}")]
    Invalid(String),

    #[error("Forwarding timed out on route {0}")]
    TimedOut(RouteId),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(SessionId),

    #[error("Session {0} is not active")]
    NotActive(SessionId),

    #[error(transparent)]
    Route(#[from] RouteError),
}
