//! NetworkNeuron routing plane
//!
//! Scores candidate relays into routes, caches them per
//! (destination, requirements), forwards packets hop by hop with AEAD,
//! invalidates routes when topology changes, and binds client sessions to
//! routes. The Router is the single writer for routes; the SessionManager
//! is the single writer for sessions.

pub mod cache;
pub mod error;
pub mod optimizer;
pub mod router;
pub mod sealer;
pub mod session;

pub use cache::LruRouteCache;
pub use error::{Result, RouteError, SessionError};
pub use optimizer::{select_route, Candidate};
pub use router::{ForwardError, NextHopSender, Router, RouterConfig};
pub use sealer::{KeyScheme, PacketSealer};
pub use session::{ClientSession, SessionManager};
