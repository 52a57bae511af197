//! Subscriber session lifecycle.
//!
//! The session manager owns the authoritative session table. It is the
//! only component with a background sweep: a periodic idle tick that
//! force-closes sessions whose consumers have gone quiet.

mod manager;
mod sweeper;

pub use manager::SessionManager;
pub use sweeper::SweeperHandle;
