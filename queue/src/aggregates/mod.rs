//! Reducers owning the queue's mutable state.
//!
//! - [`ticket`]: ticket lifecycle, ordering and desk bindings
//! - [`violation`]: abuse detection, violations and login lockout

pub mod ticket;
pub mod violation;
