//! Data models
//!
//! This module contains the data structures shared by the storage, service
//! and HTTP layers:
//! - Database entities (User, Session)
//! - Inputs for creating them

mod session;
mod user;

pub use session::{CreateSessionInput, Session};
pub use user::{CreateUserInput, User};
