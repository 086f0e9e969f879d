//! Services layer - Business logic
//!
//! Services are responsible for:
//! - Implementing business rules
//! - Coordinating between repositories and the token codec
//! - Handling validation and error cases

pub mod auth;
pub mod password;
pub mod user;

pub use auth::{
    AuthService, AuthServiceError, ClientInfo, LoginInput, LoginOutcome, RenewedAccess,
    TokenLifetimes,
};
pub use password::{check_password, hash_password, PasswordError};
pub use user::{UserService, UserServiceError};
