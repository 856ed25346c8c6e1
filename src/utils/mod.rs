// Utility modules

pub mod auth_errors;
pub mod clock;
pub mod password;

pub use auth_errors::{codes, ApiError, ErrorEnvelope};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use password::{Argon2PasswordHasher, PasswordConfig, PasswordError, PasswordHasher};
