/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Login endpoint (anchors the login-attempt throttle)
/// - `writes`: Mutating endpoints behind the admission gate chain
/// - `usage`: Current-month usage and AI allowance reads

pub mod auth;
pub mod health;
pub mod usage;
pub mod writes;
