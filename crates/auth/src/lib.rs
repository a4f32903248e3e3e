//! `closet-auth`: bearer-token authentication boundary.
//!
//! Decoupled from HTTP and storage: the API layer extracts the token, this
//! crate decodes and validates it.

pub mod claims;
pub mod jwt;
pub mod roles;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use roles::Role;
