//! Auth Module
//!
//! Enthält:
//! - Authenticated Channel (Bearer Token, Refresh-and-Retry bei 401)
//! - Login/Signup/Logout und Profil-Endpoints

pub mod api;
pub mod channel;

pub use api::{
    display_name_variants, endpoint, AuthApi, DisplayNameVariant, ProfileApi, UserProfile,
};
pub use channel::{
    ApiRequest, ApiResponse, AuthError, AuthenticatedChannel, HttpBackend, ReqwestBackend,
    REFRESH_PATH,
};
