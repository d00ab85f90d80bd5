// Local accounts, linked identities and the resolution policies
pub mod accounts;

// HTTP API
pub mod api;

// Request authentication
pub mod auth;

// Configuration loading
pub mod config;

// Provider token encryption
pub mod credentials;

// Identity token validation
pub mod identity;

// Provider client and login flow
pub mod oauth;

// Session credential issuance
pub mod session;
