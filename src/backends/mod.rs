// Registration service backends

pub mod http;

pub use http::{HttpRegistrationService, HttpServiceConfig};
