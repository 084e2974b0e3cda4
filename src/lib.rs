//! Browser push-notification lifecycle for the DietNotify web app.
//!
//! [`NotificationManager`] drives a user's meal-reminder subscription end to
//! end: capability detection, permission, messaging-SDK bootstrap, the
//! background worker, device-token acquisition and registration with the
//! backend, foreground message display, teardown and hard reset.
//!
//! Everything outside the process is reached through the collaborator traits
//! in [`components`]: the browser runtime ([`PushRuntime`]), the messaging SDK
//! ([`MessagingSdk`]), the backend ([`RegistrationService`], with an HTTP
//! implementation in [`backends`]) and the UI ([`NotificationSurface`]).

pub mod backends;
pub mod components;
pub mod manager;

pub use backends::*;
pub use components::*;
pub use manager::NotificationManager;
