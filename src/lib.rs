pub mod auth;
pub mod error;
pub mod forms;
pub mod orm;
pub mod paginator;
pub mod router;
pub mod serializers;
pub mod settings;
pub mod sites;
pub mod views;

pub use error::{Error, Result};
pub use sites::BackboneSite;
pub use views::{ApiView, DisplayField, ViewHooks};
