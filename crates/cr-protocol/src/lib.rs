pub mod credentials;
pub mod provider;
pub mod registration;
pub mod topics;

pub use credentials::*;
pub use provider::*;
pub use registration::*;
