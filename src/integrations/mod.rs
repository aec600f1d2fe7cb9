//! External service integrations.

pub mod registry_client {
    pub use crate::registry_client::*;
}

pub mod quota {
    pub use crate::quota::*;
}

pub mod retry {
    pub use crate::retry::*;
}
