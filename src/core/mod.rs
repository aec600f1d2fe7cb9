// Domain-layer modules and shared errors/models
pub mod financials {
    pub use crate::financials::*;
}

pub mod scoring {
    pub use crate::scoring::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
