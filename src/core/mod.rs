// Domain-layer modules and shared errors/models
pub mod lookup {
    pub use crate::lookup::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod resolver {
    pub use crate::resolver::*;
}

pub mod service {
    pub use crate::service::*;
}

pub mod transcoding {
    pub use crate::transcoding::*;
}

pub mod errors {
    pub use crate::errors::*;
}
