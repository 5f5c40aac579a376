pub mod cancel;
pub mod error;
pub mod money;
pub mod traits;
pub mod types;

pub use cancel::CancelToken;
pub use error::*;
pub use traits::*;
pub use types::*;
