pub mod cab;
pub mod error;
pub mod types;

pub use error::CabError;
pub use types::*;
