pub use lib::*;
