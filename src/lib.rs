pub mod prelude;
pub mod scenarios;

pub use tally_core as core;
pub use tally_testing as testing;
