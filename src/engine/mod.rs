pub mod errors;
pub mod events;
pub mod ledger;
pub mod machine;
pub mod round;
pub mod sampler;
pub mod types;

pub use errors::*;
pub use events::*;
pub use ledger::*;
pub use machine::*;
pub use round::*;
pub use sampler::*;
pub use types::*;

#[cfg(test)]
mod tests;
