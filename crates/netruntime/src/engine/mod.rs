//! Engine front-ends over the case runner.

mod stateful;
mod stateless;

pub use stateful::StatefulEngine;
pub use stateless::{StatelessEngine, StatelessResult};
