//! Price computation

mod engine;
mod model;
mod tax;

pub use engine::{PriceEngine, MAX_BUNDLE_DEPTH};
pub use model::*;
pub use tax::TaxResolver;
