//! Analysis data model
//!
//! Every type serializes with camelCase keys and SCREAMING_SNAKE_CASE enum
//! values. Fields marked `#[serde(skip)]` carry source positions between
//! stages and never reach the output document.

mod flow;
mod operations;
mod parameters;
mod repository;
mod statements;
mod structure;

pub use flow::*;
pub use operations::*;
pub use parameters::*;
pub use repository::*;
pub use statements::*;
pub use structure::*;
