#![allow(dead_code)]

mod error;
mod ids;

pub use error::{Error, Kind, Resource, Result};
pub use ids::{Id, INVALID};
