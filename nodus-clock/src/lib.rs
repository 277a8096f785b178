#![allow(dead_code)]

mod clock;
mod stamp;

pub use clock::{transaction_stamp, Clock};
pub use stamp::Stamp;
