pub mod dac;
pub mod temperature;

pub use dac::*;
pub use temperature::*;
