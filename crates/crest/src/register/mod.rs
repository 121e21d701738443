mod accumulator;
mod consume;
mod derive;
mod record;
mod store;


pub use accumulator::*;
pub use consume::*;
pub use derive::*;
pub use record::*;
pub use store::*;
