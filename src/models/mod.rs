pub mod booking;
pub mod driver;
pub mod marker;
pub mod snapshot;
