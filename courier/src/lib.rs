pub mod controller;

pub use controller::Courier;
