pub mod client;
pub mod error;
pub mod frame;
pub mod history;
