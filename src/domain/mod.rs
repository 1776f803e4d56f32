pub mod alert;
pub mod service;

pub use alert::*;
pub use service::*;
