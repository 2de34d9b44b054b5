pub mod consumer;
pub mod error;
pub mod headers;
pub mod message;
pub mod producer;
pub mod propagation;
pub mod scope;
pub mod tags;

pub use consumer::*;
pub use error::*;
pub use headers::*;
pub use message::*;
pub use producer::*;
pub use propagation::*;
pub use scope::*;
