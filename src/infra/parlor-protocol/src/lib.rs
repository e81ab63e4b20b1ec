mod envelope;
mod error;
mod frame;
mod handshake;
mod model;
mod operation;

pub use envelope::*;
pub use error::*;
pub use frame::*;
pub use handshake::*;
pub use model::*;
pub use operation::*;
