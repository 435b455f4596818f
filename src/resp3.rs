//! RESP wire encoding: low-level writers, the argument encoder, request
//! framing, and the minimal reply reader the resolver consumes.

pub mod arg;
pub mod reply;
pub mod request;
pub mod write;

pub use arg::{Arg, ArgError, EncodeOptions, Frozen};
pub use reply::Reply;
pub use request::write_requests;
