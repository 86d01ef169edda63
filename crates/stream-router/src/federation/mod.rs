//! Federation with remote instances.
//!
//! When a live stream is hosted by another instance, this instance logs in
//! there and exchanges SDP offers over plain HTTP; the resulting endpoints
//! live in an ordinary instance session. This connector path is the only
//! federation path.

mod api_client;
mod connector;

pub use api_client::InstanceApiClient;
pub use connector::Connector;
