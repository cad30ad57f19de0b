//! Labeled property graph on top of SQLite
//!
//! Nodes carry a label and a bag of typed properties; relationships are
//! typed, directed edges between two nodes. All access goes through a
//! [`GraphTx`] scoped by [`GraphDriver::write`] or [`GraphDriver::read`].

mod driver;
mod tx;
mod value;

pub use driver::{DEFAULT_BUSY_TIMEOUT, GraphDriver};
pub use tx::{GraphTx, NodeId, RelationshipId};
pub use value::{Properties, PropertyValue};
