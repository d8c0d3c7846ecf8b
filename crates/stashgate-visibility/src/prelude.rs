pub use stashgate_types::prelude::*;

pub use stashgate_types::graph::{EntityGraph, Node, NodeIx};

// vim: ts=4
