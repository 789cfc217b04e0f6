//! Query language front-ends.

pub mod cypher;
