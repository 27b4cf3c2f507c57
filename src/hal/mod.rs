//! Hardware collaborators.

pub mod sim;
