//! Small arithmetic helpers shared across the crate.

pub(crate) mod layout;
pub mod size;
