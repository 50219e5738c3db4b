//! Domain model module declarations.

pub mod recovery;
pub mod session;
