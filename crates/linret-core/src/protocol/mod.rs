//! Wire protocols for the two links linret bridges: the downstream chassis
//! protocol and the upstream CS protocol.

pub mod chassis;
pub mod cs;
