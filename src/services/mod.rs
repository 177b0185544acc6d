//! Service layer: the share service every caller talks to, the reaper that
//! runs beside it, and the link encoder used for descriptors.

pub mod link;
pub mod reaper;
pub mod share_service;

#[cfg(test)]
pub(crate) mod testing;
