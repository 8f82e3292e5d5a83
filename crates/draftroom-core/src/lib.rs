// Library root for the draftroom engine: draft state, format rules, realtime
// sync and persistence, shared by the host and the remote client.

pub mod catalog;
pub mod config;
pub mod draft;
pub mod error;
pub mod repository;
pub mod session;
pub mod sync;
