//! Protocol message dispatch: the handler registry and per-message handler
//! implementations that sit between decoded packets and room state.

pub(crate) mod error;
pub(crate) mod handlers;
pub(crate) mod registry;
