//! Config entries
//!
//! Config entries are the persisted, configured instances of an integration.
//! This crate stores them in `.storage/core.config_entries`, drives their
//! lifecycle through per-domain [`EntryHandler`]s and runs the config flows
//! that create them.

pub mod entry;
pub mod flow;
pub mod manager;
mod state_machine;

pub use entry::{ConfigEntry, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate};
pub use flow::{
    ConfigFlow, ConfigFlowHandler, FlowError, FlowFactory, FlowManager, FlowResult,
    FlowResultType, FlowStep, FormField, NewEntry,
};
pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, EntryHandler,
    UpdateListener, STORAGE_KEY,
};
pub use state_machine::InvalidTransition;
