// Public library interface for volscope
// The CLI and the debug tool both build on these modules

pub mod catalog;
pub mod config;
pub mod listing;
pub mod runtime;
pub mod tree;
