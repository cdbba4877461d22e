//! Actor modules

pub mod dispatcher;

pub use dispatcher::{DispatcherActor, DispatcherArguments, DispatcherError, DispatcherMsg};
