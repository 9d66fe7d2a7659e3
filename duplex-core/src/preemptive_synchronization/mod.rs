//! Blocking coordination primitives used to orchestrate worker threads.

pub mod countdown_event;

pub use countdown_event::CountdownEvent;
