//! Messages exchanged on the event channel.

pub mod events;

pub use events::{ClickKind, Event, Modifiers, MouseButton, Reply};
