//! Domain types shared across the core.

pub mod binding;
pub mod content;
pub mod limit;

pub use binding::StaticBinding;
pub use content::{
    ContentProperties, ContentRecord, ContentView, Group, NewContent, PreviewRef,
};
pub use limit::{ContentActionName, LimitName, UserContentAction, UserLimit};
