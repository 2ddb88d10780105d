//! Dense, ordered sequence membership.

mod editor;
mod layout;

pub use editor::SequenceEditor;
pub use layout::SequenceLayout;
