//! Domain types shared by the reconciler and the handler.

pub mod images;

pub use images::{ImageOutcome, NewImages};
