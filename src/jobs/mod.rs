//! Job kinds built on the task engine.
//!
//! Each kind owns its payload shapes and the collaborators it talks to, and
//! exposes a `register` function that adds it to a [`Registry`](crate::engine::Registry)
//! at startup:
//!
//! - [`format_verification`] - analyze every primary document of a submission
//! - [`archiving`] - import every root record of a collection into the archive

pub mod archiving;
pub mod format_verification;
