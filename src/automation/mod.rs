//! Recording and replay of validation runs.
//!
//! Calls to [`Recordable`] functions made inside a [`record`] scope are
//! written to a [`Tape`] as declarative call descriptors. A [`Runner`] reads
//! such a tape back and re-executes any recorded call by uid, rebuilding the
//! datasets and prior results it depends on.

/// Call arguments crossing a recorded boundary.
pub mod args;
/// Declarative reconstruction capability and class descriptors.
pub mod declarative;
/// Recordable call interception.
pub mod recordable;
/// Per-thread recording context and scope guards.
pub mod recording;
/// Name-based function and class lookup.
pub mod registry;
/// Tape replay.
pub mod runner;
/// Tape document and serializer.
pub mod tape;

pub use args::{Arg, CallArgs};
pub use declarative::{ClassDescriptor, Declarative, DeclarativeObject};
pub use recordable::Recordable;
pub use recording::{
    AvoidRecording, RecordingScope, active_tape, avoid_recording, is_recording, record,
    record_into, session_tape, set_active_tape,
};
pub use registry::{FunctionRef, NativeFn, Partial, Registry};
pub use runner::{Runner, TapeSource};
pub use tape::{
    CallDescriptor, DatasetDescriptor, Reference, SegmentationDescriptor, Tape, TapeDocument,
    TapeMeta,
};
