//! Per-thread recording context.
//!
//! Two pieces of state decide whether a recordable call is taped: the active
//! tape and the depth of recordable calls currently executing. Both live in a
//! thread-local context and are only changed through scope guards, so they
//! are restored on every exit path, including early returns and panics.
//!
//! The session tape survives between [`record`] scopes on the same thread:
//! consecutive recording scopes append to the same tape.

use std::cell::RefCell;

use crate::automation::tape::Tape;

#[derive(Default)]
struct RecordingContext {
    active: Option<Tape>,
    session: Option<Tape>,
    depth: usize,
}

thread_local! {
    static CONTEXT: RefCell<RecordingContext> = RefCell::new(RecordingContext::default());
}

fn with_context<R>(f: impl FnOnce(&mut RecordingContext) -> R) -> R {
    CONTEXT.with(|context| f(&mut context.borrow_mut()))
}

/// Guard returned by [`record`] and [`record_into`].
///
/// Entering a scope while a tape is already active is a no-op; the outermost
/// scope deactivates the tape when dropped.
#[must_use = "recording stops when the scope is dropped"]
pub struct RecordingScope {
    tape: Tape,
    owns_activation: bool,
}

impl RecordingScope {
    /// Tape receiving the calls made in this scope.
    pub fn tape(&self) -> &Tape {
        &self.tape
    }
}

impl Drop for RecordingScope {
    fn drop(&mut self) {
        if self.owns_activation {
            with_context(|context| context.active = None);
        }
    }
}

/// Start recording into the session tape, creating it on first use.
pub fn record() -> RecordingScope {
    with_context(|context| {
        if let Some(active) = &context.active {
            return RecordingScope {
                tape: active.clone(),
                owns_activation: false,
            };
        }
        let session = context.session.get_or_insert_with(Tape::new).clone();
        context.active = Some(session.clone());
        RecordingScope {
            tape: session,
            owns_activation: true,
        }
    })
}

/// Start recording into `tape` unless another tape is already active.
pub fn record_into(tape: &Tape) -> RecordingScope {
    with_context(|context| {
        if let Some(active) = &context.active {
            return RecordingScope {
                tape: active.clone(),
                owns_activation: false,
            };
        }
        context.active = Some(tape.clone());
        RecordingScope {
            tape: tape.clone(),
            owns_activation: true,
        }
    })
}

/// Guard returned by [`avoid_recording`].
#[must_use = "recording resumes when the guard is dropped"]
pub struct AvoidRecording {
    active: Option<Tape>,
    session: Option<Tape>,
}

impl Drop for AvoidRecording {
    fn drop(&mut self) {
        let active = self.active.take();
        let session = self.session.take();
        with_context(|context| {
            context.active = active;
            context.session = session;
        });
    }
}

/// Suspend recording (active and session tape) until the guard is dropped.
pub fn avoid_recording() -> AvoidRecording {
    with_context(|context| AvoidRecording {
        active: context.active.take(),
        session: context.session.take(),
    })
}

/// Tape currently receiving recorded calls.
pub fn active_tape() -> Option<Tape> {
    with_context(|context| context.active.clone())
}

/// Replace the active tape, returning the previous one.
pub fn set_active_tape(tape: Option<Tape>) -> Option<Tape> {
    with_context(|context| std::mem::replace(&mut context.active, tape))
}

/// Tape shared by the recording scopes of this thread, if one was started.
pub fn session_tape() -> Option<Tape> {
    with_context(|context| context.session.clone())
}

/// True while a tape is active on this thread.
pub fn is_recording() -> bool {
    with_context(|context| context.active.is_some())
}

/// Marks that a recordable function is executing on this thread.
pub(crate) struct RecordableCall {
    _private: (),
}

impl Drop for RecordableCall {
    fn drop(&mut self) {
        with_context(|context| context.depth = context.depth.saturating_sub(1));
    }
}

pub(crate) fn enter_recordable() -> RecordableCall {
    with_context(|context| context.depth += 1);
    RecordableCall { _private: () }
}

/// True while a recordable function body runs on this thread.
pub(crate) fn inside_recordable() -> bool {
    with_context(|context| context.depth > 0)
}
