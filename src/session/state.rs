//! Chat turn state machine.
//!
//! ```text
//!            Send / Resume(thinking)          AnswerChunk
//!   static ---------------------------> thinking ---------> responding
//!     ^                                    |                    |
//!     +---- Complete | Error | Cancel | StatePush(static) -----+
//! ```
//!
//! `Resume` and `StatePush` carry the server's view and are accepted from any
//! state. Chunks never move a turn backwards: thoughts arriving while
//! responding leave the state alone.

use crate::models::ChatState;

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The user sent a message.
    Send,
    /// The backend reported this state when the chat was (re)activated.
    Resume(ChatState),
    ThoughtsChunk,
    AnswerChunk,
    /// The stream signalled completion, or ended without a signal.
    Complete,
    /// The stream failed.
    Error,
    /// Out-of-band `chat_state` event.
    StatePush(ChatState),
    /// The user stopped the turn, or the chat was torn down.
    Cancel,
}

/// Next state for `trigger` in `state`, or `None` if the trigger is not valid
/// there.
pub fn transition(state: ChatState, trigger: Trigger) -> Option<ChatState> {
    use ChatState::*;

    match (state, trigger) {
        (Static, Trigger::Send) => Some(Thinking),
        (_, Trigger::Send) => None,

        (_, Trigger::Resume(reported)) | (_, Trigger::StatePush(reported)) => Some(reported),

        (Static, Trigger::ThoughtsChunk | Trigger::AnswerChunk) => None,
        (Thinking, Trigger::ThoughtsChunk) => Some(Thinking),
        (Responding, Trigger::ThoughtsChunk) => Some(Responding),
        (_, Trigger::AnswerChunk) => Some(Responding),

        (_, Trigger::Complete | Trigger::Error | Trigger::Cancel) => Some(Static),
    }
}
