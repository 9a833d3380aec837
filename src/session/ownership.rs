//! Which stream may write into which message.

use uuid::Uuid;

/// How the stream was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// New turn started by a local send.
    Fresh,
    /// Attached to a turn already running on the server. The server may
    /// resend text the client already has.
    Resume,
}

/// The right of one stream to mutate one message.
///
/// `correlation_id` identifies the stream instance; it survives a retarget of
/// `message_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOwnership {
    pub chat_id: String,
    pub message_id: String,
    pub correlation_id: String,
    pub mode: StreamMode,
}

impl StreamOwnership {
    pub fn fresh(chat_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self::new(chat_id, message_id, StreamMode::Fresh)
    }

    pub fn resumed(chat_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self::new(chat_id, message_id, StreamMode::Resume)
    }

    fn new(chat_id: impl Into<String>, message_id: impl Into<String>, mode: StreamMode) -> Self {
        Self {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            correlation_id: Uuid::new_v4().to_string(),
            mode,
        }
    }

    /// Whether an event tagged with `chat_id` and optional `correlation_id`
    /// belongs to this stream.
    pub fn accepts(&self, chat_id: &str, correlation_id: Option<&str>) -> bool {
        self.chat_id == chat_id
            && correlation_id.map_or(true, |id| id == self.correlation_id)
    }

    /// Same stream instance, regardless of retargeting.
    pub fn same_stream(&self, other: &StreamOwnership) -> bool {
        self.correlation_id == other.correlation_id && self.chat_id == other.chat_id
    }
}

/// Holder of the single process-wide ownership.
#[derive(Debug, Default)]
pub struct OwnershipSlot {
    current: Option<StreamOwnership>,
}

impl OwnershipSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `owner`, returning whatever it replaced.
    pub fn take(&mut self, owner: StreamOwnership) -> Option<StreamOwnership> {
        self.current.replace(owner)
    }

    pub fn current(&self) -> Option<&StreamOwnership> {
        self.current.as_ref()
    }

    /// The installed ownership if `owner` is the same stream instance.
    pub fn matching(&self, owner: &StreamOwnership) -> Option<&StreamOwnership> {
        self.current.as_ref().filter(|c| c.same_stream(owner))
    }

    /// The installed ownership if it writes into `chat_id`.
    pub fn for_chat(&self, chat_id: &str) -> Option<&StreamOwnership> {
        self.current.as_ref().filter(|c| c.chat_id == chat_id)
    }

    /// Compare-and-clear: release the slot only if `owner` still holds it.
    /// Returns the released ownership (with any retargeted message id).
    pub fn clear_if(&mut self, owner: &StreamOwnership) -> Option<StreamOwnership> {
        if self.matching(owner).is_some() {
            self.current.take()
        } else {
            None
        }
    }

    /// Unconditional release.
    pub fn clear(&mut self) -> Option<StreamOwnership> {
        self.current.take()
    }

    /// Point the installed ownership at `new_id` if it currently targets
    /// `old_id` in `chat_id`.
    pub fn retarget(&mut self, chat_id: &str, old_id: &str, new_id: &str) -> bool {
        match self.current.as_mut() {
            Some(owner) if owner.chat_id == chat_id && owner.message_id == old_id => {
                owner.message_id = new_id.to_string();
                true
            }
            _ => false,
        }
    }
}
