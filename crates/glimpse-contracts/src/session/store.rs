use std::collections::VecDeque;
use std::num::NonZeroUsize;

use super::turn::{ImageBytes, Turn};

/// How much history a [`Session`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryPolicy {
    /// Every turn is kept until the session is reset.
    #[default]
    Unbounded,
    /// At most `n` turns are kept; the oldest turn is evicted on overflow.
    Capped(NonZeroUsize),
}

/// The image every follow-up question is asked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedImage {
    name: String,
    bytes: ImageBytes,
}

impl PinnedImage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &ImageBytes {
        &self.bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoImage,
    ImagePinned,
}

pub fn upload_announcement(name: &str) -> String {
    format!("Image '{name}' uploaded successfully! Ask me anything about this image.")
}

/// Conversation history for one interactive session, plus the pinned image.
///
/// History only grows by [`Session::append`] or is emptied at once by
/// [`Session::reset`]. A capped [`HistoryPolicy`] additionally drops the
/// oldest turns.
#[derive(Debug, Clone, Default)]
pub struct Session {
    turns: VecDeque<Turn>,
    pinned: Option<PinnedImage>,
    policy: HistoryPolicy,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: HistoryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Appends `turn` and returns the turns evicted to honor the policy.
    pub fn append(&mut self, turn: Turn) -> Vec<Turn> {
        self.turns.push_back(turn);
        let mut evicted = Vec::new();
        if let HistoryPolicy::Capped(max) = self.policy {
            while self.turns.len() > max.get() {
                if let Some(oldest) = self.turns.pop_front() {
                    evicted.push(oldest);
                }
            }
        }
        evicted
    }

    pub fn reset(&mut self) {
        self.turns.clear();
        self.pinned = None;
    }

    /// Pins `bytes` under `name` unless that name is already pinned.
    ///
    /// A new name resets the session, records the pin and appends one
    /// assistant announcement. Returns `false` when the call was a no-op.
    pub fn set_pinned_image(&mut self, name: &str, bytes: ImageBytes) -> bool {
        if self
            .pinned
            .as_ref()
            .map(|pinned| pinned.name == name)
            .unwrap_or(false)
        {
            return false;
        }
        self.reset();
        self.pinned = Some(PinnedImage {
            name: name.to_string(),
            bytes,
        });
        self.append(Turn::assistant(upload_announcement(name)));
        true
    }

    pub fn pinned(&self) -> Option<&PinnedImage> {
        self.pinned.as_ref()
    }

    pub fn state(&self) -> SessionState {
        if self.pinned.is_some() {
            SessionState::ImagePinned
        } else {
            SessionState::NoImage
        }
    }

    pub fn turns(&self) -> impl ExactSizeIterator<Item = &Turn> + DoubleEndedIterator {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
