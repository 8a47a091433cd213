use std::num::NonZeroU32;

use burnbin_common::Timestamp;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The persisted state of a single paste.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Paste {
    pub content: Bytes,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub max_views: Option<NonZeroU32>,
    pub views_used: u32,
}

impl Paste {
    pub const fn new(
        content: Bytes,
        created_at: Timestamp,
        expires_at: Option<Timestamp>,
        max_views: Option<NonZeroU32>,
    ) -> Self {
        Self {
            content,
            created_at,
            expires_at,
            max_views,
            views_used: 0,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_views, Some(max) if self.views_used >= max.get())
    }

    /// Expired and exhausted pastes can never be read again.
    pub fn is_unavailable(&self, now: Timestamp) -> bool {
        self.is_expired(now) || self.is_exhausted()
    }

    /// `None` if the paste has no view limit.
    pub fn remaining_views(&self) -> Option<u32> {
        self.max_views
            .map(|max| max.get().saturating_sub(self.views_used))
    }
}
