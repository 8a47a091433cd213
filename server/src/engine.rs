//! The paste lifecycle.
//!
//! A paste is `Active` until either its deadline passes or its last view is
//! used up, and from then on it is unavailable forever. Nothing here reads a
//! clock or runs in the background: every operation is handed `now` and does
//! its work through a single call into the store.

use std::num::NonZeroU32;

use burnbin_common::Timestamp;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::paste::Paste;
use crate::store::{PasteStore, StoreError, Update};

#[derive(Debug, Error)]
pub enum CreateError {
    #[error("Invalid content")]
    InvalidContent,
    #[error("Invalid ttl_seconds")]
    InvalidTtl,
    #[error("Invalid max_views")]
    InvalidMaxViews,
    /// Another paste already lives under the requested id.
    #[error("Paste id already in use")]
    IdTaken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a reader gets from a successful consume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View {
    pub content: Bytes,
    pub remaining_views: Option<u32>,
    pub expires_at: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Denial {
    NotFound,
    Expired { expired_at: Timestamp },
    ViewLimitExceeded { max_views: NonZeroU32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Consumed {
    Viewed(View),
    Denied(Denial),
}

pub struct Engine<S> {
    store: S,
}

impl<S: PasteStore> Engine<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Validates and stores a new paste under `id`. Nothing is written if
    /// validation fails.
    #[instrument(skip(self, content))]
    pub async fn create(
        &self,
        id: &str,
        content: Bytes,
        ttl_seconds: Option<i64>,
        max_views: Option<i64>,
        now: Timestamp,
    ) -> Result<Paste, CreateError> {
        let paste = validate(content, ttl_seconds, max_views, now)?;

        let stored = paste.clone();
        let inserted = self
            .store
            .update(id, move |current| match current {
                Some(_) => Update::Keep(false),
                None => Update::Put(stored, true),
            })
            .await?;

        if !inserted {
            return Err(CreateError::IdTaken);
        }

        info!(
            expires_at = ?paste.expires_at,
            max_views = ?paste.max_views,
            "Created paste"
        );
        Ok(paste)
    }

    /// Uses up one view of the paste, if it still has one to give.
    ///
    /// Expiry is checked before the view limit, and a denied paste is never
    /// written back.
    #[instrument(skip(self))]
    pub async fn consume(&self, id: &str, now: Timestamp) -> Result<Consumed, StoreError> {
        let consumed = self
            .store
            .update(id, move |current| evaluate(current, now))
            .await?;

        if let Consumed::Denied(denial) = &consumed {
            debug!(?denial, "Denied view");
        }

        Ok(consumed)
    }

    /// Deletes every paste that can no longer be read at `now`, returning
    /// how many were removed.
    #[instrument(skip(self))]
    pub async fn reclaim(&self, now: Timestamp) -> Result<usize, StoreError> {
        let mut removed = 0;

        for id in self.store.ids().await? {
            let gone = self
                .store
                .update(&id, move |current| match current {
                    Some(paste) if paste.is_unavailable(now) => Update::Remove(true),
                    _ => Update::Keep(false),
                })
                .await?;

            if gone {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Reclaimed unavailable pastes");
        }

        Ok(removed)
    }
}

fn validate(
    content: Bytes,
    ttl_seconds: Option<i64>,
    max_views: Option<i64>,
    now: Timestamp,
) -> Result<Paste, CreateError> {
    if is_blank(&content) {
        return Err(CreateError::InvalidContent);
    }

    let expires_at = match ttl_seconds {
        None => None,
        Some(ttl) if ttl < 1 => return Err(CreateError::InvalidTtl),
        // The deadline has to be something we can report back to readers.
        Some(ttl) => Some(
            now.checked_add_secs(ttl)
                .filter(|at| at.to_datetime().is_some())
                .ok_or(CreateError::InvalidTtl)?,
        ),
    };

    let max_views = match max_views {
        None => None,
        Some(views) => Some(
            u32::try_from(views)
                .ok()
                .and_then(NonZeroU32::new)
                .ok_or(CreateError::InvalidMaxViews)?,
        ),
    };

    Ok(Paste::new(content, now, expires_at, max_views))
}

/// Blank by the rules of JavaScript's `String.prototype.trim`.
fn is_blank(content: &[u8]) -> bool {
    // Invalid UTF-8 always holds a byte that isn't whitespace.
    std::str::from_utf8(content).map_or(false, |text| text.chars().all(is_trimmed))
}

/// ECMAScript `WhiteSpace` and `LineTerminator`.
const fn is_trimmed(c: char) -> bool {
    matches!(
        c,
        '\t'
            | '\n'
            | '\u{b}'
            | '\u{c}'
            | '\r'
            | ' '
            | '\u{a0}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200a}'
            | '\u{2028}'
            | '\u{2029}'
            | '\u{202f}'
            | '\u{205f}'
            | '\u{3000}'
            | '\u{feff}'
    )
}

fn evaluate(current: Option<&Paste>, now: Timestamp) -> Update<Consumed> {
    let paste = match current {
        Some(paste) => paste,
        None => return Update::Keep(Consumed::Denied(Denial::NotFound)),
    };

    if let Some(expired_at) = paste.expires_at.filter(|&at| now >= at) {
        return Update::Keep(Consumed::Denied(Denial::Expired { expired_at }));
    }

    if let Some(max_views) = paste.max_views.filter(|_| paste.is_exhausted()) {
        return Update::Keep(Consumed::Denied(Denial::ViewLimitExceeded { max_views }));
    }

    // Only an unlimited paste can get here with a full counter.
    let views_used = match paste.views_used.checked_add(1) {
        Some(views_used) => views_used,
        None => {
            return Update::Keep(Consumed::Denied(Denial::ViewLimitExceeded {
                max_views: NonZeroU32::MAX,
            }))
        }
    };

    let mut next = paste.clone();
    next.views_used = views_used;

    let view = View {
        content: next.content.clone(),
        remaining_views: next.remaining_views(),
        expires_at: next.expires_at,
    };

    Update::Put(next, Consumed::Viewed(view))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{MemoryStore, RocksStore};

    fn at(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    fn engine() -> Engine<MemoryStore> {
        Engine::new(MemoryStore::new())
    }

    fn viewed(consumed: Consumed) -> View {
        match consumed {
            Consumed::Viewed(view) => view,
            Consumed::Denied(denial) => panic!("expected a view, got {:?}", denial),
        }
    }

    fn denied(consumed: Consumed) -> Denial {
        match consumed {
            Consumed::Denied(denial) => denial,
            Consumed::Viewed(view) => panic!("expected a denial, got {:?}", view),
        }
    }

    fn limit(views: u32) -> Denial {
        Denial::ViewLimitExceeded {
            max_views: NonZeroU32::new(views).unwrap(),
        }
    }

    #[tokio::test]
    async fn single_view_paste() {
        let engine = engine();
        let paste = engine
            .create("a", Bytes::from_static(b"hello"), None, Some(1), at(1000))
            .await
            .unwrap();
        assert_eq!(paste.views_used, 0);
        assert_eq!(paste.created_at, at(1000));

        let view = viewed(engine.consume("a", at(1000)).await.unwrap());
        assert_eq!(
            view,
            View {
                content: Bytes::from_static(b"hello"),
                remaining_views: Some(0),
                expires_at: None,
            }
        );

        assert_eq!(denied(engine.consume("a", at(1001)).await.unwrap()), limit(1));
    }

    #[tokio::test]
    async fn expires_at_the_deadline() {
        let engine = engine();
        let paste = engine
            .create("a", Bytes::from_static(b"x"), Some(60), None, at(1000))
            .await
            .unwrap();
        assert_eq!(paste.expires_at, Some(at(61_000)));

        let view = viewed(engine.consume("a", at(60_999)).await.unwrap());
        assert_eq!(view.remaining_views, None);
        assert_eq!(view.expires_at, Some(at(61_000)));

        assert_eq!(
            denied(engine.consume("a", at(61_000)).await.unwrap()),
            Denial::Expired {
                expired_at: at(61_000)
            }
        );
    }

    #[tokio::test]
    async fn rejects_invalid_input_without_writing() {
        let engine = engine();
        let cases: [(&[u8], Option<i64>, Option<i64>); 10] = [
            (b"", None, None),
            (b"  \n\t\x0b ", None, None),
            ("\u{3000}".as_bytes(), None, None),
            ("\u{feff}\u{2028}".as_bytes(), None, None),
            (b"x", Some(0), None),
            (b"x", Some(-5), None),
            (b"x", Some(i64::MAX), None),
            (b"x", None, Some(0)),
            (b"x", None, Some(-1)),
            (b"x", None, Some(i64::from(u32::MAX) + 1)),
        ];

        for (content, ttl, views) in cases {
            let result = engine
                .create("a", Bytes::copy_from_slice(content), ttl, views, at(1000))
                .await;
            match (ttl, views) {
                (None, None) => assert!(matches!(result, Err(CreateError::InvalidContent))),
                (Some(_), None) => assert!(matches!(result, Err(CreateError::InvalidTtl))),
                _ => assert!(matches!(result, Err(CreateError::InvalidMaxViews))),
            }
        }

        assert!(engine.store().ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn next_line_is_not_whitespace() {
        let engine = engine();
        let content = Bytes::from("\u{85}");
        engine
            .create("a", content.clone(), None, None, at(0))
            .await
            .unwrap();
        assert_eq!(viewed(engine.consume("a", at(0)).await.unwrap()).content, content);
    }

    #[test]
    fn blank_follows_javascript_trim() {
        for blank in ["", " ", "\u{a0}", "\u{1680}", "\u{2009}\u{202f}", "\u{feff}", "\r\n"] {
            assert!(is_blank(blank.as_bytes()), "{:?}", blank);
        }
        for text in ["x", "\u{85}", "\u{180e}", "\u{200b}", " x "] {
            assert!(!is_blank(text.as_bytes()), "{:?}", text);
        }
        assert!(!is_blank(b"\xa0"));
    }

    #[tokio::test]
    async fn content_is_checked_first() {
        let result = engine()
            .create("a", Bytes::new(), Some(0), Some(0), at(1000))
            .await;
        assert!(matches!(result, Err(CreateError::InvalidContent)));

        let result = engine()
            .create("a", Bytes::from_static(b"x"), Some(0), Some(0), at(1000))
            .await;
        assert!(matches!(result, Err(CreateError::InvalidTtl)));
    }

    #[tokio::test]
    async fn non_utf8_content_is_kept_as_is() {
        let engine = engine();
        let content = Bytes::from_static(b"\xff\xfe");
        engine
            .create("a", content.clone(), None, None, at(0))
            .await
            .unwrap();
        assert_eq!(viewed(engine.consume("a", at(0)).await.unwrap()).content, content);
    }

    #[tokio::test]
    async fn existing_id_is_not_overwritten() {
        let engine = engine();
        engine
            .create("a", Bytes::from_static(b"first"), None, None, at(0))
            .await
            .unwrap();

        let result = engine
            .create("a", Bytes::from_static(b"second"), None, None, at(0))
            .await;
        assert!(matches!(result, Err(CreateError::IdTaken)));
        assert_eq!(
            engine.store().get("a").await.unwrap().unwrap().content,
            Bytes::from_static(b"first")
        );
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        assert_eq!(
            denied(engine().consume("nope", at(0)).await.unwrap()),
            Denial::NotFound
        );
    }

    #[tokio::test]
    async fn expiry_wins_over_view_limit() {
        let engine = engine();
        engine
            .create("a", Bytes::from_static(b"x"), Some(1), Some(1), at(0))
            .await
            .unwrap();
        viewed(engine.consume("a", at(0)).await.unwrap());

        // Both conditions hold now; expiry is what gets reported.
        for now in [1000, 5000] {
            assert_eq!(
                denied(engine.consume("a", at(now)).await.unwrap()),
                Denial::Expired {
                    expired_at: at(1000)
                }
            );
        }
    }

    #[tokio::test]
    async fn expired_paste_is_not_counted() {
        let engine = engine();
        engine
            .create("a", Bytes::from_static(b"x"), Some(1), Some(5), at(0))
            .await
            .unwrap();
        viewed(engine.consume("a", at(0)).await.unwrap());

        for now in [1000, 1001, 2000] {
            denied(engine.consume("a", at(now)).await.unwrap());
        }
        assert_eq!(engine.store().get("a").await.unwrap().unwrap().views_used, 1);
    }

    #[tokio::test]
    async fn denials_are_absorbing() {
        let engine = engine();
        engine
            .create("a", Bytes::from_static(b"x"), Some(10), Some(2), at(0))
            .await
            .unwrap();
        viewed(engine.consume("a", at(0)).await.unwrap());
        viewed(engine.consume("a", at(1)).await.unwrap());

        let mut last = denied(engine.consume("a", at(2)).await.unwrap());
        assert_eq!(last, limit(2));
        for now in [3, 9_999, 10_000, 20_000] {
            let next = denied(engine.consume("a", at(now)).await.unwrap());
            if now >= 10_000 {
                assert!(matches!(next, Denial::Expired { .. }));
            } else {
                assert_eq!(next, last);
            }
            last = next;
        }
        assert_eq!(engine.store().get("a").await.unwrap().unwrap().views_used, 2);
    }

    #[tokio::test]
    async fn unlimited_paste_never_runs_out() {
        let engine = engine();
        engine
            .create("a", Bytes::from_static(b"x"), None, None, at(0))
            .await
            .unwrap();

        for now in [0, 1_000_000, i64::MAX] {
            let view = viewed(engine.consume("a", at(now)).await.unwrap());
            assert_eq!(view.remaining_views, None);
            assert_eq!(view.expires_at, None);
        }
        assert_eq!(engine.store().get("a").await.unwrap().unwrap().views_used, 3);
    }

    #[tokio::test]
    async fn full_counter_is_denied_without_wrapping() {
        let engine = engine();
        let mut paste = Paste::new(Bytes::from_static(b"x"), at(0), None, None);
        paste.views_used = u32::MAX - 1;
        engine
            .store()
            .update("a", move |_| Update::Put(paste, ()))
            .await
            .unwrap();

        let view = viewed(engine.consume("a", at(0)).await.unwrap());
        assert_eq!(view.remaining_views, None);
        assert_eq!(
            denied(engine.consume("a", at(0)).await.unwrap()),
            Denial::ViewLimitExceeded {
                max_views: NonZeroU32::MAX
            }
        );
        assert_eq!(
            engine.store().get("a").await.unwrap().unwrap().views_used,
            u32::MAX
        );
    }

    #[tokio::test]
    async fn remaining_views_drop_by_one() {
        let engine = engine();
        engine
            .create("a", Bytes::from_static(b"x"), None, Some(4), at(0))
            .await
            .unwrap();

        for expected in (0..4).rev() {
            let view = viewed(engine.consume("a", at(0)).await.unwrap());
            assert_eq!(view.remaining_views, Some(expected));
            let paste = engine.store().get("a").await.unwrap().unwrap();
            assert_eq!(paste.views_used, 4 - expected);
        }
        assert_eq!(denied(engine.consume("a", at(0)).await.unwrap()), limit(4));
    }

    async fn race<S: PasteStore + 'static>(engine: Arc<Engine<S>>, max_views: u32, readers: u32) {
        engine
            .create(
                "race",
                Bytes::from_static(b"x"),
                None,
                Some(i64::from(max_views)),
                at(0),
            )
            .await
            .unwrap();

        let handles: Vec<_> = (0..readers)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.consume("race", at(0)).await.unwrap() })
            })
            .collect();

        let mut remaining = Vec::new();
        let mut denials = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Consumed::Viewed(view) => remaining.push(view.remaining_views.unwrap()),
                Consumed::Denied(denial) => {
                    assert_eq!(denial, limit(max_views));
                    denials += 1;
                }
            }
        }

        let granted = max_views.min(readers);
        assert_eq!(remaining.len(), granted as usize);
        assert_eq!(denials, readers - granted);

        // Every successful reader saw a distinct count.
        remaining.sort_unstable();
        let expected: Vec<_> = (max_views - granted..max_views).collect();
        assert_eq!(remaining, expected);

        let paste = engine.store().get("race").await.unwrap().unwrap();
        assert_eq!(paste.views_used, granted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_readers_never_exceed_the_limit() {
        for (max_views, readers) in [(1, 2), (1, 50), (5, 100), (64, 64), (10, 3)] {
            race(Arc::new(engine()), max_views, readers).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_readers_against_rocksdb() {
        for (max_views, readers) in [(1, 2), (5, 100)] {
            let dir = tempfile::tempdir().unwrap();
            let engine = Engine::new(RocksStore::open(dir.path()).unwrap());
            race(Arc::new(engine), max_views, readers).await;
        }
    }

    #[tokio::test]
    async fn reclaim_removes_only_unavailable_pastes() {
        let engine = engine();
        let content = || Bytes::from_static(b"x");
        engine.create("forever", content(), None, None, at(0)).await.unwrap();
        engine.create("expiring", content(), Some(1), None, at(0)).await.unwrap();
        engine.create("once", content(), None, Some(1), at(0)).await.unwrap();
        engine.create("twice", content(), None, Some(2), at(0)).await.unwrap();
        viewed(engine.consume("once", at(0)).await.unwrap());
        viewed(engine.consume("twice", at(0)).await.unwrap());

        assert_eq!(engine.reclaim(at(999)).await.unwrap(), 1);
        assert_eq!(engine.reclaim(at(1000)).await.unwrap(), 1);
        assert_eq!(engine.reclaim(at(1000)).await.unwrap(), 0);

        let mut left = engine.store().ids().await.unwrap();
        left.sort();
        assert_eq!(left, vec!["forever".to_string(), "twice".to_string()]);

        // Gone pastes still read as denied, never as content.
        assert_eq!(
            denied(engine.consume("once", at(1000)).await.unwrap()),
            Denial::NotFound
        );
    }
}
