//! Per-queue message storage
//!
//! Messages are kept in insertion order. Whether a message can be handed out
//! is decided at access time from its timestamps:
//! - visible when `now >= time_next_visible`
//! - expired (logically absent) when `now >= expiration_time`
//!
//! Expired messages are purged on every access.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use queuestack_core::{QueueError, ReceiptFailure};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

/// Default message time-to-live: 7 days
pub const DEFAULT_TIME_TO_LIVE_SECS: i64 = 7 * 24 * 60 * 60;

/// Default visibility timeout applied by `get`
pub const DEFAULT_GET_VISIBILITY_SECS: i64 = 30;

/// Upper bound for any visibility timeout: 7 days
pub const MAX_VISIBILITY_SECS: i64 = 7 * 24 * 60 * 60;

/// Most messages a single get or peek returns
pub const MAX_BATCH: u32 = 32;

/// A message as held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: String,
    /// Encoded content
    pub payload: String,
    pub insertion_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
    pub time_next_visible: DateTime<Utc>,
    pub pop_receipt: String,
    pub dequeue_count: u32,
}

impl StoredMessage {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration_time
    }

    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        now >= self.time_next_visible && !self.is_expired(now)
    }
}

fn new_pop_receipt() -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

/// Messages of a single queue
#[derive(Debug)]
pub struct MessageStore {
    queue: String,
    /// Insertion sequence -> message
    messages: BTreeMap<u64, StoredMessage>,
    /// Message id -> insertion sequence
    index: HashMap<String, u64>,
    next_sequence: u64,
    closed: bool,
}

impl MessageStore {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            messages: BTreeMap::new(),
            index: HashMap::new(),
            next_sequence: 0,
            closed: false,
        }
    }

    /// Append a message.
    ///
    /// `visibility_timeout` defaults to 0 and must be shorter than the
    /// time-to-live, which defaults to 7 days.
    pub fn put(
        &mut self,
        payload: String,
        now: DateTime<Utc>,
        visibility_timeout: Option<Duration>,
        time_to_live: Option<Duration>,
    ) -> Result<StoredMessage, QueueError> {
        self.ensure_open()?;

        let ttl = time_to_live.unwrap_or_else(|| Duration::seconds(DEFAULT_TIME_TO_LIVE_SECS));
        if ttl <= Duration::zero() {
            return Err(QueueError::invalid_argument(format!(
                "time_to_live must be positive, got {}s",
                ttl.num_seconds()
            )));
        }
        let visibility = visibility_timeout.unwrap_or_else(Duration::zero);
        check_visibility("visibility_timeout", visibility, 0)?;
        if visibility >= ttl {
            return Err(QueueError::invalid_argument(
                "visibility_timeout must be shorter than time_to_live",
            ));
        }
        let expiration_time = now
            .checked_add_signed(ttl)
            .ok_or_else(|| QueueError::invalid_argument("time_to_live is out of range"))?;

        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            payload,
            insertion_time: now,
            expiration_time,
            time_next_visible: now + visibility,
            pop_receipt: new_pop_receipt(),
            dequeue_count: 0,
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.index.insert(message.id.clone(), sequence);
        self.messages.insert(sequence, message.clone());

        debug!(queue = %self.queue, message_id = %message.id, "Put message");
        Ok(message)
    }

    /// Check out up to `max_count` visible messages, oldest first.
    ///
    /// Each one is hidden for `visibility_timeout` (default 30s), gets a new
    /// pop receipt and has its dequeue count bumped.
    pub fn get(
        &mut self,
        now: DateTime<Utc>,
        max_count: Option<u32>,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<StoredMessage>, QueueError> {
        self.get_with(now, max_count, visibility_timeout, |m| Ok(m.clone()))
    }

    /// Like `get`, handing each checked-out message to `convert`. The store
    /// is only changed if every conversion succeeds.
    pub fn get_with<T>(
        &mut self,
        now: DateTime<Utc>,
        max_count: Option<u32>,
        visibility_timeout: Option<Duration>,
        mut convert: impl FnMut(&StoredMessage) -> Result<T, QueueError>,
    ) -> Result<Vec<T>, QueueError> {
        self.ensure_open()?;
        let max_count = check_batch(max_count)?;
        let visibility = visibility_timeout
            .unwrap_or_else(|| Duration::seconds(DEFAULT_GET_VISIBILITY_SECS));
        check_visibility("visibility_timeout", visibility, 1)?;
        self.purge_expired(now);

        let checked_out: Vec<(u64, StoredMessage)> = self
            .messages
            .iter()
            .filter(|(_, m)| m.is_visible(now))
            .take(max_count)
            .map(|(&sequence, m)| {
                let message = StoredMessage {
                    time_next_visible: now + visibility,
                    pop_receipt: new_pop_receipt(),
                    dequeue_count: m.dequeue_count + 1,
                    ..m.clone()
                };
                (sequence, message)
            })
            .collect();

        let converted = checked_out
            .iter()
            .map(|(_, m)| convert(m))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(queue = %self.queue, count = checked_out.len(), "Got messages");
        self.messages.extend(checked_out);
        Ok(converted)
    }

    /// Look at up to `max_count` visible messages without changing them
    pub fn peek(
        &mut self,
        now: DateTime<Utc>,
        max_count: Option<u32>,
    ) -> Result<Vec<StoredMessage>, QueueError> {
        self.ensure_open()?;
        let max_count = check_batch(max_count)?;
        self.purge_expired(now);

        Ok(self
            .messages
            .values()
            .filter(|m| m.is_visible(now))
            .take(max_count)
            .cloned()
            .collect())
    }

    /// Re-hide a checked-out message, optionally replacing its payload.
    ///
    /// A visibility timeout of zero makes it visible again immediately.
    pub fn update(
        &mut self,
        now: DateTime<Utc>,
        id: &str,
        pop_receipt: &str,
        visibility_timeout: Duration,
        payload: Option<String>,
    ) -> Result<StoredMessage, QueueError> {
        self.update_with(now, id, pop_receipt, visibility_timeout, payload, |m| {
            Ok(m.clone())
        })
    }

    /// Like `update`, handing the updated message to `convert`. The store
    /// is only changed if the conversion succeeds.
    pub fn update_with<T>(
        &mut self,
        now: DateTime<Utc>,
        id: &str,
        pop_receipt: &str,
        visibility_timeout: Duration,
        payload: Option<String>,
        convert: impl FnOnce(&StoredMessage) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        self.ensure_open()?;
        check_visibility("visibility_timeout", visibility_timeout, 0)?;
        self.purge_expired(now);

        let sequence = self.checked_out(id, pop_receipt)?;
        let current = self
            .messages
            .get(&sequence)
            .ok_or_else(|| unknown_message(id))?;

        let message = StoredMessage {
            payload: payload.unwrap_or_else(|| current.payload.clone()),
            time_next_visible: now + visibility_timeout,
            pop_receipt: new_pop_receipt(),
            ..current.clone()
        };
        let converted = convert(&message)?;

        debug!(queue = %self.queue, message_id = %id, "Updated message");
        self.messages.insert(sequence, message);
        Ok(converted)
    }

    /// Remove a checked-out message for good
    pub fn delete(
        &mut self,
        now: DateTime<Utc>,
        id: &str,
        pop_receipt: &str,
    ) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.purge_expired(now);

        let sequence = self.checked_out(id, pop_receipt)?;
        self.messages.remove(&sequence);
        self.index.remove(id);

        debug!(queue = %self.queue, message_id = %id, "Deleted message");
        Ok(())
    }

    /// Remove every message
    pub fn clear(&mut self) -> Result<(), QueueError> {
        self.ensure_open()?;
        let cleared = self.messages.len();
        self.messages.clear();
        self.index.clear();

        debug!(queue = %self.queue, cleared, "Cleared messages");
        Ok(())
    }

    /// Drop expired messages, returning how many were removed
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.messages.len();
        let index = &mut self.index;
        self.messages.retain(|_, m| {
            let keep = !m.is_expired(now);
            if !keep {
                index.remove(&m.id);
            }
            keep
        });
        before - self.messages.len()
    }

    /// Unexpired messages, visible or not
    pub fn approximate_count(&mut self, now: DateTime<Utc>) -> usize {
        self.purge_expired(now);
        self.messages.len()
    }

    /// Messages held in memory, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Mark the store as belonging to a deleted queue. Every later call
    /// fails with `QueueNotFound`.
    pub fn close(&mut self) {
        self.closed = true;
        self.messages.clear();
        self.index.clear();
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::QueueNotFound(self.queue.clone()));
        }
        Ok(())
    }

    fn checked_out(&self, id: &str, pop_receipt: &str) -> Result<u64, QueueError> {
        let sequence = *self.index.get(id).ok_or_else(|| unknown_message(id))?;
        let message = self
            .messages
            .get(&sequence)
            .ok_or_else(|| unknown_message(id))?;

        if message.pop_receipt != pop_receipt {
            return Err(QueueError::InvalidReceipt {
                message_id: id.to_string(),
                reason: ReceiptFailure::Mismatch,
            });
        }
        Ok(sequence)
    }
}

fn unknown_message(id: &str) -> QueueError {
    QueueError::InvalidReceipt {
        message_id: id.to_string(),
        reason: ReceiptFailure::UnknownMessage,
    }
}

fn check_batch(max_count: Option<u32>) -> Result<usize, QueueError> {
    let max_count = max_count.unwrap_or(1);
    if !(1..=MAX_BATCH).contains(&max_count) {
        return Err(QueueError::invalid_argument(format!(
            "num_messages must be between 1 and {}, got {}",
            MAX_BATCH, max_count
        )));
    }
    Ok(max_count as usize)
}

fn check_visibility(name: &str, value: Duration, min_secs: i64) -> Result<(), QueueError> {
    let secs = value.num_seconds();
    if value < Duration::seconds(min_secs) || secs > MAX_VISIBILITY_SECS {
        return Err(QueueError::invalid_argument(format!(
            "{} must be between {} and {} seconds, got {}",
            name, min_secs, MAX_VISIBILITY_SECS, secs
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MessageStore {
        MessageStore::new("orders")
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn put(store: &mut MessageStore, payload: &str, now: DateTime<Utc>) -> StoredMessage {
        store.put(payload.to_string(), now, None, None).unwrap()
    }

    #[test]
    fn test_put_defaults() {
        let mut s = store();
        let message = put(&mut s, "message1", t0());

        assert_eq!(message.insertion_time, t0());
        assert_eq!(message.expiration_time, t0() + Duration::days(7));
        assert_eq!(message.time_next_visible, t0());
        assert_eq!(message.dequeue_count, 0);
    }

    #[test]
    fn test_put_rejects_bad_durations() {
        let mut s = store();

        let negative_ttl = s.put("m".into(), t0(), None, Some(Duration::seconds(-1)));
        assert!(matches!(negative_ttl, Err(QueueError::InvalidArgument(_))));

        let too_hidden = s.put("m".into(), t0(), Some(Duration::days(8)), None);
        assert!(matches!(too_hidden, Err(QueueError::InvalidArgument(_))));

        let hidden_past_expiry = s.put(
            "m".into(),
            t0(),
            Some(Duration::seconds(60)),
            Some(Duration::seconds(60)),
        );
        assert!(matches!(hidden_past_expiry, Err(QueueError::InvalidArgument(_))));

        assert!(s.is_empty());
    }

    #[test]
    fn test_visibility_delay_on_put() {
        let mut s = store();
        s.put("delayed".into(), t0(), Some(Duration::seconds(5)), None)
            .unwrap();

        assert!(s.get(t0() + Duration::seconds(4), None, None).unwrap().is_empty());

        let got = s.get(t0() + Duration::seconds(5), None, None).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, "delayed");
    }

    #[test]
    fn test_ttl_expiry() {
        let mut s = store();
        s.put("short".into(), t0(), None, Some(Duration::seconds(60)))
            .unwrap();

        assert_eq!(s.peek(t0() + Duration::seconds(59), None).unwrap().len(), 1);
        assert!(s.peek(t0() + Duration::seconds(60), None).unwrap().is_empty());
        assert!(s.get(t0() + Duration::seconds(61), None, None).unwrap().is_empty());
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn test_get_hides_and_reissues_receipt() {
        let mut s = store();
        let put_message = put(&mut s, "message1", t0());

        let got = s.get(t0(), None, None).unwrap();
        assert_eq!(got.len(), 1);
        let message = &got[0];
        assert_eq!(message.id, put_message.id);
        assert_ne!(message.pop_receipt, put_message.pop_receipt);
        assert_eq!(message.dequeue_count, 1);
        assert_eq!(message.time_next_visible, t0() + Duration::seconds(30));

        // Hidden for the 30s default window
        assert!(s.get(t0() + Duration::seconds(29), None, None).unwrap().is_empty());

        let again = s.get(t0() + Duration::seconds(30), None, None).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].dequeue_count, 2);
    }

    #[test]
    fn test_get_takes_oldest_first_up_to_count() {
        let mut s = store();
        for i in 1..=4 {
            put(&mut s, &format!("message{}", i), t0());
        }

        let first = s.get(t0(), Some(2), None).unwrap();
        let payloads: Vec<_> = first.iter().map(|m| m.payload.as_str()).collect();
        assert_eq!(payloads, vec!["message1", "message2"]);

        let rest = s.get(t0(), Some(32), Some(Duration::seconds(10))).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].time_next_visible, t0() + Duration::seconds(10));
    }

    #[test]
    fn test_batch_limits() {
        let mut s = store();
        assert!(matches!(s.get(t0(), Some(0), None), Err(QueueError::InvalidArgument(_))));
        assert!(matches!(s.peek(t0(), Some(33)), Err(QueueError::InvalidArgument(_))));
        assert!(matches!(
            s.get(t0(), None, Some(Duration::zero())),
            Err(QueueError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_peek_is_idempotent() {
        let mut s = store();
        let original = put(&mut s, "message1", t0());

        let first = s.peek(t0(), None).unwrap();
        let second = s.peek(t0(), None).unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].pop_receipt, original.pop_receipt);
        assert_eq!(first[0].dequeue_count, 0);
        assert_eq!(first[0].time_next_visible, original.time_next_visible);
    }

    #[test]
    fn test_delete_requires_current_receipt() {
        let mut s = store();
        put(&mut s, "message1", t0());
        let got = s.get(t0(), None, None).unwrap().remove(0);

        let wrong = s.delete(t0(), &got.id, "not-the-receipt");
        assert!(matches!(
            wrong,
            Err(QueueError::InvalidReceipt {
                reason: ReceiptFailure::Mismatch,
                ..
            })
        ));

        s.delete(t0(), &got.id, &got.pop_receipt).unwrap();

        let twice = s.delete(t0(), &got.id, &got.pop_receipt);
        assert!(matches!(
            twice,
            Err(QueueError::InvalidReceipt {
                reason: ReceiptFailure::UnknownMessage,
                ..
            })
        ));
    }

    #[test]
    fn test_receipt_goes_stale_after_redelivery() {
        let mut s = store();
        put(&mut s, "message1", t0());
        let first = s.get(t0(), None, None).unwrap().remove(0);
        let later = t0() + Duration::seconds(31);
        let second = s.get(later, None, None).unwrap().remove(0);

        assert!(s.delete(later, &first.id, &first.pop_receipt).is_err());
        assert!(s.delete(later, &second.id, &second.pop_receipt).is_ok());
    }

    #[test]
    fn test_update_chain() {
        let mut s = store();
        put(&mut s, "message1", t0());
        let got = s.get(t0(), None, None).unwrap().remove(0);

        let visible_now = s
            .update(t0(), &got.id, &got.pop_receipt, Duration::zero(), None)
            .unwrap();
        assert_eq!(visible_now.time_next_visible, t0());
        assert_ne!(visible_now.pop_receipt, got.pop_receipt);
        assert_eq!(s.peek(t0(), None).unwrap().len(), 1);

        // The receipt from get is now stale
        assert!(s
            .update(t0(), &got.id, &got.pop_receipt, Duration::zero(), None)
            .is_err());

        let rewritten = s
            .update(
                t0(),
                &got.id,
                &visible_now.pop_receipt,
                Duration::seconds(30),
                Some("new text".into()),
            )
            .unwrap();
        assert_eq!(rewritten.payload, "new text");
        assert!(s.peek(t0() + Duration::seconds(29), None).unwrap().is_empty());
        assert_eq!(
            s.peek(t0() + Duration::seconds(30), None).unwrap()[0].payload,
            "new text"
        );
    }

    #[test]
    fn test_update_of_expired_message_fails() {
        let mut s = store();
        s.put("short".into(), t0(), None, Some(Duration::seconds(60)))
            .unwrap();
        let got = s.get(t0(), None, None).unwrap().remove(0);

        let result = s.update(
            t0() + Duration::seconds(60),
            &got.id,
            &got.pop_receipt,
            Duration::zero(),
            None,
        );
        assert!(matches!(result, Err(QueueError::InvalidReceipt { .. })));
    }

    #[test]
    fn test_failed_conversion_leaves_messages_untouched() {
        let mut s = store();
        let original = put(&mut s, "message1", t0());

        let result: Result<Vec<()>, _> = s.get_with(t0(), Some(32), None, |_| {
            Err(QueueError::invalid_argument("unreadable"))
        });
        assert!(matches!(result, Err(QueueError::InvalidArgument(_))));
        assert_eq!(s.peek(t0(), None).unwrap(), vec![original.clone()]);

        let got = s.get(t0(), None, None).unwrap().remove(0);
        let result: Result<(), _> = s.update_with(
            t0(),
            &got.id,
            &got.pop_receipt,
            Duration::zero(),
            Some("rewritten".into()),
            |_| Err(QueueError::invalid_argument("unreadable")),
        );
        assert!(result.is_err());

        // Still hidden under the receipt from get, with the old payload
        assert!(s.peek(t0(), None).unwrap().is_empty());
        let visible = s
            .update(t0(), &got.id, &got.pop_receipt, Duration::zero(), None)
            .unwrap();
        assert_eq!(visible.payload, "message1");
        assert_eq!(visible.dequeue_count, 1);
    }

    #[test]
    fn test_clear() {
        let mut s = store();
        put(&mut s, "message1", t0());
        put(&mut s, "message2", t0());

        s.clear().unwrap();
        assert!(s.peek(t0(), Some(32)).unwrap().is_empty());
    }

    #[test]
    fn test_closed_store_reports_missing_queue() {
        let mut s = store();
        put(&mut s, "message1", t0());
        s.close();

        let result = s.put("late".into(), t0(), None, None);
        assert!(matches!(result, Err(QueueError::QueueNotFound(name)) if name == "orders"));
        assert!(s.get(t0(), None, None).is_err());
    }

    #[test]
    fn test_purge_expired_counts() {
        let mut s = store();
        s.put("a".into(), t0(), None, Some(Duration::seconds(10)))
            .unwrap();
        s.put("b".into(), t0(), None, Some(Duration::seconds(20)))
            .unwrap();
        put(&mut s, "c", t0());

        assert_eq!(s.purge_expired(t0() + Duration::seconds(15)), 1);
        assert_eq!(s.approximate_count(t0() + Duration::seconds(25)), 1);
    }
}
