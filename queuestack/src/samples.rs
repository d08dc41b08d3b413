//! Sample walkthroughs of the queue service
//!
//! Each sample exercises one area of the API against an in-process service
//! and checks the documented outcome. Waiting is done by moving a manual
//! clock, so the whole set runs instantly.

use anyhow::{bail, ensure, Context};
use chrono::{DateTime, Duration, Utc};
use queuestack_auth::{AccessPolicy, AccountPermissions, QueuePermissions, ResourceTypes};
use queuestack_core::{Clock, ErrorCode, ManualClock};
use queuestack_queue::{
    CorsRule, Logging, MessageEncoding, Metadata, Metrics, QueueMessage, QueueService,
    ServicePropertiesUpdate, SharedKey, SignedIdentifiers,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

type Sample = fn(&Samples) -> anyhow::Result<()>;

/// Every sample, in the order they run
pub const SAMPLES: &[(&str, Sample)] = &[
    ("create_queue", Samples::create_queue),
    ("delete_queue", Samples::delete_queue),
    ("exists", Samples::exists),
    ("list_queues", Samples::list_queues),
    ("metadata", Samples::metadata),
    ("put_message", Samples::put_message),
    ("get_messages", Samples::get_messages),
    ("peek_messages", Samples::peek_messages),
    ("clear_messages", Samples::clear_messages),
    ("delete_message", Samples::delete_message),
    ("update_message", Samples::update_message),
    ("alternative_encoding", Samples::alternative_encoding),
    ("queue_sas", Samples::queue_sas),
    ("account_sas", Samples::account_sas),
    ("queue_acl", Samples::queue_acl),
    ("sas_with_signed_identifiers", Samples::sas_with_signed_identifiers),
    ("service_properties", Samples::service_properties),
];

pub struct Samples {
    service: QueueService,
    clock: ManualClock,
}

impl Samples {
    pub fn new(account: &str, key: SharedKey, encoding: MessageEncoding) -> Self {
        let clock = ManualClock::new(Utc::now());
        let service =
            QueueService::with_clock(account, key, Arc::new(clock.clone())).with_encoding(encoding);
        Self { service, clock }
    }

    pub fn service(&self) -> &QueueService {
        &self.service
    }

    /// Run the named samples, or all of them when `names` is empty
    pub fn run(&self, names: &[String]) -> anyhow::Result<usize> {
        let selected: Vec<&(&str, Sample)> = if names.is_empty() {
            SAMPLES.iter().collect()
        } else {
            names
                .iter()
                .map(|name| match SAMPLES.iter().find(|(n, _)| *n == name.as_str()) {
                    Some(sample) => Ok(sample),
                    None => bail!("unknown sample {}", name),
                })
                .collect::<anyhow::Result<_>>()?
        };

        for (name, sample) in &selected {
            info!(sample = %name, "Running sample");
            sample(self).with_context(|| format!("sample {} failed", name))?;
        }
        Ok(selected.len())
    }

    fn queue_reference(prefix: &str) -> String {
        format!("{}{}", prefix, Uuid::new_v4().simple())
    }

    fn create(&self, prefix: &str) -> anyhow::Result<String> {
        let name = Self::queue_reference(prefix);
        self.service.create_queue(&name, None, false)?;
        Ok(name)
    }

    /// Stand-in for waiting on the service
    fn wait(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }

    fn create_queue(&self) -> anyhow::Result<()> {
        let service = &self.service;

        // Basic
        let queue1 = Self::queue_reference("queue");
        ensure!(service.create_queue(&queue1, None, false)?);

        // Metadata
        let queue2 = Self::queue_reference("queue");
        let metadata = Metadata::from([("val1", "foo"), ("val2", "blah")]);
        ensure!(service.create_queue(&queue2, Some(metadata), false)?);

        // Fail on exist
        let queue3 = Self::queue_reference("queue");
        ensure!(service.create_queue(&queue3, None, false)?);
        ensure!(!service.create_queue(&queue3, None, false)?);
        let conflict = service.create_queue(&queue3, None, true);
        ensure!(matches!(conflict, Err(e) if e.code() == ErrorCode::QueueAlreadyExists));

        for name in [&queue1, &queue2, &queue3] {
            service.delete_queue(name, false)?;
        }
        Ok(())
    }

    fn delete_queue(&self) -> anyhow::Result<()> {
        let service = &self.service;

        // Basic
        let name = self.create("queue")?;
        ensure!(service.delete_queue(&name, false)?);

        // Fail not exist
        let name = Self::queue_reference("queue");
        ensure!(!service.delete_queue(&name, false)?);
        let missing = service.delete_queue(&name, true);
        ensure!(matches!(missing, Err(e) if e.code() == ErrorCode::QueueNotFound));
        Ok(())
    }

    fn exists(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = Self::queue_reference("queue");

        ensure!(!service.exists(&name)?);
        service.create_queue(&name, None, false)?;
        ensure!(service.exists(&name)?);

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn list_queues(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let queue1 = "queue1";
        service.create_queue(
            queue1,
            Some(Metadata::from([("val1", "foo"), ("val2", "blah")])),
            false,
        )?;
        let queue2 = self.create("queue2")?;
        let queue3 = self.create("thirdq")?;

        // Prefix
        let names: Vec<String> = service.list_queues(Some("queue"), false)?.map(|q| q.name).collect();
        info!(queues = ?names, "Queues with prefix");
        ensure!(names.iter().any(|n| n == queue1) && names.contains(&queue2));
        ensure!(!names.contains(&queue3));

        // Metadata
        let listed = service
            .list_queues(Some("queue"), true)?
            .find(|q| q.name == queue1)
            .context("queue1 missing from listing")?;
        let metadata = listed.metadata.unwrap_or_default();
        ensure!(metadata.get("val1") == Some("foo") && metadata.get("val2") == Some("blah"));

        for name in [queue1, queue2.as_str(), queue3.as_str()] {
            service.delete_queue(name, false)?;
        }
        Ok(())
    }

    fn metadata(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;

        // Basic
        let metadata = Metadata::from([("val1", "foo"), ("val2", "blah")]);
        service.set_queue_metadata(&name, Some(metadata.clone()))?;
        let props = service.get_queue_metadata(&name)?;
        ensure!(props.metadata == metadata);
        ensure!(props.approximate_message_count == 0);

        // Replaces values, does not merge
        service.set_queue_metadata(&name, Some(Metadata::from([("new", "val")])))?;
        ensure!(service.get_queue_metadata(&name)?.metadata == Metadata::from([("new", "val")]));

        // Capital letters
        service.set_queue_metadata(&name, Some(Metadata::from([("NEW", "VAL")])))?;
        let metadata = service.get_queue_metadata(&name)?.metadata;
        ensure!(metadata.iter().eq([("new", "VAL")]));

        // Clearing
        service.set_queue_metadata(&name, None)?;
        ensure!(service.get_queue_metadata(&name)?.metadata.is_empty());

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn put_message(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;

        // Visible now, expires in 7 days
        let basic = service.put_message(&name, "message1", None, None)?;
        ensure!(basic.expiration_time - basic.insertion_time == Duration::days(7));

        // Visible in 5 seconds
        service.put_message(&name, "message2", Some(Duration::seconds(5)), None)?;

        // Expires in 60 seconds
        service.put_message(&name, "message3", None, Some(Duration::seconds(60)))?;

        ensure!(peek_contents(service, &name)? == ["message1", "message3"]);
        self.wait(5);
        ensure!(peek_contents(service, &name)?.len() == 3);
        self.wait(55);
        ensure!(peek_contents(service, &name)? == ["message1", "message2"]);

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn get_messages(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;
        for i in 1..=4 {
            service.put_message(&name, format!("message{}", i), None, None)?;
        }

        // Basic, only gets 1 message
        let messages: Vec<_> = service.get_messages(&name, None, None)?.collect();
        ensure!(contents(&messages) == ["message1"]);

        // Num messages
        let messages: Vec<_> = service.get_messages(&name, Some(2), None)?.collect();
        ensure!(contents(&messages) == ["message2", "message3"]);

        // Visibility: message4 is hidden for 10 seconds rather than 30
        let messages: Vec<_> = service
            .get_messages(&name, None, Some(Duration::seconds(10)))?
            .collect();
        ensure!(contents(&messages) == ["message4"]);
        self.wait(10);
        ensure!(peek_contents(service, &name)? == ["message4"]);

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn peek_messages(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;
        service.put_message(&name, "message1", None, None)?;
        service.put_message(&name, "message2", None, None)?;

        // Peeking leaves visibility alone and carries no pop receipt
        let peeked: Vec<_> = service.peek_messages(&name, None)?.collect();
        ensure!(contents(&peeked) == ["message1"]);
        ensure!(peeked[0].pop_receipt.is_none() && peeked[0].time_next_visible.is_none());

        let messages: Vec<_> = service.get_messages(&name, Some(2), None)?.collect();
        ensure!(contents(&messages) == ["message1", "message2"]);

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn clear_messages(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;
        service.put_message(&name, "message1", None, None)?;
        service.put_message(&name, "message2", None, None)?;

        service.clear_messages(&name)?;
        ensure!(service.peek_messages(&name, None)?.len() == 0);

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn delete_message(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;
        service.put_message(&name, "message1", None, None)?;
        service.put_message(&name, "message2", None, None)?;
        let message = service
            .get_messages(&name, None, None)?
            .next()
            .context("no message to delete")?;

        // Deleting needs the id and the pop receipt from get_messages
        let receipt = message.pop_receipt.as_deref().context("missing pop receipt")?;
        service.delete_message(&name, &message.id, receipt)?;

        self.wait(30);
        let remaining = peek_contents(service, &name)?;
        info!(remaining = ?remaining, "Message left after delete");
        ensure!(remaining.len() == 1 && remaining[0] != content(&message));

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn update_message(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;
        service.put_message(&name, "message1", None, None)?;
        let got = service
            .get_messages(&name, None, None)?
            .next()
            .context("no message to update")?;
        let receipt = got.pop_receipt.as_deref().context("missing pop receipt")?;

        // A visibility timeout is required, but may be 0
        let updated = service.update_message(&name, &got.id, receipt, Duration::zero(), None)?;
        ensure!(peek_contents(service, &name)? == ["message1"]);

        // With content, using the receipt from the previous update; the
        // message reappears in 30 seconds with the new text
        let receipt = updated.pop_receipt.as_deref().context("missing pop receipt")?;
        service.update_message(
            &name,
            &got.id,
            receipt,
            Duration::seconds(30),
            Some("new text".into()),
        )?;
        ensure!(peek_contents(service, &name)?.is_empty());
        self.wait(30);
        ensure!(peek_contents(service, &name)? == ["new text"]);

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn alternative_encoding(&self) -> anyhow::Result<()> {
        let name = self.create("queue")?;

        // Base64 carries raw bytes
        let service = self.service.with_encoding(MessageEncoding::Base64);
        service.put_message(&name, b"bytedata", None, None)?;

        let message = service
            .peek_messages(&name, None)?
            .next()
            .context("no message to peek")?;
        ensure!(message.content.as_bytes() == b"bytedata");
        ensure!(message.content.as_text().is_none());

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn queue_sas(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;
        service.put_message(&name, "message1", None, None)?;

        // Process permission on this queue only, for an hour
        let token = service.generate_queue_sas(
            &name,
            QueuePermissions::PROCESS,
            self.clock_now() + Duration::hours(1),
            None,
        )?;
        let sas_service = service.with_sas_token(token.to_string().parse()?);

        let messages: Vec<_> = sas_service.get_messages(&name, None, None)?.collect();
        ensure!(contents(&messages) == ["message1"]);
        ensure!(sas_service.put_message(&name, "denied", None, None).is_err());

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn account_sas(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;
        let metadata = Metadata::from([("val1", "foo"), ("val2", "blah")]);
        service.set_queue_metadata(&name, Some(metadata.clone()))?;

        // Read access to every queue in the account, for an hour
        let token = service.generate_account_sas(
            ResourceTypes::CONTAINER,
            AccountPermissions::READ,
            self.clock_now() + Duration::hours(1),
            None,
        )?;
        let sas_service = service.with_sas_token(token.to_string().parse()?);

        ensure!(sas_service.get_queue_metadata(&name)?.metadata == metadata);

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn queue_acl(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;

        // Basic
        let policy = AccessPolicy::new(QueuePermissions::READ, self.clock_now() + Duration::hours(1));
        service.set_queue_acl(&name, Some(SignedIdentifiers::from([("id".to_string(), policy)])))?;
        self.wait(30);
        ensure!(service.get_queue_acl(&name)?.keys().eq(["id"]));

        // Replaces values, does not merge
        let policy = AccessPolicy::new(QueuePermissions::READ, self.clock_now() + Duration::hours(1));
        service.set_queue_acl(&name, Some(SignedIdentifiers::from([("id2".to_string(), policy)])))?;
        self.wait(30);
        ensure!(service.get_queue_acl(&name)?.keys().eq(["id2"]));

        // Clear
        service.set_queue_acl(&name, None)?;
        self.wait(30);
        ensure!(service.get_queue_acl(&name)?.is_empty());

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn sas_with_signed_identifiers(&self) -> anyhow::Result<()> {
        let service = &self.service;
        let name = self.create("queue")?;
        service.put_message(&name, "message1", None, None)?;

        let policy =
            AccessPolicy::new(QueuePermissions::PROCESS, self.clock_now() + Duration::hours(1));
        service.set_queue_acl(&name, Some(SignedIdentifiers::from([("id".to_string(), policy)])))?;
        self.wait(30);

        // The token takes its grant from the stored policy
        let token = service.generate_queue_sas_for_identifier(&name, "id")?;
        let sas_service = service.with_sas_token(token.to_string().parse()?);

        let messages: Vec<_> = sas_service.get_messages(&name, None, None)?.collect();
        ensure!(contents(&messages) == ["message1"]);

        // Removing the policy revokes the token
        service.set_queue_acl(&name, None)?;
        ensure!(sas_service.peek_messages(&name, None).is_err());

        service.delete_queue(&name, false)?;
        Ok(())
    }

    fn service_properties(&self) -> anyhow::Result<()> {
        let service = &self.service;

        // Basic
        service.set_service_properties(ServicePropertiesUpdate {
            logging: Some(Logging {
                delete: true,
                ..Logging::default()
            }),
            hour_metrics: Some(Metrics::enabled(true)),
            minute_metrics: Some(Metrics::enabled(false)),
            cors: Some(vec![CorsRule::new(["*"], ["GET"])]),
        })?;
        self.wait(30);
        let props = service.get_service_properties()?;
        info!(properties = %serde_json::to_string(&props)?, "Service properties");
        ensure!(props.logging.delete && props.cors.len() == 1);

        // Omitted properties are kept; an empty list clears
        service.set_service_properties(ServicePropertiesUpdate {
            cors: Some(vec![]),
            ..Default::default()
        })?;
        self.wait(30);
        let cleared = service.get_service_properties()?;
        ensure!(cleared.cors.is_empty());
        ensure!(cleared.logging == props.logging && cleared.hour_metrics == props.hour_metrics);
        Ok(())
    }

    fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Message content as text, whichever encoding the handle uses
fn content(message: &QueueMessage) -> String {
    String::from_utf8_lossy(message.content.as_bytes()).into_owned()
}

fn contents(messages: &[QueueMessage]) -> Vec<String> {
    messages.iter().map(content).collect()
}

fn peek_contents(service: &QueueService, queue: &str) -> anyhow::Result<Vec<String>> {
    let messages: Vec<_> = service.peek_messages(queue, Some(32))?.collect();
    Ok(contents(&messages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_samples_pass() {
        let samples = Samples::new("devstoreaccount1", SharedKey::generate(), MessageEncoding::Text);
        assert_eq!(samples.run(&[]).unwrap(), SAMPLES.len());
    }

    #[test]
    fn test_samples_pass_with_base64_handles() {
        let samples = Samples::new("devstoreaccount1", SharedKey::generate(), MessageEncoding::Base64);
        samples.run(&[]).unwrap();
    }

    #[test]
    fn test_run_selected_samples() {
        let samples = Samples::new("devstoreaccount1", SharedKey::generate(), MessageEncoding::Text);
        let names = vec!["queue_sas".to_string(), "metadata".to_string()];
        assert_eq!(samples.run(&names).unwrap(), 2);
    }

    #[test]
    fn test_unknown_sample() {
        let samples = Samples::new("devstoreaccount1", SharedKey::generate(), MessageEncoding::Text);
        let err = samples.run(&["nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_samples_leave_no_queues_behind() {
        let samples = Samples::new("devstoreaccount1", SharedKey::generate(), MessageEncoding::Text);
        samples.run(&[]).unwrap();
        assert_eq!(samples.service().list_queues(None, false).unwrap().len(), 0);
    }
}
