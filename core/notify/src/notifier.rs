//! Per-owner notice delivery.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

use drivemigrate_common::Result;
use drivemigrate_sync::read_owner_rows;

use crate::gmail::Mailer;
use crate::message::{compose, NoticeTemplate};

/// Whether notices are left as drafts or sent right away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Create drafts for review.
    #[default]
    Draft,
    /// Send immediately.
    Send,
}

/// Outcome of a notification batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotifyReport {
    /// Owners whose notice was drafted or sent, with the returned ID.
    pub delivered: BTreeMap<String, String>,
    /// Owners whose notice failed, with the error text.
    pub failed: BTreeMap<String, String>,
}

/// Count the rows per owner in an owner CSV file.
pub fn read_owner_counts(path: impl AsRef<Path>) -> Result<BTreeMap<String, usize>> {
    let mut counts = BTreeMap::new();
    for (email, _) in read_owner_rows(path)? {
        let email = email.trim();
        if email.is_empty() {
            continue;
        }
        *counts.entry(email.to_string()).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Sends one notice per owner through a [`Mailer`].
pub struct Notifier<M: Mailer> {
    mailer: M,
    from: String,
    template: NoticeTemplate,
}

impl<M: Mailer> Notifier<M> {
    /// Notifier sending as `from`.
    pub fn new(mailer: M, from: impl Into<String>, template: NoticeTemplate) -> Self {
        Self {
            mailer,
            from: from.into(),
            template,
        }
    }

    /// Deliver a notice to every owner in `counts`.
    ///
    /// A failure for one owner is logged and recorded; the remaining owners
    /// are still notified.
    pub async fn notify_all(
        &self,
        counts: &BTreeMap<String, usize>,
        mode: DeliveryMode,
    ) -> NotifyReport {
        let mut report = NotifyReport::default();

        for (owner, count) in counts {
            let raw = compose(&self.from, owner, *count, &self.template).raw();
            let result = match mode {
                DeliveryMode::Draft => self.mailer.create_draft(&raw).await,
                DeliveryMode::Send => self.mailer.send(&raw).await,
            };

            match result {
                Ok(id) => {
                    info!("{:?} for {} ({} files): {}", mode, owner, count, id);
                    report.delivered.insert(owner.clone(), id);
                }
                Err(err) => {
                    error!("Failed to notify {}: {}", owner, err);
                    report.failed.insert(owner.clone(), err.to_string());
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::engine::general_purpose::URL_SAFE;
    use base64::Engine;
    use drivemigrate_common::Error;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingMailer {
        drafts: Mutex<Vec<String>>,
        sent: Mutex<Vec<String>>,
        reject: Option<String>,
    }

    impl RecordingMailer {
        fn check(&self, raw: &str) -> Result<()> {
            let decoded = String::from_utf8(URL_SAFE.decode(raw).unwrap()).unwrap();
            match &self.reject {
                Some(to) if decoded.contains(&format!("To: {}\r\n", to)) => Err(Error::Api {
                    status: 400,
                    message: "invalid recipient".to_string(),
                }),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn create_draft(&self, raw: &str) -> Result<String> {
            self.check(raw)?;
            let mut drafts = self.drafts.lock().unwrap();
            drafts.push(raw.to_string());
            Ok(format!("draft-{}", drafts.len()))
        }

        async fn send(&self, raw: &str) -> Result<String> {
            self.check(raw)?;
            let mut sent = self.sent.lock().unwrap();
            sent.push(raw.to_string());
            Ok(format!("msg-{}", sent.len()))
        }
    }

    fn template() -> NoticeTemplate {
        NoticeTemplate {
            organization: "Acme Lab".to_string(),
            owner_target_email: "it@acme.test".to_string(),
            drive_folder: "F".to_string(),
            resource_key: "K".to_string(),
            contact: Some("help@acme.test".to_string()),
        }
    }

    fn counts(entries: &[(&str, usize)]) -> BTreeMap<String, usize> {
        entries.iter().map(|(e, n)| (e.to_string(), *n)).collect()
    }

    #[test]
    fn test_read_owner_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("owners.csv");
        std::fs::write(
            &path,
            "Email,Link\na@x.test,l1\nb@x.test,l2\na@x.test,l3\n,l4\n",
        )
        .unwrap();

        let counts = read_owner_counts(&path).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["a@x.test"], 2);
        assert_eq!(counts["b@x.test"], 1);
    }

    #[tokio::test]
    async fn test_drafts_by_default() {
        let notifier = Notifier::new(RecordingMailer::default(), "me@acme.test", template());

        let report = notifier
            .notify_all(&counts(&[("a@x.test", 2), ("b@x.test", 1)]), DeliveryMode::Draft)
            .await;

        assert_eq!(report.delivered.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(notifier.mailer.drafts.lock().unwrap().len(), 2);
        assert!(notifier.mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_mode() {
        let notifier = Notifier::new(RecordingMailer::default(), "me@acme.test", template());

        let report = notifier
            .notify_all(&counts(&[("a@x.test", 1)]), DeliveryMode::Send)
            .await;

        assert_eq!(report.delivered["a@x.test"], "msg-1");
        assert!(notifier.mailer.drafts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let mailer = RecordingMailer {
            reject: Some("b@x.test".to_string()),
            ..Default::default()
        };
        let notifier = Notifier::new(mailer, "me@acme.test", template());

        let report = notifier
            .notify_all(
                &counts(&[("a@x.test", 1), ("b@x.test", 1), ("c@x.test", 4)]),
                DeliveryMode::Draft,
            )
            .await;

        assert_eq!(report.delivered.len(), 2);
        assert!(report.failed["b@x.test"].contains("invalid recipient"));
        assert!(report.delivered.contains_key("c@x.test"));
    }
}
