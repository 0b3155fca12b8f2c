//! NNTP session contract and article model
//!
//! The core never speaks TLS, TCP, or yEnc. It consumes a session
//! object behind this trait; the transport and codec live outside.
//! Posted headers carry nothing keyed to identity or folder layout: no
//! custom X- headers, ever.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use silo_core::types::{MessageId, UsenetSubject};

/// One article: ordered headers plus transport-encoded body bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Article {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Article {
    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The article's Message-ID header, parsed
    pub fn message_id(&self) -> Option<MessageId> {
        MessageId::parse(self.header("Message-ID")?)
    }
}

/// Assemble a segment article. Header set is fixed: `From`,
/// `Newsgroups`, `Subject` (the wire subject), `Message-ID`, `Date`
/// (RFC 5322), `Content-Type`.
pub fn build_article(
    from: &str,
    newsgroups: &str,
    subject: &UsenetSubject,
    message_id: &MessageId,
    body: Vec<u8>,
) -> Article {
    Article {
        headers: vec![
            ("From".to_string(), from.to_string()),
            ("Newsgroups".to_string(), newsgroups.to_string()),
            ("Subject".to_string(), subject.as_str().to_string()),
            ("Message-ID".to_string(), message_id.as_str().to_string()),
            ("Date".to_string(), Utc::now().to_rfc2822()),
            (
                "Content-Type".to_string(),
                "application/octet-stream".to_string(),
            ),
        ],
        body,
    }
}

/// One live NNTP session. Implementations classify wire failures into
/// the [`crate::NntpError`] categories.
#[async_trait]
pub trait NntpSession: Send {
    /// Select the target newsgroup
    async fn select_group(&mut self, group: &str) -> Result<()>;

    /// Post one article
    async fn post(&mut self, article: &Article) -> Result<()>;

    /// Fetch a full article by Message-ID
    async fn article(&mut self, message_id: &MessageId) -> Result<Article>;

    /// Fetch headers only
    async fn head(&mut self, message_id: &MessageId) -> Result<Vec<(String, String)>>;

    /// Cheap liveness probe used by the pool on stale sessions
    async fn ping(&mut self) -> Result<()>;

    /// Orderly shutdown
    async fn quit(&mut self) -> Result<()>;
}

/// Opens sessions for the pool
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn NntpSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_headers_complete_and_clean() {
        let subject = UsenetSubject::from_entropy([1; 12]);
        let message_id = MessageId::from_local("abcdefgh12345678").unwrap();
        let article = build_article(
            "poster <poster@ngPost.com>",
            "alt.binaries.misc",
            &subject,
            &message_id,
            vec![1, 2, 3],
        );

        for required in ["From", "Newsgroups", "Subject", "Message-ID", "Date", "Content-Type"] {
            assert!(article.header(required).is_some(), "missing {}", required);
        }
        assert_eq!(article.header("Subject"), Some(subject.as_str()));
        assert_eq!(article.message_id(), Some(message_id));

        // nothing custom sneaks identity onto the wire
        assert!(article.headers.iter().all(|(k, _)| !k.starts_with("X-")));
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let article = Article {
            headers: vec![("subject".to_string(), "VALUE".to_string())],
            body: Vec::new(),
        };
        assert_eq!(article.header("Subject"), Some("VALUE"));
    }
}
