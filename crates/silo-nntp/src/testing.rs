//! In-memory NNTP backend for tests
//!
//! Stores posted articles keyed by Message-ID and serves them back,
//! with knobs for simulating missing articles, transient post failures,
//! and corrupted bodies. Engine and coordinator tests drive the real
//! pipelines against this backend; nothing here touches a network.

use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{NntpError, Result};
use crate::session::{Article, NntpSession, SessionFactory};
use silo_core::types::MessageId;

/// Shared in-memory article store
#[derive(Default)]
pub struct MemoryNntp {
    articles: DashMap<String, Article>,
    /// Message-IDs that answer 430 regardless of storage
    gone: DashSet<String>,
    /// Fail this many upcoming posts with a transient 441
    flaky_posts: AtomicU32,
    /// Reject every post with a permanent 502 while set
    reject_posts: std::sync::atomic::AtomicBool,
    pub posts: AtomicU64,
    pub fetches: AtomicU64,
}

impl MemoryNntp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factory handing out sessions over this backend
    pub fn factory(self: &Arc<Self>) -> Arc<dyn SessionFactory> {
        Arc::new(MemoryFactory {
            backend: Arc::clone(self),
        })
    }

    pub fn article_count(&self) -> usize {
        self.articles.len()
    }

    /// Simulate article loss upstream
    pub fn mark_gone(&self, message_id: &MessageId) {
        self.gone.insert(message_id.as_str().to_string());
    }

    /// Flip random body bytes of a stored article
    pub fn corrupt(&self, message_id: &MessageId) {
        if let Some(mut article) = self.articles.get_mut(message_id.as_str()) {
            if let Some(byte) = article.body.first_mut() {
                *byte ^= 0xFF;
            }
        }
    }

    /// Make the next `n` posts fail with a transient error
    pub fn fail_next_posts(&self, n: u32) {
        self.flaky_posts.store(n, Ordering::SeqCst);
    }

    /// Reject all posts with a permanent error until called with false
    pub fn reject_posts(&self, reject: bool) {
        self.reject_posts.store(reject, Ordering::SeqCst);
    }

    pub fn stored_message_ids(&self) -> Vec<String> {
        self.articles.iter().map(|e| e.key().clone()).collect()
    }
}

struct MemoryFactory {
    backend: Arc<MemoryNntp>,
}

#[async_trait::async_trait]
impl SessionFactory for MemoryFactory {
    async fn connect(&self) -> Result<Box<dyn NntpSession>> {
        Ok(Box::new(MemorySession {
            backend: Arc::clone(&self.backend),
        }))
    }
}

struct MemorySession {
    backend: Arc<MemoryNntp>,
}

#[async_trait::async_trait]
impl NntpSession for MemorySession {
    async fn select_group(&mut self, _group: &str) -> Result<()> {
        Ok(())
    }

    async fn post(&mut self, article: &Article) -> Result<()> {
        if self.backend.reject_posts.load(Ordering::SeqCst) {
            return Err(NntpError::Permanent {
                code: 502,
                message: "posting not allowed".to_string(),
            });
        }
        let flaky = &self.backend.flaky_posts;
        if flaky
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(NntpError::Transient {
                code: 441,
                message: "posting failed, try again".to_string(),
            });
        }

        let message_id = article
            .message_id()
            .ok_or_else(|| NntpError::Permanent {
                code: 441,
                message: "missing Message-ID".to_string(),
            })?;
        self.backend.posts.fetch_add(1, Ordering::Relaxed);
        self.backend
            .articles
            .insert(message_id.as_str().to_string(), article.clone());
        Ok(())
    }

    async fn article(&mut self, message_id: &MessageId) -> Result<Article> {
        self.backend.fetches.fetch_add(1, Ordering::Relaxed);
        if self.backend.gone.contains(message_id.as_str()) {
            return Err(NntpError::NotFound(message_id.as_str().to_string()));
        }
        self.backend
            .articles
            .get(message_id.as_str())
            .map(|e| e.value().clone())
            .ok_or_else(|| NntpError::NotFound(message_id.as_str().to_string()))
    }

    async fn head(&mut self, message_id: &MessageId) -> Result<Vec<(String, String)>> {
        if self.backend.gone.contains(message_id.as_str()) {
            return Err(NntpError::NotFound(message_id.as_str().to_string()));
        }
        self.backend
            .articles
            .get(message_id.as_str())
            .map(|e| e.value().headers.clone())
            .ok_or_else(|| NntpError::NotFound(message_id.as_str().to_string()))
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::build_article;
    use silo_core::types::UsenetSubject;

    #[tokio::test]
    async fn test_post_then_fetch() {
        let backend = MemoryNntp::new();
        let mut session = backend.factory().connect().await.unwrap();

        let message_id = MessageId::from_local("abcd1234abcd1234").unwrap();
        let article = build_article(
            "poster <p@ngPost.com>",
            "alt.binaries.misc",
            &UsenetSubject::from_entropy([1; 12]),
            &message_id,
            vec![1, 2, 3],
        );
        session.post(&article).await.unwrap();

        let fetched = session.article(&message_id).await.unwrap();
        assert_eq!(fetched.body, vec![1, 2, 3]);
        assert_eq!(backend.article_count(), 1);
    }

    #[tokio::test]
    async fn test_gone_articles_404() {
        let backend = MemoryNntp::new();
        let mut session = backend.factory().connect().await.unwrap();

        let message_id = MessageId::from_local("abcd1234abcd1234").unwrap();
        let article = build_article(
            "poster <p@ngPost.com>",
            "alt.binaries.misc",
            &UsenetSubject::from_entropy([1; 12]),
            &message_id,
            vec![1],
        );
        session.post(&article).await.unwrap();
        backend.mark_gone(&message_id);

        assert!(matches!(
            session.article(&message_id).await,
            Err(NntpError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_flaky_posts_recover() {
        let backend = MemoryNntp::new();
        backend.fail_next_posts(2);
        let mut session = backend.factory().connect().await.unwrap();

        let message_id = MessageId::from_local("abcd1234abcd1234").unwrap();
        let article = build_article(
            "poster <p@ngPost.com>",
            "alt.binaries.misc",
            &UsenetSubject::from_entropy([1; 12]),
            &message_id,
            vec![1],
        );
        assert!(session.post(&article).await.is_err());
        assert!(session.post(&article).await.is_err());
        assert!(session.post(&article).await.is_ok());
    }
}
