//! Documents, local store references and the callbacks the engine invokes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A local data store the engine replicates.
///
/// The facade only hands this reference to the engine; it never reads or
/// writes through it.
pub trait Database: Send + Sync + fmt::Debug {
    /// Returns the database name.
    fn name(&self) -> &str;

    /// Returns true if the database can still be used by an engine.
    fn is_open(&self) -> bool;

    /// Returns `self` for engines that downcast to their own store type.
    fn as_any(&self) -> &dyn Any;
}

/// Shared reference to a local data store.
pub type DatabaseRef = Arc<dyn Database>;

/// A document revision as seen by filters and conflict resolvers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Document ID.
    pub id: String,
    /// Revision ID.
    pub revision: String,
    /// Document body.
    pub body: Vec<u8>,
    /// Channels the document is routed to.
    pub channels: Vec<String>,
}

impl Document {
    /// Creates a new document with no channels.
    pub fn new(id: impl Into<String>, revision: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            revision: revision.into(),
            body: body.into(),
            channels: Vec::new(),
        }
    }

    /// Sets the channels.
    #[must_use]
    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }
}

/// Opaque caller value passed to every callback invocation.
#[derive(Clone, Default)]
pub struct ReplicationContext(Option<Arc<dyn Any + Send + Sync>>);

impl ReplicationContext {
    /// Wraps a caller value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Returns an empty context.
    pub fn empty() -> Self {
        Self(None)
    }

    /// Returns the value if it has type `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns true if no value is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn same_as(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ReplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReplicationContext")
            .field(&if self.0.is_some() { "set" } else { "empty" })
            .finish()
    }
}

/// Decides whether a document is replicated.
///
/// Called by the engine, possibly from its own worker threads. Must return
/// promptly.
pub trait ReplicationFilter: Send + Sync {
    /// Returns true to replicate the document.
    fn allow(&self, context: &ReplicationContext, document: &Document, is_deleted: bool) -> bool;
}

impl<F> ReplicationFilter for F
where
    F: Fn(&ReplicationContext, &Document, bool) -> bool + Send + Sync,
{
    fn allow(&self, context: &ReplicationContext, document: &Document, is_deleted: bool) -> bool {
        self(context, document, is_deleted)
    }
}

/// Chooses the winning revision when local and remote diverge.
///
/// `None` for either side means that side is deleted. Returning `None`
/// resolves the conflict as a deletion.
pub trait ConflictResolver: Send + Sync {
    /// Resolves a conflict for `document_id`.
    fn resolve(
        &self,
        context: &ReplicationContext,
        document_id: &str,
        local: Option<&Document>,
        remote: Option<&Document>,
    ) -> Option<Document>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&ReplicationContext, &str, Option<&Document>, Option<&Document>) -> Option<Document>
        + Send
        + Sync,
{
    fn resolve(
        &self,
        context: &ReplicationContext,
        document_id: &str,
        local: Option<&Document>,
        remote: Option<&Document>,
    ) -> Option<Document> {
        self(context, document_id, local, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_downcast() {
        let ctx = ReplicationContext::new(42u32);
        assert_eq!(ctx.get::<u32>(), Some(&42));
        assert_eq!(ctx.get::<String>(), None);
        assert!(!ctx.is_empty());
        assert!(ReplicationContext::empty().is_empty());
    }

    #[test]
    fn context_identity() {
        let a = ReplicationContext::new("x");
        let b = a.clone();
        let c = ReplicationContext::new("x");
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert!(ReplicationContext::empty().same_as(&ReplicationContext::empty()));
    }

    #[test]
    fn closures_are_callbacks() {
        let filter = |_: &ReplicationContext, doc: &Document, deleted: bool| {
            !deleted && doc.id.starts_with("user:")
        };
        let ctx = ReplicationContext::empty();
        let doc = Document::new("user:1", "1-a", b"{}".to_vec());
        assert!(filter.allow(&ctx, &doc, false));
        assert!(!filter.allow(&ctx, &doc, true));

        let resolver = |_: &ReplicationContext,
                        _: &str,
                        _: Option<&Document>,
                        remote: Option<&Document>| remote.cloned();
        let remote = Document::new("user:1", "2-b", b"{}".to_vec()).with_channels(["a"]);
        let resolved = resolver.resolve(&ctx, "user:1", Some(&doc), Some(&remote));
        assert_eq!(resolved, Some(remote));
    }
}
