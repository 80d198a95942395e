use crate::bus::{Channel, Subscription};
use crate::codec::{self, CollectionBlob, Fields};
use crate::document::{Document, DocumentInner, DocumentSnapshot};
use crate::error::{LocalRefError, Result};
use crate::path;
use crate::store::{Context, Options};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

/// How a document changed between two collection emissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeType,
    pub doc: DocumentSnapshot,
}

/// A collection's documents at one emission, plus the changes that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
    docs: Vec<DocumentSnapshot>,
    changes: Vec<DocumentChange>,
}

impl QuerySnapshot {
    /// Documents in insertion order.
    pub fn docs(&self) -> &[DocumentSnapshot] {
        &self.docs
    }

    pub fn doc_changes(&self) -> &[DocumentChange] {
        &self.changes
    }

    pub fn size(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Comparison operators accepted by `Collection::where`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
    GreaterOrEqual,
    Greater,
    ArrayContains,
}

pub(crate) struct CollectionInner {
    name: String,
    ctx: Rc<Context>,
    parent: Option<Weak<DocumentInner>>,
    state: RefCell<CollectionState>,
    snapshots: Channel<QuerySnapshot>,
}

struct CollectionState {
    options: Options,
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

struct Entry {
    doc: Document,
    /// Whether subscribers have seen an `added` change for this document
    announced: bool,
}

/// A live handle to a named set of documents. Clones share the same collection.
#[derive(Clone)]
pub struct Collection {
    inner: Rc<CollectionInner>,
}

impl Collection {
    pub(crate) fn root(name: &str, options: Options, ctx: Rc<Context>) -> Self {
        Self::build(name, options, None, ctx)
    }

    pub(crate) fn child(name: &str, parent: Weak<DocumentInner>, ctx: Rc<Context>) -> Self {
        Self::build(name, Options::default(), Some(parent), ctx)
    }

    fn build(
        name: &str,
        options: Options,
        parent: Option<Weak<DocumentInner>>,
        ctx: Rc<Context>,
    ) -> Self {
        Collection {
            inner: Rc::new(CollectionInner {
                name: name.to_string(),
                ctx,
                parent,
                state: RefCell::new(CollectionState {
                    options,
                    entries: HashMap::new(),
                    order: Vec::new(),
                }),
                snapshots: Channel::new(),
            }),
        }
    }

    pub(crate) fn from_weak(weak: &Weak<CollectionInner>) -> Option<Collection> {
        weak.upgrade().map(|inner| Collection { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn path(&self) -> String {
        let parent_path = self.parent().map(|d| d.path()).unwrap_or_default();
        path::join(&parent_path, &self.inner.name)
    }

    pub fn options(&self) -> Options {
        self.inner.state.borrow().options
    }

    /// The owning document, or `None` for a root collection.
    pub fn parent(&self) -> Option<Document> {
        self.inner.parent.as_ref().and_then(Document::from_weak)
    }

    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Create a document under a freshly generated id and announce it as `added`.
    pub fn add(&self, fields: Fields) -> Result<Document> {
        let _scope = self.inner.ctx.enter()?;
        let id = self.fresh_id();
        let doc = self.register(&id, true);
        doc.seed(fields);

        self.emit_changes(vec![DocumentChange {
            kind: ChangeType::Added,
            doc: doc.get(),
        }])?;
        Ok(doc)
    }

    /// Typed variant of `add`. `data` must serialize to a JSON object.
    pub fn add_data<T: Serialize>(&self, data: &T) -> Result<Document> {
        self.add(codec::to_fields(data)?)
    }

    /// Get or create the document with this id. A created document is empty
    /// and stays invisible to subscribers until its first write, which is
    /// then reported as `added`.
    pub fn doc(&self, id: &str) -> Document {
        if let Some(entry) = self.inner.state.borrow().entries.get(id) {
            return entry.doc.clone();
        }
        self.register(id, false)
    }

    /// Live handles for every visible document, in insertion order.
    pub fn documents(&self) -> Vec<Document> {
        let state = self.inner.state.borrow();
        state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id))
            .filter(|entry| entry.announced)
            .map(|entry| entry.doc.clone())
            .collect()
    }

    /// The current documents with an empty change list. No side effects.
    pub fn get(&self) -> QuerySnapshot {
        QuerySnapshot {
            docs: self.visible_snapshots(),
            changes: Vec::new(),
        }
    }

    /// Register for every future snapshot. Before this returns, `callback`
    /// receives one snapshot listing every current document as `added`.
    pub fn on_snapshot<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QuerySnapshot) + 'static,
    {
        let callback: Rc<dyn Fn(&QuerySnapshot)> = Rc::new(callback);
        let subscription = self.inner.snapshots.subscribe_rc(Rc::clone(&callback));

        let docs = self.visible_snapshots();
        let changes = docs
            .iter()
            .map(|doc| DocumentChange {
                kind: ChangeType::Added,
                doc: doc.clone(),
            })
            .collect();
        callback(&QuerySnapshot { docs, changes });
        subscription
    }

    /// Reserved for filtered views.
    ///
    /// **This does not filter.** It returns this same collection, unfiltered,
    /// whatever the arguments. Callers needing a subset must filter
    /// `QuerySnapshot::docs` themselves.
    pub fn r#where(
        &self,
        field: &str,
        comparator: Comparator,
        value: serde_json::Value,
    ) -> Collection {
        log::warn!(
            "where({field} {comparator:?} {value}) is not implemented; {} is returned unfiltered",
            self.path()
        );
        self.clone()
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Serialized subtree. Documents created by `doc` but never written are
    /// left out unless something below them holds data; those are marked
    /// pending so a reload keeps them unannounced.
    pub fn to_blob(&self) -> CollectionBlob {
        let (options, entries) = {
            let state = self.inner.state.borrow();
            let entries: Vec<(Document, bool)> = state
                .order
                .iter()
                .filter_map(|id| state.entries.get(id))
                .map(|entry| (entry.doc.clone(), entry.announced))
                .collect();
            (state.options, entries)
        };

        let mut documents = BTreeMap::new();
        for (doc, announced) in entries {
            let mut blob = doc.to_blob();
            if !announced {
                if blob.is_empty() {
                    continue;
                }
                blob.pending = true;
            }
            documents.insert(doc.id().to_string(), blob);
        }
        CollectionBlob { options, documents }
    }

    pub fn encode(&self) -> Result<String> {
        codec::encode_collection(&self.to_blob())
    }

    /// Write this collection's subtree under its path.
    pub fn save(&self) -> Result<()> {
        let path = self.path();
        let raw = self.encode()?;
        self.inner.ctx.backend().set(&path, &raw)?;
        log::debug!("Saved collection {path} ({} bytes)", raw.len());
        Ok(())
    }

    /// Restore the subtree saved under this collection's path, then save it
    /// once through the persist chain. Absent or unreadable data leaves the
    /// collection untouched. A document stored at this path is an error.
    pub fn load(&self) -> Result<()> {
        if self.restore()? {
            self.persist_chain()?;
        }
        Ok(())
    }

    /// Apply the saved blob with saves held back. Returns whether anything
    /// was applied.
    pub(crate) fn restore(&self) -> Result<bool> {
        let path = self.path();
        let Some(raw) = self.inner.ctx.backend().get(&path)? else {
            return Ok(false);
        };

        match codec::decode_collection(&raw) {
            Ok(blob) => {
                log::debug!("Loading collection {path} ({} documents)", blob.documents.len());
                let _loading = self.inner.ctx.suspend_saves();
                self.apply_blob(blob)?;
                Ok(true)
            }
            Err(_) if codec::decode_document(&raw).is_ok() => {
                Err(LocalRefError::KindMismatch {
                    path,
                    expected: "collection",
                    found: "document",
                })
            }
            Err(e) => {
                log::warn!("Ignoring unreadable collection blob at {path}: {e}");
                Ok(false)
            }
        }
    }

    pub(crate) fn apply_blob(&self, blob: CollectionBlob) -> Result<()> {
        for (id, doc_blob) in blob.documents {
            self.doc(&id).apply_blob(doc_blob)?;
        }
        Ok(())
    }

    /// Save this collection if it is persistent, then every persistent ancestor.
    pub(crate) fn persist_chain(&self) -> Result<()> {
        if self.inner.ctx.saves_suspended() {
            return Ok(());
        }
        if self.options().persist {
            self.save()?;
        }
        if let Some(parent) = self.parent() {
            parent.persist_chain()?;
        }
        Ok(())
    }

    // ── Child bookkeeping ───────────────────────────────────────────

    fn fresh_id(&self) -> String {
        loop {
            let id = self.inner.ctx.generate_id();
            if !self.inner.state.borrow().entries.contains_key(&id) {
                return id;
            }
            log::warn!("Generated id {id} already exists in {}; retrying", self.path());
        }
    }

    fn register(&self, id: &str, announced: bool) -> Document {
        let doc = Document::child(id, Rc::downgrade(&self.inner), Rc::clone(&self.inner.ctx));

        let weak = Rc::downgrade(&self.inner);
        doc.subscribe_snapshots(move |snapshot| {
            if let Some(collection) = Collection::from_weak(&weak) {
                collection.handle_child_snapshot(snapshot);
            }
        });
        let weak = Rc::downgrade(&self.inner);
        doc.on_delete(move |snapshot| {
            if let Some(collection) = Collection::from_weak(&weak) {
                collection.handle_child_delete(snapshot);
            }
        });

        let mut state = self.inner.state.borrow_mut();
        state.entries.insert(
            id.to_string(),
            Entry {
                doc: doc.clone(),
                announced,
            },
        );
        state.order.push(id.to_string());
        doc
    }

    fn handle_child_snapshot(&self, snapshot: &DocumentSnapshot) {
        let kind = {
            let mut state = self.inner.state.borrow_mut();
            match state.entries.get_mut(snapshot.id()) {
                Some(entry) if entry.announced => ChangeType::Modified,
                Some(entry) => {
                    entry.announced = true;
                    ChangeType::Added
                }
                None => return,
            }
        };

        let change = DocumentChange {
            kind,
            doc: snapshot.clone(),
        };
        if let Err(e) = self.emit_changes(vec![change]) {
            log::warn!(
                "Collection {} failed to publish {kind:?} for {}: {e}",
                self.path(),
                snapshot.id()
            );
        }
    }

    fn handle_child_delete(&self, snapshot: &DocumentSnapshot) {
        let removed = {
            let mut state = self.inner.state.borrow_mut();
            let removed = state.entries.remove(snapshot.id());
            if removed.is_some() {
                state.order.retain(|id| id != snapshot.id());
            }
            removed
        };
        let Some(entry) = removed else {
            return;
        };

        // Subscribers never saw it, so there is nothing to retract
        let result = if entry.announced {
            self.emit_changes(vec![DocumentChange {
                kind: ChangeType::Deleted,
                doc: snapshot.clone(),
            }])
        } else {
            self.persist_chain()
        };
        if let Err(e) = result {
            log::warn!(
                "Collection {} failed to publish deletion of {}: {e}",
                self.path(),
                snapshot.id()
            );
        }
    }

    fn visible_snapshots(&self) -> Vec<DocumentSnapshot> {
        self.documents().iter().map(Document::get).collect()
    }

    fn emit_changes(&self, changes: Vec<DocumentChange>) -> Result<()> {
        self.persist_chain()?;
        let snapshot = QuerySnapshot {
            docs: self.visible_snapshots(),
            changes,
        };
        let delivered = self.inner.snapshots.emit(&snapshot);
        log::trace!(
            "Collection {} emitted {} change(s) to {delivered} listener(s)",
            self.path(),
            snapshot.changes.len()
        );
        Ok(())
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("path", &self.path())
            .field("documents", &self.inner.state.borrow().order.len())
            .finish()
    }
}
