// Document entity - field map, lazy sub-collections, snapshot listeners

use crate::bus::{Channel, Subscription};
use crate::codec::{self, DocumentBlob, Fields};
use crate::collection::{Collection, CollectionInner};
use crate::error::{LocalRefError, Result};
use crate::path;
use crate::store::{Context, Options};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

/// Synthesized identity key in `DocumentSnapshot::to_json`.
pub const ID_KEY: &str = "_id";
/// Reserved for view layers that attach a live reference to each row.
pub const REF_KEY: &str = "_ref";
/// Keys that are never stored in a document's fields.
pub const RESERVED_KEYS: [&str; 2] = [ID_KEY, REF_KEY];

pub(crate) struct DocumentInner {
    id: String,
    ctx: Rc<Context>,
    parent: Option<Weak<CollectionInner>>,
    state: RefCell<DocumentState>,
    snapshots: Channel<DocumentSnapshot>,
    deletes: Channel<DocumentSnapshot>,
}

struct DocumentState {
    fields: Fields,
    options: Options,
    subcollections: BTreeMap<String, Collection>,
    update_time: Option<DateTime<Utc>>,
    deleted: bool,
}

/// A live handle to a single keyed record. Clones share the same document.
#[derive(Clone)]
pub struct Document {
    inner: Rc<DocumentInner>,
}

impl Document {
    pub(crate) fn root(id: &str, options: Options, ctx: Rc<Context>) -> Self {
        Self::build(id, options, None, ctx)
    }

    pub(crate) fn child(id: &str, parent: Weak<CollectionInner>, ctx: Rc<Context>) -> Self {
        Self::build(id, Options::default(), Some(parent), ctx)
    }

    fn build(
        id: &str,
        options: Options,
        parent: Option<Weak<CollectionInner>>,
        ctx: Rc<Context>,
    ) -> Self {
        Document {
            inner: Rc::new(DocumentInner {
                id: id.to_string(),
                ctx,
                parent,
                state: RefCell::new(DocumentState {
                    fields: Fields::new(),
                    options,
                    subcollections: BTreeMap::new(),
                    update_time: None,
                    deleted: false,
                }),
                snapshots: Channel::new(),
                deletes: Channel::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<DocumentInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &Weak<DocumentInner>) -> Option<Document> {
        weak.upgrade().map(|inner| Document { inner })
    }

    /// Write initial fields without emitting. Used by `Collection::add`,
    /// which announces the document itself.
    pub(crate) fn seed(&self, fields: Fields) {
        let mut state = self.inner.state.borrow_mut();
        state.fields = strip_reserved(fields);
        state.update_time = Some(Utc::now());
    }

    /// Parent hook: no initial delivery, unlike `on_snapshot`.
    pub(crate) fn subscribe_snapshots<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DocumentSnapshot) + 'static,
    {
        self.inner.snapshots.subscribe(callback)
    }

    /// Observe the terminal delete event.
    pub fn on_delete<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DocumentSnapshot) + 'static,
    {
        self.inner.deletes.subscribe(callback)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Persistence key, recomputed from the parent chain on every call.
    pub fn path(&self) -> String {
        let parent_path = self.parent().map(|c| c.path()).unwrap_or_default();
        path::join(&parent_path, &self.inner.id)
    }

    pub fn options(&self) -> Options {
        self.inner.state.borrow().options
    }

    /// The owning collection, or `None` for a root document.
    pub fn parent(&self) -> Option<Collection> {
        self.inner.parent.as_ref().and_then(Collection::from_weak)
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.state.borrow().deleted
    }

    /// True when both handles refer to the same document instance.
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The current state. No side effects.
    pub fn get(&self) -> DocumentSnapshot {
        let path = self.path();
        let state = self.inner.state.borrow();
        DocumentSnapshot {
            id: self.inner.id.clone(),
            path,
            fields: Rc::new(state.fields.clone()),
            update_time: state.update_time,
            reference: Rc::downgrade(&self.inner),
        }
    }

    /// Replace all fields.
    pub fn set(&self, fields: Fields) -> Result<()> {
        self.ensure_live()?;
        let _scope = self.inner.ctx.enter()?;
        {
            let mut state = self.inner.state.borrow_mut();
            state.fields = strip_reserved(fields);
            state.update_time = Some(Utc::now());
        }
        self.emit_snapshot()
    }

    /// Shallow-merge `partial` into the existing fields.
    pub fn update(&self, partial: Fields) -> Result<()> {
        self.ensure_live()?;
        let _scope = self.inner.ctx.enter()?;
        {
            let mut state = self.inner.state.borrow_mut();
            for (key, value) in strip_reserved(partial) {
                state.fields.insert(key, value);
            }
            state.update_time = Some(Utc::now());
        }
        self.emit_snapshot()
    }

    /// Typed variant of `set`. `data` must serialize to a JSON object.
    pub fn set_data<T: Serialize>(&self, data: &T) -> Result<()> {
        self.set(codec::to_fields(data)?)
    }

    /// Typed variant of `update`. `data` must serialize to a JSON object.
    pub fn update_data<T: Serialize>(&self, data: &T) -> Result<()> {
        self.update(codec::to_fields(data)?)
    }

    /// Deliver the terminal delete event, drop every listener and remove the
    /// persisted blob. The handle must not be mutated afterwards; doing so
    /// returns `LocalRefError::Deleted`.
    pub fn delete(&self) -> Result<()> {
        self.ensure_live()?;
        let _scope = self.inner.ctx.enter()?;
        let path = self.path();
        let snapshot = self.get();
        self.inner.state.borrow_mut().deleted = true;

        self.inner.deletes.emit(&snapshot);
        self.inner.snapshots.clear();
        self.inner.deletes.clear();

        self.inner.ctx.backend().delete(&path)?;
        log::debug!("Deleted document {path}");
        Ok(())
    }

    /// The named sub-collection, created empty and non-persistent on first use.
    pub fn collection(&self, name: &str) -> Collection {
        if let Some(existing) = self.inner.state.borrow().subcollections.get(name) {
            return existing.clone();
        }

        let collection = Collection::child(name, self.downgrade(), Rc::clone(&self.inner.ctx));
        self.inner
            .state
            .borrow_mut()
            .subcollections
            .insert(name.to_string(), collection.clone());
        collection
    }

    /// Register for every future snapshot. The current snapshot is delivered
    /// to `callback` before this returns.
    pub fn on_snapshot<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DocumentSnapshot) + 'static,
    {
        let callback: Rc<dyn Fn(&DocumentSnapshot)> = Rc::new(callback);
        let subscription = self.inner.snapshots.subscribe_rc(Rc::clone(&callback));
        callback(&self.get());
        subscription
    }

    // ── Persistence ─────────────────────────────────────────────────

    pub fn to_blob(&self) -> DocumentBlob {
        let (fields, options, subcollections) = {
            let state = self.inner.state.borrow();
            (
                state.fields.clone(),
                state.options,
                state.subcollections.clone(),
            )
        };

        DocumentBlob {
            fields,
            options,
            subcollections: subcollections
                .iter()
                .map(|(name, collection)| (name.clone(), collection.to_blob()))
                .collect(),
            pending: false,
        }
    }

    pub fn encode(&self) -> Result<String> {
        codec::encode_document(&self.to_blob())
    }

    /// Write this document's subtree under its path.
    pub fn save(&self) -> Result<()> {
        let path = self.path();
        let raw = self.encode()?;
        self.inner.ctx.backend().set(&path, &raw)?;
        log::debug!("Saved document {path} ({} bytes)", raw.len());
        Ok(())
    }

    /// Restore the subtree saved under this document's path, then save it
    /// once through the persist chain. Absent or unreadable data leaves the
    /// document untouched. A collection stored at this path is an error.
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

        match codec::decode_document(&raw) {
            Ok(blob) => {
                log::debug!("Loading document {path}");
                let _loading = self.inner.ctx.suspend_saves();
                self.apply_blob(blob)?;
                Ok(true)
            }
            Err(_) if codec::decode_collection(&raw).is_ok() => {
                Err(LocalRefError::KindMismatch {
                    path,
                    expected: "document",
                    found: "collection",
                })
            }
            Err(e) => {
                log::warn!("Ignoring unreadable document blob at {path}: {e}");
                Ok(false)
            }
        }
    }

    /// Rebuild sub-collections first, then apply fields through `update` so
    /// listeners see the same events as a live write. A pending document only
    /// gets its sub-collections back and stays unannounced.
    pub(crate) fn apply_blob(&self, blob: DocumentBlob) -> Result<()> {
        for (name, collection_blob) in blob.subcollections {
            self.collection(&name).apply_blob(collection_blob)?;
        }
        if blob.pending {
            return Ok(());
        }
        self.update(blob.fields)
    }

    /// Save this document if it is persistent, then every persistent ancestor.
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

    fn ensure_live(&self) -> Result<()> {
        if self.is_deleted() {
            return Err(LocalRefError::Deleted { path: self.path() });
        }
        Ok(())
    }

    fn emit_snapshot(&self) -> Result<()> {
        if self.options().persist && !self.inner.ctx.saves_suspended() {
            self.save()?;
        }
        let snapshot = self.get();
        let delivered = self.inner.snapshots.emit(&snapshot);
        log::trace!("Document {} emitted to {delivered} listener(s)", snapshot.path);
        Ok(())
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("path", &self.path())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

fn strip_reserved(mut fields: Fields) -> Fields {
    for key in RESERVED_KEYS {
        if fields.remove(key).is_some() {
            log::debug!("Dropped reserved key '{key}' from document fields");
        }
    }
    fields
}

/// A point-in-time view of a document.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    id: String,
    path: String,
    fields: Rc<Fields>,
    update_time: Option<DateTime<Utc>>,
    reference: Weak<DocumentInner>,
}

impl DocumentSnapshot {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// An owned copy of the fields; mutating it never touches the store.
    pub fn data(&self) -> Fields {
        self.fields.as_ref().clone()
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// Deserialize the fields into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(serde_json::Value::Object(self.data()))?)
    }

    /// When the document was last written. `None` if it never was.
    pub fn update_time(&self) -> Option<DateTime<Utc>> {
        self.update_time
    }

    pub fn exists(&self) -> bool {
        self.update_time.is_some()
    }

    /// The live document, while anything still holds it.
    pub fn reference(&self) -> Option<Document> {
        Document::from_weak(&self.reference)
    }

    /// Fields plus the synthesized `_id` key, as a view layer would render a row.
    pub fn to_json(&self) -> serde_json::Value {
        let mut row = Fields::new();
        row.insert(ID_KEY.to_string(), serde_json::Value::String(self.id.clone()));
        for (key, value) in self.fields.iter() {
            row.insert(key.clone(), value.clone());
        }
        serde_json::Value::Object(row)
    }
}

impl PartialEq for DocumentSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.path == other.path
            && self.fields == other.fields
            && self.update_time == other.update_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;
    use std::cell::Cell;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn setup_doc(id: &str) -> (LocalStore, Document) {
        let store = LocalStore::in_memory();
        let doc = store.document(id, Options::default()).unwrap();
        (store, doc)
    }

    fn record(doc: &Document) -> (Rc<RefCell<Vec<DocumentSnapshot>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let sub = doc.on_snapshot(move |snap| s.borrow_mut().push(snap.clone()));
        (seen, sub)
    }

    #[test]
    fn test_set_then_get_returns_copy() {
        let (_store, doc) = setup_doc("profile");
        let data = fields(json!({ "name": "Alice", "tags": ["a", "b"], "nested": { "x": 1 } }));
        doc.set(data.clone()).unwrap();

        let mut copy = doc.get().data();
        assert_eq!(copy, data);

        copy.insert("name".into(), json!("Mallory"));
        assert_eq!(doc.get().get("name"), Some(&json!("Alice")));
    }

    #[test]
    fn test_set_replaces_all_fields() {
        let (_store, doc) = setup_doc("profile");
        doc.set(fields(json!({ "a": 1, "b": 2 }))).unwrap();
        doc.set(fields(json!({ "c": 3 }))).unwrap();
        assert_eq!(doc.get().data(), fields(json!({ "c": 3 })));
    }

    #[test]
    fn test_update_is_shallow_merge() {
        let (_store, doc) = setup_doc("profile");
        doc.set(fields(json!({ "name": "Alice", "address": { "city": "Oslo", "zip": "0150" } })))
            .unwrap();
        doc.update(fields(json!({ "address": { "city": "Bergen" }, "age": 30 })))
            .unwrap();

        assert_eq!(
            doc.get().data(),
            fields(json!({ "name": "Alice", "address": { "city": "Bergen" }, "age": 30 }))
        );
    }

    #[test]
    fn test_counter_update_reaches_subscriber() {
        let (_store, counter) = setup_doc("counter");
        counter.set(fields(json!({ "count": 0 }))).unwrap();
        let (seen, _sub) = record(&counter);

        counter.update(fields(json!({ "count": 1 }))).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].get("count"), Some(&json!(0)));
        assert_eq!(seen[1].get("count"), Some(&json!(1)));
    }

    #[test]
    fn test_on_snapshot_delivers_current_state_synchronously() {
        let (_store, doc) = setup_doc("counter");
        doc.set(fields(json!({ "count": 7 }))).unwrap();

        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        doc.on_snapshot(move |snap| {
            assert_eq!(snap.get("count"), Some(&json!(7)));
            c.set(c.get() + 1);
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_callbacks_only_for_that_subscriber() {
        let (_store, doc) = setup_doc("counter");
        let (first, first_sub) = record(&doc);
        let (second, _second_sub) = record(&doc);

        first_sub.unsubscribe();
        doc.set(fields(json!({ "count": 1 }))).unwrap();
        doc.set(fields(json!({ "count": 2 }))).unwrap();

        assert_eq!(first.borrow().len(), 1);
        assert_eq!(second.borrow().len(), 3);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let (_store, doc) = setup_doc("counter");
        let calls = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let c = Rc::clone(&calls);
        let s = Rc::clone(&slot);
        let sub = doc.on_snapshot(move |_| {
            c.set(c.get() + 1);
            if let Some(sub) = s.borrow().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.borrow_mut() = Some(sub);

        doc.update(fields(json!({ "a": 1 }))).unwrap();
        doc.update(fields(json!({ "a": 2 }))).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_collection_is_idempotent() {
        let (_store, doc) = setup_doc("user");
        let a = doc.collection("posts");
        let b = doc.collection("posts");
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&doc.collection("drafts")));
        assert!(!a.options().persist);
    }

    #[test]
    fn test_paths_follow_parent_chain() {
        let (store, doc) = setup_doc("alice");
        assert_eq!(doc.path(), "/alice");

        let post = doc.collection("posts").doc("p1");
        assert_eq!(post.path(), "/alice/posts/p1");

        let users = store.collection("users", Options::default()).unwrap();
        assert_eq!(users.doc("bob").collection("posts").path(), "/users/bob/posts");
        assert!(post.parent().unwrap().parent().unwrap().ptr_eq(&doc));
    }

    #[test]
    fn test_delete_emits_terminal_event_and_detaches() {
        let (_store, doc) = setup_doc("counter");
        doc.set(fields(json!({ "count": 3 }))).unwrap();
        let (seen, sub) = record(&doc);

        let deleted = Rc::new(RefCell::new(None));
        let d = Rc::clone(&deleted);
        doc.on_delete(move |snap| *d.borrow_mut() = Some(snap.clone()));

        doc.delete().unwrap();

        let last = deleted.borrow().clone().unwrap();
        assert_eq!(last.get("count"), Some(&json!(3)));
        assert!(!sub.is_active());
        assert!(doc.is_deleted());
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_mutation_after_delete_is_state_error() {
        let (_store, doc) = setup_doc("gone");
        doc.delete().unwrap();

        assert!(matches!(
            doc.set(Fields::new()),
            Err(LocalRefError::Deleted { ref path }) if path == "/gone"
        ));
        assert!(matches!(doc.update(Fields::new()), Err(LocalRefError::Deleted { .. })));
        assert!(matches!(doc.delete(), Err(LocalRefError::Deleted { .. })));
    }

    #[test]
    fn test_reserved_keys_are_not_stored() {
        let (_store, doc) = setup_doc("row");
        doc.set(fields(json!({ "_id": "spoofed", "_ref": null, "name": "milk" })))
            .unwrap();

        assert_eq!(doc.get().data(), fields(json!({ "name": "milk" })));
        assert_eq!(doc.get().to_json(), json!({ "_id": "row", "name": "milk" }));
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        count: i64,
    }

    #[test]
    fn test_typed_data_round_trip() {
        let (_store, doc) = setup_doc("counter");
        doc.set_data(&Counter { count: 2 }).unwrap();
        doc.update_data(&Counter { count: 9 }).unwrap();

        let counter: Counter = doc.get().data_as().unwrap();
        assert_eq!(counter, Counter { count: 9 });
    }

    #[test]
    fn test_typed_data_must_be_object() {
        let (_store, doc) = setup_doc("counter");
        assert!(matches!(doc.set_data(&42), Err(LocalRefError::NotAnObject)));
    }

    #[test]
    fn test_snapshot_metadata() {
        let (_store, doc) = setup_doc("counter");
        let before = doc.get();
        assert!(!before.exists());
        assert!(before.update_time().is_none());

        doc.set(fields(json!({ "count": 1 }))).unwrap();
        let after = doc.get();
        assert!(after.exists());
        assert!(after.reference().unwrap().ptr_eq(&doc));
        assert_eq!(after.path(), "/counter");
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let (_store, doc) = setup_doc("counter");
        doc.set(fields(json!({ "count": 1 }))).unwrap();
        let old = doc.get();
        doc.set(fields(json!({ "count": 2 }))).unwrap();
        assert_eq!(old.get("count"), Some(&json!(1)));
    }

    #[test]
    fn test_encode_then_apply_into_fresh_document() {
        let (_store, doc) = setup_doc("list");
        doc.set(fields(json!({ "title": "groceries" }))).unwrap();
        let items = doc.collection("items");
        items.doc("a").set(fields(json!({ "name": "milk" }))).unwrap();
        items
            .doc("a")
            .collection("notes")
            .doc("n1")
            .set(fields(json!({ "text": "2%" })))
            .unwrap();

        let raw = doc.encode().unwrap();

        let (_other, fresh) = setup_doc("list");
        fresh.apply_blob(codec::decode_document(&raw).unwrap()).unwrap();

        assert_eq!(fresh.get().data(), doc.get().data());
        assert_eq!(fresh.to_blob(), doc.to_blob());
        assert_eq!(
            fresh
                .collection("items")
                .doc("a")
                .collection("notes")
                .doc("n1")
                .get()
                .get("text"),
            Some(&json!("2%"))
        );
    }

    #[test]
    fn test_reentrant_update_from_callback() {
        let (_store, doc) = setup_doc("counter");
        let target = doc.clone();
        doc.on_snapshot(move |snap| {
            let count = snap.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
            if count < 3 {
                target.update(fields(json!({ "count": count + 1 }))).unwrap();
            }
        });
        assert_eq!(doc.get().get("count"), Some(&json!(3)));
    }
}
