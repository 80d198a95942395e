use crate::backend::{KeyValueStore, MemoryStore, SqliteStore};
use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{LocalRefError, Result};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

/// Per-entity options, fixed when the entity is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Save the entity's subtree to the backend after every mutation
    #[serde(default)]
    pub persist: bool,
}

impl Options {
    pub fn persistent() -> Self {
        Options { persist: true }
    }
}

/// State shared by every entity under one `LocalStore`.
pub(crate) struct Context {
    backend: Rc<dyn KeyValueStore>,
    config: StoreConfig,
    depth: Cell<usize>,
    loading: Cell<usize>,
}

impl Context {
    pub(crate) fn backend(&self) -> &dyn KeyValueStore {
        self.backend.as_ref()
    }

    pub(crate) fn generate_id(&self) -> String {
        self.config.id_strategy.generate()
    }

    /// Enter one level of emission. Fails once `max_emit_depth` is exceeded.
    pub(crate) fn enter(&self) -> Result<EmitScope<'_>> {
        let depth = self.depth.get() + 1;
        if let Some(limit) = self.config.max_emit_depth {
            if depth > limit {
                return Err(LocalRefError::Reentrancy { depth, limit });
            }
        }
        self.depth.set(depth);
        Ok(EmitScope { depth: &self.depth })
    }

    /// Hold back every save until the returned scope drops.
    pub(crate) fn suspend_saves(&self) -> LoadScope<'_> {
        self.loading.set(self.loading.get() + 1);
        LoadScope {
            loading: &self.loading,
        }
    }

    pub(crate) fn saves_suspended(&self) -> bool {
        self.loading.get() > 0
    }
}

pub(crate) struct LoadScope<'a> {
    loading: &'a Cell<usize>,
}

impl Drop for LoadScope<'_> {
    fn drop(&mut self) {
        self.loading.set(self.loading.get() - 1);
    }
}

pub(crate) struct EmitScope<'a> {
    depth: &'a Cell<usize>,
}

impl Drop for EmitScope<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

/// The main entry point for localref.
/// Holds the persistence backend and config, and creates root documents and
/// collections that share them.
pub struct LocalStore {
    ctx: Rc<Context>,
}

impl LocalStore {
    pub fn new(backend: Rc<dyn KeyValueStore>, config: StoreConfig) -> Self {
        LocalStore {
            ctx: Rc::new(Context {
                backend,
                config,
                depth: Cell::new(0),
                loading: Cell::new(0),
            }),
        }
    }

    /// A store whose persistence lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Rc::new(MemoryStore::new()), StoreConfig::default())
    }

    /// Open a store persisted to a SQLite file at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let backend = SqliteStore::open(path.as_ref())?;
        Ok(Self::new(Rc::new(backend), config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.ctx.config
    }

    pub fn backend(&self) -> Rc<dyn KeyValueStore> {
        Rc::clone(&self.ctx.backend)
    }

    /// Create a root document. A persistent root restores any saved state
    /// and writes itself back before returning.
    pub fn document(&self, id: &str, options: Options) -> Result<Document> {
        let doc = Document::root(id, options, Rc::clone(&self.ctx));
        if options.persist {
            doc.restore()?;
            doc.save()?;
        }
        log::debug!("Opened root document {}", doc.path());
        Ok(doc)
    }

    /// Create a root collection. Persistence behaves as for `document`.
    pub fn collection(&self, name: &str, options: Options) -> Result<Collection> {
        let collection = Collection::root(name, options, Rc::clone(&self.ctx));
        if options.persist {
            collection.restore()?;
            collection.save()?;
        }
        log::debug!("Opened root collection {}", collection.path());
        Ok(collection)
    }
}
