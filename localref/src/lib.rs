pub mod backend;
pub mod bus;
pub mod codec;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod path;
pub mod store;

pub use backend::{KeyValueStore, MemoryStore, SqliteStore};
pub use bus::Subscription;
pub use codec::Fields;
pub use collection::{ChangeType, Collection, Comparator, DocumentChange, QuerySnapshot};
pub use config::{IdStrategy, StoreConfig};
pub use document::{Document, DocumentSnapshot};
pub use error::{LocalRefError, Result};
pub use store::{LocalStore, Options};
