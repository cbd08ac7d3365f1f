pub mod auth;
pub mod deferred_settings;
pub mod page;
pub mod storage;
pub mod token_source;

pub use auth::{AuthInputError, BearerToken, NativeSession};
pub use deferred_settings::{DeferredSettings, decode_deferred_settings, encode_deferred_settings};
pub use page::{HeadlessPage, Page, PageEvent, PageLocation};
pub use storage::{ClientStore, JsonFileStore, MemoryStore, StorageError, StorageKey};
pub use token_source::{ResolvedToken, TokenSource, TokenSourceResolver};
