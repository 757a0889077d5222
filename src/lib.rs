#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod engine;
pub use engine::{RotationEngine, Selection, SelectionAdvance};

mod orchestrator;
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunMode, RunOutcome};

mod sources;
pub use sources::{FallbackSource, LocalDirSource, POST_EXTENSION};

mod store;
pub use store::{FileStateStore, MemoryScopeLock, MemoryStateStore, ScopeLock};

mod traits;
pub use traits::{
    ContentSource, LoadedState, PublishError, PublishReceipt, Publisher, SourceError, StateStore,
    StoreError,
};

mod types;
pub use types::{
    ContentItem, ItemId, RawContentItem, RotationError, RotationState, ScopeKey, ValidationError,
    MAX_SCOPE_LEN,
};
