//! # swarmq - Download Bundle Queue Core
//!
//! The queue core of a Direct Connect style peer-to-peer file-sharing client.
//! A "bundle" groups the files a user asked to download from remote peers;
//! this crate tracks every active bundle, decides which bundle to search the
//! network for next, and projects the live set into filterable, sortable,
//! windowed views for API sessions.
//!
//! ## Architecture
//!
//! - **Bundle registry**: [`queue`] - token-keyed bundle index plus a
//!   last-segment path index for merge/sub-bundle lookup and remote-directory
//!   matching
//! - **Search scheduler**: [`search`] - priority-banded and recent queues with
//!   weighted-random band selection and adaptive intervals
//! - **View controller**: [`views`] - per-session windowed projections with
//!   incremental JSON diff emission
//! - **Entities**: [`bundle`] - bundle state, priorities, queued/finished items
//! - **Leaf utilities**: [`paths`], [`rng`], [`clock`], [`settings`]
//! - **Share validation**: [`validator`] - skiplist and excluded-path checks
//! - **Events**: [`events`] - broadcast bus for bundle lifecycle
//! - **Error handling**: [`error`] - typed errors per subsystem
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use swarmq::{Bundle, BundleQueue, NullStore, Priority, QueueItem, SearchSettings};
//!
//! let mut queue = BundleQueue::new(SearchSettings::default(), Arc::new(NullStore));
//!
//! // accept a directory bundle and one of its files
//! let bundle = Bundle::directory("token1", "/downloads/Some.Release", Priority::Normal, 0);
//! queue.add_bundle(bundle, 0);
//! queue.add_bundle_item(QueueItem::new("/downloads/Some.Release/file.bin", 1024), "token1");
//!
//! // the path index answers merge questions for new downloads
//! assert!(queue.get_merge_bundle("/downloads/Some.Release/Sub").is_some());
//!
//! // a periodic tick asks the scheduler what to search for next
//! let picked = queue.pick_next_search(1_000, false);
//! assert_eq!(picked.as_deref(), Some("token1"));
//! ```
//!
//! ## Concurrency model
//!
//! The registry (bundles, path index, and scheduler queues) is plain data;
//! embedders wrap it in an `Arc<RwLock<BundleQueue>>` and take the write lock
//! for mutations, the read lock for queries. Each [`views::ListView`] carries
//! its own lock and a dedicated ticker thread; event ingress goes through a
//! separate task queue so producers never wait on a running tick. Never
//! acquire the registry lock while holding a view lock.
//!
//! Time is explicit: every scheduler and recency decision takes a `now_ms`
//! tick argument, with [`clock::now_ms`] as the production source. Randomness
//! is injected through [`rng::BandPicker`], so scheduling is reproducible
//! under test.

/// Bundle entity: priorities, flags, queued/finished items, recency.
pub mod bundle;

/// Process-monotonic tick source.
pub mod clock;

/// Typed errors per subsystem.
pub mod error;

/// Broadcast bus for bundle lifecycle events.
pub mod events;

/// Path predicates and the release sub-directory matcher.
pub mod paths;

/// Bundle registry and path index.
pub mod queue;

/// Injectable weighted sampling.
pub mod rng;

/// Auto-search scheduling.
pub mod search;

/// Queue-wide settings supplied by the embedder.
pub mod settings;

/// Share-path skiplist and exclusion checks.
pub mod validator;

/// Windowed list-view controllers for API sessions.
pub mod views;

pub use bundle::{Bundle, BundleMap, Priority, QueueItem, Token};
pub use error::{ApiError, ApiResult, PersistError, PersistResult, ValidationError, ValidationResult};
pub use events::{EventBus, QueueEvent};
pub use queue::{BundleQueue, DescriptorStore, NullStore, SourceInfo, TargetInfo};
pub use rng::{BandPicker, SequencePicker, WeightedRng};
pub use search::SearchQueues;
pub use settings::SearchSettings;
pub use validator::SharePathValidator;
pub use views::{ChannelSink, ListView, SessionSink};
