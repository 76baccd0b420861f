pub mod cancel;
pub mod config;
pub mod error;
pub mod filter;
pub mod lease;
pub mod pool;
pub mod progress;
pub mod retention;
pub mod snapshot;

pub use cancel::CancelToken;
pub use config::{Config, PackageDescriptor, RepositoryDescriptor};
pub use error::{Error, Result};
pub use lease::{Lease, LeaseCollector, ScratchSession};
pub use progress::{Progress, ProgressHandler, ProgressStep};
pub use retention::RetentionPolicy;
pub use snapshot::{PreSnapshot, Snapshot};
