//! Domain model (IDs, job status, job records, errors).

pub mod errors;
pub mod ids;
pub mod job;
pub mod status;

pub use self::errors::{ContentStoreError, ErrorKind, GazetteError, GenerationError, StoreError};
pub use self::ids::{IdParseError, JobId, OwnerId, PublicJobId};
pub use self::job::{GenerationJob, NewJob, RetryCountChange, StatusUpdate};
pub use self::status::JobStatus;
