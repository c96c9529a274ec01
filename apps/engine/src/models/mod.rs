pub mod job;
pub mod profile;

pub use job::{DocumentPaths, JobRecord, JobStatus, StatusMetadata};
pub use profile::UserProfile;
