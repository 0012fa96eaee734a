/// Content-addressed job identifier (hex digest of the job's parameters).
pub type JobId = String;

/// Number of images a job produces, and the 1-based index of one of them.
pub type ImageIndex = u32;
