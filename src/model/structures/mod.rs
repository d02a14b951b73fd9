pub mod entry_status;
pub mod job_status;
pub mod rating_level;
pub mod scope;
