pub mod constants;
pub mod merge;
pub mod ranking;
pub mod streak;
pub mod structures;
pub mod window;
