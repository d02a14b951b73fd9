pub mod db;
pub mod db_structs;
pub mod error;
pub mod extract;
pub mod persist;
pub mod reward_queue;
