pub mod args;
pub mod database;
pub mod engine;
pub mod messaging;
pub mod model;
pub mod utils;
