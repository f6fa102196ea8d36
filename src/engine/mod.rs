pub mod codex;
pub mod exec;
pub mod schema;
pub mod task;
