pub mod db;
pub mod graph_store;
pub mod types;
