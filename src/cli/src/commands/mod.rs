pub mod agent;
pub mod events;
pub mod migrate;
