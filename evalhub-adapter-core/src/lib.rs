pub mod adapter;
pub mod callbacks;
pub mod domain;
pub mod logging;
pub mod metrics;
pub mod persister;
pub mod persisters;
pub mod reporter;
pub mod runner;
pub mod settings;
