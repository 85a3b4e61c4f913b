pub mod browse;
pub mod clock;
pub mod config;
pub mod control;
pub mod counters;
pub mod db;
pub mod fetch;
pub mod pipeline;
pub mod providers;
pub mod repeats;
pub mod scheduler;
pub mod timeparse;
