pub mod backtest;
pub mod budget;
pub mod cache;
pub mod candidates;
pub mod diagnostics;
pub mod pipeline;
pub mod profiles;
pub mod reporter;
pub mod rng;
pub mod scoring;
pub mod settings;
pub mod warm_state;
pub mod worker;
