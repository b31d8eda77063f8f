pub mod agent;
pub mod run;
pub mod setup;
