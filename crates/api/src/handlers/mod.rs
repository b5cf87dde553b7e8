pub mod findings;
pub mod health;
pub mod jobs;
pub mod system;
