pub mod billing_processor;
pub mod clock;
pub mod profile_store;
