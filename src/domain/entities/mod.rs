pub mod billing_event;
pub mod billing_subscription;
pub mod entitlement;
pub mod plan;
pub mod subscription_state;
pub mod subscription_status;
