pub mod customer_handle;
pub mod payment_method;
pub mod plan_transition;
pub mod trial_policy;
pub mod webhook_reconciler;
