pub mod checkout;
pub mod contracts;
pub mod webhooks;
