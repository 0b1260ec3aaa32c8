mod stripe;

pub use stripe::{
    StripeCheckoutSession, StripeClient, StripeInvoice, StripeMetadata, StripeSubscription,
    StripeWebhookEvent,
};
