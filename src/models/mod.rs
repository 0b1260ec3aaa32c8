mod account;
mod event;
mod license;
mod purchase;
mod subscription;
mod track;

pub use account::{Account, CreateAccount};
pub use event::{EventOutcome, PaymentEvent};
pub use license::{CreateLicense, License};
pub use purchase::{CompletePurchase, CompletionOutcome, Entitlement, Purchase, STATUS_COMPLETED};
pub use subscription::{SubscriptionMirror, SubscriptionUpdate};
pub use track::{CreateTrack, Track, TrackLock};
