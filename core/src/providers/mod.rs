//! Provider ports the core depends on (§6): email, SMS, video, document,
//! notification. One reqwest-backed reference adapter and one logging-only
//! no-op adapter ship per port; a caller may substitute its own
//! implementation of the same trait.

pub mod health;
pub mod http;
pub mod noop;
pub mod ports;

pub use health::{ProviderHealth, ProviderHealthSnapshot};
pub use ports::{
    DocumentPort, DocumentVerificationRequest, DocumentVerificationResult, DocumentVerificationStatus,
    EmailPort, NotificationEvent, NotificationPort, SmsPort, VideoPort, VideoSessionResult,
    VideoSessionState,
};
