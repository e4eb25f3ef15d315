//! Transport adapters
//!
//! Thin wrappers around the host's [`HttpClient`] and [`RealtimeBus`].
//! Every HTTP answer is normalized into an [`Envelope`] here, and every
//! payload shape is checked here, so nothing above this layer ever looks at
//! raw server JSON.

mod bus;
mod envelope;
mod error;
mod http;
mod reqwest_client;
pub mod shapes;

pub use bus::{
    BusConnectionState, BusEvent, BusMessage, RealtimeBus, SubscriptionRegistry,
    SubscriptionToken, Topic,
};
pub use envelope::{ApiClient, ApiRequest, Envelope};
pub use error::TransportError;
pub use http::{HttpClient, HttpMethod, HttpResponse};
pub use reqwest_client::{ReqwestHttpClient, DEFAULT_REQUEST_TIMEOUT};
