//! Fleet metrics console library: a typed client for the monitor backend and
//! a live aggregation layer over its server-push metrics feed.

pub mod aggregate;
pub mod api;
pub mod error;
pub mod poll;
pub mod profiles;
pub mod sse;
pub mod stream;
pub mod types;

pub use aggregate::{AggregateView, FleetAggregate, FleetAverages, RECENT_WINDOW};
pub use api::FleetApi;
pub use error::{ApiError, FeedError};
pub use poll::PollWatch;
pub use stream::{StreamHealth, Subscription};
