//! Quota change notifications and their conversion into reconcile requests.
//!
//! # Module Structure
//!
//! - [`events`]: typed notifications and the request verb
//! - [`feed`]: the change feed consumed by the controller
//! - [`filter`]: suffix-tag relevance filter
//! - [`request`]: the reconcile request queued per quota name

pub mod events;
pub mod feed;
pub mod filter;
pub mod request;

pub use events::{FeedEvent, Notification, UnknownVerb, Verb};
pub use feed::{
    ChangeFeed, ChannelFeed, FeedError, FeedSender, channel_feed, decode_line, forward_lines,
};
pub use filter::{DEFAULT_SUFFIXES, EventFilter};
pub use request::Request;
