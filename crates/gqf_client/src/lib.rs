//! Typed GraphQL operations with reconnectable subscriptions.
//!
//! This crate provides:
//! - `operation`: Classification and request descriptors
//! - `key`: Deterministic operation keys
//! - `session`: The subscription session state machine
//! - `registry`: Sessions shared per key
//! - `transport`: SSE, WebSocket and custom subscription transports
//! - `handler`: Request handlers for queries and mutations
//! - `async_data`: A keyed async-data cache
//! - `client`: The operation factory
//!
//! # Example
//!
//! ```no_run
//! use gqf_client::{ClientConfig, ClientResult, GqfClient, Schema, TransportKind};
//! use gqf_syntax::TypedDocument;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Tick {
//!     tick: u64,
//! }
//!
//! # async fn run() -> ClientResult<()> {
//! let client = GqfClient::new(
//!     Schema::with_endpoint("http://localhost:4000/graphql"),
//!     ClientConfig::default(),
//! )?
//! .with_transport(TransportKind::Ws);
//!
//! let ticks = client.define_subscription(
//!     TypedDocument::<Tick, ()>::parse("subscription { tick }")?,
//!     None,
//! )?;
//! let handle = ticks.subscribe((), None).await?;
//! println!("{:?}", handle.data()?);
//! handle.unsubscribe();
//! # Ok(())
//! # }
//! ```

pub mod async_data;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod key;
pub mod operation;
pub mod registry;
pub mod response;
pub mod schema;
pub mod session;
pub mod transport;
pub mod variables;

pub use async_data::{AsyncData, AsyncDataCache, AsyncDataOptions, AsyncSnapshot, AsyncStatus};
pub use client::{AsyncQuery, GqfClient, IntoDocument, Operation, Subscription, SubscriptionHandle};
pub use config::{ClientConfig, Environment};
pub use context::OperationContext;
pub use error::{ClientError, ClientResult, ErrorCode, ResultExt};
pub use handler::{HttpRequestHandler, RequestHandler};
pub use key::OperationKey;
pub use operation::{classify, OperationDescriptor, RequestDescriptor, SubscriptionDescriptor};
pub use registry::SessionRegistry;
pub use response::{ExecutionResult, GraphQLError};
pub use schema::Schema;
pub use session::{ChangeListener, Session, SessionSnapshot, SessionState, TransportSink};
pub use transport::{SubscriptionTransport, TransportKind};
pub use variables::Variables;
