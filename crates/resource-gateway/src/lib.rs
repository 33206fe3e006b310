//! Resource Gateway
//!
//! Narrow access layer the service controller uses to reach the cluster:
//! Services, plus the `IP`, `NAT` and `Security` custom resources that the
//! firewall-side operators act on.
//!
//! # Example
//!
//! ```no_run
//! use resource_gateway::{KubeGateway, ResourceGateway};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let gateway = KubeGateway::new(client);
//!
//! // Services in a namespace
//! let records = gateway.list_service_records("default").await?;
//!
//! // Request an address for the first of them
//! if let Some(addr) = records.first().and_then(|r| r.first_external_address()) {
//!     gateway.create_allocation(addr, "default", "internet").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod gateway_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeGateway;
pub use error::GatewayError;
pub use models::*;
pub use gateway_trait::ResourceGateway;
#[cfg(feature = "test-util")]
pub use mock::{GatewayCall, MockGateway, Operation};
