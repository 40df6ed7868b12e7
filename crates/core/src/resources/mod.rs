//! Shipped resource kinds.
//!
//! Both kinds use provider `aws` and talk to the network through
//! [`NetworkApi`], so they run against [`SimulatedNetwork`] or any other
//! implementation the registry is built with.

mod network;
mod security_group;
mod security_ingress;

pub use network::{IngressRule, NetworkApi, NetworkOperation, SecurityGroupInfo, SimulatedNetwork};
pub use security_group::SecurityGroup;
pub use security_ingress::SecurityGroupIngress;
