pub mod cache;
pub mod client;
pub mod codec;
pub mod hostdb;
pub mod resolver;

pub use cache::Cache;
pub use client::{Answer, Client, Family};
pub use codec::Message;
pub use hostdb::{HostDatabase, PortDatabase, Proto};
pub use resolver::{Options, Resolver};
