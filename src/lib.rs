//! distkv - a small leader/follower key-value store with a TCP interface
//! 
//! This library provides:
//! - A storage table with upsert semantics, optionally mirrored to a snapshot file
//! - A length-prefixed binary GET/PUT protocol and a client for it
//! - Asynchronous, best-effort replication from one leader to its followers

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod snapshot;
pub mod store;

pub use error::{DistKvError, Result};
pub use config::{Role, StoreConfig};
pub use store::{Entry, Store, Table};
pub use protocol::{Operation, Request, Response, Status};
pub use client::Client;
pub use replication::{ReplicaWorker, Replicator};
pub use server::KvServer;
