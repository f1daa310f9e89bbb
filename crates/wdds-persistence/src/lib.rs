// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! wdds persistence backend
//!
//! Provides PERSISTENT durability QoS support for wdds writers through a
//! SQLite-backed implementation of [`wdds::PersistenceStore`]. Samples are
//! keyed by (writer GUID, sequence number); on writer restart the store is
//! read in sequence order and loaded into the writer history before the
//! writer is enabled.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wdds::{DataWriterBuilder, QoS, TopicKind};
//! use wdds_persistence::SqliteStore;
//!
//! let store = Arc::new(SqliteStore::open("wdds_persist.db")?);
//! let writer = DataWriterBuilder::<State>::new(participant, "state", TopicKind::Keyed)
//!     .qos(QoS::reliable().persistent())
//!     .persistence_store(store)
//!     .build()?;
//! ```

pub mod sqlite;

pub use sqlite::SqliteStore;
