// SPDX-License-Identifier: GPL-3.0-or-later

//! Concurrency primitives shared by the storage boundary, the MapReduce
//! engine, and the RPC signal procedures.

pub mod condition_map;
pub mod slotted_mutex;

pub use condition_map::ConditionMap;
pub use slotted_mutex::SlottedMutex;
