// SPDX-License-Identifier: Apache-2.0

//! Per-rule metric aggregation: the shared record store, the keyword
//! matcher that folds lines into it, and the push wire schema.

pub mod keyword;
pub mod record;
pub mod store;

pub use keyword::KeywordAggregator;
pub use record::{MetricKey, MetricRecord};
pub use store::MetricStore;
