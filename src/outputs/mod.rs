//! Delivery of stored events to chat users.
//!
//! # Submodules
//!
//! - [`selection`]: Fair per-source selection of the records to send
//! - [`caption`]: HTML caption formatting with the 1024-character ceiling
//! - [`telegram`]: Bot API client, command handling, and the send loop
//!
//! # Delivery Flow
//!
//! ```text
//! /events ─▶ EventStore::query(date ≥ today)
//!         ─▶ select_for_delivery(per-source cap)
//!         ─▶ format_caption ─▶ sendPhoto | sendMessage
//! ```

pub mod caption;
pub mod selection;
pub mod telegram;
