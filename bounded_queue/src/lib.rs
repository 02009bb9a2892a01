//! bounded_queue - SPSC zero-copy variable-length ring buffer over one-sided writes.
//!
//! # Architecture
//!
//! ```text
//!      producer side                              consumer side
//! ┌──────────────────────┐                ┌──────────────────────┐
//! │ Sender               │                │ Receiver             │
//! │  Producer (front)    │  one-sided     │  Consumer (back)     │
//! │  staging Region ─────┼── write ──────►│  Region (2*size map) │
//! │                      │  same offset   │                      │
//! │  CreditSlot ◄────────┼── 8B write ────┼─ CreditReporter      │
//! └──────────────────────┘                └──────────────────────┘
//! ```
//!
//! - **Region**: `size` bytes mapped twice back to back, so any record up to
//!   `size` bytes is contiguous even when it wraps.
//! - **Framing**: `header | payload | footer`; the consumer takes a record once
//!   both bounding separators are present. No doorbell, no per-record ack.
//! - **Credit**: the consumer writes its read cursor into the producer's slot
//!   after consuming more than a threshold (half the ring by default).
//!
//! Any [`Transport`](transport::Transport) that delivers writes in posting
//! order can carry the ring; [`transport::loopback`] does so in-process.

pub mod config;
pub mod credit;
pub mod error;
pub mod handshake;
pub mod receiver;
pub mod region;
pub mod ring;
pub mod sender;
pub mod separator;
pub mod session;
pub mod size;
pub mod transport;

pub use config::{ReceiverConfig, SenderConfig};
pub use credit::{CreditReporter, CreditSlot};
pub use error::{Error, Result};
pub use handshake::{ConsumerSideInfo, ProducerSideInfo};
pub use receiver::Receiver;
pub use region::{Region, page_size};
pub use ring::{Consumer, Message, Producer, Record, framed_len, free_space};
pub use sender::Sender;
pub use separator::{MAX_PAYLOAD, SEPARATOR_SIZE, Separator};
pub use session::{ProducerSetup, accept, loopback_pipe};
pub use size::Bytes;
pub use transport::loopback::Fabric;
