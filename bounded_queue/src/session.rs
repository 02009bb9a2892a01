//! Connection setup.
//!
//! Setup runs in two phases, matching connect/accept on a connection manager:
//!
//! ```text
//! producer                                   consumer
//! ProducerSetup::new()
//!   register credit slot
//!   ----- ProducerSideInfo (16 bytes) ----->
//!                                            accept()
//!                                              map + register ring (2*size)
//!   <---- ConsumerSideInfo (24 bytes) ------
//! ProducerSetup::complete()
//!   map + register staging ring
//! ```
//!
//! How the private data travels is up to the caller.

use std::sync::Arc;

use tracing::debug;

use crate::config::{ReceiverConfig, SenderConfig};
use crate::credit::CreditSlot;
use crate::error::{Error, Result};
use crate::handshake::{ConsumerSideInfo, ProducerSideInfo};
use crate::receiver::Receiver;
use crate::region::Region;
use crate::ring::{Consumer, Producer};
use crate::sender::Sender;
use crate::transport::loopback::Fabric;
use crate::transport::{AccessFlags, RegisteredMemory, Transport};

fn ensure_ordered<T: Transport>(transport: &T) -> Result<()> {
    if !transport.guarantees_in_order_delivery() {
        return Err(Error::UnorderedTransport);
    }
    Ok(())
}

fn map_ring(size: usize, hugepages: bool) -> Result<Arc<Region>> {
    let region = Region::allocate(size)?;
    if hugepages {
        region.advise_hugepages()?;
    }
    Ok(Arc::new(region))
}

/// Producer side between sending its info and receiving the consumer's.
pub struct ProducerSetup<T: Transport> {
    credit_mr: T::MemoryRegion,
    credit: Box<CreditSlot>,
}

impl<T: Transport> ProducerSetup<T> {
    /// Register the credit slot the consumer will write into.
    pub fn new(transport: &T) -> Result<(Self, ProducerSideInfo)> {
        ensure_ordered(transport)?;
        let credit = Box::new(CreditSlot::new());
        let credit_mr = unsafe {
            transport.register(
                credit.as_mut_ptr(),
                CreditSlot::SIZE,
                AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE,
            )?
        };
        let info = ProducerSideInfo {
            remote_address: credit_mr.addr(),
            remote_access_key: credit_mr.rkey(),
        };
        debug!(addr = info.remote_address, rkey = info.remote_access_key, "registered credit slot");
        Ok((Self { credit_mr, credit }, info))
    }

    /// Finish setup with the consumer's private data.
    pub fn complete(self, transport: &T, consumer_info: &[u8], config: SenderConfig) -> Result<Sender<T>> {
        config.validate()?;
        let remote = ConsumerSideInfo::decode(consumer_info)?;
        let mismatch = Error::RingSizeMismatch {
            requested: remote.ring_size,
            allocated: 0,
        };
        let size = usize::try_from(remote.ring_size).map_err(|_| mismatch)?;
        let region = map_ring(size, config.hugepages)?;
        if region.size() as u64 != remote.ring_size {
            return Err(Error::RingSizeMismatch {
                requested: remote.ring_size,
                allocated: region.size() as u64,
            });
        }

        // The staging ring is only a local source, registered doubled so
        // that a wrapping record is one scatter/gather element.
        let ring_mr = unsafe {
            transport.register(region.base_ptr(), region.raw_size(), AccessFlags::LOCAL_WRITE)?
        };
        let queue = transport.create_queue()?;
        debug!(
            ring_size = region.size(),
            remote_addr = remote.remote_address,
            rkey = remote.remote_access_key,
            "producer connected"
        );

        // SAFETY: the staging ring is private to this sender; its bytes reach
        // the consumer only through the queue.
        let producer = unsafe { Producer::new(region) };
        Ok(Sender::new(
            queue,
            ring_mr,
            self.credit_mr,
            self.credit,
            producer,
            remote,
            config,
        ))
    }
}

impl<T: Transport> std::fmt::Debug for ProducerSetup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerSetup")
            .field("credit_addr", &self.credit_mr.addr())
            .finish()
    }
}

/// Consumer side: map a ring of `size` bytes and accept a producer.
///
/// `size` is rounded up to the page size; the returned info carries the
/// actual ring size.
pub fn accept<T: Transport>(
    transport: &T,
    size: usize,
    producer_info: &[u8],
    config: ReceiverConfig,
) -> Result<(Receiver<T>, ConsumerSideInfo)> {
    ensure_ordered(transport)?;
    let remote = ProducerSideInfo::decode(producer_info)?;
    let region = map_ring(size, config.hugepages)?;
    let threshold = config.validate(region.size() as u64)?;

    let ring_mr = unsafe {
        transport.register(
            region.base_ptr(),
            region.raw_size(),
            AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE,
        )?
    };
    let queue = transport.create_queue()?;
    let info = ConsumerSideInfo {
        remote_address: ring_mr.addr(),
        ring_size: region.size() as u64,
        remote_access_key: ring_mr.rkey(),
    };
    debug!(
        ring_size = info.ring_size,
        threshold,
        credit_addr = remote.remote_address,
        "consumer accepted"
    );

    // SAFETY: the only writer of this ring is the one remote producer, whose
    // credit comes from this consumer's reports.
    let consumer = unsafe { Consumer::new(region) };
    let receiver = Receiver::new(queue, ring_mr, consumer, remote, threshold, config);
    Ok((receiver, info))
}

/// Connect a sender and a receiver in-process over `fabric`.
pub fn loopback_pipe(
    fabric: &Fabric,
    size: usize,
    sender_config: SenderConfig,
    receiver_config: ReceiverConfig,
) -> Result<(Sender<Fabric>, Receiver<Fabric>)> {
    let (setup, producer_info) = ProducerSetup::new(fabric)?;
    let (receiver, consumer_info) = accept(fabric, size, &producer_info.encode(), receiver_config)?;
    let sender = setup.complete(fabric, &consumer_info.encode(), sender_config)?;
    Ok((sender, receiver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::page_size;
    use crate::transport::loopback::{LoopbackQueue, MemoryRegion};
    use crate::transport::{Completion, OneSidedQueue, WriteRequest};

    /// A fabric that does not promise ordering.
    struct Unordered(Fabric);

    impl Transport for Unordered {
        type MemoryRegion = MemoryRegion;
        type Queue = LoopbackQueue;

        fn guarantees_in_order_delivery(&self) -> bool {
            false
        }

        unsafe fn register(&self, addr: *mut u8, len: usize, access: AccessFlags) -> Result<MemoryRegion> {
            unsafe { self.0.register(addr, len, access) }
        }

        fn create_queue(&self) -> Result<LoopbackQueue> {
            self.0.create_queue()
        }
    }

    /// A fabric whose queues report no completions on every other poll.
    struct Slow(Fabric);

    struct SlowQueue {
        inner: LoopbackQueue,
        polls: usize,
    }

    impl OneSidedQueue for SlowQueue {
        fn post_write(&mut self, wr: &WriteRequest<'_>) -> Result<()> {
            self.inner.post_write(wr)
        }

        fn poll(&mut self, out: &mut Vec<Completion>, max: usize) -> Result<usize> {
            self.polls += 1;
            if self.polls % 2 == 1 {
                return Ok(0);
            }
            self.inner.poll(out, max)
        }
    }

    impl Transport for Slow {
        type MemoryRegion = MemoryRegion;
        type Queue = SlowQueue;

        fn guarantees_in_order_delivery(&self) -> bool {
            true
        }

        unsafe fn register(&self, addr: *mut u8, len: usize, access: AccessFlags) -> Result<MemoryRegion> {
            unsafe { self.0.register(addr, len, access) }
        }

        fn create_queue(&self) -> Result<SlowQueue> {
            Ok(SlowQueue {
                inner: self.0.create_queue()?,
                polls: 0,
            })
        }
    }

    fn pipe(sender: SenderConfig, receiver: ReceiverConfig) -> (Sender<Fabric>, Receiver<Fabric>) {
        loopback_pipe(&Fabric::new(), page_size(), sender, receiver).unwrap()
    }

    #[test]
    fn test_unordered_transport_rejected() {
        let transport = Unordered(Fabric::new());
        assert!(matches!(
            ProducerSetup::new(&transport),
            Err(Error::UnorderedTransport)
        ));
        let info = ProducerSideInfo {
            remote_address: 0,
            remote_access_key: 0,
        };
        assert!(matches!(
            accept(&transport, page_size(), &info.encode(), ReceiverConfig::default()),
            Err(Error::UnorderedTransport)
        ));
    }

    #[test]
    fn test_handshake_exchanges_ring_coordinates() {
        let fabric = Fabric::new();
        let (setup, producer_info) = ProducerSetup::new(&fabric).unwrap();
        let (receiver, consumer_info) =
            accept(&fabric, 1, &producer_info.encode(), ReceiverConfig::default()).unwrap();
        assert_eq!(consumer_info.ring_size, page_size() as u64);
        assert_eq!(receiver.local_info(), consumer_info);

        let sender = setup
            .complete(&fabric, &consumer_info.encode(), SenderConfig::default())
            .unwrap();
        assert_eq!(sender.local_info(), producer_info);
        assert_eq!(sender.ring_size(), receiver.ring_size());
        // credit slot, consumer ring, staging ring
        assert_eq!(fabric.registered_regions(), 3);

        drop(sender);
        drop(receiver);
        assert_eq!(fabric.registered_regions(), 0);
    }

    #[test]
    fn test_short_consumer_info_rejected() {
        let fabric = Fabric::new();
        let (setup, _) = ProducerSetup::new(&fabric).unwrap();
        assert!(matches!(
            setup.complete(&fabric, &[0u8; 12], SenderConfig::default()),
            Err(Error::Handshake { expected: 24, got: 12 })
        ));
    }

    #[test]
    fn test_unaligned_ring_size_rejected() {
        let fabric = Fabric::new();
        let (setup, _) = ProducerSetup::new(&fabric).unwrap();
        let info = ConsumerSideInfo {
            remote_address: 0x1000,
            ring_size: page_size() as u64 + 1,
            remote_access_key: 1,
        };
        assert!(matches!(
            setup.complete(&fabric, &info.encode(), SenderConfig::default()),
            Err(Error::RingSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let fabric = Fabric::new();
        let (setup, producer_info) = ProducerSetup::new(&fabric).unwrap();
        let bad = ReceiverConfig::new().with_report_threshold(page_size() as u64);
        assert!(matches!(
            accept(&fabric, page_size(), &producer_info.encode(), bad),
            Err(Error::InvalidConfig(_))
        ));
        let (_receiver, consumer_info) =
            accept(&fabric, page_size(), &producer_info.encode(), ReceiverConfig::default()).unwrap();
        assert!(matches!(
            setup.complete(&fabric, &consumer_info.encode(), SenderConfig::new().with_tx_depth(0)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_send_receive_single_thread() {
        let (mut sender, mut receiver) = pipe(SenderConfig::default(), ReceiverConfig::default());
        assert_eq!(receiver.receive_vec().unwrap(), None);

        assert!(sender.send(b"hello").unwrap());
        assert!(sender.send(b"world!").unwrap());
        assert_eq!(receiver.receive_vec().unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(receiver.receive_vec().unwrap().as_deref(), Some(&b"world!"[..]));
        assert_eq!(receiver.receive_vec().unwrap(), None);
        assert_eq!(receiver.back(), sender.front());
    }

    #[test]
    fn test_inline_and_sge_paths_agree() {
        for max_inline in [0, 64, 4096] {
            let config = SenderConfig::new().with_max_inline(max_inline);
            let (mut sender, mut receiver) = pipe(config, ReceiverConfig::default());
            for i in 0..100u32 {
                let len = 1 + (i as usize * 7) % 50;
                assert!(sender.send_with(len, |buf| buf.fill(i as u8)).unwrap());
                sender.poll().unwrap();
                let got = receiver.receive_vec().unwrap().unwrap();
                assert_eq!(got, vec![i as u8; len]);
            }
        }
    }

    #[test]
    fn test_tx_depth_limits_in_flight() {
        let config = SenderConfig::new().with_tx_depth(4).with_signal_interval(4);
        let (mut sender, _receiver) = pipe(config, ReceiverConfig::default());
        for _ in 0..4 {
            assert!(sender.send(&[1; 8]).unwrap());
        }
        assert_eq!(sender.in_flight(), 4);
        // The fourth write was signaled, so the next send can retire the batch.
        assert!(sender.send(&[1; 8]).unwrap());
        assert_eq!(sender.in_flight(), 1);
    }

    #[test]
    fn test_signaled_batches_retire_in_flight() {
        let config = SenderConfig::new().with_tx_depth(8).with_signal_interval(2);
        let (mut sender, _receiver) = pipe(config, ReceiverConfig::default());
        for _ in 0..5 {
            assert!(sender.send(&[2; 4]).unwrap());
        }
        assert_eq!(sender.poll().unwrap(), 2);
        assert_eq!(sender.in_flight(), 1);
        assert_eq!(sender.posted(), 5);
    }

    #[test]
    fn test_credit_reported_past_threshold() {
        let (mut sender, mut receiver) = pipe(SenderConfig::default(), ReceiverConfig::default());
        let threshold = receiver.report_threshold();
        assert_eq!(threshold, page_size() as u64 / 2);

        let mut consumed = 0u64;
        while consumed <= threshold {
            assert!(sender.send(&[3; 60]).unwrap());
            sender.poll().unwrap();
            assert!(receiver.receive(|p| assert_eq!(p.len(), 60)).unwrap().is_some());
            consumed = receiver.back();
            if consumed <= threshold {
                assert_eq!(sender.known_back(), 0);
            }
        }
        assert_eq!(receiver.last_reported(), consumed);
        assert_eq!(sender.known_back(), consumed);
    }

    #[test]
    fn test_ring_full_until_credit() {
        let (mut sender, mut receiver) = pipe(
            SenderConfig::new().with_tx_depth(1).with_signal_interval(1),
            ReceiverConfig::default(),
        );
        let mut sent = 0;
        while sender.send(&[4; 4]).unwrap() {
            sent += 1;
        }
        assert!(sent > 0);
        assert!(!sender.send(&[4; 4]).unwrap());

        let mut received = 0;
        while receiver.receive(|_| ()).unwrap().is_some() {
            received += 1;
        }
        assert_eq!(received, sent);
        assert!(sender.known_back() > 0);
        assert!(sender.send(&[4; 4]).unwrap());
    }

    #[test]
    fn test_report_when_idle() {
        let (mut sender, mut receiver) = pipe(
            SenderConfig::default(),
            ReceiverConfig::new().with_report_when_idle(true),
        );
        assert!(sender.send(&[5; 16]).unwrap());
        assert!(receiver.receive(|_| ()).unwrap().is_some());
        assert_eq!(sender.known_back(), 0);

        assert!(receiver.receive(|_| ()).unwrap().is_none());
        assert_eq!(sender.known_back(), receiver.back());
    }

    #[test]
    fn test_explicit_credit_report() {
        let (mut sender, mut receiver) = pipe(SenderConfig::default(), ReceiverConfig::default());
        assert!(!receiver.report_credit().unwrap());
        sender.send(&[6; 10]).unwrap();
        receiver.receive(|_| ()).unwrap();
        assert!(receiver.report_credit().unwrap());
        assert_eq!(sender.known_back(), receiver.back());
        assert!(!receiver.report_credit().unwrap());
    }

    #[test]
    fn test_outstanding_reports_are_bounded() {
        let (mut sender, mut receiver) = pipe(
            SenderConfig::default(),
            ReceiverConfig::new()
                .with_report_threshold(0)
                .with_max_outstanding_reports(1)
                .with_poll_interval(1000),
        );
        sender.send(&[7; 4]).unwrap();
        sender.send(&[7; 4]).unwrap();
        receiver.receive(|_| ()).unwrap();
        let first = receiver.last_reported();
        assert!(first > 0);
        // The pending completion is drained before the next report.
        receiver.receive(|_| ()).unwrap();
        assert_eq!(receiver.last_reported(), receiver.back());
        assert!(receiver.last_reported() > first);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let (mut sender, _receiver) = pipe(SenderConfig::default(), ReceiverConfig::default());
        assert!(matches!(sender.send(&[]), Err(Error::EmptyPayload)));
        assert!(!sender.send(&vec![0; page_size()]).unwrap());
        assert_eq!(sender.front(), 0);
        assert_eq!(sender.posted(), 0);
    }

    #[test]
    fn test_deferred_report_retried_when_idle() {
        let transport = Slow(Fabric::new());
        let (setup, producer_info) = ProducerSetup::new(&transport).unwrap();
        let (mut receiver, consumer_info) = accept(
            &transport,
            page_size(),
            &producer_info.encode(),
            ReceiverConfig::new()
                .with_report_threshold(0)
                .with_max_outstanding_reports(1)
                .with_poll_interval(1000),
        )
        .unwrap();
        let mut sender = setup
            .complete(&transport, &consumer_info.encode(), SenderConfig::default())
            .unwrap();

        assert!(sender.send(&[8; 4]).unwrap());
        assert!(sender.send(&[8; 4]).unwrap());
        assert!(receiver.receive(|_| ()).unwrap().is_some());
        // The first report's completion is not visible yet, so this one waits.
        assert!(receiver.receive(|_| ()).unwrap().is_some());
        assert!(receiver.last_reported() < receiver.back());

        for _ in 0..3 {
            assert!(receiver.receive(|_| ()).unwrap().is_none());
        }
        assert_eq!(receiver.last_reported(), receiver.back());
        assert_eq!(sender.known_back(), receiver.back());
    }
}
