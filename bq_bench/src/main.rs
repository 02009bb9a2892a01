mod epoch;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bounded_queue::{
    Bytes, Fabric, Receiver, ReceiverConfig, Result, Sender, SenderConfig, framed_len,
    loopback_pipe,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use epoch::EpochCollector;

#[derive(Parser, Debug)]
#[command(name = "bq_bench")]
#[command(about = "Throughput of a bounded_queue pipe over the loopback transport")]
struct Cli {
    /// Ring size, e.g. 64K or 1M
    #[arg(short = 's', long, default_value = "64K")]
    size: Bytes,

    /// Payload size in bytes
    #[arg(short = 'm', long, default_value = "8")]
    msg_size: usize,

    /// Maximum writes in flight
    #[arg(short = 't', long = "tx", default_value = "16")]
    tx_depth: usize,

    /// Signal one completion every N writes
    #[arg(short = 'c', long, default_value = "4")]
    cq_mod: usize,

    /// Send records of up to this many framed bytes inline
    #[arg(short = 'i', long, default_value = "0")]
    inline: usize,

    /// Benchmark duration in seconds
    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,

    /// Advise huge pages for both rings
    #[arg(long)]
    hugepages: bool,

    /// Report credit whenever the consumer finds the ring empty
    #[arg(long)]
    idle_report: bool,
}

fn run_producer(mut sender: Sender<Fabric>, msg_size: usize, stop: &AtomicBool) -> Result<u64> {
    let mut sent = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let seq = sent;
        let done = sender.send_with(msg_size, |buf| {
            let n = buf.len().min(8);
            buf[..n].copy_from_slice(&seq.to_le_bytes()[..n]);
        })?;
        if done {
            sent += 1;
        } else {
            sender.poll()?;
            std::hint::spin_loop();
        }
    }
    Ok(sent)
}

fn run_consumer(mut receiver: Receiver<Fabric>, stop: &AtomicBool) -> Result<u64> {
    let mut epochs = EpochCollector::new(Duration::from_secs(1));
    while !stop.load(Ordering::Relaxed) {
        let got = receiver.receive(|payload| payload.len())?.is_some();
        if let Some(epoch) = epochs.record(got as u64) {
            info!(
                epoch = epoch.index,
                ops = epoch.completed,
                ops_per_sec = epoch.ops_per_sec() as u64,
                "throughput"
            );
        }
        if !got {
            std::hint::spin_loop();
        }
    }
    epochs.finish();

    let secs = epochs.elapsed().as_secs_f64();
    if secs > 0.0 {
        info!(
            total = epochs.total(),
            ops_per_sec = (epochs.total() as f64 / secs) as u64,
            "consumer done"
        );
    }
    Ok(epochs.total())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let size = usize::try_from(cli.size.get())
        .map_err(|_| bounded_queue::Error::InvalidSize(cli.size.to_string()))?;

    let sender_config = SenderConfig::new()
        .with_tx_depth(cli.tx_depth)
        .with_signal_interval(cli.cq_mod)
        .with_max_inline(cli.inline)
        .with_hugepages(cli.hugepages);
    let receiver_config = ReceiverConfig::new()
        .with_report_when_idle(cli.idle_report)
        .with_hugepages(cli.hugepages);

    let fabric = Fabric::new();
    let (sender, receiver) = loopback_pipe(&fabric, size, sender_config, receiver_config)?;
    info!(
        ring_size = %cli.size,
        msg_size = cli.msg_size,
        framed = framed_len(cli.msg_size),
        tx_depth = cli.tx_depth,
        cq_mod = cli.cq_mod,
        inline = cli.inline,
        "starting"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let msg_size = cli.msg_size;
    let producer = {
        let stop = stop.clone();
        thread::spawn(move || run_producer(sender, msg_size, &stop))
    };
    let consumer = {
        let stop = stop.clone();
        thread::spawn(move || run_consumer(receiver, &stop))
    };

    thread::sleep(Duration::from_secs(cli.duration));
    stop.store(true, Ordering::Relaxed);

    let sent = producer
        .join()
        .unwrap_or_else(|e| std::panic::resume_unwind(e))?;
    let received = consumer
        .join()
        .unwrap_or_else(|e| std::panic::resume_unwind(e))?;
    info!(sent, received, "finished");
    Ok(())
}
