use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uio_dma::{PageAllocator, DEFAULT_CAPACITY};
use uio_e1000::{
    format_mac, E1000Config, Error, InterruptWait, MmioWindow, Registers, SpinWait, UioInterrupt,
    WaitPolicy, E1000, DEFAULT_RING_SIZE, REGISTER_WINDOW_LEN, RX_BUFFER_LEN,
};
use uio_e1000_cli::frame::{arp_request, parse_arp_reply, EthernetHeader};
use uio_e1000_cli::pci::{PciDevice, DEFAULT_SYSFS_ROOT};

#[derive(Parser, Debug)]
#[command(
    name = "uio-e1000",
    about = "Drive an Intel e1000 NIC bound to uio_pci_generic from userspace"
)]
struct Args {
    /// PCI address of the adapter (e.g. 0000:00:03.0).
    #[arg(long, env = "UIO_E1000_PCI", value_name = "BDF")]
    pci: String,

    /// Root of the PCI device tree in sysfs.
    #[arg(long, env = "UIO_E1000_SYSFS", value_name = "DIR", default_value = DEFAULT_SYSFS_ROOT)]
    sysfs: PathBuf,

    /// UIO character device; discovered from sysfs when omitted.
    #[arg(long, env = "UIO_E1000_UIO", value_name = "PATH")]
    uio: Option<PathBuf>,

    /// How to wait for the hardware when a ring has nothing to offer.
    #[arg(long, value_enum, default_value_t = WaitMode::Spin)]
    wait: WaitMode,

    #[arg(long, value_name = "N", default_value_t = DEFAULT_RING_SIZE)]
    rx_ring: usize,

    #[arg(long, value_name = "N", default_value_t = DEFAULT_RING_SIZE)]
    tx_ring: usize,

    /// Fail instead of falling back to flash when no EEPROM answers.
    #[arg(long)]
    require_eeprom: bool,

    /// Upper bound on DMA pages the driver may hold.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_CAPACITY)]
    dma_pages: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a line for every received frame (default).
    Listen {
        /// Stop after this many frames.
        #[arg(long, value_name = "N")]
        count: Option<u64>,
    },
    /// Broadcast an ARP request and wait for the reply.
    ArpProbe {
        #[arg(long, value_name = "IPV4")]
        sender_ip: Ipv4Addr,

        #[arg(long, value_name = "IPV4")]
        target_ip: Ipv4Addr,

        #[arg(long, value_name = "MS", default_value_t = 1000)]
        timeout_ms: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum WaitMode {
    /// Poll descriptors with bounded backoff.
    Spin,
    /// Block on the UIO interrupt line.
    Interrupt,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    run(args)
}

fn run(args: Args) -> Result<()> {
    let pci = PciDevice::new(&args.sysfs, &args.pci);
    let identity = pci.verify_e1000()?;
    tracing::info!(device = %args.pci, %identity, model = identity.model(), "found adapter");

    pci.enable_bus_master()?;
    let resource = pci.open_resource0()?;
    // SAFETY: resource0 is the adapter's BAR0 and nothing else in this process maps it.
    let window = unsafe { MmioWindow::map(&resource, REGISTER_WINDOW_LEN) }
        .with_context(|| format!("map BAR0 of {}", args.pci))?;

    let allocator =
        PageAllocator::with_pagemap(args.dma_pages).context("open /proc/self/pagemap")?;
    let config = E1000Config {
        rx_ring_size: args.rx_ring,
        tx_ring_size: args.tx_ring,
        require_eeprom: args.require_eeprom,
        ..E1000Config::default()
    };
    let mut nic = E1000::bring_up(args.pci.clone(), window, &allocator, config)
        .with_context(|| format!("bring up {}", args.pci))?;
    println!("MAC: {}", format_mac(&nic.mac_address()));

    let timeout = match &args.command {
        Some(Command::ArpProbe { timeout_ms, .. }) => Some(Duration::from_millis(*timeout_ms)),
        _ => None,
    };
    let mut wait = wait_policy(&args, &pci, timeout)?;
    let result = match args.command.unwrap_or(Command::Listen { count: None }) {
        Command::Listen { count } => listen(&mut nic, wait.as_mut(), count),
        Command::ArpProbe {
            sender_ip,
            target_ip,
            timeout_ms,
        } => arp_probe(
            &mut nic,
            wait.as_mut(),
            sender_ip,
            target_ip,
            Duration::from_millis(timeout_ms),
        ),
    };

    let rx = nic.rx_stats();
    let tx = nic.tx_stats();
    tracing::info!(
        rx_packets = rx.packets,
        rx_bytes = rx.bytes,
        rx_errors = rx.errors,
        tx_packets = tx.packets,
        tx_errors = tx.errors,
        "shutting down"
    );
    nic.shutdown();
    result
}

fn wait_policy(
    args: &Args,
    pci: &PciDevice,
    timeout: Option<Duration>,
) -> Result<Box<dyn WaitPolicy>> {
    let policy: Box<dyn WaitPolicy> = match args.wait {
        WaitMode::Spin => {
            let spin = SpinWait::new();
            Box::new(match timeout {
                Some(timeout) => spin.with_timeout(timeout),
                None => spin,
            })
        }
        WaitMode::Interrupt => {
            let path = match &args.uio {
                Some(path) => path.clone(),
                None => pci.uio_node()?,
            };
            let uio =
                UioInterrupt::open(&path).with_context(|| format!("open {}", path.display()))?;
            let wait = InterruptWait::new(uio).context("enable UIO interrupts")?;
            Box::new(match timeout {
                Some(timeout) => wait.with_timeout(timeout),
                None => wait,
            })
        }
    };
    Ok(policy)
}

fn listen<R: Registers>(
    nic: &mut E1000<R>,
    wait: &mut dyn WaitPolicy,
    count: Option<u64>,
) -> Result<()> {
    let mut frame = [0u8; RX_BUFFER_LEN];
    let mut total = 0u64;
    while count.map_or(true, |limit| total < limit) {
        let index = nic.rx_ring().cursor();
        let len = match nic.receive(&mut frame, &mut *wait) {
            Ok(len) => len,
            Err(err @ Error::ReceiveHardwareError { .. }) => {
                tracing::warn!(index, error = %err, "dropped frame");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        total += 1;
        println!("receive desc: {index}");
        println!("receive total: {total}");
        match EthernetHeader::parse(&frame[..len]) {
            Some(header) => {
                println!("src MAC: {}", format_mac(&header.src));
                println!("dest MAC: {}", format_mac(&header.dst));
            }
            None => println!("runt frame: {len} bytes"),
        }
    }
    Ok(())
}

fn arp_probe<R: Registers>(
    nic: &mut E1000<R>,
    wait: &mut dyn WaitPolicy,
    sender_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
    timeout: Duration,
) -> Result<()> {
    let request = arp_request(nic.mac_address(), sender_ip, target_ip);
    nic.send(&request, &mut *wait).context("send ARP request")?;
    tracing::info!(%sender_ip, %target_ip, "sent ARP request");

    let deadline = Instant::now() + timeout;
    let mut frame = [0u8; RX_BUFFER_LEN];
    while Instant::now() < deadline {
        let len = match nic.receive(&mut frame, &mut *wait) {
            Ok(len) => len,
            Err(Error::WaitTimeout) => break,
            Err(Error::ReceiveHardwareError { .. }) => continue,
            Err(err) => return Err(err.into()),
        };
        if let Some(reply) = parse_arp_reply(&frame[..len]) {
            if reply.sender_ip == target_ip {
                println!("{target_ip} is at {}", format_mac(&reply.sender_mac));
                return Ok(());
            }
        }
    }
    bail!("no ARP reply from {target_ip} within {}ms", timeout.as_millis())
}
