//! Process shell for the linret gateway.
//!
//! Five components run concurrently: four on dedicated blocking OS threads
//! (ChassisLink rx, ChassisLink tx, TimeBase, Coordinator+StreamEngine) and
//! CSLink on a `tokio` runtime alongside the optional web monitor, following
//! the usual `#[tokio::main]` + `thread::spawn` + crossbeam-channel split
//! between blocking and async work.

mod cli;
mod gps;
mod l2;
mod pidfile;
mod signals;
mod sink;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;

use linret_core::bus::Bus;
use linret_core::chassis_link::{FrameCounters, FrameReassembler};
use linret_core::config::Config;
use linret_core::coordinator::Coordinator;
use linret_core::cslink::{self, CsConnections, CsInboundFrame, CsLinkStats, CsOutboundFrame};
use linret_core::hal::{GpsLineSource, L2Endpoint};
use linret_core::protocol::chassis::control::simple_request;
use linret_core::protocol::chassis::codec;
use linret_core::protocol::chassis::header::ChassisHeader;
use linret_core::protocol::chassis::MsgType;
use linret_core::stream::StreamEngine;
use linret_core::timebase::TimeBase;
use linret_core::types::IfType;

/// Shared between the ChassisLink rx and tx threads: the tx side's
/// handshake check and 1 Hz stats publication both need to observe what the
/// rx side is seeing without a bridge through the Coordinator.
struct ChassisLinkState {
    last_rx: Instant,
    counters: FrameCounters,
    chassis_connected: bool,
}

use linret_monitor::model::{DeviceSnapshot, DiagnosticSnapshot, LinkCounters};

type ChassisFrameOut = (ChassisHeader, Vec<u8>);

fn unix_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// ChassisLink rx thread: reads raw L2 frames, reassembles two-chunk
/// messages, and forwards complete logical frames to Coordinator.
fn run_chassis_rx(
    mut endpoint: Box<dyn L2Endpoint + Send>,
    to_coordinator: Bus<ChassisFrameOut>,
    link_state: Arc<Mutex<ChassisLinkState>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) {
    let mut reassembler = FrameReassembler::new();
    let mut buf = vec![0u8; 2048];
    while !shutdown.load(Ordering::Relaxed) {
        match endpoint.receive_frame(&mut buf, Duration::from_millis(150)) {
            Ok(0) => continue, // timeout, re-check shutdown
            Ok(n) => {
                let fed = reassembler.feed(&buf[..n]);
                {
                    let mut state = link_state.lock().unwrap();
                    state.last_rx = Instant::now();
                    state.counters = reassembler.counters();
                    state.chassis_connected = reassembler.chassis_connected();
                }
                match fed {
                    Ok(Some(frame)) => to_coordinator.push((frame.header, frame.payload)),
                    Ok(None) => {}
                    Err(e) => log::debug!("chassis frame rejected: {e}"),
                }
            }
            Err(e) => log::warn!("chassis rx error: {e}"),
        }
    }
}

/// Mark as disconnected and re-probed once RX has been silent this long.
const CHASSIS_DISCONNECT_AFTER: Duration = Duration::from_secs(3);

/// ChassisLink tx thread: serializes and sends outbound frames Coordinator
/// and StreamEngine produce, paced 1 ms apart. Each iteration also runs the
/// handshake liveness check and a 1 Hz stats publication, same as the
/// receiver-paired sender described for this link.
fn run_chassis_tx(
    mut endpoint: Box<dyn L2Endpoint + Send>,
    from_coordinator: crossbeam_channel::Receiver<ChassisFrameOut>,
    link_state: Arc<Mutex<ChassisLinkState>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) {
    let mut last_stats_publish = Instant::now() - Duration::from_secs(1);
    let mut handshake_rand: u8 = 0;
    while !shutdown.load(Ordering::Relaxed) {
        match from_coordinator.recv_timeout(Duration::from_millis(150)) {
            Ok((header, payload)) => {
                let mut frame = header.to_bytes(payload.len() as u16).to_vec();
                frame.extend_from_slice(&payload);
                if let Err(e) = endpoint.send_frame(&frame) {
                    log::warn!("chassis tx error: {e}");
                }
                thread::sleep(Duration::from_millis(1)); // inter-send pacing
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        let (silent_for, counters) = {
            let state = link_state.lock().unwrap();
            (now.duration_since(state.last_rx), state.counters)
        };
        if silent_for >= CHASSIS_DISCONNECT_AFTER {
            log::warn!("chassis link silent for {silent_for:?}, probing with handshake");
            let header = simple_request(IfType::Local, MsgType::LrHandshakeReq, 0, handshake_rand);
            handshake_rand = handshake_rand.wrapping_add(1);
            let frame = header.to_bytes(0);
            if let Err(e) = endpoint.send_frame(&frame) {
                log::warn!("chassis handshake probe failed: {e}");
            }
        }

        if now.duration_since(last_stats_publish) >= Duration::from_secs(1) {
            last_stats_publish = now;
            log::info!(
                "chassis link stats: header_errors={} extra_bytes={} sequence_errors={}",
                counters.header_errors,
                counters.extra_bytes,
                counters.sequence_errors
            );
        }
    }
}

/// TimeBase thread: polls the GPS line source and republishes the current
/// true time for Coordinator to read.
fn run_timebase(
    mut source: Box<dyn GpsLineSource + Send>,
    use_system_time: bool,
    true_time: Arc<Mutex<Option<f64>>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) {
    let mut timebase = TimeBase::new(use_system_time);
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        timebase.poll_once(source.as_mut(), now, Duration::from_millis(500));
        let wall = unix_now();
        *true_time.lock().unwrap() = timebase.now_true(now, wall);
    }
}

struct CoordinatorThreadArgs {
    config: Config,
    chassis_in: crossbeam_channel::Receiver<ChassisFrameOut>,
    chassis_out: Bus<ChassisFrameOut>,
    cs_in: crossbeam_channel::Receiver<CsInboundFrame>,
    cs_out: tokio::sync::mpsc::UnboundedSender<(u64, CsOutboundFrame)>,
    true_time: Arc<Mutex<Option<f64>>>,
    diagnostics: crossbeam_channel::Sender<DiagnosticSnapshot>,
    cslink_stats: Arc<CsLinkStats>,
    chassis_link_state: Arc<Mutex<ChassisLinkState>>,
    sink_root: std::path::PathBuf,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

/// Coordinator + StreamEngine thread: the single-threaded event loop owning
/// the device registry, request/response correlation, clock sync,
/// acquisition control, job scheduling, and CS translation.
fn run_coordinator(args: CoordinatorThreadArgs) {
    let delay_before = Duration::from_secs_f64(args.config.delay_before_request);
    let delay_between = Duration::from_secs_f64(args.config.delay_between_requests);
    let mut sink = sink::FileSink::new(args.sink_root);
    let mut stream_engine = StreamEngine::new(delay_before, delay_between);
    let mut coordinator = Coordinator::new(args.config);
    let mut last_diagnostic = Instant::now() - Duration::from_secs(1);

    while !args.shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        let true_time = *args.true_time.lock().unwrap();

        loop {
            match args.chassis_in.recv_timeout(Duration::from_millis(20)) {
                Ok((header, payload)) => {
                    if header.has_stream_bit() {
                        if let Ok(frame) = codec::decode(header.clone(), &payload) {
                            stream_engine.handle_frame(now, header.if_type, frame);
                        }
                    } else {
                        for req in coordinator.handle_chassis_frame(now, header, &payload) {
                            args.chassis_out.push((req.header, req.payload));
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        loop {
            match args.cs_in.try_recv() {
                Ok(frame) => {
                    let (resp_header, resp_payload) =
                        coordinator.handle_cs_request(&frame.header, frame.request, now, true_time);
                    let _ = args.cs_out.send((frame.conn_id, CsOutboundFrame { header: resp_header, payload: resp_payload }));
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => break,
            }
        }

        if let Some(tt) = true_time {
            for req in coordinator.discover(now, stream_engine.active_timestamp().is_some()) {
                args.chassis_out.push((req.header, req.payload));
            }
            for req in coordinator.sweep_device_timeouts(now, stream_engine.active_timestamp().is_some()) {
                args.chassis_out.push((req.header, req.payload));
            }
            for req in coordinator.sync_devices(now, tt) {
                args.chassis_out.push((req.header, req.payload));
            }
            for req in coordinator.acquisition_control(now, tt) {
                args.chassis_out.push((req.header, req.payload));
            }
            if let Some(job) = coordinator.schedule_job(now, tt) {
                stream_engine.push_job(job);
            }

            let (outbound, notif) = stream_engine.tick(now, tt, &mut sink);
            for (header, payload) in outbound {
                args.chassis_out.push((header, payload));
            }
            if let Some(notif) = notif {
                coordinator.on_job_notification(notif);
            }
        }

        if now.duration_since(last_diagnostic) >= Duration::from_secs(1) {
            last_diagnostic = now;
            let stats = coordinator.stats();
            let chassis_counters = {
                let state = args.chassis_link_state.lock().unwrap();
                (state.counters, state.chassis_connected)
            };
            let devices = coordinator
                .registry
                .iter()
                .map(|(full_addr, dev)| {
                    let health = dev.health_digest(now);
                    DeviceSnapshot {
                        full_addr: full_addr.0,
                        if_type: full_addr.if_type().name().to_string(),
                        addr: full_addr.addr(),
                        batt_color: format!("{:?}", health.batt_color),
                        gps_color: format!("{:?}", health.gps_color),
                        synced: health.synced,
                        loss_rate: health.loss_rate,
                        mean_latency_ms: health.mean_latency_ms,
                    }
                })
                .collect();
            let snapshot = DiagnosticSnapshot {
                acq_mode: format!("{:?}", coordinator.acq_mode),
                n_devices: stats.n_devices,
                devices,
                counters: LinkCounters {
                    queue_full_drops: stats.queue_full_drops,
                    invalid_packets_dropped: stats.invalid_packets_dropped,
                    rx_packets_dropped: stats.rx_packets_dropped,
                    cs_rx_packet_errors: stats.cs_rx_packet_errors,
                    stream_queue_full_drops: stream_engine.queue_full_drops,
                    cslink_frame_errors: args.cslink_stats.frame_errors.load(Ordering::Relaxed),
                    chassis_header_errors: chassis_counters.0.header_errors,
                    chassis_extra_bytes: chassis_counters.0.extra_bytes,
                    chassis_sequence_errors: chassis_counters.0.sequence_errors,
                    chassis_connected: chassis_counters.1,
                },
            };
            let _ = args.diagnostics.try_send(snapshot);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = cli::Cli::parse();
    env_logger::Builder::new().filter_level(cli::loglevel_filter(cli.loglevel)).init();

    let _pid_lock = pidfile::PidFile::acquire(&cli.pid_file)?;
    let shutdown = signals::register_shutdown_flag()?;

    let config = Config::load(&cli.config);

    let l2_rx: Box<dyn L2Endpoint + Send> = Box::new(l2::LinuxChassisLink::new(&config.eth_iface)?);
    let l2_tx: Box<dyn L2Endpoint + Send> = Box::new(l2::LinuxChassisLink::new(&config.eth_iface)?);
    let gps_source: Box<dyn GpsLineSource + Send> = Box::new(gps::SerialGpsSource::new(cli.gps_port.clone(), 9600));

    let (chassis_to_coordinator, chassis_in_rx) = Bus::new(256);
    let (chassis_from_coordinator, chassis_out_rx) = Bus::new(256);
    let (cs_inbound_tx, cs_inbound_rx) = Bus::new(256);
    let (cs_outbound_tx, mut cs_outbound_rx) = tokio::sync::mpsc::unbounded_channel::<(u64, CsOutboundFrame)>();
    let (diagnostics_tx, diagnostics_rx) = crossbeam_channel::bounded::<DiagnosticSnapshot>(1);

    let true_time = Arc::new(Mutex::new(None));
    let cslink_stats = Arc::new(CsLinkStats::default());
    let connections = CsConnections::new();

    let chassis_link_state = Arc::new(Mutex::new(ChassisLinkState {
        last_rx: Instant::now(),
        counters: FrameCounters::default(),
        chassis_connected: false,
    }));

    let mut threads = Vec::new();
    {
        let to_coord = chassis_to_coordinator.clone();
        let shutdown = Arc::clone(&shutdown);
        let link_state = Arc::clone(&chassis_link_state);
        threads.push(thread::spawn(move || run_chassis_rx(l2_rx, to_coord, link_state, shutdown)));
    }
    {
        let shutdown = Arc::clone(&shutdown);
        let link_state = Arc::clone(&chassis_link_state);
        threads.push(thread::spawn(move || run_chassis_tx(l2_tx, chassis_out_rx, link_state, shutdown)));
    }
    {
        let true_time = Arc::clone(&true_time);
        let shutdown = Arc::clone(&shutdown);
        let use_system_time = config.use_system_time;
        threads.push(thread::spawn(move || run_timebase(gps_source, use_system_time, true_time, shutdown)));
    }
    {
        let args = CoordinatorThreadArgs {
            config: config.clone(),
            chassis_in: chassis_in_rx,
            chassis_out: chassis_from_coordinator,
            cs_in: cs_inbound_rx,
            cs_out: cs_outbound_tx,
            true_time: Arc::clone(&true_time),
            diagnostics: diagnostics_tx,
            cslink_stats: Arc::clone(&cslink_stats),
            chassis_link_state: Arc::clone(&chassis_link_state),
            sink_root: cli.data_dir.clone(),
            shutdown: Arc::clone(&shutdown),
        };
        threads.push(thread::spawn(move || run_coordinator(args)));
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.cs_port)).await?;
    tokio::spawn(cslink::run_acceptor(listener, cs_inbound_tx, connections.clone(), Arc::clone(&cslink_stats)));
    tokio::spawn({
        let connections = connections.clone();
        async move {
            while let Some((conn_id, frame)) = cs_outbound_rx.recv().await {
                connections.send(conn_id, frame).await;
            }
        }
    });
    let web_ui_port = config.web_ui_port;
    tokio::spawn(async move {
        if let Err(e) = linret_monitor::start_in_process_monitor(web_ui_port, diagnostics_rx).await {
            log::error!("monitor web server exited: {e}");
        }
    });

    while !shutdown.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    log::info!("shutdown signal received, joining component threads");
    for handle in threads {
        let _ = handle.join();
    }
    Ok(())
}
