//! The pipeline orchestrator.
//!
//! Two long-lived worker loops cooperate at independent rates: the grab
//! loop captures and analyzes frames, the output loop filters the analyzed
//! colors and feeds the driver. The orchestrator owns both loops, the
//! pending/active parameter split and the reconfiguration policy.
//!
//! Each worker is driven by its own control channel (Run, Suspend, Stop)
//! and acknowledges state changes on an event channel. A single mutex
//! guards the active parameter snapshot and the analyzed-colors handoff;
//! everything else is owned by exactly one thread.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::analyze::{AnalyzeParms, Analyzer};
use crate::color::Rgb;
use crate::driver::{DriverHost, DriverRegistry};
use crate::error::Error;
use crate::filter::FilterChain;
use crate::layout::ChannelLayout;
use crate::parm::{Parameters, ParmValue};
use crate::source::{FrameSource, GrabError, GrabFlags, GrabRequest, DEFAULT_GRAB_TIMEOUT};
use crate::ticket::Ticket;
use crate::Result;

/// How long control calls wait for a worker to acknowledge a state change.
const THREAD_RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Command {
    Run,
    Suspend,
    Stop,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum WorkerEvent {
    Running,
    Suspended,
    Parked,
    Stopped,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum LoopState {
    Running,
    Suspended,
    Parked,
}

struct Shared {
    state: Mutex<SharedState>,
}

struct SharedState {
    active: Parameters,
    analyzed: Vec<Rgb>,
}

struct Worker<T> {
    ctrl: Sender<Command>,
    events: Receiver<WorkerEvent>,
    handle: JoinHandle<T>,
}

impl<T> Worker<T> {
    fn command(&self, cmd: Command) {
        let _ = self.ctrl.send(cmd);
    }

    /// Drains events until one of `accept` arrives. Logs and gives up after
    /// [`THREAD_RESPONSE_TIMEOUT`]; the caller never blocks indefinitely.
    fn await_event(&self, accept: &[WorkerEvent]) {
        let deadline = Instant::now() + THREAD_RESPONSE_TIMEOUT;
        loop {
            let now = Instant::now();
            if now >= deadline {
                log::error!("timeout while waiting for thread state change!");
                return;
            }
            match self.events.recv_timeout(deadline - now) {
                Ok(ev) if accept.contains(&ev) => return,
                Ok(_) => {}
                Err(_) => {
                    log::error!("timeout while waiting for thread state change!");
                    return;
                }
            }
        }
    }
}

/// Waits for a command until `deadline`.
fn recv_until(ctrl: &Receiver<Command>, deadline: Instant) -> Result<Command, RecvTimeoutError> {
    let now = Instant::now();
    if deadline > now {
        ctrl.recv_timeout(deadline - now)
    } else {
        match ctrl.try_recv() {
            Ok(c) => Ok(c),
            Err(TryRecvError::Empty) => Err(RecvTimeoutError::Timeout),
            Err(TryRecvError::Disconnected) => Err(RecvTimeoutError::Disconnected),
        }
    }
}

fn rate(ms: i32) -> Duration {
    Duration::from_millis(ms.max(1) as u64)
}

/// The image-to-color pipeline.
///
/// Configuration mutates the *pending* parameters only. A call to
/// [`Pipeline::reconfigure`] decides what the change requires, anywhere from
/// publishing a new active snapshot up to a full driver reload, and applies
/// it. The worker loops never read the pending copy.
pub struct Pipeline {
    parm: Parameters,
    configured: bool,
    shared: Arc<Shared>,
    host: Arc<Mutex<DriverHost>>,
    ticket: Arc<Ticket>,
    source: Option<Box<dyn FrameSource>>,
    grab: Option<Worker<Box<dyn FrameSource>>>,
    output: Option<Worker<()>>,
}

impl Pipeline {
    pub fn new(source: Box<dyn FrameSource>, registry: DriverRegistry) -> Self {
        let parm = Parameters::default();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SharedState {
                    active: parm.clone(),
                    analyzed: Vec::new(),
                }),
            }),
            host: Arc::new(Mutex::new(DriverHost::new(registry))),
            ticket: Arc::new(Ticket::new()),
            source: Some(source),
            grab: None,
            output: None,
            parm,
            configured: false,
        }
    }

    /// The pending parameters.
    pub fn parm(&self) -> &Parameters {
        &self.parm
    }

    /// Mutable access to the pending parameters for programmatic setup.
    /// Range checking is bypassed; prefer [`Pipeline::set_parm`] for values
    /// arriving from a user interface.
    pub fn parm_mut(&mut self) -> &mut Parameters {
        &mut self.parm
    }

    /// Sets one pending parameter by name, with range validation.
    pub fn set_parm(&mut self, name: &str, value: ParmValue) -> Result<()> {
        self.parm.set(name, value)
    }

    pub fn get_parm(&self, name: &str) -> Option<ParmValue> {
        self.parm.get(name)
    }

    /// The host's cooperative suspension token.
    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    /// Whether the last reconfigure succeeded. No colors are sent before the
    /// first successful reconfigure.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn is_running(&self) -> bool {
        self.grab.is_some() || self.output.is_some()
    }

    #[cfg(test)]
    pub(crate) fn active_parm(&self) -> Parameters {
        self.shared.state.lock().unwrap().active.clone()
    }

    /// Applies the pending parameters.
    ///
    /// Field comparison against the active snapshot decides the scope: a
    /// changed driver selection reloads the driver, a changed layout rebuilds
    /// the channel buffers (both stop the loops first), toggling `enabled`
    /// starts or stops the pipeline, and everything else simply becomes the
    /// next active snapshot for the loops to pick up.
    pub fn reconfigure(&mut self) -> Result<()> {
        self.configured = false;

        let active = self.shared.state.lock().unwrap().active.clone();
        let driver_changed = active.driver != self.parm.driver
            || active.driver_path != self.parm.driver_path
            || active.driver_param != self.parm.driver_param;

        if !self.parm.enabled || driver_changed {
            self.stop_workers();
            let mut host = self.host.lock().unwrap();
            if let Err(e) = host.close() {
                log::error!("{e}");
            }
            if driver_changed {
                host.unload();
            }
        }

        if !self.parm.enabled {
            self.shared.state.lock().unwrap().active = self.parm.clone();
            self.configured = true;
            return Ok(());
        }

        if self.parm.layout().channel_count() < 1 {
            return Err(Error::config("no channels configured"));
        }

        let mut send_initial = {
            let mut host = self.host.lock().unwrap();
            let opening = !host.is_opened();
            // May refine the pending parameters (imposed channel layout).
            host.open(&mut self.parm)?;
            opening
        };

        let channels = self.parm.layout().channel_count();
        if channels < 1 {
            return Err(Error::config("no channels configured"));
        }

        let layout_changed = active.layout() != self.parm.layout()
            || self.shared.state.lock().unwrap().analyzed.len() != channels;
        if layout_changed {
            self.stop_workers();
            self.host.lock().unwrap().configure_channels(channels);
            send_initial = true;
        }

        {
            let mut s = self.shared.state.lock().unwrap();
            s.active = self.parm.clone();
            if s.analyzed.len() != channels {
                s.analyzed = vec![Rgb::BLACK; channels];
            }
        }

        if send_initial {
            let zeros = vec![Rgb::BLACK; channels];
            self.host.lock().unwrap().send(&zeros, true)?;
        }

        self.start_workers()?;
        self.configured = true;
        Ok(())
    }

    /// Suspends both loops: the output loop turns the lights off, the grab
    /// loop releases the frame source.
    pub fn suspend(&mut self) {
        for w in self.grab.iter() {
            w.command(Command::Suspend);
        }
        for w in self.output.iter() {
            w.command(Command::Suspend);
        }
        for w in self.grab.iter() {
            w.await_event(&[
                WorkerEvent::Suspended,
                WorkerEvent::Parked,
                WorkerEvent::Stopped,
            ]);
        }
        for w in self.output.iter() {
            w.await_event(&[
                WorkerEvent::Suspended,
                WorkerEvent::Parked,
                WorkerEvent::Stopped,
            ]);
        }
    }

    /// Resumes suspended loops.
    pub fn resume(&mut self) {
        for w in self.grab.iter() {
            w.command(Command::Run);
        }
        for w in self.output.iter() {
            w.command(Command::Run);
        }
        for w in self.grab.iter() {
            w.await_event(&[WorkerEvent::Running, WorkerEvent::Parked]);
        }
        for w in self.output.iter() {
            w.await_event(&[WorkerEvent::Running, WorkerEvent::Parked]);
        }
    }

    /// Stops both loops and closes the driver. The driver stays loaded; a
    /// reconfigure restarts the pipeline.
    pub fn stop(&mut self) {
        self.stop_workers();
        if let Err(e) = self.host.lock().unwrap().close() {
            log::error!("{e}");
        }
    }

    fn start_workers(&mut self) -> Result<()> {
        if self.grab.as_ref().is_some_and(|w| w.handle.is_finished()) {
            self.join_grab();
        }
        if self.output.as_ref().is_some_and(|w| w.handle.is_finished()) {
            self.join_output();
        }

        if self.grab.is_none() {
            let source = self
                .source
                .take()
                .ok_or_else(|| Error::config("frame source unavailable"))?;
            let (ctrl_tx, ctrl_rx) = mpsc::channel();
            let (ev_tx, ev_rx) = mpsc::channel();
            let shared = self.shared.clone();
            let ticket = self.ticket.clone();
            let layout = self.parm.layout();
            let handle = match thread::Builder::new()
                .name("atmo-grab".into())
                .spawn(move || grab_loop(shared, ticket, ctrl_rx, ev_tx, source, layout))
            {
                Ok(h) => h,
                Err(e) => {
                    log::error!("can't create grab thread: {e}");
                    return Err(Error::from(e));
                }
            };
            self.grab = Some(Worker {
                ctrl: ctrl_tx,
                events: ev_rx,
                handle,
            });
        } else {
            self.grab.as_ref().unwrap().command(Command::Run);
        }

        if self.output.is_none() {
            let (ctrl_tx, ctrl_rx) = mpsc::channel();
            let (ev_tx, ev_rx) = mpsc::channel();
            let shared = self.shared.clone();
            let ticket = self.ticket.clone();
            let host = self.host.clone();
            let handle = match thread::Builder::new()
                .name("atmo-output".into())
                .spawn(move || output_loop(shared, ticket, ctrl_rx, ev_tx, host))
            {
                Ok(h) => h,
                Err(e) => {
                    log::error!("can't create output thread: {e}");
                    return Err(Error::from(e));
                }
            };
            self.output = Some(Worker {
                ctrl: ctrl_tx,
                events: ev_rx,
                handle,
            });
        } else {
            self.output.as_ref().unwrap().command(Command::Run);
        }

        for w in self.grab.iter() {
            w.await_event(&[WorkerEvent::Running, WorkerEvent::Parked]);
        }
        for w in self.output.iter() {
            w.await_event(&[WorkerEvent::Running, WorkerEvent::Parked]);
        }
        Ok(())
    }

    fn stop_workers(&mut self) {
        for w in self.grab.iter() {
            w.command(Command::Stop);
        }
        for w in self.output.iter() {
            w.command(Command::Stop);
        }
        self.join_grab();
        self.join_output();
    }

    fn join_grab(&mut self) {
        if let Some(w) = self.grab.take() {
            w.command(Command::Stop);
            match w.handle.join() {
                Ok(source) => self.source = Some(source),
                Err(_) => log::error!("grab thread panicked"),
            }
        }
    }

    fn join_output(&mut self) {
        if let Some(w) = self.output.take() {
            w.command(Command::Stop);
            if w.handle.join().is_err() {
                log::error!("output thread panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop_workers();
        let mut host = self.host.lock().unwrap();
        if let Err(e) = host.close() {
            log::error!("{e}");
        }
        host.unload();
    }
}

fn grab_loop(
    shared: Arc<Shared>,
    ticket: Arc<Ticket>,
    ctrl: Receiver<Command>,
    events: Sender<WorkerEvent>,
    mut source: Box<dyn FrameSource>,
    layout: ChannelLayout,
) -> Box<dyn FrameSource> {
    log::info!("grab thread running");
    let _ = events.send(WorkerEvent::Running);

    let mut analyzer = Analyzer::new(layout);
    let mut buf = Vec::new();
    let mut state = LoopState::Running;
    let mut last = Instant::now();

    loop {
        let active = shared.state.lock().unwrap().active.clone();
        let period = rate(active.analyze_rate);

        let cmd = match recv_until(&ctrl, last + period) {
            Ok(c) => Some(c),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        last = Instant::now();

        match cmd {
            Some(Command::Stop) => break,
            Some(Command::Suspend) => match state {
                LoopState::Running => {
                    source.release();
                    state = LoopState::Suspended;
                    let _ = events.send(WorkerEvent::Suspended);
                    log::info!("grab thread suspended");
                }
                LoopState::Suspended => {
                    let _ = events.send(WorkerEvent::Suspended);
                }
                LoopState::Parked => {
                    let _ = events.send(WorkerEvent::Parked);
                }
            },
            Some(Command::Run) => match state {
                LoopState::Suspended => {
                    state = LoopState::Running;
                    let _ = events.send(WorkerEvent::Running);
                    log::info!("grab thread resumed");
                    last = Instant::now();
                }
                LoopState::Running => {
                    let _ = events.send(WorkerEvent::Running);
                }
                LoopState::Parked => {
                    let _ = events.send(WorkerEvent::Parked);
                }
            },
            None => {}
        }

        if ticket.is_revoked() {
            if state != LoopState::Parked {
                source.release();
                state = LoopState::Parked;
                let _ = events.send(WorkerEvent::Parked);
                log::info!("grab thread waiting for new ticket");
            }
            // Block on the grant, bounded so stop stays responsive.
            ticket.wait_granted(period);
            continue;
        } else if state == LoopState::Parked {
            state = LoopState::Running;
            let _ = events.send(WorkerEvent::Running);
            log::info!("grab thread got new ticket");
            last = Instant::now();
            continue;
        }

        if state != LoopState::Running {
            continue;
        }

        let Some((display_width, display_height)) = source.display_size() else {
            continue;
        };
        if display_width == 0 || display_height == 0 {
            continue;
        }

        let analyze_width = active.analyze_image_width() as u32;
        let analyze_height = analyze_width * display_height / display_width;

        let request = GrabRequest {
            width: analyze_width,
            height: analyze_height,
            timeout: DEFAULT_GRAB_TIMEOUT,
            flags: GrabFlags::CONTINUOUS | GrabFlags::WAIT_NEXT,
        };
        match source.grab(&request, &mut buf) {
            Ok(info) if info.width == analyze_width && info.height == analyze_height => {
                let result = analyzer.analyze_image(
                    &AnalyzeParms::from(&active),
                    &buf,
                    analyze_width as usize,
                    analyze_height as usize,
                    info.format,
                );
                match result {
                    Ok(colors) => {
                        let mut s = shared.state.lock().unwrap();
                        if s.analyzed.len() == colors.len() {
                            s.analyzed.copy_from_slice(colors);
                        }
                    }
                    Err(e) => log::debug!("skipping frame: {e}"),
                }
            }
            Ok(info) => log::debug!(
                "grab delivered {}x{}, wanted {analyze_width}x{analyze_height}",
                info.width,
                info.height
            ),
            Err(GrabError::Timeout) => log::debug!("grab timed out!"),
            Err(e) => log::info!("grab failed: {e}"),
        }
    }

    log::info!("grab thread terminated");
    let _ = events.send(WorkerEvent::Stopped);
    source
}

fn output_loop(
    shared: Arc<Shared>,
    ticket: Arc<Ticket>,
    ctrl: Receiver<Command>,
    events: Sender<WorkerEvent>,
    host: Arc<Mutex<DriverHost>>,
) {
    log::info!("output thread running");
    let _ = events.send(WorkerEvent::Running);

    let mut chain: Option<FilterChain> = None;
    let mut analyzed: Vec<Rgb> = Vec::new();
    let mut init = true;
    let mut first = Instant::now();
    let mut state = LoopState::Running;
    let mut last = Instant::now();

    let lights_off = |host: &Mutex<DriverHost>| {
        if let Err(e) = host.lock().unwrap().lights_off() {
            log::error!("lights off failed: {e}");
        }
    };

    loop {
        let active = shared.state.lock().unwrap().active.clone();
        let period = rate(active.output_rate);

        let cmd = match recv_until(&ctrl, last + period) {
            Ok(c) => Some(c),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        last = Instant::now();

        match cmd {
            Some(Command::Stop) => break,
            Some(Command::Suspend) => match state {
                LoopState::Running => {
                    lights_off(&host);
                    init = true;
                    state = LoopState::Suspended;
                    let _ = events.send(WorkerEvent::Suspended);
                    log::info!("output thread suspended");
                }
                LoopState::Suspended => {
                    let _ = events.send(WorkerEvent::Suspended);
                }
                LoopState::Parked => {
                    let _ = events.send(WorkerEvent::Parked);
                }
            },
            Some(Command::Run) => match state {
                LoopState::Suspended => {
                    state = LoopState::Running;
                    let _ = events.send(WorkerEvent::Running);
                    last = Instant::now();
                }
                LoopState::Running => {
                    let _ = events.send(WorkerEvent::Running);
                }
                LoopState::Parked => {
                    let _ = events.send(WorkerEvent::Parked);
                }
            },
            None => {}
        }

        if ticket.is_revoked() {
            if state != LoopState::Parked {
                lights_off(&host);
                init = true;
                state = LoopState::Parked;
                let _ = events.send(WorkerEvent::Parked);
                log::info!("output thread waiting for new ticket");
            }
            ticket.wait_granted(period);
            continue;
        } else if state == LoopState::Parked {
            state = LoopState::Running;
            let _ = events.send(WorkerEvent::Running);
            log::info!("output thread got new ticket");
            last = Instant::now();
            continue;
        }

        if state != LoopState::Running {
            continue;
        }

        {
            let s = shared.state.lock().unwrap();
            analyzed.clear();
            analyzed.extend_from_slice(&s.analyzed);
        }
        let channels = analyzed.len();
        if channels == 0 {
            continue;
        }

        if chain.as_ref().map_or(true, |c| c.channel_count() != channels) {
            chain = Some(FilterChain::new(channels));
        }
        let chain = chain.as_mut().unwrap();

        if init {
            init = false;
            chain.reset();
            first = Instant::now();
            log::info!("output thread resumed");
        }

        chain.apply_filters(&active, &analyzed);

        if first.elapsed() >= Duration::from_millis(active.start_delay.max(0) as u64) {
            chain.apply_delay_filter(&active);
            chain.apply_gamma_correction(&active);
            chain.apply_white_calibration(&active);
            // A send failure is fatal to the loop; the host must reconfigure
            // to restart. The error is already logged by the host.
            if host
                .lock()
                .unwrap()
                .send(chain.filtered_output(), false)
                .is_err()
            {
                break;
            }
        }
    }

    log::info!("output thread terminated");
    let _ = events.send(WorkerEvent::Stopped);
}
