use {
    futures_util::task::noop_waker,
    std::{
        future::Future,
        pin::Pin,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        task::{Context, Poll},
        time::{Duration, Instant},
    },
};

/// Monotonic time since an arbitrary origin.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-clock time backed by `Instant`.
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Time that only moves when told to. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualTime {
    nanos: Arc<AtomicU64>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

/// The host frame timeline shared by the engine and its sessions.
///
/// The engine calls `begin_frame` once per host tick; everything scheduled
/// inside that tick measures its remaining frame time against it.
#[derive(Clone)]
pub struct FrameClock {
    time: Arc<dyn TimeSource>,
    frame_start: Arc<AtomicU64>,
    frame_index: Arc<AtomicU64>,
}

impl FrameClock {
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        let start = time.now().as_nanos() as u64;
        Self {
            time,
            frame_start: Arc::new(AtomicU64::new(start)),
            frame_index: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn monotonic() -> Self {
        Self::new(Arc::new(MonotonicTime::new()))
    }

    pub fn now(&self) -> Duration {
        self.time.now()
    }

    /// Mark the start of a new host frame.
    pub fn begin_frame(&self) -> u64 {
        self.frame_start
            .store(self.now().as_nanos() as u64, Ordering::Release);
        self.frame_index.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::Acquire)
    }

    pub fn since_frame_start(&self) -> Duration {
        let start = Duration::from_nanos(self.frame_start.load(Ordering::Acquire));
        self.now().saturating_sub(start)
    }
}

/// Inference time consumed in the current frame by one session.
///
/// The counter resets by itself once the clock moves to a new frame.
pub struct FrameBudget {
    clock: FrameClock,
    frame: u64,
    consumed: Duration,
}

impl FrameBudget {
    pub fn new(clock: FrameClock) -> Self {
        let frame = clock.frame_index();
        Self {
            clock,
            frame,
            consumed: Duration::ZERO,
        }
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    fn sync(&mut self) {
        let frame = self.clock.frame_index();
        if frame != self.frame {
            self.frame = frame;
            self.consumed = Duration::ZERO;
        }
    }

    pub fn consumed(&mut self) -> Duration {
        self.sync();
        self.consumed
    }

    pub fn charge(&mut self, elapsed: Duration) {
        self.sync();
        self.consumed += elapsed;
    }
}

/// Future that is pending exactly once, handing control back to the host
/// until the next frame polls it again.
pub struct YieldFrame {
    yielded: bool,
}

pub fn yield_frame() -> YieldFrame {
    YieldFrame { yielded: false }
}

impl Future for YieldFrame {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Polls a future once per frame, beginning a new frame before every poll.
pub struct FrameDriver {
    clock: FrameClock,
    frames: usize,
}

impl FrameDriver {
    pub fn new(clock: FrameClock) -> Self {
        Self { clock, frames: 0 }
    }

    /// Total frames driven so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Drive `future` for at most `max_frames` frames.
    pub fn run<F: Future>(&mut self, future: F, max_frames: usize) -> Option<F::Output> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut future = std::pin::pin!(future);
        for _ in 0..max_frames {
            self.clock.begin_frame();
            self.frames += 1;
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Some(output);
            }
        }
        None
    }
}
