use {
    futures_util::task::noop_waker,
    inference::{
        EvictionPolicy, FrameBudget, FrameClock, FrameDriver, InferError, ManualTime, Result,
        SliceParams, TensorPool, TensorProgram, TensorValue, Workload,
        synthetic::{LayerCosts, ScriptedProgram, SyntheticStats},
        workload::{run_autoregressive, run_workload},
    },
    base::Tensor,
    std::{
        future::Future,
        pin::pin,
        sync::{Arc, Mutex},
        task::{Context, Poll},
        time::Duration,
    },
};

const MS: Duration = Duration::from_millis(1);

fn params(budget_ms: u64, frame_ms: u64) -> SliceParams {
    SliceParams {
        frame_time: MS * frame_ms as u32,
        budget: MS * budget_ms as u32,
        overshoot_margin: 1.5,
        adaptive: true,
        eviction: EvictionPolicy::Oldest,
    }
}

struct Rig {
    time: ManualTime,
    clock: FrameClock,
    stats: SyntheticStats,
}

impl Rig {
    fn new() -> Self {
        let time = ManualTime::new();
        let clock = FrameClock::new(Arc::new(time.clone()));
        Self {
            time,
            clock,
            stats: SyntheticStats::default(),
        }
    }

    fn workload(&self, layers: usize, costs: LayerCosts, max_skip_layers: usize) -> Mutex<Workload> {
        let program = ScriptedProgram::timed("w", layers, costs).with_stats(self.stats.clone());
        Mutex::new(Workload::new("w", Box::new(program), max_skip_layers))
    }

    fn costs(&self, base_ms: u64) -> LayerCosts {
        LayerCosts::manual(&self.time, MS * base_ms as u32)
    }

    /// Poll `future` once per frame, recording how many layers ran in each frame.
    fn slices<F: Future>(&self, future: F) -> (F::Output, Vec<usize>) {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future);
        let mut slices = Vec::new();
        let mut seen = self.stats.layers("w");
        loop {
            self.clock.begin_frame();
            let poll = future.as_mut().poll(&mut cx);
            let now = self.stats.layers("w");
            slices.push(now - seen);
            seen = now;
            if let Poll::Ready(output) = poll {
                return (output, slices);
            }
            assert!(slices.len() < 1000, "pass never finished");
        }
    }

    fn pass(&self, workload: &Mutex<Workload>, params: &SliceParams) -> Vec<usize> {
        let mut pool: TensorPool = TensorPool::new();
        let mut budget = FrameBudget::new(self.clock.clone());
        let (result, slices) = self.slices(run_workload(workload, &mut pool, &mut budget, params));
        assert!(result.is_ok());
        slices
    }
}

#[test]
fn test_yields_when_budget_is_spent() {
    let rig = Rig::new();
    let workload = rig.workload(10, rig.costs(1), 8);
    let slices = rig.pass(&workload, &params(4, 1000));
    assert_eq!(slices, vec![5, 5]);
    assert!(workload.lock().unwrap().heavy_layers().is_empty());
}

#[test]
fn test_yields_when_frame_is_exhausted() {
    let rig = Rig::new();
    let workload = rig.workload(20, rig.costs(1), 8);
    // 10ms frame keeps a 1ms reserve
    let slices = rig.pass(&workload, &params(100, 10));
    assert_eq!(slices, vec![10, 10]);
}

#[test]
fn test_slow_layer_is_learned_and_broken_before() {
    let rig = Rig::new();
    let costs = rig.costs(1).with_slow_layer(6, MS * 20);
    let workload = rig.workload(10, costs, 8);
    let params = params(4, 1000);

    assert_eq!(rig.pass(&workload, &params), vec![5, 2, 3]);
    assert_eq!(workload.lock().unwrap().heavy_layers().layers(), &[5]);

    // the slow layer now starts its own frame
    assert_eq!(rig.pass(&workload, &params), vec![5, 1, 1, 3]);
    assert_eq!(workload.lock().unwrap().heavy_layers().layers(), &[5]);
}

#[test]
fn test_heavy_layers_converge_within_bound() {
    let rig = Rig::new();
    let max_skip_layers = 4;
    let costs = rig.costs(1).with_slow_layer(6, MS * 20);
    let workload = rig.workload(10, costs, max_skip_layers);
    let params = params(4, 1000);

    let mut previous = Vec::new();
    let mut stable_after = None;
    for pass in 1..=max_skip_layers + 1 {
        rig.pass(&workload, &params);
        let heavy = workload.lock().unwrap().heavy_layers().layers().to_vec();
        assert!(heavy.len() <= max_skip_layers);
        if heavy == previous {
            stable_after = Some(pass);
            break;
        }
        previous = heavy;
    }
    assert!(stable_after.is_some());
}

#[test]
fn test_heavy_set_never_exceeds_capacity() {
    let rig = Rig::new();
    let workload = rig.workload(12, rig.costs(3), 2);
    let mut params = params(4, 1000);
    params.overshoot_margin = 1.2;
    for _ in 0..6 {
        rig.pass(&workload, &params);
        assert!(workload.lock().unwrap().heavy_layers().len() <= 2);
    }
    assert_eq!(workload.lock().unwrap().heavy_layers().len(), 2);
}

#[test]
fn test_adaptive_off_learns_nothing() {
    let rig = Rig::new();
    let costs = rig.costs(1).with_slow_layer(6, MS * 20);
    let workload = rig.workload(10, costs, 8);
    let mut params = params(4, 1000);
    params.adaptive = false;
    for _ in 0..3 {
        assert_eq!(rig.pass(&workload, &params), vec![5, 2, 3]);
    }
    assert!(workload.lock().unwrap().heavy_layers().is_empty());
}

#[test]
fn test_failure_disposes_pool() {
    let rig = Rig::new();
    let program = ScriptedProgram::timed("w", 5, rig.costs(1)).failing_at(2);
    let workload = Mutex::new(Workload::new("w", Box::new(program), 8));
    let mut pool: TensorPool = TensorPool::new();
    pool.set_i64("keep", Tensor::from_scalar(1)).unwrap();
    let mut budget = FrameBudget::new(rig.clock.clone());
    let mut driver = FrameDriver::new(rig.clock.clone());
    let result = driver.run(run_workload(&workload, &mut pool, &mut budget, &params(4, 1000)), 10);
    assert!(matches!(result, Some(Err(InferError::Runtime(_)))));
    assert!(pool.is_disposed());
}

#[test]
fn test_missing_input_fails_binding() {
    let rig = Rig::new();
    let program = ScriptedProgram::new("w", &["x"], &["y"], 2, |_| Ok(Vec::new()));
    let workload = Mutex::new(Workload::new("w", Box::new(program), 8));
    let mut pool: TensorPool = TensorPool::new();
    let mut budget = FrameBudget::new(rig.clock.clone());
    let mut driver = FrameDriver::new(rig.clock.clone());
    let result = driver.run(run_workload(&workload, &mut pool, &mut budget, &params(4, 1000)), 10);
    assert!(matches!(result, Some(Err(InferError::NotFound(_)))));
    assert!(pool.is_disposed());
}

#[test]
fn test_outputs_land_in_pool() {
    let rig = Rig::new();
    let program = ScriptedProgram::new("double", &["x"], &["y"], 3, |bound| {
        let x = bound["x"].as_f32()?;
        Ok(vec![("y".to_string(), x.map(|v| v * 2.0).into())])
    });
    let workload = Mutex::new(Workload::new("double", Box::new(program), 8));
    let mut pool: TensorPool = TensorPool::new();
    pool.set_f32("x", Tensor::from_vec(vec![1.0, 2.0])).unwrap();
    let mut budget = FrameBudget::new(rig.clock.clone());
    let mut driver = FrameDriver::new(rig.clock.clone());
    let result = driver.run(run_workload(&workload, &mut pool, &mut budget, &params(4, 1000)), 10);
    assert!(matches!(result, Some(Ok(()))));
    assert_eq!(pool.get_f32("y").unwrap().data, vec![2.0, 4.0]);
}

#[test]
fn test_autoregressive_yields_between_iterations() {
    let rig = Rig::new();
    let workload = rig.workload(2, LayerCosts::free(), 8);
    let mut pool: TensorPool = TensorPool::new();
    let mut budget = FrameBudget::new(rig.clock.clone());
    let mut driver = FrameDriver::new(rig.clock.clone());
    let params = params(4, 1000);
    let result = driver.run(
        run_autoregressive(&workload, &mut pool, &mut budget, &params, |_, iterations| {
            Ok(iterations >= 3)
        }),
        20,
    );
    assert!(matches!(result, Some(Ok(3))));
    assert_eq!(driver.frames(), 3);
    assert_eq!(rig.stats.passes("w"), 3);
}

#[test]
fn test_autoregressive_stops_on_disposed_pool() {
    let rig = Rig::new();
    let workload = rig.workload(2, LayerCosts::free(), 8);
    let epoch = base::Epoch::new();
    let mut pool: TensorPool = TensorPool::with_epoch(&epoch);
    let mut budget = FrameBudget::new(rig.clock.clone());
    let params = params(4, 1000);
    let (result, slices) = rig.slices(run_autoregressive(
        &workload,
        &mut pool,
        &mut budget,
        &params,
        |_, iterations| {
            if iterations == 2 {
                epoch.advance();
            }
            Ok(false)
        },
    ));
    assert!(matches!(result, Err(InferError::Disposed)));
    assert_eq!(slices.len(), 3);
}

/// Program whose outputs take a few polls to come back.
struct SlowReadback {
    names: Vec<String>,
    outputs: Vec<String>,
    polls_left: usize,
    cursor: usize,
}

impl TensorProgram for SlowReadback {
    fn input_names(&self) -> &[String] {
        &self.names
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn layer_count(&self) -> usize {
        1
    }

    fn bind(&mut self, _name: &str, _value: &TensorValue) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn step(&mut self) -> Result<bool> {
        self.cursor = 1;
        Ok(false)
    }

    fn current_layer(&self) -> usize {
        self.cursor
    }

    fn output(&mut self, _name: &str) -> Result<TensorValue> {
        Ok(Tensor::from_scalar(7i64).into())
    }

    fn poll_output(&mut self, name: &str) -> Result<Option<TensorValue>> {
        if self.polls_left > 0 {
            self.polls_left -= 1;
            return Ok(None);
        }
        self.output(name).map(Some)
    }
}

#[test]
fn test_pending_readback_waits_for_later_frames() {
    let rig = Rig::new();
    let program = SlowReadback {
        names: Vec::new(),
        outputs: vec!["answer".to_string()],
        polls_left: 2,
        cursor: 0,
    };
    let workload = Mutex::new(Workload::new("slow", Box::new(program), 8));
    let mut pool: TensorPool = TensorPool::new();
    let mut budget = FrameBudget::new(rig.clock.clone());
    let mut driver = FrameDriver::new(rig.clock.clone());
    let result = driver.run(run_workload(&workload, &mut pool, &mut budget, &params(4, 1000)), 10);
    assert!(matches!(result, Some(Ok(()))));
    assert_eq!(driver.frames(), 3);
    assert_eq!(pool.scalar_i64("answer").unwrap(), 7);
}
