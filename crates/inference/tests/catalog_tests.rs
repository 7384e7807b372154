use {
    base::Tensor,
    candle_core::Device,
    inference::{
        Backend, EvictionPolicy, FileCatalog, FrameClock, FrameBudget, FrameDriver, InferError, ManualTime,
        ModuleCatalog, SliceParams, TensorPool, TensorProgram, Workload,
        catalog::content_hash,
        synthetic::SyntheticVoice,
        workload::run_workload,
    },
    std::{
        collections::HashMap,
        fs,
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
        time::Duration,
    },
    uuid::Uuid,
};

const DESCRIPTOR: &str = r#"{
    "inputs": ["x"],
    "outputs": [
        { "name": "y", "len": 2 },
        { "name": "top", "offset": 1, "len": 1, "dtype": "i64" }
    ],
    "layers": [
        { "name": "l0", "in_dim": 2, "out_dim": 2 }
    ]
}"#;

struct TempCatalog {
    root: PathBuf,
}

impl TempCatalog {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("catalog-{}", Uuid::new_v4()));
        for dir in ["actors", "languages", "programs"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        Self { root }
    }

    fn programs(&self) -> PathBuf {
        self.root.join("programs")
    }

    /// Write a one-layer program computing `2x + [1, 0]` and return its hash.
    fn write_program(&self) -> String {
        let device = Device::Cpu;
        let weight = candle_core::Tensor::new(&[[2f32, 0.], [0., 2.]], &device).unwrap();
        let bias = candle_core::Tensor::new(&[1f32, 0.], &device).unwrap();
        let tensors = HashMap::from([("l0.weight".to_string(), weight), ("l0.bias".to_string(), bias)]);
        let staging = self.programs().join("staging.safetensors");
        candle_core::safetensors::save(&tensors, &staging).unwrap();

        let hash = content_hash(&fs::read(&staging).unwrap());
        fs::rename(&staging, self.programs().join(format!("{}.safetensors", hash))).unwrap();
        fs::write(self.programs().join(format!("{}.json", hash)), DESCRIPTOR).unwrap();
        hash
    }

    fn path(&self) -> &Path {
        &self.root
    }
}

impl Drop for TempCatalog {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.root).ok();
    }
}

fn params() -> SliceParams {
    SliceParams {
        frame_time: Duration::from_millis(16),
        budget: Duration::from_millis(8),
        overshoot_margin: 1.5,
        adaptive: true,
        eviction: EvictionPolicy::Oldest,
    }
}

#[test]
fn test_missing_root_is_rejected() {
    let root = std::env::temp_dir().join(format!("missing-{}", Uuid::new_v4()));
    assert!(matches!(FileCatalog::new(root), Err(InferError::NotFound(_))));
}

#[test]
fn test_descriptors_round_trip_through_files() {
    let dir = TempCatalog::new();
    let voice = SyntheticVoice::new("ada");
    fs::write(
        dir.path().join("actors/ada.json"),
        serde_json::to_string(&voice.actor_descriptor()).unwrap(),
    )
    .unwrap();
    fs::write(
        dir.path().join("languages/eng.json"),
        serde_json::to_string(&voice.language_descriptor()).unwrap(),
    )
    .unwrap();

    let catalog = FileCatalog::new(dir.path()).unwrap();
    assert_eq!(catalog.actor("ada").unwrap(), voice.actor_descriptor());
    assert_eq!(catalog.language("eng").unwrap(), voice.language_descriptor());
    assert!(catalog.has_actor("ada"));
    assert!(!catalog.has_actor("bob"));
    assert!(matches!(catalog.language("deu"), Err(InferError::NotFound(_))));
}

#[test]
fn test_program_runs_layer_by_layer() {
    let dir = TempCatalog::new();
    let hash = dir.write_program();
    let catalog = FileCatalog::new(dir.path()).unwrap();
    let program = catalog.load_program(&hash, Backend::Cpu).unwrap();
    assert_eq!(program.layer_count(), 1);
    assert_eq!(program.input_names(), &["x".to_string()]);

    let workload = Mutex::new(Workload::new(hash, program, 4));
    let clock = FrameClock::new(Arc::new(ManualTime::new()));
    let mut pool: TensorPool = TensorPool::new();
    pool.set_f32("x", Tensor::from_vec(vec![1.0, 3.0])).unwrap();
    let mut budget = FrameBudget::new(clock.clone());
    let mut driver = FrameDriver::new(clock);
    let result = driver.run(run_workload(&workload, &mut pool, &mut budget, &params()), 10);
    assert!(matches!(result, Some(Ok(()))));
    assert_eq!(pool.get_f32("y").unwrap().data, vec![3.0, 6.0]);
    assert_eq!(pool.scalar_i64("top").unwrap(), 6);
}

#[test]
fn test_checksum_mismatch_is_rejected() {
    let dir = TempCatalog::new();
    let hash = dir.write_program();
    let forged = content_hash(b"something else");
    fs::copy(
        dir.programs().join(format!("{}.safetensors", hash)),
        dir.programs().join(format!("{}.safetensors", forged)),
    )
    .unwrap();
    fs::write(dir.programs().join(format!("{}.json", forged)), DESCRIPTOR).unwrap();

    let catalog = FileCatalog::new(dir.path()).unwrap();
    assert!(matches!(
        catalog.load_program(&forged, Backend::Cpu),
        Err(InferError::Runtime(_))
    ));
    assert!(matches!(
        catalog.load_program("0000", Backend::Cpu),
        Err(InferError::NotFound(_))
    ));
}

#[test]
fn test_mismatched_layers_fail_validation() {
    let json = r#"{
        "inputs": ["x"],
        "outputs": [],
        "layers": [
            { "name": "a", "in_dim": 2, "out_dim": 3 },
            { "name": "b", "in_dim": 4, "out_dim": 1 }
        ]
    }"#;
    let result = inference::candle_program::ProgramDescriptor::from_json(json);
    assert!(matches!(result, Err(InferError::Shape(_))));
}

#[test]
fn test_ids_cannot_leave_the_root() {
    let dir = TempCatalog::new();
    let voice = SyntheticVoice::new("ada");
    // a valid descriptor one level above actors/
    fs::write(
        dir.path().join("escape.json"),
        serde_json::to_string(&voice.actor_descriptor()).unwrap(),
    )
    .unwrap();

    let catalog = FileCatalog::new(dir.path()).unwrap();
    assert!(matches!(catalog.actor("../escape"), Err(InferError::NotFound(_))));
    assert!(matches!(catalog.language(".."), Err(InferError::NotFound(_))));
    assert!(matches!(catalog.actor(""), Err(InferError::NotFound(_))));
    assert!(matches!(
        catalog.load_program("../programs/x", Backend::Cpu),
        Err(InferError::NotFound(_))
    ));
    assert!(!catalog.has_actor("..\\escape"));
}
