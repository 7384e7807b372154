use {
    base::Tensor,
    inference::{
        InferError, Result, TensorPool,
        tensor_pool::{PoolResource, TensorValue},
    },
    std::sync::{Arc, Mutex},
};

/// Resource that logs its disposal and can be told to fail it.
struct Tracked {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    fail: bool,
}

impl PoolResource for Tracked {
    fn dispose(&mut self) -> Result<()> {
        self.log.lock().unwrap().push(self.name);
        if self.fail {
            return Err(InferError::Runtime(format!("{} refused", self.name)));
        }
        Ok(())
    }
}

fn tracked(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Tracked {
    Tracked {
        name,
        log: Arc::clone(log),
        fail: false,
    }
}

#[test]
fn test_overwrite_disposes_previous_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut pool = TensorPool::new();
    pool.set("x", tracked("t1", &log)).unwrap();
    pool.set("x", tracked("t2", &log)).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["t1"]);
    assert_eq!(pool.get("x").unwrap().name, "t2");
    assert_eq!(pool.len(), 1);
}

#[test]
fn test_failed_disposal_disposes_whole_pool() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut pool = TensorPool::new();
    let mut bad = tracked("bad", &log);
    bad.fail = true;
    pool.set("x", bad).unwrap();
    pool.set("y", tracked("other", &log)).unwrap();

    let result = pool.set("x", tracked("new", &log));
    assert!(matches!(result, Err(InferError::Runtime(_))));
    assert!(pool.is_disposed());
    let mut disposed = log.lock().unwrap().clone();
    disposed.sort();
    assert_eq!(disposed, vec!["bad", "new", "other"]);
}

#[test]
fn test_dispose_all_is_idempotent_and_final() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut pool = TensorPool::new();
    pool.set("a", tracked("a", &log)).unwrap();
    pool.dispose_all();
    pool.dispose_all();
    assert_eq!(*log.lock().unwrap(), vec!["a"]);
    assert!(pool.is_disposed());
    assert!(matches!(pool.get("a"), Err(InferError::Disposed)));
    assert!(matches!(
        pool.set("b", tracked("b", &log)),
        Err(InferError::Disposed)
    ));
}

#[test]
fn test_drop_disposes_remaining() {
    let log = Arc::new(Mutex::new(Vec::new()));
    {
        let mut pool = TensorPool::new();
        pool.set("a", tracked("a", &log)).unwrap();
    }
    assert_eq!(*log.lock().unwrap(), vec!["a"]);
}

#[test]
fn test_get_missing_is_not_found() {
    let pool: TensorPool = TensorPool::new();
    assert!(matches!(pool.get("nothing"), Err(InferError::NotFound(_))));
}

#[test]
fn test_take_hands_over_ownership() {
    let mut pool: TensorPool = TensorPool::new();
    pool.set_f32("audio", Tensor::from_vec(vec![0.5, -0.5])).unwrap();
    let value = pool.take("audio").unwrap();
    assert_eq!(value, TensorValue::F32(Tensor::from_vec(vec![0.5, -0.5])));
    assert!(!pool.contains("audio"));
}
