use {
    inference::{
        ActorModule, InferError, InferenceConfig, LanguageModule, MemoryCatalog, ModuleHandler,
        WorkloadManager, synthetic::SyntheticVoice,
    },
    std::sync::Arc,
};

/// Two voices on one language, sharing a vocoder.
fn catalog() -> (SyntheticVoice, SyntheticVoice, MemoryCatalog) {
    let mut ada = SyntheticVoice::new("ada");
    ada.vocoder_family = Some("shared".to_string());
    let mut bob = SyntheticVoice::new("bob");
    bob.vocoder_family = Some("shared".to_string());
    let mut catalog = ada.catalog();
    bob.install(&mut catalog);
    (ada, bob, catalog)
}

#[test]
fn test_acquire_loads_once() {
    let (_, _, catalog) = catalog();
    let mut handler = ModuleHandler::new(Arc::new(catalog));
    let first = handler.acquire::<ActorModule>("ada").unwrap();
    let second = handler.acquire::<ActorModule>("ada").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(handler.len(), 1);
}

#[test]
fn test_wrong_kind_is_type_mismatch() {
    let (_, _, catalog) = catalog();
    let mut handler = ModuleHandler::new(Arc::new(catalog));
    handler.acquire::<LanguageModule>("eng").unwrap();
    match handler.acquire::<ActorModule>("eng") {
        Err(InferError::TypeMismatch { expected, found, .. }) => {
            assert_eq!(expected, "actor");
            assert_eq!(found, "language");
        }
        other => panic!("expected TypeMismatch, got {:?}", other.map(|_| ())),
    }
    assert!(matches!(handler.get::<ActorModule>("eng"), Err(InferError::TypeMismatch { .. })));
    assert!(matches!(handler.get::<ActorModule>("nobody"), Ok(None)));
}

#[test]
fn test_unknown_module_is_not_found() {
    let (_, _, catalog) = catalog();
    let mut handler = ModuleHandler::new(Arc::new(catalog));
    assert!(matches!(handler.acquire::<ActorModule>("zed"), Err(InferError::NotFound(_))));
    assert!(handler.is_empty());
}

#[test]
fn test_non_overlapping_excludes_shared_vocoder() {
    let (ada, _, catalog) = catalog();
    let mut handler = ModuleHandler::new(Arc::new(catalog));
    handler.acquire::<ActorModule>("ada").unwrap();
    handler.acquire::<ActorModule>("bob").unwrap();

    let own = handler.get_non_overlapping("ada").unwrap();
    assert_eq!(own.len(), 5);
    assert!(own.contains(&ada.hash("encoder")));
    assert!(!own.contains(&ada.hash("vocoder_first")));
    assert!(matches!(handler.get_non_overlapping("zed"), Err(InferError::NotFound(_))));
}

#[test]
fn test_language_resources_include_phoneme_table() {
    let (ada, _, catalog) = catalog();
    let mut handler = ModuleHandler::new(Arc::new(catalog));
    handler.acquire::<LanguageModule>("eng").unwrap();
    let own = handler.get_non_overlapping("eng").unwrap();
    assert!(own.contains(&ada.phonemizer_hash()));
    assert!(own.contains("phonemes:eng"));
}

#[test]
fn test_unload_refused_while_workload_in_use() {
    let (ada, _, catalog) = catalog();
    let config = InferenceConfig::default();
    let mut workloads = WorkloadManager::new();
    let mut handler = ModuleHandler::new(Arc::new(catalog.clone()));
    let actor = handler.acquire::<ActorModule>("ada").unwrap();
    workloads
        .register_module("ada", &actor.workloads().hashes(), &catalog, &config)
        .unwrap();

    workloads.acquire(&ada.hash("encoder")).unwrap();
    assert!(!handler.unload::<ActorModule>("ada", &mut workloads).unwrap());
    assert!(handler.contains("ada"));
    assert!(workloads.is_registered("ada"));

    workloads.release(&ada.hash("encoder"));
    assert!(handler.unload::<ActorModule>("ada", &mut workloads).unwrap());
    assert!(!handler.contains("ada"));
    assert!(workloads.is_empty());
}

#[test]
fn test_unload_keeps_shared_workloads() {
    let (ada, bob, catalog) = catalog();
    let config = InferenceConfig::default();
    let mut workloads = WorkloadManager::new();
    let mut handler = ModuleHandler::new(Arc::new(catalog.clone()));
    for id in ["ada", "bob"] {
        let actor = handler.acquire::<ActorModule>(id).unwrap();
        workloads
            .register_module(id, &actor.workloads().hashes(), &catalog, &config)
            .unwrap();
    }
    assert_eq!(workloads.len(), 13);

    assert!(handler.unload::<ActorModule>("ada", &mut workloads).unwrap());
    assert_eq!(workloads.len(), 8);
    assert!(workloads.contains(&bob.hash("vocoder_last")));
    assert!(!workloads.contains(&ada.hash("encoder")));
}

#[test]
fn test_unload_language_clears_learned_words() {
    let (_, _, catalog) = catalog();
    let mut workloads = WorkloadManager::new();
    let mut handler = ModuleHandler::new(Arc::new(catalog));
    let language = handler.acquire::<LanguageModule>("eng").unwrap();
    assert!(language.memoize("dog", "dɔg".to_string()));
    assert!(handler.unload::<LanguageModule>("eng", &mut workloads).unwrap());
    assert!(!language.is_known("dog"));

    // a fresh load starts from the lexicon again
    let reloaded = handler.acquire::<LanguageModule>("eng").unwrap();
    assert!(reloaded.is_known("hello"));
    assert!(!reloaded.is_known("dog"));
}

#[test]
fn test_unload_absent_module_is_noop() {
    let (_, _, catalog) = catalog();
    let mut workloads = WorkloadManager::new();
    let mut handler = ModuleHandler::new(Arc::new(catalog));
    assert!(!handler.unload::<ActorModule>("ada", &mut workloads).unwrap());
}
