use audio::{AudioSample, JitterBuffer, pcm_from_f32};

#[test]
fn test_holds_back_until_threshold() {
    let mut buffer = JitterBuffer::new(1000);
    let chunk = AudioSample::from_pcm(vec![3; 400], 24000);

    assert!(buffer.push(&chunk, false).unwrap().is_none());
    assert!(buffer.push(&chunk, false).unwrap().is_none());
    assert_eq!(buffer.pending(), 800);

    let released = buffer.push(&chunk, false).unwrap().expect("threshold reached");
    assert_eq!(released.len(), 1200);
    assert_eq!(released.sample_rate, 24000);
    assert_eq!(buffer.pending(), 0);
}

#[test]
fn test_zero_threshold_forwards_every_chunk() {
    let mut buffer = JitterBuffer::new(0);
    let chunk = AudioSample::from_pcm(vec![1, 2, 3], 16000);
    let released = buffer.push(&chunk, false).unwrap().unwrap();
    assert_eq!(released.pcm(), &[1, 2, 3]);
}

#[test]
fn test_clear_drops_pending() {
    let mut buffer = JitterBuffer::new(100);
    buffer
        .push(&AudioSample::from_pcm(vec![5; 50], 24000), false)
        .unwrap();
    buffer.clear();
    assert_eq!(buffer.pending(), 0);
    // a new stream may use another rate after clear
    assert!(
        buffer
            .push(&AudioSample::from_pcm(vec![5; 10], 16000), true)
            .unwrap()
            .is_some()
    );
}

#[test]
fn test_pcm_from_f32_clamps() {
    let pcm = pcm_from_f32(&[0.0, 0.5, -1.0, 2.0, -2.0]);
    assert_eq!(pcm, vec![0, 16384, -32768, 32767, -32768]);
}

#[test]
fn test_audio_sample_duration() {
    let sample = AudioSample::from_pcm(vec![0; 12000], 24000);
    assert!((sample.duration() - 0.5).abs() < 1e-9);
    assert_eq!(AudioSample::empty(24000).duration(), 0.0);
}
