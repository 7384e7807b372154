use inference::{
    MARKER_CHAR,
    marker::{MarkerAligner, prepare_text, transcribe},
};

fn lexicon(word: &str) -> Option<String> {
    match word.to_lowercase().as_str() {
        "the" => Some("ðə".to_string()),
        "cat" => Some("kæt".to_string()),
        _ => None,
    }
}

fn marked(parts: &[&str]) -> String {
    parts.join(&MARKER_CHAR.to_string())
}

#[test]
fn test_markers_follow_word_boundaries() {
    let prepared = prepare_text(&marked(&["", "the", " ", "cat", ""]));
    assert_eq!(prepared.text, "the cat");
    assert_eq!(prepared.markers, vec![0, 3, 4, 7]);

    let transcription = transcribe(&prepared, lexicon, |_| true);
    assert_eq!(transcription.symbols.iter().collect::<String>(), "ðə kæt");
    assert_eq!(transcription.markers, vec![0, 2, 3, 6]);
    assert!(transcription.missing.is_empty());
}

#[test]
fn test_marker_inside_word_scales_to_phonemes() {
    let prepared = prepare_text(&marked(&["ca", "t"]));
    assert_eq!(prepared.markers, vec![2]);
    let transcription = transcribe(&prepared, lexicon, |_| true);
    // two of three letters in, two of three phonemes in
    assert_eq!(transcription.markers, vec![2]);
}

#[test]
fn test_dropped_symbols_do_not_shift_markers() {
    let prepared = prepare_text(&marked(&["the ~", " cat"]));
    let transcription = transcribe(&prepared, lexicon, |ch| ch != '~');
    assert_eq!(transcription.dropped, vec!['~']);
    assert_eq!(transcription.symbols.iter().collect::<String>(), "ðə  kæt");
    assert_eq!(transcription.markers, vec![3]);
}

#[test]
fn test_aligner_offsets_across_segments() {
    let first = transcribe(&prepare_text(&marked(&["the", ""])), lexicon, |_| true);
    let second = transcribe(&prepare_text(&marked(&["", "cat", ""])), lexicon, |_| true);
    let mut aligner = MarkerAligner::new(1, 100.0);
    aligner.push_segment(&first);
    aligner.push_segment(&second);
    // one start symbol, then two for "the"
    assert_eq!(aligner.positions(), &[3, 3, 6]);
    assert_eq!(aligner.sample_offsets(), vec![300, 300, 600]);
}

#[test]
fn test_text_without_markers() {
    let prepared = prepare_text("  The   cat ");
    assert_eq!(prepared.text, "The cat");
    assert!(prepared.markers.is_empty());
    let transcription = transcribe(&prepared, lexicon, |_| true);
    assert!(transcription.markers.is_empty());
    assert_eq!(transcription.symbols.len(), 6);
}
